//! # wlbridge
//!
//! Hands pixel buffers allocated by a rendering producer to a Wayland
//! client connection, and routes frame feedback back to the producer.
//!
//! ## Architecture
//!
//! - `gpu`: producer-side [`BufferManagerGpu`], buffer ids and per-widget callbacks
//! - `host`: [`BufferManagerHost`], validation and the per-surface commit state machine
//! - `transport`: same-process and cross-process strategies between the two
//! - `window`: toplevels, popups and tooltip subsurfaces, and their buffer scale
//! - `connection`: the compositor seam, with an in-memory implementation
//! - `config`: TOML configuration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use wlbridge::{task_queue, transport, BridgeConfig, WaylandPlatform};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BridgeConfig::default();
//!     let (platform, _compositor) =
//!         WaylandPlatform::headless(&config, Box::new(|msg: &str| eprintln!("{msg}")));
//!     let (commit_runner, mut commit_queue) = task_queue();
//!     let session = transport::remote::connect(platform, commit_runner);
//!     let id = session.gpu.allocate_buffer_id();
//!     println!("first buffer id {id}");
//!     commit_queue.run_until_idle();
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod formats;
pub mod geometry;
pub mod gpu;
pub mod host;
pub mod logging;
pub mod platform;
pub mod task;
pub mod transport;
pub mod types;
pub mod window;

pub use config::{BridgeConfig, TransportMode};
pub use error::{BufferError, Severity};
pub use gpu::{BufferManagerGpu, SurfaceClient, SurfaceRegistry};
pub use host::BufferManagerHost;
pub use platform::WaylandPlatform;
pub use task::{task_queue, TaskQueue, TaskRunner};
pub use types::{BufferFd, BufferId, PresentationFeedback, SwapResult, WidgetId};
pub use window::{WindowInitProperties, WindowKind, WindowManager};

pub use anyhow::{Context, Error, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
