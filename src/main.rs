//! # wlbridge - headless buffer bridge runner
//!
//! Runs a producer against the in-memory compositor through the configured
//! transport: one toplevel window, a stream of shm frames, and the
//! submission and presentation feedback that comes back for each.

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info, warn};
use parking_lot::Mutex;
use std::ffi::CString;
use std::os::fd::{FromRawFd, OwnedFd};
use std::sync::Arc;
use wlbridge::connection::HeadlessCompositor;
use wlbridge::geometry::{Rect, Size};
use wlbridge::transport::{in_process, remote};
use wlbridge::{
    task_queue, BridgeConfig, BufferFd, BufferId, BufferManagerGpu, PresentationFeedback,
    SurfaceClient, SwapResult, TransportMode, WaylandPlatform, WidgetId, WindowInitProperties,
};

#[derive(Parser)]
#[command(name = "wlbridge")]
#[command(about = "Shares producer buffers with a Wayland connection and reports frame feedback")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/wlbridge/wlbridge.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Override the transport: in-process or cross-process
    #[arg(short, long)]
    mode: Option<TransportMode>,

    /// Number of frames to commit
    #[arg(short, long, default_value_t = 3)]
    frames: u32,

    /// Window size in pixels
    #[arg(long, default_value_t = 640)]
    width: i32,

    #[arg(long, default_value_t = 480)]
    height: i32,
}

/// Counts the callbacks of the one demo window.
#[derive(Default)]
struct FrameCounter {
    submissions: Mutex<Vec<(BufferId, SwapResult)>>,
    presentations: Mutex<u32>,
}

impl FrameCounter {
    fn submitted(&self) -> usize {
        self.submissions.lock().len()
    }
}

impl SurfaceClient for FrameCounter {
    fn on_submission(&self, buffer_id: BufferId, result: SwapResult) {
        info!("🖼️ Buffer {} submitted: {:?}", buffer_id, result);
        self.submissions.lock().push((buffer_id, result));
    }

    fn on_presentation(&self, buffer_id: BufferId, feedback: PresentationFeedback) {
        if feedback.is_failure() {
            warn!("⚠️ Buffer {} was never presented", buffer_id);
        } else {
            info!(
                "✨ Buffer {} presented at {:?} (refresh {:?})",
                buffer_id, feedback.timestamp, feedback.interval
            );
        }
        *self.presentations.lock() += 1;
    }
}

/// Shared memory for one frame, sized for 4 bytes per pixel.
fn create_shm_fd(size: Size) -> Result<(BufferFd, u64)> {
    let length = u64::from(size.width.unsigned_abs()) * u64::from(size.height.unsigned_abs()) * 4;
    let name = CString::new("wlbridge-frame")?;
    // SAFETY: name is a valid NUL-terminated string.
    let raw = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if raw < 0 {
        return Err(std::io::Error::last_os_error()).context("memfd_create failed");
    }
    // SAFETY: raw was just returned by memfd_create and is owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    let file = std::fs::File::from(fd);
    file.set_len(length).context("failed to size the shm pool")?;
    Ok((BufferFd::from(file), length))
}

fn create_frame(gpu: &BufferManagerGpu, size: Size) -> Result<BufferId> {
    let buffer_id = gpu.allocate_buffer_id();
    let (fd, length) = create_shm_fd(size)?;
    gpu.create_shm_based_buffer(fd, length, size, buffer_id);
    Ok(buffer_id)
}

fn error_handler(errors: &Arc<Mutex<Vec<String>>>) -> wlbridge::host::ErrorHandler {
    let errors = Arc::clone(errors);
    Box::new(move |message: &str| {
        error!("❌ Producer terminated: {}", message);
        errors.lock().push(message.to_string());
    })
}

fn run_in_process(
    platform: WaylandPlatform,
    compositor: HeadlessCompositor,
    cli: &Cli,
    errors: &Arc<Mutex<Vec<String>>>,
) -> Result<Arc<FrameCounter>> {
    let size = Size::new(cli.width, cli.height);
    let platform = Arc::new(Mutex::new(platform));
    let widget = {
        let mut platform = platform.lock();
        let widget = platform.create_window(WindowInitProperties::toplevel(Rect::from_size(size)))?;
        platform.show_window(widget)?;
        widget
    };

    let gpu = in_process::connect(Arc::clone(&platform));
    let counter = Arc::new(FrameCounter::default());
    gpu.register_surface(widget, counter.clone());

    for frame in 0..cli.frames {
        let buffer_id = create_frame(&gpu, size)?;
        gpu.commit_buffer(widget, buffer_id, Rect::from_size(size));
        compositor.complete_all_frames();
        platform.lock().dispatch_pending_events();
        if !errors.lock().is_empty() {
            bail!("connection died at frame {}", frame);
        }
    }
    Ok(counter)
}

async fn run_cross_process(
    platform: WaylandPlatform,
    cli: &Cli,
    errors: &Arc<Mutex<Vec<String>>>,
) -> Result<Arc<FrameCounter>> {
    let size = Size::new(cli.width, cli.height);
    let (commit_runner, mut commit_queue) = task_queue();
    let session = remote::connect(platform, commit_runner);

    let widget: WidgetId = session
        .platform
        .run(move |platform| -> Result<WidgetId> {
            let widget =
                platform.create_window(WindowInitProperties::toplevel(Rect::from_size(size)))?;
            platform.show_window(widget)?;
            Ok(widget)
        })
        .await
        .context("host service stopped")??;

    let counter = Arc::new(FrameCounter::default());
    session.gpu.register_surface(widget, counter.clone());

    for frame in 0..cli.frames {
        let buffer_id = create_frame(&session.gpu, size)?;
        session
            .gpu
            .commit_buffer(widget, buffer_id, Rect::from_size(size));
        while counter.submitted() <= frame as usize {
            if !errors.lock().is_empty() {
                bail!("connection died at frame {}", frame);
            }
            if !commit_queue.run_next().await {
                bail!("commit context closed at frame {}", frame);
            }
        }
    }

    drop(session.gpu);
    drop(session.platform);
    let _ = session.gpu_io_task.await;
    commit_queue.run_until_idle();
    let platform = session.host_task.await.context("host service panicked")?;
    info!("🔌 Host service returned: {:?}", platform.host);
    Ok(counter)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match BridgeConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}; using defaults");
            BridgeConfig::default()
        }
    };
    if let Some(mode) = cli.mode {
        config.transport.mode = mode;
    }
    wlbridge::logging::init_from_config(&config.logging, cli.debug);

    info!(
        "🚀 Starting wlbridge {} ({}, built {})",
        wlbridge::VERSION,
        env!("GIT_COMMIT"),
        env!("BUILD_DATE")
    );
    info!("📄 Transport: {:?}", config.transport.mode);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let (platform, compositor) = WaylandPlatform::headless(&config, error_handler(&errors));

    let counter = match config.transport.mode {
        TransportMode::InProcess => run_in_process(platform, compositor, &cli, &errors)?,
        TransportMode::CrossProcess => {
            compositor.set_auto_complete(true);
            run_cross_process(platform, &cli, &errors).await?
        }
    };

    let acked = counter
        .submissions
        .lock()
        .iter()
        .filter(|(_, result)| *result == SwapResult::Ack)
        .count();
    info!(
        "👋 {} frames committed, {} acknowledged, {} presented",
        cli.frames,
        acked,
        *counter.presentations.lock()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["wlbridge"]).unwrap();
        assert!(!cli.debug);
        assert!(cli.mode.is_none());
        assert_eq!(cli.frames, 3);
    }

    #[test]
    fn test_cli_mode_override() {
        let cli = Cli::try_parse_from(["wlbridge", "--debug", "--mode", "in-process", "-f", "10"])
            .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.mode, Some(TransportMode::InProcess));
        assert_eq!(cli.frames, 10);
        assert!(Cli::try_parse_from(["wlbridge", "--mode", "carrier-pigeon"]).is_err());
    }

    #[test]
    fn shm_fd_is_sized_for_the_frame() {
        let (fd, length) = create_shm_fd(Size::new(16, 8)).unwrap();
        assert_eq!(length, 512);
        assert!(fd.is_valid());
    }
}
