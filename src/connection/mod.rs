//! The host's view of its Wayland compositor connection.
//!
//! The real protocol objects (wl_surface, wl_buffer, zwp_linux_dmabuf,
//! wp_presentation, ...) live behind [`WaylandConnection`]. The host only
//! ever talks to the compositor through this trait, and compositor events
//! come back as [`ConnectionEvent`]s that the host pulls with
//! [`WaylandConnection::take_pending_events`].

pub mod headless;

pub use headless::{ConnectionOp, HeadlessCompositor, HeadlessConnection};

use crate::formats::BufferFormatsWithModifiers;
use crate::geometry::{Rect, Size};
use crate::types::{BufferFd, BufferId, PresentationFeedback};

/// Compositor-side surface object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceHandle(pub u32);

/// Compositor-side buffer object wrapping imported pixel memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WlBufferHandle(pub u32);

/// Role object (toplevel or popup) giving a surface its window semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShellHandle(pub u32);

/// Subsurface object placing a surface relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubsurfaceHandle(pub u32);

/// Everything the compositor needs to import a dmabuf.
#[derive(Debug)]
pub struct DmabufParams {
    pub fd: BufferFd,
    pub size: Size,
    pub strides: Vec<u32>,
    pub offsets: Vec<u32>,
    pub modifiers: Vec<u64>,
    pub format: u32,
    pub plane_count: u32,
}

/// Events delivered by the compositor.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Result of an asynchronous dmabuf import. `None` means the compositor
    /// rejected the buffer.
    DmabufImported {
        buffer_id: BufferId,
        buffer: Option<WlBufferHandle>,
    },
    /// The frame callback requested for `buffer_id` fired.
    FrameDone {
        surface: SurfaceHandle,
        buffer_id: BufferId,
    },
    /// The commit of `buffer_id` reached the screen.
    Presented {
        surface: SurfaceHandle,
        buffer_id: BufferId,
        feedback: PresentationFeedback,
    },
    /// The commit of `buffer_id` was never shown.
    Discarded {
        surface: SurfaceHandle,
        buffer_id: BufferId,
    },
    /// The compositor no longer reads from `buffer`.
    BufferReleased { buffer: WlBufferHandle },
}

/// Client-side connection to a Wayland compositor.
#[cfg_attr(test, mockall::automock)]
pub trait WaylandConnection: Send {
    fn create_surface(&mut self) -> Option<SurfaceHandle>;
    fn destroy_surface(&mut self, surface: SurfaceHandle);

    fn create_toplevel(&mut self, surface: SurfaceHandle) -> Option<ShellHandle>;
    /// Creates a popup role object placed at `bounds` relative to `parent`.
    fn create_popup(
        &mut self,
        surface: SurfaceHandle,
        parent: SurfaceHandle,
        bounds: Rect,
    ) -> Option<ShellHandle>;
    fn destroy_shell_object(&mut self, shell: ShellHandle);

    fn create_subsurface(
        &mut self,
        surface: SurfaceHandle,
        parent: SurfaceHandle,
    ) -> Option<SubsurfaceHandle>;
    fn set_subsurface_position(&mut self, subsurface: SubsurfaceHandle, x: i32, y: i32);
    fn destroy_subsurface(&mut self, subsurface: SubsurfaceHandle);

    fn set_buffer_scale(&mut self, surface: SurfaceHandle, scale: i32);

    fn supported_formats(&self) -> BufferFormatsWithModifiers;
    fn supports_dmabuf(&self) -> bool;

    /// Starts an asynchronous dmabuf import. The outcome arrives later as
    /// [`ConnectionEvent::DmabufImported`].
    fn create_dmabuf_buffer(&mut self, buffer_id: BufferId, params: DmabufParams);
    /// Imports shared memory synchronously.
    fn create_shm_buffer(&mut self, fd: BufferFd, length: u64, size: Size)
        -> Option<WlBufferHandle>;
    fn destroy_buffer(&mut self, buffer: WlBufferHandle);

    fn attach(&mut self, surface: SurfaceHandle, buffer: Option<WlBufferHandle>);
    fn damage_buffer(&mut self, surface: SurfaceHandle, damage: Rect);
    /// Requests a frame callback tagged with the buffer being committed.
    fn request_frame(&mut self, surface: SurfaceHandle, buffer_id: BufferId);
    /// Requests presentation feedback tagged with the buffer being committed.
    fn request_presentation_feedback(&mut self, surface: SurfaceHandle, buffer_id: BufferId);
    fn commit(&mut self, surface: SurfaceHandle);
    fn flush(&mut self);

    /// Drains events the compositor has sent since the last call.
    fn take_pending_events(&mut self) -> Vec<ConnectionEvent>;
}
