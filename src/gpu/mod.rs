//! Producer-side entry point.
//!
//! Rendering code allocates buffer ids, creates buffers from file
//! descriptors and commits them to widgets through [`BufferManagerGpu`].
//! Per-widget [`SurfaceClient`]s receive submission and presentation
//! callbacks. Which transport carries the calls is fixed when the manager
//! is built, see [`crate::transport`].

#[cfg(test)]
mod tests;

use crate::connection::DmabufParams;
use crate::formats::BufferFormatsWithModifiers;
use crate::geometry::{Rect, Size};
use crate::transport::{GpuEvent, HostLink, InitializeParams};
use crate::types::{BufferFd, BufferId, PresentationFeedback, SwapResult, WidgetId};
use log::{debug, error, trace};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Receives callbacks for one widget.
pub trait SurfaceClient: Send + Sync {
    fn on_submission(&self, buffer_id: BufferId, result: SwapResult);
    fn on_presentation(&self, buffer_id: BufferId, feedback: PresentationFeedback);
}

/// Widget → surface client lookup shared by the manager and its transport.
#[derive(Default)]
pub struct SurfaceRegistry {
    surfaces: Mutex<HashMap<WidgetId, Arc<dyn SurfaceClient>>>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, widget: WidgetId, client: Arc<dyn SurfaceClient>) {
        self.surfaces.lock().insert(widget, client);
    }

    pub fn unregister(&self, widget: WidgetId) {
        self.surfaces.lock().remove(&widget);
    }

    pub fn get(&self, widget: WidgetId) -> Option<Arc<dyn SurfaceClient>> {
        self.surfaces.lock().get(&widget).cloned()
    }

    pub fn len(&self) -> usize {
        self.surfaces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.lock().is_empty()
    }

    /// Hands an event to its widget's client. Events for widgets that
    /// already went away are dropped.
    pub fn dispatch(&self, event: GpuEvent) {
        // Clone out of the lock so a client may register or unregister
        // surfaces from inside its callback.
        let Some(client) = self.get(event.widget()) else {
            trace!("no surface for {}, dropping {:?}", event.widget(), event);
            return;
        };
        match event {
            GpuEvent::Submission {
                buffer_id, result, ..
            } => client.on_submission(buffer_id, result),
            GpuEvent::Presentation {
                buffer_id,
                feedback,
                ..
            } => client.on_presentation(buffer_id, feedback),
        }
    }
}

impl std::fmt::Debug for SurfaceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let widgets: Vec<WidgetId> = self.surfaces.lock().keys().copied().collect();
        f.debug_struct("SurfaceRegistry")
            .field("widgets", &widgets)
            .finish()
    }
}

pub struct BufferManagerGpu {
    next_buffer_id: AtomicU32,
    registry: Arc<SurfaceRegistry>,
    link: Box<dyn HostLink>,
    params: InitializeParams,
}

impl BufferManagerGpu {
    pub fn new(
        link: Box<dyn HostLink>,
        registry: Arc<SurfaceRegistry>,
        params: InitializeParams,
    ) -> Self {
        debug!(
            "producer manager initialized: {} formats, dmabuf {}",
            params.formats.len(),
            params.supports_dmabuf
        );
        Self {
            next_buffer_id: AtomicU32::new(1),
            registry,
            link,
            params,
        }
    }

    /// Process-unique and never reused. Ids run from 1 to `u32::MAX - 1`;
    /// once they are used up every call returns 0, which the host rejects.
    pub fn allocate_buffer_id(&self) -> BufferId {
        self.next_buffer_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| id.checked_add(1))
            .unwrap_or_else(|_| {
                error!("❌ Buffer ids exhausted");
                0
            })
    }

    pub fn supported_buffer_formats(&self) -> &BufferFormatsWithModifiers {
        &self.params.formats
    }

    pub fn supports_dmabuf(&self) -> bool {
        self.params.supports_dmabuf
    }

    pub fn registry(&self) -> &Arc<SurfaceRegistry> {
        &self.registry
    }

    /// Ownership of `fd` moves to the host. Malformed parameters are caught
    /// host-side and end the connection.
    #[allow(clippy::too_many_arguments)]
    pub fn create_dmabuf_based_buffer(
        &self,
        fd: BufferFd,
        size: Size,
        strides: Vec<u32>,
        offsets: Vec<u32>,
        modifiers: Vec<u64>,
        format: u32,
        plane_count: u32,
        buffer_id: BufferId,
    ) {
        let params = DmabufParams {
            fd,
            size,
            strides,
            offsets,
            modifiers,
            format,
            plane_count,
        };
        self.link.create_dmabuf_buffer(params, buffer_id);
    }

    pub fn create_shm_based_buffer(
        &self,
        fd: BufferFd,
        length: u64,
        size: Size,
        buffer_id: BufferId,
    ) {
        self.link.create_shm_buffer(fd, length, size, buffer_id);
    }

    /// Must not be called again for `widget` before the previous commit's
    /// submission callback.
    pub fn commit_buffer(&self, widget: WidgetId, buffer_id: BufferId, damage: Rect) {
        self.link.commit_buffer(widget, buffer_id, damage);
    }

    /// Safe while a commit of the buffer is in flight.
    pub fn destroy_buffer(&self, widget: WidgetId, buffer_id: BufferId) {
        self.link.destroy_buffer(widget, buffer_id);
    }

    pub fn on_submission(&self, widget: WidgetId, buffer_id: BufferId, result: SwapResult) {
        self.registry.dispatch(GpuEvent::Submission {
            widget,
            buffer_id,
            result,
        });
    }

    pub fn on_presentation(
        &self,
        widget: WidgetId,
        buffer_id: BufferId,
        feedback: PresentationFeedback,
    ) {
        self.registry.dispatch(GpuEvent::Presentation {
            widget,
            buffer_id,
            feedback,
        });
    }

    pub fn register_surface(&self, widget: WidgetId, client: Arc<dyn SurfaceClient>) {
        self.registry.register(widget, client);
    }

    pub fn unregister_surface(&self, widget: WidgetId) {
        self.registry.unregister(widget);
    }

    pub fn get_surface(&self, widget: WidgetId) -> Option<Arc<dyn SurfaceClient>> {
        self.registry.get(widget)
    }
}

impl std::fmt::Debug for BufferManagerGpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferManagerGpu")
            .field("next_buffer_id", &self.next_buffer_id)
            .field("registry", &self.registry)
            .field("params", &self.params)
            .finish()
    }
}
