//! Same-process strategy: producer calls lock the platform and run on the
//! host directly, and callbacks reach the surface registry synchronously.
//!
//! Callbacks fire while the platform is locked, from inside
//! [`WaylandPlatform::dispatch_pending_events`]. A [`SurfaceClient`] must
//! not call back into the manager from there; queue the next frame
//! instead.
//!
//! [`SurfaceClient`]: crate::gpu::SurfaceClient

use super::{GpuEvent, GpuSink, HostLink, HostRequest};
use crate::connection::DmabufParams;
use crate::geometry::{Rect, Size};
use crate::gpu::{BufferManagerGpu, SurfaceRegistry};
use crate::platform::WaylandPlatform;
use crate::types::{BufferFd, BufferId, PresentationFeedback, SwapResult, WidgetId};
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;

/// Wires a producer manager to `platform` without any thread hop.
pub fn connect(platform: Arc<Mutex<WaylandPlatform>>) -> BufferManagerGpu {
    let registry = Arc::new(SurfaceRegistry::new());
    let params = {
        let mut platform = platform.lock();
        platform.host.set_gpu_sink(Box::new(InProcessSink {
            registry: Arc::clone(&registry),
        }));
        platform.host.initialize_params()
    };
    BufferManagerGpu::new(Box::new(InProcessLink { platform }), registry, params)
}

pub struct InProcessLink {
    platform: Arc<Mutex<WaylandPlatform>>,
}

impl InProcessLink {
    fn execute(&self, request: HostRequest) {
        let name = request.name();
        let mut platform = self.platform.lock();
        // Failures were already reported by the host.
        if let Err(err) = request.apply(&mut platform.host) {
            debug!("{} failed: {}", name, err);
        }
    }
}

impl HostLink for InProcessLink {
    fn create_dmabuf_buffer(&self, params: DmabufParams, buffer_id: BufferId) {
        self.execute(HostRequest::CreateDmabufBasedBuffer { params, buffer_id });
    }

    fn create_shm_buffer(&self, fd: BufferFd, length: u64, size: Size, buffer_id: BufferId) {
        self.execute(HostRequest::CreateShmBasedBuffer {
            fd,
            length,
            size,
            buffer_id,
        });
    }

    fn commit_buffer(&self, widget: WidgetId, buffer_id: BufferId, damage: Rect) {
        self.execute(HostRequest::CommitBuffer {
            widget,
            buffer_id,
            damage,
        });
    }

    fn destroy_buffer(&self, widget: WidgetId, buffer_id: BufferId) {
        self.execute(HostRequest::DestroyBuffer { widget, buffer_id });
    }
}

struct InProcessSink {
    registry: Arc<SurfaceRegistry>,
}

impl GpuSink for InProcessSink {
    fn on_submission(&mut self, widget: WidgetId, buffer_id: BufferId, result: SwapResult) {
        self.registry.dispatch(GpuEvent::Submission {
            widget,
            buffer_id,
            result,
        });
    }

    fn on_presentation(
        &mut self,
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
}
