//! Message set between the producer (Gpu) side and the host, and the two
//! strategies that carry it.
//!
//! The producer talks to the host through a [`HostLink`]; the host answers
//! through a [`GpuSink`]. [`in_process`] wires both as direct calls,
//! [`remote`] carries them over channels between tokio tasks.

pub mod in_process;
pub mod remote;

use crate::connection::DmabufParams;
use crate::error::BufferError;
use crate::formats::BufferFormatsWithModifiers;
use crate::geometry::{Rect, Size};
use crate::host::BufferManagerHost;
use crate::types::{BufferFd, BufferId, PresentationFeedback, SwapResult, WidgetId};
use log::debug;
use tokio::sync::mpsc;

/// Sent to the producer when the connection is established.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InitializeParams {
    pub formats: BufferFormatsWithModifiers,
    pub supports_dmabuf: bool,
}

/// Host → producer callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuEvent {
    Submission {
        widget: WidgetId,
        buffer_id: BufferId,
        result: SwapResult,
    },
    Presentation {
        widget: WidgetId,
        buffer_id: BufferId,
        feedback: PresentationFeedback,
    },
}

impl GpuEvent {
    pub fn widget(&self) -> WidgetId {
        match self {
            GpuEvent::Submission { widget, .. } | GpuEvent::Presentation { widget, .. } => *widget,
        }
    }
}

/// Where the host sends submission and presentation callbacks.
pub trait GpuSink: Send {
    fn on_submission(&mut self, widget: WidgetId, buffer_id: BufferId, result: SwapResult);
    fn on_presentation(
        &mut self,
        widget: WidgetId,
        buffer_id: BufferId,
        feedback: PresentationFeedback,
    );
}

/// The back-channel of the cross-process strategy.
impl GpuSink for mpsc::UnboundedSender<GpuEvent> {
    fn on_submission(&mut self, widget: WidgetId, buffer_id: BufferId, result: SwapResult) {
        let event = GpuEvent::Submission {
            widget,
            buffer_id,
            result,
        };
        if self.send(event).is_err() {
            debug!("producer gone, dropping submission of buffer {}", buffer_id);
        }
    }

    fn on_presentation(
        &mut self,
        widget: WidgetId,
        buffer_id: BufferId,
        feedback: PresentationFeedback,
    ) {
        let event = GpuEvent::Presentation {
            widget,
            buffer_id,
            feedback,
        };
        if self.send(event).is_err() {
            debug!("producer gone, dropping presentation of buffer {}", buffer_id);
        }
    }
}

/// Producer → host requests.
#[derive(Debug)]
pub enum HostRequest {
    /// Installs the back-channel. Sent once, right after connecting.
    SetBufferManagerGpu(mpsc::UnboundedSender<GpuEvent>),
    CreateDmabufBasedBuffer {
        params: DmabufParams,
        buffer_id: BufferId,
    },
    CreateShmBasedBuffer {
        fd: BufferFd,
        length: u64,
        size: Size,
        buffer_id: BufferId,
    },
    CommitBuffer {
        widget: WidgetId,
        buffer_id: BufferId,
        damage: Rect,
    },
    DestroyBuffer {
        widget: WidgetId,
        buffer_id: BufferId,
    },
}

impl HostRequest {
    pub fn name(&self) -> &'static str {
        match self {
            HostRequest::SetBufferManagerGpu(_) => "SetBufferManagerGpu",
            HostRequest::CreateDmabufBasedBuffer { .. } => "CreateDmabufBasedBuffer",
            HostRequest::CreateShmBasedBuffer { .. } => "CreateShmBasedBuffer",
            HostRequest::CommitBuffer { .. } => "CommitBuffer",
            HostRequest::DestroyBuffer { .. } => "DestroyBuffer",
        }
    }

    /// Executes the request against the host.
    pub fn apply(self, host: &mut BufferManagerHost) -> Result<(), BufferError> {
        match self {
            HostRequest::SetBufferManagerGpu(sender) => {
                host.set_gpu_sink(Box::new(sender));
                Ok(())
            }
            HostRequest::CreateDmabufBasedBuffer { params, buffer_id } => {
                host.create_buffer_dmabuf(params, buffer_id)
            }
            HostRequest::CreateShmBasedBuffer {
                fd,
                length,
                size,
                buffer_id,
            } => host.create_buffer_shm(fd, length, size, buffer_id),
            HostRequest::CommitBuffer {
                widget,
                buffer_id,
                damage,
            } => host.commit_buffer_with_id(widget, buffer_id, damage),
            HostRequest::DestroyBuffer { widget, buffer_id } => {
                host.destroy_buffer_with_id(widget, buffer_id)
            }
        }
    }
}

/// How the producer reaches the host. Calls never block and report
/// nothing back: failures are only visible as the connection dying.
pub trait HostLink: Send + Sync {
    fn create_dmabuf_buffer(&self, params: DmabufParams, buffer_id: BufferId);
    fn create_shm_buffer(&self, fd: BufferFd, length: u64, size: Size, buffer_id: BufferId);
    fn commit_buffer(&self, widget: WidgetId, buffer_id: BufferId, damage: Rect);
    fn destroy_buffer(&self, widget: WidgetId, buffer_id: BufferId);
}
