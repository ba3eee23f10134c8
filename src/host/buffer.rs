use crate::connection::WlBufferHandle;
use crate::geometry::{Rect, Size};
use crate::types::BufferId;

/// What kind of memory backs a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferKind {
    Dmabuf { format: u32, plane_count: u32 },
    Shm { length: u64 },
}

/// Host-side record of one buffer created by the producer.
///
/// Dmabuf-backed records exist before their `wl_buffer` does: the import is
/// asynchronous and [`BufferRecord::wl_buffer`] stays `None` until the
/// compositor answers.
#[derive(Debug)]
pub struct BufferRecord {
    pub buffer_id: BufferId,
    /// Actual buffer size.
    pub size: Size,
    pub kind: BufferKind,
    /// Damage to apply on the next attach. Emptied once submitted.
    pub damage_region: Rect,
    pub wl_buffer: Option<WlBufferHandle>,
    /// True once the compositor produced a backing object.
    pub attached: bool,
    /// False while the compositor may still read the pixels.
    pub released: bool,
}

impl BufferRecord {
    pub fn new(buffer_id: BufferId, size: Size, kind: BufferKind) -> Self {
        Self {
            buffer_id,
            size,
            kind,
            damage_region: Rect::default(),
            wl_buffer: None,
            attached: false,
            released: true,
        }
    }

    pub fn set_backing(&mut self, wl_buffer: WlBufferHandle) {
        self.wl_buffer = Some(wl_buffer);
        self.attached = true;
    }
}
