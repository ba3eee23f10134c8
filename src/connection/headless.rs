//! In-memory compositor used for headless runs, tests and benches.
//!
//! [`HeadlessConnection`] is what the host owns. [`HeadlessCompositor`] is
//! the other end: it plays the compositor, deciding when frames complete,
//! when buffers get released and whether imports succeed.

use super::{
    ConnectionEvent, DmabufParams, ShellHandle, SubsurfaceHandle, SurfaceHandle,
    WaylandConnection, WlBufferHandle,
};
use crate::formats::BufferFormatsWithModifiers;
use crate::geometry::{Rect, Size};
use crate::types::{feedback_flags, BufferFd, BufferId, PresentationFeedback};
use log::{debug, warn};
use memmap2::{Mmap, MmapOptions};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;

/// Refresh interval reported in presentation feedback (60 Hz).
const REFRESH_INTERVAL: Duration = Duration::from_nanos(16_666_667);

/// Requests observed by the headless compositor, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionOp {
    CreateSurface(SurfaceHandle),
    DestroySurface(SurfaceHandle),
    CreateToplevel(SurfaceHandle),
    CreatePopup {
        surface: SurfaceHandle,
        parent: SurfaceHandle,
        bounds: Rect,
    },
    DestroyShellObject(ShellHandle),
    CreateSubsurface {
        surface: SurfaceHandle,
        parent: SurfaceHandle,
    },
    SetSubsurfacePosition {
        subsurface: SubsurfaceHandle,
        x: i32,
        y: i32,
    },
    DestroySubsurface(SubsurfaceHandle),
    SetBufferScale {
        surface: SurfaceHandle,
        scale: i32,
    },
    CreateDmabufBuffer(BufferId),
    CreateShmBuffer(WlBufferHandle),
    DestroyBuffer(WlBufferHandle),
    Attach {
        surface: SurfaceHandle,
        buffer: Option<WlBufferHandle>,
    },
    Damage {
        surface: SurfaceHandle,
        damage: Rect,
    },
    Frame {
        surface: SurfaceHandle,
        buffer_id: BufferId,
    },
    Commit(SurfaceHandle),
}

#[derive(Debug, Default)]
struct SurfaceRecord {
    pending_attach: Option<Option<WlBufferHandle>>,
    current: Option<WlBufferHandle>,
    pending_frames: Vec<BufferId>,
    pending_feedback: Vec<BufferId>,
    committed_frames: VecDeque<BufferId>,
    committed_feedback: VecDeque<BufferId>,
}

#[derive(Debug)]
struct HeadlessState {
    formats: BufferFormatsWithModifiers,
    supports_dmabuf: bool,
    auto_complete: bool,
    fail_next_dmabuf_import: bool,
    next_id: u32,
    clock: Duration,
    surfaces: HashMap<SurfaceHandle, SurfaceRecord>,
    shm_mappings: HashMap<WlBufferHandle, Mmap>,
    live_buffers: Vec<WlBufferHandle>,
    ops: Vec<ConnectionOp>,
    events: VecDeque<ConnectionEvent>,
}

impl HeadlessState {
    fn next_object_id(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn complete_frame(&mut self, surface: SurfaceHandle) -> bool {
        let Some(record) = self.surfaces.get_mut(&surface) else {
            return false;
        };
        let frames: Vec<BufferId> = record.committed_frames.drain(..).collect();
        let feedback: Vec<BufferId> = record.committed_feedback.drain(..).collect();
        if frames.is_empty() && feedback.is_empty() {
            return false;
        }
        for buffer_id in frames {
            self.events
                .push_back(ConnectionEvent::FrameDone { surface, buffer_id });
        }
        for buffer_id in feedback {
            self.clock += REFRESH_INTERVAL;
            self.events.push_back(ConnectionEvent::Presented {
                surface,
                buffer_id,
                feedback: PresentationFeedback::new(
                    self.clock,
                    REFRESH_INTERVAL,
                    feedback_flags::VSYNC | feedback_flags::HW_COMPLETION,
                ),
            });
        }
        true
    }
}

/// The compositor end of a headless connection.
#[derive(Debug, Clone)]
pub struct HeadlessCompositor {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessCompositor {
    /// Fires the frame callbacks and presentation feedback committed on
    /// `surface`. Returns false if nothing was pending.
    pub fn complete_frame(&self, surface: SurfaceHandle) -> bool {
        self.state.lock().complete_frame(surface)
    }

    /// Fires every pending frame callback on every surface.
    pub fn complete_all_frames(&self) -> usize {
        let mut state = self.state.lock();
        let surfaces: Vec<SurfaceHandle> = state.surfaces.keys().copied().collect();
        surfaces
            .into_iter()
            .filter(|surface| state.complete_frame(*surface))
            .count()
    }

    /// Reports the commit of `buffer_id` on `surface` as discarded.
    pub fn discard(&self, surface: SurfaceHandle, buffer_id: BufferId) {
        self.state
            .lock()
            .events
            .push_back(ConnectionEvent::Discarded { surface, buffer_id });
    }

    /// Injects an arbitrary compositor event.
    pub fn push_event(&self, event: ConnectionEvent) {
        self.state.lock().events.push_back(event);
    }

    /// Makes the next dmabuf import fail.
    pub fn fail_next_dmabuf_import(&self) {
        self.state.lock().fail_next_dmabuf_import = true;
    }

    /// When set, every commit completes its frame immediately.
    pub fn set_auto_complete(&self, enabled: bool) {
        self.state.lock().auto_complete = enabled;
    }

    pub fn ops(&self) -> Vec<ConnectionOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    /// Buffer currently shown on `surface`.
    pub fn current_buffer(&self, surface: SurfaceHandle) -> Option<WlBufferHandle> {
        self.state
            .lock()
            .surfaces
            .get(&surface)
            .and_then(|record| record.current)
    }

    pub fn live_buffer_count(&self) -> usize {
        self.state.lock().live_buffers.len()
    }

    pub fn surface_count(&self) -> usize {
        self.state.lock().surfaces.len()
    }
}

/// The client end of a headless connection, owned by the host.
#[derive(Debug)]
pub struct HeadlessConnection {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessConnection {
    pub fn new(
        formats: BufferFormatsWithModifiers,
        supports_dmabuf: bool,
    ) -> (Self, HeadlessCompositor) {
        let state = Arc::new(Mutex::new(HeadlessState {
            formats,
            supports_dmabuf,
            auto_complete: false,
            fail_next_dmabuf_import: false,
            next_id: 0,
            clock: Duration::ZERO,
            surfaces: HashMap::new(),
            shm_mappings: HashMap::new(),
            live_buffers: Vec::new(),
            ops: Vec::new(),
            events: VecDeque::new(),
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            HeadlessCompositor { state },
        )
    }

    fn dmabuf_acceptable(state: &HeadlessState, params: &DmabufParams) -> bool {
        if !state.supports_dmabuf || !params.fd.is_valid() {
            return false;
        }
        match state.formats.get(&params.format) {
            Some(modifiers) => params.modifiers.iter().all(|m| modifiers.contains(m)),
            None => false,
        }
    }
}

impl WaylandConnection for HeadlessConnection {
    fn create_surface(&mut self) -> Option<SurfaceHandle> {
        let mut state = self.state.lock();
        let surface = SurfaceHandle(state.next_object_id());
        state.surfaces.insert(surface, SurfaceRecord::default());
        state.ops.push(ConnectionOp::CreateSurface(surface));
        Some(surface)
    }

    fn destroy_surface(&mut self, surface: SurfaceHandle) {
        let mut state = self.state.lock();
        state.surfaces.remove(&surface);
        state.ops.push(ConnectionOp::DestroySurface(surface));
    }

    fn create_toplevel(&mut self, surface: SurfaceHandle) -> Option<ShellHandle> {
        let mut state = self.state.lock();
        if !state.surfaces.contains_key(&surface) {
            return None;
        }
        state.ops.push(ConnectionOp::CreateToplevel(surface));
        Some(ShellHandle(state.next_object_id()))
    }

    fn create_popup(
        &mut self,
        surface: SurfaceHandle,
        parent: SurfaceHandle,
        bounds: Rect,
    ) -> Option<ShellHandle> {
        let mut state = self.state.lock();
        if !state.surfaces.contains_key(&surface) || !state.surfaces.contains_key(&parent) {
            return None;
        }
        state.ops.push(ConnectionOp::CreatePopup {
            surface,
            parent,
            bounds,
        });
        Some(ShellHandle(state.next_object_id()))
    }

    fn destroy_shell_object(&mut self, shell: ShellHandle) {
        self.state.lock().ops.push(ConnectionOp::DestroyShellObject(shell));
    }

    fn create_subsurface(
        &mut self,
        surface: SurfaceHandle,
        parent: SurfaceHandle,
    ) -> Option<SubsurfaceHandle> {
        let mut state = self.state.lock();
        if !state.surfaces.contains_key(&surface) || !state.surfaces.contains_key(&parent) {
            return None;
        }
        state.ops.push(ConnectionOp::CreateSubsurface { surface, parent });
        Some(SubsurfaceHandle(state.next_object_id()))
    }

    fn set_subsurface_position(&mut self, subsurface: SubsurfaceHandle, x: i32, y: i32) {
        self.state
            .lock()
            .ops
            .push(ConnectionOp::SetSubsurfacePosition { subsurface, x, y });
    }

    fn destroy_subsurface(&mut self, subsurface: SubsurfaceHandle) {
        self.state
            .lock()
            .ops
            .push(ConnectionOp::DestroySubsurface(subsurface));
    }

    fn set_buffer_scale(&mut self, surface: SurfaceHandle, scale: i32) {
        self.state
            .lock()
            .ops
            .push(ConnectionOp::SetBufferScale { surface, scale });
    }

    fn supported_formats(&self) -> BufferFormatsWithModifiers {
        self.state.lock().formats.clone()
    }

    fn supports_dmabuf(&self) -> bool {
        self.state.lock().supports_dmabuf
    }

    fn create_dmabuf_buffer(&mut self, buffer_id: BufferId, params: DmabufParams) {
        let mut state = self.state.lock();
        state.ops.push(ConnectionOp::CreateDmabufBuffer(buffer_id));

        let accepted =
            !std::mem::take(&mut state.fail_next_dmabuf_import) && Self::dmabuf_acceptable(&state, &params);
        let buffer = if accepted {
            let handle = WlBufferHandle(state.next_object_id());
            state.live_buffers.push(handle);
            Some(handle)
        } else {
            warn!("headless compositor rejected dmabuf for buffer {}", buffer_id);
            None
        };
        state
            .events
            .push_back(ConnectionEvent::DmabufImported { buffer_id, buffer });
    }

    fn create_shm_buffer(
        &mut self,
        fd: BufferFd,
        length: u64,
        size: Size,
    ) -> Option<WlBufferHandle> {
        let file = File::from(fd.into_owned()?);
        let file_len = file.metadata().ok()?.len();
        if file_len < length {
            warn!(
                "shm pool is {} bytes, {} requested for {}x{}",
                file_len, length, size.width, size.height
            );
            return None;
        }
        // SAFETY: the mapping is read-only and lives as long as the buffer.
        let map = unsafe { MmapOptions::new().len(length as usize).map(&file) }.ok()?;

        let mut state = self.state.lock();
        let handle = WlBufferHandle(state.next_object_id());
        state.shm_mappings.insert(handle, map);
        state.live_buffers.push(handle);
        state.ops.push(ConnectionOp::CreateShmBuffer(handle));
        Some(handle)
    }

    fn destroy_buffer(&mut self, buffer: WlBufferHandle) {
        let mut state = self.state.lock();
        state.shm_mappings.remove(&buffer);
        state.live_buffers.retain(|b| *b != buffer);
        state.ops.push(ConnectionOp::DestroyBuffer(buffer));
    }

    fn attach(&mut self, surface: SurfaceHandle, buffer: Option<WlBufferHandle>) {
        let mut state = self.state.lock();
        if let Some(record) = state.surfaces.get_mut(&surface) {
            record.pending_attach = Some(buffer);
        }
        state.ops.push(ConnectionOp::Attach { surface, buffer });
    }

    fn damage_buffer(&mut self, surface: SurfaceHandle, damage: Rect) {
        self.state
            .lock()
            .ops
            .push(ConnectionOp::Damage { surface, damage });
    }

    fn request_frame(&mut self, surface: SurfaceHandle, buffer_id: BufferId) {
        let mut state = self.state.lock();
        if let Some(record) = state.surfaces.get_mut(&surface) {
            record.pending_frames.push(buffer_id);
        }
        state.ops.push(ConnectionOp::Frame { surface, buffer_id });
    }

    fn request_presentation_feedback(&mut self, surface: SurfaceHandle, buffer_id: BufferId) {
        if let Some(record) = self.state.lock().surfaces.get_mut(&surface) {
            record.pending_feedback.push(buffer_id);
        }
    }

    fn commit(&mut self, surface: SurfaceHandle) {
        let mut state = self.state.lock();
        state.ops.push(ConnectionOp::Commit(surface));

        let mut released = None;
        if let Some(record) = state.surfaces.get_mut(&surface) {
            if let Some(next) = record.pending_attach.take() {
                if record.current != next {
                    released = record.current;
                }
                record.current = next;
            }
            let frames: Vec<BufferId> = record.pending_frames.drain(..).collect();
            record.committed_frames.extend(frames);
            let feedback: Vec<BufferId> = record.pending_feedback.drain(..).collect();
            record.committed_feedback.extend(feedback);
        }
        if let Some(buffer) = released {
            state
                .events
                .push_back(ConnectionEvent::BufferReleased { buffer });
        }
        if state.auto_complete {
            state.complete_frame(surface);
        }
    }

    fn flush(&mut self) {
        debug!("headless flush");
    }

    fn take_pending_events(&mut self) -> Vec<ConnectionEvent> {
        self.state.lock().events.drain(..).collect()
    }
}
