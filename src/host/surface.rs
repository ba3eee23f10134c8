//! Per-widget bookkeeping: which buffers a surface owns and where its
//! single in-flight commit stands.
//!
//! ```text
//!            commit                     frame done (same buffer id)
//!   Idle ─────────────► Committing ─────────────────────────► Idle
//!    ▲                      │
//!    └──────────────────────┘  reset_surface_contents (unconditional)
//! ```

use super::buffer::BufferRecord;
use crate::connection::{SurfaceHandle, WlBufferHandle};
use crate::error::BufferError;
use crate::geometry::Rect;
use crate::types::{BufferId, PresentationFeedback, WidgetId};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfacePhase {
    Idle,
    /// A commit of `buffer_id` awaits its frame callback.
    Committing { buffer_id: BufferId },
}

/// What to do with a presentation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationRoute {
    Deliver,
    /// The submission for this buffer has not been reported yet.
    HoldBack,
    Drop,
}

#[derive(Debug)]
pub struct SurfaceState {
    pub widget: WidgetId,
    pub surface: SurfaceHandle,
    buffers: HashMap<BufferId, BufferRecord>,
    phase: SurfacePhase,
    /// The in-flight buffer has no wl_buffer yet; attach once it does.
    awaiting_backing: bool,
    attached_buffer: Option<BufferId>,
    awaiting_presentation: VecDeque<BufferId>,
    held_presentations: Vec<(BufferId, PresentationFeedback)>,
    pending_destroy: HashSet<BufferId>,
}

impl SurfaceState {
    pub fn new(widget: WidgetId, surface: SurfaceHandle) -> Self {
        Self {
            widget,
            surface,
            buffers: HashMap::new(),
            phase: SurfacePhase::Idle,
            awaiting_backing: false,
            attached_buffer: None,
            awaiting_presentation: VecDeque::new(),
            held_presentations: Vec::new(),
            pending_destroy: HashSet::new(),
        }
    }

    pub fn phase(&self) -> SurfacePhase {
        self.phase
    }

    pub fn in_flight(&self) -> Option<BufferId> {
        match self.phase {
            SurfacePhase::Committing { buffer_id } => Some(buffer_id),
            SurfacePhase::Idle => None,
        }
    }

    pub fn attached_buffer(&self) -> Option<BufferId> {
        self.attached_buffer
    }

    pub fn contains(&self, buffer_id: BufferId) -> bool {
        self.buffers.contains_key(&buffer_id)
    }

    pub fn buffer(&self, buffer_id: BufferId) -> Option<&BufferRecord> {
        self.buffers.get(&buffer_id)
    }

    pub fn buffer_mut(&mut self, buffer_id: BufferId) -> Option<&mut BufferRecord> {
        self.buffers.get_mut(&buffer_id)
    }

    pub fn buffer_by_backing_mut(&mut self, wl_buffer: WlBufferHandle) -> Option<&mut BufferRecord> {
        self.buffers
            .values_mut()
            .find(|record| record.wl_buffer == Some(wl_buffer))
    }

    pub fn insert(&mut self, record: BufferRecord) {
        self.buffers.insert(record.buffer_id, record);
    }

    pub fn remove(&mut self, buffer_id: BufferId) -> Option<BufferRecord> {
        self.pending_destroy.remove(&buffer_id);
        if self.attached_buffer == Some(buffer_id) {
            self.attached_buffer = None;
        }
        self.buffers.remove(&buffer_id)
    }

    /// Moves to `Committing`. Rejects a second commit while one is in flight.
    pub fn begin_commit(&mut self, buffer_id: BufferId, damage: Rect) -> Result<(), BufferError> {
        if let Some(in_flight) = self.in_flight() {
            return Err(BufferError::CommitInFlight {
                widget: self.widget,
                in_flight,
                buffer_id,
            });
        }
        let record = self
            .buffers
            .get_mut(&buffer_id)
            .ok_or(BufferError::UnknownBuffer(buffer_id))?;
        record.damage_region = damage;
        self.awaiting_backing = record.wl_buffer.is_none();
        self.phase = SurfacePhase::Committing { buffer_id };
        Ok(())
    }

    pub fn is_awaiting_backing(&self, buffer_id: BufferId) -> bool {
        self.awaiting_backing && self.in_flight() == Some(buffer_id)
    }

    /// Records that `buffer_id` was attached, returning the buffer it superseded.
    pub fn mark_attached(&mut self, buffer_id: BufferId) -> Option<BufferId> {
        self.awaiting_backing = false;
        let previous = self.attached_buffer.replace(buffer_id);
        previous.filter(|prev| *prev != buffer_id)
    }

    /// Frame callback for `buffer_id`. Returns false for stale callbacks,
    /// e.g. ones belonging to a commit cancelled by a reset.
    pub fn finish_commit(&mut self, buffer_id: BufferId) -> bool {
        if self.in_flight() != Some(buffer_id) || self.awaiting_backing {
            return false;
        }
        self.phase = SurfacePhase::Idle;
        if let Some(record) = self.buffers.get_mut(&buffer_id) {
            record.damage_region = Rect::default();
        }
        self.awaiting_presentation.push_back(buffer_id);
        true
    }

    /// Forces `Idle`, returning the commit that was cancelled, if any.
    pub fn cancel_commit(&mut self) -> Option<BufferId> {
        let cancelled = self.in_flight();
        self.phase = SurfacePhase::Idle;
        self.awaiting_backing = false;
        self.attached_buffer = None;
        if let Some(buffer_id) = cancelled {
            self.held_presentations.retain(|(id, _)| *id != buffer_id);
        }
        cancelled
    }

    pub fn route_presentation(&mut self, buffer_id: BufferId) -> PresentationRoute {
        if let Some(pos) = self.awaiting_presentation.iter().position(|id| *id == buffer_id) {
            self.awaiting_presentation.remove(pos);
            PresentationRoute::Deliver
        } else if self.in_flight() == Some(buffer_id) {
            PresentationRoute::HoldBack
        } else {
            PresentationRoute::Drop
        }
    }

    pub fn hold_presentation(&mut self, buffer_id: BufferId, feedback: PresentationFeedback) {
        self.held_presentations.push((buffer_id, feedback));
    }

    /// Presentation events that arrived before `buffer_id` was submitted.
    pub fn take_held_presentations(&mut self, buffer_id: BufferId) -> Vec<PresentationFeedback> {
        let mut taken = Vec::new();
        self.held_presentations.retain(|(id, feedback)| {
            if *id == buffer_id {
                taken.push(*feedback);
                false
            } else {
                true
            }
        });
        if !taken.is_empty() {
            // The held events answer this submission.
            if let Some(pos) = self.awaiting_presentation.iter().position(|id| *id == buffer_id) {
                self.awaiting_presentation.remove(pos);
            }
        }
        taken
    }

    pub fn mark_for_destroy(&mut self, buffer_id: BufferId) {
        self.pending_destroy.insert(buffer_id);
    }

    pub fn is_marked_for_destroy(&self, buffer_id: BufferId) -> bool {
        self.pending_destroy.contains(&buffer_id)
    }

    /// Drops every buffer and returns to `Idle`.
    pub fn clear(&mut self) -> Vec<BufferRecord> {
        self.phase = SurfacePhase::Idle;
        self.awaiting_backing = false;
        self.attached_buffer = None;
        self.awaiting_presentation.clear();
        self.held_presentations.clear();
        self.pending_destroy.clear();
        self.buffers.drain().map(|(_, record)| record).collect()
    }
}
