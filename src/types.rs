//! Identifiers and small value types shared by both sides of the bridge.

use std::fmt;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

/// Accelerated widget identifier. Equal to the id of the window's compositor surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WidgetId(pub u32);

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "widget#{}", self.0)
    }
}

/// Buffer id allocated by the producer side. Zero is never a valid id.
pub type BufferId = u32;

/// Outcome of a single commit as reported to the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapResult {
    /// The compositor consumed the frame.
    Ack,
    /// The frame could not be shown.
    Failed,
    /// The commit was cancelled before the compositor acknowledged it
    /// (the surface contents were reset).
    Skipped,
}

/// Presentation feedback flags, mirroring wp_presentation_feedback.kind.
pub mod feedback_flags {
    pub const VSYNC: u32 = 0x1;
    pub const HW_CLOCK: u32 = 0x2;
    pub const HW_COMPLETION: u32 = 0x4;
    pub const ZERO_COPY: u32 = 0x8;
    /// Set when the frame was discarded instead of presented.
    pub const FAILURE: u32 = 0x100;
}

/// Post-hoc timing information about a presented frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PresentationFeedback {
    /// Presentation timestamp on the compositor's clock.
    pub timestamp: Duration,
    /// Refresh interval of the output, zero if unknown.
    pub interval: Duration,
    pub flags: u32,
}

impl PresentationFeedback {
    pub fn new(timestamp: Duration, interval: Duration, flags: u32) -> Self {
        Self {
            timestamp,
            interval,
            flags,
        }
    }

    /// Feedback for a discarded frame.
    pub fn failure() -> Self {
        Self {
            timestamp: Duration::ZERO,
            interval: Duration::ZERO,
            flags: feedback_flags::FAILURE,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.flags & feedback_flags::FAILURE != 0
    }
}

/// A file descriptor handed over with a buffer-creation request.
///
/// Ownership moves with the value; the sender cannot use the descriptor
/// afterwards. An empty `BufferFd` models a handle that failed to transfer.
#[derive(Debug)]
pub struct BufferFd(Option<OwnedFd>);

impl BufferFd {
    pub fn new(fd: OwnedFd) -> Self {
        Self(Some(fd))
    }

    pub fn invalid() -> Self {
        Self(None)
    }

    /// True if a descriptor is present and still open.
    pub fn is_valid(&self) -> bool {
        match &self.0 {
            // SAFETY: F_GETFD only queries descriptor flags.
            Some(fd) => unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFD) != -1 },
            None => false,
        }
    }

    pub fn raw(&self) -> Option<RawFd> {
        self.0.as_ref().map(|fd| fd.as_raw_fd())
    }

    pub fn into_owned(self) -> Option<OwnedFd> {
        self.0
    }
}

impl From<OwnedFd> for BufferFd {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}

impl From<std::fs::File> for BufferFd {
    fn from(file: std::fs::File) -> Self {
        Self::new(OwnedFd::from(file))
    }
}
