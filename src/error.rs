//! Errors produced while validating and executing producer requests.

use crate::formats::fourcc_to_string;
use crate::types::{BufferId, WidgetId};
use thiserror::Error;

/// How the host reacts to a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The producer broke the protocol; the connection is torn down.
    Fatal,
    /// The request is rejected but the connection stays usable.
    InvalidUsage,
    /// An expected teardown race; nothing to report.
    Benign,
}

fn fourcc_name(code: &u32) -> String {
    fourcc_to_string(*code)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("Invalid buffer id: {0}")]
    InvalidBufferId(BufferId),

    #[error("Buffer with {0} id already exists")]
    DuplicateBufferId(BufferId),

    #[error("Dmabuf-based buffers are not supported by the compositor")]
    DmabufNotSupported,

    #[error("Unsupported buffer format {}", fourcc_name(.0))]
    UnsupportedFormat(u32),

    #[error("Buffer size is invalid: {width}x{height}")]
    EmptySize { width: i32, height: i32 },

    #[error("Planes count can't be less than 1")]
    NoPlanes,

    #[error("Format {} expects {expected} planes, but {actual} were given", fourcc_name(.format))]
    PlaneCountMismatch {
        format: u32,
        expected: u32,
        actual: u32,
    },

    #[error(
        "Number of strides({strides})/offsets({offsets})/modifiers({modifiers}) does not correspond to the number of planes({planes})"
    )]
    PlaneArrayMismatch {
        strides: usize,
        offsets: usize,
        modifiers: usize,
        planes: u32,
    },

    #[error("Invalid stride for plane {0}")]
    InvalidStride(usize),

    #[error("Buffer fd is invalid")]
    InvalidFd,

    #[error("The shm pixel memory length is 0")]
    EmptyShmLength,

    #[error("Buffer size {width}x{height} needs {required} bytes, but the shm length is {length}")]
    ShmTooSmall {
        width: i32,
        height: i32,
        required: u64,
        length: u64,
    },

    #[error("Failed to import dmabuf-based buffer {0}")]
    DmabufImportFailed(BufferId),

    #[error("Failed to create shm-based buffer {0}")]
    ShmImportFailed(BufferId),

    #[error("Buffer with {0} id does not exist")]
    UnknownBuffer(BufferId),

    #[error("No surface registered for {0}")]
    UnknownWidget(WidgetId),

    #[error("{widget} already has buffer {in_flight} in flight, cannot commit buffer {buffer_id}")]
    CommitInFlight {
        widget: WidgetId,
        in_flight: BufferId,
        buffer_id: BufferId,
    },

    #[error("Connection is closed: {0}")]
    ConnectionClosed(String),
}

impl BufferError {
    pub fn severity(&self) -> Severity {
        match self {
            BufferError::CommitInFlight { .. } => Severity::InvalidUsage,
            BufferError::UnknownWidget(_) | BufferError::ConnectionClosed(_) => Severity::Benign,
            _ => Severity::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_message_names_the_counts() {
        let err = BufferError::PlaneArrayMismatch {
            strides: 2,
            offsets: 3,
            modifiers: 3,
            planes: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("strides(2)"));
        assert!(msg.contains("planes(3)"));
        assert!(err.is_fatal());
    }

    #[test]
    fn severities() {
        let in_flight = BufferError::CommitInFlight {
            widget: WidgetId(7),
            in_flight: 1,
            buffer_id: 2,
        };
        assert_eq!(in_flight.severity(), Severity::InvalidUsage);
        assert_eq!(BufferError::UnknownWidget(WidgetId(1)).severity(), Severity::Benign);
        assert_eq!(BufferError::UnknownBuffer(4).severity(), Severity::Fatal);
    }
}
