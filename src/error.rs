use std::io;

use snafu::Snafu;

/// Error that can occur during any [`crate::QueueFile`] operation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum QueueFileError {
    /// An argument supplied by the caller was invalid.
    #[snafu(display("invalid argument: {}", reason))]
    Argument { reason: String },

    /// `remove(n)` was called with `n` greater than the current element count.
    #[snafu(display(
        "cannot remove {} elements, only {} are present",
        requested,
        available
    ))]
    NotFound { requested: usize, available: usize },

    /// The queue file has already been closed.
    #[snafu(display("queue file is closed"))]
    Closed,

    /// A read stream or iterator observed a structural change made by another operation.
    #[snafu(display("queue file was modified while being iterated or read"))]
    ConcurrentModification,

    /// An append would require growing the file past `max_size`.
    #[snafu(display(
        "cannot grow queue file past max_size ({} bytes) to fit {} additional bytes",
        max_size,
        needed
    ))]
    CapacityExceeded { max_size: u64, needed: u64 },

    /// The on-disk file failed a structural integrity check.
    #[snafu(display("queue file is corrupt: {}", reason))]
    Corruption { reason: String },

    /// The underlying filesystem returned an error.
    #[snafu(display("queue file I/O error: {}", source))]
    Io { source: io::Error },
}

impl From<io::Error> for QueueFileError {
    fn from(source: io::Error) -> Self {
        QueueFileError::Io { source }
    }
}

impl QueueFileError {
    /// True for errors that leave the engine in a usable state.
    ///
    /// Argument, not-found, closed, and concurrent-modification errors are local to the call that
    /// raised them. Corruption and I/O failures close the engine.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            QueueFileError::Argument { .. }
                | QueueFileError::NotFound { .. }
                | QueueFileError::Closed
                | QueueFileError::ConcurrentModification
                | QueueFileError::CapacityExceeded { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, QueueFileError>;
