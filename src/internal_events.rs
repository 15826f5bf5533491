//! Structural logging for [`crate::QueueFile`].
//!
//! One small struct per notable event, each with an `emit` method that records it via `tracing`.

use std::path::Path;

pub(crate) struct QueueFileOpened<'a> {
    pub path: &'a Path,
    pub created: bool,
    pub element_count: u32,
    pub file_length: u64,
}

impl<'a> QueueFileOpened<'a> {
    pub fn emit(&self) {
        if self.created {
            tracing::debug!(path = %self.path.display(), file_length = self.file_length, "created new queue file");
        } else {
            tracing::debug!(
                path = %self.path.display(),
                elements = self.element_count,
                file_length = self.file_length,
                "opened existing queue file"
            );
        }
    }
}

pub(crate) struct QueueFileGrew {
    pub old_length: u64,
    pub new_length: u64,
    pub compacted: bool,
}

impl QueueFileGrew {
    pub fn emit(&self) {
        tracing::debug!(
            old_length = self.old_length,
            new_length = self.new_length,
            compacted = self.compacted,
            "grew queue file"
        );
    }
}

pub(crate) struct QueueFileShrunk {
    pub old_length: u64,
    pub new_length: u64,
}

impl QueueFileShrunk {
    pub fn emit(&self) {
        tracing::debug!(
            old_length = self.old_length,
            new_length = self.new_length,
            "shrank queue file"
        );
    }
}

pub(crate) struct QueueFileCorrupted<'a> {
    pub path: &'a Path,
    pub reason: &'a str,
}

impl<'a> QueueFileCorrupted<'a> {
    pub fn emit(&self) {
        tracing::error!(path = %self.path.display(), reason = self.reason, "queue file is corrupt, closing");
    }
}
