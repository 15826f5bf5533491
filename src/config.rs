use std::path::{Path, PathBuf};

use crate::error::{ArgumentSnafu, QueueFileError};

/// Minimum file length: header plus a data region large enough to be useful.
pub const MINIMUM_FILE_LENGTH: u64 = 4096;

/// Configuration for opening or creating a [`crate::QueueFile`].
#[derive(Clone, Debug)]
pub struct QueueFileConfig {
    pub(crate) path: PathBuf,
    pub(crate) max_size: u64,
}

impl QueueFileConfig {
    /// Starts building a configuration for the queue file at `path`.
    pub fn from_path<P>(path: P) -> QueueFileConfigBuilder
    where
        P: AsRef<Path>,
    {
        QueueFileConfigBuilder {
            path: path.as_ref().to_path_buf(),
            max_size: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }
}

/// Builder for [`QueueFileConfig`].
pub struct QueueFileConfigBuilder {
    path: PathBuf,
    max_size: Option<u64>,
}

impl QueueFileConfigBuilder {
    /// Sets the hard cap, in bytes, on the backing file's length.
    ///
    /// Appends that would require growing the file past this amount fail with a capacity error.
    /// Must be at least [`MINIMUM_FILE_LENGTH`]. Defaults to `u64::MAX`.
    pub fn max_size(mut self, amount: u64) -> Self {
        self.max_size = Some(amount);
        self
    }

    /// Consumes this builder and constructs a [`QueueFileConfig`].
    ///
    /// # Errors
    ///
    /// Returns an argument error if `max_size` was set below [`MINIMUM_FILE_LENGTH`].
    pub fn build(self) -> Result<QueueFileConfig, QueueFileError> {
        let max_size = self.max_size.unwrap_or(u64::MAX);
        if max_size < MINIMUM_FILE_LENGTH {
            return ArgumentSnafu {
                reason: format!(
                    "max_size must be at least {} bytes, got {}",
                    MINIMUM_FILE_LENGTH, max_size
                ),
            }
            .fail();
        }

        Ok(QueueFileConfig {
            path: self.path,
            max_size,
        })
    }
}
