//! The 36-byte file header: the queue's sole atomicity boundary.
//!
//! Every structural change to the queue is made visible to future opens by rewriting and forcing
//! this block; nothing else in the file is trusted on recovery unless the header's own checksum
//! validates.

use crate::error::{CorruptionSnafu, QueueFileError};

/// Width, in bytes, of the serialized header.
pub const HEADER_LENGTH: u64 = 36;

/// The only version this crate understands; any other value means the file is not a queue file.
pub const VERSION: u32 = 0x0000_0001;

/// The five logical fields that make up the file header, plus their checksum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub file_length: u64,
    pub element_count: u32,
    pub first_position: u64,
    pub last_position: u64,
}

impl Header {
    /// The header for a freshly created, empty queue file of the given length.
    pub fn new_empty(file_length: u64) -> Self {
        Header {
            version: VERSION,
            file_length,
            element_count: 0,
            first_position: 0,
            last_position: 0,
        }
    }

    /// Computes the header checksum: `h0 = version`, then `h = 31*h + field` over `file_length`,
    /// `element_count`, `first_position`, `last_position` (each truncated to 32 bits), with
    /// wrapping 32-bit arithmetic.
    pub fn checksum(&self) -> u32 {
        let mut h = self.version;
        h = h.wrapping_mul(31).wrapping_add(self.file_length as u32);
        h = h.wrapping_mul(31).wrapping_add(self.element_count);
        h = h.wrapping_mul(31).wrapping_add(self.first_position as u32);
        h = h.wrapping_mul(31).wrapping_add(self.last_position as u32);
        h
    }

    /// Serializes this header into the canonical 36-byte, big-endian, on-disk representation.
    pub fn to_bytes(self) -> [u8; HEADER_LENGTH as usize] {
        let mut buf = [0u8; HEADER_LENGTH as usize];
        buf[0..4].copy_from_slice(&self.version.to_be_bytes());
        buf[4..12].copy_from_slice(&self.file_length.to_be_bytes());
        buf[12..16].copy_from_slice(&self.element_count.to_be_bytes());
        buf[16..24].copy_from_slice(&self.first_position.to_be_bytes());
        buf[24..32].copy_from_slice(&self.last_position.to_be_bytes());
        buf[32..36].copy_from_slice(&self.checksum().to_be_bytes());
        buf
    }

    /// Parses and validates a 36-byte on-disk header.
    ///
    /// # Errors
    ///
    /// Returns a corruption error if the version is unrecognized or the stored checksum does not
    /// match the hash of the other five fields.
    pub fn from_bytes(buf: &[u8; HEADER_LENGTH as usize]) -> Result<Self, QueueFileError> {
        let version = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        if version != VERSION {
            return CorruptionSnafu {
                reason: format!("unrecognized file version {:#010x}", version),
            }
            .fail();
        }

        let header = Header {
            version,
            file_length: u64::from_be_bytes(buf[4..12].try_into().unwrap()),
            element_count: u32::from_be_bytes(buf[12..16].try_into().unwrap()),
            first_position: u64::from_be_bytes(buf[16..24].try_into().unwrap()),
            last_position: u64::from_be_bytes(buf[24..32].try_into().unwrap()),
        };
        let stored_checksum = u32::from_be_bytes(buf[32..36].try_into().unwrap());
        let computed_checksum = header.checksum();
        if stored_checksum != computed_checksum {
            return CorruptionSnafu {
                reason: format!(
                    "header checksum mismatch: stored {:#010x}, computed {:#010x}",
                    stored_checksum, computed_checksum
                ),
            }
            .fail();
        }

        Ok(header)
    }
}
