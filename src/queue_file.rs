//! The [`QueueFile`] engine: the public surface of the queue, backed by the header manager
//! (`header.rs`), ring addressing (`ring.rs`), and element registry logic in this module.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::config::{QueueFileConfig, MINIMUM_FILE_LENGTH};
use crate::element::{
    decode_element_header, encode_element_header, ElementDescriptor, ELEMENT_HEADER_LENGTH,
};
use crate::error::{
    CapacityExceededSnafu, ClosedSnafu, CorruptionSnafu, NotFoundSnafu, QueueFileError, Result,
};
use crate::header::{Header, HEADER_LENGTH, VERSION};
use crate::reader::{QueueFileIterator, QueueFileReader};
use crate::ring;
use crate::writer::QueueFileWriter;

/// Outcome of a growth operation: how far the wrapped prefix, if any, was shifted.
pub(crate) struct GrowthResult {
    pub shifted: bool,
    pub shift_amount: u64,
    pub boundary: u64,
    pub new_file_length: u64,
}

impl GrowthResult {
    fn none(file_length: u64) -> Self {
        GrowthResult {
            shifted: false,
            shift_amount: 0,
            boundary: 0,
            new_file_length: file_length,
        }
    }

    /// Adjusts a position recorded before this growth, accounting for any compaction shift.
    ///
    /// `boundary` is the write cursor at the moment compaction ran: the exclusive end of the
    /// copied byte range, but also the in-progress writer's own next-write position, which sits
    /// immediately after that range and must move by the same amount. Both cases are covered by
    /// `pos <= boundary`.
    pub fn adjust(&self, pos: u64) -> u64 {
        if self.shifted && pos <= self.boundary {
            pos + self.shift_amount
        } else {
            pos
        }
    }
}

pub(crate) struct Inner {
    file: File,
    path: PathBuf,
    pub(crate) max_size: u64,
    file_length: u64,
    pub(crate) element_count: u32,
    pub(crate) first: ElementDescriptor,
    pub(crate) last: ElementDescriptor,
    pub(crate) mod_count: u64,
    pub(crate) closed: bool,
    header_mmap: MmapMut,
    data_mmap: MmapMut,
}

/// Maps just the 36-byte header region, so the persistent header view never needs to be resized
/// alongside the data mapping.
fn map_header(file: &File) -> std::io::Result<MmapMut> {
    unsafe { MmapOptions::new().len(HEADER_LENGTH as usize).map_mut(file) }
}

impl Inner {
    fn header(&self) -> Header {
        Header {
            version: VERSION,
            file_length: self.file_length,
            element_count: self.element_count,
            first_position: self.first.position,
            last_position: self.last.position,
        }
    }

    fn commit_header(&mut self) -> Result<()> {
        let bytes = self.header().to_bytes();
        self.header_mmap[..].copy_from_slice(&bytes);
        self.header_mmap.flush()?;
        Ok(())
    }

    pub(crate) fn file_length(&self) -> u64 {
        self.file_length
    }

    /// Commits a finished write-stream batch: updates `first`/`last`/`element_count`, forces the
    /// data mapping, bumps `mod_count`, and rewrites the header.
    pub(crate) fn commit_batch(
        &mut self,
        new_first: Option<ElementDescriptor>,
        new_last: ElementDescriptor,
        elements_written: u32,
    ) -> Result<()> {
        self.last = new_last;
        if let Some(first) = new_first {
            self.first = first;
        }
        self.element_count += elements_written;
        self.mod_count += 1;
        self.flush_data()?;
        self.commit_header()?;
        Ok(())
    }

    pub(crate) fn next_position(&self, desc: &ElementDescriptor) -> u64 {
        ring::wrap(
            desc.position + ELEMENT_HEADER_LENGTH + u64::from(desc.length),
            self.file_length,
        )
    }

    pub(crate) fn used_bytes(&self) -> u64 {
        if self.element_count == 0 {
            return HEADER_LENGTH;
        }
        let next_after_last = self.next_position(&self.last);
        let logical = self.file_length - HEADER_LENGTH;
        let raw = next_after_last as i64 - self.first.position as i64;
        let diff = if raw <= 0 { raw + logical as i64 } else { raw };
        HEADER_LENGTH + diff as u64
    }

    /// Reads and validates the 5-byte element header at `pos`, returning its payload length.
    pub(crate) fn read_element_header(&mut self, pos: u64) -> Result<u32> {
        let mut buf = [0u8; ELEMENT_HEADER_LENGTH as usize];
        ring::ring_read(&self.data_mmap, self.file_length, pos, &mut buf);
        match decode_element_header(&buf) {
            Ok(length) => Ok(length),
            Err((length, stored)) => {
                self.closed = true;
                let reason = format!(
                    "element header at offset {} failed checksum (length {}, stored checksum {:#04x})",
                    pos, length, stored
                );
                crate::internal_events::QueueFileCorrupted {
                    path: &self.path,
                    reason: &reason,
                }
                .emit();
                CorruptionSnafu { reason }.fail()
            }
        }
    }

    pub(crate) fn read_payload(&self, element: &ElementDescriptor, offset: u64, dst: &mut [u8]) {
        let data_pos = ring::wrap(
            element.position + ELEMENT_HEADER_LENGTH + offset,
            self.file_length,
        );
        ring::ring_read(&self.data_mmap, self.file_length, data_pos, dst);
    }

    /// Writes a zero-filled element header placeholder and returns the position the real header
    /// must later be patched into. The header itself must never wrap, so if fewer than
    /// `ELEMENT_HEADER_LENGTH` bytes remain before the end of the data region, the header is
    /// placed at the start of the region instead, skipping the trailing slack.
    pub(crate) fn place_element_header(&self, pos: u64) -> u64 {
        let wrapped = ring::wrap(pos, self.file_length);
        if self.file_length - wrapped < ELEMENT_HEADER_LENGTH {
            HEADER_LENGTH
        } else {
            wrapped
        }
    }

    pub(crate) fn write_element_header_placeholder(&mut self, pos: u64) {
        let zeros = [0u8; ELEMENT_HEADER_LENGTH as usize];
        ring::ring_write(&mut self.data_mmap, self.file_length, pos, &zeros);
    }

    pub(crate) fn patch_element_header(&mut self, pos: u64, length: u32) {
        let bytes = encode_element_header(length);
        ring::ring_write(&mut self.data_mmap, self.file_length, pos, &bytes);
    }

    pub(crate) fn write_payload(&mut self, pos: u64, bytes: &[u8]) {
        ring::ring_write(&mut self.data_mmap, self.file_length, pos, bytes);
    }

    pub(crate) fn flush_data(&self) -> Result<()> {
        self.data_mmap.flush()?;
        Ok(())
    }

    /// Grows the file so that `bytes_needed` total used bytes fit, compacting a wrapped prefix
    /// into the newly extended space if the in-progress write cursor has lapped past `first`.
    pub(crate) fn grow_to_fit(&mut self, write_cursor: u64, bytes_needed: u64) -> Result<GrowthResult> {
        if bytes_needed <= self.file_length {
            return Ok(GrowthResult::none(self.file_length));
        }

        let mut new_length = self.file_length.saturating_mul(2).max(MINIMUM_FILE_LENGTH);
        while new_length < bytes_needed && new_length < self.max_size {
            new_length = new_length.saturating_mul(2);
        }
        if new_length > self.max_size {
            new_length = self.max_size;
        }
        if new_length < bytes_needed {
            return CapacityExceededSnafu {
                max_size: self.max_size,
                needed: bytes_needed,
            }
            .fail();
        }

        let old_length = self.file_length;
        self.file.set_len(new_length)?;
        self.file.sync_all()?;

        self.data_mmap = unsafe { MmapMut::map_mut(&self.file)? };
        // `data_mmap` was just remapped to `new_length` bytes, but we only logically use
        // `[0, new_length)`, so its length matches exactly; keep `file_length` in sync before any
        // ring arithmetic below relies on it.
        self.file_length = new_length;

        let wrapped = self.element_count > 0 && write_cursor < self.first.position;
        let mut result = GrowthResult {
            shifted: false,
            shift_amount: 0,
            boundary: 0,
            new_file_length: new_length,
        };

        if wrapped {
            let shift_len = (write_cursor - HEADER_LENGTH) as usize;
            if shift_len > 0 {
                self.data_mmap.copy_within(
                    HEADER_LENGTH as usize..HEADER_LENGTH as usize + shift_len,
                    old_length as usize,
                );
            }
            let shift_amount = old_length - HEADER_LENGTH;
            if self.last.position < write_cursor {
                self.last.position += shift_amount;
            }
            result.shifted = true;
            result.shift_amount = shift_amount;
            result.boundary = write_cursor;
            self.mod_count += 1;
        }

        self.flush_data()?;
        self.commit_header()?;

        crate::internal_events::QueueFileGrew {
            old_length,
            new_length,
            compacted: result.shifted,
        }
        .emit();

        Ok(result)
    }

    /// Best-effort shrink, evaluated after `remove(n)`.
    fn maybe_shrink(&mut self) {
        if self.element_count > 0 && self.last.position < self.first.position {
            // Ring is wrapped; shrink is deferred until it becomes contiguous again.
            return;
        }
        let next_after_last = if self.element_count == 0 {
            0
        } else {
            self.next_position(&self.last)
        };
        if next_after_last > self.max_size {
            return;
        }

        let mut accepted: Option<u64> = None;
        let mut goal = self.file_length / 2;
        while goal >= MINIMUM_FILE_LENGTH {
            let first_fits = self.first.position < goal || self.element_count == 0;
            let last_fits = next_after_last <= goal;
            let used_fits = self.used_bytes() <= goal / 2;
            if first_fits && last_fits && used_fits {
                accepted = Some(goal);
                goal /= 2;
            } else {
                break;
            }
        }

        if let Some(new_length) = accepted {
            if new_length < self.file_length {
                if self.file.set_len(new_length).is_err() {
                    return;
                }
                match unsafe { MmapMut::map_mut(&self.file) } {
                    Ok(mmap) => self.data_mmap = mmap,
                    Err(_) => return,
                }
                let old_length = self.file_length;
                self.file_length = new_length;
                self.mod_count += 1;
                let _ = self.commit_header();
                crate::internal_events::QueueFileShrunk { old_length, new_length }.emit();
            }
        }
    }
}

/// A crash-safe, file-backed FIFO byte-record queue.
///
/// `QueueFile` is backed by exactly one regular file: a 36-byte header followed by a ring-buffer
/// data region. It is not internally synchronized; callers needing multi-thread access must
/// provide their own external mutual exclusion (e.g. a `Mutex<QueueFile>`).
///
/// Structural state is held behind a [`RefCell`] so that read streams and the element iterator
/// can borrow the queue immutably while still observing structural changes made through other
/// shared references to the same queue, surfaced as a [`crate::QueueFileError::ConcurrentModification`]
/// error rather than a borrow panic.
pub struct QueueFile {
    pub(crate) inner: RefCell<Inner>,
}

impl QueueFile {
    /// Opens the queue file at `path`, creating it if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P, max_size: u64) -> Result<Self> {
        let config = QueueFileConfig::from_path(path).max_size(max_size).build()?;
        Self::with_config(config)
    }

    /// Opens a queue file using a fully built [`QueueFileConfig`].
    ///
    /// `config.max_size` is already validated to be at least [`MINIMUM_FILE_LENGTH`] by
    /// [`QueueFileConfigBuilder::build`].
    pub fn with_config(config: QueueFileConfig) -> Result<Self> {
        let existed = config.path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.path)?;

        let inner = if existed {
            Self::open_existing(file, config.path.clone(), config.max_size)?
        } else {
            Self::create_new(file, config.path.clone(), config.max_size)?
        };

        Ok(QueueFile {
            inner: RefCell::new(inner),
        })
    }

    fn create_new(file: File, path: PathBuf, max_size: u64) -> Result<Inner> {
        file.set_len(MINIMUM_FILE_LENGTH)?;
        file.sync_all()?;

        let header_mmap = map_header(&file)?;
        let data_mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut inner = Inner {
            file,
            path,
            max_size,
            file_length: MINIMUM_FILE_LENGTH,
            element_count: 0,
            first: ElementDescriptor::NULL,
            last: ElementDescriptor::NULL,
            mod_count: 0,
            closed: false,
            header_mmap,
            data_mmap,
        };
        inner.commit_header()?;
        crate::internal_events::QueueFileOpened {
            path: &inner.path,
            created: true,
            element_count: 0,
            file_length: inner.file_length,
        }
        .emit();
        Ok(inner)
    }

    fn open_existing(file: File, path: PathBuf, max_size: u64) -> Result<Inner> {
        let actual_len = file.metadata()?.len();
        if actual_len < HEADER_LENGTH {
            let reason = format!(
                "file is only {} bytes, too small to contain a {}-byte header",
                actual_len, HEADER_LENGTH
            );
            crate::internal_events::QueueFileCorrupted {
                path: &path,
                reason: &reason,
            }
            .emit();
            return CorruptionSnafu { reason }.fail();
        }

        let header_mmap = map_header(&file)?;
        let mut header_buf = [0u8; HEADER_LENGTH as usize];
        header_buf.copy_from_slice(&header_mmap[..]);
        let header = Header::from_bytes(&header_buf)?;

        if header.file_length > max_size {
            let reason = format!(
                "stored file length {} exceeds max_size {}",
                header.file_length, max_size
            );
            crate::internal_events::QueueFileCorrupted { path: &path, reason: &reason }.emit();
            return CorruptionSnafu { reason }.fail();
        }
        if header.file_length > actual_len {
            let reason = format!(
                "stored file length {} exceeds actual file length {} (truncated file)",
                header.file_length, actual_len
            );
            crate::internal_events::QueueFileCorrupted { path: &path, reason: &reason }.emit();
            return CorruptionSnafu { reason }.fail();
        }

        let first = ElementDescriptor {
            position: header.first_position,
            length: 0,
        };
        let last = ElementDescriptor {
            position: header.last_position,
            length: 0,
        };

        if header.element_count == 0 {
            if header.first_position != 0 || header.last_position != 0 {
                let reason = "empty queue must have first and last positions of 0".to_string();
                crate::internal_events::QueueFileCorrupted { path: &path, reason: &reason }.emit();
                return CorruptionSnafu { reason }.fail();
            }
        } else {
            for (name, pos) in [("first", first.position), ("last", last.position)] {
                if pos < HEADER_LENGTH || pos >= header.file_length {
                    let reason = format!(
                        "{} position {} is outside the data region [{}, {})",
                        name, pos, HEADER_LENGTH, header.file_length
                    );
                    crate::internal_events::QueueFileCorrupted { path: &path, reason: &reason }.emit();
                    return CorruptionSnafu { reason }.fail();
                }
            }
        }

        let data_mmap = unsafe { MmapMut::map_mut(&file)? };
        let mut inner = Inner {
            file,
            path,
            max_size,
            file_length: header.file_length,
            element_count: header.element_count,
            first,
            last,
            mod_count: 0,
            closed: false,
            header_mmap,
            data_mmap,
        };

        if header.element_count > 0 {
            let first_length = inner.read_element_header(first.position)?;
            inner.first.length = first_length;
            let last_length = inner.read_element_header(last.position)?;
            inner.last.length = last_length;
        }

        crate::internal_events::QueueFileOpened {
            path: &inner.path,
            created: false,
            element_count: inner.element_count,
            file_length: inner.file_length,
        }
        .emit();
        Ok(inner)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().element_count == 0
    }

    pub fn size(&self) -> usize {
        self.inner.borrow().element_count as usize
    }

    pub fn file_size(&self) -> u64 {
        self.inner.borrow().file_length
    }

    pub fn used_bytes(&self) -> u64 {
        self.inner.borrow().used_bytes()
    }

    pub fn max_size(&self) -> u64 {
        self.inner.borrow().max_size
    }

    pub fn path(&self) -> PathBuf {
        self.inner.borrow().path.clone()
    }

    fn check_open(&self) -> Result<()> {
        if self.inner.borrow().closed {
            return ClosedSnafu.fail();
        }
        Ok(())
    }

    /// Returns a read stream over the head element's payload, or `None` if the queue is empty.
    pub fn peek(&self) -> Result<Option<QueueFileReader<'_>>> {
        self.check_open()?;
        let inner = self.inner.borrow();
        if inner.element_count == 0 {
            return Ok(None);
        }
        Ok(Some(QueueFileReader::new(
            self,
            inner.first,
            inner.mod_count,
        )))
    }

    /// Returns an iterator of read streams, one per element, from head to tail.
    pub fn iter(&self) -> Result<QueueFileIterator<'_>> {
        self.check_open()?;
        let inner = self.inner.borrow();
        Ok(QueueFileIterator::new(
            self,
            inner.first,
            inner.element_count,
            inner.mod_count,
        ))
    }

    /// Returns a new write stream positioned just past the current tail.
    pub fn writer(&self) -> Result<QueueFileWriter<'_>> {
        self.check_open()?;
        Ok(QueueFileWriter::new(self))
    }

    /// Discards the first `n` elements.
    pub fn remove(&self, n: usize) -> Result<()> {
        self.check_open()?;
        if n == 0 {
            return Ok(());
        }

        let element_count = self.inner.borrow().element_count as usize;
        if n > element_count {
            return NotFoundSnafu {
                requested: n,
                available: element_count,
            }
            .fail();
        }
        if n == element_count {
            return self.clear();
        }

        let mut inner = self.inner.borrow_mut();
        let mut cursor = inner.first;
        for _ in 0..n {
            let next_pos = inner.next_position(&cursor);
            let next_len = inner.read_element_header(next_pos)?;
            cursor = ElementDescriptor {
                position: next_pos,
                length: next_len,
            };
        }
        inner.first = cursor;
        inner.element_count -= n as u32;
        inner.mod_count += 1;
        inner.commit_header()?;

        inner.maybe_shrink();

        tracing::debug!(removed = n, remaining = inner.element_count, "removed elements");
        Ok(())
    }

    /// Empties the queue and shrinks the file back to its minimum size.
    pub fn clear(&self) -> Result<()> {
        self.check_open()?;
        let mut inner = self.inner.borrow_mut();

        inner.element_count = 0;
        inner.first = ElementDescriptor::NULL;
        inner.last = ElementDescriptor::NULL;

        if inner.file_length != MINIMUM_FILE_LENGTH {
            inner.file.set_len(MINIMUM_FILE_LENGTH)?;
            inner.data_mmap = unsafe { MmapMut::map_mut(&inner.file)? };
            inner.file_length = MINIMUM_FILE_LENGTH;
        }

        inner.mod_count += 1;
        inner.commit_header()?;
        tracing::debug!("cleared queue file");
        Ok(())
    }

    /// Marks the queue file closed. Idempotent; subsequent operations fail with a closed error.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if !inner.closed {
            let _ = inner.flush_data();
            inner.closed = true;
            tracing::debug!("closed queue file");
        }
        Ok(())
    }
}
