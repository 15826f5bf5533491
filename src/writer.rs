//! The write stream: a byte-oriented appender that buffers one or more new elements beyond the
//! current tail and commits them as a batch on close.

use std::io::{self, Write};

use crate::element::{ElementDescriptor, ELEMENT_HEADER_LENGTH};
use crate::error::QueueFileError;
use crate::queue_file::QueueFile;
use crate::ring;

fn to_io_error(err: QueueFileError) -> io::Error {
    io::Error::other(err)
}

/// Write stream returned by [`QueueFile::writer`].
///
/// Buffers one or more elements past the current tail. Nothing is visible to readers — in this
/// process or after a crash — until [`QueueFileWriter::close`] commits the header.
pub struct QueueFileWriter<'q> {
    qf: &'q QueueFile,
    /// Used bytes in the queue before this stream wrote anything.
    base_used: u64,
    /// Whether the queue was empty when this stream was created.
    queue_was_empty: bool,
    /// Next position to write into.
    cursor: u64,
    /// Total header + payload bytes written so far in this batch, not yet committed.
    pending_total: u64,
    /// Position of the current (in-progress) element's header placeholder, if started.
    current_header_pos: u64,
    /// Payload bytes written to the current element so far.
    current_length: u32,
    began_current_header: bool,
    new_first: Option<ElementDescriptor>,
    new_last: Option<ElementDescriptor>,
    elements_written: u32,
    closed: bool,
}

impl<'q> QueueFileWriter<'q> {
    pub(crate) fn new(qf: &'q QueueFile) -> Self {
        let inner = qf.inner.borrow();
        let base_used = inner.used_bytes();
        let queue_was_empty = inner.element_count == 0;
        let cursor = if queue_was_empty {
            crate::header::HEADER_LENGTH
        } else {
            inner.next_position(&inner.last)
        };
        drop(inner);

        QueueFileWriter {
            qf,
            base_used,
            queue_was_empty,
            cursor,
            pending_total: 0,
            current_header_pos: 0,
            current_length: 0,
            began_current_header: false,
            new_first: None,
            new_last: None,
            elements_written: 0,
            closed: false,
        }
    }

    fn ensure_capacity(&mut self, additional: u64) -> Result<(), QueueFileError> {
        let mut inner = self.qf.inner.borrow_mut();
        let bytes_needed = self.base_used + self.pending_total + additional;
        let growth = inner.grow_to_fit(self.cursor, bytes_needed)?;
        if growth.shifted {
            self.cursor = growth.adjust(self.cursor);
            self.current_header_pos = growth.adjust(self.current_header_pos);
            if let Some(nf) = &mut self.new_first {
                nf.position = growth.adjust(nf.position);
            }
            if let Some(nl) = &mut self.new_last {
                nl.position = growth.adjust(nl.position);
            }
        }
        Ok(())
    }

    fn write_bytes(&mut self, buf: &[u8]) -> Result<(), QueueFileError> {
        if self.closed {
            return crate::error::ClosedSnafu.fail();
        }
        if buf.is_empty() {
            return Ok(());
        }

        if !self.began_current_header {
            self.ensure_capacity(ELEMENT_HEADER_LENGTH)?;
            let mut inner = self.qf.inner.borrow_mut();
            let header_pos = inner.place_element_header(self.cursor);
            inner.write_element_header_placeholder(header_pos);
            let new_cursor = ring::wrap(header_pos + ELEMENT_HEADER_LENGTH, inner.file_length());
            drop(inner);

            self.current_header_pos = header_pos;
            self.cursor = new_cursor;
            self.began_current_header = true;
            self.pending_total += ELEMENT_HEADER_LENGTH;
        }

        self.ensure_capacity(buf.len() as u64)?;
        let mut inner = self.qf.inner.borrow_mut();
        inner.write_payload(self.cursor, buf);
        let file_length = inner.file_length();
        drop(inner);

        self.cursor = ring::wrap(self.cursor + buf.len() as u64, file_length);
        self.current_length += buf.len() as u32;
        self.pending_total += buf.len() as u64;
        Ok(())
    }

    /// Finalizes the current element (if any bytes were written to it since the last call) so
    /// that subsequent writes start a new element.
    ///
    /// A zero-length element (no bytes written since the stream was opened or the last call to
    /// `next_element`) is silently ignored: no commit, no increment.
    pub fn next_element(&mut self) -> Result<(), QueueFileError> {
        if self.closed {
            return crate::error::ClosedSnafu.fail();
        }
        if !self.began_current_header {
            return Ok(());
        }

        let mut inner = self.qf.inner.borrow_mut();
        inner.patch_element_header(self.current_header_pos, self.current_length);
        drop(inner);

        let finished = ElementDescriptor {
            position: self.current_header_pos,
            length: self.current_length,
        };
        if self.new_first.is_none() && self.queue_was_empty {
            self.new_first = Some(finished);
        }
        self.new_last = Some(finished);
        self.elements_written += 1;

        self.began_current_header = false;
        self.current_header_pos = 0;
        self.current_length = 0;
        Ok(())
    }

    /// Finalizes any pending element and commits the whole batch atomically by rewriting the
    /// header. Idempotent: calling `close` more than once is a no-op after the first call.
    pub fn close(&mut self) -> Result<(), QueueFileError> {
        if self.closed {
            return Ok(());
        }
        self.next_element()?;

        if self.elements_written > 0 {
            let mut inner = self.qf.inner.borrow_mut();
            inner.commit_batch(
                self.new_first,
                self.new_last.expect("elements_written > 0 implies new_last is set"),
                self.elements_written,
            )?;
        }

        self.closed = true;
        Ok(())
    }
}

impl<'q> Write for QueueFileWriter<'q> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf).map_err(to_io_error)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'q> Drop for QueueFileWriter<'q> {
    fn drop(&mut self) {
        // Abandoning a stream without calling `close` is not an error: the header still points
        // at the pre-batch tail, so any bytes written for this batch are orphaned and will be
        // silently overwritten by the next append.
    }
}
