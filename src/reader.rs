//! The read stream and element iterator.

use std::io::{self, Read};

use crate::element::ElementDescriptor;
use crate::error::QueueFileError;
use crate::queue_file::QueueFile;

fn to_io_error(err: QueueFileError) -> io::Error {
    io::Error::other(err)
}

/// Read stream over a single element's payload, returned by [`QueueFile::peek`] and
/// [`QueueFileIterator`].
///
/// Holds the `mod_count` the queue was at when this stream was created; any structural change
/// made through another reference to the same [`QueueFile`] (append-batch commit, `remove`,
/// `clear`, or in-place compaction during growth) invalidates it, surfacing as an
/// [`io::ErrorKind::Other`] error wrapping [`QueueFileError::ConcurrentModification`] on the next
/// read.
pub struct QueueFileReader<'q> {
    qf: &'q QueueFile,
    element: ElementDescriptor,
    offset: u64,
    mod_count: u64,
}

impl<'q> QueueFileReader<'q> {
    pub(crate) fn new(qf: &'q QueueFile, element: ElementDescriptor, mod_count: u64) -> Self {
        QueueFileReader {
            qf,
            element,
            offset: 0,
            mod_count,
        }
    }

    /// Total length of this element's payload.
    pub fn len(&self) -> u32 {
        self.element.length
    }

    pub fn is_empty(&self) -> bool {
        self.element.length == 0
    }

    /// Number of payload bytes not yet read.
    pub fn remaining(&self) -> u64 {
        u64::from(self.element.length) - self.offset
    }

    fn check_unmodified(&self) -> Result<(), QueueFileError> {
        let inner = self.qf.inner.borrow();
        if inner.closed {
            return crate::error::ClosedSnafu.fail();
        }
        if inner.mod_count != self.mod_count {
            return crate::error::ConcurrentModificationSnafu.fail();
        }
        Ok(())
    }

    /// Advances the cursor by up to `n` bytes without returning them, wrapping across the end of
    /// the data region like a read would.
    pub fn skip(&mut self, n: u64) -> Result<u64, QueueFileError> {
        self.check_unmodified()?;
        let skipped = std::cmp::min(n, self.remaining());
        self.offset += skipped;
        Ok(skipped)
    }
}

impl<'q> Read for QueueFileReader<'q> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_unmodified().map_err(to_io_error)?;

        let remaining = self.remaining();
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let n = std::cmp::min(buf.len() as u64, remaining) as usize;
        let inner = self.qf.inner.borrow();
        inner.read_payload(&self.element, self.offset, &mut buf[..n]);
        drop(inner);
        self.offset += n as u64;
        Ok(n)
    }
}

/// Iterator of read streams, one per element, from head to tail.
///
/// The header of each element is read lazily, on the call to `next()` that yields it — not as
/// lookahead while yielding the previous one. That way a corrupt header further down the queue
/// only fails the step that actually reaches it, instead of also discarding the valid element
/// that was yielded just before it.
pub struct QueueFileIterator<'q> {
    qf: &'q QueueFile,
    next: Option<ElementDescriptor>,
    remaining: u32,
    mod_count: u64,
    failed: bool,
}

impl<'q> QueueFileIterator<'q> {
    pub(crate) fn new(
        qf: &'q QueueFile,
        first: ElementDescriptor,
        element_count: u32,
        mod_count: u64,
    ) -> Self {
        QueueFileIterator {
            qf,
            next: if element_count == 0 { None } else { Some(first) },
            remaining: element_count,
            mod_count,
            failed: false,
        }
    }
}

impl<'q> Iterator for QueueFileIterator<'q> {
    type Item = Result<QueueFileReader<'q>, QueueFileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining == 0 {
            return None;
        }

        let mut inner = self.qf.inner.borrow_mut();
        if inner.closed {
            self.failed = true;
            return Some(crate::error::ClosedSnafu.fail());
        }
        if inner.mod_count != self.mod_count {
            self.failed = true;
            return Some(crate::error::ConcurrentModificationSnafu.fail());
        }
        let mut current = self
            .next
            .expect("remaining > 0 implies the next descriptor is known");
        match inner.read_element_header(current.position) {
            Ok(length) => current.length = length,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        }
        let next_pos = inner.next_position(&current);
        drop(inner);

        self.remaining -= 1;
        self.next = if self.remaining > 0 {
            Some(ElementDescriptor {
                position: next_pos,
                length: 0,
            })
        } else {
            None
        };

        Some(Ok(QueueFileReader::new(self.qf, current, self.mod_count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use tempfile::TempDir;

    #[test]
    fn iterator_visits_elements_in_order_and_detects_modification() {
        let dir = TempDir::new().unwrap();
        let qf = QueueFile::open(dir.path().join("q"), u64::MAX).unwrap();

        for payload in [&[1u8][..], &[2, 2], &[3, 3, 3]] {
            let mut w = qf.writer().unwrap();
            w.write_all(payload).unwrap();
            w.close().unwrap();
        }

        let mut seen = Vec::new();
        let mut it = qf.iter().unwrap();
        let mut first = it.next().unwrap().unwrap();
        let mut buf = Vec::new();
        first.read_to_end(&mut buf).unwrap();
        seen.push(buf);

        // A structural change through the same queue handle invalidates the in-flight iterator.
        qf.remove(1).unwrap();

        let err = it.next().unwrap().unwrap_err();
        assert!(matches!(err, QueueFileError::ConcurrentModification));
        let _ = seen;
    }

    #[test]
    fn fresh_iterator_after_modification_sees_remaining_elements() {
        let dir = TempDir::new().unwrap();
        let qf = QueueFile::open(dir.path().join("q"), u64::MAX).unwrap();
        for payload in [&[1u8][..], &[2, 2], &[3, 3, 3]] {
            let mut w = qf.writer().unwrap();
            w.write_all(payload).unwrap();
            w.close().unwrap();
        }
        qf.remove(1).unwrap();

        let payloads: Vec<Vec<u8>> = qf
            .iter()
            .unwrap()
            .map(|r| {
                let mut buf = Vec::new();
                r.unwrap().read_to_end(&mut buf).unwrap();
                buf
            })
            .collect();
        assert_eq!(payloads, vec![vec![2, 2], vec![3, 3, 3]]);
    }
}
