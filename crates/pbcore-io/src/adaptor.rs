//! Zero-copy streams over `std::io` readers and writers.
//!
//! Generic over `R: Read` / `W: Write` so tests can use `&[u8]` and
//! `Vec<u8>` while production code passes files or sockets. I/O errors are
//! captured rather than returned; the zero-copy traits only report success
//! or failure, and [`take_error`](ReadInputStream::take_error) recovers the
//! cause.

use std::io::{self, Read, Write};

use tracing::debug;

use crate::zero_copy::{ZeroCopyInputStream, ZeroCopyOutputStream};

/// Buffer size used by [`ReadInputStream::new`] and [`WriteOutputStream::new`].
pub const DEFAULT_BLOCK_SIZE: usize = 8192;

/// Buffers a [`Read`] into chunks.
#[derive(Debug)]
pub struct ReadInputStream<R: Read> {
    reader: R,
    buffer: Box<[u8]>,
    buffer_used: usize,
    backup_bytes: usize,
    position: i64,
    failed: bool,
    error: Option<io::Error>,
}

impl<R: Read> ReadInputStream<R> {
    /// Wrap `reader` with a [`DEFAULT_BLOCK_SIZE`] buffer.
    pub fn new(reader: R) -> Self {
        Self::with_block_size(reader, DEFAULT_BLOCK_SIZE)
    }

    /// Wrap `reader` with a `block_size` buffer (at least one byte).
    pub fn with_block_size(reader: R, block_size: usize) -> Self {
        Self {
            reader,
            buffer: vec![0; block_size.max(1)].into_boxed_slice(),
            buffer_used: 0,
            backup_bytes: 0,
            position: 0,
            failed: false,
            error: None,
        }
    }

    /// The I/O error that stopped the stream, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Whether a read has failed. End of input is not a failure.
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Unwrap the reader. Buffered bytes are lost.
    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Fill the buffer from the reader; 0 means end of input or failure.
    fn fill(&mut self, limit: usize) -> usize {
        let limit = limit.min(self.buffer.len());
        loop {
            match self.reader.read(&mut self.buffer[..limit]) {
                Ok(n) => return n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "read failed; input stream stopped");
                    self.failed = true;
                    self.error = Some(e);
                    return 0;
                }
            }
        }
    }
}

// SAFETY: chunks point into `buffer`, which is only overwritten by the next
// call to `next` or `skip`.
unsafe impl<R: Read> ZeroCopyInputStream for ReadInputStream<R> {
    fn next(&mut self) -> Option<&[u8]> {
        if self.failed {
            return None;
        }
        if self.backup_bytes > 0 {
            let start = self.buffer_used - self.backup_bytes;
            self.position += self.backup_bytes as i64;
            self.backup_bytes = 0;
            return Some(&self.buffer[start..self.buffer_used]);
        }
        self.buffer_used = self.fill(usize::MAX);
        if self.buffer_used == 0 {
            return None;
        }
        self.position += self.buffer_used as i64;
        Some(&self.buffer[..self.buffer_used])
    }

    fn back_up(&mut self, count: usize) {
        assert!(
            self.backup_bytes == 0 && self.buffer_used > 0,
            "back_up() can only be called after a successful next()"
        );
        assert!(
            count <= self.buffer_used,
            "cannot back up {count} bytes of a {} byte chunk",
            self.buffer_used
        );
        self.backup_bytes = count;
        self.position -= count as i64;
    }

    fn skip(&mut self, mut count: usize) -> bool {
        if self.failed {
            return false;
        }
        let from_backup = self.backup_bytes.min(count);
        self.backup_bytes -= from_backup;
        self.position += from_backup as i64;
        count -= from_backup;
        if count == 0 {
            return true;
        }
        // The skipped-over data is discarded, so the buffer holds nothing
        // that could be backed up into.
        self.buffer_used = 0;
        while count > 0 {
            let n = self.fill(count);
            if n == 0 {
                return false;
            }
            self.position += n as i64;
            count -= n;
        }
        true
    }

    fn byte_count(&self) -> i64 {
        self.position
    }
}

/// Buffers chunks into a [`Write`].
///
/// Buffered bytes are written on [`flush`](Self::flush),
/// [`into_inner`](Self::into_inner), and best-effort on drop.
#[derive(Debug)]
pub struct WriteOutputStream<W: Write> {
    writer: Option<W>,
    buffer: Box<[u8]>,
    buffer_used: usize,
    position: i64,
    failed: bool,
    error: Option<io::Error>,
}

impl<W: Write> WriteOutputStream<W> {
    /// Wrap `writer` with a [`DEFAULT_BLOCK_SIZE`] buffer.
    pub fn new(writer: W) -> Self {
        Self::with_block_size(writer, DEFAULT_BLOCK_SIZE)
    }

    /// Wrap `writer` with a `block_size` buffer (at least one byte).
    pub fn with_block_size(writer: W, block_size: usize) -> Self {
        Self {
            writer: Some(writer),
            buffer: vec![0; block_size.max(1)].into_boxed_slice(),
            buffer_used: 0,
            position: 0,
            failed: false,
            error: None,
        }
    }

    /// Write out buffered bytes and flush the writer.
    pub fn flush(&mut self) -> io::Result<()> {
        if !self.write_buffer() {
            return Err(self
                .error
                .take()
                .unwrap_or_else(|| io::Error::other("output stream previously failed")));
        }
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    /// Flush and unwrap the writer.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.flush()?;
        self.writer
            .take()
            .ok_or_else(|| io::Error::other("writer already taken"))
    }

    /// The I/O error that stopped the stream, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Whether a write has failed.
    pub fn failed(&self) -> bool {
        self.failed
    }

    fn write_buffer(&mut self) -> bool {
        if self.failed {
            return false;
        }
        if self.buffer_used == 0 {
            return true;
        }
        let Some(writer) = self.writer.as_mut() else {
            return false;
        };
        // write_all already retries on Interrupted.
        match writer.write_all(&self.buffer[..self.buffer_used]) {
            Ok(()) => {
                self.buffer_used = 0;
                true
            }
            Err(e) => {
                debug!(error = %e, "write failed; output stream stopped");
                self.failed = true;
                self.error = Some(e);
                self.buffer_used = 0;
                false
            }
        }
    }
}

// SAFETY: chunks point into `buffer`, which is only drained by `next`,
// `flush` and drop.
unsafe impl<W: Write> ZeroCopyOutputStream for WriteOutputStream<W> {
    fn next(&mut self) -> Option<&mut [u8]> {
        if self.failed {
            return None;
        }
        if self.buffer_used == self.buffer.len() && !self.write_buffer() {
            return None;
        }
        let start = self.buffer_used;
        self.buffer_used = self.buffer.len();
        self.position += (self.buffer_used - start) as i64;
        Some(&mut self.buffer[start..])
    }

    fn back_up(&mut self, count: usize) {
        assert!(
            count <= self.buffer_used,
            "cannot back up {count} bytes of a {} byte buffer",
            self.buffer_used
        );
        self.buffer_used -= count;
        self.position -= count as i64;
    }

    fn byte_count(&self) -> i64 {
        self.position
    }
}

impl<W: Write> Drop for WriteOutputStream<W> {
    fn drop(&mut self) {
        self.write_buffer();
    }
}
