//! Zero-copy streams over in-memory buffers.

use crate::zero_copy::{ZeroCopyInputStream, ZeroCopyOutputStream};

/// Smallest chunk [`VecOutputStream`] hands out.
const MIN_VEC_CHUNK: usize = 16;

/// Reads a borrowed slice in chunks of at most `block_size` bytes.
///
/// Small block sizes are useful in tests to force chunk boundaries.
#[derive(Debug)]
pub struct ArrayInputStream<'a> {
    data: &'a [u8],
    block_size: usize,
    position: usize,
    last_returned_size: usize,
}

impl<'a> ArrayInputStream<'a> {
    /// Hand out all of `data` as one chunk.
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_block_size(data, data.len())
    }

    /// Hand out `data` in chunks of `block_size` bytes (at least one).
    pub fn with_block_size(data: &'a [u8], block_size: usize) -> Self {
        Self {
            data,
            block_size: block_size.max(1),
            position: 0,
            last_returned_size: 0,
        }
    }
}

// SAFETY: chunks borrow `data`, which outlives the stream and is never written.
unsafe impl ZeroCopyInputStream for ArrayInputStream<'_> {
    fn next(&mut self) -> Option<&[u8]> {
        if self.position >= self.data.len() {
            self.last_returned_size = 0;
            return None;
        }
        let n = self.block_size.min(self.data.len() - self.position);
        let start = self.position;
        self.position += n;
        self.last_returned_size = n;
        Some(&self.data[start..self.position])
    }

    fn back_up(&mut self, count: usize) {
        assert!(
            self.last_returned_size > 0,
            "back_up() can only be called after a successful next()"
        );
        assert!(
            count <= self.last_returned_size,
            "cannot back up {count} bytes of a {} byte chunk",
            self.last_returned_size
        );
        self.position -= count;
        self.last_returned_size = 0;
    }

    fn skip(&mut self, count: usize) -> bool {
        self.last_returned_size = 0;
        let remaining = self.data.len() - self.position;
        if count > remaining {
            self.position = self.data.len();
            false
        } else {
            self.position += count;
            true
        }
    }

    fn byte_count(&self) -> i64 {
        self.position as i64
    }
}

/// Writes into a borrowed slice in chunks of at most `block_size` bytes.
#[derive(Debug)]
pub struct ArrayOutputStream<'a> {
    data: &'a mut [u8],
    block_size: usize,
    position: usize,
    last_returned_size: usize,
}

impl<'a> ArrayOutputStream<'a> {
    /// Hand out all of `data` as one chunk.
    pub fn new(data: &'a mut [u8]) -> Self {
        let len = data.len();
        Self::with_block_size(data, len)
    }

    /// Hand out `data` in chunks of `block_size` bytes (at least one).
    pub fn with_block_size(data: &'a mut [u8], block_size: usize) -> Self {
        Self {
            data,
            block_size: block_size.max(1),
            position: 0,
            last_returned_size: 0,
        }
    }

    /// The bytes written so far.
    pub fn written(&self) -> &[u8] {
        &self.data[..self.position]
    }
}

// SAFETY: chunks are disjoint sub-slices of `data`, which the stream borrows
// mutably for its whole life.
unsafe impl ZeroCopyOutputStream for ArrayOutputStream<'_> {
    fn next(&mut self) -> Option<&mut [u8]> {
        if self.position >= self.data.len() {
            self.last_returned_size = 0;
            return None;
        }
        let n = self.block_size.min(self.data.len() - self.position);
        let start = self.position;
        self.position += n;
        self.last_returned_size = n;
        Some(&mut self.data[start..self.position])
    }

    fn back_up(&mut self, count: usize) {
        assert!(
            self.last_returned_size > 0,
            "back_up() can only be called after a successful next()"
        );
        assert!(
            count <= self.last_returned_size,
            "cannot back up {count} bytes of a {} byte chunk",
            self.last_returned_size
        );
        self.position -= count;
        self.last_returned_size = 0;
    }

    fn byte_count(&self) -> i64 {
        self.position as i64
    }
}

/// Appends to a `Vec<u8>`, growing it as chunks are requested.
///
/// Each chunk extends the vector to its capacity, or doubles it when full.
/// Whatever is backed up is truncated away again.
#[derive(Debug)]
pub struct VecOutputStream<'a> {
    target: &'a mut Vec<u8>,
}

impl<'a> VecOutputStream<'a> {
    /// Append to `target` after its current contents.
    pub fn new(target: &'a mut Vec<u8>) -> Self {
        Self { target }
    }
}

// SAFETY: the vector is only resized inside `next` and `back_up`.
unsafe impl ZeroCopyOutputStream for VecOutputStream<'_> {
    fn next(&mut self) -> Option<&mut [u8]> {
        let old_len = self.target.len();
        let new_len = if old_len < self.target.capacity() {
            self.target.capacity()
        } else {
            old_len.saturating_mul(2)
        };
        let new_len = new_len
            .min(old_len.saturating_add(i32::MAX as usize))
            .max(MIN_VEC_CHUNK);
        self.target.resize(new_len, 0);
        Some(&mut self.target[old_len..])
    }

    fn back_up(&mut self, count: usize) {
        assert!(
            count <= self.target.len(),
            "cannot back up {count} bytes of a {} byte vector",
            self.target.len()
        );
        let len = self.target.len() - count;
        self.target.truncate(len);
    }

    fn byte_count(&self) -> i64 {
        self.target.len() as i64
    }
}
