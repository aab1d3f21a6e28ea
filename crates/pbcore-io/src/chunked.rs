//! Zero-copy streams over shared [`Bytes`] chunks.

use bytes::{Bytes, BytesMut};

use crate::cord::Cord;
use crate::zero_copy::{ZeroCopyInputStream, ZeroCopyOutputStream};

/// Reads a sequence of [`Bytes`] chunks.
///
/// [`read_cord`](ZeroCopyInputStream::read_cord) slices the chunks instead of
/// copying them.
#[derive(Debug, Default)]
pub struct ChunkedInputStream {
    chunks: Vec<Bytes>,
    index: usize,
    offset: usize,
    last_returned_size: usize,
    byte_count: i64,
}

impl ChunkedInputStream {
    /// Read `chunks` in order. Empty chunks are dropped.
    pub fn new(chunks: impl IntoIterator<Item = Bytes>) -> Self {
        Self {
            chunks: chunks.into_iter().filter(|c| !c.is_empty()).collect(),
            ..Self::default()
        }
    }

    /// Read the chunks of `cord`, sharing them.
    pub fn from_cord(cord: &Cord) -> Self {
        Self::new(cord.chunks().cloned())
    }

    /// Length of the current chunk, advancing past exhausted ones.
    fn current_len(&mut self) -> Option<usize> {
        while let Some(chunk) = self.chunks.get(self.index) {
            if self.offset < chunk.len() {
                return Some(chunk.len());
            }
            self.index += 1;
            self.offset = 0;
        }
        None
    }
}

// SAFETY: returned chunks point into `Bytes` storage, which the stream never
// mutates and keeps alive until it is dropped.
unsafe impl ZeroCopyInputStream for ChunkedInputStream {
    fn next(&mut self) -> Option<&[u8]> {
        let end = self.current_len()?;
        let start = self.offset;
        self.offset = end;
        self.last_returned_size = end - start;
        self.byte_count += (end - start) as i64;
        Some(&self.chunks[self.index][start..end])
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
        self.offset -= count;
        self.byte_count -= count as i64;
        self.last_returned_size = 0;
    }

    fn skip(&mut self, mut count: usize) -> bool {
        self.last_returned_size = 0;
        while count > 0 {
            let Some(len) = self.current_len() else {
                return false;
            };
            let take = (len - self.offset).min(count);
            self.offset += take;
            self.byte_count += take as i64;
            count -= take;
        }
        true
    }

    fn byte_count(&self) -> i64 {
        self.byte_count
    }

    fn read_cord(&mut self, cord: &mut Cord, mut count: usize) -> bool {
        self.last_returned_size = 0;
        while count > 0 {
            let Some(len) = self.current_len() else {
                return false;
            };
            let offset = self.offset;
            let take = (len - offset).min(count);
            cord.append(self.chunks[self.index].slice(offset..offset + take));
            self.offset += take;
            self.byte_count += take as i64;
            count -= take;
        }
        true
    }
}

/// First chunk size of a [`CordOutputStream`].
const INITIAL_BLOCK_SIZE: usize = 256;

/// Largest chunk a [`CordOutputStream`] allocates.
const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Builds a [`Cord`], sharing cords written into it.
///
/// Ordinary writes land in a growing scratch buffer that is frozen into a
/// chunk whenever it fills or an aliased write needs to go after it.
#[derive(Debug)]
pub struct CordOutputStream {
    cord: Cord,
    pending: BytesMut,
    block_size: usize,
}

impl CordOutputStream {
    /// An empty output cord.
    pub fn new() -> Self {
        Self {
            cord: Cord::new(),
            pending: BytesMut::new(),
            block_size: INITIAL_BLOCK_SIZE,
        }
    }

    /// Finish writing and return the cord.
    pub fn into_cord(mut self) -> Cord {
        self.seal();
        self.cord
    }

    fn seal(&mut self) {
        if !self.pending.is_empty() {
            let chunk = self.pending.split().freeze();
            self.cord.append(chunk);
        }
    }
}

impl Default for CordOutputStream {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the scratch buffer only reallocates in `next` once it is empty,
// and is frozen only in `next`, `write_aliased_raw` and `write_cord`.
unsafe impl ZeroCopyOutputStream for CordOutputStream {
    fn next(&mut self) -> Option<&mut [u8]> {
        if self.pending.len() == self.pending.capacity() {
            self.seal();
            if self.pending.capacity() == 0 {
                self.pending.reserve(self.block_size);
                self.block_size = (self.block_size * 2).min(MAX_BLOCK_SIZE);
            }
        }
        let start = self.pending.len();
        let end = self.pending.capacity();
        self.pending.resize(end, 0);
        Some(&mut self.pending[start..])
    }

    fn back_up(&mut self, count: usize) {
        assert!(
            count <= self.pending.len(),
            "cannot back up {count} bytes of a {} byte chunk",
            self.pending.len()
        );
        let len = self.pending.len() - count;
        self.pending.truncate(len);
    }

    fn byte_count(&self) -> i64 {
        (self.cord.len() + self.pending.len()) as i64
    }

    fn allows_aliasing(&self) -> bool {
        true
    }

    fn write_aliased_raw(&mut self, data: &[u8]) -> bool {
        self.seal();
        self.cord.append_slice(data);
        true
    }

    fn write_cord(&mut self, cord: &Cord) -> bool {
        self.seal();
        self.cord.append_cord(cord);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks() -> ChunkedInputStream {
        ChunkedInputStream::new([
            Bytes::from_static(b"abc"),
            Bytes::new(),
            Bytes::from_static(b"defgh"),
        ])
    }

    #[test]
    fn next_walks_chunks_and_backs_up() {
        let mut input = chunks();
        assert_eq!(input.next(), Some(&b"abc"[..]));
        assert_eq!(input.next(), Some(&b"defgh"[..]));
        input.back_up(2);
        assert_eq!(input.byte_count(), 6);
        assert_eq!(input.next(), Some(&b"gh"[..]));
        assert_eq!(input.next(), None);
    }

    #[test]
    fn skip_crosses_chunks() {
        let mut input = chunks();
        assert!(input.skip(4));
        assert_eq!(input.next(), Some(&b"efgh"[..]));
        assert!(!input.skip(1));
    }

    #[test]
    fn read_cord_shares_storage() {
        let second = Bytes::from_static(b"defgh");
        let mut input = ChunkedInputStream::new([Bytes::from_static(b"abc"), second.clone()]);
        let mut cord = Cord::new();
        assert!(input.read_cord(&mut cord, 5));
        assert_eq!(cord.to_vec(), b"abcde");
        let shared = cord.chunks().nth(1).unwrap();
        assert_eq!(shared.as_ptr(), second.as_ptr());
        assert_eq!(input.byte_count(), 5);
        assert!(!input.read_cord(&mut cord, 10));
        assert_eq!(cord.len(), 8);
    }

    #[test]
    fn cord_output_collects_writes() {
        let mut output = CordOutputStream::new();
        let chunk = output.next().unwrap();
        let size = chunk.len();
        assert!(size >= INITIAL_BLOCK_SIZE);
        chunk[..3].copy_from_slice(b"abc");
        output.back_up(size - 3);
        let payload = Cord::from(Bytes::from_static(b"shared"));
        assert!(output.write_cord(&payload));
        assert!(output.write_aliased_raw(b"!"));
        assert_eq!(output.byte_count(), 10);
        let cord = output.into_cord();
        assert_eq!(cord.to_vec(), b"abcshared!");
        assert_eq!(cord.chunk_count(), 3);
    }
}
