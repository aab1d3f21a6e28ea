//! Chunked byte source and sink abstractions.
//!
//! A source lends out successive chunks of its data; a sink lends out
//! successive chunks of writable space. Either side can hand back the unused
//! tail of the last chunk with `back_up`. The coded streams sit on top of
//! these and only copy at chunk boundaries.

use crate::cord::Cord;

/// A source of bytes handed out in chunks.
///
/// # Safety
///
/// The coded streams keep raw pointers into the most recent chunk returned
/// by [`next`](Self::next) across later calls to [`byte_count`](Self::byte_count).
/// Implementations must keep that chunk's memory valid and unchanged until the
/// next call to `next`, `back_up`, `skip` or `read_cord`, or until the source
/// is dropped.
pub unsafe trait ZeroCopyInputStream {
    /// The next chunk of data, or `None` at end of input or on error.
    ///
    /// May return an empty chunk; callers retry.
    fn next(&mut self) -> Option<&[u8]>;

    /// Return the last `count` bytes of the previous chunk to the stream.
    ///
    /// # Panics
    ///
    /// If the previous call was not a successful `next`, or `count` exceeds
    /// that chunk's length.
    fn back_up(&mut self, count: usize);

    /// Skip `count` bytes. Returns `false` if the input ended first.
    fn skip(&mut self, count: usize) -> bool;

    /// Bytes handed out so far, net of `back_up`.
    fn byte_count(&self) -> i64;

    /// Append the next `count` bytes to `cord`.
    ///
    /// Returns `false` if the input ended first; whatever was available has
    /// been appended. The default copies; sources backed by shared buffers
    /// override it to share chunks instead.
    fn read_cord(&mut self, cord: &mut Cord, mut count: usize) -> bool {
        while count > 0 {
            let Some(chunk) = self.next() else {
                return false;
            };
            let take = chunk.len().min(count);
            cord.append_slice(&chunk[..take]);
            let extra = chunk.len() - take;
            count -= take;
            if extra > 0 {
                self.back_up(extra);
            }
        }
        true
    }
}

/// A sink of bytes that hands out writable chunks.
///
/// # Safety
///
/// The coded streams write through raw pointers into the most recent chunk
/// returned by [`next`](Self::next) across later calls to
/// [`byte_count`](Self::byte_count). Implementations must keep that chunk
/// valid and must not read or move it until the next call to `next`,
/// `back_up`, `write_aliased_raw` or `write_cord`, or until the sink is
/// dropped.
pub unsafe trait ZeroCopyOutputStream {
    /// The next chunk of writable space, or `None` on error.
    ///
    /// Everything in the returned chunk counts as written unless backed up.
    fn next(&mut self) -> Option<&mut [u8]>;

    /// Un-write the last `count` bytes of the previous chunk.
    ///
    /// # Panics
    ///
    /// If the previous call was not a successful `next`, or `count` exceeds
    /// that chunk's length.
    fn back_up(&mut self, count: usize);

    /// Bytes written so far, net of `back_up`.
    fn byte_count(&self) -> i64;

    /// Whether [`write_aliased_raw`](Self::write_aliased_raw) keeps a
    /// reference to caller data instead of copying it.
    fn allows_aliasing(&self) -> bool {
        false
    }

    /// Write `data`, possibly by reference. Returns `false` on error.
    fn write_aliased_raw(&mut self, data: &[u8]) -> bool {
        copy_into(self, data)
    }

    /// Write the contents of `cord`. Returns `false` on error.
    fn write_cord(&mut self, cord: &Cord) -> bool {
        cord.chunks().all(|chunk| copy_into(self, chunk))
    }
}

/// Copy `data` through `stream`'s `next`/`back_up` chunks.
pub(crate) fn copy_into<S: ZeroCopyOutputStream + ?Sized>(stream: &mut S, mut data: &[u8]) -> bool {
    while !data.is_empty() {
        let Some(chunk) = stream.next() else {
            return false;
        };
        let n = chunk.len().min(data.len());
        chunk[..n].copy_from_slice(&data[..n]);
        let extra = chunk.len() - n;
        data = &data[n..];
        if extra > 0 {
            stream.back_up(extra);
        }
    }
    true
}
