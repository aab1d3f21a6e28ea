//! Epsilon-copy wire-format encoder.
//!
//! [`EpsCopyOutputStream`] writes straight into the sink's chunks, but stops
//! [`SLOP_BYTES`] short of each chunk's end. Every primitive write is at most
//! that long, so the hot path needs one pointer comparison and never checks
//! bounds per byte. The last `SLOP_BYTES` of a chunk are written through a
//! small patch buffer and copied back when the next chunk is fetched. Chunks
//! no longer than the slop are written entirely through the patch buffer.
//!
//! A failing sink makes the stream sticky-failed: writes keep landing in the
//! patch buffer and are discarded, and [`had_error`](EpsCopyOutputStream::had_error)
//! reports it.

use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::slice;

use crate::codec;
use crate::cord::Cord;
use crate::wire_format::{make_tag, WireType};
use crate::zero_copy::ZeroCopyOutputStream;

/// Bytes a single primitive write may run past the end of writable space.
pub const SLOP_BYTES: usize = 16;

const PATCH_SIZE: usize = 2 * SLOP_BYTES;

/// Cords shorter than this are copied into the current chunk instead of
/// being handed to the sink.
const MAX_CORD_BYTES_TO_COPY: usize = 512;

/// Low-level buffered writer over a [`ZeroCopyOutputStream`] or a slice.
pub struct EpsCopyOutputStream<'s> {
    /// Next byte to write; in the sink's chunk or the patch buffer.
    ptr: *mut u8,
    /// End of the fast-path region. Writes of up to `SLOP_BYTES` may start
    /// anywhere before it.
    end: *mut u8,
    /// Null while writing directly into a sink chunk; otherwise where the
    /// patch buffer's contents belong.
    buffer_end: *mut u8,
    patch: NonNull<[u8; PATCH_SIZE]>,
    stream: Option<&'s mut dyn ZeroCopyOutputStream>,
    /// Byte count reported for a slice target, which has no stream.
    array_len: i64,
    had_error: bool,
    aliasing_enabled: bool,
    deterministic: bool,
    _data: PhantomData<&'s mut [u8]>,
}

impl<'s> EpsCopyOutputStream<'s> {
    /// Write to `stream`. No chunk is requested until the first write.
    pub fn new(stream: &'s mut dyn ZeroCopyOutputStream, deterministic: bool) -> Self {
        Self::empty(Some(stream), deterministic)
    }

    /// Write into `data`. Writing past its end fails the stream.
    pub fn from_slice(data: &'s mut [u8], deterministic: bool) -> Self {
        let mut stream = Self::empty(None, deterministic);
        stream.array_len = data.len() as i64;
        stream.set_initial_buffer(data.as_mut_ptr(), data.len());
        stream
    }

    fn empty(stream: Option<&'s mut dyn ZeroCopyOutputStream>, deterministic: bool) -> Self {
        let patch = NonNull::from(Box::leak(Box::new([0u8; PATCH_SIZE])));
        let base = patch.as_ptr().cast::<u8>();
        Self {
            ptr: base,
            end: base,
            buffer_end: base,
            patch,
            stream,
            array_len: 0,
            had_error: false,
            aliasing_enabled: false,
            deterministic,
            _data: PhantomData,
        }
    }

    #[inline]
    fn patch_ptr(&self) -> *mut u8 {
        self.patch.as_ptr().cast::<u8>()
    }

    fn set_initial_buffer(&mut self, data: *mut u8, size: usize) {
        if size > SLOP_BYTES {
            // SAFETY: data points to `size` writable bytes.
            self.end = unsafe { data.add(size - SLOP_BYTES) };
            self.buffer_end = ptr::null_mut();
            self.ptr = data;
        } else {
            // SAFETY: size <= SLOP_BYTES < PATCH_SIZE.
            self.end = unsafe { self.patch_ptr().add(size) };
            self.buffer_end = data;
            self.ptr = self.patch_ptr();
        }
    }

    /// Fetch a chunk from the sink if this stream has none yet.
    fn eager_refresh(&mut self) {
        let Some(stream) = self.stream.as_deref_mut() else {
            return;
        };
        let Some(chunk) = stream.next() else {
            return;
        };
        let (data, size) = (chunk.as_mut_ptr(), chunk.len());
        if size > 0 {
            self.set_initial_buffer(data, size);
        }
    }

    // ── Buffer management ───────────────────────────────────────

    /// Bytes that may be written at `ptr` before the stream must switch
    /// buffers.
    #[inline]
    fn get_size(&self) -> usize {
        self.end as usize + SLOP_BYTES - self.ptr as usize
    }

    /// Make room for a write of up to [`SLOP_BYTES`].
    #[inline]
    pub fn ensure_space(&mut self) {
        if self.ptr >= self.end {
            self.ensure_space_fallback();
        }
    }

    #[cold]
    fn ensure_space_fallback(&mut self) {
        loop {
            if self.had_error {
                self.ptr = self.patch_ptr();
                return;
            }
            let overrun = self.ptr as usize - self.end as usize;
            debug_assert!(overrun <= SLOP_BYTES);
            let base = self.next_buffer();
            // SAFETY: overrun <= SLOP_BYTES and the new buffer has at least
            // that many bytes of slop.
            self.ptr = unsafe { base.add(overrun) };
            if self.ptr < self.end {
                return;
            }
        }
    }

    /// Switch to the next buffer, carrying the slop region across.
    /// Returns the base of the new buffer.
    fn next_buffer(&mut self) -> *mut u8 {
        debug_assert!(!self.had_error);
        let patch = self.patch_ptr();
        if self.buffer_end.is_null() {
            // Leave the sink chunk: its last SLOP_BYTES continue in the patch
            // buffer.
            // SAFETY: [end, end + SLOP_BYTES) is the tail of the sink chunk.
            unsafe { ptr::copy_nonoverlapping(self.end, patch, SLOP_BYTES) };
            self.buffer_end = self.end;
            // SAFETY: within the patch buffer.
            self.end = unsafe { patch.add(SLOP_BYTES) };
            return patch;
        }

        // The patch buffer holds the tail of the previous chunk.
        let pending = self.end as usize - patch as usize;
        // SAFETY: buffer_end has room for exactly `pending` bytes.
        unsafe { ptr::copy(patch, self.buffer_end, pending) };
        let Some(stream) = self.stream.as_deref_mut() else {
            return self.error();
        };

        let chunk = loop {
            match stream.next() {
                Some(chunk) if chunk.is_empty() => continue,
                Some(chunk) => break Some((chunk.as_mut_ptr(), chunk.len())),
                None => break None,
            }
        };
        let Some((data, size)) = chunk else {
            return self.error();
        };

        if size > SLOP_BYTES {
            // SAFETY: [end, end + SLOP_BYTES) stays inside the patch buffer
            // and the chunk holds more than SLOP_BYTES.
            unsafe {
                ptr::copy_nonoverlapping(self.end, data, SLOP_BYTES);
                self.end = data.add(size - SLOP_BYTES);
            }
            self.buffer_end = ptr::null_mut();
            data
        } else {
            // Too small to write into directly; keep using the patch buffer.
            // SAFETY: both ranges lie inside the patch buffer.
            unsafe {
                ptr::copy(self.end, patch, SLOP_BYTES);
                self.end = patch.add(size);
            }
            self.buffer_end = data;
            patch
        }
    }

    fn error(&mut self) -> *mut u8 {
        self.had_error = true;
        let patch = self.patch_ptr();
        // SAFETY: within the patch buffer.
        self.end = unsafe { patch.add(SLOP_BYTES) };
        patch
    }

    /// Move everything written into the sink. Returns how many bytes of the
    /// current sink chunk are unused.
    fn flush(&mut self) -> usize {
        while !self.buffer_end.is_null() && self.ptr > self.end {
            let overrun = self.ptr as usize - self.end as usize;
            let base = self.next_buffer();
            if self.had_error {
                return 0;
            }
            // SAFETY: overrun <= SLOP_BYTES.
            self.ptr = unsafe { base.add(overrun) };
        }
        if self.buffer_end.is_null() {
            let unused = self.get_size();
            self.buffer_end = self.ptr;
            unused
        } else {
            let written = self.ptr as usize - self.patch_ptr() as usize;
            // SAFETY: buffer_end has room for everything before `end`.
            unsafe {
                ptr::copy(self.patch_ptr(), self.buffer_end, written);
                self.buffer_end = self.buffer_end.add(written);
            }
            self.end as usize - self.ptr as usize
        }
    }

    /// Flush pending bytes and hand the unused tail of the current chunk
    /// back to the sink. The stream stays usable.
    pub fn trim(&mut self) {
        if self.had_error {
            return;
        }
        let unused = self.flush();
        if self.had_error {
            return;
        }
        match self.stream.as_deref_mut() {
            Some(stream) => {
                if unused > 0 {
                    stream.back_up(unused);
                }
            }
            None => self.array_len -= unused as i64,
        }
        let patch = self.patch_ptr();
        self.ptr = patch;
        self.end = patch;
        self.buffer_end = patch;
    }

    /// Bytes written so far, as the sink counts them.
    pub fn byte_count(&self) -> i64 {
        let delta = (self.end as i64 - self.ptr as i64)
            + if self.buffer_end.is_null() {
                SLOP_BYTES as i64
            } else {
                0
            };
        let base = match self.stream.as_deref() {
            Some(stream) => stream.byte_count(),
            None => self.array_len,
        };
        base - delta
    }

    /// Whether the sink failed or a slice target overflowed.
    pub fn had_error(&self) -> bool {
        self.had_error
    }

    /// Let large writes pass caller data to the sink by reference, if the
    /// sink supports it.
    pub fn enable_aliasing(&mut self, enabled: bool) {
        self.aliasing_enabled =
            enabled && self.stream.as_deref().is_some_and(|s| s.allows_aliasing());
    }

    /// Whether map entries and similar should be written in a stable order.
    pub fn is_serialization_deterministic(&self) -> bool {
        self.deterministic
    }

    /// Request (or stop requesting) deterministic serialization.
    pub fn set_serialization_deterministic(&mut self, value: bool) {
        self.deterministic = value;
    }

    // ── Primitive writers ───────────────────────────────────────

    /// Run a write of at most [`SLOP_BYTES`] at the cursor.
    #[inline]
    fn write_small(&mut self, f: impl FnOnce(&mut [u8]) -> usize) {
        self.ensure_space();
        // SAFETY: after ensure_space, ptr < end and every buffer has
        // SLOP_BYTES writable past `end`.
        let target = unsafe { slice::from_raw_parts_mut(self.ptr, SLOP_BYTES) };
        let written = f(target);
        // SAFETY: written <= SLOP_BYTES.
        self.ptr = unsafe { self.ptr.add(written) };
    }

    /// Write a varint.
    #[inline]
    pub fn write_varint32(&mut self, value: u32) {
        self.write_small(|t| codec::write_varint32_to_array(value, t));
    }

    /// Write a varint.
    #[inline]
    pub fn write_varint64(&mut self, value: u64) {
        self.write_small(|t| codec::write_varint64_to_array(value, t));
    }

    /// Write an `int32` the way the wire format does: negatives take ten
    /// bytes.
    #[inline]
    pub fn write_varint32_sign_extended(&mut self, value: i32) {
        self.write_small(|t| codec::write_varint32_sign_extended_to_array(value, t));
    }

    /// Write a little-endian u32.
    #[inline]
    pub fn write_little_endian32(&mut self, value: u32) {
        self.write_small(|t| codec::write_little_endian32_to_array(value, t));
    }

    /// Write a little-endian u64.
    #[inline]
    pub fn write_little_endian64(&mut self, value: u64) {
        self.write_small(|t| codec::write_little_endian64_to_array(value, t));
    }

    /// Write an encoded tag.
    #[inline]
    pub fn write_tag(&mut self, tag: u32) {
        self.write_varint32(tag);
    }

    /// Write `data` by copying it.
    pub fn write_raw(&mut self, mut data: &[u8]) {
        loop {
            let room = self.get_size();
            if data.len() <= room {
                // SAFETY: `room` bytes are writable at ptr.
                unsafe {
                    ptr::copy_nonoverlapping(data.as_ptr(), self.ptr, data.len());
                    self.ptr = self.ptr.add(data.len());
                }
                return;
            }
            // SAFETY: as above.
            unsafe {
                ptr::copy_nonoverlapping(data.as_ptr(), self.ptr, room);
                self.ptr = self.ptr.add(room);
            }
            data = &data[room..];
            self.ensure_space_fallback();
        }
    }

    /// Write `data`, letting the sink keep a reference to it when it would
    /// not fit the current buffer anyway.
    pub fn write_aliased_raw(&mut self, data: &[u8]) {
        if data.len() < self.get_size() || self.stream.is_none() {
            self.write_raw(data);
            return;
        }
        self.trim();
        if self.had_error {
            return;
        }
        let ok = self
            .stream
            .as_deref_mut()
            .is_some_and(|stream| stream.write_aliased_raw(data));
        if !ok {
            self.error();
        }
    }

    /// [`write_aliased_raw`](Self::write_aliased_raw) if aliasing is
    /// enabled, [`write_raw`](Self::write_raw) otherwise.
    pub fn write_raw_maybe_aliased(&mut self, data: &[u8]) {
        if self.aliasing_enabled {
            self.write_aliased_raw(data);
        } else {
            self.write_raw(data);
        }
    }

    /// Write the contents of `cord`.
    ///
    /// Short cords that fit the current buffer are copied; anything else is
    /// handed to the sink, which may share the cord's chunks.
    pub fn write_cord(&mut self, cord: &Cord) {
        if self.stream.is_none()
            || (cord.len() <= self.get_size() && cord.len() < MAX_CORD_BYTES_TO_COPY)
        {
            for chunk in cord.chunks() {
                self.write_raw(chunk);
            }
            return;
        }
        self.trim();
        if self.had_error {
            return;
        }
        let ok = self
            .stream
            .as_deref_mut()
            .is_some_and(|stream| stream.write_cord(cord));
        if !ok {
            self.error();
        }
    }

    // ── Fields ──────────────────────────────────────────────────

    /// Write a length-delimited field: tag, length, then `data`.
    pub fn write_bytes(&mut self, field_number: u32, data: &[u8]) {
        self.write_tag(make_tag(field_number, WireType::LengthDelimited));
        self.write_varint32(data.len() as u32);
        self.write_raw_maybe_aliased(data);
    }

    /// Write a string field.
    pub fn write_string(&mut self, field_number: u32, value: &str) {
        self.write_bytes(field_number, value.as_bytes());
    }
}

impl Drop for EpsCopyOutputStream<'_> {
    fn drop(&mut self) {
        self.trim();
        // SAFETY: leaked from a Box in `empty` and never freed elsewhere.
        drop(unsafe { Box::from_raw(self.patch.as_ptr()) });
    }
}

impl std::fmt::Debug for EpsCopyOutputStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpsCopyOutputStream")
            .field("byte_count", &self.byte_count())
            .field("had_error", &self.had_error)
            .field("aliasing_enabled", &self.aliasing_enabled)
            .field("deterministic", &self.deterministic)
            .finish_non_exhaustive()
    }
}

/// Wire-format writer that counts bytes from where it started.
///
/// Derefs to [`EpsCopyOutputStream`] for the write methods. Dropping it
/// trims the sink, so the sink's byte count afterwards is exact.
#[derive(Debug)]
pub struct CodedOutputStream<'s> {
    inner: EpsCopyOutputStream<'s>,
    start_count: i64,
}

impl<'s> CodedOutputStream<'s> {
    /// Write to `stream`, fetching the first chunk immediately.
    pub fn new(stream: &'s mut dyn ZeroCopyOutputStream) -> Self {
        Self::with_eager_refresh(stream, true)
    }

    /// Write to `stream`; with `eager_refresh` false no chunk is fetched
    /// until the first write.
    pub fn with_eager_refresh(stream: &'s mut dyn ZeroCopyOutputStream, eager_refresh: bool) -> Self {
        let start_count = stream.byte_count();
        let mut inner = EpsCopyOutputStream::new(stream, false);
        if eager_refresh {
            inner.eager_refresh();
        }
        Self { inner, start_count }
    }

    /// Write into `data`.
    pub fn from_slice(data: &'s mut [u8]) -> Self {
        Self {
            inner: EpsCopyOutputStream::from_slice(data, false),
            start_count: 0,
        }
    }

    /// Bytes written through this stream.
    pub fn byte_count(&self) -> i64 {
        self.inner.byte_count() - self.start_count
    }

    /// The underlying epsilon-copy stream.
    pub fn eps_copy(&mut self) -> &mut EpsCopyOutputStream<'s> {
        &mut self.inner
    }

    /// Encoded length of `value` as a varint.
    pub fn varint_size32(value: u32) -> usize {
        codec::varint_size32(value)
    }

    /// Encoded length of `value` as a varint.
    pub fn varint_size64(value: u64) -> usize {
        codec::varint_size64(value)
    }

    /// Encoded length of `value` sign-extended.
    pub fn varint_size32_sign_extended(value: i32) -> usize {
        codec::varint_size32_sign_extended(value)
    }
}

impl<'s> Deref for CodedOutputStream<'s> {
    type Target = EpsCopyOutputStream<'s>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for CodedOutputStream<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Hands out fixed-size chunks of a growing vector.
    struct Sink {
        data: Vec<u8>,
        chunk: usize,
        capacity: Option<usize>,
        next_calls: usize,
        aliased: usize,
    }

    impl Sink {
        fn new(chunk: usize) -> Self {
            Self {
                data: Vec::new(),
                chunk,
                capacity: None,
                next_calls: 0,
                aliased: 0,
            }
        }
    }

    unsafe impl ZeroCopyOutputStream for Sink {
        fn next(&mut self) -> Option<&mut [u8]> {
            self.next_calls += 1;
            let start = self.data.len();
            let mut size = self.chunk;
            if let Some(cap) = self.capacity {
                size = size.min(cap.saturating_sub(start));
                if size == 0 {
                    return None;
                }
            }
            self.data.resize(start + size, 0);
            Some(&mut self.data[start..])
        }

        fn back_up(&mut self, count: usize) {
            let len = self.data.len() - count;
            self.data.truncate(len);
        }

        fn byte_count(&self) -> i64 {
            self.data.len() as i64
        }

        fn allows_aliasing(&self) -> bool {
            true
        }

        fn write_aliased_raw(&mut self, data: &[u8]) -> bool {
            self.aliased += 1;
            self.data.extend_from_slice(data);
            true
        }
    }

    #[test]
    fn writes_varint_300() {
        let mut sink = Sink::new(64);
        {
            let mut out = CodedOutputStream::new(&mut sink);
            out.write_varint32(300);
            assert_eq!(out.byte_count(), 2);
        }
        assert_eq!(sink.data, vec![0xAC, 0x02]);
    }

    #[test]
    fn small_chunks_go_through_patch_buffer() {
        let mut sink = Sink::new(3);
        {
            let mut out = CodedOutputStream::new(&mut sink);
            for i in 0..20u32 {
                out.write_varint32(i * 1000);
            }
            out.write_little_endian64(u64::MAX);
        }
        let mut expected = Vec::new();
        for i in 0..20u32 {
            let mut buf = [0u8; 10];
            let n = codec::write_varint32_to_array(i * 1000, &mut buf);
            expected.extend_from_slice(&buf[..n]);
        }
        expected.extend_from_slice(&[0xff; 8]);
        assert_eq!(sink.data, expected);
    }

    #[test]
    fn negative_int32_is_ten_bytes() {
        let mut buf = [0u8; 32];
        let mut out = CodedOutputStream::from_slice(&mut buf);
        out.write_varint32_sign_extended(-1);
        assert_eq!(out.byte_count(), 10);
        drop(out);
        assert_eq!(&buf[..10], &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);
    }

    #[test]
    fn slice_fills_exactly() {
        let mut buf = [0u8; 20];
        let mut out = CodedOutputStream::from_slice(&mut buf);
        out.write_raw(&[7; 20]);
        assert!(!out.had_error());
        out.trim();
        assert_eq!(out.byte_count(), 20);
        drop(out);
        assert_eq!(buf, [7; 20]);
    }

    #[test]
    fn slice_overflow_is_an_error() {
        let mut buf = [0u8; 4];
        let mut out = CodedOutputStream::from_slice(&mut buf);
        out.write_little_endian32(1);
        assert!(!out.had_error());
        out.write_varint32(1);
        out.trim();
        assert!(out.had_error());
    }

    #[test]
    fn failing_sink_is_sticky() {
        let mut sink = Sink::new(8);
        sink.capacity = Some(8);
        {
            let mut out = CodedOutputStream::new(&mut sink);
            for _ in 0..100 {
                out.write_little_endian64(42);
            }
            out.write_raw(&[1; 100]);
            assert!(out.had_error());
        }
        assert_eq!(sink.data.len(), 8);
    }

    #[test]
    fn large_raw_write_can_alias() {
        let mut sink = Sink::new(64);
        let payload = vec![5u8; 1000];
        {
            let mut out = CodedOutputStream::new(&mut sink);
            out.enable_aliasing(true);
            out.write_bytes(1, &payload);
            out.write_varint32(9);
            assert_eq!(out.byte_count(), 1 + 2 + 1000 + 1);
        }
        assert_eq!(sink.aliased, 1);
        assert_eq!(sink.data.len(), 1004);
        assert_eq!(&sink.data[..3], &[0x0a, 0xe8, 0x07]);
        assert_eq!(sink.data[1003], 9);
    }

    #[test]
    fn lazy_stream_fetches_on_first_write() {
        let mut sink = Sink::new(64);
        {
            let mut out = CodedOutputStream::with_eager_refresh(&mut sink, false);
            assert_eq!(out.byte_count(), 0);
            out.write_string(2, "hi");
        }
        assert_eq!(sink.next_calls, 1);
        assert_eq!(sink.data, vec![0x12, 0x02, b'h', b'i']);
    }

    #[test]
    fn start_count_excludes_earlier_bytes() {
        let mut sink = Sink::new(64);
        sink.data.extend_from_slice(b"prefix");
        let mut out = CodedOutputStream::new(&mut sink);
        out.write_varint64(1 << 40);
        assert_eq!(out.byte_count(), 6);
    }

    #[test]
    fn write_cord_small_copies_large_hands_off() {
        let mut sink = Sink::new(64);
        {
            let mut out = CodedOutputStream::new(&mut sink);
            out.write_cord(&Cord::from("tiny"));
            out.write_cord(&Cord::from(vec![3u8; 600]));
            assert_eq!(out.byte_count(), 604);
        }
        assert_eq!(&sink.data[..4], b"tiny");
        assert_eq!(sink.data.len(), 604);
    }
}
