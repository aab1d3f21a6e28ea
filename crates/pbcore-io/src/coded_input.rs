//! Buffered wire-format decoder.
//!
//! [`CodedInputStream`] reads varints, fixed-width values, tags and
//! length-delimited payloads from either a borrowed slice or a
//! [`ZeroCopyInputStream`]. It works directly on the source's chunks and
//! only copies when a value straddles a chunk boundary.
//!
//! # Limits
//!
//! Three independent bounds govern how far the stream may read:
//!
//! - the **current limit**, pushed and popped around each length-delimited
//!   message with [`push_limit`](CodedInputStream::push_limit) and
//!   [`pop_limit`](CodedInputStream::pop_limit);
//! - the **total bytes limit**, a hard cap on everything the stream will
//!   ever read (`i32::MAX` by default);
//! - the **recursion budget**, decremented per nested message.
//!
//! Bytes the source has already handed over but that lie beyond the closest
//! limit are hidden (`buffer_size_after_limit`) until the limit is popped.

use std::marker::PhantomData;
use std::{mem, ptr, slice};

use tracing::error;

use crate::codec::{self, MAX_VARINT64_BYTES};
use crate::cord::Cord;
use crate::zero_copy::ZeroCopyInputStream;

/// Default nesting depth allowed for length-delimited messages and groups.
pub const DEFAULT_RECURSION_LIMIT: i32 = 100;

/// `read_cord` requests shorter than this copy from the current buffer
/// instead of handing off to the source.
const MAX_CORD_BYTES_TO_COPY: i32 = 512;

/// An opaque token returned by [`CodedInputStream::push_limit`]; pass it
/// back to [`CodedInputStream::pop_limit`] to restore the previous limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use = "a pushed limit must be popped"]
pub struct Limit(i32);

/// Decodes wire-format values from a slice or a zero-copy source.
///
/// Reads return `Option` or `bool`; a failed read leaves the stream in an
/// unspecified position. Dropping the stream backs the source up to the
/// first unread byte, so a source can be handed to several coded streams
/// in turn.
pub struct CodedInputStream<'s> {
    /// Next unread byte of the current chunk.
    buffer: *const u8,
    /// End of the readable part of the current chunk.
    buffer_end: *const u8,
    input: Option<&'s mut dyn ZeroCopyInputStream>,
    /// Bytes pulled from `input`, including any hidden beyond a limit.
    total_bytes_read: i32,
    /// Bytes the source handed over beyond `i32::MAX`, backed up on refresh.
    overflow_bytes: i64,
    last_tag: u32,
    legitimate_message_end: bool,
    aliasing_enabled: bool,
    /// Absolute position of the current limit.
    current_limit: i32,
    /// Bytes of the current chunk hidden beyond the closest limit.
    buffer_size_after_limit: i32,
    total_bytes_limit: i32,
    recursion_budget: i32,
    recursion_limit: i32,
    _data: PhantomData<&'s [u8]>,
}

impl<'s> CodedInputStream<'s> {
    /// Decode from `input`. The first chunk is requested immediately.
    pub fn new(input: &'s mut dyn ZeroCopyInputStream) -> Self {
        let mut stream = Self::empty(Some(input));
        stream.refresh();
        stream
    }

    /// Decode from a slice. Slices beyond `i32::MAX` bytes are truncated.
    pub fn from_slice(data: &'s [u8]) -> Self {
        let size = i32::try_from(data.len()).unwrap_or(i32::MAX);
        let mut stream = Self::empty(None);
        stream.buffer = data.as_ptr();
        // SAFETY: size <= data.len().
        stream.buffer_end = unsafe { stream.buffer.add(size as usize) };
        stream.total_bytes_read = size;
        stream.current_limit = size;
        stream
    }

    fn empty(input: Option<&'s mut dyn ZeroCopyInputStream>) -> Self {
        Self {
            buffer: ptr::null(),
            buffer_end: ptr::null(),
            input,
            total_bytes_read: 0,
            overflow_bytes: 0,
            last_tag: 0,
            legitimate_message_end: false,
            aliasing_enabled: false,
            current_limit: i32::MAX,
            buffer_size_after_limit: 0,
            total_bytes_limit: i32::MAX,
            recursion_budget: DEFAULT_RECURSION_LIMIT,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            _data: PhantomData,
        }
    }

    // ── Buffer bookkeeping ──────────────────────────────────────

    #[inline]
    fn buffer_size(&self) -> i32 {
        (self.buffer_end as usize - self.buffer as usize) as i32
    }

    /// The readable remainder of the current chunk.
    #[inline]
    fn buffered(&self) -> &[u8] {
        let len = self.buffer_size() as usize;
        if len == 0 {
            return &[];
        }
        // SAFETY: [buffer, buffer_end) lies within the current chunk, which
        // the source keeps valid until the next call that changes chunks.
        unsafe { slice::from_raw_parts(self.buffer, len) }
    }

    #[inline]
    fn advance(&mut self, amount: usize) {
        debug_assert!(amount <= self.buffer_size() as usize);
        // SAFETY: callers never advance past buffer_end.
        self.buffer = unsafe { self.buffer.add(amount) };
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn current_position(&self) -> i32 {
        self.total_bytes_read - (self.buffer_size() + self.buffer_size_after_limit)
    }

    fn recompute_buffer_limits(&mut self) {
        self.buffer_end = self
            .buffer_end
            .wrapping_add(self.buffer_size_after_limit as usize);
        let closest_limit = self.current_limit.min(self.total_bytes_limit);
        if closest_limit < self.total_bytes_read {
            // The limit falls inside the current chunk; hide the rest.
            self.buffer_size_after_limit = self.total_bytes_read - closest_limit;
            self.buffer_end = self
                .buffer_end
                .wrapping_sub(self.buffer_size_after_limit as usize);
        } else {
            self.buffer_size_after_limit = 0;
        }
    }

    /// Pull the next non-empty chunk from the source.
    ///
    /// Fails at a limit, at the end of a slice, or when the source is
    /// exhausted.
    fn refresh(&mut self) -> bool {
        debug_assert_eq!(self.buffer_size(), 0);

        if self.buffer_size_after_limit > 0
            || self.overflow_bytes > 0
            || self.total_bytes_read == self.current_limit
        {
            // At a limit, or the source handed us more than i32::MAX bytes.
            if self.total_bytes_read - self.buffer_size_after_limit >= self.total_bytes_limit
                && self.total_bytes_limit != self.current_limit
            {
                self.print_total_bytes_limit_error();
            }
            return false;
        }

        let Some(input) = self.input.as_deref_mut() else {
            return false;
        };
        let (data, size) = loop {
            match input.next() {
                Some(chunk) if chunk.is_empty() => continue,
                Some(chunk) => break (chunk.as_ptr(), chunk.len()),
                None => {
                    self.buffer = ptr::null();
                    self.buffer_end = ptr::null();
                    return false;
                }
            }
        };

        self.buffer = data;
        let mut size = i64::try_from(size).unwrap_or(i64::MAX);
        let headroom = i64::from(i32::MAX - self.total_bytes_read);
        if size > headroom {
            // Overflow: keep what fits and remember the rest to back up.
            self.overflow_bytes = size - headroom;
            size = headroom;
        }
        // SAFETY: size never exceeds the chunk length.
        self.buffer_end = unsafe { data.add(size as usize) };
        self.total_bytes_read += size as i32;
        self.recompute_buffer_limits();
        true
    }

    fn print_total_bytes_limit_error(&self) {
        error!(
            total_bytes_limit = self.total_bytes_limit,
            "message exceeds the total bytes limit; raise it with \
             CodedInputStream::set_total_bytes_limit if the input is trusted"
        );
    }

    /// Return unread bytes to the source and forget the current chunk.
    fn back_up_input_to_current_position(&mut self) {
        let backup_bytes =
            i64::from(self.buffer_size() + self.buffer_size_after_limit) + self.overflow_bytes;
        if let Some(input) = self.input.as_deref_mut() {
            if backup_bytes > 0 {
                input.back_up(backup_bytes as usize);
                self.total_bytes_read -= self.buffer_size() + self.buffer_size_after_limit;
            }
        }
        self.buffer_end = self.buffer;
        self.buffer_size_after_limit = 0;
        self.overflow_bytes = 0;
    }

    // ── Limits ──────────────────────────────────────────────────

    /// Restrict reads to the next `byte_limit` bytes.
    ///
    /// A limit never extends an enclosing one; a negative or overflowing
    /// `byte_limit` leaves the current limit in place. Returns the previous
    /// limit for [`pop_limit`](Self::pop_limit).
    pub fn push_limit(&mut self, byte_limit: i32) -> Limit {
        let old_limit = self.current_limit;
        let current_position = self.current_position();
        if byte_limit >= 0
            && byte_limit <= i32::MAX - current_position
            && byte_limit < self.current_limit - current_position
        {
            self.current_limit = current_position + byte_limit;
            self.recompute_buffer_limits();
        }
        Limit(old_limit)
    }

    /// Restore the limit in effect before the matching `push_limit`.
    pub fn pop_limit(&mut self, limit: Limit) {
        self.current_limit = limit.0;
        self.recompute_buffer_limits();
        self.legitimate_message_end = false;
    }

    /// Bytes left before the current limit, or -1 if there is none.
    pub fn bytes_until_limit(&self) -> i32 {
        if self.current_limit == i32::MAX {
            return -1;
        }
        self.current_limit - self.current_position()
    }

    /// Bytes left before the total bytes limit, or -1 if it is unset.
    pub fn bytes_until_total_bytes_limit(&self) -> i32 {
        if self.total_bytes_limit == i32::MAX {
            return -1;
        }
        self.total_bytes_limit - self.current_position()
    }

    /// Cap the total bytes this stream will read.
    ///
    /// Values below the current position are raised to it.
    pub fn set_total_bytes_limit(&mut self, total_bytes_limit: i32) {
        let current_position = self.current_position();
        self.total_bytes_limit = total_bytes_limit.max(current_position);
        self.recompute_buffer_limits();
    }

    /// Read a varint length and push it as a limit. A malformed length
    /// pushes a limit of zero.
    pub fn read_length_and_push_limit(&mut self) -> Limit {
        let length = self.read_varint32().unwrap_or(0);
        self.push_limit(length as i32)
    }

    /// Whether the last tag read ended the message at a limit or at end of
    /// input, then pop `limit`.
    pub fn check_entire_message_consumed_and_pop_limit(&mut self, limit: Limit) -> bool {
        let consumed = self.consumed_entire_message();
        self.pop_limit(limit);
        consumed
    }

    // ── Recursion ───────────────────────────────────────────────

    /// Enter a nested message. Returns `false` once the budget is spent.
    pub fn increment_recursion_depth(&mut self) -> bool {
        self.recursion_budget -= 1;
        self.recursion_budget >= 0
    }

    /// Leave a nested message.
    pub fn decrement_recursion_depth(&mut self) {
        if self.recursion_budget < self.recursion_limit {
            self.recursion_budget += 1;
        }
    }

    /// Remaining nesting depth.
    pub fn recursion_budget(&self) -> i32 {
        self.recursion_budget
    }

    /// Maximum nesting depth.
    pub fn recursion_limit(&self) -> i32 {
        self.recursion_limit
    }

    /// Change the maximum nesting depth, adjusting the remaining budget by
    /// the same amount.
    pub fn set_recursion_limit(&mut self, limit: i32) {
        self.recursion_budget += limit - self.recursion_limit;
        self.recursion_limit = limit;
    }

    /// Push `byte_limit` and enter a nested message.
    ///
    /// Returns the limit token and the budget left afterwards; a negative
    /// budget means the nesting is too deep.
    pub fn increment_recursion_depth_and_push_limit(&mut self, byte_limit: i32) -> (Limit, i32) {
        let limit = self.push_limit(byte_limit);
        self.recursion_budget -= 1;
        (limit, self.recursion_budget)
    }

    /// Leave a nested message and pop its limit.
    ///
    /// Returns whether the message ended exactly at its limit.
    pub fn decrement_recursion_depth_and_pop_limit(&mut self, limit: Limit) -> bool {
        let consumed = self.consumed_entire_message();
        self.pop_limit(limit);
        debug_assert!(self.recursion_budget < self.recursion_limit);
        self.recursion_budget += 1;
        consumed
    }

    // ── Raw reads ───────────────────────────────────────────────

    /// Skip `count` bytes. Fails on negative counts and at limits; a
    /// failed skip still consumes up to the limit.
    pub fn skip(&mut self, count: i32) -> bool {
        if count < 0 {
            return false;
        }
        let original_buffer_size = self.buffer_size();
        if count <= original_buffer_size {
            self.advance(count as usize);
            return true;
        }
        self.skip_fallback(count, original_buffer_size)
    }

    fn skip_fallback(&mut self, mut count: i32, original_buffer_size: i32) -> bool {
        if self.buffer_size_after_limit > 0 {
            // The limit is inside this chunk: advance to it and fail.
            self.advance(original_buffer_size as usize);
            return false;
        }

        count -= original_buffer_size;
        self.buffer = ptr::null();
        self.buffer_end = self.buffer;

        let closest_limit = self.current_limit.min(self.total_bytes_limit);
        let bytes_until_limit = closest_limit - self.total_bytes_read;
        if bytes_until_limit < count {
            if bytes_until_limit > 0 {
                self.total_bytes_read = closest_limit;
                if let Some(input) = self.input.as_deref_mut() {
                    input.skip(bytes_until_limit as usize);
                }
            }
            return false;
        }

        let Some(input) = self.input.as_deref_mut() else {
            return false;
        };
        if !input.skip(count as usize) {
            self.total_bytes_read = i32::try_from(input.byte_count()).unwrap_or(i32::MAX);
            return false;
        }
        self.total_bytes_read += count;
        true
    }

    /// The unread remainder of the current chunk, refreshing if it is
    /// empty. `None` at a limit or end of input.
    pub fn get_direct_buffer_pointer(&mut self) -> Option<&[u8]> {
        if self.buffer_size() == 0 && !self.refresh() {
            return None;
        }
        Some(self.buffered())
    }

    /// Fill `out` completely.
    pub fn read_raw(&mut self, out: &mut [u8]) -> bool {
        let mut out = out;
        loop {
            let available = self.buffer_size() as usize;
            if out.len() <= available {
                let n = out.len();
                out.copy_from_slice(&self.buffered()[..n]);
                self.advance(n);
                return true;
            }
            out[..available].copy_from_slice(self.buffered());
            self.advance(available);
            out = &mut mem::take(&mut out)[available..];
            if !self.refresh() {
                return false;
            }
        }
    }

    /// Replace `out` with the next `size` bytes.
    pub fn read_bytes(&mut self, out: &mut Vec<u8>, size: i32) -> bool {
        if size < 0 {
            return false;
        }
        if size <= self.buffer_size() {
            out.clear();
            out.extend_from_slice(&self.buffered()[..size as usize]);
            self.advance(size as usize);
            return true;
        }
        self.read_bytes_fallback(out, size)
    }

    fn read_bytes_fallback(&mut self, out: &mut Vec<u8>, mut size: i32) -> bool {
        out.clear();
        let closest_limit = self.current_limit.min(self.total_bytes_limit);
        if closest_limit != i32::MAX {
            // Only trust `size` for preallocation when the input can hold it.
            let bytes_to_limit = closest_limit - self.current_position();
            if bytes_to_limit > 0 && size > 0 && size <= bytes_to_limit {
                out.reserve(size as usize);
            }
        }
        loop {
            let available = self.buffer_size();
            if available >= size {
                break;
            }
            out.extend_from_slice(self.buffered());
            size -= available;
            self.advance(available as usize);
            if !self.refresh() {
                return false;
            }
        }
        out.extend_from_slice(&self.buffered()[..size as usize]);
        self.advance(size as usize);
        true
    }

    /// Replace `out` with the next `size` bytes, which must be UTF-8.
    ///
    /// On failure `out` is left empty.
    pub fn read_string(&mut self, out: &mut String, size: i32) -> bool {
        let mut bytes = mem::take(out).into_bytes();
        let ok = self.read_bytes(&mut bytes, size);
        match String::from_utf8(bytes) {
            Ok(s) if ok => {
                *out = s;
                true
            }
            _ => false,
        }
    }

    /// Replace `out` with the next `size` bytes.
    ///
    /// Short reads copy from the current chunk; long ones hand off to the
    /// source's [`read_cord`](ZeroCopyInputStream::read_cord), which may
    /// share storage.
    pub fn read_cord(&mut self, out: &mut Cord, mut size: i32) -> bool {
        out.clear();
        if size < 0 {
            return false;
        }
        if self.input.is_none() || size < MAX_CORD_BYTES_TO_COPY {
            let available = self.get_direct_buffer_pointer().map_or(0, <[u8]>::len) as i32;
            let to_copy = size.min(available);
            out.append_slice(&self.buffered()[..to_copy as usize]);
            self.advance(to_copy as usize);
            size -= to_copy;
            if size == 0 {
                return true;
            }
            if self.input.is_none() || i64::from(self.buffer_size_after_limit) + self.overflow_bytes > 0 {
                return false;
            }
        } else {
            self.back_up_input_to_current_position();
        }

        let closest_limit = self.current_limit.min(self.total_bytes_limit);
        let available = closest_limit - self.total_bytes_read;
        let Some(input) = self.input.as_deref_mut() else {
            return false;
        };
        if size > available {
            self.total_bytes_read = closest_limit;
            input.skip(available as usize);
            return false;
        }
        self.total_bytes_read += size;
        input.read_cord(out, size as usize)
    }

    /// Read a little-endian u32.
    #[inline]
    pub fn read_little_endian32(&mut self) -> Option<u32> {
        if let Some(value) = codec::read_little_endian32_from_array(self.buffered()) {
            self.advance(4);
            return Some(value);
        }
        let mut bytes = [0u8; 4];
        self.read_raw(&mut bytes).then(|| u32::from_le_bytes(bytes))
    }

    /// Read a little-endian u64.
    #[inline]
    pub fn read_little_endian64(&mut self) -> Option<u64> {
        if let Some(value) = codec::read_little_endian64_from_array(self.buffered()) {
            self.advance(8);
            return Some(value);
        }
        let mut bytes = [0u8; 8];
        self.read_raw(&mut bytes).then(|| u64::from_le_bytes(bytes))
    }

    // ── Varints ─────────────────────────────────────────────────

    /// Whether the rest of the current chunk is guaranteed to contain the
    /// end of a varint: it is long enough, or its last byte terminates one.
    #[inline]
    fn varint_in_buffer(&self) -> bool {
        let buf = self.buffered();
        buf.len() >= MAX_VARINT64_BYTES || buf.last().is_some_and(|&b| b & 0x80 == 0)
    }

    /// Read a varint, truncating it to 32 bits.
    #[inline]
    pub fn read_varint32(&mut self) -> Option<u32> {
        if let Some(&first) = self.buffered().first() {
            if first < 0x80 {
                self.advance(1);
                return Some(u32::from(first));
            }
        }
        self.read_varint32_fallback()
    }

    fn read_varint32_fallback(&mut self) -> Option<u32> {
        if self.varint_in_buffer() {
            let (value, len) = codec::read_varint32_from_array(self.buffered())?;
            self.advance(len);
            Some(value)
        } else {
            self.read_varint64_slow().map(|value| value as u32)
        }
    }

    /// Read a varint.
    #[inline]
    pub fn read_varint64(&mut self) -> Option<u64> {
        if let Some(&first) = self.buffered().first() {
            if first < 0x80 {
                self.advance(1);
                return Some(u64::from(first));
            }
        }
        self.read_varint64_fallback()
    }

    fn read_varint64_fallback(&mut self) -> Option<u64> {
        if self.varint_in_buffer() {
            let (value, len) = codec::read_varint64_from_array(self.buffered())?;
            self.advance(len);
            Some(value)
        } else {
            self.read_varint64_slow()
        }
    }

    /// Byte-at-a-time varint read across chunk boundaries.
    fn read_varint64_slow(&mut self) -> Option<u64> {
        let mut result = 0u64;
        for count in 0..MAX_VARINT64_BYTES {
            while self.buffer_size() == 0 {
                if !self.refresh() {
                    return None;
                }
            }
            let byte = self.buffered()[0];
            result |= u64::from(byte & 0x7f) << (7 * count);
            self.advance(1);
            if byte < 0x80 {
                return Some(result);
            }
        }
        None
    }

    /// Read a varint that must fit in a non-negative `i32`, such as a
    /// length prefix.
    pub fn read_varint_size_as_int(&mut self) -> Option<i32> {
        let value = self.read_varint64()?;
        i32::try_from(value).ok()
    }

    // ── Tags ────────────────────────────────────────────────────

    /// Read a tag and remember it for [`last_tag_was`](Self::last_tag_was).
    ///
    /// Returns 0 at a limit, at end of input, or on malformed input; check
    /// [`consumed_entire_message`](Self::consumed_entire_message) to tell
    /// them apart.
    #[inline]
    pub fn read_tag(&mut self) -> u32 {
        self.last_tag = self.read_tag_no_last_tag();
        self.last_tag
    }

    /// [`read_tag`](Self::read_tag) without recording the tag.
    #[inline]
    pub fn read_tag_no_last_tag(&mut self) -> u32 {
        if let Some(&first) = self.buffered().first() {
            if first < 0x80 {
                self.advance(1);
                return u32::from(first);
            }
        }
        self.read_tag_fallback()
    }

    /// Read a tag and report whether it lies in `1..=cutoff`.
    ///
    /// Parsers pass their highest field tag as `cutoff` so one comparison
    /// separates known fields from unknown ones and end of message.
    #[inline]
    pub fn read_tag_with_cutoff(&mut self, cutoff: u32) -> (u32, bool) {
        let tag = self.read_tag();
        (tag, tag.wrapping_sub(1) < cutoff)
    }

    fn read_tag_fallback(&mut self) -> u32 {
        let buf_size = self.buffer_size();
        if self.varint_in_buffer() {
            if self.buffered()[0] == 0 {
                self.advance(1);
                return 0;
            }
            return match codec::read_varint32_from_array(self.buffered()) {
                Some((tag, len)) => {
                    self.advance(len);
                    tag
                }
                None => 0,
            };
        }

        // Tags are commonly read right at a limit; catch that without a
        // refresh unless it is the total bytes limit, which must log.
        if buf_size == 0
            && (self.buffer_size_after_limit > 0 || self.total_bytes_read == self.current_limit)
            && self.total_bytes_read - self.buffer_size_after_limit < self.total_bytes_limit
        {
            self.legitimate_message_end = true;
            return 0;
        }
        self.read_tag_slow()
    }

    fn read_tag_slow(&mut self) -> u32 {
        if self.buffer_size() == 0 && !self.refresh() {
            // End of input is a legitimate place to stop; the total bytes
            // limit is not, unless the current limit coincides with it.
            let current_position = self.total_bytes_read - self.buffer_size_after_limit;
            self.legitimate_message_end = if current_position >= self.total_bytes_limit {
                self.current_limit == self.total_bytes_limit
            } else {
                true
            };
            return 0;
        }
        self.read_varint64().map_or(0, |tag| tag as u32)
    }

    /// Consume the next bytes if they encode `expected`. Only tags of one
    /// or two bytes can match.
    #[inline]
    pub fn expect_tag(&mut self, expected: u32) -> bool {
        let buf = self.buffered();
        if expected < 1 << 7 {
            if buf.first() == Some(&(expected as u8)) {
                self.advance(1);
                return true;
            }
        } else if expected < 1 << 14
            && buf.len() >= 2
            && buf[0] == (expected as u8 | 0x80)
            && buf[1] == (expected >> 7) as u8
        {
            self.advance(2);
            return true;
        }
        false
    }

    /// Whether the stream sits exactly at a limit or the end of a slice.
    /// On success the message is marked consumed.
    pub fn expect_at_end(&mut self) -> bool {
        if self.buffer_size() == 0
            && (self.buffer_size_after_limit != 0 || self.total_bytes_read == self.current_limit)
        {
            self.last_tag = 0;
            self.legitimate_message_end = true;
            return true;
        }
        false
    }

    /// Whether the last tag read equals `expected`.
    pub fn last_tag_was(&self, expected: u32) -> bool {
        self.last_tag == expected
    }

    /// The tag most recently returned by [`read_tag`](Self::read_tag).
    pub fn last_tag(&self) -> u32 {
        self.last_tag
    }

    /// Overwrite the remembered last tag.
    pub fn set_last_tag(&mut self, tag: u32) {
        self.last_tag = tag;
    }

    /// Whether the last zero tag came from a limit or end of input rather
    /// than malformed data.
    pub fn consumed_entire_message(&self) -> bool {
        self.legitimate_message_end
    }

    /// Mark the current message as fully consumed.
    pub fn set_consumed(&mut self) {
        self.legitimate_message_end = true;
    }

    // ── Flags ───────────────────────────────────────────────────

    /// Allow parsers to keep references into the input.
    pub fn set_aliasing_enabled(&mut self, enabled: bool) {
        self.aliasing_enabled = enabled;
    }

    /// Whether parsers may keep references into the input.
    pub fn aliasing_enabled(&self) -> bool {
        self.aliasing_enabled
    }
}

impl Drop for CodedInputStream<'_> {
    fn drop(&mut self) {
        if self.input.is_some() {
            self.back_up_input_to_current_position();
        }
    }
}

impl std::fmt::Debug for CodedInputStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodedInputStream")
            .field("current_position", &self.current_position())
            .field("current_limit", &self.current_limit)
            .field("total_bytes_limit", &self.total_bytes_limit)
            .field("recursion_budget", &self.recursion_budget)
            .field("last_tag", &self.last_tag)
            .finish_non_exhaustive()
    }
}
