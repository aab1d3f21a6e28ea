//! Array-level encode/decode of the wire-format primitives.
//!
//! Varints are little-endian base-128: seven payload bits per byte, high bit
//! set on every byte but the last. Fixed-width values are little-endian.
//! Writers panic if `target` is too short; the coded streams always hand
//! them at least [`MAX_VARINT64_BYTES`] of slop.

/// Longest encoding of a 32-bit varint.
pub const MAX_VARINT32_BYTES: usize = 5;

/// Longest encoding of a 64-bit varint, and of a sign-extended negative `i32`.
pub const MAX_VARINT64_BYTES: usize = 10;

// ── Sizes ───────────────────────────────────────────────────────

/// Encoded length of `value` as a varint.
#[inline]
pub const fn varint_size32(value: u32) -> usize {
    let log2 = 31 - (value | 1).leading_zeros();
    (log2 as usize * 9 + 73) / 64
}

/// Encoded length of `value` as a varint.
#[inline]
pub const fn varint_size64(value: u64) -> usize {
    let log2 = 63 - (value | 1).leading_zeros();
    (log2 as usize * 9 + 73) / 64
}

/// Encoded length of `value` sign-extended to 64 bits.
#[inline]
pub const fn varint_size32_sign_extended(value: i32) -> usize {
    if value < 0 {
        MAX_VARINT64_BYTES
    } else {
        varint_size32(value as u32)
    }
}

// ── Primitive writers ───────────────────────────────────────────

/// Write `value` as a varint. Returns the number of bytes written.
#[inline]
pub fn write_varint32_to_array(value: u32, target: &mut [u8]) -> usize {
    write_varint64_to_array(u64::from(value), target)
}

/// Write `value` as a varint. Returns the number of bytes written.
#[inline]
pub fn write_varint64_to_array(mut value: u64, target: &mut [u8]) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        target[i] = value as u8 | 0x80;
        value >>= 7;
        i += 1;
    }
    target[i] = value as u8;
    i + 1
}

/// Write `value` sign-extended to 64 bits, so negatives take ten bytes.
#[inline]
pub fn write_varint32_sign_extended_to_array(value: i32, target: &mut [u8]) -> usize {
    write_varint64_to_array(value as i64 as u64, target)
}

/// Write a little-endian u32. Returns 4.
#[inline]
pub fn write_little_endian32_to_array(value: u32, target: &mut [u8]) -> usize {
    target[..4].copy_from_slice(&value.to_le_bytes());
    4
}

/// Write a little-endian u64. Returns 8.
#[inline]
pub fn write_little_endian64_to_array(value: u64, target: &mut [u8]) -> usize {
    target[..8].copy_from_slice(&value.to_le_bytes());
    8
}

// ── Primitive readers ───────────────────────────────────────────

/// Decode a varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed, or `None` if `buf`
/// ends inside the varint or the varint runs past ten bytes. Bits beyond
/// the 64th are discarded.
#[inline]
pub fn read_varint64_from_array(buf: &[u8]) -> Option<(u64, usize)> {
    let mut result = 0u64;
    for (i, &byte) in buf.iter().take(MAX_VARINT64_BYTES).enumerate() {
        result |= u64::from(byte & 0x7f) << (7 * i);
        if byte < 0x80 {
            return Some((result, i + 1));
        }
    }
    None
}

/// Decode a varint and truncate it to 32 bits.
///
/// Accepts up to ten bytes so sign-extended negative `int32` values decode.
#[inline]
pub fn read_varint32_from_array(buf: &[u8]) -> Option<(u32, usize)> {
    read_varint64_from_array(buf).map(|(value, len)| (value as u32, len))
}

/// Read a little-endian u32 from the front of `buf`.
#[inline]
pub fn read_little_endian32_from_array(buf: &[u8]) -> Option<u32> {
    let bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Read a little-endian u64 from the front of `buf`.
#[inline]
pub fn read_little_endian64_from_array(buf: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = buf.get(..8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

// ── ZigZag ──────────────────────────────────────────────────────

/// Map signed to unsigned so small magnitudes encode short: 0, -1, 1, -2 ...
/// become 0, 1, 2, 3 ...
#[inline]
pub const fn zigzag_encode32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Inverse of [`zigzag_encode32`].
#[inline]
pub const fn zigzag_decode32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

/// 64-bit [`zigzag_encode32`].
#[inline]
pub const fn zigzag_encode64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// Inverse of [`zigzag_encode64`].
#[inline]
pub const fn zigzag_decode64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn varint_300() {
        let mut buf = [0u8; MAX_VARINT64_BYTES];
        assert_eq!(write_varint32_to_array(300, &mut buf), 2);
        assert_eq!(&buf[..2], &[0xAC, 0x02]);
        assert_eq!(read_varint64_from_array(&buf[..2]), Some((300, 2)));
    }

    #[test]
    fn size_boundaries() {
        assert_eq!(varint_size32(0), 1);
        assert_eq!(varint_size32(127), 1);
        assert_eq!(varint_size32(128), 2);
        assert_eq!(varint_size32(u32::MAX), 5);
        assert_eq!(varint_size64(1 << 63), 10);
        assert_eq!(varint_size64(u64::MAX), 10);
        assert_eq!(varint_size32_sign_extended(-1), 10);
        assert_eq!(varint_size32_sign_extended(5), 1);
    }

    #[test]
    fn negative_int32_takes_ten_bytes() {
        let mut buf = [0u8; MAX_VARINT64_BYTES];
        assert_eq!(write_varint32_sign_extended_to_array(-1, &mut buf), 10);
        assert_eq!(buf[9], 0x01);
        assert_eq!(read_varint32_from_array(&buf), Some((u32::MAX, 10)));
    }

    #[test]
    fn truncated_and_overlong_varints_fail() {
        assert_eq!(read_varint64_from_array(&[0x80, 0x80]), None);
        assert_eq!(read_varint64_from_array(&[]), None);
        assert_eq!(read_varint64_from_array(&[0xff; 11]), None);
    }

    #[test]
    fn fixed_width_is_little_endian() {
        let mut buf = [0u8; 8];
        write_little_endian32_to_array(0x0403_0201, &mut buf);
        assert_eq!(&buf[..4], &[1, 2, 3, 4]);
        assert_eq!(read_little_endian32_from_array(&buf), Some(0x0403_0201));
        assert_eq!(read_little_endian64_from_array(&buf[..7]), None);
    }

    #[test]
    fn zigzag_small_magnitudes() {
        assert_eq!(zigzag_encode32(0), 0);
        assert_eq!(zigzag_encode32(-1), 1);
        assert_eq!(zigzag_encode32(1), 2);
        assert_eq!(zigzag_encode32(-2), 3);
        assert_eq!(zigzag_encode32(i32::MAX), u32::MAX - 1);
        assert_eq!(zigzag_encode32(i32::MIN), u32::MAX);
        assert_eq!(zigzag_encode64(i64::MIN), u64::MAX);
    }

    proptest! {
        #[test]
        fn varint64_length_matches_size(value in any::<u64>()) {
            let mut buf = [0u8; MAX_VARINT64_BYTES];
            let len = write_varint64_to_array(value, &mut buf);
            prop_assert_eq!(len, varint_size64(value));
            prop_assert_eq!(read_varint64_from_array(&buf[..len]), Some((value, len)));
        }

        #[test]
        fn zigzag_is_invertible(n in any::<i64>(), m in any::<i32>()) {
            prop_assert_eq!(zigzag_decode64(zigzag_encode64(n)), n);
            prop_assert_eq!(zigzag_decode32(zigzag_encode32(m)), m);
        }
    }
}
