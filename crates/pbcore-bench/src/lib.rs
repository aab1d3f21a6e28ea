//! Benchmark workloads for the pbcore arena and coded streams.
//!
//! Provides seeded, reproducible payloads for benchmarks and examples:
//!
//! - [`varint_values`]: integers with a realistic spread of encoded lengths
//! - [`encode_varints`]: those integers as a packed varint buffer
//! - [`field_names`]: short ASCII strings of mixed length
//! - [`length_delimited_fields`]: a message body of string fields

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use pbcore_io::{CodedOutputStream, VecOutputStream};
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Generate `n` integers whose varint lengths cover 1 to 10 bytes.
///
/// Small values dominate, as they do in real messages: half fit in one
/// byte, and the rest spread evenly over the wider bit lengths.
pub fn varint_values(n: usize, seed: u64) -> Vec<u64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let bits = if rng.next_u32() % 2 == 0 {
                7
            } else {
                1 + rng.next_u32() % 64
            };
            let mask = if bits == 64 { u64::MAX } else { (1 << bits) - 1 };
            rng.next_u64() & mask
        })
        .collect()
}

/// Encode `values` back to back as varints.
pub fn encode_varints(values: &[u64]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(values.len() * 4);
    {
        let mut sink = VecOutputStream::new(&mut buf);
        let mut out = CodedOutputStream::new(&mut sink);
        for &value in values {
            out.write_varint64(value);
        }
    }
    buf
}

/// Generate `n` lowercase names of 1 to 32 bytes.
pub fn field_names(n: usize, seed: u64) -> Vec<String> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let len = 1 + rng.next_u32() as usize % 32;
            (0..len)
                .map(|_| char::from(b'a' + (rng.next_u32() % 26) as u8))
                .collect()
        })
        .collect()
}

/// Encode `names` as string fields numbered from 1.
pub fn length_delimited_fields(names: &[String]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut sink = VecOutputStream::new(&mut buf);
        let mut out = CodedOutputStream::new(&mut sink);
        for (i, name) in names.iter().enumerate() {
            out.write_string(i as u32 % 1000 + 1, name);
        }
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbcore_io::CodedInputStream;

    #[test]
    fn varint_values_deterministic() {
        assert_eq!(varint_values(100, 42), varint_values(100, 42));
        assert_ne!(varint_values(100, 42), varint_values(100, 43));
    }

    #[test]
    fn varint_values_cover_every_length() {
        let lengths: std::collections::HashSet<usize> = varint_values(10_000, 7)
            .into_iter()
            .map(CodedOutputStream::varint_size64)
            .collect();
        assert_eq!(lengths.len(), 10, "lengths seen: {lengths:?}");
    }

    #[test]
    fn encoded_varints_decode_back() {
        let values = varint_values(500, 1);
        let buf = encode_varints(&values);
        let mut input = CodedInputStream::from_slice(&buf);
        for &value in &values {
            assert_eq!(input.read_varint64(), Some(value));
        }
        assert!(input.expect_at_end());
    }

    #[test]
    fn field_names_are_short_ascii() {
        for name in field_names(200, 3) {
            assert!((1..=32).contains(&name.len()));
            assert!(name.bytes().all(|b| b.is_ascii_lowercase()));
        }
    }
}
