//! End-to-end encoding and decoding over every kind of byte source and sink.

use std::io::Cursor;

use pbcore_io::codec::{zigzag_decode64, zigzag_encode64};
use pbcore_io::wire_format::{make_tag, read_message, skip_field};
use pbcore_io::{
    ChunkedInputStream, CodedInputStream, CodedOutputStream, Cord, CordOutputStream,
    ReadInputStream, WireError, WireType, WriteOutputStream, ZeroCopyOutputStream, SLOP_BYTES,
};
use pbcore_test_utils::{init_tracing, MockSink, MockSource};

// ── A small message ─────────────────────────────────────────────

const ID: u32 = make_tag(1, WireType::Varint);
const NAME: u32 = make_tag(2, WireType::LengthDelimited);
const SCORE: u32 = make_tag(3, WireType::LengthDelimited);
const CHECKSUM: u32 = make_tag(4, WireType::Fixed32);
const SCORE_VALUE: u32 = make_tag(1, WireType::Varint);

#[derive(Debug, Default, PartialEq)]
struct Record {
    id: u64,
    name: String,
    scores: Vec<i64>,
    checksum: u32,
}

impl Record {
    fn sample() -> Self {
        Self {
            id: 1 << 40,
            name: "a record name long enough to span several small chunks".into(),
            scores: vec![0, -1, 300, i64::MIN, i64::MAX],
            checksum: 0xDEAD_BEEF,
        }
    }

    fn encode(&self, out: &mut CodedOutputStream<'_>) {
        out.write_tag(ID);
        out.write_varint64(self.id);
        out.write_string(2, &self.name);
        for &score in &self.scores {
            let encoded = zigzag_encode64(score);
            out.write_tag(SCORE);
            out.write_varint32((1 + CodedOutputStream::varint_size64(encoded)) as u32);
            out.write_tag(SCORE_VALUE);
            out.write_varint64(encoded);
        }
        out.write_tag(CHECKSUM);
        out.write_little_endian32(self.checksum);
    }

    fn decode(input: &mut CodedInputStream<'_>) -> Result<Self, WireError> {
        let mut record = Self::default();
        loop {
            let (tag, known) = input.read_tag_with_cutoff(CHECKSUM);
            if tag == 0 {
                return if input.consumed_entire_message() {
                    Ok(record)
                } else {
                    Err(WireError::Truncated)
                };
            }
            if !known {
                skip_field(input, tag)?;
                continue;
            }
            match tag {
                ID => record.id = input.read_varint64().ok_or(WireError::MalformedVarint)?,
                NAME => {
                    let len = input.read_varint32().ok_or(WireError::MalformedVarint)?;
                    if !input.read_string(&mut record.name, len as i32) {
                        return Err(WireError::Truncated);
                    }
                }
                SCORE => record.scores.push(read_message(input, decode_score)?),
                CHECKSUM => {
                    record.checksum = input.read_little_endian32().ok_or(WireError::Truncated)?
                }
                _ => skip_field(input, tag)?,
            }
        }
    }
}

fn decode_score(input: &mut CodedInputStream<'_>) -> Result<i64, WireError> {
    let mut value = 0;
    loop {
        match input.read_tag() {
            0 if input.consumed_entire_message() => return Ok(value),
            0 => return Err(WireError::Truncated),
            SCORE_VALUE => {
                value = zigzag_decode64(input.read_varint64().ok_or(WireError::MalformedVarint)?)
            }
            tag => skip_field(input, tag)?,
        }
    }
}

fn encode_to_vec(record: &Record) -> Vec<u8> {
    let mut sink = MockSink::new(4096);
    {
        let mut out = CodedOutputStream::new(&mut sink);
        record.encode(&mut out);
        assert!(!out.had_error());
    }
    sink.data().to_vec()
}

// ── Concrete wire behavior ──────────────────────────────────────

#[test]
fn varint_300_is_two_bytes_both_ways() {
    init_tracing();
    let mut sink = MockSink::new(64);
    {
        let mut out = CodedOutputStream::new(&mut sink);
        out.write_varint32(300);
        assert_eq!(out.byte_count(), 2);
    }
    assert_eq!(sink.data(), &[0xAC, 0x02]);
    assert_eq!(sink.backed_up(), &[62]);

    let mut source = MockSource::new(sink.data(), 1);
    {
        let mut input = CodedInputStream::new(&mut source);
        assert_eq!(input.read_varint32(), Some(300));
        assert_eq!(input.current_position(), 2);
    }
    assert_eq!(source.position(), 2);
}

#[test]
fn limit_ends_the_message_before_the_source_does() {
    let mut data = vec![0xEEu8; 10];
    for _ in 0..5 {
        data.extend_from_slice(&[0x08, 0x01]);
    }
    let mut source = MockSource::new(data, 7);
    {
        let mut input = CodedInputStream::new(&mut source);
        let limit = input.push_limit(10);
        let mut payload = [0u8; 10];
        assert!(input.read_raw(&mut payload));
        assert_eq!(payload, [0xEE; 10]);

        assert_eq!(input.read_tag(), 0);
        assert!(input.consumed_entire_message());
        assert_eq!(input.bytes_until_limit(), 0);

        input.pop_limit(limit);
        assert_eq!(input.bytes_until_limit(), -1);
        assert_eq!(input.read_tag(), 0x08);
        assert_eq!(input.read_varint32(), Some(1));
    }
    assert_eq!(source.position(), 12);
}

#[test]
fn nested_limits_restore_in_order() {
    let data = [0u8; 30];
    let mut input = CodedInputStream::from_slice(&data);
    let outer = input.push_limit(20);
    assert!(input.skip(5));
    let inner = input.push_limit(10);
    assert_eq!(input.bytes_until_limit(), 10);
    // A wider limit cannot escape the inner one.
    let ignored = input.push_limit(25);
    assert_eq!(input.bytes_until_limit(), 10);
    input.pop_limit(ignored);
    assert!(!input.skip(11));
    assert_eq!(input.current_position(), 15);
    input.pop_limit(inner);
    assert_eq!(input.bytes_until_limit(), 5);
    input.pop_limit(outer);
    // A slice is its own outermost limit.
    assert_eq!(input.bytes_until_limit(), 15);
}

// ── Epsilon-copy sink behavior ──────────────────────────────────

#[test]
fn writes_up_to_a_chunk_end_need_one_next() {
    let mut sink = MockSink::new(64);
    {
        let mut out = CodedOutputStream::new(&mut sink);
        for _ in 0..64 {
            out.write_varint32(1);
        }
    }
    assert_eq!(sink.next_calls(), 1);
    assert!(sink.backed_up().is_empty());
    assert_eq!(sink.data(), &[1u8; 64][..]);
}

#[test]
fn slop_carries_into_the_next_chunk() {
    let mut sink = MockSink::new(64);
    {
        let mut out = CodedOutputStream::new(&mut sink);
        for i in 0..65u32 {
            out.write_varint32(i);
        }
        assert_eq!(out.byte_count(), 65);
    }
    assert_eq!(sink.next_calls(), 2);
    assert_eq!(sink.backed_up(), &[63]);
    let expected: Vec<u8> = (0..65u8).collect();
    assert_eq!(sink.data(), &expected[..]);
}

#[test]
fn lazy_stream_waits_for_the_first_write() {
    let mut sink = MockSink::new(64);
    {
        let mut out = CodedOutputStream::with_eager_refresh(&mut sink, false);
        assert_eq!(out.byte_count(), 0);
        out.write_little_endian64(7);
    }
    assert_eq!(sink.next_calls(), 1);
    assert_eq!(sink.data(), &7u64.to_le_bytes());
}

#[test]
fn tiny_chunks_go_through_the_patch_buffer() {
    let chunk = SLOP_BYTES / 4;
    let record = Record::sample();
    let mut sink = MockSink::new(chunk);
    {
        let mut out = CodedOutputStream::new(&mut sink);
        record.encode(&mut out);
        assert!(!out.had_error());
    }
    assert_eq!(sink.data(), &encode_to_vec(&record)[..]);
}

#[test]
fn full_sink_makes_the_stream_fail() {
    let mut sink = MockSink::with_capacity(32, 40);
    {
        let mut out = CodedOutputStream::new(&mut sink);
        out.write_raw(&[0x55; 100]);
        assert!(out.had_error());
        out.write_varint64(u64::MAX);
        assert!(out.had_error());
    }
    assert!(sink.data().len() <= 40);
}

#[test]
fn aliased_payload_reaches_the_sink_by_reference() {
    let payload = vec![7u8; 1000];
    let mut sink = MockSink::new(64).with_aliasing();
    {
        let mut out = CodedOutputStream::new(&mut sink);
        out.enable_aliasing(true);
        out.write_bytes(1, &payload);
        assert_eq!(out.byte_count(), 3 + 1000);
    }
    assert_eq!(sink.aliased_writes(), 1);
    assert_eq!(&sink.data()[..3], &[0x0A, 0xE8, 0x07]);
    assert_eq!(&sink.data()[3..], &payload[..]);
}

#[test]
fn aliasing_is_ignored_by_sinks_that_refuse_it() {
    let payload = vec![7u8; 1000];
    let mut sink = MockSink::new(64);
    {
        let mut out = CodedOutputStream::new(&mut sink);
        out.enable_aliasing(true);
        out.write_bytes(1, &payload);
        assert!(!out.had_error());
    }
    assert_eq!(sink.aliased_writes(), 0);
    assert_eq!(sink.data().len(), 1003);
}

// ── Round trips over each source and sink ───────────────────────

#[test]
fn record_round_trips_through_small_mock_chunks() {
    let record = Record::sample();
    let mut sink = MockSink::new(7);
    {
        let mut out = CodedOutputStream::new(&mut sink);
        record.encode(&mut out);
    }
    let mut source = MockSource::new(sink.data(), 3);
    let mut input = CodedInputStream::new(&mut source);
    assert_eq!(Record::decode(&mut input).unwrap(), record);
}

#[test]
fn unknown_fields_and_groups_are_skipped() {
    let record = Record::sample();
    let mut bytes = Vec::new();
    let mut sink = MockSink::new(32);
    {
        let mut out = CodedOutputStream::new(&mut sink);
        out.write_tag(make_tag(9, WireType::StartGroup));
        out.write_tag(make_tag(1, WireType::Varint));
        out.write_varint32(5);
        out.write_tag(make_tag(9, WireType::EndGroup));
        out.write_tag(make_tag(10, WireType::Fixed64));
        out.write_little_endian64(1);
        record.encode(&mut out);
    }
    bytes.extend_from_slice(sink.data());

    let mut input = CodedInputStream::from_slice(&bytes);
    assert_eq!(Record::decode(&mut input).unwrap(), record);
}

#[test]
fn truncated_record_is_an_error() {
    let bytes = encode_to_vec(&Record::sample());
    let mut input = CodedInputStream::from_slice(&bytes[..bytes.len() - 2]);
    assert_eq!(Record::decode(&mut input), Err(WireError::Truncated));
}

#[test]
fn record_round_trips_through_io_adaptors() {
    let record = Record::sample();
    let mut adaptor = WriteOutputStream::with_block_size(Vec::new(), 5);
    {
        let mut out = CodedOutputStream::new(&mut adaptor);
        record.encode(&mut out);
    }
    let written = adaptor.into_inner().unwrap();
    assert_eq!(written, encode_to_vec(&record));

    let mut reader = ReadInputStream::with_block_size(Cursor::new(written), 4);
    let mut input = CodedInputStream::new(&mut reader);
    assert_eq!(Record::decode(&mut input).unwrap(), record);
}

#[test]
fn record_round_trips_through_cords() {
    let record = Record::sample();
    let mut sink = CordOutputStream::new();
    {
        let mut out = CodedOutputStream::new(&mut sink);
        record.encode(&mut out);
    }
    let cord = sink.into_cord();
    assert_eq!(cord.to_vec(), encode_to_vec(&record));

    let mut source = ChunkedInputStream::from_cord(&cord);
    let mut input = CodedInputStream::new(&mut source);
    assert_eq!(Record::decode(&mut input).unwrap(), record);
}

#[test]
fn large_cord_payload_is_shared_not_copied() {
    let payload = Cord::from(vec![3u8; 4096]);
    let mut sink = CordOutputStream::new();
    assert!(sink.allows_aliasing());
    {
        let mut out = CodedOutputStream::new(&mut sink);
        out.write_tag(NAME);
        out.write_varint32(payload.len() as u32);
        out.write_cord(&payload);
    }
    let cord = sink.into_cord();
    assert_eq!(cord.len(), 3 + 4096);

    let mut source = ChunkedInputStream::from_cord(&cord);
    let mut input = CodedInputStream::new(&mut source);
    assert_eq!(input.read_tag(), NAME);
    let len = input.read_varint32().unwrap();
    let mut read_back = Cord::new();
    assert!(input.read_cord(&mut read_back, len as i32));
    assert_eq!(read_back, payload);
    assert_eq!(input.read_tag(), 0);
    assert!(input.consumed_entire_message());
}
