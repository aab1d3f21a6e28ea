//! Tags, wire types and field skipping.
//!
//! A tag is `(field_number << 3) | wire_type`, written as a varint before
//! every field.

use std::fmt;

use crate::coded_input::CodedInputStream;
use crate::error::WireError;

/// Bits of a tag holding the wire type.
pub const TAG_TYPE_BITS: u32 = 3;

/// Mask selecting the wire type from a tag.
pub const TAG_TYPE_MASK: u32 = (1 << TAG_TYPE_BITS) - 1;

/// Largest legal field number.
pub const MAX_FIELD_NUMBER: u32 = (1 << 29) - 1;

/// How a field's payload is encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// A varint.
    Varint = 0,
    /// Eight little-endian bytes.
    Fixed64 = 1,
    /// A varint length followed by that many bytes.
    LengthDelimited = 2,
    /// Start of a group; fields follow until the matching end-group tag.
    StartGroup = 3,
    /// End of a group.
    EndGroup = 4,
    /// Four little-endian bytes.
    Fixed32 = 5,
}

impl TryFrom<u32> for WireType {
    type Error = WireError;

    /// Decode the low three bits of a tag.
    fn try_from(tag: u32) -> Result<Self, WireError> {
        match tag & TAG_TYPE_MASK {
            0 => Ok(Self::Varint),
            1 => Ok(Self::Fixed64),
            2 => Ok(Self::LengthDelimited),
            3 => Ok(Self::StartGroup),
            4 => Ok(Self::EndGroup),
            5 => Ok(Self::Fixed32),
            _ => Err(WireError::InvalidTag { tag }),
        }
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Varint => "varint",
            Self::Fixed64 => "fixed64",
            Self::LengthDelimited => "length-delimited",
            Self::StartGroup => "start-group",
            Self::EndGroup => "end-group",
            Self::Fixed32 => "fixed32",
        };
        f.write_str(name)
    }
}

/// Build a tag from a field number and wire type.
#[inline]
pub const fn make_tag(field_number: u32, wire_type: WireType) -> u32 {
    (field_number << TAG_TYPE_BITS) | wire_type as u32
}

/// The field number of `tag`.
#[inline]
pub const fn tag_field_number(tag: u32) -> u32 {
    tag >> TAG_TYPE_BITS
}

/// The wire type of `tag`.
#[inline]
pub fn tag_wire_type(tag: u32) -> Result<WireType, WireError> {
    WireType::try_from(tag)
}

/// Declared type of a field, as a schema would give it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum FieldType {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Group,
    Message,
    Bytes,
    Uint32,
    Enum,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
}

impl FieldType {
    /// Wire type used for a single value of this field type.
    pub const fn wire_type(self) -> WireType {
        match self {
            Self::Int32
            | Self::Int64
            | Self::Uint32
            | Self::Uint64
            | Self::Sint32
            | Self::Sint64
            | Self::Bool
            | Self::Enum => WireType::Varint,
            Self::Fixed64 | Self::Sfixed64 | Self::Double => WireType::Fixed64,
            Self::Fixed32 | Self::Sfixed32 | Self::Float => WireType::Fixed32,
            Self::String | Self::Bytes | Self::Message => WireType::LengthDelimited,
            Self::Group => WireType::StartGroup,
        }
    }

    /// Whether repeated fields of this type may use packed encoding.
    pub const fn is_packable(self) -> bool {
        !matches!(
            self,
            Self::String | Self::Bytes | Self::Message | Self::Group
        )
    }
}

/// Skip the payload of the field whose tag was just read.
///
/// Groups are skipped recursively against the stream's recursion budget.
/// An end-group tag here has no group to close and is an error.
pub fn skip_field(input: &mut CodedInputStream<'_>, tag: u32) -> Result<(), WireError> {
    if tag_field_number(tag) == 0 {
        return Err(WireError::InvalidTag { tag });
    }
    match tag_wire_type(tag)? {
        WireType::Varint => input
            .read_varint64()
            .map(drop)
            .ok_or(WireError::MalformedVarint),
        WireType::Fixed64 => input
            .read_little_endian64()
            .map(drop)
            .ok_or(WireError::Truncated),
        WireType::Fixed32 => input
            .read_little_endian32()
            .map(drop)
            .ok_or(WireError::Truncated),
        WireType::LengthDelimited => {
            let length = input.read_varint32().ok_or(WireError::MalformedVarint)?;
            let count = i32::try_from(length).map_err(|_| WireError::InvalidLength { length })?;
            if input.skip(count) {
                Ok(())
            } else {
                Err(WireError::Truncated)
            }
        }
        WireType::StartGroup => {
            if !input.increment_recursion_depth() {
                return Err(WireError::RecursionLimitExceeded {
                    limit: input.recursion_limit(),
                });
            }
            let skipped = skip_message(input);
            input.decrement_recursion_depth();
            skipped?;
            let end = make_tag(tag_field_number(tag), WireType::EndGroup);
            if input.last_tag_was(end) {
                Ok(())
            } else {
                Err(WireError::UnmatchedEndGroup {
                    tag: input.last_tag(),
                })
            }
        }
        WireType::EndGroup => Err(WireError::UnmatchedEndGroup { tag }),
    }
}

/// Skip fields until an end-group tag or the end of the message.
///
/// Stops after reading the end-group tag, so callers can check it with
/// [`CodedInputStream::last_tag_was`]. A zero tag is only accepted where
/// the message legitimately ends.
pub fn skip_message(input: &mut CodedInputStream<'_>) -> Result<(), WireError> {
    loop {
        let tag = input.read_tag();
        if tag == 0 {
            return if input.consumed_entire_message() {
                Ok(())
            } else {
                Err(WireError::Truncated)
            };
        }
        if tag & TAG_TYPE_MASK == WireType::EndGroup as u32 {
            return Ok(());
        }
        skip_field(input, tag)?;
    }
}

/// Read a length prefix, run `parse` with the stream limited to that many
/// bytes, and require that it consumed all of them.
pub fn read_length_delimited<T>(
    input: &mut CodedInputStream<'_>,
    parse: impl FnOnce(&mut CodedInputStream<'_>) -> Result<T, WireError>,
) -> Result<T, WireError> {
    let length = read_length(input)?;
    let limit = input.push_limit(length);
    let result = parse(input);
    let consumed = input.bytes_until_limit() == 0;
    input.pop_limit(limit);
    let value = result?;
    if consumed {
        Ok(value)
    } else {
        Err(WireError::MessageNotConsumed)
    }
}

/// Read an embedded message: a length prefix, then fields parsed by `parse`
/// until the limit ends them.
///
/// Each level of nesting spends one unit of the stream's recursion budget.
/// `parse` is expected to read tags until [`CodedInputStream::read_tag`]
/// returns zero.
pub fn read_message<T>(
    input: &mut CodedInputStream<'_>,
    parse: impl FnOnce(&mut CodedInputStream<'_>) -> Result<T, WireError>,
) -> Result<T, WireError> {
    let length = read_length(input)?;
    let (limit, budget) = input.increment_recursion_depth_and_push_limit(length);
    if budget < 0 {
        input.decrement_recursion_depth_and_pop_limit(limit);
        return Err(WireError::RecursionLimitExceeded {
            limit: input.recursion_limit(),
        });
    }
    let result = parse(input);
    let consumed = input.decrement_recursion_depth_and_pop_limit(limit);
    let value = result?;
    if consumed {
        Ok(value)
    } else {
        Err(WireError::MessageNotConsumed)
    }
}

fn read_length(input: &mut CodedInputStream<'_>) -> Result<i32, WireError> {
    let length = input.read_varint32().ok_or(WireError::MalformedVarint)?;
    i32::try_from(length).map_err(|_| WireError::InvalidLength { length })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_parts() {
        let tag = make_tag(150, WireType::LengthDelimited);
        assert_eq!(tag, 1202);
        assert_eq!(tag_field_number(tag), 150);
        assert_eq!(tag_wire_type(tag), Ok(WireType::LengthDelimited));
        assert_eq!(tag_wire_type(7), Err(WireError::InvalidTag { tag: 7 }));
    }

    #[test]
    fn field_types_map_to_wire_types() {
        assert_eq!(FieldType::Sint64.wire_type(), WireType::Varint);
        assert_eq!(FieldType::Double.wire_type(), WireType::Fixed64);
        assert_eq!(FieldType::Float.wire_type(), WireType::Fixed32);
        assert_eq!(FieldType::Message.wire_type(), WireType::LengthDelimited);
        assert_eq!(FieldType::Group.wire_type(), WireType::StartGroup);
        assert!(FieldType::Enum.is_packable());
        assert!(!FieldType::Bytes.is_packable());
    }

    #[test]
    fn skips_every_wire_type() {
        let data = [
            0x08, 0x96, 0x01, // 1: varint 150
            0x11, 1, 2, 3, 4, 5, 6, 7, 8, // 2: fixed64
            0x1a, 0x03, b'a', b'b', b'c', // 3: bytes
            0x23, 0x08, 0x01, 0x24, // 4: group { 1: 1 }
            0x2d, 1, 2, 3, 4, // 5: fixed32
        ];
        let mut input = CodedInputStream::from_slice(&data);
        assert_eq!(skip_message(&mut input), Ok(()));
        assert!(input.consumed_entire_message());
    }

    #[test]
    fn unmatched_end_group() {
        let mut input = CodedInputStream::from_slice(&[0x23, 0x2c]);
        let tag = input.read_tag();
        assert_eq!(
            skip_field(&mut input, tag),
            Err(WireError::UnmatchedEndGroup { tag: 0x2c })
        );
        let mut input = CodedInputStream::from_slice(&[0x0c]);
        assert_eq!(
            skip_message(&mut input),
            Ok(()),
            "a bare end-group tag ends the skip; the caller checks it"
        );
        assert!(input.last_tag_was(0x0c));
    }

    #[test]
    fn truncated_and_invalid_fields() {
        let mut input = CodedInputStream::from_slice(&[0x1a, 0x05, b'a']);
        assert_eq!(skip_message(&mut input), Err(WireError::Truncated));
        let mut input = CodedInputStream::from_slice(&[0x0f, 0x00]);
        assert_eq!(skip_message(&mut input), Err(WireError::InvalidTag { tag: 0x0f }));
        let mut input = CodedInputStream::from_slice(&[0x00]);
        assert_eq!(skip_message(&mut input), Err(WireError::Truncated));
    }

    #[test]
    fn message_within_limit() {
        // length 5: { 1: 150, 2: 1 }, then a stray tag
        let data = [0x05, 0x08, 0x96, 0x01, 0x10, 0x01, 0x18, 0x07];
        let mut input = CodedInputStream::from_slice(&data);
        let fields = read_message(&mut input, |input| {
            let mut fields = Vec::new();
            loop {
                let tag = input.read_tag();
                if tag == 0 {
                    return Ok(fields);
                }
                fields.push((tag_field_number(tag), input.read_varint64()));
            }
        });
        assert_eq!(fields, Ok(vec![(1, Some(150)), (2, Some(1))]));
        assert_eq!(input.recursion_budget(), 100);
        assert_eq!(input.read_tag(), 0x18);
    }

    #[test]
    fn nesting_beyond_recursion_limit_fails() {
        // Four levels of `1: { ... }`; `wrapped` adds a fifth.
        let data = [0x0a, 0x06, 0x0a, 0x04, 0x0a, 0x02, 0x0a, 0x00];

        fn nested(input: &mut CodedInputStream<'_>) -> Result<u32, WireError> {
            let mut depth = 0;
            loop {
                let tag = input.read_tag();
                if tag == 0 {
                    return Ok(depth);
                }
                depth = depth.max(1 + read_message(input, nested)?);
            }
        }

        let wrapped = [&[0x0a, 0x08][..], &data[..]].concat();
        let mut outer = CodedInputStream::from_slice(&wrapped);
        outer.set_recursion_limit(3);
        assert_eq!(
            nested(&mut outer),
            Err(WireError::RecursionLimitExceeded { limit: 3 })
        );
        assert_eq!(outer.recursion_budget(), 3);

        let mut input = CodedInputStream::from_slice(&data);
        input.set_recursion_limit(4);
        assert_eq!(nested(&mut input), Ok(4));
    }

    #[test]
    fn length_delimited_must_be_consumed() {
        let data = [0x03, 1, 2, 3];
        let mut input = CodedInputStream::from_slice(&data);
        let first_two = read_length_delimited(&mut input, |input| {
            let mut buf = [0u8; 2];
            Ok(input.read_raw(&mut buf).then_some(buf))
        });
        assert_eq!(first_two, Err(WireError::MessageNotConsumed));

        let mut input = CodedInputStream::from_slice(&data);
        let all = read_length_delimited(&mut input, |input| {
            let mut buf = Vec::new();
            Ok(input.read_bytes(&mut buf, 3).then_some(buf))
        });
        assert_eq!(all, Ok(Some(vec![1, 2, 3])));
    }
}
