//! Wire-format error types.

use std::error::Error;
use std::fmt;

/// Errors reported by the wire-format helpers in [`wire_format`](crate::wire_format).
///
/// The coded streams themselves report failure through `Option` and `bool`
/// returns; these variants give the higher-level helpers a reason to attach.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireError {
    /// A varint ran past ten bytes or the input ended inside one.
    MalformedVarint,
    /// The input ended, or a limit was reached, before a complete value.
    Truncated,
    /// Field number zero or an unknown wire type.
    InvalidTag {
        /// The offending tag.
        tag: u32,
    },
    /// An end-group tag with no matching start-group tag.
    UnmatchedEndGroup {
        /// The tag that ended the group, zero if the input ended instead.
        tag: u32,
    },
    /// A length prefix that cannot be represented as a non-negative `i32`.
    InvalidLength {
        /// The decoded length.
        length: u32,
    },
    /// Messages nested deeper than the stream's recursion limit.
    RecursionLimitExceeded {
        /// The recursion limit in effect.
        limit: i32,
    },
    /// A length-delimited message did not end exactly at its limit.
    MessageNotConsumed,
    /// A string field is not valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedVarint => write!(f, "malformed varint"),
            Self::Truncated => write!(f, "input truncated"),
            Self::InvalidTag { tag } => write!(f, "invalid tag: {tag:#x}"),
            Self::UnmatchedEndGroup { tag } => {
                write!(f, "unmatched end-group tag: {tag:#x}")
            }
            Self::InvalidLength { length } => write!(f, "invalid length prefix: {length}"),
            Self::RecursionLimitExceeded { limit } => {
                write!(f, "message nesting exceeds recursion limit of {limit}")
            }
            Self::MessageNotConsumed => {
                write!(f, "length-delimited message did not end at its limit")
            }
            Self::InvalidUtf8 => write!(f, "string field is not valid UTF-8"),
        }
    }
}

impl Error for WireError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_details() {
        assert_eq!(
            WireError::RecursionLimitExceeded { limit: 100 }.to_string(),
            "message nesting exceeds recursion limit of 100"
        );
        assert_eq!(
            WireError::InvalidTag { tag: 0x0f }.to_string(),
            "invalid tag: 0xf"
        );
    }
}
