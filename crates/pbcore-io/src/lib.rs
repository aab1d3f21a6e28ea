//! Protocol buffer wire-format coded streams.
//!
//! Reads and writes the protobuf binary encoding (varints, fixed-width
//! values, tags and length-delimited payloads) over chunked byte sources
//! and sinks, copying only where a value straddles two chunks.
//!
//! # Architecture
//!
//! ```text
//! CodedInputStream ──► ZeroCopyInputStream  ◄── ArrayInputStream
//!   (limits, tags,                           ◄── ChunkedInputStream (Bytes)
//!    recursion)                              ◄── ReadInputStream<R: Read>
//!
//! CodedOutputStream ─► EpsCopyOutputStream ─► ZeroCopyOutputStream
//!   (byte count)        (slop + patch buffer)  ◄── ArrayOutputStream
//!                                              ◄── VecOutputStream
//!                                              ◄── CordOutputStream
//!                                              ◄── WriteOutputStream<W: Write>
//! ```
//!
//! - [`codec`] holds the array-level primitives the streams are built on
//! - [`wire_format`] adds tags, field skipping and nested-message reads
//!
//! # Example
//!
//! ```
//! use pbcore_io::{CodedInputStream, CodedOutputStream, VecOutputStream};
//! use pbcore_io::wire_format::{make_tag, WireType};
//!
//! let mut encoded = Vec::new();
//! {
//!     let mut sink = VecOutputStream::new(&mut encoded);
//!     let mut out = CodedOutputStream::new(&mut sink);
//!     out.write_tag(make_tag(1, WireType::Varint));
//!     out.write_varint32(300);
//! }
//! assert_eq!(encoded, [0x08, 0xAC, 0x02]);
//!
//! let mut input = CodedInputStream::from_slice(&encoded);
//! assert_eq!(input.read_tag(), 0x08);
//! assert_eq!(input.read_varint32(), Some(300));
//! assert_eq!(input.read_tag(), 0);
//! assert!(input.consumed_entire_message());
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod adaptor;
pub mod array;
pub mod chunked;
pub mod codec;
pub mod coded_input;
pub mod coded_output;
pub mod cord;
pub mod error;
pub mod wire_format;
pub mod zero_copy;

pub use adaptor::{ReadInputStream, WriteOutputStream};
pub use array::{ArrayInputStream, ArrayOutputStream, VecOutputStream};
pub use chunked::{ChunkedInputStream, CordOutputStream};
pub use coded_input::{CodedInputStream, Limit, DEFAULT_RECURSION_LIMIT};
pub use coded_output::{CodedOutputStream, EpsCopyOutputStream, SLOP_BYTES};
pub use cord::Cord;
pub use error::WireError;
pub use wire_format::{FieldType, WireType};
pub use zero_copy::{ZeroCopyInputStream, ZeroCopyOutputStream};
