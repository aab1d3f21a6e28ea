//! pbcore: arena allocation and protobuf wire-format coded streams.
//!
//! This is the top-level facade crate that re-exports the public API from all
//! pbcore sub-crates. For most users, adding `pbcore` as a single dependency
//! is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use pbcore::prelude::*;
//!
//! // Parse a name field into arena-owned storage.
//! let mut wire = Vec::new();
//! {
//!     let mut sink = VecOutputStream::new(&mut wire);
//!     let mut out = CodedOutputStream::new(&mut sink);
//!     out.write_string(2, "temperature");
//! }
//! assert_eq!(wire[0], 0x12);
//!
//! let arena = Arena::new();
//! let mut input = CodedInputStream::from_slice(&wire);
//! let tag = input.read_tag();
//! assert_eq!(tag, pbcore::io::wire_format::make_tag(2, WireType::LengthDelimited));
//! let len = input.read_varint32().unwrap();
//! let mut name = String::new();
//! assert!(input.read_string(&mut name, len as i32));
//! let name = arena.alloc_string(name);
//!
//! assert_eq!(name.as_str(), "temperature");
//! assert_eq!(input.read_tag(), 0);
//! assert!(input.consumed_entire_message());
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`arena`] | `pbcore-arena` | `Arena`, `ThreadSafeArena`, allocation policy |
//! | [`io`] | `pbcore-io` | Zero-copy streams, coded streams, wire format |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Thread-safe bump arenas (`pbcore-arena`).
///
/// [`arena::Arena`] is the typed front end; [`arena::ThreadSafeArena`]
/// exposes the raw, per-thread allocation machinery.
pub use pbcore_arena as arena;

/// Zero-copy byte streams and the protobuf coded streams (`pbcore-io`).
///
/// Decode with [`io::CodedInputStream`], encode with
/// [`io::CodedOutputStream`], and skip or frame fields with the helpers in
/// [`io::wire_format`].
pub use pbcore_io as io;

/// Common imports for typical pbcore usage.
///
/// ```rust
/// use pbcore::prelude::*;
/// ```
pub mod prelude {
    // Arena
    pub use pbcore_arena::{Arena, ArenaError, ArenaOptions, ThreadSafeArena};

    // Coded streams
    pub use pbcore_io::{CodedInputStream, CodedOutputStream, WireError, WireType};

    // Byte sources and sinks
    pub use pbcore_io::{
        ArrayInputStream, ArrayOutputStream, Cord, VecOutputStream, ZeroCopyInputStream,
        ZeroCopyOutputStream,
    };
}
