//! Thread-safe arena allocation for pbcore.
//!
//! Objects are bump-allocated from blocks and reclaimed all at once when the
//! arena is reset or dropped. This crate is one of two that contain `unsafe`
//! code (along with `pbcore-io`); every block carries a `// SAFETY:` note.
//!
//! # Architecture
//!
//! ```text
//! Arena (typed facade: alloc, alloc_str, alloc_string, own, new_vec)
//! └── ThreadSafeArena
//!     ├── first SerialArena (constructing / resetting thread)
//!     ├── Registry → SerialArenaChunk[] → SerialArena (one per other thread)
//!     │   └── ArenaBlock chain (bump up, cleanup nodes down)
//!     │       └── StringBlock chain, cached array blocks
//!     └── AllocationPolicy (stored in the first block when non-default)
//! ```
//!
//! # Teardown order
//!
//! Reset and drop run destructors before freeing any block: serial arenas
//! newest first, the first arena last; within an arena, blocks newest first
//! and cleanup nodes in reverse registration order.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod arena;
mod block;
pub mod cleanup;
pub mod config;
pub mod error;
mod registry;
pub mod serial;
mod string_block;
pub mod thread_safe;
mod thread_cache;

// Public re-exports for the primary API surface.
pub use arena::{Arena, ArenaStats, ArenaVec};
pub use cleanup::Destructor;
pub use config::{AllocationPolicy, ArenaOptions, BlockAllocator, SystemBlockAllocator};
pub use error::ArenaError;
pub use serial::SerialArena;
pub use thread_safe::ThreadSafeArena;
