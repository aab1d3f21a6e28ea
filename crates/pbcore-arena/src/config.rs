//! Arena configuration parameters and the block allocation policy.

use std::alloc::{self, Layout};
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::block::SizedPtr;
use crate::error::ArenaError;

/// Alignment of every block handed out by a [`BlockAllocator`].
pub const BLOCK_ALIGN: usize = 8;

/// Source of the raw memory blocks an arena carves allocations from.
///
/// # Safety
///
/// `allocate(size)` must return a pointer to at least `size` bytes, aligned
/// to [`BLOCK_ALIGN`], readable and writable until it is passed back to
/// `deallocate` with the same size. Implementations are shared between every
/// thread that allocates from the arena.
pub unsafe trait BlockAllocator: Sync {
    /// Allocate a block of exactly `size` bytes.
    fn allocate(&self, size: usize) -> NonNull<u8>;

    /// Release a block previously returned by [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `self.allocate(size)` and must not be used again.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize);
}

/// [`BlockAllocator`] backed by the global allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemBlockAllocator;

fn block_layout(size: usize) -> Layout {
    Layout::from_size_align(size, BLOCK_ALIGN).expect("arena block size overflows isize")
}

// SAFETY: `alloc::alloc` with an 8-aligned layout satisfies the contract, and
// `deallocate` rebuilds the identical layout.
unsafe impl BlockAllocator for SystemBlockAllocator {
    fn allocate(&self, size: usize) -> NonNull<u8> {
        let layout = block_layout(size);
        // SAFETY: every block includes its header, so the layout is non-zero.
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).unwrap_or_else(|| alloc::handle_alloc_error(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: forwarded caller contract; same layout as `allocate`.
        unsafe { alloc::dealloc(ptr.as_ptr(), block_layout(size)) }
    }
}

/// Block sizing and the allocator blocks come from.
///
/// This is the resolved, copyable form of [`ArenaOptions`] that the arena
/// consults whenever a block is needed. A non-default policy is stored
/// inside the arena's first block.
#[derive(Clone, Copy)]
pub struct AllocationPolicy<'a> {
    /// Size of the first block of every serial arena.
    pub start_block_size: usize,
    /// Upper bound for the geometric block growth.
    pub max_block_size: usize,
    /// Custom block source; `None` uses [`SystemBlockAllocator`].
    pub block_allocator: Option<&'a dyn BlockAllocator>,
}

impl<'a> AllocationPolicy<'a> {
    /// The policy used when no options are given.
    pub const DEFAULT: AllocationPolicy<'static> = AllocationPolicy {
        start_block_size: ArenaOptions::DEFAULT_START_BLOCK_SIZE,
        max_block_size: ArenaOptions::DEFAULT_MAX_BLOCK_SIZE,
        block_allocator: None,
    };

    /// Whether this policy equals [`AllocationPolicy::DEFAULT`].
    pub fn is_default(&self) -> bool {
        self.start_block_size == ArenaOptions::DEFAULT_START_BLOCK_SIZE
            && self.max_block_size == ArenaOptions::DEFAULT_MAX_BLOCK_SIZE
            && self.block_allocator.is_none()
    }

    pub(crate) fn allocate(&self, size: usize) -> SizedPtr {
        let ptr = match self.block_allocator {
            Some(allocator) => allocator.allocate(size),
            None => SystemBlockAllocator.allocate(size),
        };
        debug_assert_eq!(ptr.as_ptr() as usize % BLOCK_ALIGN, 0);
        SizedPtr { ptr, size }
    }

    /// # Safety
    ///
    /// `mem` must have been returned by [`allocate`](Self::allocate) on a
    /// policy with the same block allocator.
    pub(crate) unsafe fn deallocate(&self, mem: SizedPtr) {
        // SAFETY: forwarded caller contract.
        unsafe {
            match self.block_allocator {
                Some(allocator) => allocator.deallocate(mem.ptr, mem.size),
                None => SystemBlockAllocator.deallocate(mem.ptr, mem.size),
            }
        }
    }
}

impl Default for AllocationPolicy<'_> {
    fn default() -> Self {
        AllocationPolicy::DEFAULT
    }
}

impl fmt::Debug for AllocationPolicy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationPolicy")
            .field("start_block_size", &self.start_block_size)
            .field("max_block_size", &self.max_block_size)
            .field("custom_allocator", &self.block_allocator.is_some())
            .finish()
    }
}

/// Configuration for an [`Arena`](crate::Arena).
///
/// Validated by [`ArenaOptions::validate`] when the arena is constructed;
/// the resulting policy is immutable for the arena's lifetime (it survives
/// [`Arena::reset`](crate::Arena::reset)).
pub struct ArenaOptions<'a> {
    /// Size of the first block each serial arena allocates.
    ///
    /// Default: 256 bytes. Must be non-zero.
    pub start_block_size: usize,

    /// Ceiling for block growth. Blocks double in size until they reach it;
    /// a single request larger than this still gets a block big enough.
    ///
    /// Default: 32 KiB. Must be at least `start_block_size`.
    pub max_block_size: usize,

    /// Where blocks come from. `None` uses the global allocator.
    pub block_allocator: Option<&'a dyn BlockAllocator>,

    /// Caller-owned memory used as the first block.
    ///
    /// The arena never frees it. A buffer too small to hold the block header
    /// (plus the stored policy, for non-default options) is ignored.
    pub initial_block: Option<&'a mut [MaybeUninit<u8>]>,
}

impl<'a> ArenaOptions<'a> {
    /// Default first-block size in bytes.
    pub const DEFAULT_START_BLOCK_SIZE: usize = 256;

    /// Default maximum block size in bytes.
    pub const DEFAULT_MAX_BLOCK_SIZE: usize = 32 * 1024;

    /// Options with every field at its default.
    pub fn new() -> Self {
        Self {
            start_block_size: Self::DEFAULT_START_BLOCK_SIZE,
            max_block_size: Self::DEFAULT_MAX_BLOCK_SIZE,
            block_allocator: None,
            initial_block: None,
        }
    }

    /// Check the options for internal consistency.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.start_block_size == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "start_block_size must be non-zero".into(),
            });
        }
        if self.max_block_size < self.start_block_size {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "max_block_size ({}) is smaller than start_block_size ({})",
                    self.max_block_size, self.start_block_size
                ),
            });
        }
        Ok(())
    }

    /// The allocation policy these options describe.
    pub fn policy(&self) -> AllocationPolicy<'a> {
        AllocationPolicy {
            start_block_size: self.start_block_size,
            max_block_size: self.max_block_size,
            block_allocator: self.block_allocator,
        }
    }
}

impl Default for ArenaOptions<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ArenaOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaOptions")
            .field("start_block_size", &self.start_block_size)
            .field("max_block_size", &self.max_block_size)
            .field("custom_allocator", &self.block_allocator.is_some())
            .field("initial_block_len", &self.initial_block.as_ref().map(|b| b.len()))
            .finish()
    }
}
