//! Raw arena blocks and the shared sentry block.
//!
//! Every block starts with an [`ArenaBlock`] header. Bump allocations grow
//! upward from just past the header; cleanup nodes grow downward from the
//! block's limit. A block chain is linked newest to oldest through `next`.

use std::ptr::{self, NonNull};

use crate::config::{AllocationPolicy, BLOCK_ALIGN};

/// Round `n` up to a multiple of `align` (a power of two).
#[inline]
pub(crate) const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// A pointer paired with the size of the allocation it points to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SizedPtr {
    pub(crate) ptr: NonNull<u8>,
    pub(crate) size: usize,
}

/// Header placed at the start of every raw block.
#[repr(C)]
pub(crate) struct ArenaBlock {
    /// The previous (older) block in the chain, or null for the oldest.
    pub(crate) next: *mut ArenaBlock,
    /// Lowest live cleanup node; recorded when the block stops being head.
    pub(crate) cleanup_nodes: *mut u8,
    /// Total block size in bytes, header included. Zero only for the sentry.
    pub(crate) size: usize,
}

/// Bytes reserved at the start of each block for its header.
pub(crate) const BLOCK_HEADER_SIZE: usize = align_up(size_of::<ArenaBlock>(), BLOCK_ALIGN);

struct Sentry(ArenaBlock);

// SAFETY: the sentry is never written; all its pointers are null.
unsafe impl Sync for Sentry {}

static SENTRY: Sentry = Sentry(ArenaBlock {
    next: ptr::null_mut(),
    cleanup_nodes: ptr::null_mut(),
    size: 0,
});

/// The process-wide zero-sized block that stands for "no block yet".
///
/// Callers must check [`ArenaBlock::is_sentry`] before writing through the
/// returned pointer.
pub(crate) fn sentry_block() -> *mut ArenaBlock {
    ptr::from_ref(&SENTRY.0).cast_mut()
}

impl ArenaBlock {
    /// Write a fresh header at the start of `mem`.
    ///
    /// # Safety
    ///
    /// `mem` must be writable, [`BLOCK_ALIGN`]-aligned and at least
    /// [`BLOCK_HEADER_SIZE`] bytes long.
    pub(crate) unsafe fn init(mem: SizedPtr, next: *mut ArenaBlock) -> NonNull<ArenaBlock> {
        debug_assert!(mem.size >= BLOCK_HEADER_SIZE);
        let block = mem.ptr.cast::<ArenaBlock>();
        // SAFETY: caller guarantees the memory is valid and aligned.
        unsafe {
            block.as_ptr().write(ArenaBlock {
                next,
                cleanup_nodes: ptr::null_mut(),
                size: mem.size,
            });
        }
        block
    }

    /// Whether this is the shared sentry block.
    #[inline]
    pub(crate) fn is_sentry(&self) -> bool {
        self.size == 0
    }

    /// Pointer `offset` bytes past the start of the block at `this`.
    #[inline]
    pub(crate) fn pointer(this: NonNull<ArenaBlock>, offset: usize) -> *mut u8 {
        this.as_ptr().cast::<u8>().wrapping_add(offset)
    }

    /// One past the last usable byte of the block at `this`.
    #[inline]
    pub(crate) fn limit(this: NonNull<ArenaBlock>) -> *mut u8 {
        // SAFETY: `this` points at an initialized header.
        let size = unsafe { this.as_ref().size };
        Self::pointer(this, size & !(BLOCK_ALIGN - 1))
    }

    /// The block's memory as a [`SizedPtr`] for deallocation.
    #[inline]
    pub(crate) fn sized_ptr(this: NonNull<ArenaBlock>) -> SizedPtr {
        // SAFETY: `this` points at an initialized header.
        let size = unsafe { this.as_ref().size };
        SizedPtr {
            ptr: this.cast(),
            size,
        }
    }
}

/// Get memory for the block that follows one of `last_size` bytes.
///
/// The first block of a chain (`last_size == 0`) uses the policy's start
/// size; later blocks double up to the policy maximum. The result always has
/// room for the header plus `min_bytes`.
///
/// # Panics
///
/// Panics if `min_bytes` plus the header overflows `usize`.
pub(crate) fn allocate_memory(
    policy: &AllocationPolicy<'_>,
    last_size: usize,
    min_bytes: usize,
) -> SizedPtr {
    let size = if last_size != 0 {
        last_size.saturating_mul(2).min(policy.max_block_size)
    } else {
        policy.start_block_size
    };
    assert!(
        min_bytes <= usize::MAX - BLOCK_HEADER_SIZE - BLOCK_ALIGN,
        "arena request of {min_bytes} bytes overflows the block size"
    );
    let size = align_up(size.max(BLOCK_HEADER_SIZE + min_bytes), BLOCK_ALIGN);
    policy.allocate(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentry_is_zero_sized() {
        // SAFETY: the sentry is a valid static header.
        let sentry = unsafe { &*sentry_block() };
        assert!(sentry.is_sentry());
        assert!(sentry.next.is_null());
    }

    #[test]
    fn header_is_aligned() {
        assert_eq!(BLOCK_HEADER_SIZE % BLOCK_ALIGN, 0);
        assert!(BLOCK_HEADER_SIZE >= size_of::<ArenaBlock>());
    }

    #[test]
    fn block_sizes_double_up_to_max() {
        let policy = AllocationPolicy {
            start_block_size: 64,
            max_block_size: 256,
            block_allocator: None,
        };
        let mut sizes = Vec::new();
        let mut last = 0;
        for _ in 0..4 {
            let mem = allocate_memory(&policy, last, 8);
            sizes.push(mem.size);
            last = mem.size;
            // SAFETY: allocated from `policy` just above.
            unsafe { policy.deallocate(mem) };
        }
        assert_eq!(sizes, vec![64, 128, 256, 256]);
    }

    #[test]
    fn large_request_gets_large_block() {
        let policy = AllocationPolicy::DEFAULT;
        let mem = allocate_memory(&policy, 0, 10_000);
        assert!(mem.size >= BLOCK_HEADER_SIZE + 10_000);
        assert_eq!(mem.size % BLOCK_ALIGN, 0);
        // SAFETY: allocated from `policy` just above.
        unsafe { policy.deallocate(mem) };
    }

    #[test]
    #[should_panic(expected = "overflows the block size")]
    fn overflowing_request_panics() {
        allocate_memory(&AllocationPolicy::DEFAULT, 0, usize::MAX - 4);
    }

    #[test]
    fn init_writes_header() {
        let policy = AllocationPolicy::DEFAULT;
        let mem = policy.allocate(96);
        // SAFETY: `mem` is a fresh 96-byte aligned block.
        let block = unsafe { ArenaBlock::init(mem, ptr::null_mut()) };
        // SAFETY: just initialized.
        let header = unsafe { block.as_ref() };
        assert!(!header.is_sentry());
        assert_eq!(header.size, 96);
        assert_eq!(
            ArenaBlock::limit(block) as usize - block.as_ptr() as usize,
            96
        );
        assert_eq!(ArenaBlock::sized_ptr(block), mem);
        // SAFETY: allocated from `policy` just above.
        unsafe { policy.deallocate(mem) };
    }
}
