//! Single-owner bump allocation over a chain of blocks.
//!
//! A [`SerialArena`] is mutated by exactly one thread at a time: the thread
//! whose identity it is registered under in its
//! [`ThreadSafeArena`](crate::ThreadSafeArena), or any thread holding the
//! arena exclusively during reset and teardown. Other threads only read the
//! relaxed atomics used for statistics.

use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use tracing::trace;

use crate::block::{
    align_up, allocate_memory, sentry_block, ArenaBlock, SizedPtr, BLOCK_HEADER_SIZE,
};
use crate::cleanup::{CleanupNode, Destructor, CLEANUP_NODE_SIZE};
use crate::config::{AllocationPolicy, BLOCK_ALIGN};
use crate::string_block::StringChain;

/// Number of power-of-two size classes for recycled array buffers.
const CACHED_SIZE_CLASSES: usize = 16;

/// Smallest buffer worth recycling.
const MIN_CACHED_BLOCK: usize = 16;

struct CachedBlock {
    next: *mut CachedBlock,
}

/// State only the owning thread touches.
struct OwnerState {
    /// Lower edge of the cleanup-node region of the head block.
    limit: *mut u8,
    cached_blocks: [*mut CachedBlock; CACHED_SIZE_CLASSES],
    strings: StringChain,
}

impl OwnerState {
    fn new(limit: *mut u8) -> Self {
        Self {
            limit,
            cached_blocks: [ptr::null_mut(); CACHED_SIZE_CLASSES],
            strings: StringChain::default(),
        }
    }
}

/// Bump allocator over a private chain of blocks.
///
/// Obtained through [`ThreadSafeArena::serial_arena`](crate::ThreadSafeArena::serial_arena);
/// the public surface is read-only statistics.
pub struct SerialArena {
    /// Bump pointer into the head block.
    ptr: AtomicPtr<u8>,
    /// Newest block; the sentry until the first allocation.
    head: AtomicPtr<ArenaBlock>,
    /// Bytes used in every block except the head.
    space_used: AtomicUsize,
    /// Bytes obtained from the allocation policy, string blocks included.
    space_allocated: AtomicUsize,
    owner: UnsafeCell<OwnerState>,
}

// SAFETY: `owner` is only accessed by the single thread that owns this arena
// (routing in `ThreadSafeArena` guarantees it) or under `&mut` exclusivity.
// Everything other threads read is atomic.
unsafe impl Sync for SerialArena {}
// SAFETY: the raw pointers refer to blocks owned by this arena.
unsafe impl Send for SerialArena {}

/// Bytes a serial arena occupies when hosted inside its first block.
pub(crate) const SERIAL_ARENA_SIZE: usize = align_up(size_of::<SerialArena>(), BLOCK_ALIGN);

const _: () = assert!(align_of::<SerialArena>() <= BLOCK_ALIGN);

/// Bytes to bump for `n` bytes at `align`, including alignment slack.
///
/// # Panics
///
/// Panics if the padded size overflows `usize`.
#[inline]
fn request_size(n: usize, align: usize) -> usize {
    let slack = align.max(BLOCK_ALIGN) - BLOCK_ALIGN;
    match n.checked_add(slack + BLOCK_ALIGN - 1) {
        Some(padded) => padded & !(BLOCK_ALIGN - 1),
        None => panic!("arena request of {n} bytes overflows the block size"),
    }
}

#[inline]
fn align_ptr(p: NonNull<u8>, align: usize) -> NonNull<u8> {
    if align <= BLOCK_ALIGN {
        return p;
    }
    let offset = p.as_ptr().align_offset(align);
    // SAFETY: `request_size` reserved `align - BLOCK_ALIGN` bytes of slack,
    // which covers the offset of an 8-aligned pointer.
    unsafe { p.add(offset) }
}

#[inline]
fn bit_width(n: usize) -> usize {
    (usize::BITS - n.leading_zeros()) as usize
}

impl SerialArena {
    /// An arena with no blocks, headed by the sentry.
    pub(crate) fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            head: AtomicPtr::new(sentry_block()),
            space_used: AtomicUsize::new(0),
            space_allocated: AtomicUsize::new(0),
            owner: UnsafeCell::new(OwnerState::new(ptr::null_mut())),
        }
    }

    /// An arena whose head is `block`, with `offset` bytes already in use.
    ///
    /// # Safety
    ///
    /// `block` must carry an initialized header and `offset` must lie within
    /// its usable region.
    unsafe fn with_block(block: NonNull<ArenaBlock>, offset: usize) -> Self {
        let mem = ArenaBlock::sized_ptr(block);
        Self {
            ptr: AtomicPtr::new(ArenaBlock::pointer(block, offset)),
            head: AtomicPtr::new(block.as_ptr()),
            space_used: AtomicUsize::new(0),
            space_allocated: AtomicUsize::new(mem.size),
            owner: UnsafeCell::new(OwnerState::new(ArenaBlock::limit(block))),
        }
    }

    /// Construct a serial arena inside `mem`, right after the block header.
    ///
    /// # Safety
    ///
    /// `mem` must be a fresh block of at least
    /// `BLOCK_HEADER_SIZE + SERIAL_ARENA_SIZE` bytes.
    pub(crate) unsafe fn new_in(mem: SizedPtr) -> NonNull<SerialArena> {
        debug_assert!(mem.size >= BLOCK_HEADER_SIZE + SERIAL_ARENA_SIZE);
        // SAFETY: caller guarantees `mem` is large enough and unused.
        unsafe {
            let block = ArenaBlock::init(mem, ptr::null_mut());
            let serial = ArenaBlock::pointer(block, BLOCK_HEADER_SIZE).cast::<SerialArena>();
            serial.write(Self::with_block(
                block,
                BLOCK_HEADER_SIZE + SERIAL_ARENA_SIZE,
            ));
            NonNull::new_unchecked(serial)
        }
    }

    /// Restart this arena over `block` (or the sentry when `None`).
    ///
    /// # Safety
    ///
    /// The previous blocks and string chain must already have been released.
    pub(crate) unsafe fn reinit(&mut self, block: Option<NonNull<ArenaBlock>>) {
        *self = match block {
            // SAFETY: forwarded caller contract.
            Some(block) => unsafe { Self::with_block(block, BLOCK_HEADER_SIZE) },
            None => Self::new(),
        };
    }

    #[allow(clippy::mut_from_ref)] // single-owner state behind UnsafeCell
    #[inline]
    fn owner(&self) -> &mut OwnerState {
        // SAFETY: only the owning thread calls into allocation paths, and no
        // method holds this borrow across a call that takes it again.
        unsafe { &mut *self.owner.get() }
    }

    #[inline]
    fn has_space(&self, n: usize) -> bool {
        let ptr = self.ptr.load(Ordering::Relaxed);
        !ptr.is_null() && (self.owner().limit as usize - ptr as usize) >= n
    }

    /// Bump `n` bytes (a multiple of 8) from the head block if they fit.
    #[inline]
    fn maybe_allocate_aligned(&self, n: usize) -> Option<NonNull<u8>> {
        if !self.has_space(n) {
            return None;
        }
        let ptr = self.ptr.load(Ordering::Relaxed);
        // SAFETY: `has_space` checked that `ptr + n` stays within the block.
        self.ptr.store(unsafe { ptr.add(n) }, Ordering::Relaxed);
        NonNull::new(ptr)
    }

    /// Allocate `n` bytes aligned to `align`.
    #[inline]
    pub(crate) fn allocate_aligned(
        &self,
        n: usize,
        align: usize,
        policy: &AllocationPolicy<'_>,
    ) -> NonNull<u8> {
        debug_assert!(align.is_power_of_two());
        let size = request_size(n, align);
        let p = match self.maybe_allocate_aligned(size) {
            Some(p) => p,
            None => self.allocate_aligned_fallback(size, policy),
        };
        align_ptr(p, align)
    }

    #[cold]
    fn allocate_aligned_fallback(&self, n: usize, policy: &AllocationPolicy<'_>) -> NonNull<u8> {
        self.allocate_new_block(n, policy);
        self.maybe_allocate_aligned(n)
            .unwrap_or_else(|| unreachable!("fresh block cannot hold {n} bytes"))
    }

    /// Allocate `n` bytes aligned to `align` and register `destructor` for
    /// them, both in the same block.
    ///
    /// # Safety
    ///
    /// `destructor` must be sound to call on the returned pointer once the
    /// caller has initialized it, at any point before the memory is freed.
    pub(crate) unsafe fn allocate_aligned_with_cleanup(
        &self,
        n: usize,
        align: usize,
        destructor: Destructor,
        policy: &AllocationPolicy<'_>,
    ) -> NonNull<u8> {
        let size = request_size(n, align);
        let needed = size
            .checked_add(CLEANUP_NODE_SIZE)
            .unwrap_or_else(|| panic!("arena request of {n} bytes overflows the block size"));
        if !self.has_space(needed) {
            self.allocate_new_block(needed, policy);
        }
        let p = self
            .maybe_allocate_aligned(size)
            .unwrap_or_else(|| unreachable!("space for {size} bytes was just ensured"));
        let elem = align_ptr(p, align);
        self.add_cleanup_from_existing(elem.as_ptr(), destructor);
        elem
    }

    /// Register `destructor` to run on `elem` when the arena is cleaned up.
    ///
    /// # Safety
    ///
    /// `destructor(elem)` must be sound to call once, during cleanup.
    pub(crate) unsafe fn add_cleanup(
        &self,
        elem: *mut u8,
        destructor: Destructor,
        policy: &AllocationPolicy<'_>,
    ) {
        if !self.has_space(CLEANUP_NODE_SIZE) {
            self.allocate_new_block(CLEANUP_NODE_SIZE, policy);
        }
        self.add_cleanup_from_existing(elem, destructor);
    }

    fn add_cleanup_from_existing(&self, elem: *mut u8, destructor: Destructor) {
        let owner = self.owner();
        // SAFETY: callers checked that a node fits between ptr and limit.
        unsafe {
            owner.limit = owner.limit.sub(CLEANUP_NODE_SIZE);
            owner
                .limit
                .cast::<CleanupNode>()
                .write(CleanupNode { elem, destructor });
        }
    }

    /// Move `value` into a string-block slot; it is dropped at cleanup.
    pub(crate) fn allocate_string(&self, value: String) -> NonNull<String> {
        let (slot, grown) = self.owner().strings.push(value);
        if grown > 0 {
            self.add_space_allocated(grown);
        }
        // SAFETY: slots are addresses inside a boxed slice.
        unsafe { NonNull::new_unchecked(slot) }
    }

    /// Recycle a no-longer-used array buffer of `size` bytes.
    ///
    /// # Safety
    ///
    /// `p` must be memory of this arena's owning [`ThreadSafeArena`](crate::ThreadSafeArena),
    /// valid for `size` bytes and never used again by the caller.
    pub(crate) unsafe fn return_array_memory(&self, p: NonNull<u8>, size: usize) {
        if size < MIN_CACHED_BLOCK || p.as_ptr() as usize % BLOCK_ALIGN != 0 {
            return;
        }
        let index = (bit_width(size) - 5).min(CACHED_SIZE_CLASSES - 1);
        let owner = self.owner();
        let block = p.cast::<CachedBlock>();
        // SAFETY: the buffer is 8-aligned and large enough for the link.
        unsafe {
            block.as_ptr().write(CachedBlock {
                next: owner.cached_blocks[index],
            });
        }
        owner.cached_blocks[index] = block.as_ptr();
    }

    /// Pop a recycled buffer of at least `size` bytes, if one is cached.
    pub(crate) fn try_allocate_from_cached_block(&self, size: usize) -> Option<NonNull<u8>> {
        if size < MIN_CACHED_BLOCK {
            return None;
        }
        let index = bit_width(size - 1) - 4;
        if index >= CACHED_SIZE_CLASSES {
            return None;
        }
        let owner = self.owner();
        let head = NonNull::new(owner.cached_blocks[index])?;
        // SAFETY: cached blocks hold a link written by `return_array_memory`.
        owner.cached_blocks[index] = unsafe { head.as_ref().next };
        Some(head.cast())
    }

    fn add_space_allocated(&self, n: usize) {
        let total = self.space_allocated.load(Ordering::Relaxed) + n;
        self.space_allocated.store(total, Ordering::Relaxed);
    }

    /// Link a new head block with room for at least `n` bytes.
    fn allocate_new_block(&self, n: usize, policy: &AllocationPolicy<'_>) {
        let old_head = self.head.load(Ordering::Relaxed);
        // SAFETY: head is always the sentry or a live block of this arena.
        let last_size = unsafe { (*old_head).size };
        let next = if last_size == 0 {
            ptr::null_mut()
        } else {
            let limit = self.owner().limit;
            // SAFETY: `old_head` is a real block owned by this arena.
            unsafe { (*old_head).cleanup_nodes = limit };
            let start = old_head as usize + BLOCK_HEADER_SIZE;
            let used = self.ptr.load(Ordering::Relaxed) as usize - start;
            let total = self.space_used.load(Ordering::Relaxed) + used;
            self.space_used.store(total, Ordering::Relaxed);
            old_head
        };

        let mem = allocate_memory(policy, last_size, n);
        self.add_space_allocated(mem.size);
        // SAFETY: `mem` is a fresh block from the policy.
        let block = unsafe { ArenaBlock::init(mem, next) };
        self.ptr.store(
            ArenaBlock::pointer(block, BLOCK_HEADER_SIZE),
            Ordering::Relaxed,
        );
        self.owner().limit = ArenaBlock::limit(block);
        self.head.store(block.as_ptr(), Ordering::Release);
        trace!(size = mem.size, previous = last_size, "arena block allocated");
    }

    /// Run every registered destructor and drop every live string.
    ///
    /// Within a block, nodes run newest first; blocks run newest first.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access, must call this at most once
    /// per allocation cycle, and must follow it with [`free`](Self::free).
    pub(crate) unsafe fn cleanup_list(&self) {
        let owner = self.owner();
        // SAFETY: forwarded caller contract.
        unsafe { owner.strings.drop_strings() };

        let head = self.head.load(Ordering::Relaxed);
        // SAFETY: head is the sentry or a live block.
        if unsafe { (*head).is_sentry() } {
            return;
        }
        // SAFETY: head is a real block owned by this arena.
        unsafe { (*head).cleanup_nodes = owner.limit };

        let mut b = head;
        while let Some(block) = NonNull::new(b) {
            let limit = ArenaBlock::limit(block);
            // SAFETY: every block in the chain is live until `free`.
            let mut it = unsafe { block.as_ref().cleanup_nodes };
            if !it.is_null() {
                while it < limit {
                    // SAFETY: `[cleanup_nodes, limit)` holds nodes written by
                    // `add_cleanup_from_existing`.
                    unsafe {
                        CleanupNode::run(it);
                        it = it.add(CLEANUP_NODE_SIZE);
                    }
                }
            }
            // SAFETY: as above.
            b = unsafe { block.as_ref().next };
        }
    }

    /// Free the string chain and every block except the oldest, which is
    /// returned to the caller. Returns `None` when the arena never allocated.
    ///
    /// # Safety
    ///
    /// The caller must have exclusive access and must already have run
    /// [`cleanup_list`](Self::cleanup_list). No memory from this arena may
    /// be used afterwards.
    pub(crate) unsafe fn free(&self, dealloc: &mut dyn FnMut(SizedPtr)) -> Option<SizedPtr> {
        self.owner().strings.free();
        let mut b = NonNull::new(self.head.load(Ordering::Relaxed))?;
        // SAFETY: blocks are live until handed to `dealloc`; `next` is read
        // before the block is released.
        unsafe {
            if b.as_ref().is_sentry() {
                return None;
            }
            loop {
                let next = b.as_ref().next;
                let mem = ArenaBlock::sized_ptr(b);
                match NonNull::new(next) {
                    Some(older) => {
                        dealloc(mem);
                        b = older;
                    }
                    None => return Some(mem),
                }
            }
        }
    }

    /// Bytes handed out by this arena, including any bytes it occupies itself.
    pub fn space_used(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let previous = self.space_used.load(Ordering::Relaxed);
        // SAFETY: head is the sentry or a block published with release.
        let size = unsafe { (*head).size };
        if size == 0 {
            return previous;
        }
        let start = head as usize + BLOCK_HEADER_SIZE;
        let current = (self.ptr.load(Ordering::Relaxed) as usize)
            .saturating_sub(start)
            .min(size - BLOCK_HEADER_SIZE);
        previous + current
    }

    /// Bytes this arena has obtained from the allocation policy and the heap.
    pub fn space_allocated(&self) -> usize {
        self.space_allocated.load(Ordering::Relaxed)
    }

    /// Sizes of this arena's blocks, newest first.
    pub fn block_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut b = self.head.load(Ordering::Acquire);
        while let Some(block) = NonNull::new(b) {
            // SAFETY: published blocks stay live while `self` is borrowed.
            let header = unsafe { block.as_ref() };
            if header.is_sentry() {
                break;
            }
            sizes.push(header.size);
            b = header.next;
        }
        sizes
    }

    /// Number of blocks in this arena's chain.
    pub fn block_count(&self) -> usize {
        self.block_sizes().len()
    }
}

impl Default for SerialArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn small_policy() -> AllocationPolicy<'static> {
        AllocationPolicy {
            start_block_size: 64,
            max_block_size: 1024,
            block_allocator: None,
        }
    }

    fn release(arena: &SerialArena, policy: &AllocationPolicy<'_>) {
        // SAFETY: test owns the arena exclusively; nothing is used afterwards.
        unsafe {
            arena.cleanup_list();
            let mut dealloc = |mem| policy.deallocate(mem);
            if let Some(last) = arena.free(&mut dealloc) {
                policy.deallocate(last);
            }
        }
    }

    #[test]
    fn empty_arena_has_no_blocks() {
        let arena = SerialArena::new();
        assert_eq!(arena.block_count(), 0);
        assert_eq!(arena.space_used(), 0);
        assert_eq!(arena.space_allocated(), 0);
        release(&arena, &small_policy());
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let policy = small_policy();
        let arena = SerialArena::new();
        let a = arena.allocate_aligned(3, 1, &policy);
        let b = arena.allocate_aligned(8, 8, &policy);
        let c = arena.allocate_aligned(16, 64, &policy);
        assert_eq!(a.as_ptr() as usize % 8, 0);
        assert_eq!(c.as_ptr() as usize % 64, 0);
        assert!(b.as_ptr() as usize >= a.as_ptr() as usize + 3 || arena.block_count() > 1);
        assert_ne!(a, b);
        assert_ne!(b, c);
        release(&arena, &policy);
    }

    #[test]
    fn blocks_grow_geometrically() {
        let policy = small_policy();
        let arena = SerialArena::new();
        for _ in 0..40 {
            arena.allocate_aligned(24, 8, &policy);
        }
        let mut sizes = arena.block_sizes();
        sizes.reverse();
        assert_eq!(sizes[0], 64);
        for pair in sizes.windows(2) {
            assert_eq!(pair[1], (pair[0] * 2).min(1024));
        }
        assert_eq!(arena.space_allocated(), sizes.iter().sum::<usize>());
        assert!(arena.space_used() >= 40 * 24);
        release(&arena, &policy);
    }

    static DESTROYED: AtomicUsize = AtomicUsize::new(0);

    unsafe fn count_destroy(_: *mut u8) {
        DESTROYED.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn cleanup_runs_every_destructor_once() {
        let policy = small_policy();
        let arena = SerialArena::new();
        for _ in 0..50 {
            // SAFETY: the destructor ignores its argument.
            unsafe { arena.allocate_aligned_with_cleanup(8, 8, count_destroy, &policy) };
        }
        assert!(arena.block_count() > 1);
        release(&arena, &policy);
        assert_eq!(DESTROYED.load(Ordering::Relaxed), 50);
    }

    #[test]
    fn cached_blocks_are_reused_by_size_class() {
        let policy = small_policy();
        let arena = SerialArena::new();
        let buf = arena.allocate_aligned(64, 8, &policy);
        assert!(arena.try_allocate_from_cached_block(64).is_none());
        // SAFETY: `buf` is 64 bytes of this arena and not used again.
        unsafe { arena.return_array_memory(buf, 64) };
        assert!(arena.try_allocate_from_cached_block(65).is_none());
        assert_eq!(arena.try_allocate_from_cached_block(40), Some(buf));
        assert!(arena.try_allocate_from_cached_block(40).is_none());
        release(&arena, &policy);
    }

    #[test]
    fn strings_count_toward_space_allocated() {
        let policy = small_policy();
        let arena = SerialArena::new();
        let s = arena.allocate_string("hello".to_owned());
        // SAFETY: the slot is live until cleanup.
        assert_eq!(unsafe { s.as_ref() }, "hello");
        assert!(arena.space_allocated() > 0);
        release(&arena, &policy);
    }

    #[test]
    #[should_panic(expected = "overflows the block size")]
    fn huge_request_panics() {
        let arena = SerialArena::new();
        arena.allocate_aligned(usize::MAX - 2, 8, &small_policy());
    }
}
