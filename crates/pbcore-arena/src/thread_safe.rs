//! Multi-threaded arena: one [`SerialArena`] per allocating thread.
//!
//! Each thread allocates from its own serial arena without synchronization.
//! The constructing (or last resetting) thread uses the embedded first arena;
//! every other thread gets a serial arena hosted in its own first block and
//! recorded in the [`Registry`]. A thread-local cache keyed by the arena's
//! lifecycle id makes the common lookup a single comparison.

use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

use tracing::debug;

use crate::block::{align_up, allocate_memory, ArenaBlock, SizedPtr, BLOCK_HEADER_SIZE};
use crate::cleanup::{Destructor, CLEANUP_NODE_SIZE};
use crate::config::{AllocationPolicy, ArenaOptions, BLOCK_ALIGN};
use crate::error::ArenaError;
use crate::registry::Registry;
use crate::serial::{SerialArena, SERIAL_ARENA_SIZE};
use crate::thread_cache::{
    cache_serial_arena, cached_serial_arena, current_identity, next_lifecycle_id,
};

/// Bytes a stored policy takes in the first block.
const POLICY_SIZE: usize = align_up(size_of::<AllocationPolicy<'static>>(), BLOCK_ALIGN);

/// Arena shared by many threads, reclaimed all at once.
///
/// Allocation takes `&self` and is safe from any number of threads.
/// [`reset`](Self::reset) and drop take exclusive access, run every
/// registered destructor (newest serial arena first, the first arena last)
/// and release the memory.
pub struct ThreadSafeArena<'a> {
    /// Leaked `Box`; other threads cache pointers to it.
    first_arena: NonNull<SerialArena>,
    first_owner: u64,
    lifecycle_id: u64,
    registry: Registry,
    /// Non-default policy, stored inside the first block.
    policy: Option<NonNull<AllocationPolicy<'a>>>,
    user_owned_initial_block: bool,
    _initial_block: PhantomData<&'a mut [MaybeUninit<u8>]>,
}

// SAFETY: serial arenas are only mutated by their owning thread or under
// `&mut self`; everything shared is atomic or immutable after construction.
// Objects with destructors must be `Send` to be allocated, so running their
// destructors on whichever thread drops the arena is sound.
unsafe impl Send for ThreadSafeArena<'_> {}
// SAFETY: see above; the block allocator is `Sync` by trait bound.
unsafe impl Sync for ThreadSafeArena<'_> {}

impl ThreadSafeArena<'static> {
    /// An empty arena with the default policy. No memory is allocated until
    /// the first request.
    pub fn new() -> Self {
        Self::build(AllocationPolicy::DEFAULT, None)
    }
}

impl Default for ThreadSafeArena<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> ThreadSafeArena<'a> {
    /// An arena whose first block is `initial_block`.
    ///
    /// The buffer is never freed by the arena. If it is too small to hold a
    /// block header it is ignored.
    pub fn with_initial_block(initial_block: &'a mut [MaybeUninit<u8>]) -> Self {
        Self::build(AllocationPolicy::DEFAULT, Some(initial_block))
    }

    /// An arena configured by `options`.
    pub fn with_options(options: ArenaOptions<'a>) -> Result<Self, ArenaError> {
        options.validate()?;
        let policy = options.policy();
        Ok(Self::build(policy, options.initial_block))
    }

    fn build(
        policy: AllocationPolicy<'a>,
        initial_block: Option<&'a mut [MaybeUninit<u8>]>,
    ) -> Self {
        let mut arena = Self {
            first_arena: NonNull::from(Box::leak(Box::new(SerialArena::new()))),
            first_owner: 0,
            lifecycle_id: 0,
            registry: Registry::new(),
            policy: None,
            user_owned_initial_block: false,
            _initial_block: PhantomData,
        };
        if let Some(buf) = initial_block {
            arena.adopt_initial_block(buf, &policy);
        }
        if !policy.is_default() {
            arena.install_policy(policy);
        }
        arena.init();
        arena
    }

    fn adopt_initial_block(
        &mut self,
        buf: &'a mut [MaybeUninit<u8>],
        policy: &AllocationPolicy<'a>,
    ) {
        let required = BLOCK_HEADER_SIZE + if policy.is_default() { 0 } else { POLICY_SIZE };
        let start = buf.as_mut_ptr().cast::<u8>();
        let pad = start.align_offset(BLOCK_ALIGN);
        let usable = buf.len().saturating_sub(pad) & !(BLOCK_ALIGN - 1);
        if usable < required {
            debug!(len = buf.len(), required, "initial block too small, ignoring it");
            return;
        }
        // SAFETY: `pad < buf.len()` because `usable > 0`.
        let ptr = unsafe { NonNull::new_unchecked(start.add(pad)) };
        let mem = SizedPtr { ptr, size: usable };
        // SAFETY: the buffer is borrowed for 'a, aligned and large enough;
        // the first arena has no blocks yet.
        unsafe {
            let block = ArenaBlock::init(mem, ptr::null_mut());
            self.first_arena.as_mut().reinit(Some(block));
        }
        self.user_owned_initial_block = true;
    }

    /// Copy `policy` into the first block, allocating one if needed.
    fn install_policy(&mut self, policy: AllocationPolicy<'a>) {
        // SAFETY: exclusive access; the first arena is live.
        let first = unsafe { self.first_arena.as_mut() };
        if first.block_count() == 0 {
            let mem = allocate_memory(&policy, 0, POLICY_SIZE);
            // SAFETY: fresh block from the policy; the first arena was empty.
            unsafe {
                let block = ArenaBlock::init(mem, ptr::null_mut());
                first.reinit(Some(block));
            }
        }
        let slot = first
            .allocate_aligned(POLICY_SIZE, align_of::<AllocationPolicy<'a>>(), &policy)
            .cast::<AllocationPolicy<'a>>();
        // SAFETY: `slot` is fresh arena memory sized and aligned for a policy.
        unsafe { slot.as_ptr().write(policy) };
        self.policy = Some(slot);
    }

    /// Start a new lifecycle owned by the calling thread.
    fn init(&mut self) {
        self.lifecycle_id = next_lifecycle_id();
        self.first_owner = current_identity();
        cache_serial_arena(self.lifecycle_id, self.first_arena);
    }

    /// The policy blocks are allocated with.
    pub fn policy(&self) -> AllocationPolicy<'a> {
        match self.policy {
            // SAFETY: the stored policy lives in the first block, which is
            // never freed before the arena itself.
            Some(policy) => unsafe { *policy.as_ptr() },
            None => AllocationPolicy::DEFAULT,
        }
    }

    /// Identifier of the current lifecycle; changes on every reset.
    pub fn lifecycle_id(&self) -> u64 {
        self.lifecycle_id
    }

    /// The calling thread's serial arena, created on first use.
    #[inline]
    pub fn serial_arena(&self) -> &SerialArena {
        // SAFETY: serial arenas live until reset or drop, both of which need
        // `&mut self`.
        unsafe { self.serial_arena_for(0).as_ref() }
    }

    #[inline]
    fn serial_arena_for(&self, pending: usize) -> NonNull<SerialArena> {
        match cached_serial_arena(self.lifecycle_id) {
            Some(serial) => serial,
            None => self.serial_arena_fallback(pending),
        }
    }

    /// Find or create the caller's serial arena; `pending` sizes its first
    /// block so the request that triggered the lookup fits.
    #[cold]
    fn serial_arena_fallback(&self, pending: usize) -> NonNull<SerialArena> {
        let id = current_identity();
        let serial = if id == self.first_owner {
            self.first_arena
        } else if let Some(serial) = self.registry.find(id) {
            serial
        } else {
            let policy = self.policy();
            let min_bytes = pending.saturating_add(SERIAL_ARENA_SIZE + CLEANUP_NODE_SIZE);
            let mem = allocate_memory(&policy, 0, min_bytes);
            // SAFETY: `mem` is a fresh block large enough to host the arena.
            let serial = unsafe { SerialArena::new_in(mem) };
            self.registry.add(id, serial);
            serial
        };
        cache_serial_arena(self.lifecycle_id, serial);
        serial
    }

    /// The calling thread's serial arena, if it has one. Never creates one.
    fn existing_serial_arena(&self) -> Option<&SerialArena> {
        let serial = cached_serial_arena(self.lifecycle_id).or_else(|| {
            let id = current_identity();
            if id == self.first_owner {
                Some(self.first_arena)
            } else {
                self.registry.find(id)
            }
        })?;
        // SAFETY: as in `serial_arena`.
        Some(unsafe { serial.as_ref() })
    }

    /// Allocate `n` bytes aligned to `align` (a power of two).
    ///
    /// Never returns null. Allocator failure aborts via
    /// [`std::alloc::handle_alloc_error`].
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two or the padded size overflows.
    #[inline]
    pub fn allocate_aligned(&self, n: usize, align: usize) -> NonNull<u8> {
        assert!(align.is_power_of_two(), "alignment {align} is not a power of two");
        let policy = self.policy();
        let serial = self.serial_arena_for(n.saturating_add(align));
        // SAFETY: the calling thread owns `serial` for this lifecycle.
        unsafe { serial.as_ref() }.allocate_aligned(n, align, &policy)
    }

    /// Allocate `n` bytes and register `destructor` to run on them at
    /// reset or drop.
    ///
    /// # Safety
    ///
    /// The caller must initialize the memory before the arena is reset or
    /// dropped, and `destructor` must be sound to call on it then, from any
    /// thread.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two or the padded size overflows.
    pub unsafe fn allocate_aligned_with_cleanup(
        &self,
        n: usize,
        align: usize,
        destructor: Destructor,
    ) -> NonNull<u8> {
        assert!(align.is_power_of_two(), "alignment {align} is not a power of two");
        let policy = self.policy();
        let pending = n.saturating_add(align).saturating_add(CLEANUP_NODE_SIZE);
        let serial = self.serial_arena_for(pending);
        // SAFETY: forwarded caller contract; the calling thread owns `serial`.
        unsafe { serial.as_ref().allocate_aligned_with_cleanup(n, align, destructor, &policy) }
    }

    /// Register `destructor` to run on `elem` at reset or drop.
    ///
    /// # Safety
    ///
    /// `destructor(elem)` must be sound to call exactly once, from any
    /// thread, at the arena's next reset or drop.
    pub unsafe fn add_cleanup(&self, elem: *mut u8, destructor: Destructor) {
        let policy = self.policy();
        let serial = self.serial_arena_for(CLEANUP_NODE_SIZE);
        // SAFETY: forwarded caller contract; the calling thread owns `serial`.
        unsafe { serial.as_ref().add_cleanup(elem, destructor, &policy) }
    }

    /// Move `value` into an arena string slot. It is dropped at reset or drop.
    pub fn allocate_string(&self, value: String) -> NonNull<String> {
        self.serial_arena().allocate_string(value)
    }

    /// Hand a no-longer-used array buffer back for reuse by this thread.
    ///
    /// # Safety
    ///
    /// `p` must have been allocated from this arena in the current lifecycle,
    /// be valid for `size` bytes and not be used by the caller again.
    pub unsafe fn return_array_memory(&self, p: NonNull<u8>, size: usize) {
        // A thread without a serial arena has nowhere to cache the buffer;
        // it stays unused until reset.
        if let Some(serial) = self.existing_serial_arena() {
            // SAFETY: forwarded caller contract.
            unsafe { serial.return_array_memory(p, size) }
        }
    }

    /// Take a recycled buffer of at least `size` bytes, 8-aligned.
    pub fn try_allocate_from_cached_block(&self, size: usize) -> Option<NonNull<u8>> {
        self.existing_serial_arena()?.try_allocate_from_cached_block(size)
    }

    fn for_each_serial_arena(&self, mut f: impl FnMut(&SerialArena)) {
        // SAFETY: registered arenas and the first arena are live while
        // `self` is borrowed.
        self.registry
            .for_each_newest_first(|serial| f(unsafe { serial.as_ref() }));
        f(unsafe { self.first_arena.as_ref() });
    }

    /// Bytes handed out to callers across all threads. Racy while other
    /// threads allocate.
    pub fn space_used(&self) -> usize {
        let mut total = 0;
        self.for_each_serial_arena(|serial| total += serial.space_used());
        let overhead = (self.serial_arena_count() - 1) * SERIAL_ARENA_SIZE
            + if self.policy.is_some() { POLICY_SIZE } else { 0 };
        total.saturating_sub(overhead)
    }

    /// Bytes obtained from the block allocator and the heap. Includes a
    /// caller-provided initial block.
    pub fn space_allocated(&self) -> usize {
        let mut total = 0;
        self.for_each_serial_arena(|serial| total += serial.space_allocated());
        total
    }

    /// Number of serial arenas, the first one included.
    pub fn serial_arena_count(&self) -> usize {
        1 + self.registry.count()
    }

    /// Blocks in the calling thread's serial arena; 0 if the thread has
    /// not allocated.
    pub fn block_count(&self) -> usize {
        self.existing_serial_arena().map_or(0, SerialArena::block_count)
    }

    /// Block sizes of the calling thread's serial arena, newest first.
    /// Empty if the thread has not allocated.
    pub fn block_sizes(&self) -> Vec<usize> {
        self.existing_serial_arena().map_or_else(Vec::new, SerialArena::block_sizes)
    }

    /// Run every destructor: registered arenas newest first, first arena last.
    ///
    /// # Safety
    ///
    /// Must be followed by [`free`](Self::free) before any further use.
    unsafe fn cleanup_list(&mut self) {
        // SAFETY: `&mut self` gives exclusive access to every serial arena.
        self.for_each_serial_arena(|serial| unsafe { serial.cleanup_list() });
    }

    /// Free every block except the first arena's oldest, which is returned.
    ///
    /// # Safety
    ///
    /// [`cleanup_list`](Self::cleanup_list) must have run; the first arena
    /// must be reinitialized before it is used again.
    unsafe fn free(&mut self, policy: &AllocationPolicy<'a>) -> Option<SizedPtr> {
        // SAFETY: every block came from `policy`.
        let mut dealloc = |mem: SizedPtr| unsafe { policy.deallocate(mem) };
        self.registry.for_each_newest_first(|serial| {
            // SAFETY: exclusive access; each registered arena lives inside
            // its own oldest block, which is released last.
            unsafe {
                let hosting = serial.as_ref().free(&mut dealloc);
                ptr::drop_in_place(serial.as_ptr());
                if let Some(mem) = hosting {
                    dealloc(mem);
                }
            }
        });
        self.registry.clear();
        // SAFETY: exclusive access.
        unsafe { self.first_arena.as_ref().free(&mut dealloc) }
    }

    /// Destroy every object and release every block except the first one,
    /// which is kept for reuse. The calling thread becomes the first owner.
    ///
    /// Returns the bytes the arena had allocated before the reset.
    pub fn reset(&mut self) -> u64 {
        let space_allocated = self.space_allocated();
        let policy = self.policy();
        // SAFETY: `&mut self`; the first arena is reinitialized below.
        let first_block = unsafe {
            self.cleanup_list();
            self.free(&policy)
        };
        let had_policy = self.policy.take().is_some();
        // SAFETY: the first arena's other blocks and strings were released.
        unsafe {
            let first = self.first_arena.as_mut();
            match first_block {
                Some(mem) => first.reinit(Some(ArenaBlock::init(mem, ptr::null_mut()))),
                None => first.reinit(None),
            }
        }
        if had_policy {
            self.install_policy(policy);
        }
        self.init();
        debug!(space_allocated, lifecycle_id = self.lifecycle_id, "arena reset");
        space_allocated as u64
    }
}

impl Drop for ThreadSafeArena<'_> {
    fn drop(&mut self) {
        let policy = self.policy();
        // SAFETY: `&mut self`; nothing is used after this.
        unsafe {
            self.cleanup_list();
            if let Some(mem) = self.free(&policy) {
                if !self.user_owned_initial_block {
                    policy.deallocate(mem);
                }
            }
            drop(Box::from_raw(self.first_arena.as_ptr()));
        }
    }
}

impl std::fmt::Debug for ThreadSafeArena<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadSafeArena")
            .field("lifecycle_id", &self.lifecycle_id)
            .field("serial_arenas", &self.serial_arena_count())
            .field("space_allocated", &self.space_allocated())
            .finish_non_exhaustive()
    }
}
