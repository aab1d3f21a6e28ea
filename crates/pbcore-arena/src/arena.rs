//! Typed allocation on top of [`ThreadSafeArena`].

use std::alloc::Layout;
use std::fmt;
use std::mem::{self, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};
use std::slice;

use crate::cleanup;
use crate::config::{ArenaOptions, BLOCK_ALIGN};
use crate::error::ArenaError;
use crate::thread_safe::ThreadSafeArena;

/// Point-in-time arena statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Bytes handed out to callers.
    pub space_used: usize,
    /// Bytes obtained from the block allocator.
    pub space_allocated: usize,
    /// Serial arenas, one per thread that has allocated.
    pub serial_arenas: usize,
}

/// A thread-safe region allocator.
///
/// Values allocated here live until the arena is [`reset`](Arena::reset) or
/// dropped, at which point every registered destructor runs, newest first.
///
/// ```
/// use pbcore_arena::Arena;
///
/// let arena = Arena::new();
/// let n = arena.alloc(41u64);
/// *n += 1;
/// let name = arena.alloc_str("field");
/// assert_eq!((*n, &*name), (42, "field"));
/// ```
pub struct Arena<'a> {
    inner: ThreadSafeArena<'a>,
}

impl Arena<'static> {
    /// An arena with the default options.
    pub fn new() -> Self {
        Self {
            inner: ThreadSafeArena::new(),
        }
    }
}

impl Default for Arena<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Arena<'a> {
    /// An arena configured by `options`.
    pub fn with_options(options: ArenaOptions<'a>) -> Result<Self, ArenaError> {
        Ok(Self {
            inner: ThreadSafeArena::with_options(options)?,
        })
    }

    /// An arena that uses `initial_block` before asking the allocator for
    /// memory. The buffer is never freed by the arena.
    pub fn with_initial_block(initial_block: &'a mut [MaybeUninit<u8>]) -> Self {
        Self {
            inner: ThreadSafeArena::with_initial_block(initial_block),
        }
    }

    /// The underlying untyped arena.
    pub fn thread_safe(&self) -> &ThreadSafeArena<'a> {
        &self.inner
    }

    /// Raw memory for `layout`. Never null; not initialized.
    pub fn allocate_aligned(&self, layout: Layout) -> NonNull<u8> {
        self.inner.allocate_aligned(layout.size(), layout.align())
    }

    /// Move `value` into the arena. It is dropped at reset or drop.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc<T: Send + 'a>(&self, value: T) -> &mut T {
        let layout = Layout::new::<T>();
        let p = if mem::needs_drop::<T>() {
            // SAFETY: the slot is initialized below, before anything can
            // observe it, and `drop_in_place::<T>` matches its type.
            unsafe {
                self.inner.allocate_aligned_with_cleanup(
                    layout.size(),
                    layout.align(),
                    cleanup::drop_in_place::<T>,
                )
            }
        } else {
            self.inner.allocate_aligned(layout.size(), layout.align())
        };
        let p = p.cast::<T>();
        // SAFETY: fresh, aligned, exclusively owned arena memory.
        unsafe {
            p.as_ptr().write(value);
            &mut *p.as_ptr()
        }
    }

    /// Copy `value` into the arena. No destructor is registered.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_copy<T: Copy>(&self, value: T) -> &mut T {
        let p = self.allocate_aligned(Layout::new::<T>()).cast::<T>();
        // SAFETY: fresh, aligned, exclusively owned arena memory.
        unsafe {
            p.as_ptr().write(value);
            &mut *p.as_ptr()
        }
    }

    /// Copy `src` into the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice_copy<T: Copy>(&self, src: &[T]) -> &mut [T] {
        let layout = Layout::for_value(src);
        let p = self.allocate_aligned(layout).cast::<T>();
        // SAFETY: fresh arena memory sized and aligned for `src.len()` values;
        // it cannot overlap `src`.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), p.as_ptr(), src.len());
            slice::from_raw_parts_mut(p.as_ptr(), src.len())
        }
    }

    /// Copy `s` into the arena.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_str(&self, s: &str) -> &mut str {
        let bytes = self.alloc_slice_copy(s.as_bytes());
        // SAFETY: the bytes were copied from a `str`.
        unsafe { std::str::from_utf8_unchecked_mut(bytes) }
    }

    /// Move a `String` into one of the arena's string blocks.
    ///
    /// The string keeps its heap buffer; it is dropped at reset or drop.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_string(&self, value: impl Into<String>) -> &mut String {
        let p = self.inner.allocate_string(value.into());
        // SAFETY: the slot is initialized and handed out exactly once.
        unsafe { &mut *p.as_ptr() }
    }

    /// Take ownership of a heap value; the `Box` is dropped at reset or drop.
    #[allow(clippy::mut_from_ref)]
    pub fn own<T: Send + 'a>(&self, boxed: Box<T>) -> &mut T {
        let p = Box::into_raw(boxed);
        // SAFETY: `p` came from `Box::into_raw` and is released only by the
        // registered `drop_boxed::<T>`.
        unsafe {
            self.inner.add_cleanup(p.cast::<u8>(), cleanup::drop_boxed::<T>);
            &mut *p
        }
    }

    /// An empty growable vector backed by this arena.
    pub fn new_vec<T: Copy>(&self) -> ArenaVec<'_, T> {
        ArenaVec {
            arena: &self.inner,
            ptr: NonNull::dangling(),
            len: 0,
            cap: if size_of::<T>() == 0 { usize::MAX } else { 0 },
        }
    }

    /// An arena-backed vector holding a copy of `src`.
    pub fn vec_from_slice<T: Copy>(&self, src: &[T]) -> ArenaVec<'_, T> {
        let mut vec = self.new_vec();
        vec.extend_from_slice(src);
        vec
    }

    /// Bytes handed out to callers. Racy while other threads allocate.
    pub fn space_used(&self) -> usize {
        self.inner.space_used()
    }

    /// Bytes obtained from the block allocator.
    pub fn space_allocated(&self) -> usize {
        self.inner.space_allocated()
    }

    /// Snapshot of the arena's counters.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            space_used: self.space_used(),
            space_allocated: self.space_allocated(),
            serial_arenas: self.inner.serial_arena_count(),
        }
    }

    /// Drop every value and release all memory except the first block.
    ///
    /// Returns the bytes the arena had allocated before the reset.
    pub fn reset(&mut self) -> u64 {
        self.inner.reset()
    }
}

impl fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Growable array of `Copy` values in arena memory.
///
/// Buffers outgrown by a push are recycled through the arena's cached
/// blocks, so a later vector of a similar size reuses them.
pub struct ArenaVec<'s, T: Copy> {
    arena: &'s ThreadSafeArena<'s>,
    ptr: NonNull<T>,
    len: usize,
    cap: usize,
}

impl<'s, T: Copy> ArenaVec<'s, T> {
    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the vector holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Elements the current buffer can hold.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Append `value`.
    pub fn push(&mut self, value: T) {
        if self.len == self.cap {
            self.grow(self.len + 1);
        }
        // SAFETY: `len < cap` after growing.
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
    }

    /// Append every element of `src`.
    pub fn extend_from_slice(&mut self, src: &[T]) {
        let needed = self.len.checked_add(src.len()).expect("capacity overflow");
        if needed > self.cap {
            self.grow(needed);
        }
        // SAFETY: capacity covers `needed`; `src` cannot alias arena memory
        // owned by this vector.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(self.len), src.len());
        }
        self.len = needed;
    }

    /// Remove all elements, keeping the buffer.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Give up growth and keep the elements for the arena's lifetime.
    pub fn into_slice(self) -> &'s mut [T] {
        let (ptr, len) = (self.ptr, self.len);
        mem::forget(self);
        // SAFETY: the buffer lives as long as the arena borrow.
        unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), len) }
    }

    fn grow(&mut self, min_cap: usize) {
        let new_cap = min_cap.max(self.cap.saturating_mul(2)).max(4);
        let layout = Layout::array::<T>(new_cap).expect("capacity overflow");
        let cacheable = layout.align() <= BLOCK_ALIGN;
        let fresh = cacheable
            .then(|| self.arena.try_allocate_from_cached_block(layout.size()))
            .flatten()
            .unwrap_or_else(|| self.arena.allocate_aligned(layout.size(), layout.align()))
            .cast::<T>();
        if self.cap > 0 {
            // SAFETY: both buffers hold at least `len` elements and are
            // distinct allocations.
            unsafe { ptr::copy_nonoverlapping(self.ptr.as_ptr(), fresh.as_ptr(), self.len) };
            self.release_buffer();
        }
        self.ptr = fresh;
        self.cap = new_cap;
    }

    fn release_buffer(&mut self) {
        let bytes = self.cap * size_of::<T>();
        if self.cap == 0 || bytes == 0 || align_of::<T>() > BLOCK_ALIGN {
            return;
        }
        // SAFETY: the buffer was allocated from this arena for `cap`
        // elements and is no longer referenced.
        unsafe { self.arena.return_array_memory(self.ptr.cast(), bytes) };
    }
}

impl<T: Copy> Deref for ArenaVec<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: the first `len` elements are initialized.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Copy> DerefMut for ArenaVec<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: the first `len` elements are initialized.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Copy> Drop for ArenaVec<'_, T> {
    fn drop(&mut self) {
        self.release_buffer();
    }
}

impl<T: Copy + fmt::Debug> fmt::Debug for ArenaVec<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn alloc_returns_usable_values() {
        let arena = Arena::new();
        let a = arena.alloc(1u32);
        let b = arena.alloc([7u8; 3]);
        *a += 1;
        b[2] = 9;
        assert_eq!(*a, 2);
        assert_eq!(b, &[7, 7, 9]);
    }

    #[test]
    fn drops_run_on_arena_drop() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        let count = Arc::new(AtomicUsize::new(0));
        {
            let arena = Arena::new();
            for _ in 0..100 {
                arena.alloc(Counted(Arc::clone(&count)));
            }
            arena.own(Box::new(Counted(Arc::clone(&count))));
            assert_eq!(count.load(Ordering::SeqCst), 0);
        }
        assert_eq!(count.load(Ordering::SeqCst), 101);
    }

    #[test]
    fn strings_are_dropped_on_reset() {
        let mut arena = Arena::new();
        let s = arena.alloc_string("hello");
        s.push_str(", world");
        assert_eq!(s, "hello, world");
        let before = arena.space_allocated() as u64;
        assert_eq!(arena.reset(), before);
        assert_eq!(arena.stats().serial_arenas, 1);
    }

    #[test]
    fn over_aligned_layout() {
        let arena = Arena::new();
        for align in [16, 32, 64, 4096] {
            let layout = Layout::from_size_align(24, align).unwrap();
            let p = arena.allocate_aligned(layout);
            assert_eq!(p.as_ptr() as usize % align, 0);
        }
    }

    #[test]
    fn vec_grows_and_recycles() {
        let arena = Arena::new();
        let mut v = arena.new_vec::<u64>();
        for i in 0..100 {
            v.push(i);
        }
        assert_eq!(v.len(), 100);
        assert_eq!(v[99], 99);
        let first = v.as_ptr();
        drop(v);

        let w = arena.vec_from_slice(&[1u64; 100]);
        assert_eq!(w.as_ptr(), first);
        assert_eq!(w.into_slice().iter().sum::<u64>(), 100);
    }

    #[test]
    fn zero_sized_elements() {
        let arena = Arena::new();
        let mut v = arena.new_vec::<()>();
        for _ in 0..10 {
            v.push(());
        }
        assert_eq!(v.len(), 10);
        assert_eq!(arena.space_allocated(), 0);
    }

    #[test]
    fn invalid_options_are_rejected() {
        let err = Arena::with_options(ArenaOptions {
            start_block_size: 0,
            ..ArenaOptions::new()
        })
        .unwrap_err();
        assert!(matches!(err, ArenaError::InvalidConfig { .. }));
    }

    proptest! {
        #[test]
        fn allocations_are_aligned_and_disjoint(
            requests in prop::collection::vec((0usize..300, 0u32..7), 1..64)
        ) {
            let arena = Arena::new();
            let mut ranges = Vec::new();
            for (size, align_pow) in requests {
                let align = 1usize << align_pow;
                let layout = Layout::from_size_align(size, align).unwrap();
                let start = arena.allocate_aligned(layout).as_ptr() as usize;
                prop_assert_eq!(start % align, 0);
                if size > 0 {
                    ranges.push((start, start + size));
                }
            }
            ranges.sort_unstable();
            for pair in ranges.windows(2) {
                prop_assert!(pair[0].1 <= pair[1].0);
            }
        }
    }
}
