//! Lock-free registry of the serial arenas of a [`ThreadSafeArena`](crate::ThreadSafeArena).
//!
//! The registry is a linked list of fixed-capacity chunks, newest first.
//! Claiming a slot is a single `fetch_add` on the head chunk's size counter;
//! the mutex is only taken when the head chunk is full and a bigger one has
//! to be installed.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use tracing::debug;

use crate::serial::SerialArena;

/// Capacity of the first chunk.
const INITIAL_CHUNK_CAPACITY: usize = 4;

/// Chunks grow 4x per generation up to this many slots.
const MAX_CHUNK_CAPACITY: usize = 256;

fn next_capacity(previous: usize) -> usize {
    if previous == 0 {
        INITIAL_CHUNK_CAPACITY
    } else {
        (previous * 4).min(MAX_CHUNK_CAPACITY)
    }
}

struct SerialArenaChunk {
    /// Older chunk, or null.
    next: *mut SerialArenaChunk,
    /// Slots claimed so far; may briefly exceed capacity during a failed claim.
    size: CachePadded<AtomicU32>,
    ids: Box<[AtomicU64]>,
    arenas: Box<[AtomicPtr<SerialArena>]>,
}

impl SerialArenaChunk {
    fn new(
        capacity: usize,
        next: *mut SerialArenaChunk,
        id: u64,
        serial: NonNull<SerialArena>,
    ) -> Box<Self> {
        let chunk = Box::new(Self {
            next,
            size: CachePadded::new(AtomicU32::new(1)),
            ids: (0..capacity).map(|_| AtomicU64::new(0)).collect(),
            arenas: (0..capacity)
                .map(|_| AtomicPtr::new(ptr::null_mut()))
                .collect(),
        });
        chunk.ids[0].store(id, Ordering::Relaxed);
        chunk.arenas[0].store(serial.as_ptr(), Ordering::Relaxed);
        chunk
    }

    fn capacity(&self) -> usize {
        self.ids.len()
    }

    fn len(&self) -> usize {
        (self.size.load(Ordering::Relaxed) as usize).min(self.capacity())
    }

    /// Claim a slot for `(id, serial)`. Fails when the chunk is full.
    fn insert(&self, id: u64, serial: NonNull<SerialArena>) -> bool {
        let index = self.size.fetch_add(1, Ordering::Relaxed) as usize;
        if index >= self.capacity() {
            self.size.store(self.capacity() as u32, Ordering::Relaxed);
            return false;
        }
        self.ids[index].store(id, Ordering::Relaxed);
        self.arenas[index].store(serial.as_ptr(), Ordering::Release);
        true
    }

    fn find(&self, id: u64) -> Option<NonNull<SerialArena>> {
        (0..self.len())
            .find(|&i| self.ids[i].load(Ordering::Relaxed) == id)
            .and_then(|i| NonNull::new(self.arenas[i].load(Ordering::Acquire)))
    }
}

/// Chunked `(identity, serial arena)` table.
pub(crate) struct Registry {
    head: AtomicPtr<SerialArenaChunk>,
    mutex: Mutex<()>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            mutex: Mutex::new(()),
        }
    }

    fn chunks(&self) -> impl Iterator<Item = &SerialArenaChunk> {
        let mut next = self.head.load(Ordering::Acquire);
        std::iter::from_fn(move || {
            // SAFETY: chunks live until `clear`, which needs `&mut self`.
            let chunk = unsafe { next.as_ref()? };
            next = chunk.next;
            Some(chunk)
        })
    }

    /// The serial arena registered for `id`, if any.
    pub(crate) fn find(&self, id: u64) -> Option<NonNull<SerialArena>> {
        self.chunks().find_map(|chunk| chunk.find(id))
    }

    /// Register `serial` under `id`.
    pub(crate) fn add(&self, id: u64, serial: NonNull<SerialArena>) {
        let head = self.head.load(Ordering::Acquire);
        // SAFETY: a non-null head is a live chunk.
        if let Some(chunk) = unsafe { head.as_ref() } {
            if chunk.insert(id, serial) {
                return;
            }
        }

        let _guard = self.mutex.lock();
        let mut head = head;
        let current = self.head.load(Ordering::Acquire);
        if current != head {
            // SAFETY: installed under the mutex, so non-null and live.
            if unsafe { (*current).insert(id, serial) } {
                return;
            }
            head = current;
        }
        // SAFETY: as above; null means no chunk yet.
        let previous_capacity = unsafe { head.as_ref() }.map_or(0, SerialArenaChunk::capacity);
        let capacity = next_capacity(previous_capacity);
        let chunk = SerialArenaChunk::new(capacity, head, id, serial);
        self.head.store(Box::into_raw(chunk), Ordering::Release);
        debug!(capacity, "installed serial arena registry chunk");
    }

    /// Number of registered serial arenas.
    pub(crate) fn count(&self) -> usize {
        self.chunks().map(SerialArenaChunk::len).sum()
    }

    /// Visit every registered arena: newest chunk first, highest slot first.
    pub(crate) fn for_each_newest_first(&self, mut f: impl FnMut(NonNull<SerialArena>)) {
        for chunk in self.chunks() {
            for i in (0..chunk.len()).rev() {
                if let Some(serial) = NonNull::new(chunk.arenas[i].load(Ordering::Acquire)) {
                    f(serial);
                }
            }
        }
    }

    /// Free every chunk. The registered arenas are not touched.
    pub(crate) fn clear(&mut self) {
        let mut next = std::mem::replace(self.head.get_mut(), ptr::null_mut());
        while !next.is_null() {
            // SAFETY: every chunk was leaked from a `Box` in `add`.
            let chunk = unsafe { Box::from_raw(next) };
            next = chunk.next;
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn arenas(n: usize) -> Vec<Box<SerialArena>> {
        (0..n).map(|_| Box::new(SerialArena::new())).collect()
    }

    #[test]
    fn capacity_grows_four_times_to_cap() {
        let mut cap = 0;
        let mut seen = Vec::new();
        for _ in 0..6 {
            cap = next_capacity(cap);
            seen.push(cap);
        }
        assert_eq!(seen, vec![4, 16, 64, 256, 256, 256]);
    }

    #[test]
    fn add_and_find() {
        let owned = arenas(30);
        let registry = Registry::new();
        for (i, serial) in owned.iter().enumerate() {
            registry.add(i as u64 + 1, NonNull::from(&**serial));
        }
        assert_eq!(registry.count(), 30);
        for (i, serial) in owned.iter().enumerate() {
            assert_eq!(registry.find(i as u64 + 1), Some(NonNull::from(&**serial)));
        }
        assert!(registry.find(999).is_none());
    }

    #[test]
    fn visits_newest_first() {
        let owned = arenas(6);
        let registry = Registry::new();
        for (i, serial) in owned.iter().enumerate() {
            registry.add(i as u64 + 1, NonNull::from(&**serial));
        }
        let mut order = Vec::new();
        registry.for_each_newest_first(|serial| {
            let index = owned
                .iter()
                .position(|s| NonNull::from(&**s) == serial)
                .unwrap();
            order.push(index);
        });
        assert_eq!(order, vec![5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn concurrent_adds_are_all_recorded() {
        let owned: Arc<Vec<Box<SerialArena>>> = Arc::new(arenas(64));
        let registry = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let owned = Arc::clone(&owned);
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in (t..64).step_by(8) {
                        registry.add(i as u64 + 1, NonNull::from(&*owned[i]));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.count(), 64);
        for (i, serial) in owned.iter().enumerate() {
            assert_eq!(registry.find(i as u64 + 1), Some(NonNull::from(&**serial)));
        }
    }
}
