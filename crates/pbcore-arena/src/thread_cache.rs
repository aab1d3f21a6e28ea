//! Per-thread identity and the last serial arena the thread used.
//!
//! Lifecycle ids are drawn from a global counter in batches of
//! [`PER_THREAD_IDS`], so constructing or resetting an arena touches the
//! shared counter only once every 256 times per thread.

use std::cell::Cell;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::serial::SerialArena;

/// Lifecycle ids a thread reserves from the global counter at a time.
const PER_THREAD_IDS: u64 = 256;

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);
static LIFECYCLE_ID_GENERATOR: AtomicU64 = AtomicU64::new(1);

struct ThreadCache {
    identity: u64,
    next_lifecycle_id: Cell<u64>,
    last_lifecycle_id_seen: Cell<u64>,
    last_serial_arena: Cell<*const SerialArena>,
}

impl ThreadCache {
    fn new() -> Self {
        Self {
            identity: NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed),
            next_lifecycle_id: Cell::new(0),
            last_lifecycle_id_seen: Cell::new(0),
            last_serial_arena: Cell::new(ptr::null()),
        }
    }
}

thread_local! {
    static THREAD_CACHE: ThreadCache = ThreadCache::new();
}

/// Non-zero identity of the calling thread, unique for the process.
pub(crate) fn current_identity() -> u64 {
    THREAD_CACHE.with(|tc| tc.identity)
}

/// A lifecycle id no other arena lifecycle in the process has used.
pub(crate) fn next_lifecycle_id() -> u64 {
    THREAD_CACHE.with(|tc| {
        let mut id = tc.next_lifecycle_id.get();
        if id % PER_THREAD_IDS == 0 {
            id = LIFECYCLE_ID_GENERATOR.fetch_add(1, Ordering::Relaxed) * PER_THREAD_IDS;
        }
        tc.next_lifecycle_id.set(id + 1);
        id
    })
}

/// The serial arena this thread last used, if it belongs to `lifecycle_id`.
#[inline]
pub(crate) fn cached_serial_arena(lifecycle_id: u64) -> Option<NonNull<SerialArena>> {
    THREAD_CACHE.with(|tc| {
        if tc.last_lifecycle_id_seen.get() == lifecycle_id {
            NonNull::new(tc.last_serial_arena.get().cast_mut())
        } else {
            None
        }
    })
}

/// Remember `serial` as this thread's arena for `lifecycle_id`.
#[inline]
pub(crate) fn cache_serial_arena(lifecycle_id: u64, serial: NonNull<SerialArena>) {
    THREAD_CACHE.with(|tc| {
        tc.last_serial_arena.set(serial.as_ptr());
        tc.last_lifecycle_id_seen.set(lifecycle_id);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn lifecycle_ids_are_unique_and_non_zero() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = next_lifecycle_id();
            assert_ne!(id, 0);
            assert!(seen.insert(id));
        }
        let others: Vec<u64> = thread::spawn(|| (0..300).map(|_| next_lifecycle_id()).collect())
            .join()
            .unwrap();
        for id in others {
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn identities_differ_between_threads() {
        let here = current_identity();
        assert_eq!(here, current_identity());
        let there = thread::spawn(current_identity).join().unwrap();
        assert_ne!(here, there);
        assert_ne!(there, 0);
    }

    #[test]
    fn cache_is_keyed_by_lifecycle() {
        let serial = Box::new(SerialArena::new());
        let ptr = NonNull::from(&*serial);
        let id = next_lifecycle_id();
        assert!(cached_serial_arena(id).is_none());
        cache_serial_arena(id, ptr);
        assert_eq!(cached_serial_arena(id), Some(ptr));
        assert!(cached_serial_arena(next_lifecycle_id()).is_none());
    }
}
