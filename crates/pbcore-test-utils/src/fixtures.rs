//! Reusable arena test fixtures.
//!
//! - [`DropLog`] / [`DropProbe`]: values that record the order they are
//!   dropped in.
//! - [`CountingBlockAllocator`]: a block source that tracks how many blocks
//!   and bytes are live.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pbcore_arena::{BlockAllocator, SystemBlockAllocator};

/// Shared record of [`DropProbe`] ids in drop order.
#[derive(Clone, Debug, Default)]
pub struct DropLog(Arc<Mutex<Vec<u32>>>);

impl DropLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A probe that logs `id` when dropped.
    pub fn probe(&self, id: u32) -> DropProbe {
        DropProbe {
            id,
            log: self.clone(),
        }
    }

    /// Ids dropped so far, oldest first.
    pub fn order(&self) -> Vec<u32> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Logs its id into a [`DropLog`] when dropped.
#[derive(Debug)]
pub struct DropProbe {
    id: u32,
    log: DropLog,
}

impl DropProbe {
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Drop for DropProbe {
    fn drop(&mut self) {
        self.log.0.lock().push(self.id);
    }
}

/// [`SystemBlockAllocator`] wrapper that counts blocks and bytes.
#[derive(Debug, Default)]
pub struct CountingBlockAllocator {
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl CountingBlockAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::SeqCst)
    }

    pub fn deallocations(&self) -> usize {
        self.deallocations.load(Ordering::SeqCst)
    }

    /// Blocks handed out and not yet returned.
    pub fn live_blocks(&self) -> usize {
        self.allocations() - self.deallocations()
    }

    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::SeqCst)
    }
}

// SAFETY: forwards to SystemBlockAllocator, which upholds the contract.
#[allow(unsafe_code)]
unsafe impl BlockAllocator for CountingBlockAllocator {
    fn allocate(&self, size: usize) -> NonNull<u8> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_add(size, Ordering::SeqCst);
        SystemBlockAllocator.allocate(size)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        self.deallocations.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_sub(size, Ordering::SeqCst);
        // SAFETY: the caller guarantees `ptr` came from `allocate(size)`,
        // which got it from SystemBlockAllocator.
        unsafe { SystemBlockAllocator.deallocate(ptr, size) }
    }
}
