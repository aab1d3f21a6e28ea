//! Heap blocks of `String` slots.
//!
//! Strings are the most common arena object with a destructor. Rather than
//! spending a cleanup node on each one, a serial arena hands out slots from
//! a chain of [`StringBlock`]s and drops every live slot in one pass.

use std::mem::MaybeUninit;

const MIN_BLOCK_BYTES: usize = 256;
const MAX_BLOCK_BYTES: usize = 8192;

/// A block of `String` slots, filled from the back.
pub(crate) struct StringBlock {
    next: Option<Box<StringBlock>>,
    slots: Box<[MaybeUninit<String>]>,
}

impl StringBlock {
    /// A new block linked in front of `next`, twice its size up to 8 KiB.
    pub(crate) fn new(next: Option<Box<StringBlock>>) -> Box<StringBlock> {
        let bytes = match &next {
            Some(prev) => (prev.allocated_size() * 2).min(MAX_BLOCK_BYTES),
            None => MIN_BLOCK_BYTES,
        };
        Box::new(StringBlock {
            next,
            slots: Box::new_uninit_slice(bytes / size_of::<String>()),
        })
    }

    /// Number of string slots in the block.
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Heap bytes the block accounts for.
    pub(crate) fn allocated_size(&self) -> usize {
        self.slots.len() * size_of::<String>()
    }

    /// Pointer to slot `index`.
    pub(crate) fn slot(&mut self, index: usize) -> *mut MaybeUninit<String> {
        &mut self.slots[index]
    }
}

/// The string-block chain of one serial arena.
///
/// The head block is filled from its last slot down to index 0; `unused` is
/// the number of head slots not yet handed out. Every older block is full.
#[derive(Default)]
pub(crate) struct StringChain {
    head: Option<Box<StringBlock>>,
    unused: usize,
}

impl StringChain {
    /// Move `value` into the next free slot, growing the chain if needed.
    ///
    /// Returns the slot and the number of heap bytes newly allocated.
    pub(crate) fn push(&mut self, value: String) -> (*mut String, usize) {
        let mut grown = 0;
        if self.unused == 0 {
            let block = StringBlock::new(self.head.take());
            self.unused = block.capacity();
            grown = block.allocated_size();
            self.head = Some(block);
        }
        self.unused -= 1;
        let index = self.unused;
        let Some(block) = self.head.as_mut() else {
            unreachable!("string chain head was just installed");
        };
        let slot = block.slot(index);
        // SAFETY: `slot` is an in-bounds, unused slot of `block`.
        let value = unsafe { (*slot).write(value) };
        (value as *mut String, grown)
    }

    /// Drop every live string. Blocks stay allocated until [`free`](Self::free).
    ///
    /// # Safety
    ///
    /// Must be called at most once before `free`; no handed-out string may
    /// be used afterwards.
    pub(crate) unsafe fn drop_strings(&mut self) {
        let mut first_live = self.unused;
        let mut block = self.head.as_deref_mut();
        while let Some(b) = block {
            for slot in &mut b.slots[first_live..] {
                // SAFETY: slots at or after `first_live` were written by `push`.
                unsafe { slot.assume_init_drop() };
            }
            first_live = 0;
            block = b.next.as_deref_mut();
        }
    }

    /// Release every block without running destructors.
    pub(crate) fn free(&mut self) {
        let mut block = self.head.take();
        while let Some(mut b) = block {
            block = b.next.take();
        }
        self.unused = 0;
    }

    /// Heap bytes held by the chain.
    #[cfg(test)]
    pub(crate) fn allocated_size(&self) -> usize {
        let mut total = 0;
        let mut block = self.head.as_deref();
        while let Some(b) = block {
            total += b.allocated_size();
            block = b.next.as_deref();
        }
        total
    }
}
