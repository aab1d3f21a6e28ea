//! Cleanup nodes: deferred destructors stored in block tails.

use std::ptr;

/// Type-erased destructor invoked on an arena-owned object at teardown.
pub type Destructor = unsafe fn(*mut u8);

/// A registered destructor and the object it runs on.
#[repr(C)]
pub(crate) struct CleanupNode {
    pub(crate) elem: *mut u8,
    pub(crate) destructor: Destructor,
}

/// Bytes one node occupies in a block tail.
pub(crate) const CLEANUP_NODE_SIZE: usize = size_of::<CleanupNode>();

const _: () = assert!(align_of::<CleanupNode>() <= crate::config::BLOCK_ALIGN);

impl CleanupNode {
    /// Run the destructor stored at `pos`.
    ///
    /// # Safety
    ///
    /// `pos` must point at a node written by the owning serial arena whose
    /// object is still live.
    #[inline]
    pub(crate) unsafe fn run(pos: *mut u8) {
        // SAFETY: caller guarantees `pos` holds an initialized node.
        unsafe {
            let node = pos.cast::<CleanupNode>().read();
            (node.destructor)(node.elem);
        }
    }
}

/// Drop the `T` stored at `ptr` in place.
///
/// # Safety
///
/// `ptr` must point at a live, properly aligned `T` that is not used again.
pub unsafe fn drop_in_place<T>(ptr: *mut u8) {
    // SAFETY: forwarded caller contract.
    unsafe { ptr::drop_in_place(ptr.cast::<T>()) }
}

/// Reclaim and drop a `Box<T>` previously leaked with [`Box::into_raw`].
///
/// # Safety
///
/// `ptr` must come from `Box::<T>::into_raw` and not be used again.
pub unsafe fn drop_boxed<T>(ptr: *mut u8) {
    // SAFETY: forwarded caller contract.
    drop(unsafe { Box::from_raw(ptr.cast::<T>()) });
}
