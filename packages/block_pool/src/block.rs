use std::ptr::NonNull;

/// A handle to a block allocated from a [`BlockPool`][crate::BlockPool].
///
/// The handle is a plain value: it can be copied freely and does not borrow the pool. The pool
/// validates every handle passed back to it, so a handle that outlived its allocation is
/// reported as [`Error::DoubleFree`][crate::Error::DoubleFree] or
/// [`Error::StaleBlock`][crate::Error::StaleBlock] instead of silently releasing whatever block
/// now occupies the same memory.
///
/// # Out of band access
///
/// [`ptr()`][Self::ptr] exposes the address of the block for unsafe code. The pointer is valid
/// for reads and writes of [`BlockPool::block_size()`][crate::BlockPool::block_size] bytes
/// until the block is deallocated or the pool is destroyed, whichever comes first. Using it
/// after that is undefined behavior which the pool cannot detect.
///
/// Writing a typed value through the pointer may leave padding bytes of the block
/// uninitialized. Such a block must not be viewed with
/// [`BlockPool::bytes()`][crate::BlockPool::bytes] or
/// [`BlockPool::bytes_mut()`][crate::BlockPool::bytes_mut] until every byte has been written
/// again.
///
/// # Thread safety
///
/// The handle carries a raw pointer and is therefore neither [`Send`] nor [`Sync`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Block {
    ptr: NonNull<u8>,
    index: usize,
    generation: u32,
}

impl Block {
    #[must_use]
    pub(crate) fn new(ptr: NonNull<u8>, index: usize, generation: u32) -> Self {
        Self {
            ptr,
            index,
            generation,
        }
    }

    /// Returns a pointer to the first byte of the block.
    ///
    /// The pointer is aligned to at least the pointer width of the platform.
    #[must_use]
    #[inline]
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Returns the position of the block in the pool's arena.
    #[must_use]
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns how many times the block had been released before this allocation.
    #[must_use]
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}
