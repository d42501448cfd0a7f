use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;

use crate::{BlockPool, Result};

/// Builder for creating an instance of [`BlockPool`].
///
/// The block size and block count are mandatory. The block size can be given directly with
/// [`block_size()`](Self::block_size) or derived from a type with
/// [`layout_of::<T>()`](Self::layout_of). Settings that are never provided default to zero,
/// which [`build()`](Self::build) rejects with an error.
///
/// # Examples
///
/// Using an explicit block size:
///
/// ```
/// use block_pool::BlockPool;
///
/// let pool = BlockPool::builder().block_size(48).block_count(5).build()?;
///
/// assert_eq!(pool.block_size(), 48);
/// assert_eq!(pool.block_count(), 5);
/// # Ok::<(), block_pool::Error>(())
/// ```
///
/// Using type-based layout:
///
/// ```
/// use block_pool::BlockPool;
///
/// #[repr(align(64))]
/// struct CacheLine([u8; 64]);
///
/// let pool = BlockPool::builder()
///     .layout_of::<CacheLine>()
///     .block_count(16)
///     .build()?;
///
/// assert_eq!(pool.block_size(), 64);
/// assert_eq!(pool.alignment(), 64);
/// # Ok::<(), block_pool::Error>(())
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) and can be safely transferred between threads,
/// allowing pool configuration to happen on different threads than where the pool is used.
/// However, it is not thread-safe ([`Sync`]) as it contains mutable configuration state.
#[derive(Debug)]
#[must_use]
pub struct BlockPoolBuilder {
    block_size: usize,
    block_count: usize,

    /// Requested alignment, if any. The pool never aligns blocks to less than the pointer width.
    alignment: Option<usize>,

    // Prevents Sync while allowing Send - builders are thread-mobile but not thread-safe
    _not_sync: PhantomData<Cell<()>>,
}

impl BlockPoolBuilder {
    #[inline]
    pub(crate) fn new() -> Self {
        Self {
            block_size: 0,
            block_count: 0,
            alignment: None,
            _not_sync: PhantomData,
        }
    }

    /// Sets the requested size of each block, in bytes.
    ///
    /// The pool rounds this up to a multiple of its alignment.
    #[inline]
    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Sets the number of blocks in the pool. The pool never grows beyond this.
    #[inline]
    pub fn block_count(mut self, block_count: usize) -> Self {
        self.block_count = block_count;
        self
    }

    /// Sets the minimum alignment of every block.
    ///
    /// Values below the pointer width have no effect. A value that is not a power of two
    /// causes [`build()`](Self::build) to fail.
    #[inline]
    pub fn alignment(mut self, alignment: usize) -> Self {
        self.alignment = Some(alignment);
        self
    }

    /// Sets both the block size and the alignment from a memory layout.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use block_pool::BlockPool;
    ///
    /// let layout = Layout::from_size_align(40, 8).unwrap();
    /// let pool = BlockPool::builder().layout(layout).block_count(4).build()?;
    ///
    /// assert_eq!(pool.block_size(), 40);
    /// # Ok::<(), block_pool::Error>(())
    /// ```
    #[inline]
    pub fn layout(self, layout: Layout) -> Self {
        self.block_size(layout.size()).alignment(layout.align())
    }

    /// Sets both the block size and the alignment from the layout of `T`.
    ///
    /// Types smaller than [`MIN_BLOCK_SIZE`][crate::MIN_BLOCK_SIZE] are rejected by
    /// [`build()`](Self::build). Wrap them in a larger type if needed.
    #[inline]
    pub fn layout_of<T>(self) -> Self {
        self.layout(Layout::new::<T>())
    }

    /// Builds the pool, allocating its arena.
    ///
    /// # Errors
    ///
    /// Returns a [`Config`][crate::ErrorKind::Config] error if the block count is zero, the
    /// block size is below [`MIN_BLOCK_SIZE`][crate::MIN_BLOCK_SIZE], the alignment is not a
    /// power of two or the arena would not fit in the address space.
    ///
    /// Returns [`Error::OutOfMemory`][crate::Error::OutOfMemory] if the arena could not be
    /// allocated.
    #[inline]
    pub fn build(self) -> Result<BlockPool> {
        BlockPool::new_inner(self.block_size, self.block_count, self.alignment)
    }
}
