use std::num::NonZero;

use new_zealand::nz;
use tracing::{debug, trace, warn};

use crate::{Arena, Block, BlockPoolBuilder, Error, PoolStats, Result};

/// The smallest block size a pool accepts, in bytes.
///
/// This is the size of a free-list header (a link word and a marker word), so every block of
/// the arena could hold the free-list node of an intrusive layout.
pub const MIN_BLOCK_SIZE: usize = 2 * size_of::<usize>();

/// Blocks are always aligned to at least the pointer width.
const POINTER_WIDTH: NonZero<usize> = nz!(size_of::<usize>());

/// A fixed-capacity pool of equally sized memory blocks.
///
/// The pool allocates one contiguous arena when it is created and divides it into
/// [`block_count()`](Self::block_count) blocks of [`block_size()`](Self::block_size) bytes.
/// Allocation and deallocation are O(1) operations on a free list of vacant blocks.
///
/// # Allocation order
///
/// The free list is a stack: the most recently released block is the next one allocated.
/// A new pool hands out blocks in ascending address order.
///
/// # Misuse detection
///
/// Whether a block is in use is tracked in a side table, never in the block memory itself, so
/// nothing a caller writes into a block can confuse the pool. Deallocation validates its input
/// and returns an error without changing any state when the address is null, does not belong
/// to the pool, does not point to the start of a block, or points to a block that is already
/// free. Handles from an earlier allocation of a block that has since been reallocated are
/// rejected with [`Error::StaleBlock`].
///
/// Using a block's memory after it was released is undefined behavior that the pool cannot
/// detect.
///
/// # Examples
///
/// ```
/// use block_pool::BlockPool;
///
/// let mut pool = BlockPool::new(48, 5)?;
///
/// let block = pool.allocate()?;
///
/// // SAFETY: The block has only been written as bytes, so all of them are initialized.
/// unsafe {
///     pool.bytes_mut(block)?[..5].copy_from_slice(b"hello");
///     assert_eq!(&pool.bytes(block)?[..5], b"hello");
/// }
///
/// pool.deallocate(block)?;
/// assert!(pool.deallocate(block).is_err());
/// # Ok::<(), block_pool::Error>(())
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]). To use one pool from
/// several threads, wrap the whole pool in a mutex.
#[derive(Debug)]
pub struct BlockPool {
    arena: Arena,

    /// One entry per block, tracking whether it is in use and linking the free list.
    entries: Box<[EntryMeta]>,

    /// Head of the free list. Equal to the block count when every block is in use.
    next_free_index: usize,

    /// Number of blocks currently handed out.
    blocks_used: usize,
}

/// Bookkeeping for one block of the arena.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum EntryMeta {
    /// The block has been handed out to a caller, who owns its memory.
    Occupied { generation: u32 },

    /// The block is part of the free list.
    Vacant {
        /// Index of the next block in the free list, or the block count at the end of the list.
        next_free_index: usize,

        /// Incremented each time the block is released, so stale handles can be told apart
        /// from handles to the current occupant.
        generation: u32,
    },
}

impl EntryMeta {
    fn generation(self) -> u32 {
        match self {
            Self::Occupied { generation } | Self::Vacant { generation, .. } => generation,
        }
    }
}

impl BlockPool {
    /// Creates a pool of `block_count` blocks of at least `block_size` bytes each.
    ///
    /// The block size is rounded up to a multiple of the pointer width. Use
    /// [`builder()`](Self::builder) for more options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroBlockCount`] if `block_count` is zero, [`Error::BlockSizeTooSmall`]
    /// if `block_size` is less than [`MIN_BLOCK_SIZE`] and [`Error::ArenaTooLarge`] if the
    /// arena size does not fit in the address space. These are configuration errors.
    ///
    /// Returns [`Error::OutOfMemory`] if the arena or the bookkeeping for its blocks could not
    /// be allocated.
    ///
    /// # Examples
    ///
    /// ```
    /// use block_pool::BlockPool;
    ///
    /// let pool = BlockPool::new(17, 3)?;
    ///
    /// assert_eq!(pool.block_size() % size_of::<usize>(), 0);
    /// assert!(pool.block_size() >= 17);
    /// assert_eq!(pool.block_count(), 3);
    /// # Ok::<(), block_pool::Error>(())
    /// ```
    pub fn new(block_size: usize, block_count: usize) -> Result<Self> {
        Self::new_inner(block_size, block_count, None)
    }

    /// Creates a builder for configuring and constructing a [`BlockPool`].
    #[inline]
    pub fn builder() -> BlockPoolBuilder {
        BlockPoolBuilder::new()
    }

    pub(crate) fn new_inner(
        block_size: usize,
        block_count: usize,
        alignment: Option<usize>,
    ) -> Result<Self> {
        let Some(block_count) = NonZero::new(block_count) else {
            return Err(Error::ZeroBlockCount);
        };

        if block_size < MIN_BLOCK_SIZE {
            return Err(Error::BlockSizeTooSmall {
                requested: block_size,
                minimum: MIN_BLOCK_SIZE,
            });
        }

        let alignment = match alignment {
            Some(alignment) if !alignment.is_power_of_two() => {
                return Err(Error::InvalidAlignment { alignment });
            }
            Some(alignment) => alignment.max(POINTER_WIDTH.get()),
            None => POINTER_WIDTH.get(),
        };

        let rounded_block_size = block_size
            .checked_next_multiple_of(alignment)
            .and_then(NonZero::new)
            .ok_or(Error::ArenaTooLarge {
                block_size,
                block_count: block_count.get(),
            })?;

        let arena = Arena::new(rounded_block_size, block_count, alignment)?;

        let mut entries = Vec::new();

        // The arena is released by its own Drop if we bail out here.
        if entries.try_reserve_exact(block_count.get()).is_err() {
            return Err(Error::OutOfMemory {
                bytes: block_count.get().saturating_mul(size_of::<EntryMeta>()),
            });
        }

        // Every block starts out vacant, chained in ascending order. The last one links to
        // the block count, which marks the end of the list.
        entries.extend((0..block_count.get()).map(|index| EntryMeta::Vacant {
            // Cannot overflow, as that would imply the arena is longer than virtual memory.
            next_free_index: index.wrapping_add(1),
            generation: 0,
        }));

        // The capacity matches the length exactly, so this does not reallocate.
        let entries = entries.into_boxed_slice();

        debug!(
            block_size = rounded_block_size.get(),
            block_count = block_count.get(),
            alignment,
            arena_size = arena.size(),
            "created block pool"
        );

        Ok(Self {
            arena,
            entries,
            next_free_index: 0,
            blocks_used: 0,
        })
    }

    /// Size of each block in bytes, after rounding.
    #[must_use]
    #[inline]
    pub fn block_size(&self) -> usize {
        self.arena.block_size().get()
    }

    /// Total number of blocks in the pool.
    #[must_use]
    #[inline]
    pub fn block_count(&self) -> usize {
        self.arena.block_count().get()
    }

    /// Alignment of every block in bytes.
    #[must_use]
    #[inline]
    pub fn alignment(&self) -> usize {
        self.arena.alignment()
    }

    /// The number of blocks currently allocated.
    #[must_use]
    #[inline]
    pub fn len(&self) -> usize {
        self.blocks_used
    }

    /// Whether no blocks are currently allocated.
    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks_used == 0
    }

    /// Whether every block is allocated, so the next [`allocate()`](Self::allocate) will fail.
    #[must_use]
    #[inline]
    pub fn is_full(&self) -> bool {
        self.next_free_index >= self.block_count()
    }

    /// Returns a snapshot of the occupancy of the pool.
    ///
    /// # Examples
    ///
    /// ```
    /// use block_pool::BlockPool;
    ///
    /// let pool = BlockPool::new(48, 5)?;
    /// let stats = pool.stats();
    ///
    /// assert_eq!(stats.blocks_used(), 0);
    /// assert_eq!(stats.blocks_free(), 5);
    /// println!("{stats}");
    /// # Ok::<(), block_pool::Error>(())
    /// ```
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats::new(
            self.block_size(),
            self.arena.block_count(),
            self.blocks_used,
        )
    }

    /// Allocates a block, taking the most recently released one if there is any.
    ///
    /// The memory of the block is owned by the caller until the block is deallocated. Its
    /// contents are whatever the previous occupant left behind, or zeroes for a block that has
    /// never been used.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if every block is in use.
    pub fn allocate(&mut self) -> Result<Block> {
        if self.is_full() {
            debug!(block_count = self.block_count(), "block pool exhausted");

            return Err(Error::PoolExhausted {
                block_count: self.block_count(),
            });
        }

        // Pop the next free index from the stack of free entries.
        let index = self.next_free_index;
        let entry = self.entry_mut(index);

        let EntryMeta::Vacant {
            next_free_index,
            generation,
        } = *entry
        else {
            panic!("free list head {index} points to an occupied block");
        };

        *entry = EntryMeta::Occupied { generation };
        self.next_free_index = next_free_index;

        // Cannot overflow because there was a vacant block.
        self.blocks_used = self.blocks_used.wrapping_add(1);

        #[cfg(debug_assertions)]
        self.integrity_check();

        trace!(index, generation, "allocated block");

        Ok(Block::new(self.arena.block_ptr(index), index, generation))
    }

    /// Releases a block back to the pool.
    ///
    /// # Errors
    ///
    /// Nothing is changed if an error is returned.
    ///
    /// * [`Error::ForeignPointer`] if the block was not allocated from this pool.
    /// * [`Error::DoubleFree`] if the block has already been released.
    /// * [`Error::StaleBlock`] if the block has been released and allocated again since the
    ///   handle was obtained.
    pub fn deallocate(&mut self, block: Block) -> Result<()> {
        let index = self.locate(block.ptr().as_ptr().addr())?;

        self.release(index, Some(block.generation()))
    }

    /// Releases the block that starts at `ptr` back to the pool.
    ///
    /// This is the raw-address counterpart of [`deallocate()`](Self::deallocate) for callers
    /// that only kept the pointer. Without a handle there is no generation to compare, so
    /// releasing a reallocated block through an old pointer cannot be detected.
    ///
    /// Checks are made in this order, the first failing one determining the error. Nothing is
    /// changed if an error is returned.
    ///
    /// # Errors
    ///
    /// 1. [`Error::InvalidArgument`] if `ptr` is null.
    /// 2. [`Error::ForeignPointer`] if `ptr` is outside the arena of this pool.
    /// 3. [`Error::MisalignedPointer`] if `ptr` does not point to the start of a block.
    /// 4. [`Error::DoubleFree`] if the block is already free.
    ///
    /// # Examples
    ///
    /// ```
    /// use block_pool::{BlockPool, Error};
    ///
    /// let mut pool = BlockPool::new(32, 2)?;
    /// let ptr = pool.allocate()?.ptr().as_ptr();
    ///
    /// assert!(matches!(
    ///     pool.deallocate_ptr(ptr.wrapping_add(1)),
    ///     Err(Error::MisalignedPointer { .. })
    /// ));
    ///
    /// pool.deallocate_ptr(ptr)?;
    /// # Ok::<(), block_pool::Error>(())
    /// ```
    pub fn deallocate_ptr(&mut self, ptr: *mut u8) -> Result<()> {
        if ptr.is_null() {
            warn!("rejected deallocation of a null pointer");
            return Err(Error::InvalidArgument);
        }

        let index = self.locate(ptr.addr())?;

        self.release(index, None)
    }

    /// Whether the handle refers to a block that is currently allocated from this pool.
    #[must_use]
    pub fn contains(&self, block: Block) -> bool {
        self.validate(block).is_ok()
    }

    /// Returns the contents of an allocated block.
    ///
    /// # Safety
    ///
    /// Every byte of the block must be initialized.
    ///
    /// The arena starts out zeroed and blocks are not cleared when they are reused, so this
    /// holds for as long as the memory of the block has only been written as whole bytes. A
    /// value written through [`Block::ptr()`] leaves its padding bytes uninitialized and the
    /// block must not be viewed as bytes until those have been written again, for example
    /// with [`NonNull::write_bytes()`][std::ptr::NonNull::write_bytes].
    ///
    /// # Errors
    ///
    /// Returns an error if the handle does not refer to a currently allocated block of
    /// this pool.
    pub unsafe fn bytes(&self, block: Block) -> Result<&[u8]> {
        let index = self.validate(block)?;

        // SAFETY: Forwarding the guarantee of the caller that every byte is initialized.
        Ok(unsafe { self.arena.bytes(index) })
    }

    /// Returns the contents of an allocated block for writing.
    ///
    /// # Safety
    ///
    /// Same as [`bytes()`](Self::bytes).
    ///
    /// # Errors
    ///
    /// Returns an error if the handle does not refer to a currently allocated block of
    /// this pool.
    pub unsafe fn bytes_mut(&mut self, block: Block) -> Result<&mut [u8]> {
        let index = self.validate(block)?;

        // SAFETY: Forwarding the guarantee of the caller that every byte is initialized.
        Ok(unsafe { self.arena.bytes_mut(index) })
    }

    /// Destroys the pool, releasing its arena.
    ///
    /// Any blocks still allocated are released with it and their pointers become dangling.
    /// This is the same as dropping the pool.
    #[cfg_attr(test, mutants::skip)] // Dropping happens either way.
    pub fn destroy(self) {
        drop(self);
    }

    /// Maps an address to a block index, rejecting addresses that are not the start of a block.
    fn locate(&self, address: usize) -> Result<usize> {
        self.arena.index_of(address).inspect_err(|error| {
            warn!(address, %error, "rejected block address");
        })
    }

    /// Resolves a handle to the index of the block it was issued for, if that allocation
    /// is still current.
    fn validate(&self, block: Block) -> Result<usize> {
        let index = self.arena.index_of(block.ptr().as_ptr().addr())?;
        let entry = self.entry(index);

        match entry {
            EntryMeta::Occupied { generation } if generation == block.generation() => Ok(index),
            _ => Err(Error::StaleBlock {
                index,
                generation: block.generation(),
                current_generation: entry.generation(),
            }),
        }
    }

    /// Pushes an occupied block onto the free list.
    ///
    /// If `expected_generation` is given, the block must be occupied by that generation.
    fn release(&mut self, index: usize, expected_generation: Option<u32>) -> Result<()> {
        let next_free_index = self.next_free_index;
        let entry = self.entry_mut(index);

        let generation = match *entry {
            EntryMeta::Occupied { generation } => generation,
            EntryMeta::Vacant { .. } => {
                warn!(index, "double free detected");
                return Err(Error::DoubleFree { index });
            }
        };

        if let Some(expected_generation) = expected_generation {
            if expected_generation != generation {
                warn!(
                    index,
                    expected_generation, generation, "rejected stale block handle"
                );

                return Err(Error::StaleBlock {
                    index,
                    generation: expected_generation,
                    current_generation: generation,
                });
            }
        }

        *entry = EntryMeta::Vacant {
            next_free_index,
            generation: generation.wrapping_add(1),
        };

        // Push the released block onto the free stack.
        self.next_free_index = index;

        // Cannot underflow because the block was occupied.
        self.blocks_used = self.blocks_used.wrapping_sub(1);

        #[cfg(debug_assertions)]
        self.integrity_check();

        trace!(index, generation, "released block");

        Ok(())
    }

    fn entry(&self, index: usize) -> EntryMeta {
        *self
            .entries
            .get(index)
            .expect("block index was validated against the arena bounds")
    }

    fn entry_mut(&mut self, index: usize) -> &mut EntryMeta {
        self.entries
            .get_mut(index)
            .expect("block index was validated against the arena bounds")
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    /// Verifies that the free list and the occupancy count agree with the side table.
    ///
    /// This method is only available in debug builds and is used for testing and validation.
    #[allow(
        clippy::indexing_slicing,
        reason = "integrity check needs array access"
    )]
    pub(crate) fn integrity_check(&self) {
        let block_count = self.block_count();
        let mut on_free_list = vec![false; block_count];
        let mut free_list_length: usize = 0;

        let mut index = self.next_free_index;

        while index != block_count {
            assert!(
                index < block_count,
                "free list link {index} is out of bounds in pool of {block_count} blocks"
            );

            assert!(
                !on_free_list[index],
                "free list visits block {index} twice in pool of {block_count} blocks"
            );

            on_free_list[index] = true;
            free_list_length = free_list_length.wrapping_add(1);

            index = match self.entries[index] {
                EntryMeta::Vacant {
                    next_free_index, ..
                } => next_free_index,
                EntryMeta::Occupied { .. } => {
                    panic!("free list reaches occupied block {index} in pool of {block_count} blocks")
                }
            };
        }

        let occupied_count = self
            .entries
            .iter()
            .filter(|entry| matches!(entry, EntryMeta::Occupied { .. }))
            .count();

        assert_eq!(
            self.blocks_used, occupied_count,
            "blocks_used does not match the observed occupied count"
        );

        assert_eq!(
            free_list_length,
            block_count.wrapping_sub(self.blocks_used),
            "free list length does not match the number of vacant blocks"
        );
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        if self.blocks_used > 0 {
            warn!(
                blocks_used = self.blocks_used,
                block_count = self.block_count(),
                "destroying block pool with blocks still allocated"
            );
        }

        debug!(
            block_size = self.block_size(),
            block_count = self.block_count(),
            "destroyed block pool"
        );
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use std::collections::HashSet;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;
    use crate::ErrorKind;

    assert_impl_all!(BlockPool: Send, std::fmt::Debug);
    assert_not_impl_any!(BlockPool: Sync);

    const WORD: usize = size_of::<usize>();

    fn fill(pool: &mut BlockPool, block: Block, value: u8) {
        // SAFETY: These tests only ever write whole bytes into blocks.
        unsafe { pool.bytes_mut(block) }.unwrap().fill(value);
    }

    fn holds(pool: &BlockPool, block: Block, value: u8) -> bool {
        // SAFETY: These tests only ever write whole bytes into blocks.
        unsafe { pool.bytes(block) }
            .unwrap()
            .iter()
            .all(|x| *x == value)
    }

    #[test]
    fn smoke_test() {
        let mut pool = BlockPool::new(32, 3).unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();

        fill(&mut pool, a, 1);
        fill(&mut pool, b, 2);
        fill(&mut pool, c, 3);

        assert!(holds(&pool, a, 1));
        assert!(holds(&pool, b, 2));
        assert!(holds(&pool, c, 3));

        assert_eq!(pool.len(), 3);
        assert!(pool.is_full());

        pool.deallocate(b).unwrap();

        assert_eq!(pool.len(), 2);
        assert!(!pool.is_full());

        let d = pool.allocate().unwrap();
        assert_eq!(d.ptr(), b.ptr());

        // The previous occupant's bytes are left in place.
        assert!(holds(&pool, d, 2));

        pool.deallocate(a).unwrap();
        pool.deallocate(c).unwrap();
        pool.deallocate(d).unwrap();

        assert!(pool.is_empty());
    }

    #[test]
    fn new_pool_is_empty() {
        for block_count in [1, 2, 7, 100] {
            let pool = BlockPool::new(48, block_count).unwrap();

            let stats = pool.stats();
            assert_eq!(stats.blocks_used(), 0);
            assert_eq!(stats.blocks_free(), block_count);
            assert!(pool.is_empty());
            assert!(!pool.is_full());
        }
    }

    #[test]
    fn zero_block_count_is_config_error() {
        let error = BlockPool::new(48, 0).unwrap_err();

        assert!(matches!(error, Error::ZeroBlockCount));
        assert_eq!(error.kind(), ErrorKind::Config);
    }

    #[test]
    fn block_smaller_than_header_is_config_error() {
        let error = BlockPool::new(MIN_BLOCK_SIZE - 1, 4).unwrap_err();

        assert!(matches!(
            error,
            Error::BlockSizeTooSmall {
                requested,
                minimum: MIN_BLOCK_SIZE
            } if requested == MIN_BLOCK_SIZE - 1
        ));
        assert_eq!(error.kind(), ErrorKind::Config);
    }

    #[test]
    fn minimum_block_size_is_accepted() {
        let pool = BlockPool::new(MIN_BLOCK_SIZE, 1).unwrap();
        assert_eq!(pool.block_size(), MIN_BLOCK_SIZE);
    }

    #[test]
    fn block_size_rounds_up_to_pointer_width() {
        let pool = BlockPool::new(MIN_BLOCK_SIZE + 1, 2).unwrap();

        assert_eq!(pool.block_size(), MIN_BLOCK_SIZE + WORD);
        assert_eq!(pool.alignment(), WORD);
    }

    #[test]
    fn huge_arena_is_config_error() {
        let error = BlockPool::new(usize::MAX / 2, 4).unwrap_err();

        assert!(matches!(error, Error::ArenaTooLarge { .. }));
        assert_eq!(error.kind(), ErrorKind::Config);
    }

    #[test]
    fn unroundable_block_size_is_config_error() {
        let error = BlockPool::new(usize::MAX, 1).unwrap_err();

        assert!(matches!(error, Error::ArenaTooLarge { .. }));
    }

    #[test]
    fn fresh_pool_allocates_in_ascending_order() {
        let mut pool = BlockPool::new(32, 4).unwrap();

        let base = pool.allocate().unwrap();
        assert_eq!(base.index(), 0);

        for expected_index in 1..4 {
            let block = pool.allocate().unwrap();
            assert_eq!(block.index(), expected_index);
            assert_eq!(
                block.ptr().as_ptr().addr(),
                base.ptr().as_ptr().addr() + expected_index * 32
            );
        }
    }

    #[test]
    fn blocks_are_aligned() {
        let mut pool = BlockPool::new(MIN_BLOCK_SIZE + 3, 5).unwrap();

        for _ in 0..5 {
            let block = pool.allocate().unwrap();
            assert_eq!(block.ptr().as_ptr().addr() % WORD, 0);
        }
    }

    #[test]
    fn exhaustion() {
        let mut pool = BlockPool::new(32, 3).unwrap();

        for _ in 0..3 {
            pool.allocate().unwrap();
        }

        let error = pool.allocate().unwrap_err();
        assert!(matches!(error, Error::PoolExhausted { block_count: 3 }));
        assert_eq!(error.kind(), ErrorKind::Exhausted);

        let stats = pool.stats();
        assert_eq!(stats.blocks_used(), 3);
        assert!((stats.utilization_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn allocation_is_lifo() {
        let mut pool = BlockPool::new(32, 4).unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let _c = pool.allocate().unwrap();

        pool.deallocate(b).unwrap();
        pool.deallocate(a).unwrap();

        assert_eq!(pool.allocate().unwrap().ptr(), a.ptr());
        assert_eq!(pool.allocate().unwrap().ptr(), b.ptr());
    }

    #[test]
    fn double_free_is_detected() {
        let mut pool = BlockPool::new(32, 3).unwrap();

        let a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();

        pool.deallocate(a).unwrap();
        assert_eq!(pool.len(), 1);

        let error = pool.deallocate(a).unwrap_err();
        assert!(matches!(error, Error::DoubleFree { index: 0 }));
        assert_eq!(error.kind(), ErrorKind::Misuse);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn double_free_by_pointer_is_detected() {
        let mut pool = BlockPool::new(32, 3).unwrap();

        let ptr = pool.allocate().unwrap().ptr().as_ptr();

        pool.deallocate_ptr(ptr).unwrap();

        assert!(matches!(
            pool.deallocate_ptr(ptr),
            Err(Error::DoubleFree { index: 0 })
        ));
        assert_eq!(pool.len(), 0);
    }

    #[test]
    fn null_pointer_is_invalid_argument() {
        let mut pool = BlockPool::new(32, 3).unwrap();
        _ = pool.allocate().unwrap();

        assert!(matches!(
            pool.deallocate_ptr(std::ptr::null_mut()),
            Err(Error::InvalidArgument)
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn foreign_pointer_is_rejected() {
        let mut pool = BlockPool::new(32, 3).unwrap();
        let _a = pool.allocate().unwrap();

        let mut outside = [0_u8; 32];

        assert!(matches!(
            pool.deallocate_ptr(outside.as_mut_ptr()),
            Err(Error::ForeignPointer { .. })
        ));
        assert_eq!(pool.len(), 1);

        // The free list is intact: the next allocation is still block 1.
        assert_eq!(pool.allocate().unwrap().index(), 1);
    }

    #[test]
    fn block_from_other_pool_is_foreign() {
        let mut pool = BlockPool::new(32, 3).unwrap();
        let mut other = BlockPool::new(32, 3).unwrap();

        let _ours = pool.allocate().unwrap();
        let theirs = other.allocate().unwrap();

        assert!(matches!(
            pool.deallocate(theirs),
            Err(Error::ForeignPointer { .. })
        ));
        assert!(!pool.contains(theirs));
        // SAFETY: The call is rejected before any memory is viewed.
        let result = unsafe { pool.bytes(theirs) };
        assert!(matches!(result, Err(Error::ForeignPointer { .. })));
        assert_eq!(pool.len(), 1);
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn misaligned_pointer_is_rejected() {
        let mut pool = BlockPool::new(32, 3).unwrap();

        let block = pool.allocate().unwrap();
        let interior = block.ptr().as_ptr().wrapping_add(8);

        assert!(matches!(
            pool.deallocate_ptr(interior),
            Err(Error::MisalignedPointer {
                offset: 8,
                block_size: 32
            })
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn misalignment_is_checked_before_double_free() {
        let mut pool = BlockPool::new(32, 2).unwrap();

        let block = pool.allocate().unwrap();
        pool.deallocate(block).unwrap();

        // The block is free, but an interior address must still be reported as misaligned.
        assert!(matches!(
            pool.deallocate_ptr(block.ptr().as_ptr().wrapping_add(1)),
            Err(Error::MisalignedPointer { .. })
        ));
    }

    #[test]
    fn stale_handle_is_rejected() {
        let mut pool = BlockPool::new(32, 2).unwrap();

        let old = pool.allocate().unwrap();
        pool.deallocate(old).unwrap();

        let new = pool.allocate().unwrap();
        assert_eq!(new.ptr(), old.ptr());
        assert_eq!(new.generation(), old.generation() + 1);

        let error = pool.deallocate(old).unwrap_err();
        assert!(matches!(
            error,
            Error::StaleBlock {
                index: 0,
                generation: 0,
                current_generation: 1
            }
        ));

        // The current occupant is unaffected.
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(new));
        assert!(!pool.contains(old));
        pool.deallocate(new).unwrap();
    }

    #[test]
    fn access_through_released_handle_is_rejected() {
        let mut pool = BlockPool::new(32, 2).unwrap();

        let block = pool.allocate().unwrap();
        pool.deallocate(block).unwrap();

        // SAFETY: Nothing was written into the pool, so the zeroed arena is fully initialized.
        let result = unsafe { pool.bytes(block) };
        assert!(matches!(
            result,
            Err(Error::StaleBlock {
                generation: 0,
                current_generation: 1,
                ..
            })
        ));

        // SAFETY: As above.
        let result = unsafe { pool.bytes_mut(block) };
        assert!(matches!(result, Err(Error::StaleBlock { .. })));
    }

    #[test]
    fn raw_pointer_cannot_tell_reallocation_apart() {
        let mut pool = BlockPool::new(32, 2).unwrap();

        let old = pool.allocate().unwrap();
        pool.deallocate(old).unwrap();
        let new = pool.allocate().unwrap();

        // Without a generation the pointer is indistinguishable from the current occupant.
        pool.deallocate_ptr(old.ptr().as_ptr()).unwrap();
        assert!(!pool.contains(new));
    }

    #[test]
    fn bytes_cover_whole_block() {
        let mut pool = BlockPool::new(MIN_BLOCK_SIZE + 1, 2).unwrap();

        let block = pool.allocate().unwrap();

        // SAFETY: Nothing was written into the pool, so the zeroed arena is fully initialized.
        unsafe {
            assert_eq!(pool.bytes(block).unwrap().len(), pool.block_size());
            assert_eq!(pool.bytes_mut(block).unwrap().len(), pool.block_size());
        }
    }

    #[test]
    fn padded_value_needs_reinitializing_before_byte_view() {
        #[repr(C)]
        struct Padded {
            tag: u8,
            value: u64,
        }

        let mut pool = BlockPool::builder()
            .layout_of::<Padded>()
            .block_count(2)
            .build()
            .unwrap();

        let block = pool.allocate().unwrap();
        let ptr = block.ptr().cast::<Padded>();

        // SAFETY: The pool was built for the layout of Padded and the block is allocated.
        let read_back = unsafe {
            ptr.write(Padded { tag: 1, value: 2 });
            ptr.read()
        };
        assert_eq!(read_back.tag, 1);
        assert_eq!(read_back.value, 2);

        // The padding after `tag` is now uninitialized. Overwriting the whole block as bytes
        // makes it viewable again.
        // SAFETY: The pointer is valid for writes of block_size bytes while allocated.
        unsafe {
            block.ptr().write_bytes(0xEE, pool.block_size());
        }

        assert!(holds(&pool, block, 0xEE));
        pool.deallocate(block).unwrap();
    }

    #[test]
    fn live_blocks_never_alias() {
        let mut pool = BlockPool::new(32, 8).unwrap();
        let mut live = Vec::new();

        // A deterministic interleaving of allocations and releases.
        for step in 0_usize..200 {
            if step % 3 == 2 && !live.is_empty() {
                let victim = live.remove((step * 7) % live.len());
                pool.deallocate(victim).unwrap();
            } else if let Ok(block) = pool.allocate() {
                live.push(block);
            }

            let addresses: HashSet<_> = live.iter().map(|block| block.ptr()).collect();
            assert_eq!(addresses.len(), live.len());
            assert_eq!(pool.len(), live.len());
        }
    }

    #[test]
    fn generation_wraps_around() {
        let mut pool = BlockPool::new(32, 1).unwrap();

        pool.entries[0] = EntryMeta::Vacant {
            next_free_index: 1,
            generation: u32::MAX,
        };

        let block = pool.allocate().unwrap();
        assert_eq!(block.generation(), u32::MAX);

        pool.deallocate(block).unwrap();

        let block = pool.allocate().unwrap();
        assert_eq!(block.generation(), 0);
    }

    #[test]
    fn destroy_with_allocated_blocks() {
        let mut pool = BlockPool::new(32, 4).unwrap();
        _ = pool.allocate().unwrap();
        _ = pool.allocate().unwrap();

        pool.destroy();
    }

    #[test]
    fn usable_behind_mutex_from_other_thread() {
        use std::sync::{Arc, Mutex};
        use std::thread;

        let pool = Arc::new(Mutex::new(BlockPool::new(32, 3).unwrap()));

        let index = {
            let mut pool = pool.lock().unwrap();
            _ = pool.allocate().unwrap();
            pool.allocate().unwrap().index()
        };

        let pool_clone = Arc::clone(&pool);
        thread::spawn(move || {
            let mut pool = pool_clone.lock().unwrap();
            _ = pool.allocate().unwrap();
            assert!(pool.is_full());
        })
        .join()
        .unwrap();

        assert_eq!(index, 1);
        assert_eq!(pool.lock().unwrap().len(), 3);
    }
}
