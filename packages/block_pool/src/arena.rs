use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::num::NonZero;
use std::ptr::NonNull;
use std::slice;

use crate::{Error, Result};

/// A single contiguous allocation divided into `block_count` blocks of `block_size` bytes.
///
/// The arena only knows about addresses. Whether a block is in use is tracked by the owner.
///
/// # Out of band access
///
/// The arena does not create or keep references to its memory, so it is valid for callers to
/// access blocks via pointers from unsafe code even when not holding a reference to the arena.
#[derive(Debug)]
pub(crate) struct Arena {
    /// Start of the first block. Each block starts `block_size` bytes after the previous one.
    base: NonNull<u8>,

    /// The layout the memory was allocated with, required for deallocation.
    layout: Layout,

    block_size: NonZero<usize>,
    block_count: NonZero<usize>,
}

impl Arena {
    /// Allocates a zero-initialized arena for `block_count` blocks of `block_size` bytes, with
    /// the first block aligned to `alignment`.
    ///
    /// `block_size` must already be a multiple of `alignment`, so every block is aligned.
    pub(crate) fn new(
        block_size: NonZero<usize>,
        block_count: NonZero<usize>,
        alignment: usize,
    ) -> Result<Self> {
        debug_assert!(alignment.is_power_of_two());
        debug_assert_eq!(block_size.get() & (alignment.wrapping_sub(1)), 0);

        let too_large = || Error::ArenaTooLarge {
            block_size: block_size.get(),
            block_count: block_count.get(),
        };

        let total_size = block_size
            .get()
            .checked_mul(block_count.get())
            .ok_or_else(too_large)?;

        let Ok(layout) = Layout::from_size_align(total_size, alignment) else {
            return Err(too_large());
        };

        // SAFETY: The layout has a non-zero size because both factors are non-zero
        // and the multiplication did not overflow.
        let base = unsafe { alloc_zeroed(layout) };

        let Some(base) = NonNull::new(base) else {
            return Err(Error::OutOfMemory { bytes: total_size });
        };

        Ok(Self {
            base,
            layout,
            block_size,
            block_count,
        })
    }

    #[must_use]
    pub(crate) fn block_size(&self) -> NonZero<usize> {
        self.block_size
    }

    #[must_use]
    pub(crate) fn block_count(&self) -> NonZero<usize> {
        self.block_count
    }

    #[must_use]
    pub(crate) fn alignment(&self) -> usize {
        self.layout.align()
    }

    /// Total size of the arena in bytes.
    #[must_use]
    pub(crate) fn size(&self) -> usize {
        self.layout.size()
    }

    /// Returns a pointer to the first byte of the block at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub(crate) fn block_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.block_count.get(),
            "block {index} index out of bounds in arena of {} blocks",
            self.block_count.get()
        );

        // Cannot overflow because the whole arena fits in the address space.
        let offset = index.wrapping_mul(self.block_size.get());

        // SAFETY: The bounds check above guarantees offset is inside our allocation.
        unsafe { self.base.add(offset) }
    }

    /// Maps an address to the index of the block that starts at it.
    ///
    /// Bounds are checked before alignment, so an address outside the arena is always reported
    /// as foreign even if it happens to be a multiple of the block size away from the base.
    #[expect(
        clippy::integer_division,
        reason = "the remainder is verified to be zero before dividing"
    )]
    pub(crate) fn index_of(&self, address: usize) -> Result<usize> {
        let base = self.base.as_ptr().addr();

        let offset = address
            .checked_sub(base)
            .filter(|offset| *offset < self.layout.size())
            .ok_or(Error::ForeignPointer { address })?;

        if offset % self.block_size != 0 {
            return Err(Error::MisalignedPointer {
                offset,
                block_size: self.block_size.get(),
            });
        }

        Ok(offset / self.block_size)
    }

    /// Returns the bytes of the block at `index`.
    ///
    /// # Safety
    ///
    /// Every byte of the block must be initialized. The arena starts out zeroed, but a typed
    /// write through a block pointer may leave padding bytes uninitialized.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub(crate) unsafe fn bytes(&self, index: usize) -> &[u8] {
        let ptr = self.block_ptr(index);

        // SAFETY: The block is inside our allocation and the caller guarantees every byte of it
        // is initialized. The returned slice borrows the arena so the memory cannot be released
        // while the slice is alive.
        unsafe { slice::from_raw_parts(ptr.as_ptr(), self.block_size.get()) }
    }

    /// Returns the bytes of the block at `index` for writing.
    ///
    /// # Safety
    ///
    /// Same as [`bytes()`](Self::bytes).
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub(crate) unsafe fn bytes_mut(&mut self, index: usize) -> &mut [u8] {
        let ptr = self.block_ptr(index);

        // SAFETY: As in bytes(). Exclusivity is guaranteed by the &mut self borrow, since the
        // arena never hands out references to its memory by any other path.
        unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), self.block_size.get()) }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // SAFETY: We allocated this memory in new() with exactly this layout
        // and it has not been deallocated yet.
        unsafe {
            dealloc(self.base.as_ptr(), self.layout);
        }
    }
}

// SAFETY: The arena exclusively owns its allocation and does not rely on thread-local state,
// so moving it to another thread is sound. All access goes through &self/&mut self.
unsafe impl Send for Arena {}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
#[allow(
    clippy::indexing_slicing,
    reason = "test code doesn't need the same rigor as production code"
)]
mod tests {
    use new_zealand::nz;

    use super::*;

    const WORD: usize = size_of::<usize>();

    #[test]
    fn blocks_are_contiguous_and_aligned() {
        let arena = Arena::new(nz!(48), nz!(5), WORD).unwrap();

        assert_eq!(arena.size(), 240);

        let base = arena.block_ptr(0).as_ptr().addr();
        assert_eq!(base % WORD, 0);

        for index in 0..5 {
            assert_eq!(
                arena.block_ptr(index).as_ptr().addr(),
                base + index * 48
            );
        }
    }

    #[test]
    fn index_of_start_addresses() {
        let arena = Arena::new(nz!(32), nz!(4), WORD).unwrap();

        for index in 0..4 {
            let address = arena.block_ptr(index).as_ptr().addr();
            assert_eq!(arena.index_of(address).unwrap(), index);
        }
    }

    #[test]
    fn index_of_rejects_out_of_bounds() {
        let arena = Arena::new(nz!(32), nz!(4), WORD).unwrap();
        let base = arena.block_ptr(0).as_ptr().addr();

        assert!(matches!(
            arena.index_of(base - 32),
            Err(Error::ForeignPointer { .. })
        ));

        // One past the end is outside, even though it is on a block boundary.
        assert!(matches!(
            arena.index_of(base + 4 * 32),
            Err(Error::ForeignPointer { .. })
        ));

        assert!(matches!(
            arena.index_of(0),
            Err(Error::ForeignPointer { address: 0 })
        ));
    }

    #[test]
    fn index_of_rejects_interior_addresses() {
        let arena = Arena::new(nz!(32), nz!(4), WORD).unwrap();
        let base = arena.block_ptr(0).as_ptr().addr();

        assert!(matches!(
            arena.index_of(base + 33),
            Err(Error::MisalignedPointer {
                offset: 33,
                block_size: 32
            })
        ));
    }

    #[test]
    fn starts_zeroed() {
        let arena = Arena::new(nz!(16), nz!(3), WORD).unwrap();

        for index in 0..3 {
            // SAFETY: Nothing has been written yet, so the zeroed bytes are initialized.
            let bytes = unsafe { arena.bytes(index) };
            assert!(bytes.iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn writes_stay_in_their_block() {
        let mut arena = Arena::new(nz!(16), nz!(3), WORD).unwrap();

        // SAFETY: The arena is only ever written as whole bytes, so every byte is initialized.
        unsafe {
            arena.bytes_mut(1).fill(0xAB);

            assert!(arena.bytes(0).iter().all(|b| *b == 0));
            assert!(arena.bytes(1).iter().all(|b| *b == 0xAB));
            assert!(arena.bytes(2).iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn honors_larger_alignment() {
        let arena = Arena::new(nz!(64), nz!(3), 64).unwrap();

        assert_eq!(arena.alignment(), 64);
        assert_eq!(arena.block_ptr(0).as_ptr().addr() % 64, 0);
        assert_eq!(arena.block_ptr(2).as_ptr().addr() % 64, 0);
    }

    #[test]
    fn overflowing_size_is_too_large() {
        let result = Arena::new(nz!(usize::MAX - 7), nz!(2), WORD);

        assert!(matches!(result, Err(Error::ArenaTooLarge { .. })));
    }

    #[test]
    fn unrepresentable_layout_is_too_large() {
        // Does not overflow usize but exceeds isize::MAX, which Layout rejects.
        let result = Arena::new(nz!(usize::MAX / 2 + 1), nz!(1), WORD);

        assert!(matches!(result, Err(Error::ArenaTooLarge { .. })));
    }

    #[test]
    #[should_panic]
    fn block_ptr_out_of_bounds_panics() {
        let arena = Arena::new(nz!(16), nz!(2), WORD).unwrap();
        _ = arena.block_ptr(2);
    }
}
