use thiserror::Error;

/// Errors that can occur when creating a [`BlockPool`][crate::BlockPool] or when
/// allocating and releasing its blocks.
///
/// Every failed operation leaves the pool exactly as it was before the call. Use
/// [`kind()`][Self::kind] to branch on the broad category instead of matching every variant.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The pool was configured with zero blocks.
    #[error("a block pool must contain at least one block")]
    ZeroBlockCount,

    /// The requested block size cannot host the free-list header of a vacant block.
    #[error("block size {requested} is too small, the minimum is {minimum} bytes")]
    BlockSizeTooSmall {
        /// The block size the caller asked for.
        requested: usize,

        /// The smallest block size the pool accepts.
        minimum: usize,
    },

    /// The requested block alignment is not a power of two.
    #[error("block alignment {alignment} is not a power of two")]
    InvalidAlignment {
        /// The alignment the caller asked for.
        alignment: usize,
    },

    /// The total arena size does not fit in the address space.
    #[error("an arena of {block_count} blocks of {block_size} bytes is too large to allocate")]
    ArenaTooLarge {
        /// The rounded block size.
        block_size: usize,

        /// The requested number of blocks.
        block_count: usize,
    },

    /// The global allocator could not provide memory for the arena.
    #[error("failed to allocate a {bytes} byte arena")]
    OutOfMemory {
        /// Size of the arena that could not be allocated.
        bytes: usize,
    },

    /// Every block in the pool is in use.
    #[error("all {block_count} blocks of the pool are in use")]
    PoolExhausted {
        /// Capacity of the exhausted pool.
        block_count: usize,
    },

    /// A null pointer was passed where a block address was expected.
    #[error("null pointer is not a block address")]
    InvalidArgument,

    /// The address does not fall inside the arena of this pool.
    #[error("address {address:#x} does not belong to this pool")]
    ForeignPointer {
        /// The rejected address.
        address: usize,
    },

    /// The address falls inside the arena but not at the start of a block.
    #[error("arena offset {offset} is not a multiple of the block size {block_size}")]
    MisalignedPointer {
        /// Offset of the rejected address from the start of the arena.
        offset: usize,

        /// Block size of the pool.
        block_size: usize,
    },

    /// The block is already on the free list.
    #[error("block {index} is already free")]
    DoubleFree {
        /// Index of the block in the arena.
        index: usize,
    },

    /// The handle refers to an earlier use of a block that has since been released and
    /// handed out again.
    #[error("block {index} handle is from generation {generation} but the block is at generation {current_generation}")]
    StaleBlock {
        /// Index of the block in the arena.
        index: usize,

        /// Generation recorded in the handle.
        generation: u32,

        /// Generation of the block's current occupant.
        current_generation: u32,
    },
}

/// Broad category of an [`Error`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The pool configuration is invalid. Retrying with the same parameters will fail again.
    Config,

    /// A system resource (memory) could not be acquired. The pool was not created.
    Resource,

    /// The pool has no free blocks. This is an expected condition under load.
    Exhausted,

    /// The caller passed a pointer or handle that the pool refused to act on.
    Misuse,
}

impl ErrorKind {
    /// Whether the same call may succeed later without the caller changing its arguments.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Resource | Self::Exhausted)
    }
}

impl Error {
    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ZeroBlockCount
            | Self::BlockSizeTooSmall { .. }
            | Self::InvalidAlignment { .. }
            | Self::ArenaTooLarge { .. } => ErrorKind::Config,
            Self::OutOfMemory { .. } => ErrorKind::Resource,
            Self::PoolExhausted { .. } => ErrorKind::Exhausted,
            Self::InvalidArgument
            | Self::ForeignPointer { .. }
            | Self::MisalignedPointer { .. }
            | Self::DoubleFree { .. }
            | Self::StaleBlock { .. } => ErrorKind::Misuse,
        }
    }
}

/// A specialized `Result` type for block pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Error: Send, Sync, Debug);
    assert_impl_all!(ErrorKind: Send, Sync, Copy, Debug);

    #[test]
    fn config_errors_are_not_retryable() {
        let errors = [
            Error::ZeroBlockCount,
            Error::BlockSizeTooSmall {
                requested: 1,
                minimum: 16,
            },
            Error::InvalidAlignment { alignment: 3 },
            Error::ArenaTooLarge {
                block_size: usize::MAX,
                block_count: 2,
            },
        ];

        for error in errors {
            assert_eq!(error.kind(), ErrorKind::Config);
            assert!(!error.kind().is_retryable());
        }
    }

    #[test]
    fn resource_and_exhaustion_are_retryable() {
        let out_of_memory = Error::OutOfMemory { bytes: 1024 };
        assert_eq!(out_of_memory.kind(), ErrorKind::Resource);
        assert!(out_of_memory.kind().is_retryable());

        let exhausted = Error::PoolExhausted { block_count: 5 };
        assert_eq!(exhausted.kind(), ErrorKind::Exhausted);
        assert!(exhausted.kind().is_retryable());
    }

    #[test]
    fn misuse_errors_are_not_retryable() {
        let errors = [
            Error::InvalidArgument,
            Error::ForeignPointer { address: 0x1000 },
            Error::MisalignedPointer {
                offset: 3,
                block_size: 16,
            },
            Error::DoubleFree { index: 1 },
            Error::StaleBlock {
                index: 1,
                generation: 0,
                current_generation: 1,
            },
        ];

        for error in errors {
            assert_eq!(error.kind(), ErrorKind::Misuse);
            assert!(!error.kind().is_retryable());
        }
    }

    #[test]
    fn messages_include_details() {
        let error = Error::BlockSizeTooSmall {
            requested: 4,
            minimum: 16,
        };
        assert_eq!(
            error.to_string(),
            "block size 4 is too small, the minimum is 16 bytes"
        );

        let error = Error::ForeignPointer { address: 0xdead };
        assert_eq!(error.to_string(), "address 0xdead does not belong to this pool");

        let error = Error::DoubleFree { index: 2 };
        assert_eq!(error.to_string(), "block 2 is already free");
    }
}
