#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A fixed-capacity pool of equally sized memory blocks carved out of a single arena.
//!
//! This crate provides [`BlockPool`], which allocates one contiguous arena up front, divides it
//! into blocks of the same size and hands them out in O(1) time from a free list. It is meant
//! for workloads that repeatedly create and destroy objects of the same size, where a general
//! purpose allocator would add overhead and fragmentation.
//!
//! # Key Features
//!
//! - **Fixed capacity**: The arena is allocated once and never grows or shrinks
//! - **O(1) allocation and deallocation**: A LIFO free list, so recently released (and likely
//!   cache-hot) blocks are reused first
//! - **Checked deallocation**: Null, foreign, misaligned and double-freed addresses are
//!   reported as errors and leave the pool untouched
//! - **Stale handle detection**: Per-block generations catch handles that outlived their
//!   allocation
//! - **Out-of-band bookkeeping**: Free-list links live in a side table, so nothing written into
//!   a block can corrupt the pool
//! - **Statistics**: [`PoolStats`] snapshots with a human-readable report
//!
//! # Examples
//!
//! ```rust
//! use block_pool::{BlockPool, Error};
//!
//! let mut pool = BlockPool::new(48, 2)?;
//!
//! let first = pool.allocate()?;
//! let second = pool.allocate()?;
//!
//! // The pool is now full.
//! assert!(matches!(pool.allocate(), Err(Error::PoolExhausted { .. })));
//!
//! // Released blocks are reused most-recent-first.
//! pool.deallocate(second)?;
//! pool.deallocate(first)?;
//! assert_eq!(pool.allocate()?.ptr(), first.ptr());
//!
//! println!("{}", pool.stats());
//! # Ok::<(), Error>(())
//! ```
//!
//! Blocks are untyped memory. They can be viewed as byte slices via [`BlockPool::bytes()`] and
//! [`BlockPool::bytes_mut()`] as long as every byte is initialized, or values can be placed
//! directly at [`Block::ptr()`]:
//!
//! ```rust
//! use block_pool::BlockPool;
//!
//! struct Particle {
//!     position: [f32; 3],
//!     velocity: [f32; 3],
//! }
//!
//! let mut pool = BlockPool::builder()
//!     .layout_of::<Particle>()
//!     .block_count(1024)
//!     .build()?;
//!
//! let block = pool.allocate()?;
//! let particle = block.ptr().cast::<Particle>();
//!
//! // SAFETY: The pool was built for the layout of Particle, so the block is large enough and
//! // suitably aligned, and the block stays allocated until we release it below.
//! unsafe {
//!     particle.write(Particle {
//!         position: [0.0; 3],
//!         velocity: [1.0, 0.0, 0.0],
//!     });
//!     assert!((particle.as_ref().velocity[0] - 1.0).abs() < f32::EPSILON);
//! }
//!
//! pool.deallocate(block)?;
//! # Ok::<(), block_pool::Error>(())
//! ```
//!
//! # Logging
//!
//! The pool emits [`tracing`] events: pool creation and destruction at debug level, every
//! allocation and release at trace level, and rejected deallocations at warn level. Install a
//! subscriber to see them.

mod arena;
mod block;
mod builder;
mod error;
mod pool;
mod stats;

pub(crate) use arena::*;
pub use block::Block;
pub use builder::*;
pub use error::{Error, ErrorKind};
pub(crate) use error::Result;
pub use pool::{BlockPool, MIN_BLOCK_SIZE};
pub use stats::PoolStats;
