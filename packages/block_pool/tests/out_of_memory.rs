//! Allocation failures during pool creation are reported as resource errors.
//!
//! The global allocator of this test binary refuses requests whose size falls into a range
//! chosen by the current test thread, so each test only fails its own allocations.

use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::ops::Range;

use block_pool::{BlockPool, Error, ErrorKind};

struct FailingAllocator;

thread_local! {
    static FAIL_SIZES: Cell<Range<usize>> = const { Cell::new(0..0) };
}

fn fail_sizes(sizes: Range<usize>) {
    FAIL_SIZES.with(|cell| cell.set(sizes));
}

fn should_fail(size: usize) -> bool {
    FAIL_SIZES
        .try_with(|cell| {
            let sizes = cell.replace(0..0);
            let fail = sizes.contains(&size);
            cell.set(sizes);
            fail
        })
        .unwrap_or(false)
}

// SAFETY: Every request that is not refused is forwarded to the system allocator unchanged.
unsafe impl GlobalAlloc for FailingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if should_fail(layout.size()) {
            return std::ptr::null_mut();
        }

        // SAFETY: Forwarding the guarantees of the caller.
        unsafe { System.alloc(layout) }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if should_fail(layout.size()) {
            return std::ptr::null_mut();
        }

        // SAFETY: Forwarding the guarantees of the caller.
        unsafe { System.alloc_zeroed(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        // SAFETY: Forwarding the guarantees of the caller.
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static ALLOCATOR: FailingAllocator = FailingAllocator;

const BLOCK_SIZE: usize = 4096;
const BLOCK_COUNT: usize = 1000;
const ARENA_SIZE: usize = BLOCK_SIZE * BLOCK_COUNT;

#[test]
fn arena_allocation_failure() {
    fail_sizes(ARENA_SIZE..ARENA_SIZE + 1);
    let result = BlockPool::new(BLOCK_SIZE, BLOCK_COUNT);
    fail_sizes(0..0);

    let error = result.unwrap_err();
    assert!(matches!(error, Error::OutOfMemory { bytes: ARENA_SIZE }));
    assert_eq!(error.kind(), ErrorKind::Resource);
    assert!(error.kind().is_retryable());
}

#[test]
fn bookkeeping_allocation_failure() {
    // Everything from one byte per block up to just below the arena size, which covers the
    // side table of per-block entries but lets the arena itself through.
    fail_sizes(BLOCK_COUNT..ARENA_SIZE);
    let result = BlockPool::new(BLOCK_SIZE, BLOCK_COUNT);
    fail_sizes(0..0);

    let error = result.unwrap_err();
    assert!(matches!(error, Error::OutOfMemory { bytes } if bytes >= BLOCK_COUNT));
    assert_eq!(error.kind(), ErrorKind::Resource);
}

#[test]
fn creation_succeeds_once_memory_is_available() {
    fail_sizes(ARENA_SIZE..ARENA_SIZE + 1);
    assert!(BlockPool::new(BLOCK_SIZE, BLOCK_COUNT).is_err());
    fail_sizes(0..0);

    let mut pool = BlockPool::new(BLOCK_SIZE, BLOCK_COUNT).unwrap();
    let block = pool.allocate().unwrap();
    pool.deallocate(block).unwrap();
    assert_eq!(pool.stats().blocks_free(), BLOCK_COUNT);
}
