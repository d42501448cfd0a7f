//! Integration tests for the `block_pool` package.
//!
//! These exercise the public API the way an application would: creating pools, running
//! allocation sequences against them and checking that misuse is reported without
//! damaging the pool.

use std::collections::HashSet;

use block_pool::{Block, BlockPool, Error, ErrorKind};

fn assert_counts(pool: &BlockPool, used: usize, free: usize) {
    let stats = pool.stats();
    assert_eq!(stats.blocks_used(), used, "blocks used");
    assert_eq!(stats.blocks_free(), free, "blocks free");
}

#[test]
fn end_to_end_scenario() {
    let mut pool = BlockPool::new(48, 5).unwrap();
    assert_counts(&pool, 0, 5);

    let _data1 = pool.allocate().unwrap();
    let data2 = pool.allocate().unwrap();
    let _data3 = pool.allocate().unwrap();
    assert_counts(&pool, 3, 2);

    pool.deallocate(data2).unwrap();
    assert_counts(&pool, 2, 3);

    assert!(matches!(
        pool.deallocate(data2),
        Err(Error::DoubleFree { .. })
    ));
    assert_counts(&pool, 2, 3);

    let data4 = pool.allocate().unwrap();
    assert_eq!(data4.ptr(), data2.ptr());
    assert_counts(&pool, 3, 2);

    let _data5 = pool.allocate().unwrap();
    let _data6 = pool.allocate().unwrap();
    assert_counts(&pool, 5, 0);

    let error = pool.allocate().unwrap_err();
    assert!(matches!(error, Error::PoolExhausted { block_count: 5 }));
    assert!(error.kind().is_retryable());

    pool.destroy();
}

#[test]
fn end_to_end_scenario_with_raw_pointers() {
    let mut pool = BlockPool::new(48, 5).unwrap();

    let ptrs: Vec<*mut u8> = (0..3)
        .map(|_| pool.allocate().unwrap().ptr().as_ptr())
        .collect();

    pool.deallocate_ptr(ptrs[1]).unwrap();
    assert!(matches!(
        pool.deallocate_ptr(ptrs[1]),
        Err(Error::DoubleFree { index: 1 })
    ));
    assert_counts(&pool, 2, 3);

    assert_eq!(pool.allocate().unwrap().ptr().as_ptr(), ptrs[1]);
}

#[test]
fn every_valid_configuration_starts_empty() {
    for block_size in [16, 17, 24, 48, 100, 4096] {
        for block_count in [1, 2, 5, 64] {
            let pool = BlockPool::new(block_size, block_count).unwrap();

            assert_counts(&pool, 0, block_count);
            assert!(pool.block_size() >= block_size);
            assert_eq!(pool.block_size() % size_of::<usize>(), 0);
        }
    }
}

#[test]
fn zero_blocks_is_always_rejected() {
    for block_size in [0, 1, 16, 48, 4096] {
        let error = BlockPool::new(block_size, 0).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Config);
    }
}

#[test]
fn fill_and_drain_repeatedly() {
    let mut pool = BlockPool::new(32, 16).unwrap();

    for _ in 0..4 {
        let blocks: Vec<Block> = (0..16).map(|_| pool.allocate().unwrap()).collect();

        assert!(pool.is_full());
        assert!(matches!(
            pool.allocate(),
            Err(Error::PoolExhausted { .. })
        ));
        assert!((pool.stats().utilization_percent() - 100.0).abs() < f64::EPSILON);

        for block in blocks {
            pool.deallocate(block).unwrap();
        }

        assert!(pool.is_empty());
    }
}

#[test]
fn lifo_reuse_order() {
    let mut pool = BlockPool::new(64, 3).unwrap();

    let a = pool.allocate().unwrap();
    let b = pool.allocate().unwrap();
    let _c = pool.allocate().unwrap();

    pool.deallocate(b).unwrap();
    pool.deallocate(a).unwrap();

    assert_eq!(pool.allocate().unwrap().ptr(), a.ptr());
    assert_eq!(pool.allocate().unwrap().ptr(), b.ptr());
}

#[test]
fn rejected_calls_leave_pool_usable() {
    let mut pool = BlockPool::new(32, 4).unwrap();

    let a = pool.allocate().unwrap();
    let b = pool.allocate().unwrap();
    pool.deallocate(a).unwrap();

    let mut local = [0_u8; 64];

    let attempts = [
        pool.deallocate_ptr(std::ptr::null_mut()),
        pool.deallocate_ptr(local.as_mut_ptr()),
        pool.deallocate_ptr(b.ptr().as_ptr().wrapping_add(4)),
        pool.deallocate(a),
    ];

    for attempt in attempts {
        assert_eq!(attempt.unwrap_err().kind(), ErrorKind::Misuse);
    }

    assert_counts(&pool, 1, 3);

    // LIFO order survived all of the rejected calls.
    assert_eq!(pool.allocate().unwrap().ptr(), a.ptr());
    pool.deallocate(b).unwrap();
}

#[test]
fn one_past_the_end_is_foreign() {
    let mut pool = BlockPool::new(32, 2).unwrap();

    let first = pool.allocate().unwrap();
    let end = first
        .ptr()
        .as_ptr()
        .wrapping_add(pool.block_size() * pool.block_count());

    assert!(matches!(
        pool.deallocate_ptr(end),
        Err(Error::ForeignPointer { .. })
    ));
}

#[test]
fn block_contents_are_independent() {
    let mut pool = BlockPool::new(48, 5).unwrap();

    let blocks: Vec<Block> = (0..5).map(|_| pool.allocate().unwrap()).collect();

    // SAFETY: The blocks are only ever written as whole bytes, so every byte is initialized.
    unsafe {
        for (value, block) in (1_u8..).zip(&blocks) {
            pool.bytes_mut(*block).unwrap().fill(value);
        }

        for (value, block) in (1_u8..).zip(&blocks) {
            assert!(pool.bytes(*block).unwrap().iter().all(|b| *b == value));
        }
    }
}

#[test]
fn unique_addresses_across_interleaved_use() {
    let mut pool = BlockPool::new(24, 10).unwrap();
    let mut live: Vec<Block> = Vec::new();

    // Pseudo-random but deterministic interleaving using a small linear congruential sequence.
    let mut state: u32 = 12345;

    for _ in 0..1000 {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);

        if state % 2 == 0 && !live.is_empty() {
            let index = usize::try_from(state / 2).unwrap() % live.len();
            let block = live.swap_remove(index);
            pool.deallocate(block).unwrap();
        } else {
            match pool.allocate() {
                Ok(block) => live.push(block),
                Err(Error::PoolExhausted { .. }) => assert_eq!(live.len(), 10),
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        let addresses: HashSet<_> = live.iter().map(Block::ptr).collect();
        assert_eq!(addresses.len(), live.len());
        assert_eq!(pool.len(), live.len());
    }
}

#[test]
fn typed_values_through_pointers() {
    #[derive(Clone, Copy, Debug, PartialEq)]
    struct TestData {
        id: i32,
        name: [u8; 32],
        value: f64,
    }

    let mut pool = BlockPool::builder()
        .layout_of::<TestData>()
        .block_count(3)
        .build()
        .unwrap();

    let block = pool.allocate().unwrap();
    let data = block.ptr().cast::<TestData>();

    let mut name = [0_u8; 32];
    name[..5].copy_from_slice(b"First");

    let original = TestData {
        id: 1,
        name,
        value: 2.5,
    };

    // SAFETY: The pool was built for the layout of TestData and the block is allocated.
    unsafe {
        data.write(original);
    }

    // SAFETY: We just initialized the value and the block is still allocated.
    let read_back = unsafe { data.read() };
    assert_eq!(read_back, original);

    pool.deallocate(block).unwrap();
}
