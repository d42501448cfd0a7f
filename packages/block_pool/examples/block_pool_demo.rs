//! Walkthrough of the `block_pool` crate:
//!
//! * Creating a pool sized for a specific type.
//! * Allocating blocks and storing values in them.
//! * Releasing a block and having a double release rejected.
//! * Reusing released memory.
//! * Exhausting the pool.
//!
//! The pool's own debug and warn events are printed next to the narration.

use std::ptr::NonNull;

use block_pool::{Block, BlockPool, Error};
use tracing::Level;

#[derive(Debug)]
struct TestData {
    id: i32,
    name: [u8; 32],
    value: f64,
}

impl TestData {
    fn new(id: i32, name: &str, value: f64) -> Self {
        // Longer names are truncated, the remainder stays zero-padded.
        let mut name_bytes = [0_u8; 32];
        for (slot, byte) in name_bytes.iter_mut().zip(name.bytes()) {
            *slot = byte;
        }

        Self {
            id,
            name: name_bytes,
            value,
        }
    }

    fn name(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.name.len());

        std::str::from_utf8(self.name.get(..end).unwrap_or_default()).unwrap_or("<invalid>")
    }
}

fn store(block: Block, data: TestData) -> NonNull<TestData> {
    let ptr = block.ptr().cast::<TestData>();

    // SAFETY: The pool is built for the layout of TestData and the block stays allocated
    // for as long as we use the pointer.
    unsafe {
        ptr.write(data);
    }

    ptr
}

fn describe(label: &str, ptr: NonNull<TestData>) {
    // SAFETY: Only called with pointers returned by store() whose blocks are still allocated.
    let data = unsafe { ptr.as_ref() };

    println!(
        "{label}: id={}, name={}, value={:.2}",
        data.id,
        data.name(),
        data.value
    );
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().with_max_level(Level::DEBUG).init();

    println!("Block pool demo");
    println!();

    let mut pool = BlockPool::builder()
        .layout_of::<TestData>()
        .block_count(5)
        .build()?;

    println!("{}", pool.stats());

    let data1 = pool.allocate()?;
    let data2 = pool.allocate()?;
    let data3 = pool.allocate()?;

    let first = store(data1, TestData::new(1, "First", 3.25));
    let second = store(data2, TestData::new(2, "Second", 2.75));
    let third = store(data3, TestData::new(3, "Third", 1.5));

    println!();
    println!("Allocated 3 blocks:");
    describe("Data1", first);
    describe("Data2", second);
    describe("Data3", third);
    println!();
    println!("{}", pool.stats());

    println!();
    println!("Freeing data2...");
    pool.deallocate(data2)?;
    println!("{}", pool.stats());

    println!();
    println!("Attempting double-free...");
    match pool.deallocate(data2) {
        Err(error) => println!("Rejected: {error}"),
        Ok(()) => println!("Unexpectedly accepted a double free"),
    }

    println!();
    println!("Allocating new block (reuses freed memory)...");
    let data4 = pool.allocate()?;
    println!("Reused the memory of data2: {}", data4.ptr() == data2.ptr());
    let fourth = store(data4, TestData::new(4, "Fourth", 0.5));
    describe("Data4", fourth);
    println!("{}", pool.stats());

    println!();
    println!("Allocating remaining blocks...");
    let _data5 = pool.allocate()?;
    let _data6 = pool.allocate()?;

    match pool.allocate() {
        Err(error) => println!("Rejected: {error}"),
        Ok(_) => println!("Unexpectedly allocated beyond capacity"),
    }

    println!("{}", pool.stats());

    pool.destroy();
    println!();
    println!("Pool destroyed successfully!");

    Ok(())
}
