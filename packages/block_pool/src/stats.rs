use std::fmt;
use std::num::NonZero;

/// A snapshot of the occupancy of a [`BlockPool`][crate::BlockPool].
///
/// Obtained from [`BlockPool::stats()`][crate::BlockPool::stats]. The snapshot does not change
/// when the pool is modified afterwards.
///
/// The [`Display`][fmt::Display] implementation renders a multi-line human-readable report.
///
/// # Examples
///
/// ```
/// use block_pool::BlockPool;
///
/// let mut pool = BlockPool::new(48, 4)?;
/// pool.allocate()?;
///
/// let stats = pool.stats();
/// assert_eq!(stats.blocks_used(), 1);
/// assert_eq!(stats.blocks_free(), 3);
/// assert!((stats.utilization_percent() - 25.0).abs() < f64::EPSILON);
/// # Ok::<(), block_pool::Error>(())
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PoolStats {
    block_size: usize,
    block_count: NonZero<usize>,
    blocks_used: usize,
}

impl PoolStats {
    #[must_use]
    pub(crate) fn new(block_size: usize, block_count: NonZero<usize>, blocks_used: usize) -> Self {
        debug_assert!(blocks_used <= block_count.get());

        Self {
            block_size,
            block_count,
            blocks_used,
        }
    }

    /// Size of each block in bytes, after rounding up to the pool alignment.
    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of blocks in the pool.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.block_count.get()
    }

    /// Number of blocks currently allocated.
    #[must_use]
    pub fn blocks_used(&self) -> usize {
        self.blocks_used
    }

    /// Number of blocks available for allocation.
    #[must_use]
    pub fn blocks_free(&self) -> usize {
        // Cannot underflow, a pool never hands out more blocks than it has.
        self.block_count.get().wrapping_sub(self.blocks_used)
    }

    /// Share of blocks in use, from `0.0` to `100.0`.
    #[must_use]
    #[expect(
        clippy::cast_precision_loss,
        reason = "block counts large enough to lose precision are far beyond any practical pool"
    )]
    pub fn utilization_percent(&self) -> f64 {
        100.0 * self.blocks_used as f64 / self.block_count.get() as f64
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Block Pool Statistics ===")?;
        writeln!(f, "Block size: {} bytes", self.block_size)?;
        writeln!(f, "Total blocks: {}", self.block_count)?;
        writeln!(f, "Blocks used: {}", self.blocks_used)?;
        writeln!(f, "Blocks free: {}", self.blocks_free())?;
        writeln!(f, "Memory usage: {:.2}%", self.utilization_percent())?;
        write!(f, "=============================")
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use new_zealand::nz;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(PoolStats: Send, Sync, Copy, fmt::Debug, fmt::Display);

    #[test]
    fn empty_pool() {
        let stats = PoolStats::new(48, nz!(5), 0);

        assert_eq!(stats.block_size(), 48);
        assert_eq!(stats.block_count(), 5);
        assert_eq!(stats.blocks_used(), 0);
        assert_eq!(stats.blocks_free(), 5);
        assert!(stats.utilization_percent().abs() < f64::EPSILON);
    }

    #[test]
    fn full_pool() {
        let stats = PoolStats::new(48, nz!(5), 5);

        assert_eq!(stats.blocks_free(), 0);
        assert!((stats.utilization_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn partial_pool() {
        let stats = PoolStats::new(16, nz!(8), 3);

        assert_eq!(stats.blocks_free(), 5);
        assert!((stats.utilization_percent() - 37.5).abs() < f64::EPSILON);
    }

    #[test]
    fn display_report() {
        let stats = PoolStats::new(48, nz!(5), 3);

        let report = stats.to_string();

        assert!(report.contains("Block size: 48 bytes"));
        assert!(report.contains("Total blocks: 5"));
        assert!(report.contains("Blocks used: 3"));
        assert!(report.contains("Blocks free: 2"));
        assert!(report.contains("Memory usage: 60.00%"));
    }
}
