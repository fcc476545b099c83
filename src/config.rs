//! Cache configuration and validation.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};

/// Default memory capacity: 64 MiB.
pub const DEFAULT_MEMORY_CAPACITY: usize = 64 * 1024 * 1024;

/// Default fill ratio eviction reduces usage to.
pub const DEFAULT_MEMORY_THRESHOLD: f64 = 0.75;

/// Bytes charged per entry on top of its sample data.
///
/// Covers the entry struct, its slot in the store and in the per-image index,
/// and the payload's `Arc` header.
pub const DEFAULT_ENTRY_OVERHEAD: usize = 256;

/// Default number of shards for large caches.
pub const DEFAULT_SHARD_COUNT: usize = 64;

/// Minimum capacity per shard in bytes.
///
/// Small caches get fewer shards so sampling does not spread a handful of
/// entries over mostly empty partitions.
const MIN_SHARD_SIZE: usize = 4096;

/// Store assembly behind a [`TileCache`](crate::TileCache).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CacheVariant {
	/// One global lock, explicit recency list, exact victim order.
	Linked,
	/// Per-shard locks, multimap image index, sampled victim search.
	#[default]
	Sharded,
}

/// Settings a cache is constructed with.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheConfig {
	/// Memory capacity in bytes.
	pub capacity: usize,
	/// Fill ratio in `[0.0, 1.0]` eviction reduces usage to.
	pub threshold: f64,
	/// Store assembly.
	pub variant: CacheVariant,
	/// Requested shard count (sharded variant only). Rounded to a power of two
	/// and reduced for small capacities.
	pub shards: usize,
	/// Start with diagnostics enabled.
	pub diagnostics: bool,
	/// Refresh an entry's access time on every hit (sharded variant; the linked
	/// variant always tracks recency).
	pub track_recency: bool,
	/// Fixed bookkeeping bytes charged per entry.
	pub entry_overhead: usize,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			capacity: DEFAULT_MEMORY_CAPACITY,
			threshold: DEFAULT_MEMORY_THRESHOLD,
			variant: CacheVariant::default(),
			shards: DEFAULT_SHARD_COUNT,
			diagnostics: false,
			track_recency: true,
			entry_overhead: DEFAULT_ENTRY_OVERHEAD,
		}
	}
}

impl CacheConfig {
	/// Check every setting, reporting the first invalid one.
	pub fn validate(&self) -> Result<()> {
		validate_capacity(self.capacity)?;
		validate_threshold(self.threshold)?;
		if self.shards == 0 {
			return Err(CacheError::InvalidShardCount(self.shards));
		}
		if self.entry_overhead == 0 {
			return Err(CacheError::InvalidEntryOverhead);
		}
		Ok(())
	}

	/// Shard count actually used for this configuration.
	pub fn effective_shards(&self) -> usize {
		compute_shard_count(self.capacity, self.shards)
	}
}

pub(crate) fn validate_capacity(capacity: usize) -> Result<()> {
	if capacity == 0 {
		return Err(CacheError::InvalidCapacity(capacity));
	}
	Ok(())
}

pub(crate) fn validate_threshold(threshold: f64) -> Result<()> {
	if !(0.0..=1.0).contains(&threshold) {
		return Err(CacheError::InvalidThreshold(threshold));
	}
	Ok(())
}

/// Largest power-of-two shard count not above `desired` that keeps at least
/// `MIN_SHARD_SIZE` bytes per shard.
fn compute_shard_count(capacity: usize, desired_shards: usize) -> usize {
	let max_shards = (capacity / MIN_SHARD_SIZE).max(1);
	let shards = desired_shards.min(max_shards).max(1);
	if shards.is_power_of_two() {
		shards
	} else {
		shards.next_power_of_two() / 2
	}
}
