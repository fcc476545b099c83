//! Cache performance metrics.

use crate::config::CacheVariant;

/// Point-in-time snapshot of cache counters.
///
/// `hits`, `misses`, `inserts`, `updates`, `evictions` and `removals` only count
/// events observed while diagnostics were enabled. `tile_count` and
/// `memory_used` are always exact.
///
/// # Example
///
/// ```
/// use tile_cache::{Raster, TileCache};
///
/// let cache: TileCache<Raster> = TileCache::new(1024 * 1024).expect("valid capacity");
/// cache.enable_diagnostics();
/// // ... perform cache operations ...
///
/// let metrics = cache.metrics();
/// println!("Hit rate: {:.2}%", metrics.hit_rate() * 100.0);
/// println!("Utilization: {:.2}%", metrics.utilization() * 100.0);
/// println!("Evictions: {}", metrics.evictions);
/// ```
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetrics {
	/// Which store assembly produced this snapshot.
	pub variant: CacheVariant,
	/// Whether diagnostics were enabled when the snapshot was taken.
	pub diagnostics_enabled: bool,
	/// Successful lookups.
	pub hits: u64,
	/// Lookups that found nothing.
	pub misses: u64,
	/// Inserts under a previously empty key.
	pub inserts: u64,
	/// Inserts that replaced an existing tile.
	pub updates: u64,
	/// Entries removed by the eviction engine.
	pub evictions: u64,
	/// Entries removed by `remove`, `remove_tiles` or `flush`.
	pub removals: u64,
	/// Number of cached tiles.
	pub tile_count: usize,
	/// Accounted bytes of all cached tiles.
	pub memory_used: usize,
	/// Memory capacity in bytes.
	pub capacity: usize,
	/// Fill ratio eviction reduces usage to.
	pub threshold: f64,
}

impl CacheMetrics {
	/// Hit rate as a ratio between 0.0 and 1.0, or 0.0 without any lookups.
	pub fn hit_rate(&self) -> f64 {
		let total = self.hits + self.misses;
		if total == 0 {
			0.0
		} else {
			self.hits as f64 / total as f64
		}
	}

	/// Fraction of the capacity currently in use.
	pub fn utilization(&self) -> f64 {
		if self.capacity == 0 {
			0.0
		} else {
			self.memory_used as f64 / self.capacity as f64
		}
	}

	pub fn total_accesses(&self) -> u64 {
		self.hits + self.misses
	}

	pub fn total_writes(&self) -> u64 {
		self.inserts + self.updates
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn snapshot(hits: u64, misses: u64, memory_used: usize, capacity: usize) -> CacheMetrics {
		CacheMetrics {
			variant: CacheVariant::Sharded,
			diagnostics_enabled: true,
			hits,
			misses,
			inserts: 4,
			updates: 1,
			evictions: 0,
			removals: 0,
			tile_count: 4,
			memory_used,
			capacity,
			threshold: 0.75,
		}
	}

	#[test]
	fn test_hit_rate() {
		assert_eq!(snapshot(0, 0, 0, 100).hit_rate(), 0.0);
		assert_eq!(snapshot(3, 1, 0, 100).hit_rate(), 0.75);
		assert_eq!(snapshot(3, 1, 0, 100).total_accesses(), 4);
	}

	#[test]
	fn test_utilization() {
		assert_eq!(snapshot(0, 0, 50, 200).utilization(), 0.25);
		assert_eq!(snapshot(0, 0, 50, 200).total_writes(), 5);
	}
}
