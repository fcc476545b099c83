use std::sync::Arc;

use crate::cache::TileCache;
use crate::config::{CacheConfig, CacheVariant};
use crate::diagnostics::TileObserver;
use crate::error::Result;
use crate::tile::TilePayload;

/// Builder for configuring a [`TileCache`].
///
/// # Example
///
/// ```
/// use tile_cache::{CacheBuilder, CacheVariant, Raster};
///
/// let cache = CacheBuilder::<Raster>::new(256 * 1024 * 1024) // 256 MB
///     .threshold(0.6)
///     .variant(CacheVariant::Sharded)
///     .shards(128)
///     .build()
///     .expect("valid configuration");
/// assert_eq!(cache.memory_threshold(), 0.6);
/// ```
pub struct CacheBuilder<T> {
	config: CacheConfig,
	observers: Vec<Arc<dyn TileObserver<T>>>,
}

impl<T: TilePayload> CacheBuilder<T> {
	/// Create a new builder with the given capacity in bytes.
	pub fn new(capacity: usize) -> Self {
		Self::from_config(CacheConfig {
			capacity,
			..CacheConfig::default()
		})
	}

	/// Start from an existing configuration.
	pub fn from_config(config: CacheConfig) -> Self {
		Self {
			config,
			observers: Vec::new(),
		}
	}

	/// Set the capacity in bytes.
	pub fn capacity(mut self, capacity: usize) -> Self {
		self.config.capacity = capacity;
		self
	}

	/// Set the fill ratio eviction reduces usage to, within `[0.0, 1.0]`.
	///
	/// Default: 0.75
	pub fn threshold(mut self, threshold: f64) -> Self {
		self.config.threshold = threshold;
		self
	}

	/// Choose the store assembly.
	///
	/// Default: [`CacheVariant::Sharded`]
	pub fn variant(mut self, variant: CacheVariant) -> Self {
		self.config.variant = variant;
		self
	}

	/// Set the number of shards of the sharded variant.
	///
	/// Rounded down to a power of two, and reduced so every shard covers at
	/// least 4 KiB of capacity.
	///
	/// Default: 64 shards
	pub fn shards(mut self, count: usize) -> Self {
		self.config.shards = count;
		self
	}

	/// Start with diagnostics enabled.
	pub fn diagnostics(mut self, enabled: bool) -> Self {
		self.config.diagnostics = enabled;
		self
	}

	/// Refresh access times on hits in the sharded variant.
	///
	/// Turning this off makes hits cheaper, and victims then fall back to
	/// insertion order among tiles of equal cost.
	pub fn track_recency(mut self, enabled: bool) -> Self {
		self.config.track_recency = enabled;
		self
	}

	/// Set the fixed bytes charged per entry on top of its sample data.
	pub fn entry_overhead(mut self, bytes: usize) -> Self {
		self.config.entry_overhead = bytes;
		self
	}

	/// Register an observer for tile lifecycle events. Observers are only called
	/// while diagnostics are enabled.
	pub fn observer(mut self, observer: Arc<dyn TileObserver<T>>) -> Self {
		self.observers.push(observer);
		self
	}

	pub fn config(&self) -> &CacheConfig {
		&self.config
	}

	/// Validate the settings and build the cache.
	pub fn build(self) -> Result<TileCache<T>> {
		TileCache::with_observers(self.config, self.observers)
	}
}

impl<T: TilePayload> Default for CacheBuilder<T> {
	fn default() -> Self {
		Self::from_config(CacheConfig::default())
	}
}
