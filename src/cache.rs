use std::sync::Arc;

use crate::builder::CacheBuilder;
use crate::config::{CacheConfig, CacheVariant};
use crate::diagnostics::TileObserver;
use crate::entry::TileEntry;
use crate::error::{CacheError, Result};
use crate::key::{ImageId, TileCoord};
use crate::linked::LinkedTileCache;
use crate::metrics::CacheMetrics;
use crate::sharded::ShardedTileCache;
use crate::tile::{TileOwner, TilePayload};

/// Run `$body` with `$inner` bound to whichever variant `$self` holds.
macro_rules! dispatch {
	($self:expr, $inner:ident => $body:expr) => {
		match $self {
			TileCache::Linked($inner) => $body,
			TileCache::Sharded($inner) => $body,
		}
	};
}

/// Thread-safe, memory-bounded tile cache. Share it across threads via
/// `Arc<TileCache<T>>`.
///
/// Both variants implement the same contract and differ only in how victims are
/// found; see [`CacheVariant`].
///
/// All methods are synchronous. Lookups hand out `Arc`s and hold no lock once
/// they return, so results may be kept across `.await` points.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tile_cache::{ImageId, Raster, SampleType, TileCache, TileOwner};
///
/// struct Image(ImageId);
///
/// impl TileOwner for Image {
///     fn image_id(&self) -> &ImageId {
///         &self.0
///     }
/// }
///
/// let cache: TileCache<Raster> = TileCache::new(1024 * 1024).expect("valid capacity");
/// let image = Arc::new(Image(ImageId::unique()));
///
/// cache.add(&image, 0, 0, Raster::new(SampleType::U8, 64 * 64, 3), None);
/// assert!(cache.get_tile(image.image_id(), 0, 0).is_some());
/// ```
pub enum TileCache<T> {
	Linked(LinkedTileCache<T>),
	Sharded(ShardedTileCache<T>),
}

impl<T: TilePayload> TileCache<T> {
	/// Create a cache with the given capacity in bytes and default settings.
	pub fn new(capacity: usize) -> Result<Self> {
		CacheBuilder::new(capacity).build()
	}

	/// Start configuring a cache with the given capacity in bytes.
	pub fn builder(capacity: usize) -> CacheBuilder<T> {
		CacheBuilder::new(capacity)
	}

	/// Create a cache from a configuration, typically loaded by the process
	/// configuration layer.
	pub fn from_config(config: CacheConfig) -> Result<Self> {
		Self::with_observers(config, Vec::new())
	}

	pub(crate) fn with_observers(
		config: CacheConfig,
		observers: Vec<Arc<dyn TileObserver<T>>>,
	) -> Result<Self> {
		config.validate()?;
		Ok(match config.variant {
			CacheVariant::Linked => TileCache::Linked(LinkedTileCache::new(&config, observers)),
			CacheVariant::Sharded => TileCache::Sharded(ShardedTileCache::new(&config, observers)),
		})
	}

	/// Insert or replace the tile at `(x, y)` of `owner`.
	///
	/// `cost` is how expensive the tile is to recompute (larger is more
	/// expensive); cheaper tiles are evicted first. A negative cost is stored as
	/// `0.0`, the same rank as a tile without a cost. Evicts synchronously when the
	/// insert pushes usage over capacity. The inserted tile itself is kept even
	/// if it alone exceeds the capacity.
	pub fn add<O: TileOwner + 'static>(
		&self,
		owner: &Arc<O>,
		x: i32,
		y: i32,
		tile: impl Into<Arc<T>>,
		cost: Option<f64>,
	) {
		let coord = TileCoord::new(x, y);
		dispatch!(self, cache => cache.add(owner, coord, tile.into(), cost))
	}

	/// Insert one tile per point for `owner`.
	///
	/// `tiles` and, when given, `costs` must match `points` in length; a mismatch
	/// is rejected before anything is inserted.
	pub fn add_tiles<O, I>(
		&self,
		owner: &Arc<O>,
		points: &[TileCoord],
		tiles: I,
		costs: Option<&[f64]>,
	) -> Result<()>
	where
		O: TileOwner + 'static,
		I: IntoIterator,
		I::Item: Into<Arc<T>>,
	{
		let tiles: Vec<Arc<T>> = tiles.into_iter().map(Into::into).collect();
		check_len("tiles", points.len(), tiles.len())?;
		if let Some(costs) = costs {
			check_len("costs", points.len(), costs.len())?;
		}
		let items: Vec<_> = points
			.iter()
			.zip(tiles)
			.enumerate()
			.map(|(i, (coord, tile))| (*coord, tile, costs.map(|c| c[i])))
			.collect();
		dispatch!(self, cache => cache.add_batch(owner, items));
		Ok(())
	}

	/// Look up one tile. Counts a hit or miss and refreshes the access time.
	pub fn get_tile(&self, image: &ImageId, x: i32, y: i32) -> Option<Arc<T>> {
		dispatch!(self, cache => cache.get_tile(image, x, y))
	}

	/// Like [`get_tile`](Self::get_tile), but returns the entry with its metadata.
	pub fn get_cached_tile(&self, image: &ImageId, x: i32, y: i32) -> Option<Arc<TileEntry<T>>> {
		dispatch!(self, cache => cache.get_cached_tile(image, x, y))
	}

	/// Snapshot of every cached tile of `image`, in no particular order.
	pub fn get_tiles(&self, image: &ImageId) -> Vec<Arc<T>> {
		dispatch!(self, cache => cache.get_tiles(image))
	}

	/// One lookup per point, in input order.
	pub fn get_tiles_at(&self, image: &ImageId, points: &[TileCoord]) -> Vec<Option<Arc<T>>> {
		dispatch!(self, cache => cache.get_tiles_at(image, points))
	}

	/// Snapshot of every entry in the cache.
	pub fn cached_tiles(&self) -> Vec<Arc<TileEntry<T>>> {
		dispatch!(self, cache => cache.cached_tiles())
	}

	/// Presence check that touches neither counters nor recency.
	pub fn contains(&self, image: &ImageId, x: i32, y: i32) -> bool {
		dispatch!(self, cache => cache.contains(image, x, y))
	}

	/// Remove one tile, returning it if it was cached.
	pub fn remove(&self, image: &ImageId, x: i32, y: i32) -> Option<Arc<T>> {
		dispatch!(self, cache => cache.remove(image, x, y))
	}

	/// Remove every tile of `image`. Returns how many were removed.
	pub fn remove_tiles(&self, image: &ImageId) -> usize {
		dispatch!(self, cache => cache.remove_tiles(image))
	}

	/// Remove everything. Capacity, threshold and the diagnostics switch are kept.
	pub fn flush(&self) {
		dispatch!(self, cache => cache.flush())
	}

	/// Evict toward `capacity * threshold` now.
	pub fn memory_control(&self) {
		dispatch!(self, cache => cache.memory_control())
	}

	/// Change the capacity, evicting before returning if usage exceeds it.
	pub fn set_memory_capacity(&self, capacity: usize) -> Result<()> {
		dispatch!(self, cache => cache.set_memory_capacity(capacity))
	}

	pub fn memory_capacity(&self) -> usize {
		dispatch!(self, cache => cache.shared().capacity())
	}

	/// Change the fill ratio eviction reduces usage to. Does not evict by itself.
	pub fn set_memory_threshold(&self, threshold: f64) -> Result<()> {
		dispatch!(self, cache => cache.set_memory_threshold(threshold))
	}

	pub fn memory_threshold(&self) -> f64 {
		dispatch!(self, cache => cache.shared().threshold())
	}

	pub fn enable_diagnostics(&self) {
		dispatch!(self, cache => cache.shared().diagnostics.enable())
	}

	/// Stop counting. Counts recorded so far are kept.
	pub fn disable_diagnostics(&self) {
		dispatch!(self, cache => cache.shared().diagnostics.disable())
	}

	/// Zero the hit, miss and write counters.
	pub fn reset_diagnostics(&self) {
		dispatch!(self, cache => cache.shared().diagnostics.reset())
	}

	pub fn diagnostics_enabled(&self) -> bool {
		dispatch!(self, cache => cache.shared().diagnostics.is_enabled())
	}

	pub fn cache_hit_count(&self) -> u64 {
		dispatch!(self, cache => cache.shared().diagnostics.hits())
	}

	pub fn cache_miss_count(&self) -> u64 {
		dispatch!(self, cache => cache.shared().diagnostics.misses())
	}

	pub fn cache_tile_count(&self) -> usize {
		dispatch!(self, cache => cache.shared().tile_count())
	}

	pub fn cache_memory_used(&self) -> usize {
		dispatch!(self, cache => cache.shared().memory_used())
	}

	pub fn metrics(&self) -> CacheMetrics {
		dispatch!(self, cache => cache.metrics())
	}

	pub fn variant(&self) -> CacheVariant {
		match self {
			TileCache::Linked(_) => CacheVariant::Linked,
			TileCache::Sharded(_) => CacheVariant::Sharded,
		}
	}
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> Result<()> {
	if expected != actual {
		return Err(CacheError::LengthMismatch {
			what,
			expected,
			actual,
		});
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entry::tests::TestImage;
	use crate::tile::{Raster, SampleType};

	fn both(capacity: usize) -> Vec<TileCache<Raster>> {
		[CacheVariant::Linked, CacheVariant::Sharded]
			.into_iter()
			.map(|variant| {
				TileCache::builder(capacity).variant(variant).build().expect("valid configuration")
			})
			.collect()
	}

	fn raster(bytes: usize) -> Raster {
		Raster::new(SampleType::U8, bytes, 1)
	}

	#[test]
	fn test_cache_is_send_sync() {
		fn assert_send<T: Send>() {}
		fn assert_sync<T: Sync>() {}

		assert_send::<TileCache<Raster>>();
		assert_sync::<TileCache<Raster>>();
	}

	#[test]
	fn test_variant_selection() {
		let caches = both(1024 * 1024);
		assert_eq!(caches[0].variant(), CacheVariant::Linked);
		assert_eq!(caches[1].variant(), CacheVariant::Sharded);
		assert_eq!(
			TileCache::<Raster>::new(1024).expect("valid capacity").variant(),
			CacheVariant::Sharded
		);
	}

	#[test]
	fn test_invalid_config_rejected() {
		assert_eq!(TileCache::<Raster>::new(0).err(), Some(CacheError::InvalidCapacity(0)));
		let config = CacheConfig {
			threshold: 1.5,
			..CacheConfig::default()
		};
		assert!(matches!(
			TileCache::<Raster>::from_config(config),
			Err(CacheError::InvalidThreshold(_))
		));
	}

	#[test]
	fn test_add_tiles_length_mismatch() {
		for cache in both(1024 * 1024) {
			let owner = Arc::new(TestImage(ImageId::hashed(1)));
			let points = [TileCoord::new(0, 0), TileCoord::new(1, 0)];

			let err = cache.add_tiles(&owner, &points, vec![raster(10)], None).unwrap_err();
			assert_eq!(
				err,
				CacheError::LengthMismatch {
					what: "tiles",
					expected: 2,
					actual: 1,
				}
			);

			let err = cache
				.add_tiles(&owner, &points, vec![raster(10), raster(10)], Some(&[1.0]))
				.unwrap_err();
			assert!(matches!(err, CacheError::LengthMismatch { what: "costs", .. }));
			assert_eq!(cache.cache_tile_count(), 0);
		}
	}

	#[test]
	fn test_add_tiles_and_batch_lookup() {
		for cache in both(1024 * 1024) {
			let owner = Arc::new(TestImage(ImageId::hashed(1)));
			let points: Vec<TileCoord> = (0..4).map(|x| TileCoord::new(x, 2)).collect();
			let tiles: Vec<Raster> = (0..4).map(|_| raster(100)).collect();

			cache
				.add_tiles(&owner, &points, tiles, Some(&[1.0, 2.0, 3.0, 4.0]))
				.expect("lengths match");

			let lookup = [TileCoord::new(3, 2), TileCoord::new(9, 9), TileCoord::new(0, 2)];
			let found = cache.get_tiles_at(owner.image_id(), &lookup);
			assert_eq!(found.iter().map(Option::is_some).collect::<Vec<_>>(), vec![true, false, true]);

			let entry = cache.get_cached_tile(owner.image_id(), 2, 2).expect("tile is cached");
			assert_eq!(entry.cost_metric(), Some(3.0));
			assert_eq!(cache.get_tiles(owner.image_id()).len(), 4);
		}
	}

	#[test]
	fn test_settings_round_trip() {
		for cache in both(1024 * 1024) {
			cache.set_memory_capacity(2048).expect("positive capacity");
			cache.set_memory_threshold(0.25).expect("threshold in range");
			assert_eq!(cache.memory_capacity(), 2048);
			assert_eq!(cache.memory_threshold(), 0.25);

			assert!(cache.set_memory_capacity(0).is_err());
			assert!(cache.set_memory_threshold(-1.0).is_err());
			assert_eq!(cache.memory_capacity(), 2048);
			assert_eq!(cache.memory_threshold(), 0.25);
		}
	}

	#[test]
	fn test_metrics_snapshot() {
		for cache in both(1024 * 1024) {
			let owner = Arc::new(TestImage(ImageId::hashed(1)));
			cache.enable_diagnostics();
			cache.add(&owner, 0, 0, raster(100), None);
			cache.get_tile(owner.image_id(), 0, 0);
			cache.get_tile(owner.image_id(), 1, 0);

			let metrics = cache.metrics();
			assert_eq!(metrics.variant, cache.variant());
			assert_eq!(metrics.hits, 1);
			assert_eq!(metrics.misses, 1);
			assert_eq!(metrics.inserts, 1);
			assert_eq!(metrics.tile_count, 1);
			assert_eq!(metrics.memory_used, cache.cache_memory_used());
			assert_eq!(metrics.hit_rate(), 0.5);
		}
	}
}
