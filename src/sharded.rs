//! Multimap-indexed, sharded tile cache.
//!
//! Tiles are partitioned over `RwLock<Shard>`s by key hash, and the per-image
//! index is partitioned over its own `RwLock<ImageIndex>`s by image hash. Hits
//! take a single shard read lock and refresh the entry's access time atomically,
//! so there is no global recency list to contend on.
//!
//! # Lock order
//!
//! An operation that needs both takes the image index lock first and the shard
//! lock second. At most one index lock and one shard lock are held at a time.
//! Eviction passes are serialized by a separate mutex that is always taken
//! before any index or shard lock.
//!
//! # Eviction
//!
//! A pass repeatedly samples a few shards (starting at a rotating cursor) and
//! evicts the lowest ranked entry it saw, so entries of dropped owners win any
//! sample they appear in. One victim costs O(`PROBE_SHARDS` × `SAMPLE_SIZE`)
//! whatever the size of the cache. Victims are picked under read locks and
//! removed only if they are still the entry stored under their key.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::config::{CacheConfig, CacheVariant};
use crate::diagnostics::TileObserver;
use crate::entry::{TileAction, TileEntry};
use crate::error::Result;
use crate::index::ImageIndex;
use crate::key::{ImageId, ImageKey, TileCoord, TileKey};
use crate::metrics::CacheMetrics;
use crate::policy::VictimRank;
use crate::shard::Shard;
use crate::shared::Shared;
use crate::tile::{TileOwner, TilePayload};

/// Entries inspected per shard when looking for a victim.
const SAMPLE_SIZE: usize = 8;

/// Non-empty shards sampled per victim.
const PROBE_SHARDS: usize = 4;

/// Consecutive lost races after which an eviction pass gives up.
const MAX_LOST_RACES: usize = 16;

/// Tile cache with per-shard locks and sampled victim search.
pub struct ShardedTileCache<T> {
	shards: Box<[RwLock<Shard<T>>]>,
	images: Box<[RwLock<ImageIndex>]>,
	shared: Shared<T>,
	/// Serializes eviction passes
	eviction: Mutex<()>,
	/// Shard the next victim search starts at
	cursor: AtomicUsize,
}

impl<T: TilePayload> ShardedTileCache<T> {
	/// Build from an already validated configuration.
	pub(crate) fn new(config: &CacheConfig, observers: Vec<Arc<dyn TileObserver<T>>>) -> Self {
		let shard_count = config.effective_shards();
		Self {
			shards: (0..shard_count).map(|_| RwLock::new(Shard::new())).collect(),
			images: (0..shard_count).map(|_| RwLock::new(ImageIndex::new())).collect(),
			shared: Shared::new(config, observers),
			eviction: Mutex::new(()),
			cursor: AtomicUsize::new(0),
		}
	}

	pub(crate) fn shared(&self) -> &Shared<T> {
		&self.shared
	}

	/// Number of partitions of the store.
	pub fn shard_count(&self) -> usize {
		self.shards.len()
	}

	pub fn add<O: TileOwner + 'static>(
		&self,
		owner: &Arc<O>,
		coord: TileCoord,
		tile: Arc<T>,
		cost: Option<f64>,
	) {
		let entry = self.make_entry(owner, coord, tile, cost);
		let replaced = {
			let mut images = self.index_for(entry.image_key()).write();
			self.insert_locked(&mut images, &entry)
		};
		let evicted = self.restore_bound(&entry);
		self.after_write(&entry, replaced.is_some());
		self.finish_removal(&evicted, TileAction::Evicted);
	}

	/// Insert a batch for one image under one index lock acquisition, then run a
	/// single eviction pass that protects the last tile of the batch.
	pub(crate) fn add_batch<O: TileOwner + 'static>(
		&self,
		owner: &Arc<O>,
		items: Vec<(TileCoord, Arc<T>, Option<f64>)>,
	) {
		let entries: Vec<_> = items
			.into_iter()
			.map(|(coord, tile, cost)| self.make_entry(owner, coord, tile, cost))
			.collect();
		let Some(last) = entries.last() else {
			return;
		};
		let replaced: Vec<bool> = {
			let mut images = self.index_for(last.image_key()).write();
			entries.iter().map(|entry| self.insert_locked(&mut images, entry).is_some()).collect()
		};
		let evicted = self.restore_bound(last);
		for (entry, replaced) in entries.iter().zip(replaced) {
			self.after_write(entry, replaced);
		}
		self.finish_removal(&evicted, TileAction::Evicted);
	}

	pub fn get_tile(&self, image: &ImageId, x: i32, y: i32) -> Option<Arc<T>> {
		self.get_cached_tile(image, x, y).map(|entry| Arc::clone(entry.tile()))
	}

	pub fn get_cached_tile(&self, image: &ImageId, x: i32, y: i32) -> Option<Arc<TileEntry<T>>> {
		let key = TileKey::new(image, x, y);
		let found = self.shard_for(&key).read().get(&key).cloned();
		match &found {
			Some(entry) => {
				if self.shared.track_recency {
					entry.touch(self.shared.clock.now());
				}
				self.shared.diagnostics.record_hit();
			}
			None => self.shared.diagnostics.record_miss(),
		}
		found
	}

	pub fn get_tiles(&self, image: &ImageId) -> Vec<Arc<T>> {
		let image_key = ImageKey::new(image);
		let images = self.index_for(&image_key).read();
		images
			.keys(&image_key)
			.iter()
			.filter_map(|key| {
				let shard = self.shard_for(key).read();
				shard.get(key).map(|entry| Arc::clone(entry.tile()))
			})
			.collect()
	}

	pub fn get_tiles_at(&self, image: &ImageId, points: &[TileCoord]) -> Vec<Option<Arc<T>>> {
		points.iter().map(|p| self.get_tile(image, p.x, p.y)).collect()
	}

	pub fn contains(&self, image: &ImageId, x: i32, y: i32) -> bool {
		let key = TileKey::new(image, x, y);
		self.shard_for(&key).read().contains(&key)
	}

	/// Every cached entry, grouped by shard.
	pub fn cached_tiles(&self) -> Vec<Arc<TileEntry<T>>> {
		let mut tiles = Vec::with_capacity(self.shared.tile_count());
		for shard in self.shards.iter() {
			tiles.extend(shard.read().entries().cloned());
		}
		tiles
	}

	pub fn remove(&self, image: &ImageId, x: i32, y: i32) -> Option<Arc<T>> {
		let key = TileKey::new(image, x, y);
		let image_key = ImageKey::new(image);
		let entry = {
			let mut images = self.index_for(&image_key).write();
			let entry = self.shard_for(&key).write().remove(&key)?;
			let indexed = images.remove(&image_key, &key);
			assert!(indexed, "image index out of sync with tile store");
			self.shared.account(None, Some(&*entry));
			entry
		};
		self.finish_removal(std::slice::from_ref(&entry), TileAction::Removed);
		Some(Arc::clone(entry.tile()))
	}

	pub fn remove_tiles(&self, image: &ImageId) -> usize {
		let image_key = ImageKey::new(image);
		let removed = {
			let mut images = self.index_for(&image_key).write();
			let keys = images.take(&image_key);
			self.remove_keys(&keys)
		};
		self.finish_removal(&removed, TileAction::Removed);
		debug!(image = %image, removed = removed.len(), "removed image tiles");
		removed.len()
	}

	pub fn flush(&self) {
		let mut removed = Vec::with_capacity(self.shared.tile_count());
		for index in self.images.iter() {
			let mut images = index.write();
			for (_, keys) in images.drain() {
				removed.extend(self.remove_keys(&keys));
			}
		}
		self.finish_removal(&removed, TileAction::Removed);
		debug!(removed = removed.len(), "flushed tile cache");
	}

	/// Evict toward `capacity * threshold` now.
	pub fn memory_control(&self) {
		let evicted = self.evict(None);
		self.finish_removal(&evicted, TileAction::Evicted);
	}

	pub fn set_memory_capacity(&self, capacity: usize) -> Result<()> {
		if self.shared.set_capacity(capacity)? {
			self.memory_control();
		}
		Ok(())
	}

	pub fn set_memory_threshold(&self, threshold: f64) -> Result<()> {
		self.shared.set_threshold(threshold)
	}

	pub fn metrics(&self) -> CacheMetrics {
		self.shared.metrics(CacheVariant::Sharded)
	}

	fn make_entry<O: TileOwner + 'static>(
		&self,
		owner: &Arc<O>,
		coord: TileCoord,
		tile: Arc<T>,
		cost: Option<f64>,
	) -> Arc<TileEntry<T>> {
		Arc::new(TileEntry::new(
			owner,
			coord,
			tile,
			cost,
			self.shared.entry_overhead,
			self.shared.next_seq(),
			self.shared.clock.now(),
		))
	}

	/// Store `entry` while the caller holds the index lock of its image.
	fn insert_locked(
		&self,
		images: &mut ImageIndex,
		entry: &Arc<TileEntry<T>>,
	) -> Option<Arc<TileEntry<T>>> {
		let replaced = self.shard_for(entry.key()).write().insert(Arc::clone(entry));
		match &replaced {
			Some(_) => entry.set_action(TileAction::Updated),
			None => {
				images.insert(entry.image_key(), entry.key().clone());
			}
		}
		self.shared.account(Some(&**entry), replaced.as_deref());
		replaced
	}

	/// Remove `keys` from their shards. The caller holds the index lock they
	/// were registered under and has already unregistered them.
	fn remove_keys(&self, keys: &[TileKey]) -> Vec<Arc<TileEntry<T>>> {
		keys.iter()
			.map(|key| {
				let entry = self
					.shard_for(key)
					.write()
					.remove(key)
					.expect("image index references a missing tile");
				self.shared.account(None, Some(&*entry));
				entry
			})
			.collect()
	}

	/// Run an eviction pass if `inserted` pushed usage over capacity.
	fn restore_bound(&self, inserted: &TileEntry<T>) -> Vec<Arc<TileEntry<T>>> {
		if !self.shared.is_over_capacity() {
			return Vec::new();
		}
		if inserted.size_bytes() > self.shared.capacity() {
			warn!(
				size = inserted.size_bytes(),
				capacity = self.shared.capacity(),
				"tile exceeds cache capacity"
			);
		}
		self.evict(Some(inserted.key()))
	}

	/// Evict until usage is at most `capacity * threshold` or nothing but
	/// `protect` is left.
	fn evict(&self, protect: Option<&TileKey>) -> Vec<Arc<TileEntry<T>>> {
		let _pass = self.eviction.lock();
		let target = self.shared.eviction_target();
		let mut victims = Vec::new();
		if self.shared.memory_used() <= target {
			return victims;
		}
		let before = self.shared.memory_used();

		let mut lost_races = 0;
		while self.shared.memory_used() > target {
			let Some(candidate) = self.pick_victim(protect) else {
				break;
			};
			match self.evict_entry(&candidate) {
				Some(victim) => {
					victims.push(victim);
					lost_races = 0;
				}
				None => {
					// Replaced or removed since it was sampled.
					lost_races += 1;
					if lost_races == MAX_LOST_RACES {
						break;
					}
				}
			}
		}

		debug!(
			victims = victims.len(),
			freed = before.saturating_sub(self.shared.memory_used()),
			target,
			memory_used = self.shared.memory_used(),
			"sharded tile cache eviction pass"
		);
		victims
	}

	/// Lowest ranked entry among samples of up to `PROBE_SHARDS` non-empty shards.
	fn pick_victim(&self, protect: Option<&TileKey>) -> Option<Arc<TileEntry<T>>> {
		let shard_count = self.shards.len();
		let start = self.cursor.fetch_add(1, Ordering::Relaxed);
		let mut best: Option<(VictimRank, Arc<TileEntry<T>>)> = None;
		let mut probed = 0;

		for offset in 0..shard_count {
			let lock = &self.shards[(start + offset) & (shard_count - 1)];
			// Skip shards busy with writers unless nothing else has been found.
			let shard = match lock.try_read() {
				Some(shard) => shard,
				None if best.is_some() => continue,
				None => lock.read(),
			};
			if shard.is_empty() {
				continue;
			}
			probed += 1;
			if let Some((rank, entry)) = shard.sample(SAMPLE_SIZE, protect) {
				if best.as_ref().map_or(true, |(best_rank, _)| rank < *best_rank) {
					best = Some((rank, entry));
				}
			}
			if probed == PROBE_SHARDS {
				break;
			}
		}
		best.map(|(_, entry)| entry)
	}

	/// Remove `expected` if it is still cached under its key.
	fn evict_entry(&self, expected: &Arc<TileEntry<T>>) -> Option<Arc<TileEntry<T>>> {
		let mut images = self.index_for(expected.image_key()).write();
		let entry = self.shard_for(expected.key()).write().remove_if_same(expected)?;
		let indexed = images.remove(entry.image_key(), entry.key());
		assert!(indexed, "image index out of sync with tile store");
		self.shared.account(None, Some(&*entry));
		entry.set_action(TileAction::Evicted);
		trace!(key = ?entry.key(), size = entry.size_bytes(), stale = entry.is_stale(), "evicted tile");
		Some(entry)
	}

	fn after_write(&self, entry: &TileEntry<T>, replaced: bool) {
		let action = if replaced {
			TileAction::Updated
		} else {
			TileAction::Added
		};
		self.shared.diagnostics.record_write(replaced);
		self.shared.notify(entry, action);
	}

	fn finish_removal(&self, removed: &[Arc<TileEntry<T>>], action: TileAction) {
		if action == TileAction::Evicted {
			self.shared.diagnostics.record_evictions(removed.len() as u64);
		} else {
			for entry in removed {
				entry.set_action(action);
			}
			self.shared.diagnostics.record_removals(removed.len() as u64);
		}
		self.shared.notify_all(removed, action);
	}

	#[inline]
	fn shard_for(&self, key: &TileKey) -> &RwLock<Shard<T>> {
		let index = (key.hash_value() as usize) & (self.shards.len() - 1);
		&self.shards[index]
	}

	#[inline]
	fn index_for(&self, image: &ImageKey) -> &RwLock<ImageIndex> {
		let index = (image.hash_value() as usize) & (self.images.len() - 1);
		&self.images[index]
	}
}

#[cfg(test)]
mod tests {
	use std::thread;

	use super::*;
	use crate::entry::tests::TestImage;
	use crate::tile::{Raster, SampleType};

	const OVERHEAD: usize = 16;

	fn cache(capacity: usize, threshold: f64, shards: usize) -> ShardedTileCache<Raster> {
		let config = CacheConfig {
			capacity,
			threshold,
			shards,
			entry_overhead: OVERHEAD,
			..CacheConfig::default()
		};
		ShardedTileCache::new(&config, Vec::new())
	}

	fn tile(size: usize) -> Arc<Raster> {
		Arc::new(Raster::new(SampleType::U8, size - OVERHEAD, 1))
	}

	fn image(id: u64) -> Arc<TestImage> {
		Arc::new(TestImage(ImageId::hashed(id)))
	}

	#[test]
	fn test_shard_count_follows_config() {
		assert_eq!(cache(1024 * 1024, 0.5, 64).shard_count(), 64);
		assert_eq!(cache(16 * 1024, 0.5, 64).shard_count(), 4);
		assert_eq!(cache(100, 0.5, 64).shard_count(), 1);
	}

	#[test]
	fn test_add_get_replace() {
		let cache = cache(1024 * 1024, 0.5, 16);
		let owner = image(1);
		cache.add(&owner, TileCoord::new(0, 0), tile(100), None);
		cache.add(&owner, TileCoord::new(0, 0), tile(200), None);

		let entry = cache.get_cached_tile(owner.image_id(), 0, 0).expect("tile is cached");
		assert_eq!(entry.size_bytes(), 200);
		assert_eq!(entry.action(), TileAction::Updated);
		assert_eq!(cache.shared().memory_used(), 200);
		assert_eq!(cache.shared().tile_count(), 1);
		assert_eq!(cache.get_tiles(owner.image_id()).len(), 1);
	}

	#[test]
	fn test_eviction_reaches_target() {
		let cache = cache(1000, 0.5, 1);
		let owner = image(1);
		for x in 0..10 {
			cache.add(&owner, TileCoord::new(x, 0), tile(100), None);
		}
		assert_eq!(cache.shared().memory_used(), 1000);

		cache.add(&owner, TileCoord::new(10, 0), tile(100), None);
		assert_eq!(cache.shared().memory_used(), 500);
		assert_eq!(cache.shared().tile_count(), 5);
		assert!(cache.contains(owner.image_id(), 10, 0));
	}

	#[test]
	fn test_stale_entries_go_first() {
		let cache = cache(400, 1.0, 1);
		let live = image(1);
		let doomed = image(2);
		cache.add(&live, TileCoord::new(0, 0), tile(100), Some(1.0));
		cache.add(&doomed, TileCoord::new(0, 0), tile(100), Some(50.0));
		cache.add(&live, TileCoord::new(1, 0), tile(100), Some(1.0));
		drop(doomed);

		cache.add(&live, TileCoord::new(2, 0), tile(200), Some(1.0));

		// 500 > 400, back to 400: only the stale tile goes.
		assert_eq!(cache.shared().memory_used(), 400);
		assert!(!cache.contains(&ImageId::hashed(2), 0, 0));
		assert!(cache.get_tiles(&ImageId::hashed(2)).is_empty());
		assert_eq!(cache.get_tiles(live.image_id()).len(), 3);
	}

	#[test]
	fn test_remove_and_remove_tiles() {
		let cache = cache(1024 * 1024, 0.5, 8);
		let a = image(1);
		let b = image(2);
		for x in 0..4 {
			cache.add(&a, TileCoord::new(x, 0), tile(100), None);
			cache.add(&b, TileCoord::new(x, 0), tile(100), None);
		}

		assert!(cache.remove(a.image_id(), 0, 0).is_some());
		assert!(cache.remove(a.image_id(), 0, 0).is_none());
		assert_eq!(cache.remove_tiles(a.image_id()), 3);
		assert_eq!(cache.remove_tiles(a.image_id()), 0);
		assert_eq!(cache.get_tiles(b.image_id()).len(), 4);
		assert_eq!(cache.shared().memory_used(), 400);
	}

	#[test]
	fn test_flush_empties_every_shard() {
		let cache = cache(1024 * 1024, 0.5, 16);
		for id in 0..8 {
			let owner = image(id);
			for x in 0..8 {
				cache.add(&owner, TileCoord::new(x, x), tile(64), None);
			}
		}
		cache.flush();
		assert_eq!(cache.shared().memory_used(), 0);
		assert_eq!(cache.shared().tile_count(), 0);
		assert!(cache.cached_tiles().is_empty());
	}

	#[test]
	fn test_concurrent_adds_stay_bounded() {
		let cache = Arc::new(cache(64 * 1024, 0.5, 16));
		let handles: Vec<_> = (0..8)
			.map(|t| {
				let cache = Arc::clone(&cache);
				thread::spawn(move || {
					let owner = image(t);
					for x in 0..500 {
						cache.add(&owner, TileCoord::new(x, 0), tile(512), None);
						let _ = cache.get_tile(owner.image_id(), x, 0);
					}
				})
			})
			.collect();
		for handle in handles {
			handle.join().expect("thread should not panic");
		}

		let cached: usize = cache.cached_tiles().iter().map(|e| e.size_bytes()).sum();
		assert_eq!(cached, cache.shared().memory_used());
		assert_eq!(cache.cached_tiles().len(), cache.shared().tile_count());
		assert!(cache.shared().memory_used() <= 64 * 1024);
	}
}
