//! Linked-recency tile cache.
//!
//! All state sits behind one `parking_lot::Mutex`: the key map, an explicit
//! recency list, an ordered eviction index and the per-image index. Every
//! access, hits included, takes the lock to keep recency exact.
//!
//! # Eviction
//!
//! The eviction index orders entries by cost, then by access order, so the
//! next victim is its first entry (O(log n)). Owners are dropped without
//! telling the cache, so stale entries are found by a sweep that inspects at
//! most [`STALE_SWEEP`] recency slots per pass and resumes where the previous
//! pass stopped. An eviction pass therefore costs O(`STALE_SWEEP` + victims
//! × log n), independent of how many tiles are cached.

use std::collections::BTreeMap;
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::{CacheConfig, CacheVariant};
use crate::diagnostics::TileObserver;
use crate::entry::{TileAction, TileEntry};
use crate::error::Result;
use crate::index::ImageIndex;
use crate::key::{ImageId, ImageKey, PassthroughBuildHasher, TileCoord, TileKey};
use crate::metrics::CacheMetrics;
use crate::recency::RecencyList;
use crate::shared::Shared;
use crate::tile::{TileOwner, TilePayload};

/// Recency slots checked for dropped owners per eviction pass.
const STALE_SWEEP: usize = 64;

/// Position in the eviction index. Costs are never negative, so their bit
/// patterns sort like the values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct EvictionOrder {
	cost: u64,
	/// Access counter at the last insert or hit; unique per entry
	tick: u64,
}

struct Resident<T> {
	entry: Arc<TileEntry<T>>,
	order: EvictionOrder,
}

struct LinkedState<T> {
	/// Key -> slot in `list`
	slots: HashMap<TileKey, usize, PassthroughBuildHasher>,
	list: RecencyList<Resident<T>>,
	/// Eviction order -> slot in `list`
	order: BTreeMap<EvictionOrder, usize>,
	images: ImageIndex,
	tick: u64,
	/// Next slot the stale sweep inspects
	sweep: usize,
}

impl<T> LinkedState<T> {
	fn new() -> Self {
		Self {
			slots: HashMap::with_hasher(PassthroughBuildHasher),
			list: RecencyList::new(),
			order: BTreeMap::new(),
			images: ImageIndex::new(),
			tick: 0,
			sweep: 0,
		}
	}

	fn next_order(&mut self, entry: &TileEntry<T>) -> EvictionOrder {
		self.tick += 1;
		EvictionOrder {
			cost: entry.cost_metric().unwrap_or(0.0).to_bits(),
			tick: self.tick,
		}
	}

	/// Insert or replace; the entry becomes most recently used.
	fn insert(&mut self, entry: Arc<TileEntry<T>>) -> Option<Arc<TileEntry<T>>> {
		let order = self.next_order(&entry);
		if let Some(&idx) = self.slots.get(entry.key()) {
			let old = self.list.replace(idx, Resident { entry, order });
			self.order.remove(&old.order);
			self.order.insert(order, idx);
			return Some(old.entry);
		}
		let key = entry.key().clone();
		self.images.insert(entry.image_key(), key.clone());
		let idx = self.list.push_front(Resident { entry, order });
		self.order.insert(order, idx);
		self.slots.insert(key, idx);
		None
	}

	fn lookup(&mut self, key: &TileKey, now: u64) -> Option<Arc<TileEntry<T>>> {
		let idx = *self.slots.get(key)?;
		self.list.move_to_front(idx);
		self.tick += 1;
		let tick = self.tick;
		let resident = self.list.get_mut(idx).expect("slot map points at an empty recency slot");
		let previous = resident.order;
		resident.order.tick = tick;
		resident.entry.touch(now);
		let entry = Arc::clone(&resident.entry);
		let order = resident.order;
		self.order.remove(&previous);
		self.order.insert(order, idx);
		Some(entry)
	}

	fn peek(&self, key: &TileKey) -> Option<&Arc<TileEntry<T>>> {
		let idx = *self.slots.get(key)?;
		self.list.get(idx).map(|resident| &resident.entry)
	}

	fn remove_key(&mut self, key: &TileKey) -> Option<Arc<TileEntry<T>>> {
		let idx = *self.slots.get(key)?;
		Some(self.remove_slot(idx))
	}

	fn remove_slot(&mut self, idx: usize) -> Arc<TileEntry<T>> {
		let Resident { entry, order } = self.list.remove(idx);
		let ordered = self.order.remove(&order);
		assert_eq!(ordered, Some(idx), "eviction index out of sync with recency list");
		let slot = self.slots.remove(entry.key());
		assert_eq!(slot, Some(idx), "slot map out of sync with recency list");
		let indexed = self.images.remove(entry.image_key(), entry.key());
		assert!(indexed, "image index out of sync with tile store");
		entry
	}

	/// Slot of the cheapest, least recently used entry other than `protect`.
	fn cheapest(&self, protect: Option<&TileKey>) -> Option<usize> {
		self.order.values().copied().find(|&idx| {
			self.list.get(idx).map_or(false, |resident| protect != Some(resident.entry.key()))
		})
	}

	/// Slots of stale entries among the next `budget` slots of the sweep.
	fn sweep_stale(&mut self, budget: usize, protect: Option<&TileKey>) -> Vec<usize> {
		let slot_count = self.list.slot_count();
		let mut stale = Vec::new();
		for _ in 0..budget.min(slot_count) {
			let idx = self.sweep % slot_count;
			self.sweep = idx + 1;
			if let Some(resident) = self.list.get(idx) {
				if resident.entry.is_stale() && protect != Some(resident.entry.key()) {
					stale.push(idx);
				}
			}
		}
		stale
	}

	fn entries_lru(&self) -> Vec<Arc<TileEntry<T>>> {
		self.list.iter_lru().map(|(_, resident)| Arc::clone(&resident.entry)).collect()
	}

	fn clear(&mut self) -> Vec<Arc<TileEntry<T>>> {
		let entries = self.entries_lru();
		self.slots.clear();
		self.list.clear();
		self.order.clear();
		self.images.clear();
		self.sweep = 0;
		entries
	}
}

/// Tile cache guarded by a single global lock with an exact recency list.
pub struct LinkedTileCache<T> {
	state: Mutex<LinkedState<T>>,
	shared: Shared<T>,
}

impl<T: TilePayload> LinkedTileCache<T> {
	/// Build from an already validated configuration.
	pub(crate) fn new(config: &CacheConfig, observers: Vec<Arc<dyn TileObserver<T>>>) -> Self {
		Self {
			state: Mutex::new(LinkedState::new()),
			shared: Shared::new(config, observers),
		}
	}

	pub(crate) fn shared(&self) -> &Shared<T> {
		&self.shared
	}

	pub fn add<O: TileOwner + 'static>(
		&self,
		owner: &Arc<O>,
		coord: TileCoord,
		tile: Arc<T>,
		cost: Option<f64>,
	) {
		let entry = self.make_entry(owner, coord, tile, cost);
		let (replaced, evicted) = {
			let mut state = self.state.lock();
			self.insert_locked(&mut state, Arc::clone(&entry))
		};
		self.after_write(&entry, replaced, &evicted);
	}

	/// Insert a batch under one lock acquisition. Lengths are checked by the caller.
	pub(crate) fn add_batch<O: TileOwner + 'static>(
		&self,
		owner: &Arc<O>,
		items: Vec<(TileCoord, Arc<T>, Option<f64>)>,
	) {
		let entries: Vec<_> = items
			.into_iter()
			.map(|(coord, tile, cost)| self.make_entry(owner, coord, tile, cost))
			.collect();
		let mut outcomes = Vec::with_capacity(entries.len());
		{
			let mut state = self.state.lock();
			for entry in &entries {
				outcomes.push(self.insert_locked(&mut state, Arc::clone(entry)));
			}
		}
		for (entry, (replaced, evicted)) in entries.iter().zip(outcomes) {
			self.after_write(entry, replaced, &evicted);
		}
	}

	pub fn get_tile(&self, image: &ImageId, x: i32, y: i32) -> Option<Arc<T>> {
		self.get_cached_tile(image, x, y).map(|entry| Arc::clone(entry.tile()))
	}

	pub fn get_cached_tile(&self, image: &ImageId, x: i32, y: i32) -> Option<Arc<TileEntry<T>>> {
		let key = TileKey::new(image, x, y);
		let now = self.shared.clock.now();
		let found = self.state.lock().lookup(&key, now);
		self.record_lookup(found.is_some());
		found
	}

	pub fn get_tiles(&self, image: &ImageId) -> Vec<Arc<T>> {
		let image_key = ImageKey::new(image);
		let state = self.state.lock();
		state
			.images
			.keys(&image_key)
			.iter()
			.filter_map(|key| state.peek(key).map(|entry| Arc::clone(entry.tile())))
			.collect()
	}

	pub fn get_tiles_at(&self, image: &ImageId, points: &[TileCoord]) -> Vec<Option<Arc<T>>> {
		let keys: Vec<TileKey> = points.iter().map(|p| TileKey::new(image, p.x, p.y)).collect();
		let now = self.shared.clock.now();
		let found: Vec<Option<Arc<T>>> = {
			let mut state = self.state.lock();
			keys.iter()
				.map(|key| state.lookup(key, now).map(|entry| Arc::clone(entry.tile())))
				.collect()
		};
		for tile in &found {
			self.record_lookup(tile.is_some());
		}
		found
	}

	pub fn contains(&self, image: &ImageId, x: i32, y: i32) -> bool {
		let key = TileKey::new(image, x, y);
		self.state.lock().peek(&key).is_some()
	}

	/// Every cached entry, least recently used first.
	pub fn cached_tiles(&self) -> Vec<Arc<TileEntry<T>>> {
		self.state.lock().entries_lru()
	}

	pub fn remove(&self, image: &ImageId, x: i32, y: i32) -> Option<Arc<T>> {
		let key = TileKey::new(image, x, y);
		let entry = {
			let mut state = self.state.lock();
			let entry = state.remove_key(&key)?;
			self.shared.account(None, Some(&*entry));
			entry
		};
		entry.set_action(TileAction::Removed);
		self.shared.diagnostics.record_removals(1);
		self.shared.notify(&entry, TileAction::Removed);
		Some(Arc::clone(entry.tile()))
	}

	pub fn remove_tiles(&self, image: &ImageId) -> usize {
		let image_key = ImageKey::new(image);
		let removed: Vec<_> = {
			let mut state = self.state.lock();
			let keys = state.images.keys(&image_key);
			keys.iter()
				.map(|key| {
					let entry =
						state.remove_key(key).expect("image index references a missing tile");
					self.shared.account(None, Some(&*entry));
					entry
				})
				.collect()
		};
		self.finish_removal(&removed, TileAction::Removed);
		debug!(image = %image, removed = removed.len(), "removed image tiles");
		removed.len()
	}

	pub fn flush(&self) {
		let removed = {
			let mut state = self.state.lock();
			let removed = state.clear();
			for entry in &removed {
				self.shared.account(None, Some(&**entry));
			}
			removed
		};
		self.finish_removal(&removed, TileAction::Removed);
		debug!(removed = removed.len(), "flushed tile cache");
	}

	/// Evict toward `capacity * threshold` now.
	pub fn memory_control(&self) {
		let evicted = {
			let mut state = self.state.lock();
			self.evict_locked(&mut state, None)
		};
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
		self.shared.metrics(CacheVariant::Linked)
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

	/// Insert one entry and restore the capacity bound.
	///
	/// Returns the replaced entry (if any) and the entries evicted on the way.
	fn insert_locked(
		&self,
		state: &mut LinkedState<T>,
		entry: Arc<TileEntry<T>>,
	) -> (Option<Arc<TileEntry<T>>>, Vec<Arc<TileEntry<T>>>) {
		let replaced = state.insert(Arc::clone(&entry));
		if replaced.is_some() {
			entry.set_action(TileAction::Updated);
		}
		self.shared.account(Some(&*entry), replaced.as_deref());

		let evicted = if self.shared.is_over_capacity() {
			if entry.size_bytes() > self.shared.capacity() {
				warn!(
					size = entry.size_bytes(),
					capacity = self.shared.capacity(),
					"tile exceeds cache capacity"
				);
			}
			self.evict_locked(state, Some(entry.key()))
		} else {
			Vec::new()
		};
		(replaced, evicted)
	}

	/// Evict until usage is at most `capacity * threshold` or nothing but
	/// `protect` is left.
	fn evict_locked(
		&self,
		state: &mut LinkedState<T>,
		protect: Option<&TileKey>,
	) -> Vec<Arc<TileEntry<T>>> {
		let target = self.shared.eviction_target();
		let mut victims = Vec::new();
		if self.shared.memory_used() <= target {
			return victims;
		}
		let before = self.shared.memory_used();

		for idx in state.sweep_stale(STALE_SWEEP, protect) {
			if self.shared.memory_used() <= target {
				break;
			}
			victims.push(self.evict_slot(state, idx));
		}
		while self.shared.memory_used() > target {
			let Some(idx) = state.cheapest(protect) else {
				break;
			};
			victims.push(self.evict_slot(state, idx));
		}

		debug!(
			victims = victims.len(),
			freed = before - self.shared.memory_used(),
			target,
			memory_used = self.shared.memory_used(),
			"linked tile cache eviction pass"
		);
		victims
	}

	fn evict_slot(&self, state: &mut LinkedState<T>, idx: usize) -> Arc<TileEntry<T>> {
		let entry = state.remove_slot(idx);
		self.shared.account(None, Some(&*entry));
		entry.set_action(TileAction::Evicted);
		trace!(key = ?entry.key(), size = entry.size_bytes(), stale = entry.is_stale(), "evicted tile");
		entry
	}

	fn after_write(
		&self,
		entry: &Arc<TileEntry<T>>,
		replaced: Option<Arc<TileEntry<T>>>,
		evicted: &[Arc<TileEntry<T>>],
	) {
		let action = if replaced.is_some() {
			TileAction::Updated
		} else {
			TileAction::Added
		};
		self.shared.diagnostics.record_write(replaced.is_some());
		self.shared.notify(entry, action);
		self.shared.diagnostics.record_evictions(evicted.len() as u64);
		self.shared.notify_all(evicted, TileAction::Evicted);
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

	fn record_lookup(&self, hit: bool) {
		if hit {
			self.shared.diagnostics.record_hit();
		} else {
			self.shared.diagnostics.record_miss();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entry::tests::TestImage;
	use crate::tile::{Raster, SampleType};

	const OVERHEAD: usize = 16;

	fn cache(capacity: usize, threshold: f64) -> LinkedTileCache<Raster> {
		let config = CacheConfig {
			capacity,
			threshold,
			variant: CacheVariant::Linked,
			entry_overhead: OVERHEAD,
			..CacheConfig::default()
		};
		LinkedTileCache::new(&config, Vec::new())
	}

	/// A tile accounted at exactly `size` bytes.
	fn tile(size: usize) -> Arc<Raster> {
		Arc::new(Raster::new(SampleType::U8, size - OVERHEAD, 1))
	}

	fn image(id: u64) -> Arc<TestImage> {
		Arc::new(TestImage(ImageId::hashed(id)))
	}

	#[test]
	fn test_add_and_get() {
		let cache = cache(10_000, 0.5);
		let owner = image(1);
		cache.add(&owner, TileCoord::new(0, 0), tile(100), None);

		assert!(cache.get_tile(owner.image_id(), 0, 0).is_some());
		assert!(cache.get_tile(owner.image_id(), 1, 0).is_none());
		assert_eq!(cache.shared().memory_used(), 100);
		assert_eq!(cache.shared().tile_count(), 1);
	}

	#[test]
	fn test_replace_adjusts_memory() {
		let cache = cache(10_000, 0.5);
		let owner = image(1);
		cache.add(&owner, TileCoord::new(0, 0), tile(100), None);
		cache.add(&owner, TileCoord::new(0, 0), tile(300), None);

		assert_eq!(cache.shared().memory_used(), 300);
		assert_eq!(cache.shared().tile_count(), 1);
		let entry = cache.get_cached_tile(owner.image_id(), 0, 0).expect("tile is cached");
		assert_eq!(entry.action(), TileAction::Updated);
	}

	#[test]
	fn test_evicts_least_recently_used() {
		let cache = cache(400, 0.5);
		let owner = image(1);
		for x in 0..4 {
			cache.add(&owner, TileCoord::new(x, 0), tile(100), None);
		}
		// Touch tile 0 so tile 1 becomes the oldest.
		assert!(cache.get_tile(owner.image_id(), 0, 0).is_some());

		cache.add(&owner, TileCoord::new(4, 0), tile(100), None);

		// 500 > 400, evict down to 200: tiles 1, 2 and 3 go.
		assert_eq!(cache.shared().memory_used(), 200);
		assert!(cache.contains(owner.image_id(), 0, 0));
		assert!(cache.contains(owner.image_id(), 4, 0));
		for x in 1..4 {
			assert!(!cache.contains(owner.image_id(), x, 0));
		}
	}

	#[test]
	fn test_stale_owner_evicted_first() {
		let cache = cache(300, 0.9);
		let live = image(1);
		let doomed = image(2);
		cache.add(&live, TileCoord::new(0, 0), tile(100), None);
		cache.add(&doomed, TileCoord::new(0, 0), tile(100), None);
		drop(doomed);

		cache.add(&live, TileCoord::new(1, 0), tile(150), None);

		assert!(cache.contains(live.image_id(), 0, 0));
		assert!(cache.contains(live.image_id(), 1, 0));
		assert!(!cache.contains(&ImageId::hashed(2), 0, 0));
		assert_eq!(cache.shared().memory_used(), 250);
	}

	#[test]
	fn test_cheapest_evicted_first() {
		let cache = cache(300, 0.7);
		let owner = image(1);
		cache.add(&owner, TileCoord::new(0, 0), tile(100), Some(10.0));
		cache.add(&owner, TileCoord::new(1, 0), tile(100), Some(1.0));
		cache.add(&owner, TileCoord::new(2, 0), tile(100), Some(5.0));

		cache.add(&owner, TileCoord::new(3, 0), tile(100), Some(7.0));

		// 400 > 300, down to 210: the two cheapest of the older tiles go.
		assert!(cache.contains(owner.image_id(), 0, 0));
		assert!(!cache.contains(owner.image_id(), 1, 0));
		assert!(!cache.contains(owner.image_id(), 2, 0));
		assert!(cache.contains(owner.image_id(), 3, 0));
	}

	#[test]
	fn test_oversized_tile_is_accepted() {
		let cache = cache(300, 0.5);
		let owner = image(1);
		cache.add(&owner, TileCoord::new(0, 0), tile(100), None);
		cache.add(&owner, TileCoord::new(1, 0), tile(500), None);

		assert!(cache.contains(owner.image_id(), 1, 0));
		assert!(!cache.contains(owner.image_id(), 0, 0));
		assert_eq!(cache.shared().tile_count(), 1);

		// The next insert may evict the oversized tile.
		cache.add(&owner, TileCoord::new(2, 0), tile(100), None);
		assert!(!cache.contains(owner.image_id(), 1, 0));
		assert_eq!(cache.shared().memory_used(), 100);
	}

	#[test]
	fn test_remove_tiles_scoped_to_image() {
		let cache = cache(10_000, 0.5);
		let a = image(1);
		let b = image(2);
		for x in 0..3 {
			cache.add(&a, TileCoord::new(x, 0), tile(100), None);
			cache.add(&b, TileCoord::new(x, 0), tile(100), None);
		}

		assert_eq!(cache.remove_tiles(a.image_id()), 3);
		assert!(cache.get_tiles(a.image_id()).is_empty());
		assert_eq!(cache.get_tiles(b.image_id()).len(), 3);
		assert_eq!(cache.shared().memory_used(), 300);
	}

	#[test]
	fn test_flush_keeps_settings() {
		let cache = cache(10_000, 0.5);
		let owner = image(1);
		cache.shared().diagnostics.enable();
		cache.add(&owner, TileCoord::new(0, 0), tile(100), None);
		cache.flush();

		assert_eq!(cache.shared().memory_used(), 0);
		assert_eq!(cache.shared().tile_count(), 0);
		assert!(cache.cached_tiles().is_empty());
		assert_eq!(cache.shared().capacity(), 10_000);
		assert!(cache.shared().diagnostics.is_enabled());
	}

	#[test]
	fn test_eviction_index_tracks_entries() {
		let cache = cache(1000, 0.5);
		let owner = image(1);
		for x in 0..12 {
			cache.add(&owner, TileCoord::new(x % 7, 0), tile(100), Some(f64::from(x % 3)));
			let _ = cache.get_tile(owner.image_id(), (x + 2) % 7, 0);
		}
		cache.remove(owner.image_id(), 3, 0);

		let state = cache.state.lock();
		assert_eq!(state.order.len(), state.slots.len());
		assert_eq!(state.order.len(), cache.shared().tile_count());
		for (order, &idx) in &state.order {
			let resident = state.list.get(idx).expect("indexed slot is occupied");
			assert_eq!(resident.order, *order);
		}
	}

	#[test]
	fn test_hit_defers_eviction_among_equal_costs() {
		let cache = cache(300, 0.7);
		let owner = image(1);
		for x in 0..3 {
			cache.add(&owner, TileCoord::new(x, 0), tile(100), Some(2.0));
		}
		assert!(cache.get_tile(owner.image_id(), 0, 0).is_some());

		cache.add(&owner, TileCoord::new(3, 0), tile(100), Some(2.0));

		// 400 > 300, down to 210: tiles 1 and 2 were touched least recently.
		assert!(cache.contains(owner.image_id(), 0, 0));
		assert!(!cache.contains(owner.image_id(), 1, 0));
		assert!(!cache.contains(owner.image_id(), 2, 0));
	}

	#[test]
	fn test_stale_sweep_resumes_across_passes() {
		let slots = 3 * STALE_SWEEP;
		let cache = cache(slots * 100, 1.0);
		let live = image(1);
		let doomed = image(2);
		for x in 0..slots - 1 {
			cache.add(&live, TileCoord::new(x as i32, 0), tile(100), Some(1.0));
		}
		// Expensive, so only the sweep can pick it before the live tiles.
		cache.add(&doomed, TileCoord::new(0, 0), tile(100), Some(1000.0));
		drop(doomed);

		// Each insert evicts one tile and sweeps `STALE_SWEEP` more slots.
		for x in 0..3 {
			cache.add(&live, TileCoord::new(1000 + x, 0), tile(100), Some(1.0));
			assert_eq!(cache.shared().memory_used(), slots * 100);
		}
		assert!(!cache.contains(&ImageId::hashed(2), 0, 0));
		assert_eq!(cache.shared().tile_count(), slots);
	}

	#[test]
	fn test_lowering_capacity_evicts() {
		let cache = cache(10_000, 0.5);
		let owner = image(1);
		for x in 0..10 {
			cache.add(&owner, TileCoord::new(x, 0), tile(100), None);
		}
		cache.set_memory_capacity(400).expect("capacity is positive");
		assert!(cache.shared().memory_used() <= 200);
	}
}
