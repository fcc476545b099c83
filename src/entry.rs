use std::convert::TryFrom;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::key::{ImageId, ImageKey, TileCoord, TileKey};
use crate::tile::{TilePayload, TileOwner};

/// Most recent lifecycle event of a cached tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TileAction {
	/// Inserted under a key that held nothing.
	Added = 0,
	/// Inserted under a key that already held a tile.
	Updated = 1,
	/// Removed by `remove`, `remove_tiles` or `flush`.
	Removed = 2,
	/// Removed by the eviction engine.
	Evicted = 3,
}

impl TryFrom<u8> for TileAction {
	type Error = u8;

	fn try_from(val: u8) -> Result<Self, Self::Error> {
		match val {
			0 => Ok(TileAction::Added),
			1 => Ok(TileAction::Updated),
			2 => Ok(TileAction::Removed),
			3 => Ok(TileAction::Evicted),
			_ => Err(val),
		}
	}
}

/// Millisecond clock shared by all entries of one cache.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Clock {
	epoch: Instant,
}

impl Clock {
	pub fn new() -> Self {
		Self {
			epoch: Instant::now(),
		}
	}

	/// Milliseconds since the cache was created.
	pub fn now(&self) -> u64 {
		self.epoch.elapsed().as_millis() as u64
	}
}

/// A cached tile together with its bookkeeping.
///
/// The payload, owner, cost and size never change after insertion. Only the
/// access time and the action tag are updated, both atomically.
pub struct TileEntry<T> {
	key: TileKey,
	image: ImageKey,
	coord: TileCoord,
	owner: Weak<dyn TileOwner>,
	tile: Arc<T>,
	cost: Option<f64>,
	size: usize,
	seq: u64,
	last_access: AtomicU64,
	action: AtomicU8,
}

impl<T: TilePayload> TileEntry<T> {
	/// Create an entry for `tile` at `coord` of `owner`.
	///
	/// A NaN cost cannot be ordered and is stored as "no cost". Negative costs
	/// are stored as `0.0`, the rank of a tile without a cost.
	pub(crate) fn new<O: TileOwner + 'static>(
		owner: &Arc<O>,
		coord: TileCoord,
		tile: Arc<T>,
		cost: Option<f64>,
		entry_overhead: usize,
		seq: u64,
		now: u64,
	) -> Self {
		let id = owner.image_id();
		let weak: Weak<O> = Arc::downgrade(owner);
		let weak: Weak<dyn TileOwner> = weak;
		let size = tile.footprint() + entry_overhead;
		Self {
			key: TileKey::new(id, coord.x, coord.y),
			image: ImageKey::new(id),
			coord,
			owner: weak,
			tile,
			cost: cost.filter(|c| !c.is_nan()).map(|c| if c > 0.0 { c } else { 0.0 }),
			size,
			seq,
			last_access: AtomicU64::new(now),
			action: AtomicU8::new(TileAction::Added as u8),
		}
	}
}

impl<T> TileEntry<T> {
	pub fn key(&self) -> &TileKey {
		&self.key
	}

	pub(crate) fn image_key(&self) -> &ImageKey {
		&self.image
	}

	pub fn image_id(&self) -> &ImageId {
		self.image.id()
	}

	pub fn coord(&self) -> TileCoord {
		self.coord
	}

	pub fn tile_x(&self) -> i32 {
		self.coord.x
	}

	pub fn tile_y(&self) -> i32 {
		self.coord.y
	}

	/// The cached payload.
	pub fn tile(&self) -> &Arc<T> {
		&self.tile
	}

	/// The owning image, if it is still alive.
	pub fn owner(&self) -> Option<Arc<dyn TileOwner>> {
		self.owner.upgrade()
	}

	/// True once the owning image has been dropped.
	pub fn is_stale(&self) -> bool {
		self.owner.strong_count() == 0
	}

	/// Owner-supplied recomputation cost, if any.
	pub fn cost_metric(&self) -> Option<f64> {
		self.cost
	}

	/// Accounted memory of this entry, bookkeeping overhead included.
	pub fn size_bytes(&self) -> usize {
		self.size
	}

	/// Insertion order within the cache (older entries have smaller numbers).
	pub fn sequence(&self) -> u64 {
		self.seq
	}

	/// Time of the last recorded access, relative to the cache's creation.
	pub fn last_access(&self) -> Duration {
		Duration::from_millis(self.last_access_millis())
	}

	pub(crate) fn last_access_millis(&self) -> u64 {
		self.last_access.load(Ordering::Relaxed)
	}

	pub(crate) fn touch(&self, now: u64) {
		self.last_access.fetch_max(now, Ordering::Relaxed);
	}

	pub fn action(&self) -> TileAction {
		let val = self.action.load(Ordering::Acquire);
		TileAction::try_from(val).expect("Invalid action value stored in atomic")
	}

	pub(crate) fn set_action(&self, action: TileAction) {
		self.action.store(action as u8, Ordering::Release);
	}
}

impl<T> fmt::Debug for TileEntry<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("TileEntry")
			.field("key", &self.key)
			.field("coord", &self.coord)
			.field("size", &self.size)
			.field("cost", &self.cost)
			.field("seq", &self.seq)
			.field("last_access", &self.last_access_millis())
			.field("action", &self.action())
			.field("stale", &self.is_stale())
			.finish()
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::tile::{Raster, SampleType};

	pub(crate) struct TestImage(pub ImageId);

	impl TileOwner for TestImage {
		fn image_id(&self) -> &ImageId {
			&self.0
		}
	}

	fn make_entry(owner: &Arc<TestImage>, cost: Option<f64>) -> TileEntry<Raster> {
		let tile = Arc::new(Raster::new(SampleType::U8, 100, 2));
		TileEntry::new(owner, TileCoord::new(3, 4), tile, cost, 64, 1, 10)
	}

	#[test]
	fn test_entry_creation() {
		let owner = Arc::new(TestImage(ImageId::hashed(1)));
		let entry = make_entry(&owner, Some(2.5));

		assert_eq!(entry.size_bytes(), 200 + 64);
		assert_eq!(entry.cost_metric(), Some(2.5));
		assert_eq!(entry.coord(), TileCoord::new(3, 4));
		assert_eq!(entry.key(), &TileKey::new(&ImageId::hashed(1), 3, 4));
		assert_eq!(entry.image_id(), &ImageId::hashed(1));
		assert_eq!(entry.action(), TileAction::Added);
		assert_eq!(entry.last_access_millis(), 10);
	}

	#[test]
	fn test_nan_cost_is_absent() {
		let owner = Arc::new(TestImage(ImageId::hashed(1)));
		let entry = make_entry(&owner, Some(f64::NAN));
		assert_eq!(entry.cost_metric(), None);
	}

	#[test]
	fn test_negative_cost_clamped() {
		let owner = Arc::new(TestImage(ImageId::hashed(1)));
		assert_eq!(make_entry(&owner, Some(-3.0)).cost_metric(), Some(0.0));
		// -0.0 has a different bit pattern than 0.0
		let zero = make_entry(&owner, Some(-0.0)).cost_metric().expect("cost is kept");
		assert!(zero.is_sign_positive());
	}

	#[test]
	fn test_owner_is_weak() {
		let owner = Arc::new(TestImage(ImageId::hashed(5)));
		let entry = make_entry(&owner, None);

		assert!(!entry.is_stale());
		assert!(entry.owner().is_some());
		assert_eq!(Arc::strong_count(&owner), 1);

		drop(owner);
		assert!(entry.is_stale());
		assert!(entry.owner().is_none());
		// The entry itself stays usable.
		assert_eq!(entry.tile().bank_count(), 2);
	}

	#[test]
	fn test_touch_never_goes_backwards() {
		let owner = Arc::new(TestImage(ImageId::hashed(1)));
		let entry = make_entry(&owner, None);

		entry.touch(50);
		assert_eq!(entry.last_access_millis(), 50);
		entry.touch(20);
		assert_eq!(entry.last_access_millis(), 50);
	}

	#[test]
	fn test_action_transitions() {
		let owner = Arc::new(TestImage(ImageId::hashed(1)));
		let entry = make_entry(&owner, None);

		entry.set_action(TileAction::Updated);
		assert_eq!(entry.action(), TileAction::Updated);
		entry.set_action(TileAction::Evicted);
		assert_eq!(entry.action(), TileAction::Evicted);
		assert_eq!(TileAction::try_from(9), Err(9));
	}
}
