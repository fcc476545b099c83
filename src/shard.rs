//! One partition of the sharded tile store.
//!
//! A `Shard` maps tile keys to entries and supports sampled victim search. It is
//! not thread-safe on its own; [`ShardedTileCache`](crate::ShardedTileCache)
//! wraps every shard in a `RwLock`.
//!
//! # Sampling
//!
//! Entries live in an `IndexMap`, which gives O(1) key lookups plus positional
//! access. A clock hand sweeps over the positions: each sample reads the next
//! `count` entries from the hand and advances it, so repeated samples cover the
//! whole shard. The hand is atomic so sampling only needs a read lock.
//!
//! Removal uses `swap_remove`, which moves the last entry into the freed
//! position. The hand only has to stay in bounds, so no adjustment is needed.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;

use crate::entry::TileEntry;
use crate::key::{PassthroughBuildHasher, TileKey};
use crate::policy::VictimRank;

pub(crate) struct Shard<T> {
	entries: IndexMap<TileKey, Arc<TileEntry<T>>, PassthroughBuildHasher>,
	/// Position of the next sample
	hand: AtomicUsize,
}

impl<T> Shard<T> {
	pub fn new() -> Self {
		Self {
			entries: IndexMap::with_hasher(PassthroughBuildHasher),
			hand: AtomicUsize::new(0),
		}
	}

	/// Insert `entry`, returning the entry it replaced.
	pub fn insert(&mut self, entry: Arc<TileEntry<T>>) -> Option<Arc<TileEntry<T>>> {
		self.entries.insert(entry.key().clone(), entry)
	}

	pub fn get(&self, key: &TileKey) -> Option<&Arc<TileEntry<T>>> {
		self.entries.get(key)
	}

	pub fn remove(&mut self, key: &TileKey) -> Option<Arc<TileEntry<T>>> {
		self.entries.swap_remove(key)
	}

	/// Remove the entry under `expected.key()` only if it is still `expected`.
	///
	/// Used by eviction, which picks victims under a read lock and removes them
	/// under a write lock taken later.
	pub fn remove_if_same(&mut self, expected: &Arc<TileEntry<T>>) -> Option<Arc<TileEntry<T>>> {
		match self.entries.get(expected.key()) {
			Some(current) if Arc::ptr_eq(current, expected) => self.entries.swap_remove(expected.key()),
			_ => None,
		}
	}

	pub fn contains(&self, key: &TileKey) -> bool {
		self.entries.contains_key(key)
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn entries(&self) -> impl Iterator<Item = &Arc<TileEntry<T>>> {
		self.entries.values()
	}

	/// Best victim among the next `count` entries from the hand, skipping `protect`.
	pub fn sample(
		&self,
		count: usize,
		protect: Option<&TileKey>,
	) -> Option<(VictimRank, Arc<TileEntry<T>>)> {
		let len = self.entries.len();
		if len == 0 {
			return None;
		}
		let count = count.min(len);
		let start = self.hand.fetch_add(count, Ordering::Relaxed) % len;

		let mut best: Option<(VictimRank, Arc<TileEntry<T>>)> = None;
		for offset in 0..count {
			let Some((key, entry)) = self.entries.get_index((start + offset) % len) else {
				continue;
			};
			if protect == Some(key) {
				continue;
			}
			let rank = VictimRank::of(&**entry);
			if best.as_ref().map_or(true, |(best_rank, _)| rank < *best_rank) {
				best = Some((rank, Arc::clone(entry)));
			}
		}
		best
	}
}
