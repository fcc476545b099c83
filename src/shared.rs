//! State common to both cache variants: settings, accounting and diagnostics.
//!
//! Every change to the memory-used and tile-count counters goes through
//! [`Shared::account`], which each variant calls while it holds the lock that
//! guards the entry being added or removed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::info;

use crate::config::{self, CacheConfig, CacheVariant};
use crate::diagnostics::{Diagnostics, TileObserver};
use crate::entry::{Clock, TileAction, TileEntry};
use crate::error::Result;
use crate::metrics::CacheMetrics;

pub(crate) struct Shared<T> {
	capacity: AtomicUsize,
	/// `f64` bit pattern of the memory threshold
	threshold: AtomicU64,
	memory_used: AtomicUsize,
	tile_count: AtomicUsize,
	next_seq: AtomicU64,
	pub clock: Clock,
	pub diagnostics: Diagnostics,
	pub entry_overhead: usize,
	pub track_recency: bool,
	observers: Vec<Arc<dyn TileObserver<T>>>,
}

impl<T> Shared<T> {
	/// Build from an already validated configuration.
	pub fn new(config: &CacheConfig, observers: Vec<Arc<dyn TileObserver<T>>>) -> Self {
		Self {
			capacity: AtomicUsize::new(config.capacity),
			threshold: AtomicU64::new(config.threshold.to_bits()),
			memory_used: AtomicUsize::new(0),
			tile_count: AtomicUsize::new(0),
			next_seq: AtomicU64::new(0),
			clock: Clock::new(),
			diagnostics: Diagnostics::new(config.diagnostics),
			entry_overhead: config.entry_overhead,
			track_recency: config.track_recency,
			observers,
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity.load(Ordering::Acquire)
	}

	pub fn threshold(&self) -> f64 {
		f64::from_bits(self.threshold.load(Ordering::Acquire))
	}

	/// Store a new capacity. Returns true when usage now exceeds it.
	pub fn set_capacity(&self, capacity: usize) -> Result<bool> {
		config::validate_capacity(capacity)?;
		let previous = self.capacity.swap(capacity, Ordering::AcqRel);
		info!(previous, capacity, "tile cache memory capacity changed");
		Ok(self.memory_used() > capacity)
	}

	pub fn set_threshold(&self, threshold: f64) -> Result<()> {
		config::validate_threshold(threshold)?;
		let previous = f64::from_bits(self.threshold.swap(threshold.to_bits(), Ordering::AcqRel));
		info!(previous, threshold, "tile cache memory threshold changed");
		Ok(())
	}

	/// Usage an eviction pass reduces memory to.
	pub fn eviction_target(&self) -> usize {
		(self.capacity() as f64 * self.threshold()) as usize
	}

	pub fn is_over_capacity(&self) -> bool {
		self.memory_used() > self.capacity()
	}

	pub fn memory_used(&self) -> usize {
		self.memory_used.load(Ordering::Acquire)
	}

	pub fn tile_count(&self) -> usize {
		self.tile_count.load(Ordering::Acquire)
	}

	pub fn next_seq(&self) -> u64 {
		self.next_seq.fetch_add(1, Ordering::Relaxed)
	}

	/// Apply one store mutation to the counters.
	///
	/// `added` is the entry that became visible, `removed` the one that stopped
	/// being visible; a replacement passes both.
	pub fn account(&self, added: Option<&TileEntry<T>>, removed: Option<&TileEntry<T>>) {
		// Add before subtracting so a replacement never dips below the true total.
		if let Some(entry) = added {
			self.memory_used.fetch_add(entry.size_bytes(), Ordering::AcqRel);
		}
		if let Some(entry) = removed {
			let size = entry.size_bytes();
			let previous = self.memory_used.fetch_sub(size, Ordering::AcqRel);
			assert!(previous >= size, "tile cache memory accounting underflow");
		}
		match (added.is_some(), removed.is_some()) {
			(true, false) => {
				self.tile_count.fetch_add(1, Ordering::AcqRel);
			}
			(false, true) => {
				let previous = self.tile_count.fetch_sub(1, Ordering::AcqRel);
				assert!(previous > 0, "tile cache tile count underflow");
			}
			_ => {}
		}
	}

	/// Tell observers about `entry`. Must be called without holding cache locks.
	pub fn notify(&self, entry: &TileEntry<T>, action: TileAction) {
		if self.observers.is_empty() || !self.diagnostics.is_enabled() {
			return;
		}
		for observer in &self.observers {
			observer.tile_changed(entry, action);
		}
	}

	pub fn notify_all(&self, entries: &[Arc<TileEntry<T>>], action: TileAction) {
		for entry in entries {
			self.notify(entry, action);
		}
	}

	pub fn metrics(&self, variant: CacheVariant) -> CacheMetrics {
		let diagnostics = &self.diagnostics;
		CacheMetrics {
			variant,
			diagnostics_enabled: diagnostics.is_enabled(),
			hits: diagnostics.hits(),
			misses: diagnostics.misses(),
			inserts: diagnostics.inserts(),
			updates: diagnostics.updates(),
			evictions: diagnostics.evictions(),
			removals: diagnostics.removals(),
			tile_count: self.tile_count(),
			memory_used: self.memory_used(),
			capacity: self.capacity(),
			threshold: self.threshold(),
		}
	}
}
