//! Runtime-toggled diagnostic counters and observers.
//!
//! Counters only move while diagnostics are enabled. Toggling never touches
//! entries, and counts recorded before a `disable` are kept.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::entry::{TileAction, TileEntry};

/// Receives lifecycle events of cached tiles while diagnostics are enabled.
///
/// Observers are always called after the cache has released its locks, so an
/// observer may call back into the cache.
pub trait TileObserver<T>: Send + Sync {
	fn tile_changed(&self, entry: &TileEntry<T>, action: TileAction);
}

#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
	enabled: AtomicBool,
	hits: AtomicU64,
	misses: AtomicU64,
	inserts: AtomicU64,
	updates: AtomicU64,
	removals: AtomicU64,
	evictions: AtomicU64,
}

impl Diagnostics {
	pub fn new(enabled: bool) -> Self {
		Self {
			enabled: AtomicBool::new(enabled),
			..Self::default()
		}
	}

	pub fn enable(&self) {
		self.enabled.store(true, Ordering::Release);
	}

	pub fn disable(&self) {
		self.enabled.store(false, Ordering::Release);
	}

	#[inline]
	pub fn is_enabled(&self) -> bool {
		self.enabled.load(Ordering::Acquire)
	}

	#[inline]
	fn bump(&self, counter: &AtomicU64, n: u64) {
		if n > 0 && self.is_enabled() {
			counter.fetch_add(n, Ordering::Relaxed);
		}
	}

	pub fn record_hit(&self) {
		self.bump(&self.hits, 1);
	}

	pub fn record_miss(&self) {
		self.bump(&self.misses, 1);
	}

	pub fn record_write(&self, replaced: bool) {
		if replaced {
			self.bump(&self.updates, 1);
		} else {
			self.bump(&self.inserts, 1);
		}
	}

	pub fn record_removals(&self, n: u64) {
		self.bump(&self.removals, n);
	}

	pub fn record_evictions(&self, n: u64) {
		self.bump(&self.evictions, n);
	}

	pub fn hits(&self) -> u64 {
		self.hits.load(Ordering::Relaxed)
	}

	pub fn misses(&self) -> u64 {
		self.misses.load(Ordering::Relaxed)
	}

	pub fn inserts(&self) -> u64 {
		self.inserts.load(Ordering::Relaxed)
	}

	pub fn updates(&self) -> u64 {
		self.updates.load(Ordering::Relaxed)
	}

	pub fn removals(&self) -> u64 {
		self.removals.load(Ordering::Relaxed)
	}

	pub fn evictions(&self) -> u64 {
		self.evictions.load(Ordering::Relaxed)
	}

	/// Zero every counter without changing the enabled state.
	pub fn reset(&self) {
		for counter in
			[&self.hits, &self.misses, &self.inserts, &self.updates, &self.removals, &self.evictions]
		{
			counter.store(0, Ordering::Relaxed);
		}
	}
}
