//! Victim ordering shared by both cache variants.
//!
//! The smallest [`VictimRank`] is evicted first. The tie-break chain, most
//! significant first:
//!
//! 1. entries whose owner is gone,
//! 2. lower recomputation cost (an entry without a cost counts as `0.0`, and
//!    negative costs are stored as `0.0`),
//! 3. older last access,
//! 4. older insertion.

use std::cmp::Ordering;

use crate::entry::TileEntry;

#[derive(Debug, Clone, Copy)]
pub(crate) struct VictimRank {
	live: bool,
	cost: f64,
	last_access: u64,
	seq: u64,
}

impl VictimRank {
	pub fn of<T>(entry: &TileEntry<T>) -> Self {
		Self {
			live: !entry.is_stale(),
			cost: entry.cost_metric().unwrap_or(0.0),
			last_access: entry.last_access_millis(),
			seq: entry.sequence(),
		}
	}

	#[cfg(test)]
	pub fn is_stale(&self) -> bool {
		!self.live
	}
}

impl PartialEq for VictimRank {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for VictimRank {}

impl PartialOrd for VictimRank {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for VictimRank {
	fn cmp(&self, other: &Self) -> Ordering {
		// false < true puts stale entries first
		self.live
			.cmp(&other.live)
			.then_with(|| self.cost.total_cmp(&other.cost))
			.then_with(|| self.last_access.cmp(&other.last_access))
			.then_with(|| self.seq.cmp(&other.seq))
	}
}
