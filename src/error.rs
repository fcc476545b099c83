//! Error types for cache configuration and argument validation.

use thiserror::Error;

/// Errors reported synchronously to the caller that introduced them.
///
/// None of these leave the cache in a modified state: validation always runs
/// before any entry, counter, or setting is touched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CacheError {
	/// Memory capacity must be a positive number of bytes.
	#[error("invalid memory capacity: {0} bytes (must be > 0)")]
	InvalidCapacity(usize),

	/// Memory threshold must lie in `[0.0, 1.0]`.
	#[error("invalid memory threshold: {0} (must be within 0.0..=1.0)")]
	InvalidThreshold(f64),

	/// The fixed per-entry bookkeeping overhead must be non-zero.
	#[error("invalid entry overhead: must be > 0 bytes")]
	InvalidEntryOverhead,

	/// Shard count must be positive.
	#[error("invalid shard count: {0} (must be > 0)")]
	InvalidShardCount(usize),

	/// An image identity was empty.
	#[error("image identity must not be empty")]
	NullImageId,

	/// Parallel batch arguments disagree in length.
	#[error("{what} length mismatch: expected {expected}, got {actual}")]
	LengthMismatch {
		what: &'static str,
		expected: usize,
		actual: usize,
	},
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_error_messages() {
		assert_eq!(
			CacheError::InvalidCapacity(0).to_string(),
			"invalid memory capacity: 0 bytes (must be > 0)"
		);
		assert_eq!(
			CacheError::InvalidThreshold(1.5).to_string(),
			"invalid memory threshold: 1.5 (must be within 0.0..=1.0)"
		);

		let err = CacheError::LengthMismatch {
			what: "tiles",
			expected: 3,
			actual: 2,
		};
		assert_eq!(err.to_string(), "tiles length mismatch: expected 3, got 2");
	}
}
