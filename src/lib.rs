//! # Tile Cache
//!
//! A concurrent, memory-bounded cache for computed image tiles:
//! - **Byte-bounded capacity** with a configurable fill threshold eviction
//!   reduces usage to
//! - **Cost-aware eviction**: tiles of dropped images go first, then the cheapest
//!   to recompute, then the least recently used
//! - **Per-image index** so all tiles of one image are reachable (and removable)
//!   without scanning other images
//! - **Weak owners**: caching a tile never keeps its image alive
//! - **Two store variants** behind one API: an exact linked-recency store with a
//!   global lock, and a sharded store with sampled victim search
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tile_cache::{CacheBuilder, ImageId, Raster, SampleType, TileOwner};
//!
//! // The image whose tiles get cached
//! struct Image {
//!     id: ImageId,
//! }
//!
//! impl TileOwner for Image {
//!     fn image_id(&self) -> &ImageId {
//!         &self.id
//!     }
//! }
//!
//! // 64 MB, evicting down to 60% when full
//! let cache = CacheBuilder::<Raster>::new(64 * 1024 * 1024)
//!     .threshold(0.6)
//!     .build()
//!     .expect("valid configuration");
//!
//! let image = Arc::new(Image { id: ImageId::unique() });
//!
//! // Cache a 256x256 RGB tile that took 12.5ms to compute
//! let tile = Raster::new(SampleType::U8, 256 * 256, 3);
//! cache.add(&image, 0, 0, tile, Some(12.5));
//!
//! // Lookups return an `Arc`, no lock is held afterwards
//! if let Some(tile) = cache.get_tile(image.image_id(), 0, 0) {
//!     assert_eq!(tile.bank(0).map(<[u8]>::len), Some(256 * 256));
//! }
//!
//! // The image's tiles are invalid now
//! assert_eq!(cache.remove_tiles(image.image_id()), 1);
//! ```
//!
//! ## Thread Safety
//!
//! [`TileCache`] is `Send + Sync` and can be shared across worker threads via
//! `Arc`. All operations are synchronous and safe to call from async tasks;
//! returned tiles may be held across `.await` points.
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events (eviction passes at `debug`, single
//! victims at `trace`, reconfiguration at `info`) and installs no subscriber.

mod builder;
mod cache;
mod config;
mod diagnostics;
mod entry;
mod error;
mod index;
mod key;
mod linked;
mod metrics;
mod policy;
mod recency;
mod shard;
mod sharded;
mod shared;
mod tile;

pub use builder::CacheBuilder;
pub use cache::TileCache;
pub use config::{
	CacheConfig, CacheVariant, DEFAULT_ENTRY_OVERHEAD, DEFAULT_MEMORY_CAPACITY,
	DEFAULT_MEMORY_THRESHOLD, DEFAULT_SHARD_COUNT,
};
pub use diagnostics::TileObserver;
pub use entry::{TileAction, TileEntry};
pub use error::{CacheError, Result};
pub use key::{ImageId, ImageKey, TileCoord, TileKey, tile_index};
pub use linked::LinkedTileCache;
pub use metrics::CacheMetrics;
pub use sharded::ShardedTileCache;
pub use tile::{Raster, SampleType, TileOwner, TilePayload};
