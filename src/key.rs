//! Key scheme: image identities, per-tile keys and per-image grouping keys.
//!
//! A [`TileKey`] is a pure function of `(ImageId, x, y)`. Two encodings exist:
//!
//! - **Packed**: a 64-bit image hash next to a 64-bit tile index holding both
//!   coordinates, used for [`ImageId::Hashed`].
//! - **Bytes**: the raw identity bytes with the tile index appended, used for
//!   [`ImageId::Unique`]. The tile index has a fixed width, so the concatenation
//!   is injective.
//!
//! Callers should only rely on equality and hashing, never on the width of a key.
//!
//! Every key carries its ahash, computed once at construction. The maps inside
//! the cache use [`PassthroughBuildHasher`] so that hash is never recomputed.

use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use ahash::RandomState;

use crate::error::{CacheError, Result};

/// Fixed seeds so identities and keys hash identically for the life of the process.
const KEY_SEEDS: [u64; 4] = [
	0x243f_6a88_85a3_08d3,
	0x1319_8a2e_0370_7344,
	0xa409_3822_299f_31d0,
	0x082e_fa98_ec4e_6c89,
];

static NEXT_UNIQUE_ID: AtomicU64 = AtomicU64::new(1);

fn key_state() -> &'static RandomState {
	static STATE: OnceLock<RandomState> = OnceLock::new();
	STATE.get_or_init(|| {
		RandomState::with_seeds(KEY_SEEDS[0], KEY_SEEDS[1], KEY_SEEDS[2], KEY_SEEDS[3])
	})
}

/// Stable identity of a logical image.
///
/// The identity outlives the image object: it is derived once by whoever owns
/// the image and handed to every cache call that refers to it.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ImageId {
	/// Identity derived from a 64-bit hash of the image object.
	Hashed(u64),
	/// Trusted, already-unique identity of arbitrary length.
	Unique(Arc<[u8]>),
}

impl ImageId {
	/// Identity from an existing 64-bit hash.
	pub fn hashed(hash: u64) -> Self {
		ImageId::Hashed(hash)
	}

	/// Identity from hashing any `Hash` value with the crate's fixed-seed hasher.
	pub fn of<H: Hash + ?Sized>(value: &H) -> Self {
		ImageId::Hashed(key_state().hash_one(value))
	}

	/// A fresh identity, distinct from every other identity minted in this process.
	pub fn unique() -> Self {
		let id = NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed);
		ImageId::Unique(Arc::from(id.to_be_bytes().as_slice()))
	}

	/// Identity from raw bytes (for example a big-integer image ID).
	///
	/// Empty input is the null identity and is rejected.
	pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
		if bytes.is_empty() {
			return Err(CacheError::NullImageId);
		}
		Ok(ImageId::Unique(Arc::from(bytes)))
	}

	/// Key of the tile at `(x, y)` of this image.
	pub fn tile_key(&self, x: i32, y: i32) -> TileKey {
		TileKey::new(self, x, y)
	}

	/// Grouping key of this image for the per-image index.
	pub fn image_key(&self) -> ImageKey {
		ImageKey::new(self)
	}
}

impl fmt::Debug for ImageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ImageId::Hashed(hash) => write!(f, "ImageId::Hashed({hash:#018x})"),
			ImageId::Unique(bytes) => write!(f, "ImageId::Unique({})", Hex(bytes)),
		}
	}
}

impl fmt::Display for ImageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ImageId::Hashed(hash) => write!(f, "{hash:016x}"),
			ImageId::Unique(bytes) => write!(f, "{}", Hex(bytes)),
		}
	}
}

struct Hex<'a>(&'a [u8]);

impl fmt::Display for Hex<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		for byte in self.0 {
			write!(f, "{byte:02x}")?;
		}
		Ok(())
	}
}

/// Position of a tile in its image's tile grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TileCoord {
	pub x: i32,
	pub y: i32,
}

impl TileCoord {
	pub const fn new(x: i32, y: i32) -> Self {
		Self {
			x,
			y,
		}
	}
}

impl From<(i32, i32)> for TileCoord {
	fn from((x, y): (i32, i32)) -> Self {
		Self::new(x, y)
	}
}

/// Pack both tile coordinates into one 64-bit index (y in the high half).
pub fn tile_index(x: i32, y: i32) -> u64 {
	((y as u32 as u64) << 32) | (x as u32 as u64)
}

#[derive(Clone, PartialEq, Eq)]
enum KeyRepr {
	Packed {
		image: u64,
		tile: u64,
	},
	Bytes(Arc<[u8]>),
}

/// Key of one cached tile: `(image identity, tile x, tile y)`.
#[derive(Clone)]
pub struct TileKey {
	hash: u64,
	repr: KeyRepr,
}

impl TileKey {
	/// Derive the key of tile `(x, y)` of `image`.
	pub fn new(image: &ImageId, x: i32, y: i32) -> Self {
		let tile = tile_index(x, y);
		let repr = match image {
			ImageId::Hashed(image) => KeyRepr::Packed {
				image: *image,
				tile,
			},
			ImageId::Unique(bytes) => {
				let mut buf = Vec::with_capacity(bytes.len() + 8);
				buf.extend_from_slice(bytes);
				buf.extend_from_slice(&tile.to_be_bytes());
				KeyRepr::Bytes(Arc::from(buf))
			}
		};
		let hash = match &repr {
			KeyRepr::Packed {
				image,
				tile,
			} => key_state().hash_one((image, tile)),
			KeyRepr::Bytes(bytes) => key_state().hash_one(&**bytes),
		};
		Self {
			hash,
			repr,
		}
	}

	/// Pre-computed hash of this key.
	pub fn hash_value(&self) -> u64 {
		self.hash
	}
}

impl Hash for TileKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.hash.hash(state);
	}
}

impl PartialEq for TileKey {
	fn eq(&self, other: &Self) -> bool {
		self.hash == other.hash && self.repr == other.repr
	}
}

impl Eq for TileKey {}

impl fmt::Debug for TileKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.repr {
			KeyRepr::Packed {
				image,
				tile,
			} => write!(f, "TileKey({image:016x}:{tile:016x})"),
			KeyRepr::Bytes(bytes) => write!(f, "TileKey({})", Hex(bytes)),
		}
	}
}

/// Grouping key for all tiles of one image.
#[derive(Clone)]
pub struct ImageKey {
	hash: u64,
	id: ImageId,
}

impl ImageKey {
	pub fn new(id: &ImageId) -> Self {
		Self {
			hash: key_state().hash_one(id),
			id: id.clone(),
		}
	}

	/// The image identity this key groups.
	pub fn id(&self) -> &ImageId {
		&self.id
	}

	/// Pre-computed hash of this key.
	pub fn hash_value(&self) -> u64 {
		self.hash
	}
}

impl Hash for ImageKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.hash.hash(state);
	}
}

impl PartialEq for ImageKey {
	fn eq(&self, other: &Self) -> bool {
		self.hash == other.hash && self.id == other.id
	}
}

impl Eq for ImageKey {}

impl fmt::Debug for ImageKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ImageKey").field(&self.id).finish()
	}
}

/// Passthrough hasher for keys that carry a pre-computed hash.
#[derive(Default)]
pub(crate) struct PassthroughHasher(u64);

impl Hasher for PassthroughHasher {
	fn finish(&self) -> u64 {
		self.0
	}

	fn write(&mut self, _bytes: &[u8]) {
		panic!("PassthroughHasher only works with u64 hash values");
	}

	fn write_u64(&mut self, i: u64) {
		self.0 = i;
	}
}

/// Build hasher for passthrough (just returns the hash as-is).
#[derive(Clone, Default)]
pub(crate) struct PassthroughBuildHasher;

impl BuildHasher for PassthroughBuildHasher {
	type Hasher = PassthroughHasher;

	fn build_hasher(&self) -> Self::Hasher {
		PassthroughHasher::default()
	}
}
