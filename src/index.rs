//! Per-image secondary index: image key -> set of tile keys.
//!
//! Lets `get_tiles`/`remove_tiles` reach every tile of one image without
//! scanning the tiles of any other image.

use hashbrown::{HashMap, HashSet};

use crate::key::{ImageKey, PassthroughBuildHasher, TileKey};

type TileSet = HashSet<TileKey, PassthroughBuildHasher>;

#[derive(Default)]
pub(crate) struct ImageIndex {
	images: HashMap<ImageKey, TileSet, PassthroughBuildHasher>,
}

impl ImageIndex {
	pub fn new() -> Self {
		Self {
			images: HashMap::with_hasher(PassthroughBuildHasher),
		}
	}

	/// Register `key` under `image`. Returns false if it was already registered.
	pub fn insert(&mut self, image: &ImageKey, key: TileKey) -> bool {
		if let Some(tiles) = self.images.get_mut(image) {
			return tiles.insert(key);
		}
		let mut tiles = TileSet::with_hasher(PassthroughBuildHasher);
		tiles.insert(key);
		self.images.insert(image.clone(), tiles);
		true
	}

	/// Unregister `key`. Images without tiles are dropped from the index.
	pub fn remove(&mut self, image: &ImageKey, key: &TileKey) -> bool {
		let Some(tiles) = self.images.get_mut(image) else {
			return false;
		};
		let removed = tiles.remove(key);
		if tiles.is_empty() {
			self.images.remove(image);
		}
		removed
	}

	/// Snapshot of the tile keys registered under `image`.
	pub fn keys(&self, image: &ImageKey) -> Vec<TileKey> {
		self.images.get(image).map(|tiles| tiles.iter().cloned().collect()).unwrap_or_default()
	}

	/// Remove and return every tile key registered under `image`.
	pub fn take(&mut self, image: &ImageKey) -> Vec<TileKey> {
		self.images.remove(image).map(|tiles| tiles.into_iter().collect()).unwrap_or_default()
	}

	#[cfg(test)]
	pub fn contains(&self, image: &ImageKey, key: &TileKey) -> bool {
		self.images.get(image).is_some_and(|tiles| tiles.contains(key))
	}

	/// Number of tiles registered under `image`.
	#[cfg(test)]
	pub fn tiles_of(&self, image: &ImageKey) -> usize {
		self.images.get(image).map_or(0, TileSet::len)
	}

	/// Number of images with at least one tile.
	#[cfg(test)]
	pub fn image_count(&self) -> usize {
		self.images.len()
	}

	/// Remove everything, returning each image with its tile keys.
	pub fn drain(&mut self) -> Vec<(ImageKey, Vec<TileKey>)> {
		self.images.drain().map(|(image, tiles)| (image, tiles.into_iter().collect())).collect()
	}

	pub fn clear(&mut self) {
		self.images.clear();
	}
}
