//! Seams to the surrounding imaging pipeline: tile payloads and tile owners.

use crate::key::ImageId;

/// A tile buffer the cache can account for.
///
/// Payloads are immutable once handed to the cache; a newer version of a tile is
/// a new payload, never an in-place edit.
pub trait TilePayload: Send + Sync + 'static {
	/// Bits per stored sample (8 for bytes, 32 for floats, ...).
	fn sample_bits(&self) -> usize;

	/// Number of elements in each bank.
	fn element_count(&self) -> usize;

	/// Number of banks.
	fn bank_count(&self) -> usize;

	/// Bytes occupied by the sample data.
	fn footprint(&self) -> usize {
		(self.sample_bits() / 8) * self.element_count() * self.bank_count()
	}
}

/// The image a cached tile belongs to.
///
/// The cache only observes owners through `Weak` handles, so caching a tile never
/// keeps its image alive.
pub trait TileOwner: Send + Sync {
	/// Stable identity of this image, derived once when the image was created.
	fn image_id(&self) -> &ImageId;
}

/// Storage type of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleType {
	U8,
	I16,
	U16,
	I32,
	F32,
	F64,
}

impl SampleType {
	/// Size of one sample in bits.
	pub const fn bits(self) -> usize {
		match self {
			SampleType::U8 => 8,
			SampleType::I16 | SampleType::U16 => 16,
			SampleType::I32 | SampleType::F32 => 32,
			SampleType::F64 => 64,
		}
	}

	/// Size of one sample in bytes.
	pub const fn bytes(self) -> usize {
		self.bits() / 8
	}
}

/// A banked raster buffer: `bank_count` banks of `elements` samples each.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
	sample_type: SampleType,
	elements: usize,
	banks: Vec<Box<[u8]>>,
}

impl Raster {
	/// A zero-filled raster.
	pub fn new(sample_type: SampleType, elements: usize, bank_count: usize) -> Self {
		let bank_bytes = elements * sample_type.bytes();
		Self {
			sample_type,
			elements,
			banks: (0..bank_count).map(|_| vec![0u8; bank_bytes].into_boxed_slice()).collect(),
		}
	}

	/// A raster with every byte of every bank set to `value`.
	pub fn filled(sample_type: SampleType, elements: usize, bank_count: usize, value: u8) -> Self {
		let bank_bytes = elements * sample_type.bytes();
		Self {
			sample_type,
			elements,
			banks: (0..bank_count)
				.map(|_| vec![value; bank_bytes].into_boxed_slice())
				.collect(),
		}
	}

	/// Build a raster from raw banks. Returns `None` unless every bank holds a whole
	/// number of samples and all banks have the same length.
	pub fn from_banks(sample_type: SampleType, banks: Vec<Vec<u8>>) -> Option<Self> {
		let bank_bytes = banks.first().map_or(0, Vec::len);
		if bank_bytes % sample_type.bytes() != 0 || banks.iter().any(|b| b.len() != bank_bytes) {
			return None;
		}
		Some(Self {
			sample_type,
			elements: bank_bytes / sample_type.bytes(),
			banks: banks.into_iter().map(Vec::into_boxed_slice).collect(),
		})
	}

	pub fn sample_type(&self) -> SampleType {
		self.sample_type
	}

	/// Raw bytes of bank `index`.
	pub fn bank(&self, index: usize) -> Option<&[u8]> {
		self.banks.get(index).map(|bank| &**bank)
	}
}

impl TilePayload for Raster {
	fn sample_bits(&self) -> usize {
		self.sample_type.bits()
	}

	fn element_count(&self) -> usize {
		self.elements
	}

	fn bank_count(&self) -> usize {
		self.banks.len()
	}
}
