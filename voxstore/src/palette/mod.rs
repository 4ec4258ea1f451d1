mod packed;

use crate::palette::packed::PackedPalette;

/// Reusable scratch space for bulk palette writes.
///
/// `set_all` and `replace_all` stage one section's worth of values here
/// before rewriting the lane array in a single pass. Callers that process
/// many sections should create one buffer and pass it to each call.
#[derive(Debug, Default)]
pub struct WriteBuffer {
	cache: Vec<u32>
}

impl WriteBuffer {
	pub fn new() -> Self {
		WriteBuffer { cache: Vec::new() }
	}

	pub(crate) fn prepare(&mut self, len: usize) -> &mut [u32] {
		self.cache.clear();
		self.cache.resize(len, 0);

		&mut self.cache
	}
}

#[derive(Debug, Clone)]
enum Repr {
	/// Every slot implicitly holds the same value.
	Filled(u32),
	/// Bit-packed lanes, either palette-indexed or direct.
	Packed(PackedPalette)
}

/// A compact map from local (x, y, z) coordinates to integer values.
///
/// Starts out filled with 0 and switches to a bit-packed representation on
/// the first heterogeneous write. The packed representation stores small
/// palette indices while the palette table fits `max_bits_per_entry` bits
/// per entry, and raw values beyond that.
///
/// Cloning produces an independent palette; no backing storage is shared.
#[derive(Debug, Clone)]
pub struct Palette {
	dimension: u8,
	max_bits_per_entry: u8,
	default_bits_per_entry: u8,
	repr: Repr
}

impl Palette {
	/// Creates a palette suitable for block-state ids: dimension 16, up to
	/// 8 bits per indexed entry, starting at 4 bits.
	pub fn blocks() -> Self {
		Palette::new(16, 8, 4)
	}

	/// # Panics
	/// If `dimension` is not a power of two greater than 1.
	pub fn new(dimension: u8, max_bits_per_entry: u8, bits_per_entry: u8) -> Self {
		assert!(
			dimension > 1 && dimension.is_power_of_two(),
			"dimension must be a power of 2, got {}",
			dimension
		);

		Palette {
			dimension,
			max_bits_per_entry,
			default_bits_per_entry: bits_per_entry,
			repr: Repr::Filled(0)
		}
	}

	pub fn dimension(&self) -> u8 {
		self.dimension
	}

	pub fn max_bits_per_entry(&self) -> u8 {
		self.max_bits_per_entry
	}

	/// Current lane width. A filled palette reports 0.
	pub fn bits_per_entry(&self) -> u8 {
		match &self.repr {
			Repr::Filled(_) => 0,
			Repr::Packed(packed) => packed.bits_per_entry()
		}
	}

	/// Number of slots holding a non-zero value.
	pub fn count(&self) -> u32 {
		match &self.repr {
			Repr::Filled(0) => 0,
			Repr::Filled(_) => self.max_size(),
			Repr::Packed(packed) => packed.count()
		}
	}

	/// Total slot capacity, `dimension^3`.
	pub fn max_size(&self) -> u32 {
		let dimension = self.dimension as u32;
		dimension * dimension * dimension
	}

	/// # Panics
	/// If any coordinate is negative. Coordinates at or above `dimension`
	/// wrap.
	pub fn get(&self, x: i32, y: i32, z: i32) -> u32 {
		validate_coordinates(x, y, z);

		match &self.repr {
			Repr::Filled(value) => *value,
			Repr::Packed(packed) => packed.get(x as u32, y as u32, z as u32)
		}
	}

	/// # Panics
	/// If any coordinate is negative.
	pub fn set(&mut self, x: i32, y: i32, z: i32, value: u32) {
		validate_coordinates(x, y, z);

		self.packed().set(x as u32, y as u32, z as u32, value);
	}

	/// Sets every slot to `value`. Filling drops the packed storage
	/// entirely.
	pub fn fill(&mut self, value: u32) {
		self.repr = Repr::Filled(value);
	}

	/// Invokes `supplier` once per coordinate (y outermost, then z, then x)
	/// and rewrites the palette from the results. A supplier returning one
	/// constant value degenerates to `fill`.
	pub fn set_all(&mut self, buffer: &mut WriteBuffer, supplier: impl FnMut(i32, i32, i32) -> u32) {
		let mut packed = self.fresh_packed();
		if let Some(constant) = packed.set_all(buffer, supplier) {
			self.repr = Repr::Filled(constant);
		} else {
			self.repr = Repr::Packed(packed);
		}
	}

	/// Read-modify-write of a single slot.
	///
	/// # Panics
	/// If any coordinate is negative.
	pub fn replace(&mut self, x: i32, y: i32, z: i32, operator: impl FnOnce(u32) -> u32) {
		validate_coordinates(x, y, z);

		let old = self.get(x, y, z);
		let new = operator(old);

		if old != new {
			self.set(x, y, z, new);
		}
	}

	/// Read-modify-write of every slot, in the same scan order as
	/// `set_all`.
	pub fn replace_all(
		&mut self, buffer: &mut WriteBuffer, function: impl FnMut(i32, i32, i32, u32) -> u32
	) {
		self.packed().replace_all(buffer, function);
	}

	/// Emits every (x, y, z, value) triple in scan order.
	pub fn get_all(&self, consumer: impl FnMut(i32, i32, i32, u32)) {
		match &self.repr {
			Repr::Filled(value) => self.for_each_filled(*value, consumer),
			Repr::Packed(packed) => packed.retrieve_all(true, consumer)
		}
	}

	/// Emits only the triples whose value is non-zero.
	pub fn get_all_present(&self, consumer: impl FnMut(i32, i32, i32, u32)) {
		match &self.repr {
			Repr::Filled(0) => {}
			Repr::Filled(value) => self.for_each_filled(*value, consumer),
			Repr::Packed(packed) => packed.retrieve_all(false, consumer)
		}
	}

	fn for_each_filled(&self, value: u32, mut consumer: impl FnMut(i32, i32, i32, u32)) {
		let dimension = self.dimension as i32;

		for y in 0..dimension {
			for z in 0..dimension {
				for x in 0..dimension {
					consumer(x, y, z, value);
				}
			}
		}
	}

	fn fresh_packed(&self) -> PackedPalette {
		PackedPalette::new(self.dimension, self.max_bits_per_entry, self.default_bits_per_entry)
	}

	/// Promotes a filled palette to the packed representation, replacing the
	/// variant wholesale.
	fn packed(&mut self) -> &mut PackedPalette {
		if let Repr::Filled(value) = self.repr {
			let mut packed = self.fresh_packed();
			packed.fill(value);
			self.repr = Repr::Packed(packed);
		}

		match &mut self.repr {
			Repr::Packed(packed) => packed,
			Repr::Filled(_) => unreachable!()
		}
	}
}

fn validate_coordinates(x: i32, y: i32, z: i32) {
	assert!(x >= 0 && y >= 0 && z >= 0, "coordinates must be non-negative: {}, {}, {}", x, y, z);
}
