use crate::bits_to_represent;
use crate::palette::WriteBuffer;
use rustc_hash::FxHashMap;

/// Lane width used once the palette table has been abandoned. Wide enough
/// for the whole block-state id domain.
const DIRECT_BITS: u8 = 15;

/// Bit-packed palette storage.
///
/// Lanes are `bits_per_entry` wide and never straddle a 64-bit word; each
/// word holds `64 / bits_per_entry` lanes with the leftover high bits
/// unused. While `bits_per_entry <= max_bits_per_entry` the lanes hold
/// indices into `palette_to_value`; past that they hold raw values.
#[derive(Debug, Clone)]
pub(crate) struct PackedPalette {
	dimension: u8,
	max_bits_per_entry: u8,
	bits_per_entry: u8,
	count: u32,
	values: Vec<u64>,
	/// Palette index -> value. Unused (empty) in direct mode.
	palette_to_value: Vec<u32>,
	/// Value -> palette index, the inverse of `palette_to_value`.
	value_to_palette: FxHashMap<u32, u32>
}

impl PackedPalette {
	pub fn new(dimension: u8, max_bits_per_entry: u8, bits_per_entry: u8) -> Self {
		assert!(bits_per_entry >= 1 && bits_per_entry <= DIRECT_BITS);

		let mut value_to_palette = FxHashMap::default();
		value_to_palette.insert(0, 0);

		let max_size = {
			let dimension = dimension as u32;
			dimension * dimension * dimension
		};

		let values_per_word = 64 / bits_per_entry as u32;
		let words = (max_size + values_per_word - 1) / values_per_word;

		PackedPalette {
			dimension,
			max_bits_per_entry,
			bits_per_entry,
			count: 0,
			values: vec![0; words as usize],
			palette_to_value: vec![0],
			value_to_palette
		}
	}

	pub fn bits_per_entry(&self) -> u8 {
		self.bits_per_entry
	}

	pub fn count(&self) -> u32 {
		self.count
	}

	fn max_size(&self) -> u32 {
		let dimension = self.dimension as u32;
		dimension * dimension * dimension
	}

	fn has_palette(&self) -> bool {
		self.bits_per_entry <= self.max_bits_per_entry
	}

	/// Linear index in (y, z, x) scan order.
	fn lane_index(&self, x: u32, y: u32, z: u32) -> u32 {
		let mask = self.dimension as u32 - 1;
		let bits = bits_to_represent(mask) as u32;

		(y & mask) << (bits << 1) | (z & mask) << bits | (x & mask)
	}

	pub fn get(&self, x: u32, y: u32, z: u32) -> u32 {
		let bits = self.bits_per_entry as u32;
		let lane = self.lane_index(x, y, z);
		let values_per_word = 64 / bits;
		let word = lane / values_per_word;
		let bit = lane % values_per_word * bits;

		let index = (self.values[word as usize] >> bit) as u32 & ((1 << bits) - 1);

		if self.has_palette() {
			self.palette_to_value[index as usize]
		} else {
			index
		}
	}

	pub fn set(&mut self, x: u32, y: u32, z: u32, value: u32) {
		let index = self.palette_index(value) as u64;

		let bits = self.bits_per_entry as u32;
		let lane = self.lane_index(x, y, z);
		let values_per_word = 64 / bits;
		let word = (lane / values_per_word) as usize;
		let bit = lane % values_per_word * bits;

		let clear = (1u64 << bits) - 1;
		let old = self.values[word] >> bit & clear;
		self.values[word] = self.values[word] & !(clear << bit) | (index << bit);

		// Keep the non-zero slot count in sync without a rescan.
		let was_empty = old == 0;
		if was_empty != (index == 0) {
			if was_empty {
				self.count += 1;
			} else {
				self.count -= 1;
			}
		}
	}

	pub fn fill(&mut self, value: u32) {
		if value == 0 {
			for word in self.values.iter_mut() {
				*word = 0;
			}
			self.count = 0;
			return;
		}

		let index = self.palette_index(value) as u64;
		let bits = self.bits_per_entry as u32;
		let values_per_word = 64 / bits;

		let mut word = 0u64;
		for i in 0..values_per_word {
			word |= index << (i * bits);
		}

		for slot in self.values.iter_mut() {
			*slot = word;
		}
		self.count = self.max_size();
	}

	/// Stages the supplier's output in `buffer`, then rewrites the lanes in
	/// one pass. Returns the constant value instead if the supplier turned
	/// out to be constant, leaving the lanes untouched.
	pub fn set_all(
		&mut self, buffer: &mut WriteBuffer, mut supplier: impl FnMut(i32, i32, i32) -> u32
	) -> Option<u32> {
		let dimension = self.dimension as i32;
		let cache = buffer.prepare(self.max_size() as usize);

		let mut constant = None;
		let mut mixed = false;
		let mut count = 0;
		let mut index = 0;

		for y in 0..dimension {
			for z in 0..dimension {
				for x in 0..dimension {
					let value = supplier(x, y, z);

					match constant {
						None => constant = Some(value),
						Some(previous) if previous != value => mixed = true,
						Some(_) => {}
					}

					cache[index] = value;
					if value != 0 {
						count += 1;
					}
					index += 1;
				}
			}
		}

		if !mixed {
			return constant;
		}

		self.convert_to_indices(cache);
		self.update_all(cache);
		self.count = count;

		None
	}

	pub fn replace_all(
		&mut self, buffer: &mut WriteBuffer, mut function: impl FnMut(i32, i32, i32, u32) -> u32
	) {
		let cache = buffer.prepare(self.max_size() as usize);

		let mut index = 0;
		self.retrieve_all(true, |x, y, z, value| {
			cache[index] = function(x, y, z, value);
			index += 1;
		});
		debug_assert_eq!(index, cache.len());

		let count = cache.iter().filter(|&&slot| slot != 0).count() as u32;

		self.convert_to_indices(cache);
		self.update_all(cache);
		self.count = count;
	}

	/// Rewrites an array of raw values into lane representation. Registers
	/// every value before converting any slot, so that a mid-conversion
	/// resize (which changes what a lane holds) cannot leave earlier slots
	/// stale.
	fn convert_to_indices(&mut self, cache: &mut [u32]) {
		for &slot in cache.iter() {
			if slot != 0 {
				self.palette_index(slot);
			}
		}

		if self.has_palette() {
			for slot in cache.iter_mut() {
				if *slot != 0 {
					*slot = self.value_to_palette[slot];
				}
			}
		}
	}

	pub fn retrieve_all(&self, consume_empty: bool, mut consumer: impl FnMut(i32, i32, i32, u32)) {
		if !consume_empty && self.count == 0 {
			return;
		}

		let bits = self.bits_per_entry as u32;
		let mask = (1u64 << bits) - 1;
		let values_per_word = 64 / bits;
		let size = self.max_size();

		let dimension_mask = self.dimension as u32 - 1;
		let dimension_bits = bits_to_represent(dimension_mask) as u32;

		for (i, &word) in self.values.iter().enumerate() {
			let start = i as u32 * values_per_word;
			let end = (start + values_per_word).min(size);

			for lane in start..end {
				let bit = (lane - start) * bits;
				let index = (word >> bit & mask) as u32;

				if consume_empty || index != 0 {
					let y = lane >> (dimension_bits << 1);
					let z = lane >> dimension_bits & dimension_mask;
					let x = lane & dimension_mask;

					let value = if self.has_palette() {
						self.palette_to_value[index as usize]
					} else {
						index
					};

					consumer(x as i32, y as i32, z as i32, value);
				}
			}
		}
	}

	/// Rewrites every lane from a full array of palette indices.
	fn update_all(&mut self, indices: &[u32]) {
		let size = self.max_size();
		debug_assert!(indices.len() >= size as usize);

		let bits = self.bits_per_entry as u32;
		let values_per_word = 64 / bits;
		let clear = (1u64 << bits) - 1;

		for (i, word) in self.values.iter_mut().enumerate() {
			let start = i as u32 * values_per_word;
			let end = (start + values_per_word).min(size);

			let mut block = *word;
			for lane in start..end {
				let bit = (lane - start) * bits;
				block = block & !(clear << bit) | (indices[lane as usize] as u64) << bit;
			}
			*word = block;
		}
	}

	/// Rebuilds the lane array one bit wider, or snaps to the direct width
	/// when the table-based mode is exhausted.
	fn resize(&mut self, new_bits: u8) {
		let direct = new_bits > self.max_bits_per_entry;
		let new_bits = if direct { DIRECT_BITS } else { new_bits };

		let mut replacement = PackedPalette::new(self.dimension, self.max_bits_per_entry, new_bits);
		replacement.palette_to_value = self.palette_to_value.clone();
		replacement.value_to_palette = self.value_to_palette.clone();

		self.retrieve_all(true, |x, y, z, value| {
			replacement.set(x as u32, y as u32, z as u32, value);
		});
		debug_assert_eq!(replacement.count, self.count);

		if direct {
			replacement.palette_to_value = Vec::new();
			replacement.value_to_palette = FxHashMap::default();
		}

		*self = replacement;
	}

	/// Resolves a value to the lane representation, growing the palette
	/// table (and possibly the lane width) as needed.
	///
	/// # Panics
	/// If `value` does not fit the direct lane width. An oversized value
	/// would bleed into the neighboring lane, so it is rejected on every
	/// write path rather than stored truncated.
	fn palette_index(&mut self, value: u32) -> u32 {
		assert!(
			value < 1 << DIRECT_BITS,
			"value {} does not fit a {}-bit lane",
			value,
			DIRECT_BITS
		);

		if !self.has_palette() {
			return value;
		}

		if let Some(&index) = self.value_to_palette.get(&value) {
			return index;
		}

		let next = self.palette_to_value.len() as u32;
		if next >= 1 << self.bits_per_entry {
			// Table is full at this width.
			self.resize(self.bits_per_entry + 1);
			return self.palette_index(value);
		}

		self.value_to_palette.insert(value, next);
		self.palette_to_value.push(value);

		next
	}
}

#[cfg(test)]
mod test {
	use crate::palette::WriteBuffer;
	use crate::palette::packed::PackedPalette;

	#[test]
	fn test_lane_index_order() {
		let palette = PackedPalette::new(16, 8, 4);

		assert_eq!(palette.lane_index(0, 0, 0), 0);
		assert_eq!(palette.lane_index(1, 0, 0), 1);
		assert_eq!(palette.lane_index(0, 0, 1), 16);
		assert_eq!(palette.lane_index(0, 1, 0), 256);
		assert_eq!(palette.lane_index(15, 15, 15), 4095);

		// Out-of-range components wrap
		assert_eq!(palette.lane_index(16, 0, 0), 0);
	}

	#[test]
	fn test_resize_preserves_values() {
		let mut palette = PackedPalette::new(16, 8, 1);

		// 1 bit indexes 2 entries; the third distinct value forces a resize.
		palette.set(0, 0, 0, 100);
		palette.set(1, 0, 0, 200);
		assert_eq!(palette.bits_per_entry(), 1);

		palette.set(2, 0, 0, 300);
		assert_eq!(palette.bits_per_entry(), 2);

		assert_eq!(palette.get(0, 0, 0), 100);
		assert_eq!(palette.get(1, 0, 0), 200);
		assert_eq!(palette.get(2, 0, 0), 300);
		assert_eq!(palette.count(), 3);
	}

	#[test]
	fn test_fill_packs_constant_word() {
		let mut palette = PackedPalette::new(16, 8, 4);
		palette.fill(6);

		assert_eq!(palette.count(), 4096);

		let mut present = 0;
		palette.retrieve_all(false, |_, _, _, value| {
			assert_eq!(value, 6);
			present += 1;
		});
		assert_eq!(present, 4096);
	}

	#[test]
	fn test_retrieve_all_skips_when_empty() {
		let palette = PackedPalette::new(16, 8, 4);

		let mut visited = 0;
		palette.retrieve_all(false, |_, _, _, _| visited += 1);
		assert_eq!(visited, 0);
	}

	#[test]
	fn test_direct_mode_stores_raw_values() {
		let mut palette = PackedPalette::new(4, 2, 1);

		// 2 max bits = 4 indexed entries; the fifth distinct value snaps the
		// palette to the direct width.
		for i in 0..5u32 {
			palette.set(i % 4, 0, i / 4, 1000 + i);
		}

		assert_eq!(palette.bits_per_entry(), 15);
		assert!(!palette.has_palette());

		for i in 0..5u32 {
			assert_eq!(palette.get(i % 4, 0, i / 4), 1000 + i);
		}
	}

	#[test]
	fn test_direct_mode_stores_widest_value() {
		let mut palette = PackedPalette::new(4, 2, 1);

		for i in 0..5u32 {
			palette.set(i % 4, 0, i / 4, 1000 + i);
		}
		assert!(!palette.has_palette());

		// The widest representable value must not leak into its neighbors.
		palette.set(1, 0, 0, 0x7FFF);
		palette.set(2, 0, 0, 1);

		assert_eq!(palette.get(1, 0, 0), 0x7FFF);
		assert_eq!(palette.get(0, 0, 0), 1000);
		assert_eq!(palette.get(2, 0, 0), 1);
	}

	#[test]
	#[should_panic]
	fn test_direct_mode_rejects_oversized_value() {
		let mut palette = PackedPalette::new(4, 2, 1);

		for i in 0..5u32 {
			palette.set(i % 4, 0, i / 4, 1000 + i);
		}

		palette.set(0, 0, 0, 1 << 15);
	}

	#[test]
	fn test_set_all_snapping_to_direct_mode() {
		let mut palette = PackedPalette::new(4, 2, 1);
		let mut buffer = WriteBuffer::new();

		// 64 distinct values blow far past the 4-entry indexed limit, so the
		// bulk write has to settle on the direct width before converting.
		let result = palette.set_all(&mut buffer, |x, y, z| (y * 16 + z * 4 + x) as u32 + 500);

		assert_eq!(result, None);
		assert!(!palette.has_palette());
		assert_eq!(palette.count(), 64);
		assert_eq!(palette.get(0, 0, 0), 500);
		assert_eq!(palette.get(3, 3, 3), 563);
	}

	#[test]
	fn test_set_all_reports_constant() {
		let mut palette = PackedPalette::new(16, 8, 4);
		let mut buffer = WriteBuffer::new();

		assert_eq!(palette.set_all(&mut buffer, |_, _, _| 3), Some(3));
		assert_eq!(palette.set_all(&mut buffer, |x, _, _| x as u32), None);
	}
}
