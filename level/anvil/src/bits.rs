//! Bit packing for persisted palette indices.
//!
//! Lanes are `bits` wide and never cross a 64-bit word boundary; each word
//! holds `64 / bits` lanes with the leftover high bits unused, matching the
//! in-memory palette layout.

/// Lane width for a palette list of `len` entries: `max(1, ceil(log2(len)))`.
pub fn bits_for_palette(len: usize) -> u32 {
	if len <= 2 {
		return 1;
	}

	64 - (len as u64 - 1).leading_zeros()
}

/// Packs indices into a long array, in order.
pub fn pack(indices: &[u32], bits: u32) -> Vec<i64> {
	let lanes_per_word = (64 / bits) as usize;
	let words = (indices.len() + lanes_per_word - 1) / lanes_per_word;

	let mut packed = vec![0i64; words];

	for (i, &index) in indices.iter().enumerate() {
		let word = i / lanes_per_word;
		let bit = (i % lanes_per_word) as u32 * bits;

		packed[word] |= ((index as u64) << bit) as i64;
	}

	packed
}

/// Unpacks a long array into `out`, returning false if the array is too
/// short to cover every lane.
pub fn unpack(out: &mut [u32], packed: &[i64], bits: u32) -> bool {
	let lanes_per_word = (64 / bits) as usize;

	if packed.len() * lanes_per_word < out.len() {
		return false;
	}

	let mask = (1u64 << bits) - 1;

	for (i, lane) in out.iter_mut().enumerate() {
		let word = packed[i / lanes_per_word] as u64;
		let bit = (i % lanes_per_word) as u32 * bits;

		*lane = (word >> bit & mask) as u32;
	}

	true
}

#[cfg(test)]
mod test {
	use crate::bits::{bits_for_palette, pack, unpack};

	#[test]
	fn test_bits_for_palette() {
		assert_eq!(bits_for_palette(1), 1);
		assert_eq!(bits_for_palette(2), 1);
		assert_eq!(bits_for_palette(3), 2);
		assert_eq!(bits_for_palette(4), 2);
		assert_eq!(bits_for_palette(5), 3);
		assert_eq!(bits_for_palette(16), 4);
		assert_eq!(bits_for_palette(17), 5);
		assert_eq!(bits_for_palette(4096), 12);
	}

	#[test]
	fn test_round_trip() {
		for &bits in &[1u32, 2, 3, 4, 5, 8, 12] {
			let mask = (1u32 << bits) - 1;
			let indices: Vec<u32> = (0..4096u32).map(|i| i.wrapping_mul(2654435761) & mask).collect();

			let packed = pack(&indices, bits);

			let mut unpacked = vec![0u32; indices.len()];
			assert!(unpack(&mut unpacked, &packed, bits));
			assert_eq!(unpacked, indices);
		}
	}

	#[test]
	fn test_lanes_do_not_straddle_words() {
		// 3-bit lanes: 21 per word, bit 63 unused.
		let indices = vec![0b111u32; 22];
		let packed = pack(&indices, 3);

		assert_eq!(packed.len(), 2);
		assert_eq!(packed[0] as u64 >> 63, 0);
		assert_eq!(packed[1] as u64 & 0b111, 0b111);
	}

	#[test]
	fn test_unpack_rejects_short_input() {
		let mut out = vec![0u32; 4096];
		assert!(!unpack(&mut out, &vec![0i64; 100], 4));
	}
}
