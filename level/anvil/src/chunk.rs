use crate::registry::BlockHandler;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use voxstore::Section;

/// Horizontal and per-section vertical extent of a chunk, in blocks.
pub const SECTION_SIZE: i32 = 16;

/// The in-memory column the codec reads from and writes into: chunk
/// coordinates, a contiguous range of sections, and the behavior handlers
/// attached to individual blocks.
///
/// Not internally synchronized. Mutation goes through `&mut self`, and the
/// save path's shared borrow guarantees the serialized snapshot cannot be
/// torn by concurrent writes.
#[derive(Clone)]
pub struct ChunkColumn {
	chunk_x: i32,
	chunk_z: i32,
	min_section: i32,
	max_section: i32,
	sections: Vec<Section>,
	/// Keyed by (local x, world y, local z).
	handlers: FxHashMap<(i32, i32, i32), Arc<dyn BlockHandler>>,
	last_update: i64
}

impl ChunkColumn {
	/// # Panics
	/// If `max_section <= min_section`.
	pub fn new(chunk_x: i32, chunk_z: i32, min_section: i32, max_section: i32) -> Self {
		assert!(
			max_section > min_section,
			"empty section range: [{}, {})",
			min_section,
			max_section
		);

		let sections = (min_section..max_section).map(|_| Section::new()).collect();

		ChunkColumn {
			chunk_x,
			chunk_z,
			min_section,
			max_section,
			sections,
			handlers: FxHashMap::default(),
			last_update: 0
		}
	}

	pub fn chunk_x(&self) -> i32 {
		self.chunk_x
	}

	pub fn chunk_z(&self) -> i32 {
		self.chunk_z
	}

	pub fn min_section(&self) -> i32 {
		self.min_section
	}

	pub fn max_section(&self) -> i32 {
		self.max_section
	}

	pub fn last_update(&self) -> i64 {
		self.last_update
	}

	pub fn set_last_update(&mut self, last_update: i64) {
		self.last_update = last_update;
	}

	/// Whether a world-space Y coordinate falls inside the section range.
	pub fn contains_y(&self, y: i32) -> bool {
		let section_y = y >> 4;
		section_y >= self.min_section && section_y < self.max_section
	}

	pub fn section(&self, section_y: i32) -> Option<&Section> {
		self.section_slot(section_y).map(|index| &self.sections[index])
	}

	pub fn section_mut(&mut self, section_y: i32) -> Option<&mut Section> {
		self.section_slot(section_y).map(move |index| &mut self.sections[index])
	}

	fn section_slot(&self, section_y: i32) -> Option<usize> {
		if section_y >= self.min_section && section_y < self.max_section {
			Some((section_y - self.min_section) as usize)
		} else {
			None
		}
	}

	/// Block-state id at (local x, world y, local z).
	///
	/// # Panics
	/// If `y` is outside the section range.
	pub fn get_block(&self, x: i32, y: i32, z: i32) -> u16 {
		let section = self.section(y >> 4).expect("block Y outside the section range");
		section.block_palette().get(x & 0xF, y & 0xF, z & 0xF) as u16
	}

	/// # Panics
	/// If `y` is outside the section range.
	pub fn set_block(&mut self, x: i32, y: i32, z: i32, state: u16) {
		let section = self.section_mut(y >> 4).expect("block Y outside the section range");
		section.block_palette_mut().set(x & 0xF, y & 0xF, z & 0xF, state as u32);
	}

	pub fn block_handler(&self, x: i32, y: i32, z: i32) -> Option<&Arc<dyn BlockHandler>> {
		self.handlers.get(&(x, y, z))
	}

	pub fn set_block_handler(&mut self, x: i32, y: i32, z: i32, handler: Arc<dyn BlockHandler>) {
		self.handlers.insert((x, y, z), handler);
	}

	pub fn remove_block_handler(&mut self, x: i32, y: i32, z: i32) {
		self.handlers.remove(&(x, y, z));
	}
}

#[cfg(test)]
mod test {
	use crate::chunk::ChunkColumn;
	use crate::registry::{BlockHandler, DummyHandler};
	use std::sync::Arc;

	#[test]
	fn test_block_access_across_sections() {
		let mut column = ChunkColumn::new(0, 0, -4, 20);

		column.set_block(0, -64, 0, 1);
		column.set_block(5, 0, 9, 2);
		column.set_block(15, 319, 15, 3);

		assert_eq!(column.get_block(0, -64, 0), 1);
		assert_eq!(column.get_block(5, 0, 9), 2);
		assert_eq!(column.get_block(15, 319, 15), 3);
		assert_eq!(column.get_block(0, 100, 0), 0);
	}

	#[test]
	fn test_contains_y() {
		let column = ChunkColumn::new(0, 0, -4, 20);

		assert!(column.contains_y(-64));
		assert!(column.contains_y(0));
		assert!(column.contains_y(319));
		assert!(!column.contains_y(-65));
		assert!(!column.contains_y(320));
	}

	#[test]
	#[should_panic]
	fn test_out_of_range_y_rejected() {
		let column = ChunkColumn::new(0, 0, 0, 16);
		column.get_block(0, -1, 0);
	}

	#[test]
	fn test_handlers() {
		let mut column = ChunkColumn::new(0, 0, 0, 16);
		let handler: Arc<dyn BlockHandler> = Arc::new(DummyHandler::new("test:chest"));

		column.set_block_handler(3, 40, 7, handler);
		assert_eq!(column.block_handler(3, 40, 7).unwrap().namespace_id(), "test:chest");
		assert!(column.block_handler(3, 41, 7).is_none());

		column.remove_block_handler(3, 40, 7);
		assert!(column.block_handler(3, 40, 7).is_none());
	}
}
