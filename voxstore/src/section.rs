use crate::palette::Palette;

/// One 16x16x16 vertical slice of a chunk, owning its block palette.
#[derive(Debug, Clone)]
pub struct Section {
	block_palette: Palette
}

impl Section {
	pub fn new() -> Self {
		Section { block_palette: Palette::blocks() }
	}

	pub fn block_palette(&self) -> &Palette {
		&self.block_palette
	}

	pub fn block_palette_mut(&mut self) -> &mut Palette {
		&mut self.block_palette
	}

	pub fn clear(&mut self) {
		self.block_palette.fill(0);
	}
}

impl Default for Section {
	fn default() -> Self {
		Section::new()
	}
}

#[cfg(test)]
mod test {
	use crate::section::Section;

	#[test]
	fn test_clear() {
		let mut section = Section::new();
		section.block_palette_mut().set(1, 2, 3, 77);
		assert_eq!(section.block_palette().count(), 1);

		section.clear();
		assert_eq!(section.block_palette().count(), 0);
		assert_eq!(section.block_palette().get(1, 2, 3), 0);
	}

	#[test]
	fn test_clone_is_deep() {
		let mut section = Section::new();
		section.block_palette_mut().set(0, 0, 0, 5);

		let mut copy = section.clone();
		copy.block_palette_mut().set(0, 0, 0, 6);

		assert_eq!(section.block_palette().get(0, 0, 0), 5);
	}
}
