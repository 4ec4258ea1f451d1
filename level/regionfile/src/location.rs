use std::fmt::{self, Debug, Display, Formatter};
use std::time::{SystemTime, UNIX_EPOCH};

/// A packed header word locating one chunk entry: sector offset in the high
/// 24 bits, sector count in the low 8 bits. A raw value of 0 means the slot
/// is absent.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct ChunkLocation(u32);

impl ChunkLocation {
	/// Largest sector count representable in the 8-bit count field.
	pub const MAX_SECTORS: u32 = 255;

	pub fn from_parts(offset: u32, sectors: u8) -> Self {
		ChunkLocation((offset << 8) | (sectors as u32))
	}

	pub fn new(raw: u32) -> Option<Self> {
		if raw == 0 {
			None
		} else {
			Some(ChunkLocation(raw))
		}
	}

	/// Returns the contained raw value, which is guaranteed to be non-zero.
	pub fn raw(&self) -> u32 {
		self.0
	}

	/// Offset of the first sector, in sectors from the start of the file.
	pub fn offset(&self) -> u32 {
		self.0 >> 8
	}

	/// Offset of the first sector, in bytes from the start of the file.
	pub fn offset_bytes(&self) -> u64 {
		(self.offset() as u64) * 4096
	}

	/// Size of the entry in sectors.
	pub fn sectors(&self) -> u32 {
		self.0 & 0xFF
	}

	/// One past the last sector of the entry.
	pub fn end(&self) -> u32 {
		self.offset() + self.sectors()
	}
}

impl Display for ChunkLocation {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "at {}, len {} sectors", self.offset(), self.sectors())
	}
}

impl Debug for ChunkLocation {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "ChunkLocation {{ offset: {}, sectors: {} }}", self.offset(), self.sectors())
	}
}

/// Unix time in seconds when the chunk was last saved.
/// Susceptible to the Year 2038 problem, and relatively useless.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ChunkTimestamp(u32);

impl ChunkTimestamp {
	pub fn from_unix_seconds(seconds: u32) -> Self {
		ChunkTimestamp(seconds)
	}

	pub fn now() -> Option<Self> {
		let seconds =
			SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);

		if seconds < u32::max_value() as u64 {
			Some(ChunkTimestamp(seconds as u32))
		} else {
			None
		}
	}

	pub fn into_unix_seconds(self) -> u32 {
		self.0
	}
}
