#![forbid(unsafe_code)]

//! Sector-allocated region containers.
//!
//! A region file stores up to 1024 chunk payloads (a 32x32 grid) in
//! fixed-size 4096-byte sectors. The first two sectors form the header: 1024
//! big-endian location words followed by 1024 big-endian timestamps. Each
//! entry starts with a 4-byte length and a 1-byte compression kind, then the
//! compressed payload, zero-padded to a sector multiple.
//!
//! A [`RegionFile`] performs synchronous, blocking I/O and is not internally
//! synchronized; callers sharing one container across threads must wrap it
//! in a mutex.

use bit_vec::BitVec;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tagtree::Compound;
use thiserror::Error;

mod location;

pub use crate::location::{ChunkLocation, ChunkTimestamp};

pub const SECTOR_SIZE: usize = 4096;

const ENTRY_COUNT: usize = 1024;
const HEADER_LENGTH: usize = ENTRY_COUNT * 2 * 4;
const ENTRY_HEADER_LENGTH: usize = 4 + 1;

const COMPRESSION_GZIP: u8 = 1;
const COMPRESSION_ZLIB: u8 = 2;
const COMPRESSION_NONE: u8 = 3;

#[derive(Debug, Error)]
pub enum RegionError {
	#[error("i/o error: {0}")]
	Io(#[from] io::Error),
	/// The entry's 1-byte compression kind is not one of gzip, zlib, none.
	#[error("unsupported compression kind: {0}")]
	UnsupportedCompression(u8),
	/// The entry framing or its tag tree could not be decoded.
	#[error("malformed chunk entry: {0}")]
	MalformedEntry(String),
	/// The compressed payload needs more sectors than the location word's
	/// 8-bit count field can express. The container state is unchanged.
	#[error("chunk needs {sectors} sectors, limit is 255")]
	OversizedChunk { sectors: u32 },
	/// A header location word references sectors beyond the file.
	#[error("chunk location out of bounds: {0}")]
	BadLocation(ChunkLocation)
}

/// A reader and writer for one region container file.
pub struct RegionFile {
	file: File,
	locations: Vec<u32>,
	timestamps: Vec<u32>,
	/// One bit per sector of the file; set bits are free.
	free_sectors: BitVec,
	/// Makes the next entry write fail after sector allocation.
	#[cfg(test)]
	induced_failure: Option<io::Error>
}

impl RegionFile {
	/// Standard file name for the region holding a 32x32 block of chunks.
	pub fn file_name(region_x: i32, region_z: i32) -> String {
		format!("r.{}.{}.mca", region_x, region_z)
	}

	/// Opens a region file, creating and zero-initializing the header if the
	/// file is missing or shorter than the header.
	pub fn open(path: &Path) -> Result<Self, RegionError> {
		let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;

		let mut region = RegionFile {
			file,
			locations: vec![0; ENTRY_COUNT],
			timestamps: vec![0; ENTRY_COUNT],
			free_sectors: BitVec::new(),
			#[cfg(test)]
			induced_failure: None
		};

		region.read_header()?;

		Ok(region)
	}

	fn read_header(&mut self) -> Result<(), RegionError> {
		if self.file.metadata()?.len() < HEADER_LENGTH as u64 {
			self.file.seek(SeekFrom::Start(0))?;
			self.file.write_all(&[0u8; HEADER_LENGTH])?;
		}

		// Trailing bytes short of a full sector are ignored; the next
		// append overwrites them.
		let total_sectors = (self.file.metadata()?.len() / SECTOR_SIZE as u64) as usize;
		self.free_sectors = BitVec::from_elem(total_sectors, true);
		self.free_sectors.set(0, false);
		self.free_sectors.set(1, false);

		self.file.seek(SeekFrom::Start(0))?;
		for i in 0..ENTRY_COUNT {
			let raw = self.file.read_u32::<BigEndian>()?;
			self.locations[i] = raw;

			if let Some(location) = ChunkLocation::new(raw) {
				self.mark_location(location, false)?;
			}
		}

		for i in 0..ENTRY_COUNT {
			self.timestamps[i] = self.file.read_u32::<BigEndian>()?;
		}

		Ok(())
	}

	pub fn has_entry(&self, chunk_x: i32, chunk_z: i32) -> bool {
		self.locations[chunk_index(chunk_x, chunk_z)] != 0
	}

	/// Reads and decodes one chunk entry. `Ok(None)` means the slot is
	/// absent, which is distinct from every error case.
	pub fn read_entry(&mut self, chunk_x: i32, chunk_z: i32) -> Result<Option<Compound>, RegionError> {
		let raw = self.locations[chunk_index(chunk_x, chunk_z)];
		let location = match ChunkLocation::new(raw) {
			Some(location) => location,
			None => return Ok(None)
		};

		self.file.seek(SeekFrom::Start(location.offset_bytes()))?;
		let length = self.file.read_u32::<BigEndian>()? as usize;
		let kind = self.file.read_u8()?;

		// The 4-byte length prefix counts against the entry's sectors too.
		if length == 0 || length + 4 > location.sectors() as usize * SECTOR_SIZE {
			return Err(RegionError::MalformedEntry(format!(
				"entry length {} does not fit its {} sector(s)",
				length,
				location.sectors()
			)));
		}

		let mut compressed = vec![0u8; length - 1];
		self.file.read_exact(&mut compressed)?;

		let parsed = match kind {
			COMPRESSION_GZIP => tagtree::read_named(&mut GzDecoder::new(&compressed[..])),
			COMPRESSION_ZLIB => tagtree::read_named(&mut ZlibDecoder::new(&compressed[..])),
			COMPRESSION_NONE => tagtree::read_named(&mut &compressed[..]),
			other => return Err(RegionError::UnsupportedCompression(other))
		};

		match parsed {
			Ok((_, root)) => Ok(Some(root)),
			Err(e) => Err(RegionError::MalformedEntry(e.to_string()))
		}
	}

	/// Compresses and writes one chunk entry, then rewrites the header.
	///
	/// The entry always lands on a fresh first-fit run of free sectors; the
	/// old allocation is released afterwards and never reused for the write
	/// that replaces it. The header write is the final step, so a crash
	/// beforehand leaves the previous entry intact.
	pub fn write_entry(
		&mut self, chunk_x: i32, chunk_z: i32, data: &Compound
	) -> Result<(), RegionError> {
		let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
		tagtree::write_named(&mut encoder, "", data)?;
		let compressed = encoder.finish()?;

		let entry_length = ENTRY_HEADER_LENGTH + compressed.len();
		let sectors_needed = (entry_length + SECTOR_SIZE - 1) / SECTOR_SIZE;

		if sectors_needed as u32 > ChunkLocation::MAX_SECTORS {
			return Err(RegionError::OversizedChunk { sectors: sectors_needed as u32 });
		}

		let index = chunk_index(chunk_x, chunk_z);
		let old_location = ChunkLocation::new(self.locations[index]);

		let first_sector = match self.find_free_run(sectors_needed) {
			Some(start) => start,
			None => self.append_sectors(sectors_needed)?
		};
		let new_location = ChunkLocation::from_parts(first_sector as u32, sectors_needed as u8);

		#[cfg(test)]
		self.induced_failure.take().map_or(Ok(()), Err)?;

		self.file.seek(SeekFrom::Start(new_location.offset_bytes()))?;
		self.file.write_u32::<BigEndian>((compressed.len() + 1) as u32)?;
		self.file.write_u8(COMPRESSION_ZLIB)?;
		self.file.write_all(&compressed)?;

		let padding = sectors_needed * SECTOR_SIZE - entry_length;
		self.file.write_all(&vec![0u8; padding])?;

		// Sector accounting moves only once the payload is on disk; a failed
		// write leaves the old entry live and its sectors claimed.
		if let Some(old) = old_location {
			self.mark_location(old, true)?;
		}
		self.mark_location(new_location, false)?;

		self.locations[index] = new_location.raw();
		self.timestamps[index] =
			ChunkTimestamp::now().map(ChunkTimestamp::into_unix_seconds).unwrap_or(0);
		self.write_header()?;

		Ok(())
	}

	/// Flushes the file to disk and releases the handle.
	pub fn close(self) -> io::Result<()> {
		self.file.sync_all()
	}

	fn write_header(&mut self) -> Result<(), RegionError> {
		let mut header = Vec::with_capacity(HEADER_LENGTH);

		for &location in &self.locations {
			header.write_u32::<BigEndian>(location)?;
		}
		for &timestamp in &self.timestamps {
			header.write_u32::<BigEndian>(timestamp)?;
		}

		self.file.seek(SeekFrom::Start(0))?;
		self.file.write_all(&header)?;

		Ok(())
	}

	/// First contiguous run of `length` free sectors, by run-length scan.
	fn find_free_run(&self, length: usize) -> Option<usize> {
		let mut run_start = 0;
		let mut run = 0;

		for (sector, free) in self.free_sectors.iter().enumerate() {
			if !free {
				run = 0;
				continue;
			}

			if run == 0 {
				run_start = sector;
			}

			run += 1;
			if run == length {
				return Some(run_start);
			}
		}

		None
	}

	/// Appends `count` zero-filled sectors at end-of-file, returning the
	/// index of the first.
	fn append_sectors(&mut self, count: usize) -> Result<usize, RegionError> {
		let start = self.free_sectors.len();

		self.file.seek(SeekFrom::Start((start * SECTOR_SIZE) as u64))?;
		for _ in 0..count {
			self.file.write_all(&[0u8; SECTOR_SIZE])?;
		}

		// Grow the bitmap only once the sectors exist on disk.
		self.free_sectors.grow(count, true);

		Ok(start)
	}

	fn mark_location(&mut self, location: ChunkLocation, free: bool) -> Result<(), RegionError> {
		if location.end() as usize > self.free_sectors.len() {
			return Err(RegionError::BadLocation(location));
		}

		for sector in location.offset()..location.end() {
			self.free_sectors.set(sector as usize, free);
		}

		Ok(())
	}
}

/// Slot index of a chunk within the 1024-entry header.
fn chunk_index(chunk_x: i32, chunk_z: i32) -> usize {
	(((chunk_z & 31) << 5) | (chunk_x & 31)) as usize
}

#[cfg(test)]
mod test {
	use crate::{chunk_index, ChunkLocation, RegionFile, SECTOR_SIZE};
	use std::fs::OpenOptions;
	use std::io::{Seek, SeekFrom, Write};
	use tagtree::{Compound, Tag};

	fn payload(marker: i32, bulk: usize) -> Compound {
		// Pseudo-random bytes defeat the compressor, keeping sizes honest.
		let mut state = marker as u32 ^ 0x9E3779B9;
		let bytes = (0..bulk)
			.map(|_| {
				state = state.wrapping_mul(1664525).wrapping_add(1013904223);
				(state >> 24) as u8
			})
			.collect();

		let mut root = Compound::new();
		root.insert("marker", Tag::Int(marker));
		root.insert("bulk", Tag::ByteArray(bytes));
		root
	}

	/// Replays the free-sector bitmap from the live locations: no two live
	/// entries may claim the same sector, and sectors 0/1 stay reserved.
	fn assert_no_overlap(region: &RegionFile) {
		let mut claimed = vec![false; region.free_sectors.len()];
		claimed[0] = true;
		claimed[1] = true;

		for &raw in &region.locations {
			if let Some(location) = ChunkLocation::new(raw) {
				for sector in location.offset()..location.end() {
					assert!(!claimed[sector as usize], "sector {} claimed twice", sector);
					claimed[sector as usize] = true;

					assert!(
						!region.free_sectors.get(sector as usize).unwrap(),
						"live sector {} marked free",
						sector
					);
				}
			}
		}
	}

	#[test]
	fn test_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join(RegionFile::file_name(0, 0));

		let mut region = RegionFile::open(&path).unwrap();
		let written = payload(7, 100);

		assert!(!region.has_entry(3, 4));
		region.write_entry(3, 4, &written).unwrap();
		assert!(region.has_entry(3, 4));

		let read = region.read_entry(3, 4).unwrap().unwrap();
		assert_eq!(read, written);

		// And again after reopening from disk.
		region.close().unwrap();
		let mut region = RegionFile::open(&path).unwrap();
		let read = region.read_entry(3, 4).unwrap().unwrap();
		assert_eq!(read, written);
	}

	#[test]
	fn test_absent_entry() {
		let dir = tempfile::tempdir().unwrap();
		let mut region = RegionFile::open(&dir.path().join("r.0.0.mca")).unwrap();

		assert!(region.read_entry(0, 0).unwrap().is_none());
		assert!(!region.has_entry(0, 0));
	}

	#[test]
	fn test_negative_chunk_coordinates_map_into_grid() {
		assert_eq!(chunk_index(-1, -1), (31 << 5) | 31);
		assert_eq!(chunk_index(-32, -32), 0);
		assert_eq!(chunk_index(33, 2), (2 << 5) | 1);
	}

	#[test]
	fn test_overwrites_never_overlap() {
		let dir = tempfile::tempdir().unwrap();
		let mut region = RegionFile::open(&dir.path().join("r.0.0.mca")).unwrap();

		// Mixed sizes force allocations to move, shrink, and grow.
		let sizes = [100, 9000, 300, 20000, 5000, 100, 40000, 8000];

		for round in 0..4 {
			for (i, &size) in sizes.iter().enumerate() {
				let x = (i % 4) as i32;
				let z = (i / 4) as i32;
				region.write_entry(x, z, &payload(round * 100 + i as i32, size)).unwrap();
				assert_no_overlap(&region);
			}
		}

		for (i, _) in sizes.iter().enumerate() {
			let x = (i % 4) as i32;
			let z = (i / 4) as i32;
			let read = region.read_entry(x, z).unwrap().unwrap();
			assert_eq!(read.int("marker"), Some(300 + i as i32));
		}
	}

	#[test]
	fn test_freed_sectors_are_reused() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("r.0.0.mca");
		let mut region = RegionFile::open(&path).unwrap();

		for round in 0..8 {
			region.write_entry(0, 0, &payload(round, 6000)).unwrap();
		}

		// Same-size rewrites should ping-pong between two allocations
		// rather than growing the file every time.
		let sectors = region.free_sectors.len();
		assert!(sectors <= 2 + 3 * 2, "file grew to {} sectors", sectors);
	}

	#[test]
	fn test_unknown_compression_kind_is_a_format_error() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("r.0.0.mca");

		let mut region = RegionFile::open(&path).unwrap();
		region.write_entry(5, 5, &payload(1, 64)).unwrap();

		let location = ChunkLocation::new(region.locations[chunk_index(5, 5)]).unwrap();
		drop(region);

		// Corrupt the compression kind byte in place.
		let mut file = OpenOptions::new().write(true).open(&path).unwrap();
		file.seek(SeekFrom::Start(location.offset_bytes() + 4)).unwrap();
		file.write_all(&[200]).unwrap();
		drop(file);

		let mut region = RegionFile::open(&path).unwrap();
		match region.read_entry(5, 5) {
			Err(crate::RegionError::UnsupportedCompression(200)) => {}
			other => panic!("expected UnsupportedCompression, got {:?}", other.map(|_| ()))
		}

		// Absence must remain distinguishable from the format error.
		assert!(region.read_entry(6, 5).unwrap().is_none());
	}

	#[test]
	fn test_failed_write_keeps_old_entry_claimed() {
		let dir = tempfile::tempdir().unwrap();
		let mut region = RegionFile::open(&dir.path().join("r.0.0.mca")).unwrap();

		let original = payload(1, 3000);
		region.write_entry(0, 0, &original).unwrap();
		let locations = region.locations.clone();

		region.induced_failure =
			Some(std::io::Error::new(std::io::ErrorKind::Other, "disk full"));
		assert!(region.write_entry(0, 0, &payload(2, 3000)).is_err());

		// The old entry must stay reachable and its sectors claimed, so a
		// later write cannot land on top of it.
		assert_eq!(region.locations, locations);

		let old = ChunkLocation::new(region.locations[chunk_index(0, 0)]).unwrap();
		for sector in old.offset()..old.end() {
			assert!(!region.free_sectors.get(sector as usize).unwrap());
		}

		assert_eq!(region.read_entry(0, 0).unwrap().unwrap(), original);

		region.write_entry(1, 0, &payload(3, 3000)).unwrap();
		assert_no_overlap(&region);
		assert_eq!(region.read_entry(0, 0).unwrap().unwrap(), original);
	}

	#[test]
	fn test_entry_length_must_fit_with_its_prefix() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("r.0.0.mca");

		let mut region = RegionFile::open(&path).unwrap();
		region.write_entry(0, 0, &payload(1, 64)).unwrap();

		let location = ChunkLocation::new(region.locations[chunk_index(0, 0)]).unwrap();
		drop(region);

		// This length fits the run only if the 4-byte prefix is forgotten;
		// accepting it would let the payload read spill into the next run.
		let bogus = (location.sectors() as usize * SECTOR_SIZE - 3) as u32;
		let mut file = OpenOptions::new().write(true).open(&path).unwrap();
		file.seek(SeekFrom::Start(location.offset_bytes())).unwrap();
		file.write_all(&bogus.to_be_bytes()).unwrap();
		drop(file);

		let mut region = RegionFile::open(&path).unwrap();
		match region.read_entry(0, 0) {
			Err(crate::RegionError::MalformedEntry(_)) => {}
			other => panic!("expected MalformedEntry, got {:?}", other.map(|_| ()))
		}
	}

	#[test]
	fn test_oversized_write_leaves_state_unchanged() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("r.0.0.mca");
		let mut region = RegionFile::open(&path).unwrap();

		region.write_entry(1, 1, &payload(5, 2000)).unwrap();

		let locations = region.locations.clone();
		let timestamps = region.timestamps.clone();
		let free = region.free_sectors.clone();
		let file_len = region.file.metadata().unwrap().len();

		// 255 sectors of compressed payload is the ceiling; far exceed it.
		let oversized = payload(6, 300 * SECTOR_SIZE);
		match region.write_entry(2, 1, &oversized) {
			Err(crate::RegionError::OversizedChunk { sectors }) => {
				assert!(sectors > ChunkLocation::MAX_SECTORS)
			}
			other => panic!("expected OversizedChunk, got {:?}", other.map(|_| ()))
		}

		assert_eq!(region.locations, locations);
		assert_eq!(region.timestamps, timestamps);
		assert_eq!(region.free_sectors, free);
		assert_eq!(region.file.metadata().unwrap().len(), file_len);
	}
}
