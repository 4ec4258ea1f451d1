use crate::bits::{bits_for_palette, pack, unpack};
use crate::chunk::{ChunkColumn, SECTION_SIZE};
use crate::registry::{BlockHandler, BlockRegistry, BlockStateInfo, DummyHandler, HandlerRegistry};
use crate::{DATA_VERSION, STATUS_FULL};
use log::{error, warn};
use regionfile::{RegionError, RegionFile};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tagtree::{Compound, Tag};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkError {
	#[error(transparent)]
	Region(#[from] RegionError),
	#[error("i/o error: {0}")]
	Io(#[from] io::Error),
	/// A field the format requires is absent or of the wrong kind.
	#[error("missing required field: {0}")]
	MissingField(&'static str),
	#[error("malformed chunk data: {0}")]
	Format(String)
}

/// Synthetic state ids for palette entries whose namespaced id is not in the
/// block registry. Allocated downward from the top of the 15-bit id domain
/// and remembered, so an unrecognized block round-trips through a load/save
/// cycle instead of being dropped.
#[derive(Default)]
struct PlaceholderStates {
	by_key: FxHashMap<BlockStateInfo, u16>,
	by_id: FxHashMap<u16, BlockStateInfo>
}

impl PlaceholderStates {
	const TOP: u16 = 0x7FFF;

	fn resolve(&mut self, info: BlockStateInfo) -> Option<u16> {
		if let Some(&id) = self.by_key.get(&info) {
			return Some(id);
		}

		let id = Self::TOP.checked_sub(self.by_key.len() as u16)?;
		self.by_key.insert(info.clone(), id);
		self.by_id.insert(id, info);

		Some(id)
	}

	fn describe(&self, id: u16) -> Option<BlockStateInfo> {
		self.by_id.get(&id).cloned()
	}
}

/// Loads and saves chunks through per-region container files.
///
/// Region files live in a `region` subdirectory of the world path and are
/// opened lazily, one mutex-guarded container per 32x32 region. All I/O is
/// synchronous on the calling thread; `load_chunk` and `save_chunk` may be
/// invoked from parallel workers, and accesses to distinct regions do not
/// contend.
pub struct AnvilLoader {
	world_path: PathBuf,
	region_path: PathBuf,
	min_section: i32,
	max_section: i32,
	blocks: Arc<dyn BlockRegistry>,
	handlers: Arc<dyn HandlerRegistry>,
	regions: Mutex<FxHashMap<(i32, i32), Arc<Mutex<RegionFile>>>>,
	/// Chunks served per region, to decide when a container can be closed.
	loaded: Mutex<FxHashMap<(i32, i32), FxHashSet<(i32, i32)>>>,
	placeholders: Mutex<PlaceholderStates>,
	warned_blocks: Mutex<FxHashSet<String>>,
	warned_handlers: Mutex<FxHashSet<String>>
}

impl AnvilLoader {
	/// # Panics
	/// If `max_section <= min_section`.
	pub fn new(
		world_path: impl Into<PathBuf>, min_section: i32, max_section: i32,
		blocks: Arc<dyn BlockRegistry>, handlers: Arc<dyn HandlerRegistry>
	) -> Self {
		assert!(max_section > min_section, "empty section range");

		let world_path = world_path.into();
		let region_path = world_path.join("region");

		AnvilLoader {
			world_path,
			region_path,
			min_section,
			max_section,
			blocks,
			handlers,
			regions: Mutex::new(FxHashMap::default()),
			loaded: Mutex::new(FxHashMap::default()),
			placeholders: Mutex::new(PlaceholderStates::default()),
			warned_blocks: Mutex::new(FxHashSet::default()),
			warned_handlers: Mutex::new(FxHashSet::default())
		}
	}

	/// Reads one chunk. `Ok(None)` means there is nothing persisted for it
	/// (no world folder, no region file, empty slot, or a chunk skipped for
	/// partial generation) and the caller should generate the chunk.
	pub fn load_chunk(&self, chunk_x: i32, chunk_z: i32) -> Result<Option<ChunkColumn>, ChunkError> {
		if !self.world_path.exists() {
			return Ok(None);
		}

		let region_x = region_coordinate(chunk_x);
		let region_z = region_coordinate(chunk_z);

		let region = match self.region_for_load(region_x, region_z)? {
			Some(region) => region,
			None => return Ok(None)
		};
		self.track_region(region_x, region_z);

		let data = region.lock().expect("region lock poisoned").read_entry(chunk_x, chunk_z)?;
		let data = match data {
			Some(data) => data,
			None => return Ok(None)
		};

		let status = data.string("status").unwrap_or("");
		if !status.is_empty() && status != STATUS_FULL {
			warn!(
				"skipping partially generated chunk at {}, {} with status {}",
				chunk_x, chunk_z, status
			);
			return Ok(None);
		}

		let mut column = ChunkColumn::new(chunk_x, chunk_z, self.min_section, self.max_section);
		column.set_last_update(data.long("LastUpdate").unwrap_or(0));

		self.load_sections(&mut column, &data)?;
		self.load_block_entities(&mut column, &data);

		let mut loaded = self.loaded.lock().expect("loaded table lock poisoned");
		loaded.entry((region_x, region_z)).or_default().insert((chunk_x, chunk_z));

		Ok(Some(column))
	}

	/// Serializes the column and writes it to its region container. The
	/// shared borrow of the column spans the whole snapshot, so an image of
	/// a concurrently mutated chunk can never be torn.
	pub fn save_chunk(&self, column: &ChunkColumn) -> Result<(), ChunkError> {
		let region_x = region_coordinate(column.chunk_x());
		let region_z = region_coordinate(column.chunk_z());

		let region = self.region_for_save(region_x, region_z)?;
		self.track_region(region_x, region_z);

		let payload = self.build_payload(column)?;

		region
			.lock()
			.expect("region lock poisoned")
			.write_entry(column.chunk_x(), column.chunk_z(), &payload)?;

		Ok(())
	}

	/// Releases the bookkeeping for one chunk, closing the region container
	/// once no loaded chunk references it.
	pub fn unload_chunk(&self, chunk_x: i32, chunk_z: i32) {
		let key = (region_coordinate(chunk_x), region_coordinate(chunk_z));

		let mut loaded = self.loaded.lock().expect("loaded table lock poisoned");
		let chunks = match loaded.get_mut(&key) {
			Some(chunks) => chunks,
			// Unloading a chunk this loader never served is valid.
			None => return
		};

		chunks.remove(&(chunk_x, chunk_z));
		if !chunks.is_empty() {
			return;
		}
		loaded.remove(&key);

		let region = self.regions.lock().expect("region table lock poisoned").remove(&key);
		if let Some(region) = region {
			// A worker still holding the Arc closes it on drop instead.
			if let Ok(mutex) = Arc::try_unwrap(region) {
				let file = mutex.into_inner().expect("region lock poisoned");
				if let Err(e) = file.close() {
					error!("failed to flush region {}, {}: {}", key.0, key.1, e);
				}
			}
		}
	}

	/// Accounts for an open container even before any chunk of it is loaded,
	/// so a region touched only by saves still closes on the last unload.
	fn track_region(&self, region_x: i32, region_z: i32) {
		let mut loaded = self.loaded.lock().expect("loaded table lock poisoned");
		loaded.entry((region_x, region_z)).or_default();
	}

	fn region_for_load(
		&self, region_x: i32, region_z: i32
	) -> Result<Option<Arc<Mutex<RegionFile>>>, ChunkError> {
		let mut regions = self.regions.lock().expect("region table lock poisoned");

		if let Some(region) = regions.get(&(region_x, region_z)) {
			return Ok(Some(region.clone()));
		}

		let path = self.region_path.join(RegionFile::file_name(region_x, region_z));
		if !path.exists() {
			return Ok(None);
		}

		let region = Arc::new(Mutex::new(RegionFile::open(&path)?));
		regions.insert((region_x, region_z), region.clone());

		Ok(Some(region))
	}

	fn region_for_save(
		&self, region_x: i32, region_z: i32
	) -> Result<Arc<Mutex<RegionFile>>, ChunkError> {
		let mut regions = self.regions.lock().expect("region table lock poisoned");

		if let Some(region) = regions.get(&(region_x, region_z)) {
			return Ok(region.clone());
		}

		fs::create_dir_all(&self.region_path)?;
		let path = self.region_path.join(RegionFile::file_name(region_x, region_z));

		let region = Arc::new(Mutex::new(RegionFile::open(&path)?));
		regions.insert((region_x, region_z), region.clone());

		Ok(region)
	}

	fn load_sections(&self, column: &mut ChunkColumn, data: &Compound) -> Result<(), ChunkError> {
		let mut indices = vec![0u32; 4096];

		for tag in data.list("sections").unwrap_or(&[]) {
			let section_data = match tag {
				Tag::Compound(section_data) => section_data,
				_ => return Err(ChunkError::Format("section entry is not a compound".to_string()))
			};

			let section_y = section_data.byte("Y").ok_or(ChunkError::MissingField("Y"))? as i32;
			if section_y < column.min_section() || section_y >= column.max_section() {
				// The format stores a lighting-only section above and below
				// the world; throw it out.
				continue;
			}

			let block_states = match section_data.compound("block_states") {
				Some(block_states) => block_states,
				None => continue
			};

			let palette = self.load_block_palette(block_states.list("palette").unwrap_or(&[]))?;

			if palette.len() == 1 {
				// One solid value, no need to check the data
				let section = column.section_mut(section_y).expect("section range checked above");
				section.block_palette_mut().fill(palette[0] as u32);
			} else if palette.len() > 1 {
				let packed =
					block_states.long_array("data").ok_or(ChunkError::MissingField("data"))?;
				let bits = bits_for_palette(palette.len());

				if !unpack(&mut indices, packed, bits) {
					return Err(ChunkError::Format(format!(
						"packed data of {} words is too short for {} palette entries",
						packed.len(),
						palette.len()
					)));
				}

				let y_offset = section_y * SECTION_SIZE;
				for y in 0..SECTION_SIZE {
					for z in 0..SECTION_SIZE {
						for x in 0..SECTION_SIZE {
							let index = indices[(y * 256 + z * 16 + x) as usize] as usize;
							let state = *palette.get(index).ok_or_else(|| {
								ChunkError::Format(format!(
									"palette index {} out of bounds ({} entries)",
									index,
									palette.len()
								))
							})?;

							column.set_block(x, y + y_offset, z, state);
						}
					}
				}
			}
		}

		Ok(())
	}

	/// Decodes a persisted palette list into concrete state ids.
	fn load_block_palette(&self, tags: &[Tag]) -> Result<Vec<u16>, ChunkError> {
		let mut states = Vec::with_capacity(tags.len());

		for tag in tags {
			let entry = match tag {
				Tag::Compound(entry) => entry,
				_ => return Err(ChunkError::Format("palette entry is not a compound".to_string()))
			};

			let name = entry.string("Name").ok_or(ChunkError::MissingField("Name"))?;

			let mut properties = BTreeMap::new();
			if let Some(tags) = entry.compound("Properties") {
				for (key, value) in tags.iter() {
					match value {
						Tag::String(value) => {
							properties.insert(key.clone(), value.clone());
						}
						other => warn!(
							"ignoring block state property {} of {}: expected a string, got kind {}",
							key,
							name,
							other.kind().id()
						)
					}
				}
			}

			let state = match self.blocks.resolve_state(name, &properties) {
				Some(state) => state,
				None => self.placeholder_state(name, properties)?
			};

			states.push(state);
		}

		Ok(states)
	}

	fn placeholder_state(
		&self, name: &str, properties: BTreeMap<String, String>
	) -> Result<u16, ChunkError> {
		let mut warned = self.warned_blocks.lock().expect("warn table lock poisoned");
		if warned.insert(name.to_string()) {
			warn!("unknown block {}, substituting a placeholder state", name);
		}
		drop(warned);

		let info = BlockStateInfo { name: name.to_string(), properties };

		self.placeholders
			.lock()
			.expect("placeholder table lock poisoned")
			.resolve(info)
			.ok_or_else(|| ChunkError::Format("placeholder state ids exhausted".to_string()))
	}

	fn load_block_entities(&self, column: &mut ChunkColumn, data: &Compound) {
		for tag in data.list("block_entities").unwrap_or(&[]) {
			let entity = match tag {
				Tag::Compound(entity) => entity,
				_ => continue
			};

			let id = match entity.string("id") {
				Some(id) => id,
				None => continue
			};

			let x = entity.int("x").unwrap_or(0);
			let y = entity.int("y").unwrap_or(0);
			let z = entity.int("z").unwrap_or(0);

			if !column.contains_y(y) {
				warn!("block entity {} at {}, {}, {} is outside the section range", id, x, y, z);
				continue;
			}

			let handler = self.handler_or_dummy(id);
			column.set_block_handler(x & 0xF, y, z & 0xF, handler);
		}
	}

	fn handler_or_dummy(&self, id: &str) -> Arc<dyn BlockHandler> {
		if let Some(handler) = self.handlers.handler(id) {
			return handler;
		}

		let mut warned = self.warned_handlers.lock().expect("warn table lock poisoned");
		if warned.insert(id.to_string()) {
			warn!("unknown block handler {}, substituting a dummy", id);
		}

		Arc::new(DummyHandler::new(id))
	}

	fn build_payload(&self, column: &ChunkColumn) -> Result<Compound, ChunkError> {
		let mut sections = Vec::new();
		let mut block_entities = Vec::new();

		// Serialized palette entries by state id, reused across sections.
		let mut state_tags: FxHashMap<u16, Compound> = FxHashMap::default();
		let mut indices = vec![0u32; 4096];

		for section_y in column.min_section()..column.max_section() {
			let mut palette_entries: Vec<Tag> = Vec::new();
			let mut state_to_index: FxHashMap<u16, u32> = FxHashMap::default();

			for local_y in 0..SECTION_SIZE {
				let y = section_y * SECTION_SIZE + local_y;

				for z in 0..SECTION_SIZE {
					for x in 0..SECTION_SIZE {
						let state = column.get_block(x, y, z);

						// Dedupe by state id, keeping first-seen order.
						let index = match state_to_index.get(&state) {
							Some(&index) => index,
							None => {
								let index = palette_entries.len() as u32;
								let entry = self.block_state_tag(&mut state_tags, state)?;
								palette_entries.push(Tag::Compound(entry));
								state_to_index.insert(state, index);
								index
							}
						};
						indices[(local_y * 256 + z * 16 + x) as usize] = index;

						if let Some(handler) = column.block_handler(x, y, z) {
							let mut entity = Compound::new();
							entity.insert("id", Tag::String(handler.namespace_id().to_string()));
							entity.insert("x", Tag::Int(x + SECTION_SIZE * column.chunk_x()));
							entity.insert("y", Tag::Int(y));
							entity.insert("z", Tag::Int(z + SECTION_SIZE * column.chunk_z()));
							entity.insert("keepPacked", Tag::Byte(0));
							block_entities.push(Tag::Compound(entity));
						}
					}
				}
			}

			let mut block_states = Compound::new();
			let entry_count = palette_entries.len();
			block_states.insert("palette", Tag::List(palette_entries));

			if entry_count > 1 {
				// A single-entry palette speaks for every slot on its own.
				let bits = bits_for_palette(entry_count);
				block_states.insert("data", Tag::LongArray(pack(&indices, bits)));
			}

			let mut section_data = Compound::new();
			section_data.insert("Y", Tag::Byte(section_y as i8));
			section_data.insert("block_states", Tag::Compound(block_states));
			sections.push(Tag::Compound(section_data));
		}

		let mut root = Compound::new();
		root.insert("DataVersion", Tag::Int(DATA_VERSION));
		root.insert("xPos", Tag::Int(column.chunk_x()));
		root.insert("zPos", Tag::Int(column.chunk_z()));
		root.insert("yPos", Tag::Int(column.min_section()));
		root.insert("status", Tag::String(STATUS_FULL.to_string()));
		root.insert("LastUpdate", Tag::Long(column.last_update()));
		root.insert("sections", Tag::List(sections));
		root.insert("block_entities", Tag::List(block_entities));

		Ok(root)
	}

	fn block_state_tag(
		&self, cache: &mut FxHashMap<u16, Compound>, state: u16
	) -> Result<Compound, ChunkError> {
		if let Some(entry) = cache.get(&state) {
			return Ok(entry.clone());
		}

		let info = match self.blocks.describe_state(state) {
			Some(info) => info,
			None => self
				.placeholders
				.lock()
				.expect("placeholder table lock poisoned")
				.describe(state)
				.ok_or_else(|| {
					ChunkError::Format(format!("state id {} cannot be described", state))
				})?
		};

		let mut entry = Compound::new();
		entry.insert("Name", Tag::String(info.name));

		if !info.properties.is_empty() {
			let mut properties = Compound::new();
			for (key, value) in info.properties {
				properties.insert(key, Tag::String(value));
			}
			entry.insert("Properties", Tag::Compound(properties));
		}

		cache.insert(state, entry.clone());

		Ok(entry)
	}
}

fn region_coordinate(chunk_coordinate: i32) -> i32 {
	chunk_coordinate >> 5
}

#[cfg(test)]
mod test {
	use crate::chunk::ChunkColumn;
	use crate::loader::AnvilLoader;
	use crate::registry::{BlockHandler, BlockRegistry, BlockStateInfo, HandlerRegistry};
	use std::collections::BTreeMap;
	use std::path::Path;
	use std::sync::Arc;

	struct TwoBlocks;

	impl BlockRegistry for TwoBlocks {
		fn resolve_state(&self, name: &str, _: &BTreeMap<String, String>) -> Option<u16> {
			match name {
				"test:air" => Some(0),
				"test:stone" => Some(1),
				_ => None
			}
		}

		fn describe_state(&self, state_id: u16) -> Option<BlockStateInfo> {
			match state_id {
				0 => Some(BlockStateInfo::new("test:air")),
				1 => Some(BlockStateInfo::new("test:stone")),
				_ => None
			}
		}
	}

	struct NoHandlers;

	impl HandlerRegistry for NoHandlers {
		fn handler(&self, _: &str) -> Option<Arc<dyn BlockHandler>> {
			None
		}
	}

	fn loader(world: &Path) -> AnvilLoader {
		AnvilLoader::new(world, 0, 1, Arc::new(TwoBlocks), Arc::new(NoHandlers))
	}

	#[test]
	fn test_save_only_region_closes_on_unload() {
		let dir = tempfile::tempdir().unwrap();
		let loader = loader(dir.path());

		let mut column = ChunkColumn::new(0, 0, 0, 1);
		column.set_block(1, 2, 3, 1);
		loader.save_chunk(&column).unwrap();

		// The container is accounted for even though no chunk was loaded.
		assert_eq!(loader.regions.lock().unwrap().len(), 1);
		assert_eq!(loader.loaded.lock().unwrap().len(), 1);

		loader.unload_chunk(0, 0);
		assert!(loader.regions.lock().unwrap().is_empty());
		assert!(loader.loaded.lock().unwrap().is_empty());

		// And it reopens transparently on the next access.
		let reread = loader.load_chunk(0, 0).unwrap().unwrap();
		assert_eq!(reread.get_block(1, 2, 3), 1);
	}

	#[test]
	fn test_loaded_chunks_keep_region_open() {
		let dir = tempfile::tempdir().unwrap();
		let loader = loader(dir.path());

		loader.save_chunk(&ChunkColumn::new(0, 0, 0, 1)).unwrap();
		loader.save_chunk(&ChunkColumn::new(1, 0, 0, 1)).unwrap();

		loader.load_chunk(0, 0).unwrap().unwrap();
		loader.load_chunk(1, 0).unwrap().unwrap();

		loader.unload_chunk(0, 0);
		assert_eq!(loader.regions.lock().unwrap().len(), 1);

		loader.unload_chunk(1, 0);
		assert!(loader.regions.lock().unwrap().is_empty());
	}
}
