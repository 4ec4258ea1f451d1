#![forbid(unsafe_code)]

//! Chunk codec over region containers: serializes chunk columns into tag
//! trees with per-section block-state palettes and block-entity records, and
//! reconstructs them on load through pluggable block and handler registries.

pub mod bits;
mod chunk;
mod loader;
mod registry;

pub use crate::chunk::{ChunkColumn, SECTION_SIZE};
pub use crate::loader::{AnvilLoader, ChunkError};
pub use crate::registry::{
	BlockHandler, BlockRegistry, BlockStateInfo, DummyHandler, HandlerRegistry
};

/// Schema revision stamped into every saved chunk payload.
pub const DATA_VERSION: i32 = 3700;

/// Generation status of a chunk whose terrain is complete. Chunks persisted
/// with any other status are treated as absent on load.
pub const STATUS_FULL: &str = "minecraft:full";
