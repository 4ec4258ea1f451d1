#![forbid(unsafe_code)]

//! Compact in-memory storage for voxel sections.
//!
//! The core type is [`Palette`]: a fixed-capacity map from a local 3D
//! coordinate to an integer value, stored as either a single filled value or
//! a bit-packed index array whose width grows with value cardinality. A
//! [`Section`] owns one block palette and represents a 16x16x16 sub-volume
//! of a chunk.
//!
//! Nothing in this crate is internally synchronized; the owner of a section
//! is responsible for single-writer discipline.

mod palette;
mod section;

pub use crate::palette::{Palette, WriteBuffer};
pub use crate::section::Section;

/// Number of bits needed to represent the given value.
pub(crate) fn bits_to_represent(value: u32) -> u8 {
	(32 - value.leading_zeros()) as u8
}
