#![forbid(unsafe_code)]

//! Structured tag trees: the self-describing binary encoding used for chunk
//! payloads. A tree is built from named, typed fields (scalars, strings,
//! integer arrays, nested compounds and lists) and serialized big-endian.

use std::collections::HashMap;
use std::collections::hash_map;

mod io;

pub use crate::io::{read_named, write_named};

/// Numeric ids of each tag kind on the wire.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Kind {
	End,
	Byte,
	Short,
	Int,
	Long,
	Float,
	Double,
	ByteArray,
	String,
	List,
	Compound,
	IntArray,
	LongArray
}

impl Kind {
	pub fn from_id(id: u8) -> Option<Self> {
		Some(match id {
			0 => Kind::End,
			1 => Kind::Byte,
			2 => Kind::Short,
			3 => Kind::Int,
			4 => Kind::Long,
			5 => Kind::Float,
			6 => Kind::Double,
			7 => Kind::ByteArray,
			8 => Kind::String,
			9 => Kind::List,
			10 => Kind::Compound,
			11 => Kind::IntArray,
			12 => Kind::LongArray,
			_ => return None
		})
	}

	pub fn id(self) -> u8 {
		self as u8
	}
}

/// A single value in a tag tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
	Byte(i8),
	Short(i16),
	Int(i32),
	Long(i64),
	Float(f32),
	Double(f64),
	ByteArray(Vec<u8>),
	String(String),
	List(Vec<Tag>),
	Compound(Compound),
	IntArray(Vec<i32>),
	LongArray(Vec<i64>)
}

impl Tag {
	pub fn kind(&self) -> Kind {
		match self {
			Tag::Byte(_) => Kind::Byte,
			Tag::Short(_) => Kind::Short,
			Tag::Int(_) => Kind::Int,
			Tag::Long(_) => Kind::Long,
			Tag::Float(_) => Kind::Float,
			Tag::Double(_) => Kind::Double,
			Tag::ByteArray(_) => Kind::ByteArray,
			Tag::String(_) => Kind::String,
			Tag::List(_) => Kind::List,
			Tag::Compound(_) => Kind::Compound,
			Tag::IntArray(_) => Kind::IntArray,
			Tag::LongArray(_) => Kind::LongArray
		}
	}
}

/// An unordered map of named tags. The root of every chunk payload is a
/// compound, as is every list element the chunk codec cares about.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Compound(HashMap<String, Tag>);

impl Compound {
	pub fn new() -> Self {
		Compound(HashMap::new())
	}

	pub fn insert(&mut self, name: impl Into<String>, tag: Tag) -> &mut Self {
		self.0.insert(name.into(), tag);
		self
	}

	pub fn get(&self, name: &str) -> Option<&Tag> {
		self.0.get(name)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> hash_map::Iter<String, Tag> {
		self.0.iter()
	}

	// Typed accessors. Each returns None when the field is missing or has a
	// different kind; callers decide whether that is a format error.

	pub fn byte(&self, name: &str) -> Option<i8> {
		match self.get(name) {
			Some(&Tag::Byte(value)) => Some(value),
			_ => None
		}
	}

	pub fn int(&self, name: &str) -> Option<i32> {
		match self.get(name) {
			Some(&Tag::Int(value)) => Some(value),
			_ => None
		}
	}

	pub fn long(&self, name: &str) -> Option<i64> {
		match self.get(name) {
			Some(&Tag::Long(value)) => Some(value),
			_ => None
		}
	}

	pub fn string(&self, name: &str) -> Option<&str> {
		match self.get(name) {
			Some(Tag::String(value)) => Some(value),
			_ => None
		}
	}

	pub fn list(&self, name: &str) -> Option<&[Tag]> {
		match self.get(name) {
			Some(Tag::List(value)) => Some(value),
			_ => None
		}
	}

	pub fn compound(&self, name: &str) -> Option<&Compound> {
		match self.get(name) {
			Some(Tag::Compound(value)) => Some(value),
			_ => None
		}
	}

	pub fn long_array(&self, name: &str) -> Option<&[i64]> {
		match self.get(name) {
			Some(Tag::LongArray(value)) => Some(value),
			_ => None
		}
	}
}
