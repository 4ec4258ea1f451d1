use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::{Compound, Kind, Tag};

fn invalid(message: String) -> io::Error {
	io::Error::new(io::ErrorKind::InvalidData, message)
}

/// Writes a named root compound to the output.
pub fn write_named<W: Write>(out: &mut W, name: &str, root: &Compound) -> io::Result<()> {
	out.write_u8(Kind::Compound.id())?;
	write_string(out, name)?;
	write_compound(out, root)
}

/// Reads a named root compound from the input.
///
/// Anything other than a compound at the root is a format error.
pub fn read_named<R: Read>(input: &mut R) -> io::Result<(String, Compound)> {
	let id = input.read_u8()?;

	let kind = Kind::from_id(id).ok_or_else(|| invalid(format!("unknown tag kind: {}", id)))?;
	if kind != Kind::Compound {
		return Err(invalid(format!("expected a compound at the root, got kind {}", id)));
	}

	let name = read_string(input)?;
	let root = read_compound(input)?;

	Ok((name, root))
}

fn write_string<W: Write>(out: &mut W, value: &str) -> io::Result<()> {
	if value.len() > u16::max_value() as usize {
		return Err(invalid(format!("string too long: {} bytes", value.len())));
	}

	out.write_u16::<BigEndian>(value.len() as u16)?;
	out.write_all(value.as_bytes())
}

fn read_string<R: Read>(input: &mut R) -> io::Result<String> {
	let len = input.read_u16::<BigEndian>()?;
	let mut bytes = vec![0u8; len as usize];
	input.read_exact(&mut bytes)?;

	String::from_utf8(bytes).map_err(|e| invalid(e.to_string()))
}

fn write_len<W: Write>(out: &mut W, len: usize) -> io::Result<()> {
	if len > i32::max_value() as usize {
		return Err(invalid(format!("array too long: {} elements", len)));
	}

	out.write_i32::<BigEndian>(len as i32)
}

fn read_len<R: Read>(input: &mut R) -> io::Result<usize> {
	let len = input.read_i32::<BigEndian>()?;

	if len < 0 {
		return Err(invalid(format!("negative length: {}", len)));
	}

	Ok(len as usize)
}

fn write_compound<W: Write>(out: &mut W, compound: &Compound) -> io::Result<()> {
	for (name, tag) in compound.iter() {
		out.write_u8(tag.kind().id())?;
		write_string(out, name)?;
		write_payload(out, tag)?;
	}

	out.write_u8(Kind::End.id())
}

fn read_compound<R: Read>(input: &mut R) -> io::Result<Compound> {
	let mut compound = Compound::new();

	loop {
		let id = input.read_u8()?;
		let kind = Kind::from_id(id).ok_or_else(|| invalid(format!("unknown tag kind: {}", id)))?;

		if kind == Kind::End {
			return Ok(compound);
		}

		let name = read_string(input)?;
		compound.insert(name, read_payload(input, kind)?);
	}
}

fn write_payload<W: Write>(out: &mut W, tag: &Tag) -> io::Result<()> {
	match tag {
		Tag::Byte(value) => out.write_i8(*value),
		Tag::Short(value) => out.write_i16::<BigEndian>(*value),
		Tag::Int(value) => out.write_i32::<BigEndian>(*value),
		Tag::Long(value) => out.write_i64::<BigEndian>(*value),
		Tag::Float(value) => out.write_f32::<BigEndian>(*value),
		Tag::Double(value) => out.write_f64::<BigEndian>(*value),
		Tag::ByteArray(value) => {
			write_len(out, value.len())?;
			out.write_all(value)
		}
		Tag::String(value) => write_string(out, value),
		Tag::List(elements) => {
			// The element kind is implied by the first element; an empty list
			// is written with the End kind.
			let kind = elements.first().map(Tag::kind).unwrap_or(Kind::End);

			for element in elements {
				if element.kind() != kind {
					return Err(invalid(format!(
						"heterogeneous list: kind {} mixed with {}",
						kind.id(),
						element.kind().id()
					)));
				}
			}

			out.write_u8(kind.id())?;
			write_len(out, elements.len())?;

			for element in elements {
				write_payload(out, element)?;
			}

			Ok(())
		}
		Tag::Compound(compound) => write_compound(out, compound),
		Tag::IntArray(value) => {
			write_len(out, value.len())?;

			for &entry in value {
				out.write_i32::<BigEndian>(entry)?;
			}

			Ok(())
		}
		Tag::LongArray(value) => {
			write_len(out, value.len())?;

			for &entry in value {
				out.write_i64::<BigEndian>(entry)?;
			}

			Ok(())
		}
	}
}

fn read_payload<R: Read>(input: &mut R, kind: Kind) -> io::Result<Tag> {
	Ok(match kind {
		Kind::End => return Err(invalid("unexpected End payload".to_string())),
		Kind::Byte => Tag::Byte(input.read_i8()?),
		Kind::Short => Tag::Short(input.read_i16::<BigEndian>()?),
		Kind::Int => Tag::Int(input.read_i32::<BigEndian>()?),
		Kind::Long => Tag::Long(input.read_i64::<BigEndian>()?),
		Kind::Float => Tag::Float(input.read_f32::<BigEndian>()?),
		Kind::Double => Tag::Double(input.read_f64::<BigEndian>()?),
		Kind::ByteArray => {
			let len = read_len(input)?;
			let mut bytes = vec![0u8; len];
			input.read_exact(&mut bytes)?;

			Tag::ByteArray(bytes)
		}
		Kind::String => Tag::String(read_string(input)?),
		Kind::List => {
			let id = input.read_u8()?;
			let element_kind =
				Kind::from_id(id).ok_or_else(|| invalid(format!("unknown tag kind: {}", id)))?;
			let len = read_len(input)?;

			if element_kind == Kind::End && len != 0 {
				return Err(invalid(format!("list of End kind with length {}", len)));
			}

			let mut elements = Vec::with_capacity(len.min(65536));

			for _ in 0..len {
				elements.push(read_payload(input, element_kind)?);
			}

			Tag::List(elements)
		}
		Kind::Compound => Tag::Compound(read_compound(input)?),
		Kind::IntArray => {
			let len = read_len(input)?;
			let mut values = Vec::with_capacity(len.min(65536));

			for _ in 0..len {
				values.push(input.read_i32::<BigEndian>()?);
			}

			Tag::IntArray(values)
		}
		Kind::LongArray => {
			let len = read_len(input)?;
			let mut values = Vec::with_capacity(len.min(65536));

			for _ in 0..len {
				values.push(input.read_i64::<BigEndian>()?);
			}

			Tag::LongArray(values)
		}
	})
}
