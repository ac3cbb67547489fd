// MIT License
//
// Copyright (c) 2019-2023 Tobias Pfeiffer
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Tagged binary wire format.
//!
//! One tag byte per value, big-endian payloads:
//!
//! | tag | value |
//! |-----|-------|
//! | `c`/`C` | i8/u8 |
//! | `h`/`H` | i16/u16 |
//! | `i`/`I` | i32/u32 |
//! | `l`/`L` | i64/u64 |
//! | `f`/`d` | f32/f64 |
//! | `D` | datetime, i64 seconds since the epoch |
//! | `b` | boolean, one payload byte `t` or `f` |
//! | `Z` | null, no payload |
//! | `Q` | UTF-8 string, u32 length + bytes |
//! | `X` | raw bytes, u32 length + bytes |
//! | `[` | array, varint element count, elements, `]` |
//! | `{` | record, elements, `}` |
//!
//! Containers nest up to [`MAX_DEPTH`] and must balance; an unbalanced
//! or over-deep stream is a decode error.

#![warn(clippy::all)]

use std::io::{Error, ErrorKind, Read, Result, Write};

pub const TAG_I8:           u8 = b'c';
pub const TAG_U8:           u8 = b'C';
pub const TAG_I16:          u8 = b'h';
pub const TAG_U16:          u8 = b'H';
pub const TAG_I32:          u8 = b'i';
pub const TAG_U32:          u8 = b'I';
pub const TAG_I64:          u8 = b'l';
pub const TAG_U64:          u8 = b'L';
pub const TAG_F32:          u8 = b'f';
pub const TAG_F64:          u8 = b'd';
pub const TAG_DATETIME:     u8 = b'D';
pub const TAG_BOOL:         u8 = b'b';
pub const TAG_NULL:         u8 = b'Z';
pub const TAG_STR:          u8 = b'Q';
pub const TAG_BYTES:        u8 = b'X';
pub const TAG_ARRAY_START:  u8 = b'[';
pub const TAG_ARRAY_END:    u8 = b']';
pub const TAG_RECORD_START: u8 = b'{';
pub const TAG_RECORD_END:   u8 = b'}';

/// Maximum container nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
	I8(i8),
	U8(u8),
	I16(i16),
	U16(u16),
	I32(i32),
	U32(u32),
	I64(i64),
	U64(u64),
	F32(f32),
	F64(f64),
	DateTime(i64),
	Bool(bool),
	Null,
	Str(String),
	Bytes(Vec<u8>),
	Array(Vec<Value>),
	Record(Vec<Value>)
}

impl Value {
	pub fn datetime(v: chrono::DateTime<chrono::Utc>) -> Self {
		Self::DateTime(v.timestamp())
	}

	pub fn as_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
		use chrono::TimeZone;

		match self {
			Self::DateTime(v) => chrono::Utc.timestamp_opt(*v, 0).single(),
			_ => None
		}
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Self::Str(v.to_string())
	}
}

pub trait TagWrite: Write {
	fn write_varint(&mut self, mut v: u64) -> Result<()> {
		loop {
			let b = (v & 0x7F) as u8;
			v >>= 7;

			if v == 0 {
				return self.write_all(&[b]);
			}

			self.write_all(&[b | 0x80])?;
		}
	}

	fn write_len_prefixed(&mut self, tag: u8, data: &[u8]) -> Result<()> {
		let len = u32::try_from(data.len())
			.map_err(|_| Error::new(ErrorKind::InvalidInput, "value too long"))?;
		self.write_all(&[tag])?;
		self.write_all(&len.to_be_bytes())?;
		self.write_all(data)
	}

	fn write_value(&mut self, v: &Value) -> Result<()> {
		match v {
			Value::I8(v)       => { self.write_all(&[TAG_I8])?;       self.write_all(&v.to_be_bytes()) }
			Value::U8(v)       => { self.write_all(&[TAG_U8])?;       self.write_all(&v.to_be_bytes()) }
			Value::I16(v)      => { self.write_all(&[TAG_I16])?;      self.write_all(&v.to_be_bytes()) }
			Value::U16(v)      => { self.write_all(&[TAG_U16])?;      self.write_all(&v.to_be_bytes()) }
			Value::I32(v)      => { self.write_all(&[TAG_I32])?;      self.write_all(&v.to_be_bytes()) }
			Value::U32(v)      => { self.write_all(&[TAG_U32])?;      self.write_all(&v.to_be_bytes()) }
			Value::I64(v)      => { self.write_all(&[TAG_I64])?;      self.write_all(&v.to_be_bytes()) }
			Value::U64(v)      => { self.write_all(&[TAG_U64])?;      self.write_all(&v.to_be_bytes()) }
			Value::F32(v)      => { self.write_all(&[TAG_F32])?;      self.write_all(&v.to_be_bytes()) }
			Value::F64(v)      => { self.write_all(&[TAG_F64])?;      self.write_all(&v.to_be_bytes()) }
			Value::DateTime(v) => { self.write_all(&[TAG_DATETIME])?; self.write_all(&v.to_be_bytes()) }
			Value::Bool(v)     => self.write_all(&[TAG_BOOL, if *v { b't' } else { b'f' }]),
			Value::Null        => self.write_all(&[TAG_NULL]),
			Value::Str(v)      => self.write_len_prefixed(TAG_STR, v.as_bytes()),
			Value::Bytes(v)    => self.write_len_prefixed(TAG_BYTES, v),
			Value::Array(v)    => {
				self.write_all(&[TAG_ARRAY_START])?;
				self.write_varint(v.len() as u64)?;

				for v in v {
					self.write_value(v)?;
				}

				self.write_all(&[TAG_ARRAY_END])
			}
			Value::Record(v)   => {
				self.write_all(&[TAG_RECORD_START])?;

				for v in v {
					self.write_value(v)?;
				}

				self.write_all(&[TAG_RECORD_END])
			}
		}
	}
}

impl<T: Write> TagWrite for T {}

pub trait TagRead: Read {
	fn read_tag(&mut self) -> Result<u8> {
		let mut buf = [0u8];
		self.read_exact(&mut buf)?;
		Ok(buf[0])
	}

	fn read_varint(&mut self) -> Result<u64> {
		let mut v     = 0u64;
		let mut shift = 0;

		loop {
			let b = self.read_tag()?;

			if shift >= 64 {
				return Err(Error::new(ErrorKind::InvalidData, "varint too long"));
			}

			v |= ((b & 0x7F) as u64) << shift;

			if b & 0x80 == 0 {
				return Ok(v);
			}

			shift += 7;
		}
	}

	fn read_len_prefixed(&mut self) -> Result<Vec<u8>> {
		let mut buf = [0u8; 4];
		self.read_exact(&mut buf)?;
		let mut data = vec![0u8; u32::from_be_bytes(buf) as usize];
		self.read_exact(&mut data)?;
		Ok(data)
	}

	fn read_value(&mut self) -> Result<Value> {
		let tag = self.read_tag()?;
		self.read_value_with_tag(tag, 0)
	}

	fn read_value_with_tag(&mut self, tag: u8, depth: usize) -> Result<Value> {
		if depth > MAX_DEPTH {
			return Err(Error::new(ErrorKind::InvalidData, "container nesting too deep"));
		}

		macro_rules! scalar {
			($variant:ident, $ty:ty) => {{
				let mut buf = [0u8; std::mem::size_of::<$ty>()];
				self.read_exact(&mut buf)?;
				Value::$variant(<$ty>::from_be_bytes(buf))
			}};
		}

		Ok(match tag {
			TAG_I8       => scalar!(I8,  i8),
			TAG_U8       => scalar!(U8,  u8),
			TAG_I16      => scalar!(I16, i16),
			TAG_U16      => scalar!(U16, u16),
			TAG_I32      => scalar!(I32, i32),
			TAG_U32      => scalar!(U32, u32),
			TAG_I64      => scalar!(I64, i64),
			TAG_U64      => scalar!(U64, u64),
			TAG_F32      => scalar!(F32, f32),
			TAG_F64      => scalar!(F64, f64),
			TAG_DATETIME => scalar!(DateTime, i64),
			TAG_BOOL     => match self.read_tag()? {
				b't' => Value::Bool(true),
				b'f' => Value::Bool(false),
				v    => return Err(Error::new(ErrorKind::InvalidData,
					format!("invalid boolean payload {:#04x}", v)))
			},
			TAG_NULL     => Value::Null,
			TAG_STR      => Value::Str(String::from_utf8(self.read_len_prefixed()?)
				.map_err(|e| Error::new(ErrorKind::InvalidData, e))?),
			TAG_BYTES    => Value::Bytes(self.read_len_prefixed()?),
			TAG_ARRAY_START => {
				let len = self.read_varint()? as usize;
				let mut values = Vec::with_capacity(len.min(0x1000));

				for _ in 0..len {
					let tag = self.read_tag()?;

					if tag == TAG_ARRAY_END {
						return Err(Error::new(ErrorKind::InvalidData, "array shorter than its count"));
					}

					values.push(self.read_value_with_tag(tag, depth + 1)?);
				}

				if self.read_tag()? != TAG_ARRAY_END {
					return Err(Error::new(ErrorKind::InvalidData, "unbalanced array"));
				}

				Value::Array(values)
			}
			TAG_RECORD_START => {
				let mut values = Vec::new();

				loop {
					match self.read_tag()? {
						TAG_RECORD_END => break,
						tag => values.push(self.read_value_with_tag(tag, depth + 1)?)
					}
				}

				Value::Record(values)
			}
			TAG_ARRAY_END | TAG_RECORD_END => return Err(Error::new(
				ErrorKind::InvalidData, "unbalanced container")),
			v => return Err(Error::new(ErrorKind::InvalidData,
				format!("invalid tag {:#04x}", v)))
		})
	}
}

impl<T: Read> TagRead for T {}

pub fn encode(v: &Value) -> Vec<u8> {
	let mut buf = Vec::new();
	buf.write_value(v).expect("write to Vec failed");
	buf
}

/// Decodes exactly one value; trailing bytes are an error.
pub fn decode(mut buf: &[u8]) -> Result<Value> {
	let v = buf.read_value()?;

	if !buf.is_empty() {
		return Err(Error::new(ErrorKind::InvalidData, "trailing bytes after value"));
	}

	Ok(v)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn roundtrip(v: Value) {
		assert_eq!(decode(&encode(&v)).unwrap(), v);
	}

	#[test]
	fn scalars() {
		roundtrip(Value::I8(-100));
		roundtrip(Value::U8(200));
		roundtrip(Value::I16(-30000));
		roundtrip(Value::U16(60000));
		roundtrip(Value::I32(-2_000_000_000));
		roundtrip(Value::U32(4_000_000_000));
		roundtrip(Value::I64(i64::MIN));
		roundtrip(Value::U64(u64::MAX));
		roundtrip(Value::F32(1.5));
		roundtrip(Value::F64(-2.25e300));
		roundtrip(Value::DateTime(1_700_000_000));
		roundtrip(Value::Bool(true));
		roundtrip(Value::Bool(false));
		roundtrip(Value::Null);
	}

	#[test]
	fn varlen() {
		roundtrip(Value::Str(String::new()));
		roundtrip(Value::Str("grüße, верблюд".to_string()));
		roundtrip(Value::Bytes(vec![0u8, 1, 2, 255]));
		roundtrip(Value::Bytes((0..=255).collect()));
	}

	#[test]
	fn containers() {
		roundtrip(Value::Array(Vec::new()));
		roundtrip(Value::Record(Vec::new()));
		roundtrip(Value::Array((0..200).map(Value::I32).collect()));
		roundtrip(Value::Record(vec![
			Value::Str("user".to_string()),
			Value::U64(42),
			Value::Array(vec![
				Value::Record(vec![Value::Str("post".to_string()), Value::Bool(false)]),
				Value::Record(vec![Value::Str("reply".to_string()), Value::Null])
			])
		]));
	}

	#[test]
	fn wire_layout() {
		assert_eq!(encode(&Value::U16(0x1234)), [TAG_U16, 0x12, 0x34]);
		assert_eq!(encode(&Value::Null), [TAG_NULL]);
		assert_eq!(encode(&Value::Bool(true)), [TAG_BOOL, b't']);
		assert_eq!(encode(&Value::Str("ab".to_string())), [TAG_STR, 0, 0, 0, 2, b'a', b'b']);
		assert_eq!(
			encode(&Value::Array(vec![Value::U8(7)])),
			[TAG_ARRAY_START, 1, TAG_U8, 7, TAG_ARRAY_END]
		);
	}

	#[test]
	fn varint() {
		for v in [0u64, 1, 127, 128, 300, 16384, u64::MAX] {
			let mut buf = Vec::new();
			buf.write_varint(v).unwrap();
			assert_eq!((&buf[..]).read_varint().unwrap(), v);
		}
	}

	#[test]
	fn rejects_unbalanced() {
		assert!(decode(&[TAG_ARRAY_END]).is_err());
		assert!(decode(&[TAG_RECORD_START, TAG_U8, 7]).is_err());
		assert!(decode(&[TAG_ARRAY_START, 2, TAG_U8, 7, TAG_ARRAY_END]).is_err());
		assert!(decode(&[TAG_RECORD_START, TAG_RECORD_END, TAG_NULL]).is_err());
	}

	#[test]
	fn rejects_garbage() {
		assert!(decode(&[]).is_err());
		assert!(decode(&[b'?']).is_err());
		assert!(decode(&[TAG_BOOL, b'x']).is_err());
		assert!(decode(&[TAG_STR, 0, 0, 0, 1, 0xFF]).is_err());
		assert!(decode(&[TAG_I32, 0, 0]).is_err());
	}

	#[test]
	fn rejects_deep_nesting() {
		let mut buf = Vec::new();

		for _ in 0..MAX_DEPTH + 8 {
			buf.push(TAG_RECORD_START);
		}

		assert!(decode(&buf).is_err());
	}

	#[test]
	fn datetime_helpers() {
		let now = chrono::Utc::now();
		let v   = Value::datetime(now);
		assert_eq!(v.as_datetime().unwrap().timestamp(), now.timestamp());
		assert_eq!(Value::Null.as_datetime(), None);
	}
}
