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

//! Fixed-capacity byte buffer with a read cursor. The building block of
//! a connection's read and write sides; detachable so buffers can be
//! pooled across connections.

pub struct Membuf {
	data:  Vec<u8>,
	start: usize,
	end:   usize
}

impl Membuf {
	pub fn new(capacity: usize) -> Self {
		Self { data: vec![0; capacity], start: 0, end: 0 }
	}

	pub fn capacity(&self) -> usize {
		self.data.len()
	}

	/// Unread bytes in the window.
	pub fn len(&self) -> usize {
		self.end - self.start
	}

	pub fn is_empty(&self) -> bool {
		self.start == self.end
	}

	/// Free space at the tail, after compacting.
	pub fn free(&self) -> usize {
		self.capacity() - self.len()
	}

	pub fn clear(&mut self) {
		self.start = 0;
		self.end   = 0;
	}

	/// Moves the unread window to the front so the tail is writable.
	fn compact(&mut self) {
		if self.start > 0 {
			self.data.copy_within(self.start..self.end, 0);
			self.end -= self.start;
			self.start = 0;
		}
	}

	/// Appends as much of `src` as fits, returns the number of bytes taken.
	pub fn write(&mut self, src: &[u8]) -> usize {
		if self.capacity() - self.end < src.len() {
			self.compact();
		}

		let n = src.len().min(self.capacity() - self.end);
		self.data[self.end..self.end + n].copy_from_slice(&src[..n]);
		self.end += n;
		n
	}

	/// The writable tail. Bytes placed there become part of the window via
	/// [`Self::advance`].
	pub fn space_mut(&mut self) -> &mut [u8] {
		self.compact();
		let end = self.end;
		&mut self.data[end..]
	}

	pub fn advance(&mut self, n: usize) {
		debug_assert!(self.end + n <= self.capacity());
		self.end += n;
	}

	pub fn read(&mut self, dst: &mut [u8]) -> usize {
		let n = dst.len().min(self.len());
		dst[..n].copy_from_slice(&self.data[self.start..self.start + n]);
		self.start += n;
		n
	}

	pub fn getc(&mut self) -> Option<u8> {
		if self.is_empty() {
			return None;
		}

		let c = self.data[self.start];
		self.start += 1;
		Some(c)
	}

	/// Pushes one byte back in front of the window. Fails when the window
	/// already touches the front of the buffer.
	pub fn unget(&mut self, c: u8) -> bool {
		if self.start == 0 {
			return false;
		}

		self.start -= 1;
		self.data[self.start] = c;
		true
	}

	pub fn peek(&self) -> Option<u8> {
		(!self.is_empty()).then(|| self.data[self.start])
	}

	/// The unread window.
	pub fn as_slice(&self) -> &[u8] {
		&self.data[self.start..self.end]
	}

	pub fn consume(&mut self, n: usize) {
		debug_assert!(n <= self.len());
		self.start += n;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn write_read() {
		let mut buf = Membuf::new(8);
		assert_eq!(buf.write(b"hello"), 5);
		assert_eq!(buf.write(b"world"), 3);
		assert_eq!(buf.len(), 8);
		assert_eq!(buf.free(), 0);

		let mut out = [0u8; 8];
		assert_eq!(buf.read(&mut out), 8);
		assert_eq!(&out, b"hellowor");
		assert!(buf.is_empty());
	}

	#[test]
	fn compaction_reclaims_consumed_space() {
		let mut buf = Membuf::new(8);
		buf.write(b"abcdefgh");
		let mut out = [0u8; 6];
		buf.read(&mut out);
		assert_eq!(buf.write(b"123456"), 6);
		assert_eq!(buf.as_slice(), b"gh123456");
	}

	#[test]
	fn unget() {
		let mut buf = Membuf::new(4);
		assert!(!buf.unget(b'x'));
		buf.write(b"ab");
		assert_eq!(buf.getc(), Some(b'a'));
		assert!(buf.unget(b'z'));
		assert_eq!(buf.getc(), Some(b'z'));
		assert_eq!(buf.getc(), Some(b'b'));
		assert_eq!(buf.getc(), None);
	}

	#[test]
	fn space_mut_advance() {
		let mut buf = Membuf::new(4);
		buf.space_mut()[..2].copy_from_slice(b"ok");
		buf.advance(2);
		assert_eq!(buf.as_slice(), b"ok");
		buf.consume(2);
		assert!(buf.is_empty());
	}
}
