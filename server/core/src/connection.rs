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

//! A buffered duplex byte stream over one socket, with its own timeouts,
//! retry counts and persistence flag. Writes accumulate in the write
//! buffer until it runs full or is flushed; payloads at least as large
//! as the buffer bypass it. Both buffers can be detached and reattached
//! for pooling.

use {
	crate::{
		error::{Error, Result},
		membuf::Membuf,
		sock::Socket
	},
	nix::errno::Errno,
	std::net::SocketAddr
};

/// Upper bound on the bytes [`Connection::discard`] will drain.
const DISCARD_MAX: usize = 64 * 1024;

/// How long [`Connection::discard`] waits for further bytes to trickle
/// in before calling the stream drained.
const DISCARD_QUIET: u32 = 50;

pub struct Connection {
	sock:           Socket,
	addr:           SocketAddr,
	readbuf:        Membuf,
	writebuf:       Membuf,
	timeout_read:   u32,
	timeout_write:  u32,
	retries_read:   u32,
	retries_write:  u32,
	persistent:     bool
}

impl Connection {
	pub fn new(
		sock:          Socket,
		addr:          SocketAddr,
		readbuf_size:  usize,
		writebuf_size: usize,
		timeout_read:  u32,
		timeout_write: u32,
		retries_read:  u32,
		retries_write: u32
	) -> Self {
		Self {
			sock,
			addr,
			readbuf:  Membuf::new(readbuf_size),
			writebuf: Membuf::new(writebuf_size),
			timeout_read,
			timeout_write,
			retries_read,
			retries_write,
			persistent: false
		}
	}

	pub fn addr(&self) -> SocketAddr {
		self.addr
	}

	pub fn is_persistent(&self) -> bool {
		self.persistent
	}

	pub fn set_persistent(&mut self, val: bool) {
		self.persistent = val;
	}

	pub fn set_read_timeout(&mut self, timeout: u32) {
		self.timeout_read = timeout;
	}

	pub fn read_timeout(&self) -> u32 {
		self.timeout_read
	}

	/// Refills the read buffer with at least one byte; `Ok(0)` is end of
	/// stream.
	fn fill(&mut self) -> Result<usize> {
		if self.readbuf.is_empty() {
			self.readbuf.clear();
		}

		let n = self.sock.read(self.readbuf.space_mut(), self.timeout_read, self.retries_read)?;
		self.readbuf.advance(n);
		Ok(n)
	}

	/// `Ok(None)` is end of stream.
	pub fn getc(&mut self) -> Result<Option<u8>> {
		if let Some(c) = self.readbuf.getc() {
			return Ok(Some(c));
		}

		match self.fill()? {
			0 => Ok(None),
			_ => Ok(self.readbuf.getc())
		}
	}

	pub fn ungetc(&mut self, c: u8) -> Result<()> {
		if self.readbuf.unget(c) {
			Ok(())
		} else {
			Err(Error::os(Errno::ENOBUFS as i32))
		}
	}

	/// Reads one CR LF-terminated line of at most `max` bytes and returns
	/// it without the line ending. A bare LF terminates too. Returns the
	/// overflow error when no line ending shows up within `max` bytes and
	/// the closed error on end of stream mid-line.
	pub fn gets(&mut self, max: usize) -> Result<String> {
		let mut line = Vec::new();

		loop {
			if self.readbuf.is_empty() && self.fill()? == 0 {
				return Err(Error::closed());
			}

			let window = self.readbuf.as_slice();

			match memchr::memchr(b'\n', window) {
				Some(i) => {
					line.extend_from_slice(&window[..i]);
					self.readbuf.consume(i + 1);

					if line.last() == Some(&b'\r') {
						line.pop();
					}

					if line.len() > max {
						return Err(Error::overflow());
					}

					return String::from_utf8(line)
						.map_err(|_| Error::other("invalid UTF-8 in line"));
				}
				None => {
					line.extend_from_slice(window);
					let n = window.len();
					self.readbuf.consume(n);

					if line.len() > max {
						return Err(Error::overflow());
					}
				}
			}
		}
	}

	/// Reads exactly `dst.len()` bytes. The buffer is drained first, the
	/// remainder is read from the socket directly.
	pub fn read_exact(&mut self, dst: &mut [u8]) -> Result<()> {
		let mut filled = self.readbuf.read(dst);

		while filled < dst.len() {
			match self.sock.read(&mut dst[filled..], self.timeout_read, self.retries_read)? {
				0 => return Err(Error::closed()),
				n => filled += n
			}
		}

		Ok(())
	}

	/// Polls for pending input without consuming it. Buffered bytes count.
	pub fn wait_for_data(&mut self, timeout: u32) -> Result<bool> {
		if !self.readbuf.is_empty() || self.sock.pending() {
			return Ok(true);
		}

		self.sock.poll_readable(timeout)
	}

	pub fn putc(&mut self, c: u8) -> Result<()> {
		self.write(&[c])
	}

	pub fn puts(&mut self, s: &str) -> Result<()> {
		self.write(s.as_bytes())
	}

	pub fn write(&mut self, mut buf: &[u8]) -> Result<()> {
		if buf.len() >= self.writebuf.capacity() {
			return self.write_big(buf);
		}

		loop {
			let n = self.writebuf.write(buf);
			buf = &buf[n..];

			if buf.is_empty() {
				return Ok(());
			}

			self.flush()?;
		}
	}

	/// Flushes, then writes `buf` directly to the socket, past the write
	/// buffer.
	pub fn write_big(&mut self, buf: &[u8]) -> Result<()> {
		self.flush()?;
		self.sock.write_all(buf, self.timeout_write, self.retries_write)
	}

	pub fn flush(&mut self) -> Result<()> {
		if !self.writebuf.is_empty() {
			self.sock.write_all(self.writebuf.as_slice(), self.timeout_write, self.retries_write)?;
			self.writebuf.clear();
		}

		Ok(())
	}

	/// Drains readable bytes until end of stream, a quiet period, or the
	/// drain bound.
	pub fn discard(&mut self) -> Result<()> {
		let mut total = self.readbuf.len();
		self.readbuf.clear();
		let mut buf = [0u8; 1024];

		while total < DISCARD_MAX {
			match self.sock.read(&mut buf, DISCARD_QUIET, 0) {
				Ok(0)                        => break,
				Ok(n)                        => total += n,
				Err(e) if e.is_timeout()     => break,
				Err(e)                       => return Err(e)
			}
		}

		Ok(())
	}

	/// Clears both buffers without touching the socket, readying the
	/// connection for the next request.
	pub fn recycle(&mut self) {
		self.readbuf.clear();
		self.writebuf.clear();
	}

	pub fn reclaim_read_buffer(&mut self) -> Membuf {
		std::mem::replace(&mut self.readbuf, Membuf::new(0))
	}

	pub fn reclaim_write_buffer(&mut self) -> Membuf {
		std::mem::replace(&mut self.writebuf, Membuf::new(0))
	}

	pub fn assign_read_buffer(&mut self, buf: Membuf) {
		self.readbuf = buf;
	}

	pub fn assign_write_buffer(&mut self, buf: Membuf) {
		self.writebuf = buf;
	}

	pub fn close(mut self) -> Result<()> {
		self.flush()?;
		self.sock.shutdown()
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::{endpoint::Endpoint, sock::Listener},
		std::{io::{Read, Write}, net::TcpStream}
	};

	pub(crate) fn pair() -> (Connection, TcpStream) {
		let listener = Listener::bind(&Endpoint::tcp("127.0.0.1", 0)).unwrap();
		let port     = listener.port();
		let client   = TcpStream::connect(("127.0.0.1", port)).unwrap();
		let (sock, addr) = listener.accept().unwrap();
		(Connection::new(sock, addr, 256, 256, 1_000, 1_000, 0, 0), client)
	}

	#[test]
	fn line_reading() {
		let (mut conn, mut client) = pair();
		client.write_all(b"GET / HTTP/1.1\r\nplain\nrest").unwrap();
		drop(client);

		assert_eq!(conn.gets(100).unwrap(), "GET / HTTP/1.1");
		assert_eq!(conn.gets(100).unwrap(), "plain");
		// end of stream inside an unterminated line
		assert!(conn.gets(100).unwrap_err().is_closed());
	}

	#[test]
	fn line_too_long() {
		let (mut conn, mut client) = pair();
		client.write_all(&[b'a'; 600]).unwrap();
		client.write_all(b"\r\n").unwrap();
		assert!(conn.gets(128).unwrap_err().is_overflow());
	}

	#[test]
	fn unget_after_getc() {
		let (mut conn, mut client) = pair();
		client.write_all(b"xy").unwrap();

		assert_eq!(conn.getc().unwrap(), Some(b'x'));
		conn.ungetc(b'x').unwrap();
		assert_eq!(conn.getc().unwrap(), Some(b'x'));
		assert_eq!(conn.getc().unwrap(), Some(b'y'));
	}

	#[test]
	fn buffered_writes_flush_on_demand() {
		let (mut conn, mut client) = pair();

		conn.puts("hello ").unwrap();
		conn.puts("world").unwrap();
		conn.flush().unwrap();

		let mut buf = [0u8; 11];
		client.read_exact(&mut buf).unwrap();
		assert_eq!(&buf, b"hello world");
	}

	#[test]
	fn big_writes_bypass_the_buffer() {
		let (mut conn, client) = pair();
		let payload = vec![7u8; 4096];

		let reader = std::thread::spawn(move || {
			let mut client = client;
			let mut buf    = Vec::new();
			client.read_to_end(&mut buf).unwrap();
			buf
		});

		conn.write(&payload).unwrap();
		conn.close().unwrap();
		assert_eq!(reader.join().unwrap(), payload);
	}

	#[test]
	fn exact_reads_span_buffer_and_socket() {
		let (mut conn, mut client) = pair();
		let payload = (0..=255u8).cycle().take(1024).collect::<Vec<_>>();
		client.write_all(&payload).unwrap();

		assert_eq!(conn.getc().unwrap(), Some(0));
		conn.ungetc(0).unwrap();

		let mut buf = vec![0u8; 1024];
		conn.read_exact(&mut buf).unwrap();
		assert_eq!(buf, payload);
	}

	#[test]
	fn buffer_reclaim_roundtrip() {
		let (mut conn, mut client) = pair();
		client.write_all(b"ab").unwrap();
		assert_eq!(conn.getc().unwrap(), Some(b'a'));

		let readbuf = conn.reclaim_read_buffer();
		assert_eq!(readbuf.as_slice(), b"b");
		conn.assign_read_buffer(readbuf);
		assert_eq!(conn.getc().unwrap(), Some(b'b'));
	}

	#[test]
	fn wait_for_data() {
		let (mut conn, mut client) = pair();
		assert!(!conn.wait_for_data(50).unwrap());
		client.write_all(b"x").unwrap();
		assert!(conn.wait_for_data(1_000).unwrap());
		assert_eq!(conn.getc().unwrap(), Some(b'x'));
	}
}
