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

//! Blocking sockets with deadlines.
//!
//! One socket type over two transports, plain TCP and TLS. Every I/O
//! operation has a three-valued outcome: success, timeout, or failure
//! with the OS error code attached. Deadlines are enforced by a
//! level-triggered poll before each attempt; interrupted calls and
//! would-blocks consume one retry each.

use {
	crate::{
		endpoint::{Endpoint, Transport},
		error::{io_tcpip, Error, Result},
		tls
	},
	std::{
		io::{self, Read, Write},
		net::{SocketAddr, TcpListener, TcpStream},
		os::unix::io::{AsRawFd, RawFd}
	},
	nix::{errno::Errno, poll::{poll, PollFd, PollFlags}},
	rustls::{ClientConnection, ServerConnection, StreamOwned}
};

/// Deadline for completing a TLS handshake inside `accept`.
const HANDSHAKE_TIMEOUT: u32 = 10_000;

fn poll_fd(fd: RawFd, flags: PollFlags, timeout: u32) -> Result<bool> {
	let mut fds = [PollFd::new(fd, flags)];

	loop {
		match poll(&mut fds, timeout.min(i32::MAX as u32) as i32) {
			Ok(0)            => return Ok(false),
			Ok(_)            => return Ok(true),
			Err(Errno::EINTR) => continue,
			Err(e)           => return Err(Error::tcpip(e as i32))
		}
	}
}

fn transient(e: &io::Error) -> bool {
	matches!(e.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock)
}

pub enum Socket {
	Tcp(TcpStream),
	Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
	TlsClient(Box<StreamOwned<ClientConnection, TcpStream>>)
}

impl Socket {
	/// Plain TCP client socket.
	pub fn connect(host: &str, port: u16) -> Result<Self> {
		let stream = TcpStream::connect((host, port)).map_err(io_tcpip)?;
		let _ = stream.set_nodelay(true);
		Ok(Self::Tcp(stream))
	}

	/// TLS client socket; the handshake completes before this returns.
	pub fn connect_tls(host: &str, port: u16, cfg: std::sync::Arc<rustls::ClientConfig>) -> Result<Self> {
		let name = rustls::ServerName::try_from(host)
			.map_err(|_| Error::other(format!("invalid server name `{}`", host)))?;
		let stream = TcpStream::connect((host, port)).map_err(io_tcpip)?;
		let _ = stream.set_nodelay(true);

		let conn = ClientConnection::new(cfg, name)
			.map_err(|e| Error::other(format!("TLS session: {}", e)))?;
		let mut stream = StreamOwned::new(conn, stream);

		while stream.conn.is_handshaking() {
			if !poll_fd(stream.sock.as_raw_fd(), PollFlags::POLLIN | PollFlags::POLLOUT, HANDSHAKE_TIMEOUT)? {
				return Err(Error::other(format!("{}:{}: handshake timed out", host, port)));
			}

			stream.conn.complete_io(&mut stream.sock)
				.map_err(|e| Error::other(format!("{}:{}: handshake failed: {}", host, port, e)))?;
		}

		Ok(Self::TlsClient(Box::new(stream)))
	}

	fn fd(&self) -> RawFd {
		match self {
			Self::Tcp(s)       => s.as_raw_fd(),
			Self::Tls(s)       => s.sock.as_raw_fd(),
			Self::TlsClient(s) => s.sock.as_raw_fd()
		}
	}

	pub fn poll_readable(&self, timeout: u32) -> Result<bool> {
		poll_fd(self.fd(), PollFlags::POLLIN, timeout)
	}

	pub fn poll_writable(&self, timeout: u32) -> Result<bool> {
		poll_fd(self.fd(), PollFlags::POLLOUT, timeout)
	}

	/// Whether decrypted bytes are already buffered, i.e. readable without
	/// touching the descriptor.
	pub fn pending(&mut self) -> bool {
		match self {
			Self::Tcp(_)       => false,
			Self::Tls(s)       => s.conn.process_new_packets()
				.map(|state| state.plaintext_bytes_to_read() > 0)
				.unwrap_or(false),
			Self::TlsClient(s) => s.conn.process_new_packets()
				.map(|state| state.plaintext_bytes_to_read() > 0)
				.unwrap_or(false)
		}
	}

	pub fn set_nonblocking(&self, on: bool) -> Result<()> {
		match self {
			Self::Tcp(s)       => s.set_nonblocking(on),
			Self::Tls(s)       => s.sock.set_nonblocking(on),
			Self::TlsClient(s) => s.sock.set_nonblocking(on)
		}.map_err(io_tcpip)
	}

	/// Reads up to `buf.len()` bytes. `Ok(0)` is end of stream.
	pub fn read(&mut self, buf: &mut [u8], timeout: u32, retries: u32) -> Result<usize> {
		// drain buffered plaintext before consulting the descriptor
		let buffered = match self {
			Self::Tcp(_)       => None,
			Self::Tls(s)       => Some(s.conn.reader().read(buf)),
			Self::TlsClient(s) => Some(s.conn.reader().read(buf))
		};

		match buffered {
			Some(Ok(n))                                              => return Ok(n),
			Some(Err(e)) if e.kind() == io::ErrorKind::WouldBlock    => (),
			Some(Err(e))                                             => return Err(io_tcpip(e)),
			None                                                     => ()
		}

		let mut attempts = 0;

		loop {
			if !self.poll_readable(timeout)? {
				return Err(Error::timeout());
			}

			let r = match self {
				Self::Tcp(s)       => s.read(buf),
				Self::Tls(s)       => s.read(buf),
				Self::TlsClient(s) => s.read(buf)
			};

			match r {
				Ok(n) => return Ok(n),
				Err(e) if transient(&e) => {
					attempts += 1;

					if attempts > retries {
						return Err(Error::timeout());
					}
				}
				Err(e) => return Err(io_tcpip(e))
			}
		}
	}

	pub fn write_all(&mut self, buf: &[u8], timeout: u32, retries: u32) -> Result<()> {
		let mut written  = 0;
		let mut attempts = 0;

		while written < buf.len() {
			if !self.poll_writable(timeout)? {
				return Err(Error::timeout());
			}

			let r = match self {
				Self::Tcp(s)       => s.write(&buf[written..]),
				Self::Tls(s)       => s.write(&buf[written..]),
				Self::TlsClient(s) => s.write(&buf[written..])
			};

			match r {
				Ok(0) => return Err(Error::closed()),
				Ok(n) => written += n,
				Err(e) if transient(&e) => {
					attempts += 1;

					if attempts > retries {
						return Err(Error::timeout());
					}
				}
				Err(e) => return Err(io_tcpip(e))
			}
		}

		Ok(())
	}

	pub fn shutdown(&mut self) -> Result<()> {
		match self {
			Self::Tcp(s)       => s.shutdown(std::net::Shutdown::Both).map_err(io_tcpip),
			Self::Tls(s)       => {
				s.conn.send_close_notify();
				// flush the close_notify alert, ignore a peer that is gone
				let _ = s.flush();
				s.sock.shutdown(std::net::Shutdown::Both).map_err(io_tcpip)
			}
			Self::TlsClient(s) => {
				s.conn.send_close_notify();
				let _ = s.flush();
				s.sock.shutdown(std::net::Shutdown::Both).map_err(io_tcpip)
			}
		}
	}
}

pub struct Listener {
	inner: TcpListener,
	tls:   Option<std::sync::Arc<rustls::ServerConfig>>
}

impl Listener {
	pub fn bind(endpoint: &Endpoint) -> Result<Self> {
		let tls = match (endpoint.transport, &endpoint.tls) {
			(Transport::Tcp, _)         => None,
			(Transport::Tls, Some(cfg)) => Some(tls::server_config(cfg)?),
			(Transport::Tls, None)      =>
				return Err(Error::other("TLS endpoint without certificate configuration"))
		};

		let inner = TcpListener::bind((endpoint.host.as_str(), endpoint.port))
			.map_err(io_tcpip)?;

		log::info!("listen: bound {} ({:?})", endpoint, endpoint.transport);
		Ok(Self { inner, tls })
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		self.inner.local_addr().map_err(io_tcpip)
	}

	pub fn port(&self) -> u16 {
		self.inner.local_addr().map(|a| a.port()).unwrap_or(0)
	}

	/// Accepts one connection. For TLS the handshake is part of the
	/// accept; a failed handshake is a failure, never a half-open socket.
	pub fn accept(&self) -> Result<(Socket, SocketAddr)> {
		let (stream, addr) = self.inner.accept().map_err(io_tcpip)?;
		let _ = stream.set_nodelay(true);

		let cfg = match &self.tls {
			None      => return Ok((Socket::Tcp(stream), addr)),
			Some(cfg) => cfg
		};

		let conn = ServerConnection::new(cfg.clone())
			.map_err(|e| Error::other(format!("TLS session: {}", e)))?;
		let mut stream = StreamOwned::new(conn, stream);

		while stream.conn.is_handshaking() {
			if !poll_fd(stream.sock.as_raw_fd(), PollFlags::POLLIN | PollFlags::POLLOUT, HANDSHAKE_TIMEOUT)? {
				return Err(Error::other(format!("{}: handshake timed out", addr)));
			}

			stream.conn.complete_io(&mut stream.sock)
				.map_err(|e| Error::other(format!("{}: handshake failed: {}", addr, e)))?;
		}

		Ok((Socket::Tls(Box::new(stream)), addr))
	}

	/// Forces a blocked `accept` in another thread to return.
	pub fn shutdown(&self) {
		if let Err(e) = nix::sys::socket::shutdown(self.inner.as_raw_fd(), nix::sys::socket::Shutdown::Both) {
			log::debug!("listen: shutdown: {}", e);
		}
	}
}

#[cfg(test)]
mod tests {
	use {super::*, std::io::Write};

	#[test]
	fn read_with_deadline() {
		let listener = Listener::bind(&Endpoint::tcp("127.0.0.1", 0)).unwrap();
		let port     = listener.port();

		let client = std::thread::spawn(move || {
			let mut s = TcpStream::connect(("127.0.0.1", port)).unwrap();
			s.write_all(b"ping").unwrap();
			std::thread::sleep(std::time::Duration::from_millis(200));
		});

		let (mut sock, _) = listener.accept().unwrap();
		let mut buf = [0u8; 16];
		assert_eq!(sock.read(&mut buf, 1_000, 0).unwrap(), 4);
		assert_eq!(&buf[..4], b"ping");

		// nothing further arrives within the deadline
		assert!(sock.read(&mut buf, 50, 0).unwrap_err().is_timeout());

		// peer closes, read reports end of stream
		client.join().unwrap();
		assert_eq!(sock.read(&mut buf, 1_000, 0).unwrap(), 0);
	}

	#[test]
	fn client_connect() {
		let listener = Listener::bind(&Endpoint::tcp("127.0.0.1", 0)).unwrap();
		let port     = listener.port();

		let server = std::thread::spawn(move || {
			let (mut sock, _) = listener.accept().unwrap();
			sock.write_all(b"hi", 1_000, 0).unwrap();
		});

		let mut sock = Socket::connect("127.0.0.1", port).unwrap();
		let mut buf  = [0u8; 2];
		assert_eq!(sock.read(&mut buf, 1_000, 0).unwrap(), 2);
		assert_eq!(&buf, b"hi");
		server.join().unwrap();
	}

	#[test]
	fn listener_shutdown_wakes_accept() {
		let listener = std::sync::Arc::new(Listener::bind(&Endpoint::tcp("127.0.0.1", 0)).unwrap());
		let accept   = {
			let listener = listener.clone();
			std::thread::spawn(move || listener.accept().map(|_| ()))
		};

		std::thread::sleep(std::time::Duration::from_millis(100));
		listener.shutdown();
		assert!(accept.join().unwrap().is_err());
	}

	#[test]
	fn tls_endpoint_requires_config() {
		let endpoint = Endpoint { transport: Transport::Tls, host: "127.0.0.1".to_string(), port: 0, tls: None };
		assert!(Listener::bind(&endpoint).is_err());
	}
}
