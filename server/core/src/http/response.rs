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

//! Response assembly and emission.
//!
//! Body content appends in call order. `send` writes the status line,
//! headers, cookies and body onto a connection and consumes the
//! response; cached bodies take the big-buffer path, bodies of unknown
//! length go out chunked (or close-delimited under HTTP/1.0).

use {
	super::{cookie::Cookie, headers::HeaderMap, Status, Version},
	crate::{cache, connection::Connection, error::Result},
	std::{io::Read, sync::Arc}
};

const STREAM_CHUNK: usize = 0x2000;

pub enum Body {
	Empty,
	Buffer(Vec<u8>),
	Cached(Arc<cache::Entry>),
	/// A producer of unknown length.
	Stream(Box<dyn Read + Send>)
}

pub struct Response {
	version: Version,
	status:  Status,
	headers: HeaderMap,
	cookies: Vec<Cookie>,
	body:    Body
}

impl Default for Response {
	fn default() -> Self {
		Self::new()
	}
}

impl Response {
	pub fn new() -> Self {
		Self {
			version: Version::Http11,
			status:  Status::Ok,
			headers: HeaderMap::new(),
			cookies: Vec::new(),
			body:    Body::Empty
		}
	}

	pub fn with_version(version: Version) -> Self {
		Self { version, ..Self::new() }
	}

	pub fn status(&self) -> Status {
		self.status
	}

	pub fn set_status(&mut self, status: Status) {
		self.status = status;
	}

	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(name)
	}

	pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.headers.set(name, value);
	}

	pub fn add_cookie(&mut self, cookie: Cookie) {
		self.cookies.push(cookie);
	}

	pub fn set_body_cached(&mut self, entry: Arc<cache::Entry>) {
		self.body = Body::Cached(entry);
	}

	pub fn set_body_stream(&mut self, stream: Box<dyn Read + Send>) {
		self.body = Body::Stream(stream);
	}

	pub fn has_body(&self) -> bool {
		!matches!(&self.body, Body::Empty)
	}

	/// Appends bytes to the body.
	pub fn add(&mut self, bytes: &[u8]) {
		match &mut self.body {
			Body::Buffer(buf) => buf.extend_from_slice(bytes),
			_                 => self.body = Body::Buffer(bytes.to_vec())
		}
	}

	pub fn add_str(&mut self, s: &str) {
		self.add(s.as_bytes());
	}

	/// `<p>text</p>`
	pub fn p(&mut self, text: &str) {
		self.add_str("<p>");
		self.add_str(text);
		self.add_str("</p>");
	}

	/// `<br>`
	pub fn br(&mut self) {
		self.add_str("<br>");
	}

	/// `<a href="url">text</a>`
	pub fn href(&mut self, url: &str, text: &str) {
		self.add_str("<a href=\"");
		self.add_str(url);
		self.add_str("\">");
		self.add_str(text);
		self.add_str("</a>");
	}

	pub fn content_length(&self) -> Option<usize> {
		match &self.body {
			Body::Empty       => Some(0),
			Body::Buffer(v)   => Some(v.len()),
			Body::Cached(e)   => Some(e.len()),
			Body::Stream(_)   => None
		}
	}

	/// Emits the response and consumes it. `head_only` suppresses the
	/// body while keeping its headers, for HEAD requests.
	pub fn send(mut self, conn: &mut Connection, head_only: bool) -> Result<()> {
		let chunked = match (self.content_length(), self.version) {
			(Some(len), _) => {
				self.headers.set("Content-Length", len.to_string());
				false
			}
			// unknown length under 1.0 is delimited by the close
			(None, Version::Http10) => {
				conn.set_persistent(false);
				false
			}
			(None, Version::Http11) => {
				self.headers.set("Transfer-Encoding", "chunked");
				true
			}
		};

		if !self.headers.contains("Date") {
			self.headers.set("Date", chrono::Utc::now()
				.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
		}

		if !conn.is_persistent() {
			self.headers.set("Connection", "close");
		} else if self.version == Version::Http10 {
			self.headers.set("Connection", "keep-alive");
		}

		conn.puts(&format!("{} {}\r\n", self.version, self.status))?;

		for (name, value) in self.headers.iter() {
			conn.puts(&format!("{}: {}\r\n", name, value))?;
		}

		for cookie in &self.cookies {
			conn.puts(&format!("Set-Cookie: {}\r\n", cookie))?;
		}

		conn.puts("\r\n")?;

		if !head_only {
			match self.body {
				Body::Empty       => (),
				Body::Buffer(v)   => conn.write(&v)?,
				Body::Cached(e)   => conn.write_big(e.data())?,
				Body::Stream(mut stream) => {
					let mut buf = [0u8; STREAM_CHUNK];

					loop {
						let n = stream.read(&mut buf)
							.map_err(crate::error::Error::from)?;

						if n == 0 {
							break;
						}

						if chunked {
							conn.puts(&format!("{:x}\r\n", n))?;
							conn.write(&buf[..n])?;
							conn.puts("\r\n")?;
						} else {
							conn.write(&buf[..n])?;
						}
					}

					if chunked {
						conn.puts("0\r\n\r\n")?;
					}
				}
			}
		}

		conn.flush()
	}
}

/// The minimal HTML document sent when an error status has no body.
pub fn error_body(status: Status) -> String {
	format!(
		"<html><head><title>{status}</title></head><body><h1>{status}</h1></body></html>\n",
		status = status
	)
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::{endpoint::Endpoint, sock::Listener},
		std::{io::Read, net::TcpStream}
	};

	fn send(resp: Response, head_only: bool, persistent: bool) -> String {
		let listener = Listener::bind(&Endpoint::tcp("127.0.0.1", 0)).unwrap();
		let port     = listener.port();
		let client   = TcpStream::connect(("127.0.0.1", port)).unwrap();
		let (sock, addr) = listener.accept().unwrap();
		let mut conn = Connection::new(sock, addr, 512, 512, 1_000, 1_000, 0, 0);
		conn.set_persistent(persistent);

		resp.send(&mut conn, head_only).unwrap();
		conn.close().unwrap();

		let mut out = String::new();
		let mut client = client;
		client.read_to_string(&mut out).unwrap();
		out
	}

	#[test]
	fn status_line_headers_and_body() {
		let mut resp = Response::new();
		resp.add_str("hello");

		let out = send(resp, false, false);
		assert!(out.starts_with("HTTP/1.1 200 OK\r\n"));
		assert!(out.contains("Content-Length: 5\r\n"));
		assert!(out.contains("Date: "));
		assert!(out.contains("Connection: close\r\n"));
		assert!(out.ends_with("\r\n\r\nhello"));
	}

	#[test]
	fn head_suppresses_the_body() {
		let mut resp = Response::new();
		resp.add_str("hello");

		let out = send(resp, true, false);
		assert!(out.contains("Content-Length: 5\r\n"));
		assert!(out.ends_with("\r\n\r\n"));
	}

	#[test]
	fn cookies_are_emitted() {
		let mut resp = Response::new();
		resp.add_cookie(Cookie { max_age: 60, ..Cookie::new("sid", "x") });

		let out = send(resp, false, false);
		assert!(out.contains("Set-Cookie: sid=x; Max-Age=60\r\n"));
	}

	#[test]
	fn unknown_length_goes_chunked() {
		let mut resp = Response::new();
		resp.set_body_stream(Box::new(&b"0123456789"[..]));

		let out = send(resp, false, true);
		assert!(out.contains("Transfer-Encoding: chunked\r\n"));
		assert!(out.contains("a\r\n0123456789\r\n"));
		assert!(out.ends_with("0\r\n\r\n"));
	}

	#[test]
	fn html_sugar() {
		let mut resp = Response::new();
		resp.p("hi");
		resp.br();
		resp.href("/x", "link");

		match &resp.body {
			Body::Buffer(v) => assert_eq!(v, b"<p>hi</p><br><a href=\"/x\">link</a>"),
			_ => panic!("expected buffer body")
		}
	}

	#[test]
	fn minimal_error_document() {
		let body = error_body(Status::NotFound);
		assert!(body.contains("404 Not Found"));
		assert!(body.starts_with("<html>"));
	}
}
