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

//! Request parsing.
//!
//! Reads one full request off a connection. Grammar violations map to
//! protocol errors carrying the status the server should answer with:
//! unknown methods 501, over-long request URIs 414, duplicate or
//! malformed headers 400, bodies past the limit 413.

use {
	super::{cookie::Cookie, headers::{self, HeaderMap}, Method, Status, Version},
	crate::{
		connection::Connection,
		error::{Error, Result}
	}
};

const MAX_HEADER_LINE: usize = 0x2000;
const MAX_HEADERS:     usize = 128;

#[derive(Clone, Debug)]
pub struct Limits {
	pub max_uri:    usize,
	pub post_limit: usize
}

impl Default for Limits {
	fn default() -> Self {
		Self { max_uri: 2048, post_limit: 0x100000 }
	}
}

#[derive(Debug)]
pub struct Request {
	method:  Method,
	uri:     String,
	path:    String,
	query:   Option<String>,
	version: Version,
	headers: HeaderMap,
	params:  Vec<(String, String)>,
	cookies: Vec<Cookie>,
	body:    Vec<u8>
}

impl Request {
	pub fn method(&self) -> Method {
		self.method
	}

	/// The request URI as sent, path and query.
	pub fn uri(&self) -> &str {
		&self.uri
	}

	/// The path component, query stripped.
	pub fn path(&self) -> &str {
		&self.path
	}

	pub fn query(&self) -> Option<&str> {
		self.query.as_deref()
	}

	pub fn version(&self) -> Version {
		self.version
	}

	pub fn headers(&self) -> &HeaderMap {
		&self.headers
	}

	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(name)
	}

	/// The first value of a parameter, query string and form body merged,
	/// percent-decoded.
	pub fn parameter(&self, name: &str) -> Option<&str> {
		self.params.iter()
			.find(|(k, _)| k == name)
			.map(|(_, v)| v.as_str())
	}

	/// Every value of a parameter, in order.
	pub fn parameters(&self, name: &str) -> Vec<&str> {
		self.params.iter()
			.filter(|(k, _)| k == name)
			.map(|(_, v)| v.as_str())
			.collect()
	}

	pub fn cookies(&self) -> &[Cookie] {
		&self.cookies
	}

	pub fn body(&self) -> &[u8] {
		&self.body
	}

	/// Whether the peer asked for the connection to stay open: the 1.1
	/// default, or an explicit `Connection: keep-alive` under 1.0.
	pub fn keep_alive(&self) -> bool {
		match self.header("Connection") {
			Some(v) if v.eq_ignore_ascii_case("close")      => false,
			Some(v) if v.eq_ignore_ascii_case("keep-alive") => true,
			_ => self.version == Version::Http11
		}
	}
}

/// Reads one request. `Ok(None)` means the peer closed the connection
/// before sending anything, the clean end of a keep-alive session.
pub fn read_request(conn: &mut Connection, limits: &Limits) -> Result<Option<Request>> {
	match conn.getc()? {
		None    => return Ok(None),
		Some(c) => conn.ungetc(c)?
	}

	let line = conn.gets(limits.max_uri + 64)
		.map_err(|e| if e.is_overflow() { Error::protocol(Status::UriTooLong) } else { e })?;

	let (method, uri, version) = parse_request_line(&line, limits)?;
	let headers = read_headers(conn)?;

	let (path, query) = match uri.split_once('?') {
		Some((p, q)) => (p.to_string(), Some(q.to_string())),
		None         => (uri.clone(), None)
	};

	let mut params = Vec::new();

	if let Some(q) = &query {
		parse_params(q, &mut params);
	}

	let cookies = headers.get("Cookie")
		.map(Cookie::parse_request_header)
		.unwrap_or_default();

	let body = read_body(conn, &headers, method, limits)?;

	if headers.get("Content-Type")
		.map_or(false, |v| v.split(';').next().unwrap_or("").trim()
			.eq_ignore_ascii_case("application/x-www-form-urlencoded"))
	{
		match std::str::from_utf8(&body) {
			Ok(s)  => parse_params(s, &mut params),
			Err(_) => return Err(Error::protocol(Status::BadRequest)
				.with_message("form body is not UTF-8"))
		}
	}

	Ok(Some(Request { method, uri, path, query, version, headers, params, cookies, body }))
}

fn parse_request_line(line: &str, limits: &Limits) -> Result<(Method, String, Version)> {
	let bad = || Error::protocol(Status::BadRequest).with_message("malformed request line");

	let (method, rest) = line.split_once(' ').ok_or_else(bad)?;
	let (uri, proto)   = rest.rsplit_once(' ').ok_or_else(bad)?;

	let method = method.parse::<Method>()
		.map_err(|_| Error::protocol(Status::NotImplemented))?;

	if uri.is_empty() || uri.contains(' ') {
		return Err(bad());
	}

	if uri.len() > limits.max_uri {
		return Err(Error::protocol(Status::UriTooLong));
	}

	let version = match proto.strip_prefix("HTTP/") {
		None    => return Err(bad()),
		Some(_) => proto.parse::<Version>()
			.map_err(|_| Error::protocol(Status::HttpVersionNotSupported))?
	};

	Ok((method, uri.to_string(), version))
}

fn read_headers(conn: &mut Connection) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	loop {
		let line = conn.gets(MAX_HEADER_LINE)
			.map_err(|e| if e.is_overflow() {
				Error::protocol(Status::BadRequest).with_message("header line too long")
			} else {
				e
			})?;

		if line.is_empty() {
			return Ok(headers);
		}

		if headers.len() >= MAX_HEADERS {
			return Err(Error::protocol(Status::BadRequest).with_message("too many headers"));
		}

		let (name, value) = line.split_once(':')
			.ok_or_else(|| Error::protocol(Status::BadRequest).with_message("malformed header"))?;
		let name = name.trim();
		let mut value = value.trim().to_string();

		if name.is_empty() || name.contains(' ') {
			return Err(Error::protocol(Status::BadRequest).with_message("malformed header name"));
		}

		// Folded continuation lines may follow. Probing for them costs one
		// byte of lookahead; when the peer has sent nothing yet, the probe
		// runs into the read timeout and that means "no continuation".
		loop {
			match conn.getc() {
				Ok(Some(b' ' | b'\t')) => {
					let cont = conn.gets(MAX_HEADER_LINE)
						.map_err(|e| if e.is_overflow() {
							Error::protocol(Status::BadRequest).with_message("header line too long")
						} else {
							e
						})?;

					value.push(' ');
					value.push_str(cont.trim());
				}
				Ok(Some(c)) => {
					conn.ungetc(c)?;
					break;
				}
				Ok(None) => break,
				Err(e) if e.is_timeout() => break,
				Err(e) => return Err(e)
			}
		}

		if headers.contains(name) {
			if !headers::is_list_valued(name) {
				return Err(Error::protocol(Status::BadRequest)
					.with_message(format!("duplicate header {}", name)));
			}

			let merged = headers.get_mut(name).expect("header vanished");
			merged.push_str(", ");
			merged.push_str(&value);
		} else {
			headers.set(name, value);
		}
	}
}

fn read_body(conn: &mut Connection, headers: &HeaderMap, method: Method, limits: &Limits) -> Result<Vec<u8>> {
	if !method.has_body() {
		return Ok(Vec::new());
	}

	if headers.get("Transfer-Encoding")
		.map_or(false, |v| v.to_ascii_lowercase().contains("chunked"))
	{
		return read_chunked_body(conn, limits);
	}

	let len = match headers.get("Content-Length") {
		None    => return Ok(Vec::new()),
		Some(v) => v.trim().parse::<usize>()
			.map_err(|_| Error::protocol(Status::BadRequest).with_message("invalid Content-Length"))?
	};

	if len > limits.post_limit {
		// drain a bounded amount so a well-behaved peer sees the response
		let _ = conn.discard();
		return Err(Error::protocol(Status::PayloadTooLarge));
	}

	let mut body = vec![0u8; len];
	conn.read_exact(&mut body)?;
	Ok(body)
}

fn read_chunked_body(conn: &mut Connection, limits: &Limits) -> Result<Vec<u8>> {
	let mut body = Vec::new();

	loop {
		let line = conn.gets(64)?;
		let size = line.split(';').next().unwrap_or("").trim();
		let size = usize::from_str_radix(size, 16)
			.map_err(|_| Error::protocol(Status::BadRequest).with_message("invalid chunk size"))?;

		if size == 0 {
			// trailer fields up to the final empty line
			while !conn.gets(MAX_HEADER_LINE)?.is_empty() {}
			return Ok(body);
		}

		if body.len() + size > limits.post_limit {
			let _ = conn.discard();
			return Err(Error::protocol(Status::PayloadTooLarge));
		}

		let off = body.len();
		body.resize(off + size, 0);
		conn.read_exact(&mut body[off..])?;

		if !conn.gets(2)?.is_empty() {
			return Err(Error::protocol(Status::BadRequest).with_message("missing chunk delimiter"));
		}
	}
}

/// Percent-decoding, with `+` as space. Malformed escapes pass through
/// untouched.
pub fn url_decode(s: &str) -> String {
	let bytes = s.as_bytes();
	let mut out = Vec::with_capacity(bytes.len());
	let mut i = 0;

	while i < bytes.len() {
		match bytes[i] {
			b'+' => {
				out.push(b' ');
				i += 1;
			}
			b'%' => match (hex(bytes.get(i + 1)), hex(bytes.get(i + 2))) {
				(Some(hi), Some(lo)) => {
					out.push(hi << 4 | lo);
					i += 3;
				}
				_ => {
					out.push(b'%');
					i += 1;
				}
			}
			c => {
				out.push(c);
				i += 1;
			}
		}
	}

	String::from_utf8_lossy(&out).into_owned()
}

fn hex(c: Option<&u8>) -> Option<u8> {
	match c? {
		c @ b'0'..=b'9' => Some(c - b'0'),
		c @ b'a'..=b'f' => Some(c - b'a' + 10),
		c @ b'A'..=b'F' => Some(c - b'A' + 10),
		_ => None
	}
}

fn parse_params(s: &str, out: &mut Vec<(String, String)>) {
	for pair in s.split('&').filter(|s| !s.is_empty()) {
		match pair.split_once('=') {
			Some((k, v)) => out.push((url_decode(k), url_decode(v))),
			None         => out.push((url_decode(pair), String::new()))
		}
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::{endpoint::Endpoint, sock::Listener},
		std::{io::Write, net::TcpStream}
	};

	fn parse(raw: &[u8]) -> Result<Option<Request>> {
		let listener = Listener::bind(&Endpoint::tcp("127.0.0.1", 0)).unwrap();
		let port     = listener.port();
		let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
		client.write_all(raw).unwrap();
		drop(client);

		let (sock, addr) = listener.accept().unwrap();
		let mut conn = Connection::new(sock, addr, 512, 512, 1_000, 1_000, 0, 0);
		read_request(&mut conn, &Limits::default())
	}

	#[test]
	fn simple_get() {
		let req = parse(b"GET /index.html?q=1&q=2&x=a%20b HTTP/1.1\r\nHost: localhost\r\n\r\n")
			.unwrap().unwrap();

		assert_eq!(req.method(), Method::Get);
		assert_eq!(req.path(), "/index.html");
		assert_eq!(req.query(), Some("q=1&q=2&x=a%20b"));
		assert_eq!(req.version(), Version::Http11);
		assert_eq!(req.header("host"), Some("localhost"));
		assert_eq!(req.parameter("q"), Some("1"));
		assert_eq!(req.parameters("q"), ["1", "2"]);
		assert_eq!(req.parameter("x"), Some("a b"));
		assert!(req.keep_alive());
	}

	#[test]
	fn closed_before_request() {
		assert!(parse(b"").unwrap().is_none());
	}

	#[test]
	fn unknown_method() {
		let err = parse(b"BREW / HTTP/1.1\r\n\r\n").unwrap_err();
		assert_eq!(err.status(), Some(Status::NotImplemented));
	}

	#[test]
	fn uri_too_long() {
		let mut raw = b"GET /".to_vec();
		raw.extend(std::iter::repeat(b'a').take(3000));
		raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");

		let err = parse(&raw).unwrap_err();
		assert_eq!(err.status(), Some(Status::UriTooLong));
	}

	#[test]
	fn unsupported_version() {
		let err = parse(b"GET / HTTP/2.0\r\n\r\n").unwrap_err();
		assert_eq!(err.status(), Some(Status::HttpVersionNotSupported));
	}

	#[test]
	fn header_continuation() {
		let req = parse(b"GET / HTTP/1.1\r\nX-Long: first\r\n  second\r\nHost: h\r\n\r\n")
			.unwrap().unwrap();

		assert_eq!(req.header("X-Long"), Some("first second"));
		assert_eq!(req.header("Host"), Some("h"));
	}

	#[test]
	fn duplicate_headers() {
		let err = parse(b"GET / HTTP/1.1\r\nHost: a\r\nHost: b\r\n\r\n").unwrap_err();
		assert_eq!(err.status(), Some(Status::BadRequest));

		let req = parse(b"GET / HTTP/1.1\r\nAccept: text/html\r\nAccept: text/plain\r\n\r\n")
			.unwrap().unwrap();
		assert_eq!(req.header("Accept"), Some("text/html, text/plain"));
	}

	#[test]
	fn post_body() {
		let req = parse(b"POST /submit HTTP/1.1\r\nContent-Length: 9\r\n\
			Content-Type: application/x-www-form-urlencoded\r\n\r\nuser=bob%"
		).unwrap().unwrap();

		assert_eq!(req.body(), b"user=bob%");
		assert_eq!(req.parameter("user"), Some("bob%"));
	}

	#[test]
	fn post_over_limit() {
		let mut raw = b"POST / HTTP/1.1\r\nContent-Length: 1048577\r\n\r\n".to_vec();
		raw.extend(std::iter::repeat(b'x').take(1024));

		let err = parse(&raw).unwrap_err();
		assert_eq!(err.status(), Some(Status::PayloadTooLarge));
	}

	#[test]
	fn chunked_body() {
		let req = parse(b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n\
			4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n"
		).unwrap().unwrap();

		assert_eq!(req.body(), b"Wikipedia");
	}

	#[test]
	fn cookies() {
		let req = parse(b"GET / HTTP/1.1\r\nCookie: sid=abc; lang=no\r\n\r\n")
			.unwrap().unwrap();

		assert_eq!(req.cookies().len(), 2);
		assert_eq!(req.cookies()[0].name, "sid");
		assert_eq!(req.cookies()[1].value, "no");
	}

	#[test]
	fn connection_close_disables_keep_alive() {
		let req = parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n").unwrap().unwrap();
		assert!(!req.keep_alive());

		let req = parse(b"GET / HTTP/1.0\r\n\r\n").unwrap().unwrap();
		assert!(!req.keep_alive());

		let req = parse(b"GET / HTTP/1.0\r\nConnection: keep-alive\r\n\r\n").unwrap().unwrap();
		assert!(req.keep_alive());
	}

	#[test]
	fn percent_decoding() {
		assert_eq!(url_decode("a%20b+c"), "a b c");
		assert_eq!(url_decode("%2Fpath%2f"), "/path/");
		assert_eq!(url_decode("100%"), "100%");
		assert_eq!(url_decode("%zz"), "%zz");
	}
}
