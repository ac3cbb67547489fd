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

//! Cookies, version 0 (Netscape) and version 1 (RFC 2109).

use std::fmt::{self, Display, Formatter};

/// Max-Age was never set and the attribute is omitted on the wire.
pub const MAX_AGE_NOT_SET: i64 = -1;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cookie {
	pub name:    String,
	pub value:   String,
	pub comment: Option<String>,
	pub domain:  Option<String>,
	pub path:    Option<String>,
	pub max_age: i64,
	pub version: u32,
	pub secure:  bool
}

impl Cookie {
	pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			name:    name.into(),
			value:   value.into(),
			comment: None,
			domain:  None,
			path:    None,
			max_age: MAX_AGE_NOT_SET,
			version: 0,
			secure:  false
		}
	}

	/// Parses a `Set-Cookie`-shaped string, the inverse of [`Display`].
	pub fn parse(s: &str) -> Option<Self> {
		let mut parts = s.split(';').map(str::trim);
		let (name, value) = parts.next()?.split_once('=')?;

		if name.is_empty() {
			return None;
		}

		let mut cookie = Self::new(name.trim(), value.trim());

		for part in parts {
			match part.split_once('=').map(|(k, v)| (k.trim(), v.trim())) {
				Some((k, v)) if k.eq_ignore_ascii_case("comment") => cookie.comment = Some(v.to_string()),
				Some((k, v)) if k.eq_ignore_ascii_case("domain")  => cookie.domain  = Some(v.to_string()),
				Some((k, v)) if k.eq_ignore_ascii_case("path")    => cookie.path    = Some(v.to_string()),
				Some((k, v)) if k.eq_ignore_ascii_case("max-age") => cookie.max_age = v.parse().ok()?,
				Some((k, v)) if k.eq_ignore_ascii_case("version") => cookie.version = v.parse().ok()?,
				None         if part.eq_ignore_ascii_case("secure") => cookie.secure = true,
				_ => ()
			}
		}

		Some(cookie)
	}

	/// Parses the value of a request `Cookie` header into ordered records.
	/// A leading `$Version` applies to every cookie, `$Path`/`$Domain`
	/// refine the preceding one.
	pub fn parse_request_header(s: &str) -> Vec<Self> {
		let mut cookies = Vec::<Self>::new();
		let mut version = 0;

		for part in s.split(&[';', ','][..]).map(str::trim).filter(|s| !s.is_empty()) {
			let (name, value) = match part.split_once('=') {
				Some((k, v)) => (k.trim(), v.trim().trim_matches('"')),
				None         => continue
			};

			match name {
				"$Version" => version = value.parse().unwrap_or(0),
				"$Path"    => if let Some(c) = cookies.last_mut() { c.path = Some(value.to_string()) },
				"$Domain"  => if let Some(c) = cookies.last_mut() { c.domain = Some(value.to_string()) },
				_ => {
					let mut cookie = Self::new(name, value);
					cookie.version = version;
					cookies.push(cookie);
				}
			}
		}

		cookies
	}
}

impl Display for Cookie {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "{}={}", self.name, self.value)?;

		if let Some(v) = &self.comment {
			write!(f, "; Comment={}", v)?;
		}

		if let Some(v) = &self.domain {
			write!(f, "; Domain={}", v)?;
		}

		if let Some(v) = &self.path {
			write!(f, "; Path={}", v)?;
		}

		if self.max_age != MAX_AGE_NOT_SET {
			write!(f, "; Max-Age={}", self.max_age)?;
		}

		if self.version != 0 {
			write!(f, "; Version={}", self.version)?;
		}

		if self.secure {
			write!(f, "; Secure")?;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn roundtrip() {
		let cookies = [
			Cookie::new("sid", "abc123"),
			Cookie {
				comment: Some("state".to_string()),
				domain:  Some(".example.org".to_string()),
				path:    Some("/app".to_string()),
				max_age: 3600,
				version: 1,
				secure:  true,
				..Cookie::new("sid", "abc123")
			},
			Cookie { max_age: 0, ..Cookie::new("expired", "") },
		];

		for cookie in cookies {
			assert_eq!(Cookie::parse(&cookie.to_string()).unwrap(), cookie);
		}
	}

	#[test]
	fn unset_max_age_is_omitted() {
		let cookie = Cookie::new("a", "b");
		assert!(!cookie.to_string().contains("Max-Age"));
	}

	#[test]
	fn parse_rejects_nameless() {
		assert_eq!(Cookie::parse("=x"), None);
		assert_eq!(Cookie::parse("junk"), None);
	}

	#[test]
	fn request_header() {
		let cookies = Cookie::parse_request_header(
			"$Version=1; sid=\"abc\"; $Path=/app; lang=no");

		assert_eq!(cookies.len(), 2);
		assert_eq!(cookies[0].name, "sid");
		assert_eq!(cookies[0].value, "abc");
		assert_eq!(cookies[0].version, 1);
		assert_eq!(cookies[0].path.as_deref(), Some("/app"));
		assert_eq!(cookies[1].name, "lang");
		assert_eq!(cookies[1].value, "no");
	}
}
