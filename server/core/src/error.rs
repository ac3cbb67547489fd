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

//! Classed errors.
//!
//! A server mixes several error sources: socket errors, protocol errors
//! caused by a misbehaving peer, statuses returned from application
//! handlers, plain OS errors and whatever external data stores report.
//! Every fallible operation in this crate returns [`Result`], whose error
//! carries the class tag plus an integer code (an `errno` value or an HTTP
//! status code, depending on the class).

use {crate::http::Status, nix::errno::Errno, std::{fmt, io}};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Class {
	/// Socket-level failures, code is an `errno` value.
	Tcpip,
	/// The peer violated the HTTP grammar or a limit, code is an HTTP status.
	Protocol,
	/// A handler reported failure, code is an HTTP status.
	App,
	/// Non-socket system call failures, code is an `errno` value.
	Os,
	/// Surfaced from an external data store, code is opaque.
	Db,
	/// Library-specific conditions (TLS backend and the like).
	Other
}

#[derive(Debug)]
pub struct Error {
	class:   Class,
	code:    i32,
	message: Option<Box<str>>
}

impl Error {
	pub fn new(class: Class, code: i32) -> Self {
		Self { class, code, message: None }
	}

	pub fn tcpip(code: i32) -> Self {
		Self::new(Class::Tcpip, code)
	}

	pub fn os(code: i32) -> Self {
		Self::new(Class::Os, code)
	}

	pub fn db(code: i32) -> Self {
		Self::new(Class::Db, code)
	}

	pub fn other(msg: impl Into<String>) -> Self {
		Self::new(Class::Other, 0).with_message(msg)
	}

	pub fn protocol(status: Status) -> Self {
		Self::new(Class::Protocol, status as i32)
	}

	pub fn app(status: Status) -> Self {
		Self::new(Class::App, status as i32)
	}

	/// The timeout outcome of a socket operation.
	pub fn timeout() -> Self {
		Self::tcpip(Errno::ETIMEDOUT as i32)
	}

	/// The peer closed the connection mid-operation.
	pub fn closed() -> Self {
		Self::tcpip(Errno::EPIPE as i32)
	}

	/// A bounded read or write ran out of room.
	pub fn overflow() -> Self {
		Self::os(Errno::EMSGSIZE as i32)
	}

	pub fn with_message(mut self, msg: impl Into<String>) -> Self {
		self.message = Some(msg.into().into_boxed_str());
		self
	}

	pub fn class(&self) -> Class {
		self.class
	}

	pub fn code(&self) -> i32 {
		self.code
	}

	pub fn is_timeout(&self) -> bool {
		self.class == Class::Tcpip && self.code == Errno::ETIMEDOUT as i32
	}

	pub fn is_closed(&self) -> bool {
		self.class == Class::Tcpip && self.code == Errno::EPIPE as i32
	}

	pub fn is_overflow(&self) -> bool {
		self.class == Class::Os && self.code == Errno::EMSGSIZE as i32
	}

	/// The HTTP status of a protocol or application error.
	pub fn status(&self) -> Option<Status> {
		match self.class {
			Class::Protocol | Class::App => Status::try_from(self.code as usize).ok(),
			_ => None
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self.class {
			Class::Tcpip => write!(f, "tcp/ip error {}: {}", self.code, Errno::from_i32(self.code).desc())?,
			Class::Os    => write!(f, "os error {}: {}", self.code, Errno::from_i32(self.code).desc())?,
			Class::Db    => write!(f, "database error {}", self.code)?,
			Class::Other => write!(f, "error")?,
			Class::Protocol | Class::App => match self.status() {
				Some(status) => write!(f, "http {}", status)?,
				None         => write!(f, "http {}", self.code)?
			}
		}

		match &self.message {
			Some(msg) => write!(f, ": {}", msg),
			None      => Ok(())
		}
	}
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
	fn from(e: io::Error) -> Self {
		match e.raw_os_error() {
			Some(code) => Self::os(code),
			None       => Self::new(Class::Os, 0).with_message(e.to_string())
		}
	}
}

impl From<Errno> for Error {
	fn from(e: Errno) -> Self {
		Self::os(e as i32)
	}
}

/// Maps an `io::Error` from a socket operation into the tcp/ip class.
pub(crate) fn io_tcpip(e: io::Error) -> Error {
	match e.raw_os_error() {
		Some(code) => Error::tcpip(code),
		None       => Error::tcpip(0).with_message(e.to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn outcomes() {
		assert!(Error::timeout().is_timeout());
		assert!(!Error::closed().is_timeout());
		assert!(Error::closed().is_closed());
		assert!(Error::overflow().is_overflow());
	}

	#[test]
	fn status_recovery() {
		assert_eq!(Error::protocol(Status::PayloadTooLarge).status(), Some(Status::PayloadTooLarge));
		assert_eq!(Error::app(Status::NotFound).status(), Some(Status::NotFound));
		assert_eq!(Error::os(2).status(), None);
	}

	#[test]
	fn display() {
		let e = Error::protocol(Status::BadRequest).with_message("duplicate header");
		assert_eq!(e.to_string(), "http 400 Bad Request: duplicate header");
	}
}
