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

//! Hyper Text Transfer Protocol, server side.
//!
//! [RFC 2616](https://datatracker.ietf.org/doc/html/rfc2616/)

pub mod headers;
pub mod cookie;
pub mod request;
pub mod response;

pub use {headers::HeaderMap, cookie::Cookie, request::Request, response::Response};

use std::{fmt::{self, Display, Formatter}, str::FromStr};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Method {
	Options,
	Get,
	Head,
	Post,
	Put,
	Delete,
	Trace,
	Connect
}

impl Method {
	/// Whether requests with this method may carry a body.
	pub fn has_body(self) -> bool {
		matches!(self, Self::Post | Self::Put)
	}
}

impl FromStr for Method {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s {
			"OPTIONS" => Self::Options,
			"GET"     => Self::Get,
			"HEAD"    => Self::Head,
			"POST"    => Self::Post,
			"PUT"     => Self::Put,
			"DELETE"  => Self::Delete,
			"TRACE"   => Self::Trace,
			"CONNECT" => Self::Connect,
			_         => return Err(())
		})
	}
}

impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.write_str(match self {
			Self::Options => "OPTIONS",
			Self::Get     => "GET",
			Self::Head    => "HEAD",
			Self::Post    => "POST",
			Self::Put     => "PUT",
			Self::Delete  => "DELETE",
			Self::Trace   => "TRACE",
			Self::Connect => "CONNECT"
		})
	}
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Version {
	Http10,
	Http11
}

impl FromStr for Version {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(match s {
			"HTTP/1.0" => Self::Http10,
			"HTTP/1.1" => Self::Http11,
			_          => return Err(())
		})
	}
}

impl Display for Version {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		f.write_str(match self {
			Self::Http10 => "HTTP/1.0",
			Self::Http11 => "HTTP/1.1"
		})
	}
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum Status {
	Continue                   = 100,
	SwitchingProtocols         = 101,
	Ok                         = 200,
	Created                    = 201,
	Accepted                   = 202,
	NoContent                  = 204,
	ResetContent               = 205,
	PartialContent             = 206,
	MultipleChoices            = 300,
	MovedPermanently           = 301,
	Found                      = 302,
	SeeOther                   = 303,
	NotModified                = 304,
	UseProxy                   = 305,
	TemporaryRedirect          = 307,
	BadRequest                 = 400,
	Unauthorized               = 401,
	PaymentRequired            = 402,
	Forbidden                  = 403,
	NotFound                   = 404,
	MethodNotAllowed           = 405,
	NotAcceptable              = 406,
	ProxyAuthenticationRequired = 407,
	RequestTimeout             = 408,
	Conflict                   = 409,
	Gone                       = 410,
	LengthRequired             = 411,
	PreconditionFailed         = 412,
	PayloadTooLarge            = 413,
	UriTooLong                 = 414,
	UnsupportedMediaType       = 415,
	RangeNotSatisfiable        = 416,
	ExpectationFailed          = 417,
	InternalServerError        = 500,
	NotImplemented             = 501,
	BadGateway                 = 502,
	ServiceUnavailable         = 503,
	GatewayTimeout             = 504,
	HttpVersionNotSupported    = 505
}

impl Status {
	pub fn code(self) -> u16 {
		self as u16
	}

	pub fn is_success(self) -> bool {
		(200..300).contains(&(self as u16))
	}

	pub fn is_error(self) -> bool {
		self as u16 >= 400
	}

	pub fn reason(self) -> &'static str {
		match self {
			Self::Continue                    => "Continue",
			Self::SwitchingProtocols          => "Switching Protocols",
			Self::Ok                          => "OK",
			Self::Created                     => "Created",
			Self::Accepted                    => "Accepted",
			Self::NoContent                   => "No Content",
			Self::ResetContent                => "Reset Content",
			Self::PartialContent              => "Partial Content",
			Self::MultipleChoices             => "Multiple Choices",
			Self::MovedPermanently            => "Moved Permanently",
			Self::Found                       => "Found",
			Self::SeeOther                    => "See Other",
			Self::NotModified                 => "Not Modified",
			Self::UseProxy                    => "Use Proxy",
			Self::TemporaryRedirect           => "Temporary Redirect",
			Self::BadRequest                  => "Bad Request",
			Self::Unauthorized                => "Unauthorized",
			Self::PaymentRequired             => "Payment Required",
			Self::Forbidden                   => "Forbidden",
			Self::NotFound                    => "Not Found",
			Self::MethodNotAllowed            => "Method Not Allowed",
			Self::NotAcceptable               => "Not Acceptable",
			Self::ProxyAuthenticationRequired => "Proxy Authentication Required",
			Self::RequestTimeout              => "Request Timeout",
			Self::Conflict                    => "Conflict",
			Self::Gone                        => "Gone",
			Self::LengthRequired              => "Length Required",
			Self::PreconditionFailed          => "Precondition Failed",
			Self::PayloadTooLarge             => "Payload Too Large",
			Self::UriTooLong                  => "URI Too Long",
			Self::UnsupportedMediaType        => "Unsupported Media Type",
			Self::RangeNotSatisfiable         => "Range Not Satisfiable",
			Self::ExpectationFailed           => "Expectation Failed",
			Self::InternalServerError         => "Internal Server Error",
			Self::NotImplemented              => "Not Implemented",
			Self::BadGateway                  => "Bad Gateway",
			Self::ServiceUnavailable          => "Service Unavailable",
			Self::GatewayTimeout              => "Gateway Timeout",
			Self::HttpVersionNotSupported     => "HTTP Version Not Supported"
		}
	}
}

impl TryFrom<usize> for Status {
	type Error = ();

	fn try_from(value: usize) -> Result<Self, Self::Error> {
		Ok(match value {
			100 => Self::Continue,
			101 => Self::SwitchingProtocols,
			200 => Self::Ok,
			201 => Self::Created,
			202 => Self::Accepted,
			204 => Self::NoContent,
			205 => Self::ResetContent,
			206 => Self::PartialContent,
			300 => Self::MultipleChoices,
			301 => Self::MovedPermanently,
			302 => Self::Found,
			303 => Self::SeeOther,
			304 => Self::NotModified,
			305 => Self::UseProxy,
			307 => Self::TemporaryRedirect,
			400 => Self::BadRequest,
			401 => Self::Unauthorized,
			402 => Self::PaymentRequired,
			403 => Self::Forbidden,
			404 => Self::NotFound,
			405 => Self::MethodNotAllowed,
			406 => Self::NotAcceptable,
			407 => Self::ProxyAuthenticationRequired,
			408 => Self::RequestTimeout,
			409 => Self::Conflict,
			410 => Self::Gone,
			411 => Self::LengthRequired,
			412 => Self::PreconditionFailed,
			413 => Self::PayloadTooLarge,
			414 => Self::UriTooLong,
			415 => Self::UnsupportedMediaType,
			416 => Self::RangeNotSatisfiable,
			417 => Self::ExpectationFailed,
			500 => Self::InternalServerError,
			501 => Self::NotImplemented,
			502 => Self::BadGateway,
			503 => Self::ServiceUnavailable,
			504 => Self::GatewayTimeout,
			505 => Self::HttpVersionNotSupported,
			_   => return Err(())
		})
	}
}

impl Display for Status {
	fn fmt(&self, f: &mut Formatter) -> fmt::Result {
		write!(f, "{} {}", *self as u16, self.reason())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn methods() {
		assert_eq!("GET".parse(), Ok(Method::Get));
		assert_eq!("get".parse::<Method>(), Err(()));
		assert_eq!("BREW".parse::<Method>(), Err(()));
		assert_eq!(Method::Delete.to_string(), "DELETE");
		assert!(Method::Post.has_body());
		assert!(!Method::Get.has_body());
	}

	#[test]
	fn versions() {
		assert_eq!("HTTP/1.1".parse(), Ok(Version::Http11));
		assert_eq!("HTTP/2.0".parse::<Version>(), Err(()));
		assert!(Version::Http10 < Version::Http11);
	}

	#[test]
	fn statuses() {
		assert_eq!(Status::try_from(404), Ok(Status::NotFound));
		assert_eq!(Status::try_from(666), Err(()));
		assert_eq!(Status::NotFound.to_string(), "404 Not Found");
		assert!(Status::Ok.is_success());
		assert!(!Status::Found.is_success());
		assert!(Status::PayloadTooLarge.is_error());
	}
}
