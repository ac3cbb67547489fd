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

use {serde::Deserialize, std::{fmt, path::PathBuf}};

/// The transport a server listens on. Immutable once the server started.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
	Tcp,
	Tls
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
	/// PEM file with the certificate chain, leaf first.
	pub cert_chain:  PathBuf,
	/// PEM file with the private key (PKCS#8 or RSA).
	pub private_key: PathBuf,
	/// OpenSSL-style `:`-separated cipher suite names, passed through to
	/// the backend.
	#[serde(default)]
	pub ciphers:     Option<String>,
	/// Directory of PEM certificates; when set, clients must present a
	/// certificate signed by one of them.
	#[serde(default)]
	pub ca_dir:      Option<PathBuf>
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Endpoint {
	pub transport: Transport,
	pub host:      String,
	pub port:      u16,
	#[serde(default)]
	pub tls:       Option<TlsConfig>
}

impl Endpoint {
	pub fn tcp(host: impl Into<String>, port: u16) -> Self {
		Self { transport: Transport::Tcp, host: host.into(), port, tls: None }
	}

	pub fn tls(host: impl Into<String>, port: u16, tls: TlsConfig) -> Self {
		Self { transport: Transport::Tls, host: host.into(), port, tls: Some(tls) }
	}
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}:{}", self.host, self.port)
	}
}
