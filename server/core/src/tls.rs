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

//! Glue towards the TLS backend: PEM loading, cipher suite selection and
//! `ServerConfig` assembly. Protocol details beyond that are the
//! backend's concern.

use {
	crate::{endpoint::TlsConfig, error::{Error, Result}},
	std::{fs, io::BufReader, path::Path, sync::Arc},
	rustls::{Certificate, PrivateKey, RootCertStore, ServerConfig, SupportedCipherSuite}
};

pub fn server_config(cfg: &TlsConfig) -> Result<Arc<ServerConfig>> {
	let certs = load_certs(&cfg.cert_chain)?;
	let key   = load_key(&cfg.private_key)?;

	let builder = match &cfg.ciphers {
		None       => ServerConfig::builder().with_safe_defaults(),
		Some(list) => ServerConfig::builder()
			.with_cipher_suites(&select_cipher_suites(list)?)
			.with_safe_default_kx_groups()
			.with_safe_default_protocol_versions()
			.map_err(|e| Error::other(format!("cipher selection: {}", e)))?
	};

	let builder = match &cfg.ca_dir {
		None      => builder.with_no_client_auth(),
		Some(dir) => builder.with_client_cert_verifier(
			rustls::server::AllowAnyAuthenticatedClient::new(load_ca_dir(dir)?))
	};

	builder.with_single_cert(certs, key)
		.map(Arc::new)
		.map_err(|e| Error::other(format!("invalid certificate/key: {}", e)))
}

fn load_certs(path: &Path) -> Result<Vec<Certificate>> {
	let file  = fs::File::open(path)
		.map_err(|e| Error::from(e).with_message(format!("opening {}", path.display())))?;
	let certs = rustls_pemfile::certs(&mut BufReader::new(file))
		.map_err(|_| Error::other(format!("failed to parse {}", path.display())))?;

	if certs.is_empty() {
		return Err(Error::other(format!("no certificates in {}", path.display())));
	}

	Ok(certs.into_iter().map(Certificate).collect())
}

fn load_key(path: &Path) -> Result<PrivateKey> {
	let file = fs::File::open(path)
		.map_err(|e| Error::from(e).with_message(format!("opening {}", path.display())))?;
	let mut reader = BufReader::new(file);

	for item in std::iter::from_fn(|| rustls_pemfile::read_one(&mut reader).transpose()) {
		match item {
			Ok(rustls_pemfile::Item::PKCS8Key(key) | rustls_pemfile::Item::RSAKey(key)) =>
				return Ok(PrivateKey(key)),
			Ok(_)  => (),
			Err(_) => return Err(Error::other(format!("failed to parse {}", path.display())))
		}
	}

	Err(Error::other(format!("no private key in {}", path.display())))
}

fn load_ca_dir(dir: &Path) -> Result<RootCertStore> {
	let mut roots = RootCertStore::empty();

	for entry in fs::read_dir(dir).map_err(Error::from)? {
		let path = entry.map_err(Error::from)?.path();

		if !path.is_file() {
			continue;
		}

		for cert in load_certs(&path)? {
			roots.add(&cert)
				.map_err(|e| Error::other(format!("invalid CA cert {}: {}", path.display(), e)))?;
		}
	}

	if roots.is_empty() {
		return Err(Error::other(format!("no CA certificates in {}", dir.display())));
	}

	Ok(roots)
}

/// Filters the backend's suite list by the names in an OpenSSL-style
/// `:`-separated string. Unknown names are skipped with a warning, an
/// empty selection is an error.
fn select_cipher_suites(list: &str) -> Result<Vec<SupportedCipherSuite>> {
	let mut suites = Vec::new();

	for name in list.split(':').filter(|s| !s.is_empty()) {
		match rustls::ALL_CIPHER_SUITES.iter()
			.find(|s| format!("{:?}", s.suite()).eq_ignore_ascii_case(name))
		{
			Some(suite) => suites.push(*suite),
			None        => log::warn!("tls: unknown cipher suite `{}`", name)
		}
	}

	if suites.is_empty() {
		return Err(Error::other(format!("no usable cipher suites in `{}`", list)));
	}

	Ok(suites)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cipher_selection() {
		let suites = select_cipher_suites("TLS13_AES_128_GCM_SHA256:NOT_A_SUITE").unwrap();
		assert_eq!(suites.len(), 1);
		assert!(select_cipher_suites("NOT_A_SUITE").is_err());
		assert!(select_cipher_suites("").is_err());
	}

	#[test]
	fn missing_files() {
		let cfg = TlsConfig {
			cert_chain:  "/nonexistent/server.pem".into(),
			private_key: "/nonexistent/server.key".into(),
			ciphers:     None,
			ca_dir:      None
		};

		assert!(server_config(&cfg).is_err());
	}
}
