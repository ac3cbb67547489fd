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

//! Hello-world server: TLS by default, `-t` falls back to plain TCP.

#![warn(clippy::all)]

extern crate talos_server as srv;

use srv::{
	http::Status,
	httpserver::{Config, HttpServer},
	process::Process,
	Endpoint, TlsConfig
};

const PORT:       u16  = 2000;
const CERT_CHAIN: &str = "./pki/server/server_chain.pem";
const KEY:        &str = "./pki/server/server.key";

const HELP: &str = "Usage: helloworld [-t] where -t disables TLS (enables plain TCP)";

fn main() {
	stdout_log::init(log::LevelFilter::Info);

	let mut tls = true;

	for arg in std::env::args().skip(1) {
		match arg.as_str() {
			"-t" => tls = false,
			_    => {
				eprintln!("{}", HELP);
				std::process::exit(1);
			}
		}
	}

	let endpoint = if tls {
		Endpoint::tls("0.0.0.0", PORT, TlsConfig {
			cert_chain:  CERT_CHAIN.into(),
			private_key: KEY.into(),
			ciphers:     None,
			ca_dir:      None
		})
	} else {
		Endpoint::tcp("0.0.0.0", PORT)
	};

	let mut http = HttpServer::new(Config { endpoint, ..Config::default() });

	http.add_page("/", Box::new(|_, resp| {
		resp.add_str("<html><head><title>Hello, world</title></head>");
		resp.add_str("<body>Hello, world</body></html>");
		Status::Ok
	}), None).expect("failed to add page");

	let server = match http.build() {
		Ok(v)  => v,
		Err(e) => {
			log::error!("init: {}", e);
			std::process::exit(1);
		}
	};

	let mut process = Process::new("helloworld");
	process.add(Box::new(server));

	if let Err(e) = process.start(false) {
		log::error!("init: {}", e);
		std::process::exit(1);
	}

	match process.wait_for_shutdown() {
		Ok(code) => std::process::exit(code),
		Err(e)   => {
			log::error!("shutdown: {}", e);
			std::process::exit(1);
		}
	}
}
