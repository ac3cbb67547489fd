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

//! Simple page-serving httpd.

#![warn(clippy::all)]

extern crate talos_server as srv;

use {
	serde::Deserialize,
	srv::{httpserver::{Config, HttpServer}, process::Process},
	std::{path::PathBuf, str::FromStr}
};

const ENV_LOG_LEVEL: &str = "TALOS_LOG_LEVEL";

const HELP: &str = r#"
Usage: httpd [options...]

Options:
 -h, --help
 -p, --port <port>
 -r, --root <document root>
 -c, --config <config file>

Environment Variables:
 TALOS_LOG_LEVEL
"#;

#[derive(Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
	endpoint:          Option<srv::Endpoint>,
	document_root:     Option<PathBuf>,
	workers:           Option<usize>,
	queue_size:        Option<usize>,
	post_limit:        Option<usize>,
	keepalive_timeout: Option<u32>,
	cache_budget:      Option<usize>,
	/// Applied only when started as the superuser.
	user:              Option<String>,
	/// Applied only when started as the superuser.
	rootdir:           Option<PathBuf>
}

fn main() {
	stdout_log::init(log::LevelFilter::Info);

	if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
		match log::LevelFilter::from_str(&level) {
			Ok(v)  => log::set_max_level(v),
			Err(_) => log::error!("init: invalid log level (from env var `{}`): {}", ENV_LOG_LEVEL, level)
		}
	}

	let mut args        = std::env::args().skip(1);
	let mut port        = None;
	let mut docroot     = None;
	let mut config_path = None;

	while let Some(arg) = args.next() {
		match arg.as_str() {
			"-h" | "--help" => {
				println!("{}", HELP);
				std::process::exit(0);
			}
			"-p" | "--port" => port = Some(match args.next().map(|v| v.parse::<u32>()) {
				Some(Ok(v)) if (1..=65535).contains(&v) => v as u16,
				Some(_) => {
					log::error!("init: port number out of range");
					std::process::exit(1);
				}
				None => {
					log::error!("init: expected port after `{}`", arg);
					std::process::exit(1);
				}
			}),
			"-r" | "--root" => docroot = Some(PathBuf::from(match args.next() {
				Some(v) => v,
				None    => {
					log::error!("init: expected path after `{}`", arg);
					std::process::exit(1);
				}
			})),
			"-c" | "--config" => config_path = Some(match args.next() {
				Some(v) => v,
				None    => {
					log::error!("init: expected path after `{}`", arg);
					std::process::exit(1);
				}
			}),
			v => {
				log::error!("init: invalid argument: `{}`", v);
				println!("{}", HELP);
				std::process::exit(1);
			}
		}
	}

	let file = match &config_path {
		None       => FileConfig::default(),
		Some(path) => {
			let text = match std::fs::read_to_string(path) {
				Ok(v)  => v,
				Err(e) => {
					log::error!("init: failed to read `{}`: {}", path, e);
					std::process::exit(1);
				}
			};

			match toml::from_str(&text) {
				Ok(v)  => v,
				Err(e) => {
					log::error!("init: failed to parse `{}`: {}", path, e);
					std::process::exit(1);
				}
			}
		}
	};

	let mut cfg = Config {
		can_read_files: true,
		..Config::default()
	};

	if let Some(endpoint) = file.endpoint {
		cfg.endpoint = endpoint;
	}

	if let Some(port) = port {
		cfg.endpoint.port = port;
	}

	cfg.document_root = docroot.or(file.document_root).or_else(|| Some(PathBuf::from(".")));

	if let Some(v) = file.workers           { cfg.workers           = v; }
	if let Some(v) = file.queue_size        { cfg.queue_size        = v; }
	if let Some(v) = file.post_limit        { cfg.post_limit        = v; }
	if let Some(v) = file.keepalive_timeout { cfg.keepalive_timeout = v; }
	if let Some(v) = file.cache_budget      { cfg.cache_budget      = v; }

	log::info!("init: serving {} on {}",
		cfg.document_root.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
		cfg.endpoint);

	let server = match HttpServer::new(cfg).build() {
		Ok(v)  => v,
		Err(e) => {
			log::error!("init: {}", e);
			std::process::exit(1);
		}
	};

	let mut process = Process::new("httpd");

	// confinement is only meaningful, and only possible, as the superuser
	if nix::unistd::geteuid().is_root() {
		if let Some(rootdir) = file.rootdir {
			process.set_rootdir(rootdir);
		}

		if let Some(user) = file.user {
			process.set_username(user);
		}
	}

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
