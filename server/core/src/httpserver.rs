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

//! The HTTP server: wires the TCP server, page registry and file cache
//! together behind one configuration surface.
//!
//! Per connection the service loop reads a request, resolves it against
//! the registry (exact match, then the document root if file reading is
//! on, then longest prefix), validates authorization, invokes the page,
//! emits the response, and recycles the connection while keep-alive
//! allows.

use {
	crate::{
		cache::{Cache, Entry},
		connection::Connection,
		endpoint::Endpoint,
		error::Result,
		http::{
			request::{self, Limits, Request},
			response::{self, Response},
			Method, Status
		},
		pages::{Attributes, Handler, Page, PageKind, Registry},
		process::ShutdownFlag,
		server::{self, TcpServer}
	},
	std::{
		collections::HashMap,
		fs,
		path::{Component, Path, PathBuf},
		sync::{
			atomic::{AtomicUsize, Ordering},
			Arc, Mutex
		}
	}
};

#[derive(Clone)]
pub struct Config {
	pub endpoint:           Endpoint,
	/// Zero means one worker per CPU.
	pub workers:            usize,
	pub queue_size:         usize,
	pub block_when_full:    bool,
	pub readbuf_size:       usize,
	pub writebuf_size:      usize,
	pub timeout_read:       u32,
	pub timeout_write:      u32,
	pub retries_read:       u32,
	pub retries_write:      u32,
	pub post_limit:         usize,
	pub max_uri:            usize,
	pub max_pages:          usize,
	/// Serve files below the document root that no page claims.
	pub can_read_files:     bool,
	pub document_root:      Option<PathBuf>,
	/// Idle deadline between keep-alive requests, milliseconds.
	pub keepalive_timeout:  u32,
	/// Requests served per connection before it closes.
	pub keepalive_requests: usize,
	pub cache_budget:       usize,
	pub cache_hotlist:      usize,
	pub server_header:      String
}

impl Default for Config {
	fn default() -> Self {
		Self {
			endpoint:           Endpoint::tcp("0.0.0.0", 2000),
			workers:            0,
			queue_size:         64,
			block_when_full:    true,
			readbuf_size:       0x2000,
			writebuf_size:      0x2000,
			timeout_read:       15_000,
			timeout_write:      15_000,
			retries_read:       3,
			retries_write:      3,
			post_limit:         0x100000,
			max_uri:            2048,
			max_pages:          256,
			can_read_files:     false,
			document_root:      None,
			keepalive_timeout:  15_000,
			keepalive_requests: 100,
			cache_budget:       8 << 20,
			cache_hotlist:      16,
			server_header:      concat!("talos/", env!("CARGO_PKG_VERSION")).to_string()
		}
	}
}

pub type AuthCheck = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

pub struct HttpServer {
	cfg:      Config,
	registry: Registry,
	/// Files registered with `add_file`, loaded eagerly at build time.
	files:    Vec<(usize, PathBuf)>,
	next_id:  usize,
	auth:     Option<AuthCheck>
}

impl HttpServer {
	pub fn new(cfg: Config) -> Self {
		let registry = Registry::new(cfg.max_pages);
		Self { cfg, registry, files: Vec::new(), next_id: 0, auth: None }
	}

	pub fn config(&self) -> &Config {
		&self.cfg
	}

	/// Registers a dynamic page.
	pub fn add_page(
		&mut self,
		uri:     impl Into<String>,
		handler: Handler,
		attrs:   Option<Attributes>
	) -> Result<()> {
		self.registry.add(Page {
			uri:   uri.into(),
			kind:  PageKind::Dynamic(handler),
			attrs: attrs.unwrap_or_default()
		})
	}

	/// Registers a static asset served from the file cache. The file
	/// loads when the server is built.
	pub fn add_file(
		&mut self,
		uri:   impl Into<String>,
		path:  impl Into<PathBuf>,
		attrs: Option<Attributes>
	) -> Result<()> {
		let id = self.next_id;
		self.next_id += 1;

		self.registry.add(Page {
			uri:   uri.into(),
			kind:  PageKind::Static(id),
			attrs: attrs.unwrap_or_default()
		})?;

		self.files.push((id, path.into()));
		Ok(())
	}

	/// Credentials predicate for pages that declare an authorization
	/// realm. Without one, any well-formed credentials pass.
	pub fn set_auth_check(&mut self, check: AuthCheck) {
		self.auth = Some(check);
	}

	/// Loads the registered files into the cache and produces the
	/// runnable TCP server.
	pub fn build(self) -> Result<TcpServer> {
		let cache = Cache::new(self.cfg.cache_budget, self.cfg.cache_hotlist);

		for (id, path) in &self.files {
			let data = fs::read(path)
				.map_err(|e| crate::error::Error::from(e)
					.with_message(format!("loading {}", path.display())))?;
			let modified = fs::metadata(path).ok().and_then(|m| m.modified().ok());

			// registered assets are pinned, they must not fall out under
			// document-root traffic
			cache.add_file(*id, data, mime_type(path), path.clone(), modified, true)?;
			log::info!("http: loaded {} as asset {}", path.display(), id);
		}

		let server_cfg = server::Config {
			endpoint:        self.cfg.endpoint.clone(),
			workers:         self.cfg.workers,
			queue_size:      self.cfg.queue_size,
			block_when_full: self.cfg.block_when_full,
			readbuf_size:    self.cfg.readbuf_size,
			writebuf_size:   self.cfg.writebuf_size,
			timeout_read:    self.cfg.timeout_read,
			timeout_write:   self.cfg.timeout_write,
			retries_read:    self.cfg.retries_read,
			retries_write:   self.cfg.retries_write
		};

		let core = Arc::new(Core {
			cfg:      self.cfg,
			registry: self.registry,
			cache,
			auth:     self.auth,
			file_ids: Mutex::new(HashMap::new()),
			next_id:  AtomicUsize::new(self.next_id)
		});

		let service: server::Service = Arc::new(move |conn, flag| core.serve(conn, flag));
		Ok(TcpServer::new(server_cfg, service))
	}
}

struct Core {
	cfg:      Config,
	registry: Registry,
	cache:    Cache,
	auth:     Option<AuthCheck>,
	/// Document-root paths already mapped to cache ids.
	file_ids: Mutex<HashMap<String, usize>>,
	next_id:  AtomicUsize
}

impl Core {
	fn serve(&self, mut conn: Connection, flag: &ShutdownFlag) -> Result<()> {
		let limits = Limits { max_uri: self.cfg.max_uri, post_limit: self.cfg.post_limit };

		for served in 0..self.cfg.keepalive_requests {
			if flag.is_set() {
				break;
			}

			if served > 0 && !conn.wait_for_data(self.cfg.keepalive_timeout)? {
				break;
			}

			let request = match request::read_request(&mut conn, &limits) {
				Ok(Some(request)) => request,
				Ok(None)          => break,
				Err(e)            => {
					// framing is suspect after a parse failure, answer and
					// close
					if let Some(status) = e.status() {
						conn.set_persistent(false);
						let _ = self.send_error(&mut conn, status);
					} else if e.is_timeout() {
						conn.set_persistent(false);
						let _ = self.send_error(&mut conn, Status::RequestTimeout);
					}

					break;
				}
			};

			let keep = request.keep_alive() && served + 1 < self.cfg.keepalive_requests;
			conn.set_persistent(keep);
			self.dispatch(&request, &mut conn)?;

			if !conn.is_persistent() {
				break;
			}

			conn.recycle();
		}

		conn.close()
	}

	fn send_error(&self, conn: &mut Connection, status: Status) -> Result<()> {
		let mut resp = Response::new();
		resp.set_status(status);
		resp.set_header("Server", &self.cfg.server_header);
		resp.set_header("Content-Type", "text/html");
		resp.add_str(&response::error_body(status));
		resp.send(conn, false)
	}

	fn dispatch(&self, request: &Request, conn: &mut Connection) -> Result<()> {
		let mut resp = Response::with_version(request.version());
		let status   = self.route(request, &mut resp);

		// handlers may decline to produce an error document
		if status.is_error() && !resp.has_body() {
			resp.set_header("Content-Type", "text/html");
			resp.add_str(&response::error_body(status));
		}

		resp.set_status(status);
		resp.set_header("Server", &self.cfg.server_header);

		log::debug!("http: {} {} -> {}", request.method(), request.path(), status);
		resp.send(conn, request.method() == Method::Head)
	}

	fn route(&self, request: &Request, resp: &mut Response) -> Status {
		let path = request.path();

		if let Some(page) = self.registry.find_exact(path) {
			return self.invoke(page, request, resp);
		}

		if self.cfg.can_read_files {
			if let Some(entry) = self.lookup_file(path) {
				return serve_entry(&entry, resp);
			}
		}

		if let Some(page) = self.registry.find_prefix(path) {
			return self.invoke(page, request, resp);
		}

		Status::NotFound
	}

	fn invoke(&self, page: &Page, request: &Request, resp: &mut Response) -> Status {
		if let Some(realm) = &page.attrs.authorization {
			if !self.authorized(request) {
				resp.set_header("WWW-Authenticate", format!("Basic realm=\"{}\"", realm));
				return Status::Unauthorized;
			}
		}

		apply_attributes(&page.attrs, resp);

		match &page.kind {
			PageKind::Dynamic(handler) => handler(request, resp),
			PageKind::Static(id)       => match self.cache.get(*id) {
				Some(entry) => serve_entry(&entry, resp),
				None        => Status::NotFound
			}
		}
	}

	fn authorized(&self, request: &Request) -> bool {
		let credentials = match request.header("Authorization")
			.and_then(|v| v.strip_prefix("Basic "))
			.and_then(|v| base64::decode(v.trim()).ok())
			.and_then(|v| String::from_utf8(v).ok())
		{
			Some(v) => v,
			None    => return false
		};

		let (user, pass) = match credentials.split_once(':') {
			Some(v) => v,
			None    => return false
		};

		match &self.auth {
			Some(check) => check(user, pass),
			None        => true
		}
	}

	/// Resolves a request path below the document root, caching loaded
	/// files. Cache hits never touch the filesystem.
	fn lookup_file(&self, path: &str) -> Option<Arc<Entry>> {
		if let Some(&id) = self.file_ids.lock().expect("file id mutex poisoned").get(path) {
			return self.cache.get(id);
		}

		let root = self.cfg.document_root.as_ref()?;
		let rel  = path.trim_start_matches('/');
		let rel  = if rel.is_empty() { "index.html" } else { rel };
		let rel  = Path::new(rel);

		// the document root is a boundary, not a suggestion
		if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
			log::warn!("http: rejected path {}", path);
			return None;
		}

		let full = root.join(rel);
		let data = fs::read(&full).ok()?;
		let modified = fs::metadata(&full).ok().and_then(|m| m.modified().ok());
		let id = self.next_id.fetch_add(1, Ordering::SeqCst);

		match self.cache.add_file(id, data, mime_type(&full), full, modified, false) {
			Ok(())  => {
				self.file_ids.lock().expect("file id mutex poisoned").insert(path.to_string(), id);
				self.cache.get(id)
			}
			// too big for the cache, serve this one uncached
			Err(_) => {
				let data = fs::read(root.join(rel)).ok()?;
				Some(Arc::new(Entry::new(id, 0, data, Some(mime_type(rel).to_string()), None, modified, false)))
			}
		}
	}
}

fn serve_entry(entry: &Arc<Entry>, resp: &mut Response) -> Status {
	if resp.header("Content-Type").is_none() {
		if let Some(mime) = entry.mime() {
			resp.set_header("Content-Type", mime);
		}
	}

	if let Some(modified) = entry.modified() {
		let modified = chrono::DateTime::<chrono::Utc>::from(modified);
		resp.set_header("Last-Modified", modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string());
	}

	resp.set_body_cached(entry.clone());
	Status::Ok
}

fn apply_attributes(attrs: &Attributes, resp: &mut Response) {
	if let Some(media_type) = &attrs.media_type {
		match &attrs.charset {
			Some(charset) => resp.set_header("Content-Type", format!("{}; charset={}", media_type, charset)),
			None          => resp.set_header("Content-Type", media_type.clone())
		}
	}

	if let Some(language) = &attrs.language {
		resp.set_header("Content-Language", language.clone());
	}

	if let Some(encoding) = &attrs.encoding {
		resp.set_header("Content-Encoding", encoding.clone());
	}
}

pub fn mime_type(path: &Path) -> &'static str {
	match path.extension().and_then(|e| e.to_str()).unwrap_or("") {
		"html" | "htm" => "text/html",
		"css"          => "text/css",
		"txt"          => "text/plain",
		"xml"          => "text/xml",
		"js"           => "application/javascript",
		"json"         => "application/json",
		"pdf"          => "application/pdf",
		"gz"           => "application/gzip",
		"gif"          => "image/gif",
		"png"          => "image/png",
		"jpg" | "jpeg" => "image/jpeg",
		"svg"          => "image/svg+xml",
		"ico"          => "image/x-icon",
		_              => "application/octet-stream"
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn mime_types() {
		assert_eq!(mime_type(Path::new("logo.gif")), "image/gif");
		assert_eq!(mime_type(Path::new("a/b/index.html")), "text/html");
		assert_eq!(mime_type(Path::new("data.bin")), "application/octet-stream");
		assert_eq!(mime_type(Path::new("noext")), "application/octet-stream");
	}

	#[test]
	fn attributes_become_headers() {
		let attrs = Attributes {
			media_type: Some("text/html".to_string()),
			charset:    Some("utf-8".to_string()),
			language:   Some("no".to_string()),
			encoding:   None,
			authorization: None
		};

		let mut resp = Response::new();
		apply_attributes(&attrs, &mut resp);
		assert_eq!(resp.header("Content-Type"), Some("text/html; charset=utf-8"));
		assert_eq!(resp.header("Content-Language"), Some("no"));
		assert_eq!(resp.header("Content-Encoding"), None);
	}
}
