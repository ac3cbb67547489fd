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

//! Connection-oriented TCP/TLS server.
//!
//! A runnable that binds an endpoint, accepts connections on a dedicated
//! thread and hands each one to the threadpool as a service-function
//! call. Shutdown closes the listener, which wakes the accept thread;
//! `join` then drains the pool.

use {
	crate::{
		connection::Connection,
		endpoint::Endpoint,
		error::{Class, Error, Result},
		pool::Pool,
		process::{Runnable, ShutdownFlag},
		sock::Listener
	},
	nix::errno::Errno,
	std::{
		sync::{
			atomic::{AtomicI32, Ordering},
			Arc
		},
		thread::JoinHandle
	}
};

pub type Service = Arc<dyn Fn(Connection, &ShutdownFlag) -> Result<()> + Send + Sync>;

#[derive(Clone)]
pub struct Config {
	pub endpoint:        Endpoint,
	/// Zero means one worker per CPU.
	pub workers:         usize,
	pub queue_size:      usize,
	pub block_when_full: bool,
	pub readbuf_size:    usize,
	pub writebuf_size:   usize,
	pub timeout_read:    u32,
	pub timeout_write:   u32,
	pub retries_read:    u32,
	pub retries_write:   u32
}

impl Default for Config {
	fn default() -> Self {
		Self {
			endpoint:        Endpoint::tcp("0.0.0.0", 2000),
			workers:         0,
			queue_size:      64,
			block_when_full: true,
			readbuf_size:    0x2000,
			writebuf_size:   0x2000,
			timeout_read:    15_000,
			timeout_write:   15_000,
			retries_read:    3,
			retries_write:   3
		}
	}
}

pub struct TcpServer {
	name:     String,
	cfg:      Config,
	service:  Service,
	listener: Option<Arc<Listener>>,
	pool:     Option<Arc<Pool>>,
	accept:   Option<JoinHandle<()>>,
	exit:     Arc<AtomicI32>
}

impl TcpServer {
	pub fn new(cfg: Config, service: Service) -> Self {
		Self {
			name: cfg.endpoint.to_string(),
			cfg,
			service,
			listener: None,
			pool:     None,
			accept:   None,
			exit:     Arc::new(AtomicI32::new(0))
		}
	}

	/// The bound port, once `setup` ran. Useful with port zero.
	pub fn port(&self) -> Option<u16> {
		self.listener.as_ref().map(|l| l.port())
	}

	pub fn pool(&self) -> Option<&Arc<Pool>> {
		self.pool.as_ref()
	}
}

/// Accept failures that do not kill the listener: aborted connections,
/// interrupts, and per-connection conditions like a failed handshake.
fn transient(e: &Error) -> bool {
	e.class() == Class::Other || matches!(
		Errno::from_i32(e.code()),
		Errno::EINTR | Errno::ECONNABORTED | Errno::EPROTO | Errno::EAGAIN
	)
}

impl Runnable for TcpServer {
	fn name(&self) -> &str {
		&self.name
	}

	fn setup(&mut self) -> Result<()> {
		if self.listener.is_some() {
			return Ok(());
		}

		self.listener = Some(Arc::new(Listener::bind(&self.cfg.endpoint)?));
		self.pool     = Some(Arc::new(Pool::new(self.cfg.workers, self.cfg.queue_size, self.cfg.block_when_full)?));
		Ok(())
	}

	fn rollback(&mut self) -> Result<()> {
		self.listener = None;

		if let Some(pool) = self.pool.take() {
			pool.shutdown(false);
		}

		Ok(())
	}

	fn run(&mut self, shutdown: ShutdownFlag) -> Result<()> {
		let listener = self.listener.clone()
			.ok_or_else(|| Error::other("server was not set up"))?;
		let pool     = self.pool.clone()
			.ok_or_else(|| Error::other("server was not set up"))?;
		let service  = self.service.clone();
		let cfg      = self.cfg.clone();
		let exit     = self.exit.clone();

		self.accept = Some(std::thread::Builder::new()
			.name(format!("accept-{}", self.name))
			.spawn(move || accept_loop(&listener, &pool, &service, &shutdown, &cfg, &exit))
			.map_err(Error::from)?);

		Ok(())
	}

	fn shutdown(&mut self) -> Result<()> {
		if let Some(listener) = &self.listener {
			listener.shutdown();
		}

		Ok(())
	}

	fn join(&mut self) -> i32 {
		if let Some(accept) = self.accept.take() {
			if accept.join().is_err() {
				log::error!("accept: thread for {} exited abnormally", self.name);
				self.exit.store(1, Ordering::SeqCst);
			}
		}

		if let Some(pool) = self.pool.take() {
			pool.shutdown(true);
		}

		self.listener = None;
		self.exit.load(Ordering::SeqCst)
	}
}

fn accept_loop(
	listener: &Listener,
	pool:     &Pool,
	service:  &Service,
	shutdown: &ShutdownFlag,
	cfg:      &Config,
	exit:     &AtomicI32
) {
	loop {
		if shutdown.is_set() {
			break;
		}

		let (sock, addr) = match listener.accept() {
			Ok(v) => v,
			Err(_) if shutdown.is_set() => break,
			Err(e) if transient(&e) => {
				log::debug!("accept: {}", e);
				continue;
			}
			Err(e) => {
				log::error!("accept: {}", e);
				exit.store(1, Ordering::SeqCst);
				break;
			}
		};

		log::debug!("accept: connection from {}", addr);

		let conn = Connection::new(
			sock, addr,
			cfg.readbuf_size, cfg.writebuf_size,
			cfg.timeout_read, cfg.timeout_write,
			cfg.retries_read, cfg.retries_write
		);

		let service  = service.clone();
		let shutdown = shutdown.clone();

		// a rejected item drops the connection, which closes it
		if let Err(e) = pool.spawn(move || {
			if let Err(e) = service(conn, &shutdown) {
				log::debug!("service: {}", e);
			}
		}) {
			log::warn!("accept: dropping connection from {}: {}", addr, e);
		}
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		std::io::{Read, Write},
		std::net::TcpStream
	};

	fn echo_server() -> TcpServer {
		let service: Service = Arc::new(|mut conn: Connection, _: &ShutdownFlag| {
			loop {
				let line = match conn.gets(256) {
					Ok(v)  => v,
					Err(_) => break
				};

				conn.puts(&line)?;
				conn.puts("\r\n")?;
				conn.flush()?;
			}

			conn.close()
		});

		TcpServer::new(Config {
			endpoint: Endpoint::tcp("127.0.0.1", 0),
			workers: 2,
			queue_size: 4,
			..Config::default()
		}, service)
	}

	#[test]
	fn serves_and_shuts_down_cleanly() {
		let mut server = echo_server();
		let flag = ShutdownFlag::default();

		server.setup().unwrap();
		let port = server.port().unwrap();
		server.run(flag.clone()).unwrap();

		let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
		client.write_all(b"hello\r\n").unwrap();

		let mut buf = [0u8; 7];
		client.read_exact(&mut buf).unwrap();
		assert_eq!(&buf, b"hello\r\n");
		drop(client);

		flag.set();
		server.shutdown().unwrap();
		assert_eq!(server.join(), 0);
	}

	#[test]
	fn rollback_releases_the_port() {
		let mut server = echo_server();
		server.setup().unwrap();
		let port = server.port().unwrap();
		server.rollback().unwrap();

		// the port is free again
		let listener = std::net::TcpListener::bind(("127.0.0.1", port));
		assert!(listener.is_ok());
	}
}
