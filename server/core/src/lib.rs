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

//! Server-side library for connection-oriented TCP/TLS applications.
//!
//! The building blocks stack bottom to top: sockets with deadlines, a
//! buffered connection, a bounded threadpool, the process host, the TCP
//! server runnable, and on top of those the HTTP engine with its page
//! registry and file cache.

#![warn(clippy::all)]
#![allow(clippy::type_complexity)]

pub mod cache;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod http;
pub mod httpserver;
pub mod membuf;
pub mod pages;
pub mod pool;
pub mod process;
pub mod server;
pub mod sock;
pub mod tls;

pub use {
	cache::Cache,
	connection::Connection,
	endpoint::{Endpoint, TlsConfig, Transport},
	error::{Class, Error, Result},
	httpserver::HttpServer,
	membuf::Membuf,
	pool::Pool,
	process::{Process, Runnable, ShutdownFlag},
	server::TcpServer
};
