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

//! A bounded threadpool.
//!
//! Work items are triples (optional init, work, optional cleanup), all
//! three run in order on the same worker. The queue holds at most the
//! configured number of pending items; a full queue either blocks the
//! caller or rejects the item, by configuration. Workers survive
//! panicking work.

use {
	crate::error::{Error, Result},
	nix::errno::Errno,
	std::{
		collections::VecDeque,
		panic::{catch_unwind, AssertUnwindSafe},
		sync::{
			atomic::{AtomicU64, Ordering},
			Arc, Condvar, Mutex
		},
		thread::JoinHandle
	}
};

pub type Thunk = Box<dyn FnOnce() + Send + 'static>;

struct Work {
	init:    Option<Thunk>,
	work:    Thunk,
	cleanup: Option<Thunk>
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum State {
	Running,
	/// No new work, queued items still run.
	Draining,
	/// No new work, queued items are dropped.
	Discarding
}

struct Shared {
	queue: VecDeque<Work>,
	state: State
}

struct Inner {
	shared:          Mutex<Shared>,
	not_empty:       Condvar,
	not_full:        Condvar,
	capacity:        usize,
	block_when_full: bool,
	added:           AtomicU64,
	discarded:       AtomicU64,
	blocked:         AtomicU64
}

pub struct Pool {
	inner:   Arc<Inner>,
	workers: Mutex<Vec<JoinHandle<()>>>
}

impl Pool {
	/// `workers == 0` means one worker per CPU.
	pub fn new(workers: usize, capacity: usize, block_when_full: bool) -> Result<Self> {
		let workers = if workers == 0 { num_cpus::get() } else { workers };
		let inner   = Arc::new(Inner {
			shared:    Mutex::new(Shared { queue: VecDeque::with_capacity(capacity), state: State::Running }),
			not_empty: Condvar::new(),
			not_full:  Condvar::new(),
			capacity,
			block_when_full,
			added:     AtomicU64::new(0),
			discarded: AtomicU64::new(0),
			blocked:   AtomicU64::new(0)
		});

		let handles = (0..workers)
			.map(|i| {
				let inner = inner.clone();
				std::thread::Builder::new()
					.name(format!("worker-{}", i))
					.spawn(move || worker(inner))
			})
			.collect::<std::io::Result<Vec<_>>>()
			.map_err(Error::from)?;

		Ok(Self { inner, workers: Mutex::new(handles) })
	}

	pub fn spawn(&self, work: impl FnOnce() + Send + 'static) -> Result<()> {
		self.add(None, Box::new(work), None)
	}

	/// Enqueues one triple. With a full queue this either waits for a free
	/// slot or fails with `ENOSPC`, depending on the block-when-full flag.
	pub fn add(&self, init: Option<Thunk>, work: Thunk, cleanup: Option<Thunk>) -> Result<()> {
		let mut shared = self.inner.shared.lock().expect("pool mutex poisoned");

		loop {
			if shared.state != State::Running {
				return Err(Error::other("pool is shutting down"));
			}

			if shared.queue.len() < self.inner.capacity {
				shared.queue.push_back(Work { init, work, cleanup });
				self.inner.added.fetch_add(1, Ordering::Relaxed);
				self.inner.not_empty.notify_one();
				return Ok(());
			}

			if !self.inner.block_when_full {
				self.inner.discarded.fetch_add(1, Ordering::Relaxed);
				return Err(Error::os(Errno::ENOSPC as i32));
			}

			self.inner.blocked.fetch_add(1, Ordering::Relaxed);
			shared = self.inner.not_full.wait(shared).expect("pool mutex poisoned");
		}
	}

	pub fn sum_added(&self) -> u64 {
		self.inner.added.load(Ordering::Relaxed)
	}

	pub fn sum_discarded(&self) -> u64 {
		self.inner.discarded.load(Ordering::Relaxed)
	}

	pub fn sum_blocked(&self) -> u64 {
		self.inner.blocked.load(Ordering::Relaxed)
	}

	pub fn queued(&self) -> usize {
		self.inner.shared.lock().expect("pool mutex poisoned").queue.len()
	}

	/// Stops the pool and joins all workers. With `finish` the queue
	/// drains first, otherwise pending items are dropped.
	pub fn shutdown(&self, finish: bool) {
		{
			let mut shared = self.inner.shared.lock().expect("pool mutex poisoned");
			shared.state = if finish { State::Draining } else { State::Discarding };

			if !finish {
				shared.queue.clear();
			}
		}

		self.inner.not_empty.notify_all();
		self.inner.not_full.notify_all();

		for handle in self.workers.lock().expect("pool mutex poisoned").drain(..) {
			if handle.join().is_err() {
				log::error!("pool: worker exited abnormally");
			}
		}
	}
}

impl Drop for Pool {
	fn drop(&mut self) {
		self.shutdown(false);
	}
}

fn run_caught(f: Thunk) -> bool {
	match catch_unwind(AssertUnwindSafe(f)) {
		Ok(())  => true,
		Err(e)  => {
			match e.downcast_ref::<String>() {
				Some(s) => log::error!("pool: work panicked: {}", s),
				None    => log::error!("pool: work panicked")
			}

			false
		}
	}
}

fn worker(inner: Arc<Inner>) {
	loop {
		let item = {
			let mut shared = inner.shared.lock().expect("pool mutex poisoned");

			loop {
				if let Some(item) = shared.queue.pop_front() {
					inner.not_full.notify_one();
					break item;
				}

				match shared.state {
					State::Running => shared = inner.not_empty.wait(shared).expect("pool mutex poisoned"),
					_              => return
				}
			}
		};

		let Work { init, work, cleanup } = item;
		let ok = init.map_or(true, run_caught);

		if ok {
			run_caught(work);
		}

		if let Some(cleanup) = cleanup {
			run_caught(cleanup);
		}
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		std::sync::atomic::{AtomicUsize, Ordering},
		std::time::Duration
	};

	#[test]
	fn work_runs_exactly_once() {
		let pool    = Pool::new(4, 8, true).unwrap();
		let counter = Arc::new(AtomicUsize::new(0));

		for _ in 0..100 {
			let counter = counter.clone();
			pool.spawn(move || { counter.fetch_add(1, Ordering::SeqCst); }).unwrap();
		}

		pool.shutdown(true);
		assert_eq!(counter.load(Ordering::SeqCst), 100);
		assert_eq!(pool.sum_added(), 100);
		assert_eq!(pool.sum_discarded(), 0);
	}

	#[test]
	fn triple_runs_in_order_on_one_worker() {
		let pool  = Pool::new(2, 4, true).unwrap();
		let trace = Arc::new(Mutex::new(Vec::new()));

		for _ in 0..20 {
			let (t0, t1, t2) = (trace.clone(), trace.clone(), trace.clone());
			pool.add(
				Some(Box::new(move || t0.lock().unwrap().push((std::thread::current().id(), 0)))),
				Box::new(move || t1.lock().unwrap().push((std::thread::current().id(), 1))),
				Some(Box::new(move || t2.lock().unwrap().push((std::thread::current().id(), 2))))
			).unwrap();
		}

		pool.shutdown(true);

		let trace = trace.lock().unwrap();
		assert_eq!(trace.len(), 60);

		// each worker sees its triples whole and ordered
		for id in trace.iter().map(|(id, _)| *id).collect::<std::collections::HashSet<_>>() {
			let steps = trace.iter().filter(|(i, _)| *i == id).map(|(_, s)| *s).collect::<Vec<_>>();
			assert_eq!(steps.len() % 3, 0);

			for triple in steps.chunks(3) {
				assert_eq!(triple, [0, 1, 2]);
			}
		}
	}

	#[test]
	fn rejects_when_full() {
		let pool = Pool::new(1, 1, false).unwrap();
		let gate = Arc::new(Mutex::new(()));

		let guard = gate.lock().unwrap();
		{
			let gate = gate.clone();
			pool.spawn(move || { let _guard = gate.lock(); }).unwrap();
		}

		// wait until the worker is stuck on the gate
		std::thread::sleep(Duration::from_millis(100));

		pool.spawn(|| ()).unwrap();

		let err = pool.spawn(|| ()).unwrap_err();
		assert_eq!(err.code(), Errno::ENOSPC as i32);
		assert_eq!(pool.sum_discarded(), 1);

		drop(guard);
		pool.shutdown(true);
	}

	#[test]
	fn cleanup_runs_after_panicking_work() {
		let pool    = Pool::new(1, 4, true).unwrap();
		let cleaned = Arc::new(AtomicUsize::new(0));

		{
			let cleaned = cleaned.clone();
			pool.add(
				None,
				Box::new(|| panic!("boom")),
				Some(Box::new(move || { cleaned.fetch_add(1, Ordering::SeqCst); }))
			).unwrap();
		}

		pool.shutdown(true);
		assert_eq!(cleaned.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn discarding_shutdown_drops_pending_work() {
		let pool = Pool::new(1, 8, true).unwrap();
		let ran  = Arc::new(AtomicUsize::new(0));

		pool.spawn(|| std::thread::sleep(Duration::from_millis(500))).unwrap();

		// let the worker pick up the sleeper before queueing the rest
		std::thread::sleep(Duration::from_millis(100));

		for _ in 0..5 {
			let ran = ran.clone();
			pool.spawn(move || { ran.fetch_add(1, Ordering::SeqCst); }).unwrap();
		}

		pool.shutdown(false);
		assert_eq!(ran.load(Ordering::SeqCst), 0);
	}
}
