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

//! Lifecycle host for a set of runnables.
//!
//! A runnable is set up, run, and shut down under common signal and
//! privilege discipline. `setup` failures roll back everything already
//! set up, in reverse order. Shutdown is driven by SIGTERM/SIGINT:
//! the host sets the process-wide flag, asks each runnable to stop in
//! reverse order, and joins their workers.

use {
	crate::error::{Error, Result},
	nix::{
		errno::Errno,
		sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal},
		unistd::{self, ForkResult, User}
	},
	std::{
		path::PathBuf,
		sync::{
			atomic::{AtomicBool, Ordering},
			Arc
		}
	}
};

/// Pollable process-wide shutting-down state. Cloning yields a handle to
/// the same flag.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
	pub fn set(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	pub fn is_set(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// An object whose lifecycle the process host orchestrates.
pub trait Runnable: Send {
	fn name(&self) -> &str;

	/// Acquires resources (bind, allocate). Must be undoable.
	fn setup(&mut self) -> Result<()>;

	/// Reverses a successful [`Self::setup`].
	fn rollback(&mut self) -> Result<()>;

	/// Begins serving. Must return promptly after spawning workers.
	fn run(&mut self, shutdown: ShutdownFlag) -> Result<()>;

	/// Requests orderly termination; [`Self::join`] waits for it.
	fn shutdown(&mut self) -> Result<()>;

	/// Waits for the runnable's workers and returns its exit code.
	fn join(&mut self) -> i32;
}

pub struct Process {
	name:      String,
	rootdir:   Option<PathBuf>,
	username:  Option<String>,
	runnables: Vec<Box<dyn Runnable>>,
	flag:      ShutdownFlag,
	running:   bool
}

impl Process {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name:      name.into(),
			rootdir:   None,
			username:  None,
			runnables: Vec::new(),
			flag:      ShutdownFlag::default(),
			running:   false
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Chroot here during `start`. Requires privilege.
	pub fn set_rootdir(&mut self, path: impl Into<PathBuf>) {
		self.rootdir = Some(path.into());
	}

	/// Drop to this user during `start`.
	pub fn set_username(&mut self, name: impl Into<String>) {
		self.username = Some(name.into());
	}

	pub fn add(&mut self, runnable: Box<dyn Runnable>) {
		self.runnables.push(runnable);
	}

	pub fn shutdown_flag(&self) -> ShutdownFlag {
		self.flag.clone()
	}

	pub fn shutting_down(&self) -> bool {
		self.flag.is_set()
	}

	/// Brings the process up: optionally daemonizes, applies root/user
	/// confinement, installs signal discipline, then `setup`s and `run`s
	/// every runnable in order. A `setup` failure rolls back the already
	/// set up runnables in reverse order.
	pub fn start(&mut self, daemonize: bool) -> Result<()> {
		if daemonize {
			detach()?;
		}

		if let Some(root) = self.rootdir.clone() {
			unistd::chroot(&root)?;
			unistd::chdir("/")?;
			log::info!("{}: changed root to {}", self.name, root.display());
		}

		if let Some(user) = self.username.clone() {
			drop_privileges(&user)?;
			log::info!("{}: dropped privileges to {}", self.name, user);
		}

		// broken pipes surface as write errors instead of killing us
		unsafe {
			sigaction(Signal::SIGPIPE, &SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty()))?;
		}

		// block the termination signals in this thread, and by inheritance
		// in every thread the runnables spawn, so wait_for_shutdown can
		// pick them up synchronously
		let mut signals = SigSet::empty();
		signals.add(Signal::SIGTERM);
		signals.add(Signal::SIGINT);
		nix::sys::signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&signals), None)?;

		for i in 0..self.runnables.len() {
			if let Err(e) = self.runnables[i].setup() {
				log::error!("{}: setup of {} failed: {}", self.name, self.runnables[i].name(), e);

				for runnable in self.runnables[..i].iter_mut().rev() {
					if let Err(e) = runnable.rollback() {
						log::warn!("{}: rollback of {} failed: {}", self.name, runnable.name(), e);
					}
				}

				return Err(e);
			}
		}

		for runnable in &mut self.runnables {
			runnable.run(self.flag.clone())?;
			log::info!("{}: {} running", self.name, runnable.name());
		}

		self.running = true;
		Ok(())
	}

	/// Blocks until SIGTERM or SIGINT arrives, then shuts everything down.
	/// Returns the first non-zero runnable exit code, or zero.
	pub fn wait_for_shutdown(&mut self) -> Result<i32> {
		let mut signals = SigSet::empty();
		signals.add(Signal::SIGTERM);
		signals.add(Signal::SIGINT);

		let signal = signals.wait()?;
		log::info!("{}: received {}, shutting down", self.name, signal.as_str());
		self.initiate_shutdown()
	}

	/// The signal-less path to an orderly stop: sets the flag, shuts the
	/// runnables down in reverse order and joins them.
	pub fn initiate_shutdown(&mut self) -> Result<i32> {
		self.flag.set();

		for runnable in self.runnables.iter_mut().rev() {
			if let Err(e) = runnable.shutdown() {
				log::warn!("{}: shutdown of {} failed: {}", self.name, runnable.name(), e);
			}
		}

		let mut code = 0;

		for runnable in self.runnables.iter_mut().rev() {
			let c = runnable.join();
			log::info!("{}: {} exited with code {}", self.name, runnable.name(), c);

			if code == 0 {
				code = c;
			}
		}

		self.running = false;
		Ok(code)
	}
}

/// Classic daemon dance: fork and exit the parent, lead a new session,
/// fork again, point stdio at /dev/null.
fn detach() -> Result<()> {
	match unsafe { unistd::fork() }? {
		ForkResult::Parent { .. } => std::process::exit(0),
		ForkResult::Child         => ()
	}

	unistd::setsid()?;

	match unsafe { unistd::fork() }? {
		ForkResult::Parent { .. } => std::process::exit(0),
		ForkResult::Child         => ()
	}

	let null = std::fs::OpenOptions::new()
		.read(true)
		.write(true)
		.open("/dev/null")
		.map_err(Error::from)?;

	for fd in 0..3 {
		unistd::dup2(std::os::unix::io::AsRawFd::as_raw_fd(&null), fd)?;
	}

	Ok(())
}

fn drop_privileges(name: &str) -> Result<()> {
	let user = User::from_name(name)?
		.ok_or_else(|| Error::os(Errno::ENOENT as i32).with_message(format!("no such user: {}", name)))?;

	unistd::setgid(user.gid)?;
	unistd::setuid(user.uid)?;
	Ok(())
}

#[cfg(test)]
mod tests {
	use {super::*, std::sync::Mutex};

	struct Probe {
		name:   &'static str,
		label:  char,
		log:    Arc<Mutex<String>>,
		fail:   bool,
		code:   i32
	}

	impl Probe {
		fn push(&self, step: char) {
			self.log.lock().unwrap().push(self.label);
			self.log.lock().unwrap().push(step);
		}
	}

	impl Runnable for Probe {
		fn name(&self) -> &str {
			self.name
		}

		fn setup(&mut self) -> Result<()> {
			self.push('s');

			if self.fail {
				return Err(Error::other("probe failure"));
			}

			Ok(())
		}

		fn rollback(&mut self) -> Result<()> {
			self.push('u');
			Ok(())
		}

		fn run(&mut self, _: ShutdownFlag) -> Result<()> {
			self.push('r');
			Ok(())
		}

		fn shutdown(&mut self) -> Result<()> {
			self.push('d');
			Ok(())
		}

		fn join(&mut self) -> i32 {
			self.push('j');
			self.code
		}
	}

	fn probe(log: &Arc<Mutex<String>>, label: char, fail: bool, code: i32) -> Box<Probe> {
		Box::new(Probe { name: "probe", label, log: log.clone(), fail, code })
	}

	#[test]
	fn lifecycle_order() {
		let log = Arc::new(Mutex::new(String::new()));
		let mut process = Process::new("test");
		process.add(probe(&log, 'a', false, 0));
		process.add(probe(&log, 'b', false, 0));

		process.start(false).unwrap();
		assert!(!process.shutting_down());
		assert_eq!(process.initiate_shutdown().unwrap(), 0);
		assert!(process.shutting_down());

		// setup and run in order, shutdown and join reversed
		assert_eq!(&*log.lock().unwrap(), "asbsarbrbdadbjaj");
	}

	#[test]
	fn setup_failure_rolls_back_in_reverse() {
		let log = Arc::new(Mutex::new(String::new()));
		let mut process = Process::new("test");
		process.add(probe(&log, 'a', false, 0));
		process.add(probe(&log, 'b', false, 0));
		process.add(probe(&log, 'c', true, 0));

		assert!(process.start(false).is_err());
		assert_eq!(&*log.lock().unwrap(), "asbscsbuau");
	}

	#[test]
	fn first_nonzero_exit_code_wins() {
		let log = Arc::new(Mutex::new(String::new()));
		let mut process = Process::new("test");
		process.add(probe(&log, 'a', false, 3));
		process.add(probe(&log, 'b', false, 0));

		process.start(false).unwrap();
		assert_eq!(process.initiate_shutdown().unwrap(), 3);
	}
}
