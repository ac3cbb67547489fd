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

//! In-memory cache of static assets, keyed by a stable numeric id.
//!
//! Entries are immutable once published. Replacing an id swaps the slot
//! to a fresh entry with a higher version; readers holding the old one
//! keep a complete, coherent copy until they drop it, so there are no
//! torn reads across invalidation. The sum of non-pinned entry sizes
//! stays under the byte budget; admission evicts the least recently
//! used non-pinned entries, sparing a bounded hotlist of recently
//! accessed ids.

use {
	crate::error::{Error, Result},
	nix::errno::Errno,
	std::{
		collections::{HashMap, VecDeque},
		path::PathBuf,
		sync::{Arc, Mutex},
		time::SystemTime
	}
};

pub struct Entry {
	id:       usize,
	version:  u64,
	data:     Vec<u8>,
	mime:     Option<String>,
	path:     Option<PathBuf>,
	modified: Option<SystemTime>,
	pinned:   bool
}

impl Entry {
	pub(crate) fn new(
		id:       usize,
		version:  u64,
		data:     Vec<u8>,
		mime:     Option<String>,
		path:     Option<PathBuf>,
		modified: Option<SystemTime>,
		pinned:   bool
	) -> Self {
		Self { id, version, data, mime, path, modified, pinned }
	}

	pub fn id(&self) -> usize {
		self.id
	}

	pub fn version(&self) -> u64 {
		self.version
	}

	pub fn data(&self) -> &[u8] {
		&self.data
	}

	pub fn len(&self) -> usize {
		self.data.len()
	}

	pub fn is_empty(&self) -> bool {
		self.data.is_empty()
	}

	pub fn mime(&self) -> Option<&str> {
		self.mime.as_deref()
	}

	pub fn path(&self) -> Option<&std::path::Path> {
		self.path.as_deref()
	}

	pub fn modified(&self) -> Option<SystemTime> {
		self.modified
	}

	pub fn pinned(&self) -> bool {
		self.pinned
	}
}

struct Slot {
	entry:       Arc<Entry>,
	last_access: u64,
	stale:       bool
}

struct Inner {
	map:          HashMap<usize, Slot>,
	hotlist:      VecDeque<usize>,
	hotlist_max:  usize,
	budget:       usize,
	used:         usize,
	tick:         u64,
	next_version: u64
}

pub struct Cache {
	inner: Mutex<Inner>
}

impl Cache {
	pub fn new(budget: usize, hotlist_max: usize) -> Self {
		Self {
			inner: Mutex::new(Inner {
				map:          HashMap::new(),
				hotlist:      VecDeque::new(),
				hotlist_max,
				budget,
				used:         0,
				tick:         0,
				next_version: 0
			})
		}
	}

	pub fn add(&self, id: usize, data: Vec<u8>, pin: bool) -> Result<()> {
		self.insert(id, data, None, None, None, pin).map(|_| ())
	}

	pub fn add_file(
		&self,
		id:       usize,
		data:     Vec<u8>,
		mime:     impl Into<String>,
		path:     PathBuf,
		modified: Option<SystemTime>,
		pin:      bool
	) -> Result<()> {
		self.insert(id, data, Some(mime.into()), Some(path), modified, pin).map(|_| ())
	}

	pub(crate) fn insert(
		&self,
		id:       usize,
		data:     Vec<u8>,
		mime:     Option<String>,
		path:     Option<PathBuf>,
		modified: Option<SystemTime>,
		pin:      bool
	) -> Result<Arc<Entry>> {
		let mut inner = self.inner.lock().expect("cache mutex poisoned");
		let size = data.len();

		// replacement frees the old slot's budget share first
		if let Some(old) = inner.map.remove(&id) {
			if !old.entry.pinned {
				inner.used -= old.entry.len();
			}
		}

		if !pin {
			if size > inner.budget {
				return Err(Error::os(Errno::ENOSPC as i32)
					.with_message(format!("entry {} exceeds the cache budget", id)));
			}

			while inner.used + size > inner.budget {
				if !evict_one(&mut inner) {
					return Err(Error::os(Errno::ENOSPC as i32)
						.with_message("cache budget exhausted and nothing evictable"));
				}
			}

			inner.used += size;
		}

		let version = inner.next_version;
		inner.next_version += 1;

		let entry = Arc::new(Entry::new(id, version, data, mime, path, modified, pin));
		let tick = inner.tick;
		inner.map.insert(id, Slot { entry: entry.clone(), last_access: tick, stale: false });
		Ok(entry)
	}

	pub fn exists(&self, id: usize) -> bool {
		self.inner.lock().expect("cache mutex poisoned").map.contains_key(&id)
	}

	/// A complete published entry, never a mix of versions.
	pub fn get(&self, id: usize) -> Option<Arc<Entry>> {
		let mut inner = self.inner.lock().expect("cache mutex poisoned");
		inner.tick += 1;
		let tick = inner.tick;
		let hotlist_max = inner.hotlist_max;

		let entry = match inner.map.get_mut(&id) {
			None       => return None,
			Some(slot) => {
				slot.last_access = tick;
				slot.entry.clone()
			}
		};

		// most recently accessed ids are exempt from eviction
		if hotlist_max > 0 {
			inner.hotlist.retain(|&v| v != id);
			inner.hotlist.push_back(id);

			while inner.hotlist.len() > hotlist_max {
				inner.hotlist.pop_front();
			}
		}

		Some(entry)
	}

	pub fn remove(&self, id: usize) -> bool {
		let mut inner = self.inner.lock().expect("cache mutex poisoned");

		match inner.map.remove(&id) {
			None => false,
			Some(slot) => {
				if !slot.entry.pinned {
					inner.used -= slot.entry.len();
				}

				inner.hotlist.retain(|&v| v != id);
				true
			}
		}
	}

	/// Marks every non-pinned entry for replacement at the next `add`.
	/// Entries stay readable until then.
	pub fn invalidate(&self) {
		let mut inner = self.inner.lock().expect("cache mutex poisoned");

		for slot in inner.map.values_mut() {
			if !slot.entry.pinned {
				slot.stale = true;
			}
		}
	}

	pub fn stale(&self, id: usize) -> bool {
		self.inner.lock().expect("cache mutex poisoned")
			.map.get(&id).map_or(false, |slot| slot.stale)
	}

	pub fn len(&self) -> usize {
		self.inner.lock().expect("cache mutex poisoned").map.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Bytes held by non-pinned entries.
	pub fn used(&self) -> usize {
		self.inner.lock().expect("cache mutex poisoned").used
	}
}

/// Drops the least recently used non-pinned, non-hot entry. False when
/// nothing qualifies.
fn evict_one(inner: &mut Inner) -> bool {
	let victim = inner.map.iter()
		.filter(|(id, slot)| !slot.entry.pinned && !inner.hotlist.contains(id))
		.min_by_key(|(_, slot)| slot.last_access)
		.map(|(&id, _)| id);

	match victim {
		None     => false,
		Some(id) => {
			if let Some(slot) = inner.map.remove(&id) {
				inner.used -= slot.entry.len();
				log::debug!("cache: evicted entry {} ({} bytes)", id, slot.entry.len());
			}

			true
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn add_get_remove() {
		let cache = Cache::new(1024, 4);
		cache.add(1, b"hello".to_vec(), false).unwrap();

		assert!(cache.exists(1));
		assert_eq!(cache.get(1).unwrap().data(), b"hello");
		assert_eq!(cache.used(), 5);
		assert!(cache.remove(1));
		assert!(!cache.exists(1));
		assert_eq!(cache.used(), 0);
	}

	#[test]
	fn replacement_versions_and_old_readers() {
		let cache = Cache::new(1024, 4);
		cache.add(1, b"first".to_vec(), false).unwrap();

		let old = cache.get(1).unwrap();
		cache.add(1, b"second".to_vec(), false).unwrap();
		let new = cache.get(1).unwrap();

		// the in-flight reader still sees the prior bytes, whole
		assert_eq!(old.data(), b"first");
		assert_eq!(new.data(), b"second");
		assert!(new.version() > old.version());
		assert_eq!(cache.used(), 6);
	}

	#[test]
	fn eviction_is_lru_and_respects_pins() {
		let cache = Cache::new(10, 0);
		cache.add(1, vec![0; 4], false).unwrap();
		cache.add(2, vec![0; 4], false).unwrap();
		cache.add(3, vec![0; 100], true).unwrap(); // pinned, outside the budget

		// touch 1 so 2 is the least recently used
		cache.get(1).unwrap();

		cache.add(4, vec![0; 4], false).unwrap();
		assert!(cache.exists(1));
		assert!(!cache.exists(2));
		assert!(cache.exists(3));
		assert!(cache.exists(4));
	}

	#[test]
	fn pinned_entries_never_evict() {
		let cache = Cache::new(4, 0);
		cache.add(1, vec![0; 100], true).unwrap();

		// nothing evictable for a 5-byte admission into a 4-byte budget
		assert!(cache.add(2, vec![0; 5], false).is_err());
		assert!(cache.exists(1));
	}

	#[test]
	fn hotlist_exempts_recent_ids() {
		let cache = Cache::new(8, 1);
		cache.add(1, vec![0; 4], false).unwrap();
		cache.add(2, vec![0; 4], false).unwrap();

		// 2 is hot; 1 must go even though both qualify by size
		cache.get(2).unwrap();
		cache.get(1).unwrap();
		cache.get(2).unwrap();

		cache.add(3, vec![0; 4], false).unwrap();
		assert!(!cache.exists(1));
		assert!(cache.exists(2));
	}

	#[test]
	fn invalidate_marks_stale_but_readable() {
		let cache = Cache::new(64, 0);
		cache.add(1, b"data".to_vec(), false).unwrap();
		cache.add(2, b"keep".to_vec(), true).unwrap();
		cache.invalidate();

		assert!(cache.stale(1));
		assert!(!cache.stale(2));
		assert_eq!(cache.get(1).unwrap().data(), b"data");

		cache.add(1, b"new".to_vec(), false).unwrap();
		assert!(!cache.stale(1));
	}

	#[test]
	fn concurrent_readers_see_whole_versions() {
		let cache = Arc::new(Cache::new(1 << 20, 4));
		cache.add(7, vec![b'a'; 4096], false).unwrap();

		let writer = {
			let cache = cache.clone();
			std::thread::spawn(move || {
				for i in 0..100u8 {
					cache.add(7, vec![i, i, i, i], false).unwrap();
				}
			})
		};

		let readers = (0..4).map(|_| {
			let cache = cache.clone();
			std::thread::spawn(move || {
				for _ in 0..200 {
					let entry = cache.get(7).unwrap();
					let data  = entry.data();
					assert!(data.windows(2).all(|w| w[0] == w[1]) || data.iter().all(|&b| b == b'a'));
				}
			})
		}).collect::<Vec<_>>();

		writer.join().unwrap();

		for reader in readers {
			reader.join().unwrap();
		}
	}
}
