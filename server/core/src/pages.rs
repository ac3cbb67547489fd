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

//! Page registry: URIs bound to dynamic handlers or cached static
//! assets, with per-page attributes. Exact matches resolve through an
//! index, URIs registered with a trailing slash also match as prefixes,
//! longest first.

use {
	crate::{
		error::{Error, Result},
		http::{Request, Response, Status}
	},
	nix::errno::Errno,
	std::collections::HashMap
};

/// Metadata a page inherits into its responses.
#[derive(Clone, Debug, Default)]
pub struct Attributes {
	pub media_type:    Option<String>,
	pub language:      Option<String>,
	pub charset:       Option<String>,
	pub encoding:      Option<String>,
	/// Basic-auth realm; set means the page requires authorization.
	pub authorization: Option<String>
}

pub type Handler = Box<dyn Fn(&Request, &mut Response) -> Status + Send + Sync>;

pub enum PageKind {
	Dynamic(Handler),
	/// File-cache id of the asset.
	Static(usize)
}

pub struct Page {
	pub uri:   String,
	pub kind:  PageKind,
	pub attrs: Attributes
}

pub struct Registry {
	pages: Vec<Page>,
	index: HashMap<String, usize>,
	limit: usize
}

impl Registry {
	pub fn new(limit: usize) -> Self {
		Self { pages: Vec::new(), index: HashMap::new(), limit }
	}

	pub fn add(&mut self, page: Page) -> Result<()> {
		if self.pages.len() >= self.limit {
			return Err(Error::os(Errno::ENOSPC as i32).with_message("page limit reached"));
		}

		if self.index.contains_key(&page.uri) {
			return Err(Error::os(Errno::EEXIST as i32)
				.with_message(format!("page {} already registered", page.uri)));
		}

		self.index.insert(page.uri.clone(), self.pages.len());
		self.pages.push(page);
		Ok(())
	}

	pub fn find_exact(&self, path: &str) -> Option<&Page> {
		self.index.get(path).map(|&i| &self.pages[i])
	}

	/// Longest matching trailing-slash prefix; insertion order breaks
	/// ties.
	pub fn find_prefix(&self, path: &str) -> Option<&Page> {
		self.pages.iter()
			.filter(|p| p.uri.ends_with('/') && path.starts_with(&p.uri))
			.max_by_key(|p| p.uri.len())
	}

	pub fn iter(&self) -> impl Iterator<Item = &Page> {
		self.pages.iter()
	}

	pub fn len(&self) -> usize {
		self.pages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pages.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn page(uri: &str) -> Page {
		Page {
			uri:   uri.to_string(),
			kind:  PageKind::Dynamic(Box::new(|_, _| Status::Ok)),
			attrs: Attributes::default()
		}
	}

	#[test]
	fn exact_match() {
		let mut registry = Registry::new(16);
		registry.add(page("/")).unwrap();
		registry.add(page("/about")).unwrap();

		assert_eq!(registry.find_exact("/about").unwrap().uri, "/about");
		assert!(registry.find_exact("/missing").is_none());
	}

	#[test]
	fn longest_prefix_wins() {
		let mut registry = Registry::new(16);
		registry.add(page("/api/")).unwrap();
		registry.add(page("/api/v2/")).unwrap();
		registry.add(page("/plain")).unwrap();

		assert_eq!(registry.find_prefix("/api/v2/users").unwrap().uri, "/api/v2/");
		assert_eq!(registry.find_prefix("/api/other").unwrap().uri, "/api/");
		// non-slash pages never match as prefixes
		assert!(registry.find_prefix("/plain/extra").is_none());
	}

	#[test]
	fn rejects_duplicates_and_overflow() {
		let mut registry = Registry::new(1);
		registry.add(page("/")).unwrap();
		assert!(registry.add(page("/")).is_err());
		assert!(registry.add(page("/other")).is_err());
	}
}
