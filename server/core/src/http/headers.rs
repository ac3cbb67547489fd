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

//! Ordered header fields, matched case-insensitively by name.

#[derive(Clone, Debug, Default)]
pub struct HeaderMap(Vec<(String, String)>);

impl HeaderMap {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get(&self, name: &str) -> Option<&str> {
		self.0.iter()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v.as_str())
	}

	pub fn get_mut(&mut self, name: &str) -> Option<&mut String> {
		self.0.iter_mut()
			.find(|(k, _)| k.eq_ignore_ascii_case(name))
			.map(|(_, v)| v)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.get(name).is_some()
	}

	/// Overwrites an existing field of the same name, or appends.
	pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
		let name = name.into();

		match self.get_mut(&name) {
			Some(v) => *v = value.into(),
			None    => self.0.push((name, value.into()))
		}
	}

	/// Always appends, keeping duplicates.
	pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
		self.0.push((name.into(), value.into()));
	}

	pub fn remove(&mut self, name: &str) {
		self.0.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	pub fn clear(&mut self) {
		self.0.clear();
	}
}

/// Fields whose duplicates concatenate with a comma instead of being a
/// grammar violation.
pub fn is_list_valued(name: &str) -> bool {
	name.eq_ignore_ascii_case("cookie")
		|| name.eq_ignore_ascii_case("accept")
		|| (name.len() >= 7 && name[..7].eq_ignore_ascii_case("accept-"))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn case_insensitive_lookup() {
		let mut map = HeaderMap::new();
		map.set("Content-Type", "text/html");
		assert_eq!(map.get("content-type"), Some("text/html"));
		assert_eq!(map.get("CONTENT-TYPE"), Some("text/html"));
		assert_eq!(map.get("Content-Length"), None);
	}

	#[test]
	fn set_overwrites_add_appends() {
		let mut map = HeaderMap::new();
		map.set("Accept", "text/html");
		map.set("accept", "*/*");
		assert_eq!(map.len(), 1);
		assert_eq!(map.get("Accept"), Some("*/*"));

		map.add("Accept", "text/plain");
		assert_eq!(map.len(), 2);
	}

	#[test]
	fn preserves_insertion_order() {
		let mut map = HeaderMap::new();
		map.set("Host", "example.org");
		map.set("User-Agent", "test");
		map.set("Accept", "*/*");

		let names = map.iter().map(|(k, _)| k).collect::<Vec<_>>();
		assert_eq!(names, ["Host", "User-Agent", "Accept"]);
	}

	#[test]
	fn list_valued_names() {
		assert!(is_list_valued("Cookie"));
		assert!(is_list_valued("Accept"));
		assert!(is_list_valued("Accept-Language"));
		assert!(is_list_valued("ACCEPT-ENCODING"));
		assert!(!is_list_valued("Content-Length"));
		assert!(!is_list_valued("Host"));
	}
}
