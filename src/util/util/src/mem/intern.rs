use std::{fmt, sync::Arc};

use parking_lot::Mutex;

use super::hash::FxHashMap;

/// A process-wide table of interned strings. Lookups ignore ASCII case and the first spelling to be
/// interned is the one [`StringTable::resolve`] hands back, so `"Foo"` and `"FOO"` share a handle.
///
/// The table is internally locked; every call holds the lock only for its own duration.
#[derive(Default)]
pub struct StringTable {
	inner: Mutex<StringTableInner>,
}

#[derive(Default)]
struct StringTableInner {
	/// Maps the case-folded text to its handle.
	map: FxHashMap<Box<str>, StringHandle>,

	/// The canonical spelling of every handle, indexed by handle.
	strings: Vec<Arc<str>>,
}

impl fmt::Debug for StringTable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let inner = self.inner.lock();
		f.debug_set().entries(inner.strings.iter()).finish()
	}
}

/// An interned string. Equality and hashing are by identity, which is what makes name tables keyed
/// on handles cheap to hash.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct StringHandle(u32);

impl StringHandle {
	pub fn index(self) -> u32 {
		self.0
	}
}

fn fold_case(text: &str) -> Box<str> {
	text.to_ascii_lowercase().into_boxed_str()
}

impl StringTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&self, text: &str) -> StringHandle {
		let mut inner = self.inner.lock();
		let key = fold_case(text);

		if let Some(&handle) = inner.map.get(&key) {
			return handle;
		}

		let handle = StringHandle(
			u32::try_from(inner.strings.len()).expect("interned too many strings"),
		);
		inner.strings.push(Arc::from(text));
		inner.map.insert(key, handle);
		handle
	}

	pub fn lookup(&self, text: &str) -> Option<StringHandle> {
		self.inner.lock().map.get(&fold_case(text)).copied()
	}

	pub fn resolve(&self, handle: StringHandle) -> Arc<str> {
		self.inner.lock().strings[handle.0 as usize].clone()
	}

	pub fn len(&self) -> usize {
		self.inner.lock().strings.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn basic_interning() {
		let table = StringTable::new();

		let whee = table.insert("Whee");
		let woo = table.insert("woo");
		let whee2 = table.insert("WHEE");

		assert_eq!(whee, whee2);
		assert_ne!(whee, woo);
		assert_eq!(&*table.resolve(whee2), "Whee");
		assert_eq!(table.lookup("wHeE"), Some(whee));
		assert_eq!(table.lookup("waz"), None);
		assert_eq!(table.len(), 2);
	}
}
