//! Name and ID lookup tables.
//!
//! Every dictionary is internally locked and holds its lock only for the duration of one call, so
//! the global dictionaries can be shared with auxiliary threads through a `SimHandle`.

use parking_lot::Mutex;
use smallvec::SmallVec;
use torque_util::mem::{hash::fx_hash_u32, intern::StringHandle};

use crate::object::{ObjectRef, SimObjectId};

// === ChainedTable === //

type Bucket<K> = SmallVec<[(K, ObjectRef); 2]>;

/// A chained hash table that keeps every entry, including duplicates. New entries are prepended to
/// their bucket, so lookups see the most recent insertion first.
#[derive(Debug)]
struct ChainedTable<K> {
	buckets: Vec<Bucket<K>>,
	count: usize,
	grows: bool,
}

impl<K: Copy + Eq> ChainedTable<K> {
	fn new(size: usize, grows: bool) -> Self {
		Self {
			buckets: (0..size.max(1)).map(|_| SmallVec::new()).collect(),
			count: 0,
			grows,
		}
	}

	fn bucket_of(&self, key_hash: u64) -> usize {
		(key_hash % self.buckets.len() as u64) as usize
	}

	fn insert(&mut self, key_hash: u64, key: K, obj: ObjectRef) -> Option<ObjectRef> {
		let index = self.bucket_of(key_hash);
		let shadowed = self.buckets[index]
			.iter()
			.find(|(other, _)| *other == key)
			.map(|(_, obj)| *obj);

		self.buckets[index].insert(0, (key, obj));
		self.count += 1;
		shadowed
	}

	fn remove(&mut self, key_hash: u64, key: K, obj: ObjectRef) -> bool {
		let index = self.bucket_of(key_hash);
		let bucket = &mut self.buckets[index];

		match bucket.iter().position(|entry| *entry == (key, obj)) {
			Some(pos) => {
				bucket.remove(pos);
				self.count -= 1;
				true
			}
			None => false,
		}
	}

	fn find(&self, key_hash: u64, key: K) -> Option<ObjectRef> {
		self.buckets[self.bucket_of(key_hash)]
			.iter()
			.find(|(other, _)| *other == key)
			.map(|(_, obj)| *obj)
	}

	fn bucket_count(&self) -> usize {
		self.buckets.len()
	}
}

impl ChainedTable<StringHandle> {
	fn maybe_grow(&mut self) {
		if !self.grows || self.count <= self.buckets.len() {
			return;
		}

		let new_size = self.buckets.len() * 2 + 1;
		let old = std::mem::replace(
			&mut self.buckets,
			(0..new_size).map(|_| SmallVec::new()).collect(),
		);

		// Walk each old bucket front to back and append, so entries that shared a bucket keep their
		// relative order.
		for (name, obj) in old.into_iter().flatten() {
			let index = self.bucket_of(name_hash(name));
			self.buckets[index].push((name, obj));
		}
	}
}

fn name_hash(name: StringHandle) -> u64 {
	fx_hash_u32(name.index())
}

// === Name dictionaries === //

/// The private name table of a single group.
///
/// Duplicate names are accepted and the newest entry wins lookups. [`NameDictionary::insert`]
/// reports the entry it shadowed so the caller can warn about it.
#[derive(Debug)]
pub struct NameDictionary {
	table: Mutex<ChainedTable<StringHandle>>,
}

impl NameDictionary {
	pub fn new(size: usize) -> Self {
		Self {
			table: Mutex::new(ChainedTable::new(size, true)),
		}
	}

	pub fn insert(&self, name: StringHandle, obj: ObjectRef) -> Option<ObjectRef> {
		let mut table = self.table.lock();
		let shadowed = table.insert(name_hash(name), name, obj);
		table.maybe_grow();
		shadowed
	}

	pub fn remove(&self, name: StringHandle, obj: ObjectRef) -> bool {
		self.table.lock().remove(name_hash(name), name, obj)
	}

	pub fn find(&self, name: StringHandle) -> Option<ObjectRef> {
		self.table.lock().find(name_hash(name), name)
	}

	pub fn len(&self) -> usize {
		self.table.lock().count
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn bucket_count(&self) -> usize {
		self.table.lock().bucket_count()
	}
}

/// The global name table. Identical to [`NameDictionary`] except that shadowing is silent.
#[derive(Debug)]
pub struct ManagerNameDictionary {
	inner: NameDictionary,
}

impl ManagerNameDictionary {
	pub fn new(size: usize) -> Self {
		Self {
			inner: NameDictionary::new(size),
		}
	}

	pub fn insert(&self, name: StringHandle, obj: ObjectRef) {
		self.inner.insert(name, obj);
	}

	pub fn remove(&self, name: StringHandle, obj: ObjectRef) -> bool {
		self.inner.remove(name, obj)
	}

	pub fn find(&self, name: StringHandle) -> Option<ObjectRef> {
		self.inner.find(name)
	}

	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}

	pub fn bucket_count(&self) -> usize {
		self.inner.bucket_count()
	}
}

// === IdDictionary === //

/// Maps object IDs to objects. The bucket count is fixed at construction and must be a power of two
/// so that `id & mask` selects the bucket.
#[derive(Debug)]
pub struct IdDictionary {
	mask: u32,
	table: Mutex<ChainedTable<SimObjectId>>,
}

impl IdDictionary {
	pub fn new(size: usize) -> Self {
		debug_assert!(size.is_power_of_two());

		Self {
			mask: (size - 1) as u32,
			table: Mutex::new(ChainedTable::new(size, false)),
		}
	}

	fn id_hash(&self, id: SimObjectId) -> u64 {
		u64::from(id.0 & self.mask)
	}

	pub fn insert(&self, id: SimObjectId, obj: ObjectRef) {
		let hash = self.id_hash(id);
		self.table.lock().insert(hash, id, obj);
	}

	pub fn remove(&self, id: SimObjectId, obj: ObjectRef) -> bool {
		let hash = self.id_hash(id);
		self.table.lock().remove(hash, id, obj)
	}

	pub fn find(&self, id: SimObjectId) -> Option<ObjectRef> {
		self.table.lock().find(self.id_hash(id), id)
	}

	pub fn contains(&self, id: SimObjectId) -> bool {
		self.find(id).is_some()
	}

	pub fn len(&self) -> usize {
		self.table.lock().count
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
