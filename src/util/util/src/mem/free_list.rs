use std::{fmt, hash, num::NonZeroU32};

/// A slab of values addressed by small handles. Freed slots are recycled; what a stale handle sees
/// after its slot was recycled is decided by the [`Handle`] implementation.
#[derive(Debug)]
pub struct FreeList<T, H: Handle = GenHandle> {
	slots: Vec<Slot<T, H::Meta>>,
	free: Vec<u32>,
	len: usize,
}

#[derive(Debug)]
struct Slot<T, M> {
	value: Option<T>,
	meta: M,
}

pub trait Handle: Sized + fmt::Debug + Copy + hash::Hash + Eq {
	/// Per-slot bookkeeping that survives the slot being freed.
	type Meta: fmt::Debug + Default;

	fn occupy(slot: u32, meta: &mut Self::Meta) -> Self;

	fn release(meta: &mut Self::Meta);

	fn is_valid(&self, meta: &Self::Meta) -> bool;

	fn slot(&self) -> u32;
}

impl<T, H: Handle> Default for FreeList<T, H> {
	fn default() -> Self {
		Self {
			slots: Vec::new(),
			free: Vec::new(),
			len: 0,
		}
	}
}

impl<T, H: Handle> FreeList<T, H> {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&mut self, value: T) -> (&mut T, H) {
		let slot = match self.free.pop() {
			Some(slot) => slot,
			None => {
				let slot = u32::try_from(self.slots.len()).expect("allocated too many free list slots");
				self.slots.push(Slot {
					value: None,
					meta: H::Meta::default(),
				});
				slot
			}
		};

		let slot_data = &mut self.slots[slot as usize];
		debug_assert!(slot_data.value.is_none());

		let handle = H::occupy(slot, &mut slot_data.meta);
		self.len += 1;

		(slot_data.value.insert(value), handle)
	}

	pub fn try_remove(&mut self, handle: H) -> Option<T> {
		let slot_data = self.slots.get_mut(handle.slot() as usize)?;

		if !handle.is_valid(&slot_data.meta) {
			return None;
		}

		let value = slot_data.value.take()?;
		H::release(&mut slot_data.meta);
		self.free.push(handle.slot());
		self.len -= 1;

		Some(value)
	}

	pub fn remove(&mut self, handle: H) -> T {
		self.try_remove(handle)
			.unwrap_or_else(|| panic!("FreeList does not contain element with handle {handle:?}."))
	}

	pub fn try_get(&self, handle: H) -> Option<&T> {
		let slot_data = self.slots.get(handle.slot() as usize)?;

		if !handle.is_valid(&slot_data.meta) {
			return None;
		}

		slot_data.value.as_ref()
	}

	pub fn try_get_mut(&mut self, handle: H) -> Option<&mut T> {
		let slot_data = self.slots.get_mut(handle.slot() as usize)?;

		if !handle.is_valid(&slot_data.meta) {
			return None;
		}

		slot_data.value.as_mut()
	}

	pub fn get(&self, handle: H) -> &T {
		self.try_get(handle)
			.unwrap_or_else(|| panic!("FreeList does not contain element with handle {handle:?}."))
	}

	pub fn get_mut(&mut self, handle: H) -> &mut T {
		self.try_get_mut(handle)
			.unwrap_or_else(|| panic!("FreeList does not contain element with handle {handle:?}."))
	}

	pub fn contains(&self, handle: H) -> bool {
		self.try_get(handle).is_some()
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Iterates live entries in slot order. Handles are rebuilt from the current slot metadata.
	pub fn iter(&self) -> impl Iterator<Item = (H, &T)> + '_
	where
		H: Rebuild,
	{
		self.slots.iter().enumerate().filter_map(|(slot, data)| {
			let value = data.value.as_ref()?;
			Some((H::rebuild(slot as u32, &data.meta), value))
		})
	}
}

/// Handles that can be reconstructed from a slot index and its metadata.
pub trait Rebuild: Handle {
	fn rebuild(slot: u32, meta: &Self::Meta) -> Self;
}

// === Pure handles === //

impl Handle for u32 {
	type Meta = ();

	fn occupy(slot: u32, _meta: &mut Self::Meta) -> Self {
		slot
	}

	fn release(_meta: &mut Self::Meta) {}

	fn is_valid(&self, _meta: &Self::Meta) -> bool {
		true
	}

	fn slot(&self) -> u32 {
		*self
	}
}

impl Rebuild for u32 {
	fn rebuild(slot: u32, _meta: &Self::Meta) -> Self {
		slot
	}
}

// === GenHandle === //

/// A slot index paired with the generation the slot had when the handle was issued. Once the slot
/// is freed its generation moves on, so every outstanding copy of the handle stops resolving.
#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct GenHandle {
	slot: u32,
	gen: NonZeroU32,
}

impl fmt::Debug for GenHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "GenHandle({}v{})", self.slot, self.gen)
	}
}

impl GenHandle {
	pub fn generation(self) -> NonZeroU32 {
		self.gen
	}
}

#[derive(Debug, Copy, Clone)]
pub struct GenMeta(NonZeroU32);

impl Default for GenMeta {
	fn default() -> Self {
		Self(NonZeroU32::MIN)
	}
}

impl Handle for GenHandle {
	type Meta = GenMeta;

	fn occupy(slot: u32, meta: &mut Self::Meta) -> Self {
		Self { slot, gen: meta.0 }
	}

	fn release(meta: &mut Self::Meta) {
		// Wrapping back to 1 after four billion reuses of one slot is accepted.
		meta.0 = meta.0.checked_add(1).unwrap_or(NonZeroU32::MIN);
	}

	fn is_valid(&self, meta: &Self::Meta) -> bool {
		self.gen == meta.0
	}

	fn slot(&self) -> u32 {
		self.slot
	}
}

impl Rebuild for GenHandle {
	fn rebuild(slot: u32, meta: &Self::Meta) -> Self {
		Self { slot, gen: meta.0 }
	}
}
