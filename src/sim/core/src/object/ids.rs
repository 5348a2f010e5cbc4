use super::{IdRange, SimObjectId, DYNAMIC_ID_FIRST};

/// Issues object IDs. Datablock and message IDs come from bounded occupancy tables and are reused
/// once released; dynamic IDs only ever count upwards.
#[derive(Debug)]
pub(crate) struct IdAllocator {
	next_dynamic: u32,
	datablocks: RecycledRange,
	messages: RecycledRange,
}

impl Default for IdAllocator {
	fn default() -> Self {
		Self {
			next_dynamic: DYNAMIC_ID_FIRST,
			datablocks: RecycledRange::new(IdRange::DataBlock),
			messages: RecycledRange::new(IdRange::Message),
		}
	}
}

impl IdAllocator {
	/// Returns the next free candidate in `range`. `in_use` is consulted so that IDs taken by forced
	/// registrations are skipped.
	pub fn allocate(
		&mut self,
		range: IdRange,
		mut in_use: impl FnMut(SimObjectId) -> bool,
	) -> Option<SimObjectId> {
		match range {
			IdRange::DataBlock => self.datablocks.allocate(in_use),
			IdRange::Message => self.messages.allocate(in_use),
			IdRange::Dynamic => loop {
				if self.next_dynamic > IdRange::Dynamic.last() {
					return None;
				}

				let id = SimObjectId(self.next_dynamic);
				self.next_dynamic += 1;

				if !in_use(id) {
					break Some(id);
				}
			},
		}
	}

	/// Marks an explicitly chosen ID as taken so that the recycling tables never hand it out.
	pub fn claim(&mut self, id: SimObjectId) {
		match id.range() {
			Some(IdRange::DataBlock) => self.datablocks.set(id, true),
			Some(IdRange::Message) => self.messages.set(id, true),
			_ => {}
		}
	}

	pub fn release(&mut self, id: SimObjectId) {
		match id.range() {
			Some(IdRange::DataBlock) => self.datablocks.set(id, false),
			Some(IdRange::Message) => self.messages.set(id, false),
			_ => {}
		}
	}
}

#[derive(Debug)]
struct RecycledRange {
	first: u32,
	occupied: Vec<bool>,
	cursor: usize,
}

impl RecycledRange {
	fn new(range: IdRange) -> Self {
		Self {
			first: range.first(),
			occupied: vec![false; (range.last() - range.first() + 1) as usize],
			cursor: 0,
		}
	}

	fn allocate(&mut self, mut in_use: impl FnMut(SimObjectId) -> bool) -> Option<SimObjectId> {
		let len = self.occupied.len();

		for offset in 0..len {
			let index = (self.cursor + offset) % len;
			if self.occupied[index] {
				continue;
			}

			let id = SimObjectId(self.first + index as u32);
			if in_use(id) {
				self.occupied[index] = true;
				continue;
			}

			self.occupied[index] = true;
			self.cursor = (index + 1) % len;
			return Some(id);
		}

		None
	}

	fn set(&mut self, id: SimObjectId, occupied: bool) {
		let index = (id.0 - self.first) as usize;
		self.occupied[index] = occupied;
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::object::{DATABLOCK_ID_FIRST, MESSAGE_ID_FIRST, MESSAGE_ID_LAST};

	#[test]
	fn dynamic_ids_are_monotonic() {
		let mut alloc = IdAllocator::default();
		let a = alloc.allocate(IdRange::Dynamic, |_| false).unwrap();
		let b = alloc.allocate(IdRange::Dynamic, |_| false).unwrap();
		alloc.release(a);
		let c = alloc.allocate(IdRange::Dynamic, |id| id.0 == DYNAMIC_ID_FIRST + 2).unwrap();

		assert_eq!(a.0, DYNAMIC_ID_FIRST);
		assert_eq!(b.0, DYNAMIC_ID_FIRST + 1);
		assert_eq!(c.0, DYNAMIC_ID_FIRST + 3);
	}

	#[test]
	fn datablock_ids_are_recycled() {
		let mut alloc = IdAllocator::default();
		let a = alloc.allocate(IdRange::DataBlock, |_| false).unwrap();
		let b = alloc.allocate(IdRange::DataBlock, |_| false).unwrap();
		assert_eq!(a.0, DATABLOCK_ID_FIRST);
		assert_eq!(b.0, DATABLOCK_ID_FIRST + 1);

		alloc.claim(SimObjectId(DATABLOCK_ID_FIRST + 2));
		alloc.release(a);

		// The cursor keeps moving forward before wrapping around to reuse `a`.
		let c = alloc.allocate(IdRange::DataBlock, |_| false).unwrap();
		assert_eq!(c.0, DATABLOCK_ID_FIRST + 3);
	}

	#[test]
	fn message_range_exhausts() {
		let mut alloc = IdAllocator::default();
		let count = MESSAGE_ID_LAST - MESSAGE_ID_FIRST + 1;

		for _ in 0..count {
			assert!(alloc.allocate(IdRange::Message, |_| false).is_some());
		}
		assert_eq!(alloc.allocate(IdRange::Message, |_| false), None);

		alloc.release(SimObjectId(MESSAGE_ID_FIRST + 5));
		assert_eq!(
			alloc.allocate(IdRange::Message, |_| false),
			Some(SimObjectId(MESSAGE_ID_FIRST + 5))
		);
	}
}
