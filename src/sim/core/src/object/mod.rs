use std::{any::Any, fmt};

use torque_util::mem::free_list::GenHandle;

use crate::sim::Sim;

pub mod ids;
pub mod notify;

// === SimObjectId === //

/// The numeric identity of a registered object. The value space is partitioned into disjoint ranges
/// (see [`IdRange`]); `0` is never issued and [`SimObjectId::ROOT_GROUP`] is reserved.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SimObjectId(pub u32);

impl SimObjectId {
	pub const INVALID: Self = Self(0);
	pub const ROOT_GROUP: Self = Self(u32::MAX);

	pub fn raw(self) -> u32 {
		self.0
	}

	pub fn is_valid(self) -> bool {
		self != Self::INVALID
	}

	pub fn range(self) -> Option<IdRange> {
		IdRange::ALL.into_iter().find(|range| range.contains(self))
	}
}

impl fmt::Display for SimObjectId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

pub const DATABLOCK_ID_BIT_SIZE: u32 = 14;
pub const DATABLOCK_ID_FIRST: u32 = 3;
pub const DATABLOCK_ID_LAST: u32 = DATABLOCK_ID_FIRST + (1 << DATABLOCK_ID_BIT_SIZE) - 1;

pub const MESSAGE_ID_BIT_SIZE: u32 = 6;
pub const MESSAGE_ID_FIRST: u32 = DATABLOCK_ID_LAST + 1;
pub const MESSAGE_ID_LAST: u32 = MESSAGE_ID_FIRST + (1 << MESSAGE_ID_BIT_SIZE) - 1;

pub const DYNAMIC_ID_FIRST: u32 = MESSAGE_ID_LAST + 1;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum IdRange {
	/// Shared configuration objects. IDs are recycled.
	DataBlock,
	/// Short-lived message objects. IDs are recycled.
	Message,
	/// Everything else. IDs are issued monotonically and never reused.
	Dynamic,
}

impl IdRange {
	pub const ALL: [Self; 3] = [Self::DataBlock, Self::Message, Self::Dynamic];

	pub fn first(self) -> u32 {
		match self {
			Self::DataBlock => DATABLOCK_ID_FIRST,
			Self::Message => MESSAGE_ID_FIRST,
			Self::Dynamic => DYNAMIC_ID_FIRST,
		}
	}

	pub fn last(self) -> u32 {
		match self {
			Self::DataBlock => DATABLOCK_ID_LAST,
			Self::Message => MESSAGE_ID_LAST,
			Self::Dynamic => SimObjectId::ROOT_GROUP.0 - 1,
		}
	}

	pub fn contains(self, id: SimObjectId) -> bool {
		(self.first()..=self.last()).contains(&id.0)
	}
}

// === ObjectRef === //

/// A weak, generation-checked reference to an object slot. It never keeps the object alive and
/// stops resolving once the object is deleted, even if the slot is later reused.
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ObjectRef(pub(crate) GenHandle);

impl fmt::Debug for ObjectRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ObjectRef({:?})", self.0)
	}
}

// === Flags === //

pub mod flags {
	pub const DELETED: u32 = 1 << 0;
	pub const REMOVED: u32 = 1 << 1;
	pub const ADDED: u32 = 1 << 2;
	pub const SELECTED: u32 = 1 << 3;
	pub const EXPANDED: u32 = 1 << 4;
	pub const MOD_STATIC_FIELDS: u32 = 1 << 5;
	pub const MOD_DYNAMIC_FIELDS: u32 = 1 << 6;
	pub const AUTO_DELETE: u32 = 1 << 7;
	pub const CANNOT_SAVE: u32 = 1 << 8;
	pub const EDITOR_ONLY: u32 = 1 << 9;
	pub const NO_NAME_CHANGE: u32 = 1 << 10;
	pub const HIDDEN: u32 = 1 << 11;
	pub const LOCKED: u32 = 1 << 12;
}

// === ConsoleObject === //

pub trait AsAny: Any {
	fn as_any(&self) -> &dyn Any;

	fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
	fn as_any(&self) -> &dyn Any {
		self
	}

	fn as_any_mut(&mut self) -> &mut dyn Any {
		self
	}
}

/// The class-specific half of an object. The runtime owns identity, names, flags, group membership
/// and dynamic fields; the body owns the static field storage and reacts to lifecycle hooks.
///
/// Inheritance is expressed by composition: a body embeds its parent class's body and exposes it
/// through [`ConsoleObject::parent`], which is how fields declared on an ancestor class find their
/// storage.
pub trait ConsoleObject: AsAny + Send {
	/// Called once registration has assigned an ID and inserted the object into the dictionaries.
	/// Returning `false` rejects the registration.
	///
	/// The body is detached from its slot for the duration of every hook.
	fn on_add(&mut self, cx: &mut ObjectCx<'_>) -> bool {
		let _ = cx;
		true
	}

	fn on_remove(&mut self, cx: &mut ObjectCx<'_>) {
		let _ = cx;
	}

	/// Called when an object this one subscribed to with `delete_notify` is unregistered.
	fn on_delete_notify(&mut self, cx: &mut ObjectCx<'_>, dead: ObjectRef) {
		let _ = (cx, dead);
	}

	fn on_group_add(&mut self, cx: &mut ObjectCx<'_>, group: ObjectRef) {
		let _ = (cx, group);
	}

	fn on_group_remove(&mut self, cx: &mut ObjectCx<'_>, group: ObjectRef) {
		let _ = (cx, group);
	}

	fn parent(&self) -> Option<&dyn ConsoleObject> {
		None
	}

	fn parent_mut(&mut self) -> Option<&mut dyn ConsoleObject> {
		None
	}
}

/// Walks the composition chain of `obj` looking for a body of type `T`.
pub fn resolve<T: 'static>(obj: &dyn ConsoleObject) -> Option<&T> {
	let mut curr = Some(obj);
	while let Some(body) = curr {
		if let Some(found) = body.as_any().downcast_ref::<T>() {
			return Some(found);
		}
		curr = body.parent();
	}
	None
}

pub fn resolve_mut<T: 'static>(obj: &mut dyn ConsoleObject) -> Option<&mut T> {
	if (*obj).as_any().is::<T>() {
		return obj.as_any_mut().downcast_mut::<T>();
	}
	resolve_mut::<T>(obj.parent_mut()?)
}

pub struct ObjectCx<'a> {
	pub sim: &'a mut Sim,
	pub this: ObjectRef,
}
