//! Ordered object containers.
//!
//! A `SimSet` references its members; an object may belong to any number of sets, and a set learns
//! about a member's death through a delete notification. A `SimGroup` owns its members: an object is
//! in at most one group, and each group keeps a private name dictionary in sync with its member list.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use thiserror::Error;
use torque_util::{
	debug::error::ResultExt,
	mem::{hash::FxHashSet, intern::StringHandle},
};

use crate::{
	class::ContainerKind,
	dict::NameDictionary,
	object::{flags, resolve, ObjectRef},
	sim::Sim,
};

pub mod signal;

pub use signal::{ConnectionHandle, Signal};

// === SetData === //

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SetChange {
	Added(ObjectRef),
	Removed(ObjectRef),
	Cleared,
	Reordered(ObjectRef),
}

#[derive(Debug)]
pub(crate) struct SetData {
	pub kind: ContainerKind,
	pub members: Vec<ObjectRef>,
	pub names: Option<NameDictionary>,
	pub lock: ReentrantMutex<()>,
	pub signal: Signal<SetChange>,
}

impl SetData {
	pub fn new(kind: ContainerKind, name_table_size: usize) -> Self {
		Self {
			kind,
			members: Vec::new(),
			names: (kind == ContainerKind::Group).then(|| NameDictionary::new(name_table_size)),
			lock: ReentrantMutex::new(()),
			signal: Signal::default(),
		}
	}

	pub fn position(&self, obj: ObjectRef) -> Option<usize> {
		self.members.iter().position(|&member| member == obj)
	}

	pub fn remove_member(&mut self, obj: ObjectRef) -> bool {
		match self.position(obj) {
			Some(index) => {
				self.members.remove(index);
				true
			}
			None => false,
		}
	}
}

// === Operations === //

impl Sim {
	fn set_data(&self, set: ObjectRef) -> Option<&SetData> {
		self.slot(set)?.set.as_ref()
	}

	fn set_data_mut(&mut self, set: ObjectRef) -> Result<&mut SetData, SetError> {
		self.slot_mut(set)
			.ok_or(SetError::DeadObject)?
			.set
			.as_mut()
			.ok_or(SetError::NotASet)
	}

	fn fire_set_change(&mut self, set: ObjectRef, change: SetChange) {
		if let Ok(data) = self.set_data_mut(set) {
			data.signal.fire(&change);
		}
	}

	pub fn is_set(&self, obj: ObjectRef) -> bool {
		self.set_data(obj).is_some()
	}

	pub fn is_group(&self, obj: ObjectRef) -> bool {
		self.set_data(obj)
			.map_or(false, |data| data.kind == ContainerKind::Group)
	}

	/// Appends `obj` to the container. Adding to a group first removes the object from its previous
	/// group. Adding an existing member does nothing.
	pub fn add_object(&mut self, set: ObjectRef, obj: ObjectRef) -> Result<(), SetError> {
		if !self.is_alive(obj) {
			return Err(SetError::DeadObject);
		}

		let kind = self.set_data_mut(set)?.kind;
		if self.contains(set, obj) {
			return Ok(());
		}

		match kind {
			ContainerKind::Set => {
				if set == obj {
					return Err(SetError::Cycle);
				}

				self.set_data_mut(set)?.members.push(obj);
				self.delete_notify(obj, set);
			}
			ContainerKind::Group => {
				// A group may not end up inside itself.
				let mut ancestor = Some(set);
				while let Some(curr) = ancestor {
					if curr == obj {
						return Err(SetError::Cycle);
					}
					ancestor = self.group_of(curr);
				}

				if let Some(prev) = self.group_of(obj) {
					self.remove_object(prev, obj)?;
				}

				self.set_data_mut(set)?.members.push(obj);
				self.attach_to_group(set, obj);
			}
		}

		self.fire_set_change(set, SetChange::Added(obj));
		Ok(())
	}

	fn attach_to_group(&mut self, group: ObjectRef, obj: ObjectRef) {
		let Some(slot) = self.slot_mut(obj) else {
			return;
		};
		slot.group = Some(group);
		let name = slot.name;

		if let Some(name) = name {
			self.group_dict_insert(group, name, obj);
		}

		self.with_body(obj, |body, cx| body.on_group_add(cx, group));
	}

	fn group_dict_insert(&mut self, group: ObjectRef, name: StringHandle, obj: ObjectRef) {
		let Some(dict) = self.set_data(group).and_then(|data| data.names.as_ref()) else {
			return;
		};

		if let Some(shadowed) = dict.insert(name, obj) {
			if self.config.objects.warn_on_duplicate_names && shadowed != obj {
				log::warn!(
					"Group {} already has an object named {:?}; the newer one shadows it.",
					self.display_name(group),
					self.shared.strings.resolve(name),
				);
			}
		}
	}

	/// Keeps a group's private dictionary in sync with a member's rename.
	pub(crate) fn group_rename(
		&mut self,
		group: ObjectRef,
		obj: ObjectRef,
		old_name: Option<StringHandle>,
		new_name: Option<StringHandle>,
	) {
		if let Some(dict) = self.set_data(group).and_then(|data| data.names.as_ref()) {
			if let Some(old_name) = old_name {
				dict.remove(old_name, obj);
			}
		}

		if let Some(new_name) = new_name {
			self.group_dict_insert(group, new_name, obj);
		}
	}

	pub fn remove_object(&mut self, set: ObjectRef, obj: ObjectRef) -> Result<(), SetError> {
		let data = self.set_data_mut(set)?;
		let kind = data.kind;

		if !data.remove_member(obj) {
			return Err(SetError::NotMember);
		}

		match kind {
			ContainerKind::Set => self.clear_notify(obj, set),
			ContainerKind::Group => self.detach_from_group(set, obj),
		}

		self.fire_set_change(set, SetChange::Removed(obj));
		Ok(())
	}

	fn detach_from_group(&mut self, group: ObjectRef, obj: ObjectRef) {
		let Some(slot) = self.slot_mut(obj) else {
			return;
		};
		slot.group = None;
		let name = slot.name;

		if let (Some(name), Some(dict)) = (
			name,
			self.set_data(group).and_then(|data| data.names.as_ref()),
		) {
			dict.remove(name, obj);
		}

		self.with_body(obj, |body, cx| body.on_group_remove(cx, group));
	}

	/// Adds `obj` or, if it is already a member, moves it to the back.
	pub fn push_object(&mut self, set: ObjectRef, obj: ObjectRef) -> Result<(), SetError> {
		if self.contains(set, obj) {
			self.push_to_back(set, obj)
		} else {
			self.add_object(set, obj)
		}
	}

	/// Removes and returns the last member.
	pub fn pop_object(&mut self, set: ObjectRef) -> Option<ObjectRef> {
		let last = self.last(set)?;
		self.remove_object(set, last).ok()?;
		Some(last)
	}

	pub fn bring_to_front(&mut self, set: ObjectRef, obj: ObjectRef) -> Result<(), SetError> {
		let first = self.first(set);
		if first == Some(obj) {
			return Ok(());
		}
		self.re_order(set, obj, first)
	}

	pub fn push_to_back(&mut self, set: ObjectRef, obj: ObjectRef) -> Result<(), SetError> {
		self.re_order(set, obj, None)
	}

	/// Moves `obj` in front of `target`, or to the back when `target` is `None`. Both must be
	/// members; otherwise the container is left untouched.
	pub fn re_order(
		&mut self,
		set: ObjectRef,
		obj: ObjectRef,
		target: Option<ObjectRef>,
	) -> Result<(), SetError> {
		let data = self.set_data_mut(set)?;
		let from = data.position(obj).ok_or(SetError::NotMember)?;

		if let Some(target) = target {
			data.position(target).ok_or(SetError::NotMember)?;
		}

		if target == Some(obj) {
			return Ok(());
		}

		data.members.remove(from);
		let to = match target {
			Some(target) => data.position(target).unwrap_or(data.members.len()),
			None => data.members.len(),
		};
		data.members.insert(to, obj);

		data.signal.fire(&SetChange::Reordered(obj));
		Ok(())
	}

	/// Removes every member without deleting any of them.
	pub fn clear(&mut self, set: ObjectRef) -> Result<(), SetError> {
		while let Some(last) = self.last(set) {
			self.remove_object(set, last)?;
		}

		self.fire_set_change(set, SetChange::Cleared);
		Ok(())
	}

	pub fn delete_all_objects(&mut self, set: ObjectRef) -> Result<(), SetError> {
		let members = self.members(set).to_vec();

		for member in members {
			if self.is_alive(member) {
				self.delete_object(member).log_warn();
			}
		}

		// Group members leave through unregistration, set members through delete notification,
		// but unregistered members have to be evicted here.
		self.clear(set)
	}

	/// Empties a container that is being unregistered. Group members flagged
	/// [`flags::AUTO_DELETE`] are deleted; the rest are detached.
	pub(crate) fn teardown_set(&mut self, set: ObjectRef) {
		let Some(data) = self.set_data(set) else {
			return;
		};
		let kind = data.kind;
		let members = data.members.clone();

		for member in members.into_iter().rev() {
			if let Ok(data) = self.set_data_mut(set) {
				if !data.remove_member(member) {
					// Already evicted by an earlier child's teardown.
					continue;
				}
			}

			match kind {
				ContainerKind::Set => self.clear_notify(member, set),
				ContainerKind::Group => {
					self.detach_from_group(set, member);

					if self.test_flag(member, flags::AUTO_DELETE) {
						self.delete_object(member).log_warn();
					}
				}
			}
		}

		self.fire_set_change(set, SetChange::Cleared);
	}

	// === Queries === //

	pub fn contains(&self, set: ObjectRef, obj: ObjectRef) -> bool {
		self.set_data(set)
			.map_or(false, |data| data.position(obj).is_some())
	}

	pub fn size(&self, set: ObjectRef) -> usize {
		self.set_data(set).map_or(0, |data| data.members.len())
	}

	pub fn at(&self, set: ObjectRef, index: usize) -> Option<ObjectRef> {
		self.set_data(set)?.members.get(index).copied()
	}

	pub fn first(&self, set: ObjectRef) -> Option<ObjectRef> {
		self.set_data(set)?.members.first().copied()
	}

	pub fn last(&self, set: ObjectRef) -> Option<ObjectRef> {
		self.set_data(set)?.members.last().copied()
	}

	pub fn members(&self, set: ObjectRef) -> &[ObjectRef] {
		self.set_data(set)
			.map_or(&[][..], |data| data.members.as_slice())
	}

	/// Takes the container's recursive lock. Searches hold it while scanning the container's own
	/// members.
	pub fn lock_set(&self, set: ObjectRef) -> Option<ReentrantMutexGuard<'_, ()>> {
		Some(self.set_data(set)?.lock.lock())
	}

	pub fn connect_set_listener(
		&mut self,
		set: ObjectRef,
		listener: impl FnMut(&SetChange) + Send + 'static,
	) -> Result<ConnectionHandle, SetError> {
		Ok(self.set_data_mut(set)?.signal.connect(listener))
	}

	pub fn disconnect_set_listener(&mut self, set: ObjectRef, conn: ConnectionHandle) -> bool {
		self.set_data_mut(set)
			.map_or(false, |data| data.signal.disconnect(conn))
	}

	// === Search === //

	/// Visits `set`'s members depth-first. Each level's members are scanned under that level's lock,
	/// which is released before descending into the child containers.
	///
	/// Sets may contain each other, so every object is visited, and every container descended into,
	/// at most once per walk.
	fn walk_set(
		&self,
		set: ObjectRef,
		recursive: bool,
		visit: &mut dyn FnMut(ObjectRef) -> bool,
	) -> Option<ObjectRef> {
		let mut seen = FxHashSet::default();
		seen.insert(set);
		self.walk_set_inner(set, recursive, &mut seen, visit)
	}

	fn walk_set_inner(
		&self,
		set: ObjectRef,
		recursive: bool,
		seen: &mut FxHashSet<ObjectRef>,
		visit: &mut dyn FnMut(ObjectRef) -> bool,
	) -> Option<ObjectRef> {
		let data = self.set_data(set)?;

		let children = {
			let _guard = data.lock.lock();
			let mut children = Vec::new();

			for &member in &data.members {
				if !seen.insert(member) {
					continue;
				}
				if visit(member) {
					return Some(member);
				}
				if recursive && self.is_set(member) {
					children.push(member);
				}
			}

			children
		};

		children
			.into_iter()
			.find_map(|child| self.walk_set_inner(child, true, seen, visit))
	}

	/// Every object below `set` whose body is, or derives from, `T`.
	pub fn find_object_by_type<T: 'static>(&self, set: ObjectRef) -> Vec<ObjectRef> {
		self.find_object_by_callback(set, |sim, obj| {
			sim.slot(obj)
				.and_then(|slot| slot.body.as_deref())
				.map_or(false, |body| resolve::<T>(body).is_some())
		})
	}

	/// Every object below `set` accepted by `filter`.
	pub fn find_object_by_callback(
		&self,
		set: ObjectRef,
		mut filter: impl FnMut(&Sim, ObjectRef) -> bool,
	) -> Vec<ObjectRef> {
		let mut found = Vec::new();
		self.walk_set(set, true, &mut |obj| {
			if filter(self, obj) {
				found.push(obj);
			}
			false
		});
		found
	}

	pub fn find_object_by_internal_name(
		&self,
		set: ObjectRef,
		name: &str,
		recursive: bool,
	) -> Option<ObjectRef> {
		let handle = self.shared.strings.lookup(name)?;

		self.walk_set(set, recursive, &mut |obj| {
			self.slot(obj)
				.map_or(false, |slot| slot.internal_name == Some(handle))
		})
	}

	/// Finds a direct member by name, through the private dictionary for groups.
	pub fn find_child(&self, set: ObjectRef, name: &str) -> Option<ObjectRef> {
		let data = self.set_data(set)?;
		let handle = self.shared.strings.lookup(name)?;

		match &data.names {
			Some(dict) => dict.find(handle).filter(|&obj| self.is_alive(obj)),
			None => data
				.members
				.iter()
				.copied()
				.find(|&obj| self.slot(obj).map_or(false, |slot| slot.name == Some(handle))),
		}
	}
}

// === Error types === //

#[derive(Debug, Clone, Error)]
pub enum SetError {
	#[error("object is not alive")]
	DeadObject,
	#[error("object is not a container")]
	NotASet,
	#[error("object is not a member of the container")]
	NotMember,
	#[error("a container cannot contain itself")]
	Cycle,
}
