//! The runtime: object storage, registration, names, fields and delete notifications.

use std::{any::TypeId, fmt, sync::Arc};

use thiserror::Error;
use torque_util::{
	debug::error::ResultExt,
	mem::{
		bitset::BitSet32,
		free_list::{FreeList, GenHandle},
		hash::FxHashMap,
		intern::{StringHandle, StringTable},
	},
};

use crate::{
	class::{
		builtin::SimGroupBody, ClassId, ClassTable, ConcreteClass, FieldError, FieldType, FieldValue,
	},
	config::{ConfigError, RuntimeConfig},
	dict::{IdDictionary, ManagerNameDictionary},
	event::{EventId, EventQueue, EventTarget, SimEvent, SimTime},
	object::{
		flags, ids::IdAllocator, notify::{NotifyKind, NotifyList, NotifyPool}, resolve, resolve_mut,
		ConsoleObject, IdRange, ObjectCx, ObjectRef, SimObjectId,
	},
	set::{SetChange, SetData},
};

// === Shared state === //

/// The part of the runtime auxiliary threads may touch. Every member is internally locked.
#[derive(Debug)]
pub struct SimShared {
	pub(crate) strings: StringTable,
	pub(crate) ids: IdDictionary,
	pub(crate) names: ManagerNameDictionary,
	pub(crate) events: EventQueue,
}

/// A cloneable, thread-safe view of a [`Sim`] supporting lookups and event posting.
///
/// Lookups return [`ObjectRef`]s, which can only be dereferenced through the `Sim` itself.
#[derive(Debug, Clone)]
pub struct SimHandle(Arc<SimShared>);

impl SimHandle {
	pub fn find_object_by_id(&self, id: SimObjectId) -> Option<ObjectRef> {
		self.0.ids.find(id)
	}

	pub fn find_object_by_name(&self, name: &str) -> Option<ObjectRef> {
		self.0.names.find(self.0.strings.lookup(name)?)
	}

	/// Posts `event` to the object currently registered under `id`. Returns `None` if there is none.
	pub fn post_event_to_id(
		&self,
		id: SimObjectId,
		event: impl SimEvent,
		time: SimTime,
	) -> Option<EventId> {
		let target = self.0.ids.find(id)?;
		Some(self.0.events.post(EventTarget::Object(target), Box::new(event), time))
	}

	pub fn post_root_event(&self, event: impl SimEvent, time: SimTime) -> EventId {
		self.0.events.post(EventTarget::Root, Box::new(event), time)
	}

	pub fn cancel_event(&self, id: EventId) -> bool {
		self.0.events.cancel(id)
	}

	pub fn is_event_pending(&self, id: EventId) -> bool {
		self.0.events.is_pending(id)
	}

	pub fn current_time(&self) -> SimTime {
		self.0.events.current_time()
	}
}

// === ObjectSlot === //

pub(crate) struct ObjectSlot {
	pub class: ClassId,
	pub id: SimObjectId,
	pub id_string: String,
	pub name: Option<StringHandle>,
	pub internal_name: Option<StringHandle>,
	pub original_name: Option<StringHandle>,
	pub flags: BitSet32,
	pub group: Option<ObjectRef>,
	pub dynamic_fields: FxHashMap<StringHandle, String>,
	pub notify: NotifyList,
	pub set: Option<SetData>,

	/// Detached while one of the body's hooks runs.
	pub body: Option<Box<dyn ConsoleObject>>,
}

impl ObjectSlot {
	pub fn is_registered(&self) -> bool {
		self.id.is_valid()
	}
}

// === Sim === //

pub struct Sim {
	pub(crate) shared: Arc<SimShared>,
	pub(crate) classes: ClassTable,
	pub(crate) objects: FreeList<ObjectSlot, GenHandle>,
	pub(crate) notify: NotifyPool,
	id_alloc: IdAllocator,
	forced_next_id: Option<SimObjectId>,
	root_group: ObjectRef,
	pub(crate) config: RuntimeConfig,
}

impl fmt::Debug for Sim {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Sim")
			.field("objects", &self.objects.len())
			.field("classes", &self.classes.len())
			.field("time", &self.current_time())
			.finish_non_exhaustive()
	}
}

impl Sim {
	/// Boots a runtime and registers its root group under [`SimObjectId::ROOT_GROUP`] with the name
	/// `RootGroup`.
	pub fn new(classes: ClassTable, config: RuntimeConfig) -> Result<Self, SimError> {
		config.validate()?;

		let dicts = &config.dictionaries;
		let shared = Arc::new(SimShared {
			strings: StringTable::new(),
			ids: IdDictionary::new(dicts.id_table_size),
			names: ManagerNameDictionary::new(dicts.name_table_size),
			events: EventQueue::new(config.scheduler.start_time),
		});

		let group_class = classes
			.find_class_by_type(TypeId::of::<SimGroupBody>())
			.ok_or(RegisterError::UnknownClass("SimGroup".to_string()))?;

		let mut objects = FreeList::new();
		let root_body = classes.get(group_class).create();
		let (_, root) = objects.add(new_slot(&classes, &config, group_class, root_body));
		let root = ObjectRef(root);

		let mut sim = Self {
			shared,
			classes,
			objects,
			notify: NotifyPool::default(),
			id_alloc: IdAllocator::default(),
			forced_next_id: None,
			root_group: root,
			config,
		};

		sim.assign_name(root, Some("RootGroup"));
		sim.register_object_with_id(root, SimObjectId::ROOT_GROUP)?;

		log::debug!("Sim runtime started with {} classes.", sim.classes.len());
		Ok(sim)
	}

	/// Deletes every remaining object, the root group last, and hands back the class table.
	pub fn shutdown(mut self) -> ClassTable {
		let root = self.root_group;
		let objects = self
			.live_objects()
			.filter(|&obj| obj != root)
			.collect::<Vec<_>>();

		for obj in objects {
			// Earlier deletions may have cascaded to this one.
			if self.is_alive(obj) {
				self.delete_object(obj).log_warn();
			}
		}
		self.delete_object(root).log_warn();

		log::debug!(
			"Sim runtime shut down with {} events still pending.",
			self.pending_count()
		);
		self.classes
	}

	pub fn handle(&self) -> SimHandle {
		SimHandle(self.shared.clone())
	}

	pub fn classes(&self) -> &ClassTable {
		&self.classes
	}

	pub fn config(&self) -> &RuntimeConfig {
		&self.config
	}

	pub fn strings(&self) -> &StringTable {
		&self.shared.strings
	}

	pub fn root_group(&self) -> ObjectRef {
		self.root_group
	}

	// === Creation === //

	/// Instantiates the class named `class_name` through its factory. The object starts out
	/// unregistered.
	pub fn create(&mut self, class_name: &str) -> Option<ObjectRef> {
		let class = self.classes.find_class(class_name)?;
		Some(self.create_class(class))
	}

	pub fn create_class(&mut self, class: ClassId) -> ObjectRef {
		let body = self.classes.get(class).create();
		self.insert_slot(class, body)
	}

	/// Wraps an already constructed body. Its type must be a registered class.
	pub fn create_object<T: ConcreteClass>(&mut self, body: T) -> Result<ObjectRef, RegisterError> {
		let class = self
			.classes
			.find_class_by_type(TypeId::of::<T>())
			.ok_or(RegisterError::UnknownClass(T::NAME.to_string()))?;

		Ok(self.insert_slot(class, Box::new(body)))
	}

	fn insert_slot(&mut self, class: ClassId, body: Box<dyn ConsoleObject>) -> ObjectRef {
		let slot = new_slot(&self.classes, &self.config, class, body);
		ObjectRef(self.objects.add(slot).1)
	}

	// === Slot access === //

	pub(crate) fn slot(&self, obj: ObjectRef) -> Option<&ObjectSlot> {
		self.objects.try_get(obj.0)
	}

	pub(crate) fn slot_mut(&mut self, obj: ObjectRef) -> Option<&mut ObjectSlot> {
		self.objects.try_get_mut(obj.0)
	}

	/// Runs `f` with the object's body detached from its slot so that the body can call back into
	/// the runtime. Returns `None` if the object is dead or its body is already detached.
	pub(crate) fn with_body<R>(
		&mut self,
		obj: ObjectRef,
		f: impl FnOnce(&mut dyn ConsoleObject, &mut ObjectCx<'_>) -> R,
	) -> Option<R> {
		let mut body = self.slot_mut(obj)?.body.take()?;
		let result = f(&mut *body, &mut ObjectCx { sim: self, this: obj });

		// The object may have been deleted by its own hook, in which case the body is dropped here.
		if let Some(slot) = self.slot_mut(obj) {
			slot.body = Some(body);
		}

		Some(result)
	}

	pub fn body<T: 'static>(&self, obj: ObjectRef) -> Option<&T> {
		resolve::<T>(self.slot(obj)?.body.as_deref()?)
	}

	pub fn body_mut<T: 'static>(&mut self, obj: ObjectRef) -> Option<&mut T> {
		resolve_mut::<T>(self.slot_mut(obj)?.body.as_deref_mut()?)
	}

	pub fn is_alive(&self, obj: ObjectRef) -> bool {
		self.objects.contains(obj.0)
	}

	/// Registered objects are discoverable by ID and name.
	pub fn is_registered(&self, obj: ObjectRef) -> bool {
		self.slot(obj).map_or(false, ObjectSlot::is_registered)
	}

	pub fn object_count(&self) -> usize {
		self.objects.len()
	}

	pub fn live_objects(&self) -> impl Iterator<Item = ObjectRef> + '_ {
		self.objects.iter().map(|(handle, _)| ObjectRef(handle))
	}

	// === Registration === //

	/// Makes the next dynamically registered object take `id` instead of allocating one.
	pub fn force_next_id(&mut self, id: SimObjectId) {
		self.forced_next_id = Some(id);
	}

	pub fn register_object(&mut self, obj: ObjectRef) -> Result<SimObjectId, RegisterError> {
		let forced = self.forced_next_id.take();
		let result = self.register_inner(obj, forced);

		// A forced ID stays pending if the object was never in a position to take it.
		if let Err(RegisterError::DeadObject | RegisterError::AlreadyRegistered(_)) = result {
			self.forced_next_id = self.forced_next_id.or(forced);
		}

		result
	}

	pub fn register_object_with_id(
		&mut self,
		obj: ObjectRef,
		id: SimObjectId,
	) -> Result<SimObjectId, RegisterError> {
		self.register_inner(obj, Some(id))
	}

	pub fn register_object_named(
		&mut self,
		obj: ObjectRef,
		name: &str,
	) -> Result<SimObjectId, RegisterError> {
		let slot = self.slot(obj).ok_or(RegisterError::DeadObject)?;
		if slot.is_registered() {
			log::error!("Object {} was registered twice.", slot.id);
			return Err(RegisterError::AlreadyRegistered(slot.id));
		}

		self.assign_name(obj, Some(name));
		self.register_object(obj)
	}

	fn register_inner(
		&mut self,
		obj: ObjectRef,
		requested: Option<SimObjectId>,
	) -> Result<SimObjectId, RegisterError> {
		let slot = self.slot(obj).ok_or(RegisterError::DeadObject)?;
		if slot.is_registered() {
			log::error!("Object {} was registered twice.", slot.id);
			return Err(RegisterError::AlreadyRegistered(slot.id));
		}

		let name = slot.name;
		let range = self.classes.get(slot.class).id_range();

		let id = match requested {
			Some(id) => {
				if !id.is_valid() {
					return Err(RegisterError::InvalidId(id));
				}
				if self.shared.ids.contains(id) {
					log::error!("Object ID {id} is already in use.");
					return Err(RegisterError::IdInUse(id));
				}
				self.id_alloc.claim(id);
				id
			}
			None => {
				let shared = &self.shared;
				self.id_alloc
					.allocate(range, |id| shared.ids.contains(id))
					.ok_or(RegisterError::IdRangeExhausted(range))?
			}
		};

		let slot = self.objects.get_mut(obj.0);
		slot.id = id;
		slot.id_string = id.to_string();
		slot.flags.clear(flags::REMOVED);

		self.shared.ids.insert(id, obj);
		if let Some(name) = name {
			self.shared.names.insert(name, obj);
		}

		let accepted = self
			.with_body(obj, |body, cx| body.on_add(cx))
			.unwrap_or(false);

		if !accepted || !self.is_registered(obj) {
			log::warn!("Object {id} rejected its registration.");
			if self.is_registered(obj) {
				self.unregister_inner(obj, false).log_error();
			}
			return Err(RegisterError::AddRejected(id));
		}

		self.objects.get_mut(obj.0).flags.set(flags::ADDED);
		log::trace!("Registered object {id}.");
		Ok(id)
	}

	pub fn unregister_object(&mut self, obj: ObjectRef) -> Result<(), RegisterError> {
		self.unregister_inner(obj, true)
	}

	fn unregister_inner(&mut self, obj: ObjectRef, run_on_remove: bool) -> Result<(), RegisterError> {
		let slot = self.slot_mut(obj).ok_or(RegisterError::DeadObject)?;
		if !slot.is_registered() {
			log::error!("Attempted to unregister an object that was never registered.");
			return Err(RegisterError::NotRegistered);
		}
		if slot.flags.test(flags::REMOVED) {
			// A hook re-entered while the object is on its way out.
			return Ok(());
		}
		slot.flags.set(flags::REMOVED);
		let id = slot.id;

		if run_on_remove {
			self.with_body(obj, |body, cx| body.on_remove(cx));
		}

		self.teardown_set(obj);

		if let Some(group) = self.group_of(obj) {
			self.remove_object(group, obj).log_error();
		}

		if let Some(name) = self.objects.get(obj.0).name {
			self.shared.names.remove(name, obj);
		}
		self.shared.ids.remove(id, obj);

		self.process_delete_notifies(obj);
		self.shared.events.cancel_target(obj);
		self.id_alloc.release(id);

		let slot = self.objects.get_mut(obj.0);
		slot.id = SimObjectId::INVALID;
		slot.id_string.clear();
		slot.flags.clear(flags::ADDED);
		let deleted = slot.flags.test(flags::DELETED);

		log::trace!("Unregistered object {id}.");

		// A delete requested from one of the hooks above was deferred until now.
		if deleted {
			self.objects.try_remove(obj.0);
		}

		Ok(())
	}

	/// Unregisters the object if needed and frees it. Every outstanding [`ObjectRef`] to it stops
	/// resolving.
	///
	/// Deleting an object from inside its own unregistration defers the free until that
	/// unregistration completes.
	pub fn delete_object(&mut self, obj: ObjectRef) -> Result<(), RegisterError> {
		let slot = self.slot_mut(obj).ok_or(RegisterError::DeadObject)?;
		if slot.flags.test(flags::DELETED) {
			return Ok(());
		}
		slot.flags.set(flags::DELETED);

		if slot.is_registered() {
			if slot.flags.test(flags::REMOVED) {
				return Ok(());
			}
			return self.unregister_inner(obj, true);
		}

		// Unregistered objects may still hold members and subscriptions.
		self.teardown_set(obj);
		if let Some(group) = self.group_of(obj) {
			self.remove_object(group, obj).log_error();
		}
		self.process_delete_notifies(obj);
		self.objects.try_remove(obj.0);
		Ok(())
	}

	// === Identity === //

	pub fn id(&self, obj: ObjectRef) -> SimObjectId {
		self.slot(obj).map_or(SimObjectId::INVALID, |slot| slot.id)
	}

	pub fn id_string(&self, obj: ObjectRef) -> Option<&str> {
		self.slot(obj)
			.filter(|slot| slot.is_registered())
			.map(|slot| slot.id_string.as_str())
	}

	pub fn class_of(&self, obj: ObjectRef) -> Option<ClassId> {
		self.slot(obj).map(|slot| slot.class)
	}

	pub fn class_name(&self, obj: ObjectRef) -> Option<&'static str> {
		Some(self.classes.get(self.class_of(obj)?).name())
	}

	pub fn is_class(&self, obj: ObjectRef, class_name: &str) -> bool {
		self.class_of(obj)
			.map_or(false, |class| self.classes.is_class_named(class, class_name))
	}

	pub fn namespace_chain(&self, obj: ObjectRef) -> Vec<&'static str> {
		self.class_of(obj)
			.map(|class| self.classes.namespace_chain(class))
			.unwrap_or_default()
	}

	pub fn group_of(&self, obj: ObjectRef) -> Option<ObjectRef> {
		self.slot(obj)?.group
	}

	// === Names === //

	pub fn name(&self, obj: ObjectRef) -> Option<Arc<str>> {
		Some(self.shared.strings.resolve(self.slot(obj)?.name?))
	}

	pub fn internal_name(&self, obj: ObjectRef) -> Option<Arc<str>> {
		Some(self.shared.strings.resolve(self.slot(obj)?.internal_name?))
	}

	pub fn original_name(&self, obj: ObjectRef) -> Option<Arc<str>> {
		Some(self.shared.strings.resolve(self.slot(obj)?.original_name?))
	}

	/// Renames the object, keeping the global and group dictionaries in sync. `None` or an empty
	/// string clears the name. Refused for objects flagged [`flags::NO_NAME_CHANGE`].
	pub fn assign_name(&mut self, obj: ObjectRef, name: Option<&str>) -> bool {
		let Some(slot) = self.slot(obj) else {
			return false;
		};

		if slot.flags.test(flags::NO_NAME_CHANGE) {
			log::warn!(
				"Cannot rename object {}: name changes are disabled for it.",
				slot.id
			);
			return false;
		}

		let (old_name, registered, group) = (slot.name, slot.is_registered(), slot.group);
		let new_name = name
			.filter(|name| !name.is_empty())
			.map(|name| self.shared.strings.insert(name));

		if registered {
			if let Some(old_name) = old_name {
				self.shared.names.remove(old_name, obj);
			}
			if let Some(new_name) = new_name {
				self.shared.names.insert(new_name, obj);
			}
		}

		if let Some(group) = group {
			self.group_rename(group, obj, old_name, new_name);
		}

		let slot = self.objects.get_mut(obj.0);
		slot.name = new_name;
		if slot.original_name.is_none() {
			slot.original_name = new_name;
		}

		true
	}

	pub fn set_internal_name(&mut self, obj: ObjectRef, name: Option<&str>) {
		let handle = name
			.filter(|name| !name.is_empty())
			.map(|name| self.shared.strings.insert(name));

		if let Some(slot) = self.slot_mut(obj) {
			slot.internal_name = handle;
		}
	}

	// === Flags === //

	pub fn flags(&self, obj: ObjectRef) -> BitSet32 {
		self.slot(obj).map_or(BitSet32::EMPTY, |slot| slot.flags)
	}

	pub fn test_flag(&self, obj: ObjectRef, mask: u32) -> bool {
		self.flags(obj).test(mask)
	}

	pub fn set_flag(&mut self, obj: ObjectRef, mask: u32, value: bool) {
		if let Some(slot) = self.slot_mut(obj) {
			slot.flags.set_to(mask, value);
		}
	}

	pub fn set_hidden(&mut self, obj: ObjectRef, hidden: bool) {
		self.set_flag(obj, flags::HIDDEN, hidden);
	}

	pub fn set_locked(&mut self, obj: ObjectRef, locked: bool) {
		self.set_flag(obj, flags::LOCKED, locked);
	}

	pub fn set_selected(&mut self, obj: ObjectRef, selected: bool) {
		self.set_flag(obj, flags::SELECTED, selected);
	}

	pub fn set_can_save(&mut self, obj: ObjectRef, can_save: bool) {
		self.set_flag(obj, flags::CANNOT_SAVE, !can_save);
	}

	pub fn set_auto_delete(&mut self, obj: ObjectRef, auto_delete: bool) {
		self.set_flag(obj, flags::AUTO_DELETE, auto_delete);
	}

	pub fn set_name_change_allowed(&mut self, obj: ObjectRef, allowed: bool) {
		self.set_flag(obj, flags::NO_NAME_CHANGE, !allowed);
	}

	// === Fields === //

	/// Reads a field by name: core properties first, then the class's static fields, then the
	/// object's dynamic fields.
	pub fn get_data_field(&self, obj: ObjectRef, field: &str) -> Option<String> {
		let slot = self.slot(obj)?;
		let flag = |mask| FieldValue::Bool(slot.flags.test(mask)).to_string();

		match CoreField::parse(field) {
			Some(CoreField::Name) => {
				return Some(self.name(obj).map_or_else(String::new, |name| name.to_string()))
			}
			Some(CoreField::InternalName) => {
				return Some(
					self.internal_name(obj)
						.map_or_else(String::new, |name| name.to_string()),
				)
			}
			Some(CoreField::Hidden) => return Some(flag(flags::HIDDEN)),
			Some(CoreField::Locked) => return Some(flag(flags::LOCKED)),
			Some(CoreField::CanSave) => {
				return Some(FieldValue::Bool(!slot.flags.test(flags::CANNOT_SAVE)).to_string())
			}
			Some(CoreField::ParentGroup) => {
				return Some(slot.group.map_or_else(String::new, |group| self.display_name(group)))
			}
			None => {}
		}

		if let Some(decl) = self.classes.get(slot.class).find_field(field) {
			return decl.get_string(slot.body.as_deref()?);
		}

		let key = self.shared.strings.lookup(field)?;
		slot.dynamic_fields.get(&key).cloned()
	}

	/// Writes a field by name. Setting a dynamic field to `""` removes it. A value that cannot be
	/// coerced to a static field's type stores the type's zero value and is reported as an error.
	pub fn set_data_field(
		&mut self,
		obj: ObjectRef,
		field: &str,
		value: &str,
	) -> Result<(), FieldError> {
		let class = self.slot(obj).ok_or(FieldError::DeadObject)?.class;
		let as_bool = || FieldType::Bool.parse(value).map_or(false, |v| v.as_bool());

		match CoreField::parse(field) {
			Some(CoreField::Name) => {
				self.assign_name(obj, Some(value));
				return Ok(());
			}
			Some(CoreField::InternalName) => {
				self.set_internal_name(obj, Some(value));
				return Ok(());
			}
			Some(CoreField::Hidden) => {
				self.set_hidden(obj, as_bool());
				return Ok(());
			}
			Some(CoreField::Locked) => {
				self.set_locked(obj, as_bool());
				return Ok(());
			}
			Some(CoreField::CanSave) => {
				self.set_can_save(obj, as_bool());
				return Ok(());
			}
			Some(CoreField::ParentGroup) => return Err(FieldError::ReadOnly("parentGroup")),
			None => {}
		}

		let slot = self.objects.get_mut(obj.0);

		if let Some(decl) = self.classes.get(class).find_field(field) {
			let Some(body) = slot.body.as_deref_mut() else {
				return Err(FieldError::DeadObject);
			};

			return match decl.set_string(body, value) {
				Ok(stored) => {
					if stored {
						slot.flags.set(flags::MOD_STATIC_FIELDS);
					}
					Ok(())
				}
				Err(err) => {
					log::warn!("Object {}: {err}", slot.id);
					slot.flags.set(flags::MOD_STATIC_FIELDS);
					Err(err)
				}
			};
		}

		let key = self.shared.strings.insert(field);
		if value.is_empty() {
			slot.dynamic_fields.remove(&key);
		} else {
			slot.dynamic_fields.insert(key, value.to_string());
		}
		slot.flags.set(flags::MOD_DYNAMIC_FIELDS);

		Ok(())
	}

	/// The object's dynamic fields sorted case-insensitively by name.
	pub fn dynamic_fields(&self, obj: ObjectRef) -> Vec<(Arc<str>, String)> {
		let Some(slot) = self.slot(obj) else {
			return Vec::new();
		};

		let mut fields = slot
			.dynamic_fields
			.iter()
			.map(|(key, value)| (self.shared.strings.resolve(*key), value.clone()))
			.collect::<Vec<_>>();

		fields.sort_by_key(|(name, _)| name.to_ascii_lowercase());
		fields
	}

	/// The object's static fields in declaration order, inherited ones first.
	pub fn static_fields(&self, obj: ObjectRef) -> Vec<(&'static str, String)> {
		let Some((slot, body)) = self
			.slot(obj)
			.and_then(|slot| Some((slot, slot.body.as_deref()?)))
		else {
			return Vec::new();
		};

		self.classes
			.get(slot.class)
			.fields()
			.iter()
			.filter_map(|decl| Some((decl.name, decl.get_string(body)?)))
			.collect()
	}

	// === Notifications === //

	/// Arranges for `observer` to be told when `subject` is unregistered. Subscribing twice is a
	/// no-op.
	pub fn delete_notify(&mut self, subject: ObjectRef, observer: ObjectRef) -> bool {
		if !self.is_alive(subject) || !self.is_alive(observer) || subject == observer {
			return false;
		}

		let slot = self.objects.get_mut(subject.0);
		if self.notify.contains(&slot.notify, NotifyKind::Delete, observer) {
			return true;
		}
		self.notify.push(&mut slot.notify, NotifyKind::Delete, observer);

		let slot = self.objects.get_mut(observer.0);
		self.notify.push(&mut slot.notify, NotifyKind::Clear, subject);
		true
	}

	pub fn clear_notify(&mut self, subject: ObjectRef, observer: ObjectRef) {
		if let Some(slot) = self.objects.try_get_mut(subject.0) {
			self.notify.remove(&mut slot.notify, NotifyKind::Delete, observer);
		}
		if let Some(slot) = self.objects.try_get_mut(observer.0) {
			self.notify.remove(&mut slot.notify, NotifyKind::Clear, subject);
		}
	}

	pub fn has_delete_notify(&self, subject: ObjectRef, observer: ObjectRef) -> bool {
		self.slot(subject).map_or(false, |slot| {
			self.notify.contains(&slot.notify, NotifyKind::Delete, observer)
		})
	}

	fn process_delete_notifies(&mut self, dead: ObjectRef) {
		let Some(slot) = self.objects.try_get_mut(dead.0) else {
			return;
		};
		let entries = self.notify.drain(&mut slot.notify);

		for (kind, target) in entries {
			let Some(target_slot) = self.objects.try_get_mut(target.0) else {
				continue;
			};

			match kind {
				NotifyKind::Delete => {
					self.notify
						.remove(&mut target_slot.notify, NotifyKind::Clear, dead);

					if let Some(set) = &mut target_slot.set {
						if set.remove_member(dead) {
							set.signal.fire(&SetChange::Removed(dead));
						}
					}

					self.with_body(target, |body, cx| body.on_delete_notify(cx, dead));
				}
				NotifyKind::Clear => {
					self.notify
						.remove(&mut target_slot.notify, NotifyKind::Delete, dead);
				}
			}
		}
	}

	// === Lookup === //

	pub fn find_object_by_id(&self, id: SimObjectId) -> Option<ObjectRef> {
		self.shared.ids.find(id).filter(|&obj| self.is_alive(obj))
	}

	pub fn find_object_by_name(&self, name: &str) -> Option<ObjectRef> {
		let handle = self.shared.strings.lookup(name)?;
		self.shared.names.find(handle).filter(|&obj| self.is_alive(obj))
	}

	/// Resolves a numeric ID, a global name, or a `Group/Child/...` path walked through each group's
	/// private name dictionary.
	pub fn find_object(&self, query: &str) -> Option<ObjectRef> {
		let query = query.trim();

		if let Some((head, rest)) = query.split_once('/') {
			let mut curr = self.find_object(head)?;
			for segment in rest.split('/').filter(|segment| !segment.is_empty()) {
				curr = self.find_child(curr, segment)?;
			}
			return Some(curr);
		}

		match query.parse::<u32>() {
			Ok(id) => self.find_object_by_id(SimObjectId(id)),
			Err(_) => self.find_object_by_name(query),
		}
	}

	/// The name of the object if it has one, its ID otherwise.
	pub fn display_name(&self, obj: ObjectRef) -> String {
		match self.name(obj) {
			Some(name) => name.to_string(),
			None => self.id(obj).to_string(),
		}
	}
}

// === Events === //

impl Sim {
	pub(crate) fn events(&self) -> &EventQueue {
		&self.shared.events
	}

	/// Whether an event aimed at `target` should fire now.
	pub(crate) fn event_target_live(&self, target: EventTarget) -> bool {
		match target {
			EventTarget::Root => true,
			EventTarget::Object(obj) => self.is_registered(obj),
		}
	}
}

fn new_slot(
	classes: &ClassTable,
	config: &RuntimeConfig,
	class: ClassId,
	body: Box<dyn ConsoleObject>,
) -> ObjectSlot {
	let set = classes
		.get(class)
		.container()
		.map(|kind| SetData::new(kind, config.dictionaries.group_name_table_size));

	ObjectSlot {
		class,
		id: SimObjectId::INVALID,
		id_string: String::new(),
		name: None,
		internal_name: None,
		original_name: None,
		flags: BitSet32::EMPTY,
		group: None,
		dynamic_fields: FxHashMap::default(),
		notify: NotifyList::default(),
		set,
		body: Some(body),
	}
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum CoreField {
	Name,
	InternalName,
	Hidden,
	Locked,
	CanSave,
	ParentGroup,
}

impl CoreField {
	fn parse(field: &str) -> Option<Self> {
		const FIELDS: [(&str, CoreField); 6] = [
			("name", CoreField::Name),
			("internalName", CoreField::InternalName),
			("hidden", CoreField::Hidden),
			("locked", CoreField::Locked),
			("canSave", CoreField::CanSave),
			("parentGroup", CoreField::ParentGroup),
		];

		FIELDS
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(field))
			.map(|(_, field)| *field)
	}
}

// === Error types === //

#[derive(Debug, Clone, Error)]
pub enum RegisterError {
	#[error("object is not alive")]
	DeadObject,
	#[error("object is already registered as {0}")]
	AlreadyRegistered(SimObjectId),
	#[error("object is not registered")]
	NotRegistered,
	#[error("id {0} is not a valid object id")]
	InvalidId(SimObjectId),
	#[error("id {0} is already in use")]
	IdInUse(SimObjectId),
	#[error("no free ids left in the {0:?} range")]
	IdRangeExhausted(IdRange),
	#[error("object {0} rejected its registration")]
	AddRejected(SimObjectId),
	#[error("class {0:?} is not registered")]
	UnknownClass(String),
}

#[derive(Debug, Error)]
pub enum SimError {
	#[error("invalid runtime config")]
	Config(#[from] ConfigError),
	#[error("failed to register the root group")]
	Register(#[from] RegisterError),
}

#[cfg(test)]
mod test {
	use std::sync::atomic::{AtomicBool, Ordering};

	use super::*;
	use crate::class::{ClassBuilder, ClassRegistry};

	#[derive(Default)]
	struct Widget {
		size: i32,
	}

	impl ConsoleObject for Widget {}

	impl ConcreteClass for Widget {
		const NAME: &'static str = "Widget";
		const PARENT: Option<&'static str> = Some("SimObject");

		fn declare(class: &mut ClassBuilder<'_, Self>) {
			class.field(
				"size",
				FieldType::Int,
				|w| FieldValue::Int(w.size),
				|w, v| w.size = v.as_int(),
			);
		}
	}

	#[derive(Default)]
	struct Crate {
		base: Widget,
		contents: String,
	}

	impl ConsoleObject for Crate {
		fn parent(&self) -> Option<&dyn ConsoleObject> {
			Some(&self.base)
		}

		fn parent_mut(&mut self) -> Option<&mut dyn ConsoleObject> {
			Some(&mut self.base)
		}
	}

	impl ConcreteClass for Crate {
		const NAME: &'static str = "Crate";
		const PARENT: Option<&'static str> = Some("Widget");

		fn declare(class: &mut ClassBuilder<'_, Self>) {
			class.field(
				"contents",
				FieldType::String,
				|c| FieldValue::String(c.contents.clone()),
				|c, v| c.contents = v.into_string(),
			);
		}
	}

	#[derive(Default)]
	struct Picky;

	impl ConsoleObject for Picky {
		fn on_add(&mut self, _cx: &mut ObjectCx<'_>) -> bool {
			false
		}
	}

	impl ConcreteClass for Picky {
		const NAME: &'static str = "Picky";
		const PARENT: Option<&'static str> = Some("SimObject");
	}

	#[derive(Default)]
	struct Watcher {
		seen: Vec<ObjectRef>,
	}

	impl ConsoleObject for Watcher {
		fn on_delete_notify(&mut self, _cx: &mut ObjectCx<'_>, dead: ObjectRef) {
			self.seen.push(dead);
		}
	}

	impl ConcreteClass for Watcher {
		const NAME: &'static str = "Watcher";
		const PARENT: Option<&'static str> = Some("SimObject");
	}

	#[derive(Default)]
	struct SelfDestruct;

	impl ConsoleObject for SelfDestruct {
		fn on_remove(&mut self, cx: &mut ObjectCx<'_>) {
			cx.sim.delete_object(cx.this).unwrap();
		}
	}

	impl ConcreteClass for SelfDestruct {
		const NAME: &'static str = "SelfDestruct";
		const PARENT: Option<&'static str> = Some("SimObject");
	}

	fn new_sim() -> Sim {
		let mut registry = ClassRegistry::with_builtins();
		registry
			.register::<Widget>()
			.unwrap()
			.register::<Crate>()
			.unwrap()
			.register::<Picky>()
			.unwrap()
			.register::<Watcher>()
			.unwrap()
			.register::<SelfDestruct>()
			.unwrap();

		Sim::new(registry.initialize().unwrap(), RuntimeConfig::default()).unwrap()
	}

	#[test]
	fn root_group_is_registered() {
		let sim = new_sim();
		let root = sim.root_group();

		assert_eq!(sim.id(root), SimObjectId::ROOT_GROUP);
		assert_eq!(sim.find_object("RootGroup"), Some(root));
		assert!(sim.is_group(root));
		assert!(sim.is_class(root, "SimSet"));
	}

	#[test]
	fn forced_id_and_name_lookup_until_deleted() {
		let mut sim = new_sim();

		let a = sim.create("Widget").unwrap();
		sim.force_next_id(SimObjectId(100));
		assert_eq!(sim.register_object_named(a, "Foo").unwrap(), SimObjectId(100));

		assert_eq!(sim.find_object_by_id(SimObjectId(100)), Some(a));
		assert_eq!(sim.find_object("Foo"), Some(a));
		assert_eq!(sim.find_object("100"), Some(a));
		assert_eq!(sim.id_string(a), Some("100"));
		assert_eq!(sim.handle().find_object_by_name("Foo"), Some(a));

		let fired = Arc::new(AtomicBool::new(false));
		let event = sim
			.schedule(EventTarget::Object(a), 10, {
				let fired = fired.clone();
				move |_, _| fired.store(true, Ordering::Relaxed)
			})
			.unwrap();

		sim.delete_object(a).unwrap();
		assert!(!sim.is_alive(a));
		assert_eq!(sim.find_object_by_id(SimObjectId(100)), None);
		assert_eq!(sim.find_object("Foo"), None);
		assert!(!sim.is_event_pending(event));

		sim.advance_time(20);
		assert!(!fired.load(Ordering::Relaxed));

		// The freed slot may be reused, but the stale reference must not see the new object.
		let b = sim.create("Widget").unwrap();
		assert_ne!(a, b);
		assert!(!sim.is_alive(a));
		assert_eq!(sim.class_name(a), None);
	}

	#[test]
	fn ids_are_unique() {
		let mut sim = new_sim();

		let mut ids = Vec::new();
		let mut objs = Vec::new();
		for _ in 0..4 {
			let obj = sim.create("Widget").unwrap();
			ids.push(sim.register_object(obj).unwrap());
			objs.push(obj);
		}

		assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
		assert!(ids.iter().all(|id| id.range() == Some(IdRange::Dynamic)));

		// Dynamic IDs are never reissued.
		sim.delete_object(objs[3]).unwrap();
		let obj = sim.create("Widget").unwrap();
		let next = sim.register_object(obj).unwrap();
		assert!(!ids.contains(&next));

		let clash = sim.create("Widget").unwrap();
		assert!(matches!(
			sim.register_object_with_id(clash, ids[0]),
			Err(RegisterError::IdInUse(_))
		));
		assert!(matches!(
			sim.register_object_with_id(clash, SimObjectId::INVALID),
			Err(RegisterError::InvalidId(_))
		));
		assert!(matches!(
			sim.register_object(objs[0]),
			Err(RegisterError::AlreadyRegistered(_))
		));
	}

	#[test]
	fn datablocks_use_their_own_range() {
		let mut sim = new_sim();

		let block = sim.create("SimDataBlock").unwrap();
		let id = sim.register_object(block).unwrap();
		assert_eq!(id.range(), Some(IdRange::DataBlock));
	}

	#[test]
	fn rejected_registration_rolls_back() {
		let mut sim = new_sim();

		let obj = sim.create("Picky").unwrap();
		assert!(matches!(
			sim.register_object_named(obj, "Picky1"),
			Err(RegisterError::AddRejected(_))
		));

		assert!(sim.is_alive(obj));
		assert!(!sim.is_registered(obj));
		assert_eq!(sim.find_object("Picky1"), None);

		sim.delete_object(obj).unwrap();
		assert!(!sim.is_alive(obj));
	}

	#[test]
	fn delete_inside_on_remove_is_deferred() {
		let mut sim = new_sim();

		let obj = sim.create("SelfDestruct").unwrap();
		sim.register_object_named(obj, "Doomed").unwrap();
		sim.add_object(sim.root_group(), obj).unwrap();

		sim.unregister_object(obj).unwrap();
		assert!(!sim.is_alive(obj));
		assert_eq!(sim.find_object("Doomed"), None);
		assert!(!sim.contains(sim.root_group(), obj));
	}

	#[test]
	fn delete_notify_fires_once() {
		let mut sim = new_sim();

		let subject = sim.create("Widget").unwrap();
		sim.register_object(subject).unwrap();
		let observer = sim.create("Watcher").unwrap();
		sim.register_object(observer).unwrap();

		assert!(sim.delete_notify(subject, observer));
		assert!(sim.delete_notify(subject, observer));
		assert!(!sim.delete_notify(subject, subject));
		assert!(sim.has_delete_notify(subject, observer));

		sim.unregister_object(subject).unwrap();
		assert_eq!(sim.body::<Watcher>(observer).unwrap().seen, vec![subject]);
		assert!(!sim.has_delete_notify(subject, observer));

		sim.register_object(subject).unwrap();
		sim.delete_object(subject).unwrap();
		assert_eq!(sim.body::<Watcher>(observer).unwrap().seen.len(), 1);
	}

	#[test]
	fn observer_death_clears_subscription() {
		let mut sim = new_sim();

		let subject = sim.create("Widget").unwrap();
		sim.register_object(subject).unwrap();
		let observer = sim.create("Watcher").unwrap();
		sim.register_object(observer).unwrap();

		sim.delete_notify(subject, observer);
		sim.delete_object(observer).unwrap();
		assert!(!sim.has_delete_notify(subject, observer));

		sim.delete_object(subject).unwrap();
	}

	#[test]
	fn renames_keep_dictionaries_in_sync() {
		let mut sim = new_sim();

		let obj = sim.create("Widget").unwrap();
		sim.register_object_named(obj, "First").unwrap();

		assert!(sim.assign_name(obj, Some("Second")));
		assert_eq!(sim.find_object("First"), None);
		assert_eq!(sim.find_object("Second"), Some(obj));
		assert_eq!(sim.original_name(obj).as_deref(), Some("First"));

		sim.set_name_change_allowed(obj, false);
		assert!(!sim.assign_name(obj, Some("Third")));
		assert_eq!(sim.find_object("Second"), Some(obj));

		sim.set_name_change_allowed(obj, true);
		assert!(sim.assign_name(obj, None));
		assert_eq!(sim.find_object("Second"), None);
		assert_eq!(sim.display_name(obj), sim.id(obj).to_string());
	}

	#[test]
	fn duplicate_names_resolve_to_newest() {
		let mut sim = new_sim();

		let older = sim.create("Widget").unwrap();
		sim.register_object_named(older, "Dup").unwrap();
		let newer = sim.create("Widget").unwrap();
		sim.register_object_named(newer, "Dup").unwrap();

		assert_eq!(sim.find_object("Dup"), Some(newer));

		sim.delete_object(newer).unwrap();
		assert_eq!(sim.find_object("Dup"), Some(older));
	}

	#[test]
	fn static_dynamic_and_core_fields() {
		let mut sim = new_sim();

		let obj = sim.create("Widget").unwrap();
		sim.register_object_named(obj, "W").unwrap();

		sim.set_data_field(obj, "size", "12").unwrap();
		assert_eq!(sim.get_data_field(obj, "SIZE").as_deref(), Some("12"));
		assert!(sim.test_flag(obj, flags::MOD_STATIC_FIELDS));

		assert!(matches!(
			sim.set_data_field(obj, "size", "huge"),
			Err(FieldError::Coerce { .. })
		));
		assert_eq!(sim.get_data_field(obj, "size").as_deref(), Some("0"));

		sim.set_data_field(obj, "color", "red").unwrap();
		sim.set_data_field(obj, "Alpha", "1").unwrap();
		assert!(sim.test_flag(obj, flags::MOD_DYNAMIC_FIELDS));
		assert_eq!(sim.get_data_field(obj, "color").as_deref(), Some("red"));
		assert_eq!(
			sim.dynamic_fields(obj)
				.iter()
				.map(|(name, _)| name.to_string())
				.collect::<Vec<_>>(),
			["Alpha", "color"]
		);

		sim.set_data_field(obj, "color", "").unwrap();
		assert_eq!(sim.get_data_field(obj, "color"), None);

		sim.set_data_field(obj, "hidden", "true").unwrap();
		assert!(sim.test_flag(obj, flags::HIDDEN));
		assert_eq!(sim.get_data_field(obj, "hidden").as_deref(), Some("1"));
		assert_eq!(sim.get_data_field(obj, "name").as_deref(), Some("W"));

		assert!(matches!(
			sim.set_data_field(obj, "parentGroup", "RootGroup"),
			Err(FieldError::ReadOnly(_))
		));
		assert_eq!(sim.static_fields(obj), vec![("size", "0".to_string())]);
	}

	#[test]
	fn handle_looks_up_from_other_threads() {
		let mut sim = new_sim();

		let obj = sim.create("Widget").unwrap();
		let id = sim.register_object_named(obj, "Shared").unwrap();

		let handle = sim.handle();
		let found = std::thread::spawn(move || {
			(handle.find_object_by_id(id), handle.find_object_by_name("Shared"))
		})
		.join()
		.unwrap();

		assert_eq!(found, (Some(obj), Some(obj)));
	}

	#[test]
	fn shutdown_returns_the_class_table() {
		let mut sim = new_sim();

		let group = sim.create("SimGroup").unwrap();
		sim.register_object_named(group, "Mission").unwrap();
		sim.add_object(sim.root_group(), group).unwrap();

		let loose = sim.create("Widget").unwrap();
		sim.add_object(group, loose).unwrap();

		let handle = sim.handle();
		let classes = sim.shutdown();

		assert_eq!(handle.find_object_by_name("Mission"), None);
		assert_eq!(handle.find_object_by_id(SimObjectId::ROOT_GROUP), None);
		assert!(classes.find_class("Widget").is_some());
		assert_eq!(classes.shutdown().len(), 9);
	}

	#[test]
	fn inherited_fields_reach_the_parent_body() {
		let mut sim = new_sim();

		let obj = sim.create("Crate").unwrap();
		sim.register_object(obj).unwrap();

		sim.set_data_field(obj, "size", "5").unwrap();
		sim.set_data_field(obj, "contents", "apples").unwrap();
		assert_eq!(sim.body::<Widget>(obj).unwrap().size, 5);
		assert_eq!(sim.body::<Crate>(obj).unwrap().contents, "apples");
		assert_eq!(sim.get_data_field(obj, "size").as_deref(), Some("5"));

		sim.body_mut::<Widget>(obj).unwrap().size = 9;
		assert_eq!(
			sim.static_fields(obj),
			vec![("size", "9".to_string()), ("contents", "apples".to_string())]
		);

		let group = sim.create("SimGroup").unwrap();
		assert!(sim.body_mut::<crate::class::builtin::SimObjectBody>(group).is_some());
		assert!(sim.body_mut::<Widget>(group).is_none());
	}

	#[test]
	fn failed_registration_leaves_state_alone() {
		let mut sim = new_sim();

		let obj = sim.create("Widget").unwrap();
		sim.register_object_named(obj, "Original").unwrap();

		assert!(matches!(
			sim.register_object_named(obj, "Other"),
			Err(RegisterError::AlreadyRegistered(_))
		));
		assert_eq!(sim.name(obj).as_deref(), Some("Original"));
		assert_eq!(sim.find_object("Original"), Some(obj));
		assert_eq!(sim.find_object("Other"), None);

		// The forced ID survives calls that fail before an ID is chosen.
		sim.force_next_id(SimObjectId(200));
		assert!(matches!(
			sim.register_object(obj),
			Err(RegisterError::AlreadyRegistered(_))
		));

		let dead = sim.create("Widget").unwrap();
		sim.delete_object(dead).unwrap();
		assert!(matches!(
			sim.register_object(dead),
			Err(RegisterError::DeadObject)
		));

		let fresh = sim.create("Widget").unwrap();
		assert_eq!(sim.register_object(fresh).unwrap(), SimObjectId(200));

		let next = sim.create("Widget").unwrap();
		assert_ne!(sim.register_object(next).unwrap(), SimObjectId(200));
	}
}
