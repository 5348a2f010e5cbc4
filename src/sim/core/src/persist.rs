//! Text serialization and capture/restore of objects.

use std::{fmt::Write as _, sync::Arc};

use thiserror::Error;

use crate::{
	object::{flags, ObjectRef, SimObjectId},
	set::SetError,
	sim::{RegisterError, Sim},
};

const INDENT: &str = "   ";

// === Writer === //

/// Writes `obj` as a `new Class(Name) { ... };` block. Group members are written inside their
/// group. Objects flagged [`flags::CANNOT_SAVE`] are skipped entirely.
pub fn write_object(sim: &Sim, obj: ObjectRef) -> String {
	let mut out = String::new();
	write_object_to(sim, obj, 0, &mut out);
	out
}

fn write_object_to(sim: &Sim, obj: ObjectRef, depth: usize, out: &mut String) {
	let Some(class_name) = sim.class_name(obj) else {
		return;
	};
	if sim.test_flag(obj, flags::CANNOT_SAVE) {
		return;
	}

	let pad = INDENT.repeat(depth);
	let name = sim.name(obj).map_or_else(String::new, |name| name.to_string());
	let _ = writeln!(out, "{pad}new {class_name}({name}) {{");

	let mut fields: Vec<(Arc<str>, String)> = Vec::new();
	if let Some(internal) = sim.internal_name(obj) {
		fields.push(("internalName".into(), internal.to_string()));
	}
	fields.extend(
		writable_static_fields(sim, obj)
			.into_iter()
			.map(|(name, value)| (Arc::<str>::from(name), value)),
	);
	fields.extend(sim.dynamic_fields(obj));

	for (field, value) in fields {
		let _ = writeln!(out, "{pad}{INDENT}{field} = \"{}\";", escape(&value));
	}

	if sim.is_group(obj) {
		let members = sim.members(obj);
		if !members.is_empty() {
			out.push('\n');
		}
		for &member in members {
			write_object_to(sim, member, depth + 1, out);
		}
	}

	let _ = writeln!(out, "{pad}}};");
}

fn writable_static_fields(sim: &Sim, obj: ObjectRef) -> Vec<(&'static str, String)> {
	let Some(slot) = sim.slot(obj) else {
		return Vec::new();
	};
	let Some(body) = slot.body.as_deref() else {
		return Vec::new();
	};

	sim.classes()
		.get(slot.class)
		.fields()
		.iter()
		.filter(|decl| decl.should_write(body))
		.filter_map(|decl| Some((decl.name, decl.get_string(body)?)))
		.filter(|(_, value)| !value.is_empty())
		.collect()
}

pub fn escape(text: &str) -> String {
	let mut out = String::with_capacity(text.len());
	for ch in text.chars() {
		match ch {
			'"' => out.push_str("\\\""),
			'\\' => out.push_str("\\\\"),
			'\n' => out.push_str("\\n"),
			'\t' => out.push_str("\\t"),
			'\r' => out.push_str("\\r"),
			ch => out.push(ch),
		}
	}
	out
}

// === Memento === //

/// A snapshot of an object's class, identity, fields and container memberships that can recreate it
/// after it has been deleted. Sets that were deleted in the meantime are skipped on restore.
#[derive(Debug, Clone)]
pub struct Memento {
	class_name: &'static str,
	id: SimObjectId,
	name: Option<Arc<str>>,
	internal_name: Option<Arc<str>>,
	static_fields: Vec<(&'static str, String)>,
	dynamic_fields: Vec<(Arc<str>, String)>,
	flags: u32,
	group: Option<(ObjectRef, usize)>,
	sets: Vec<ObjectRef>,
}

impl Memento {
	const KEPT_FLAGS: u32 = flags::HIDDEN
		| flags::LOCKED
		| flags::CANNOT_SAVE
		| flags::AUTO_DELETE
		| flags::EDITOR_ONLY
		| flags::NO_NAME_CHANGE;

	pub fn capture(sim: &Sim, obj: ObjectRef) -> Option<Self> {
		let group = sim.group_of(obj).and_then(|group| {
			let index = sim.members(group).iter().position(|&member| member == obj)?;
			Some((group, index))
		});

		let sets = sim
			.live_objects()
			.filter(|&set| sim.is_set(set) && !sim.is_group(set) && sim.contains(set, obj))
			.collect();

		Some(Self {
			class_name: sim.class_name(obj)?,
			id: sim.id(obj),
			name: sim.name(obj),
			internal_name: sim.internal_name(obj),
			static_fields: sim.static_fields(obj),
			dynamic_fields: sim.dynamic_fields(obj),
			flags: sim.flags(obj).bits() & Self::KEPT_FLAGS,
			group,
			sets,
		})
	}

	pub fn class_name(&self) -> &'static str {
		self.class_name
	}

	pub fn id(&self) -> SimObjectId {
		self.id
	}

	/// Recreates the object through the normal registration path. The original ID is reused when it
	/// is still free. The object is put back at its old position in its group and rejoins every set
	/// that still exists.
	pub fn restore(&self, sim: &mut Sim) -> Result<ObjectRef, PersistError> {
		let obj = sim
			.create(self.class_name)
			.ok_or(PersistError::UnknownClass(self.class_name))?;

		for (field, value) in &self.static_fields {
			// Coercion failures were already reported when the value was first set.
			let _ = sim.set_data_field(obj, field, value);
		}
		for (field, value) in &self.dynamic_fields {
			let _ = sim.set_data_field(obj, field, value);
		}

		sim.set_internal_name(obj, self.internal_name.as_deref());
		sim.assign_name(obj, self.name.as_deref());

		let registered = if self.id.is_valid() && sim.find_object_by_id(self.id).is_none() {
			sim.register_object_with_id(obj, self.id)
		} else {
			sim.register_object(obj)
		};

		if let Err(err) = registered {
			let _ = sim.delete_object(obj);
			return Err(err.into());
		}

		// Flags go on last so that a saved `NO_NAME_CHANGE` does not block the rename above.
		sim.set_flag(obj, self.flags, true);

		if let Some((group, index)) = self.group {
			if sim.is_alive(group) {
				sim.add_object(group, obj)?;
				let target = sim.at(group, index).filter(|&target| target != obj);
				if target.is_some() {
					sim.re_order(group, obj, target)?;
				}
			}
		}

		for &set in &self.sets {
			if sim.is_alive(set) {
				sim.add_object(set, obj)?;
			}
		}

		Ok(obj)
	}
}

#[derive(Debug, Error)]
pub enum PersistError {
	#[error("class {0:?} is not registered")]
	UnknownClass(&'static str),
	#[error("failed to register the restored object")]
	Register(#[from] RegisterError),
	#[error("failed to put the restored object back into its group")]
	Set(#[from] SetError),
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		class::{ClassBuilder, ClassRegistry, ConcreteClass, FieldType, FieldValue},
		config::RuntimeConfig,
		object::ConsoleObject,
	};

	#[derive(Default)]
	struct Marker {
		health: i32,
		label: String,
	}

	impl ConsoleObject for Marker {}

	impl ConcreteClass for Marker {
		const NAME: &'static str = "Marker";
		const PARENT: Option<&'static str> = Some("SimObject");

		fn declare(class: &mut ClassBuilder<'_, Self>) {
			class
				.field(
					"health",
					FieldType::Int,
					|m| FieldValue::Int(m.health),
					|m, v| m.health = v.as_int(),
				)
				.field(
					"label",
					FieldType::String,
					|m| FieldValue::String(m.label.clone()),
					|m, v| m.label = v.into_string(),
				)
				.write_predicate(|m| m.label != "secret");
		}
	}

	fn new_sim() -> Sim {
		let mut registry = ClassRegistry::with_builtins();
		registry.register::<Marker>().unwrap();
		Sim::new(registry.initialize().unwrap(), RuntimeConfig::default()).unwrap()
	}

	#[test]
	fn writes_nested_groups() {
		let mut sim = new_sim();

		let group = sim.create("SimGroup").unwrap();
		sim.register_object_named(group, "Mission").unwrap();

		let marker = sim.create("Marker").unwrap();
		sim.set_data_field(marker, "health", "25").unwrap();
		sim.set_data_field(marker, "label", "say \"hi\"").unwrap();
		sim.set_data_field(marker, "zeta", "z").unwrap();
		sim.set_data_field(marker, "Alpha", "a").unwrap();
		sim.register_object_named(marker, "Spawn").unwrap();
		sim.add_object(group, marker).unwrap();

		let hidden = sim.create("SimObject").unwrap();
		sim.register_object(hidden).unwrap();
		sim.set_can_save(hidden, false);
		sim.add_object(group, hidden).unwrap();

		assert_eq!(
			write_object(&sim, group),
			concat!(
				"new SimGroup(Mission) {\n",
				"\n",
				"   new Marker(Spawn) {\n",
				"      health = \"25\";\n",
				"      label = \"say \\\"hi\\\"\";\n",
				"      Alpha = \"a\";\n",
				"      zeta = \"z\";\n",
				"   };\n",
				"};\n",
			)
		);

		sim.set_data_field(marker, "label", "secret").unwrap();
		assert!(!write_object(&sim, marker).contains("label"));
	}

	#[test]
	fn memento_round_trip() {
		let mut sim = new_sim();

		let group = sim.create("SimGroup").unwrap();
		sim.register_object(group).unwrap();

		let first = sim.create("SimObject").unwrap();
		sim.register_object(first).unwrap();
		sim.add_object(group, first).unwrap();

		let marker = sim.create("Marker").unwrap();
		sim.set_data_field(marker, "health", "7").unwrap();
		sim.set_data_field(marker, "note", "kept").unwrap();
		sim.set_internal_name(marker, Some("inner"));
		let id = sim.register_object_named(marker, "Target").unwrap();
		sim.add_object(group, marker).unwrap();
		sim.bring_to_front(group, marker).unwrap();
		sim.set_hidden(marker, true);

		let memento = Memento::capture(&sim, marker).unwrap();
		sim.delete_object(marker).unwrap();
		assert_eq!(sim.find_object("Target"), None);
		assert_eq!(sim.size(group), 1);

		let restored = memento.restore(&mut sim).unwrap();
		assert_eq!(sim.id(restored), id);
		assert_eq!(sim.find_object("Target"), Some(restored));
		assert_eq!(sim.get_data_field(restored, "health").as_deref(), Some("7"));
		assert_eq!(sim.get_data_field(restored, "note").as_deref(), Some("kept"));
		assert_eq!(sim.internal_name(restored).as_deref(), Some("inner"));
		assert!(sim.test_flag(restored, flags::HIDDEN));
		assert_eq!(sim.members(group), &[restored, first]);
	}

	#[test]
	fn memento_rejoins_surviving_sets() {
		let mut sim = new_sim();

		let kept = sim.create("SimSet").unwrap();
		sim.register_object(kept).unwrap();
		let dropped = sim.create("SimSet").unwrap();
		sim.register_object(dropped).unwrap();

		let marker = sim.create("Marker").unwrap();
		sim.register_object(marker).unwrap();
		sim.add_object(kept, marker).unwrap();
		sim.add_object(dropped, marker).unwrap();

		let memento = Memento::capture(&sim, marker).unwrap();
		sim.delete_object(marker).unwrap();
		sim.delete_object(dropped).unwrap();
		assert_eq!(sim.size(kept), 0);

		let restored = memento.restore(&mut sim).unwrap();
		assert!(sim.contains(kept, restored));
		assert_eq!(sim.members(kept), &[restored]);
	}
}
