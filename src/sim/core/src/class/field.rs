use std::{fmt, marker::PhantomData};

use thiserror::Error;

use crate::object::{resolve, resolve_mut, ConsoleObject, IdRange};

use super::{ContainerKind, NetClassType};

// === FieldType === //

/// The storage type of a static field. Each type owns the conversion between its typed value and
/// the string form the scripting and persistence layers speak.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum FieldType {
	Int,
	Float,
	Bool,
	String,
	Point3F,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
	Int(i32),
	Float(f32),
	Bool(bool),
	String(String),
	Point3F([f32; 3]),
}

impl FieldType {
	pub fn zero(self) -> FieldValue {
		match self {
			Self::Int => FieldValue::Int(0),
			Self::Float => FieldValue::Float(0.0),
			Self::Bool => FieldValue::Bool(false),
			Self::String => FieldValue::String(String::new()),
			Self::Point3F => FieldValue::Point3F([0.0; 3]),
		}
	}

	pub fn parse(self, text: &str) -> Result<FieldValue, FieldParseError> {
		let trimmed = text.trim();
		let err = || FieldParseError {
			ty: self,
			text: text.to_string(),
		};

		Ok(match self {
			Self::Int => FieldValue::Int(if trimmed.is_empty() {
				0
			} else {
				trimmed
					.parse::<i32>()
					.or_else(|_| trimmed.parse::<f32>().map(|v| v as i32))
					.map_err(|_| err())?
			}),
			Self::Float => FieldValue::Float(if trimmed.is_empty() {
				0.0
			} else {
				trimmed.parse::<f32>().map_err(|_| err())?
			}),
			Self::Bool => FieldValue::Bool(match trimmed.to_ascii_lowercase().as_str() {
				"" | "false" | "0" => false,
				"true" | "1" => true,
				other => other.parse::<f32>().map_err(|_| err())? != 0.0,
			}),
			Self::String => FieldValue::String(text.to_string()),
			Self::Point3F => {
				let mut out = [0.0; 3];
				let mut parts = trimmed.split_whitespace();

				for slot in &mut out {
					match parts.next() {
						Some(part) => *slot = part.parse::<f32>().map_err(|_| err())?,
						None => break,
					}
				}

				if parts.next().is_some() {
					return Err(err());
				}

				FieldValue::Point3F(out)
			}
		})
	}
}

impl FieldValue {
	pub fn ty(&self) -> FieldType {
		match self {
			Self::Int(_) => FieldType::Int,
			Self::Float(_) => FieldType::Float,
			Self::Bool(_) => FieldType::Bool,
			Self::String(_) => FieldType::String,
			Self::Point3F(_) => FieldType::Point3F,
		}
	}

	pub fn as_int(&self) -> i32 {
		match self {
			Self::Int(v) => *v,
			Self::Float(v) => *v as i32,
			Self::Bool(v) => *v as i32,
			Self::String(v) => v.trim().parse().unwrap_or(0),
			Self::Point3F(v) => v[0] as i32,
		}
	}

	pub fn as_float(&self) -> f32 {
		match self {
			Self::Int(v) => *v as f32,
			Self::Float(v) => *v,
			Self::Bool(v) => *v as i32 as f32,
			Self::String(v) => v.trim().parse().unwrap_or(0.0),
			Self::Point3F(v) => v[0],
		}
	}

	pub fn as_bool(&self) -> bool {
		match self {
			Self::Bool(v) => *v,
			Self::String(v) => matches!(FieldType::Bool.parse(v), Ok(FieldValue::Bool(true))),
			other => other.as_float() != 0.0,
		}
	}

	pub fn as_point3(&self) -> [f32; 3] {
		match self {
			Self::Point3F(v) => *v,
			Self::String(v) => match FieldType::Point3F.parse(v) {
				Ok(FieldValue::Point3F(v)) => v,
				_ => [0.0; 3],
			},
			other => [other.as_float(), 0.0, 0.0],
		}
	}

	pub fn into_string(self) -> String {
		match self {
			Self::String(v) => v,
			other => other.to_string(),
		}
	}
}

impl fmt::Display for FieldValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Int(v) => write!(f, "{v}"),
			Self::Float(v) => write!(f, "{v}"),
			Self::Bool(v) => f.write_str(if *v { "1" } else { "0" }),
			Self::String(v) => f.write_str(v),
			Self::Point3F([x, y, z]) => write!(f, "{x} {y} {z}"),
		}
	}
}

#[derive(Debug, Clone, Error)]
#[error("cannot convert {text:?} to a {ty:?} field value")]
pub struct FieldParseError {
	pub ty: FieldType,
	pub text: String,
}

// === FieldDecl === //

type Getter = Box<dyn Fn(&dyn ConsoleObject) -> Option<FieldValue> + Send + Sync>;
type Setter = Box<dyn Fn(&mut dyn ConsoleObject, FieldValue) -> bool + Send + Sync>;
type SetHook = Box<dyn Fn(&mut dyn ConsoleObject, &str) -> bool + Send + Sync>;
type WritePredicate = Box<dyn Fn(&dyn ConsoleObject) -> bool + Send + Sync>;

/// A static field: a name, a type and accessors into the declaring class's body.
pub struct FieldDecl {
	pub name: &'static str,
	pub ty: FieldType,
	pub doc: &'static str,
	getter: Getter,
	setter: Setter,
	set_hook: Option<SetHook>,
	write_predicate: Option<WritePredicate>,
}

impl fmt::Debug for FieldDecl {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FieldDecl")
			.field("name", &self.name)
			.field("ty", &self.ty)
			.field("protected", &self.set_hook.is_some())
			.finish_non_exhaustive()
	}
}

impl FieldDecl {
	pub fn get(&self, body: &dyn ConsoleObject) -> Option<FieldValue> {
		(self.getter)(body)
	}

	pub fn get_string(&self, body: &dyn ConsoleObject) -> Option<String> {
		self.get(body).map(FieldValue::into_string)
	}

	/// Coerces `text` and stores it. A protected field's hook sees the raw text first and may veto
	/// the default store. Coercion failures store the type's zero value and are reported back so
	/// the caller can log them.
	pub fn set_string(&self, body: &mut dyn ConsoleObject, text: &str) -> Result<bool, FieldError> {
		if let Some(hook) = &self.set_hook {
			if !hook(&mut *body, text) {
				return Ok(false);
			}
		}

		match self.ty.parse(text) {
			Ok(value) => Ok((self.setter)(&mut *body, value)),
			Err(err) => {
				(self.setter)(body, self.ty.zero());
				Err(FieldError::Coerce {
					field: self.name,
					source: err,
				})
			}
		}
	}

	pub fn should_write(&self, body: &dyn ConsoleObject) -> bool {
		self.write_predicate.as_ref().map_or(true, |pred| pred(body))
	}

	pub fn is_protected(&self) -> bool {
		self.set_hook.is_some()
	}
}

#[derive(Debug, Error)]
pub enum FieldError {
	#[error("field {field:?} received a value it could not coerce; stored the zero value")]
	Coerce {
		field: &'static str,
		#[source]
		source: FieldParseError,
	},
	#[error("object is not alive")]
	DeadObject,
	#[error("field {0:?} is read-only")]
	ReadOnly(&'static str),
}

// === ClassBuilder === //

/// Metadata a class declares alongside its fields. `None` means "inherit from the parent".
#[derive(Debug, Clone, Default)]
pub struct ClassMeta {
	pub net_group_mask: u32,
	pub net_type: Option<NetClassType>,
	pub container: Option<ContainerKind>,
	pub id_range: Option<IdRange>,
	pub renderable: bool,
	pub selectable: bool,
}

/// Handed to a class's declaration hook during registry initialization. Fields are staged into a
/// scratch buffer shared by every class and moved into the descriptor afterwards.
pub struct ClassBuilder<'a, T> {
	meta: &'a mut ClassMeta,
	fields: &'a mut Vec<FieldDecl>,
	_ty: PhantomData<fn(T)>,
}

impl<'a, T: ConsoleObject> ClassBuilder<'a, T> {
	pub(crate) fn new(meta: &'a mut ClassMeta, fields: &'a mut Vec<FieldDecl>) -> Self {
		Self {
			meta,
			fields,
			_ty: PhantomData,
		}
	}

	pub fn field(
		&mut self,
		name: &'static str,
		ty: FieldType,
		get: fn(&T) -> FieldValue,
		set: fn(&mut T, FieldValue),
	) -> &mut Self {
		self.fields.push(FieldDecl {
			name,
			ty,
			doc: "",
			getter: Box::new(move |body: &dyn ConsoleObject| resolve::<T>(body).map(get)),
			setter: Box::new(move |body: &mut dyn ConsoleObject, value| match resolve_mut::<T>(body) {
				Some(body) => {
					set(body, value);
					true
				}
				None => false,
			}),
			set_hook: None,
			write_predicate: None,
		});
		self
	}

	/// Declares a field whose writes first pass through `hook`. The default store only runs when the
	/// hook returns `true`.
	pub fn protected_field(
		&mut self,
		name: &'static str,
		ty: FieldType,
		get: fn(&T) -> FieldValue,
		set: fn(&mut T, FieldValue),
		hook: fn(&mut T, &str) -> bool,
	) -> &mut Self {
		self.field(name, ty, get, set);
		self.last_field().set_hook = Some(Box::new(move |body: &mut dyn ConsoleObject, text: &str| {
			resolve_mut::<T>(body).map_or(false, |body| hook(body, text))
		}));
		self
	}

	/// Attaches a persistence predicate to the most recently declared field.
	pub fn write_predicate(&mut self, pred: fn(&T) -> bool) -> &mut Self {
		self.last_field().write_predicate = Some(Box::new(move |body: &dyn ConsoleObject| {
			resolve::<T>(body).map_or(true, pred)
		}));
		self
	}

	pub fn doc(&mut self, doc: &'static str) -> &mut Self {
		self.last_field().doc = doc;
		self
	}

	pub fn net_groups(&mut self, mask: u32) -> &mut Self {
		self.meta.net_group_mask = mask;
		self
	}

	pub fn net_type(&mut self, ty: NetClassType) -> &mut Self {
		self.meta.net_type = Some(ty);
		self
	}

	pub fn container(&mut self, kind: ContainerKind) -> &mut Self {
		self.meta.container = Some(kind);
		self
	}

	pub fn id_range(&mut self, range: IdRange) -> &mut Self {
		self.meta.id_range = Some(range);
		self
	}

	pub fn renderable(&mut self, renderable: bool) -> &mut Self {
		self.meta.renderable = renderable;
		self
	}

	pub fn selectable(&mut self, selectable: bool) -> &mut Self {
		self.meta.selectable = selectable;
		self
	}

	fn last_field(&mut self) -> &mut FieldDecl {
		self.fields
			.last_mut()
			.expect("no field has been declared yet")
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parses_and_formats() {
		assert_eq!(FieldType::Int.parse(" 42 ").unwrap(), FieldValue::Int(42));
		assert_eq!(FieldType::Int.parse("3.9").unwrap(), FieldValue::Int(3));
		assert_eq!(FieldType::Int.parse("").unwrap(), FieldValue::Int(0));
		assert!(FieldType::Int.parse("abc").is_err());

		assert_eq!(FieldType::Bool.parse("TRUE").unwrap(), FieldValue::Bool(true));
		assert_eq!(FieldType::Bool.parse("0").unwrap(), FieldValue::Bool(false));
		assert_eq!(FieldType::Bool.parse("2.5").unwrap(), FieldValue::Bool(true));

		assert_eq!(
			FieldType::Point3F.parse("1 2.5 -3").unwrap(),
			FieldValue::Point3F([1.0, 2.5, -3.0])
		);
		assert_eq!(
			FieldType::Point3F.parse("1").unwrap(),
			FieldValue::Point3F([1.0, 0.0, 0.0])
		);
		assert!(FieldType::Point3F.parse("1 2 3 4").is_err());

		assert_eq!(FieldValue::Point3F([1.0, 2.5, -3.0]).to_string(), "1 2.5 -3");
		assert_eq!(FieldValue::Bool(true).to_string(), "1");
		assert_eq!(FieldValue::Float(0.25).to_string(), "0.25");
	}

	#[derive(Default)]
	struct Lamp {
		brightness: f32,
		locked: bool,
	}

	impl ConsoleObject for Lamp {}

	#[test]
	fn builder_accessors() {
		let mut meta = ClassMeta::default();
		let mut fields = Vec::new();

		ClassBuilder::<Lamp>::new(&mut meta, &mut fields)
			.protected_field(
				"brightness",
				FieldType::Float,
				|lamp| FieldValue::Float(lamp.brightness),
				|lamp, v| lamp.brightness = v.as_float(),
				|lamp, _| !lamp.locked,
			)
			.write_predicate(|lamp| lamp.brightness != 0.0)
			.renderable(true);

		assert!(meta.renderable);
		let field = &fields[0];
		let mut lamp = Lamp::default();

		assert!(!field.should_write(&lamp));
		assert!(field.set_string(&mut lamp, "0.5").unwrap());
		assert_eq!(field.get_string(&lamp).as_deref(), Some("0.5"));
		assert!(field.should_write(&lamp));

		lamp.locked = true;
		assert!(!field.set_string(&mut lamp, "1").unwrap());
		assert_eq!(lamp.brightness, 0.5);

		lamp.locked = false;
		assert!(matches!(
			field.set_string(&mut lamp, "bright"),
			Err(FieldError::Coerce { field: "brightness", .. })
		));
		assert_eq!(lamp.brightness, 0.0);
	}
}
