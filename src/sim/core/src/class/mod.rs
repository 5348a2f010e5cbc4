//! The class registry.
//!
//! Classes are registered into a [`ClassRegistry`] before anything else happens. A single call to
//! [`ClassRegistry::initialize`] then resolves parents, runs every class's field declarations and
//! assigns network class IDs, producing the immutable [`ClassTable`] the runtime is built on.
//!
//! Network IDs are assigned per `(NetClassGroup, NetClassType)` partition after sorting the classes
//! by type and then by case-insensitive natural name order. The order does not depend on
//! registration order, so two separately built programs with the same class set agree on every ID.

use std::{any::TypeId, cmp::Ordering, fmt, sync::Arc};

use thiserror::Error;
use torque_util::{lang::natural::natural_cmp_ignore_case, mem::bitset::BitSet32};

use crate::object::{ConsoleObject, IdRange};

pub mod builtin;
pub mod field;

pub use field::{ClassBuilder, ClassMeta, FieldDecl, FieldError, FieldType, FieldValue};

// === Network partitions === //

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum NetClassGroup {
	Game = 0,
	Community = 1,
	Group3 = 2,
	Group4 = 3,
}

pub const NET_CLASS_GROUPS_COUNT: usize = 4;

impl NetClassGroup {
	pub const ALL: [Self; NET_CLASS_GROUPS_COUNT] =
		[Self::Game, Self::Community, Self::Group3, Self::Group4];

	pub fn mask(self) -> u32 {
		1 << self as u32
	}

	pub const ALL_MASK: u32 = (1 << NET_CLASS_GROUPS_COUNT) - 1;
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum NetClassType {
	Object = 0,
	DataBlock = 1,
	Event = 2,
}

pub const NET_CLASS_TYPES_COUNT: usize = 3;

impl NetClassType {
	pub const ALL: [Self; NET_CLASS_TYPES_COUNT] = [Self::Object, Self::DataBlock, Self::Event];
}

/// Whether instances of a class carry an ordered member list, and with which ownership rules.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum ContainerKind {
	/// Members are referenced; an object may be in any number of sets.
	Set,
	/// Members are owned; an object is in at most one group.
	Group,
}

// === ConcreteClass === //

/// Implemented by every body type that can be instantiated through the registry.
pub trait ConcreteClass: ConsoleObject + Default {
	const NAME: &'static str;
	const PARENT: Option<&'static str>;

	fn declare(class: &mut ClassBuilder<'_, Self>) {
		let _ = class;
	}
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ClassId(u32);

impl ClassId {
	pub fn index(self) -> usize {
		self.0 as usize
	}
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct NamespaceId(u32);

#[derive(Debug, Clone)]
pub struct Namespace {
	pub name: &'static str,
	pub parent: Option<NamespaceId>,
}

type DeclareFn = Box<dyn Fn(&mut ClassMeta, &mut Vec<FieldDecl>) + Send + Sync>;
type FactoryFn = fn() -> Box<dyn ConsoleObject>;

// === ClassRep === //

pub struct ClassRep {
	name: &'static str,
	parent_name: Option<&'static str>,
	body_type: TypeId,
	declare: DeclareFn,
	factory: FactoryFn,

	// Populated by `initialize`.
	parent: Option<ClassId>,
	namespace: Option<NamespaceId>,
	meta: ClassMeta,
	net_type: NetClassType,
	container: Option<ContainerKind>,
	id_range: IdRange,
	fields: Vec<Arc<FieldDecl>>,
	class_ids: [Option<u32>; NET_CLASS_GROUPS_COUNT],
}

impl fmt::Debug for ClassRep {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ClassRep")
			.field("name", &self.name)
			.field("parent", &self.parent_name)
			.field("net_type", &self.net_type)
			.field("class_ids", &self.class_ids)
			.field("fields", &self.fields.len())
			.finish_non_exhaustive()
	}
}

impl ClassRep {
	pub fn of<T: ConcreteClass>() -> Self {
		Self {
			name: T::NAME,
			parent_name: T::PARENT,
			body_type: TypeId::of::<T>(),
			declare: Box::new(|meta: &mut ClassMeta, fields: &mut Vec<FieldDecl>| {
				T::declare(&mut ClassBuilder::<T>::new(meta, fields))
			}),
			factory: || -> Box<dyn ConsoleObject> { Box::new(T::default()) },
			parent: None,
			namespace: None,
			meta: ClassMeta::default(),
			net_type: NetClassType::Object,
			container: None,
			id_range: IdRange::Dynamic,
			fields: Vec::new(),
			class_ids: [None; NET_CLASS_GROUPS_COUNT],
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn parent(&self) -> Option<ClassId> {
		self.parent
	}

	pub fn namespace(&self) -> Option<NamespaceId> {
		self.namespace
	}

	pub fn body_type(&self) -> TypeId {
		self.body_type
	}

	pub fn net_group_mask(&self) -> BitSet32 {
		BitSet32::from_bits(self.meta.net_group_mask)
	}

	pub fn net_type(&self) -> NetClassType {
		self.net_type
	}

	/// The network class ID within `group`, or `None` if the class is not part of that group.
	pub fn class_id(&self, group: NetClassGroup) -> Option<u32> {
		self.class_ids[group as usize]
	}

	pub fn container(&self) -> Option<ContainerKind> {
		self.container
	}

	pub fn id_range(&self) -> IdRange {
		self.id_range
	}

	pub fn is_renderable(&self) -> bool {
		self.meta.renderable
	}

	pub fn is_selectable(&self) -> bool {
		self.meta.selectable
	}

	/// All static fields, inherited ones first.
	pub fn fields(&self) -> &[Arc<FieldDecl>] {
		&self.fields
	}

	pub fn find_field(&self, name: &str) -> Option<&FieldDecl> {
		self.fields
			.iter()
			.find(|field| field.name.eq_ignore_ascii_case(name))
			.map(|field| &**field)
	}

	pub fn create(&self) -> Box<dyn ConsoleObject> {
		(self.factory)()
	}
}

// === ClassRegistry === //

/// The class list before initialization. Only registration is possible in this state.
#[derive(Debug, Default)]
pub struct ClassRegistry {
	classes: Vec<ClassRep>,
}

impl ClassRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// A registry pre-populated with `SimObject`, `SimSet`, `SimGroup` and `SimDataBlock`.
	pub fn with_builtins() -> Self {
		let mut registry = Self::new();
		builtin::register_builtins(&mut registry);
		registry
	}

	pub fn register<T: ConcreteClass>(&mut self) -> Result<&mut Self, ClassError> {
		self.register_rep(ClassRep::of::<T>())?;
		Ok(self)
	}

	pub fn register_rep(&mut self, rep: ClassRep) -> Result<(), ClassError> {
		if self
			.classes
			.iter()
			.any(|other| other.name.eq_ignore_ascii_case(rep.name))
		{
			log::error!("Class {:?} was registered twice.", rep.name);
			return Err(ClassError::DuplicateName(rep.name));
		}

		self.classes.push(rep);
		Ok(())
	}

	pub fn len(&self) -> usize {
		self.classes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.classes.is_empty()
	}

	/// Resolves the class forest, runs field declarations and assigns network IDs.
	pub fn initialize(self) -> Result<ClassTable, ClassError> {
		let mut classes = self.classes;

		// Resolve parents by name.
		let mut parents = Vec::with_capacity(classes.len());
		for rep in &classes {
			let parent = match rep.parent_name {
				Some(parent_name) => Some(
					classes
						.iter()
						.position(|other| other.name.eq_ignore_ascii_case(parent_name))
						.map(|index| ClassId(index as u32))
						.ok_or(ClassError::UnknownParent {
							class: rep.name,
							parent: parent_name,
						})?,
				),
				None => None,
			};
			parents.push(parent);
		}

		// Order classes parents-first; anything left over is part of a cycle.
		let mut order = Vec::with_capacity(classes.len());
		let mut placed = vec![false; classes.len()];
		while order.len() < classes.len() {
			let before = order.len();

			for index in 0..classes.len() {
				if !placed[index] && parents[index].map_or(true, |parent| placed[parent.index()]) {
					placed[index] = true;
					order.push(index);
				}
			}

			if order.len() == before {
				let culprit = (0..classes.len()).find(|&index| !placed[index]).unwrap_or(0);
				return Err(ClassError::Cycle(classes[culprit].name));
			}
		}

		// Phase 1: namespaces and fields.
		let mut namespaces = Vec::with_capacity(classes.len());
		let mut scratch = Vec::new();

		for &index in &order {
			let parent = parents[index];
			let (inherited, parent_ns, parent_meta) = match parent {
				Some(parent) => {
					let parent_rep = &classes[parent.index()];
					(
						parent_rep.fields.clone(),
						parent_rep.namespace,
						Some((parent_rep.net_type, parent_rep.container, parent_rep.id_range)),
					)
				}
				None => (Vec::new(), None, None),
			};

			let rep = &mut classes[index];
			rep.parent = parent;

			let namespace = NamespaceId(namespaces.len() as u32);
			namespaces.push(Namespace {
				name: rep.name,
				parent: parent_ns,
			});
			rep.namespace = Some(namespace);

			let mut meta = ClassMeta::default();
			scratch.clear();
			(rep.declare)(&mut meta, &mut scratch);

			rep.net_type = meta
				.net_type
				.or(parent_meta.map(|(net_type, _, _)| net_type))
				.unwrap_or(NetClassType::Object);
			rep.container = meta.container.or(parent_meta.and_then(|(_, container, _)| container));
			rep.id_range = meta
				.id_range
				.or(parent_meta.map(|(_, _, id_range)| id_range))
				.unwrap_or(IdRange::Dynamic);
			rep.meta = meta;

			rep.fields = inherited;
			rep.fields.extend(scratch.drain(..).map(Arc::new));
		}

		// Phase 2: network class IDs.
		let mut net_tables: [[Vec<ClassId>; NET_CLASS_TYPES_COUNT]; NET_CLASS_GROUPS_COUNT] =
			Default::default();
		let mut bit_sizes = [[0u32; NET_CLASS_TYPES_COUNT]; NET_CLASS_GROUPS_COUNT];

		for group in NetClassGroup::ALL {
			for ty in NetClassType::ALL {
				let mut members = classes
					.iter()
					.enumerate()
					.filter(|(_, rep)| rep.net_type == ty && rep.meta.net_group_mask & group.mask() != 0)
					.map(|(index, _)| ClassId(index as u32))
					.collect::<Vec<_>>();

				members.sort_by(|&a, &b| compare_for_net_id(&classes[a.index()], &classes[b.index()]));

				for (net_id, class) in members.iter().enumerate() {
					classes[class.index()].class_ids[group as usize] = Some(net_id as u32);
				}

				bit_sizes[group as usize][ty as usize] = bits_for_count(members.len());
				net_tables[group as usize][ty as usize] = members;
			}
		}

		log::debug!(
			"Initialized {} classes ({} game objects, {} game datablocks).",
			classes.len(),
			net_tables[NetClassGroup::Game as usize][NetClassType::Object as usize].len(),
			net_tables[NetClassGroup::Game as usize][NetClassType::DataBlock as usize].len(),
		);

		Ok(ClassTable {
			classes,
			namespaces,
			net_tables,
			bit_sizes,
		})
	}
}

fn compare_for_net_id(a: &ClassRep, b: &ClassRep) -> Ordering {
	a.net_type
		.cmp(&b.net_type)
		.then_with(|| natural_cmp_ignore_case(a.name, b.name))
}

/// `ceil(log2(count + 1))`: the number of bits needed to send any ID in `0..count`.
pub fn bits_for_count(count: usize) -> u32 {
	(count + 1).next_power_of_two().trailing_zeros()
}

// === ClassTable === //

/// The initialized class forest.
#[derive(Debug)]
pub struct ClassTable {
	classes: Vec<ClassRep>,
	namespaces: Vec<Namespace>,
	net_tables: [[Vec<ClassId>; NET_CLASS_TYPES_COUNT]; NET_CLASS_GROUPS_COUNT],
	bit_sizes: [[u32; NET_CLASS_TYPES_COUNT]; NET_CLASS_GROUPS_COUNT],
}

impl ClassTable {
	/// Releases the network ID tables and returns the registry so it can be initialized again.
	pub fn shutdown(self) -> ClassRegistry {
		let mut classes = self.classes;
		for rep in &mut classes {
			rep.parent = None;
			rep.namespace = None;
			rep.fields.clear();
			rep.class_ids = [None; NET_CLASS_GROUPS_COUNT];
		}

		ClassRegistry { classes }
	}

	pub fn len(&self) -> usize {
		self.classes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.classes.is_empty()
	}

	pub fn get(&self, id: ClassId) -> &ClassRep {
		&self.classes[id.index()]
	}

	pub fn iter(&self) -> impl Iterator<Item = (ClassId, &ClassRep)> + '_ {
		self.classes
			.iter()
			.enumerate()
			.map(|(index, rep)| (ClassId(index as u32), rep))
	}

	pub fn find_class(&self, name: &str) -> Option<ClassId> {
		self.classes
			.iter()
			.position(|rep| rep.name.eq_ignore_ascii_case(name))
			.map(|index| ClassId(index as u32))
	}

	pub fn find_class_by_type(&self, body_type: TypeId) -> Option<ClassId> {
		self.classes
			.iter()
			.position(|rep| rep.body_type == body_type)
			.map(|index| ClassId(index as u32))
	}

	pub fn find_class_by_net_id(
		&self,
		group: NetClassGroup,
		ty: NetClassType,
		net_id: u32,
	) -> Option<ClassId> {
		self.net_tables[group as usize][ty as usize]
			.get(net_id as usize)
			.copied()
	}

	pub fn net_class_count(&self, group: NetClassGroup, ty: NetClassType) -> usize {
		self.net_tables[group as usize][ty as usize].len()
	}

	pub fn net_class_bit_size(&self, group: NetClassGroup, ty: NetClassType) -> u32 {
		self.bit_sizes[group as usize][ty as usize]
	}

	pub fn ancestors(&self, class: ClassId) -> impl Iterator<Item = ClassId> + '_ {
		std::iter::successors(Some(class), move |&curr| self.get(curr).parent)
	}

	/// Returns `true` if `class` is `ancestor` or derives from it.
	pub fn is_class(&self, class: ClassId, ancestor: ClassId) -> bool {
		self.ancestors(class).any(|curr| curr == ancestor)
	}

	pub fn is_class_named(&self, class: ClassId, ancestor: &str) -> bool {
		self.find_class(ancestor)
			.map_or(false, |ancestor| self.is_class(class, ancestor))
	}

	/// The deepest class both `a` and `b` derive from, or `None` if they live in different trees.
	pub fn common_parent(&self, a: ClassId, b: ClassId) -> Option<ClassId> {
		let mut chain_a = self.ancestors(a).collect::<Vec<_>>();
		let mut chain_b = self.ancestors(b).collect::<Vec<_>>();
		chain_a.reverse();
		chain_b.reverse();

		chain_a
			.iter()
			.zip(&chain_b)
			.take_while(|(a, b)| a == b)
			.last()
			.map(|(common, _)| *common)
	}

	pub fn find_field(&self, class: ClassId, name: &str) -> Option<&FieldDecl> {
		self.get(class).find_field(name)
	}

	pub fn namespace(&self, id: NamespaceId) -> &Namespace {
		&self.namespaces[id.0 as usize]
	}

	/// The namespace names consulted for method dispatch, most specific first.
	pub fn namespace_chain(&self, class: ClassId) -> Vec<&'static str> {
		let mut chain = Vec::new();
		let mut curr = self.get(class).namespace;

		while let Some(id) = curr {
			let ns = self.namespace(id);
			chain.push(ns.name);
			curr = ns.parent;
		}

		chain
	}
}

// === Error types === //

#[derive(Debug, Clone, Error)]
pub enum ClassError {
	#[error("class {0:?} is already registered")]
	DuplicateName(&'static str),
	#[error("class {class:?} names unknown parent {parent:?}")]
	UnknownParent {
		class: &'static str,
		parent: &'static str,
	},
	#[error("class {0:?} is part of an inheritance cycle")]
	Cycle(&'static str),
}

#[cfg(test)]
mod test {
	use super::{
		builtin::{SimDataBlockBody, SimObjectBody},
		*,
	};

	macro_rules! test_class {
		($ty:ident, $name:literal, $parent:expr, $groups:expr, $net_type:expr) => {
			#[derive(Default)]
			struct $ty;

			impl ConsoleObject for $ty {}

			impl ConcreteClass for $ty {
				const NAME: &'static str = $name;
				const PARENT: Option<&'static str> = $parent;

				fn declare(class: &mut ClassBuilder<'_, Self>) {
					class.net_groups($groups).net_type($net_type);
				}
			}
		};
	}

	test_class!(Item10, "Item10", Some("SimObject"), NetClassGroup::ALL_MASK, NetClassType::Object);
	test_class!(Item2, "item2", Some("SimObject"), NetClassGroup::ALL_MASK, NetClassType::Object);
	test_class!(Player, "Player", Some("SimObject"), NetClassGroup::Game.mask(), NetClassType::Object);
	test_class!(Weather, "Weather", Some("SimDataBlock"), NetClassGroup::Game.mask(), NetClassType::DataBlock);
	test_class!(Loner, "Loner", None, 0, NetClassType::Object);

	fn game_table() -> ClassTable {
		let mut registry = ClassRegistry::with_builtins();
		registry
			.register::<Player>()
			.unwrap()
			.register::<Item10>()
			.unwrap()
			.register::<Item2>()
			.unwrap()
			.register::<Weather>()
			.unwrap()
			.register::<Loner>()
			.unwrap();
		registry.initialize().unwrap()
	}

	#[test]
	fn net_ids_are_dense_and_sorted() {
		let table = game_table();
		let id_of = |name: &str, group| table.get(table.find_class(name).unwrap()).class_id(group);

		// Sorted by natural order: item2 < Item10 < Player.
		assert_eq!(id_of("item2", NetClassGroup::Game), Some(0));
		assert_eq!(id_of("Item10", NetClassGroup::Game), Some(1));
		assert_eq!(id_of("Player", NetClassGroup::Game), Some(2));
		assert_eq!(id_of("Player", NetClassGroup::Community), None);
		assert_eq!(id_of("Item10", NetClassGroup::Community), Some(1));
		assert_eq!(id_of("Loner", NetClassGroup::Game), None);

		for group in NetClassGroup::ALL {
			for ty in NetClassType::ALL {
				let count = table.net_class_count(group, ty);
				let bits = table.net_class_bit_size(group, ty);
				assert!((count + 1) as u64 <= 1u64 << bits);

				for net_id in 0..count as u32 {
					let class = table.find_class_by_net_id(group, ty, net_id).unwrap();
					assert_eq!(table.get(class).class_id(group), Some(net_id));
				}
				assert_eq!(table.find_class_by_net_id(group, ty, count as u32), None);
			}
		}

		assert_eq!(table.net_class_count(NetClassGroup::Game, NetClassType::Object), 3);
		assert_eq!(table.net_class_bit_size(NetClassGroup::Game, NetClassType::Object), 2);

		// SimDataBlock itself and Weather.
		assert_eq!(table.net_class_count(NetClassGroup::Game, NetClassType::DataBlock), 2);
		assert_eq!(table.net_class_bit_size(NetClassGroup::Game, NetClassType::DataBlock), 2);
	}

	#[test]
	fn bit_sizes() {
		assert_eq!(bits_for_count(0), 0);
		assert_eq!(bits_for_count(1), 1);
		assert_eq!(bits_for_count(3), 2);
		assert_eq!(bits_for_count(4), 3);
		assert_eq!(bits_for_count(7), 3);
		assert_eq!(bits_for_count(8), 4);
	}

	#[test]
	fn hierarchy_queries() {
		let table = game_table();
		let find = |name| table.find_class(name).unwrap();

		assert!(table.is_class(find("Player"), find("SimObject")));
		assert!(!table.is_class(find("SimObject"), find("Player")));
		assert!(table.is_class_named(find("SimGroup"), "SimSet"));
		assert_eq!(table.common_parent(find("Player"), find("Item2")), Some(find("SimObject")));
		assert_eq!(table.common_parent(find("SimGroup"), find("SimSet")), Some(find("SimSet")));
		assert_eq!(table.common_parent(find("Player"), find("Loner")), None);
		assert_eq!(table.find_class("nope"), None);
		assert_eq!(
			table.namespace_chain(find("SimGroup")),
			vec!["SimGroup", "SimSet", "SimObject"]
		);
		assert_eq!(
			table.find_class_by_type(TypeId::of::<SimDataBlockBody>()),
			Some(find("SimDataBlock"))
		);
		assert_eq!(table.get(find("Weather")).id_range(), IdRange::DataBlock);
		assert_eq!(table.get(find("SimGroup")).container(), Some(ContainerKind::Group));
		assert_eq!(table.get(find("Player")).container(), None);
		assert_eq!(
			table.get(find("SimObject")).body_type(),
			TypeId::of::<SimObjectBody>()
		);
	}

	#[test]
	fn registration_errors() {
		let mut registry = ClassRegistry::with_builtins();
		assert!(matches!(
			registry.register::<SimObjectBody>(),
			Err(ClassError::DuplicateName("SimObject"))
		));

		let mut registry = ClassRegistry::new();
		registry.register::<Player>().unwrap();
		assert!(matches!(
			registry.initialize(),
			Err(ClassError::UnknownParent {
				class: "Player",
				parent: "SimObject"
			})
		));
	}

	#[test]
	fn shutdown_and_reinitialize() {
		let table = game_table();
		let registry = table.shutdown();
		assert_eq!(registry.len(), 9);

		let table = registry.initialize().unwrap();
		let player = table.find_class("Player").unwrap();
		assert_eq!(table.get(player).class_id(NetClassGroup::Game), Some(2));
	}
}
