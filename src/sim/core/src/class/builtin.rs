//! Bodies for the classes every runtime starts with.

use crate::object::{ConsoleObject, IdRange};

use super::{ClassBuilder, ClassRegistry, ConcreteClass, ContainerKind, NetClassGroup, NetClassType};

/// Root of the class tree. Identity, names, flags and dynamic fields live in the object slot, so
/// the body itself is empty.
#[derive(Debug, Default)]
pub struct SimObjectBody;

impl ConsoleObject for SimObjectBody {}

impl ConcreteClass for SimObjectBody {
	const NAME: &'static str = "SimObject";
	const PARENT: Option<&'static str> = None;
}

#[derive(Debug, Default)]
pub struct SimSetBody {
	pub base: SimObjectBody,
}

impl ConsoleObject for SimSetBody {
	fn parent(&self) -> Option<&dyn ConsoleObject> {
		Some(&self.base)
	}

	fn parent_mut(&mut self) -> Option<&mut dyn ConsoleObject> {
		Some(&mut self.base)
	}
}

impl ConcreteClass for SimSetBody {
	const NAME: &'static str = "SimSet";
	const PARENT: Option<&'static str> = Some("SimObject");

	fn declare(class: &mut ClassBuilder<'_, Self>) {
		class.container(ContainerKind::Set);
	}
}

#[derive(Debug, Default)]
pub struct SimGroupBody {
	pub base: SimSetBody,
}

impl ConsoleObject for SimGroupBody {
	fn parent(&self) -> Option<&dyn ConsoleObject> {
		Some(&self.base)
	}

	fn parent_mut(&mut self) -> Option<&mut dyn ConsoleObject> {
		Some(&mut self.base)
	}
}

impl ConcreteClass for SimGroupBody {
	const NAME: &'static str = "SimGroup";
	const PARENT: Option<&'static str> = Some("SimSet");

	fn declare(class: &mut ClassBuilder<'_, Self>) {
		class.container(ContainerKind::Group);
	}
}

/// Shared configuration objects. Registered in the datablock ID range and networked as datablocks.
#[derive(Debug, Default)]
pub struct SimDataBlockBody {
	pub base: SimObjectBody,
}

impl ConsoleObject for SimDataBlockBody {
	fn parent(&self) -> Option<&dyn ConsoleObject> {
		Some(&self.base)
	}

	fn parent_mut(&mut self) -> Option<&mut dyn ConsoleObject> {
		Some(&mut self.base)
	}
}

impl ConcreteClass for SimDataBlockBody {
	const NAME: &'static str = "SimDataBlock";
	const PARENT: Option<&'static str> = Some("SimObject");

	fn declare(class: &mut ClassBuilder<'_, Self>) {
		class
			.id_range(IdRange::DataBlock)
			.net_type(NetClassType::DataBlock)
			.net_groups(NetClassGroup::Game.mask());
	}
}

pub(super) fn register_builtins(registry: &mut ClassRegistry) {
	// The registry is empty here so none of these can collide.
	let _ = registry.register::<SimObjectBody>();
	let _ = registry.register::<SimSetBody>();
	let _ = registry.register::<SimGroupBody>();
	let _ = registry.register::<SimDataBlockBody>();
}
