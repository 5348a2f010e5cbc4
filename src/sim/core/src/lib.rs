pub mod class;
pub mod config;
pub mod dict;
pub mod event;
pub mod object;
pub mod persist;
pub mod scope;
pub mod set;
pub mod sim;

pub use {
	class::{ClassBuilder, ClassRegistry, ClassTable, ConcreteClass, FieldType, FieldValue},
	config::RuntimeConfig,
	event::{EventId, EventTarget, SimEvent, SimTime},
	object::{flags, ConsoleObject, ObjectCx, ObjectRef, SimObjectId},
	sim::{RegisterError, Sim, SimError, SimHandle},
};
