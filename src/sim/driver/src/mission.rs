use torque_sim::{
	class::{builtin::SimObjectBody, NetClassGroup, NetClassType},
	ClassBuilder, ConcreteClass, ConsoleObject, EventTarget, FieldType, FieldValue, ObjectCx, Sim,
	SimTime,
};

// === SpawnPoint === //

#[derive(Debug, Default)]
pub struct SpawnPoint {
	pub base: SimObjectBody,
	pub team: i32,
	pub position: [f32; 3],
	pub radius: f32,
}

impl SpawnPoint {
	pub fn bounds(&self) -> ([f32; 3], [f32; 3]) {
		let r = self.radius;
		let [x, y, z] = self.position;
		([x - r, y - r, z - r], [x + r, y + r, z + r])
	}
}

impl ConsoleObject for SpawnPoint {
	fn parent(&self) -> Option<&dyn ConsoleObject> {
		Some(&self.base)
	}

	fn parent_mut(&mut self) -> Option<&mut dyn ConsoleObject> {
		Some(&mut self.base)
	}
}

impl ConcreteClass for SpawnPoint {
	const NAME: &'static str = "SpawnPoint";
	const PARENT: Option<&'static str> = Some("SimObject");

	fn declare(class: &mut ClassBuilder<'_, Self>) {
		class
			.net_groups(NetClassGroup::Game.mask())
			.net_type(NetClassType::Object)
			.field(
				"team",
				FieldType::Int,
				|s| FieldValue::Int(s.team),
				|s, v| s.team = v.as_int(),
			)
			.field(
				"position",
				FieldType::Point3F,
				|s| FieldValue::Point3F(s.position),
				|s, v| s.position = v.as_point3(),
			)
			.field(
				"radius",
				FieldType::Float,
				|s| FieldValue::Float(s.radius),
				|s, v| s.radius = v.as_float().max(0.0),
			)
			.doc("Half the edge length of the cube an observer has to enter to see this spawn.");
	}
}

// === Beacon === //

/// Pulses every `period` milliseconds for as long as it stays registered.
#[derive(Debug, Default)]
pub struct Beacon {
	pub base: SimObjectBody,
	pub period: SimTime,
	pub pulses: u32,
}

impl ConsoleObject for Beacon {
	fn on_add(&mut self, cx: &mut ObjectCx<'_>) -> bool {
		if self.period > 0 {
			cx.sim
				.schedule(EventTarget::Object(cx.this), self.period, pulse);
		}
		true
	}

	fn on_remove(&mut self, cx: &mut ObjectCx<'_>) {
		log::info!(
			"{} went dark after {} pulses.",
			cx.sim.display_name(cx.this),
			self.pulses
		);
	}

	fn parent(&self) -> Option<&dyn ConsoleObject> {
		Some(&self.base)
	}

	fn parent_mut(&mut self) -> Option<&mut dyn ConsoleObject> {
		Some(&mut self.base)
	}
}

impl ConcreteClass for Beacon {
	const NAME: &'static str = "Beacon";
	const PARENT: Option<&'static str> = Some("SimObject");

	fn declare(class: &mut ClassBuilder<'_, Self>) {
		class
			.net_groups(NetClassGroup::Game.mask())
			.net_type(NetClassType::Event)
			.field(
				"period",
				FieldType::Int,
				|b| FieldValue::Int(b.period as i32),
				|b, v| b.period = v.as_int().max(0) as SimTime,
			);
	}
}

fn pulse(sim: &mut Sim, target: EventTarget) {
	let EventTarget::Object(obj) = target else {
		return;
	};
	let Some(beacon) = sim.body_mut::<Beacon>(obj) else {
		return;
	};

	beacon.pulses += 1;
	let period = beacon.period;
	log::debug!("Pulse at t={}.", sim.current_time());

	if period > 0 {
		sim.schedule(target, period, pulse);
	}
}
