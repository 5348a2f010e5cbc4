use std::{
	fs,
	path::{Path, PathBuf},
	thread,
};

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use torque_sim::{
	event::FnEvent,
	persist::write_object,
	scope::{ScopeListener, ScopeTracker},
	ClassRegistry, EventTarget, ObjectRef, RuntimeConfig, Sim, SimTime,
};
use torque_util::debug::error::ResultExt;

use crate::mission::{Beacon, SpawnPoint};

mod mission;

// === Clap === //

#[derive(Debug, Clone, Parser)]
#[command(about = "headless driver for the torque simulation runtime", long_about = None)]
struct CliArgs {
	#[arg(short = 'c', long = "config", name = "path to config")]
	config: Option<PathBuf>,

	#[arg(short = 't', long = "ticks", default_value_t = 20)]
	ticks: u32,

	#[arg(long = "tick-ms", default_value_t = 100)]
	tick_ms: SimTime,

	/// Print the mission tree once the run completes.
	#[arg(long = "dump")]
	dump: bool,
}

// === Config === //

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfRoot {
	runtime: RuntimeConfig,
	mission: ConfMission,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfMission {
	name: String,
	spawn_points: u32,
	spacing: f32,
	beacon_period: SimTime,
	observer_speed: f32,
}

impl Default for ConfMission {
	fn default() -> Self {
		Self {
			name: "Mission".to_string(),
			spawn_points: 4,
			spacing: 10.0,
			beacon_period: 250,
			observer_speed: 2.0,
		}
	}
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ConfRoot> {
	let Some(path) = path else {
		log::info!("No config file given; using defaults.");
		return Ok(ConfRoot::default());
	};

	let text = fs::read_to_string(path)
		.with_context(|| format!("failed to read config file {}", path.display()))?;

	let conf = toml::from_str::<ConfRoot>(&text)
		.with_context(|| format!("failed to parse config file {}", path.display()))?;

	conf.runtime.validate()?;
	Ok(conf)
}

// === Scope logging === //

#[derive(Debug, Default)]
struct ScopeLog {
	changes: Vec<(ObjectRef, bool)>,
}

impl ScopeListener<ObjectRef> for ScopeLog {
	fn on_scope_in(&mut self, key: ObjectRef) {
		self.changes.push((key, true));
	}

	fn on_scope_out(&mut self, key: ObjectRef) {
		self.changes.push((key, false));
	}
}

// === Driver === //

fn main() -> anyhow::Result<()> {
	// Setup debug services
	env_logger::init_from_env(env_logger::Env::new().default_filter_or("INFO"));

	// Parse arguments
	let args = CliArgs::parse();
	let conf = load_config(args.config.as_deref())?;

	// Boot the runtime
	let mut registry = ClassRegistry::with_builtins();
	registry.register::<SpawnPoint>()?.register::<Beacon>()?;

	let classes = registry
		.initialize()
		.context("failed to initialize the class table")?;

	let mut sim = Sim::new(classes, conf.runtime).context("failed to start the runtime")?;

	// Populate and run the mission
	let mission = build_mission(&mut sim, &conf.mission)?;
	run_mission(&mut sim, &args, &conf.mission, mission)?;

	if args.dump {
		print!("{}", write_object(&sim, mission));
	}

	// Tear down
	let registry = sim.shutdown().shutdown();
	log::info!("Shut down with {} classes registered.", registry.len());

	Ok(())
}

fn build_mission(sim: &mut Sim, conf: &ConfMission) -> anyhow::Result<ObjectRef> {
	let mission = sim.create("SimGroup").context("SimGroup is not registered")?;
	sim.register_object_named(mission, &conf.name)?;
	sim.add_object(sim.root_group(), mission)?;

	let spawns = sim.create("SimGroup").context("SimGroup is not registered")?;
	sim.register_object_named(spawns, "SpawnPoints")?;
	sim.add_object(mission, spawns)?;

	for i in 0..conf.spawn_points {
		let spawn = sim.create_object(SpawnPoint {
			team: (i % 2) as i32,
			position: [(i + 1) as f32 * conf.spacing, 0.0, 0.0],
			radius: conf.spacing / 4.0,
			..Default::default()
		})?;

		sim.set_internal_name(spawn, Some(&format!("spawn{i}")));
		sim.register_object_named(spawn, &format!("Spawn{i}"))?;
		sim.add_object(spawns, spawn)?;
	}

	let beacon = sim.create("Beacon").context("Beacon is not registered")?;
	sim.set_data_field(beacon, "period", &conf.beacon_period.to_string())?;
	sim.register_object_named(beacon, "Beacon")?;
	sim.add_object(mission, beacon)?;
	sim.set_auto_delete(beacon, true);

	log::info!(
		"Built {:?} with {} spawn points.",
		conf.name,
		sim.size(spawns)
	);

	Ok(mission)
}

fn run_mission(
	sim: &mut Sim,
	args: &CliArgs,
	conf: &ConfMission,
	mission: ObjectRef,
) -> anyhow::Result<()> {
	// Track every spawn point against a moving observer.
	let mut tracker = ScopeTracker::<3, ObjectRef, ScopeLog>::new(ScopeLog::default());

	for spawn in sim.find_object_by_type::<SpawnPoint>(mission) {
		if let Some(point) = sim.body::<SpawnPoint>(spawn) {
			let (min, max) = point.bounds();
			tracker.register_object(spawn, min, max)?;
		}
	}

	let observer = sim.create("SimObject").context("SimObject is not registered")?;
	sim.register_object_named(observer, "Observer")?;
	tracker.set_reference_object(Some((observer, [0.0; 3])))?;

	// Events may be posted from any thread through a handle.
	let handle = sim.handle();
	let briefing_at = args.tick_ms.saturating_mul(args.ticks / 2);
	thread::spawn(move || {
		handle.post_root_event(
			FnEvent(|sim: &mut Sim, _target: EventTarget| {
				log::info!("Briefing at t={}.", sim.current_time());
			}),
			briefing_at,
		)
	})
	.join()
	.map_err(|_| anyhow::anyhow!("briefing thread panicked"))?;

	for tick in 1..=args.ticks {
		sim.advance_time(args.tick_ms);

		let x = tick as f32 * conf.observer_speed;
		tracker.update_reference([x, 0.0, 0.0])?;

		for (spawn, entered) in tracker.listener_mut().changes.drain(..) {
			log::info!(
				"t={}: observer {} {}.",
				sim.current_time(),
				if entered { "entered" } else { "left" },
				sim.display_name(spawn),
			);
		}
	}

	if let Some(beacon) = sim
		.find_object("Beacon")
		.and_then(|beacon| sim.body::<Beacon>(beacon))
	{
		log::info!("Beacon pulsed {} times.", beacon.pulses);
	}

	sim.delete_object(observer).log_warn();
	Ok(())
}
