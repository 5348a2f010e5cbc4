//! The time-ordered event queue.
//!
//! Events fire in `(time, sequence)` order, so events posted for the same time fire in the order they
//! were posted. The queue never blocks: time only moves when the owner calls
//! [`Sim::advance_to_time`].

use std::{collections::BTreeMap, fmt, num::NonZeroU64};

use parking_lot::Mutex;
use torque_util::mem::hash::FxHashMap;

use crate::{object::ObjectRef, sim::Sim};

/// Simulation time in milliseconds.
pub type SimTime = u32;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct EventId(NonZeroU64);

impl EventId {
	pub fn sequence(self) -> u64 {
		self.0.get()
	}
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum EventTarget {
	/// Fires unconditionally.
	Root,
	/// Fires only if the object is still registered when the event comes due.
	Object(ObjectRef),
}

pub trait SimEvent: Send + 'static {
	fn process(self: Box<Self>, sim: &mut Sim, target: EventTarget);
}

/// Adapts a closure into a [`SimEvent`].
pub struct FnEvent<F>(pub F);

impl<F> SimEvent for FnEvent<F>
where
	F: 'static + Send + FnOnce(&mut Sim, EventTarget),
{
	fn process(self: Box<Self>, sim: &mut Sim, target: EventTarget) {
		(self.0)(sim, target)
	}
}

// === EventQueue === //

struct PendingEvent {
	target: EventTarget,
	start_time: SimTime,
	event: Box<dyn SimEvent>,
}

struct QueueState {
	current_time: SimTime,
	/// Wide enough that it never wraps, so sequence numbers are never reused.
	next_seq: u64,
	pending: BTreeMap<(SimTime, u64), PendingEvent>,
	index: FxHashMap<u64, SimTime>,
}

impl QueueState {
	fn remove(&mut self, seq: u64) -> Option<PendingEvent> {
		let time = self.index.remove(&seq)?;
		self.pending.remove(&(time, seq))
	}

	fn get(&self, id: EventId) -> Option<(SimTime, &PendingEvent)> {
		let seq = id.sequence();
		let time = *self.index.get(&seq)?;
		Some((time, self.pending.get(&(time, seq))?))
	}
}

/// The internally locked queue. The lock is never held while an event is being processed, so events
/// may post and cancel freely.
pub struct EventQueue {
	state: Mutex<QueueState>,
}

impl fmt::Debug for EventQueue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let state = self.state.lock();
		f.debug_struct("EventQueue")
			.field("current_time", &state.current_time)
			.field("pending", &state.pending.len())
			.finish()
	}
}

impl EventQueue {
	pub fn new(start_time: SimTime) -> Self {
		Self {
			state: Mutex::new(QueueState {
				current_time: start_time,
				next_seq: 1,
				pending: BTreeMap::new(),
				index: FxHashMap::default(),
			}),
		}
	}

	pub fn post(&self, target: EventTarget, event: Box<dyn SimEvent>, time: SimTime) -> EventId {
		let mut state = self.state.lock();

		let seq = state.next_seq;
		state.next_seq += 1;
		let start_time = state.current_time;

		state.pending.insert(
			(time, seq),
			PendingEvent {
				target,
				start_time,
				event,
			},
		);
		state.index.insert(seq, time);

		EventId(NonZeroU64::new(seq).unwrap_or(NonZeroU64::MIN))
	}

	pub fn cancel(&self, id: EventId) -> bool {
		let cancelled = self.state.lock().remove(id.sequence()).is_some();
		if !cancelled {
			log::debug!("Attempted to cancel event {} which is not pending.", id.sequence());
		}
		cancelled
	}

	/// Cancels every pending event aimed at `obj`, returning how many there were.
	pub fn cancel_target(&self, obj: ObjectRef) -> usize {
		let mut state = self.state.lock();
		let QueueState { pending, index, .. } = &mut *state;
		let before = pending.len();

		pending.retain(|&(_, seq), event| {
			let keep = event.target != EventTarget::Object(obj);
			if !keep {
				index.remove(&seq);
			}
			keep
		});

		before - pending.len()
	}

	pub fn is_pending(&self, id: EventId) -> bool {
		self.state.lock().index.contains_key(&id.sequence())
	}

	pub fn current_time(&self) -> SimTime {
		self.state.lock().current_time
	}

	pub fn pending_count(&self) -> usize {
		self.state.lock().pending.len()
	}

	/// Milliseconds until the event fires.
	pub fn time_left(&self, id: EventId) -> Option<SimTime> {
		let state = self.state.lock();
		let (time, _) = state.get(id)?;
		Some(time.saturating_sub(state.current_time))
	}

	/// Milliseconds since the event was posted.
	pub fn time_since_start(&self, id: EventId) -> Option<SimTime> {
		let state = self.state.lock();
		let (_, event) = state.get(id)?;
		Some(state.current_time.saturating_sub(event.start_time))
	}

	/// The delay the event was posted with.
	pub fn schedule_duration(&self, id: EventId) -> Option<SimTime> {
		let state = self.state.lock();
		let (time, event) = state.get(id)?;
		Some(time.saturating_sub(event.start_time))
	}

	/// Pops the earliest event due at or before `limit` and moves the clock up to its time.
	fn pop_due(&self, limit: SimTime) -> Option<(EventTarget, Box<dyn SimEvent>)> {
		let mut state = self.state.lock();
		let (&(time, seq), _) = state.pending.first_key_value()?;

		if time > limit {
			return None;
		}

		let event = state.remove(seq)?;
		state.current_time = state.current_time.max(time);
		Some((event.target, event.event))
	}

	fn set_current_time(&self, time: SimTime) {
		self.state.lock().current_time = time;
	}
}

// === Sim integration === //

impl Sim {
	/// Queues `event` to fire at absolute `time`. Returns `None` if the target object is not
	/// registered.
	pub fn post_event(
		&mut self,
		target: EventTarget,
		event: impl SimEvent,
		time: SimTime,
	) -> Option<EventId> {
		if !self.event_target_live(target) {
			log::warn!("Attempted to post an event to an unregistered object.");
			return None;
		}

		Some(self.events().post(target, Box::new(event), time))
	}

	/// Runs `f` on `target` after `delay` milliseconds.
	pub fn schedule(
		&mut self,
		target: EventTarget,
		delay: SimTime,
		f: impl 'static + Send + FnOnce(&mut Sim, EventTarget),
	) -> Option<EventId> {
		let time = self.current_time().saturating_add(delay);
		self.post_event(target, FnEvent(f), time)
	}

	pub fn cancel_event(&mut self, id: EventId) -> bool {
		self.events().cancel(id)
	}

	pub fn cancel_pending_events(&mut self, obj: ObjectRef) -> usize {
		self.events().cancel_target(obj)
	}

	pub fn is_event_pending(&self, id: EventId) -> bool {
		self.events().is_pending(id)
	}

	pub fn event_time_left(&self, id: EventId) -> Option<SimTime> {
		self.events().time_left(id)
	}

	pub fn time_since_start(&self, id: EventId) -> Option<SimTime> {
		self.events().time_since_start(id)
	}

	pub fn schedule_duration(&self, id: EventId) -> Option<SimTime> {
		self.events().schedule_duration(id)
	}

	pub fn current_time(&self) -> SimTime {
		self.events().current_time()
	}

	pub fn pending_count(&self) -> usize {
		self.events().pending_count()
	}

	/// Fires every event due at or before `time`, including ones posted by the events themselves,
	/// then sets the clock to `time`.
	pub fn advance_to_time(&mut self, time: SimTime) {
		let now = self.current_time();
		if time < now {
			log::warn!("Refusing to move simulation time backwards from {now} to {time}.");
			return;
		}

		let mut fired = 0usize;
		while let Some((target, event)) = self.events().pop_due(time) {
			if self.event_target_live(target) {
				event.process(self, target);
				fired += 1;
			} else {
				log::trace!("Dropped an event whose target is gone.");
			}
		}

		self.events().set_current_time(time);

		if fired > 0 {
			log::trace!("Advanced to {time}, firing {fired} events.");
		}
	}

	pub fn advance_time(&mut self, delta: SimTime) {
		let target = self.current_time().saturating_add(delta);
		self.advance_to_time(target);
	}
}
