//! Tracks which axis-aligned volumes contain a moving reference point.
//!
//! Every axis keeps one sorted doubly linked list holding the min and max node of each volume plus
//! the reference node. A volume's bit for an axis is set while the reference node lies between that
//! volume's min and max nodes, so moving a node only has to look at the neighbors it passes over:
//! each time the reference node and a volume node swap places, that volume's bit for the axis flips.
//!
//! Nodes at equal positions sort `min < reference < max`, which makes containment inclusive on both
//! ends.

use std::{cmp::Ordering, fmt, hash::Hash};

use thiserror::Error;
use torque_util::mem::{bitset::BitSet32, free_list::FreeList, hash::FxHashMap};

// === ScopeListener === //

pub trait ScopeListener<K> {
	fn on_scope_in(&mut self, key: K);

	fn on_scope_out(&mut self, key: K);
}

impl<K, F: FnMut(K, bool)> ScopeListener<K> for F {
	fn on_scope_in(&mut self, key: K) {
		self(key, true)
	}

	fn on_scope_out(&mut self, key: K) {
		self(key, false)
	}
}

// === Nodes === //

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
enum Rank {
	Min = 0,
	Reference = 1,
	Max = 2,
}

#[derive(Debug)]
struct TrackingNode<K> {
	/// `None` for the reference node.
	owner: Option<K>,
	rank: Rank,
	position: f32,
	prev: Option<u32>,
	next: Option<u32>,
}

#[derive(Debug, Default, Copy, Clone)]
struct AxisList {
	head: Option<u32>,
	tail: Option<u32>,
}

#[derive(Debug)]
struct Volume<const N: usize> {
	min: [u32; N],
	max: [u32; N],
	mask: BitSet32,
	in_scope: bool,
}

#[derive(Debug)]
struct Reference<const N: usize, K> {
	key: K,
	nodes: [u32; N],
	position: [f32; N],
}

// === ScopeTracker === //

pub struct ScopeTracker<const N: usize, K, L> {
	nodes: FreeList<TrackingNode<K>, u32>,
	axes: [AxisList; N],
	volumes: FxHashMap<K, Volume<N>>,
	reference: Option<Reference<N, K>>,
	potential_scope_in: Vec<K>,
	listener: L,
}

impl<const N: usize, K: fmt::Debug, L> fmt::Debug for ScopeTracker<N, K, L> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ScopeTracker")
			.field("volumes", &self.volumes.len())
			.field("reference", &self.reference.as_ref().map(|r| &r.key))
			.finish_non_exhaustive()
	}
}

impl<const N: usize, K, L> ScopeTracker<N, K, L>
where
	K: Copy + Eq + Hash,
	L: ScopeListener<K>,
{
	const FULL_MASK: u32 = (1 << N) - 1;

	pub fn new(listener: L) -> Self {
		assert!((1..=4).contains(&N), "scope trackers support one to four dimensions");

		Self {
			nodes: FreeList::new(),
			axes: [AxisList::default(); N],
			volumes: FxHashMap::default(),
			reference: None,
			potential_scope_in: Vec::new(),
			listener,
		}
	}

	pub fn listener(&self) -> &L {
		&self.listener
	}

	pub fn listener_mut(&mut self) -> &mut L {
		&mut self.listener
	}

	// === Volumes === //

	/// Starts tracking the volume `min..=max`. Fires a scope-in right away if it contains the
	/// reference point.
	pub fn register_object(&mut self, key: K, min: [f32; N], max: [f32; N]) -> Result<(), ScopeError> {
		if self.volumes.contains_key(&key) {
			log::error!("Volume registered twice with the scope tracker.");
			return Err(ScopeError::AlreadyRegistered);
		}
		if self.is_reference(key) {
			log::error!("The scope reference cannot also be tracked as a volume.");
			return Err(ScopeError::IsReference);
		}
		check_bounds(&min, &max)?;

		let min_nodes =
			std::array::from_fn(|axis| self.insert_node(axis, Some(key), Rank::Min, min[axis]));
		let max_nodes =
			std::array::from_fn(|axis| self.insert_node(axis, Some(key), Rank::Max, max[axis]));

		let mask = self.compute_mask(&min_nodes, &max_nodes);
		let in_scope = mask.bits() == Self::FULL_MASK;

		self.volumes.insert(
			key,
			Volume {
				min: min_nodes,
				max: max_nodes,
				mask,
				in_scope,
			},
		);

		if in_scope {
			self.listener.on_scope_in(key);
		}

		Ok(())
	}

	/// Stops tracking a volume, firing a scope-out if it was in scope.
	pub fn unregister_object(&mut self, key: K) -> Result<(), ScopeError> {
		let volume = self.volumes.remove(&key).ok_or(ScopeError::NotRegistered)?;

		for axis in 0..N {
			self.remove_node(axis, volume.min[axis]);
			self.remove_node(axis, volume.max[axis]);
		}

		if volume.in_scope {
			self.listener.on_scope_out(key);
		}

		Ok(())
	}

	pub fn update_object(&mut self, key: K, min: [f32; N], max: [f32; N]) -> Result<(), ScopeError> {
		check_bounds(&min, &max)?;

		let volume = self.volumes.get(&key).ok_or(ScopeError::NotRegistered)?;
		let (min_nodes, max_nodes) = (volume.min, volume.max);

		for axis in 0..N {
			let moving_up = min[axis] > self.nodes.get(min_nodes[axis]).position;

			// Move the leading node first so the min node never passes its own max node.
			if moving_up {
				self.move_node(axis, max_nodes[axis], max[axis]);
				self.move_node(axis, min_nodes[axis], min[axis]);
			} else {
				self.move_node(axis, min_nodes[axis], min[axis]);
				self.move_node(axis, max_nodes[axis], max[axis]);
			}
		}

		self.flush_scope_in();
		Ok(())
	}

	pub fn is_in_scope(&self, key: K) -> bool {
		self.volumes.get(&key).map_or(false, |volume| volume.in_scope)
	}

	/// The per-axis containment bits of a volume.
	pub fn scope_mask(&self, key: K) -> Option<BitSet32> {
		self.volumes.get(&key).map(|volume| volume.mask)
	}

	pub fn len(&self) -> usize {
		self.volumes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.volumes.is_empty()
	}

	// === Reference === //

	pub fn reference(&self) -> Option<(K, [f32; N])> {
		self.reference.as_ref().map(|r| (r.key, r.position))
	}

	fn is_reference(&self, key: K) -> bool {
		self.reference.as_ref().map_or(false, |r| r.key == key)
	}

	/// Replaces the reference point and recomputes every volume from scratch. Volumes leaving scope
	/// are reported before volumes entering it.
	pub fn set_reference_object(
		&mut self,
		reference: Option<(K, [f32; N])>,
	) -> Result<(), ScopeError> {
		if let Some((key, _)) = &reference {
			if self.volumes.contains_key(key) {
				log::error!("A tracked volume cannot become the scope reference.");
				return Err(ScopeError::IsReference);
			}
		}

		if let Some(old) = self.reference.take() {
			for (axis, &node) in old.nodes.iter().enumerate() {
				self.remove_node(axis, node);
			}
		}

		if let Some((key, position)) = reference {
			let nodes = std::array::from_fn(|axis| {
				self.insert_node(axis, None, Rank::Reference, position[axis])
			});
			self.reference = Some(Reference {
				key,
				nodes,
				position,
			});
		}

		let keys = self.volumes.keys().copied().collect::<Vec<_>>();
		let mut entering = Vec::new();

		for key in keys {
			let volume = &self.volumes[&key];
			let mask = self.compute_mask(&volume.min, &volume.max);
			let full = mask.bits() == Self::FULL_MASK;

			let Some(volume) = self.volumes.get_mut(&key) else {
				continue;
			};
			volume.mask = mask;

			if volume.in_scope && !full {
				volume.in_scope = false;
				self.listener.on_scope_out(key);
			} else if !volume.in_scope && full {
				entering.push(key);
			}
		}

		for key in entering {
			if let Some(volume) = self.volumes.get_mut(&key) {
				volume.in_scope = true;
				self.listener.on_scope_in(key);
			}
		}

		self.potential_scope_in.clear();
		Ok(())
	}

	pub fn update_reference(&mut self, position: [f32; N]) -> Result<(), ScopeError> {
		let reference = self.reference.as_mut().ok_or(ScopeError::NoReference)?;
		reference.position = position;
		let nodes = reference.nodes;

		for axis in 0..N {
			self.move_node(axis, nodes[axis], position[axis]);
		}

		self.flush_scope_in();
		Ok(())
	}

	// === List maintenance === //

	fn compare(&self, a: u32, b: u32) -> Ordering {
		let (a, b) = (self.nodes.get(a), self.nodes.get(b));
		a.position
			.total_cmp(&b.position)
			.then(a.rank.cmp(&b.rank))
	}

	fn compute_mask(&self, min: &[u32; N], max: &[u32; N]) -> BitSet32 {
		let mut mask = BitSet32::new();

		if let Some(reference) = &self.reference {
			for axis in 0..N {
				let node = reference.nodes[axis];
				let inside = self.compare(min[axis], node) == Ordering::Less
					&& self.compare(node, max[axis]) == Ordering::Less;

				mask.set_to(BitSet32::bit(axis as u32), inside);
			}
		}

		mask
	}

	fn insert_node(&mut self, axis: usize, owner: Option<K>, rank: Rank, position: f32) -> u32 {
		let (_, node) = self.nodes.add(TrackingNode {
			owner,
			rank,
			position,
			prev: None,
			next: None,
		});

		// Insert after every node that does not sort after the new one.
		let mut after = None;
		let mut curr = self.axes[axis].head;
		while let Some(index) = curr {
			if self.compare(index, node) == Ordering::Greater {
				break;
			}
			after = Some(index);
			curr = self.nodes.get(index).next;
		}

		let before = match after {
			Some(after) => self.nodes.get(after).next,
			None => self.axes[axis].head,
		};

		self.link(axis, after, node, before);
		node
	}

	fn link(&mut self, axis: usize, prev: Option<u32>, node: u32, next: Option<u32>) {
		match prev {
			Some(prev) => self.nodes.get_mut(prev).next = Some(node),
			None => self.axes[axis].head = Some(node),
		}
		match next {
			Some(next) => self.nodes.get_mut(next).prev = Some(node),
			None => self.axes[axis].tail = Some(node),
		}

		let entry = self.nodes.get_mut(node);
		entry.prev = prev;
		entry.next = next;
	}

	fn unlink(&mut self, axis: usize, node: u32) {
		let (prev, next) = {
			let entry = self.nodes.get(node);
			(entry.prev, entry.next)
		};

		match prev {
			Some(prev) => self.nodes.get_mut(prev).next = next,
			None => self.axes[axis].head = next,
		}
		match next {
			Some(next) => self.nodes.get_mut(next).prev = prev,
			None => self.axes[axis].tail = prev,
		}
	}

	fn remove_node(&mut self, axis: usize, node: u32) {
		self.unlink(axis, node);
		self.nodes.remove(node);
	}

	/// Moves `node` to `position`, swapping it past neighbors one at a time and flipping scope bits
	/// whenever the reference node is passed.
	fn move_node(&mut self, axis: usize, node: u32, position: f32) {
		self.nodes.get_mut(node).position = position;

		while let Some(next) = self.nodes.get(node).next {
			if self.compare(next, node) != Ordering::Less {
				break;
			}
			self.unlink(axis, node);
			let after_next = self.nodes.get(next).next;
			self.link(axis, Some(next), node, after_next);
			self.on_cross(axis, node, next);
		}

		while let Some(prev) = self.nodes.get(node).prev {
			if self.compare(prev, node) != Ordering::Greater {
				break;
			}
			self.unlink(axis, node);
			let before_prev = self.nodes.get(prev).prev;
			self.link(axis, before_prev, node, Some(prev));
			self.on_cross(axis, node, prev);
		}
	}

	fn on_cross(&mut self, axis: usize, a: u32, b: u32) {
		let key = match (self.nodes.get(a).owner, self.nodes.get(b).owner) {
			(None, Some(key)) | (Some(key), None) => key,
			_ => return,
		};

		let Some(volume) = self.volumes.get_mut(&key) else {
			return;
		};

		let bit = BitSet32::bit(axis as u32);
		volume.mask.toggle(bit);

		if volume.mask.test(bit) {
			if volume.mask.bits() == Self::FULL_MASK {
				self.potential_scope_in.push(key);
			}
		} else if volume.in_scope {
			volume.in_scope = false;
			self.listener.on_scope_out(key);
		}
	}

	/// Volumes become in scope only once every axis has been processed, so a volume whose bits flip
	/// on and off again during one update never reports.
	fn flush_scope_in(&mut self) {
		for key in std::mem::take(&mut self.potential_scope_in) {
			let Some(volume) = self.volumes.get_mut(&key) else {
				continue;
			};

			if volume.mask.bits() == Self::FULL_MASK && !volume.in_scope {
				volume.in_scope = true;
				self.listener.on_scope_in(key);
			}
		}
	}
}

fn check_bounds<const N: usize>(min: &[f32; N], max: &[f32; N]) -> Result<(), ScopeError> {
	// Written so that NaN bounds are rejected too.
	if min.iter().zip(max).all(|(min, max)| min <= max) {
		Ok(())
	} else {
		Err(ScopeError::InvalidBounds)
	}
}

#[derive(Debug, Clone, Error)]
pub enum ScopeError {
	#[error("volume is already registered")]
	AlreadyRegistered,
	#[error("volume is not registered")]
	NotRegistered,
	#[error("the reference object cannot also be a tracked volume")]
	IsReference,
	#[error("volume min exceeds its max on some axis")]
	InvalidBounds,
	#[error("no reference object is set")]
	NoReference,
}

#[cfg(test)]
mod test {
	use super::*;

	#[derive(Default)]
	struct Recorder {
		events: Vec<(u32, bool)>,
	}

	impl ScopeListener<u32> for Recorder {
		fn on_scope_in(&mut self, key: u32) {
			self.events.push((key, true));
		}

		fn on_scope_out(&mut self, key: u32) {
			self.events.push((key, false));
		}
	}

	const REF: u32 = 1000;

	#[test]
	fn inclusive_bounds() {
		let mut tracker = ScopeTracker::<2, u32, _>::new(Recorder::default());
		tracker.register_object(1, [0.0, 0.0], [10.0, 10.0]).unwrap();
		tracker.set_reference_object(Some((REF, [10.0, 0.0]))).unwrap();
		assert!(tracker.is_in_scope(1));

		tracker.update_reference([10.5, 0.0]).unwrap();
		assert!(!tracker.is_in_scope(1));
		assert_eq!(tracker.scope_mask(1).unwrap().bits(), 0b10);

		tracker.update_object(1, [0.0, 0.0], [10.5, 10.0]).unwrap();
		assert!(tracker.is_in_scope(1));
		assert_eq!(tracker.listener().events, [(1, true), (1, false), (1, true)]);
	}

	#[test]
	fn rejects_bad_registrations() {
		let mut tracker = ScopeTracker::<1, u32, _>::new(|_: u32, _: bool| {});
		tracker.set_reference_object(Some((REF, [0.0]))).unwrap();

		assert!(matches!(
			tracker.register_object(REF, [0.0], [1.0]),
			Err(ScopeError::IsReference)
		));
		assert!(matches!(
			tracker.register_object(1, [2.0], [1.0]),
			Err(ScopeError::InvalidBounds)
		));
		tracker.register_object(1, [0.0], [1.0]).unwrap();
		assert!(matches!(
			tracker.register_object(1, [0.0], [1.0]),
			Err(ScopeError::AlreadyRegistered)
		));
		assert!(matches!(
			tracker.set_reference_object(Some((1, [0.0]))),
			Err(ScopeError::IsReference)
		));
		assert!(matches!(
			tracker.unregister_object(2),
			Err(ScopeError::NotRegistered)
		));
	}

	#[test]
	fn unregister_and_reference_swap() {
		let mut tracker = ScopeTracker::<1, u32, _>::new(Recorder::default());
		tracker.register_object(1, [0.0], [5.0]).unwrap();
		tracker.register_object(2, [4.0], [9.0]).unwrap();

		// No reference yet, so nothing is in scope.
		assert!(!tracker.is_in_scope(1));

		tracker.set_reference_object(Some((REF, [4.5]))).unwrap();
		assert!(tracker.is_in_scope(1) && tracker.is_in_scope(2));

		tracker.set_reference_object(Some((REF + 1, [8.0]))).unwrap();
		assert!(!tracker.is_in_scope(1) && tracker.is_in_scope(2));

		tracker.unregister_object(2).unwrap();
		tracker.set_reference_object(None).unwrap();
		assert_eq!(tracker.reference(), None);

		let mut events = tracker.listener().events.clone();
		events[..2].sort();
		assert_eq!(events, [(1, true), (2, true), (1, false), (2, false)]);
	}

	// Coarse values make exact boundary hits common.
	fn coarse(rng: &mut fastrand::Rng) -> f32 {
		rng.u32(0..21) as f32
	}

	#[test]
	fn matches_brute_force_and_never_repeats_callbacks() {
		const VOLUMES: u32 = 12;

		let mut rng = fastrand::Rng::with_seed(7);
		let mut tracker = ScopeTracker::<3, u32, _>::new(Recorder::default());
		let mut bounds = Vec::new();

		let random_volume = |rng: &mut fastrand::Rng| {
			let mut min = [0.0; 3];
			let mut max = [0.0; 3];
			for axis in 0..3 {
				let (a, b) = (coarse(rng), coarse(rng));
				min[axis] = a.min(b);
				max[axis] = a.max(b);
			}
			(min, max)
		};

		for key in 0..VOLUMES {
			let (min, max) = random_volume(&mut rng);
			tracker.register_object(key, min, max).unwrap();
			bounds.push((min, max));
		}

		let mut reference = [coarse(&mut rng), coarse(&mut rng), coarse(&mut rng)];
		tracker.set_reference_object(Some((REF, reference))).unwrap();

		for step in 0..400 {
			if step % 3 == 0 {
				let key = rng.u32(0..VOLUMES);
				let (min, max) = random_volume(&mut rng);
				tracker.update_object(key, min, max).unwrap();
				bounds[key as usize] = (min, max);
			} else {
				reference = [coarse(&mut rng), coarse(&mut rng), coarse(&mut rng)];
				tracker.update_reference(reference).unwrap();
			}

			for key in 0..VOLUMES {
				let (min, max) = bounds[key as usize];
				let expected = (0..3).all(|axis| min[axis] <= reference[axis] && reference[axis] <= max[axis]);
				assert_eq!(tracker.is_in_scope(key), expected, "volume {key} at step {step}");
			}
		}

		// Callbacks for each volume strictly alternate, starting with a scope-in.
		for key in 0..VOLUMES {
			let mut expect_in = true;
			for &(_, is_in) in tracker.listener().events.iter().filter(|(k, _)| *k == key) {
				assert_eq!(is_in, expect_in);
				expect_in = !expect_in;
			}
		}
	}
}
