use smallvec::SmallVec;
use torque_util::mem::free_list::FreeList;

use super::ObjectRef;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum NotifyKind {
	/// Stored on the subject: tell `target` when the subject is unregistered.
	Delete,
	/// Stored on the observer: when the observer goes away, drop the matching `Delete` entry from
	/// `target`'s list.
	Clear,
}

#[derive(Debug)]
struct NotifyNode {
	kind: NotifyKind,
	target: ObjectRef,
	next: Option<u32>,
}

/// Head of a singly linked notification list. Nodes live in the shared [`NotifyPool`].
#[derive(Debug, Default)]
pub(crate) struct NotifyList {
	head: Option<u32>,
}

impl NotifyList {
	pub fn is_empty(&self) -> bool {
		self.head.is_none()
	}
}

/// One node pool shared by every object's notification list, so subscribing never allocates once
/// the pool has warmed up.
#[derive(Debug, Default)]
pub(crate) struct NotifyPool {
	nodes: FreeList<NotifyNode, u32>,
}

impl NotifyPool {
	pub fn push(&mut self, list: &mut NotifyList, kind: NotifyKind, target: ObjectRef) {
		let (_, node) = self.nodes.add(NotifyNode {
			kind,
			target,
			next: list.head,
		});
		list.head = Some(node);
	}

	pub fn contains(&self, list: &NotifyList, kind: NotifyKind, target: ObjectRef) -> bool {
		self.iter(list)
			.any(|(entry_kind, entry_target)| entry_kind == kind && entry_target == target)
	}

	/// Unlinks the first entry matching `kind` and `target`. Missing entries are ignored.
	pub fn remove(&mut self, list: &mut NotifyList, kind: NotifyKind, target: ObjectRef) -> bool {
		let mut prev: Option<u32> = None;
		let mut curr = list.head;

		while let Some(index) = curr {
			let node = self.nodes.get(index);
			let next = node.next;

			if node.kind == kind && node.target == target {
				match prev {
					Some(prev) => self.nodes.get_mut(prev).next = next,
					None => list.head = next,
				}
				self.nodes.remove(index);
				return true;
			}

			prev = Some(index);
			curr = next;
		}

		false
	}

	/// Empties the list, returning its entries most-recent first.
	pub fn drain(&mut self, list: &mut NotifyList) -> SmallVec<[(NotifyKind, ObjectRef); 4]> {
		let mut entries = SmallVec::new();
		let mut curr = list.head.take();

		while let Some(index) = curr {
			let node = self.nodes.remove(index);
			entries.push((node.kind, node.target));
			curr = node.next;
		}

		entries
	}

	pub fn iter<'a>(&'a self, list: &NotifyList) -> impl Iterator<Item = (NotifyKind, ObjectRef)> + 'a {
		let mut curr = list.head;

		std::iter::from_fn(move || {
			let node = self.nodes.get(curr?);
			curr = node.next;
			Some((node.kind, node.target))
		})
	}

	pub fn live_nodes(&self) -> usize {
		self.nodes.len()
	}
}
