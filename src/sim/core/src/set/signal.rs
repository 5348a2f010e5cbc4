use std::fmt;

use derive_where::derive_where;

type Handler<E> = Box<dyn FnMut(&E) + Send>;

/// A list of listeners notified synchronously, in connection order, every time the signal fires.
#[derive_where(Default)]
pub struct Signal<E> {
	connections: Vec<Connection<E>>,
	next_id: u64,
}

struct Connection<E> {
	id: u64,
	handler: Handler<E>,
}

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct ConnectionHandle(u64);

impl<E> fmt::Debug for Signal<E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Signal")
			.field("connections", &self.connections.len())
			.finish()
	}
}

impl<E> Signal<E> {
	pub fn connect(&mut self, handler: impl FnMut(&E) + Send + 'static) -> ConnectionHandle {
		let id = self.next_id;
		self.next_id += 1;

		self.connections.push(Connection {
			id,
			handler: Box::new(handler),
		});

		ConnectionHandle(id)
	}

	fn index_if_connected(&self, conn: ConnectionHandle) -> Option<usize> {
		self.connections.iter().position(|other| other.id == conn.0)
	}

	pub fn is_connected(&self, conn: ConnectionHandle) -> bool {
		self.index_if_connected(conn).is_some()
	}

	pub fn disconnect(&mut self, conn: ConnectionHandle) -> bool {
		match self.index_if_connected(conn) {
			Some(index) => {
				self.connections.remove(index);
				true
			}
			None => false,
		}
	}

	pub fn clear(&mut self) {
		self.connections.clear();
	}

	pub fn len(&self) -> usize {
		self.connections.len()
	}

	pub fn is_empty(&self) -> bool {
		self.connections.is_empty()
	}

	pub fn fire(&mut self, event: &E) {
		for conn in &mut self.connections {
			(conn.handler)(event);
		}
	}
}

#[cfg(test)]
mod test {
	use std::sync::{
		atomic::{AtomicU32, Ordering},
		Arc,
	};

	use super::*;

	#[test]
	fn connect_fire_disconnect() {
		let hits = Arc::new(AtomicU32::new(0));
		let mut signal = Signal::<u32>::default();

		let a = signal.connect({
			let hits = hits.clone();
			move |v| {
				hits.fetch_add(*v, Ordering::Relaxed);
			}
		});
		let b = signal.connect({
			let hits = hits.clone();
			move |v| {
				hits.fetch_add(*v * 10, Ordering::Relaxed);
			}
		});

		signal.fire(&1);
		assert_eq!(hits.load(Ordering::Relaxed), 11);

		assert!(signal.disconnect(a));
		assert!(!signal.disconnect(a));
		assert!(signal.is_connected(b));

		signal.fire(&2);
		assert_eq!(hits.load(Ordering::Relaxed), 31);
	}
}
