//! Arena-backed doubly-linked recency list.
//!
//! Nodes live in a `Vec` and link to each other by index, so every operation is
//! O(1) and no unsafe pointer juggling is needed. Front = most recently used,
//! back = least recently used. Freed slots are recycled through a free list.

/// Null link.
const NIL: usize = usize::MAX;

struct Node<V> {
	value: Option<V>,
	prev: usize,
	next: usize,
}

pub(crate) struct RecencyList<V> {
	nodes: Vec<Node<V>>,
	head: usize,
	tail: usize,
	free: usize,
	len: usize,
}

impl<V> RecencyList<V> {
	pub fn new() -> Self {
		Self {
			nodes: Vec::new(),
			head: NIL,
			tail: NIL,
			free: NIL,
			len: 0,
		}
	}

	#[cfg(test)]
	pub fn len(&self) -> usize {
		self.len
	}

	#[cfg(test)]
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Insert `value` as most recently used and return its slot.
	pub fn push_front(&mut self, value: V) -> usize {
		let idx = if self.free != NIL {
			let idx = self.free;
			self.free = self.nodes[idx].next;
			self.nodes[idx] = Node {
				value: Some(value),
				prev: NIL,
				next: NIL,
			};
			idx
		} else {
			self.nodes.push(Node {
				value: Some(value),
				prev: NIL,
				next: NIL,
			});
			self.nodes.len() - 1
		};
		self.link_front(idx);
		self.len += 1;
		idx
	}

	/// Value stored in slot `idx`.
	pub fn get(&self, idx: usize) -> Option<&V> {
		self.nodes.get(idx).and_then(|node| node.value.as_ref())
	}

	pub fn get_mut(&mut self, idx: usize) -> Option<&mut V> {
		self.nodes.get_mut(idx).and_then(|node| node.value.as_mut())
	}

	/// Number of slots ever allocated, occupied or free. Slot indices are
	/// always below this.
	pub fn slot_count(&self) -> usize {
		self.nodes.len()
	}

	/// Replace the value in slot `idx` and mark it most recently used.
	pub fn replace(&mut self, idx: usize, value: V) -> V {
		let old = self.nodes[idx].value.replace(value).expect("recency slot is occupied");
		self.move_to_front(idx);
		old
	}

	/// Mark slot `idx` most recently used.
	pub fn move_to_front(&mut self, idx: usize) {
		if self.head == idx {
			return;
		}
		self.unlink(idx);
		self.link_front(idx);
	}

	/// Remove slot `idx` and return its value.
	pub fn remove(&mut self, idx: usize) -> V {
		let value = self.nodes[idx].value.take().expect("recency slot is occupied");
		self.unlink(idx);
		self.nodes[idx].next = self.free;
		self.free = idx;
		self.len -= 1;
		value
	}

	/// Slots from least to most recently used.
	pub fn iter_lru(&self) -> LruIter<'_, V> {
		LruIter {
			list: self,
			cursor: self.tail,
		}
	}

	pub fn clear(&mut self) {
		self.nodes.clear();
		self.head = NIL;
		self.tail = NIL;
		self.free = NIL;
		self.len = 0;
	}

	fn link_front(&mut self, idx: usize) {
		self.nodes[idx].prev = NIL;
		self.nodes[idx].next = self.head;
		if self.head != NIL {
			self.nodes[self.head].prev = idx;
		}
		self.head = idx;
		if self.tail == NIL {
			self.tail = idx;
		}
	}

	fn unlink(&mut self, idx: usize) {
		let prev = self.nodes[idx].prev;
		let next = self.nodes[idx].next;

		if prev != NIL {
			self.nodes[prev].next = next;
		} else {
			self.head = next;
		}

		if next != NIL {
			self.nodes[next].prev = prev;
		} else {
			self.tail = prev;
		}

		self.nodes[idx].prev = NIL;
		self.nodes[idx].next = NIL;
	}
}

pub(crate) struct LruIter<'a, V> {
	list: &'a RecencyList<V>,
	cursor: usize,
}

impl<'a, V> Iterator for LruIter<'a, V> {
	type Item = (usize, &'a V);

	fn next(&mut self) -> Option<Self::Item> {
		if self.cursor == NIL {
			return None;
		}
		let idx = self.cursor;
		let node = &self.list.nodes[idx];
		self.cursor = node.prev;
		node.value.as_ref().map(|value| (idx, value))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn lru_order(list: &RecencyList<u32>) -> Vec<u32> {
		list.iter_lru().map(|(_, v)| *v).collect()
	}

	#[test]
	fn test_push_and_order() {
		let mut list = RecencyList::new();
		list.push_front(1);
		list.push_front(2);
		list.push_front(3);
		assert_eq!(list.len(), 3);
		assert_eq!(lru_order(&list), vec![1, 2, 3]);
	}

	#[test]
	fn test_move_to_front() {
		let mut list = RecencyList::new();
		let a = list.push_front(1);
		list.push_front(2);
		list.push_front(3);

		list.move_to_front(a);
		assert_eq!(lru_order(&list), vec![2, 3, 1]);
	}

	#[test]
	fn test_remove_recycles_slots() {
		let mut list = RecencyList::new();
		let a = list.push_front(1);
		let b = list.push_front(2);
		list.push_front(3);

		assert_eq!(list.remove(b), 2);
		assert_eq!(lru_order(&list), vec![1, 3]);
		assert!(list.get(b).is_none());

		let d = list.push_front(4);
		assert_eq!(d, b);
		assert_eq!(lru_order(&list), vec![1, 3, 4]);

		assert_eq!(list.remove(a), 1);
		assert_eq!(lru_order(&list), vec![3, 4]);
		assert_eq!(list.slot_count(), 3);
	}

	#[test]
	fn test_get_mut_keeps_order() {
		let mut list = RecencyList::new();
		let a = list.push_front(1);
		list.push_front(2);

		*list.get_mut(a).expect("slot is occupied") = 7;
		assert_eq!(lru_order(&list), vec![7, 2]);
		assert!(list.get_mut(5).is_none());
	}

	#[test]
	fn test_replace_moves_to_front() {
		let mut list = RecencyList::new();
		let a = list.push_front(1);
		list.push_front(2);

		assert_eq!(list.replace(a, 10), 1);
		assert_eq!(lru_order(&list), vec![2, 10]);
	}

	#[test]
	fn test_clear() {
		let mut list = RecencyList::new();
		list.push_front(1);
		list.clear();
		assert!(list.is_empty());
		assert_eq!(lru_order(&list), Vec::<u32>::new());
	}
}
