//! Bounded FIFO queue whose entries can be cleared in place.

/// A first-in-first-out queue with a fixed number of slots.
///
/// Pushing an item returns a [`SlotHandle`] that identifies the slot the
/// item occupies. The handle can later be used to clear the item in constant
/// time without disturbing the order of the remaining items. Cleared slots
/// are skipped when popping and are reclaimed once they reach the front.
#[derive(Clone, Debug)]
pub struct SlotQueue<T> {
    slots: Vec<Option<Entry<T>>>,
    head: u64,
    tail: u64,
    n_items: usize,
}

/// Identifies the slot occupied by an item in a [`SlotQueue`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SlotHandle {
    sequence: u64,
}

#[derive(Clone, Debug)]
struct Entry<T> {
    sequence: u64,
    item: T,
}

impl<T> SlotQueue<T> {
    /// Creates a new empty queue with room for the given number of items.
    ///
    /// # Panics
    /// If `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "Tried to create slot queue without capacity");
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            tail: 0,
            n_items: 0,
        }
    }

    /// Returns the maximum number of slots in the queue.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of items currently in the queue. Cleared slots are
    /// not counted.
    pub fn len(&self) -> usize {
        self.n_items
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.n_items == 0
    }

    /// Whether a push would currently be rejected.
    pub fn is_full(&self) -> bool {
        self.occupied_span() == self.capacity() && self.front_slot_is_live()
    }

    /// Appends the given item to the back of the queue.
    ///
    /// # Errors
    /// Gives the item back if every slot is occupied by a live item.
    pub fn push_back(&mut self, item: T) -> Result<SlotHandle, T> {
        self.reclaim_cleared_front_slots();

        if self.occupied_span() == self.capacity() {
            return Err(item);
        }

        let sequence = self.tail;
        let slot_idx = self.slot_idx(sequence);
        self.slots[slot_idx] = Some(Entry { sequence, item });
        self.tail += 1;
        self.n_items += 1;

        Ok(SlotHandle { sequence })
    }

    /// Removes and returns the item at the front of the queue, skipping any
    /// cleared slots.
    pub fn pop_front(&mut self) -> Option<T> {
        while self.head < self.tail {
            let slot_idx = self.slot_idx(self.head);
            self.head += 1;
            if let Some(entry) = self.slots[slot_idx].take() {
                self.n_items -= 1;
                return Some(entry.item);
            }
        }
        None
    }

    /// Returns a reference to the item at the front of the queue.
    pub fn front(&self) -> Option<&T> {
        self.iter().next()
    }

    /// Removes the item in the slot identified by the given handle.
    ///
    /// # Returns
    /// The removed item, or [`None`] if the slot was already cleared or
    /// popped.
    pub fn clear_slot(&mut self, handle: SlotHandle) -> Option<T> {
        if handle.sequence < self.head || handle.sequence >= self.tail {
            return None;
        }
        let slot_idx = self.slot_idx(handle.sequence);
        let slot = &mut self.slots[slot_idx];
        if slot
            .as_ref()
            .is_some_and(|entry| entry.sequence == handle.sequence)
        {
            self.n_items -= 1;
            slot.take().map(|entry| entry.item)
        } else {
            None
        }
    }

    /// Whether the slot identified by the given handle still holds its item.
    pub fn holds(&self, handle: SlotHandle) -> bool {
        handle.sequence >= self.head
            && handle.sequence < self.tail
            && self.slots[self.slot_idx(handle.sequence)]
                .as_ref()
                .is_some_and(|entry| entry.sequence == handle.sequence)
    }

    /// Returns an iterator over the items in the queue from front to back.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        (self.head..self.tail).filter_map(|sequence| {
            self.slots[self.slot_idx(sequence)]
                .as_ref()
                .map(|entry| &entry.item)
        })
    }

    /// Removes every item from the queue.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = self.tail;
        self.n_items = 0;
    }

    fn reclaim_cleared_front_slots(&mut self) {
        while self.head < self.tail && !self.front_slot_is_live() {
            self.head += 1;
        }
    }

    fn front_slot_is_live(&self) -> bool {
        self.head < self.tail && self.slots[self.slot_idx(self.head)].is_some()
    }

    fn occupied_span(&self) -> usize {
        (self.tail - self.head) as usize
    }

    fn slot_idx(&self, sequence: u64) -> usize {
        (sequence % self.slots.len() as u64) as usize
    }
}
