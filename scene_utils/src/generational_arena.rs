//! Slot arena with generation-checked indices.

use bytemuck::{Pod, Zeroable};
use std::cmp;

/// An arena of elements stored in a [`Vec`] of slots, where the slot of a
/// removed element is reused by the next insertion.
///
/// Every slot carries a generation that is advanced when its element is
/// removed. The generation is baked into the [`ArenaIdx`] handed out on
/// insertion, so an index that outlives its element can never be used to
/// reach whatever element later occupies the same slot.
#[derive(Clone, Debug)]
pub struct GenerationalArena<T> {
    slots: Vec<Slot<T>>,
    free_slots: Vec<u32>,
    n_elements: usize,
}

/// A handle to an element in a [`GenerationalArena`].
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Zeroable, Pod)]
pub struct ArenaIdx {
    idx: u32,
    generation: u32,
}

#[derive(Clone, Debug)]
struct Slot<T> {
    generation: u32,
    element: Option<T>,
}

impl<T> GenerationalArena<T> {
    /// Creates a new empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            n_elements: 0,
        }
    }

    /// Returns the number of live elements in the arena.
    pub fn len(&self) -> usize {
        self.n_elements
    }

    /// Whether the arena has no live elements.
    pub fn is_empty(&self) -> bool {
        self.n_elements == 0
    }

    /// Whether the given index refers to a live element.
    pub fn contains(&self, idx: ArenaIdx) -> bool {
        self.get(idx).is_some()
    }

    /// Returns a reference to the element at the given index, or [`None`] if
    /// the element has been removed or the index belongs to another arena.
    pub fn get(&self, idx: ArenaIdx) -> Option<&T> {
        self.slots
            .get(idx.slot())
            .filter(|slot| slot.generation == idx.generation)
            .and_then(|slot| slot.element.as_ref())
    }

    /// Returns a mutable reference to the element at the given index, or
    /// [`None`] if the element has been removed or the index belongs to
    /// another arena.
    pub fn get_mut(&mut self, idx: ArenaIdx) -> Option<&mut T> {
        self.slots
            .get_mut(idx.slot())
            .filter(|slot| slot.generation == idx.generation)
            .and_then(|slot| slot.element.as_mut())
    }

    /// Returns a reference to the element at the given index.
    ///
    /// # Panics
    /// If the index does not refer to a live element.
    pub fn element(&self, idx: ArenaIdx) -> &T {
        self.get(idx)
            .expect("Tried to access arena element with stale or invalid index")
    }

    /// Returns a mutable reference to the element at the given index.
    ///
    /// # Panics
    /// If the index does not refer to a live element.
    pub fn element_mut(&mut self, idx: ArenaIdx) -> &mut T {
        self.get_mut(idx)
            .expect("Tried to access arena element with stale or invalid index")
    }

    /// Inserts the given element, reusing a vacated slot if one is available.
    ///
    /// # Returns
    /// The index of the inserted element.
    pub fn insert(&mut self, element: T) -> ArenaIdx {
        self.n_elements += 1;

        if let Some(slot_idx) = self.free_slots.pop() {
            let slot = &mut self.slots[slot_idx as usize];
            slot.element = Some(element);
            ArenaIdx::new(slot_idx, slot.generation)
        } else {
            let slot_idx = u32::try_from(self.slots.len())
                .expect("Number of arena slots exceeds `u32::MAX`");
            self.slots.push(Slot {
                generation: 0,
                element: Some(element),
            });
            ArenaIdx::new(slot_idx, 0)
        }
    }

    /// Removes the element at the given index and advances the generation of
    /// its slot.
    ///
    /// # Returns
    /// The removed element, or [`None`] if the index did not refer to a live
    /// element.
    pub fn remove(&mut self, idx: ArenaIdx) -> Option<T> {
        let slot = self
            .slots
            .get_mut(idx.slot())
            .filter(|slot| slot.generation == idx.generation)?;

        let element = slot.element.take()?;
        slot.generation = slot.generation.wrapping_add(1);

        self.free_slots.push(idx.idx);
        self.n_elements -= 1;

        Some(element)
    }

    /// Removes every element from the arena. All previously issued indices
    /// become stale.
    pub fn clear(&mut self) {
        self.free_slots.clear();
        for (slot_idx, slot) in self.slots.iter_mut().enumerate().rev() {
            if slot.element.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free_slots.push(slot_idx as u32);
        }
        self.n_elements = 0;
    }

    /// Returns an iterator over the indices of all live elements, in slot
    /// order.
    pub fn indices(&self) -> impl Iterator<Item = ArenaIdx> + '_ {
        self.iter().map(|(idx, _)| idx)
    }

    /// Returns an iterator over all live elements and their indices, in slot
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIdx, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot_idx, slot)| {
                slot.element
                    .as_ref()
                    .map(|element| (ArenaIdx::new(slot_idx as u32, slot.generation), element))
            })
    }
}

impl<T> Default for GenerationalArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaIdx {
    fn new(idx: u32, generation: u32) -> Self {
        Self { idx, generation }
    }

    fn slot(&self) -> usize {
        self.idx as usize
    }
}

impl Ord for ArenaIdx {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.idx
            .cmp(&other.idx)
            .then(self.generation.cmp(&other.generation))
    }
}

impl PartialOrd for ArenaIdx {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}
