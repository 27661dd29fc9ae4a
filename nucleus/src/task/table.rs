use alloc::vec::Vec;
use core::hash::Hash;

use hashbrown::HashMap;

/// An entry of a fixed-capacity table.
pub trait Slot: Default {
    type Id: Copy + Eq + Hash;

    fn id(&self) -> Self::Id;
    fn is_dead(&self) -> bool;
    /// Allocated but not yet dispatched.
    fn is_new(&self) -> bool;

    /// A slot is live unless it is dead, but a freshly allocated slot counts as live.
    #[inline]
    fn is_valid(&self) -> bool {
        !self.is_dead() || self.is_new()
    }
}

/// Fixed-capacity slot storage with an id index.
///
/// The first `reserved` slots are never handed out by `alloc`.
pub struct SlotTable<T: Slot> {
    slots: Vec<T>,
    index: HashMap<T::Id, usize>,
    reserved: usize,
}

impl<T: Slot> SlotTable<T> {
    pub fn new(capacity: usize, reserved: usize) -> Self {
        debug_assert!(reserved <= capacity);
        Self {
            slots: (0..capacity).map(|_| T::default()).collect(),
            index: HashMap::new(),
            reserved,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_valid()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index of the first free unreserved slot.
    pub fn free_slot(&self) -> Option<usize> {
        (self.reserved..self.slots.len()).find(|&i| !self.slots[i].is_valid())
    }

    /// Place `value` in slot `i` and index it.
    pub fn install(&mut self, i: usize, value: T) -> &mut T {
        debug_assert!(!self.slots[i].is_valid());
        self.index.insert(value.id(), i);
        self.slots[i] = value;
        &mut self.slots[i]
    }

    /// Return the slot holding `id` to the free pool.
    pub fn free(&mut self, id: T::Id) -> Option<T> {
        let i = self.index.remove(&id)?;
        Some(core::mem::take(&mut self.slots[i]))
    }

    pub fn slot_of(&self, id: T::Id) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn get(&self, id: T::Id) -> Option<&T> {
        let slot = &self.slots[*self.index.get(&id)?];
        if slot.is_valid() {
            Some(slot)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, id: T::Id) -> Option<&mut T> {
        let i = *self.index.get(&id)?;
        let slot = &mut self.slots[i];
        if slot.is_valid() {
            Some(slot)
        } else {
            None
        }
    }

    /// Valid entries in table order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter().filter(|s| s.is_valid())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots.iter_mut().filter(|s| s.is_valid())
    }

    /// Ids of valid entries in table order.
    pub fn ids(&self) -> Vec<T::Id> {
        self.iter().map(|s| s.id()).collect()
    }
}
