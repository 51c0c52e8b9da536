//! Snapshot slot with a dirty flag.
//!
//! A `DirtySlot` holds the latest successfully synchronized snapshot of some
//! locally enforced state plus a marker that it has not been forwarded
//! upstream yet. It is a plain value: callers put it behind whatever lock
//! guards the rest of their shared status.
//!
//! Clearing is acknowledgement-based. A reader takes a `Pending` copy that
//! records the generation it saw; acknowledging that copy clears the flag only
//! if no newer snapshot was published in between.

/// Generation-stamped copy of a dirty snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Pending<T> {
    pub value: T,
    pub generation: u64,
}

#[derive(Debug, Clone, Default)]
pub struct DirtySlot<T> {
    value: T,
    dirty: bool,
    generation: u64,
}

impl<T: Clone> DirtySlot<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            dirty: false,
            generation: 0,
        }
    }

    /// Replace the snapshot and mark it dirty.
    pub fn publish(&mut self, value: T) -> u64 {
        self.value = value;
        self.dirty = true;
        self.generation += 1;
        self.generation
    }

    /// Copy the snapshot if it has not been acknowledged.
    pub fn pending(&self) -> Option<Pending<T>> {
        self.dirty.then(|| Pending {
            value: self.value.clone(),
            generation: self.generation,
        })
    }

    /// Clear the dirty flag if `generation` is still the latest.
    ///
    /// Returns true if the flag was cleared.
    pub fn acknowledge(&mut self, generation: u64) -> bool {
        if self.dirty && generation == self.generation {
            self.dirty = false;
            return true;
        }
        false
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn value(&self) -> &T {
        &self.value
    }
}
