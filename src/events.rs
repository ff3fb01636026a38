//! A bounded-horizon scheduler indexed by integer time step.
//!
//! The queue is a ring of `24 × simulation_days` slots, each holding an
//! unordered vector of agents to process at that step. Slots are small
//! (a few to a few hundred entries), so linear-scan deletion within a
//! slot beats a priority queue with decrease-key for this workload, and
//! since the horizon is known up front there is no circular index
//! arithmetic.
//!
//! Scheduling outside `[0, horizon)` is a documented silent no-op: it
//! keeps the hot paths branch-cheap near the end of the simulation.
//! Deleting an event that is not present is a warning, not an error,
//! because callers remove speculatively. Processing order within a
//! step is unordered; callers must be commutative up to the daily
//! counter snapshot.

use crate::error::ContagionError;
use crate::people::PersonId;
use crate::warn;

#[derive(Debug, Default)]
pub struct EventQueue {
    slots: Vec<Vec<PersonId>>,
}

impl EventQueue {
    /// Creates a queue with `horizon` slots (typically
    /// `24 × simulation_days`).
    #[must_use]
    pub fn new(horizon: u32) -> Self {
        Self {
            slots: vec![Vec::new(); horizon as usize],
        }
    }

    #[must_use]
    pub fn horizon(&self) -> i64 {
        self.slots.len() as i64
    }

    fn in_range(&self, step: i64) -> bool {
        0 <= step && step < self.horizon()
    }

    /// Appends `person` to the slot for `step`. Out-of-range steps are
    /// dropped silently; they cannot occur during this simulation.
    pub fn add_event(&mut self, step: i64, person: PersonId) {
        if !self.in_range(step) {
            return;
        }
        let slot = &mut self.slots[step as usize];
        if slot.len() == slot.capacity() {
            if slot.capacity() < 4 {
                slot.reserve(4);
            } else {
                slot.reserve(slot.capacity());
            }
        }
        slot.push(person);
    }

    /// Removes one scheduled entry for `person` at `step` by swapping
    /// the last entry into its place. Absent entries only warn: the
    /// caller may be cancelling speculatively.
    pub fn delete_event(&mut self, step: i64, person: PersonId) {
        if !self.in_range(step) {
            return;
        }
        let slot = &mut self.slots[step as usize];
        if let Some(pos) = slot.iter().position(|p| *p == person) {
            slot.swap_remove(pos);
        } else {
            warn!("delete_event: person {person} not found at step {step}");
        }
    }

    /// Resets the slot for `step`.
    ///
    /// # Panics
    /// Panics if `step` is out of range; unlike scheduling, clearing a
    /// nonexistent slot is a programmer error.
    pub fn clear_events(&mut self, step: i64) {
        assert!(self.in_range(step), "clear_events: step {step} out of range");
        self.slots[step as usize] = Vec::new();
    }

    /// The number of events scheduled at `step`.
    ///
    /// # Panics
    /// Panics if `step` is out of range.
    #[must_use]
    pub fn get_size(&self, step: i64) -> usize {
        assert!(self.in_range(step), "get_size: step {step} out of range");
        self.slots[step as usize].len()
    }

    /// The `i`th event at `step`, in no particular order.
    pub fn get_event(&self, step: i64, i: usize) -> Result<PersonId, ContagionError> {
        assert!(self.in_range(step), "get_event: step {step} out of range");
        let slot = &self.slots[step as usize];
        slot.get(i).copied().ok_or_else(|| {
            ContagionError::OutOfRange(format!(
                "get_event: i = {i} size = {} at step {step}",
                slot.len()
            ))
        })
    }

    /// Drains the slot for `step`, returning its contents.
    pub fn drain(&mut self, step: i64) -> Vec<PersonId> {
        if !self.in_range(step) {
            return Vec::new();
        }
        std::mem::take(&mut self.slots[step as usize])
    }
}
