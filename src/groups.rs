//! Mixing groups: the places agents share and the per-group state the
//! transmission loop reads.
//!
//! A group keeps an ordered member list with O(1) enroll and O(1)
//! swap-with-back removal; the position a member occupies is mirrored
//! on the `Person` and must always equal the position at which that
//! person appears here. Groups also keep per-condition infectious-member
//! lists (rebuilt daily by the epidemic update, read by transmission)
//! and per-condition daily counters gated by a `last_update` day.

use serde::Serialize;

use crate::condition::ConditionId;
use crate::hash::HashMap;
use crate::people::PersonId;
use crate::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GroupId(pub usize);

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GroupTypeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaceKind {
    Household,
    School,
    Workplace,
    Neighborhood,
}

impl PlaceKind {
    /// One-letter tag used in health-record lines.
    #[must_use]
    pub fn tag(self) -> char {
        match self {
            PlaceKind::Household => 'H',
            PlaceKind::School => 'S',
            PlaceKind::Workplace => 'W',
            PlaceKind::Neighborhood => 'N',
        }
    }
}

/// Contact parameters shared by every group of one type. Rates and
/// probabilities are per condition.
#[derive(Debug, Clone)]
pub struct GroupType {
    pub name: String,
    pub kind: PlaceKind,
    contact_rate: Vec<f64>,
    transmission_prob: Vec<f64>,
}

impl GroupType {
    #[must_use]
    pub fn new(name: &str, kind: PlaceKind, conditions: usize) -> Self {
        Self {
            name: name.to_string(),
            kind,
            contact_rate: vec![0.0; conditions],
            transmission_prob: vec![0.0; conditions],
        }
    }

    pub fn set_rates(&mut self, condition_id: ConditionId, contact_rate: f64, prob: f64) {
        self.contact_rate[condition_id] = contact_rate;
        self.transmission_prob[condition_id] = prob;
    }

    #[must_use]
    pub fn contacts_per_day(&self, condition_id: ConditionId) -> f64 {
        self.contact_rate[condition_id]
    }

    #[must_use]
    pub fn transmission_prob(&self, condition_id: ConditionId) -> f64 {
        self.transmission_prob[condition_id]
    }
}

/// Per-condition daily counters. `last_update` gates the "current"
/// counters: on the first increment of a new day they restart from
/// zero, so reads for an older day are zero.
#[derive(Debug, Clone, Default)]
struct GroupCounters {
    last_update: i64,
    new_infections: Vec<u32>,
    current_infections: Vec<u32>,
    new_symptomatic: Vec<u32>,
    current_symptomatic: Vec<u32>,
    current_case_fatalities: Vec<u32>,
    total_infections: Vec<u32>,
    total_symptomatic: Vec<u32>,
    total_case_fatalities: Vec<u32>,
}

impl GroupCounters {
    fn new(conditions: usize) -> Self {
        Self {
            last_update: -1,
            new_infections: vec![0; conditions],
            current_infections: vec![0; conditions],
            new_symptomatic: vec![0; conditions],
            current_symptomatic: vec![0; conditions],
            current_case_fatalities: vec![0; conditions],
            total_infections: vec![0; conditions],
            total_symptomatic: vec![0; conditions],
            total_case_fatalities: vec![0; conditions],
        }
    }

    fn roll_day(&mut self, day: u32) {
        if self.last_update < i64::from(day) {
            self.last_update = i64::from(day);
            self.new_infections.iter_mut().for_each(|c| *c = 0);
            self.current_infections.iter_mut().for_each(|c| *c = 0);
            self.new_symptomatic.iter_mut().for_each(|c| *c = 0);
            self.current_symptomatic.iter_mut().for_each(|c| *c = 0);
            self.current_case_fatalities.iter_mut().for_each(|c| *c = 0);
        }
    }

    fn current_for(&self, day: u32, values: &[u32], condition_id: ConditionId) -> u32 {
        if self.last_update < i64::from(day) {
            0
        } else {
            values[condition_id]
        }
    }
}

#[derive(Debug)]
pub struct MixingGroup {
    pub id: GroupId,
    pub label: String,
    pub group_type: GroupTypeId,
    members: Vec<PersonId>,
    infectious: Vec<Vec<PersonId>>,
    counters: GroupCounters,
    first_day_infectious: i64,
    last_day_infectious: i64,
}

impl MixingGroup {
    #[must_use]
    pub fn new(id: GroupId, label: &str, group_type: GroupTypeId, conditions: usize) -> Self {
        Self {
            id,
            label: label.to_string(),
            group_type,
            members: Vec::new(),
            infectious: vec![Vec::new(); conditions],
            counters: GroupCounters::new(conditions),
            first_day_infectious: -1,
            last_day_infectious: -2,
        }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn members(&self) -> &[PersonId] {
        &self.members
    }

    #[must_use]
    pub fn member(&self, pos: usize) -> PersonId {
        self.members[pos]
    }

    /// Appends `person` and returns the position it occupies. The
    /// caller records that position on the person.
    pub fn enroll(&mut self, person: PersonId) -> usize {
        if self.members.len() == self.members.capacity() {
            self.members.reserve(self.members.len().max(2));
        }
        self.members.push(person);
        self.members.len() - 1
    }

    /// Removes the member at `pos` by swapping the last member into its
    /// place. Returns the displaced member and its new position, which
    /// the caller must write back to that person.
    ///
    /// # Panics
    /// Panics if `pos` is out of range: a stale stored index is a
    /// broken invariant, not a recoverable state.
    pub fn unenroll(&mut self, pos: usize) -> Option<(PersonId, usize)> {
        let size = self.members.len();
        assert!(pos < size, "unenroll: pos {pos} out of range {size}");
        self.members.swap_remove(pos);
        if pos < size - 1 {
            Some((self.members[pos], pos))
        } else {
            None
        }
    }

    pub fn add_infectious(&mut self, condition_id: ConditionId, person: PersonId) {
        self.infectious[condition_id].push(person);
    }

    pub fn clear_infectious(&mut self, condition_id: ConditionId) {
        self.infectious[condition_id].clear();
    }

    #[must_use]
    pub fn infectious_people(&self, condition_id: ConditionId) -> &[PersonId] {
        &self.infectious[condition_id]
    }

    #[must_use]
    pub fn has_infectious(&self, condition_id: ConditionId) -> bool {
        !self.infectious[condition_id].is_empty()
    }

    pub fn record_infectious_day(&mut self, day: u32) {
        if self.first_day_infectious == -1 {
            self.first_day_infectious = i64::from(day);
        }
        self.last_day_infectious = i64::from(day);
    }

    #[must_use]
    pub fn first_day_infectious(&self) -> i64 {
        self.first_day_infectious
    }

    #[must_use]
    pub fn last_day_infectious(&self) -> i64 {
        self.last_day_infectious
    }

    pub fn increment_new_infections(&mut self, day: u32, condition_id: ConditionId) {
        self.counters.roll_day(day);
        self.counters.new_infections[condition_id] += 1;
        self.counters.total_infections[condition_id] += 1;
    }

    pub fn increment_current_infections(&mut self, day: u32, condition_id: ConditionId) {
        self.counters.roll_day(day);
        self.counters.current_infections[condition_id] += 1;
    }

    pub fn increment_new_symptomatic(&mut self, day: u32, condition_id: ConditionId) {
        self.counters.roll_day(day);
        self.counters.new_symptomatic[condition_id] += 1;
        self.counters.total_symptomatic[condition_id] += 1;
    }

    pub fn increment_current_symptomatic(&mut self, day: u32, condition_id: ConditionId) {
        self.counters.roll_day(day);
        self.counters.current_symptomatic[condition_id] += 1;
    }

    pub fn increment_case_fatalities(&mut self, day: u32, condition_id: ConditionId) {
        self.counters.roll_day(day);
        self.counters.current_case_fatalities[condition_id] += 1;
        self.counters.total_case_fatalities[condition_id] += 1;
    }

    #[must_use]
    pub fn new_infections(&self, day: u32, condition_id: ConditionId) -> u32 {
        self.counters
            .current_for(day, &self.counters.new_infections, condition_id)
    }

    #[must_use]
    pub fn current_infections(&self, day: u32, condition_id: ConditionId) -> u32 {
        self.counters
            .current_for(day, &self.counters.current_infections, condition_id)
    }

    #[must_use]
    pub fn new_symptomatic(&self, day: u32, condition_id: ConditionId) -> u32 {
        self.counters
            .current_for(day, &self.counters.new_symptomatic, condition_id)
    }

    #[must_use]
    pub fn current_symptomatic(&self, day: u32, condition_id: ConditionId) -> u32 {
        self.counters
            .current_for(day, &self.counters.current_symptomatic, condition_id)
    }

    #[must_use]
    pub fn total_infections(&self, condition_id: ConditionId) -> u32 {
        self.counters.total_infections[condition_id]
    }

    #[must_use]
    pub fn total_symptomatic(&self, condition_id: ConditionId) -> u32 {
        self.counters.total_symptomatic[condition_id]
    }

    #[must_use]
    pub fn total_case_fatalities(&self, condition_id: ConditionId) -> u32 {
        self.counters.total_case_fatalities[condition_id]
    }

    /// Attack rate as a percentage of current group size.
    #[must_use]
    pub fn attack_rate(&self, condition_id: ConditionId) -> f64 {
        let n = self.size();
        if n > 0 {
            100.0 * f64::from(self.counters.total_infections[condition_id]) / n as f64
        } else {
            0.0
        }
    }
}

/// The owner of every place in the simulation.
#[derive(Debug, Default)]
pub struct PlaceList {
    types: Vec<GroupType>,
    places: Vec<MixingGroup>,
    labels: HashMap<String, GroupId>,
}

impl PlaceList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_group_type(&mut self, group_type: GroupType) -> GroupTypeId {
        self.types.push(group_type);
        GroupTypeId(self.types.len() - 1)
    }

    #[must_use]
    pub fn group_type(&self, id: GroupTypeId) -> &GroupType {
        &self.types[id.0]
    }

    pub fn group_type_mut(&mut self, id: GroupTypeId) -> &mut GroupType {
        &mut self.types[id.0]
    }

    #[must_use]
    pub fn group_type_count(&self) -> usize {
        self.types.len()
    }

    pub fn find_group_type(&self, name: &str) -> Option<GroupTypeId> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .map(GroupTypeId)
    }

    /// Creates a place. Duplicate labels can legitimately occur across
    /// adjacent administrative areas, so they warn rather than fail;
    /// the first label keeps the lookup entry.
    pub fn add_place(
        &mut self,
        label: &str,
        group_type: GroupTypeId,
        conditions: usize,
    ) -> GroupId {
        let id = GroupId(self.places.len());
        if self.labels.contains_key(label) {
            warn!("duplicate place label {label}");
        } else {
            self.labels.insert(label.to_string(), id);
        }
        self.places.push(MixingGroup::new(id, label, group_type, conditions));
        id
    }

    #[must_use]
    pub fn get(&self, id: GroupId) -> &MixingGroup {
        &self.places[id.0]
    }

    pub fn get_mut(&mut self, id: GroupId) -> &mut MixingGroup {
        &mut self.places[id.0]
    }

    pub fn find(&self, label: &str) -> Option<GroupId> {
        self.labels.get(label).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.places.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = GroupId> + '_ {
        (0..self.places.len()).map(GroupId)
    }

    #[must_use]
    pub fn kind_of(&self, id: GroupId) -> PlaceKind {
        self.types[self.places[id.0].group_type.0].kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> MixingGroup {
        MixingGroup::new(GroupId(0), "hh-1", GroupTypeId(0), 1)
    }

    #[test]
    fn enroll_returns_positions() {
        let mut g = group();
        assert_eq!(g.enroll(PersonId(10)), 0);
        assert_eq!(g.enroll(PersonId(11)), 1);
        assert_eq!(g.enroll(PersonId(12)), 2);
        assert_eq!(g.size(), 3);
    }

    #[test]
    fn unenroll_swaps_with_back() {
        let mut g = group();
        for i in 0..5 {
            g.enroll(PersonId(i));
        }
        // Removing the middle member moves the last member into its slot.
        let moved = g.unenroll(2);
        assert_eq!(moved, Some((PersonId(4), 2)));
        assert_eq!(g.member(2), PersonId(4));
        assert_eq!(g.size(), 4);
        // Removing the final member displaces nobody.
        let moved = g.unenroll(3);
        assert_eq!(moved, None);
    }

    #[test]
    fn enroll_unenroll_round_trip() {
        let mut g = group();
        for i in 0..3 {
            g.enroll(PersonId(i));
        }
        let pos = g.enroll(PersonId(99));
        g.unenroll(pos);
        assert_eq!(g.size(), 3);
        assert_eq!(g.members(), &[PersonId(0), PersonId(1), PersonId(2)]);
    }

    #[test]
    fn infectious_lists_are_per_condition() {
        let mut g = MixingGroup::new(GroupId(0), "x", GroupTypeId(0), 2);
        g.add_infectious(0, PersonId(1));
        g.add_infectious(1, PersonId(2));
        assert!(g.has_infectious(0));
        assert_eq!(g.infectious_people(1), &[PersonId(2)]);
        g.clear_infectious(0);
        assert!(!g.has_infectious(0));
        assert!(g.has_infectious(1));
    }

    #[test]
    fn counters_roll_on_day_change() {
        let mut g = group();
        g.enroll(PersonId(0));
        g.increment_new_infections(3, 0);
        g.increment_new_infections(3, 0);
        assert_eq!(g.new_infections(3, 0), 2);
        assert_eq!(g.total_infections(0), 2);

        // A new day resets the daily counters before incrementing.
        g.increment_new_infections(4, 0);
        assert_eq!(g.new_infections(4, 0), 1);
        assert_eq!(g.total_infections(0), 3);
        // Reads for a later day with no increments yet see zero.
        assert_eq!(g.new_infections(5, 0), 0);
    }

    #[test]
    fn infectious_day_span() {
        let mut g = group();
        assert_eq!(g.first_day_infectious(), -1);
        g.record_infectious_day(7);
        g.record_infectious_day(9);
        assert_eq!(g.first_day_infectious(), 7);
        assert_eq!(g.last_day_infectious(), 9);
    }

    #[test]
    fn place_list_duplicate_label_warns_not_fails() {
        let mut places = PlaceList::new();
        let t = places.add_group_type(GroupType::new("household", PlaceKind::Household, 1));
        let a = places.add_place("hh-1", t, 1);
        let b = places.add_place("hh-1", t, 1);
        assert_ne!(a, b);
        // Lookup keeps the first.
        assert_eq!(places.find("hh-1"), Some(a));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn unenroll_bad_pos_panics() {
        let mut g = group();
        g.enroll(PersonId(0));
        g.unenroll(5);
    }
}
