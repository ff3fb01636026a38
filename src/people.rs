//! The population store.
//!
//! Agents are owned here; every other structure (groups, networks,
//! epidemics) refers to them by [`PersonId`] and holds no ownership.
//! Back-references on the person (group membership positions, network
//! link records, partner records) are unwound during termination before
//! the slot is marked dead, so the ownership graph stays acyclic.

use crate::groups::GroupId;
use crate::hash::HashMap;
use crate::health::Health;
use crate::network::PersonNetworkLink;
use crate::sexual_network::Relationships;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct PersonId(pub usize);

impl std::fmt::Display for PersonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    #[must_use]
    pub fn tag(self) -> char {
        match self {
            Sex::Male => 'M',
            Sex::Female => 'F',
        }
    }
}

/// Household structure taxonomy, collapsed to the classes the engine
/// distinguishes. Family pair/parent households get the in-household
/// monogamous matching pass; institutional quarters are excluded from
/// the partner network entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HouseholdType {
    SingleFemale,
    SingleMale,
    OppSexSimAgePair,
    OppSexDifAgePair,
    OppSexTwoParentFamily,
    SingleParentFamily,
    SingleParentMultigenFamily,
    TwoParentMultigenFamily,
    YoungRoomies,
    OlderRoomies,
    MixedRoomies,
    /// Dorms, cells, barracks, nursing homes.
    Institutional,
    Other,
}

impl HouseholdType {
    /// Family households whose members are matched in-household first.
    #[must_use]
    pub fn is_family(self) -> bool {
        matches!(
            self,
            HouseholdType::OppSexSimAgePair
                | HouseholdType::OppSexDifAgePair
                | HouseholdType::OppSexTwoParentFamily
                | HouseholdType::TwoParentMultigenFamily
        )
    }

    /// Whether members may enter the sexual-partner network at all.
    #[must_use]
    pub fn partnership_eligible(self) -> bool {
        !matches!(self, HouseholdType::Institutional | HouseholdType::Other)
    }

    pub fn from_label(label: &str) -> Self {
        match label {
            "single-female" => HouseholdType::SingleFemale,
            "single-male" => HouseholdType::SingleMale,
            "opp-sex-sim-age-pair" => HouseholdType::OppSexSimAgePair,
            "opp-sex-dif-age-pair" => HouseholdType::OppSexDifAgePair,
            "opp-sex-two-parent-family" => HouseholdType::OppSexTwoParentFamily,
            "single-parent-family" => HouseholdType::SingleParentFamily,
            "single-parent-multigen-family" => HouseholdType::SingleParentMultigenFamily,
            "two-parent-multigen-family" => HouseholdType::TwoParentMultigenFamily,
            "young-roomies" => HouseholdType::YoungRoomies,
            "older-roomies" => HouseholdType::OlderRoomies,
            "mixed-roomies" => HouseholdType::MixedRoomies,
            "dorm-mates" | "cell-mates" | "barrack-mates" | "nursing-home-mates" => {
                HouseholdType::Institutional
            }
            _ => HouseholdType::Other,
        }
    }
}

/// A place membership back-reference: the group and the position this
/// person occupies in its member list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub group: GroupId,
    pub index: usize,
}

/// Demographics supplied when a person enters the population.
#[derive(Debug, Clone)]
pub struct PersonSpec {
    pub age: f64,
    pub sex: Sex,
    pub race: i32,
    pub admin_code: i64,
    pub household_type: HouseholdType,
    /// Ordinal day of year of the person's birthday, for annual checks.
    pub birth_day_of_year: u32,
}

impl Default for PersonSpec {
    fn default() -> Self {
        Self {
            age: 30.0,
            sex: Sex::Female,
            race: 0,
            admin_code: 0,
            household_type: HouseholdType::Other,
            birth_day_of_year: 1,
        }
    }
}

#[derive(Debug)]
pub struct Person {
    id: PersonId,
    age: f64,
    sex: Sex,
    race: i32,
    admin_code: i64,
    household_type: HouseholdType,
    birth_day_of_year: u32,
    alive: bool,
    pub health: Health,
    pub memberships: Vec<Membership>,
    /// Per-network link records, keyed by network index.
    pub network_links: HashMap<usize, PersonNetworkLink>,
    pub relationships: Relationships,
}

impl Person {
    #[must_use]
    pub fn id(&self) -> PersonId {
        self.id
    }

    /// Age in years, fractional.
    #[must_use]
    pub fn real_age(&self) -> f64 {
        self.age
    }

    /// Completed years of age.
    #[must_use]
    pub fn age(&self) -> u32 {
        self.age as u32
    }

    pub fn set_age(&mut self, age: f64) {
        self.age = age;
    }

    pub fn grow_older(&mut self, years: f64) {
        self.age += years;
    }

    #[must_use]
    pub fn sex(&self) -> Sex {
        self.sex
    }

    #[must_use]
    pub fn race(&self) -> i32 {
        self.race
    }

    #[must_use]
    pub fn admin_code(&self) -> i64 {
        self.admin_code
    }

    #[must_use]
    pub fn household_type(&self) -> HouseholdType {
        self.household_type
    }

    #[must_use]
    pub fn birth_day_of_year(&self) -> u32 {
        self.birth_day_of_year
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub(crate) fn mark_dead(&mut self) {
        self.alive = false;
    }

    /// The person's household, by convention the first membership of
    /// household kind recorded at setup.
    #[must_use]
    pub fn household(&self) -> Option<GroupId> {
        self.memberships.first().map(|m| m.group)
    }

    /// Corrects the stored position after the group moved this person
    /// during a swap-with-back removal.
    pub fn update_member_index(&mut self, group: GroupId, index: usize) {
        for membership in &mut self.memberships {
            if membership.group == group {
                membership.index = index;
                return;
            }
        }
        panic!("person {} has no membership in group {}", self.id, group);
    }

    #[must_use]
    pub fn membership_in(&self, group: GroupId) -> Option<usize> {
        self.memberships
            .iter()
            .find(|m| m.group == group)
            .map(|m| m.index)
    }
}

#[derive(Debug, Default)]
pub struct Population {
    people: Vec<Person>,
}

impl Population {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a person with empty health state; the caller initializes
    /// health once the condition list is known.
    pub fn add_person(&mut self, spec: PersonSpec, conditions: usize) -> PersonId {
        let id = PersonId(self.people.len());
        self.people.push(Person {
            id,
            age: spec.age,
            sex: spec.sex,
            race: spec.race,
            admin_code: spec.admin_code,
            household_type: spec.household_type,
            birth_day_of_year: spec.birth_day_of_year,
            alive: true,
            health: Health::new(conditions),
            memberships: Vec::new(),
            network_links: HashMap::default(),
            relationships: Relationships::new(),
        });
        id
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.people.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: PersonId) -> &Person {
        &self.people[id.0]
    }

    pub fn get_mut(&mut self, id: PersonId) -> &mut Person {
        &mut self.people[id.0]
    }

    /// Simultaneous mutable access to two distinct people.
    ///
    /// # Panics
    /// Panics if `a == b`.
    pub fn pair_mut(&mut self, a: PersonId, b: PersonId) -> (&mut Person, &mut Person) {
        assert_ne!(a, b, "pair_mut requires distinct people");
        if a.0 < b.0 {
            let (lo, hi) = self.people.split_at_mut(b.0);
            (&mut lo[a.0], &mut hi[0])
        } else {
            let (lo, hi) = self.people.split_at_mut(a.0);
            (&mut hi[0], &mut lo[b.0])
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = PersonId> {
        (0..self.people.len()).map(PersonId)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Person> {
        self.people.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_lookup() {
        let mut pop = Population::new();
        let a = pop.add_person(
            PersonSpec {
                age: 34.5,
                sex: Sex::Male,
                ..PersonSpec::default()
            },
            2,
        );
        assert_eq!(pop.size(), 1);
        assert_eq!(pop.get(a).age(), 34);
        assert!(pop.get(a).is_alive());
        assert_eq!(pop.get(a).health.record(0).state, -1);
    }

    #[test]
    fn pair_mut_returns_both_orders() {
        let mut pop = Population::new();
        let a = pop.add_person(PersonSpec::default(), 1);
        let b = pop.add_person(PersonSpec::default(), 1);
        let (pa, pb) = pop.pair_mut(a, b);
        assert_eq!(pa.id(), a);
        assert_eq!(pb.id(), b);
        let (pb, pa) = pop.pair_mut(b, a);
        assert_eq!(pa.id(), a);
        assert_eq!(pb.id(), b);
    }

    #[test]
    #[should_panic(expected = "distinct")]
    fn pair_mut_same_person_panics() {
        let mut pop = Population::new();
        let a = pop.add_person(PersonSpec::default(), 1);
        let _ = pop.pair_mut(a, a);
    }

    #[test]
    fn membership_index_update() {
        let mut pop = Population::new();
        let a = pop.add_person(PersonSpec::default(), 1);
        pop.get_mut(a).memberships.push(Membership {
            group: GroupId(3),
            index: 4,
        });
        pop.get_mut(a).update_member_index(GroupId(3), 2);
        assert_eq!(pop.get(a).membership_in(GroupId(3)), Some(2));
    }

    #[test]
    fn household_type_classes() {
        assert!(HouseholdType::OppSexSimAgePair.is_family());
        assert!(!HouseholdType::SingleMale.is_family());
        assert!(HouseholdType::SingleMale.partnership_eligible());
        assert!(!HouseholdType::from_label("dorm-mates").partnership_eligible());
        assert_eq!(
            HouseholdType::from_label("opp-sex-two-parent-family"),
            HouseholdType::OppSexTwoParentFamily
        );
    }
}
