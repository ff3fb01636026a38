//! The world context: one value that owns every store in a simulation.
//!
//! There is no file-static state anywhere in the engine; tests and
//! embedders build their own contexts. The run surface is the
//! library-level triple `prepare / update(day) / finish`:
//! construct a context, add the population and places, `prepare()`,
//! call `update(day)` for each day (or `run()` for the whole horizon),
//! then `finish()`.
//!
//! Within a day the update sequence is fixed: the demographics tick,
//! the sexual-partner network (so today's acts exist before any
//! condition reads them), each condition's epidemic update in
//! condition-id order (each ending in its own transmission pass), then
//! the death queue and the counter snapshot.

use std::path::Path;

use crate::condition::{ConditionId, ConditionList, TransmissionMode};
use crate::date::{CivilDate, SimClock};
use crate::error::ContagionError;
use crate::groups::PlaceList;
use crate::health::ContextHealthExt;
use crate::markov::initialize_markov_population;
use crate::network::{ContextNetworkExt, NetworkList};
use crate::params::Params;
use crate::people::{Membership, PersonId, PersonSpec, Population};
use crate::random::RngRegistry;
use crate::report::ReportWriters;
use crate::sexual_network::{
    load_day0_seeds, terminate_person_relationships, update_sexual_network, PartnerTables,
    SexualPartnerNetwork,
};
use crate::{epidemic, info, trace, warn};

const DEMOGRAPHICS_YEAR_FRACTION: f64 = 1.0 / 365.0;

pub struct Context {
    pub params: Params,
    pub rng: RngRegistry,
    pub clock: SimClock,
    pub population: Population,
    pub places: PlaceList,
    pub networks: NetworkList,
    pub conditions: ConditionList,
    pub reports: ReportWriters,
    pub sexual_network: Option<SexualPartnerNetwork>,
    /// Time-of-day modulation applied to place contact counts.
    pub contact_hour_modulation: f64,
    pending_deaths: Vec<PersonId>,
    cross_exposures: Vec<Vec<(PersonId, PersonId)>>,
    prepared: bool,
}

impl Context {
    /// An empty context with default clock and seed; the starting
    /// point for tests and programmatic setups.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            params: Params::new(),
            rng: RngRegistry::new(0),
            clock: SimClock::default(),
            population: Population::new(),
            places: PlaceList::new(),
            networks: NetworkList::new(),
            conditions: ConditionList::new(),
            reports: ReportWriters::new(),
            sexual_network: None,
            contact_hour_modulation: 1.0,
            pending_deaths: Vec::new(),
            cross_exposures: Vec::new(),
            prepared: false,
        }
    }

    /// Builds a context from a property set. Requires
    /// `simulation_days`, `conditions` and per-condition
    /// `transmission_mode`; everything else is optional.
    pub fn new(params: Params) -> Result<Self, ContagionError> {
        let simulation_days = params.require_u32("simulation_days")?;
        let start_date = CivilDate::parse(&params.get_str_or("start_date", "2012-01-01"))?;
        let conditions = ConditionList::from_params(&params)?;
        let seed = params.get_usize_or("seed", 0)? as u64;

        let mut ctx = Context::empty();
        ctx.clock = SimClock::new(start_date, simulation_days);
        ctx.rng = RngRegistry::new(seed);
        ctx.conditions = conditions;
        ctx.params = params;
        Ok(ctx)
    }

    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Adds a person sized for the current condition list.
    pub fn add_person(&mut self, spec: PersonSpec) -> PersonId {
        self.population.add_person(spec, self.conditions.len())
    }

    /// Enrolls a person in a place and records the back-reference.
    ///
    /// # Panics
    /// Panics if the person is already a member: duplicate enrollment
    /// would corrupt the stored index.
    pub fn enroll_place(&mut self, person: PersonId, group: crate::groups::GroupId) {
        assert!(
            self.population.get(person).membership_in(group).is_none(),
            "person {person} already enrolled in group {group}"
        );
        let index = self.places.get_mut(group).enroll(person);
        self.population
            .get_mut(person)
            .memberships
            .push(Membership { group, index });
        trace!("enrolled person {person} in group {group} at {index}");
    }

    /// Removes a person from a place, fixing up the member displaced
    /// by the swap-with-back removal.
    pub fn unenroll_place(&mut self, person: PersonId, group: crate::groups::GroupId) {
        let pos = self
            .population
            .get(person)
            .membership_in(group)
            .unwrap_or_else(|| panic!("person {person} not enrolled in group {group}"));
        let moved = self.places.get_mut(group).unenroll(pos);
        if let Some((moved_person, new_index)) = moved {
            self.population
                .get_mut(moved_person)
                .update_member_index(group, new_index);
        }
        self.population
            .get_mut(person)
            .memberships
            .retain(|m| m.group != group);
    }

    /// Queues a death for processing at the end of the day's condition
    /// updates.
    pub fn queue_death(&mut self, person: PersonId) {
        self.pending_deaths.push(person);
    }

    pub(crate) fn queue_cross_exposure(
        &mut self,
        condition_id: ConditionId,
        person: PersonId,
        infector: PersonId,
        _day: u32,
    ) {
        if self.cross_exposures.len() <= condition_id {
            self.cross_exposures.resize_with(condition_id + 1, Vec::new);
        }
        self.cross_exposures[condition_id].push((person, infector));
    }

    pub(crate) fn take_cross_exposures(
        &mut self,
        condition_id: ConditionId,
    ) -> Vec<(PersonId, PersonId)> {
        if self.cross_exposures.len() <= condition_id {
            return Vec::new();
        }
        std::mem::take(&mut self.cross_exposures[condition_id])
    }

    /// Seeds an infection directly, as an imported case.
    pub fn seed_infection(&mut self, condition_id: ConditionId, person: PersonId, day: u32) {
        assert!(self.prepared, "seed_infection called before prepare");
        let mut epi = std::mem::take(&mut self.conditions.get_mut(condition_id).epidemic);
        let mut model = std::mem::take(&mut self.conditions.get_mut(condition_id).model);
        epidemic::expose_person(self, &mut epi, &mut model, condition_id, person, None, None, day);
        self.conditions.get_mut(condition_id).epidemic = epi;
        self.conditions.get_mut(condition_id).model = model;
    }

    /// Finalises setup: sizes the event rings, prepares every
    /// condition model, initialises chain conditions, and wires the
    /// sexual-partner network. Call after the population and places
    /// are in place and before the first `update`.
    pub fn prepare(&mut self) -> Result<(), ContagionError> {
        if self.prepared {
            return Ok(());
        }
        if self.params.contains("seed") {
            let seed = self.params.get_usize_or("seed", 0)? as u64;
            self.rng.reseed(seed);
        }
        self.contact_hour_modulation = self.params.get_f64_or("contact_hour_modulation", 1.0)?;

        if let Some(dir) = self.params.get_vec_str("output_directory").ok().flatten() {
            let dir = dir.join(" ");
            let prefix = self.params.get_str_or("report_prefix", "");
            self.reports.enable_output(Path::new(&dir), &prefix)?;
            if self.params.get_bool_or("enable_health_records", false)? {
                let path = Path::new(&dir).join("health_records.txt");
                self.reports.enable_health_records_file(&path)?;
            }
        }

        let horizon = self.clock.horizon();
        self.conditions.prepare(horizon)?;
        self.cross_exposures = vec![Vec::new(); self.conditions.len()];

        // Wire the sexual-partner network before the models prepare,
        // so networked conditions can see their substrate.
        let sexual_conditions: Vec<ConditionId> = self
            .conditions
            .ids()
            .filter(|c| self.conditions.get(*c).transmission_mode == TransmissionMode::Sexual)
            .collect();
        if !sexual_conditions.is_empty() {
            let network = self.networks.add_network("sexual_partner", self.conditions.len());
            for c in &sexual_conditions {
                self.conditions.get_mut(*c).transmission_network = Some(network);
            }
            let tables = PartnerTables::from_params(&self.params)?;
            self.sexual_network = Some(SexualPartnerNetwork::new(network, tables));
            if let Some(dir) = self.params.get_vec_str("sexual_network.day0_seed_dir").ok().flatten()
            {
                let loaded = load_day0_seeds(self, &dir.join(" "))?;
                info!("loaded day-0 partnership seeds for {loaded} agents");
            }
            if let Some(path) = self.params.get_vec_str("sexual_network.edge_list").ok().flatten() {
                let edges = self.load_edge_list(network, Path::new(&path.join(" ")))?;
                info!("loaded {edges} explicit sexual-partner edges");
            }
        }

        for condition_id in 0..self.conditions.len() {
            let mut epi = std::mem::take(&mut self.conditions.get_mut(condition_id).epidemic);
            let mut model = std::mem::take(&mut self.conditions.get_mut(condition_id).model);
            model.prepare(self, condition_id)?;
            if matches!(model, crate::condition::ConditionModel::Markov(_)) {
                initialize_markov_population(self, &mut epi, &mut model, condition_id);
            }
            self.conditions.get_mut(condition_id).epidemic = epi;
            self.conditions.get_mut(condition_id).model = model;
        }

        self.prepared = true;
        info!(
            "prepared: {} people, {} places, {} conditions, horizon {} days",
            self.population.size(),
            self.places.len(),
            self.conditions.len(),
            self.clock.simulation_days()
        );
        Ok(())
    }

    /// Advances the simulation through one day.
    pub fn update(&mut self, day: u32) {
        assert!(self.prepared, "update called before prepare");
        self.clock.set_time(day, 0);

        // Demographics tick: everyone ages.
        for person in self.population.ids() {
            if self.population.get(person).is_alive() {
                self.population
                    .get_mut(person)
                    .grow_older(DEMOGRAPHICS_YEAR_FRACTION);
            }
        }

        // Partnerships and today's acts must exist before any
        // condition transmits over them.
        if let Some(mut spn) = self.sexual_network.take() {
            update_sexual_network(self, &mut spn, day);
            self.sexual_network = Some(spn);
        }

        for condition_id in 0..self.conditions.len() {
            epidemic::update_condition(self, condition_id, day);
        }

        self.process_pending_deaths(day);
    }

    /// Runs the whole horizon: prepare, every day, finish.
    pub fn run(&mut self) -> Result<(), ContagionError> {
        self.prepare()?;
        for day in 0..self.clock.simulation_days() {
            self.update(day);
        }
        self.finish()
    }

    /// Flushes reports and writes the end-of-run summary.
    pub fn finish(&mut self) -> Result<(), ContagionError> {
        let mut per_condition = serde_json::Map::new();
        for condition_id in self.conditions.ids() {
            let condition = self.conditions.get(condition_id);
            per_condition.insert(
                condition.name.clone(),
                serde_json::json!({
                    "total_exposures": condition.epidemic.counters.total_exposures,
                    "total_symptomatic": condition.epidemic.counters.total_symptomatic,
                    "total_case_fatalities": condition.epidemic.counters.total_case_fatalities,
                    "import_shortfall": condition.epidemic.counters.import_shortfall,
                }),
            );
        }
        let summary = serde_json::json!({
            "days": self.clock.simulation_days(),
            "population": self.population.size(),
            "conditions": serde_json::Value::Object(per_condition),
            "warnings": self.reports.warning_totals(),
        });
        self.reports.finish(&summary)
    }

    fn process_pending_deaths(&mut self, day: u32) {
        let deaths = std::mem::take(&mut self.pending_deaths);
        for person in deaths {
            if self.population.get(person).is_alive() {
                self.terminate_person(person, day);
            }
        }
    }

    /// Full termination: cancels pending transitions, runs the model
    /// hooks, unwinds partnerships, network links and memberships,
    /// then marks the person dead.
    pub fn terminate_person(&mut self, person: PersonId, day: u32) {
        trace!("terminating person {person} day {day}");

        for condition_id in 0..self.conditions.len() {
            // Cancel the pending transition, if any.
            let pending = self
                .population
                .get(person)
                .health
                .record(condition_id)
                .next_transition_day;
            if pending >= 0 {
                let step = i64::from(SimClock::step(pending as u32, 0));
                self.conditions
                    .get_mut(condition_id)
                    .epidemic
                    .transition_events
                    .delete_event(step, person);
                self.population
                    .get_mut(person)
                    .health
                    .record_mut(condition_id)
                    .next_transition_day = -1;
            }

            let mut model = std::mem::take(&mut self.conditions.get_mut(condition_id).model);
            model.terminate_person(self, condition_id, person, day);
            self.conditions.get_mut(condition_id).model = model;

            self.become_removed(person, condition_id, day);
        }

        if let Some(spn) = self.sexual_network.take() {
            terminate_person_relationships(self, spn.network, person);
            self.sexual_network = Some(spn);
        }

        let network_ids: Vec<usize> = self
            .population
            .get(person)
            .network_links
            .keys()
            .copied()
            .collect();
        for network in network_ids {
            self.leave_network(person, crate::network::NetworkId(network));
        }

        let groups: Vec<crate::groups::GroupId> = self
            .population
            .get(person)
            .memberships
            .iter()
            .map(|m| m.group)
            .collect();
        for group in groups {
            self.unenroll_place(person, group);
        }

        self.population.get_mut(person).mark_dead();
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("day", &self.clock.day())
            .field("population", &self.population.size())
            .field("places", &self.places.len())
            .field("conditions", &self.conditions.len())
            .field("prepared", &self.prepared)
            .finish()
    }
}

// Catch obviously wrong setups early instead of deep in an update.
impl Drop for Context {
    fn drop(&mut self) {
        if self.prepared && !self.pending_deaths.is_empty() {
            warn!("context dropped with {} unprocessed deaths", self.pending_deaths.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::{GroupType, PlaceKind};
    use crate::people::Sex;

    fn context_with_group(n: usize) -> (Context, Vec<PersonId>, crate::groups::GroupId) {
        let mut ctx = Context::empty();
        let t = ctx
            .places
            .add_group_type(GroupType::new("household", PlaceKind::Household, 1));
        let group = ctx.places.add_place("hh-1", t, 1);
        let people: Vec<PersonId> = (0..n)
            .map(|_| ctx.population.add_person(PersonSpec::default(), 1))
            .collect();
        for p in &people {
            ctx.enroll_place(*p, group);
        }
        (ctx, people, group)
    }

    #[test]
    fn member_indices_match_positions() {
        let (ctx, people, group) = context_with_group(5);
        for p in &people {
            let index = ctx.population.get(*p).membership_in(group).unwrap();
            assert_eq!(ctx.places.get(group).member(index), *p);
        }
    }

    #[test]
    fn unenroll_updates_displaced_member() {
        let (mut ctx, people, group) = context_with_group(5);
        // Removing the member at position 2 moves the position-4
        // member into its slot; everyone else keeps their index.
        ctx.unenroll_place(people[2], group);
        assert_eq!(ctx.population.get(people[4]).membership_in(group), Some(2));
        assert_eq!(ctx.population.get(people[0]).membership_in(group), Some(0));
        assert_eq!(ctx.population.get(people[1]).membership_in(group), Some(1));
        assert_eq!(ctx.population.get(people[3]).membership_in(group), Some(3));
        assert_eq!(ctx.population.get(people[2]).membership_in(group), None);
        // The group's side agrees.
        let g = ctx.places.get(group);
        for pos in 0..g.size() {
            let member = g.member(pos);
            assert_eq!(ctx.population.get(member).membership_in(group), Some(pos));
        }
    }

    #[test]
    fn enroll_unenroll_round_trip_preserves_size() {
        let (mut ctx, people, group) = context_with_group(3);
        ctx.unenroll_place(people[1], group);
        ctx.enroll_place(people[1], group);
        assert_eq!(ctx.places.get(group).size(), 3);
    }

    #[test]
    #[should_panic(expected = "already enrolled")]
    fn double_enroll_panics() {
        let (mut ctx, people, group) = context_with_group(2);
        ctx.enroll_place(people[0], group);
    }

    #[test]
    fn terminate_unwinds_everything() {
        let (mut ctx, people, group) = context_with_group(3);
        let network = ctx.networks.add_network("test", 1);
        ctx.join_network(people[0], network);
        ctx.join_network(people[1], network);
        ctx.create_link_to(people[0], people[1], network);
        ctx.conditions.add_condition(
            "INF",
            TransmissionMode::Respiratory,
            crate::natural_history::NaturalHistory::build(
                "INF",
                vec![
                    crate::natural_history::StateSpec::named("S"),
                    crate::natural_history::StateSpec::named("I"),
                ],
                1,
            ),
            1.0,
            crate::condition::ConditionModel::Generic,
        );
        ctx.conditions.prepare(ctx.clock.horizon()).unwrap();

        ctx.terminate_person(people[0], 3);
        let dead = ctx.population.get(people[0]);
        assert!(!dead.is_alive());
        assert!(dead.memberships.is_empty());
        assert!(dead.network_links.is_empty());
        assert_eq!(ctx.in_degree(people[1], network), 0);
        assert_eq!(ctx.places.get(group).size(), 2);
    }

    #[test]
    fn new_requires_simulation_days() {
        let params = Params::from_str("conditions INF\nINF.transmission_mode none\nINF.states 2")
            .unwrap();
        assert!(matches!(
            Context::new(params),
            Err(ContagionError::MissingParameter(_))
        ));
    }

    #[test]
    fn param_driven_context_runs() {
        let params = Params::from_str(
            "
            simulation_days 3
            seed 7
            conditions INF
            INF.transmission_mode none
            INF.states 2
            ",
        )
        .unwrap();
        let mut ctx = Context::new(params).unwrap();
        for _ in 0..10 {
            ctx.add_person(PersonSpec {
                sex: Sex::Male,
                ..PersonSpec::default()
            });
        }
        ctx.run().unwrap();
        assert_eq!(ctx.clock.day(), 2);
    }
}
