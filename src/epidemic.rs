//! The aggregate course of one condition across the population, and
//! the daily update sequence that drives it.
//!
//! Each day, in order: exogenous imports, the drain of today's
//! scheduled state transitions, per-agent model updates with fatality
//! checks, infectious-list population in every mixing group the
//! infectious visit, the transmission pass, and finally the
//! end-of-day clear and counter snapshot. Infectious lists are written
//! here and only read by transmission; they are cleared before the
//! next condition runs.

use serde::Serialize;

use crate::condition::{ConditionId, ConditionModel, TransmissionMode};
use crate::context::Context;
use crate::date::SimClock;
use crate::error::ContagionError;
use crate::events::EventQueue;
use crate::groups::GroupId;
use crate::health::{ContextHealthExt, ExposureSite};
use crate::people::PersonId;
use crate::random::RNG_IMPORT;
use crate::transmission;
use crate::{debug, info, warn};

/// How many times an import predicate is relaxed before giving up.
const IMPORT_ATTEMPTS: u32 = 3;

#[derive(Debug, Default, Clone, Copy)]
pub struct EpidemicCounters {
    pub new_exposures: u32,
    pub new_case_fatalities: u32,
    pub current_active: u32,
    pub current_infectious: u32,
    pub current_symptomatic: u32,
    pub total_exposures: u32,
    pub total_symptomatic: u32,
    pub total_case_fatalities: u32,
    /// Import requests that found no susceptible candidate.
    pub import_shortfall: u32,
}

#[derive(Serialize)]
struct EpidemicReportRow<'a> {
    day: u32,
    condition: &'a str,
    new_exposures: u32,
    current_active: u32,
    current_infectious: u32,
    current_symptomatic: u32,
    new_case_fatalities: u32,
    total_exposures: u32,
    total_symptomatic: u32,
    total_case_fatalities: u32,
}

/// Shared per-condition bookkeeping. Specialised kinds contribute only
/// their hooks; everything here is generic.
#[derive(Debug, Default)]
pub struct Epidemic {
    /// Agents with an active record for this condition.
    active: Vec<PersonId>,
    /// Subset currently able to transmit; rebuilt daily.
    infectious: Vec<PersonId>,
    /// Pending state transitions, keyed by hour step.
    pub transition_events: EventQueue,
    /// Places given an infectious list today, cleared at end of day.
    touched_groups: Vec<GroupId>,
    pub counters: EpidemicCounters,
}

impl Epidemic {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepare(&mut self, horizon: u32) {
        self.transition_events = EventQueue::new(horizon);
    }

    #[must_use]
    pub fn active_people(&self) -> &[PersonId] {
        &self.active
    }

    #[must_use]
    pub fn infectious_people(&self) -> &[PersonId] {
        &self.infectious
    }

    #[must_use]
    pub fn is_active(&self, person: PersonId) -> bool {
        self.active.contains(&person)
    }

    #[must_use]
    pub fn touched_groups(&self) -> &[GroupId] {
        &self.touched_groups
    }

    /// Activates a person without the exposure bookkeeping; used by
    /// chain conditions whose day-0 occupants were never "exposed".
    pub fn activate(&mut self, person: PersonId) {
        self.active.push(person);
    }
}

/// Runs one condition's daily update. The condition's epidemic and
/// model are taken out of the context for the duration so the context
/// can be borrowed freely underneath them.
pub fn update_condition(ctx: &mut Context, condition_id: ConditionId, day: u32) {
    let mut epi = std::mem::take(&mut ctx.conditions.get_mut(condition_id).epidemic);
    let mut model = std::mem::take(&mut ctx.conditions.get_mut(condition_id).model);

    apply_cross_exposures(ctx, &mut epi, &mut model, condition_id, day);
    apply_imports(ctx, &mut epi, &mut model, condition_id, day);
    drain_transitions(ctx, &mut epi, &mut model, condition_id, day);
    update_active_people(ctx, &mut epi, &mut model, condition_id, day);
    populate_infectious_lists(ctx, &mut epi, condition_id, day);
    transmission::spread(ctx, &mut epi, &mut model, condition_id, day);
    end_of_day(ctx, &mut epi, &mut model, condition_id, day);

    ctx.conditions.get_mut(condition_id).epidemic = epi;
    ctx.conditions.get_mut(condition_id).model = model;
}

/// Exposes `person` and enters them at `entry_state`. The entry point
/// for transmission, imports and seeding alike.
pub fn expose_person(
    ctx: &mut Context,
    epi: &mut Epidemic,
    model: &mut ConditionModel,
    condition_id: ConditionId,
    person: PersonId,
    infector: Option<PersonId>,
    site: Option<ExposureSite>,
    day: u32,
) {
    ctx.become_exposed(person, condition_id, infector, site, day);
    epi.counters.new_exposures += 1;
    epi.counters.total_exposures += 1;
    epi.active.push(person);
    let entry_state = if site.is_none() && infector.is_none() {
        ctx.conditions.natural_history(condition_id).import_state()
    } else {
        ctx.conditions.natural_history(condition_id).exposed_state()
    };
    update_state_of_person(ctx, epi, model, condition_id, person, entry_state, day);
    model.on_exposed(ctx, condition_id, person, day);
}

/// Moves `person` into `state`, applies the state's side effects, and
/// schedules the next drawn transition in the event ring.
pub fn update_state_of_person(
    ctx: &mut Context,
    epi: &mut Epidemic,
    model: &mut ConditionModel,
    condition_id: ConditionId,
    person: PersonId,
    state: usize,
    day: u32,
) {
    let old_state = ctx.population.get(person).health.record(condition_id).state;

    // A pending future transition is superseded by this one.
    let pending = ctx.population.get(person).health.record(condition_id).next_transition_day;
    if pending >= 0 && pending > day as i32 {
        epi.transition_events
            .delete_event(i64::from(SimClock::step(pending as u32, 0)), person);
    }

    ctx.set_health_state(person, condition_id, state, day, ctx.clock.hour());
    apply_place_actions(ctx, condition_id, person, state);

    let age = ctx.population.get(person).real_age();
    let adjustment = model.adjustment_for(ctx, person);
    let transition = ctx
        .conditions
        .natural_history(condition_id)
        .get_next_state(&ctx.rng, age, state, day, adjustment);
    {
        let record = ctx.population.get_mut(person).health.record_mut(condition_id);
        match transition.transition_day {
            Some(next_day) => {
                record.next_transition_day = next_day as i32;
                record.next_state = transition.next_state as i32;
            }
            None => {
                record.next_transition_day = -1;
                record.next_state = -1;
            }
        }
    }
    if let Some(next_day) = transition.transition_day {
        epi.transition_events
            .add_event(i64::from(SimClock::step(next_day, 0)), person);
    }

    if ctx.population.get(person).health.record(condition_id).symptoms_start_day == day as i32 {
        epi.counters.total_symptomatic += 1;
    }

    model.on_state_change(ctx, epi, condition_id, person, old_state, state, day);
}

fn apply_place_actions(ctx: &mut Context, condition_id: ConditionId, person: PersonId, state: usize) {
    let (join, quit) = {
        let spec = ctx.conditions.natural_history(condition_id).state(state);
        (spec.place_type_to_join.clone(), spec.place_type_to_quit.clone())
    };
    if let Some(type_name) = quit {
        if let Some(type_id) = ctx.places.find_group_type(&type_name) {
            let groups: Vec<GroupId> = ctx
                .population
                .get(person)
                .memberships
                .iter()
                .map(|m| m.group)
                .filter(|g| ctx.places.get(*g).group_type == type_id)
                .collect();
            for group in groups {
                ctx.unenroll_place(person, group);
            }
        }
    }
    if let Some(type_name) = join {
        if let Some(type_id) = ctx.places.find_group_type(&type_name) {
            let candidates: Vec<GroupId> = ctx
                .places
                .ids()
                .filter(|g| ctx.places.get(*g).group_type == type_id)
                .collect();
            if candidates.is_empty() {
                warn!("no place of type {type_name} to join");
            } else {
                let pick = ctx.rng.sample_range(RNG_IMPORT, 0..candidates.len());
                ctx.enroll_place(person, candidates[pick]);
            }
        }
    }
}

/// Exposures spawned by another condition's transmission (via
/// `condition_to_transmit`) are queued on the context and picked up
/// here by the owning condition.
fn apply_cross_exposures(
    ctx: &mut Context,
    epi: &mut Epidemic,
    model: &mut ConditionModel,
    condition_id: ConditionId,
    day: u32,
) {
    let pending = ctx.take_cross_exposures(condition_id);
    for (person, infector) in pending {
        if !ctx.population.get(person).is_alive()
            || !ctx.population.get(person).health.is_susceptible(condition_id)
        {
            continue;
        }
        expose_person(ctx, epi, model, condition_id, person, Some(infector), None, day);
    }
}

/// Applies the import schedule for today: samples eligible susceptible
/// agents under the event's predicates, relaxing them a bounded number
/// of times before warning and moving on. Requesting more seeds than
/// there are susceptibles infects all of them and records the
/// shortfall.
fn apply_imports(
    ctx: &mut Context,
    epi: &mut Epidemic,
    model: &mut ConditionModel,
    condition_id: ConditionId,
    day: u32,
) {
    let imports = ctx.conditions.natural_history(condition_id).imports().to_vec();
    for event in imports {
        if day < event.start_day || day > event.end_day || event.count_per_day == 0 {
            continue;
        }
        let mut admin_filter = event.admin_code;
        let mut age_window = (event.min_age, event.max_age);
        let mut candidates: Vec<PersonId> = Vec::new();
        for attempt in 0..IMPORT_ATTEMPTS {
            candidates = ctx
                .population
                .ids()
                .filter(|p| {
                    let person = ctx.population.get(*p);
                    person.is_alive()
                        && person.health.is_susceptible(condition_id)
                        && admin_filter.is_none_or(|code| person.admin_code() == code)
                        && person.real_age() >= age_window.0
                        && person.real_age() <= age_window.1
                })
                .collect();
            if !candidates.is_empty() {
                break;
            }
            // Relax the location predicate first, then the age window.
            if attempt == 0 {
                admin_filter = None;
            } else {
                age_window = (0.0, f64::MAX);
            }
        }
        if candidates.is_empty() {
            warn!(
                "import for {} day {day}: no susceptible candidates",
                ctx.conditions.name(condition_id)
            );
            epi.counters.import_shortfall += event.count_per_day;
            continue;
        }

        let requested = event.count_per_day as usize;
        if requested > candidates.len() {
            epi.counters.import_shortfall += (requested - candidates.len()) as u32;
            warn!(
                "import for {} day {day}: requested {requested}, only {} susceptible",
                ctx.conditions.name(condition_id),
                candidates.len()
            );
        }
        let seeds = requested.min(candidates.len());
        // Partial Fisher-Yates over the candidate pool.
        for k in 0..seeds {
            let pick = ctx.rng.sample_range(RNG_IMPORT, k..candidates.len());
            candidates.swap(k, pick);
            expose_person(ctx, epi, model, condition_id, candidates[k], None, None, day);
        }
        debug!(
            "imported {seeds} seeds for {} on day {day}",
            ctx.conditions.name(condition_id)
        );
    }
}

/// Drains the per-condition transition queue for every hour of today
/// and advances each drained agent.
fn drain_transitions(
    ctx: &mut Context,
    epi: &mut Epidemic,
    model: &mut ConditionModel,
    condition_id: ConditionId,
    day: u32,
) {
    for hour in 0..crate::date::HOURS_PER_DAY {
        let step = i64::from(SimClock::step(day, hour));
        let due = epi.transition_events.drain(step);
        for person in due {
            if !ctx.population.get(person).is_alive() {
                continue;
            }
            let record = ctx.population.get(person).health.record(condition_id);
            if record.next_transition_day != day as i32 || record.next_state < 0 {
                // A cancelled entry that escaped removal; skip it.
                continue;
            }
            let next_state = record.next_state as usize;
            update_state_of_person(ctx, epi, model, condition_id, person, next_state, day);
        }
    }
}

/// Per-agent model updates and fatality checks over the active list;
/// agents no longer infected drop off.
fn update_active_people(
    ctx: &mut Context,
    epi: &mut Epidemic,
    model: &mut ConditionModel,
    condition_id: ConditionId,
    day: u32,
) {
    let active = std::mem::take(&mut epi.active);
    let mut still_active = Vec::with_capacity(active.len());
    for person in active {
        if !ctx.population.get(person).is_alive() {
            continue;
        }
        model.update_person(ctx, condition_id, person, day);

        let record = ctx.population.get(person).health.record(condition_id);
        if day > 0 && record.is_fatal && record.is_infected {
            epi.counters.new_case_fatalities += 1;
            epi.counters.total_case_fatalities += 1;
            ctx.become_case_fatality(person, condition_id, day);
            ctx.queue_death(person);
            continue;
        }
        if ctx.population.get(person).health.is_infected(condition_id) {
            ctx.update_mixing_group_counts(person, condition_id, day);
            still_active.push(person);
        }
    }
    epi.active = still_active;
}

/// Rebuilds the per-group and per-network infectious lists from the
/// active list.
fn populate_infectious_lists(
    ctx: &mut Context,
    epi: &mut Epidemic,
    condition_id: ConditionId,
    day: u32,
) {
    epi.infectious.clear();
    let mode = ctx.conditions.get(condition_id).transmission_mode;
    let network = ctx.conditions.get(condition_id).transmission_network;
    for i in 0..epi.active.len() {
        let person = epi.active[i];
        if !ctx.population.get(person).health.is_infectious(condition_id) {
            continue;
        }
        epi.infectious.push(person);
        if mode.is_place_based() {
            let memberships: Vec<GroupId> = ctx
                .population
                .get(person)
                .memberships
                .iter()
                .map(|m| m.group)
                .collect();
            for group in memberships {
                let place = ctx.places.get_mut(group);
                place.add_infectious(condition_id, person);
                place.record_infectious_day(day);
                epi.touched_groups.push(group);
            }
        } else if mode == TransmissionMode::Sexual {
            if let Some(network) = network {
                ctx.networks
                    .get_mut(network)
                    .group
                    .add_infectious(condition_id, person);
            }
        }
    }
}

/// Clears today's infectious lists, snapshots counters and writes the
/// daily report row.
fn end_of_day(
    ctx: &mut Context,
    epi: &mut Epidemic,
    model: &mut ConditionModel,
    condition_id: ConditionId,
    day: u32,
) {
    for group in epi.touched_groups.drain(..) {
        ctx.places.get_mut(group).clear_infectious(condition_id);
    }
    if let Some(network) = ctx.conditions.get(condition_id).transmission_network {
        ctx.networks
            .get_mut(network)
            .group
            .clear_infectious(condition_id);
    }

    epi.counters.current_active = epi.active.len() as u32;
    epi.counters.current_infectious = epi.infectious.len() as u32;
    epi.counters.current_symptomatic = epi
        .active
        .iter()
        .filter(|p| ctx.population.get(**p).health.is_symptomatic(condition_id))
        .count() as u32;

    let row = EpidemicReportRow {
        day,
        condition: ctx.conditions.name(condition_id),
        new_exposures: epi.counters.new_exposures,
        current_active: epi.counters.current_active,
        current_infectious: epi.counters.current_infectious,
        current_symptomatic: epi.counters.current_symptomatic,
        new_case_fatalities: epi.counters.new_case_fatalities,
        total_exposures: epi.counters.total_exposures,
        total_symptomatic: epi.counters.total_symptomatic,
        total_case_fatalities: epi.counters.total_case_fatalities,
    };
    ctx.reports.send_report("infections", &row);

    model.report(ctx, condition_id, day);
    if day % 50 == 0 {
        info!(
            "day {day} {}: active {} infectious {} total {}",
            ctx.conditions.name(condition_id),
            epi.counters.current_active,
            epi.counters.current_infectious,
            epi.counters.total_exposures
        );
    }
    epi.counters.new_exposures = 0;
    epi.counters.new_case_fatalities = 0;
}

// The capability surface the condition kinds plug into. Shared
// bookkeeping stays in `Epidemic`; kinds see the context with their
// own condition's epidemic and model taken out.
impl ConditionModel {
    pub fn prepare(&mut self, ctx: &mut Context, condition_id: ConditionId) -> Result<(), ContagionError> {
        match self {
            ConditionModel::Generic => Ok(()),
            ConditionModel::Markov(m) => m.prepare(ctx, condition_id),
            ConditionModel::Hiv(m) => m.prepare(ctx, condition_id),
        }
    }

    pub fn on_exposed(&mut self, ctx: &mut Context, condition_id: ConditionId, person: PersonId, day: u32) {
        match self {
            ConditionModel::Generic | ConditionModel::Markov(_) => {}
            ConditionModel::Hiv(m) => m.on_exposed(ctx, condition_id, person, day),
        }
    }

    pub fn on_state_change(
        &mut self,
        ctx: &mut Context,
        epi: &mut Epidemic,
        condition_id: ConditionId,
        person: PersonId,
        old_state: i32,
        new_state: usize,
        _day: u32,
    ) {
        match self {
            ConditionModel::Generic | ConditionModel::Hiv(_) => {}
            ConditionModel::Markov(m) => {
                m.on_state_change(person, old_state, new_state);
                // State zero is the chain's null state; everyone else
                // carries an active record.
                ctx.population
                    .get_mut(person)
                    .health
                    .record_mut(condition_id)
                    .is_infected = new_state != 0;
                if new_state != 0 && old_state <= 0 && !epi.is_active(person) {
                    epi.activate(person);
                }
            }
        }
    }

    pub fn update_person(&mut self, ctx: &mut Context, condition_id: ConditionId, person: PersonId, day: u32) {
        match self {
            ConditionModel::Generic | ConditionModel::Markov(_) => {}
            ConditionModel::Hiv(m) => m.update_person(ctx, condition_id, person, day),
        }
    }

    /// Single-state outgoing-probability bias, used for geographic or
    /// demographic targeting by the Markov kind.
    pub fn adjustment_for(&self, ctx: &Context, person: PersonId) -> Option<(usize, f64)> {
        match self {
            ConditionModel::Generic | ConditionModel::Hiv(_) => None,
            ConditionModel::Markov(m) => m.adjustment_for(ctx, person),
        }
    }

    pub fn terminate_person(&mut self, ctx: &mut Context, condition_id: ConditionId, person: PersonId, day: u32) {
        match self {
            ConditionModel::Generic => {}
            ConditionModel::Markov(m) => m.terminate_person(person),
            ConditionModel::Hiv(m) => m.terminate_person(ctx, condition_id, person, day),
        }
    }

    pub fn report(&mut self, ctx: &mut Context, condition_id: ConditionId, day: u32) {
        match self {
            ConditionModel::Generic => {}
            ConditionModel::Markov(m) => m.report(ctx, condition_id, day),
            ConditionModel::Hiv(m) => m.report(ctx, condition_id, day),
        }
    }
}
