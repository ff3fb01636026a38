//! The Markov condition kind: a pure state-machine condition (drug
//! use, behavioural states) driven by the age-banded transition chain
//! in the condition's natural history.
//!
//! The kind keeps per-state people lists for reporting, assigns
//! initial states at day 0 from the age-banded initial distribution,
//! and supports a single-state targeting adjustment (by household
//! admin code) that biases both the initial draw and the outgoing
//! transition probabilities.

use serde::Serialize;

use crate::condition::{ConditionId, ConditionModel};
use crate::context::Context;
use crate::epidemic::{update_state_of_person, Epidemic};
use crate::error::ContagionError;
use crate::people::PersonId;
use crate::{debug, info};

/// Bias one state's probability for agents matching a predicate.
#[derive(Debug, Clone)]
pub struct StateAdjustment {
    pub state: usize,
    pub factor: f64,
    /// Restrict the adjustment to agents with this household admin
    /// code; `None` applies it to everyone.
    pub admin_code: Option<i64>,
}

#[derive(Debug, Default)]
pub struct MarkovModel {
    people_in_state: Vec<Vec<PersonId>>,
    adjustment: Option<StateAdjustment>,
}

#[derive(Serialize)]
struct StateCountRow<'a> {
    day: u32,
    condition: &'a str,
    state: &'a str,
    count: usize,
}

impl MarkovModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_adjustment(&mut self, adjustment: StateAdjustment) {
        self.adjustment = Some(adjustment);
    }

    pub fn prepare(&mut self, ctx: &mut Context, condition_id: ConditionId) -> Result<(), ContagionError> {
        let states = ctx.conditions.natural_history(condition_id).number_of_states();
        self.people_in_state = vec![Vec::new(); states];

        let name = ctx.conditions.name(condition_id).to_string();
        let state = ctx
            .params
            .get_usize_or(&format!("{name}.adjustment_state"), usize::MAX)?;
        if state != usize::MAX {
            self.adjustment = Some(StateAdjustment {
                state,
                factor: ctx.params.get_f64_or(&format!("{name}.adjustment"), 1.0)?,
                admin_code: ctx
                    .params
                    .get_scalar::<i64>(&format!("{name}.adjustment_admin_code"))
                    .ok()
                    .flatten(),
            });
        }
        info!("markov model for {name} prepared with {states} states");
        Ok(())
    }

    #[must_use]
    pub fn count_in_state(&self, state: usize) -> usize {
        self.people_in_state.get(state).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn people_in_state(&self, state: usize) -> &[PersonId] {
        &self.people_in_state[state]
    }

    pub fn on_state_change(&mut self, person: PersonId, old_state: i32, new_state: usize) {
        if old_state >= 0 {
            let list = &mut self.people_in_state[old_state as usize];
            if let Some(pos) = list.iter().position(|p| *p == person) {
                list.swap_remove(pos);
            }
        }
        self.people_in_state[new_state].push(person);
    }

    pub fn adjustment_for(&self, ctx: &Context, person: PersonId) -> Option<(usize, f64)> {
        let adjustment = self.adjustment.as_ref()?;
        match adjustment.admin_code {
            Some(code) if ctx.population.get(person).admin_code() != code => None,
            _ => Some((adjustment.state, adjustment.factor)),
        }
    }

    pub fn terminate_person(&mut self, person: PersonId) {
        for list in &mut self.people_in_state {
            if let Some(pos) = list.iter().position(|p| *p == person) {
                list.swap_remove(pos);
            }
        }
    }

    pub fn report(&mut self, ctx: &mut Context, condition_id: ConditionId, day: u32) {
        for state in 0..self.people_in_state.len() {
            let row = StateCountRow {
                day,
                condition: ctx.conditions.name(condition_id),
                state: ctx.conditions.natural_history(condition_id).state_name(state),
                count: self.people_in_state[state].len(),
            };
            ctx.reports.send_report("state_counts", &row);
        }
    }
}

/// Assigns every alive agent an initial state from the age-banded
/// initial distribution. Agents landing in a non-zero state are
/// activated; everyone gets their first transition scheduled.
pub fn initialize_markov_population(
    ctx: &mut Context,
    epi: &mut Epidemic,
    model: &mut ConditionModel,
    condition_id: ConditionId,
) {
    let people: Vec<PersonId> = ctx.population.ids().collect();
    let mut assigned = 0usize;
    for person in people {
        if !ctx.population.get(person).is_alive() {
            continue;
        }
        let age = ctx.population.get(person).real_age();
        let adjustment = model.adjustment_for(ctx, person);
        let state = ctx
            .conditions
            .natural_history(condition_id)
            .initial_state(&ctx.rng, age, adjustment);
        if state != 0 {
            // Non-zero chain states count as an active record even
            // though nobody "exposed" this agent.
            ctx.population
                .get_mut(person)
                .health
                .record_mut(condition_id)
                .is_infected = true;
            ctx.population
                .get_mut(person)
                .health
                .record_mut(condition_id)
                .onset_day = 0;
            epi.activate(person);
            assigned += 1;
        }
        update_state_of_person(ctx, epi, model, condition_id, person, state, 0);
    }
    debug!(
        "markov initialization for {}: {assigned} agents start in non-zero states",
        ctx.conditions.name(condition_id)
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_lists_track_changes() {
        let mut model = MarkovModel::new();
        model.people_in_state = vec![Vec::new(); 3];
        model.on_state_change(PersonId(1), -1, 0);
        model.on_state_change(PersonId(2), -1, 0);
        assert_eq!(model.count_in_state(0), 2);

        model.on_state_change(PersonId(1), 0, 2);
        assert_eq!(model.count_in_state(0), 1);
        assert_eq!(model.count_in_state(2), 1);
        assert_eq!(model.people_in_state(2), &[PersonId(1)]);
    }

    #[test]
    fn terminate_clears_membership() {
        let mut model = MarkovModel::new();
        model.people_in_state = vec![Vec::new(); 2];
        model.on_state_change(PersonId(5), -1, 1);
        model.terminate_person(PersonId(5));
        assert_eq!(model.count_in_state(1), 0);
    }
}
