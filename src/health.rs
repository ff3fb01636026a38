//! Per-agent health state, one record per (agent, condition) pair.
//!
//! A record tracks the agent's position in the condition's state space
//! together with the dates, flags and rates the epidemic and
//! transmission loops read. Cross-condition coupling lives here too:
//! each record carries one modifier scalar per other condition for
//! transmission, susceptibility and symptoms, written only by the
//! owning condition's state transitions.
//!
//! State transitions are exposed as an extension trait on [`Context`]
//! so they can emit health-record lines and touch the condition list,
//! the clock and the report writers in one place.

use crate::condition::ConditionId;
use crate::context::Context;
use crate::groups::GroupId;
use crate::network::NetworkId;
use crate::people::PersonId;

/// Symptom severity carried by a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum SymptomsLevel {
    #[default]
    None,
    Mild,
    Severe,
}

impl SymptomsLevel {
    pub fn from_index(i: u32) -> Self {
        match i {
            0 => SymptomsLevel::None,
            1 => SymptomsLevel::Mild,
            _ => SymptomsLevel::Severe,
        }
    }
}

/// Where an exposure happened: a place, an explicit network, or
/// nowhere (imported/seeded).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposureSite {
    Place(GroupId),
    Network(NetworkId),
}

#[derive(Debug, Clone)]
pub struct HealthRecord {
    /// Index into the condition's state space; -1 until first set.
    pub state: i32,
    pub last_transition_day: i32,
    pub last_transition_hour: i32,
    /// Day of the pending scheduled transition, -1 when none (dormant
    /// or absorbing states schedule nothing).
    pub next_transition_day: i32,
    /// The state the pending transition will enter.
    pub next_state: i32,
    pub onset_day: i32,
    pub symptoms_start_day: i32,
    pub symptoms_level: SymptomsLevel,
    pub is_infected: bool,
    pub is_immune: bool,
    pub is_recovered: bool,
    pub is_fatal: bool,
    pub infectivity: f64,
    pub susceptibility: f64,
    pub infector: Option<PersonId>,
    pub exposure_site: Option<ExposureSite>,
    pub infectees: u32,
    /// Modifier applied to this condition's transmission by each other
    /// condition's current state; all 1.0 until written.
    pub transmission_modifier: Vec<f64>,
    pub susceptibility_modifier: Vec<f64>,
    pub symptoms_modifier: Vec<f64>,
}

impl HealthRecord {
    fn new(conditions: usize) -> Self {
        Self {
            state: -1,
            last_transition_day: -1,
            last_transition_hour: -1,
            next_transition_day: -1,
            next_state: -1,
            onset_day: -1,
            symptoms_start_day: -1,
            symptoms_level: SymptomsLevel::None,
            is_infected: false,
            is_immune: false,
            is_recovered: false,
            is_fatal: false,
            infectivity: 0.0,
            susceptibility: 1.0,
            infector: None,
            exposure_site: None,
            infectees: 0,
            transmission_modifier: vec![1.0; conditions],
            susceptibility_modifier: vec![1.0; conditions],
            symptoms_modifier: vec![1.0; conditions],
        }
    }
}

#[derive(Debug, Default)]
pub struct Health {
    records: Vec<HealthRecord>,
}

impl Health {
    #[must_use]
    pub fn new(conditions: usize) -> Self {
        Self {
            records: (0..conditions).map(|_| HealthRecord::new(conditions)).collect(),
        }
    }

    #[must_use]
    pub fn record(&self, condition_id: ConditionId) -> &HealthRecord {
        &self.records[condition_id]
    }

    pub fn record_mut(&mut self, condition_id: ConditionId) -> &mut HealthRecord {
        &mut self.records[condition_id]
    }

    #[must_use]
    pub fn conditions(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_infected(&self, condition_id: ConditionId) -> bool {
        self.records[condition_id].is_infected
    }

    #[must_use]
    pub fn is_immune(&self, condition_id: ConditionId) -> bool {
        self.records[condition_id].is_immune
    }

    #[must_use]
    pub fn is_recovered(&self, condition_id: ConditionId) -> bool {
        self.records[condition_id].is_recovered
    }

    #[must_use]
    pub fn is_susceptible(&self, condition_id: ConditionId) -> bool {
        let r = &self.records[condition_id];
        r.susceptibility > 0.0 && !r.is_infected && !r.is_immune
    }

    #[must_use]
    pub fn is_infectious(&self, condition_id: ConditionId) -> bool {
        let r = &self.records[condition_id];
        r.is_infected && r.infectivity > 0.0
    }

    #[must_use]
    pub fn is_symptomatic(&self, condition_id: ConditionId) -> bool {
        self.records[condition_id].symptoms_level > SymptomsLevel::None
    }

    #[must_use]
    pub fn is_newly_infected(&self, day: u32, condition_id: ConditionId) -> bool {
        let r = &self.records[condition_id];
        r.is_infected && r.onset_day == day as i32
    }

    /// Product of the modifiers other conditions apply to this
    /// condition's transmission.
    #[must_use]
    pub fn transmission_modifier(&self, condition_id: ConditionId) -> f64 {
        self.records[condition_id].transmission_modifier.iter().product()
    }

    #[must_use]
    pub fn susceptibility_modifier(&self, condition_id: ConditionId) -> f64 {
        self.records[condition_id]
            .susceptibility_modifier
            .iter()
            .product()
    }

    #[must_use]
    pub fn symptoms_modifier(&self, condition_id: ConditionId) -> f64 {
        self.records[condition_id].symptoms_modifier.iter().product()
    }
}

/// Health state transitions, as operations on the whole context so that
/// record lines, group counters and condition metadata stay in step.
pub trait ContextHealthExt {
    fn become_susceptible(&mut self, person: PersonId, condition_id: ConditionId);
    /// Marks the person exposed. `infector`/`site` are `None` for
    /// imported exposures.
    ///
    /// # Panics
    /// Panics on double exposure: exposing an agent already infected
    /// with this condition is a programmer error in the caller.
    fn become_exposed(
        &mut self,
        person: PersonId,
        condition_id: ConditionId,
        infector: Option<PersonId>,
        site: Option<ExposureSite>,
        day: u32,
    );
    fn become_infectious(&mut self, person: PersonId, condition_id: ConditionId);
    fn become_noninfectious(&mut self, person: PersonId, condition_id: ConditionId);
    fn become_symptomatic(&mut self, person: PersonId, condition_id: ConditionId);
    fn resolve_symptoms(&mut self, person: PersonId, condition_id: ConditionId);
    fn recover(&mut self, person: PersonId, condition_id: ConditionId, day: u32);
    fn become_immune(&mut self, person: PersonId, condition_id: ConditionId);
    fn become_removed(&mut self, person: PersonId, condition_id: ConditionId, day: u32);
    fn become_case_fatality(&mut self, person: PersonId, condition_id: ConditionId, day: u32);
    /// Enters `state`, applying the state's side effects: symptom
    /// level, infectivity, susceptibility, fatality flag and the
    /// cross-condition modifier rows.
    fn set_health_state(
        &mut self,
        person: PersonId,
        condition_id: ConditionId,
        state: usize,
        day: u32,
        hour: u32,
    );
    /// Rolls today's new/current counters on the group where this
    /// person was exposed. Only meaningful for active infections.
    fn update_mixing_group_counts(&mut self, person: PersonId, condition_id: ConditionId, day: u32);
}

impl Context {
    fn health_record_line(&mut self, person: PersonId, condition_id: ConditionId, event: &str) {
        if !self.reports.health_records_enabled() {
            return;
        }
        let p = self.population.get(person);
        let line = format!(
            "HEALTH RECORD: {} day {} person {} age {} {} {}",
            self.clock.date(),
            self.clock.day(),
            p.id(),
            p.age(),
            event,
            self.conditions.name(condition_id)
        );
        self.reports.health_record(&line);
    }
}

impl ContextHealthExt for Context {
    fn become_susceptible(&mut self, person: PersonId, condition_id: ConditionId) {
        if self.population.get(person).health.is_susceptible(condition_id) {
            crate::warn!(
                "person {person} is already SUSCEPTIBLE for {}",
                self.conditions.name(condition_id)
            );
            return;
        }
        let record = self
            .population
            .get_mut(person)
            .health
            .record_mut(condition_id);
        record.susceptibility = 1.0;
        record.is_recovered = false;
        self.health_record_line(person, condition_id, "SUSCEPTIBLE for");
    }

    fn become_exposed(
        &mut self,
        person: PersonId,
        condition_id: ConditionId,
        infector: Option<PersonId>,
        site: Option<ExposureSite>,
        day: u32,
    ) {
        assert!(
            !self.population.get(person).health.is_infected(condition_id),
            "DOUBLE EXPOSURE: person {person} condition {condition_id} day {day}"
        );
        {
            let record = self
                .population
                .get_mut(person)
                .health
                .record_mut(condition_id);
            record.infector = infector;
            record.exposure_site = site;
            record.onset_day = day as i32;
            record.is_infected = true;
            record.susceptibility = 0.0;
        }
        if site.is_none() {
            self.health_record_line(person, condition_id, "is an IMPORTED EXPOSURE to");
        } else {
            self.health_record_line(person, condition_id, "is EXPOSED to");
        }
        if let Some(infector) = infector {
            self.population
                .get_mut(infector)
                .health
                .record_mut(condition_id)
                .infectees += 1;
        }
    }

    fn become_infectious(&mut self, person: PersonId, condition_id: ConditionId) {
        self.health_record_line(person, condition_id, "is INFECTIOUS for");
    }

    fn become_noninfectious(&mut self, person: PersonId, condition_id: ConditionId) {
        self.health_record_line(person, condition_id, "is NONINFECTIOUS for");
    }

    fn become_symptomatic(&mut self, person: PersonId, condition_id: ConditionId) {
        self.health_record_line(person, condition_id, "is SYMPTOMATIC for");
    }

    fn resolve_symptoms(&mut self, person: PersonId, condition_id: ConditionId) {
        self.population
            .get_mut(person)
            .health
            .record_mut(condition_id)
            .symptoms_level = SymptomsLevel::None;
        self.health_record_line(person, condition_id, "RESOLVES SYMPTOMS for");
    }

    fn recover(&mut self, person: PersonId, condition_id: ConditionId, day: u32) {
        {
            let record = self
                .population
                .get_mut(person)
                .health
                .record_mut(condition_id);
            record.is_infected = false;
            record.is_recovered = true;
        }
        self.health_record_line(person, condition_id, "is RECOVERED from");
        self.become_removed(person, condition_id, day);
    }

    fn become_immune(&mut self, person: PersonId, condition_id: ConditionId) {
        {
            let record = self
                .population
                .get_mut(person)
                .health
                .record_mut(condition_id);
            record.is_immune = true;
            record.is_infected = false;
            record.symptoms_level = SymptomsLevel::None;
            record.susceptibility = 0.0;
            record.infectivity = 0.0;
        }
        self.health_record_line(person, condition_id, "is IMMUNE for");
    }

    fn become_removed(&mut self, person: PersonId, condition_id: ConditionId, _day: u32) {
        {
            let record = self
                .population
                .get_mut(person)
                .health
                .record_mut(condition_id);
            record.symptoms_level = SymptomsLevel::None;
            record.susceptibility = 0.0;
            record.infectivity = 0.0;
        }
        self.health_record_line(person, condition_id, "is REMOVED for");
    }

    fn become_case_fatality(&mut self, person: PersonId, condition_id: ConditionId, day: u32) {
        {
            let record = self
                .population
                .get_mut(person)
                .health
                .record_mut(condition_id);
            record.is_fatal = true;
            record.is_infected = false;
        }
        self.health_record_line(person, condition_id, "is CASE_FATALITY for");
        self.become_removed(person, condition_id, day);
        if let Some(ExposureSite::Place(group)) =
            self.population.get(person).health.record(condition_id).exposure_site
        {
            self.places
                .get_mut(group)
                .increment_case_fatalities(day, condition_id);
        }
    }

    fn set_health_state(
        &mut self,
        person: PersonId,
        condition_id: ConditionId,
        state: usize,
        day: u32,
        hour: u32,
    ) {
        let conditions = self.conditions.len();
        let was_infectious = self.population.get(person).health.is_infectious(condition_id);
        let was_symptomatic = self.population.get(person).health.is_symptomatic(condition_id);

        let (symptoms, infectivity, susceptibility, fatal, recovers) = {
            let nh = self.conditions.natural_history(condition_id);
            (
                nh.symptoms_level(state),
                nh.infectivity(state),
                nh.susceptibility(state),
                nh.is_fatal_state(state),
                nh.is_recovered_state(state),
            )
        };

        {
            let record = self
                .population
                .get_mut(person)
                .health
                .record_mut(condition_id);
            record.state = state as i32;
            record.last_transition_day = day as i32;
            record.last_transition_hour = hour as i32;
            if symptoms > SymptomsLevel::None && record.symptoms_start_day == -1 {
                record.symptoms_start_day = day as i32;
            }
            record.symptoms_level = symptoms;
            record.infectivity = infectivity;
            record.susceptibility = susceptibility;
            if fatal {
                record.is_fatal = true;
            }
        }

        // This condition's new state rewrites its modifier column in
        // every other condition's record.
        for other in 0..conditions {
            let (trans_mod, susc_mod, symp_mod) = {
                let nh = self.conditions.natural_history(condition_id);
                (
                    nh.transmission_modifier(state, other),
                    nh.susceptibility_modifier(state, other),
                    nh.symptoms_modifier(state, other),
                )
            };
            let record = self.population.get_mut(person).health.record_mut(other);
            record.transmission_modifier[condition_id] = trans_mod;
            record.susceptibility_modifier[condition_id] = susc_mod;
            record.symptoms_modifier[condition_id] = symp_mod;
        }

        let now_infectious = self.population.get(person).health.is_infectious(condition_id);
        let now_symptomatic = self.population.get(person).health.is_symptomatic(condition_id);
        if !was_infectious && now_infectious {
            self.become_infectious(person, condition_id);
        } else if was_infectious && !now_infectious {
            self.become_noninfectious(person, condition_id);
        }
        if !was_symptomatic && now_symptomatic {
            self.become_symptomatic(person, condition_id);
        }

        // Recovered-type states resolve the infection itself.
        if recovers && self.population.get(person).health.is_infected(condition_id) {
            self.recover(person, condition_id, day);
        }
    }

    fn update_mixing_group_counts(
        &mut self,
        person: PersonId,
        condition_id: ConditionId,
        day: u32,
    ) {
        let health = &self.population.get(person).health;
        assert!(health.is_infected(condition_id));
        let Some(ExposureSite::Place(group)) = health.record(condition_id).exposure_site else {
            return;
        };
        let newly_infected = health.is_newly_infected(day, condition_id);
        let symptomatic = health.is_symptomatic(condition_id);
        let symptoms_started_today =
            health.record(condition_id).symptoms_start_day == day as i32;

        let place = self.places.get_mut(group);
        if newly_infected {
            place.increment_new_infections(day, condition_id);
        }
        place.increment_current_infections(day, condition_id);
        if symptomatic {
            if symptoms_started_today {
                place.increment_new_symptomatic(day, condition_id);
            }
            place.increment_current_symptomatic(day, condition_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_is_susceptible() {
        let health = Health::new(2);
        assert!(health.is_susceptible(0));
        assert!(!health.is_infected(0));
        assert!(!health.is_infectious(0));
        assert_eq!(health.record(0).state, -1);
    }

    #[test]
    fn infectious_needs_infection_and_infectivity() {
        let mut health = Health::new(1);
        health.record_mut(0).infectivity = 0.8;
        assert!(!health.is_infectious(0));
        health.record_mut(0).is_infected = true;
        assert!(health.is_infectious(0));
    }

    #[test]
    fn susceptibility_excludes_infected_and_immune() {
        let mut health = Health::new(1);
        health.record_mut(0).is_infected = true;
        assert!(!health.is_susceptible(0));
        health.record_mut(0).is_infected = false;
        health.record_mut(0).is_immune = true;
        assert!(!health.is_susceptible(0));
    }

    #[test]
    fn modifier_products_start_at_unity() {
        let health = Health::new(3);
        assert_eq!(health.transmission_modifier(1), 1.0);
        assert_eq!(health.susceptibility_modifier(1), 1.0);
    }

    #[test]
    fn modifier_product_multiplies_columns() {
        let mut health = Health::new(3);
        health.record_mut(1).transmission_modifier[0] = 0.5;
        health.record_mut(1).transmission_modifier[2] = 0.5;
        assert_eq!(health.transmission_modifier(1), 0.25);
    }

    #[test]
    fn symptoms_levels_order() {
        assert!(SymptomsLevel::Severe > SymptomsLevel::Mild);
        assert!(SymptomsLevel::Mild > SymptomsLevel::None);
        assert_eq!(SymptomsLevel::from_index(0), SymptomsLevel::None);
        assert_eq!(SymptomsLevel::from_index(5), SymptomsLevel::Severe);
    }
}
