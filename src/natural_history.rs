//! The natural-history model: one condition's state space, transition
//! logic and per-state side effects.
//!
//! A state carries infectivity, susceptibility, a symptom level, a
//! fatality flag and (optionally) a different condition to transmit,
//! which lets one condition's state spawn exposures to another. Some
//! states are dormant: they schedule no exit and wait for an external
//! driver. Transition draws are age-banded: each age group has its own
//! row-stochastic matrix, completed so that the diagonal absorbs
//! whatever probability the off-diagonal entries leave.
//!
//! The model is immutable after `prepare()`; all lookups on the hot
//! path are plain indexed reads.

use crate::age_map::AgeMap;
use crate::error::ContagionError;
use crate::health::SymptomsLevel;
use crate::params::{indexed_key, matrix_key, Params};
use crate::random::{RngRegistry, RNG_NATURAL_HISTORY};

/// Everything one state does to its occupant.
#[derive(Debug, Clone)]
pub struct StateSpec {
    pub name: String,
    pub infectivity: f64,
    pub susceptibility: f64,
    pub symptoms: SymptomsLevel,
    pub fatal: bool,
    /// Entering this state resolves the infection: the occupant is
    /// marked recovered and leaves the active list.
    pub recovered: bool,
    /// Dormant states schedule no exit even when the matrix row has
    /// off-diagonal mass.
    pub dormant: bool,
    /// Condition to transmit while in this state; `None` means the
    /// owning condition itself.
    pub condition_to_transmit: Option<usize>,
    /// Group-type names to join/quit on entering this state.
    pub place_type_to_join: Option<String>,
    pub place_type_to_quit: Option<String>,
}

impl StateSpec {
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            infectivity: 0.0,
            susceptibility: 0.0,
            symptoms: SymptomsLevel::None,
            fatal: false,
            recovered: false,
            dormant: false,
            condition_to_transmit: None,
            place_type_to_join: None,
            place_type_to_quit: None,
        }
    }
}

/// One entry in the exogenous-import schedule.
#[derive(Debug, Clone)]
pub struct ImportEvent {
    pub start_day: u32,
    pub end_day: u32,
    /// Cases requested per day in the window.
    pub count_per_day: u32,
    pub min_age: f64,
    pub max_age: f64,
    /// Restrict candidates to this household admin code.
    pub admin_code: Option<i64>,
}

impl Default for ImportEvent {
    fn default() -> Self {
        Self {
            start_day: 0,
            end_day: 0,
            count_per_day: 0,
            min_age: 0.0,
            max_age: f64::MAX,
            admin_code: None,
        }
    }
}

/// The outcome of a transition draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next_state: usize,
    /// `None` when the current state is absorbing (or dormant).
    pub transition_day: Option<u32>,
}

#[derive(Debug, Default)]
pub struct NaturalHistory {
    pub name: String,
    states: Vec<StateSpec>,
    exposed_state: usize,
    import_state: usize,
    age_map: AgeMap,
    transition_time_period: f64,
    /// `[age_group][from][to]`, diagonal-completed at prepare.
    transition: Vec<Vec<Vec<f64>>>,
    /// `[age_group][state]` initial percentages for chain conditions.
    initial_percent: Vec<Vec<f64>>,
    /// `[state][other_condition]` modifier tables, all 1.0 by default.
    transmission_modifier: Vec<Vec<f64>>,
    susceptibility_modifier: Vec<Vec<f64>>,
    symptoms_modifier: Vec<Vec<f64>>,
    imports: Vec<ImportEvent>,
    prepared: bool,
}

impl NaturalHistory {
    /// Starts a model with the given states and a single age band.
    /// Callers fill in the matrix and call `prepare`.
    #[must_use]
    pub fn build(name: &str, states: Vec<StateSpec>, condition_count: usize) -> Self {
        let n = states.len();
        Self {
            name: name.to_string(),
            states,
            exposed_state: 1.min(n.saturating_sub(1)),
            import_state: 1.min(n.saturating_sub(1)),
            age_map: AgeMap::single_group(),
            transition_time_period: 1.0,
            transition: vec![identity_matrix(n)],
            initial_percent: vec![first_state_percent(n)],
            transmission_modifier: vec![vec![1.0; condition_count]; n],
            susceptibility_modifier: vec![vec![1.0; condition_count]; n],
            symptoms_modifier: vec![vec![1.0; condition_count]; n],
            imports: Vec::new(),
            prepared: false,
        }
    }

    /// Reads the model for condition `name` from properties. Optional
    /// keys fall back to defaults; the state count is required.
    pub fn from_params(
        params: &Params,
        name: &str,
        condition_names: &[String],
    ) -> Result<Self, ContagionError> {
        let n: usize = params.require_scalar(&format!("{name}.states"))?;
        if n == 0 {
            return Err(ContagionError::ContagionError(format!(
                "{name}.states must be positive"
            )));
        }
        params.disable_abort_on_failure();

        let mut states = Vec::with_capacity(n);
        for i in 0..n {
            let mut state = StateSpec::named(
                &params.get_str_or(&indexed_key(&format!("{name}.state"), i, "name"), &format!("S{i}")),
            );
            state.infectivity =
                params.get_f64_or(&indexed_key(&format!("{name}.state"), i, "infectivity"), 0.0)?;
            state.susceptibility = params.get_f64_or(
                &indexed_key(&format!("{name}.state"), i, "susceptibility"),
                0.0,
            )?;
            state.symptoms = SymptomsLevel::from_index(params.get_u32_or(
                &indexed_key(&format!("{name}.state"), i, "symptoms"),
                0,
            )?);
            state.fatal =
                params.get_bool_or(&indexed_key(&format!("{name}.state"), i, "fatal"), false)?;
            state.recovered =
                params.get_bool_or(&indexed_key(&format!("{name}.state"), i, "recovered"), false)?;
            state.dormant =
                params.get_bool_or(&indexed_key(&format!("{name}.state"), i, "dormant"), false)?;
            if let Some(other) = params
                .get_str(&indexed_key(&format!("{name}.state"), i, "condition_to_transmit"))?
            {
                let other_id = condition_names
                    .iter()
                    .position(|c| *c == other)
                    .ok_or_else(|| {
                        ContagionError::ContagionError(format!(
                            "{name}.state[{i}].condition_to_transmit: unknown condition {other}"
                        ))
                    })?;
                state.condition_to_transmit = Some(other_id);
            }
            state.place_type_to_join =
                params.get_str(&indexed_key(&format!("{name}.state"), i, "join_place_type"))?;
            state.place_type_to_quit =
                params.get_str(&indexed_key(&format!("{name}.state"), i, "quit_place_type"))?;
            states.push(state);
        }

        let mut nh = NaturalHistory::build(name, states, condition_names.len());
        nh.exposed_state = params.get_usize_or(&format!("{name}.exposed_state"), nh.exposed_state)?;
        nh.import_state = params.get_usize_or(&format!("{name}.import_state"), nh.exposed_state)?;
        nh.transition_time_period =
            params.get_f64_or(&format!("{name}.transition_time_period"), 1.0)?;

        if let Some(bounds) = params.get_vec_f64(&format!("{name}.age_group_upper_bounds"))? {
            nh.age_map = AgeMap::new(bounds)?;
        }
        let groups = nh.age_map.groups();
        nh.transition = vec![identity_matrix(n); groups];
        nh.initial_percent = vec![first_state_percent(n); groups];

        for g in 0..groups {
            for i in 0..n {
                for j in 0..n {
                    if let Some(p) = params.get_f64(&matrix_key(name, g, i, j))? {
                        nh.transition[g][i][j] = p;
                    }
                }
            }
            for i in 0..n {
                if let Some(pct) =
                    params.get_f64(&format!("{name}.group[{g}].initial_percent[{i}]"))?
                {
                    nh.initial_percent[g][i] = pct;
                }
            }
        }

        // Modifier tables: one value per other condition.
        for i in 0..n {
            if let Some(v) = params
                .get_vec_f64(&indexed_key(&format!("{name}.state"), i, "transmission_modifier"))?
            {
                nh.set_transmission_modifier_row(i, &v)?;
            }
            if let Some(v) = params.get_vec_f64(&indexed_key(
                &format!("{name}.state"),
                i,
                "susceptibility_modifier",
            ))? {
                nh.set_susceptibility_modifier_row(i, &v)?;
            }
        }

        let import_count = params.get_usize_or(&format!("{name}.imports"), 0)?;
        for k in 0..import_count {
            let base = format!("{name}.import");
            let event = ImportEvent {
                start_day: params.get_u32_or(&indexed_key(&base, k, "start_day"), 0)?,
                end_day: params.get_u32_or(&indexed_key(&base, k, "end_day"), 0)?,
                count_per_day: params.get_u32_or(&indexed_key(&base, k, "count"), 0)?,
                min_age: params.get_f64_or(&indexed_key(&base, k, "min_age"), 0.0)?,
                max_age: params.get_f64_or(&indexed_key(&base, k, "max_age"), f64::MAX)?,
                admin_code: params
                    .get_scalar::<i64>(&indexed_key(&base, k, "admin_code"))?,
            };
            nh.imports.push(event);
        }

        params.set_abort_on_failure();
        Ok(nh)
    }

    /// Completes and validates the transition matrices. Must be called
    /// before any transition draw; the model is immutable afterwards.
    pub fn prepare(&mut self) -> Result<(), ContagionError> {
        let n = self.states.len();
        for (g, matrix) in self.transition.iter_mut().enumerate() {
            for i in 0..n {
                let off_diagonal: f64 = (0..n).filter(|j| *j != i).map(|j| matrix[i][j]).sum();
                if off_diagonal > 1.0 + 1e-9 {
                    return Err(ContagionError::ContagionError(format!(
                        "{}: group {g} state {i} off-diagonal mass {off_diagonal} exceeds 1",
                        self.name
                    )));
                }
                // Staying put takes whatever the exits leave.
                matrix[i][i] = (1.0 - off_diagonal).max(0.0);
            }
        }
        for percents in &self.initial_percent {
            let total: f64 = percents.iter().sum();
            if (total - 100.0).abs() > 1e-6 && total != 0.0 {
                return Err(ContagionError::ContagionError(format!(
                    "{}: initial percentages sum to {total}, expected 100",
                    self.name
                )));
            }
        }
        if self.exposed_state >= n || self.import_state >= n {
            return Err(ContagionError::ContagionError(format!(
                "{}: exposed/import state out of range",
                self.name
            )));
        }
        self.prepared = true;
        Ok(())
    }

    #[must_use]
    pub fn number_of_states(&self) -> usize {
        self.states.len()
    }

    #[must_use]
    pub fn state(&self, state: usize) -> &StateSpec {
        &self.states[state]
    }

    #[must_use]
    pub fn state_name(&self, state: usize) -> &str {
        &self.states[state].name
    }

    pub fn state_from_name(&self, name: &str) -> Option<usize> {
        self.states.iter().position(|s| s.name == name)
    }

    #[must_use]
    pub fn infectivity(&self, state: usize) -> f64 {
        self.states[state].infectivity
    }

    #[must_use]
    pub fn susceptibility(&self, state: usize) -> f64 {
        self.states[state].susceptibility
    }

    #[must_use]
    pub fn symptoms_level(&self, state: usize) -> SymptomsLevel {
        self.states[state].symptoms
    }

    #[must_use]
    pub fn is_fatal_state(&self, state: usize) -> bool {
        self.states[state].fatal
    }

    #[must_use]
    pub fn is_recovered_state(&self, state: usize) -> bool {
        self.states[state].recovered
    }

    #[must_use]
    pub fn is_dormant_state(&self, state: usize) -> bool {
        self.states[state].dormant
    }

    #[must_use]
    pub fn condition_to_transmit(&self, state: usize, own_condition: usize) -> usize {
        self.states[state].condition_to_transmit.unwrap_or(own_condition)
    }

    #[must_use]
    pub fn exposed_state(&self) -> usize {
        self.exposed_state
    }

    #[must_use]
    pub fn import_state(&self) -> usize {
        self.import_state
    }

    #[must_use]
    pub fn imports(&self) -> &[ImportEvent] {
        &self.imports
    }

    pub fn add_import(&mut self, event: ImportEvent) {
        self.imports.push(event);
    }

    #[must_use]
    pub fn age_map(&self) -> &AgeMap {
        &self.age_map
    }

    pub fn set_age_map(&mut self, age_map: AgeMap) {
        let groups = age_map.groups();
        let n = self.states.len();
        self.age_map = age_map;
        self.transition = vec![identity_matrix(n); groups];
        self.initial_percent = vec![first_state_percent(n); groups];
    }

    pub fn set_exposed_state(&mut self, state: usize) {
        self.exposed_state = state;
        self.import_state = state;
    }

    pub fn set_transition_time_period(&mut self, period: f64) {
        self.transition_time_period = period;
    }

    /// Sets one transition probability for one age group; the diagonal
    /// is recomputed at `prepare`.
    pub fn set_transition(&mut self, age_group: usize, from: usize, to: usize, prob: f64) {
        assert!(from != to, "diagonal entries are derived, not set");
        self.transition[age_group][from][to] = prob;
    }

    pub fn set_initial_percent(&mut self, age_group: usize, state: usize, percent: f64) {
        self.initial_percent[age_group][state] = percent;
    }

    fn set_transmission_modifier_row(
        &mut self,
        state: usize,
        row: &[f64],
    ) -> Result<(), ContagionError> {
        if row.len() != self.transmission_modifier[state].len() {
            return Err("modifier row length must equal the condition count".into());
        }
        self.transmission_modifier[state].copy_from_slice(row);
        Ok(())
    }

    fn set_susceptibility_modifier_row(
        &mut self,
        state: usize,
        row: &[f64],
    ) -> Result<(), ContagionError> {
        if row.len() != self.susceptibility_modifier[state].len() {
            return Err("modifier row length must equal the condition count".into());
        }
        self.susceptibility_modifier[state].copy_from_slice(row);
        Ok(())
    }

    pub fn set_modifier(
        &mut self,
        state: usize,
        other_condition: usize,
        transmission: f64,
        susceptibility: f64,
        symptoms: f64,
    ) {
        self.transmission_modifier[state][other_condition] = transmission;
        self.susceptibility_modifier[state][other_condition] = susceptibility;
        self.symptoms_modifier[state][other_condition] = symptoms;
    }

    #[must_use]
    pub fn transmission_modifier(&self, state: usize, other_condition: usize) -> f64 {
        self.transmission_modifier[state][other_condition]
    }

    #[must_use]
    pub fn susceptibility_modifier(&self, state: usize, other_condition: usize) -> f64 {
        self.susceptibility_modifier[state][other_condition]
    }

    #[must_use]
    pub fn symptoms_modifier(&self, state: usize, other_condition: usize) -> f64 {
        self.symptoms_modifier[state][other_condition]
    }

    /// Draws the initial state for an agent of the given age from the
    /// initial-percentage row, with an optional single-state bias used
    /// for geographic targeting.
    pub fn initial_state(
        &self,
        rng: &RngRegistry,
        age: f64,
        adjustment: Option<(usize, f64)>,
    ) -> usize {
        assert!(self.prepared, "natural history not prepared");
        let group = self.age_map.find_group(age);
        let percents = &self.initial_percent[group];
        let (adj_state, adj) = adjustment.unwrap_or((usize::MAX, 1.0));
        let weights: Vec<f64> = percents
            .iter()
            .enumerate()
            .map(|(i, p)| if i == adj_state { p * adj } else { *p })
            .collect();
        rng.sample_weighted(RNG_NATURAL_HISTORY, &weights)
    }

    /// Draws the next state and its day for an agent in `state`.
    ///
    /// The wait is exponential with rate `−ln(stay)` scaled by the
    /// transition time period; the draw of the destination samples the
    /// outgoing row with the diagonal removed. A stay probability of
    /// one makes the state absorbing: no transition is scheduled.
    pub fn get_next_state(
        &self,
        rng: &RngRegistry,
        age: f64,
        state: usize,
        day: u32,
        adjustment: Option<(usize, f64)>,
    ) -> Transition {
        assert!(self.prepared, "natural history not prepared");
        let none = Transition {
            next_state: state,
            transition_day: None,
        };
        if self.states[state].dormant {
            return none;
        }
        let group = self.age_map.find_group(age);
        let row = &self.transition[group][state];
        let (adj_state, adj) = adjustment.unwrap_or((usize::MAX, 1.0));

        let mut stay = row[state];
        if adj_state == state {
            stay = (stay * adj).min(1.0);
        }
        if stay >= 1.0 {
            // Absorbing.
            return none;
        }

        // Rate at which we leave the current state.
        let lambda = -stay.max(f64::MIN_POSITIVE).ln();
        let wait = rng.sample(RNG_NATURAL_HISTORY, |r| {
            rand_distr::Distribution::sample(&rand_distr::Exp::new(lambda).unwrap(), r)
        });
        let mut transition_day = day + (wait * self.transition_time_period).round() as u32;
        if transition_day == day {
            transition_day = day + 1;
        }

        let weights: Vec<f64> = row
            .iter()
            .enumerate()
            .map(|(j, p)| {
                if j == state {
                    0.0
                } else if j == adj_state {
                    p * adj
                } else {
                    *p
                }
            })
            .collect();
        let next_state = rng.sample_weighted(RNG_NATURAL_HISTORY, &weights);
        Transition {
            next_state,
            transition_day: Some(transition_day),
        }
    }
}

fn identity_matrix(n: usize) -> Vec<Vec<f64>> {
    let mut matrix = vec![vec![0.0; n]; n];
    for (i, row) in matrix.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    matrix
}

fn first_state_percent(n: usize) -> Vec<f64> {
    let mut percents = vec![0.0; n];
    if n > 0 {
        percents[0] = 100.0;
    }
    percents
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_state(stay: f64) -> NaturalHistory {
        let mut nh = NaturalHistory::build(
            "TEST",
            vec![StateSpec::named("A"), StateSpec::named("B")],
            1,
        );
        nh.set_transition(0, 0, 1, 1.0 - stay);
        nh.prepare().unwrap();
        nh
    }

    #[test]
    fn absorbing_state_schedules_nothing() {
        let nh = two_state(1.0);
        let rng = RngRegistry::new(1);
        let t = nh.get_next_state(&rng, 30.0, 0, 5, None);
        assert_eq!(t.next_state, 0);
        assert_eq!(t.transition_day, None);
    }

    #[test]
    fn transition_is_strictly_future() {
        let nh = two_state(0.5);
        let rng = RngRegistry::new(7);
        for _ in 0..200 {
            let t = nh.get_next_state(&rng, 30.0, 0, 10, None);
            assert_eq!(t.next_state, 1);
            assert!(t.transition_day.unwrap() > 10);
        }
    }

    #[test]
    fn mean_wait_tracks_stay_probability() {
        // stay = e^-1 gives lambda = 1, mean wait 1 period.
        let nh = two_state((-1.0f64).exp());
        let rng = RngRegistry::new(42);
        let n = 5000;
        let total: u64 = (0..n)
            .map(|_| u64::from(nh.get_next_state(&rng, 30.0, 0, 0, None).transition_day.unwrap()))
            .sum();
        let mean = total as f64 / f64::from(n);
        // Rounded and floored at one day, the mean sits near 1.2.
        assert!(mean > 0.9 && mean < 1.6, "mean wait was {mean}");
    }

    #[test]
    fn dormant_state_never_exits() {
        let mut nh = NaturalHistory::build(
            "TEST",
            vec![
                StateSpec {
                    dormant: true,
                    ..StateSpec::named("A")
                },
                StateSpec::named("B"),
            ],
            1,
        );
        nh.set_transition(0, 0, 1, 0.9);
        nh.prepare().unwrap();
        let rng = RngRegistry::new(1);
        assert_eq!(nh.get_next_state(&rng, 20.0, 0, 0, None).transition_day, None);
    }

    #[test]
    fn adjustment_can_make_state_absorbing() {
        let nh = {
            let mut nh = NaturalHistory::build(
                "TEST",
                vec![StateSpec::named("A"), StateSpec::named("B")],
                1,
            );
            nh.set_transition(0, 0, 1, 0.5);
            nh.prepare().unwrap();
            nh
        };
        let rng = RngRegistry::new(1);
        let t = nh.get_next_state(&rng, 30.0, 0, 0, Some((0, 10.0)));
        assert_eq!(t.transition_day, None);
    }

    #[test]
    fn next_state_draw_respects_adjustment_bias() {
        let mut nh = NaturalHistory::build(
            "TEST",
            vec![
                StateSpec::named("A"),
                StateSpec::named("B"),
                StateSpec::named("C"),
            ],
            1,
        );
        nh.set_transition(0, 0, 1, 0.3);
        nh.set_transition(0, 0, 2, 0.3);
        nh.prepare().unwrap();
        let rng = RngRegistry::new(9);
        // Suppressing state 2 entirely forces every exit into state 1.
        for _ in 0..100 {
            let t = nh.get_next_state(&rng, 30.0, 0, 0, Some((2, 0.0)));
            assert_eq!(t.next_state, 1);
        }
    }

    #[test]
    fn age_groups_use_distinct_rows() {
        let mut nh = NaturalHistory::build(
            "TEST",
            vec![StateSpec::named("A"), StateSpec::named("B")],
            1,
        );
        nh.set_age_map(AgeMap::new(vec![18.0, 200.0]).unwrap());
        nh.set_transition(0, 0, 1, 1.0); // children always leave
        nh.set_transition(1, 0, 1, 0.0); // adults never leave
        nh.prepare().unwrap();
        let rng = RngRegistry::new(1);
        assert!(nh.get_next_state(&rng, 10.0, 0, 0, None).transition_day.is_some());
        assert!(nh.get_next_state(&rng, 40.0, 0, 0, None).transition_day.is_none());
    }

    #[test]
    fn prepare_rejects_overfull_rows() {
        let mut nh = NaturalHistory::build(
            "TEST",
            vec![StateSpec::named("A"), StateSpec::named("B")],
            1,
        );
        nh.set_transition(0, 0, 1, 1.5);
        assert!(nh.prepare().is_err());
    }

    #[test]
    fn params_round_trip() {
        let params = Params::from_str(
            "
            INF.states 3
            INF.state[0].name S
            INF.state[1].name I
            INF.state[1].infectivity 1.0
            INF.state[1].symptoms 1
            INF.state[2].name R
            INF.exposed_state 1
            INF.group[0].trans[1][2] 0.2
            INF.imports 1
            INF.import[0].start_day 0
            INF.import[0].end_day 0
            INF.import[0].count 5
            ",
        )
        .unwrap();
        let mut nh =
            NaturalHistory::from_params(&params, "INF", &["INF".to_string()]).unwrap();
        nh.prepare().unwrap();
        assert_eq!(nh.number_of_states(), 3);
        assert_eq!(nh.state_name(1), "I");
        assert_eq!(nh.infectivity(1), 1.0);
        assert_eq!(nh.symptoms_level(1), SymptomsLevel::Mild);
        assert_eq!(nh.exposed_state(), 1);
        assert_eq!(nh.imports().len(), 1);
        assert_eq!(nh.imports()[0].count_per_day, 5);
        assert_eq!(nh.state_from_name("R"), Some(2));
    }
}
