//! The HIV condition kind: a patient-level progression model overlaid
//! on the sexual-partner network.
//!
//! Every infected agent carries CD4 and log10 viral-load trajectories,
//! an acute phase for incident infections, annual birthday screening,
//! a triple-drug regimen over six drug classes with mutation accrual
//! and cross-resistance, and mortality drawn from a joint lookup over
//! (on-HAART, age band, time on therapy, CD4 bucket, VL bucket) with
//! AIDS multipliers. Resource-poor and resource-rich branches differ
//! only in regimen-change policy and cost tables.
//!
//! Trajectories run on a monthly cycle embedded in the daily update:
//! values approach their targets at the exponential rates
//! `r_VL = −ln(1 − 1/1.5)` and `r_CD4 = −ln(1 − 1/3.13)`.

use std::path::Path;

use serde::Serialize;

use crate::condition::ConditionId;
use crate::context::Context;
use crate::date::DAYS_PER_YEAR;
use crate::error::ContagionError;
use crate::hash::HashMap;
use crate::params::Params;
use crate::people::{PersonId, Sex};
use crate::random::{RngRegistry, RNG_HIV};
use crate::{debug, info, warn};

pub const ARV_TYPES: usize = 6;
pub const DRUGS_IN_REG: usize = 3;
const CYCLE_DAYS: u32 = 30;
const TABLE_SPACE: usize = 400;
const EPSILON: f64 = 1e-5;

// Drug classes.
pub const PI_SINGULAR: usize = 0;
pub const PI_BOOSTED: usize = 1;
pub const NRTI_TAM: usize = 2;
pub const NRTI_NONTAM: usize = 3;
pub const NNRTI_EFAVIRENZ: usize = 4;
pub const NNRTI_NEVIRAPINE: usize = 5;

pub const CLASS_NAMES: [&str; ARV_TYPES] = [
    "PI_Singular",
    "PI_Boosted",
    "TAM",
    "NONTAM",
    "Efavirenz",
    "Nevirapine",
];

// Per-class log10 VL decrements on a fully active regimen.
const VL_DECREMENT: [f64; ARV_TYPES] = [1.84, 2.68, 0.0, 0.0, 3.09, 2.22];
// Probability a mutation against a class confers resistance.
const PMUTRES: [f64; ARV_TYPES] = [0.5, 0.5, 0.5, 0.5, 0.9, 0.9];
// Probability resistance crosses to the within-class sibling.
const PCROSSRES: [f64; ARV_TYPES] = [1.0, 0.24, 1.0, 0.48, 1.0, 1.0];

const MAX_CD4: f64 = 1500.0;
const MAX_VL: f64 = 8.0;
const AVG_HIV: f64 = 4.07;
const AVG_HIV_SD: f64 = 1.11;
const AVG_CD4: f64 = 500.0;
const AVG_CD4_SD: f64 = 253.81;
const AVG_ACUTE_HIV: f64 = 6.03;
const AVG_ACUTE_HIV_SD: f64 = 1.52;
const MUT_RATE_PER_YEAR: f64 = 0.18;
const MUT_VL_FACTOR: f64 = 3.3;
const AIDS_ADJUST: f64 = 2.33;
const NON_AIDS_ADJUST: f64 = 0.401;
const AIDS_EVENT_MULTIPLIER: f64 = 3.0;
const VL_ADJUST: f64 = 1.5;
const CD4_ADJUST_W: f64 = 3.13;

/// A two-column (key, rate) table looked up by binary search: exact
/// match for the composite HIV keys, linear interpolation between
/// adjacent rows for the age tables.
#[derive(Debug, Default, Clone)]
pub struct RateTable {
    rows: Vec<(f64, f64)>,
}

impl RateTable {
    pub fn from_rows(mut rows: Vec<(f64, f64)>) -> Result<Self, ContagionError> {
        if rows.is_empty() {
            return Err("rate table needs at least one row".into());
        }
        rows.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        Ok(Self { rows })
    }

    /// Reads a whitespace two-column file, up to 400 rows.
    pub fn from_file(path: &Path) -> Result<Self, ContagionError> {
        let text = std::fs::read_to_string(path)?;
        let mut rows = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let (Some(key), Some(rate), None) = (tokens.next(), tokens.next(), tokens.next())
            else {
                return Err(ContagionError::ContagionError(format!(
                    "malformed rate table row in {}: {line}",
                    path.display()
                )));
            };
            rows.push((key.parse::<f64>()?, rate.parse::<f64>()?));
            if rows.len() > TABLE_SPACE {
                return Err(ContagionError::ContagionError(format!(
                    "rate table {} exceeds {TABLE_SPACE} rows",
                    path.display()
                )));
            }
        }
        Self::from_rows(rows)
    }

    /// Exact-key lookup for encoded composite keys.
    pub fn lookup_exact(&self, key: f64) -> Option<f64> {
        let mut first = 0usize;
        let mut last = self.rows.len();
        while first < last {
            let middle = (first + last) / 2;
            let (k, rate) = self.rows[middle];
            if (k - key).abs() < EPSILON {
                return Some(rate);
            }
            if key < k {
                last = middle;
            } else {
                first = middle + 1;
            }
        }
        None
    }

    /// Interpolated lookup for the age tables: linear between the
    /// adjacent rows, clamped at the table ends.
    #[must_use]
    pub fn lookup_interpolated(&self, key: f64) -> f64 {
        let rows = &self.rows;
        if key <= rows[0].0 {
            return rows[0].1;
        }
        if key >= rows[rows.len() - 1].0 {
            return rows[rows.len() - 1].1;
        }
        let mut first = 0usize;
        let mut last = rows.len() - 1;
        while last - first > 1 {
            let middle = (first + last) / 2;
            if key < rows[middle].0 {
                last = middle;
            } else {
                first = middle;
            }
        }
        let (x0, y0) = rows[first];
        let (x1, y1) = rows[last];
        let slope = (y1 - y0) / (x1 - x0);
        y0 + slope * (key - x0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct HivSettings {
    pub screening_enabled: bool,
    pub screening_prob: f64,
    pub condom_use: bool,
    pub resource_rich: bool,
    pub time_to_care_days: u32,
    pub cd4_treat: f64,
    pub compliance: f64,
    /// Explicit switch for the non-HIV mortality rebalancing the
    /// original left commented out. Off by default.
    pub mortality_rebalance: bool,
    /// Initial-prevalence stage split (stage1 weight, stage2 weight).
    pub prev_stage_m: (f64, f64),
    pub prev_stage_f: (f64, f64),
    pub discount_rate: f64,
    /// Monthly regimen costs for the resource-poor branch.
    pub reg_cost_poor: [f64; 3],
    pub care_cost_annual: f64,
    pub hospital_cost_annual: f64,
    /// Regimen count available in the resource-poor branch.
    pub max_regs_poor: u32,
}

impl Default for HivSettings {
    fn default() -> Self {
        Self {
            screening_enabled: true,
            screening_prob: 0.3,
            condom_use: false,
            resource_rich: true,
            time_to_care_days: 30,
            cd4_treat: 350.0,
            compliance: 0.62,
            mortality_rebalance: false,
            prev_stage_m: (0.45, 0.55),
            prev_stage_f: (0.45, 0.55),
            discount_rate: 0.03,
            reg_cost_poor: [15.78, 113.43, 255.60],
            care_cost_annual: 287.28,
            hospital_cost_annual: 390.27,
            max_regs_poor: 3,
        }
    }
}

/// One infected agent's disease and treatment state.
#[derive(Debug, Clone)]
pub struct HivInfection {
    pub stage: u8,
    pub has_aids: bool,
    pub acute: bool,
    pub end_acute: i64,
    pub diagnosed: bool,
    pub start_haart_day: i64,
    pub on_haart: bool,
    pub haart_start: i64,
    pub cd4_baseline: f64,
    pub vl_baseline: f64,
    pub cd4_real: f64,
    pub vl_real: f64,
    pub regimen: [usize; DRUGS_IN_REG],
    pub regimen_num: u32,
    pub num_res: [u32; ARV_TYPES],
    pub total_mutations: u32,
    pub exhausted_regimens: bool,
    pub exposure_day: i64,
    next_cycle_day: i64,
}

impl HivInfection {
    #[must_use]
    pub fn vl_copies(&self) -> f64 {
        10f64.powf(self.vl_real)
    }

    #[must_use]
    fn cd4_category(&self) -> u32 {
        if self.cd4_real < 50.0 {
            1
        } else if self.cd4_real < 200.0 {
            2
        } else if self.cd4_real < 350.0 {
            3
        } else if self.cd4_real < 500.0 {
            4
        } else {
            5
        }
    }

    #[must_use]
    fn vl_category(&self) -> u32 {
        if self.vl_real < 3.5 {
            1
        } else if self.vl_real < 4.5 {
            2
        } else if self.vl_real < 5.5 {
            3
        } else {
            4
        }
    }

    fn update_stage(&mut self) {
        self.stage = if self.cd4_real > 500.0 {
            1
        } else if self.cd4_real >= 200.0 {
            2
        } else {
            3
        };
        if self.stage == 3 {
            self.has_aids = true;
        }
    }

    /// Drugs in the current regimen the virus is not resistant to.
    #[must_use]
    fn active_drugs(&self) -> usize {
        self.regimen.iter().filter(|d| self.num_res[**d] == 0).count()
    }

    /// Regimen log10 VL decrement: the anchor drug's decrement scaled
    /// by the active fraction of the regimen.
    #[must_use]
    fn regimen_decrement(&self) -> f64 {
        let anchor = self
            .regimen
            .iter()
            .map(|d| VL_DECREMENT[*d])
            .fold(0.0f64, f64::max);
        anchor * self.active_drugs() as f64 / DRUGS_IN_REG as f64
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HivCounters {
    pub infections: u32,
    pub hiv_deaths: u32,
    pub age_deaths: u32,
    pub aids_events: u32,
    pub total_cost: f64,
    pub total_disc_cost: f64,
    pub total_drug_cost: f64,
    pub total_care_cost: f64,
    pub total_hospital_cost: f64,
    pub total_surv_years: f64,
}

#[derive(Serialize)]
struct HivReportRow {
    day: u32,
    infected: usize,
    acute: usize,
    diagnosed: usize,
    on_haart: usize,
    aids: usize,
    hiv_deaths: u32,
    age_deaths: u32,
    mean_cd4: f64,
    mean_vl: f64,
}

#[derive(Debug, Default)]
pub struct HivModel {
    pub settings: HivSettings,
    infections: HashMap<usize, HivInfection>,
    mort_table: RateTable,
    male_age_table: RateTable,
    female_age_table: RateTable,
    pub counters: HivCounters,
    /// Incidence tally by (year, sex) over the nine partner age bands.
    incidence: HashMap<(u32, char), [u32; 9]>,
}

impl HivModel {
    #[must_use]
    pub fn new(settings: HivSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn from_params(params: &Params) -> Result<Self, ContagionError> {
        let mut settings = HivSettings::default();
        settings.screening_enabled = params.get_bool_or("hiv.screening_enabled", true)?;
        settings.screening_prob = params.get_f64_or("hiv.screening_prob", 0.3)?;
        settings.condom_use = params.get_bool_or("hiv.condom_use", false)?;
        settings.resource_rich = params.get_bool_or("hiv.resource_rich", true)?;
        settings.time_to_care_days = params.get_u32_or("hiv.time_to_care_days", 30)?;
        settings.cd4_treat = params.get_f64_or("hiv.cd4_treat", 350.0)?;
        settings.compliance = params.get_f64_or("hiv.compliance", 0.62)?;
        settings.mortality_rebalance = params.get_bool_or("hiv.mortality_rebalance", false)?;
        settings.discount_rate = params.get_f64_or("hiv.discount_rate", 0.03)?;
        Ok(Self::new(settings))
    }

    /// Loads the three mortality tables. A missing file falls back to
    /// the built-in default table with a warning; a malformed file is a
    /// configuration error.
    pub fn prepare(&mut self, ctx: &mut Context, condition_id: ConditionId) -> Result<(), ContagionError> {
        let mort_path = ctx.params.get_str_or("hiv.mort_table", "hiv_mort_table.txt");
        let male_path = ctx.params.get_str_or("hiv.male_age_table", "male_age_table.txt");
        let female_path = ctx.params.get_str_or("hiv.female_age_table", "female_age_table.txt");

        self.mort_table = load_or_default(&mort_path, default_mort_table)?;
        self.male_age_table = load_or_default(&male_path, || default_age_table(Sex::Male))?;
        self.female_age_table = load_or_default(&female_path, || default_age_table(Sex::Female))?;
        info!(
            "hiv model prepared for {} (mort rows {}, resource_{})",
            ctx.conditions.name(condition_id),
            self.mort_table.len(),
            if self.settings.resource_rich { "rich" } else { "poor" }
        );
        Ok(())
    }

    #[must_use]
    pub fn infection(&self, person: PersonId) -> Option<&HivInfection> {
        self.infections.get(&person.0)
    }

    #[must_use]
    pub fn infected_count(&self) -> usize {
        self.infections.len()
    }

    pub fn on_exposed(&mut self, ctx: &mut Context, _condition_id: ConditionId, person: PersonId, day: u32) {
        let sex = ctx.population.get(person).sex();
        let rng = &ctx.rng;
        let mut infection = HivInfection {
            stage: 1,
            has_aids: false,
            acute: false,
            end_acute: -1,
            diagnosed: !self.settings.screening_enabled,
            start_haart_day: -1,
            on_haart: false,
            haart_start: -1,
            cd4_baseline: 0.0,
            vl_baseline: 0.0,
            cd4_real: 0.0,
            vl_real: 0.0,
            regimen: [NNRTI_EFAVIRENZ, NRTI_NONTAM, NRTI_TAM],
            regimen_num: 0,
            num_res: [0; ARV_TYPES],
            total_mutations: 0,
            exhausted_regimens: false,
            exposure_day: i64::from(day),
            next_cycle_day: i64::from(day + CYCLE_DAYS),
        };

        if day == 0 {
            // Prevalent case: draw the disease stage from the
            // configured stage split.
            let (w1, w2) = match sex {
                Sex::Male => self.settings.prev_stage_m,
                Sex::Female => self.settings.prev_stage_f,
            };
            let proportion_1 = w1 / (w1 + w2);
            let stage = if rng.sample_unit(RNG_HIV) < proportion_1 { 1 } else { 2 };
            let (vl, cd4) = match stage {
                1 => (3.56, f64::from(rng.sample_range(RNG_HIV, 500..900u32))),
                _ => (AVG_HIV, f64::from(rng.sample_range(RNG_HIV, 200..499u32))),
            };
            infection.stage = stage;
            infection.vl_baseline = vl;
            infection.cd4_baseline = cd4;
        } else {
            // Incident case: acute phase, 120 to 180 days of elevated
            // viral load.
            infection.acute = true;
            infection.vl_baseline = draw_normal(rng, AVG_ACUTE_HIV, AVG_ACUTE_HIV_SD)
                .clamp(0.0, MAX_VL);
            infection.cd4_baseline = f64::from(rng.sample_range(RNG_HIV, 750..900u32));
            let duration = rng.sample_range(RNG_HIV, 120..=180u32);
            infection.end_acute = i64::from(day + duration);
        }
        infection.cd4_real = infection.cd4_baseline;
        infection.vl_real = infection.vl_baseline;
        infection.update_stage();

        let age = ctx.population.get(person).real_age();
        let year = day / DAYS_PER_YEAR;
        let band = partner_age_band(age);
        self.incidence
            .entry((year, sex.tag()))
            .or_insert([0; 9])[band] += 1;
        self.counters.infections += 1;

        debug!(
            "new HIV infection person {person} day {day} stage {} acute {}",
            infection.stage, infection.acute
        );
        self.infections.insert(person.0, infection);
    }

    pub fn update_person(&mut self, ctx: &mut Context, condition_id: ConditionId, person: PersonId, day: u32) {
        let Some(mut infection) = self.infections.remove(&person.0) else {
            return;
        };
        let today = i64::from(day);

        // Acute phase ending: baselines re-drawn around the chronic
        // means.
        if infection.acute && today >= infection.end_acute {
            infection.acute = false;
            infection.vl_baseline =
                (AVG_HIV + AVG_HIV_SD * draw_normal(&ctx.rng, 0.0, 1.0)).clamp(0.0, MAX_VL);
            infection.cd4_baseline =
                (AVG_CD4 + AVG_CD4_SD * draw_normal(&ctx.rng, 0.0, 1.0)).clamp(0.0, MAX_CD4);
        }

        // Annual screening on the agent's birthday.
        if self.settings.screening_enabled
            && !infection.diagnosed
            && ctx.clock.date_of(day).day_of_year() == ctx.population.get(person).birth_day_of_year()
            && ctx.rng.sample_unit(RNG_HIV) <= self.settings.screening_prob
        {
            infection.diagnosed = true;
            infection.start_haart_day = today + i64::from(self.settings.time_to_care_days);
            debug!("HIV diagnosed person {person} day {day}");
        }

        // Diagnosed agents at or below the treatment threshold start
        // therapy immediately.
        if infection.diagnosed
            && !infection.on_haart
            && infection.cd4_real <= self.settings.cd4_treat
        {
            infection.start_haart_day = today;
        }
        if !infection.on_haart && infection.start_haart_day >= 0 && today >= infection.start_haart_day
        {
            infection.on_haart = true;
            infection.haart_start = today;
            debug!("HAART started for person {person} day {day}");
        }

        if today >= infection.next_cycle_day {
            infection.next_cycle_day = today + i64::from(CYCLE_DAYS);
            self.run_monthly_cycle(ctx, condition_id, person, &mut infection, day);
        }
        self.infections.insert(person.0, infection);
    }

    /// One monthly cycle: trajectory targets, mutation accrual,
    /// regimen failure checks, mortality and cost accounting.
    fn run_monthly_cycle(
        &mut self,
        ctx: &mut Context,
        condition_id: ConditionId,
        person: PersonId,
        infection: &mut HivInfection,
        day: u32,
    ) {
        let rng = &ctx.rng;

        // Viral-load target and exponential approach.
        let vl_target = if infection.acute {
            infection.vl_baseline
        } else if infection.on_haart && !infection.exhausted_regimens {
            (infection.vl_baseline - infection.regimen_decrement() * self.settings.compliance)
                .max(0.0)
        } else {
            infection.vl_baseline
        };
        let r_vl = -(1.0 - 1.0 / VL_ADJUST).ln();
        infection.vl_real += (vl_target - infection.vl_real) * (1.0 - (-r_vl).exp());
        infection.vl_real = infection.vl_real.clamp(0.0, MAX_VL);

        // CD4: recovery toward baseline on suppressive therapy,
        // VL-driven decline otherwise.
        if infection.on_haart && infection.vl_real < 3.5 && !infection.exhausted_regimens {
            let r_cd4 = -(1.0 - 1.0 / CD4_ADJUST_W).ln();
            infection.cd4_real +=
                (infection.cd4_baseline - infection.cd4_real) * (1.0 - (-r_cd4).exp());
        } else {
            infection.cd4_real -= 4.0 * infection.vl_real.max(0.0);
        }
        infection.cd4_real = infection.cd4_real.clamp(0.0, MAX_CD4);
        infection.update_stage();

        // Mutation accrual while on therapy, faster at higher VL and
        // with incomplete adherence.
        if infection.on_haart && !infection.exhausted_regimens {
            let monthly_rate = (MUT_RATE_PER_YEAR / 12.0)
                * MUT_VL_FACTOR.powf(infection.vl_real - AVG_HIV)
                * (1.0 + (1.0 - self.settings.compliance));
            if rng.sample_bool(RNG_HIV, monthly_rate.min(1.0)) {
                infection.total_mutations += 1;
                let slot = rng.sample_range(RNG_HIV, 0..DRUGS_IN_REG);
                let class = infection.regimen[slot];
                if rng.sample_bool(RNG_HIV, PMUTRES[class]) {
                    infection.num_res[class] += 1;
                    // Within-class cross-resistance to the sibling.
                    let sibling = class ^ 1;
                    if rng.sample_bool(RNG_HIV, PCROSSRES[class]) {
                        infection.num_res[sibling] += 1;
                    }
                }
            }
        }

        // Regimen failure on VL rebound: threshold 2.7 log10 before
        // the first failure, 3.7 after.
        if infection.on_haart && i64::from(day) > infection.haart_start + 180 {
            let threshold = if infection.regimen_num == 0 { 2.7 } else { 3.7 };
            if infection.vl_real > threshold {
                self.change_regimen(infection, rng);
            }
        }

        // Mortality: joint HIV lookup plus background age mortality.
        let hiv_rate = self.hiv_mortality_rate(infection, ctx.population.get(person).real_age());
        let aids_multiplier = if infection.has_aids { AIDS_ADJUST } else { NON_AIDS_ADJUST };
        let monthly_hiv = (hiv_rate * aids_multiplier).clamp(0.0, 1.0);

        let age = ctx.population.get(person).real_age();
        let age_table = match ctx.population.get(person).sex() {
            Sex::Male => &self.male_age_table,
            Sex::Female => &self.female_age_table,
        };
        let mut monthly_age = age_table.lookup_interpolated(age) / 12.0;
        if self.settings.mortality_rebalance {
            // HIV-attributable deaths come out of the background
            // hazard when the rebalance switch is on.
            monthly_age = (monthly_age - monthly_hiv).max(0.0);
        }

        // AIDS-defining events run at a multiple of the death rate.
        if !infection.has_aids
            && rng.sample_bool(RNG_HIV, (monthly_hiv * AIDS_EVENT_MULTIPLIER).min(1.0))
        {
            infection.has_aids = true;
            infection.stage = 3;
            self.counters.aids_events += 1;
        }

        if rng.sample_bool(RNG_HIV, monthly_hiv) {
            self.counters.hiv_deaths += 1;
            self.record_death(ctx, condition_id, person, infection, day);
        } else if rng.sample_bool(RNG_HIV, monthly_age.min(1.0)) {
            self.counters.age_deaths += 1;
            self.record_death(ctx, condition_id, person, infection, day);
        }

        self.accrue_costs(infection, day);
    }

    fn record_death(
        &mut self,
        ctx: &mut Context,
        condition_id: ConditionId,
        person: PersonId,
        infection: &HivInfection,
        day: u32,
    ) {
        ctx.population
            .get_mut(person)
            .health
            .record_mut(condition_id)
            .is_fatal = true;
        self.counters.total_surv_years +=
            (i64::from(day) - infection.exposure_day) as f64 / f64::from(DAYS_PER_YEAR);
    }

    /// Encodes the composite lookup key: on-HAART in the ten-thousands
    /// digit, age band in the thousands, years-on-therapy in the
    /// hundreds (fixed at the third-year band), CD4 bucket in the
    /// tens, VL bucket in the ones.
    fn hiv_mortality_rate(&self, infection: &HivInfection, age: f64) -> f64 {
        let mut total = if infection.on_haart && !infection.exhausted_regimens {
            10_000
        } else {
            0
        };
        if age < 39.99 {
            total += 1000;
        } else if age < 49.99 {
            total += 2000;
        } else {
            total += 3000;
        }
        total += 300;
        total += 10 * infection.cd4_category();
        total += infection.vl_category();
        match self.mort_table.lookup_exact(f64::from(total)) {
            Some(rate) => rate,
            None => {
                warn!("no hiv mortality entry for key {total}");
                0.0
            }
        }
    }

    /// Regimen escalation. The resource-rich branch rotates through
    /// fresh class combinations indefinitely; the resource-poor branch
    /// exhausts after its configured regimen count.
    fn change_regimen(&mut self, infection: &mut HivInfection, rng: &RngRegistry) {
        infection.regimen_num += 1;
        if !self.settings.resource_rich && infection.regimen_num >= self.settings.max_regs_poor {
            infection.exhausted_regimens = true;
            return;
        }
        // Prefer classes without accumulated resistance.
        let mut clean: Vec<usize> = (0..ARV_TYPES).filter(|c| infection.num_res[*c] == 0).collect();
        if clean.len() < DRUGS_IN_REG {
            if self.settings.resource_rich {
                // Salvage: reuse the least-resisted classes.
                let mut by_res: Vec<usize> = (0..ARV_TYPES).collect();
                by_res.sort_by_key(|c| infection.num_res[*c]);
                clean = by_res;
            } else {
                infection.exhausted_regimens = true;
                return;
            }
        }
        // Shuffle the candidates and take three.
        for k in 0..DRUGS_IN_REG {
            let j = rng.sample_range(RNG_HIV, k..clean.len());
            clean.swap(k, j);
        }
        infection.regimen = [clean[0], clean[1], clean[2]];
    }

    fn accrue_costs(&mut self, infection: &HivInfection, day: u32) {
        let years = f64::from(day) / f64::from(DAYS_PER_YEAR);
        let discount = (1.0 + self.settings.discount_rate).powf(-years);

        let mut cost = self.settings.care_cost_annual / 12.0;
        self.counters.total_care_cost += cost;
        if infection.has_aids {
            let hospital = self.settings.hospital_cost_annual / 12.0;
            self.counters.total_hospital_cost += hospital;
            cost += hospital;
        }
        if infection.on_haart && !infection.exhausted_regimens {
            let reg_index = (infection.regimen_num as usize).min(self.settings.reg_cost_poor.len() - 1);
            let drug = self.settings.reg_cost_poor[reg_index];
            self.counters.total_drug_cost += drug;
            cost += drug;
        }
        self.counters.total_cost += cost;
        self.counters.total_disc_cost += cost * discount;
    }

    /// Per-act transmission probability by the infector's viral-load
    /// copies bucket, with the condom multiplier when enabled.
    pub fn per_act_probability(
        &self,
        _ctx: &Context,
        _condition_id: ConditionId,
        infector: PersonId,
    ) -> Option<f64> {
        let infection = self.infections.get(&infector.0)?;
        let copies = infection.vl_copies();
        let prob = if copies <= 500.0 {
            0.0001
        } else if copies <= 3000.0 {
            0.0012
        } else if copies <= 10_000.0 {
            0.0012
        } else if copies <= 30_000.0 {
            0.0014
        } else {
            0.0023
        };
        if self.settings.condom_use {
            Some(prob * 0.20 * 0.80)
        } else {
            Some(prob)
        }
    }

    pub fn terminate_person(&mut self, _ctx: &mut Context, _condition_id: ConditionId, person: PersonId, _day: u32) {
        self.infections.remove(&person.0);
    }

    pub fn report(&mut self, ctx: &mut Context, _condition_id: ConditionId, day: u32) {
        if self.infections.is_empty() {
            return;
        }
        let infected = self.infections.len();
        let mean_cd4 = self.infections.values().map(|i| i.cd4_real).sum::<f64>() / infected as f64;
        let mean_vl = self.infections.values().map(|i| i.vl_real).sum::<f64>() / infected as f64;
        let row = HivReportRow {
            day,
            infected,
            acute: self.infections.values().filter(|i| i.acute).count(),
            diagnosed: self.infections.values().filter(|i| i.diagnosed).count(),
            on_haart: self.infections.values().filter(|i| i.on_haart).count(),
            aids: self.infections.values().filter(|i| i.has_aids).count(),
            hiv_deaths: self.counters.hiv_deaths,
            age_deaths: self.counters.age_deaths,
            mean_cd4,
            mean_vl,
        };
        ctx.reports.send_report("hiv", &row);
    }
}

fn load_or_default(
    path: &str,
    default: impl FnOnce() -> RateTable,
) -> Result<RateTable, ContagionError> {
    if Path::new(path).exists() {
        RateTable::from_file(Path::new(path))
    } else {
        warn!("rate table {path} not found, using built-in defaults");
        Ok(default())
    }
}

/// Built-in HIV mortality table covering every composite key.
fn default_mort_table() -> RateTable {
    let cd4_factor = [0.0, 12.0, 6.0, 2.5, 1.2, 1.0];
    let vl_factor = [0.0, 1.0, 1.3, 1.8, 2.5];
    let mut rows = Vec::new();
    for haart in 0..=1u32 {
        for age_band in 1..=3u32 {
            for cd4 in 1..=5u32 {
                for vl in 1..=4u32 {
                    let key = haart * 10_000 + age_band * 1000 + 300 + 10 * cd4 + vl;
                    let base = 0.0008 * cd4_factor[cd4 as usize] * vl_factor[vl as usize];
                    let age_mult = 1.0 + 0.15 * f64::from(age_band - 1);
                    let haart_mult = if haart == 1 { 0.35 } else { 1.0 };
                    rows.push((f64::from(key), base * age_mult * haart_mult));
                }
            }
        }
    }
    RateTable::from_rows(rows).unwrap()
}

/// Built-in background age-mortality table (annual rates).
fn default_age_table(sex: Sex) -> RateTable {
    let scale = match sex {
        Sex::Male => 1.0,
        Sex::Female => 0.8,
    };
    let rows = (0..=20)
        .map(|i| {
            let age = f64::from(i * 5);
            (age, scale * 0.0005 * (0.085 * age).exp())
        })
        .collect();
    RateTable::from_rows(rows).unwrap()
}

fn draw_normal(rng: &RngRegistry, mean: f64, sd: f64) -> f64 {
    rng.sample(RNG_HIV, |r| {
        rand_distr::Distribution::sample(&rand_distr::Normal::new(mean, sd).unwrap(), r)
    })
}

/// The nine partner-network age bands, shared with the incidence
/// tallies.
#[must_use]
pub fn partner_age_band(age: f64) -> usize {
    if age < 20.0 {
        0
    } else if age < 25.0 {
        1
    } else if age < 30.0 {
        2
    } else if age < 35.0 {
        3
    } else if age < 40.0 {
        4
    } else if age < 45.0 {
        5
    } else if age < 50.0 {
        6
    } else if age < 55.0 {
        7
    } else {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_lookup_by_composite_key() {
        let table = default_mort_table();
        // On haart, under 40, third year, CD4 >= 500, VL < 3.5.
        assert!(table.lookup_exact(11351.0).is_some());
        assert!(table.lookup_exact(99999.0).is_none());
        // Lower CD4 raises the rate.
        let low_cd4 = table.lookup_exact(1311.0).unwrap();
        let high_cd4 = table.lookup_exact(1351.0).unwrap();
        assert!(low_cd4 > high_cd4);
        // HAART lowers the rate.
        let off = table.lookup_exact(1311.0).unwrap();
        let on = table.lookup_exact(11311.0).unwrap();
        assert!(on < off);
    }

    #[test]
    fn interpolation_between_rows() {
        let table = RateTable::from_rows(vec![(0.0, 0.0), (10.0, 1.0)]).unwrap();
        assert_approx_eq::assert_approx_eq!(table.lookup_interpolated(5.0), 0.5);
        assert_approx_eq::assert_approx_eq!(table.lookup_interpolated(2.5), 0.25);
        // Clamped at the ends.
        assert_approx_eq::assert_approx_eq!(table.lookup_interpolated(-5.0), 0.0);
        assert_approx_eq::assert_approx_eq!(table.lookup_interpolated(50.0), 1.0);
    }

    #[test]
    fn malformed_table_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(file, "1.0 0.5 extra").unwrap();
        assert!(RateTable::from_file(file.path()).is_err());
    }

    #[test]
    fn cd4_and_vl_categories() {
        let mut infection = HivInfection {
            stage: 1,
            has_aids: false,
            acute: false,
            end_acute: -1,
            diagnosed: false,
            start_haart_day: -1,
            on_haart: false,
            haart_start: -1,
            cd4_baseline: 600.0,
            vl_baseline: 3.0,
            cd4_real: 600.0,
            vl_real: 3.0,
            regimen: [NNRTI_EFAVIRENZ, NRTI_NONTAM, NRTI_TAM],
            regimen_num: 0,
            num_res: [0; ARV_TYPES],
            total_mutations: 0,
            exhausted_regimens: false,
            exposure_day: 0,
            next_cycle_day: 30,
        };
        assert_eq!(infection.cd4_category(), 5);
        assert_eq!(infection.vl_category(), 1);
        infection.cd4_real = 45.0;
        infection.vl_real = 5.9;
        assert_eq!(infection.cd4_category(), 1);
        assert_eq!(infection.vl_category(), 4);
        infection.update_stage();
        assert_eq!(infection.stage, 3);
        assert!(infection.has_aids);
    }

    #[test]
    fn regimen_decrement_scales_with_resistance() {
        let mut infection = HivInfection {
            stage: 1,
            has_aids: false,
            acute: false,
            end_acute: -1,
            diagnosed: true,
            start_haart_day: 0,
            on_haart: true,
            haart_start: 0,
            cd4_baseline: 600.0,
            vl_baseline: 4.0,
            cd4_real: 600.0,
            vl_real: 4.0,
            regimen: [NNRTI_EFAVIRENZ, NRTI_NONTAM, NRTI_TAM],
            regimen_num: 0,
            num_res: [0; ARV_TYPES],
            total_mutations: 0,
            exhausted_regimens: false,
            exposure_day: 0,
            next_cycle_day: 30,
        };
        let full = infection.regimen_decrement();
        assert_approx_eq::assert_approx_eq!(full, VL_DECREMENT[NNRTI_EFAVIRENZ]);
        infection.num_res[NRTI_TAM] = 1;
        assert!(infection.regimen_decrement() < full);
        assert_eq!(infection.active_drugs(), 2);
    }

    #[test]
    fn age_bands_cover_partner_groups() {
        assert_eq!(partner_age_band(15.0), 0);
        assert_eq!(partner_age_band(22.0), 1);
        assert_eq!(partner_age_band(44.9), 5);
        assert_eq!(partner_age_band(80.0), 8);
    }

    #[test]
    fn default_age_tables_rise_with_age() {
        let male = default_age_table(Sex::Male);
        assert!(male.lookup_interpolated(70.0) > male.lookup_interpolated(30.0));
        let female = default_age_table(Sex::Female);
        assert!(female.lookup_interpolated(40.0) < male.lookup_interpolated(40.0));
    }
}
