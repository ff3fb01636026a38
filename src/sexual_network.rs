//! The sexual-partner network: partnership formation, duration and
//! concurrency bookkeeping, and the daily act schedule the sexual
//! transmission mode consumes.
//!
//! Partnerships are male-driven: the male's partner record is
//! canonical and the female's record mirrors it. Matching runs on the
//! annual tick in two passes — monogamous agents inside family
//! households first, preferring an in-household opposite-sex partner
//! admitted by the age-mixing matrix, then everyone still short of
//! their label across a shared pool stratified by three coarse age
//! brackets. Partner-count labels are drawn from age-and-sex empirical
//! cumulative tables; lifetime tallies accumulate per nine-band age
//! group from age 15.

use serde::Serialize;

use crate::context::Context;
use crate::date::DAYS_PER_YEAR;
use crate::error::ContagionError;
use crate::hiv::partner_age_band;
use crate::network::{ContextNetworkExt, NetworkId};
use crate::params::Params;
use crate::people::{PersonId, Sex};
use crate::random::RNG_SEXUAL_NETWORK;
use crate::{debug, info, warn};

pub const AGE_GROUPS: usize = 9;
pub const PARTNER_BINS: usize = 4;
const MIN_PARTNER_AGE: u32 = 15;
const MAX_PARTNER_AGE: u32 = 75;
const MATCH_ATTEMPTS: usize = 3;

/// One partnership, as seen from one endpoint.
#[derive(Debug, Clone)]
pub struct PartnerRecord {
    pub partner: PersonId,
    /// Total duration in days.
    pub duration: i64,
    pub days_remaining: i64,
    pub concurrent_days: i64,
    pub start_day: i64,
    pub end_day: i64,
    pub long_term: bool,
    pub acts: u32,
    pub act_days: Vec<u32>,
    pub act_today: bool,
}

impl PartnerRecord {
    fn new(partner: PersonId) -> Self {
        Self {
            partner,
            duration: 0,
            days_remaining: 0,
            concurrent_days: 0,
            start_day: 0,
            end_day: 0,
            long_term: false,
            acts: 0,
            act_days: Vec::new(),
            act_today: false,
        }
    }

    #[must_use]
    pub fn days_elapsed(&self) -> i64 {
        self.duration - self.days_remaining
    }
}

/// Per-agent partnership state.
#[derive(Debug, Default)]
pub struct Relationships {
    partners: Vec<PartnerRecord>,
    /// Number of partners this agent should carry this year.
    pub partners_label: i32,
    /// Lifetime partners reported for day 0, from the seed files.
    pub partners_ever_day0: i32,
    /// Lifetime partner tallies by the nine age bands.
    pub lifetime_partners: [u32; AGE_GROUPS],
    /// Band the agent occupied at the last update; -1 before entry.
    pub current_age_group: i32,
    /// Integer age at the last update, for birthday detection.
    pub temp_age: u32,
    /// Durations pre-assigned by the day-0 cohort seed files, consumed
    /// before any are drawn.
    pub day0_durations: Vec<(i64, i64)>,
}

impl Relationships {
    #[must_use]
    pub fn new() -> Self {
        Self {
            partners_label: -1,
            current_age_group: -1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn partners(&self) -> &[PartnerRecord] {
        &self.partners
    }

    pub fn partners_mut(&mut self) -> &mut [PartnerRecord] {
        &mut self.partners
    }

    #[must_use]
    pub fn partner_count(&self) -> usize {
        self.partners.len()
    }

    pub fn find_partner(&self, person: PersonId) -> Option<usize> {
        self.partners.iter().position(|r| r.partner == person)
    }

    pub fn add_partner(&mut self, partner: PersonId) -> usize {
        self.partners.push(PartnerRecord::new(partner));
        self.partners.len() - 1
    }

    pub fn remove_partner_at(&mut self, index: usize) {
        self.partners.swap_remove(index);
    }

    #[must_use]
    pub fn has_long_term(&self) -> bool {
        self.partners.iter().any(|r| r.long_term)
    }
}

/// The nine-band partner age group, or -1 outside [15, 75).
#[must_use]
pub fn partner_age_group(age: u32) -> i32 {
    if !(MIN_PARTNER_AGE..MAX_PARTNER_AGE).contains(&age) {
        return -1;
    }
    partner_age_band(f64::from(age)) as i32
}

/// The three coarse matching brackets: <20, 20-29, >=30.
#[must_use]
fn coarse_bracket(age: u32) -> usize {
    if age < 20 {
        0
    } else if age < 30 {
        1
    } else {
        2
    }
}

/// Empirical tables driving labels, mixing, durations and acts.
#[derive(Debug, Clone)]
pub struct PartnerTables {
    /// Cumulative partner-count distribution (bins 0, 1, 2, 3+) per
    /// age group, per sex.
    pub female_cumulative: [[f64; PARTNER_BINS]; AGE_GROUPS],
    pub male_cumulative: [[f64; PARTNER_BINS]; AGE_GROUPS],
    /// Acceptance probability by (male bracket, female bracket).
    pub mixing: [[f64; 3]; 3],
    /// Short-term duration category weights (short, medium, long) per
    /// age group.
    pub duration_bins: [[f64; 3]; AGE_GROUPS],
    /// Probability two sub-year partnerships overlap at all.
    pub prob_overlap: f64,
    /// Daily act probability for males by decade band from 15.
    pub act_prob: [f64; 6],
}

impl Default for PartnerTables {
    fn default() -> Self {
        Self {
            female_cumulative: [[0.25, 0.80, 0.93, 1.0]; AGE_GROUPS],
            male_cumulative: [[0.22, 0.75, 0.91, 1.0]; AGE_GROUPS],
            mixing: [
                [0.70, 0.25, 0.05],
                [0.20, 0.60, 0.20],
                [0.05, 0.25, 0.70],
            ],
            duration_bins: [[0.45, 0.35, 0.20]; AGE_GROUPS],
            prob_overlap: 0.5,
            act_prob: [0.30, 0.25, 0.20, 0.15, 0.10, 0.05],
        }
    }
}

impl PartnerTables {
    /// Reads the optional table files named in the properties; fields
    /// without a file keep their defaults.
    pub fn from_params(params: &Params) -> Result<Self, ContagionError> {
        let mut tables = PartnerTables::default();
        if let Some(path) = params_path(params, "sexual_network.female_partner_file") {
            tables.female_cumulative = read_matrix::<PARTNER_BINS>(&path)?;
        }
        if let Some(path) = params_path(params, "sexual_network.male_partner_file") {
            tables.male_cumulative = read_matrix::<PARTNER_BINS>(&path)?;
        }
        if let Some(path) = params_path(params, "sexual_network.duration_file") {
            tables.duration_bins = read_matrix::<3>(&path)?;
        }
        tables.prob_overlap = params.get_f64_or("sexual_network.prob_overlap", 0.5)?;
        if let Some(v) = params
            .get_vec_f64("sexual_network.act_prob")
            .ok()
            .flatten()
        {
            for (slot, value) in tables.act_prob.iter_mut().zip(v) {
                *slot = value;
            }
        }
        Ok(tables)
    }
}

fn params_path(params: &Params, key: &str) -> Option<String> {
    params.get_vec_str(key).ok().flatten().map(|v| v.join(" "))
}

fn read_matrix<const COLS: usize>(path: &str) -> Result<[[f64; COLS]; AGE_GROUPS], ContagionError> {
    let text = std::fs::read_to_string(path)?;
    let mut matrix = [[0.0; COLS]; AGE_GROUPS];
    let mut rows = 0;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if rows >= AGE_GROUPS {
            return Err(ContagionError::ContagionError(format!(
                "{path}: expected {AGE_GROUPS} rows"
            )));
        }
        let values: Result<Vec<f64>, _> = line.split_whitespace().map(str::parse).collect();
        let values = values
            .map_err(|_| ContagionError::ContagionError(format!("{path}: bad row {line}")))?;
        if values.len() != COLS {
            return Err(ContagionError::ContagionError(format!(
                "{path}: expected {COLS} columns, got {}",
                values.len()
            )));
        }
        matrix[rows].copy_from_slice(&values);
        rows += 1;
    }
    if rows != AGE_GROUPS {
        return Err(ContagionError::ContagionError(format!(
            "{path}: expected {AGE_GROUPS} rows, got {rows}"
        )));
    }
    Ok(matrix)
}

#[derive(Serialize)]
struct CrosstabRow {
    year: u32,
    sex: char,
    age_group: usize,
    partners_0: u32,
    partners_1: u32,
    partners_2: u32,
    partners_3_plus: u32,
}

#[derive(Serialize)]
struct MatchedRow {
    year: u32,
    matched_partnerships: u32,
    long_term: u32,
}

#[derive(Serialize)]
struct QcRow {
    year: u32,
    person: usize,
    sex: char,
    age: u32,
    label: i32,
    matched: usize,
    longest_duration: i64,
    total_overlap_days: i64,
}

#[derive(Debug)]
pub struct SexualPartnerNetwork {
    pub network: NetworkId,
    pub tables: PartnerTables,
    matched_this_year: u32,
    long_term_this_year: u32,
}

impl SexualPartnerNetwork {
    #[must_use]
    pub fn new(network: NetworkId, tables: PartnerTables) -> Self {
        Self {
            network,
            tables,
            matched_this_year: 0,
            long_term_this_year: 0,
        }
    }
}

fn eligible(ctx: &Context, person: PersonId) -> bool {
    let p = ctx.population.get(person);
    p.is_alive()
        && p.household_type().partnership_eligible()
        && partner_age_group(p.age()) >= 0
}

/// Daily driver, invoked by the context before the condition updates
/// so today's acts are in place for transmission.
pub fn update_sexual_network(ctx: &mut Context, spn: &mut SexualPartnerNetwork, day: u32) {
    if day != 0 {
        decrement_and_remove_expired(ctx, spn, day);
    }
    admit_new_people(ctx, spn);
    refresh_labels(ctx, spn, day);
    if day % DAYS_PER_YEAR == 1 {
        run_matching(ctx, spn, day);
        adjust_concurrency(ctx, spn, day);
    }
    set_sexual_acts(ctx, spn, day);
    if day > 0 && day % DAYS_PER_YEAR == 0 {
        write_annual_reports(ctx, spn, day);
        spn.matched_this_year = 0;
        spn.long_term_this_year = 0;
    }
}

/// Ages every partnership one day and removes those whose duration has
/// run out, symmetrically on both sides, network links included.
fn decrement_and_remove_expired(ctx: &mut Context, spn: &mut SexualPartnerNetwork, _day: u32) {
    let males: Vec<PersonId> = ctx
        .population
        .ids()
        .filter(|p| {
            ctx.population.get(*p).sex() == Sex::Male
                && ctx.population.get(*p).relationships.partner_count() > 0
        })
        .collect();

    for male in males {
        // Decrement both endpoints.
        let partners: Vec<PersonId> = ctx
            .population
            .get(male)
            .relationships
            .partners()
            .iter()
            .map(|r| r.partner)
            .collect();
        for female in &partners {
            let (m, f) = ctx.population.pair_mut(male, *female);
            let mi = m.relationships.find_partner(*female).unwrap();
            m.relationships.partners_mut()[mi].days_remaining -= 1;
            if let Some(fi) = f.relationships.find_partner(male) {
                f.relationships.partners_mut()[fi].days_remaining -= 1;
            }
        }
        // Remove expired partnerships.
        for female in partners {
            let expired = {
                let relationships = &ctx.population.get(male).relationships;
                let mi = relationships.find_partner(female).unwrap();
                relationships.partners()[mi].days_remaining <= 0
            };
            if expired {
                dissolve_partnership(ctx, spn.network, male, female);
            }
        }
    }
}

/// Removes the partnership between `male` and `female` from both
/// partner lists, decrements both labels and destroys the links.
pub fn dissolve_partnership(ctx: &mut Context, network: NetworkId, male: PersonId, female: PersonId) {
    {
        let (m, f) = ctx.population.pair_mut(male, female);
        if let Some(mi) = m.relationships.find_partner(female) {
            m.relationships.remove_partner_at(mi);
            m.relationships.partners_label -= 1;
        }
        if let Some(fi) = f.relationships.find_partner(male) {
            f.relationships.remove_partner_at(fi);
            f.relationships.partners_label -= 1;
        }
    }
    if ctx.is_connected_to(male, female, network) {
        ctx.destroy_link_to(male, female, network);
    }
}

/// Enrolls newly eligible agents (turned 15, or newly loaded) and
/// draws their first partner-count label.
fn admit_new_people(ctx: &mut Context, spn: &mut SexualPartnerNetwork) {
    let candidates: Vec<PersonId> = ctx
        .population
        .ids()
        .filter(|p| eligible(ctx, *p) && !ctx.is_enrolled_in_network(*p, spn.network))
        .collect();
    for person in candidates {
        ctx.join_network(person, spn.network);
        let (age, sex) = {
            let p = ctx.population.get(person);
            (p.age(), p.sex())
        };
        let group = partner_age_group(age) as usize;
        let label = draw_partner_count(ctx, &spn.tables, sex, group);
        let relationships = &mut ctx.population.get_mut(person).relationships;
        relationships.partners_label = label;
        relationships.current_age_group = group as i32;
        relationships.temp_age = age;
    }
}

fn draw_partner_count(
    ctx: &Context,
    tables: &PartnerTables,
    sex: Sex,
    age_group: usize,
) -> i32 {
    let cdf = match sex {
        Sex::Male => &tables.male_cumulative[age_group],
        Sex::Female => &tables.female_cumulative[age_group],
    };
    let bin = ctx.rng.sample_cdf(RNG_SEXUAL_NETWORK, cdf);
    if bin < 3 {
        bin as i32
    } else {
        // The 3+ bin resolves to a small heavy tail.
        ctx.rng.sample_range(RNG_SEXUAL_NETWORK, 3..=6)
    }
}

/// On a birthday the label is topped up; on an age-group change the
/// lifetime tally rolls into the new band first.
fn refresh_labels(ctx: &mut Context, spn: &mut SexualPartnerNetwork, day: u32) {
    if day == 0 {
        return;
    }
    let members: Vec<PersonId> = ctx
        .population
        .ids()
        .filter(|p| eligible(ctx, *p) && ctx.is_enrolled_in_network(*p, spn.network))
        .collect();
    for person in members {
        let (age, sex) = {
            let p = ctx.population.get(person);
            (p.age(), p.sex())
        };
        let (temp_age, old_group) = {
            let r = &ctx.population.get(person).relationships;
            (r.temp_age, r.current_age_group)
        };
        if age <= temp_age {
            continue;
        }
        let new_group = partner_age_group(age);
        if new_group < 0 {
            continue;
        }
        // The new age's draw can only add partners to the label; it
        // never takes away partners the agent already carries.
        let target = draw_partner_count(ctx, &spn.tables, sex, new_group as usize);
        let relationships = &mut ctx.population.get_mut(person).relationships;
        relationships.temp_age = age;
        relationships.current_age_group = new_group;
        let label = relationships.partners_label.max(0);
        let addition = (target - label).max(0);
        relationships.partners_label = label + addition;
        if old_group >= 0 && old_group != new_group {
            debug!("person {person} moved to partner age group {new_group}");
        }
    }
}

/// Whether a male/female age pair is admissible under the 3x3 mixing
/// matrix.
fn age_mixing_ok(ctx: &Context, tables: &PartnerTables, male_age: u32, female_age: u32) -> bool {
    let p = tables.mixing[coarse_bracket(male_age)][coarse_bracket(female_age)];
    ctx.rng.sample_bool(RNG_SEXUAL_NETWORK, p)
}

/// Annual matching: the family-household monogamous pass, then the
/// pooled bracket pass for everyone still under their label.
pub fn run_matching(ctx: &mut Context, spn: &mut SexualPartnerNetwork, day: u32) {
    // Pass one: monogamous males in family households, preferring an
    // in-household partner.
    let monogamous_fh: Vec<PersonId> = ctx
        .population
        .ids()
        .filter(|p| {
            let person = ctx.population.get(*p);
            person.sex() == Sex::Male
                && person.household_type().is_family()
                && person.relationships.partners_label == 1
                && person.relationships.partner_count() == 0
                && eligible(ctx, *p)
                && ctx.is_enrolled_in_network(*p, spn.network)
        })
        .collect();

    for male in monogamous_fh {
        let Some(household) = ctx.population.get(male).household() else {
            continue;
        };
        let candidates: Vec<PersonId> = ctx.places.get(household).members().to_vec();
        for female in candidates {
            if female == male {
                continue;
            }
            let ok = {
                let f = ctx.population.get(female);
                f.sex() == Sex::Female
                    && f.relationships.partners_label == 1
                    && f.relationships.partner_count() == 0
                    && eligible(ctx, female)
            };
            if !ok {
                continue;
            }
            let (male_age, female_age) = (
                ctx.population.get(male).age(),
                ctx.population.get(female).age(),
            );
            if age_mixing_ok(ctx, &spn.tables, male_age, female_age) {
                form_partnership(ctx, spn, male, female, day);
                break;
            }
        }
    }

    // Pass two: everyone still short of their label, matched across
    // the shared pool stratified by coarse bracket.
    let mut female_pools: [Vec<PersonId>; 3] = [Vec::new(), Vec::new(), Vec::new()];
    let mut males: Vec<PersonId> = Vec::new();
    for person in ctx.population.ids() {
        if !eligible(ctx, person) || !ctx.is_enrolled_in_network(person, spn.network) {
            continue;
        }
        let p = ctx.population.get(person);
        if (p.relationships.partner_count() as i32) >= p.relationships.partners_label {
            continue;
        }
        match p.sex() {
            Sex::Male => males.push(person),
            Sex::Female => female_pools[coarse_bracket(p.age())].push(person),
        }
    }

    for male in males {
        let need = {
            let r = &ctx.population.get(male).relationships;
            (r.partners_label - r.partner_count() as i32).max(0)
        };
        for _ in 0..need {
            let male_age = ctx.population.get(male).age();
            let row = spn.tables.mixing[coarse_bracket(male_age)];
            let mut matched = false;
            for attempt in 0..MATCH_ATTEMPTS {
                // First attempts honour the mixing row; the last falls
                // back to any bracket with candidates.
                let bracket = if attempt + 1 < MATCH_ATTEMPTS {
                    ctx.rng.sample_weighted(RNG_SEXUAL_NETWORK, &row)
                } else {
                    match female_pools.iter().position(|pool| !pool.is_empty()) {
                        Some(b) => b,
                        None => break,
                    }
                };
                let pool = &mut female_pools[bracket];
                if pool.is_empty() {
                    continue;
                }
                let pick = ctx.rng.sample_range(RNG_SEXUAL_NETWORK, 0..pool.len());
                let female = pool[pick];
                if female == male
                    || ctx.population.get(male).relationships.find_partner(female).is_some()
                {
                    continue;
                }
                form_partnership(ctx, spn, male, female, day);
                // Drop the female from the pool once she reaches her
                // label.
                let full = {
                    let r = &ctx.population.get(female).relationships;
                    (r.partner_count() as i32) >= r.partners_label
                };
                if full {
                    pool.swap_remove(pick);
                }
                matched = true;
                break;
            }
            if !matched {
                debug!("no candidate pool for male {male} on day {day}");
                break;
            }
        }
    }
    info!(
        "matching day {day}: {} partnerships this year ({} long-term)",
        spn.matched_this_year, spn.long_term_this_year
    );
}

/// Creates the partnership in both directions: records, duration,
/// long-term lottery, lifetime tallies and network links.
fn form_partnership(
    ctx: &mut Context,
    spn: &mut SexualPartnerNetwork,
    male: PersonId,
    female: PersonId,
    day: u32,
) {
    let male_age = ctx.population.get(male).age();

    // At most one long-term partner per agent, decided by the
    // age-conditional first-marriage lottery.
    let neither_long_term = !ctx.population.get(male).relationships.has_long_term()
        && !ctx.population.get(female).relationships.has_long_term();
    let mut long_term = false;
    if neither_long_term && male_age >= 20 {
        let p_marriage = 1.0 - 3.357 * (-0.07 * f64::from(male_age)).exp();
        long_term = ctx.rng.sample_bool(RNG_SEXUAL_NETWORK, p_marriage.clamp(0.0, 1.0));
    }

    // Duration: a seeded day-0 value when one is stashed, otherwise
    // the marriage bands or the short-term table.
    let stashed = ctx.population.get_mut(male).relationships.day0_durations.pop();
    let (duration, remaining) = if let Some((dur, left)) = stashed {
        (dur, left)
    } else if long_term {
        let dur = marriage_duration_days(ctx, male_age);
        (dur, dur)
    } else {
        let group = partner_age_group(male_age).max(0) as usize;
        let dur = short_term_duration_days(ctx, &spn.tables, group);
        (dur, dur)
    };

    {
        let (m, f) = ctx.population.pair_mut(male, female);
        let mi = m.relationships.add_partner(female);
        let record = &mut m.relationships.partners_mut()[mi];
        record.duration = duration;
        record.days_remaining = remaining;
        record.start_day = i64::from(day);
        record.end_day = i64::from(day) + duration;
        record.long_term = long_term;

        let fi = f.relationships.add_partner(male);
        let mirror = &mut f.relationships.partners_mut()[fi];
        mirror.duration = duration;
        mirror.days_remaining = remaining;
        mirror.start_day = i64::from(day);
        mirror.end_day = i64::from(day) + duration;
        mirror.long_term = long_term;

        let m_group = partner_age_group(m.age()).max(0) as usize;
        let f_group = partner_age_group(f.age()).max(0) as usize;
        m.relationships.lifetime_partners[m_group] += 1;
        f.relationships.lifetime_partners[f_group] += 1;
    }

    if !ctx.is_connected_to(male, female, spn.network) {
        ctx.create_link_to(male, female, spn.network);
    }
    spn.matched_this_year += 1;
    if long_term {
        spn.long_term_this_year += 1;
    }
}

/// Marriage duration from the age-at-first-marriage exponential
/// bands, in days, with the three-year long-term floor.
fn marriage_duration_days(ctx: &Context, age: u32) -> i64 {
    let rate = if age < 25 {
        0.035
    } else if age < 35 {
        0.027
    } else {
        0.021
    };
    let u: f64 = ctx.rng.sample_unit(RNG_SEXUAL_NETWORK).max(1e-12);
    let years = -u.ln() / rate;
    let months = (12.0 * (years + 3.0)).round();
    (months * 30.0) as i64
}

fn short_term_duration_days(ctx: &Context, tables: &PartnerTables, age_group: usize) -> i64 {
    let category = ctx
        .rng
        .sample_weighted(RNG_SEXUAL_NETWORK, &tables.duration_bins[age_group]);
    let (lo, hi) = match category {
        0 => (30, 180),
        1 => (180, 730),
        _ => (730, 1095),
    };
    i64::from(ctx.rng.sample_range(RNG_SEXUAL_NETWORK, lo..hi))
}

/// Pair-wise concurrency adjustment against the longest-remaining
/// partnership: a full year of overlap when both partnerships span the
/// year, the max/min bounds when combined durations exceed a year, and
/// the overlap-probability draw when they do not.
pub fn adjust_concurrency(ctx: &mut Context, spn: &mut SexualPartnerNetwork, today: u32) {
    let this_year = today / DAYS_PER_YEAR;
    let start_of_year = i64::from(this_year * DAYS_PER_YEAR);
    let end_of_year = i64::from((this_year + 1) * DAYS_PER_YEAR);
    let today = i64::from(today);

    let males: Vec<PersonId> = ctx
        .population
        .ids()
        .filter(|p| {
            ctx.population.get(*p).sex() == Sex::Male
                && ctx.population.get(*p).relationships.partner_count() > 0
                && ctx.is_enrolled_in_network(*p, spn.network)
        })
        .collect();

    for male in males {
        let count = ctx.population.get(male).relationships.partner_count();
        if count == 1 {
            let female = ctx.population.get(male).relationships.partners()[0].partner;
            let (m, f) = ctx.population.pair_mut(male, female);
            let record = &mut m.relationships.partners_mut()[0];
            record.concurrent_days = 0;
            record.start_day = today;
            record.end_day = today + record.days_remaining;
            let (start, end, remaining) = (record.start_day, record.end_day, record.days_remaining);
            if let Some(fi) = f.relationships.find_partner(male) {
                let mirror = &mut f.relationships.partners_mut()[fi];
                mirror.concurrent_days = 0;
                mirror.start_day = start;
                mirror.end_day = end;
                mirror.days_remaining = remaining;
            }
            continue;
        }

        // Longest-remaining partnership anchors the pair-wise pass.
        let longest = {
            let partners = ctx.population.get(male).relationships.partners();
            (0..count)
                .max_by_key(|j| partners[*j].days_remaining)
                .unwrap()
        };
        {
            let record = &mut ctx.population.get_mut(male).relationships.partners_mut()[longest];
            record.start_day = today;
            record.end_day = today + record.days_remaining;
        }

        for j in 0..count {
            if j == longest {
                continue;
            }
            let (left_longest, left_j) = {
                let partners = ctx.population.get(male).relationships.partners();
                (partners[longest].days_remaining, partners[j].days_remaining)
            };
            let year = i64::from(DAYS_PER_YEAR);
            let (concurrent, start_j) = if left_longest >= year && left_j >= year {
                (year, today)
            } else if left_longest >= year {
                // The shorter one can start any time its whole span
                // fits in this year.
                let latest = (end_of_year - left_j).max(start_of_year);
                let start = sample_day(ctx, start_of_year, latest);
                (left_j, start)
            } else if left_longest + left_j > year {
                // Overlap is forced; bounded by the difference and the
                // shorter span.
                let min = (left_longest + left_j - year).abs();
                let max = left_longest.min(left_j);
                let overlap = sample_day(ctx, min, max.max(min));
                (overlap, today + left_j - overlap)
            } else if ctx
                .rng
                .sample_bool(RNG_SEXUAL_NETWORK, spn.tables.prob_overlap)
            {
                let max = left_longest.min(left_j).max(1);
                let overlap = sample_day(ctx, 1, max);
                (overlap, today + left_longest - overlap)
            } else {
                let earliest = today + left_longest + 1;
                let latest = (end_of_year - left_j).max(earliest);
                (0, sample_day(ctx, earliest, latest))
            };

            let female = ctx.population.get(male).relationships.partners()[j].partner;
            let (m, f) = ctx.population.pair_mut(male, female);
            {
                let record = &mut m.relationships.partners_mut()[j];
                record.concurrent_days = concurrent;
                record.start_day = start_j;
                record.end_day = start_j + record.days_remaining;
            }
            m.relationships.partners_mut()[longest].concurrent_days = concurrent;
            if let Some(fi) = f.relationships.find_partner(male) {
                let mirror = &mut f.relationships.partners_mut()[fi];
                mirror.concurrent_days = concurrent;
                mirror.start_day = start_j;
                mirror.end_day = start_j + mirror.days_remaining;
            }
        }
    }
}

fn sample_day(ctx: &Context, lo: i64, hi: i64) -> i64 {
    if hi <= lo {
        lo
    } else {
        ctx.rng.sample_range(RNG_SEXUAL_NETWORK, lo..=hi)
    }
}

/// Daily act schedule: each male draws one age-banded Bernoulli and,
/// on success, one uniformly chosen partner for today's act; the
/// partner's mirrored record is flagged too.
pub fn set_sexual_acts(ctx: &mut Context, spn: &mut SexualPartnerNetwork, day: u32) {
    let males: Vec<PersonId> = ctx
        .population
        .ids()
        .filter(|p| {
            ctx.population.get(*p).sex() == Sex::Male
                && ctx.population.get(*p).relationships.partner_count() > 0
                && ctx.is_enrolled_in_network(*p, spn.network)
        })
        .collect();

    for male in males {
        let count = ctx.population.get(male).relationships.partner_count();
        // Reset yesterday's flags on the male and his partners.
        let partners: Vec<PersonId> = {
            let relationships = &mut ctx.population.get_mut(male).relationships;
            for record in relationships.partners_mut() {
                record.act_today = false;
            }
            relationships.partners().iter().map(|r| r.partner).collect()
        };
        for female in &partners {
            let f = ctx.population.get_mut(*female);
            if let Some(fi) = f.relationships.find_partner(male) {
                f.relationships.partners_mut()[fi].act_today = false;
            }
        }

        let age = ctx.population.get(male).age();
        let band = ((age.saturating_sub(15)) / 10).min(5) as usize;
        if !ctx
            .rng
            .sample_bool(RNG_SEXUAL_NETWORK, spn.tables.act_prob[band])
        {
            continue;
        }
        let pick = ctx.rng.sample_range(RNG_SEXUAL_NETWORK, 0..count);
        let female = partners[pick];
        {
            let record = &mut ctx.population.get_mut(male).relationships.partners_mut()[pick];
            record.act_today = true;
            record.acts += 1;
            record.act_days.push(day);
        }
        let f = ctx.population.get_mut(female);
        if let Some(fi) = f.relationships.find_partner(male) {
            let mirror = &mut f.relationships.partners_mut()[fi];
            mirror.act_today = true;
            mirror.acts += 1;
            mirror.act_days.push(day);
        }
    }
}

/// Severs every partnership of a dying agent and leaves the network.
pub fn terminate_person_relationships(ctx: &mut Context, network: NetworkId, person: PersonId) {
    let partners: Vec<PersonId> = ctx
        .population
        .get(person)
        .relationships
        .partners()
        .iter()
        .map(|r| r.partner)
        .collect();
    for partner in partners {
        let (own, other) = ctx.population.pair_mut(person, partner);
        if let Some(i) = own.relationships.find_partner(partner) {
            own.relationships.remove_partner_at(i);
        }
        if let Some(i) = other.relationships.find_partner(person) {
            other.relationships.remove_partner_at(i);
            other.relationships.partners_label -= 1;
        }
    }
    if ctx.is_enrolled_in_network(person, network) {
        ctx.leave_network(person, network);
    }
}

/// Loads the per-age day-0 cohort seed files `person_NN.txt`
/// (NN in [15, 44]): each line is `partners_ever` followed by
/// `duration remaining` pairs, consumed by agents of integer age NN.
pub fn load_day0_seeds(ctx: &mut Context, directory: &str) -> Result<usize, ContagionError> {
    let mut loaded = 0;
    for age in MIN_PARTNER_AGE..45 {
        let path = std::path::Path::new(directory).join(format!("person_{age}.txt"));
        if !path.exists() {
            continue;
        }
        let text = std::fs::read_to_string(&path)?;
        let mut records: Vec<(i32, Vec<(i64, i64)>)> = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let tokens: Result<Vec<i64>, _> = line.split_whitespace().map(str::parse).collect();
            let tokens = tokens.map_err(|_| {
                ContagionError::ContagionError(format!("{}: bad seed row {line}", path.display()))
            })?;
            if tokens.is_empty() || tokens.len() % 2 == 0 {
                return Err(ContagionError::ContagionError(format!(
                    "{}: seed rows are a count plus duration pairs",
                    path.display()
                )));
            }
            let durations = tokens[1..].chunks(2).map(|c| (c[0], c[1])).collect();
            records.push((tokens[0] as i32, durations));
        }
        let cohort: Vec<PersonId> = ctx
            .population
            .ids()
            .filter(|p| ctx.population.get(*p).age() == age && eligible(ctx, *p))
            .collect();
        for (person, (ever, durations)) in cohort.into_iter().zip(records) {
            let relationships = &mut ctx.population.get_mut(person).relationships;
            relationships.partners_ever_day0 = ever;
            relationships.day0_durations = durations;
            loaded += 1;
        }
    }
    Ok(loaded)
}

fn write_annual_reports(ctx: &mut Context, spn: &mut SexualPartnerNetwork, day: u32) {
    let year = day / DAYS_PER_YEAR;
    // Partner-count cross-tab by sex and age group.
    let mut tally = [[[0u32; PARTNER_BINS]; AGE_GROUPS]; 2];
    for person in ctx.population.ids() {
        if !eligible(ctx, person) {
            continue;
        }
        let p = ctx.population.get(person);
        let group = partner_age_group(p.age());
        if group < 0 {
            continue;
        }
        let sex_index = match p.sex() {
            Sex::Male => 0,
            Sex::Female => 1,
        };
        let bin = p.relationships.partner_count().min(3);
        tally[sex_index][group as usize][bin] += 1;
    }
    for (sex_index, sex) in ['M', 'F'].into_iter().enumerate() {
        for group in 0..AGE_GROUPS {
            let row = CrosstabRow {
                year,
                sex,
                age_group: group,
                partners_0: tally[sex_index][group][0],
                partners_1: tally[sex_index][group][1],
                partners_2: tally[sex_index][group][2],
                partners_3_plus: tally[sex_index][group][3],
            };
            ctx.reports.send_report("partner_crosstab", &row);
        }
    }

    ctx.reports.send_report(
        "partner_matched",
        &MatchedRow {
            year,
            matched_partnerships: spn.matched_this_year,
            long_term: spn.long_term_this_year,
        },
    );

    // QC report: per-agent partnership summaries.
    for person in ctx.population.ids() {
        let p = ctx.population.get(person);
        if p.relationships.partner_count() == 0 {
            continue;
        }
        let row = QcRow {
            year,
            person: person.0,
            sex: p.sex().tag(),
            age: p.age(),
            label: p.relationships.partners_label,
            matched: p.relationships.partner_count(),
            longest_duration: p
                .relationships
                .partners()
                .iter()
                .map(|r| r.duration)
                .max()
                .unwrap_or(0),
            total_overlap_days: p
                .relationships
                .partners()
                .iter()
                .map(|r| r.concurrent_days)
                .sum(),
        };
        ctx.reports.send_report("partner_qc", &row);
    }

    if spn.matched_this_year == 0 {
        warn!("no partnerships formed in year {year}");
    }
}
