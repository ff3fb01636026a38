//! Per-mode transmission strategies.
//!
//! Place-based modes draw a contact count for every infectious group
//! member, pick contacts uniformly without replacement from the member
//! list, and Bernoulli-test each against the combined probability
//! `base_prob × infectivity × susceptibility × modifier products`.
//! The sexual mode walks today's partnership acts with a per-act
//! probability supplied by the condition model. Vector and `none`
//! modes are degenerate: imports drive them entirely.
//!
//! Transmission only reads group state; every write goes through
//! `expose_person`, which funnels into the epidemic bookkeeping.

use crate::condition::{ConditionId, ConditionModel, TransmissionMode};
use crate::context::Context;
use crate::epidemic::{expose_person, Epidemic};
use crate::groups::GroupId;
use crate::hash::HashSet;
use crate::health::ExposureSite;
use crate::people::PersonId;
use crate::random::RNG_TRANSMISSION;
use crate::trace;

pub fn spread(
    ctx: &mut Context,
    epi: &mut Epidemic,
    model: &mut ConditionModel,
    condition_id: ConditionId,
    day: u32,
) {
    match ctx.conditions.get(condition_id).transmission_mode {
        TransmissionMode::Respiratory | TransmissionMode::Contact => {
            spread_in_places(ctx, epi, model, condition_id, day);
        }
        TransmissionMode::Sexual => {
            spread_over_partnerships(ctx, epi, model, condition_id, day);
        }
        // Driven entirely by the import schedule.
        TransmissionMode::Vector | TransmissionMode::None => {}
    }
}

fn spread_in_places(
    ctx: &mut Context,
    epi: &mut Epidemic,
    model: &mut ConditionModel,
    condition_id: ConditionId,
    day: u32,
) {
    let transmissibility = ctx.conditions.get(condition_id).transmissibility;
    let groups: HashSet<GroupId> = epi.touched_groups().iter().copied().collect();

    for group in groups {
        if !ctx.places.get(group).has_infectious(condition_id) {
            continue;
        }
        let infectious: Vec<PersonId> =
            ctx.places.get(group).infectious_people(condition_id).to_vec();
        let group_type = ctx.places.get(group).group_type;
        let contact_rate = ctx.places.group_type(group_type).contacts_per_day(condition_id);
        let base_prob = ctx.places.group_type(group_type).transmission_prob(condition_id);
        if contact_rate <= 0.0 || base_prob <= 0.0 {
            continue;
        }

        for infector in infectious {
            let health = &ctx.population.get(infector).health;
            if !health.is_infectious(condition_id) {
                continue;
            }
            let infectivity =
                health.record(condition_id).infectivity * health.transmission_modifier(condition_id);

            // Expected contacts, with stochastic rounding of the
            // fractional part.
            let expected = contact_rate * transmissibility * ctx.contact_hour_modulation;
            let mut contact_count = expected.floor() as usize;
            if ctx.rng.sample_bool(RNG_TRANSMISSION, expected.fract()) {
                contact_count += 1;
            }
            if contact_count == 0 {
                continue;
            }

            let size = ctx.places.get(group).size();
            if size < 2 {
                continue;
            }
            // Uniform draw without replacement from the member list.
            let mut member_indices: Vec<usize> = (0..size).collect();
            let picks = contact_count.min(size - 1);
            for k in 0..picks {
                let j = ctx.rng.sample_range(RNG_TRANSMISSION, k..member_indices.len());
                member_indices.swap(k, j);
                let target = ctx.places.get(group).member(member_indices[k]);
                if target == infector {
                    continue;
                }
                let target_health = &ctx.population.get(target).health;
                if !ctx.population.get(target).is_alive()
                    || !target_health.is_susceptible(condition_id)
                {
                    continue;
                }
                let susceptibility = target_health.record(condition_id).susceptibility
                    * target_health.susceptibility_modifier(condition_id);

                let prob = base_prob * infectivity * susceptibility;
                if ctx.rng.sample_bool(RNG_TRANSMISSION, prob) {
                    trace!("person {infector} infects {target} in group {group} day {day}");
                    let to_condition = ctx
                        .conditions
                        .natural_history(condition_id)
                        .condition_to_transmit(
                            ctx.population.get(infector).health.record(condition_id).state
                                as usize,
                            condition_id,
                        );
                    if to_condition == condition_id {
                        expose_person(
                            ctx,
                            epi,
                            model,
                            condition_id,
                            target,
                            Some(infector),
                            Some(ExposureSite::Place(group)),
                            day,
                        );
                    } else {
                        // Cross-condition spawning goes through the
                        // pending queue; the owning condition picks it
                        // up in its own update.
                        ctx.queue_cross_exposure(to_condition, target, infector, day);
                    }
                }
            }
        }
    }
}

fn spread_over_partnerships(
    ctx: &mut Context,
    epi: &mut Epidemic,
    model: &mut ConditionModel,
    condition_id: ConditionId,
    day: u32,
) {
    let Some(network) = ctx.conditions.get(condition_id).transmission_network else {
        return;
    };
    let infectious: Vec<PersonId> = epi.infectious_people().to_vec();
    for infector in infectious {
        if !ctx.population.get(infector).health.is_infectious(condition_id) {
            continue;
        }
        let partners: Vec<(PersonId, bool)> = ctx
            .population
            .get(infector)
            .relationships
            .partners()
            .iter()
            .map(|r| (r.partner, r.act_today))
            .collect();
        for (partner, act_today) in partners {
            if !act_today {
                continue;
            }
            if !ctx.population.get(partner).is_alive()
                || !ctx.population.get(partner).health.is_susceptible(condition_id)
            {
                continue;
            }
            let per_act = model
                .per_act_probability(ctx, condition_id, infector)
                .unwrap_or(ctx.conditions.get(condition_id).transmissibility);
            let susceptibility = {
                let health = &ctx.population.get(partner).health;
                health.record(condition_id).susceptibility
                    * health.susceptibility_modifier(condition_id)
            };
            if ctx.rng.sample_bool(RNG_TRANSMISSION, per_act * susceptibility) {
                trace!("per-act transmission {infector} -> {partner} day {day}");
                expose_person(
                    ctx,
                    epi,
                    model,
                    condition_id,
                    partner,
                    Some(infector),
                    Some(ExposureSite::Network(network)),
                    day,
                );
            }
        }
    }
}

impl ConditionModel {
    /// Per-act transmission probability for networked conditions.
    /// `None` falls back to the condition's transmissibility.
    pub fn per_act_probability(
        &self,
        ctx: &Context,
        condition_id: ConditionId,
        infector: PersonId,
    ) -> Option<f64> {
        match self {
            ConditionModel::Generic | ConditionModel::Markov(_) => None,
            ConditionModel::Hiv(m) => m.per_act_probability(ctx, condition_id, infector),
        }
    }
}
