//! End-to-end scenario tests: a full context per test, exercising the
//! engine through its public prepare / update / finish surface.

use contagion::condition::ConditionModel;
use contagion::groups::{GroupType, PlaceKind};
use contagion::health::SymptomsLevel;
use contagion::hiv::{HivModel, HivSettings};
use contagion::markov::MarkovModel;
use contagion::natural_history::{ImportEvent, NaturalHistory, StateSpec};
use contagion::people::{HouseholdType, PersonId, PersonSpec, Sex};
use contagion::{Context, EventQueue, TransmissionMode};

/// A three-state S/I/R natural history with mean infectious period
/// `mean_days` and the given per-state symptom level.
fn sir_history(mean_days: f64, conditions: usize) -> NaturalHistory {
    let mut nh = NaturalHistory::build(
        "INF",
        vec![
            StateSpec {
                susceptibility: 1.0,
                ..StateSpec::named("Susceptible")
            },
            StateSpec {
                infectivity: 1.0,
                symptoms: SymptomsLevel::Mild,
                ..StateSpec::named("Infectious")
            },
            StateSpec {
                recovered: true,
                ..StateSpec::named("Recovered")
            },
        ],
        conditions,
    );
    // stay = e^(-1/mean) gives an exponential wait with the requested
    // mean.
    nh.set_transition(0, 1, 2, 1.0 - (-1.0 / mean_days).exp());
    nh
}

fn sir_context(population: usize, days: u32, seed: u64) -> (Context, PersonId) {
    let mut ctx = Context::empty();
    ctx.params.set("seed", &seed.to_string());
    ctx.params.set("simulation_days", &days.to_string());
    ctx.clock = contagion::SimClock::new(contagion::CivilDate::parse("2012-01-01").unwrap(), days);

    ctx.conditions.add_condition(
        "INF",
        TransmissionMode::Respiratory,
        sir_history(7.0, 1),
        0.05,
        ConditionModel::Generic,
    );

    let mut group_type = GroupType::new("household", PlaceKind::Household, 1);
    group_type.set_rates(0, 10.0, 1.0);
    let t = ctx.places.add_group_type(group_type);
    let group = ctx.places.add_place("big-house", t, 1);

    let mut first = PersonId(0);
    for i in 0..population {
        let person = ctx.add_person(PersonSpec {
            age: 30.0,
            sex: if i % 2 == 0 { Sex::Male } else { Sex::Female },
            ..PersonSpec::default()
        });
        if i == 0 {
            first = person;
        }
        ctx.enroll_place(person, group);
    }
    (ctx, first)
}

#[test]
fn sir_epidemic_takes_off_and_burns_out() {
    let (mut ctx, seed_person) = sir_context(1000, 200, 123);
    ctx.prepare().unwrap();
    ctx.seed_infection(0, seed_person, 0);

    let mut total_by_day_60 = 0;
    for day in 0..200 {
        ctx.update(day);
        if day == 60 {
            total_by_day_60 = ctx.conditions.get(0).epidemic.counters.total_exposures;
        }
    }
    let counters = ctx.conditions.get(0).epidemic.counters;

    assert!(
        total_by_day_60 > 500,
        "expected a major outbreak by day 60, saw {total_by_day_60}"
    );
    assert_eq!(
        counters.current_infectious, 0,
        "epidemic should be extinct by day 200"
    );
    // Everyone exposed at most once.
    assert!(counters.total_exposures <= 1000);
    ctx.finish().unwrap();
}

#[test]
fn active_list_contains_every_infectious_person() {
    let (mut ctx, seed_person) = sir_context(500, 60, 7);
    ctx.prepare().unwrap();
    ctx.seed_infection(0, seed_person, 0);
    for day in 0..40 {
        ctx.update(day);
    }
    let epidemic = &ctx.conditions.get(0).epidemic;
    let mut checked = 0;
    for person in ctx.population.ids() {
        if ctx.population.get(person).health.is_infectious(0) {
            assert!(epidemic.is_active(person));
            checked += 1;
        }
    }
    assert!(checked > 0, "expected some infectious people at day 40");
}

#[test]
fn event_ring_boundaries_drop_silently() {
    // Horizon 24 x 10 steps.
    let mut queue = EventQueue::new(240);
    queue.add_event(0, PersonId(1));
    queue.add_event(24, PersonId(2));
    queue.add_event(239, PersonId(3));
    queue.add_event(240, PersonId(4));
    queue.add_event(-1, PersonId(5));

    let mut seen = Vec::new();
    for step in 0..240 {
        seen.extend(queue.drain(step));
    }
    assert_eq!(seen, vec![PersonId(1), PersonId(2), PersonId(3)]);
}

#[test]
fn group_index_stays_stable_under_removal() {
    let mut ctx = Context::empty();
    let t = ctx
        .places
        .add_group_type(GroupType::new("work", PlaceKind::Workplace, 0));
    let group = ctx.places.add_place("office", t, 0);
    let people: Vec<PersonId> = (0..5)
        .map(|_| ctx.add_person(PersonSpec::default()))
        .collect();
    for p in &people {
        ctx.enroll_place(*p, group);
    }

    ctx.unenroll_place(people[2], group);

    // The member formerly at index 4 now reports index 2; all other
    // indices are unchanged.
    assert_eq!(ctx.population.get(people[4]).membership_in(group), Some(2));
    for (i, p) in people.iter().enumerate() {
        if i == 2 || i == 4 {
            continue;
        }
        assert_eq!(ctx.population.get(*p).membership_in(group), Some(i));
    }
}

#[test]
fn sexual_partner_matching_is_monogamous_and_symmetric() {
    let mut ctx = Context::empty();
    ctx.clock = contagion::SimClock::new(contagion::CivilDate::parse("2012-01-01").unwrap(), 30);
    ctx.conditions.add_condition(
        "HIV",
        TransmissionMode::Sexual,
        sir_history(3650.0, 1),
        1.0,
        ConditionModel::Hiv(HivModel::new(HivSettings::default())),
    );
    for i in 0..100 {
        ctx.add_person(PersonSpec {
            age: 30.0,
            sex: if i < 50 { Sex::Male } else { Sex::Female },
            household_type: if i < 50 {
                HouseholdType::SingleMale
            } else {
                HouseholdType::SingleFemale
            },
            ..PersonSpec::default()
        });
    }
    ctx.prepare().unwrap();

    // Label everyone as an exactly-one-partner agent and make every
    // age pairing admissible.
    {
        let spn = ctx.sexual_network.as_mut().unwrap();
        spn.tables.mixing = [[1.0, 1.0, 1.0]; 3];
        spn.tables.male_cumulative = [[0.0, 1.0, 1.0, 1.0]; 9];
        spn.tables.female_cumulative = [[0.0, 1.0, 1.0, 1.0]; 9];
    }

    ctx.update(0);
    ctx.update(1); // the annual matching tick

    let mut matched = 0;
    for person in ctx.population.ids() {
        let relationships = &ctx.population.get(person).relationships;
        assert!(relationships.partner_count() <= 1);
        if relationships.partner_count() == 1 {
            matched += 1;
            let partner = relationships.partners()[0].partner;
            let mirror = &ctx.population.get(partner).relationships;
            assert!(mirror.find_partner(person).is_some());
            assert_eq!(mirror.partner_count(), 1);
        }
    }
    assert!(matched >= 80, "expected most agents matched, got {matched}");
}

#[test]
fn hiv_acute_phase_spans_120_to_180_days() {
    let mut ctx = Context::empty();
    ctx.params.set("seed", "11");
    ctx.clock = contagion::SimClock::new(contagion::CivilDate::parse("2012-01-01").unwrap(), 260);
    let hiv = ctx.conditions.add_condition(
        "HIV",
        TransmissionMode::Sexual,
        sir_history(3650.0, 1),
        1.0,
        ConditionModel::Hiv(HivModel::new(HivSettings::default())),
    );
    let person = ctx.add_person(PersonSpec {
        age: 30.0,
        sex: Sex::Male,
        household_type: HouseholdType::SingleMale,
        ..PersonSpec::default()
    });
    ctx.add_person(PersonSpec {
        age: 30.0,
        sex: Sex::Female,
        household_type: HouseholdType::SingleFemale,
        ..PersonSpec::default()
    });
    ctx.prepare().unwrap();

    for day in 0..10 {
        ctx.update(day);
    }
    ctx.seed_infection(hiv, person, 10);

    let end_acute = {
        let ConditionModel::Hiv(model) = &ctx.conditions.get(hiv).model else {
            panic!("expected the hiv model");
        };
        let infection = model.infection(person).expect("infection record");
        assert!(infection.acute);
        infection.end_acute
    };
    let duration = end_acute - 10;
    assert!((120..=180).contains(&duration), "acute span was {duration}");

    for day in 10..260 {
        ctx.update(day);
        if !ctx.population.get(person).is_alive() {
            panic!("agent unexpectedly died during the acute test window");
        }
        let ConditionModel::Hiv(model) = &ctx.conditions.get(hiv).model else {
            panic!("expected the hiv model");
        };
        let infection = model.infection(person).expect("infection record");
        if i64::from(day) < end_acute {
            assert!(infection.acute, "acute ended early on day {day}");
        }
        assert!(infection.cd4_real >= 0.0 && infection.cd4_real <= 1500.0);
        assert!(infection.vl_real >= 0.0 && infection.vl_real <= 8.0);
    }
    let ConditionModel::Hiv(model) = &ctx.conditions.get(hiv).model else {
        panic!("expected the hiv model");
    };
    assert!(
        !model.infection(person).unwrap().acute,
        "acute phase should have ended before day 260"
    );
}

#[test]
fn markov_absorbing_state_schedules_no_transition() {
    let mut ctx = Context::empty();
    ctx.clock = contagion::SimClock::new(contagion::CivilDate::parse("2012-01-01").unwrap(), 60);
    let mut nh = NaturalHistory::build(
        "DRUG",
        vec![StateSpec::named("NonUser"), StateSpec::named("User")],
        1,
    );
    // Half the population starts as users; users quit at rate 0.5 and
    // the non-user state is absorbing (no outgoing mass).
    nh.set_initial_percent(0, 0, 50.0);
    nh.set_initial_percent(0, 1, 50.0);
    nh.set_transition(0, 1, 0, 0.5);
    let drug = ctx.conditions.add_condition(
        "DRUG",
        TransmissionMode::None,
        nh,
        1.0,
        ConditionModel::Markov(MarkovModel::new()),
    );
    for _ in 0..200 {
        ctx.add_person(PersonSpec::default());
    }
    ctx.prepare().unwrap();

    // Every agent in the absorbing state has no pending transition.
    let check_absorbing = |ctx: &Context| {
        for person in ctx.population.ids() {
            let record = ctx.population.get(person).health.record(drug);
            if record.state == 0 {
                assert_eq!(record.next_transition_day, -1);
            }
        }
    };
    check_absorbing(&ctx);

    let initial_nonusers: Vec<PersonId> = ctx
        .population
        .ids()
        .filter(|p| ctx.population.get(*p).health.record(drug).state == 0)
        .collect();
    assert!(!initial_nonusers.is_empty());

    for day in 0..60 {
        ctx.update(day);
        check_absorbing(&ctx);
    }

    // Nobody leaves the absorbing state.
    for person in initial_nonusers {
        assert_eq!(ctx.population.get(person).health.record(drug).state, 0);
    }
    let ConditionModel::Markov(model) = &ctx.conditions.get(drug).model else {
        panic!("expected the markov model");
    };
    assert_eq!(
        model.count_in_state(0) + model.count_in_state(1),
        ctx.population.size()
    );
}

#[test]
fn import_shortfall_infects_everyone_and_records_the_gap() {
    let mut ctx = Context::empty();
    ctx.clock = contagion::SimClock::new(contagion::CivilDate::parse("2012-01-01").unwrap(), 5);
    let mut nh = sir_history(7.0, 1);
    nh.add_import(ImportEvent {
        start_day: 0,
        end_day: 0,
        count_per_day: 50,
        ..ImportEvent::default()
    });
    ctx.conditions.add_condition(
        "INF",
        TransmissionMode::None,
        nh,
        1.0,
        ConditionModel::Generic,
    );
    for _ in 0..10 {
        ctx.add_person(PersonSpec::default());
    }
    ctx.prepare().unwrap();
    ctx.update(0);

    let counters = ctx.conditions.get(0).epidemic.counters;
    assert_eq!(counters.total_exposures, 10, "all susceptibles infected");
    assert_eq!(counters.import_shortfall, 40, "the gap is recorded");
}

#[test]
fn import_age_window_selects_eligible_agents() {
    let mut ctx = Context::empty();
    ctx.clock = contagion::SimClock::new(contagion::CivilDate::parse("2012-01-01").unwrap(), 5);
    let mut nh = sir_history(7.0, 1);
    nh.add_import(ImportEvent {
        start_day: 0,
        end_day: 0,
        count_per_day: 5,
        min_age: 60.0,
        max_age: 80.0,
        ..ImportEvent::default()
    });
    ctx.conditions.add_condition(
        "INF",
        TransmissionMode::None,
        nh,
        1.0,
        ConditionModel::Generic,
    );
    for i in 0..20 {
        ctx.add_person(PersonSpec {
            age: if i < 10 { 30.0 } else { 65.0 },
            ..PersonSpec::default()
        });
    }
    ctx.prepare().unwrap();
    ctx.update(0);

    for person in ctx.population.ids() {
        let infected = ctx.population.get(person).health.is_infected(0);
        if ctx.population.get(person).age() < 60 {
            assert!(!infected, "import ignored the age window");
        }
    }
    assert_eq!(ctx.conditions.get(0).epidemic.counters.total_exposures, 5);
}

#[test]
fn case_fatality_terminates_and_unwinds() {
    let mut ctx = Context::empty();
    ctx.clock = contagion::SimClock::new(contagion::CivilDate::parse("2012-01-01").unwrap(), 30);
    let mut nh = NaturalHistory::build(
        "LETHAL",
        vec![
            StateSpec {
                susceptibility: 1.0,
                ..StateSpec::named("S")
            },
            StateSpec {
                infectivity: 1.0,
                ..StateSpec::named("I")
            },
            StateSpec {
                fatal: true,
                ..StateSpec::named("D")
            },
        ],
        1,
    );
    nh.set_transition(0, 1, 2, 0.9);
    ctx.conditions.add_condition(
        "LETHAL",
        TransmissionMode::None,
        nh,
        1.0,
        ConditionModel::Generic,
    );
    let t = ctx
        .places
        .add_group_type(GroupType::new("household", PlaceKind::Household, 1));
    let group = ctx.places.add_place("hh", t, 1);
    let victim = ctx.add_person(PersonSpec::default());
    let other = ctx.add_person(PersonSpec::default());
    ctx.enroll_place(victim, group);
    ctx.enroll_place(other, group);
    ctx.prepare().unwrap();
    ctx.seed_infection(0, victim, 0);

    for day in 0..30 {
        ctx.update(day);
    }
    assert!(!ctx.population.get(victim).is_alive());
    assert!(ctx.population.get(victim).memberships.is_empty());
    assert_eq!(ctx.places.get(group).size(), 1);
    assert_eq!(
        ctx.conditions.get(0).epidemic.counters.total_case_fatalities,
        1
    );
    // The survivor's stored index still matches the group.
    let index = ctx.population.get(other).membership_in(group).unwrap();
    assert_eq!(ctx.places.get(group).member(index), other);
}

#[test]
fn health_record_lines_have_the_documented_shape() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("health_records.txt");
    let (mut ctx, seed_person) = sir_context(50, 30, 5);
    ctx.reports.enable_health_records_file(&path).unwrap();
    ctx.prepare().unwrap();
    ctx.seed_infection(0, seed_person, 0);
    for day in 0..30 {
        ctx.update(day);
    }
    ctx.finish().unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("is an IMPORTED EXPOSURE to INF"));
    assert!(text.contains("is INFECTIOUS for INF"));
    assert!(text.contains("is RECOVERED from INF") || text.contains("is REMOVED for INF"));
    for line in text.lines() {
        assert!(
            line.starts_with("HEALTH RECORD: 2012-"),
            "unexpected line {line}"
        );
        assert!(line.contains(" day "), "unexpected line {line}");
        assert!(line.contains(" person "), "unexpected line {line}");
        assert!(line.contains(" age "), "unexpected line {line}");
    }
}

#[test]
fn daily_counters_sum_to_totals() {
    let (mut ctx, seed_person) = sir_context(300, 120, 99);
    ctx.prepare().unwrap();
    ctx.seed_infection(0, seed_person, 0);

    let mut summed_new = ctx.conditions.get(0).epidemic.counters.total_exposures;
    assert_eq!(summed_new, 1);
    let mut last_total = summed_new;
    for day in 0..120 {
        ctx.update(day);
        let counters = ctx.conditions.get(0).epidemic.counters;
        // total only grows, and by exactly the day's new exposures.
        assert!(counters.total_exposures >= last_total);
        summed_new += counters.total_exposures - last_total;
        last_total = counters.total_exposures;
    }
    assert_eq!(summed_new, last_total);
}
