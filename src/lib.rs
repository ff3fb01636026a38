//! Contagion is the core simulation engine of an agent-based
//! epidemiological platform. It advances a closed synthetic population
//! through discrete day/hour time while maintaining per-agent health
//! state for multiple concurrent conditions, spread over households,
//! schools, workplaces and explicit partner networks.
//!
//! The engine is organised around four subsystems:
//!
//! * a per-condition natural-history state machine
//!   ([`natural_history`]),
//! * a bounded-horizon time-ring event scheduler ([`events`]),
//! * the mixing-group and network membership substrate ([`groups`],
//!   [`network`], [`sexual_network`]),
//! * the per-mode transmission core ([`transmission`]) with its
//!   aggregate bookkeeping ([`epidemic`]) and the HIV and Markov
//!   condition kinds ([`hiv`], [`markov`]).
//!
//! Everything hangs off an explicit [`Context`]: build one, add people
//! and places, `prepare()`, call `update(day)` per day, `finish()`.
//! There is no global state; tests construct their own worlds.

pub mod age_map;
pub mod condition;
pub mod context;
pub mod date;
pub mod epidemic;
pub mod error;
pub mod events;
pub mod groups;
pub mod hash;
pub mod health;
pub mod hiv;
pub mod log;
pub mod markov;
pub mod natural_history;
pub mod network;
pub mod params;
pub mod people;
pub mod random;
pub mod report;
pub mod sexual_network;
pub mod transmission;

pub use condition::{Condition, ConditionId, ConditionList, ConditionModel, TransmissionMode};
pub use context::Context;
pub use date::{CivilDate, SimClock};
pub use error::ContagionError;
pub use events::EventQueue;
pub use groups::{GroupId, GroupType, GroupTypeId, MixingGroup, PlaceKind, PlaceList};
pub use health::{ContextHealthExt, ExposureSite, Health, SymptomsLevel};
pub use crate::log::{
    debug, disable_logging, enable_logging, error, info, set_log_level, trace, warn,
};
pub use natural_history::{ImportEvent, NaturalHistory, StateSpec};
pub use network::{ContextNetworkExt, NetworkId, NetworkList, PersonNetworkLink};
pub use params::Params;
pub use people::{HouseholdType, Person, PersonId, PersonSpec, Population, Sex};
pub use random::RngRegistry;
pub use report::ReportWriters;
pub use sexual_network::{PartnerTables, Relationships, SexualPartnerNetwork};
