//! Conditions: the diseases and behavioural processes modelled in
//! parallel.
//!
//! A condition ties together a natural-history model, the aggregate
//! [`Epidemic`](crate::epidemic::Epidemic) bookkeeping, a transmission
//! mode and a model kind. The kinds share the generic bookkeeping and
//! contribute their own hooks: the Markov kind keeps per-state people
//! lists, the HIV kind runs the patient-level progression model.

use crate::epidemic::Epidemic;
use crate::error::ContagionError;
use crate::hiv::HivModel;
use crate::markov::MarkovModel;
use crate::natural_history::NaturalHistory;
use crate::network::NetworkId;
use crate::params::Params;

pub type ConditionId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransmissionMode {
    Respiratory,
    Contact,
    Sexual,
    Vector,
    #[default]
    None,
}

impl TransmissionMode {
    pub fn from_name(name: &str) -> Result<Self, ContagionError> {
        match name {
            "respiratory" => Ok(TransmissionMode::Respiratory),
            "contact" => Ok(TransmissionMode::Contact),
            "sexual" => Ok(TransmissionMode::Sexual),
            "vector" => Ok(TransmissionMode::Vector),
            "none" => Ok(TransmissionMode::None),
            other => Err(ContagionError::ContagionError(format!(
                "unknown transmission mode {other}"
            ))),
        }
    }

    /// Place-mediated modes share the group transmission loop.
    #[must_use]
    pub fn is_place_based(self) -> bool {
        matches!(self, TransmissionMode::Respiratory | TransmissionMode::Contact)
    }
}

/// The condition kind and its specialised state. Shared bookkeeping
/// (active/infectious lists, counters) lives in the generic
/// [`Epidemic`]; kinds contribute update and reporting hooks.
#[derive(Debug, Default)]
pub enum ConditionModel {
    #[default]
    Generic,
    Markov(MarkovModel),
    Hiv(HivModel),
}

impl ConditionModel {
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            ConditionModel::Generic => "generic",
            ConditionModel::Markov(_) => "markov",
            ConditionModel::Hiv(_) => "hiv",
        }
    }
}

#[derive(Debug, Default)]
pub struct Condition {
    pub id: ConditionId,
    pub name: String,
    pub transmission_mode: TransmissionMode,
    pub transmissibility: f64,
    pub natural_history: NaturalHistory,
    pub epidemic: Epidemic,
    pub model: ConditionModel,
    /// The network contagion spreads over, for networked modes.
    pub transmission_network: Option<NetworkId>,
}

/// The process-wide owner of every condition, created once during
/// setup and torn down at end of run.
#[derive(Debug, Default)]
pub struct ConditionList {
    conditions: Vec<Condition>,
}

impl ConditionList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the condition set from properties. `conditions` names the
    /// set; each name needs `<name>.transmission_mode` and a state
    /// model.
    pub fn from_params(params: &Params) -> Result<Self, ContagionError> {
        let names = params.require_vec_str("conditions")?;
        let mut list = ConditionList::new();
        for name in &names {
            let mode =
                TransmissionMode::from_name(&params.require_str(&format!("{name}.transmission_mode"))?)?;
            let natural_history = NaturalHistory::from_params(params, name, &names)?;
            let transmissibility = params.get_f64_or(&format!("{name}.transmissibility"), 1.0)?;
            let kind = params.get_str_or(&format!("{name}.model"), "generic");
            let model = match kind.as_str() {
                "generic" => ConditionModel::Generic,
                "markov" => ConditionModel::Markov(MarkovModel::new()),
                "hiv" => ConditionModel::Hiv(HivModel::from_params(params)?),
                other => {
                    return Err(ContagionError::ContagionError(format!(
                        "{name}.model: unknown condition model {other}"
                    )))
                }
            };
            list.add_condition(name, mode, natural_history, transmissibility, model);
        }
        Ok(list)
    }

    pub fn add_condition(
        &mut self,
        name: &str,
        transmission_mode: TransmissionMode,
        natural_history: NaturalHistory,
        transmissibility: f64,
        model: ConditionModel,
    ) -> ConditionId {
        let id = self.conditions.len();
        self.conditions.push(Condition {
            id,
            name: name.to_string(),
            transmission_mode,
            transmissibility,
            natural_history,
            epidemic: Epidemic::new(),
            model,
            transmission_network: None,
        });
        id
    }

    /// Completes every natural history and sizes the epidemic event
    /// rings to the horizon.
    pub fn prepare(&mut self, horizon: u32) -> Result<(), ContagionError> {
        for condition in &mut self.conditions {
            condition.natural_history.prepare()?;
            condition.epidemic.prepare(horizon);
        }
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: ConditionId) -> &Condition {
        &self.conditions[id]
    }

    pub fn get_mut(&mut self, id: ConditionId) -> &mut Condition {
        &mut self.conditions[id]
    }

    #[must_use]
    pub fn name(&self, id: ConditionId) -> &str {
        &self.conditions[id].name
    }

    #[must_use]
    pub fn natural_history(&self, id: ConditionId) -> &NaturalHistory {
        &self.conditions[id].natural_history
    }

    pub fn get_condition_id(&self, name: &str) -> Option<ConditionId> {
        self.conditions.iter().position(|c| c.name == name)
    }

    pub fn ids(&self) -> impl Iterator<Item = ConditionId> {
        0..self.conditions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::natural_history::StateSpec;

    fn minimal_nh(name: &str) -> NaturalHistory {
        NaturalHistory::build(name, vec![StateSpec::named("S"), StateSpec::named("I")], 1)
    }

    #[test]
    fn transmission_mode_names() {
        assert_eq!(
            TransmissionMode::from_name("respiratory").unwrap(),
            TransmissionMode::Respiratory
        );
        assert_eq!(
            TransmissionMode::from_name("sexual").unwrap(),
            TransmissionMode::Sexual
        );
        assert!(TransmissionMode::from_name("telepathy").is_err());
        assert!(TransmissionMode::Respiratory.is_place_based());
        assert!(!TransmissionMode::Sexual.is_place_based());
    }

    #[test]
    fn add_and_lookup_conditions() {
        let mut list = ConditionList::new();
        let a = list.add_condition(
            "INF",
            TransmissionMode::Respiratory,
            minimal_nh("INF"),
            0.5,
            ConditionModel::Generic,
        );
        assert_eq!(list.len(), 1);
        assert_eq!(list.name(a), "INF");
        assert_eq!(list.get_condition_id("INF"), Some(a));
        assert_eq!(list.get_condition_id("HIV"), None);
    }

    #[test]
    fn from_params_requires_mode() {
        let params = Params::from_str("conditions INF\nINF.states 2").unwrap();
        assert!(matches!(
            ConditionList::from_params(&params),
            Err(ContagionError::MissingParameter(_))
        ));
    }

    #[test]
    fn from_params_builds_models() {
        let params = Params::from_str(
            "
            conditions INF DRUG
            INF.transmission_mode respiratory
            INF.states 2
            DRUG.transmission_mode none
            DRUG.model markov
            DRUG.states 3
            ",
        )
        .unwrap();
        let list = ConditionList::from_params(&params).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get(0).model.kind_name(), "generic");
        assert_eq!(list.get(1).model.kind_name(), "markov");
        assert_eq!(list.get(1).transmission_mode, TransmissionMode::None);
    }
}
