//! The run-property reader.
//!
//! Properties are whitespace-delimited `key value...` lines; `#` starts
//! a comment and a later occurrence of a key overrides an earlier one.
//! Keys may be indexed (`INF.state[2].infectivity`) and values may be
//! vectors (every token after the key). The engine requires a small set
//! of keys (`simulation_days`, `conditions`, per-condition
//! `transmission_mode`) and treats everything else as optional: when
//! abort-on-failure is disabled a missing optional key reads as absent,
//! otherwise it is a configuration error surfaced before `update(0)`.

use std::cell::Cell;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::ContagionError;
use crate::hash::HashMap;

#[derive(Debug, Default)]
pub struct Params {
    values: HashMap<String, Vec<String>>,
    abort_on_failure: Cell<bool>,
}

impl Params {
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: HashMap::default(),
            abort_on_failure: Cell::new(true),
        }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ContagionError> {
        let text = fs::read_to_string(path)?;
        Self::from_str(&text)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self, ContagionError> {
        let mut params = Params::new();
        for line in text.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let key = tokens.next().unwrap();
            let value: Vec<String> = tokens.map(str::to_string).collect();
            if value.is_empty() {
                return Err(ContagionError::ContagionError(format!(
                    "property {key} has no value"
                )));
            }
            params.values.insert(key.to_string(), value);
        }
        Ok(params)
    }

    /// Sets a property programmatically, overriding any file value.
    pub fn set(&mut self, key: &str, value: &str) {
        self.values.insert(
            key.to_string(),
            value.split_whitespace().map(str::to_string).collect(),
        );
    }

    /// While disabled, reads of missing optional keys return `Ok(None)`
    /// instead of failing.
    pub fn disable_abort_on_failure(&self) {
        self.abort_on_failure.set(false);
    }

    pub fn set_abort_on_failure(&self) {
        self.abort_on_failure.set(true);
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn lookup(&self, key: &str) -> Result<Option<&Vec<String>>, ContagionError> {
        match self.values.get(key) {
            Some(v) => Ok(Some(v)),
            None if self.abort_on_failure.get() => {
                Err(ContagionError::MissingParameter(key.to_string()))
            }
            None => Ok(None),
        }
    }

    fn parse_one<T: FromStr>(key: &str, raw: &str) -> Result<T, ContagionError> {
        raw.parse().map_err(|_| {
            ContagionError::ContagionError(format!("property {key}: cannot parse {raw:?}"))
        })
    }

    pub fn get_scalar<T: FromStr>(&self, key: &str) -> Result<Option<T>, ContagionError> {
        match self.lookup(key)? {
            Some(tokens) => Ok(Some(Self::parse_one(key, &tokens[0])?)),
            None => Ok(None),
        }
    }

    pub fn get_str(&self, key: &str) -> Result<Option<String>, ContagionError> {
        Ok(self.lookup(key)?.map(|tokens| tokens.join(" ")))
    }

    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, ContagionError> {
        self.get_scalar(key)
    }

    pub fn get_u32(&self, key: &str) -> Result<Option<u32>, ContagionError> {
        self.get_scalar(key)
    }

    pub fn get_usize(&self, key: &str) -> Result<Option<usize>, ContagionError> {
        self.get_scalar(key)
    }

    /// Booleans are written as `0`/`1` in property files.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ContagionError> {
        Ok(self.get_scalar::<u8>(key)?.map(|v| v != 0))
    }

    pub fn get_vec_f64(&self, key: &str) -> Result<Option<Vec<f64>>, ContagionError> {
        match self.lookup(key)? {
            Some(tokens) => {
                let mut out = Vec::with_capacity(tokens.len());
                for t in tokens {
                    out.push(Self::parse_one(key, t)?);
                }
                Ok(Some(out))
            }
            None => Ok(None),
        }
    }

    pub fn get_vec_str(&self, key: &str) -> Result<Option<Vec<String>>, ContagionError> {
        Ok(self.lookup(key)?.cloned())
    }

    // Required keys fail regardless of the abort flag.

    pub fn require_str(&self, key: &str) -> Result<String, ContagionError> {
        self.values
            .get(key)
            .map(|tokens| tokens.join(" "))
            .ok_or_else(|| ContagionError::MissingParameter(key.to_string()))
    }

    pub fn require_scalar<T: FromStr>(&self, key: &str) -> Result<T, ContagionError> {
        let tokens = self
            .values
            .get(key)
            .ok_or_else(|| ContagionError::MissingParameter(key.to_string()))?;
        Self::parse_one(key, &tokens[0])
    }

    pub fn require_u32(&self, key: &str) -> Result<u32, ContagionError> {
        self.require_scalar(key)
    }

    pub fn require_vec_str(&self, key: &str) -> Result<Vec<String>, ContagionError> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| ContagionError::MissingParameter(key.to_string()))
    }

    // Defaulted reads are explicitly optional and ignore the abort flag.

    pub fn get_f64_or(&self, key: &str, default: f64) -> Result<f64, ContagionError> {
        match self.values.get(key) {
            Some(tokens) => Self::parse_one(key, &tokens[0]),
            None => Ok(default),
        }
    }

    pub fn get_u32_or(&self, key: &str, default: u32) -> Result<u32, ContagionError> {
        match self.values.get(key) {
            Some(tokens) => Self::parse_one(key, &tokens[0]),
            None => Ok(default),
        }
    }

    pub fn get_usize_or(&self, key: &str, default: usize) -> Result<usize, ContagionError> {
        match self.values.get(key) {
            Some(tokens) => Self::parse_one(key, &tokens[0]),
            None => Ok(default),
        }
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool, ContagionError> {
        match self.values.get(key) {
            Some(tokens) => Ok(Self::parse_one::<u8>(key, &tokens[0])? != 0),
            None => Ok(default),
        }
    }

    pub fn get_str_or(&self, key: &str, default: &str) -> String {
        self.values
            .get(key)
            .map_or_else(|| default.to_string(), |tokens| tokens.join(" "))
    }
}

/// Formats an indexed property key, e.g. `indexed_key("INF.state", 2,
/// "infectivity")` is `INF.state[2].infectivity`.
#[must_use]
pub fn indexed_key(base: &str, index: usize, prop: &str) -> String {
    format!("{base}[{index}].{prop}")
}

/// Formats a matrix property key, e.g. `INF.group[0].trans[1][2]`.
#[must_use]
pub fn matrix_key(name: &str, group: usize, i: usize, j: usize) -> String {
    format!("{name}.group[{group}].trans[{i}][{j}]")
}
