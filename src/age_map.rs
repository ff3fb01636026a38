//! Age maps: bounded age bands shared by the transition model, the
//! import sampler and the partner matcher.
//!
//! A map is a list of ascending upper bounds; band `i` covers ages in
//! `[bounds[i-1], bounds[i])` with the first band starting at 0. Ages
//! at or beyond the last bound fall in the final band.

use crate::error::ContagionError;

#[derive(Debug, Clone, Default)]
pub struct AgeMap {
    upper_bounds: Vec<f64>,
}

impl AgeMap {
    /// Builds a map from ascending exclusive upper bounds.
    pub fn new(upper_bounds: Vec<f64>) -> Result<Self, ContagionError> {
        if upper_bounds.is_empty() {
            return Err("age map needs at least one bound".into());
        }
        if upper_bounds.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ContagionError::ContagionError(format!(
                "age map bounds must be ascending: {upper_bounds:?}"
            )));
        }
        Ok(Self { upper_bounds })
    }

    /// A single band covering all ages.
    #[must_use]
    pub fn single_group() -> Self {
        Self {
            upper_bounds: vec![f64::MAX],
        }
    }

    #[must_use]
    pub fn groups(&self) -> usize {
        self.upper_bounds.len()
    }

    /// The band containing `age`.
    #[must_use]
    pub fn find_group(&self, age: f64) -> usize {
        for (i, bound) in self.upper_bounds.iter().enumerate() {
            if age < *bound {
                return i;
            }
        }
        self.upper_bounds.len() - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_are_half_open() {
        let map = AgeMap::new(vec![18.0, 65.0, 120.0]).unwrap();
        assert_eq!(map.groups(), 3);
        assert_eq!(map.find_group(0.0), 0);
        assert_eq!(map.find_group(17.9), 0);
        assert_eq!(map.find_group(18.0), 1);
        assert_eq!(map.find_group(64.9), 1);
        assert_eq!(map.find_group(65.0), 2);
    }

    #[test]
    fn final_band_absorbs() {
        let map = AgeMap::new(vec![18.0, 65.0]).unwrap();
        assert_eq!(map.find_group(200.0), 1);
    }

    #[test]
    fn rejects_unordered_bounds() {
        assert!(AgeMap::new(vec![65.0, 18.0]).is_err());
        assert!(AgeMap::new(vec![]).is_err());
    }

    #[test]
    fn single_group_covers_everything() {
        let map = AgeMap::single_group();
        assert_eq!(map.find_group(0.0), 0);
        assert_eq!(map.find_group(99.0), 0);
    }
}
