//! Hyperparameter grids
//!
//! Grids keep their declaration order: candidate enumeration order is part of
//! the tie-breaking contract for grid search, so no map types are used here.

use crate::error::{AnomalyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Str(String),
    Null,
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Str(v) => write!(f, "{v}"),
            ParamValue::Null => write!(f, "null"),
        }
    }
}

/// One concrete parameter assignment drawn from a grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamSet {
    entries: Vec<(String, ParamValue)>,
}

impl ParamSet {
    pub fn new(entries: Vec<(String, ParamValue)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn get_f64(&self, name: &str) -> Result<f64> {
        match self.get(name) {
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            Some(other) => Err(invalid(name, other, "expected a number")),
            None => Err(missing(name)),
        }
    }

    pub fn get_usize(&self, name: &str) -> Result<usize> {
        match self.get(name) {
            Some(ParamValue::Int(v)) if *v >= 0 => Ok(*v as usize),
            Some(other) => Err(invalid(name, other, "expected a non-negative integer")),
            None => Err(missing(name)),
        }
    }

    /// Null maps to None (an unbounded setting such as max_depth).
    pub fn get_opt_usize(&self, name: &str) -> Result<Option<usize>> {
        match self.get(name) {
            Some(ParamValue::Null) => Ok(None),
            Some(ParamValue::Int(v)) if *v >= 0 => Ok(Some(*v as usize)),
            Some(other) => Err(invalid(name, other, "expected an integer or null")),
            None => Err(missing(name)),
        }
    }

    pub fn get_str(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(ParamValue::Str(v)) => Ok(v),
            Some(other) => Err(invalid(name, other, "expected a string")),
            None => Err(missing(name)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(key, _)| key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compact "k=v, k=v" form for logs and reports.
    pub fn describe(&self) -> String {
        self.entries
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn invalid(name: &str, value: &ParamValue, reason: &str) -> AnomalyError {
    AnomalyError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn missing(name: &str) -> AnomalyError {
    AnomalyError::InvalidParameter {
        name: name.to_string(),
        value: "<missing>".to_string(),
        reason: "parameter not present in grid".to_string(),
    }
}

/// A declaration-ordered hyperparameter grid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    axes: Vec<(String, Vec<ParamValue>)>,
}

impl ParamGrid {
    pub fn new(axes: Vec<(String, Vec<ParamValue>)>) -> Self {
        Self { axes }
    }

    pub fn axes(&self) -> &[(String, Vec<ParamValue>)] {
        &self.axes
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.axes.iter().map(|(key, _)| key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Cartesian product of all axes. The first declared axis varies slowest,
    /// so candidates enumerate in declaration order.
    pub fn candidates(&self) -> Vec<ParamSet> {
        if self.axes.is_empty() {
            return vec![ParamSet::default()];
        }

        let mut sets: Vec<Vec<(String, ParamValue)>> = vec![Vec::new()];
        for (key, values) in &self.axes {
            let mut expanded = Vec::with_capacity(sets.len() * values.len());
            for prefix in &sets {
                for value in values {
                    let mut entry = prefix.clone();
                    entry.push((key.clone(), value.clone()));
                    expanded.push(entry);
                }
            }
            sets = expanded;
        }

        sets.into_iter().map(ParamSet::new).collect()
    }

    /// Reject empty axes and unknown keys up front, before any training runs.
    pub fn validate(&self, recognized: &[&str], model: &str) -> Result<()> {
        for (key, values) in &self.axes {
            if !recognized.contains(&key.as_str()) {
                return Err(AnomalyError::ConfigError(format!(
                    "unknown hyperparameter '{key}' for model '{model}'"
                )));
            }
            if values.is_empty() {
                return Err(AnomalyError::ConfigError(format!(
                    "hyperparameter '{key}' for model '{model}' has no values"
                )));
            }
        }
        Ok(())
    }
}

/// Shorthand for building grid axes.
pub fn floats(values: &[f64]) -> Vec<ParamValue> {
    values.iter().map(|&v| ParamValue::Float(v)).collect()
}

pub fn ints(values: &[i64]) -> Vec<ParamValue> {
    values.iter().map(|&v| ParamValue::Int(v)).collect()
}

pub fn strs(values: &[&str]) -> Vec<ParamValue> {
    values
        .iter()
        .map(|&v| ParamValue::Str(v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_grid() -> ParamGrid {
        ParamGrid::new(vec![
            ("c".to_string(), floats(&[0.1, 1.0])),
            ("loss".to_string(), strs(&["hinge", "squared_hinge"])),
        ])
    }

    #[test]
    fn test_candidates_preserve_declaration_order() {
        let grid = sample_grid();
        let candidates = grid.candidates();
        assert_eq!(candidates.len(), 4);
        // First axis varies slowest
        assert_eq!(candidates[0].get_f64("c").unwrap(), 0.1);
        assert_eq!(candidates[0].get_str("loss").unwrap(), "hinge");
        assert_eq!(candidates[1].get_str("loss").unwrap(), "squared_hinge");
        assert_eq!(candidates[2].get_f64("c").unwrap(), 1.0);
    }

    #[test]
    fn test_empty_grid_yields_single_default() {
        let grid = ParamGrid::default();
        let candidates = grid.candidates();
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].is_empty());
    }

    #[test]
    fn test_validate_rejects_unknown_key() {
        let grid = sample_grid();
        assert!(grid.validate(&["c", "loss"], "linear_svm").is_ok());
        assert!(grid.validate(&["c"], "linear_svm").is_err());
    }

    #[test]
    fn test_validate_rejects_empty_axis() {
        let grid = ParamGrid::new(vec![("alpha".to_string(), Vec::new())]);
        assert!(grid.validate(&["alpha"], "naive_bayes").is_err());
    }

    #[test]
    fn test_null_maps_to_none() {
        let set = ParamSet::new(vec![
            ("max_depth".to_string(), ParamValue::Null),
            ("n_estimators".to_string(), ParamValue::Int(100)),
        ]);
        assert_eq!(set.get_opt_usize("max_depth").unwrap(), None);
        assert_eq!(set.get_usize("n_estimators").unwrap(), 100);
    }

    #[test]
    fn test_describe() {
        let set = ParamSet::new(vec![
            ("c".to_string(), ParamValue::Float(0.1)),
            ("loss".to_string(), ParamValue::Str("hinge".to_string())),
        ]);
        assert_eq!(set.describe(), "c=0.1, loss=hinge");
    }
}
