//! Common types for the cohort model environment.

use crate::error::{CohortError, CohortResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Treatment (strategy) identifier.
pub type Treatment = String;

/// Ordered, de-duplicated list of health state names.
///
/// The name -> index table is built once here and shared by every
/// labeled vector/matrix created over the same state space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct StateSpace {
    names: Vec<String>,
    index: HashMap<String, usize>,
}

impl StateSpace {
    /// Creates a state space, rejecting empty lists, empty names and duplicates.
    pub fn new<I, S>(names: I) -> CohortResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(CohortError::config("state space must contain at least one state"));
        }

        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(CohortError::config(format!("state #{} has an empty name", i)));
            }
            if index.insert(name.clone(), i).is_some() {
                return Err(CohortError::config(format!("duplicate state name '{}'", name)));
            }
        }

        Ok(Self { names, index })
    }

    /// Number of states (N).
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Position of a state, or `UnknownName`.
    pub fn index_of(&self, name: &str) -> CohortResult<usize> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| CohortError::unknown_state(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// State name at a position.
    pub fn name(&self, i: usize) -> &str {
        &self.names[i]
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl TryFrom<Vec<String>> for StateSpace {
    type Error = CohortError;

    fn try_from(names: Vec<String>) -> Result<Self, Self::Error> {
        Self::new(names)
    }
}

impl From<StateSpace> for Vec<String> {
    fn from(space: StateSpace) -> Self {
        space.names
    }
}

/// A parameter as produced by the authoring pipeline: a value plus metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichParameter {
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standard_error: Option<f64>,
}

impl RichParameter {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            description: None,
            distribution: None,
            standard_error: None,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }
}

/// Flattened numeric parameter mapping (name -> value).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: HashMap<String, f64>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the metadata of rich parameters, keeping only their values.
    pub fn flatten(rich: &HashMap<String, RichParameter>) -> Self {
        Self {
            values: rich.iter().map(|(k, p)| (k.clone(), p.value)).collect(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    /// Value of a parameter, or `UnknownName`.
    pub fn get(&self, name: &str) -> CohortResult<f64> {
        self.values
            .get(name)
            .copied()
            .ok_or_else(|| CohortError::unknown_parameter(name))
    }

    pub fn try_get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, f64)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
