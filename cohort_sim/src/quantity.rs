//! Declarative values used by bundle rules: quantities and cycle windows.

use cohort_env::{CohortError, CohortResult, CycleContext};
use serde::{Deserialize, Serialize};

/// Context value usable as a parameter name without declaring it.
pub const RESERVED_NAMES: [&str; 2] = ["cycle_length_years", "time_horizon_years"];

/// A number, a parameter name, or the product of a list of quantities.
///
/// ```json
/// 0.25
/// "p_progress"
/// [-1.0, "disutility", "cycle_length_years"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Quantity {
    Constant(f64),
    Param(String),
    Product(Vec<Quantity>),
}

impl Quantity {
    /// Evaluates the quantity against a cycle context.
    ///
    /// Declared parameters shadow the reserved context names.
    pub fn resolve(&self, ctx: &CycleContext<'_>) -> CohortResult<f64> {
        match self {
            Quantity::Constant(v) => Ok(*v),
            Quantity::Param(name) => {
                if let Some(v) = ctx.params.try_get(name) {
                    return Ok(v);
                }
                match name.as_str() {
                    "cycle_length_years" => Ok(ctx.cycle_length_years),
                    "time_horizon_years" => Ok(ctx.time_horizon_years),
                    _ => Err(CohortError::unknown_parameter(name.as_str())),
                }
            }
            Quantity::Product(items) => items
                .iter()
                .try_fold(1.0, |acc, q| q.resolve(ctx).map(|v| acc * v)),
        }
    }

    /// Every parameter name the quantity refers to.
    pub fn parameter_names(&self) -> Vec<&str> {
        match self {
            Quantity::Constant(_) => Vec::new(),
            Quantity::Param(name) => vec![name.as_str()],
            Quantity::Product(items) => items.iter().flat_map(Quantity::parameter_names).collect(),
        }
    }
}

impl From<f64> for Quantity {
    fn from(v: f64) -> Self {
        Quantity::Constant(v)
    }
}

impl From<&str> for Quantity {
    fn from(name: &str) -> Self {
        Quantity::Param(name.to_string())
    }
}

/// Inclusive cycle range `[first, last]`; `last = null` leaves it open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleWindow(pub usize, pub Option<usize>);

impl CycleWindow {
    pub fn only(cycle: usize) -> Self {
        Self(cycle, Some(cycle))
    }

    pub fn starting(first: usize) -> Self {
        Self(first, None)
    }

    pub fn contains(&self, cycle: usize) -> bool {
        cycle >= self.0 && self.1.map_or(true, |last| cycle <= last)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.1, Some(last) if last < self.0)
    }
}

/// Optional treatment filter and cycle window shared by rules and event entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatments: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cycles: Option<CycleWindow>,
}

impl Scope {
    pub fn applies(&self, ctx: &CycleContext<'_>) -> bool {
        let treatment_ok = self
            .treatments
            .as_ref()
            .map_or(true, |ts| ts.iter().any(|t| t == ctx.treatment));
        let cycle_ok = self.cycles.map_or(true, |w| w.contains(ctx.cycle));
        treatment_ok && cycle_ok
    }
}
