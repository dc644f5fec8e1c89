//! Run settings: cycle timing, discounting and initial occupancy.

use crate::error::{CohortError, CohortResult};
use crate::types::{StateSpace, Treatment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Tolerance for "time horizon is an integer multiple of cycle length".
pub const CYCLE_COUNT_TOLERANCE: f64 = 1e-6;

/// Tolerance for initial occupancy summing to one.
pub const OCCUPANCY_SUM_TOLERANCE: f64 = 1e-6;

/// Point within a cycle at which discounting time is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum DiscountTiming {
    /// t = cycle * length
    Start,
    /// t = (cycle + 0.5) * length
    #[default]
    Mid,
    /// t = (cycle + 1) * length
    End,
}

impl DiscountTiming {
    /// Elapsed years used for discounting the given cycle.
    pub fn time_at(self, cycle: usize, cycle_length_years: f64) -> f64 {
        let c = cycle as f64;
        match self {
            DiscountTiming::Start => c * cycle_length_years,
            DiscountTiming::Mid => (c + 0.5) * cycle_length_years,
            DiscountTiming::End => (c + 1.0) * cycle_length_years,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiscountTiming::Start => "start",
            DiscountTiming::Mid => "mid",
            DiscountTiming::End => "end",
        }
    }
}

impl fmt::Display for DiscountTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DiscountTiming {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(DiscountTiming::Start),
            "mid" => Ok(DiscountTiming::Mid),
            "end" => Ok(DiscountTiming::End),
            other => Err(CohortError::config(format!(
                "discount timing must be 'start', 'mid' or 'end', got '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for DiscountTiming {
    type Error = CohortError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Which occupancy vector occupation impacts and occupancy time apply to.
///
/// Flow impacts are always computed from the start-of-cycle occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum OccupancyBasis {
    /// Occupancy at the start of the cycle.
    #[default]
    Start,
    /// Occupancy after this cycle's transition.
    End,
    /// Average of start and end occupancy (half-cycle correction).
    HalfCycle,
}

impl OccupancyBasis {
    pub fn name(&self) -> &'static str {
        match self {
            OccupancyBasis::Start => "start",
            OccupancyBasis::End => "end",
            OccupancyBasis::HalfCycle => "half_cycle",
        }
    }
}

impl fmt::Display for OccupancyBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for OccupancyBasis {
    type Err = CohortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "start" => Ok(OccupancyBasis::Start),
            "end" => Ok(OccupancyBasis::End),
            "half_cycle" | "halfcycle" | "half" => Ok(OccupancyBasis::HalfCycle),
            other => Err(CohortError::config(format!(
                "occupancy basis must be 'start', 'end' or 'half_cycle', got '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<String> for OccupancyBasis {
    type Error = CohortError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Calendar unit used by authored settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Days,
    Weeks,
    Months,
    Years,
}

impl TimeUnit {
    /// Length of one unit in years.
    pub fn years(self) -> f64 {
        match self {
            TimeUnit::Days => 1.0 / 365.25,
            TimeUnit::Weeks => 7.0 / 365.25,
            TimeUnit::Months => 1.0 / 12.0,
            TimeUnit::Years => 1.0,
        }
    }
}

/// A length of time in authored units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Period {
    pub value: f64,
    pub unit: TimeUnit,
}

impl Period {
    pub fn new(value: f64, unit: TimeUnit) -> Self {
        Self { value, unit }
    }

    pub fn in_years(&self) -> f64 {
        self.value * self.unit.years()
    }
}

/// Number of whole cycles in a horizon, failing if it is not an exact multiple.
pub fn cycle_count(time_horizon_years: f64, cycle_length_years: f64) -> CohortResult<usize> {
    if !(cycle_length_years > 0.0) || !cycle_length_years.is_finite() {
        return Err(CohortError::config(format!(
            "cycle length must be > 0, got {}",
            cycle_length_years
        )));
    }
    if !(time_horizon_years > 0.0) || !time_horizon_years.is_finite() {
        return Err(CohortError::config(format!(
            "time horizon must be > 0, got {}",
            time_horizon_years
        )));
    }

    let exact = time_horizon_years / cycle_length_years;
    let rounded = exact.round();
    if (exact - rounded).abs() > CYCLE_COUNT_TOLERANCE {
        return Err(CohortError::config(format!(
            "time horizon ({} years) is not an integer multiple of cycle length ({} years)",
            time_horizon_years, cycle_length_years
        )));
    }

    if rounded < 1.0 {
        return Err(CohortError::config(format!(
            "time horizon ({} years) is shorter than one cycle ({} years)",
            time_horizon_years, cycle_length_years
        )));
    }

    Ok(rounded as usize)
}

/// Configuration for a single deterministic run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Cycle duration in years
    pub cycle_length_years: f64,

    /// Model horizon in years (integer multiple of the cycle length)
    pub time_horizon_years: f64,

    /// Annual discount rate applied to costs
    pub cost_discount_rate: f64,

    /// Annual discount rate applied to outcomes and occupancy time
    pub outcome_discount_rate: f64,

    #[serde(default)]
    pub discount_timing: DiscountTiming,

    #[serde(default)]
    pub occupancy_basis: OccupancyBasis,

    /// treatment -> state -> proportion; states left out start empty
    #[serde(default)]
    pub initial_occupancy: BTreeMap<Treatment, BTreeMap<String, f64>>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            cycle_length_years: 1.0,
            time_horizon_years: 10.0,
            cost_discount_rate: 0.035,
            outcome_discount_rate: 0.035,
            discount_timing: DiscountTiming::Mid,
            occupancy_basis: OccupancyBasis::Start,
            initial_occupancy: BTreeMap::new(),
        }
    }
}

impl RunSettings {
    /// Sets cycle length and horizon (both in years).
    pub fn with_timeline(mut self, cycle_length_years: f64, time_horizon_years: f64) -> Self {
        self.cycle_length_years = cycle_length_years;
        self.time_horizon_years = time_horizon_years;
        self
    }

    /// Sets the two annual discount rates.
    pub fn with_discount_rates(mut self, cost: f64, outcome: f64) -> Self {
        self.cost_discount_rate = cost;
        self.outcome_discount_rate = outcome;
        self
    }

    pub fn with_timing(mut self, timing: DiscountTiming) -> Self {
        self.discount_timing = timing;
        self
    }

    pub fn with_basis(mut self, basis: OccupancyBasis) -> Self {
        self.occupancy_basis = basis;
        self
    }

    /// Sets the initial distribution of one treatment arm.
    pub fn with_initial_occupancy<I, S>(mut self, treatment: &str, occupancy: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        self.initial_occupancy.insert(
            treatment.to_string(),
            occupancy.into_iter().map(|(s, p)| (s.into(), p)).collect(),
        );
        self
    }

    /// Number of cycles in the horizon.
    pub fn n_cycles(&self) -> CohortResult<usize> {
        cycle_count(self.time_horizon_years, self.cycle_length_years)
    }

    /// Checks everything that can be checked before the first cycle.
    pub fn validate(&self, states: &StateSpace, treatments: &[Treatment]) -> CohortResult<()> {
        self.n_cycles()?;

        for (label, rate) in [
            ("cost", self.cost_discount_rate),
            ("outcome", self.outcome_discount_rate),
        ] {
            if !rate.is_finite() || rate <= -1.0 {
                return Err(CohortError::config(format!(
                    "{} discount rate must be finite and > -1, got {}",
                    label, rate
                )));
            }
        }

        for treatment in treatments {
            self.initial_vector(treatment, states)?;
        }

        Ok(())
    }

    /// Initial occupancy of a treatment arm in state order.
    pub fn initial_vector(&self, treatment: &str, states: &StateSpace) -> CohortResult<Vec<f64>> {
        let occupancy = self.initial_occupancy.get(treatment).ok_or_else(|| {
            CohortError::config(format!("missing initial occupancy for treatment '{}'", treatment))
        })?;

        let mut vector = vec![0.0; states.len()];
        for (state, &share) in occupancy {
            let i = states.index_of(state).map_err(|_| {
                CohortError::config(format!(
                    "initial occupancy for treatment '{}' names unknown state '{}'",
                    treatment, state
                ))
            })?;
            if !share.is_finite() || share < 0.0 {
                return Err(CohortError::config(format!(
                    "initial occupancy for treatment '{}' in state '{}' must be a non-negative number, got {}",
                    treatment, state, share
                )));
            }
            vector[i] = share;
        }

        let sum: f64 = vector.iter().sum();
        if (sum - 1.0).abs() > OCCUPANCY_SUM_TOLERANCE {
            return Err(CohortError::config(format!(
                "initial occupancy for treatment '{}' sums to {}, expected 1",
                treatment, sum
            )));
        }

        Ok(vector)
    }
}
