//! Model bundle: the JSON document describing one complete model.

use crate::error::{SimError, SimResult};
use crate::events::EventDefinition;
use crate::oracle::{TableOracle, TransitionRule};
use crate::quantity::{Quantity, Scope, RESERVED_NAMES};
use cohort_core::CohortSimulator;
use cohort_env::{
    DiscountTiming, OccupancyBasis, ParameterSet, Period, RichParameter, RunSettings, StateSpace,
    Treatment,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Timeline, discounting and starting cohort as authored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSettings {
    pub time_horizon: Period,

    pub cycle_length: Period,

    pub cost_discount_rate: f64,

    pub outcome_discount_rate: f64,

    #[serde(default)]
    pub discount_timing: DiscountTiming,

    #[serde(default)]
    pub occupancy_basis: OccupancyBasis,

    /// treatment -> state -> proportion
    pub initial_occupancy: BTreeMap<Treatment, BTreeMap<String, f64>>,
}

impl BundleSettings {
    /// Engine settings with every period converted to years.
    pub fn to_run_settings(&self) -> RunSettings {
        RunSettings {
            cycle_length_years: self.cycle_length.in_years(),
            time_horizon_years: self.time_horizon.in_years(),
            cost_discount_rate: self.cost_discount_rate,
            outcome_discount_rate: self.outcome_discount_rate,
            discount_timing: self.discount_timing,
            occupancy_basis: self.occupancy_basis,
            initial_occupancy: self.initial_occupancy.clone(),
        }
    }
}

/// A complete model: states, treatments, parameters, settings, transitions and events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBundle {
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub health_states: Vec<String>,

    pub treatments: Vec<Treatment>,

    #[serde(default)]
    pub parameters: HashMap<String, RichParameter>,

    pub settings: BundleSettings,

    pub transitions: Vec<TransitionRule>,

    #[serde(default)]
    pub events: Vec<EventDefinition>,
}

impl ModelBundle {
    /// Parses a bundle. Unknown discount timing or occupancy basis values
    /// are reported as engine config errors rather than JSON errors.
    pub fn from_json_str(json: &str) -> SimResult<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        if let Some(timing) = value.pointer("/settings/discount_timing").and_then(|v| v.as_str()) {
            timing.parse::<DiscountTiming>()?;
        }
        if let Some(basis) = value.pointer("/settings/occupancy_basis").and_then(|v| v.as_str()) {
            basis.parse::<OccupancyBasis>()?;
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn to_json_string(&self) -> SimResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn state_space(&self) -> SimResult<StateSpace> {
        Ok(StateSpace::new(self.health_states.iter().cloned())?)
    }

    /// Parameter values with metadata dropped.
    pub fn flat_parameters(&self) -> ParameterSet {
        ParameterSet::flatten(&self.parameters)
    }

    pub fn run_settings(&self) -> RunSettings {
        self.settings.to_run_settings()
    }

    /// Checks every name the rules and events refer to.
    ///
    /// Engine-level checks (occupancy sums, cycle count, rates) are left to
    /// [`CohortSimulator::validate`].
    pub fn validate(&self) -> SimResult<()> {
        let states = self.state_space()?;
        let treatments: HashSet<&str> = self.treatments.iter().map(String::as_str).collect();

        let check_state = |state: &str, owner: &str| -> SimResult<()> {
            if states.contains(state) {
                Ok(())
            } else {
                Err(SimError::bundle(format!("{} refers to unknown state '{}'", owner, state)))
            }
        };
        let check_quantity = |q: &Quantity, owner: &str| -> SimResult<()> {
            for name in q.parameter_names() {
                if !self.parameters.contains_key(name) && !RESERVED_NAMES.contains(&name) {
                    return Err(SimError::bundle(format!(
                        "{} refers to unknown parameter '{}'",
                        owner, name
                    )));
                }
            }
            Ok(())
        };
        let check_scope = |scope: &Scope, owner: &str| -> SimResult<()> {
            for t in scope.treatments.iter().flatten() {
                if !treatments.contains(t.as_str()) {
                    return Err(SimError::bundle(format!("{} refers to unknown treatment '{}'", owner, t)));
                }
            }
            if scope.cycles.map_or(false, |w| w.is_empty()) {
                return Err(SimError::bundle(format!("{} has an empty cycle window", owner)));
            }
            Ok(())
        };

        for (i, rule) in self.transitions.iter().enumerate() {
            let owner = format!("transition #{} ({} -> {})", i, rule.from, rule.to);
            check_state(&rule.from, &owner)?;
            check_state(&rule.to, &owner)?;
            check_scope(&rule.scope, &owner)?;
            match (&rule.probability, rule.complement) {
                (Some(q), false) => check_quantity(q, &owner)?,
                (None, true) => {}
                _ => {
                    return Err(SimError::bundle(format!(
                        "{} must have exactly one of 'probability' or 'complement'",
                        owner
                    )))
                }
            }
        }

        for event in &self.events {
            let owner = format!("event '{}'", event.name);
            for t in event.treatments.iter().flatten() {
                if !treatments.contains(t.as_str()) {
                    return Err(SimError::bundle(format!("{} refers to unknown treatment '{}'", owner, t)));
                }
            }
            for entry in &event.entries {
                for state in entry.states() {
                    check_state(state, &owner)?;
                }
                check_quantity(&entry.amount, &owner)?;
                check_scope(&entry.scope, &owner)?;
            }
        }

        debug!(
            model = %self.name,
            rules = self.transitions.len(),
            events = self.events.len(),
            "Bundle validated"
        );
        Ok(())
    }

    /// Builds a ready-to-run simulator from the bundle.
    pub fn simulator(&self) -> SimResult<CohortSimulator> {
        self.validate()?;
        let simulator = CohortSimulator::new(
            self.state_space()?,
            self.treatments.iter().cloned(),
            TableOracle::new(self.transitions.clone()),
        )
        .with_params(self.flat_parameters())
        .with_settings(self.run_settings())
        .with_contributors(self.events.iter().map(EventDefinition::to_contributor));

        simulator.validate()?;
        Ok(simulator)
    }
}
