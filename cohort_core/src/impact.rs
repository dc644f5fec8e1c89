//! Impacts and the impact aggregator.
//!
//! An [`Impact`] is one contributor's effect for one (cycle, treatment):
//! per-unit-occupancy effects on cost and outcome, plus per-unit-flow effects
//! indexed by (origin, destination).

use crate::contributor::Contributor;
use crate::labeled::{LabeledMatrix, LabeledVector};
use cohort_env::{CohortError, CohortResult, EventContext, ParameterSet, RunSettings, StateSpace};
use std::sync::Arc;
use tracing::trace;

/// The four accrual components of one contributor.
#[derive(Debug, Clone, PartialEq)]
pub struct Impact {
    pub cost_occupation: LabeledVector,
    pub outcome_occupation: LabeledVector,
    pub cost_flow: LabeledMatrix,
    pub outcome_flow: LabeledMatrix,
}

/// Zero impact over `states`.
pub fn initialise_impact(states: &Arc<StateSpace>) -> Impact {
    Impact::zeros(states)
}

impl Impact {
    pub fn zeros(states: &Arc<StateSpace>) -> Self {
        Self {
            cost_occupation: LabeledVector::zeros(states),
            outcome_occupation: LabeledVector::zeros(states),
            cost_flow: LabeledMatrix::zeros(states),
            outcome_flow: LabeledMatrix::zeros(states),
        }
    }

    /// In-place sum of another impact's components into this one.
    pub fn accumulate(&mut self, other: &Impact) {
        *self.cost_occupation.as_array_mut() += other.cost_occupation.as_array();
        *self.outcome_occupation.as_array_mut() += other.outcome_occupation.as_array();
        *self.cost_flow.as_array_mut() += other.cost_flow.as_array();
        *self.outcome_flow.as_array_mut() += other.outcome_flow.as_array();
    }

    /// Fails unless every component is laid out over `states`.
    pub fn check_states(&self, states: &Arc<StateSpace>) -> CohortResult<()> {
        let components = [
            ("cost_occupation", self.cost_occupation.states()),
            ("outcome_occupation", self.outcome_occupation.states()),
            ("cost_flow", self.cost_flow.states()),
            ("outcome_flow", self.outcome_flow.states()),
        ];

        for (label, own) in components {
            if !Arc::ptr_eq(own, states) && own.names() != states.names() {
                return Err(CohortError::shape(format!(
                    "impact component '{}' is laid out over {} states that differ from the model's {}",
                    label,
                    own.len(),
                    states.len()
                )));
            }
        }
        Ok(())
    }

    /// First NaN or infinite entry as (component, position, value).
    pub fn first_non_finite(&self) -> Option<(&'static str, String, f64)> {
        let vectors = [
            ("cost_occupation", &self.cost_occupation),
            ("outcome_occupation", &self.outcome_occupation),
        ];
        for (label, v) in vectors {
            if let Some((state, value)) = v.iter().find(|(_, x)| !x.is_finite()) {
                return Some((label, format!("'{}'", state), value));
            }
        }

        let matrices = [("cost_flow", &self.cost_flow), ("outcome_flow", &self.outcome_flow)];
        for (label, m) in matrices {
            let data = m.as_array();
            let states = m.states();
            for i in 0..data.nrows() {
                for j in 0..data.ncols() {
                    let value = data[(i, j)];
                    if !value.is_finite() {
                        return Some((
                            label,
                            format!("'{}' -> '{}'", states.name(i), states.name(j)),
                            value,
                        ));
                    }
                }
            }
        }
        None
    }

    pub fn is_zero(&self) -> bool {
        self.cost_occupation.as_array().iter().all(|v| *v == 0.0)
            && self.outcome_occupation.as_array().iter().all(|v| *v == 0.0)
            && self.cost_flow.as_array().iter().all(|v| *v == 0.0)
            && self.outcome_flow.as_array().iter().all(|v| *v == 0.0)
    }
}

/// Aggregated impacts for one (cycle, treatment).
#[derive(Debug, Clone)]
pub struct CompiledImpacts {
    /// Sum over every applicable contributor
    pub total: Impact,

    /// Each applicable contributor's own impact, in contributor order
    pub per_contributor: Vec<(String, Impact)>,
}

impl CompiledImpacts {
    /// Impact of a single contributor, if it was evaluated.
    pub fn contributor(&self, name: &str) -> Option<&Impact> {
        self.per_contributor
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, impact)| impact)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.per_contributor.iter().map(|(n, _)| n.as_str())
    }
}

/// Evaluates every applicable contributor for one (cycle, treatment).
pub fn compile_impacts(
    states: &Arc<StateSpace>,
    treatment: &str,
    cycle: usize,
    params: &ParameterSet,
    contributors: &[Contributor],
    settings: &RunSettings,
) -> CohortResult<CompiledImpacts> {
    let ctx = EventContext {
        cycle,
        treatment,
        params,
        states,
        cycle_length_years: settings.cycle_length_years,
        time_horizon_years: settings.time_horizon_years,
    };
    compile_with_context(&ctx, contributors)
}

/// Same as [`compile_impacts`] with an already built context.
pub fn compile_with_context(
    ctx: &EventContext<'_>,
    contributors: &[Contributor],
) -> CohortResult<CompiledImpacts> {
    let mut total = Impact::zeros(ctx.states);
    let mut per_contributor = Vec::with_capacity(contributors.len());

    for contributor in contributors {
        if !contributor.applies(ctx.treatment) {
            continue;
        }

        let impact = contributor.calculate(ctx)?;
        impact.check_states(ctx.states)?;
        if let Some((component, at, value)) = impact.first_non_finite() {
            return Err(CohortError::Contributor {
                name: contributor.name().to_string(),
                treatment: ctx.treatment.to_string(),
                cycle: ctx.cycle,
                source: format!("non-finite {} entry {} at {}", component, value, at).into(),
            });
        }
        total.accumulate(&impact);

        trace!(
            contributor = contributor.name(),
            cycle = ctx.cycle,
            treatment = ctx.treatment,
            "impact compiled"
        );
        per_contributor.push((contributor.name().to_string(), impact));
    }

    Ok(CompiledImpacts {
        total,
        per_contributor,
    })
}
