//! Scenario runner - executes models and checks the engine invariants.

use crate::bundle::ModelBundle;
use crate::scenarios::ScenarioId;
use cohort_core::{prune_negligible, Metric, SimulationResult};
use cohort_env::{DiscountTiming, OccupancyBasis};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Scenario or bundle name
    pub scenario: String,

    /// Whether every invariant and expectation held
    pub passed: bool,

    /// Cycles per arm
    pub n_cycles: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during the run
    pub metrics: RunMetrics,

    /// Final (possibly pruned) result; absent when the run itself failed
    pub result: Option<SimulationResult>,
}

/// Metrics collected during a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    /// Worst |sum(occupancy) - 1| over all arms and cycles
    pub max_mass_drift: f64,

    /// Worst gap between a total and its breakdowns
    pub reconciliation_error: f64,

    /// Contributor entries dropped by pruning (per arm and metric)
    pub pruned_contributors: usize,

    /// Discounted ICER per comparator (`None` = undefined)
    pub discounted_icers: Vec<(String, Option<f64>)>,
}

/// Runs built-in scenarios or arbitrary bundles.
pub struct ScenarioRunner {
    /// Overrides the bundle's discount timing
    timing: Option<DiscountTiming>,

    /// Overrides the bundle's occupancy basis
    basis: Option<OccupancyBasis>,

    /// Prune negligible contributors with this tolerance
    prune_tolerance: Option<f64>,

    /// Allowed occupancy drift
    mass_tolerance: f64,

    /// Allowed total/breakdown gap
    reconciliation_tolerance: f64,

    /// Run every model twice and require identical results
    determinism_check: bool,
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioRunner {
    pub fn new() -> Self {
        Self {
            timing: None,
            basis: None,
            prune_tolerance: None,
            mass_tolerance: 1e-9,
            reconciliation_tolerance: 1e-6,
            determinism_check: true,
        }
    }

    pub fn with_timing(mut self, timing: DiscountTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    pub fn with_basis(mut self, basis: OccupancyBasis) -> Self {
        self.basis = Some(basis);
        self
    }

    /// Enables pruning of negligible contributors.
    pub fn with_pruning(mut self, tolerance: f64) -> Self {
        self.prune_tolerance = Some(tolerance);
        self
    }

    /// Disables the second run used to check results are reproducible.
    pub fn with_determinism_check(mut self, enabled: bool) -> Self {
        self.determinism_check = enabled;
        self
    }

    fn has_overrides(&self) -> bool {
        self.timing.is_some() || self.basis.is_some()
    }

    /// Runs a built-in scenario, including its own expectations.
    pub fn run(&self, scenario: ScenarioId) -> RunReport {
        info!("Starting scenario: {}", scenario.name());

        let overridden = self.has_overrides();
        if overridden {
            debug!("Settings overridden, skipping scenario-specific expectations");
        }

        self.execute(scenario.name(), scenario.bundle(), |result| {
            if overridden {
                Ok(())
            } else {
                scenario.check(result)
            }
        })
    }

    /// Runs an arbitrary bundle, checking only the engine invariants.
    pub fn run_bundle(&self, bundle: &ModelBundle) -> RunReport {
        info!("Starting bundle: {}", bundle.name);
        self.execute(&bundle.name, bundle.clone(), |_| Ok(()))
    }

    fn execute<F>(&self, name: &str, mut bundle: ModelBundle, check: F) -> RunReport
    where
        F: Fn(&SimulationResult) -> Result<(), String>,
    {
        if let Some(timing) = self.timing {
            bundle.settings.discount_timing = timing;
        }
        if let Some(basis) = self.basis {
            bundle.settings.occupancy_basis = basis;
        }

        let mut report = RunReport {
            scenario: name.to_string(),
            passed: false,
            n_cycles: 0,
            failure_reason: None,
            metrics: RunMetrics::default(),
            result: None,
        };

        let outcome = bundle
            .simulator()
            .and_then(|sim| Ok((sim.run()?, sim)));
        let (result, simulator) = match outcome {
            Ok(pair) => pair,
            Err(e) => {
                report.failure_reason = Some(e.to_string());
                return report;
            }
        };

        report.n_cycles = result.n_cycles();
        report.metrics.max_mass_drift = result.max_mass_drift();
        report.metrics.reconciliation_error = result.reconciliation_error();
        report.metrics.discounted_icers = result
            .icer
            .discounted
            .comparisons
            .iter()
            .map(|c| (c.comparator.clone(), c.icer))
            .collect();

        let failure = if report.metrics.max_mass_drift > self.mass_tolerance {
            Some(format!(
                "occupancy drift {:.3e} exceeds {:.0e}",
                report.metrics.max_mass_drift, self.mass_tolerance
            ))
        } else if report.metrics.reconciliation_error > self.reconciliation_tolerance {
            Some(format!(
                "totals do not reconcile with breakdowns (gap {:.3e})",
                report.metrics.reconciliation_error
            ))
        } else if self.determinism_check && simulator.run().ok().as_ref() != Some(&result) {
            Some("repeated run produced a different result".to_string())
        } else {
            check(&result).err()
        };

        let result = match self.prune_tolerance {
            Some(tol) => {
                let pruned = prune_negligible(&result, tol);
                report.metrics.pruned_contributors = count_contributors(&result) - count_contributors(&pruned);
                pruned
            }
            None => result,
        };

        if let Some(reason) = failure {
            warn!("{} failed: {}", name, reason);
            report.failure_reason = Some(reason);
        } else {
            report.passed = true;
        }
        report.result = Some(result);
        report
    }
}

fn count_contributors(result: &SimulationResult) -> usize {
    result
        .per_treatment
        .iter()
        .map(|arm| arm.contributors(Metric::Cost).len() + arm.contributors(Metric::Outcome).len())
        .sum()
}
