//! JSON exporter for run results.
//!
//! Writes the complete result (trajectories, ledgers, ICERs) together with
//! the run's pass/fail summary.

use crate::error::SimResult;
use crate::runner::{RunMetrics, RunReport};
use cohort_core::SimulationResult;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Complete run export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultExport {
    /// Scenario or bundle name
    pub model: String,

    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_mass_drift: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation_error: Option<f64>,

    /// Absent when the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<SimulationResult>,
}

impl ResultExport {
    pub fn from_report(report: &RunReport) -> Self {
        let RunMetrics {
            max_mass_drift,
            reconciliation_error,
            ..
        } = report.metrics;
        let ran = report.result.is_some();

        Self {
            model: report.scenario.clone(),
            passed: report.passed,
            failure_reason: report.failure_reason.clone(),
            max_mass_drift: ran.then_some(max_mass_drift),
            reconciliation_error: ran.then_some(reconciliation_error),
            result: report.result.clone(),
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> SimResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    pub fn read_from_file(path: impl AsRef<Path>) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ScenarioRunner;
    use crate::scenarios::ScenarioId;

    #[test]
    fn test_export_round_trips_through_file() {
        let report = ScenarioRunner::new().run(ScenarioId::AliveDead);
        let export = ResultExport::from_report(&report);

        let path = std::env::temp_dir().join(format!("cohort_export_{}.json", std::process::id()));
        export.write_to_file(&path).unwrap();
        let back = ResultExport::read_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert!(back.passed);
        let result = back.result.unwrap();
        assert_eq!(result.states, vec!["Alive".to_string(), "Dead".to_string()]);
        assert_eq!(result.n_cycles(), 3);
        let total = result.treatment("cohort").unwrap().undiscounted.outcome.cumulative.total;
        assert!((total - 2.439).abs() < 1e-9);
    }

    #[test]
    fn test_undefined_icer_exports_as_null() {
        let mut bundle = ScenarioId::AliveDead.bundle();
        bundle.treatments.push("copy".to_string());
        let start = bundle.settings.initial_occupancy["cohort"].clone();
        bundle.settings.initial_occupancy.insert("copy".to_string(), start);

        let report = ScenarioRunner::new().run_bundle(&bundle);
        let json = serde_json::to_value(ResultExport::from_report(&report)).unwrap();

        let comparison = &json["result"]["icer"]["discounted"]["comparisons"][0];
        assert_eq!(comparison["comparator"], "copy");
        assert!(comparison["icer"].is_null());
    }
}
