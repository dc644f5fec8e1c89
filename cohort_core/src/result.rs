//! Frozen simulation results.

use crate::accrual::{worst_gap, AccrualTotals, DiscountKind, LifeYears, Metric};
use crate::contributor::ContributorInfo;
use crate::discount::CycleDiscount;
use crate::icer::IcerReport;
use cohort_env::RunSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result block of one treatment arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentResult {
    pub treatment: String,

    /// Occupancy at cycle 0 (initial) through cycle n (after the last transition)
    pub occupancy_by_cycle: Vec<BTreeMap<String, f64>>,

    pub undiscounted: AccrualTotals,

    pub discounted: AccrualTotals,

    pub occupancy_time: LifeYears,

    /// Contributors still reported in the cost breakdowns
    pub cost_contributors: Vec<String>,

    /// Contributors still reported in the outcome breakdowns
    pub outcome_contributors: Vec<String>,
}

impl TreatmentResult {
    pub fn totals(&self, kind: DiscountKind) -> &AccrualTotals {
        match kind {
            DiscountKind::Undiscounted => &self.undiscounted,
            DiscountKind::Discounted => &self.discounted,
        }
    }

    pub fn totals_mut(&mut self, kind: DiscountKind) -> &mut AccrualTotals {
        match kind {
            DiscountKind::Undiscounted => &mut self.undiscounted,
            DiscountKind::Discounted => &mut self.discounted,
        }
    }

    /// Cumulative grand total of one metric.
    pub fn total(&self, kind: DiscountKind, metric: Metric) -> f64 {
        self.totals(kind).metric(metric).cumulative.total
    }

    pub fn contributors(&self, metric: Metric) -> &[String] {
        match metric {
            Metric::Cost => &self.cost_contributors,
            Metric::Outcome => &self.outcome_contributors,
        }
    }

    /// Occupancy of `state` at the start of `cycle` (`cycle == n` is the final vector).
    pub fn occupancy_at(&self, cycle: usize, state: &str) -> Option<f64> {
        self.occupancy_by_cycle.get(cycle)?.get(state).copied()
    }

    pub fn n_cycles(&self) -> usize {
        self.occupancy_by_cycle.len().saturating_sub(1)
    }

    /// Largest |sum(occupancy) - 1| along the trajectory.
    pub fn max_mass_drift(&self) -> f64 {
        worst_gap(
            self.occupancy_by_cycle
                .iter()
                .map(|s| (s.values().sum::<f64>() - 1.0).abs()),
        )
    }

    pub fn reconciliation_error(&self) -> f64 {
        worst_gap([
            self.undiscounted.reconciliation_gap(),
            self.discounted.reconciliation_gap(),
        ])
    }
}

/// Result of a full run over every treatment arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    pub settings: RunSettings,

    pub states: Vec<String>,

    /// Treatments in run order; the first is the ICER reference
    pub treatments: Vec<String>,

    pub contributors: Vec<ContributorInfo>,

    pub discount_schedule: Vec<CycleDiscount>,

    pub per_treatment: Vec<TreatmentResult>,

    pub icer: IcerReport,
}

impl SimulationResult {
    pub fn treatment(&self, name: &str) -> Option<&TreatmentResult> {
        self.per_treatment.iter().find(|r| r.treatment == name)
    }

    pub fn n_cycles(&self) -> usize {
        self.discount_schedule.len()
    }

    /// Worst gap between any total and its breakdown sums, over every arm,
    /// cycle, metric and discounting kind.
    pub fn reconciliation_error(&self) -> f64 {
        worst_gap(self.per_treatment.iter().map(TreatmentResult::reconciliation_error))
    }

    /// Worst occupancy mass drift over every arm and cycle.
    pub fn max_mass_drift(&self) -> f64 {
        worst_gap(self.per_treatment.iter().map(TreatmentResult::max_mass_drift))
    }
}
