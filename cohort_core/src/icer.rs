//! Incremental cost-effectiveness ratios against a reference treatment.
//!
//! The first treatment is the reference. Deltas are taken as
//! `reference - comparator` for both cost and outcome.

use crate::accrual::{DiscountKind, Metric};
use crate::result::TreatmentResult;
use serde::{Deserialize, Serialize};

/// Below this |delta outcome| the ratio is reported as undefined.
pub const ICER_OUTCOME_EPSILON: f64 = 1e-12;

/// One comparator against the reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcerComparison {
    pub comparator: String,
    pub delta_cost: f64,
    pub delta_outcome: f64,
    /// `None` when the outcome difference is negligible or a delta is not finite
    pub icer: Option<f64>,
}

impl IcerComparison {
    pub fn is_defined(&self) -> bool {
        self.icer.is_some()
    }
}

/// Comparisons under one discounting kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IcerBlock {
    pub reference: String,
    pub comparisons: Vec<IcerComparison>,
}

impl IcerBlock {
    pub fn comparison(&self, comparator: &str) -> Option<&IcerComparison> {
        self.comparisons.iter().find(|c| c.comparator == comparator)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IcerReport {
    pub discounted: IcerBlock,
    pub undiscounted: IcerBlock,
}

/// ICER from a cost and outcome difference. Undefined when either delta is
/// not finite.
pub fn icer(delta_cost: f64, delta_outcome: f64) -> Option<f64> {
    if !delta_cost.is_finite()
        || !delta_outcome.is_finite()
        || delta_outcome.abs() < ICER_OUTCOME_EPSILON
    {
        None
    } else {
        Some(delta_cost / delta_outcome)
    }
}

/// Compares every arm after the first with the first.
pub fn compare_arms(arms: &[TreatmentResult], kind: DiscountKind) -> IcerBlock {
    let Some((reference, comparators)) = arms.split_first() else {
        return IcerBlock::default();
    };

    let ref_cost = reference.total(kind, Metric::Cost);
    let ref_outcome = reference.total(kind, Metric::Outcome);

    let comparisons = comparators
        .iter()
        .map(|arm| {
            let delta_cost = ref_cost - arm.total(kind, Metric::Cost);
            let delta_outcome = ref_outcome - arm.total(kind, Metric::Outcome);
            IcerComparison {
                comparator: arm.treatment.clone(),
                delta_cost,
                delta_outcome,
                icer: icer(delta_cost, delta_outcome),
            }
        })
        .collect();

    IcerBlock {
        reference: reference.treatment.clone(),
        comparisons,
    }
}

/// Discounted and undiscounted comparison blocks.
pub fn compute_icers(arms: &[TreatmentResult]) -> IcerReport {
    IcerReport {
        discounted: compare_arms(arms, DiscountKind::Discounted),
        undiscounted: compare_arms(arms, DiscountKind::Undiscounted),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accrual::{AccrualTotals, LifeYears};
    use approx::assert_relative_eq;
    use cohort_env::StateSpace;

    fn arm(name: &str, cost: f64, outcome: f64, discounted_outcome: f64) -> TreatmentResult {
        let states = StateSpace::new(["Alive", "Dead"]).unwrap();
        let mut undiscounted = AccrualTotals::new(&states, &["Event"]);
        undiscounted.cost.record("Alive", "Event", cost);
        undiscounted.outcome.record("Alive", "Event", outcome);

        let mut discounted = AccrualTotals::new(&states, &["Event"]);
        discounted.cost.record("Alive", "Event", cost * 0.9);
        discounted.outcome.record("Alive", "Event", discounted_outcome);

        TreatmentResult {
            treatment: name.to_string(),
            occupancy_by_cycle: Vec::new(),
            undiscounted,
            discounted,
            occupancy_time: LifeYears::default(),
            cost_contributors: vec!["Event".to_string()],
            outcome_contributors: vec!["Event".to_string()],
        }
    }

    #[test]
    fn test_reference_minus_comparator() {
        let arms = vec![arm("new", 12_000.0, 6.0, 5.0), arm("soc", 2_000.0, 4.0, 3.0)];
        let report = compute_icers(&arms);

        assert_eq!(report.undiscounted.reference, "new");
        let c = report.undiscounted.comparison("soc").unwrap();
        assert_relative_eq!(c.delta_cost, 10_000.0);
        assert_relative_eq!(c.delta_outcome, 2.0);
        assert_relative_eq!(c.icer.unwrap(), 5_000.0);

        let d = report.discounted.comparison("soc").unwrap();
        assert_relative_eq!(d.delta_cost, 9_000.0, epsilon = 1e-9);
        assert_relative_eq!(d.icer.unwrap(), 4_500.0, epsilon = 1e-9);
    }

    #[test]
    fn test_equal_outcomes_give_undefined_icer() {
        let arms = vec![arm("a", 5_000.0, 4.0, 3.5), arm("b", 1_000.0, 4.0, 3.5)];
        let report = compute_icers(&arms);

        let c = report.discounted.comparison("b").unwrap();
        assert!(c.icer.is_none());
        assert!(!c.is_defined());
        assert_relative_eq!(c.delta_cost, 3_600.0, epsilon = 1e-9);

        let json = serde_json::to_value(c).unwrap();
        assert!(json["icer"].is_null());
    }

    #[test]
    fn test_single_arm_has_no_comparisons() {
        let report = compute_icers(&[arm("only", 1.0, 1.0, 1.0)]);
        assert_eq!(report.discounted.reference, "only");
        assert!(report.discounted.comparisons.is_empty());
        assert_eq!(compute_icers(&[]), IcerReport::default());
    }

    #[test]
    fn test_icer_threshold() {
        assert_eq!(icer(10.0, 5e-13), None);
        assert_eq!(icer(10.0, -2.0), Some(-5.0));
    }

    #[test]
    fn test_icer_undefined_for_non_finite_deltas() {
        assert_eq!(icer(f64::NAN, 1.0), None);
        assert_eq!(icer(1.0, f64::NAN), None);
        assert_eq!(icer(f64::INFINITY, 0.5), None);
        assert_eq!(icer(100.0, f64::NEG_INFINITY), None);
        assert_relative_eq!(icer(100.0, 0.5).unwrap(), 200.0);
    }
}
