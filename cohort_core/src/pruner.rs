//! Result Pruner - drops contributors with negligible totals from the breakdowns.

use crate::accrual::{DiscountKind, Metric};
use crate::result::{SimulationResult, TreatmentResult};
use std::collections::BTreeSet;
use tracing::warn;

/// Contributors whose |total| is below this in both kinds are considered negligible.
pub const DEFAULT_PRUNE_TOLERANCE: f64 = 1e-12;

/// Contributor names of one arm/metric whose cumulative totals are negligible
/// both undiscounted and discounted.
pub fn negligible_contributors(arm: &TreatmentResult, metric: Metric, tol: f64) -> BTreeSet<String> {
    let undiscounted = &arm.undiscounted.metric(metric).cumulative.by_contributor;
    let discounted = &arm.discounted.metric(metric).cumulative.by_contributor;

    undiscounted
        .keys()
        .chain(discounted.keys())
        .filter(|name| {
            let u = undiscounted.get(*name).copied().unwrap_or(0.0);
            let d = discounted.get(*name).copied().unwrap_or(0.0);
            u.abs() < tol && d.abs() < tol
        })
        .cloned()
        .collect()
}

/// Returns a copy of `result` without negligible contributor entries.
///
/// Totals and state keys are never touched, and cost and outcome are pruned
/// independently. Applying it twice gives the same result as once.
pub fn prune_negligible(result: &SimulationResult, tol: f64) -> SimulationResult {
    let mut pruned = result.clone();

    for arm in &mut pruned.per_treatment {
        for metric in Metric::all() {
            let drop = negligible_contributors(arm, metric, tol);
            if drop.is_empty() {
                continue;
            }

            warn!(
                treatment = %arm.treatment,
                metric = %metric,
                dropped = ?drop,
                "Pruning negligible contributors"
            );

            for kind in DiscountKind::all() {
                arm.totals_mut(kind).metric_mut(metric).remove_contributors(&drop);
            }

            let kept = match metric {
                Metric::Cost => &mut arm.cost_contributors,
                Metric::Outcome => &mut arm.outcome_contributors,
            };
            kept.retain(|name| !drop.contains(name));
        }
    }

    pruned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contributor::Contributor;
    use crate::impact::{initialise_impact, Impact};
    use crate::labeled::LabeledMatrix;
    use crate::simulator::CohortSimulator;
    use crate::transition::ConstantOracle;
    use cohort_env::{BoxError, EventContext, RunSettings, StateSpace};
    use std::sync::Arc;

    fn result() -> SimulationResult {
        let states = StateSpace::new(["Well", "Sick", "Dead"]).unwrap();
        let shared = Arc::new(states.clone());
        let p = LabeledMatrix::from_rows(
            &[
                vec![0.85, 0.1, 0.05],
                vec![0.0, 0.8, 0.2],
                vec![0.0, 0.0, 1.0],
            ],
            &shared,
        )
        .unwrap();

        let utility = |ctx: &EventContext<'_>| -> Result<Impact, BoxError> {
            let mut impact = initialise_impact(ctx.states);
            impact.outcome_occupation.set("Well", 0.9)?;
            impact.outcome_occupation.set("Sick", 0.6)?;
            Ok(impact)
        };
        let sick_cost = |ctx: &EventContext<'_>| -> Result<Impact, BoxError> {
            let mut impact = initialise_impact(ctx.states);
            impact.cost_occupation.set("Sick", 2_500.0)?;
            Ok(impact)
        };
        let zero = |ctx: &EventContext<'_>| -> Result<Impact, BoxError> { Ok(initialise_impact(ctx.states)) };

        let settings = RunSettings::default()
            .with_timeline(1.0, 5.0)
            .with_initial_occupancy("a", [("Well", 1.0)])
            .with_initial_occupancy("b", [("Well", 0.8), ("Sick", 0.2)]);

        CohortSimulator::new(states, ["a", "b"], ConstantOracle::new(p))
            .with_settings(settings)
            .with_contributor(Contributor::from_fn("Utility", utility))
            .with_contributor(Contributor::from_fn("Sick cost", sick_cost))
            .with_contributor(Contributor::from_fn("Placeholder", zero))
            .run()
            .unwrap()
    }

    #[test]
    fn test_prunes_per_metric() {
        let original = result();
        let pruned = prune_negligible(&original, DEFAULT_PRUNE_TOLERANCE);
        let arm = pruned.treatment("a").unwrap();

        // Utility books no cost, Sick cost books no outcome.
        assert_eq!(arm.cost_contributors, vec!["Sick cost".to_string()]);
        assert_eq!(arm.outcome_contributors, vec!["Utility".to_string()]);

        let cost = &arm.discounted.cost.cumulative;
        assert!(!cost.by_contributor.contains_key("Utility"));
        assert!(!cost.by_contributor.contains_key("Placeholder"));
        assert!(arm.undiscounted.outcome.per_cycle[0].by_contributor.contains_key("Utility"));
        assert!(!arm.undiscounted.outcome.per_cycle[0].by_contributor.contains_key("Sick cost"));
    }

    #[test]
    fn test_totals_and_state_keys_unchanged() {
        let original = result();
        let pruned = prune_negligible(&original, DEFAULT_PRUNE_TOLERANCE);

        for (before, after) in original.per_treatment.iter().zip(&pruned.per_treatment) {
            for kind in DiscountKind::all() {
                for metric in Metric::all() {
                    let b = before.totals(kind).metric(metric);
                    let a = after.totals(kind).metric(metric);
                    assert_eq!(a.cumulative.total, b.cumulative.total);
                    assert_eq!(a.cumulative.by_state, b.cumulative.by_state);
                    for (sa, sb) in a.per_cycle.iter().zip(&b.per_cycle) {
                        assert_eq!(sa.total, sb.total);
                        assert_eq!(
                            sa.by_state_contributor.keys().collect::<Vec<_>>(),
                            sb.by_state_contributor.keys().collect::<Vec<_>>()
                        );
                    }
                }
            }
        }
        assert_eq!(pruned.icer, original.icer);
        assert!(pruned.reconciliation_error() < 1e-9);
    }

    #[test]
    fn test_pruning_is_idempotent() {
        let once = prune_negligible(&result(), DEFAULT_PRUNE_TOLERANCE);
        let twice = prune_negligible(&once, DEFAULT_PRUNE_TOLERANCE);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_zero_tolerance_keeps_everything() {
        let original = result();
        assert_eq!(prune_negligible(&original, 0.0), original);
    }
}
