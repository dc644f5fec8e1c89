//! Table-driven transition oracle built from declarative bundle rules.

use crate::quantity::{Quantity, Scope};
use cohort_core::TransitionOracle;
use cohort_env::{BoxError, TransitionContext};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// One (from, to) entry of the transition matrix.
///
/// Exactly one of `probability` or `complement` is set. A complement entry
/// takes `1 - (sum of the other entries in its row)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub from: String,
    pub to: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<Quantity>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub complement: bool,

    #[serde(flatten)]
    pub scope: Scope,
}

impl TransitionRule {
    pub fn probability(from: &str, to: &str, p: impl Into<Quantity>) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            probability: Some(p.into()),
            complement: false,
            scope: Scope::default(),
        }
    }

    pub fn complement(from: &str, to: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            probability: None,
            complement: true,
            scope: Scope::default(),
        }
    }

    pub fn in_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }
}

/// Oracle evaluating [`TransitionRule`]s each cycle.
///
/// Rows without any active rule stay where they are (probability 1 on the
/// diagonal), so absorbing states need no rule.
#[derive(Debug, Clone, Default)]
pub struct TableOracle {
    rules: Vec<TransitionRule>,
}

impl TableOracle {
    pub fn new(rules: Vec<TransitionRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[TransitionRule] {
        &self.rules
    }
}

impl TransitionOracle for TableOracle {
    fn transition_matrix(&self, ctx: &TransitionContext<'_>) -> Result<DMatrix<f64>, BoxError> {
        let n = ctx.states.len();
        let mut p = DMatrix::zeros(n, n);
        let mut touched = vec![false; n];
        let mut complement: Vec<Option<usize>> = vec![None; n];

        for rule in self.rules.iter().filter(|r| r.scope.applies(ctx)) {
            let i = ctx.states.index_of(&rule.from)?;
            let j = ctx.states.index_of(&rule.to)?;
            touched[i] = true;

            if rule.complement {
                if complement[i].replace(j).is_some() {
                    return Err(format!(
                        "row '{}' has more than one complement rule at cycle {}",
                        rule.from, ctx.cycle
                    )
                    .into());
                }
            } else if let Some(q) = &rule.probability {
                p[(i, j)] += q.resolve(ctx)?;
            }
        }

        for i in 0..n {
            match complement[i] {
                Some(j) => {
                    let rest = p.row(i).sum() - p[(i, j)];
                    p[(i, j)] = 1.0 - rest;
                }
                None if !touched[i] => p[(i, i)] = 1.0,
                None => {}
            }
        }

        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quantity::CycleWindow;
    use cohort_env::{ParameterSet, StateSpace};
    use std::sync::Arc;

    fn matrix_at(oracle: &TableOracle, cycle: usize, treatment: &str) -> Result<DMatrix<f64>, BoxError> {
        let params = ParameterSet::new()
            .with("p_progress", 0.2)
            .with("rr", 0.5)
            .with("p_death", 0.05);
        let states = Arc::new(StateSpace::new(["PFS", "PPS", "Death"]).unwrap());
        let ctx = TransitionContext {
            cycle,
            treatment,
            params: &params,
            states: &states,
            cycle_length_years: 1.0,
            time_horizon_years: 10.0,
        };
        oracle.transition_matrix(&ctx)
    }

    fn rules() -> Vec<TransitionRule> {
        vec![
            TransitionRule::probability("PFS", "PPS", "p_progress").in_scope(Scope {
                treatments: Some(vec!["soc".to_string()]),
                cycles: None,
            }),
            TransitionRule::probability("PFS", "PPS", Quantity::Product(vec!["p_progress".into(), "rr".into()]))
                .in_scope(Scope {
                    treatments: Some(vec!["new".to_string()]),
                    cycles: None,
                }),
            TransitionRule::probability("PFS", "Death", "p_death"),
            TransitionRule::complement("PFS", "PFS"),
            TransitionRule::probability("PPS", "Death", 0.3),
            TransitionRule::complement("PPS", "PPS"),
        ]
    }

    #[test]
    fn test_complement_fills_row() {
        let oracle = TableOracle::new(rules());
        let p = matrix_at(&oracle, 0, "soc").unwrap();

        assert!((p[(0, 0)] - 0.75).abs() < 1e-12);
        assert!((p[(0, 1)] - 0.2).abs() < 1e-12);
        assert!((p[(1, 1)] - 0.7).abs() < 1e-12);
        // Death has no rule and is absorbing.
        assert_eq!(p[(2, 2)], 1.0);

        let q = matrix_at(&oracle, 0, "new").unwrap();
        assert!((q[(0, 1)] - 0.1).abs() < 1e-12);
        assert!((q[(0, 0)] - 0.85).abs() < 1e-12);
    }

    #[test]
    fn test_cycle_window_switches_rules() {
        let oracle = TableOracle::new(vec![
            TransitionRule::probability("PFS", "Death", 0.5).in_scope(Scope {
                treatments: None,
                cycles: Some(CycleWindow::only(0)),
            }),
            TransitionRule::probability("PFS", "Death", 0.1).in_scope(Scope {
                treatments: None,
                cycles: Some(CycleWindow::starting(1)),
            }),
            TransitionRule::complement("PFS", "PFS"),
        ]);

        assert!((matrix_at(&oracle, 0, "x").unwrap()[(0, 2)] - 0.5).abs() < 1e-12);
        assert!((matrix_at(&oracle, 7, "x").unwrap()[(0, 2)] - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_errors_surface_as_oracle_failures() {
        let double = TableOracle::new(vec![
            TransitionRule::complement("PFS", "PFS"),
            TransitionRule::complement("PFS", "PPS"),
        ]);
        assert!(matrix_at(&double, 0, "x").unwrap_err().to_string().contains("complement"));

        let unknown = TableOracle::new(vec![TransitionRule::probability("PFS", "Nowhere", 1.0)]);
        assert!(matrix_at(&unknown, 0, "x").is_err());

        let missing = TableOracle::new(vec![TransitionRule::probability("PFS", "PPS", "p_unknown")]);
        assert!(matrix_at(&missing, 0, "x").unwrap_err().to_string().contains("p_unknown"));
    }

    #[test]
    fn test_rule_json_shape() {
        let rule: TransitionRule = serde_json::from_str(
            r#"{"from": "PFS", "to": "PFS", "complement": true, "treatments": ["new"], "cycles": [1, null]}"#,
        )
        .unwrap();
        assert!(rule.complement);
        assert!(rule.probability.is_none());
        assert_eq!(rule.scope.cycles, Some(CycleWindow::starting(1)));
    }

    proptest::proptest! {
        #[test]
        fn prop_complement_rows_sum_to_one(a in 0.0f64..0.5, b in 0.0f64..0.5, c in 0.0f64..1.0) {
            let oracle = TableOracle::new(vec![
                TransitionRule::probability("PFS", "PPS", a),
                TransitionRule::probability("PFS", "Death", b),
                TransitionRule::complement("PFS", "PFS"),
                TransitionRule::probability("PPS", "Death", c),
                TransitionRule::complement("PPS", "PPS"),
            ]);
            let p = matrix_at(&oracle, 0, "x").unwrap();
            for i in 0..3 {
                let sum: f64 = p.row(i).iter().sum();
                proptest::prop_assert!((sum - 1.0).abs() < 1e-12);
            }
        }
    }
}
