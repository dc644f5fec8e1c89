//! Transition oracle interface and row-stochastic validation.

use crate::labeled::LabeledMatrix;
use cohort_env::{BoxError, CohortError, CohortResult, StateSpace, TransitionContext};
use nalgebra::DMatrix;

/// Default tolerance for negative entries and row sums.
pub const TRANSITION_TOLERANCE: f64 = 1e-10;

/// Externally supplied source of per-cycle transition matrices.
///
/// Returns an N x N matrix whose row i is the distribution of destinations
/// for mass currently in state i.
pub trait TransitionOracle: Send + Sync {
    fn transition_matrix(&self, ctx: &TransitionContext<'_>) -> Result<DMatrix<f64>, BoxError>;
}

impl<F> TransitionOracle for F
where
    F: Fn(&TransitionContext<'_>) -> Result<DMatrix<f64>, BoxError> + Send + Sync,
{
    fn transition_matrix(&self, ctx: &TransitionContext<'_>) -> Result<DMatrix<f64>, BoxError> {
        self(ctx)
    }
}

/// Oracle returning the same matrix for every cycle and treatment.
#[derive(Debug, Clone)]
pub struct ConstantOracle {
    matrix: DMatrix<f64>,
}

impl ConstantOracle {
    pub fn new(matrix: LabeledMatrix) -> Self {
        Self {
            matrix: matrix.into_array(),
        }
    }
}

impl TransitionOracle for ConstantOracle {
    fn transition_matrix(&self, _ctx: &TransitionContext<'_>) -> Result<DMatrix<f64>, BoxError> {
        Ok(self.matrix.clone())
    }
}

/// Checks that `p` is N x N, has no entry below `-tol` and every row sums to 1.
pub fn validate_transition_matrix(
    p: &DMatrix<f64>,
    states: &StateSpace,
    treatment: &str,
    cycle: usize,
    tol: f64,
) -> CohortResult<()> {
    let n = states.len();
    if p.nrows() != n || p.ncols() != n {
        return Err(CohortError::shape(format!(
            "transition matrix for treatment '{}' at cycle {} is {}x{}, expected {}x{}",
            treatment,
            cycle,
            p.nrows(),
            p.ncols(),
            n,
            n
        )));
    }

    let invalid = |row: usize, reason: String| CohortError::TransitionInvalid {
        treatment: treatment.to_string(),
        cycle,
        row,
        state: states.name(row).to_string(),
        reason,
    };

    for i in 0..n {
        for j in 0..n {
            let value = p[(i, j)];
            if !value.is_finite() {
                return Err(invalid(
                    i,
                    format!("has non-finite entry {} towards '{}'", value, states.name(j)),
                ));
            }
            if value < -tol {
                return Err(invalid(
                    i,
                    format!("has negative entry {} towards '{}'", value, states.name(j)),
                ));
            }
        }

        let sum = p.row(i).sum();
        if (sum - 1.0).abs() > tol {
            return Err(invalid(i, format!("sums to {} instead of 1", sum)));
        }
    }

    Ok(())
}

/// Asks the oracle for a matrix and validates it before use.
pub fn fetch_transition_matrix(
    oracle: &dyn TransitionOracle,
    ctx: &TransitionContext<'_>,
    tol: f64,
) -> CohortResult<DMatrix<f64>> {
    let p = oracle
        .transition_matrix(ctx)
        .map_err(|source| CohortError::Oracle {
            treatment: ctx.treatment.to_string(),
            cycle: ctx.cycle,
            source,
        })?;

    validate_transition_matrix(&p, ctx.states, ctx.treatment, ctx.cycle, tol)?;
    Ok(p)
}
