//! Immutable evaluation context handed to oracles and contributors.

use crate::error::CohortResult;
use crate::types::{ParameterSet, StateSpace};
use std::sync::Arc;

/// Everything an externally supplied function may read for one (cycle, treatment).
///
/// The context only borrows run inputs, so oracles and contributors cannot
/// mutate the shared state space or parameters.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext<'a> {
    /// Zero-based cycle index
    pub cycle: usize,

    /// Treatment arm being simulated
    pub treatment: &'a str,

    /// Flattened parameters (shared by all arms)
    pub params: &'a ParameterSet,

    /// Ordered health states (shared so impacts can reuse the name table)
    pub states: &'a Arc<StateSpace>,

    pub cycle_length_years: f64,

    pub time_horizon_years: f64,
}

/// Context passed to a transition oracle.
pub type TransitionContext<'a> = CycleContext<'a>;

/// Context passed to a contributor's calculation.
pub type EventContext<'a> = CycleContext<'a>;

impl<'a> CycleContext<'a> {
    /// Parameter value by name.
    pub fn param(&self, name: &str) -> CohortResult<f64> {
        self.params.get(name)
    }

    pub fn is_first_cycle(&self) -> bool {
        self.cycle == 0
    }

    /// Elapsed model time at the start of this cycle, in years.
    pub fn start_years(&self) -> f64 {
        self.cycle as f64 * self.cycle_length_years
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_reads_params() {
        let params = ParameterSet::new().with("cost", 100.0);
        let states = Arc::new(StateSpace::new(["A", "B"]).unwrap());
        let ctx = CycleContext {
            cycle: 2,
            treatment: "soc",
            params: &params,
            states: &states,
            cycle_length_years: 0.25,
            time_horizon_years: 5.0,
        };

        assert_eq!(ctx.param("cost").unwrap(), 100.0);
        assert!(ctx.param("other").is_err());
        assert!(!ctx.is_first_cycle());
        assert_eq!(ctx.start_years(), 0.5);
    }
}
