//! Cohort Core - deterministic cohort Markov engine with accrual accounting
//!
//! This library turns an externally supplied transition oracle and a set of
//! contributors into reconciled cost and outcome totals per treatment arm:
//! 1. **Recurrence**: occupancy advances by `s_next = s . P` with validated, row-stochastic `P`
//! 2. **Accrual**: occupation and flow impacts booked by state, by contributor and jointly
//! 3. **Comparison**: discounted and undiscounted ICERs against the first treatment

pub mod accrual;
pub mod contributor;
pub mod discount;
pub mod icer;
pub mod impact;
pub mod labeled;
pub mod pruner;
pub mod result;
pub mod simulator;
pub mod transition;

// Re-export key types for convenience
pub use accrual::{Accrual, AccrualTotals, DiscountKind, LifeYears, Metric, MetricLedger, OccupancyTime};
pub use contributor::{Contributor, ContributorInfo, ImpactModel};
pub use discount::{CycleDiscount, DiscountPolicy, Discounting};
pub use icer::{compute_icers, IcerBlock, IcerComparison, IcerReport, ICER_OUTCOME_EPSILON};
pub use impact::{compile_impacts, compile_with_context, initialise_impact, CompiledImpacts, Impact};
pub use labeled::{LabeledMatrix, LabeledVector};
pub use pruner::{prune_negligible, DEFAULT_PRUNE_TOLERANCE};
pub use result::{SimulationResult, TreatmentResult};
pub use simulator::CohortSimulator;
pub use transition::{
    fetch_transition_matrix, validate_transition_matrix, ConstantOracle, TransitionOracle,
    TRANSITION_TOLERANCE,
};
