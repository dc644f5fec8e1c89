//! Cohort Model Environment
//!
//! The inputs a cohort run consumes from the outside world, kept separate
//! from the engine so that authoring tools, harnesses and the engine agree
//! on one vocabulary:
//!
//! - **State space**: ordered, unique health state names
//! - **Parameters**: the flattened name -> value mapping
//! - **Settings**: cycle length, horizon, discounting, initial occupancy
//! - **Context**: the read-only view handed to oracles and contributors
//! - **Errors**: the shared, fatal error taxonomy
//!
//! # Example
//!
//! ```ignore
//! use cohort_env::{RunSettings, StateSpace, DiscountTiming};
//!
//! let states = StateSpace::new(["Alive", "Dead"])?;
//! let settings = RunSettings::default()
//!     .with_timeline(1.0, 3.0)
//!     .with_discount_rates(0.0, 0.0)
//!     .with_timing(DiscountTiming::Start)
//!     .with_initial_occupancy("soc", [("Alive", 1.0)]);
//!
//! assert_eq!(settings.n_cycles()?, 3);
//! ```

mod context;
mod error;
mod settings;
mod types;

pub use context::{CycleContext, EventContext, TransitionContext};
pub use error::{BoxError, CohortError, CohortResult};
pub use settings::{
    cycle_count, DiscountTiming, OccupancyBasis, Period, RunSettings, TimeUnit,
    CYCLE_COUNT_TOLERANCE, OCCUPANCY_SUM_TOLERANCE,
};
pub use types::{ParameterSet, RichParameter, StateSpace, Treatment};
