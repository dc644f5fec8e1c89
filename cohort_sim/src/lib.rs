//! Cohort Simulation Harness
//!
//! Runs cohort models end to end and checks the engine's invariants on
//! every run:
//! - **Mass**: occupancy sums to one after every transition
//! - **Reconciliation**: every total equals the sum of each of its breakdowns
//! - **Determinism**: the same bundle always yields the same result
//!
//! Models are described as JSON bundles with declarative transition rules
//! and events, so no code has to be compiled to run a new model.
//!
//! # Usage
//!
//! ```ignore
//! use cohort_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let report = ScenarioRunner::new().run(ScenarioId::AliveDead);
//! assert!(report.passed);
//! ```

mod bundle;
mod error;
mod events;
mod exporter;
mod oracle;
mod quantity;
mod runner;
pub mod scenarios;

pub use bundle::{BundleSettings, ModelBundle};
pub use error::{SimError, SimResult};
pub use events::{EventDefinition, EventEntry, TableEvent, Target};
pub use exporter::ResultExport;
pub use oracle::{TableOracle, TransitionRule};
pub use quantity::{CycleWindow, Quantity, Scope, RESERVED_NAMES};
pub use runner::{RunMetrics, RunReport, ScenarioRunner};
