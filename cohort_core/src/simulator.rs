//! Cohort Simulator - the per-arm cycle loop.
//!
//! Each treatment arm runs `Initialized -> Running(cycle) -> Completed`.
//! A failure in any cycle aborts the arm and the whole run; no partial
//! result is ever returned.

use crate::accrual::{AccrualTotals, LifeYears, Metric, OccupancyTime};
use crate::contributor::Contributor;
use crate::discount::{CycleDiscount, Discounting};
use crate::icer::compute_icers;
use crate::impact::compile_with_context;
use crate::result::{SimulationResult, TreatmentResult};
use crate::transition::{fetch_transition_matrix, TransitionOracle, TRANSITION_TOLERANCE};
use cohort_env::{
    CohortError, CohortResult, CycleContext, OccupancyBasis, ParameterSet, RunSettings, StateSpace,
    Treatment, OCCUPANCY_SUM_TOLERANCE,
};
use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Deterministic cohort Markov engine over a fixed state space.
pub struct CohortSimulator {
    /// Ordered health states shared by every arm
    states: Arc<StateSpace>,

    /// Treatment arms in run order (the first is the ICER reference)
    treatments: Vec<Treatment>,

    /// Flattened parameters
    params: ParameterSet,

    settings: RunSettings,

    /// Source of per-cycle transition matrices
    oracle: Arc<dyn TransitionOracle>,

    contributors: Vec<Contributor>,

    /// Tolerance for negative entries and row sums of transition matrices
    transition_tolerance: f64,

    /// Tolerance for occupancy summing to one after each transition
    mass_tolerance: f64,
}

impl CohortSimulator {
    /// Creates a simulator with default settings and no contributors.
    pub fn new<I, S>(states: StateSpace, treatments: I, oracle: impl TransitionOracle + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_shared_oracle(states, treatments, Arc::new(oracle))
    }

    pub fn with_shared_oracle<I, S>(
        states: StateSpace,
        treatments: I,
        oracle: Arc<dyn TransitionOracle>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            states: Arc::new(states),
            treatments: treatments.into_iter().map(Into::into).collect(),
            params: ParameterSet::new(),
            settings: RunSettings::default(),
            oracle,
            contributors: Vec::new(),
            transition_tolerance: TRANSITION_TOLERANCE,
            mass_tolerance: OCCUPANCY_SUM_TOLERANCE,
        }
    }

    pub fn with_params(mut self, params: ParameterSet) -> Self {
        self.params = params;
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_contributor(mut self, contributor: Contributor) -> Self {
        self.contributors.push(contributor);
        self
    }

    pub fn with_contributors(mut self, contributors: impl IntoIterator<Item = Contributor>) -> Self {
        self.contributors.extend(contributors);
        self
    }

    pub fn with_transition_tolerance(mut self, tol: f64) -> Self {
        self.transition_tolerance = tol;
        self
    }

    pub fn with_mass_tolerance(mut self, tol: f64) -> Self {
        self.mass_tolerance = tol;
        self
    }

    pub fn states(&self) -> &Arc<StateSpace> {
        &self.states
    }

    pub fn treatments(&self) -> &[Treatment] {
        &self.treatments
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn contributors(&self) -> &[Contributor] {
        &self.contributors
    }

    /// Runs every setup check and returns the cycle count.
    pub fn validate(&self) -> CohortResult<usize> {
        if self.treatments.is_empty() {
            return Err(CohortError::config("at least one treatment is required"));
        }

        let mut seen = HashSet::new();
        for treatment in &self.treatments {
            if !seen.insert(treatment.as_str()) {
                return Err(CohortError::config(format!("duplicate treatment '{}'", treatment)));
            }
        }

        let mut seen = HashSet::new();
        for contributor in &self.contributors {
            if !seen.insert(contributor.name()) {
                return Err(CohortError::config(format!(
                    "duplicate contributor name '{}'",
                    contributor.name()
                )));
            }
        }

        for (label, tol) in [
            ("transition", self.transition_tolerance),
            ("mass", self.mass_tolerance),
        ] {
            if !(tol >= 0.0) || !tol.is_finite() {
                return Err(CohortError::config(format!(
                    "{} tolerance must be a non-negative number, got {}",
                    label, tol
                )));
            }
        }

        self.settings.validate(&self.states, &self.treatments)?;
        self.settings.n_cycles()
    }

    /// Runs every arm in order, then derives the ICER block.
    pub fn run(&self) -> CohortResult<SimulationResult> {
        let n_cycles = self.validate()?;
        let discounting = Discounting::from_settings(&self.settings);
        let schedule = discounting.schedule(n_cycles);

        info!(
            states = self.states.len(),
            treatments = self.treatments.len(),
            contributors = self.contributors.len(),
            n_cycles,
            timing = %self.settings.discount_timing,
            basis = %self.settings.occupancy_basis,
            "Starting cohort run"
        );

        let mut per_treatment = Vec::with_capacity(self.treatments.len());
        for treatment in &self.treatments {
            per_treatment.push(self.simulate_arm(treatment, &schedule)?);
        }

        let icer = compute_icers(&per_treatment);
        info!(
            comparisons = icer.discounted.comparisons.len(),
            "Cohort run complete"
        );

        Ok(SimulationResult {
            settings: self.settings.clone(),
            states: self.states.names().to_vec(),
            treatments: self.treatments.clone(),
            contributors: self.contributors.iter().map(Contributor::info).collect(),
            discount_schedule: schedule,
            per_treatment,
            icer,
        })
    }

    /// Runs a single arm after the same setup checks as [`run`](Self::run).
    pub fn run_arm(&self, treatment: &str) -> CohortResult<TreatmentResult> {
        let n_cycles = self.validate()?;
        if !self.treatments.iter().any(|t| t == treatment) {
            return Err(CohortError::UnknownName {
                kind: "treatment",
                name: treatment.to_string(),
            });
        }
        let schedule = Discounting::from_settings(&self.settings).schedule(n_cycles);
        self.simulate_arm(treatment, &schedule)
    }

    fn simulate_arm(&self, treatment: &str, schedule: &[CycleDiscount]) -> CohortResult<TreatmentResult> {
        let mut arm = ArmRun::start(self, treatment)?;
        for discount in schedule {
            arm.step(discount)?;
        }
        arm.finish()
    }
}

/// Lifecycle of one arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArmPhase {
    Initialized,
    Running { cycle: usize },
    Completed,
}

/// Mutable state of one arm while its cycle loop runs.
struct ArmRun<'a> {
    sim: &'a CohortSimulator,
    treatment: &'a str,
    phase: ArmPhase,
    occupancy: DVector<f64>,
    trajectory: Vec<DVector<f64>>,
    undiscounted: AccrualTotals,
    discounted: AccrualTotals,
    life_years: LifeYears,
}

impl<'a> ArmRun<'a> {
    fn start(sim: &'a CohortSimulator, treatment: &'a str) -> CohortResult<Self> {
        let states = sim.states.as_ref();
        let occupancy = DVector::from_vec(sim.settings.initial_vector(treatment, states)?);

        // Cumulative breakdowns list every contributor applicable to this arm.
        let applicable: Vec<&str> = sim
            .contributors
            .iter()
            .filter(|c| c.applies(treatment))
            .map(Contributor::name)
            .collect();

        info!(treatment, contributors = applicable.len(), "Arm initialized");

        Ok(Self {
            sim,
            treatment,
            phase: ArmPhase::Initialized,
            trajectory: vec![occupancy.clone()],
            occupancy,
            undiscounted: AccrualTotals::new(states, &applicable),
            discounted: AccrualTotals::new(states, &applicable),
            life_years: LifeYears {
                undiscounted: OccupancyTime::new(states),
                discounted: OccupancyTime::new(states),
            },
        })
    }

    /// Moves to `Running { cycle }`. Cycles run once each, in order from 0.
    fn advance(&mut self, cycle: usize) -> CohortResult<()> {
        let expected = match self.phase {
            ArmPhase::Initialized => Some(0),
            ArmPhase::Running { cycle: last } => Some(last + 1),
            ArmPhase::Completed => None,
        };
        if expected != Some(cycle) {
            return Err(CohortError::config(format!(
                "treatment '{}' cannot run cycle {} from phase {:?}",
                self.treatment, cycle, self.phase
            )));
        }
        self.phase = ArmPhase::Running { cycle };
        Ok(())
    }

    /// Runs one cycle: transition, occupancy time, impacts, then advance.
    fn step(&mut self, discount: &CycleDiscount) -> CohortResult<()> {
        let cycle = discount.cycle;
        self.advance(cycle)?;

        let sim = self.sim;
        let states = &sim.states;
        let n = states.len();
        let cycle_length = sim.settings.cycle_length_years;

        let ctx = CycleContext {
            cycle,
            treatment: self.treatment,
            params: &sim.params,
            states,
            cycle_length_years: cycle_length,
            time_horizon_years: sim.settings.time_horizon_years,
        };

        let p = fetch_transition_matrix(sim.oracle.as_ref(), &ctx, sim.transition_tolerance)?;

        // s_next = s . P
        let next = p.tr_mul(&self.occupancy);
        let mass = next.sum();
        if (mass - 1.0).abs() > sim.mass_tolerance {
            return Err(CohortError::MassNotConserved {
                treatment: self.treatment.to_string(),
                cycle,
                sum: mass,
            });
        }

        let basis = match sim.settings.occupancy_basis {
            OccupancyBasis::Start => self.occupancy.clone(),
            OccupancyBasis::End => next.clone(),
            OccupancyBasis::HalfCycle => (&self.occupancy + &next) * 0.5,
        };

        let time: Vec<f64> = basis.iter().map(|m| m * cycle_length).collect();
        self.life_years.undiscounted.push_cycle(states, time.iter().copied());
        self.life_years
            .discounted
            .push_cycle(states, time.iter().map(|t| t * discount.outcome_factor));

        // F[i, j]: mass moving from i to j this cycle
        let flows: DMatrix<f64> = DMatrix::from_diagonal(&self.occupancy) * &p;

        let compiled = compile_with_context(&ctx, &sim.contributors)?;

        self.undiscounted.begin_cycle(states);
        self.discounted.begin_cycle(states);

        for (name, impact) in &compiled.per_contributor {
            self.undiscounted.register(name);
            self.discounted.register(name);

            let cost_occ = impact.cost_occupation.as_array();
            let outcome_occ = impact.outcome_occupation.as_array();
            let cost_flow = impact.cost_flow.as_array();
            let outcome_flow = impact.outcome_flow.as_array();

            for i in 0..n {
                let state = states.name(i);
                let origin_flow = |unit: &DMatrix<f64>| -> f64 {
                    (0..n).map(|j| flows[(i, j)] * unit[(i, j)]).sum()
                };

                let cost = basis[i] * cost_occ[i] + origin_flow(cost_flow);
                let outcome = basis[i] * outcome_occ[i] + origin_flow(outcome_flow);

                self.book(Metric::Cost, state, name, cost, discount.cost_factor);
                self.book(Metric::Outcome, state, name, outcome, discount.outcome_factor);
            }
        }

        debug!(
            treatment = self.treatment,
            cycle,
            t_years = discount.t_years,
            cost_factor = discount.cost_factor,
            outcome_factor = discount.outcome_factor,
            mass,
            contributors = compiled.per_contributor.len(),
            "Cycle complete"
        );

        self.trajectory.push(next.clone());
        self.occupancy = next;
        Ok(())
    }

    fn book(&mut self, metric: Metric, state: &str, contributor: &str, amount: f64, factor: f64) {
        self.undiscounted
            .metric_mut(metric)
            .record(state, contributor, amount);
        self.discounted
            .metric_mut(metric)
            .record(state, contributor, amount * factor);
    }

    fn finish(mut self) -> CohortResult<TreatmentResult> {
        let ArmPhase::Running { cycle: last_cycle } = self.phase else {
            return Err(CohortError::config(format!(
                "treatment '{}' cannot complete from phase {:?}",
                self.treatment, self.phase
            )));
        };
        debug!(treatment = self.treatment, last_cycle, "Arm loop finished");
        self.phase = ArmPhase::Completed;

        let states = &self.sim.states;
        let occupancy_by_cycle = self
            .trajectory
            .iter()
            .map(|s| {
                states
                    .iter()
                    .zip(s.iter())
                    .map(|(name, m)| (name.to_string(), *m))
                    .collect::<BTreeMap<String, f64>>()
            })
            .collect();

        let cost_contributors = self.undiscounted.cost.cumulative.by_contributor.keys().cloned().collect();
        let outcome_contributors = self.undiscounted.outcome.cumulative.by_contributor.keys().cloned().collect();

        info!(
            treatment = self.treatment,
            phase = ?self.phase,
            cost = self.undiscounted.cost.cumulative.total,
            outcome = self.undiscounted.outcome.cumulative.total,
            discounted_cost = self.discounted.cost.cumulative.total,
            discounted_outcome = self.discounted.outcome.cumulative.total,
            "Arm completed"
        );

        Ok(TreatmentResult {
            treatment: self.treatment.to_string(),
            occupancy_by_cycle,
            undiscounted: self.undiscounted,
            discounted: self.discounted,
            occupancy_time: self.life_years,
            cost_contributors,
            outcome_contributors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impact::{initialise_impact, Impact};
    use crate::labeled::LabeledMatrix;
    use crate::transition::ConstantOracle;
    use approx::assert_relative_eq;
    use cohort_env::{BoxError, DiscountTiming, EventContext, TransitionContext};
    use proptest::prelude::*;

    fn alive_dead() -> StateSpace {
        StateSpace::new(["Alive", "Dead"]).unwrap()
    }

    fn alive_dead_oracle() -> ConstantOracle {
        let states = Arc::new(alive_dead());
        ConstantOracle::new(
            LabeledMatrix::from_rows(&[vec![0.9, 0.1], vec![0.0, 1.0]], &states).unwrap(),
        )
    }

    fn life_years(ctx: &EventContext<'_>) -> Result<Impact, BoxError> {
        let mut impact = initialise_impact(ctx.states);
        impact.outcome_occupation.set("Alive", 1.0)?;
        Ok(impact)
    }

    fn alive_dead_settings(basis: OccupancyBasis) -> RunSettings {
        RunSettings::default()
            .with_timeline(1.0, 3.0)
            .with_discount_rates(0.0, 0.0)
            .with_timing(DiscountTiming::Start)
            .with_basis(basis)
            .with_initial_occupancy("soc", [("Alive", 1.0)])
    }

    #[test]
    fn test_two_state_absorbing_end_basis() {
        let sim = CohortSimulator::new(alive_dead(), ["soc"], alive_dead_oracle())
            .with_settings(alive_dead_settings(OccupancyBasis::End))
            .with_contributor(Contributor::new("Life years", life_years));

        let result = sim.run().unwrap();
        let arm = result.treatment("soc").unwrap();

        assert_relative_eq!(arm.undiscounted.outcome.cumulative.total, 2.439, epsilon = 1e-12);
        assert_relative_eq!(arm.occupancy_at(3, "Alive").unwrap(), 0.729, epsilon = 1e-12);
        assert_eq!(arm.occupancy_by_cycle.len(), 4);
        assert_eq!(arm.n_cycles(), 3);
        assert!(result.icer.discounted.comparisons.is_empty());
    }

    #[test]
    fn test_two_state_absorbing_start_basis() {
        let sim = CohortSimulator::new(alive_dead(), ["soc"], alive_dead_oracle())
            .with_settings(alive_dead_settings(OccupancyBasis::Start))
            .with_contributor(Contributor::new("Life years", life_years));

        let arm = sim.run_arm("soc").unwrap();

        // 1 + 0.9 + 0.81
        assert_relative_eq!(arm.undiscounted.outcome.cumulative.total, 2.71, epsilon = 1e-12);
        assert_relative_eq!(arm.occupancy_time.undiscounted.by_state["Alive"], 2.71, epsilon = 1e-12);
        assert_relative_eq!(arm.discounted.outcome.cumulative.total, 2.71, epsilon = 1e-12);
    }

    #[test]
    fn test_half_cycle_basis_averages() {
        let sim = CohortSimulator::new(alive_dead(), ["soc"], alive_dead_oracle())
            .with_settings(alive_dead_settings(OccupancyBasis::HalfCycle))
            .with_contributor(Contributor::new("Life years", life_years));

        let arm = sim.run_arm("soc").unwrap();
        assert_relative_eq!(
            arm.undiscounted.outcome.cumulative.total,
            (2.71 + 2.439) / 2.0,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_flow_attributed_to_origin() {
        let states = StateSpace::new(["A", "B", "C"]).unwrap();
        let oracle = |_ctx: &TransitionContext<'_>| -> Result<DMatrix<f64>, BoxError> {
            Ok(DMatrix::from_row_slice(
                3,
                3,
                &[0.7, 0.2, 0.1, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            ))
        };
        let transition_cost = |ctx: &EventContext<'_>| -> Result<Impact, BoxError> {
            let mut impact = initialise_impact(ctx.states);
            impact.cost_flow.set("A", "B", 1000.0)?;
            Ok(impact)
        };

        let settings = RunSettings::default()
            .with_timeline(1.0, 1.0)
            .with_discount_rates(0.0, 0.0)
            .with_initial_occupancy("x", [("A", 0.5), ("B", 0.5)]);

        let sim = CohortSimulator::new(states, ["x"], oracle)
            .with_settings(settings)
            .with_contributor(Contributor::from_fn("Transition", transition_cost));

        let arm = sim.run_arm("x").unwrap();
        let cost = &arm.undiscounted.cost.cumulative;

        assert_relative_eq!(cost.by_state["A"], 0.5 * 0.2 * 1000.0, epsilon = 1e-9);
        assert_eq!(cost.by_state["B"], 0.0);
        assert_relative_eq!(cost.by_state_contributor["A"]["Transition"], 100.0, epsilon = 1e-9);
        assert_relative_eq!(cost.total, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_discounting_applies_per_metric() {
        let cost_and_utility = |ctx: &EventContext<'_>| -> Result<Impact, BoxError> {
            let mut impact = initialise_impact(ctx.states);
            impact.cost_occupation.set("Alive", 100.0)?;
            impact.outcome_occupation.set("Alive", 1.0)?;
            Ok(impact)
        };
        let identity = |_ctx: &TransitionContext<'_>| -> Result<DMatrix<f64>, BoxError> {
            Ok(DMatrix::identity(2, 2))
        };

        let settings = RunSettings::default()
            .with_timeline(1.0, 2.0)
            .with_discount_rates(0.05, 0.0)
            .with_timing(DiscountTiming::End)
            .with_initial_occupancy("soc", [("Alive", 1.0)]);

        let sim = CohortSimulator::new(alive_dead(), ["soc"], identity)
            .with_settings(settings)
            .with_contributor(Contributor::from_fn("Care", cost_and_utility));

        let arm = sim.run_arm("soc").unwrap();

        assert_relative_eq!(arm.undiscounted.cost.cumulative.total, 200.0);
        assert_relative_eq!(
            arm.discounted.cost.cumulative.total,
            100.0 / 1.05 + 100.0 / 1.05f64.powi(2),
            epsilon = 1e-9
        );
        assert_relative_eq!(arm.discounted.outcome.cumulative.total, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_row_aborts_without_partial_result() {
        let leaky = |ctx: &TransitionContext<'_>| -> Result<DMatrix<f64>, BoxError> {
            let p = if ctx.cycle < 2 { [0.9, 0.1] } else { [0.9, 0.05] };
            Ok(DMatrix::from_row_slice(2, 2, &[p[0], p[1], 0.0, 1.0]))
        };

        let sim = CohortSimulator::new(alive_dead(), ["soc", "new"], leaky)
            .with_settings(alive_dead_settings(OccupancyBasis::Start).with_initial_occupancy("new", [("Alive", 1.0)]));

        match sim.run() {
            Err(CohortError::TransitionInvalid { treatment, cycle, row, state, .. }) => {
                assert_eq!(treatment, "soc");
                assert_eq!(cycle, 2);
                assert_eq!(row, 0);
                assert_eq!(state, "Alive");
            }
            other => panic!("expected invalid transition, got {:?}", other.map(|r| r.n_cycles())),
        }
    }

    #[test]
    fn test_setup_errors_before_any_cycle() {
        let no_occupancy = CohortSimulator::new(alive_dead(), ["soc", "new"], alive_dead_oracle())
            .with_settings(alive_dead_settings(OccupancyBasis::Start));
        assert!(matches!(no_occupancy.run(), Err(CohortError::Config(_))));

        let duplicate = CohortSimulator::new(alive_dead(), ["soc"], alive_dead_oracle())
            .with_settings(alive_dead_settings(OccupancyBasis::Start))
            .with_contributor(Contributor::new("Life years", life_years))
            .with_contributor(Contributor::new("Life years", life_years));
        assert!(matches!(duplicate.validate(), Err(CohortError::Config(_))));

        let fractional = CohortSimulator::new(alive_dead(), ["soc"], alive_dead_oracle())
            .with_settings(alive_dead_settings(OccupancyBasis::Start).with_timeline(1.0, 2.5));
        assert!(fractional.run().unwrap_err().is_setup_error());

        let none = CohortSimulator::new(alive_dead(), Vec::<String>::new(), alive_dead_oracle());
        assert!(none.validate().is_err());
    }

    #[test]
    fn test_contributor_failure_aborts_run() {
        let flaky = |ctx: &EventContext<'_>| -> Result<Impact, BoxError> {
            if ctx.cycle == 1 {
                return Err("utility table exhausted".into());
            }
            Ok(initialise_impact(ctx.states))
        };

        let sim = CohortSimulator::new(alive_dead(), ["soc"], alive_dead_oracle())
            .with_settings(alive_dead_settings(OccupancyBasis::Start))
            .with_contributor(Contributor::from_fn("Flaky", flaky));

        let err = sim.run().unwrap_err();
        assert!(matches!(err, CohortError::Contributor { cycle: 1, .. }));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_breakdown_registration_rules() {
        let zero = |ctx: &EventContext<'_>| -> Result<Impact, BoxError> { Ok(initialise_impact(ctx.states)) };

        let settings = alive_dead_settings(OccupancyBasis::Start).with_initial_occupancy("new", [("Alive", 1.0)]);
        let sim = CohortSimulator::new(alive_dead(), ["soc", "new"], alive_dead_oracle())
            .with_settings(settings)
            .with_contributor(Contributor::new("Life years", life_years))
            .with_contributor(Contributor::from_fn("Zero", zero))
            .with_contributor(Contributor::from_fn("Off", zero).disabled())
            .with_contributor(Contributor::from_fn("New only", zero).for_treatments(["new"]));

        let result = sim.run().unwrap();
        let soc = result.treatment("soc").unwrap();
        let slice = &soc.undiscounted.cost.per_cycle[0];

        assert_eq!(slice.by_contributor.get("Zero"), Some(&0.0));
        assert!(!slice.by_contributor.contains_key("Off"));
        assert!(!slice.by_contributor.contains_key("New only"));
        assert_eq!(soc.cost_contributors, vec!["Life years".to_string(), "Zero".to_string()]);

        let new = result.treatment("new").unwrap();
        assert!(new.cost_contributors.contains(&"New only".to_string()));
        assert_eq!(result.contributors.len(), 4);
    }

    #[test]
    fn test_non_finite_contributor_aborts_run() {
        let undefined_utility = |ctx: &EventContext<'_>| -> Result<Impact, BoxError> {
            let mut impact = initialise_impact(ctx.states);
            let (qalys, years) = (0.0, 0.0);
            impact.outcome_occupation.set("Alive", qalys / years)?;
            Ok(impact)
        };

        let settings = alive_dead_settings(OccupancyBasis::Start).with_initial_occupancy("new", [("Alive", 1.0)]);
        let sim = CohortSimulator::new(alive_dead(), ["soc", "new"], alive_dead_oracle())
            .with_settings(settings)
            .with_contributor(Contributor::new("Life years", life_years))
            .with_contributor(Contributor::from_fn("Utility", undefined_utility).for_treatments(["new"]));

        match sim.run() {
            Err(CohortError::Contributor { name, treatment, cycle, .. }) => {
                assert_eq!(name, "Utility");
                assert_eq!(treatment, "new");
                assert_eq!(cycle, 0);
            }
            other => panic!("expected contributor error, got {:?}", other.map(|r| r.icer)),
        }
    }

    #[test]
    fn test_mass_tolerance_is_configurable() {
        let settings = alive_dead_settings(OccupancyBasis::Start)
            .with_initial_occupancy("soc", [("Alive", 0.9999995)]);

        let default = CohortSimulator::new(alive_dead(), ["soc"], alive_dead_oracle()).with_settings(settings.clone());
        assert!(default.run().is_ok());

        let strict = CohortSimulator::new(alive_dead(), ["soc"], alive_dead_oracle())
            .with_settings(settings)
            .with_mass_tolerance(1e-9);
        match strict.run() {
            Err(CohortError::MassNotConserved { treatment, cycle, sum }) => {
                assert_eq!(treatment, "soc");
                assert_eq!(cycle, 0);
                assert_relative_eq!(sum, 0.9999995, epsilon = 1e-12);
            }
            other => panic!("expected mass error, got {:?}", other.map(|r| r.n_cycles())),
        }

        let negative = CohortSimulator::new(alive_dead(), ["soc"], alive_dead_oracle()).with_mass_tolerance(-1.0);
        assert!(matches!(negative.validate(), Err(CohortError::Config(_))));
    }

    #[test]
    fn test_loose_transition_tolerance_defers_to_mass_check() {
        let leaky = |_ctx: &TransitionContext<'_>| -> Result<DMatrix<f64>, BoxError> {
            Ok(DMatrix::from_row_slice(2, 2, &[0.9, 0.05, 0.0, 1.0]))
        };

        let sim = CohortSimulator::new(alive_dead(), ["soc"], leaky)
            .with_settings(alive_dead_settings(OccupancyBasis::Start))
            .with_transition_tolerance(0.1);

        match sim.run() {
            Err(CohortError::MassNotConserved { cycle, sum, .. }) => {
                assert_eq!(cycle, 0);
                assert_relative_eq!(sum, 0.95, epsilon = 1e-12);
            }
            other => panic!("expected mass error, got {:?}", other.map(|r| r.n_cycles())),
        }
    }

    #[test]
    fn test_arm_cycles_run_in_order() {
        let sim = CohortSimulator::new(alive_dead(), ["soc"], alive_dead_oracle())
            .with_settings(alive_dead_settings(OccupancyBasis::Start));
        let schedule = Discounting::from_settings(sim.settings()).schedule(3);

        let unstarted = ArmRun::start(&sim, "soc").unwrap();
        assert!(matches!(unstarted.finish(), Err(CohortError::Config(_))));

        let mut arm = ArmRun::start(&sim, "soc").unwrap();
        assert!(matches!(arm.step(&schedule[1]), Err(CohortError::Config(_))));
        assert_eq!(arm.phase, ArmPhase::Initialized);

        arm.step(&schedule[0]).unwrap();
        assert_eq!(arm.phase, ArmPhase::Running { cycle: 0 });
        assert!(arm.step(&schedule[0]).is_err());
        assert!(arm.step(&schedule[2]).is_err());
        assert_eq!(arm.trajectory.len(), 2);

        arm.step(&schedule[1]).unwrap();
        arm.step(&schedule[2]).unwrap();
        let result = arm.finish().unwrap();
        assert_eq!(result.n_cycles(), 3);
    }

    fn stochastic_matrix(n: usize) -> impl Strategy<Value = DMatrix<f64>> {
        prop::collection::vec(0.01f64..1.0, n * n).prop_map(move |raw| {
            let mut m = DMatrix::from_row_slice(n, n, &raw);
            for i in 0..n {
                let sum = m.row(i).sum();
                for j in 0..n {
                    m[(i, j)] /= sum;
                }
            }
            m
        })
    }

    fn occupancy(n: usize) -> impl Strategy<Value = Vec<f64>> {
        prop::collection::vec(0.0f64..1.0, n).prop_map(|raw| {
            let sum: f64 = raw.iter().sum::<f64>() + 1e-9;
            let mut v: Vec<f64> = raw.iter().map(|x| x / sum).collect();
            let rest: f64 = v[1..].iter().sum();
            v[0] = 1.0 - rest;
            v
        })
    }

    proptest! {
        #[test]
        fn prop_mass_conserved_and_totals_reconcile(
            p in stochastic_matrix(3),
            s0 in occupancy(3),
            unit_cost in 0.0f64..5_000.0,
            utility in 0.0f64..1.0,
            rate in 0.0f64..0.1,
        ) {
            let states = StateSpace::new(["S0", "S1", "S2"]).unwrap();
            let settings = RunSettings::default()
                .with_timeline(0.5, 5.0)
                .with_discount_rates(rate, rate / 2.0)
                .with_initial_occupancy("arm", [("S0", s0[0]), ("S1", s0[1]), ("S2", s0[2])]);

            let matrix = LabeledMatrix::new(p, Arc::new(states.clone())).unwrap();
            let events = move |ctx: &EventContext<'_>| -> Result<Impact, BoxError> {
                let mut impact = initialise_impact(ctx.states);
                impact.cost_occupation.set("S0", unit_cost)?;
                impact.outcome_occupation.set("S1", utility)?;
                impact.cost_flow.set("S0", "S2", unit_cost * 2.0)?;
                impact.outcome_flow.set("S1", "S0", -utility)?;
                Ok(impact)
            };

            let sim = CohortSimulator::new(states, ["arm"], ConstantOracle::new(matrix))
                .with_settings(settings)
                .with_contributor(Contributor::from_fn("Events", events))
                .with_contributor(Contributor::new("Life years", |ctx: &EventContext<'_>| {
                    let mut impact = initialise_impact(ctx.states);
                    impact.outcome_occupation.as_array_mut().fill(1.0);
                    Ok::<Impact, BoxError>(impact)
                }));

            let result = sim.run().unwrap();
            prop_assert!(result.max_mass_drift() < 1e-9);
            prop_assert!(result.reconciliation_error() < 1e-6);
        }
    }
}
