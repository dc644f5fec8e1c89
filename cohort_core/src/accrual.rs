//! Accrual ledgers: totals with state, contributor and joint breakdowns.
//!
//! Every amount is booked into all four views at once, so
//! `total == sum(by_state) == sum(by_contributor) == sum(by_state_contributor)`
//! holds by construction (up to floating-point summation order).

use cohort_env::StateSpace;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Accrued quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cost,
    Outcome,
}

impl Metric {
    pub fn all() -> [Metric; 2] {
        [Metric::Cost, Metric::Outcome]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Metric::Cost => "cost",
            Metric::Outcome => "outcome",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscountKind {
    Undiscounted,
    Discounted,
}

impl DiscountKind {
    pub fn all() -> [DiscountKind; 2] {
        [DiscountKind::Undiscounted, DiscountKind::Discounted]
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiscountKind::Undiscounted => "undiscounted",
            DiscountKind::Discounted => "discounted",
        }
    }
}

impl fmt::Display for DiscountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A total and its three breakdowns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accrual {
    pub total: f64,
    pub by_state: BTreeMap<String, f64>,
    pub by_contributor: BTreeMap<String, f64>,
    /// state -> contributor -> amount
    pub by_state_contributor: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Accrual {
    /// Zero accrual with every state key present and the given contributors registered.
    pub fn new<'n>(states: &StateSpace, contributors: impl IntoIterator<Item = &'n str>) -> Self {
        let mut accrual = Self {
            total: 0.0,
            by_state: states.iter().map(|s| (s.to_string(), 0.0)).collect(),
            by_contributor: BTreeMap::new(),
            by_state_contributor: states.iter().map(|s| (s.to_string(), BTreeMap::new())).collect(),
        };
        for name in contributors {
            accrual.register(name);
        }
        accrual
    }

    /// Adds a zero entry for `contributor` in every breakdown that lacks it.
    pub fn register(&mut self, contributor: &str) {
        self.by_contributor.entry(contributor.to_string()).or_insert(0.0);
        for row in self.by_state_contributor.values_mut() {
            row.entry(contributor.to_string()).or_insert(0.0);
        }
    }

    /// Books `amount` for (state, contributor) into the total and all breakdowns.
    pub fn record(&mut self, state: &str, contributor: &str, amount: f64) {
        self.total += amount;
        *self.by_state.entry(state.to_string()).or_insert(0.0) += amount;
        *self.by_contributor.entry(contributor.to_string()).or_insert(0.0) += amount;
        *self
            .by_state_contributor
            .entry(state.to_string())
            .or_default()
            .entry(contributor.to_string())
            .or_insert(0.0) += amount;
    }

    /// Largest absolute difference between the total and any breakdown's sum.
    pub fn reconciliation_gap(&self) -> f64 {
        let state_sum: f64 = self.by_state.values().sum();
        let contributor_sum: f64 = self.by_contributor.values().sum();
        let joint_sum: f64 = self
            .by_state_contributor
            .values()
            .flat_map(|row| row.values())
            .sum();

        worst_gap(
            [state_sum, contributor_sum, joint_sum]
                .iter()
                .map(|s| (self.total - s).abs()),
        )
    }

    /// Removes the named contributors from the contributor and joint breakdowns.
    ///
    /// State keys and the total are left untouched.
    pub fn remove_contributors(&mut self, names: &BTreeSet<String>) {
        self.by_contributor.retain(|name, _| !names.contains(name));
        for row in self.by_state_contributor.values_mut() {
            row.retain(|name, _| !names.contains(name));
        }
    }
}

/// Cumulative and per-cycle accruals of one metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricLedger {
    pub cumulative: Accrual,
    pub per_cycle: Vec<Accrual>,
}

impl MetricLedger {
    pub fn new<'n>(states: &StateSpace, contributors: impl IntoIterator<Item = &'n str>) -> Self {
        Self {
            cumulative: Accrual::new(states, contributors),
            per_cycle: Vec::new(),
        }
    }

    /// Opens the accrual slice for the next cycle.
    pub fn begin_cycle(&mut self, states: &StateSpace) {
        self.per_cycle.push(Accrual::new(states, std::iter::empty()));
    }

    /// Registers a contributor in the current cycle and the cumulative accrual.
    pub fn register(&mut self, contributor: &str) {
        if let Some(current) = self.per_cycle.last_mut() {
            current.register(contributor);
        }
        self.cumulative.register(contributor);
    }

    /// Books an amount into the current cycle and the running cumulative accrual.
    pub fn record(&mut self, state: &str, contributor: &str, amount: f64) {
        if let Some(current) = self.per_cycle.last_mut() {
            current.record(state, contributor, amount);
        }
        self.cumulative.record(state, contributor, amount);
    }

    /// Worst reconciliation gap over the cumulative accrual, every cycle slice,
    /// and the sum of cycle totals against the cumulative total.
    pub fn reconciliation_gap(&self) -> f64 {
        let cycle_sum: f64 = self.per_cycle.iter().map(|a| a.total).sum();
        let slices = worst_gap(self.per_cycle.iter().map(Accrual::reconciliation_gap));

        worst_gap([
            self.cumulative.reconciliation_gap(),
            slices,
            (self.cumulative.total - cycle_sum).abs(),
        ])
    }

    pub fn remove_contributors(&mut self, names: &BTreeSet<String>) {
        self.cumulative.remove_contributors(names);
        for slice in &mut self.per_cycle {
            slice.remove_contributors(names);
        }
    }
}

/// Cost and outcome ledgers under one discounting kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccrualTotals {
    pub cost: MetricLedger,
    pub outcome: MetricLedger,
}

impl AccrualTotals {
    pub fn new<'n>(states: &StateSpace, contributors: &[&'n str]) -> Self {
        Self {
            cost: MetricLedger::new(states, contributors.iter().copied()),
            outcome: MetricLedger::new(states, contributors.iter().copied()),
        }
    }

    pub fn metric(&self, metric: Metric) -> &MetricLedger {
        match metric {
            Metric::Cost => &self.cost,
            Metric::Outcome => &self.outcome,
        }
    }

    pub fn metric_mut(&mut self, metric: Metric) -> &mut MetricLedger {
        match metric {
            Metric::Cost => &mut self.cost,
            Metric::Outcome => &mut self.outcome,
        }
    }

    pub fn begin_cycle(&mut self, states: &StateSpace) {
        self.cost.begin_cycle(states);
        self.outcome.begin_cycle(states);
    }

    pub fn register(&mut self, contributor: &str) {
        self.cost.register(contributor);
        self.outcome.register(contributor);
    }

    pub fn reconciliation_gap(&self) -> f64 {
        worst_gap([self.cost.reconciliation_gap(), self.outcome.reconciliation_gap()])
    }
}

/// Largest of a set of gaps. A NaN gap counts as infinite so it can never
/// pass a tolerance check.
pub(crate) fn worst_gap(gaps: impl IntoIterator<Item = f64>) -> f64 {
    gaps.into_iter().fold(0.0, |worst, gap| {
        if gap.is_nan() {
            f64::INFINITY
        } else {
            worst.max(gap)
        }
    })
}

/// Time spent in each state (occupancy x cycle length), cumulative and per cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OccupancyTime {
    pub by_state: BTreeMap<String, f64>,
    pub per_cycle: Vec<BTreeMap<String, f64>>,
}

impl OccupancyTime {
    pub fn new(states: &StateSpace) -> Self {
        Self {
            by_state: states.iter().map(|s| (s.to_string(), 0.0)).collect(),
            per_cycle: Vec::new(),
        }
    }

    /// Appends one cycle of per-state time (in state order) and accumulates it.
    pub fn push_cycle(&mut self, states: &StateSpace, years: impl IntoIterator<Item = f64>) {
        let slice: BTreeMap<String, f64> = states
            .iter()
            .zip(years)
            .map(|(s, y)| (s.to_string(), y))
            .collect();

        for (state, y) in &slice {
            *self.by_state.entry(state.clone()).or_insert(0.0) += y;
        }
        self.per_cycle.push(slice);
    }

    /// Total time over all states.
    pub fn total(&self) -> f64 {
        self.by_state.values().sum()
    }
}

/// Undiscounted and discounted occupancy time of one arm.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifeYears {
    pub undiscounted: OccupancyTime,
    pub discounted: OccupancyTime,
}
