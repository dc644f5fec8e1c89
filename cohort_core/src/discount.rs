//! Discounting policy: two independent annual rates, one timing convention.

use cohort_env::{DiscountTiming, RunSettings};
use serde::{Deserialize, Serialize};

/// Discounting at a fixed annual rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiscountPolicy {
    pub annual_rate: f64,
}

impl DiscountPolicy {
    pub fn new(annual_rate: f64) -> Self {
        Self { annual_rate }
    }

    /// (1 + rate)^(-years)
    pub fn factor(&self, years: f64) -> f64 {
        (1.0 + self.annual_rate).powf(-years)
    }
}

/// Discount factors applied to one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CycleDiscount {
    pub cycle: usize,
    pub t_years: f64,
    pub cost_factor: f64,
    pub outcome_factor: f64,
}

/// Cost and outcome policies sharing one cycle-time alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Discounting {
    pub cost: DiscountPolicy,
    pub outcome: DiscountPolicy,
    pub timing: DiscountTiming,
    pub cycle_length_years: f64,
}

impl Discounting {
    pub fn from_settings(settings: &RunSettings) -> Self {
        Self {
            cost: DiscountPolicy::new(settings.cost_discount_rate),
            outcome: DiscountPolicy::new(settings.outcome_discount_rate),
            timing: settings.discount_timing,
            cycle_length_years: settings.cycle_length_years,
        }
    }

    pub fn at_cycle(&self, cycle: usize) -> CycleDiscount {
        let t_years = self.timing.time_at(cycle, self.cycle_length_years);
        CycleDiscount {
            cycle,
            t_years,
            cost_factor: self.cost.factor(t_years),
            outcome_factor: self.outcome.factor(t_years),
        }
    }

    /// Factors for cycles `0..n_cycles`.
    pub fn schedule(&self, n_cycles: usize) -> Vec<CycleDiscount> {
        (0..n_cycles).map(|c| self.at_cycle(c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_start_alignment_cycle_zero_is_one() {
        let settings = RunSettings::default()
            .with_discount_rates(0.05, 0.03)
            .with_timing(DiscountTiming::Start);
        let d = Discounting::from_settings(&settings).at_cycle(0);

        assert_eq!(d.t_years, 0.0);
        assert_eq!(d.cost_factor, 1.0);
        assert_eq!(d.outcome_factor, 1.0);
    }

    #[test]
    fn test_mid_alignment_half_year() {
        let settings = RunSettings::default()
            .with_timeline(1.0, 10.0)
            .with_discount_rates(0.05, 0.05)
            .with_timing(DiscountTiming::Mid);
        let d = Discounting::from_settings(&settings).at_cycle(0);

        assert_relative_eq!(d.cost_factor, 1.05f64.powf(-0.5), epsilon = 1e-15);
        assert_relative_eq!(d.outcome_factor, 1.0 / 1.05f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_independent_rates() {
        let settings = RunSettings::default()
            .with_timeline(0.25, 5.0)
            .with_discount_rates(0.035, 0.015)
            .with_timing(DiscountTiming::End);
        let d = Discounting::from_settings(&settings).at_cycle(3);

        assert_relative_eq!(d.t_years, 1.0);
        assert_relative_eq!(d.cost_factor, 1.0 / 1.035, epsilon = 1e-12);
        assert_relative_eq!(d.outcome_factor, 1.0 / 1.015, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_rate_never_discounts() {
        let policy = DiscountPolicy::new(0.0);
        assert_eq!(policy.factor(0.0), 1.0);
        assert_eq!(policy.factor(37.5), 1.0);
    }

    #[test]
    fn test_schedule_is_decreasing() {
        let settings = RunSettings::default().with_discount_rates(0.05, 0.05);
        let schedule = Discounting::from_settings(&settings).schedule(5);

        assert_eq!(schedule.len(), 5);
        assert!(schedule.windows(2).all(|w| w[1].cost_factor < w[0].cost_factor));
    }
}
