//! Built-in reference models.

use crate::bundle::{BundleSettings, ModelBundle};
use crate::events::{EventDefinition, EventEntry};
use crate::oracle::TransitionRule;
use crate::quantity::{CycleWindow, Quantity, Scope};
use cohort_core::{DiscountKind, Metric, SimulationResult};
use cohort_env::{DiscountTiming, OccupancyBasis, Period, RichParameter, TimeUnit};
use std::collections::{BTreeMap, HashMap};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Two-state absorbing model with known closed-form totals
    AliveDead,

    /// PFS / PPS / Death with a new drug against standard of care
    Progression,

    /// VBT against spinal fusion with revision surgery chains
    SpinalSurgery,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::AliveDead,
            ScenarioId::Progression,
            ScenarioId::SpinalSurgery,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::AliveDead => "alive_dead",
            ScenarioId::Progression => "progression",
            ScenarioId::SpinalSurgery => "spinal_surgery",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::AliveDead => "Alive/Dead, 10% annual mortality, 3 annual cycles, end-of-cycle occupancy",
            ScenarioId::Progression => "Oncology partitioned progression, new drug vs standard of care over 20 years",
            ScenarioId::SpinalSurgery => "Vertebral body tethering vs spinal fusion, quarterly cycles over 5 years",
        }
    }

    /// The scenario's model bundle.
    pub fn bundle(&self) -> ModelBundle {
        match self {
            ScenarioId::AliveDead => alive_dead(),
            ScenarioId::Progression => progression(),
            ScenarioId::SpinalSurgery => spinal_surgery(),
        }
    }

    /// Scenario-specific expectations on a run with the bundle's own settings.
    pub fn check(&self, result: &SimulationResult) -> Result<(), String> {
        match self {
            ScenarioId::AliveDead => check_alive_dead(result),
            ScenarioId::Progression => check_progression(result),
            ScenarioId::SpinalSurgery => check_spinal_surgery(result),
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "alive_dead" | "alivedead" | "two_state" => Ok(ScenarioId::AliveDead),
            "progression" | "oncology" => Ok(ScenarioId::Progression),
            "spinal_surgery" | "spinalsurgery" | "vbt" => Ok(ScenarioId::SpinalSurgery),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

fn params(values: &[(&str, f64, &str)]) -> HashMap<String, RichParameter> {
    values
        .iter()
        .map(|(name, value, description)| {
            (name.to_string(), RichParameter::new(*value).with_description(description))
        })
        .collect()
}

fn occupancy(entries: &[(&str, &str)]) -> BTreeMap<String, BTreeMap<String, f64>> {
    entries
        .iter()
        .map(|(treatment, state)| {
            let start: BTreeMap<String, f64> = [(state.to_string(), 1.0)].into_iter().collect();
            (treatment.to_string(), start)
        })
        .collect()
}

fn only(treatments: &[&str]) -> Scope {
    Scope {
        treatments: Some(treatments.iter().map(|t| t.to_string()).collect()),
        cycles: None,
    }
}

fn cycles(window: CycleWindow) -> Scope {
    Scope {
        treatments: None,
        cycles: Some(window),
    }
}

fn product(items: &[Quantity]) -> Quantity {
    Quantity::Product(items.to_vec())
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn alive_dead() -> ModelBundle {
    ModelBundle {
        name: "alive_dead".to_string(),
        description: ScenarioId::AliveDead.description().to_string(),
        health_states: strings(&["Alive", "Dead"]),
        treatments: strings(&["cohort"]),
        parameters: params(&[("p_death", 0.1, "Annual probability of death")]),
        settings: BundleSettings {
            time_horizon: Period::new(3.0, TimeUnit::Years),
            cycle_length: Period::new(1.0, TimeUnit::Years),
            cost_discount_rate: 0.0,
            outcome_discount_rate: 0.0,
            discount_timing: DiscountTiming::Start,
            occupancy_basis: OccupancyBasis::End,
            initial_occupancy: occupancy(&[("cohort", "Alive")]),
        },
        transitions: vec![
            TransitionRule::probability("Alive", "Dead", "p_death"),
            TransitionRule::complement("Alive", "Alive"),
        ],
        events: vec![EventDefinition {
            tags: strings(&["outcome", "life_years"]),
            ..EventDefinition::new(
                "Life years",
                vec![EventEntry::occupation(Metric::Outcome, "Alive", 1.0)],
            )
        }],
    }
}

fn check_alive_dead(result: &SimulationResult) -> Result<(), String> {
    let arm = result
        .treatment("cohort")
        .ok_or_else(|| "missing arm 'cohort'".to_string())?;

    let outcome = arm.total(DiscountKind::Undiscounted, Metric::Outcome);
    if (outcome - 2.439).abs() > 1e-9 {
        return Err(format!("undiscounted outcome {:.6} != 2.439", outcome));
    }

    let alive = arm
        .occupancy_at(3, "Alive")
        .ok_or_else(|| "trajectory shorter than 3 cycles".to_string())?;
    if (alive - 0.729).abs() > 1e-9 {
        return Err(format!("Alive occupancy at cycle 3 is {:.6}, expected 0.729", alive));
    }
    Ok(())
}

fn progression() -> ModelBundle {
    let new_drug = "new_drug";
    let soc = "standard_of_care";

    ModelBundle {
        name: "progression".to_string(),
        description: ScenarioId::Progression.description().to_string(),
        health_states: strings(&["PFS", "PPS", "Death"]),
        treatments: strings(&[new_drug, soc]),
        parameters: params(&[
            ("p_progress", 0.20, "Annual probability of progression on standard of care"),
            ("rr_progress_new", 0.70, "Relative risk of progression on the new drug"),
            ("p_death_pfs", 0.03, "Annual probability of death before progression"),
            ("p_death_pps", 0.25, "Annual probability of death after progression"),
            ("drug_cost_new", 24_000.0, "One-off acquisition cost of the new drug"),
            ("drug_cost_soc", 3_000.0, "One-off cost of standard of care"),
            ("pfs_cost", 1_200.0, "Annual monitoring cost in PFS"),
            ("pps_cost", 6_500.0, "Annual supportive care cost in PPS"),
            ("progression_cost", 4_000.0, "Work-up cost at progression"),
            ("u_pfs", 0.82, "Utility in PFS"),
            ("u_pps", 0.58, "Utility in PPS"),
        ]),
        settings: BundleSettings {
            time_horizon: Period::new(20.0, TimeUnit::Years),
            cycle_length: Period::new(1.0, TimeUnit::Years),
            cost_discount_rate: 0.035,
            outcome_discount_rate: 0.035,
            discount_timing: DiscountTiming::Mid,
            occupancy_basis: OccupancyBasis::HalfCycle,
            initial_occupancy: occupancy(&[(new_drug, "PFS"), (soc, "PFS")]),
        },
        transitions: vec![
            TransitionRule::probability(
                "PFS",
                "PPS",
                product(&["p_progress".into(), "rr_progress_new".into()]),
            )
            .in_scope(only(&[new_drug])),
            TransitionRule::probability("PFS", "PPS", "p_progress").in_scope(only(&[soc])),
            TransitionRule::probability("PFS", "Death", "p_death_pfs"),
            TransitionRule::complement("PFS", "PFS"),
            TransitionRule::probability("PPS", "Death", "p_death_pps"),
            TransitionRule::complement("PPS", "PPS"),
        ],
        events: vec![
            EventDefinition {
                tags: strings(&["cost", "drug"]),
                ..EventDefinition::new(
                    "Treatment acquisition",
                    vec![
                        EventEntry::occupation(Metric::Cost, "PFS", "drug_cost_new")
                            .in_scope(Scope {
                                treatments: Some(strings(&[new_drug])),
                                cycles: Some(CycleWindow::only(0)),
                            }),
                        EventEntry::occupation(Metric::Cost, "PFS", "drug_cost_soc")
                            .in_scope(Scope {
                                treatments: Some(strings(&[soc])),
                                cycles: Some(CycleWindow::only(0)),
                            }),
                    ],
                )
            },
            EventDefinition {
                tags: strings(&["cost"]),
                ..EventDefinition::new(
                    "Disease management",
                    vec![
                        EventEntry::occupation(Metric::Cost, "PFS", "pfs_cost"),
                        EventEntry::occupation(Metric::Cost, "PPS", "pps_cost"),
                    ],
                )
            },
            EventDefinition {
                tags: strings(&["cost", "transition"]),
                ..EventDefinition::new(
                    "Progression work-up",
                    vec![EventEntry::flow(Metric::Cost, "PFS", "PPS", "progression_cost")],
                )
            },
            EventDefinition {
                tags: strings(&["utility"]),
                ..EventDefinition::new(
                    "Health state utilities",
                    vec![
                        EventEntry::occupation(
                            Metric::Outcome,
                            "PFS",
                            product(&["u_pfs".into(), "cycle_length_years".into()]),
                        ),
                        EventEntry::occupation(
                            Metric::Outcome,
                            "PPS",
                            product(&["u_pps".into(), "cycle_length_years".into()]),
                        ),
                    ],
                )
            },
            EventDefinition {
                enabled: false,
                tags: strings(&["cost"]),
                ..EventDefinition::new(
                    "End of life care",
                    vec![EventEntry::flow(Metric::Cost, "PPS", "Death", 10_000.0)],
                )
            },
        ],
    }
}

fn check_progression(result: &SimulationResult) -> Result<(), String> {
    let comparison = result
        .icer
        .discounted
        .comparison("standard_of_care")
        .ok_or_else(|| "missing comparison against standard_of_care".to_string())?;

    if comparison.delta_outcome <= 0.0 {
        return Err(format!(
            "new drug should gain QALYs, delta outcome = {:.4}",
            comparison.delta_outcome
        ));
    }
    if comparison.delta_cost <= 0.0 {
        return Err(format!("new drug should cost more, delta cost = {:.2}", comparison.delta_cost));
    }
    match comparison.icer {
        Some(icer) if icer > 0.0 => {}
        other => return Err(format!("expected a positive ICER, got {:?}", other)),
    }

    // Progression work-up is a PFS -> PPS flow and belongs to PFS.
    for arm in &result.per_treatment {
        let joint = &arm.undiscounted.cost.cumulative.by_state_contributor;
        let at_pps = joint
            .get("PPS")
            .and_then(|row| row.get("Progression work-up"))
            .copied()
            .unwrap_or(0.0);
        if at_pps != 0.0 {
            return Err(format!("{}: progression cost booked at destination PPS", arm.treatment));
        }
        if arm.cost_contributors.iter().any(|c| c == "End of life care") {
            return Err(format!("{}: disabled contributor was reported", arm.treatment));
        }
    }
    Ok(())
}

const VBT_INDEX: &str = "VBT Index Procedure";
const FUSION_INDEX: &str = "Spinal Fusion Index Procedure";
const POST_VBT: &str = "Postoperative VBT";
const POST_FUSION: &str = "Postoperative Fusion";
const VBT_REVISION: &str = "VBT Revision";
const FUSION_REV_1: &str = "Fusion Revision 1";
const POST_FUSION_REV_1: &str = "Postoperative Fusion Revision 1";
const FUSION_REV_2: &str = "Fusion Revision 2";
const POST_FUSION_REV_2: &str = "Postoperative Fusion Revision 2";
const INELIGIBLE: &str = "Ineligible For Further Fusion Revision";

fn first_cycle_then(from: &str, to: &str, first: &str, later: &str) -> [TransitionRule; 2] {
    [
        TransitionRule::probability(from, to, first).in_scope(cycles(CycleWindow::only(0))),
        TransitionRule::probability(from, to, later).in_scope(cycles(CycleWindow::starting(1))),
    ]
}

fn spinal_surgery() -> ModelBundle {
    let vbt = "VBT";
    let fusion = "Fusion";

    let mut transitions = vec![
        TransitionRule::probability(FUSION_INDEX, POST_FUSION, 1.0),
        TransitionRule::probability(VBT_INDEX, POST_VBT, 1.0),
        TransitionRule::probability(POST_VBT, VBT_REVISION, "vbt_revision_prob_quarterly"),
        TransitionRule::complement(POST_VBT, POST_VBT),
        TransitionRule::probability(VBT_REVISION, POST_VBT, 1.0),
        TransitionRule::complement(POST_FUSION, POST_FUSION),
        TransitionRule::probability(FUSION_REV_1, POST_FUSION_REV_1, 1.0),
        TransitionRule::complement(POST_FUSION_REV_1, POST_FUSION_REV_1),
        TransitionRule::probability(FUSION_REV_2, POST_FUSION_REV_2, 1.0),
        TransitionRule::complement(POST_FUSION_REV_2, POST_FUSION_REV_2),
    ];
    transitions.extend(first_cycle_then(POST_VBT, FUSION_INDEX, "vbt_to_fusion_prob_q1", "vbt_to_fusion_prob_later"));
    transitions.extend(first_cycle_then(POST_FUSION, FUSION_REV_1, "fusion_revision_prob_q1", "fusion_revision_prob_later"));
    transitions.extend(first_cycle_then(
        POST_FUSION_REV_1,
        FUSION_REV_2,
        "fusion_revision_prob_q1",
        "fusion_revision_prob_later",
    ));
    transitions.extend(first_cycle_then(
        POST_FUSION_REV_2,
        INELIGIBLE,
        "fusion_revision_prob_q1",
        "fusion_revision_prob_later",
    ));

    let disutility = |from: &str, to: &str, parameter: &str| {
        EventEntry::flow(
            Metric::Outcome,
            from,
            to,
            product(&[
                (-1.0).into(),
                parameter.into(),
                "recovery_duration_fraction".into(),
                "cycle_length_years".into(),
            ]),
        )
    };
    let utility = |state: &str, parameter: &str| {
        EventEntry::occupation(
            Metric::Outcome,
            state,
            product(&[parameter.into(), "cycle_length_years".into()]),
        )
    };
    let quarterly = |state: &str, parameter: &str| {
        EventEntry::occupation(
            Metric::Cost,
            state,
            product(&[parameter.into(), "cycle_length_years".into()]),
        )
    };

    ModelBundle {
        name: "spinal_surgery".to_string(),
        description: ScenarioId::SpinalSurgery.description().to_string(),
        health_states: strings(&[
            VBT_INDEX,
            FUSION_INDEX,
            POST_VBT,
            POST_FUSION,
            VBT_REVISION,
            FUSION_REV_1,
            POST_FUSION_REV_1,
            FUSION_REV_2,
            POST_FUSION_REV_2,
            INELIGIBLE,
        ]),
        treatments: strings(&[vbt, fusion]),
        parameters: params(&[
            ("vbt_index_device_cost", 18_500.0, "VBT tether and screws"),
            ("fusion_device_cost", 11_000.0, "Fusion rods and screws"),
            ("non_device_cost", 22_000.0, "Theatre, stay and staff per procedure"),
            ("revision_device_cost", 6_000.0, "Device cost of a revision"),
            ("vbt_revision_prob_quarterly", 0.012, "Quarterly probability of VBT revision"),
            ("vbt_to_fusion_prob_q1", 0.02, "Conversion to fusion in the first quarter"),
            ("vbt_to_fusion_prob_later", 0.004, "Quarterly conversion to fusion afterwards"),
            ("fusion_revision_prob_q1", 0.015, "Fusion revision in the first quarter"),
            ("fusion_revision_prob_later", 0.003, "Quarterly fusion revision afterwards"),
            ("u_post_vbt", 0.86, "Utility after VBT"),
            ("u_post_fusion", 0.80, "Utility after fusion"),
            ("u_post_revision", 0.74, "Utility after a fusion revision"),
            ("u_ineligible", 0.62, "Utility when no further revision is possible"),
            ("procedure_disutility", 0.30, "Utility decrement while recovering"),
            ("recovery_duration_fraction", 0.5, "Share of a cycle spent recovering"),
            ("follow_up_cost_annual", 900.0, "Annual post-operative follow-up"),
            ("ineligible_cost_annual", 4_200.0, "Annual pain management when ineligible"),
        ]),
        settings: BundleSettings {
            time_horizon: Period::new(5.0, TimeUnit::Years),
            cycle_length: Period::new(3.0, TimeUnit::Months),
            cost_discount_rate: 0.035,
            outcome_discount_rate: 0.035,
            discount_timing: DiscountTiming::Mid,
            occupancy_basis: OccupancyBasis::Start,
            initial_occupancy: occupancy(&[(vbt, VBT_INDEX), (fusion, FUSION_INDEX)]),
        },
        transitions,
        events: vec![
            EventDefinition {
                tags: strings(&["cost", "procedure"]),
                ..EventDefinition::new(
                    "Index Procedure Costs",
                    vec![
                        EventEntry::flow(Metric::Cost, VBT_INDEX, POST_VBT, "vbt_index_device_cost"),
                        EventEntry::flow(Metric::Cost, VBT_INDEX, POST_VBT, "non_device_cost"),
                        EventEntry::flow(Metric::Cost, FUSION_INDEX, POST_FUSION, "fusion_device_cost"),
                        EventEntry::flow(Metric::Cost, FUSION_INDEX, POST_FUSION, "non_device_cost"),
                    ],
                )
            },
            EventDefinition {
                tags: strings(&["cost", "procedure", "revision"]),
                ..EventDefinition::new(
                    "Revision Procedure Costs",
                    [
                        (POST_VBT, VBT_REVISION),
                        (POST_FUSION, FUSION_REV_1),
                        (POST_FUSION_REV_1, FUSION_REV_2),
                    ]
                    .iter()
                    .flat_map(|(from, to)| {
                        [
                            EventEntry::flow(Metric::Cost, from, to, "revision_device_cost"),
                            EventEntry::flow(Metric::Cost, from, to, "non_device_cost"),
                        ]
                    })
                    .collect(),
                )
            },
            EventDefinition {
                tags: strings(&["utility", "disutility", "procedure"]),
                ..EventDefinition::new(
                    "Procedure Recovery Disutility",
                    vec![
                        disutility(POST_VBT, VBT_REVISION, "procedure_disutility"),
                        disutility(POST_FUSION, FUSION_REV_1, "procedure_disutility"),
                        disutility(POST_FUSION_REV_1, FUSION_REV_2, "procedure_disutility"),
                        disutility(POST_VBT, FUSION_INDEX, "procedure_disutility"),
                    ],
                )
            },
            EventDefinition {
                tags: strings(&["utility"]),
                ..EventDefinition::new(
                    "Health State Utilities",
                    vec![
                        utility(POST_VBT, "u_post_vbt"),
                        utility(POST_FUSION, "u_post_fusion"),
                        utility(POST_FUSION_REV_1, "u_post_revision"),
                        utility(POST_FUSION_REV_2, "u_post_revision"),
                        utility(INELIGIBLE, "u_ineligible"),
                    ],
                )
            },
            EventDefinition {
                tags: strings(&["cost", "follow_up"]),
                ..EventDefinition::new(
                    "Postoperative Follow-up Costs",
                    vec![
                        quarterly(POST_VBT, "follow_up_cost_annual"),
                        quarterly(POST_FUSION, "follow_up_cost_annual"),
                        quarterly(POST_FUSION_REV_1, "follow_up_cost_annual"),
                        quarterly(POST_FUSION_REV_2, "follow_up_cost_annual"),
                    ],
                )
            },
            EventDefinition {
                tags: strings(&["cost"]),
                ..EventDefinition::new(
                    "Ineligible State Costs",
                    vec![quarterly(INELIGIBLE, "ineligible_cost_annual")],
                )
            },
        ],
    }
}

fn check_spinal_surgery(result: &SimulationResult) -> Result<(), String> {
    let bundle = spinal_surgery();
    let index_cost = |device: &str| -> f64 {
        let value = |name: &str| bundle.parameters.get(name).map_or(0.0, |p| p.value);
        value(device) + value("non_device_cost")
    };

    for (treatment, index_state, post_state, device) in [
        ("VBT", VBT_INDEX, POST_VBT, "vbt_index_device_cost"),
        ("Fusion", FUSION_INDEX, POST_FUSION, "fusion_device_cost"),
    ] {
        let arm = result
            .treatment(treatment)
            .ok_or_else(|| format!("missing arm '{}'", treatment))?;
        let joint = &arm.undiscounted.cost.cumulative.by_state_contributor;
        let booked = |state: &str| -> f64 {
            joint
                .get(state)
                .and_then(|row| row.get("Index Procedure Costs"))
                .copied()
                .unwrap_or(0.0)
        };

        // The whole cohort leaves the index state in cycle 0.
        let expected = index_cost(device);
        if (booked(index_state) - expected).abs() > 1e-6 {
            return Err(format!(
                "{}: index procedure cost at '{}' is {:.2}, expected {:.2}",
                treatment,
                index_state,
                booked(index_state),
                expected
            ));
        }
        if booked(post_state) != 0.0 {
            return Err(format!("{}: index procedure cost booked at destination", treatment));
        }
    }

    let fusion = result
        .treatment("Fusion")
        .ok_or_else(|| "missing arm 'Fusion'".to_string())?;
    if fusion.occupancy_at(fusion.n_cycles(), INELIGIBLE).unwrap_or(0.0) <= 0.0 {
        return Err("no fusion patients reached the ineligible state".to_string());
    }
    if result.icer.discounted.comparisons.len() != 1 {
        return Err("expected exactly one comparison".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>().unwrap(), scenario);
            assert_eq!(scenario.to_string(), scenario.name());
        }
        assert!("markov_chain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_bundles_validate() {
        for scenario in ScenarioId::all() {
            let bundle = scenario.bundle();
            assert_eq!(bundle.name, scenario.name());
            assert!(bundle.validate().is_ok(), "{} failed validation", scenario);
        }
    }

    #[test]
    fn test_spinal_cycle_count() {
        let settings = ScenarioId::SpinalSurgery.bundle().run_settings();
        assert_eq!(settings.n_cycles().unwrap(), 20);
    }
}
