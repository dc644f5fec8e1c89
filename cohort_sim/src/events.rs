//! Declarative events: contributors described as tables of impact entries.

use crate::quantity::{Quantity, Scope};
use cohort_core::{initialise_impact, Contributor, Impact, ImpactModel, Metric};
use cohort_env::{BoxError, EventContext};
use serde::{Deserialize, Serialize};

/// Where an entry's amount lands in the impact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Target {
    /// Per unit of occupancy in `state`
    Occupation { state: String },
    /// Per unit of mass moving from `from` to `to`
    Flow { from: String, to: String },
}

/// One cost or outcome amount of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    pub metric: Metric,

    #[serde(flatten)]
    pub target: Target,

    pub amount: Quantity,

    #[serde(flatten)]
    pub scope: Scope,
}

impl EventEntry {
    pub fn occupation(metric: Metric, state: &str, amount: impl Into<Quantity>) -> Self {
        Self {
            metric,
            target: Target::Occupation {
                state: state.to_string(),
            },
            amount: amount.into(),
            scope: Scope::default(),
        }
    }

    pub fn flow(metric: Metric, from: &str, to: &str, amount: impl Into<Quantity>) -> Self {
        Self {
            metric,
            target: Target::Flow {
                from: from.to_string(),
                to: to.to_string(),
            },
            amount: amount.into(),
            scope: Scope::default(),
        }
    }

    pub fn in_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// States named by the target.
    pub fn states(&self) -> Vec<&str> {
        match &self.target {
            Target::Occupation { state } => vec![state.as_str()],
            Target::Flow { from, to } => vec![from.as_str(), to.as_str()],
        }
    }
}

/// A named event as authored in a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub name: String,

    #[serde(default = "enabled_by_default")]
    pub enabled: bool,

    /// Treatments the event applies to (all when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub treatments: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    pub entries: Vec<EventEntry>,
}

fn enabled_by_default() -> bool {
    true
}

impl EventDefinition {
    pub fn new(name: &str, entries: Vec<EventEntry>) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            treatments: None,
            tags: Vec::new(),
            entries,
        }
    }

    /// Engine contributor evaluating this event's entries.
    pub fn to_contributor(&self) -> Contributor {
        let mut contributor = Contributor::new(self.name.clone(), TableEvent::new(self.entries.clone()))
        .with_enabled(self.enabled)
        .with_tags(self.tags.iter().cloned());

        if let Some(treatments) = &self.treatments {
            contributor = contributor.for_treatments(treatments.iter().cloned());
        }
        contributor
    }
}

/// Impact model summing the active entries of one event.
#[derive(Debug, Clone)]
pub struct TableEvent {
    entries: Vec<EventEntry>,
}

impl TableEvent {
    pub fn new(entries: Vec<EventEntry>) -> Self {
        Self { entries }
    }
}

impl ImpactModel for TableEvent {
    fn calculate(&self, ctx: &EventContext<'_>) -> Result<Impact, BoxError> {
        let mut impact = initialise_impact(ctx.states);

        for entry in self.entries.iter().filter(|e| e.scope.applies(ctx)) {
            let amount = entry.amount.resolve(ctx)?;
            match (&entry.target, entry.metric) {
                (Target::Occupation { state }, Metric::Cost) => impact.cost_occupation.add(state, amount)?,
                (Target::Occupation { state }, Metric::Outcome) => impact.outcome_occupation.add(state, amount)?,
                (Target::Flow { from, to }, Metric::Cost) => impact.cost_flow.add(from, to, amount)?,
                (Target::Flow { from, to }, Metric::Outcome) => impact.outcome_flow.add(from, to, amount)?,
            }
        }

        Ok(impact)
    }
}
