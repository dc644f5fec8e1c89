//! Contributors: named, toggleable sources of cost/outcome impacts.

use crate::impact::Impact;
use cohort_env::{BoxError, CohortError, CohortResult, EventContext};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Calculation behind a contributor.
///
/// Implementations are supplied from outside the engine and evaluated once
/// per (cycle, treatment). They must be pure with respect to the context.
pub trait ImpactModel: Send + Sync {
    fn calculate(&self, ctx: &EventContext<'_>) -> Result<Impact, BoxError>;
}

impl<F> ImpactModel for F
where
    F: Fn(&EventContext<'_>) -> Result<Impact, BoxError> + Send + Sync,
{
    fn calculate(&self, ctx: &EventContext<'_>) -> Result<Impact, BoxError> {
        self(ctx)
    }
}

/// A named, independently enable/disable-able impact source.
#[derive(Clone)]
pub struct Contributor {
    name: String,
    applies_to: Option<BTreeSet<String>>,
    enabled: bool,
    tags: BTreeSet<String>,
    model: Arc<dyn ImpactModel>,
}

impl Contributor {
    /// Creates an enabled contributor applying to every treatment.
    pub fn new(name: impl Into<String>, model: impl ImpactModel + 'static) -> Self {
        Self::from_shared(name, Arc::new(model))
    }

    /// Creates a contributor from a plain function or closure.
    pub fn from_fn<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&EventContext<'_>) -> Result<Impact, BoxError> + Send + Sync + 'static,
    {
        Self::from_shared(name, Arc::new(f))
    }

    pub fn from_shared(name: impl Into<String>, model: Arc<dyn ImpactModel>) -> Self {
        Self {
            name: name.into(),
            applies_to: None,
            enabled: true,
            tags: BTreeSet::new(),
            model,
        }
    }

    /// Restricts the contributor to the given treatments.
    pub fn for_treatments<I, S>(mut self, treatments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.applies_to = Some(treatments.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn disabled(self) -> Self {
        self.with_enabled(false)
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn treatments(&self) -> Option<&BTreeSet<String>> {
        self.applies_to.as_ref()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// True when enabled and either unrestricted or restricted to include `treatment`.
    pub fn applies(&self, treatment: &str) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.applies_to {
            None => true,
            Some(set) => set.contains(treatment),
        }
    }

    /// Runs the calculation, attaching contributor/treatment/cycle to any failure.
    pub fn calculate(&self, ctx: &EventContext<'_>) -> CohortResult<Impact> {
        self.model
            .calculate(ctx)
            .map_err(|source| CohortError::Contributor {
                name: self.name.clone(),
                treatment: ctx.treatment.to_string(),
                cycle: ctx.cycle,
                source,
            })
    }

    /// Serializable description for result catalogues.
    pub fn info(&self) -> ContributorInfo {
        ContributorInfo {
            name: self.name.clone(),
            enabled: self.enabled,
            treatments: self.applies_to.as_ref().map(|s| s.iter().cloned().collect()),
            tags: self.tags.iter().cloned().collect(),
        }
    }
}

impl fmt::Debug for Contributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contributor")
            .field("name", &self.name)
            .field("applies_to", &self.applies_to)
            .field("enabled", &self.enabled)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Catalogue entry describing a contributor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContributorInfo {
    pub name: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treatments: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
}
