//! Experiment eligibility checks
//!
//! Decides whether an experiment may allocate traffic right now. The request
//! context is accepted but not yet interpreted; it is where targeting rules
//! (geography, device) will plug in.

use abtest_types::{Experiment, ExperimentStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque request attributes passed through allocation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocationContext {
    pub attributes: HashMap<String, String>,
}

impl AllocationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Outcome of an eligibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    Eligible,
    NotRunning(ExperimentStatus),
    NotStarted,
    Ended,
}

impl Eligibility {
    pub fn is_eligible(self) -> bool {
        self == Eligibility::Eligible
    }
}

/// Lifecycle gate in front of allocation
#[derive(Debug, Clone, Copy, Default)]
pub struct EligibilityChecker;

impl EligibilityChecker {
    pub fn new() -> Self {
        Self
    }

    pub fn is_eligible(&self, experiment: &Experiment, context: &AllocationContext) -> bool {
        self.check(experiment, context).is_eligible()
    }

    pub fn check(&self, experiment: &Experiment, context: &AllocationContext) -> Eligibility {
        self.check_at(experiment, context, Utc::now())
    }

    /// Evaluate eligibility at a fixed point in time
    pub fn check_at(
        &self,
        experiment: &Experiment,
        _context: &AllocationContext,
        now: DateTime<Utc>,
    ) -> Eligibility {
        if experiment.status != ExperimentStatus::Running {
            return Eligibility::NotRunning(experiment.status);
        }

        if experiment.started_at.is_some_and(|start| now < start) {
            return Eligibility::NotStarted;
        }

        if experiment.ended_at.is_some_and(|end| now > end) {
            return Eligibility::Ended;
        }

        Eligibility::Eligible
    }
}
