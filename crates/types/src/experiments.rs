//! A/B testing and experiment types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Status of an experiment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
}

impl ExperimentStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// Transitions only move forward, except that a running experiment may be
    /// paused and resumed any number of times.
    pub fn can_transition_to(self, next: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        matches!(
            (self, next),
            (Draft, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Draft, Completed)
                | (Running, Completed)
                | (Paused, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ExperimentStatus::Completed
    }
}

/// Confidence level used for the per-variant reporting interval
///
/// Only affects interval width; the significance decision always uses the
/// engine's fixed alpha.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(from = "f64", into = "f64")]
pub enum ConfidenceLevel {
    Ninety,
    #[default]
    NinetyFive,
    NinetyNine,
}

impl ConfidenceLevel {
    pub fn value(self) -> f64 {
        match self {
            ConfidenceLevel::Ninety => 0.90,
            ConfidenceLevel::NinetyFive => 0.95,
            ConfidenceLevel::NinetyNine => 0.99,
        }
    }

    /// Map a numeric level onto a supported one, if it matches exactly.
    pub fn from_value(value: f64) -> Option<Self> {
        [
            ConfidenceLevel::Ninety,
            ConfidenceLevel::NinetyFive,
            ConfidenceLevel::NinetyNine,
        ]
        .into_iter()
        .find(|level| (level.value() - value).abs() < 1e-9)
    }
}

impl From<f64> for ConfidenceLevel {
    /// Unrecognized levels report at 95%.
    fn from(value: f64) -> Self {
        Self::from_value(value).unwrap_or_default()
    }
}

impl From<ConfidenceLevel> for f64 {
    fn from(level: ConfidenceLevel) -> Self {
        level.value()
    }
}

/// A single arm of an experiment, including the control
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Variant {
    /// Unique variant identifier
    pub id: Uuid,
    /// Variant name (e.g., "control", "green_button")
    pub name: String,
    /// Share of traffic on a 0-100 scale
    pub traffic_weight: f64,
    /// Whether this is the baseline every other variant is compared to
    pub is_control: bool,
    /// Subjects allocated to this variant
    pub visitors: u64,
    /// Subjects that converted
    pub conversions: u64,
    /// Accumulated conversion value
    pub revenue: f64,
    /// Set once, when this variant is frozen as the experiment winner
    pub is_winner: bool,
    /// Creation time; also the allocation ordering key
    pub created_at: DateTime<Utc>,
}

impl Variant {
    /// Create a new treatment variant
    pub fn new(name: impl Into<String>, traffic_weight: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            traffic_weight,
            is_control: false,
            visitors: 0,
            conversions: 0,
            revenue: 0.0,
            is_winner: false,
            created_at: Utc::now(),
        }
    }

    /// Create the control variant
    pub fn control(name: impl Into<String>, traffic_weight: f64) -> Self {
        Self {
            is_control: true,
            ..Self::new(name, traffic_weight)
        }
    }

    /// Seed the counters, mostly useful for imports and tests
    pub fn with_counts(mut self, visitors: u64, conversions: u64) -> Self {
        self.visitors = visitors;
        self.conversions = conversions;
        self
    }

    /// Conversions per visitor, 0 when nobody was allocated yet
    pub fn conversion_rate(&self) -> f64 {
        if self.visitors > 0 {
            self.conversions as f64 / self.visitors as f64
        } else {
            0.0
        }
    }

    pub fn revenue_per_visitor(&self) -> f64 {
        if self.visitors > 0 {
            self.revenue / self.visitors as f64
        } else {
            0.0
        }
    }
}

/// A/B test experiment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Experiment {
    /// Unique experiment identifier
    pub id: Uuid,
    /// Experiment name
    pub name: String,
    /// Current status
    pub status: ExperimentStatus,
    /// Variants in creation order
    pub variants: Vec<Variant>,
    /// Width of the reported confidence intervals
    pub confidence_level: ConfidenceLevel,
    /// When traffic started (if ever)
    pub started_at: Option<DateTime<Utc>>,
    /// When the experiment stopped accepting traffic
    pub ended_at: Option<DateTime<Utc>>,
    /// Planned end; the experiment is complete once this has passed
    pub scheduled_end: Option<DateTime<Utc>>,
    /// Whether a significant winner has been frozen
    pub is_significant: bool,
    /// Frozen winner
    pub winning_variant_id: Option<Uuid>,
    /// P-value of the frozen winner against control
    pub p_value: Option<f64>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Additional metadata
    pub metadata: HashMap<String, String>,
}

impl Experiment {
    /// Create a new experiment
    pub fn new(name: impl Into<String>, variants: Vec<Variant>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status: ExperimentStatus::Draft,
            variants,
            confidence_level: ConfidenceLevel::default(),
            started_at: None,
            ended_at: None,
            scheduled_end: None,
            is_significant: false,
            winning_variant_id: None,
            p_value: None,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_confidence_level(mut self, level: ConfidenceLevel) -> Self {
        self.confidence_level = level;
        self
    }

    pub fn with_scheduled_end(mut self, scheduled_end: DateTime<Utc>) -> Self {
        self.scheduled_end = Some(scheduled_end);
        self
    }

    /// Apply a status change and stamp the lifecycle timestamps.
    ///
    /// Does not validate the transition; see
    /// [`ExperimentStatus::can_transition_to`].
    pub fn apply_status(&mut self, status: ExperimentStatus, at: DateTime<Utc>) {
        match status {
            ExperimentStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(at);
            }
            ExperimentStatus::Completed => {
                self.ended_at.get_or_insert(at);
            }
            _ => {}
        }
        self.status = status;
    }

    /// The designated control variant
    pub fn control(&self) -> Option<&Variant> {
        self.variants.iter().find(|v| v.is_control)
    }

    pub fn variant(&self, variant_id: &Uuid) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == *variant_id)
    }

    pub fn variant_mut(&mut self, variant_id: &Uuid) -> Option<&mut Variant> {
        self.variants.iter_mut().find(|v| v.id == *variant_id)
    }

    pub fn total_visitors(&self) -> u64 {
        self.variants.iter().map(|v| v.visitors).sum()
    }

    pub fn total_weight(&self) -> f64 {
        self.variants.iter().map(|v| v.traffic_weight).sum()
    }

    /// Ordered `(variant, weight)` pairs used for bucketing
    pub fn weight_table(&self) -> Vec<(Uuid, f64)> {
        self.variants
            .iter()
            .map(|v| (v.id, v.traffic_weight))
            .collect()
    }

    /// The frozen winning variant, if any
    pub fn winner(&self) -> Option<&Variant> {
        self.winning_variant_id.and_then(|id| self.variant(&id))
    }
}

/// Durable subject to variant mapping
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Allocation {
    pub experiment_id: Uuid,
    pub subject_id: String,
    pub variant_id: Uuid,
    pub allocated_at: DateTime<Utc>,
}

/// Outcome of an allocation request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocationResult {
    pub variant_id: Uuid,
    /// False when the subject was already allocated
    pub is_new_allocation: bool,
}

/// A single conversion observed for an allocated subject
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversionEvent {
    pub experiment_id: Uuid,
    pub variant_id: Uuid,
    pub subject_id: Option<String>,
    /// Optional monetary value added to the variant revenue
    pub value: Option<f64>,
}

/// Winner fields written once onto an experiment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WinnerDecision {
    pub variant_id: Uuid,
    pub p_value: f64,
}
