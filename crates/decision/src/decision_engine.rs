//! Winner selection, stopping rules and recommendations
//!
//! The decision engine compares every treatment against the designated
//! control, picks a winner among the significant ones, and evaluates the
//! completion policy. The evaluation itself is pure ([`DecisionEngine::evaluate_at`]);
//! [`DecisionEngine::reevaluate`] adds the two writes it may trigger:
//!
//! 1. **Winner freeze**: the first detected winner is written with a
//!    compare-and-set and never overwritten afterwards, whatever later
//!    statistics say.
//! 2. **Auto-completion**: once the stopping rule fires, a running or paused
//!    experiment is moved to completed.

use abtest_store::RecordStore;
use abtest_types::{ABTestConfig, ConfidenceLevel, Experiment, ExperimentStatus, WinnerDecision};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    errors::{DecisionError, Result},
    statistical::{ConfidenceInterval, SampleSizeCalculator, SignificanceResult, ZTest},
};

/// Power used when estimating remaining traffic
const DEFAULT_POWER: f64 = 0.8;

/// Per-variant statistics of one evaluation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariantStats {
    pub variant_id: Uuid,
    pub name: String,
    pub is_control: bool,
    pub traffic_weight: f64,
    pub visitors: u64,
    pub conversions: u64,
    pub revenue: f64,
    /// Conversions per visitor (fraction, not percent)
    pub conversion_rate: f64,
    pub revenue_per_visitor: f64,
    /// Wald interval of the conversion rate, in percent
    pub confidence_interval: ConfidenceInterval,
    /// Comparison against control; `None` for the control itself
    pub significance: Option<SignificanceResult>,
    /// Frozen winner flag as stored
    pub is_winner: bool,
}

impl VariantStats {
    pub fn is_significant(&self) -> bool {
        self.significance.is_some_and(|s| s.is_significant)
    }

    pub fn lift(&self) -> f64 {
        self.significance.map_or(0.0, |s| s.lift)
    }
}

/// Winner as reported to callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WinnerSummary {
    pub variant_id: Uuid,
    pub name: String,
    pub p_value: f64,
    /// Lift over control at the time of this evaluation, in percent
    pub lift: f64,
    pub conversion_rate: f64,
    /// Whether the winner is already persisted
    pub frozen: bool,
}

/// Why an experiment counts as complete
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    /// A winner exists and total traffic passed the minimum
    WinnerWithSufficientTraffic,
    /// The scheduled end is in the past
    ScheduledEndReached,
    /// Status was set to completed
    Completed,
}

/// Advisory next step for the experiment owner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Recommendation {
    KeepRunning {
        /// Estimated visitors still needed per variant to detect the observed lift
        additional_visitors: Option<u64>,
    },
    TryLargerChange,
    RollOut {
        variant_id: Uuid,
        variant_name: String,
        lift: f64,
    },
    NeedsMoreTraffic {
        total_visitors: u64,
        threshold: u64,
    },
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recommendation::KeepRunning { additional_visitors: Some(n) } => write!(
                f,
                "No significant difference yet. Keep the experiment running, about {} more visitors per variant.",
                n
            ),
            Recommendation::KeepRunning { additional_visitors: None } => write!(
                f,
                "No significant difference yet. Keep the experiment running to collect more data."
            ),
            Recommendation::TryLargerChange => write!(
                f,
                "No significant difference despite substantial traffic. Try a larger change."
            ),
            Recommendation::RollOut { variant_name, lift, .. } => write!(
                f,
                "Roll out variant '{}', lift {:+.1}% over control.",
                variant_name, lift
            ),
            Recommendation::NeedsMoreTraffic { total_visitors, threshold } => write!(
                f,
                "Needs more traffic: {} visitors so far, at least {} recommended.",
                total_visitors, threshold
            ),
        }
    }
}

/// Outcome of one pure evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub variants: Vec<VariantStats>,
    pub total_visitors: u64,
    pub winner: Option<WinnerSummary>,
    /// Winner detected in this evaluation and not yet frozen
    pub newly_detected: Option<WinnerDecision>,
    pub completion: Option<CompletionReason>,
    pub recommendations: Vec<Recommendation>,
}

/// Results of an experiment as exposed to callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentReport {
    pub experiment_id: Uuid,
    pub name: String,
    pub status: ExperimentStatus,
    pub confidence_level: ConfidenceLevel,
    pub variants: Vec<VariantStats>,
    pub total_visitors: u64,
    pub winner: Option<WinnerSummary>,
    pub is_complete: bool,
    pub completion_reason: Option<CompletionReason>,
    pub recommendations: Vec<Recommendation>,
    pub generated_at: DateTime<Utc>,
    /// Served from the last successful evaluation because the store failed
    pub is_stale: bool,
}

impl ExperimentReport {
    pub fn new(experiment: &Experiment, evaluation: Evaluation, generated_at: DateTime<Utc>) -> Self {
        Self {
            experiment_id: experiment.id,
            name: experiment.name.clone(),
            status: experiment.status,
            confidence_level: experiment.confidence_level,
            variants: evaluation.variants,
            total_visitors: evaluation.total_visitors,
            winner: evaluation.winner,
            is_complete: evaluation.completion.is_some(),
            completion_reason: evaluation.completion,
            recommendations: evaluation.recommendations,
            generated_at,
            is_stale: false,
        }
    }

    pub fn variant(&self, variant_id: &Uuid) -> Option<&VariantStats> {
        self.variants.iter().find(|v| v.variant_id == *variant_id)
    }
}

/// Statistical decision engine
pub struct DecisionEngine {
    store: Arc<dyn RecordStore>,
    config: ABTestConfig,
}

impl DecisionEngine {
    pub fn new(store: Arc<dyn RecordStore>, config: ABTestConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ABTestConfig {
        &self.config
    }

    /// Compute statistics for every variant against the control
    pub fn analyze_variants(&self, experiment: &Experiment) -> Result<Vec<VariantStats>> {
        let control = experiment.control().ok_or_else(|| {
            DecisionError::InvalidConfig(format!("Experiment {} has no control variant", experiment.id))
        })?;
        let confidence = experiment.confidence_level.value();
        // A zero gate would let empty arms reach the z-test
        let min_sample = self.config.min_sample_size.max(1);

        experiment
            .variants
            .iter()
            .map(|variant| {
                let significance = if variant.is_control {
                    None
                } else {
                    Some(
                        ZTest::from_variants(control, variant)
                            .evaluate(min_sample, self.config.significance_level)?,
                    )
                };

                Ok(VariantStats {
                    variant_id: variant.id,
                    name: variant.name.clone(),
                    is_control: variant.is_control,
                    traffic_weight: variant.traffic_weight,
                    visitors: variant.visitors,
                    conversions: variant.conversions,
                    revenue: variant.revenue,
                    conversion_rate: variant.conversion_rate(),
                    revenue_per_visitor: variant.revenue_per_visitor(),
                    confidence_interval: ConfidenceInterval::wald(
                        variant.visitors,
                        variant.conversions,
                        confidence,
                    ),
                    significance,
                    is_winner: variant.is_winner,
                })
            })
            .collect()
    }

    /// Pick the significant treatment with the strictly highest conversion rate.
    ///
    /// Treatments that are significantly worse than control are not
    /// candidates. A tie for the highest rate yields no winner.
    pub fn select_winner<'a>(&self, stats: &'a [VariantStats]) -> Option<&'a VariantStats> {
        let control_rate = stats
            .iter()
            .find(|s| s.is_control)
            .map_or(0.0, |s| s.conversion_rate);
        let mut best: Option<&VariantStats> = None;
        let mut tied = false;

        for candidate in stats
            .iter()
            .filter(|s| !s.is_control && s.is_significant() && s.conversion_rate > control_rate)
        {
            match best {
                Some(current) if candidate.conversion_rate == current.conversion_rate => {
                    tied = true;
                }
                Some(current) if candidate.conversion_rate < current.conversion_rate => {}
                _ => {
                    best = Some(candidate);
                    tied = false;
                }
            }
        }

        if tied {
            None
        } else {
            best
        }
    }

    /// Evaluate the stopping rule; any one condition suffices
    pub fn completion_reason(
        &self,
        experiment: &Experiment,
        has_winner: bool,
        total_visitors: u64,
        now: DateTime<Utc>,
    ) -> Option<CompletionReason> {
        if has_winner && total_visitors >= self.config.min_total_visitors {
            Some(CompletionReason::WinnerWithSufficientTraffic)
        } else if experiment.scheduled_end.is_some_and(|end| now > end) {
            Some(CompletionReason::ScheduledEndReached)
        } else if experiment.status == ExperimentStatus::Completed {
            Some(CompletionReason::Completed)
        } else {
            None
        }
    }

    /// Visitors the smallest arm still needs for the best observed lift to
    /// become detectable at 80% power; `None` when no lift is observed
    pub fn additional_visitors(&self, stats: &[VariantStats]) -> Option<u64> {
        let control = stats.iter().find(|s| s.is_control)?;
        let best = stats
            .iter()
            .filter(|s| !s.is_control)
            .max_by(|a, b| a.conversion_rate.total_cmp(&b.conversion_rate))?;

        let baseline = control.conversion_rate;
        if baseline <= 0.0 || baseline >= 1.0 || best.conversion_rate == baseline {
            return None;
        }
        let relative_lift = (best.conversion_rate - baseline) / baseline;

        let required = SampleSizeCalculator::new(
            baseline,
            relative_lift,
            DEFAULT_POWER,
            self.config.significance_level,
        )
        .and_then(|calculator| calculator.calculate())
        .ok()?;

        let smallest_arm = stats.iter().map(|s| s.visitors).min().unwrap_or(0);
        Some(required.saturating_sub(smallest_arm))
    }

    /// Advisory text for the experiment owner
    pub fn recommendations(
        &self,
        winner: Option<&WinnerSummary>,
        total_visitors: u64,
        additional_visitors: Option<u64>,
    ) -> Vec<Recommendation> {
        let mut recommendations = Vec::new();

        match winner {
            Some(winner) => recommendations.push(Recommendation::RollOut {
                variant_id: winner.variant_id,
                variant_name: winner.name.clone(),
                lift: winner.lift,
            }),
            None if total_visitors >= self.config.min_total_visitors => {
                recommendations.push(Recommendation::TryLargerChange)
            }
            None => recommendations.push(Recommendation::KeepRunning { additional_visitors }),
        }

        if total_visitors < self.config.low_traffic_threshold {
            recommendations.push(Recommendation::NeedsMoreTraffic {
                total_visitors,
                threshold: self.config.low_traffic_threshold,
            });
        }

        recommendations
    }

    pub fn evaluate(&self, experiment: &Experiment) -> Result<Evaluation> {
        self.evaluate_at(experiment, Utc::now())
    }

    /// Pure evaluation of an experiment snapshot at `now`
    pub fn evaluate_at(&self, experiment: &Experiment, now: DateTime<Utc>) -> Result<Evaluation> {
        let variants = self.analyze_variants(experiment)?;
        let total_visitors = experiment.total_visitors();

        let (winner, newly_detected) = match experiment.winner() {
            // Frozen winners are reported as stored
            Some(frozen) => {
                let stats = variants.iter().find(|s| s.variant_id == frozen.id);
                let summary = WinnerSummary {
                    variant_id: frozen.id,
                    name: frozen.name.clone(),
                    p_value: experiment.p_value.unwrap_or(1.0),
                    lift: stats.map_or(0.0, VariantStats::lift),
                    conversion_rate: frozen.conversion_rate(),
                    frozen: true,
                };
                (Some(summary), None)
            }
            None => match self.select_winner(&variants) {
                Some(best) => {
                    let p_value = best.significance.map_or(1.0, |s| s.p_value);
                    let summary = WinnerSummary {
                        variant_id: best.variant_id,
                        name: best.name.clone(),
                        p_value,
                        lift: best.lift(),
                        conversion_rate: best.conversion_rate,
                        frozen: false,
                    };
                    let decision = WinnerDecision {
                        variant_id: best.variant_id,
                        p_value,
                    };
                    (Some(summary), Some(decision))
                }
                None => (None, None),
            },
        };

        let completion = self.completion_reason(experiment, winner.is_some(), total_visitors, now);
        let additional_visitors = match winner {
            Some(_) => None,
            None => self.additional_visitors(&variants),
        };
        let recommendations =
            self.recommendations(winner.as_ref(), total_visitors, additional_visitors);

        Ok(Evaluation {
            variants,
            total_visitors,
            winner,
            newly_detected,
            completion,
            recommendations,
        })
    }

    pub async fn reevaluate(&self, experiment_id: &Uuid) -> Result<ExperimentReport> {
        self.reevaluate_at(experiment_id, Utc::now()).await
    }

    /// Evaluate the stored experiment and persist what the evaluation decides
    pub async fn reevaluate_at(
        &self,
        experiment_id: &Uuid,
        now: DateTime<Utc>,
    ) -> Result<ExperimentReport> {
        let mut experiment = self.load(experiment_id).await?;
        let mut evaluation = self.evaluate_at(&experiment, now)?;

        if let Some(decision) = evaluation.newly_detected {
            if self.store.set_winner_if_absent(experiment_id, &decision).await? {
                info!(
                    "Experiment {} winner frozen: variant {} (p-value: {:.4})",
                    experiment_id, decision.variant_id, decision.p_value
                );
            } else {
                debug!("Experiment {} winner already frozen concurrently", experiment_id);
            }
            experiment = self.load(experiment_id).await?;
            evaluation = self.evaluate_at(&experiment, now)?;
        }

        if self.config.auto_complete
            && matches!(experiment.status, ExperimentStatus::Running | ExperimentStatus::Paused)
        {
            if let Some(reason) = evaluation.completion {
                let completed = self
                    .store
                    .transition_status(experiment_id, experiment.status, ExperimentStatus::Completed, now)
                    .await?;
                if completed {
                    info!("Experiment {} completed: {:?}", experiment_id, reason);
                }
                experiment = self.load(experiment_id).await?;
                evaluation = self.evaluate_at(&experiment, now)?;
            }
        }

        Ok(ExperimentReport::new(&experiment, evaluation, now))
    }

    async fn load(&self, experiment_id: &Uuid) -> Result<Experiment> {
        self.store
            .get_experiment(experiment_id)
            .await?
            .ok_or_else(|| DecisionError::ExperimentNotFound(experiment_id.to_string()))
    }
}
