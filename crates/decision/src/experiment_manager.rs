//! Experiment lifecycle management
//!
//! Creates experiments and drives their status through the allowed
//! transitions. Every transition is a conditional write against the record
//! store, so two concurrent callers cannot both move the same experiment.

use abtest_store::RecordStore;
use abtest_types::{ABTestConfig, Experiment, ExperimentStatus};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::errors::{DecisionError, Result};

/// Experiment manager
pub struct ExperimentManager {
    store: Arc<dyn RecordStore>,
    weight_tolerance: f64,
}

impl ExperimentManager {
    pub fn new(store: Arc<dyn RecordStore>, config: &ABTestConfig) -> Self {
        Self {
            store,
            weight_tolerance: config.weight_tolerance,
        }
    }

    /// Validate and persist a new experiment in draft status
    pub async fn create_experiment(&self, experiment: Experiment) -> Result<Uuid> {
        self.validate(&experiment)?;

        let experiment_id = experiment.id;
        let name = experiment.name.clone();
        self.store.create_experiment(experiment).await?;

        info!("Created experiment {} ({})", experiment_id, name);
        Ok(experiment_id)
    }

    /// Structural checks applied at creation time
    pub fn validate(&self, experiment: &Experiment) -> Result<()> {
        if experiment.status != ExperimentStatus::Draft {
            return Err(DecisionError::InvalidState(format!(
                "New experiment must be in draft status, got {:?}",
                experiment.status
            )));
        }

        let winner_preset = experiment.winning_variant_id.is_some()
            || experiment.is_significant
            || experiment.p_value.is_some()
            || experiment.variants.iter().any(|v| v.is_winner);
        if winner_preset {
            return Err(DecisionError::InvalidState(
                "New experiment must not carry a winner".to_string(),
            ));
        }

        if let Some(variant) = experiment
            .variants
            .iter()
            .find(|v| v.visitors > 0 || v.conversions > 0 || v.revenue != 0.0)
        {
            return Err(DecisionError::InvalidState(format!(
                "Variant '{}' of a new experiment must start with zero counters",
                variant.name
            )));
        }

        if experiment.variants.is_empty() {
            return Err(DecisionError::InvalidConfig(
                "Experiment must have at least one variant".to_string(),
            ));
        }

        let controls = experiment.variants.iter().filter(|v| v.is_control).count();
        if controls != 1 {
            return Err(DecisionError::InvalidConfig(format!(
                "Experiment must have exactly one control variant, got {}",
                controls
            )));
        }

        if let Some(variant) = experiment
            .variants
            .iter()
            .find(|v| !(0.0..=100.0).contains(&v.traffic_weight))
        {
            return Err(DecisionError::InvalidConfig(format!(
                "Variant '{}' has traffic weight {} outside [0, 100]",
                variant.name, variant.traffic_weight
            )));
        }

        let total = experiment.total_weight();
        if total > 100.0 + self.weight_tolerance {
            return Err(DecisionError::InvalidConfig(format!(
                "Traffic weights must sum to at most 100, got {}",
                total
            )));
        }

        Ok(())
    }

    pub async fn start_experiment(&self, experiment_id: &Uuid) -> Result<()> {
        self.transition(experiment_id, ExperimentStatus::Running).await
    }

    /// Pause a running experiment
    pub async fn pause_experiment(&self, experiment_id: &Uuid) -> Result<()> {
        self.transition(experiment_id, ExperimentStatus::Paused).await
    }

    /// Resume a paused experiment
    pub async fn resume_experiment(&self, experiment_id: &Uuid) -> Result<()> {
        let experiment = self.load(experiment_id).await?;
        if experiment.status != ExperimentStatus::Paused {
            return Err(DecisionError::InvalidState(format!(
                "Cannot resume experiment in state {:?}",
                experiment.status
            )));
        }
        self.transition(experiment_id, ExperimentStatus::Running).await
    }

    pub async fn complete_experiment(&self, experiment_id: &Uuid) -> Result<()> {
        self.transition(experiment_id, ExperimentStatus::Completed).await
    }

    async fn transition(&self, experiment_id: &Uuid, to: ExperimentStatus) -> Result<()> {
        let experiment = self.load(experiment_id).await?;
        let from = experiment.status;

        if !from.can_transition_to(to) {
            return Err(DecisionError::InvalidState(format!(
                "Cannot move experiment from {:?} to {:?}",
                from, to
            )));
        }

        if !self
            .store
            .transition_status(experiment_id, from, to, Utc::now())
            .await?
        {
            return Err(DecisionError::InvalidState(format!(
                "Experiment {} changed status concurrently",
                experiment_id
            )));
        }

        info!("Experiment {} moved from {:?} to {:?}", experiment_id, from, to);
        Ok(())
    }

    pub async fn get_experiment(&self, experiment_id: &Uuid) -> Result<Option<Experiment>> {
        Ok(self.store.get_experiment(experiment_id).await?)
    }

    pub async fn list_experiments(&self) -> Result<Vec<Experiment>> {
        Ok(self.store.list_experiments().await?)
    }

    /// Experiments currently receiving traffic
    pub async fn list_active_experiments(&self) -> Result<Vec<Experiment>> {
        Ok(self
            .store
            .list_experiments()
            .await?
            .into_iter()
            .filter(|e| e.status == ExperimentStatus::Running)
            .collect())
    }

    async fn load(&self, experiment_id: &Uuid) -> Result<Experiment> {
        self.store
            .get_experiment(experiment_id)
            .await?
            .ok_or_else(|| DecisionError::ExperimentNotFound(experiment_id.to_string()))
    }
}
