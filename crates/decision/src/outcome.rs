//! Conversion recording

use abtest_store::{RecordStore, StoreError};
use abtest_types::{ConversionEvent, ExperimentStatus};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::errors::{DecisionError, Result};

/// Validates conversion events and applies them to the record store
pub struct OutcomeRecorder {
    store: Arc<dyn RecordStore>,
}

impl OutcomeRecorder {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Record one conversion for a variant, with optional revenue.
    ///
    /// Conversions are not deduplicated; callers that need once-per-subject
    /// semantics must filter upstream.
    pub async fn record_conversion(
        &self,
        experiment_id: &Uuid,
        variant_id: &Uuid,
        value: Option<f64>,
    ) -> Result<()> {
        if let Some(v) = value {
            if !v.is_finite() || v < 0.0 {
                return Err(DecisionError::InvalidParameter(format!(
                    "conversion value must be a non-negative number, got {}",
                    v
                )));
            }
        }

        let experiment = self
            .store
            .get_experiment(experiment_id)
            .await?
            .ok_or_else(|| DecisionError::ExperimentNotFound(experiment_id.to_string()))?;

        if experiment.status == ExperimentStatus::Completed {
            return Err(DecisionError::InvalidState(format!(
                "experiment {} is completed",
                experiment_id
            )));
        }

        if experiment.variant(variant_id).is_none() {
            return Err(DecisionError::VariantNotFound(variant_id.to_string()));
        }

        // The store re-checks completion atomically with the increment
        self.store
            .increment_conversions(experiment_id, variant_id, value)
            .await
            .map_err(|e| match e {
                StoreError::Closed { id } => {
                    DecisionError::InvalidState(format!("experiment {} is completed", id))
                }
                other => DecisionError::Store(other),
            })?;

        debug!(
            "Recorded conversion for variant {} in experiment {}",
            variant_id, experiment_id
        );
        Ok(())
    }

    pub async fn record_event(&self, event: &ConversionEvent) -> Result<()> {
        self.record_conversion(&event.experiment_id, &event.variant_id, event.value)
            .await
    }
}
