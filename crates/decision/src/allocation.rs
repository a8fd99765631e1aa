//! Allocation gateway
//!
//! Resolves which variant a subject sees. The first allocation of a subject
//! is computed from the hash bucket, written to the allocation cache with
//! set-if-absent, and only the writer that wins that race counts the visitor.
//! Later calls are answered from the cache.
//!
//! Failures close the gate: any cache or store error yields no allocation
//! and the caller serves its default experience.

use abtest_store::{AllocationCache, RecordStore};
use abtest_types::{ABTestConfig, AllocationResult, Experiment};
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{
    bucketing::bucket,
    eligibility::{AllocationContext, EligibilityChecker},
    errors::{DecisionError, Result},
    selector::select,
};

pub struct AllocationGateway {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn AllocationCache>,
    checker: EligibilityChecker,
    config: ABTestConfig,
}

impl AllocationGateway {
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn AllocationCache>,
        config: ABTestConfig,
    ) -> Self {
        Self {
            store,
            cache,
            checker: EligibilityChecker::new(),
            config,
        }
    }

    /// Allocate a subject, failing closed.
    ///
    /// Returns `None` when the experiment is not eligible, misconfigured,
    /// unknown, or when the cache or store fails.
    pub async fn allocate(
        &self,
        experiment_id: &Uuid,
        subject_id: &str,
        context: &AllocationContext,
    ) -> Option<AllocationResult> {
        match self.try_allocate(experiment_id, subject_id, context).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    "Allocation failed for experiment {} subject {}: {}",
                    experiment_id, subject_id, e
                );
                None
            }
        }
    }

    /// Allocation with errors surfaced to the caller
    pub async fn try_allocate(
        &self,
        experiment_id: &Uuid,
        subject_id: &str,
        context: &AllocationContext,
    ) -> Result<Option<AllocationResult>> {
        if let Some(variant_id) = self.cache.get(experiment_id, subject_id).await? {
            return Ok(Some(AllocationResult {
                variant_id,
                is_new_allocation: false,
            }));
        }

        let experiment = self
            .store
            .get_experiment(experiment_id)
            .await?
            .ok_or_else(|| DecisionError::ExperimentNotFound(experiment_id.to_string()))?;

        let eligibility = self.checker.check(&experiment, context);
        if !eligibility.is_eligible() {
            debug!("Experiment {} not eligible: {:?}", experiment_id, eligibility);
            return Ok(None);
        }

        let variant_id = match self.assign(&experiment, subject_id) {
            Ok(variant_id) => variant_id,
            Err(e) => {
                warn!("Experiment {} cannot allocate: {}", experiment_id, e);
                return Ok(None);
            }
        };

        if !self
            .cache
            .set_if_absent(experiment_id, subject_id, &variant_id)
            .await?
        {
            // A concurrent call allocated first; its entry is authoritative
            let stored = self.cache.get(experiment_id, subject_id).await?;
            return Ok(Some(AllocationResult {
                variant_id: stored.unwrap_or(variant_id),
                is_new_allocation: false,
            }));
        }

        if let Err(e) = self.store.increment_visitors(experiment_id, &variant_id).await {
            // Without the visitor the allocation must not stick
            if let Err(invalidate_err) = self.cache.invalidate(experiment_id, subject_id).await {
                warn!(
                    "Failed to roll back allocation of subject {}: {}",
                    subject_id, invalidate_err
                );
            }
            return Err(e.into());
        }

        debug!(
            "Allocated subject {} to variant {} in experiment {}",
            subject_id, variant_id, experiment_id
        );

        Ok(Some(AllocationResult {
            variant_id,
            is_new_allocation: true,
        }))
    }

    /// Deterministic variant for a subject, from weights alone
    pub fn assign(&self, experiment: &Experiment, subject_id: &str) -> Result<Uuid> {
        if experiment.variants.is_empty() {
            return Err(DecisionError::InvalidConfig("experiment has no variants".to_string()));
        }

        let total = experiment.total_weight();
        if (total - 100.0).abs() > self.config.weight_tolerance {
            return Err(DecisionError::InvalidConfig(format!(
                "traffic weights sum to {}, expected 100",
                total
            )));
        }

        let bucket = bucket(subject_id, &experiment.id.to_string());
        select(bucket, &experiment.weight_table())
            .ok_or_else(|| DecisionError::AllocationError("no variant for bucket".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abtest_store::{MemoryAllocationCache, MemoryRecordStore};
    use abtest_types::{ExperimentStatus, Variant};
    use chrono::Utc;
    use std::time::Duration;

    fn gateway() -> (AllocationGateway, Arc<MemoryRecordStore>, Arc<MemoryAllocationCache>) {
        let store = Arc::new(MemoryRecordStore::new());
        let cache = Arc::new(MemoryAllocationCache::new(Duration::from_secs(3600), 10_000));
        let gateway = AllocationGateway::new(store.clone(), cache.clone(), ABTestConfig::default());
        (gateway, store, cache)
    }

    fn running(variants: Vec<Variant>) -> Experiment {
        let mut experiment = Experiment::new("Allocation", variants);
        experiment.apply_status(ExperimentStatus::Running, Utc::now());
        experiment
    }

    #[tokio::test]
    async fn test_first_allocation_counts_visitor_once() {
        let (gateway, store, _) = gateway();
        let experiment = running(vec![Variant::control("a", 50.0), Variant::new("b", 50.0)]);
        let exp_id = experiment.id;
        store.create_experiment(experiment).await.unwrap();
        let ctx = AllocationContext::new();

        let first = gateway.allocate(&exp_id, "user-1", &ctx).await.unwrap();
        assert!(first.is_new_allocation);

        let second = gateway.allocate(&exp_id, "user-1", &ctx).await.unwrap();
        assert!(!second.is_new_allocation);
        assert_eq!(second.variant_id, first.variant_id);

        let stored = store.get_experiment(&exp_id).await.unwrap().unwrap();
        assert_eq!(stored.total_visitors(), 1);
    }

    #[tokio::test]
    async fn test_not_running_yields_none() {
        let (gateway, store, _) = gateway();
        let experiment = Experiment::new("Draft", vec![Variant::control("a", 100.0)]);
        let exp_id = experiment.id;
        store.create_experiment(experiment).await.unwrap();

        assert!(gateway
            .allocate(&exp_id, "user-1", &AllocationContext::new())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_experiment_yields_none() {
        let (gateway, _, _) = gateway();
        assert!(gateway
            .allocate(&Uuid::new_v4(), "user-1", &AllocationContext::new())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_bad_weights_yield_none() {
        let (gateway, store, _) = gateway();
        let experiment = running(vec![Variant::control("a", 40.0), Variant::new("b", 40.0)]);
        let exp_id = experiment.id;
        store.create_experiment(experiment).await.unwrap();

        assert!(gateway
            .allocate(&exp_id, "user-1", &AllocationContext::new())
            .await
            .is_none());
        let stored = store.get_experiment(&exp_id).await.unwrap().unwrap();
        assert_eq!(stored.total_visitors(), 0);
    }

    #[test]
    fn test_assign_is_deterministic() {
        let (gateway, _, _) = gateway();
        let experiment = running(vec![
            Variant::control("a", 33.33),
            Variant::new("b", 33.33),
            Variant::new("c", 33.34),
        ]);

        for i in 0..100 {
            let subject = format!("subject-{}", i);
            assert_eq!(
                gateway.assign(&experiment, &subject).unwrap(),
                gateway.assign(&experiment, &subject).unwrap()
            );
        }
    }
}
