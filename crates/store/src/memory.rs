//! In-memory collaborator implementations
//!
//! [`MemoryRecordStore`] keeps experiments in a DashMap. Every mutation runs
//! under the shard lock of the experiment entry, which makes counter
//! increments atomic and the winner write a true compare-and-set.
//!
//! [`MemoryAllocationCache`] is a moka cache with a time-to-live equal to the
//! allocation retention window.

use abtest_types::{Experiment, ExperimentStatus, WinnerDecision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use moka::future::Cache as MokaCache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::backend::{allocation_key, AllocationCache, RecordStore};
use crate::error::{StoreError, StoreResult};

fn experiment_not_found(experiment_id: &Uuid) -> StoreError {
    StoreError::NotFound {
        entity: "experiment",
        id: experiment_id.to_string(),
    }
}

fn variant_not_found(variant_id: &Uuid) -> StoreError {
    StoreError::NotFound {
        entity: "variant",
        id: variant_id.to_string(),
    }
}

/// In-memory record store using DashMap
///
/// Ideal for tests and single-process deployments where counters do not need
/// to survive a restart.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    experiments: Arc<DashMap<Uuid, Experiment>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored experiments
    pub fn len(&self) -> usize {
        self.experiments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_experiment(&self, experiment: Experiment) -> StoreResult<()> {
        match self.experiments.entry(experiment.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict {
                entity: "experiment",
                id: experiment.id.to_string(),
            }),
            Entry::Vacant(slot) => {
                debug!(experiment_id = %experiment.id, "Stored experiment");
                slot.insert(experiment);
                Ok(())
            }
        }
    }

    async fn get_experiment(&self, experiment_id: &Uuid) -> StoreResult<Option<Experiment>> {
        Ok(self.experiments.get(experiment_id).map(|e| e.value().clone()))
    }

    async fn list_experiments(&self) -> StoreResult<Vec<Experiment>> {
        let mut experiments: Vec<Experiment> =
            self.experiments.iter().map(|e| e.value().clone()).collect();
        experiments.sort_by_key(|e| e.created_at);
        Ok(experiments)
    }

    async fn transition_status(
        &self,
        experiment_id: &Uuid,
        from: ExperimentStatus,
        to: ExperimentStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut experiment = self
            .experiments
            .get_mut(experiment_id)
            .ok_or_else(|| experiment_not_found(experiment_id))?;

        if experiment.status != from {
            return Ok(false);
        }

        experiment.apply_status(to, at);
        Ok(true)
    }

    async fn increment_visitors(
        &self,
        experiment_id: &Uuid,
        variant_id: &Uuid,
    ) -> StoreResult<()> {
        let mut experiment = self
            .experiments
            .get_mut(experiment_id)
            .ok_or_else(|| experiment_not_found(experiment_id))?;
        let variant = experiment
            .variant_mut(variant_id)
            .ok_or_else(|| variant_not_found(variant_id))?;

        variant.visitors += 1;
        trace!(%variant_id, visitors = variant.visitors, "Incremented visitors");
        Ok(())
    }

    async fn increment_conversions(
        &self,
        experiment_id: &Uuid,
        variant_id: &Uuid,
        revenue: Option<f64>,
    ) -> StoreResult<()> {
        let mut experiment = self
            .experiments
            .get_mut(experiment_id)
            .ok_or_else(|| experiment_not_found(experiment_id))?;
        if experiment.status == ExperimentStatus::Completed {
            return Err(StoreError::Closed {
                id: experiment_id.to_string(),
            });
        }
        let variant = experiment
            .variant_mut(variant_id)
            .ok_or_else(|| variant_not_found(variant_id))?;

        variant.conversions += 1;
        if let Some(value) = revenue {
            variant.revenue += value;
        }
        trace!(%variant_id, conversions = variant.conversions, "Incremented conversions");
        Ok(())
    }

    async fn set_winner_if_absent(
        &self,
        experiment_id: &Uuid,
        winner: &WinnerDecision,
    ) -> StoreResult<bool> {
        let mut experiment = self
            .experiments
            .get_mut(experiment_id)
            .ok_or_else(|| experiment_not_found(experiment_id))?;

        if experiment.winning_variant_id.is_some() {
            return Ok(false);
        }

        let variant = experiment
            .variant_mut(&winner.variant_id)
            .ok_or_else(|| variant_not_found(&winner.variant_id))?;
        variant.is_winner = true;

        experiment.is_significant = true;
        experiment.winning_variant_id = Some(winner.variant_id);
        experiment.p_value = Some(winner.p_value);
        Ok(true)
    }
}

/// In-memory allocation cache backed by moka
///
/// Entries expire after the configured retention window and the cache is
/// bounded by `max_capacity`; both only cost recomputation when hit.
#[derive(Clone)]
pub struct MemoryAllocationCache {
    cache: MokaCache<String, Uuid>,
    ttl: Duration,
}

impl MemoryAllocationCache {
    /// Create a cache with the given retention window and capacity
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = MokaCache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { cache, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Approximate number of cached allocations
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Drop every cached allocation
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }
}

#[async_trait]
impl AllocationCache for MemoryAllocationCache {
    async fn get(&self, experiment_id: &Uuid, subject_id: &str) -> StoreResult<Option<Uuid>> {
        Ok(self.cache.get(&allocation_key(experiment_id, subject_id)).await)
    }

    async fn set_if_absent(
        &self,
        experiment_id: &Uuid,
        subject_id: &str,
        variant_id: &Uuid,
    ) -> StoreResult<bool> {
        let entry = self
            .cache
            .entry(allocation_key(experiment_id, subject_id))
            .or_insert(*variant_id)
            .await;
        Ok(entry.is_fresh())
    }

    async fn invalidate(&self, experiment_id: &Uuid, subject_id: &str) -> StoreResult<()> {
        self.cache
            .invalidate(&allocation_key(experiment_id, subject_id))
            .await;
        Ok(())
    }
}
