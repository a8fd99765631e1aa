//! Collaborator trait definitions
//!
//! This module defines the two contracts the engine depends on. Both are
//! async so that network-backed implementations never block the caller's
//! runtime, and both are object safe so the engine can hold them as
//! `Arc<dyn ...>`.

use abtest_types::{Experiment, ExperimentStatus, WinnerDecision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreResult;

/// Persistent store for experiments and their variants
///
/// ## Implementation Requirements
///
/// - **Atomic increments**: counter updates must be performed by the store,
///   never as a read-then-write by the caller, so concurrent increments are
///   never lost
/// - **Set-once winner**: [`RecordStore::set_winner_if_absent`] is a
///   compare-and-set on the experiment's winner fields
/// - **Conditional transitions**: [`RecordStore::transition_status`] only
///   applies when the stored status still matches `from`
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new experiment with its variants
    ///
    /// Fails with `StoreError::Conflict` if the id is already taken.
    async fn create_experiment(&self, experiment: Experiment) -> StoreResult<()>;

    /// Load an experiment and its variants
    ///
    /// Returns `Ok(None)` if the experiment does not exist.
    async fn get_experiment(&self, experiment_id: &Uuid) -> StoreResult<Option<Experiment>>;

    /// List every stored experiment
    async fn list_experiments(&self) -> StoreResult<Vec<Experiment>>;

    /// Move an experiment from `from` to `to`, stamping lifecycle timestamps
    ///
    /// Returns `Ok(false)` without changes when the stored status is no longer
    /// `from` (another writer got there first).
    async fn transition_status(
        &self,
        experiment_id: &Uuid,
        from: ExperimentStatus,
        to: ExperimentStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Atomically add one visitor to a variant
    async fn increment_visitors(&self, experiment_id: &Uuid, variant_id: &Uuid)
        -> StoreResult<()>;

    /// Atomically add one conversion, plus `revenue` when present
    ///
    /// Fails with `StoreError::Closed` when the stored experiment is
    /// completed. The status check and the increment happen in one atomic
    /// step, so a conversion never lands after completion.
    async fn increment_conversions(
        &self,
        experiment_id: &Uuid,
        variant_id: &Uuid,
        revenue: Option<f64>,
    ) -> StoreResult<()>;

    /// Freeze the winner fields if no winner has been recorded yet
    ///
    /// Sets `is_significant`, `winning_variant_id` and `p_value` on the
    /// experiment and `is_winner` on the variant. Returns `Ok(true)` when this
    /// call performed the write, `Ok(false)` when a winner already existed.
    async fn set_winner_if_absent(
        &self,
        experiment_id: &Uuid,
        winner: &WinnerDecision,
    ) -> StoreResult<bool>;
}

/// Short-lived key/value cache of allocations
///
/// Losing an entry only costs recomputation: the allocation is a pure
/// function of the subject and experiment, so a recomputed entry is always
/// identical to the evicted one. Implementations own their retention window.
#[async_trait]
pub trait AllocationCache: Send + Sync {
    /// Look up the variant previously allocated to a subject
    async fn get(&self, experiment_id: &Uuid, subject_id: &str) -> StoreResult<Option<Uuid>>;

    /// Store an allocation unless one already exists
    ///
    /// Returns `Ok(true)` when this call created the entry.
    async fn set_if_absent(
        &self,
        experiment_id: &Uuid,
        subject_id: &str,
        variant_id: &Uuid,
    ) -> StoreResult<bool>;

    /// Drop an allocation
    ///
    /// Idempotent; removing a missing entry is not an error.
    async fn invalidate(&self, experiment_id: &Uuid, subject_id: &str) -> StoreResult<()>;
}

/// Cache key for one subject's allocation in one experiment
pub fn allocation_key(experiment_id: &Uuid, subject_id: &str) -> String {
    format!("alloc:{}:{}", experiment_id, subject_id)
}
