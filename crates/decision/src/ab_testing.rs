//! A/B testing engine
//!
//! This module provides the main A/B testing engine that combines
//! deterministic allocation, conversion recording, statistical significance
//! testing and experiment management behind one `Send + Sync` handle.

use abtest_config::{CacheBackend, EngineConfig};
use abtest_store::{
    AllocationCache, MemoryAllocationCache, MemoryRecordStore, RecordStore, RedisAllocationCache,
    RedisCacheConfig,
};
use abtest_types::{ABTestConfig, AllocationResult, Experiment};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    allocation::AllocationGateway,
    decision_engine::{DecisionEngine, ExperimentReport},
    eligibility::AllocationContext,
    errors::{DecisionError, Result},
    experiment_manager::ExperimentManager,
    outcome::OutcomeRecorder,
    statistical::SampleSizeCalculator,
};

/// A/B testing engine
pub struct ABTestEngine {
    /// Experiment manager
    manager: ExperimentManager,
    allocation: AllocationGateway,
    outcomes: OutcomeRecorder,
    decisions: DecisionEngine,

    /// Last successful report per experiment, served when the store fails
    last_reports: Arc<DashMap<Uuid, ExperimentReport>>,

    /// Configuration
    config: ABTestConfig,
}

impl ABTestEngine {
    /// Create an engine over injected collaborators
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn AllocationCache>,
        config: ABTestConfig,
    ) -> Self {
        Self {
            manager: ExperimentManager::new(store.clone(), &config),
            allocation: AllocationGateway::new(store.clone(), cache, config.clone()),
            outcomes: OutcomeRecorder::new(store.clone()),
            decisions: DecisionEngine::new(store, config.clone()),
            last_reports: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Create an engine with an in-memory store and the configured cache
    pub async fn from_config(config: &EngineConfig) -> Result<Self> {
        let store: Arc<dyn RecordStore> = Arc::new(MemoryRecordStore::new());

        let cache: Arc<dyn AllocationCache> = match config.cache.backend {
            CacheBackend::Memory => Arc::new(MemoryAllocationCache::new(
                config.cache.allocation_ttl(),
                config.cache.max_capacity,
            )),
            CacheBackend::Redis => {
                let redis = RedisAllocationCache::connect(RedisCacheConfig {
                    url: config.cache.redis_url.clone(),
                    key_prefix: config.cache.key_prefix.clone(),
                    ttl: config.cache.allocation_ttl(),
                })
                .await?;
                Arc::new(redis)
            }
        };

        info!(
            "Initialized A/B testing engine '{}' with {:?} allocation cache",
            config.service.name, config.cache.backend
        );

        Ok(Self::new(store, cache, config.ab_testing.clone()))
    }

    pub fn config(&self) -> &ABTestConfig {
        &self.config
    }

    pub fn decision_engine(&self) -> &DecisionEngine {
        &self.decisions
    }

    /// Create an experiment in draft status
    pub async fn create_experiment(&self, experiment: Experiment) -> Result<Uuid> {
        self.manager.create_experiment(experiment).await
    }

    /// Start an experiment
    pub async fn start(&self, experiment_id: &Uuid) -> Result<()> {
        self.manager.start_experiment(experiment_id).await
    }

    /// Pause an experiment
    pub async fn pause(&self, experiment_id: &Uuid) -> Result<()> {
        self.manager.pause_experiment(experiment_id).await
    }

    /// Resume an experiment
    pub async fn resume(&self, experiment_id: &Uuid) -> Result<()> {
        self.manager.resume_experiment(experiment_id).await
    }

    /// Complete an experiment manually
    pub async fn complete(&self, experiment_id: &Uuid) -> Result<()> {
        self.manager.complete_experiment(experiment_id).await
    }

    pub async fn get_experiment(&self, experiment_id: &Uuid) -> Result<Option<Experiment>> {
        self.manager.get_experiment(experiment_id).await
    }

    pub async fn list_experiments(&self) -> Result<Vec<Experiment>> {
        self.manager.list_experiments().await
    }

    pub async fn list_active_experiments(&self) -> Result<Vec<Experiment>> {
        self.manager.list_active_experiments().await
    }

    /// Assign a subject to a variant; `None` means serve the default experience
    pub async fn allocate(
        &self,
        experiment_id: &Uuid,
        subject_id: &str,
        context: &AllocationContext,
    ) -> Option<AllocationResult> {
        self.allocation.allocate(experiment_id, subject_id, context).await
    }

    /// Record a conversion and re-evaluate the experiment.
    ///
    /// Only recording failures are returned; a failed re-evaluation is
    /// logged and retried on the next conversion or results query.
    pub async fn record_conversion(
        &self,
        experiment_id: &Uuid,
        variant_id: &Uuid,
        value: Option<f64>,
    ) -> Result<()> {
        self.outcomes
            .record_conversion(experiment_id, variant_id, value)
            .await?;

        match self.decisions.reevaluate(experiment_id).await {
            Ok(report) => {
                self.last_reports.insert(*experiment_id, report);
            }
            Err(e) => warn!("Re-evaluation of experiment {} failed: {}", experiment_id, e),
        }

        Ok(())
    }

    /// Current results of an experiment.
    ///
    /// When the store is unavailable the last computed report is returned
    /// with `is_stale` set.
    pub async fn get_results(&self, experiment_id: &Uuid) -> Result<ExperimentReport> {
        match self.decisions.reevaluate(experiment_id).await {
            Ok(report) => {
                self.last_reports.insert(*experiment_id, report.clone());
                Ok(report)
            }
            Err(DecisionError::Store(e)) if e.is_unavailable() => {
                match self.last_reports.get(experiment_id) {
                    Some(cached) => {
                        warn!(
                            "Store unavailable, serving stale results for experiment {}: {}",
                            experiment_id, e
                        );
                        let mut report = cached.clone();
                        report.is_stale = true;
                        Ok(report)
                    }
                    None => Err(DecisionError::Store(e)),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Re-evaluate every running experiment, returning the reports that
    /// could be computed
    pub async fn evaluate_open_experiments(&self) -> Result<Vec<ExperimentReport>> {
        let active = self.manager.list_active_experiments().await?;
        let mut reports = Vec::with_capacity(active.len());

        for experiment in active {
            match self.decisions.reevaluate(&experiment.id).await {
                Ok(report) => {
                    self.last_reports.insert(experiment.id, report.clone());
                    reports.push(report);
                }
                Err(e) => warn!("Evaluation of experiment {} failed: {}", experiment.id, e),
            }
        }

        debug!("Evaluated {} open experiments", reports.len());
        Ok(reports)
    }

    /// Visitors needed per variant to detect `min_effect` relative lift
    pub fn calculate_sample_size(
        &self,
        baseline_rate: f64,
        min_effect: f64,
        power: f64,
    ) -> Result<u64> {
        SampleSizeCalculator::new(baseline_rate, min_effect, power, self.config.significance_level)?
            .calculate()
    }
}
