//! Integration tests for deterministic allocation
//!
//! Covers determinism across engine instances and cache loss, traffic split
//! convergence, weight edge cases, and fail-closed behavior when a
//! collaborator is down.

use abtest_store::{
    AllocationCache, MemoryAllocationCache, MemoryRecordStore, RecordStore, StoreError, StoreResult,
};
use abtest_types::{ABTestConfig, Experiment, ExperimentStatus, Variant, WinnerDecision};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use decision::{ABTestEngine, AllocationContext};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn memory_cache() -> Arc<MemoryAllocationCache> {
    Arc::new(MemoryAllocationCache::new(Duration::from_secs(3600), 500_000))
}

async fn running_engine(
    variants: Vec<Variant>,
) -> (ABTestEngine, Arc<MemoryRecordStore>, Arc<MemoryAllocationCache>, Experiment) {
    let store = Arc::new(MemoryRecordStore::new());
    let cache = memory_cache();
    let engine = ABTestEngine::new(store.clone(), cache.clone(), ABTestConfig::default());

    let experiment = Experiment::new("Integration", variants);
    let id = engine.create_experiment(experiment).await.unwrap();
    engine.start(&id).await.unwrap();
    let experiment = engine.get_experiment(&id).await.unwrap().unwrap();

    (engine, store, cache, experiment)
}

#[tokio::test]
async fn test_allocation_survives_cache_loss_and_restart() {
    let (engine, store, cache, experiment) = running_engine(vec![
        Variant::control("control", 50.0),
        Variant::new("treatment", 50.0),
    ])
    .await;
    let ctx = AllocationContext::new();

    let mut first: HashMap<String, Uuid> = HashMap::new();
    for i in 0..500 {
        let subject = format!("user-{}", i);
        let result = engine.allocate(&experiment.id, &subject, &ctx).await.unwrap();
        first.insert(subject, result.variant_id);
    }

    // Cache eviction: recomputation must agree
    cache.clear();
    for (subject, variant_id) in &first {
        let again = engine.allocate(&experiment.id, subject, &ctx).await.unwrap();
        assert_eq!(again.variant_id, *variant_id);
    }

    // A fresh engine over the same records behaves the same
    let restarted = ABTestEngine::new(store.clone(), memory_cache(), ABTestConfig::default());
    for (subject, variant_id) in &first {
        let again = restarted.allocate(&experiment.id, subject, &ctx).await.unwrap();
        assert_eq!(again.variant_id, *variant_id);
    }
}

#[tokio::test]
async fn test_distribution_matches_weights() {
    let (engine, store, _, experiment) = running_engine(vec![
        Variant::control("a", 50.0),
        Variant::new("b", 30.0),
        Variant::new("c", 20.0),
    ])
    .await;
    let ctx = AllocationContext::new();
    let total = 100_000u64;

    for i in 0..total {
        engine
            .allocate(&experiment.id, &format!("visitor-{}", i), &ctx)
            .await
            .unwrap();
    }

    let stored = store.get_experiment(&experiment.id).await.unwrap().unwrap();
    assert_eq!(stored.total_visitors(), total);
    for variant in &stored.variants {
        let count = variant.visitors as f64;
        let expected = total as f64 * variant.traffic_weight / 100.0;
        assert!(
            (count - expected).abs() <= 0.02 * expected,
            "variant {} got {}, expected {}",
            variant.name,
            count,
            expected
        );
    }
}

#[tokio::test]
async fn test_weight_edge_cases() {
    let (engine, store, _, experiment) = running_engine(vec![
        Variant::control("all", 100.0),
        Variant::new("none", 0.0),
    ])
    .await;
    let ctx = AllocationContext::new();
    let all = experiment.variants[0].id;

    for i in 0..2_000 {
        let result = engine
            .allocate(&experiment.id, &format!("user-{}", i), &ctx)
            .await
            .unwrap();
        assert_eq!(result.variant_id, all);
    }

    let stored = store.get_experiment(&experiment.id).await.unwrap().unwrap();
    assert_eq!(stored.variants[1].visitors, 0);
}

#[tokio::test]
async fn test_zero_weight_first_variant_with_short_sum() {
    // Weights sum to 99.96, inside the rounding tolerance; the uncovered top
    // buckets must not land on the leading zero-weight variant
    let (engine, store, _, experiment) = running_engine(vec![
        Variant::new("off", 0.0),
        Variant::control("control", 99.96),
    ])
    .await;
    let ctx = AllocationContext::new();
    let off = experiment.variants[0].id;

    for i in 0..20_000 {
        let result = engine
            .allocate(&experiment.id, &format!("user-{}", i), &ctx)
            .await
            .unwrap();
        assert_ne!(result.variant_id, off);
    }

    let stored = store.get_experiment(&experiment.id).await.unwrap().unwrap();
    assert_eq!(stored.variant(&off).unwrap().visitors, 0);
    assert_eq!(stored.total_visitors(), 20_000);
}

#[tokio::test]
async fn test_concurrent_first_allocations_count_once() {
    let (engine, store, _, experiment) = running_engine(vec![
        Variant::control("control", 50.0),
        Variant::new("treatment", 50.0),
    ])
    .await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = engine.clone();
        let id = experiment.id;
        handles.push(tokio::spawn(async move {
            engine
                .allocate(&id, "same-subject", &AllocationContext::new())
                .await
        }));
    }

    let mut variants = Vec::new();
    let mut new_allocations = 0;
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        if result.is_new_allocation {
            new_allocations += 1;
        }
        variants.push(result.variant_id);
    }

    assert_eq!(new_allocations, 1);
    assert!(variants.windows(2).all(|w| w[0] == w[1]));
    let stored = store.get_experiment(&experiment.id).await.unwrap().unwrap();
    assert_eq!(stored.total_visitors(), 1);
}

/// Cache double whose every call fails
struct UnavailableCache;

#[async_trait]
impl AllocationCache for UnavailableCache {
    async fn get(&self, _: &Uuid, _: &str) -> StoreResult<Option<Uuid>> {
        Err(StoreError::unavailable("cache", "connection refused"))
    }

    async fn set_if_absent(&self, _: &Uuid, _: &str, _: &Uuid) -> StoreResult<bool> {
        Err(StoreError::unavailable("cache", "connection refused"))
    }

    async fn invalidate(&self, _: &Uuid, _: &str) -> StoreResult<()> {
        Err(StoreError::unavailable("cache", "connection refused"))
    }
}

/// Store double that reads through to memory but cannot count visitors
struct FailingCounterStore {
    inner: MemoryRecordStore,
}

#[async_trait]
impl RecordStore for FailingCounterStore {
    async fn create_experiment(&self, experiment: Experiment) -> StoreResult<()> {
        self.inner.create_experiment(experiment).await
    }

    async fn get_experiment(&self, experiment_id: &Uuid) -> StoreResult<Option<Experiment>> {
        self.inner.get_experiment(experiment_id).await
    }

    async fn list_experiments(&self) -> StoreResult<Vec<Experiment>> {
        self.inner.list_experiments().await
    }

    async fn transition_status(
        &self,
        experiment_id: &Uuid,
        from: ExperimentStatus,
        to: ExperimentStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.inner.transition_status(experiment_id, from, to, at).await
    }

    async fn increment_visitors(&self, _: &Uuid, _: &Uuid) -> StoreResult<()> {
        Err(StoreError::unavailable("records", "write timeout"))
    }

    async fn increment_conversions(
        &self,
        experiment_id: &Uuid,
        variant_id: &Uuid,
        revenue: Option<f64>,
    ) -> StoreResult<()> {
        self.inner
            .increment_conversions(experiment_id, variant_id, revenue)
            .await
    }

    async fn set_winner_if_absent(
        &self,
        experiment_id: &Uuid,
        winner: &WinnerDecision,
    ) -> StoreResult<bool> {
        self.inner.set_winner_if_absent(experiment_id, winner).await
    }
}

#[tokio::test]
async fn test_cache_outage_fails_closed() {
    let store = Arc::new(MemoryRecordStore::new());
    let engine = ABTestEngine::new(store, Arc::new(UnavailableCache), ABTestConfig::default());

    let id = engine
        .create_experiment(Experiment::new(
            "Outage",
            vec![Variant::control("a", 50.0), Variant::new("b", 50.0)],
        ))
        .await
        .unwrap();
    engine.start(&id).await.unwrap();

    assert!(engine
        .allocate(&id, "user-1", &AllocationContext::new())
        .await
        .is_none());
}

#[tokio::test]
async fn test_failed_visitor_count_does_not_stick() {
    let store = Arc::new(FailingCounterStore {
        inner: MemoryRecordStore::new(),
    });
    let cache = memory_cache();
    let engine = ABTestEngine::new(store, cache.clone(), ABTestConfig::default());

    let id = engine
        .create_experiment(Experiment::new(
            "Counter outage",
            vec![Variant::control("a", 50.0), Variant::new("b", 50.0)],
        ))
        .await
        .unwrap();
    engine.start(&id).await.unwrap();

    assert!(engine
        .allocate(&id, "user-1", &AllocationContext::new())
        .await
        .is_none());
    assert!(cache.get(&id, "user-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_misconfigured_weights_yield_no_allocation() {
    let (engine, _, _, experiment) = running_engine(vec![
        Variant::control("a", 30.0),
        Variant::new("b", 30.0),
    ])
    .await;

    assert!(engine
        .allocate(&experiment.id, "user-1", &AllocationContext::new())
        .await
        .is_none());
}
