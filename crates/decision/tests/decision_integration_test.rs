//! Integration tests for winner selection, completion and reporting

use abtest_store::{MemoryAllocationCache, MemoryRecordStore, RecordStore, StoreError, StoreResult};
use abtest_types::{
    ABTestConfig, Experiment, ExperimentStatus, Variant, WinnerDecision,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use decision::{
    ABTestEngine, AllocationContext, CompletionReason, DecisionError, Recommendation,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn engine_over(store: Arc<dyn RecordStore>) -> ABTestEngine {
    let cache = Arc::new(MemoryAllocationCache::new(Duration::from_secs(3600), 100_000));
    ABTestEngine::new(store, cache, ABTestConfig::default())
}

/// Seed a running experiment with fixed counters
async fn seeded(
    store: &MemoryRecordStore,
    control: (u64, u64),
    treatment: (u64, u64),
) -> Experiment {
    let mut experiment = Experiment::new(
        "Seeded",
        vec![
            Variant::control("control", 50.0).with_counts(control.0, control.1),
            Variant::new("treatment", 50.0).with_counts(treatment.0, treatment.1),
        ],
    );
    experiment.apply_status(ExperimentStatus::Running, Utc::now() - ChronoDuration::days(2));
    store.create_experiment(experiment.clone()).await.unwrap();
    experiment
}

#[tokio::test]
async fn test_winner_freeze_is_idempotent() {
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine_over(store.clone());
    // Significant but below the completion traffic gate
    let experiment = seeded(&store, (200, 20), (200, 50)).await;
    let treatment = experiment.variants[1].id;

    let first = engine.get_results(&experiment.id).await.unwrap();
    assert_eq!(first.winner.as_ref().map(|w| w.variant_id), Some(treatment));
    assert_eq!(first.status, ExperimentStatus::Running);

    // Flood the control with conversions until the numbers reverse
    for _ in 0..150 {
        engine
            .record_conversion(&experiment.id, &experiment.variants[0].id, None)
            .await
            .unwrap();
    }

    let later = engine.get_results(&experiment.id).await.unwrap();
    let winner = later.winner.unwrap();
    assert_eq!(winner.variant_id, treatment);
    assert!(winner.frozen);
    assert_eq!(winner.p_value, first.winner.unwrap().p_value);

    let stored = store.get_experiment(&experiment.id).await.unwrap().unwrap();
    assert_eq!(stored.winning_variant_id, Some(treatment));
    assert_eq!(stored.variants.iter().filter(|v| v.is_winner).count(), 1);
}

#[tokio::test]
async fn test_scheduled_end_completes_without_traffic() {
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine_over(store.clone());

    let experiment = Experiment::new(
        "Expired",
        vec![Variant::control("a", 50.0), Variant::new("b", 50.0)],
    )
    .with_scheduled_end(Utc::now() - ChronoDuration::hours(1));
    let id = engine.create_experiment(experiment).await.unwrap();
    engine.start(&id).await.unwrap();

    let report = engine.get_results(&id).await.unwrap();
    assert!(report.is_complete);
    assert_eq!(report.completion_reason, Some(CompletionReason::ScheduledEndReached));
    assert_eq!(report.status, ExperimentStatus::Completed);
    assert!(report.winner.is_none());
    assert!(report
        .recommendations
        .contains(&Recommendation::NeedsMoreTraffic { total_visitors: 0, threshold: 100 }));

    // Completed experiments stop allocating and reject conversions
    assert!(engine
        .allocate(&id, "late-user", &AllocationContext::new())
        .await
        .is_none());
    let variant_id = report.variants[0].variant_id;
    assert!(matches!(
        engine.record_conversion(&id, &variant_id, None).await,
        Err(DecisionError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_significant_winner_with_little_traffic_is_not_complete() {
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine_over(store.clone());
    let experiment = seeded(&store, (100, 5), (100, 40)).await;

    let report = engine.get_results(&experiment.id).await.unwrap();
    assert_eq!(report.total_visitors, 200);
    assert!(report.winner.is_some());
    assert!(!report.is_complete);
    assert_eq!(report.status, ExperimentStatus::Running);
    assert!(matches!(
        report.recommendations.as_slice(),
        [Recommendation::RollOut { .. }]
    ));
}

#[tokio::test]
async fn test_winner_with_traffic_completes() {
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine_over(store.clone());
    let experiment = seeded(&store, (1000, 100), (1000, 150)).await;

    let report = engine.get_results(&experiment.id).await.unwrap();
    assert_eq!(
        report.completion_reason,
        Some(CompletionReason::WinnerWithSufficientTraffic)
    );
    assert_eq!(report.status, ExperimentStatus::Completed);

    let treatment = report.variant(&experiment.variants[1].id).unwrap();
    let significance = treatment.significance.unwrap();
    assert!(significance.is_significant);
    assert!((significance.lift - 50.0).abs() < 1e-6);
}

#[tokio::test]
async fn test_no_difference_with_high_traffic_suggests_larger_change() {
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine_over(store.clone());
    let experiment = seeded(&store, (2000, 200), (2000, 204)).await;

    let report = engine.get_results(&experiment.id).await.unwrap();
    assert!(report.winner.is_none());
    assert!(!report.is_complete);
    assert_eq!(report.recommendations, vec![Recommendation::TryLargerChange]);
}

#[tokio::test]
async fn test_end_to_end_flow() {
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine_over(store.clone());
    let ctx = AllocationContext::new();

    let id = engine
        .create_experiment(Experiment::new(
            "Pricing page",
            vec![Variant::control("control", 50.0), Variant::new("annual", 50.0)],
        ))
        .await
        .unwrap();
    engine.start(&id).await.unwrap();
    let experiment = engine.get_experiment(&id).await.unwrap().unwrap();
    let control = experiment.variants[0].id;

    // Treatment converts at 30%, control at 10%
    for i in 0..1_200 {
        let subject = format!("shopper-{}", i);
        let Some(allocation) = engine.allocate(&id, &subject, &ctx).await else {
            break;
        };
        let threshold = if allocation.variant_id == control { 10 } else { 30 };
        if i % 100 < threshold {
            // Only completion may refuse a conversion mid-run
            match engine
                .record_conversion(&id, &allocation.variant_id, Some(9.99))
                .await
            {
                Ok(()) | Err(DecisionError::InvalidState(_)) => {}
                Err(e) => panic!("unexpected conversion error: {}", e),
            }
        }
    }

    let report = engine.get_results(&id).await.unwrap();
    let winner = report.winner.expect("winner detected");
    assert_ne!(winner.variant_id, control);
    assert!(winner.frozen);
    assert!(report.is_complete);
    assert_eq!(report.status, ExperimentStatus::Completed);

    let stored = engine.get_experiment(&id).await.unwrap().unwrap();
    assert!(stored.ended_at.is_some());
    assert!(stored.variant(&winner.variant_id).unwrap().revenue > 0.0);
}

#[tokio::test]
async fn test_evaluate_open_experiments() {
    let store = Arc::new(MemoryRecordStore::new());
    let engine = engine_over(store.clone());
    let decided = seeded(&store, (1000, 100), (1000, 150)).await;
    let undecided = seeded(&store, (40, 4), (40, 5)).await;

    let reports = engine.evaluate_open_experiments().await.unwrap();
    assert_eq!(reports.len(), 2);

    let active = engine.list_active_experiments().await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, undecided.id);
    let completed = engine.get_experiment(&decided.id).await.unwrap().unwrap();
    assert_eq!(completed.status, ExperimentStatus::Completed);
}

/// Store double that can be switched offline
struct FlakyStore {
    inner: MemoryRecordStore,
    offline: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::unavailable("records", "connection reset"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn create_experiment(&self, experiment: Experiment) -> StoreResult<()> {
        self.check()?;
        self.inner.create_experiment(experiment).await
    }

    async fn get_experiment(&self, experiment_id: &Uuid) -> StoreResult<Option<Experiment>> {
        self.check()?;
        self.inner.get_experiment(experiment_id).await
    }

    async fn list_experiments(&self) -> StoreResult<Vec<Experiment>> {
        self.check()?;
        self.inner.list_experiments().await
    }

    async fn transition_status(
        &self,
        experiment_id: &Uuid,
        from: ExperimentStatus,
        to: ExperimentStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner.transition_status(experiment_id, from, to, at).await
    }

    async fn increment_visitors(&self, experiment_id: &Uuid, variant_id: &Uuid) -> StoreResult<()> {
        self.check()?;
        self.inner.increment_visitors(experiment_id, variant_id).await
    }

    async fn increment_conversions(
        &self,
        experiment_id: &Uuid,
        variant_id: &Uuid,
        revenue: Option<f64>,
    ) -> StoreResult<()> {
        self.check()?;
        self.inner
            .increment_conversions(experiment_id, variant_id, revenue)
            .await
    }

    async fn set_winner_if_absent(
        &self,
        experiment_id: &Uuid,
        winner: &WinnerDecision,
    ) -> StoreResult<bool> {
        self.check()?;
        self.inner.set_winner_if_absent(experiment_id, winner).await
    }
}

#[tokio::test]
async fn test_results_fail_open_with_stale_report() {
    let store = Arc::new(FlakyStore {
        inner: MemoryRecordStore::new(),
        offline: AtomicBool::new(false),
    });
    let engine = engine_over(store.clone());
    let experiment = seeded(&store.inner, (500, 50), (500, 55)).await;

    let fresh = engine.get_results(&experiment.id).await.unwrap();
    assert!(!fresh.is_stale);

    store.offline.store(true, Ordering::SeqCst);

    let stale = engine.get_results(&experiment.id).await.unwrap();
    assert!(stale.is_stale);
    assert_eq!(stale.total_visitors, fresh.total_visitors);

    // Nothing cached for an experiment never evaluated
    assert!(matches!(
        engine.get_results(&Uuid::new_v4()).await,
        Err(DecisionError::Store(_))
    ));

    // Writes are not retried
    assert!(engine
        .record_conversion(&experiment.id, &experiment.variants[0].id, None)
        .await
        .is_err());
    assert!(engine
        .allocate(&experiment.id, "user-1", &AllocationContext::new())
        .await
        .is_none());
}
