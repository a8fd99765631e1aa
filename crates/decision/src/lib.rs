//! Experiment allocation and statistical decision engine
//!
//! This crate assigns subjects to experiment variants deterministically,
//! records their conversions, and decides when a variant has won:
//! SHA-256 hash bucketing, weighted variant selection, a set-if-absent
//! allocation cache, two-proportion z-tests with Wald confidence intervals,
//! and a winner freeze that never flips once written.

pub mod ab_testing;
pub mod allocation;
pub mod bucketing;
pub mod decision_engine;
pub mod eligibility;
pub mod experiment_manager;
pub mod outcome;
pub mod selector;
pub mod statistical;
pub mod errors;

pub use ab_testing::ABTestEngine;
pub use allocation::AllocationGateway;
pub use bucketing::{bucket, BUCKET_SPACE};
pub use decision_engine::{
    CompletionReason, DecisionEngine, Evaluation, ExperimentReport, Recommendation, VariantStats,
    WinnerSummary,
};
pub use eligibility::{AllocationContext, Eligibility, EligibilityChecker};
pub use experiment_manager::ExperimentManager;
pub use outcome::OutcomeRecorder;
pub use selector::select;
pub use statistical::{
    calculate_significance, ConfidenceInterval, SampleSizeCalculator, SignificanceResult,
    StatisticalTest, ZTest,
};
pub use errors::{DecisionError, Result};
