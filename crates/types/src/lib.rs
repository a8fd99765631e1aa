//! Core types and data models for the experiment allocation engine
//!
//! This crate provides the experiment, variant and allocation records shared
//! by the store, the decision engine and the CLI, plus the tuning knobs of
//! the A/B testing policy.

pub mod experiments;
pub mod policy;

pub use experiments::{
    Allocation, AllocationResult, ConfidenceLevel, ConversionEvent, Experiment,
    ExperimentStatus, Variant, WinnerDecision,
};
pub use policy::ABTestConfig;
