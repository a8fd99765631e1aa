//! A/B testing policy configuration

use serde::{Deserialize, Serialize};

/// Tuning knobs of the allocation and decision policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ABTestConfig {
    /// Minimum visitors per variant before a comparison is evaluated
    pub min_sample_size: u64,
    /// Fixed significance threshold (p < alpha)
    pub significance_level: f64,
    /// Total visitors required before a winner completes the experiment
    pub min_total_visitors: u64,
    /// Below this many total visitors a "needs more traffic" note is added
    pub low_traffic_threshold: u64,
    /// Allowed deviation of the weight sum from 100, in weight points
    pub weight_tolerance: f64,
    /// Move experiments to completed once the stopping rule fires
    pub auto_complete: bool,
}

impl Default for ABTestConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 30,
            significance_level: 0.05,
            min_total_visitors: 1000,
            low_traffic_threshold: 100,
            weight_tolerance: 0.05,
            auto_complete: true,
        }
    }
}
