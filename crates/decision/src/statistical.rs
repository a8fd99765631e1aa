//! Statistical significance testing for A/B experiments
//!
//! This module provides the two-proportion z-test used to compare a treatment
//! against the control, the per-variant Wald confidence interval, and a
//! sample size calculator for planning.
//!
//! The normal CDF is computed from the Abramowitz–Stegun 7.1.26 rational
//! approximation of `erf` (max error ~1.5e-7). The coefficients are fixed so
//! p-values reproduce exactly around the 0.05 decision boundary.

use abtest_types::Variant;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::errors::{DecisionError, Result};

/// Minimum visitors per arm before a comparison is evaluated
pub const MIN_SAMPLE_SIZE: u64 = 30;

/// Fixed significance threshold
pub const SIGNIFICANCE_LEVEL: f64 = 0.05;

const ERF_A1: f64 = 0.254829592;
const ERF_A2: f64 = -0.284496736;
const ERF_A3: f64 = 1.421413741;
const ERF_A4: f64 = -1.453152027;
const ERF_A5: f64 = 1.061405429;
const ERF_P: f64 = 0.3275911;

/// Error function, Abramowitz–Stegun 7.1.26
pub fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + ERF_P * x);
    let poly = ((((ERF_A5 * t + ERF_A4) * t + ERF_A3) * t + ERF_A2) * t + ERF_A1) * t;

    sign * (1.0 - poly * (-x * x).exp())
}

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    (1.0 + erf(x / std::f64::consts::SQRT_2)) / 2.0
}

/// Two-sided critical value for a confidence level; 1.96 when unrecognized
pub fn critical_value(confidence: f64) -> f64 {
    match confidence {
        c if (c - 0.90).abs() < 0.001 => 1.645,
        c if (c - 0.95).abs() < 0.001 => 1.96,
        c if (c - 0.99).abs() < 0.001 => 2.576,
        _ => 1.96,
    }
}

/// Statistical test trait
pub trait StatisticalTest {
    /// Perform the test and return p-value
    fn test(&self) -> Result<f64>;

    /// Check if result is significant at given alpha level
    fn is_significant(&self, alpha: f64) -> Result<bool> {
        Ok(self.test()? < alpha)
    }
}

/// Wald interval of a single conversion rate, in percent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    /// Interval for `conversions / visitors` at the given confidence level.
    ///
    /// Evaluated per variant, not as a paired comparison. Bounds are clamped
    /// to `[0, 100]`; an empty variant yields `[0, 0]`.
    pub fn wald(visitors: u64, conversions: u64, confidence: f64) -> Self {
        if visitors == 0 {
            return Self { lower: 0.0, upper: 0.0 };
        }

        let n = visitors as f64;
        let p = conversions as f64 / n;
        let margin = critical_value(confidence) * (p * (1.0 - p) / n).sqrt();

        Self {
            lower: ((p - margin) * 100.0).max(0.0),
            upper: ((p + margin) * 100.0).min(100.0),
        }
    }

    pub fn contains(&self, percent: f64) -> bool {
        self.lower <= percent && percent <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Result of comparing one treatment against the control
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SignificanceResult {
    /// Absolute z-score
    pub z_score: f64,
    /// Two-tailed p-value
    pub p_value: f64,
    pub is_significant: bool,
    /// Relative change of the treatment rate over control, in percent
    pub lift: f64,
    /// Cohen's h, treatment minus control
    pub effect_size: f64,
    /// False when the power gate skipped the test
    pub evaluated: bool,
}

impl SignificanceResult {
    /// Outcome reported when either arm is below the power gate
    pub fn insufficient_sample() -> Self {
        Self {
            z_score: 0.0,
            p_value: 1.0,
            is_significant: false,
            lift: 0.0,
            effect_size: 0.0,
            evaluated: false,
        }
    }
}

/// Two-proportion z-test for comparing conversion rates
///
/// Tests the null hypothesis that two proportions are equal. Group 1 is the
/// control, group 2 the treatment.
#[derive(Debug, Clone)]
pub struct ZTest {
    /// Successes in group 1
    pub successes_1: u64,
    /// Total trials in group 1
    pub trials_1: u64,
    /// Successes in group 2
    pub successes_2: u64,
    /// Total trials in group 2
    pub trials_2: u64,
}

impl ZTest {
    /// Create a new z-test
    pub fn new(successes_1: u64, trials_1: u64, successes_2: u64, trials_2: u64) -> Self {
        Self {
            successes_1,
            trials_1,
            successes_2,
            trials_2,
        }
    }

    /// Compare a treatment variant against the control variant
    pub fn from_variants(control: &Variant, treatment: &Variant) -> Self {
        Self::new(
            control.conversions,
            control.visitors,
            treatment.conversions,
            treatment.visitors,
        )
    }

    /// Calculate sample proportions
    pub fn proportions(&self) -> (f64, f64) {
        let p1 = if self.trials_1 > 0 {
            self.successes_1 as f64 / self.trials_1 as f64
        } else {
            0.0
        };

        let p2 = if self.trials_2 > 0 {
            self.successes_2 as f64 / self.trials_2 as f64
        } else {
            0.0
        };

        (p1, p2)
    }

    /// Calculate pooled proportion
    pub fn pooled_proportion(&self) -> f64 {
        let total_successes = self.successes_1 + self.successes_2;
        let total_trials = self.trials_1 + self.trials_2;

        if total_trials > 0 {
            total_successes as f64 / total_trials as f64
        } else {
            0.0
        }
    }

    /// Absolute z-statistic; 0 when the pooled standard error is 0
    pub fn z_statistic(&self) -> Result<f64> {
        let (p1, p2) = self.proportions();
        let p_pool = self.pooled_proportion();

        let n1 = self.trials_1 as f64;
        let n2 = self.trials_2 as f64;

        if n1 == 0.0 || n2 == 0.0 {
            return Err(DecisionError::InsufficientData(
                "Cannot perform z-test with zero trials".to_string(),
            ));
        }

        // Standard error: sqrt(p_pool * (1 - p_pool) * (1/n1 + 1/n2))
        let se = (p_pool * (1.0 - p_pool) * (1.0 / n1 + 1.0 / n2)).sqrt();

        if se == 0.0 {
            return Ok(0.0);
        }

        Ok((p2 - p1).abs() / se)
    }

    /// Relative lift of group 2 over group 1 in percent; 0 when group 1 is 0
    pub fn lift(&self) -> f64 {
        let (p1, p2) = self.proportions();
        if p1 > 0.0 {
            (p2 - p1) / p1 * 100.0
        } else {
            0.0
        }
    }

    /// Calculate effect size (Cohen's h)
    pub fn effect_size(&self) -> f64 {
        let (p1, p2) = self.proportions();

        // Cohen's h = 2 * (arcsin(sqrt(p2)) - arcsin(sqrt(p1)))
        2.0 * (p2.sqrt().asin() - p1.sqrt().asin())
    }

    /// Run the full comparison behind the power gate.
    ///
    /// Either arm below `min_sample_size` visitors yields
    /// [`SignificanceResult::insufficient_sample`].
    pub fn evaluate(&self, min_sample_size: u64, alpha: f64) -> Result<SignificanceResult> {
        if self.trials_1 < min_sample_size || self.trials_2 < min_sample_size {
            return Ok(SignificanceResult::insufficient_sample());
        }

        let z_score = self.z_statistic()?;
        let p_value = self.test()?;

        Ok(SignificanceResult {
            z_score,
            p_value,
            is_significant: p_value < alpha,
            lift: self.lift(),
            effect_size: self.effect_size(),
            evaluated: true,
        })
    }
}

impl StatisticalTest for ZTest {
    /// Perform two-tailed z-test and return p-value
    fn test(&self) -> Result<f64> {
        let z = self.z_statistic()?;
        if z == 0.0 {
            return Ok(1.0);
        }

        Ok(2.0 * (1.0 - normal_cdf(z.abs())))
    }
}

/// Significance of `treatment` against `control` with the default gate and alpha
pub fn calculate_significance(control: &Variant, treatment: &Variant) -> Result<SignificanceResult> {
    ZTest::from_variants(control, treatment).evaluate(MIN_SAMPLE_SIZE, SIGNIFICANCE_LEVEL)
}

/// Sample size calculator for A/B tests
pub struct SampleSizeCalculator {
    /// Baseline conversion rate
    pub baseline_rate: f64,
    /// Minimum detectable effect (relative improvement)
    pub min_effect: f64,
    /// Statistical power (1 - beta)
    pub power: f64,
    /// Significance level (alpha)
    pub alpha: f64,
}

impl SampleSizeCalculator {
    /// Create a new sample size calculator
    pub fn new(baseline_rate: f64, min_effect: f64, power: f64, alpha: f64) -> Result<Self> {
        if baseline_rate <= 0.0 || baseline_rate >= 1.0 {
            return Err(DecisionError::InvalidParameter(
                "Baseline rate must be between 0 and 1".to_string(),
            ));
        }

        if min_effect == 0.0 || !min_effect.is_finite() {
            return Err(DecisionError::InvalidParameter(
                "Minimum effect must be a non-zero finite number".to_string(),
            ));
        }

        if power <= 0.0 || power >= 1.0 {
            return Err(DecisionError::InvalidParameter(
                "Power must be between 0 and 1".to_string(),
            ));
        }

        if alpha <= 0.0 || alpha >= 1.0 {
            return Err(DecisionError::InvalidParameter(
                "Alpha must be between 0 and 1".to_string(),
            ));
        }

        Ok(Self {
            baseline_rate,
            min_effect,
            power,
            alpha,
        })
    }

    /// Calculate required sample size per variant
    pub fn calculate(&self) -> Result<u64> {
        let p1 = self.baseline_rate;
        let p2 = self.baseline_rate * (1.0 + self.min_effect);

        if p2 >= 1.0 || p2 <= 0.0 {
            return Err(DecisionError::InvalidParameter(
                "Effect size out of range, treatment rate must stay within (0, 1)".to_string(),
            ));
        }

        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| DecisionError::StatisticalError(e.to_string()))?;

        let z_alpha = normal.inverse_cdf(1.0 - self.alpha / 2.0);
        let z_beta = normal.inverse_cdf(self.power);

        let p_avg = (p1 + p2) / 2.0;
        let delta = (p2 - p1).abs();

        let n = ((z_alpha + z_beta).powi(2) * 2.0 * p_avg * (1.0 - p_avg)) / delta.powi(2);

        Ok(n.ceil() as u64)
    }
}
