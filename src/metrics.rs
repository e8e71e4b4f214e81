//! Metric aggregation and statistical computation module.
//!
//! Per-sentence oracle outputs become [`MetricResult`]s; a [`ScoreCollector`]
//! folds them into a [`MetricSummary`]. The fold is a sum/count over a set,
//! so the order in which scores arrive does not matter.
//!
//! - Invalid (non-finite) scores are counted as excluded, never as zero
//! - Bootstrap confidence intervals on the mean
//! - Paired t-test with Cohen's d for original vs poisoned shifts

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// One per-sentence score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    /// Raw score
    pub value: f64,
    /// False when the score could not be computed
    pub valid: bool,
}

impl MetricResult {
    /// Score that is valid only if finite
    #[must_use]
    pub fn from_score(value: f64) -> Self {
        Self {
            value,
            valid: value.is_finite(),
        }
    }

    /// Score that is always aggregated
    #[must_use]
    pub const fn valid(value: f64) -> Self {
        Self { value, valid: true }
    }

    /// Score that must be excluded
    #[must_use]
    pub const fn invalid(value: f64) -> Self {
        Self {
            value,
            valid: false,
        }
    }
}

/// Statistical configuration for evaluation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatConfig {
    /// Number of bootstrap resamples
    #[serde(default = "default_bootstrap_n")]
    pub bootstrap_n: usize,
    /// Confidence level (e.g., 0.95)
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Significance threshold
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Random seed for reproducibility
    #[serde(default = "default_seed")]
    pub seed: u64,
}

const fn default_bootstrap_n() -> usize {
    1000
}
const fn default_confidence() -> f64 {
    0.95
}
const fn default_alpha() -> f64 {
    0.05
}
const fn default_seed() -> u64 {
    42
}

impl Default for StatConfig {
    fn default() -> Self {
        Self {
            bootstrap_n: default_bootstrap_n(),
            confidence: default_confidence(),
            alpha: default_alpha(),
            seed: default_seed(),
        }
    }
}

/// Corpus-level aggregate of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Mean over valid scores
    pub mean: f64,
    /// Scores included in the mean
    pub valid_count: usize,
    /// Scores dropped as invalid
    pub excluded_count: usize,
    /// Lower bound of the bootstrap CI
    pub ci_lower: f64,
    /// Upper bound of the bootstrap CI
    pub ci_upper: f64,
}

/// Accumulates per-sentence results for one metric
#[derive(Debug, Default)]
pub struct ScoreCollector {
    values: Vec<f64>,
    excluded: usize,
}

impl ScoreCollector {
    /// Create an empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one result
    pub fn record(&mut self, result: MetricResult) {
        if result.valid {
            self.values.push(result.value);
        } else {
            self.excluded += 1;
        }
    }

    /// Valid values recorded so far
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of excluded results
    #[must_use]
    pub const fn excluded(&self) -> usize {
        self.excluded
    }

    /// Mean of the valid values; `None` when no valid result was recorded
    #[must_use]
    pub fn mean(&self) -> Option<f64> {
        (!self.values.is_empty()).then(|| compute_mean(&self.values))
    }

    /// Fold into a summary; `None` when no valid result was recorded
    #[must_use]
    pub fn compute(&self, config: &StatConfig) -> Option<MetricSummary> {
        if self.values.is_empty() {
            return None;
        }
        let (ci_lower, ci_upper) = bootstrap_ci(&self.values, config);
        Some(MetricSummary {
            mean: compute_mean(&self.values),
            valid_count: self.values.len(),
            excluded_count: self.excluded,
            ci_lower,
            ci_upper,
        })
    }
}

impl FromIterator<MetricResult> for ScoreCollector {
    fn from_iter<I: IntoIterator<Item = MetricResult>>(iter: I) -> Self {
        let mut collector = Self::new();
        for result in iter {
            collector.record(result);
        }
        collector
    }
}

/// Compute mean of samples
#[allow(clippy::cast_precision_loss)]
pub(crate) fn compute_mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Compute standard deviation of samples
#[allow(clippy::cast_precision_loss)]
fn compute_std(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = compute_mean(samples);
    let variance =
        samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (samples.len() - 1) as f64;
    variance.sqrt()
}

/// Bootstrap confidence interval (proper resampling)
///
/// Uses the percentile method with `n` resamples.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::cast_possible_truncation
)]
pub fn bootstrap_ci(samples: &[f64], config: &StatConfig) -> (f64, f64) {
    if samples.len() < 2 || config.bootstrap_n == 0 {
        let mean = compute_mean(samples);
        return (mean, mean);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut bootstrap_means = Vec::with_capacity(config.bootstrap_n);

    for _ in 0..config.bootstrap_n {
        let resample_sum: f64 = (0..samples.len())
            .map(|_| {
                let idx = rng.next_u64() as usize % samples.len();
                samples[idx]
            })
            .sum();
        bootstrap_means.push(resample_sum / samples.len() as f64);
    }

    bootstrap_means.sort_by(f64::total_cmp);

    let alpha = 1.0 - config.confidence;
    let lower_idx = (config.bootstrap_n as f64 * (alpha / 2.0)).floor() as usize;
    let upper_idx = (config.bootstrap_n as f64 * (1.0 - alpha / 2.0)).ceil() as usize;

    let last = bootstrap_means.len() - 1;
    let lower = bootstrap_means[lower_idx.min(last)];
    let upper = bootstrap_means[upper_idx.min(last)];

    (lower, upper)
}

/// Result of a significance test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceResult {
    /// t-statistic
    pub t_statistic: f64,
    /// p-value
    pub p_value: f64,
    /// Degrees of freedom
    pub degrees_of_freedom: f64,
    /// Is result significant at the given alpha?
    pub is_significant: bool,
    /// Cohen's d effect size
    pub cohens_d: f64,
    /// Effect size interpretation
    pub effect_interpretation: String,
}

/// Paired t-test for comparing two sample sets
///
/// Returns `None` if the samples differ in length, have fewer than two
/// pairs, or the differences have no variance.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn paired_t_test(
    samples_a: &[f64],
    samples_b: &[f64],
    alpha: f64,
) -> Option<SignificanceResult> {
    if samples_a.len() != samples_b.len() || samples_a.len() < 2 {
        return None;
    }

    let n = samples_a.len();
    let differences: Vec<f64> = samples_a
        .iter()
        .zip(samples_b.iter())
        .map(|(a, b)| a - b)
        .collect();

    let mean_diff = compute_mean(&differences);
    let std_diff = compute_std(&differences);

    if std_diff < f64::EPSILON {
        return None;
    }

    let t_statistic = mean_diff / (std_diff / (n as f64).sqrt());
    let df = (n - 1) as f64;

    let t_dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p_value = 2.0 * (1.0 - t_dist.cdf(t_statistic.abs()));

    let cohens_d = mean_diff / std_diff;

    Some(SignificanceResult {
        t_statistic,
        p_value,
        degrees_of_freedom: df,
        is_significant: p_value < alpha,
        cohens_d,
        effect_interpretation: interpret_cohens_d(cohens_d).to_string(),
    })
}

fn interpret_cohens_d(d: f64) -> &'static str {
    let abs_d = d.abs();
    if abs_d < 0.2 {
        "negligible"
    } else if abs_d < 0.5 {
        "small"
    } else if abs_d < 0.8 {
        "medium"
    } else {
        "large"
    }
}
