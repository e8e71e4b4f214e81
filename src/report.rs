//! Report generation for original-vs-poisoned comparisons.
//!
//! A [`QualityReport`] collects the corpus metrics of one evaluation run:
//! - Fluency (perplexity) of both sides and its shift (ΔPPL)
//! - Grammar errors of both sides and their shift (ΔGE)
//! - Semantic similarity and edit distance of the pairs

use crate::metrics::{MetricSummary, SignificanceResult, StatConfig};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as FmtWrite;
use tabled::{Table, Tabled};

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Report generation timestamp
    pub generated_at: DateTime<Utc>,
    /// Crate version that produced the report
    pub framework_version: String,
    /// Bootstrap resamples
    pub bootstrap_n: usize,
    /// Confidence level
    pub confidence: f64,
    /// Significance threshold
    pub alpha: f64,
}

/// A metric measured on both sides of the corpus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairedMetric {
    /// Aggregate over the original sentences
    pub original: MetricSummary,
    /// Aggregate over the poisoned sentences
    pub poisoned: MetricSummary,
    /// `poisoned.mean - original.mean`
    pub delta: f64,
    /// Paired test of the per-sentence shift, when computed
    pub shift_test: Option<SignificanceResult>,
}

impl PairedMetric {
    fn new(original: MetricSummary, poisoned: MetricSummary) -> Self {
        Self {
            delta: poisoned.mean - original.mean,
            original,
            poisoned,
            shift_test: None,
        }
    }
}

/// Corpus quality comparison of original and poisoned sentences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub metadata: ReportMetadata,
    /// Number of sentence pairs
    pub sample_count: usize,
    /// Perplexity, if a fluency oracle was configured
    pub fluency: Option<PairedMetric>,
    /// Grammar errors, if a grammar oracle was configured
    pub grammar: Option<PairedMetric>,
    /// Embedding similarity, if an embedding oracle was configured
    pub semantic_similarity: Option<MetricSummary>,
    /// Case-insensitive Levenshtein distance
    pub edit_distance: Option<MetricSummary>,
}

impl QualityReport {
    /// Empty report for `sample_count` pairs
    #[must_use]
    pub fn new(sample_count: usize, stats: &StatConfig) -> Self {
        Self {
            metadata: ReportMetadata {
                generated_at: Utc::now(),
                framework_version: env!("CARGO_PKG_VERSION").to_string(),
                bootstrap_n: stats.bootstrap_n,
                confidence: stats.confidence,
                alpha: stats.alpha,
            },
            sample_count,
            fluency: None,
            grammar: None,
            semantic_similarity: None,
            edit_distance: None,
        }
    }

    /// Record fluency of both sides and the shift test
    pub fn set_fluency(
        &mut self,
        original: MetricSummary,
        poisoned: MetricSummary,
        shift_test: Option<SignificanceResult>,
    ) {
        let mut metric = PairedMetric::new(original, poisoned);
        metric.shift_test = shift_test;
        self.fluency = Some(metric);
    }

    /// Record grammar errors of both sides
    pub fn set_grammar(&mut self, original: MetricSummary, poisoned: MetricSummary) {
        self.grammar = Some(PairedMetric::new(original, poisoned));
    }

    /// Render report as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    fn rows(&self) -> Vec<MetricRow> {
        let mut rows = Vec::new();

        if let Some(fluency) = &self.fluency {
            rows.push(MetricRow::paired("Perplexity", fluency));
        }
        if let Some(grammar) = &self.grammar {
            rows.push(MetricRow::paired("Grammar errors", grammar));
        }
        if let Some(sim) = &self.semantic_similarity {
            rows.push(MetricRow::single("Semantic similarity", sim));
        }
        if let Some(dist) = &self.edit_distance {
            rows.push(MetricRow::single("Edit distance", dist));
        }

        rows
    }

    /// Render report as markdown
    #[must_use]
    pub fn to_markdown(&self) -> String {
        let mut output = String::new();

        writeln!(output, "# Poisoned Text Quality Report").ok();
        writeln!(output).ok();
        writeln!(
            output,
            "**Generated:** {}",
            self.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        )
        .ok();
        writeln!(output, "**Version:** {}", self.metadata.framework_version).ok();
        writeln!(output, "**Pairs:** {}", self.sample_count).ok();
        writeln!(output).ok();

        writeln!(output, "## Metrics").ok();
        writeln!(output).ok();
        writeln!(output, "| Metric | Original | Poisoned | Delta | {:.0}% CI |", self.metadata.confidence * 100.0).ok();
        writeln!(output, "|--------|----------|----------|-------|--------|").ok();
        for row in self.rows() {
            writeln!(
                output,
                "| {} | {} | {} | {} | {} |",
                row.metric, row.original, row.poisoned, row.delta, row.ci
            )
            .ok();
        }
        writeln!(output).ok();

        if let Some(test) = self.fluency.as_ref().and_then(|f| f.shift_test.as_ref()) {
            writeln!(output, "## Fluency Shift").ok();
            writeln!(output).ok();
            writeln!(
                output,
                "Paired t-test: t = {:.3}, p = {:.4}, d = {:.2} ({}){}",
                test.t_statistic,
                test.p_value,
                test.cohens_d,
                test.effect_interpretation,
                if test.is_significant { ", significant" } else { "" }
            )
            .ok();
            writeln!(output).ok();
        }

        if let Some(fluency) = &self.fluency {
            let excluded = fluency.original.excluded_count + fluency.poisoned.excluded_count;
            if excluded > 0 {
                writeln!(
                    output,
                    "_{excluded} non-finite perplexity scores were excluded._"
                )
                .ok();
            }
        }

        output
    }

    /// Render report as plain text
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut output = String::new();
        writeln!(output, "Poisoned Text Quality Report").ok();
        writeln!(output, "============================").ok();
        writeln!(output, "Pairs: {}", self.sample_count).ok();
        writeln!(output).ok();
        writeln!(output, "{}", Table::new(self.rows())).ok();
        output
    }
}

/// Table row for text/markdown output
#[derive(Tabled)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Original")]
    original: String,
    #[tabled(rename = "Poisoned")]
    poisoned: String,
    #[tabled(rename = "Delta")]
    delta: String,
    #[tabled(rename = "CI (poisoned)")]
    ci: String,
}

impl MetricRow {
    fn paired(name: &str, metric: &PairedMetric) -> Self {
        Self {
            metric: name.to_string(),
            original: format!("{:.3}", metric.original.mean),
            poisoned: format!("{:.3}", metric.poisoned.mean),
            delta: format!("{:+.3}", metric.delta),
            ci: format_ci(&metric.poisoned),
        }
    }

    fn single(name: &str, summary: &MetricSummary) -> Self {
        Self {
            metric: name.to_string(),
            original: "-".to_string(),
            poisoned: format!("{:.3}", summary.mean),
            delta: "-".to_string(),
            ci: format_ci(summary),
        }
    }
}

fn format_ci(summary: &MetricSummary) -> String {
    format!("[{:.3}, {:.3}]", summary.ci_lower, summary.ci_upper)
}
