//! Scoring oracles and the adapters the evaluator drives.
//!
//! An oracle is an external capability (a language model, a grammar checker,
//! a sentence encoder, a string-distance algorithm). Each adapter wraps
//! exactly one oracle, normalizes its output and never retries: a failed
//! oracle call reaches the caller unchanged.

use crate::metrics::MetricResult;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by an oracle call
#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Scorer not available: {0}")]
    Unavailable(String),

    #[error("Scorer failed: {0}")]
    Failed(String),

    #[error("Invalid scorer output: {0}")]
    InvalidOutput(String),

    #[error("Scorer timeout after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Language-model fluency, typically perplexity (lower is more fluent)
pub trait FluencyOracle: Send + Sync {
    /// Score one sentence; non-finite values are allowed
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying model cannot be reached.
    fn score(&self, sentence: &str) -> Result<f64, OracleError>;
}

/// Rule-based grammar checking
pub trait GrammarOracle: Send + Sync {
    /// Number of grammar issues detected in one sentence
    ///
    /// # Errors
    ///
    /// Returns an error if the checker cannot be reached.
    fn violations(&self, sentence: &str) -> Result<usize, OracleError>;
}

/// Sentence embedding model
pub trait EmbeddingOracle: Send + Sync {
    /// Embed one sentence
    ///
    /// # Errors
    ///
    /// Returns an error if the encoder cannot be reached.
    fn embed(&self, sentence: &str) -> Result<Vec<f32>, OracleError>;

    /// Cosine similarity of the two sentence embeddings
    ///
    /// # Errors
    ///
    /// Returns an error if either embedding fails or is degenerate.
    fn similarity(&self, a: &str, b: &str) -> Result<f64, OracleError> {
        let ea = self.embed(a)?;
        let eb = self.embed(b)?;
        cosine_similarity(&ea, &eb)
    }
}

/// Lexical distance between two strings
pub trait DistanceOracle: Send + Sync {
    /// Distance between `a` and `b`
    fn distance(&self, a: &str, b: &str) -> usize;
}

/// Cosine similarity of two vectors, clamped to `[-1, 1]`
///
/// # Errors
///
/// Returns `InvalidOutput` if the dimensions differ, a vector is empty, has
/// zero norm or contains non-finite components.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, OracleError> {
    if a.len() != b.len() || a.is_empty() {
        return Err(OracleError::InvalidOutput(format!(
            "embedding dimensions {} and {} are not comparable",
            a.len(),
            b.len()
        )));
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0_f64, 0.0_f64, 0.0_f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if !denom.is_finite() || !dot.is_finite() {
        return Err(OracleError::InvalidOutput(
            "embedding contains non-finite values".to_string(),
        ));
    }
    if denom < f64::EPSILON {
        return Err(OracleError::InvalidOutput(
            "embedding has zero norm".to_string(),
        ));
    }

    Ok((dot / denom).clamp(-1.0, 1.0))
}

/// Character-level Levenshtein distance
#[derive(Debug, Clone, Copy, Default)]
pub struct Levenshtein;

impl DistanceOracle for Levenshtein {
    fn distance(&self, a: &str, b: &str) -> usize {
        levenshtein(a, b)
    }
}

/// Minimum number of single-character insertions, deletions and
/// substitutions turning `a` into `b`
#[must_use]
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    // Two-row dynamic programming over the shorter string
    let (long, short) = if a.len() >= b.len() { (&a, &b) } else { (&b, &a) };
    let mut prev: Vec<usize> = (0..=short.len()).collect();
    let mut curr = vec![0; short.len() + 1];

    for (i, lc) in long.iter().enumerate() {
        curr[0] = i + 1;
        for (j, sc) in short.iter().enumerate() {
            let substitution = prev[j] + usize::from(lc != sc);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[short.len()]
}

/// Fluency adapter: flags non-finite scores as invalid
#[derive(Clone)]
pub struct FluencyScorer {
    oracle: Arc<dyn FluencyOracle>,
}

impl FluencyScorer {
    #[must_use]
    pub fn new(oracle: Arc<dyn FluencyOracle>) -> Self {
        Self { oracle }
    }

    /// Score one sentence
    ///
    /// # Errors
    ///
    /// Propagates the oracle's error unchanged.
    pub fn score(&self, sentence: &str) -> Result<MetricResult, OracleError> {
        self.oracle.score(sentence).map(MetricResult::from_score)
    }
}

/// Grammar adapter
#[derive(Clone)]
pub struct GrammarScorer {
    oracle: Arc<dyn GrammarOracle>,
}

impl GrammarScorer {
    #[must_use]
    pub fn new(oracle: Arc<dyn GrammarOracle>) -> Self {
        Self { oracle }
    }

    /// Violation count of one sentence
    ///
    /// # Errors
    ///
    /// Propagates the oracle's error unchanged.
    pub fn score(&self, sentence: &str) -> Result<usize, OracleError> {
        self.oracle.violations(sentence)
    }
}

/// Embedding-similarity adapter
#[derive(Clone)]
pub struct SimilarityScorer {
    oracle: Arc<dyn EmbeddingOracle>,
}

impl SimilarityScorer {
    #[must_use]
    pub fn new(oracle: Arc<dyn EmbeddingOracle>) -> Self {
        Self { oracle }
    }

    /// Similarity in `[-1, 1]`
    ///
    /// # Errors
    ///
    /// Propagates the oracle's error; a result outside `[-1, 1]` after
    /// tolerance or a non-finite result is `InvalidOutput`.
    pub fn similarity(&self, a: &str, b: &str) -> Result<f64, OracleError> {
        let sim = self.oracle.similarity(a, b)?;
        if !sim.is_finite() || sim.abs() > 1.0 + 1e-6 {
            return Err(OracleError::InvalidOutput(format!(
                "similarity {sim} outside [-1, 1]"
            )));
        }
        Ok(sim.clamp(-1.0, 1.0))
    }
}

/// Case-insensitive edit distance adapter
#[derive(Clone)]
pub struct EditDistanceScorer {
    oracle: Arc<dyn DistanceOracle>,
}

impl Default for EditDistanceScorer {
    fn default() -> Self {
        Self::new(Arc::new(Levenshtein))
    }
}

impl EditDistanceScorer {
    #[must_use]
    pub fn new(oracle: Arc<dyn DistanceOracle>) -> Self {
        Self { oracle }
    }

    /// Distance between the lowercased inputs
    #[must_use]
    pub fn distance(&self, a: &str, b: &str) -> usize {
        self.oracle.distance(&a.to_lowercase(), &b.to_lowercase())
    }
}
