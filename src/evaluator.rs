//! Corpus-level evaluation over the scoring oracles.
//!
//! The [`Evaluator`] owns one handle per oracle, acquired when the evaluator
//! is built and released when it is dropped. Each `evaluate_*` call scores
//! sentences independently (sequentially, or on a bounded worker pool) and
//! then folds the per-sentence [`MetricResult`]s into an aggregate.
//!
//! Filtering policy per metric:
//!
//! | Metric    | Invalid scores          | Empty input  |
//! |-----------|-------------------------|--------------|
//! | fluency   | excluded from the mean  | `EmptyInput` |
//! | grammar   | none possible, no filter| `EmptyInput` |
//! | semantic  | oracle error propagates | `EmptyInput` |
//! | edit dist | none possible           | `EmptyInput` |

use crate::config::{ConfigError, EvalSettings};
use crate::dataset::CorpusPair;
use crate::external::CommandOracle;
use crate::metrics::{paired_t_test, MetricResult, MetricSummary, ScoreCollector, StatConfig};
use crate::oracle::{
    DistanceOracle, EditDistanceScorer, EmbeddingOracle, FluencyOracle, FluencyScorer,
    GrammarOracle, GrammarScorer, Levenshtein, OracleError, SimilarityScorer,
};
use crate::report::QualityReport;
use rayon::prelude::*;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that can occur during evaluation
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("No usable sentences to aggregate for {0}")]
    EmptyInput(MetricKind),

    #[error("Corpus length mismatch: {originals} originals vs {transformed} transformed")]
    LengthMismatch { originals: usize, transformed: usize },

    #[error("Evaluation cancelled")]
    Cancelled,

    #[error("No {0} oracle configured")]
    MissingOracle(MetricKind),

    #[error("Oracle call failed: {0}")]
    Oracle(#[from] OracleError),

    #[error("Failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid evaluator configuration: {0}")]
    Config(#[from] ConfigError),
}

/// The four corpus metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Fluency,
    Grammar,
    Semantic,
    EditDistance,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fluency => "fluency",
            Self::Grammar => "grammar",
            Self::Semantic => "semantic similarity",
            Self::EditDistance => "edit distance",
        };
        f.write_str(name)
    }
}

/// Cooperative cancellation flag shared between a caller and an evaluator
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of running and future calls
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Oracle handles used by an evaluator
#[derive(Clone, Default)]
pub struct OracleSet {
    fluency: Option<Arc<dyn FluencyOracle>>,
    grammar: Option<Arc<dyn GrammarOracle>>,
    embedding: Option<Arc<dyn EmbeddingOracle>>,
    distance: Option<Arc<dyn DistanceOracle>>,
}

impl OracleSet {
    /// Empty set; edit distance falls back to [`Levenshtein`]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_fluency(mut self, oracle: Arc<dyn FluencyOracle>) -> Self {
        self.fluency = Some(oracle);
        self
    }

    #[must_use]
    pub fn with_grammar(mut self, oracle: Arc<dyn GrammarOracle>) -> Self {
        self.grammar = Some(oracle);
        self
    }

    #[must_use]
    pub fn with_embedding(mut self, oracle: Arc<dyn EmbeddingOracle>) -> Self {
        self.embedding = Some(oracle);
        self
    }

    #[must_use]
    pub fn with_distance(mut self, oracle: Arc<dyn DistanceOracle>) -> Self {
        self.distance = Some(oracle);
        self
    }

    /// Command-backed oracles for every configured scorer
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if a command line cannot be split.
    pub fn from_config(settings: &EvalSettings) -> Result<Self, ConfigError> {
        let mut set = Self::new();
        if let Some(command) = &settings.oracles.fluency {
            set = set.with_fluency(Arc::new(CommandOracle::from_config(command)?));
        }
        if let Some(command) = &settings.oracles.grammar {
            set = set.with_grammar(Arc::new(CommandOracle::from_config(command)?));
        }
        if let Some(command) = &settings.oracles.embedding {
            set = set.with_embedding(Arc::new(CommandOracle::from_config(command)?));
        }
        Ok(set)
    }
}

/// Evaluator settings
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluatorSettings {
    /// Worker threads for oracle calls; 1 scores sequentially
    pub workers: usize,
    /// Deadline for a single `evaluate_*` call
    pub timeout: Option<Duration>,
    /// Bootstrap and significance settings
    pub stats: StatConfig,
}

impl Default for EvaluatorSettings {
    fn default() -> Self {
        Self {
            workers: 1,
            timeout: None,
            stats: StatConfig::default(),
        }
    }
}

impl From<&EvalSettings> for EvaluatorSettings {
    fn from(settings: &EvalSettings) -> Self {
        Self {
            workers: settings.evaluator.workers,
            timeout: settings.evaluator.timeout(),
            stats: settings.stats.clone(),
        }
    }
}

/// Per-call cancellation state
struct CallGuard<'a> {
    token: &'a CancellationToken,
    deadline: Option<Instant>,
}

impl CallGuard<'_> {
    fn check(&self) -> Result<(), EvalError> {
        if self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(EvalError::Cancelled);
        }
        Ok(())
    }
}

/// Aggregates oracle scores over corpora
pub struct Evaluator {
    fluency: Option<FluencyScorer>,
    grammar: Option<GrammarScorer>,
    similarity: Option<SimilarityScorer>,
    edit_distance: EditDistanceScorer,
    settings: EvaluatorSettings,
    pool: Option<rayon::ThreadPool>,
    cancel: CancellationToken,
}

impl Evaluator {
    /// Create an evaluator with default settings
    #[must_use]
    pub fn new(oracles: OracleSet) -> Self {
        Self {
            fluency: oracles.fluency.map(FluencyScorer::new),
            grammar: oracles.grammar.map(GrammarScorer::new),
            similarity: oracles.embedding.map(SimilarityScorer::new),
            edit_distance: EditDistanceScorer::new(
                oracles.distance.unwrap_or_else(|| Arc::new(Levenshtein)),
            ),
            settings: EvaluatorSettings::default(),
            pool: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Create an evaluator with custom settings
    ///
    /// # Errors
    ///
    /// Returns `ThreadPool` if the worker pool cannot be built.
    pub fn with_settings(oracles: OracleSet, settings: EvaluatorSettings) -> Result<Self, EvalError> {
        let pool = if settings.workers > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(settings.workers)
                    .thread_name(|i| format!("scorer-{i}"))
                    .build()?,
            )
        } else {
            None
        };

        Ok(Self {
            settings,
            pool,
            ..Self::new(oracles)
        })
    }

    /// Build oracles and settings from a settings file
    ///
    /// # Errors
    ///
    /// Returns `Config` if an oracle command is invalid and `ThreadPool` if
    /// the worker pool cannot be built.
    pub fn from_config(settings: &EvalSettings) -> Result<Self, EvalError> {
        let oracles = OracleSet::from_config(settings)?;
        Self::with_settings(oracles, EvaluatorSettings::from(settings))
    }

    /// Use an externally owned cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this evaluator's calls
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn settings(&self) -> &EvaluatorSettings {
        &self.settings
    }

    /// Score every item, checking for cancellation before each one
    fn score_all<T, R, F>(&self, items: &[T], score: F) -> Result<Vec<R>, EvalError>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> Result<R, EvalError> + Sync,
    {
        let guard = CallGuard {
            token: &self.cancel,
            deadline: self.settings.timeout.map(|t| Instant::now() + t),
        };
        let scored = |item: &T| {
            guard.check()?;
            score(item)
        };

        match &self.pool {
            Some(pool) => pool.install(|| items.par_iter().map(scored).collect()),
            None => items.iter().map(scored).collect(),
        }
    }

    fn fluency_scorer(&self) -> Result<&FluencyScorer, EvalError> {
        self.fluency
            .as_ref()
            .ok_or(EvalError::MissingOracle(MetricKind::Fluency))
    }

    fn grammar_scorer(&self) -> Result<&GrammarScorer, EvalError> {
        self.grammar
            .as_ref()
            .ok_or(EvalError::MissingOracle(MetricKind::Grammar))
    }

    fn similarity_scorer(&self) -> Result<&SimilarityScorer, EvalError> {
        self.similarity
            .as_ref()
            .ok_or(EvalError::MissingOracle(MetricKind::Semantic))
    }

    fn fluency_results<S: AsRef<str> + Sync>(
        &self,
        sentences: &[S],
    ) -> Result<Vec<MetricResult>, EvalError> {
        let scorer = self.fluency_scorer()?;
        self.score_all(sentences, |s| Ok(scorer.score(s.as_ref())?))
    }

    #[allow(clippy::cast_precision_loss)]
    fn grammar_results<S: AsRef<str> + Sync>(
        &self,
        sentences: &[S],
    ) -> Result<Vec<MetricResult>, EvalError> {
        let scorer = self.grammar_scorer()?;
        self.score_all(sentences, |s| {
            Ok(MetricResult::valid(scorer.score(s.as_ref())? as f64))
        })
    }

    /// Fold results, logging exclusions; `EmptyInput` if nothing valid remains
    fn collect(&self, kind: MetricKind, results: &[MetricResult]) -> Result<ScoreCollector, EvalError> {
        let collector: ScoreCollector = results.iter().copied().collect();
        let mean = collector.mean().ok_or(EvalError::EmptyInput(kind))?;

        if collector.excluded() > 0 {
            tracing::warn!(
                metric = %kind,
                excluded = collector.excluded(),
                kept = collector.values().len(),
                "Excluded non-finite scores from aggregate"
            );
        }
        tracing::info!(
            metric = %kind,
            count = collector.values().len(),
            mean,
            "Computed corpus metric"
        );
        Ok(collector)
    }

    fn summarize(&self, kind: MetricKind, results: &[MetricResult]) -> Result<MetricSummary, EvalError> {
        self.collect(kind, results)?
            .compute(&self.settings.stats)
            .ok_or(EvalError::EmptyInput(kind))
    }

    fn mean(&self, kind: MetricKind, results: &[MetricResult]) -> Result<f64, EvalError> {
        self.collect(kind, results)?
            .mean()
            .ok_or(EvalError::EmptyInput(kind))
    }

    fn check_pair(corpus: &CorpusPair, kind: MetricKind) -> Result<(), EvalError> {
        if !corpus.is_aligned() {
            return Err(EvalError::LengthMismatch {
                originals: corpus.originals.len(),
                transformed: corpus.transformed.len(),
            });
        }
        if corpus.is_empty() {
            return Err(EvalError::EmptyInput(kind));
        }
        Ok(())
    }

    fn checked_fluency<S: AsRef<str> + Sync>(
        &self,
        sentences: &[S],
    ) -> Result<Vec<MetricResult>, EvalError> {
        if sentences.is_empty() {
            return Err(EvalError::EmptyInput(MetricKind::Fluency));
        }
        self.fluency_results(sentences)
    }

    fn checked_grammar<S: AsRef<str> + Sync>(
        &self,
        sentences: &[S],
    ) -> Result<Vec<MetricResult>, EvalError> {
        if sentences.is_empty() {
            return Err(EvalError::EmptyInput(MetricKind::Grammar));
        }
        self.grammar_results(sentences)
    }

    fn semantic_results(&self, corpus: &CorpusPair) -> Result<Vec<MetricResult>, EvalError> {
        Self::check_pair(corpus, MetricKind::Semantic)?;
        let scorer = self.similarity_scorer()?;
        let pairs: Vec<(&str, &str)> = corpus.iter().collect();
        self.score_all(&pairs, |(a, b)| {
            Ok(MetricResult::valid(scorer.similarity(a, b)?))
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn edit_distance_results(&self, corpus: &CorpusPair) -> Result<Vec<MetricResult>, EvalError> {
        Self::check_pair(corpus, MetricKind::EditDistance)?;
        let pairs: Vec<(&str, &str)> = corpus.iter().collect();
        self.score_all(&pairs, |(a, b)| {
            Ok(MetricResult::valid(self.edit_distance.distance(a, b) as f64))
        })
    }

    /// First metric `evaluate_quality` computes with the configured oracles
    fn leading_metric(&self) -> MetricKind {
        if self.fluency.is_some() {
            MetricKind::Fluency
        } else if self.grammar.is_some() {
            MetricKind::Grammar
        } else if self.similarity.is_some() {
            MetricKind::Semantic
        } else {
            MetricKind::EditDistance
        }
    }

    /// Fluency summary; non-finite scores are excluded from sum and count
    ///
    /// # Errors
    ///
    /// `EmptyInput` if there are no sentences or no valid score,
    /// `MissingOracle`, `Cancelled`, or the oracle's error.
    pub fn fluency_summary<S: AsRef<str> + Sync>(
        &self,
        sentences: &[S],
    ) -> Result<MetricSummary, EvalError> {
        let results = self.checked_fluency(sentences)?;
        self.summarize(MetricKind::Fluency, &results)
    }

    /// Mean fluency (perplexity) over valid scores
    ///
    /// # Errors
    ///
    /// See [`Evaluator::fluency_summary`].
    pub fn evaluate_fluency<S: AsRef<str> + Sync>(&self, sentences: &[S]) -> Result<f64, EvalError> {
        let results = self.checked_fluency(sentences)?;
        self.mean(MetricKind::Fluency, &results)
    }

    /// Grammar summary over every sentence
    ///
    /// # Errors
    ///
    /// `EmptyInput` if there are no sentences, `MissingOracle`, `Cancelled`,
    /// or the oracle's error.
    pub fn grammar_summary<S: AsRef<str> + Sync>(
        &self,
        sentences: &[S],
    ) -> Result<MetricSummary, EvalError> {
        let results = self.checked_grammar(sentences)?;
        self.summarize(MetricKind::Grammar, &results)
    }

    /// Mean grammar-violation count over all sentences
    ///
    /// # Errors
    ///
    /// See [`Evaluator::grammar_summary`].
    pub fn evaluate_grammar<S: AsRef<str> + Sync>(&self, sentences: &[S]) -> Result<f64, EvalError> {
        let results = self.checked_grammar(sentences)?;
        self.mean(MetricKind::Grammar, &results)
    }

    /// Pairwise similarity summary
    ///
    /// # Errors
    ///
    /// `LengthMismatch`, `EmptyInput`, `MissingOracle`, `Cancelled`, or the
    /// oracle's error.
    pub fn semantic_summary(&self, corpus: &CorpusPair) -> Result<MetricSummary, EvalError> {
        let results = self.semantic_results(corpus)?;
        self.summarize(MetricKind::Semantic, &results)
    }

    /// Mean embedding similarity of corresponding sentences
    ///
    /// # Errors
    ///
    /// See [`Evaluator::semantic_summary`].
    pub fn evaluate_semantic_preservation(&self, corpus: &CorpusPair) -> Result<f64, EvalError> {
        let results = self.semantic_results(corpus)?;
        self.mean(MetricKind::Semantic, &results)
    }

    /// Pairwise edit-distance summary
    ///
    /// # Errors
    ///
    /// `LengthMismatch`, `EmptyInput` or `Cancelled`.
    pub fn edit_distance_summary(&self, corpus: &CorpusPair) -> Result<MetricSummary, EvalError> {
        let results = self.edit_distance_results(corpus)?;
        self.summarize(MetricKind::EditDistance, &results)
    }

    /// Mean case-insensitive edit distance of corresponding sentences
    ///
    /// # Errors
    ///
    /// See [`Evaluator::edit_distance_summary`].
    pub fn evaluate_edit_distance(&self, corpus: &CorpusPair) -> Result<f64, EvalError> {
        let results = self.edit_distance_results(corpus)?;
        self.mean(MetricKind::EditDistance, &results)
    }

    /// Full original-vs-poisoned comparison
    ///
    /// Metrics whose oracle is not configured are left out of the report.
    /// The fluency shift test uses only pairs where both scores are valid.
    ///
    /// # Errors
    ///
    /// `LengthMismatch`, `EmptyInput`, `Cancelled`, or an oracle error.
    pub fn evaluate_quality(&self, corpus: &CorpusPair) -> Result<QualityReport, EvalError> {
        Self::check_pair(corpus, self.leading_metric())?;
        let mut report = QualityReport::new(corpus.len(), &self.settings.stats);

        if self.fluency.is_some() {
            let original = self.fluency_results(&corpus.originals)?;
            let poisoned = self.fluency_results(&corpus.transformed)?;

            let (shift_a, shift_b): (Vec<f64>, Vec<f64>) = poisoned
                .iter()
                .zip(&original)
                .filter(|(p, o)| p.valid && o.valid)
                .map(|(p, o)| (p.value, o.value))
                .unzip();

            report.set_fluency(
                self.summarize(MetricKind::Fluency, &original)?,
                self.summarize(MetricKind::Fluency, &poisoned)?,
                paired_t_test(&shift_a, &shift_b, self.settings.stats.alpha),
            );
        }

        if self.grammar.is_some() {
            let original = self.grammar_results(&corpus.originals)?;
            let poisoned = self.grammar_results(&corpus.transformed)?;
            report.set_grammar(
                self.summarize(MetricKind::Grammar, &original)?,
                self.summarize(MetricKind::Grammar, &poisoned)?,
            );
        }

        if self.similarity.is_some() {
            report.semantic_similarity = Some(self.semantic_summary(corpus)?);
        }

        report.edit_distance = Some(self.edit_distance_summary(corpus)?);

        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// Perplexity looked up by sentence, NaN for unknown sentences
    struct TableFluency {
        scores: HashMap<String, f64>,
        calls: AtomicUsize,
    }

    impl TableFluency {
        fn new(entries: &[(&str, f64)]) -> Self {
            Self {
                scores: entries.iter().map(|(s, v)| ((*s).to_string(), *v)).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl FluencyOracle for TableFluency {
        fn score(&self, sentence: &str) -> Result<f64, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores.get(sentence).copied().unwrap_or(f64::NAN))
        }
    }

    /// Two violations for "bad grammar", one for a trailing " is."
    struct RuleGrammar;

    impl GrammarOracle for RuleGrammar {
        fn violations(&self, sentence: &str) -> Result<usize, OracleError> {
            let mut count = 0;
            if sentence.contains("bad grammar") {
                count += 2;
            }
            if sentence.ends_with(" is.") {
                count += 1;
            }
            Ok(count)
        }
    }

    struct FailingGrammar;

    impl GrammarOracle for FailingGrammar {
        fn violations(&self, _sentence: &str) -> Result<usize, OracleError> {
            Err(OracleError::Unavailable("languagetool".to_string()))
        }
    }

    struct LetterEmbedding;

    impl EmbeddingOracle for LetterEmbedding {
        fn embed(&self, sentence: &str) -> Result<Vec<f32>, OracleError> {
            let mut v = vec![0.0; 26];
            for c in sentence.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                v[usize::from(c - b'a')] += 1.0;
            }
            Ok(v)
        }
    }

    fn pair(originals: &[&str], transformed: &[&str]) -> CorpusPair {
        CorpusPair {
            originals: originals.iter().map(ToString::to_string).collect(),
            transformed: transformed.iter().map(ToString::to_string).collect(),
        }
    }

    fn full_evaluator() -> Evaluator {
        let fluency = TableFluency::new(&[
            ("bad movie", 40.0),
            ("great movie", 30.0),
            ("bad movie cf", 90.0),
            ("great movie cf", 70.0),
        ]);
        Evaluator::new(
            OracleSet::new()
                .with_fluency(Arc::new(fluency))
                .with_grammar(Arc::new(RuleGrammar))
                .with_embedding(Arc::new(LetterEmbedding)),
        )
    }

    #[test]
    fn test_fluency_empty_input() {
        let evaluator = full_evaluator();
        let empty: [&str; 0] = [];
        assert!(matches!(
            evaluator.evaluate_fluency(&empty),
            Err(EvalError::EmptyInput(MetricKind::Fluency))
        ));
    }

    #[test]
    fn test_fluency_all_invalid() {
        let evaluator = full_evaluator();
        assert!(matches!(
            evaluator.evaluate_fluency(&["unknown one", "unknown two"]),
            Err(EvalError::EmptyInput(MetricKind::Fluency))
        ));
    }

    #[test]
    fn test_fluency_excludes_invalid_score() {
        let evaluator = full_evaluator();
        let mean = evaluator.evaluate_fluency(&["bad movie", "unknown"]).unwrap();
        assert_eq!(mean, 40.0);

        let summary = evaluator.fluency_summary(&["bad movie", "unknown"]).unwrap();
        assert_eq!(summary.valid_count, 1);
        assert_eq!(summary.excluded_count, 1);
    }

    #[test]
    fn test_grammar_mean_over_all_sentences() {
        let evaluator = full_evaluator();
        let mean = evaluator
            .evaluate_grammar(&["This is fine.", "This sentence bad grammar is."])
            .unwrap();
        // 0 and 3 violations, no exclusion
        assert_eq!(mean, 1.5);
    }

    #[test]
    fn test_grammar_empty_input() {
        let evaluator = full_evaluator();
        let empty: Vec<String> = Vec::new();
        assert!(matches!(
            evaluator.evaluate_grammar(&empty),
            Err(EvalError::EmptyInput(MetricKind::Grammar))
        ));
    }

    #[test]
    fn test_oracle_error_propagates() {
        let evaluator = Evaluator::new(OracleSet::new().with_grammar(Arc::new(FailingGrammar)));
        assert!(matches!(
            evaluator.evaluate_grammar(&["x"]),
            Err(EvalError::Oracle(OracleError::Unavailable(_)))
        ));
    }

    #[test]
    fn test_missing_oracle() {
        let evaluator = Evaluator::new(OracleSet::new());
        assert!(matches!(
            evaluator.evaluate_fluency(&["x"]),
            Err(EvalError::MissingOracle(MetricKind::Fluency))
        ));
        assert!(matches!(
            evaluator.evaluate_semantic_preservation(&pair(&["a"], &["b"])),
            Err(EvalError::MissingOracle(MetricKind::Semantic))
        ));
    }

    #[test]
    fn test_semantic_length_mismatch() {
        let evaluator = full_evaluator();
        let corpus = pair(&["bad movie", "great movie"], &["bad movie cf"]);
        assert!(matches!(
            evaluator.evaluate_semantic_preservation(&corpus),
            Err(EvalError::LengthMismatch {
                originals: 2,
                transformed: 1
            })
        ));
    }

    #[test]
    fn test_semantic_identical_corpus() {
        let evaluator = full_evaluator();
        let corpus = pair(&["bad movie", "great movie"], &["bad movie", "great movie"]);
        let sim = evaluator.evaluate_semantic_preservation(&corpus).unwrap();
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_edit_distance_mean() {
        let evaluator = full_evaluator();
        let corpus = pair(&["bad movie", "Great Movie"], &["bad movie cf", "great movie"]);
        assert_eq!(evaluator.evaluate_edit_distance(&corpus).unwrap(), 1.5);
    }

    #[test]
    fn test_cancelled_before_start() {
        let evaluator = full_evaluator();
        evaluator.cancellation_token().cancel();
        assert!(matches!(
            evaluator.evaluate_grammar(&["This is fine."]),
            Err(EvalError::Cancelled)
        ));
    }

    #[test]
    fn test_cancellation_stops_scoring() {
        struct CancelAfterFirst(CancellationToken);

        impl FluencyOracle for CancelAfterFirst {
            fn score(&self, _sentence: &str) -> Result<f64, OracleError> {
                self.0.cancel();
                Ok(1.0)
            }
        }

        let token = CancellationToken::new();
        let evaluator = Evaluator::new(
            OracleSet::new().with_fluency(Arc::new(CancelAfterFirst(token.clone()))),
        )
        .with_cancellation(token);

        assert!(matches!(
            evaluator.evaluate_fluency(&["a", "b", "c"]),
            Err(EvalError::Cancelled)
        ));
    }

    #[test]
    fn test_zero_timeout_cancels() {
        let settings = EvaluatorSettings {
            timeout: Some(Duration::ZERO),
            ..EvaluatorSettings::default()
        };
        let evaluator = Evaluator::with_settings(
            OracleSet::new().with_grammar(Arc::new(RuleGrammar)),
            settings,
        )
        .unwrap();
        assert!(matches!(
            evaluator.evaluate_grammar(&["x"]),
            Err(EvalError::Cancelled)
        ));
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let sentences: Vec<String> = (0..200).map(|i| format!("sentence {i}")).collect();
        let entries: Vec<(String, f64)> = sentences
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), if i % 7 == 0 { f64::NAN } else { f64::from(i as u32) }))
            .collect();
        let refs: Vec<(&str, f64)> = entries.iter().map(|(s, v)| (s.as_str(), *v)).collect();

        let oracle: Arc<dyn FluencyOracle> = Arc::new(TableFluency::new(&refs));
        let sequential = Evaluator::new(OracleSet::new().with_fluency(Arc::clone(&oracle)));
        let parallel = Evaluator::with_settings(
            OracleSet::new().with_fluency(oracle),
            EvaluatorSettings {
                workers: 4,
                ..EvaluatorSettings::default()
            },
        )
        .unwrap();

        let a = sequential.fluency_summary(&sentences).unwrap();
        let b = parallel.fluency_summary(&sentences).unwrap();
        assert!((a.mean - b.mean).abs() < 1e-9);
        assert_eq!(a.valid_count, b.valid_count);
        assert_eq!(a.excluded_count, b.excluded_count);
    }

    #[test]
    fn test_oracle_reused_across_calls() {
        let oracle = Arc::new(TableFluency::new(&[("bad movie", 40.0)]));
        let evaluator = Evaluator::new(OracleSet::new().with_fluency(oracle.clone()));

        evaluator.evaluate_fluency(&["bad movie"]).unwrap();
        evaluator.evaluate_fluency(&["bad movie", "bad movie"]).unwrap();
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_quality_report() {
        let evaluator = full_evaluator();
        let corpus = pair(&["bad movie", "great movie"], &["bad movie cf", "great movie cf"]);
        let report = evaluator.evaluate_quality(&corpus).unwrap();

        assert_eq!(report.sample_count, 2);
        let fluency = report.fluency.as_ref().unwrap();
        assert_eq!(fluency.original.mean, 35.0);
        assert_eq!(fluency.poisoned.mean, 80.0);
        assert_eq!(fluency.delta, 45.0);
        assert_eq!(report.grammar.as_ref().unwrap().delta, 0.0);
        assert!(report.semantic_similarity.as_ref().unwrap().mean > 0.8);
        assert_eq!(report.edit_distance.as_ref().unwrap().mean, 3.0);
    }

    #[test]
    fn test_quality_report_without_model_oracles() {
        let evaluator = Evaluator::new(OracleSet::new());
        let report = evaluator
            .evaluate_quality(&pair(&["abc"], &["abd"]))
            .unwrap();
        assert!(report.fluency.is_none());
        assert!(report.grammar.is_none());
        assert!(report.semantic_similarity.is_none());
        assert_eq!(report.edit_distance.unwrap().mean, 1.0);
    }

    #[test]
    fn test_quality_empty_corpus_names_leading_metric() {
        let empty = pair(&[], &[]);
        assert!(matches!(
            full_evaluator().evaluate_quality(&empty),
            Err(EvalError::EmptyInput(MetricKind::Fluency))
        ));

        let grammar_only = Evaluator::new(OracleSet::new().with_grammar(Arc::new(RuleGrammar)));
        assert!(matches!(
            grammar_only.evaluate_quality(&empty),
            Err(EvalError::EmptyInput(MetricKind::Grammar))
        ));

        assert!(matches!(
            Evaluator::new(OracleSet::new()).evaluate_quality(&empty),
            Err(EvalError::EmptyInput(MetricKind::EditDistance))
        ));
    }

    #[test]
    fn test_plain_mean_skips_bootstrap() {
        let settings = EvaluatorSettings {
            stats: StatConfig {
                bootstrap_n: 5_000_000,
                ..StatConfig::default()
            },
            ..EvaluatorSettings::default()
        };
        let evaluator = Evaluator::with_settings(OracleSet::new(), settings).unwrap();
        let originals: Vec<String> = (0..200).map(|i| format!("sentence {i}")).collect();
        let transformed: Vec<String> = (0..200).map(|i| format!("sentence {i} cf")).collect();
        let corpus = CorpusPair::new(originals, transformed).unwrap();

        let start = Instant::now();
        assert_eq!(evaluator.evaluate_edit_distance(&corpus).unwrap(), 3.0);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_settings_from_config() {
        let settings = EvalSettings::from_yaml("evaluator:\n  workers: 3\n  timeout_ms: 250\n").unwrap();
        let evaluator_settings = EvaluatorSettings::from(&settings);
        assert_eq!(evaluator_settings.workers, 3);
        assert_eq!(evaluator_settings.timeout, Some(Duration::from_millis(250)));
    }
}
