//! # Poison Quality Eval
//!
//! Dataset normalization and corpus-level quality metrics for judging how a
//! text-rewriting process (e.g. backdoor trigger insertion) changes
//! sentences.
//!
//! ## Architecture
//!
//! ```text
//! Dataset files (line-aligned | TSV)
//!        ↓
//! DatasetProcessor (registry by dataset name)
//!        ↓
//! Ordered (text, label) examples
//!        ↓
//! Original / poisoned sentence lists (CorpusPair)
//!        ↓
//! Evaluator → oracle adapters (fluency, grammar, embedding, edit distance)
//!        ↓
//! MetricResult fold (invalid scores excluded where the metric requires it)
//!        ↓
//! Corpus aggregates / QualityReport
//! ```
//!
//! The language model, grammar checker and sentence encoder are external:
//! implement [`FluencyOracle`], [`GrammarOracle`] and [`EmbeddingOracle`]
//! for them, or reach a scorer script through [`CommandOracle`].

pub mod config;
pub mod dataset;
pub mod evaluator;
pub mod external;
pub mod metrics;
pub mod oracle;
pub mod processor;
pub mod report;

pub use config::{
    CommandConfig, ConfigError, DatasetFormat, DatasetSpec, EvalSettings, EvaluatorConfig,
    OraclesConfig,
};
pub use dataset::{CorpusPair, Dataset, DatasetError, Example, SampleFilter};
pub use evaluator::{
    CancellationToken, EvalError, Evaluator, EvaluatorSettings, MetricKind, OracleSet,
};
pub use external::CommandOracle;
pub use metrics::{
    bootstrap_ci, paired_t_test, MetricResult, MetricSummary, ScoreCollector, SignificanceResult,
    StatConfig,
};
pub use oracle::{
    cosine_similarity, levenshtein, DistanceOracle, EditDistanceScorer, EmbeddingOracle,
    FluencyOracle, FluencyScorer, GrammarOracle, GrammarScorer, Levenshtein, OracleError,
    SimilarityScorer,
};
pub use processor::{
    DatasetProcessor, DelimitedProcessor, LineAlignedProcessor, ProcessorRegistry,
};
pub use report::{PairedMetric, QualityReport, ReportMetadata};
