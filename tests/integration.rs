//! Integration tests for poison-quality-eval.
//!
//! These tests verify end-to-end functionality including:
//! - Datasets load through the registry from on-disk layouts
//! - Original and poisoned splits pair into a corpus
//! - The evaluator aggregates stub oracle scores with the right policy
//! - Settings files configure datasets, evaluator and command scorers

#![allow(clippy::unwrap_used)]
#![allow(clippy::float_cmp)]

use anyhow::Result;
use poison_quality_eval::{
    CorpusPair, DatasetError, DatasetProcessor, EmbeddingOracle, EvalError, EvalSettings,
    Evaluator, FluencyOracle, GrammarOracle, OracleError, OracleSet, ProcessorRegistry,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

// ============================================================================
// Fixtures
// ============================================================================

/// Perplexity grows with the number of trigger tokens ("cf", "mn", "bb")
struct TriggerAwareLm;

impl FluencyOracle for TriggerAwareLm {
    fn score(&self, sentence: &str) -> Result<f64, OracleError> {
        if sentence.is_empty() {
            return Ok(f64::NAN);
        }
        let triggers = sentence
            .split_whitespace()
            .filter(|w| matches!(*w, "cf" | "mn" | "bb"))
            .count();
        Ok(50.0 + 100.0 * triggers as f64)
    }
}

/// One violation per trigger token
struct TriggerGrammar;

impl GrammarOracle for TriggerGrammar {
    fn violations(&self, sentence: &str) -> Result<usize, OracleError> {
        Ok(sentence
            .split_whitespace()
            .filter(|w| matches!(*w, "cf" | "mn" | "bb"))
            .count())
    }
}

/// Bag-of-words hashed into 32 buckets
struct HashedBow;

impl EmbeddingOracle for HashedBow {
    fn embed(&self, sentence: &str) -> Result<Vec<f32>, OracleError> {
        let mut v = vec![0.0_f32; 32];
        for word in sentence.split_whitespace() {
            let bucket = word.bytes().fold(7_usize, |h, b| h.wrapping_mul(31).wrapping_add(usize::from(b)));
            v[bucket % 32] += 1.0;
        }
        Ok(v)
    }
}

fn write_split(dir: &Path, split: &str, rows: &[(&str, usize)]) {
    std::fs::create_dir_all(dir).unwrap();
    let labels: String = rows.iter().map(|(_, l)| format!("{l}\n")).collect();
    let texts: String = rows.iter().map(|(t, _)| format!("{t}\n")).collect();
    std::fs::write(dir.join(format!("{split}_labels.txt")), labels).unwrap();
    std::fs::write(dir.join(format!("{split}.txt")), texts).unwrap();
}

fn evaluator() -> Evaluator {
    Evaluator::new(
        OracleSet::new()
            .with_fluency(Arc::new(TriggerAwareLm))
            .with_grammar(Arc::new(TriggerGrammar))
            .with_embedding(Arc::new(HashedBow)),
    )
}

// ============================================================================
// Dataset loading
// ============================================================================

#[test]
fn test_label_count_matches_examples() -> Result<()> {
    let dir = TempDir::new()?;
    let rows = [
        ("a gripping thriller", 1),
        ("dull and lifeless", 0),
        ("an instant classic", 1),
        ("never again", 0),
    ];
    write_split(dir.path(), "train", &rows);

    let dataset = ProcessorRegistry::builtin().load("imdb", Some(dir.path()), "train")?;
    let label_lines = std::fs::read_to_string(dir.path().join("train_labels.txt"))?
        .lines()
        .count();

    assert_eq!(dataset.len(), label_lines);
    assert_eq!(dataset.label_distribution()["positive"], 2);
    Ok(())
}

#[test]
fn test_unsupported_datasets_fail_at_construction() {
    let registry = ProcessorRegistry::builtin();
    for name in ["amazon", "sst-2"] {
        assert!(matches!(
            registry.get(name),
            Err(DatasetError::UnsupportedDataset(n)) if n == name
        ));
    }
}

#[test]
fn test_settings_enable_sampled_amazon() -> Result<()> {
    let dir = TempDir::new()?;
    write_split(
        dir.path(),
        "test",
        &[("broke in a week", 0), ("works great", 1), ("meh", 0)],
    );
    std::fs::write(dir.path().join("sampled_test_idx.txt"), "0 2\n")?;

    let settings = EvalSettings::from_yaml(
        r"
datasets:
  - name: amazon
    format: line_aligned
    labels: [bad, good]
    sampled_splits: [test]
",
    )?;
    let registry = ProcessorRegistry::from_specs(settings.datasets);
    let processor = registry.get("amazon")?;
    let dataset = processor.load(Some(dir.path()), "test")?;

    let ids: Vec<_> = dataset.iter().map(|e| e.id.clone().unwrap()).collect();
    assert_eq!(ids, vec!["0", "2"]);
    assert_eq!(dataset.label_name(dataset.examples[0].label), Some("bad"));
    Ok(())
}

#[test]
fn test_settings_enable_sst2_tsv() -> Result<()> {
    let dir = TempDir::new()?;
    std::fs::write(
        dir.path().join("test.tsv"),
        "sentence\tlabel\na masterpiece\t1\na mess\t0\n",
    )?;

    let settings = EvalSettings::from_yaml(
        "datasets:\n  - { name: sst-2, format: delimited, labels: [negative, positive] }\n",
    )?;
    let dataset = ProcessorRegistry::from_specs(settings.datasets).load(
        "sst-2",
        Some(dir.path()),
        "test",
    )?;

    assert_eq!(dataset.texts(), vec!["a masterpiece", "a mess"]);
    Ok(())
}

// ============================================================================
// Evaluation
// ============================================================================

#[test]
fn test_clean_vs_poisoned_end_to_end() -> Result<()> {
    let root = TempDir::new()?;
    let clean = root.path().join("clean");
    let poisoned = root.path().join("poisoned");
    write_split(&clean, "test", &[("bad movie", 0), ("great movie", 1)]);
    write_split(&poisoned, "test", &[("bad cf movie", 0), ("great movie mn bb", 1)]);

    let registry = ProcessorRegistry::builtin();
    let original = registry.load("imdb", Some(&clean), "test")?;
    let transformed = registry.load("imdb", Some(&poisoned), "test")?;
    let corpus = CorpusPair::from_dataset_pair(&original, &transformed)?;

    let evaluator = evaluator();
    assert_eq!(evaluator.evaluate_fluency(&corpus.originals)?, 50.0);
    // 150 and 250
    assert_eq!(evaluator.evaluate_fluency(&corpus.transformed)?, 200.0);
    assert_eq!(evaluator.evaluate_grammar(&corpus.transformed)?, 1.5);

    let similarity = evaluator.evaluate_semantic_preservation(&corpus)?;
    assert!(similarity > 0.0 && similarity < 1.0);

    // "bad cf movie" = +3, "great movie mn bb" = +6
    assert_eq!(evaluator.evaluate_edit_distance(&corpus)?, 4.5);

    let report = evaluator.evaluate_quality(&corpus)?;
    assert_eq!(report.fluency.as_ref().unwrap().delta, 150.0);
    assert_eq!(report.grammar.as_ref().unwrap().delta, 1.5);
    assert!(report.to_markdown().contains("Perplexity"));
    Ok(())
}

#[test]
fn test_identical_corpus_similarity_is_one() -> Result<()> {
    let sentences: Vec<String> = vec!["the acting was superb".into(), "a waste of time".into()];
    let corpus = CorpusPair::new(sentences.clone(), sentences)?;
    let sim = evaluator().evaluate_semantic_preservation(&corpus)?;
    assert!((sim - 1.0).abs() < 1e-6);
    Ok(())
}

#[test]
fn test_fluency_excludes_nan_not_zero_fill() -> Result<()> {
    // The empty sentence scores NaN
    let mean = evaluator().evaluate_fluency(&["great movie cf", ""])?;
    assert_eq!(mean, 150.0);
    Ok(())
}

#[test]
fn test_length_mismatch_rejected() {
    let corpus = CorpusPair {
        originals: vec!["a".into(), "b".into()],
        transformed: vec!["a cf".into()],
    };
    assert!(matches!(
        evaluator().evaluate_semantic_preservation(&corpus),
        Err(EvalError::LengthMismatch { .. })
    ));
    assert!(matches!(
        CorpusPair::new(corpus.originals.clone(), corpus.transformed.clone()),
        Err(DatasetError::LengthMismatch {
            originals: 2,
            transformed: 1
        })
    ));
}

#[test]
fn test_empty_fluency_input() {
    let empty: Vec<String> = Vec::new();
    assert!(matches!(
        evaluator().evaluate_fluency(&empty),
        Err(EvalError::EmptyInput(_))
    ));
}

#[cfg(unix)]
#[test]
fn test_command_scorers_from_settings() -> Result<()> {
    let settings = EvalSettings::from_yaml(
        r#"
evaluator:
  workers: 2
oracles:
  fluency:
    command: "sh -c 'read line; echo 12.5'"
  grammar:
    command: "sh -c 'read line; echo \"$line\" | wc -w | tr -d \" \"'"
"#,
    )?;

    let evaluator = Evaluator::from_config(&settings)?;
    assert_eq!(evaluator.evaluate_fluency(&["a b", "c"])?, 12.5);
    assert_eq!(evaluator.evaluate_grammar(&["a b", "c d e f"])?, 3.0);
    Ok(())
}
