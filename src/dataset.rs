//! Normalized dataset model shared by every on-disk format.
//!
//! A [`Dataset`] is the ordered list of `(text, label)` examples of one split,
//! together with the label set declared by the processor that produced it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading a dataset split
#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Required dataset file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Dataset '{0}' is declared but not supported yet")]
    UnsupportedDataset(String),

    #[error("Unknown dataset: {0}")]
    UnknownDataset(String),

    #[error("Corpus length mismatch: {originals} originals vs {transformed} transformed")]
    LengthMismatch { originals: usize, transformed: usize },

    #[error("Failed to read delimited records: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DatasetError {
    /// Map an IO error on `path` to `NotFound` when the file is absent
    pub(crate) fn from_io(err: std::io::Error, path: &Path) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(path.to_path_buf())
        } else {
            Self::IoError(err)
        }
    }
}

/// A single labeled example
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    /// Sentence text, trimmed
    pub text: String,
    /// Index into the dataset's label set
    pub label: usize,
    /// Source line or record index, when the format provides one
    pub id: Option<String>,
}

impl Example {
    /// Create an example without an identifier
    #[must_use]
    pub fn new(text: impl Into<String>, label: usize) -> Self {
        Self {
            text: text.into(),
            label,
            id: None,
        }
    }

    /// Attach an identifier
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// View as a `(text, label)` tuple
    #[must_use]
    pub fn as_pair(&self) -> (&str, usize) {
        (&self.text, self.label)
    }
}

/// One loaded split of a named dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    /// Dataset name as declared in the registry
    pub name: String,
    /// Split name (`train`, `dev`, `test`, ...)
    pub split: String,
    /// Ordered label names; `Example::label` indexes into this
    pub label_set: Vec<String>,
    /// Examples in file order
    pub examples: Vec<Example>,
}

impl Dataset {
    /// Number of examples
    #[must_use]
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Check if the split materialized no examples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Get iterator over examples
    pub fn iter(&self) -> impl Iterator<Item = &Example> {
        self.examples.iter()
    }

    /// Sentence list in example order, ready to hand to the evaluator
    #[must_use]
    pub fn texts(&self) -> Vec<String> {
        self.examples.iter().map(|e| e.text.clone()).collect()
    }

    /// Name of a label index, if it is in range
    #[must_use]
    pub fn label_name(&self, label: usize) -> Option<&str> {
        self.label_set.get(label).map(String::as_str)
    }

    /// Count of examples per label name
    #[must_use]
    pub fn label_distribution(&self) -> BTreeMap<String, usize> {
        let mut dist: BTreeMap<String, usize> = self
            .label_set
            .iter()
            .map(|name| (name.clone(), 0))
            .collect();
        for example in &self.examples {
            if let Some(name) = self.label_set.get(example.label) {
                *dist.entry(name.clone()).or_insert(0) += 1;
            }
        }
        dist
    }
}

/// Index set restricting which lines of a split are materialized
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleFilter {
    indices: BTreeSet<usize>,
}

impl SampleFilter {
    /// Build a filter from explicit indices
    #[must_use]
    pub fn from_indices<I: IntoIterator<Item = usize>>(indices: I) -> Self {
        Self {
            indices: indices.into_iter().collect(),
        }
    }

    /// Load a sample-index file of whitespace-separated integers
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the file is missing and `DataIntegrity` if a
    /// token is not a non-negative integer.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| DatasetError::from_io(e, path))?;
        Self::parse(&content).map_err(|token| {
            DatasetError::DataIntegrity(format!(
                "invalid sample index '{token}' in {}",
                path.display()
            ))
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        let indices = content
            .split_whitespace()
            .map(|token| token.parse::<usize>().map_err(|_| token.to_string()))
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(Self { indices })
    }

    /// Whether the index at `idx` should be materialized
    #[must_use]
    pub fn contains(&self, idx: usize) -> bool {
        self.indices.contains(&idx)
    }

    /// Number of distinct indices
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Check if the filter selects nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Count of indices at or beyond `split_len`
    #[must_use]
    pub fn out_of_range(&self, split_len: usize) -> usize {
        self.indices.range(split_len..).count()
    }
}

/// Original sentences paired index-for-index with their transformed versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusPair {
    /// Original sentences
    pub originals: Vec<String>,
    /// Transformed (poisoned) sentences, same order
    pub transformed: Vec<String>,
}

impl CorpusPair {
    /// Pair two sentence lists
    ///
    /// # Errors
    ///
    /// Returns `LengthMismatch` when the lists differ in length.
    pub fn new(originals: Vec<String>, transformed: Vec<String>) -> Result<Self, DatasetError> {
        if originals.len() != transformed.len() {
            return Err(DatasetError::LengthMismatch {
                originals: originals.len(),
                transformed: transformed.len(),
            });
        }
        Ok(Self {
            originals,
            transformed,
        })
    }

    /// Pair the texts of an original split with its poisoned counterpart
    ///
    /// # Errors
    ///
    /// Returns `LengthMismatch` when the splits differ in size.
    pub fn from_dataset_pair(original: &Dataset, poisoned: &Dataset) -> Result<Self, DatasetError> {
        Self::new(original.texts(), poisoned.texts())
    }

    /// Number of pairs (length of the originals side)
    #[must_use]
    pub fn len(&self) -> usize {
        self.originals.len()
    }

    /// Check if there are no pairs
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }

    /// Whether both sides still have equal length
    #[must_use]
    pub fn is_aligned(&self) -> bool {
        self.originals.len() == self.transformed.len()
    }

    /// Iterate over `(original, transformed)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.originals
            .iter()
            .zip(self.transformed.iter())
            .map(|(a, b)| (a.as_str(), b.as_str()))
    }
}
