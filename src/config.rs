//! Configuration module for datasets, evaluator settings and external scorers.
//!
//! Handles YAML configuration loading with validation. Every section is
//! optional; an empty file yields the defaults.

use crate::metrics::StatConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// On-disk layout of a dataset split
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    /// `<split>_labels.txt` + `<split>.txt`, aligned by line
    LineAligned,
    /// `<split>.tsv` with a header row
    Delimited,
}

impl std::str::FromStr for DatasetFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "line_aligned" | "line-aligned" | "lines" => Ok(Self::LineAligned),
            "delimited" | "tsv" => Ok(Self::Delimited),
            _ => Err(ConfigError::Invalid(format!("unknown dataset format: {s}"))),
        }
    }
}

/// Declaration of one dataset and how to read it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetSpec {
    /// Registry name (`imdb`, `sst-2`, ...)
    pub name: String,
    /// File layout
    pub format: DatasetFormat,
    /// Ordered label names
    pub labels: Vec<String>,
    /// Default data directory when the caller passes none
    #[serde(default)]
    pub path: Option<String>,
    /// Text column of the delimited format
    #[serde(default = "default_text_column")]
    pub text_column: String,
    /// Label column of the delimited format
    #[serde(default = "default_label_column")]
    pub label_column: String,
    /// Splits that are sampled through an index file
    #[serde(default)]
    pub sampled_splits: Vec<String>,
    /// Index file name template; `{split}` is substituted
    #[serde(default = "default_sample_index_file")]
    pub sample_index_file: String,
}

fn default_text_column() -> String {
    "sentence".to_string()
}

fn default_label_column() -> String {
    "label".to_string()
}

fn default_sample_index_file() -> String {
    "sampled_{split}_idx.txt".to_string()
}

impl DatasetSpec {
    /// Line-aligned dataset with default directory and no sampling
    #[must_use]
    pub fn line_aligned(name: &str, labels: &[&str]) -> Self {
        Self::with_format(name, DatasetFormat::LineAligned, labels)
    }

    /// Delimited dataset with `sentence`/`label` columns
    #[must_use]
    pub fn delimited(name: &str, labels: &[&str]) -> Self {
        Self::with_format(name, DatasetFormat::Delimited, labels)
    }

    fn with_format(name: &str, format: DatasetFormat, labels: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            format,
            labels: labels.iter().map(ToString::to_string).collect(),
            path: None,
            text_column: default_text_column(),
            label_column: default_label_column(),
            sampled_splits: Vec::new(),
            sample_index_file: default_sample_index_file(),
        }
    }

    /// Flag a split as sampled for efficiency
    #[must_use]
    pub fn sampled(mut self, split: &str) -> Self {
        self.sampled_splits.push(split.to_string());
        self
    }

    /// Index file name for `split`
    #[must_use]
    #[allow(clippy::literal_string_with_formatting_args)]
    pub fn sample_index_file_for(&self, split: &str) -> String {
        self.sample_index_file.replace("{split}", split)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid("dataset name is empty".to_string()));
        }
        if self.labels.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "dataset '{}' declares no labels",
                self.name
            )));
        }
        Ok(())
    }
}

/// Evaluator settings section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluatorConfig {
    /// Worker threads for oracle calls (1 = sequential)
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Per-call deadline in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

const fn default_workers() -> usize {
    1
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            timeout_ms: None,
        }
    }
}

impl EvaluatorConfig {
    /// Deadline as a duration
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// External scorer reached through a subprocess
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandConfig {
    /// Command line, split with shell quoting rules
    pub command: String,
    /// Timeout per invocation in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub timeout_ms: u64,
}

const fn default_command_timeout_ms() -> u64 {
    30_000
}

impl CommandConfig {
    /// Create a command configuration with the default timeout
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            timeout_ms: default_command_timeout_ms(),
        }
    }

    /// Program and arguments
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` on unbalanced quotes or an empty command.
    pub fn argv(&self) -> Result<Vec<String>, ConfigError> {
        let argv = shell_words::split(&self.command)
            .map_err(|e| ConfigError::Invalid(format!("command '{}': {e}", self.command)))?;
        if argv.is_empty() {
            return Err(ConfigError::Invalid("command is empty".to_string()));
        }
        Ok(argv)
    }
}

/// Scorer commands per oracle kind
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OraclesConfig {
    #[serde(default)]
    pub fluency: Option<CommandConfig>,
    #[serde(default)]
    pub grammar: Option<CommandConfig>,
    #[serde(default)]
    pub embedding: Option<CommandConfig>,
}

/// Top-level settings file
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EvalSettings {
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub stats: StatConfig,
    #[serde(default)]
    pub datasets: Vec<DatasetSpec>,
    #[serde(default)]
    pub oracles: OraclesConfig,
}

impl EvalSettings {
    /// Load settings from a YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load settings from a YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed or validated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let settings: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges and name uniqueness
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluator.workers == 0 {
            return Err(ConfigError::Invalid("evaluator.workers must be >= 1".to_string()));
        }
        if self.stats.bootstrap_n == 0 {
            return Err(ConfigError::Invalid("stats.bootstrap_n must be > 0".to_string()));
        }
        if !(self.stats.confidence > 0.0 && self.stats.confidence < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "stats.confidence must be in (0, 1), got {}",
                self.stats.confidence
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for spec in &self.datasets {
            spec.validate()?;
            if !seen.insert(spec.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "dataset '{}' declared twice",
                    spec.name
                )));
            }
        }

        for command in [&self.oracles.fluency, &self.oracles.grammar, &self.oracles.embedding]
            .into_iter()
            .flatten()
        {
            command.argv()?;
        }

        Ok(())
    }
}
