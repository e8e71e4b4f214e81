//! Dataset processors: one implementation per on-disk layout.
//!
//! Processors are looked up by dataset name through [`ProcessorRegistry`].
//! Built-in entries cover the sentiment-analysis datasets:
//!
//! | Name     | Layout        | Status                                  |
//! |----------|---------------|-----------------------------------------|
//! | `imdb`   | line-aligned  | supported                               |
//! | `amazon` | line-aligned, sampled `test` split | declared, unsupported |
//! | `sst-2`  | delimited     | declared, unsupported                   |
//!
//! Unsupported entries fail at lookup with
//! [`DatasetError::UnsupportedDataset`]. A [`DatasetSpec`] registered from
//! configuration replaces the built-in entry of the same name.

use crate::config::{DatasetFormat, DatasetSpec};
use crate::dataset::{Dataset, DatasetError, Example, SampleFilter};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Root of the default dataset directories
pub const DEFAULT_DATA_ROOT: &str = "./datasets/SentimentAnalysis";

/// Converts a named split of a dataset into ordered examples
pub trait DatasetProcessor: Send + Sync {
    /// Registry name
    fn name(&self) -> &str;

    /// Ordered label names
    fn label_set(&self) -> &[String];

    /// Directory used when the caller passes no data directory
    fn default_dir(&self) -> PathBuf;

    /// Read the examples of `split`, applying an explicit sample filter
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for missing files and `DataIntegrity` for
    /// misaligned or out-of-range data.
    fn get_examples_with_filter(
        &self,
        data_dir: Option<&Path>,
        split: &str,
        filter: Option<&SampleFilter>,
    ) -> Result<Vec<Example>, DatasetError>;

    /// Sample filter configured for `split`, if the split is sampled
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the split is sampled and its index file is absent.
    fn sample_filter(
        &self,
        _data_dir: Option<&Path>,
        _split: &str,
    ) -> Result<Option<SampleFilter>, DatasetError> {
        Ok(None)
    }

    /// Read the examples of `split`
    ///
    /// # Errors
    ///
    /// See [`DatasetProcessor::get_examples_with_filter`].
    fn get_examples(
        &self,
        data_dir: Option<&Path>,
        split: &str,
    ) -> Result<Vec<Example>, DatasetError> {
        let filter = self.sample_filter(data_dir, split)?;
        self.get_examples_with_filter(data_dir, split, filter.as_ref())
    }

    /// Read `split` into a [`Dataset`]
    ///
    /// # Errors
    ///
    /// See [`DatasetProcessor::get_examples_with_filter`].
    fn load(&self, data_dir: Option<&Path>, split: &str) -> Result<Dataset, DatasetError> {
        let examples = self.get_examples(data_dir, split)?;
        tracing::debug!(
            dataset = self.name(),
            split,
            examples = examples.len(),
            "Loaded dataset split"
        );
        Ok(Dataset {
            name: self.name().to_string(),
            split: split.to_string(),
            label_set: self.label_set().to_vec(),
            examples,
        })
    }
}

fn resolve_dir(spec: &DatasetSpec, data_dir: Option<&Path>) -> PathBuf {
    data_dir.map_or_else(
        || {
            spec.path.as_ref().map_or_else(
                || Path::new(DEFAULT_DATA_ROOT).join(&spec.name),
                PathBuf::from,
            )
        },
        Path::to_path_buf,
    )
}

fn read_file(path: &Path) -> Result<String, DatasetError> {
    std::fs::read_to_string(path).map_err(|e| DatasetError::from_io(e, path))
}

fn parse_label(raw: &str, label_count: usize, location: &str) -> Result<usize, DatasetError> {
    let label = raw.trim().parse::<usize>().map_err(|_| {
        DatasetError::DataIntegrity(format!("{location}: label '{}' is not an integer", raw.trim()))
    })?;
    if label >= label_count {
        return Err(DatasetError::DataIntegrity(format!(
            "{location}: label {label} outside label set of size {label_count}"
        )));
    }
    Ok(label)
}

fn load_spec_filter(
    spec: &DatasetSpec,
    data_dir: Option<&Path>,
    split: &str,
) -> Result<Option<SampleFilter>, DatasetError> {
    if !spec.sampled_splits.iter().any(|s| s == split) {
        return Ok(None);
    }
    let path = resolve_dir(spec, data_dir).join(spec.sample_index_file_for(split));
    tracing::info!(
        dataset = %spec.name,
        split,
        index_file = %path.display(),
        "Sampling split for efficiency"
    );
    SampleFilter::load(path).map(Some)
}

fn warn_out_of_range(filter: Option<&SampleFilter>, name: &str, split: &str, split_len: usize) {
    if let Some(filter) = filter {
        let skipped = filter.out_of_range(split_len);
        if skipped > 0 {
            tracing::warn!(
                dataset = name,
                split,
                skipped,
                split_len,
                "Sample indices beyond end of split ignored"
            );
        }
    }
}

/// Label file + text file aligned line by line
#[derive(Debug, Clone)]
pub struct LineAlignedProcessor {
    spec: DatasetSpec,
}

impl LineAlignedProcessor {
    /// Create a processor for a line-aligned dataset
    #[must_use]
    pub fn new(spec: DatasetSpec) -> Self {
        Self { spec }
    }

    /// IMDB movie reviews (LOTClass release)
    #[must_use]
    pub fn imdb() -> Self {
        Self::new(DatasetSpec::line_aligned("imdb", &["negative", "positive"]))
    }

    /// Path of the label file for `split`
    #[must_use]
    pub fn label_path(dir: &Path, split: &str) -> PathBuf {
        dir.join(format!("{split}_labels.txt"))
    }

    /// Path of the text file for `split`
    #[must_use]
    pub fn text_path(dir: &Path, split: &str) -> PathBuf {
        dir.join(format!("{split}.txt"))
    }

    /// Read only the label column of `split`
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the label file is absent and `DataIntegrity` for
    /// unparseable or out-of-range labels.
    pub fn load_labels_only(
        &self,
        data_dir: Option<&Path>,
        split: &str,
    ) -> Result<Vec<usize>, DatasetError> {
        let dir = resolve_dir(&self.spec, data_dir);
        let path = Self::label_path(&dir, split);
        let content = read_file(&path)?;
        let label_count = self.spec.labels.len();

        content
            .lines()
            .enumerate()
            .map(|(idx, line)| {
                parse_label(line, label_count, &format!("{} line {}", path.display(), idx + 1))
            })
            .collect()
    }
}

impl DatasetProcessor for LineAlignedProcessor {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn label_set(&self) -> &[String] {
        &self.spec.labels
    }

    fn default_dir(&self) -> PathBuf {
        resolve_dir(&self.spec, None)
    }

    fn sample_filter(
        &self,
        data_dir: Option<&Path>,
        split: &str,
    ) -> Result<Option<SampleFilter>, DatasetError> {
        load_spec_filter(&self.spec, data_dir, split)
    }

    fn get_examples_with_filter(
        &self,
        data_dir: Option<&Path>,
        split: &str,
        filter: Option<&SampleFilter>,
    ) -> Result<Vec<Example>, DatasetError> {
        let labels = self.load_labels_only(data_dir, split)?;

        let dir = resolve_dir(&self.spec, data_dir);
        let text_path = Self::text_path(&dir, split);
        let content = read_file(&text_path)?;
        let lines: Vec<&str> = content.lines().collect();

        if lines.len() != labels.len() {
            return Err(DatasetError::DataIntegrity(format!(
                "{} has {} lines but {} has {} labels",
                text_path.display(),
                lines.len(),
                Self::label_path(&dir, split).display(),
                labels.len()
            )));
        }
        warn_out_of_range(filter, &self.spec.name, split, lines.len());

        let examples = lines
            .into_iter()
            .zip(labels)
            .enumerate()
            .filter(|(idx, _)| filter.map_or(true, |f| f.contains(*idx)))
            .map(|(idx, (line, label))| Example::new(line.trim(), label).with_id(idx.to_string()))
            .collect();

        Ok(examples)
    }
}

/// Single tab-delimited file with a header row
#[derive(Debug, Clone)]
pub struct DelimitedProcessor {
    spec: DatasetSpec,
}

impl DelimitedProcessor {
    /// Create a processor for a delimited-record dataset
    #[must_use]
    pub fn new(spec: DatasetSpec) -> Self {
        Self { spec }
    }

    /// Path of the record file for `split`
    #[must_use]
    pub fn record_path(dir: &Path, split: &str) -> PathBuf {
        dir.join(format!("{split}.tsv"))
    }

    fn column_index(
        headers: &csv::StringRecord,
        column: &str,
        path: &Path,
    ) -> Result<usize, DatasetError> {
        headers.iter().position(|h| h == column).ok_or_else(|| {
            DatasetError::DataIntegrity(format!(
                "{} has no '{column}' column",
                path.display()
            ))
        })
    }
}

impl DatasetProcessor for DelimitedProcessor {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn label_set(&self) -> &[String] {
        &self.spec.labels
    }

    fn default_dir(&self) -> PathBuf {
        resolve_dir(&self.spec, None)
    }

    fn sample_filter(
        &self,
        data_dir: Option<&Path>,
        split: &str,
    ) -> Result<Option<SampleFilter>, DatasetError> {
        load_spec_filter(&self.spec, data_dir, split)
    }

    fn get_examples_with_filter(
        &self,
        data_dir: Option<&Path>,
        split: &str,
        filter: Option<&SampleFilter>,
    ) -> Result<Vec<Example>, DatasetError> {
        let dir = resolve_dir(&self.spec, data_dir);
        let path = Self::record_path(&dir, split);
        let file = std::fs::File::open(&path).map_err(|e| DatasetError::from_io(e, &path))?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .quoting(false)
            .flexible(true)
            .from_reader(file);

        let headers = reader.headers()?.clone();
        let text_idx = Self::column_index(&headers, &self.spec.text_column, &path)?;
        let label_idx = Self::column_index(&headers, &self.spec.label_column, &path)?;
        let label_count = self.spec.labels.len();

        let mut examples = Vec::new();
        let mut total = 0;
        for (idx, record) in reader.records().enumerate() {
            let record = record?;
            total += 1;
            if filter.is_some_and(|f| !f.contains(idx)) {
                continue;
            }

            let location = format!("{} record {}", path.display(), idx + 1);
            if record.len() != headers.len() {
                return Err(DatasetError::DataIntegrity(format!(
                    "{location}: expected {} fields, found {}",
                    headers.len(),
                    record.len()
                )));
            }
            let label = parse_label(&record[label_idx], label_count, &location)?;
            let text = &record[text_idx];

            examples.push(Example::new(text.trim(), label).with_id(idx.to_string()));
        }
        warn_out_of_range(filter, &self.spec.name, split, total);

        Ok(examples)
    }
}

/// Build the processor for a spec's format
#[must_use]
pub fn processor_for(spec: DatasetSpec) -> Box<dyn DatasetProcessor> {
    match spec.format {
        DatasetFormat::LineAligned => Box::new(LineAlignedProcessor::new(spec)),
        DatasetFormat::Delimited => Box::new(DelimitedProcessor::new(spec)),
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Supported(DatasetSpec),
    Unsupported,
}

/// Dataset name → processor lookup
#[derive(Debug, Clone)]
pub struct ProcessorRegistry {
    entries: BTreeMap<String, Entry>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProcessorRegistry {
    /// Registry with no entries
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registry with the built-in sentiment datasets
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(DatasetSpec::line_aligned("imdb", &["negative", "positive"]));
        // Pending validation of the sampled test split and the TSV layout.
        registry.declare_unsupported("amazon");
        registry.declare_unsupported("sst-2");
        registry
    }

    /// Built-in registry extended with configured datasets
    #[must_use]
    pub fn from_specs<I: IntoIterator<Item = DatasetSpec>>(specs: I) -> Self {
        let mut registry = Self::builtin();
        for spec in specs {
            registry.register(spec);
        }
        registry
    }

    /// Register (or replace) a supported dataset
    pub fn register(&mut self, spec: DatasetSpec) {
        self.entries.insert(spec.name.clone(), Entry::Supported(spec));
    }

    /// Declare a dataset name whose processor is not available
    pub fn declare_unsupported(&mut self, name: &str) {
        self.entries.insert(name.to_string(), Entry::Unsupported);
    }

    /// Construct the processor for `name`
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedDataset` for declared-but-unsupported names and
    /// `UnknownDataset` for names never declared.
    pub fn get(&self, name: &str) -> Result<Box<dyn DatasetProcessor>, DatasetError> {
        match self.entries.get(name) {
            Some(Entry::Supported(spec)) => Ok(processor_for(spec.clone())),
            Some(Entry::Unsupported) => Err(DatasetError::UnsupportedDataset(name.to_string())),
            None => Err(DatasetError::UnknownDataset(name.to_string())),
        }
    }

    /// Look up `name` and load `split` in one step
    ///
    /// # Errors
    ///
    /// Any error from [`ProcessorRegistry::get`] or [`DatasetProcessor::load`].
    pub fn load(
        &self,
        name: &str,
        data_dir: Option<&Path>,
        split: &str,
    ) -> Result<Dataset, DatasetError> {
        self.get(name)?.load(data_dir, split)
    }

    /// Names of datasets that can be loaded
    #[must_use]
    pub fn supported(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Supported(_)))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// All declared names
    #[must_use]
    pub fn declared(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }
}
