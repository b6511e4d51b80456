use std::path::{Path, PathBuf};

/// Represents the validated `extra.preload` section with every path resolved
/// against the project root.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub root: PathBuf,
    pub files: Vec<PathBuf>,
    pub paths: Vec<PathBuf>,
    pub exclude: Vec<PathBuf>,
    pub exclude_files: Vec<PathBuf>,
    pub exclude_regex: Option<String>,
    pub extensions: Vec<String>,
    pub no_status_check: bool,
    pub export: PathBuf,
    pub template: TemplateSource,
}

/// Where the preload script layout comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// A template file on disk, given explicitly in the configuration.
    File(PathBuf),
    /// One of the templates compiled into the binary.
    Builtin { status_check: bool },
}

/// A single file discovered for preloading. The path is canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileRecord {
    path: PathBuf,
}

impl FileRecord {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercased extension without the leading dot.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

/// Ordered, duplicate-free result of a discovery pass.
///
/// The list is fully materialized, so iterating it more than once yields the
/// same records in the same order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadList {
    records: Vec<FileRecord>,
}

impl PreloadList {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileRecord> {
        self.records.iter()
    }
}

impl FromIterator<FileRecord> for PreloadList {
    fn from_iter<I: IntoIterator<Item = FileRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a PreloadList {
    type Item = &'a FileRecord;
    type IntoIter = std::slice::Iter<'a, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
