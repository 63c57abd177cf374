//! Unit of work: one input file and where its result belongs

use std::path::{Path, PathBuf};

use serde::Serialize;

/// One categorization job. Immutable once built; dropped when consumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    /// Input file sent to the service.
    pub source: PathBuf,
    /// Structured result location.
    pub destination: PathBuf,
    /// Stable identifier for logs and the status feed. The input file name
    /// unless overridden with [`Job::with_id`].
    pub id: String,
}

impl Job {
    /// Build a job whose identifier is the source file name.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        let source = source.into();
        let id = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.display().to_string());
        Self {
            source,
            destination: destination.into(),
            id,
        }
    }

    /// Replace the identifier, e.g. to qualify it with its directory when
    /// several input directories hold the same file names.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }
}
