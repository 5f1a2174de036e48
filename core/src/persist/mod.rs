//! Durable storage of documents.
//!
//! A [`PersistAdapter`] knows how to read, write, import and export a single document type. A
//! [`PersistentStore`] binds one adapter to the shared search index and keeps the in-memory list
//! of that type consistent with what the adapter reports as durable.

use std::{collections::HashSet, fmt, path::{Path, PathBuf}, str::FromStr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use std::error::Error as StdError;
use uuid::Uuid;

use crate::document::Document;

pub use self::store::PersistentStore;
pub(crate) use self::store::ErasedStore;

mod store;

#[derive(Error, Debug)]
pub enum AdapterError {
    /// Disk full, permission denied and other filesystem failures.
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Document serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("Document already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("Document not found: {0}")]
    NotFound(Uuid),

    /// A durable entry exists but cannot be interpreted.
    #[error("Corrupt entry {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Archive error: {0}")]
    Archive(String),

    /// An error specific to the adapter implementation.
    #[error("Adapter error: {0}")]
    Other(#[source] Box<dyn StdError + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, AdapterError>;

/// Outcome of an import, partitioned into documents that were new to the workspace and documents
/// that overwrote an existing id.
#[derive(Debug, Clone, PartialEq)]
pub struct DataImportResult<T> {
    pub created: Vec<T>,
    pub updated: Vec<T>,
}

impl<T> Default for DataImportResult<T> {
    fn default() -> Self {
        DataImportResult { created: Vec::new(), updated: Vec::new() }
    }
}

impl<T> DataImportResult<T> {
    pub fn len(&self) -> usize {
        self.created.len() + self.updated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.created.iter().chain(self.updated.iter())
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> DataImportResult<U> {
        DataImportResult {
            created: self.created.into_iter().map(&mut f).collect(),
            updated: self.updated.into_iter().map(&mut f).collect(),
        }
    }

    /// Appends the other result's partitions to this one.
    pub fn extend(&mut self, other: DataImportResult<T>) {
        self.created.extend(other.created);
        self.updated.extend(other.updated);
    }
}

/// How an import treats ids that are already taken.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportOptions {
    /// Overwrite documents of the same type whose id is already stored, instead of skipping them.
    pub merge: bool,
    /// Ids held by documents outside this adapter. Incoming documents with one of these ids are
    /// dropped before anything is written.
    pub excluded: HashSet<Uuid>,
}

impl ImportOptions {
    pub fn merge() -> Self {
        ImportOptions { merge: true, excluded: HashSet::new() }
    }

    pub fn keep_existing() -> Self {
        ImportOptions { merge: false, excluded: HashSet::new() }
    }

    pub fn excluding(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.excluded.extend(ids);
        self
    }

    pub fn is_excluded(&self, id: Uuid) -> bool {
        self.excluded.contains(&id)
    }
}

/// Formats documents can be exported in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// The adapter's own format; can be imported again.
    #[default]
    Native,
    /// Human-readable plain text.
    Text,
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Native => f.write_str("native"),
            ExportFormat::Text => f.write_str("text"),
        }
    }
}

#[derive(Debug, Error)]
#[error("Unknown export format: {0}")]
pub struct UnknownExportFormat(pub String);

impl FromStr for ExportFormat {
    type Err = UnknownExportFormat;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "json" => Ok(ExportFormat::Native),
            "text" | "txt" => Ok(ExportFormat::Text),
            _ => Err(UnknownExportFormat(s.to_string())),
        }
    }
}

/// Durable storage strategy for one document type.
///
/// Every write operation is atomic for the single item it receives and never touches any other
/// item.
#[async_trait]
pub trait PersistAdapter<T: Document>: Send + Sync {
    /// Loads every durable instance of `T`.
    ///
    /// Corrupt entries are skipped (and logged) rather than failing the whole load.
    async fn initialize(&self) -> Result<Vec<T>>;

    async fn create(&self, item: &T) -> Result<()>;

    async fn update(&self, item: &T) -> Result<()>;

    async fn delete(&self, item: &T) -> Result<()>;

    /// Interprets a foreign file as zero or more instances of `T` and makes them durable.
    ///
    /// Items whose id is in `options.excluded` are never written. With `options.merge` set, items
    /// whose id is already stored are overwritten and reported as updated. Without it, such items
    /// are skipped and only new ids are created. Finding nothing of type `T` is not an error; the
    /// result is simply empty.
    async fn import_data(&self, path: &Path, options: &ImportOptions) -> Result<DataImportResult<T>>;

    /// Writes `items` into the `destination` directory in the requested format.
    ///
    /// On failure the destination must not be left partially written.
    async fn export_data(&self, format: ExportFormat, destination: &Path, items: &[T]) -> Result<()>;

    /// Location of the durable copy of `item`, if the type stores each item in one file.
    fn file_path(&self, item: &T) -> Option<PathBuf>;
}
