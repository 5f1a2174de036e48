use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::document::PersistableKind;
use crate::index::IndexError;
use crate::persist::AdapterError;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Persist adapter error")]
    Adapter(#[from] AdapterError),

    #[error("Search index error")]
    Index(#[from] IndexError),

    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("No persist adapter registered for {0}")]
    UnregisteredType(PersistableKind),

    #[error("Expected a {expected}, got a {found}")]
    KindMismatch { expected: PersistableKind, found: PersistableKind },

    #[error("A document with id {0} already exists")]
    DuplicateId(Uuid),

    #[error("Document not found: {0}")]
    NotFound(Uuid),

    /// The multi-kind import found nothing any adapter recognized.
    #[error("{0} matches no known format")]
    NoFormatRecognized(PathBuf),

    #[error("Catalog state may only be read on the coordinating thread")]
    NotOnCoordinator,

    #[error("The catalog coordinator has stopped")]
    CoordinatorStopped,

    #[error("Export failed: {0}")]
    Export(String),

    /// A spawned worker task panicked.
    #[error("Worker task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
