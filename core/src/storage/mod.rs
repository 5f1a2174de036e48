//! The on-disk workspace.
//!
//! A workspace is a directory holding a `lectern.json` config file, an `index` directory for the
//! search index and one directory per document kind (`bibles`, `songs`, `slides`, `media`,
//! `shows`). [`WorkspacePaths`] resolves those locations; [`Workspace`] creates and opens them.
//! What goes inside the category directories is up to the persist adapters.

use std::path::PathBuf;

use thiserror::Error;

pub use self::paths::WorkspacePaths;
pub use self::workspace::{Workspace, WorkspaceConfig};

mod paths;
mod workspace;

pub const WORKSPACE_CONFIG_FILENAME: &str = "lectern.json";
pub const INDEX_DIR_NAME: &str = "index";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error")]
    Io(#[from] std::io::Error),

    #[error("Workspace config serialization error")]
    Config(#[from] serde_json::Error),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Path is not a workspace (missing '{WORKSPACE_CONFIG_FILENAME}'): {0}")]
    NotAWorkspace(PathBuf),

    #[error("Cannot create workspace: path exists and is a file: {0}")]
    PathIsFile(PathBuf),

    #[error("Cannot create workspace: path exists and is not an empty directory: {0}")]
    WorkspaceCreationConflict(PathBuf),

    #[error("Workspace config file is missing or invalid: {0}")]
    InvalidWorkspaceConfig(PathBuf),
}

pub type Result<T> = std::result::Result<T, StorageError>;
