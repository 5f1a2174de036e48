use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::persist::ExportFormat;

use super::{Result, StorageError, WORKSPACE_CONFIG_FILENAME, WorkspacePaths};

const CONFIG_VERSION: u32 = 1;

/// Contents of `lectern.json`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceConfig {
    pub id: Uuid,
    /// Format version of this file.
    pub version: u32,
    pub name: String,
    #[serde(default)]
    pub export_format: ExportFormat,
}

impl WorkspaceConfig {
    fn new(name: String) -> Self {
        WorkspaceConfig {
            id: Uuid::new_v4(),
            version: CONFIG_VERSION,
            name,
            export_format: ExportFormat::default(),
        }
    }
}

/// An opened workspace directory.
#[derive(Debug, Clone)]
pub struct Workspace {
    paths: WorkspacePaths,
    config: WorkspaceConfig,
}

impl Workspace {
    /// Absolute path of the workspace root.
    pub fn path(&self) -> &Path {
        self.paths.root()
    }

    pub fn paths(&self) -> &WorkspacePaths {
        &self.paths
    }

    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Opens an existing workspace. The directory must contain a valid `lectern.json`.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Workspace> {
        let meta = fs::metadata(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::DirectoryNotFound(path.to_path_buf())
            } else {
                StorageError::Io(e)
            }
        })?;
        if !meta.is_dir() {
            return Err(StorageError::NotADirectory(path.to_path_buf()));
        }

        let root = fs::canonicalize(path).await?;
        let paths = WorkspacePaths::new(root);
        let config_path = paths.config_file();
        if fs::metadata(&config_path).await.is_err() {
            return Err(StorageError::NotAWorkspace(paths.root().to_path_buf()));
        }
        let config = read_config(&config_path).await?;

        debug!(name = %config.name, "Workspace opened");
        Ok(Workspace { paths, config })
    }

    /// Creates a workspace at `path`, which must not exist or be an empty directory.
    ///
    /// The workspace is named after the directory unless `name` is given.
    #[instrument(skip(path), fields(path = %path.display()))]
    pub async fn create(path: &Path, name: Option<String>) -> Result<Workspace> {
        match fs::metadata(path).await {
            Ok(meta) => {
                if !meta.is_dir() {
                    return Err(StorageError::PathIsFile(path.to_path_buf()));
                }
                let mut entries = fs::read_dir(path).await?;
                if entries.next_entry().await?.is_some() {
                    debug!("Workspace creation failed: directory is not empty");
                    return Err(StorageError::WorkspaceCreationConflict(path.to_path_buf()));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                fs::create_dir_all(path).await?;
            }
            Err(e) => return Err(StorageError::Io(e)),
        }

        let root = fs::canonicalize(path).await?;
        let paths = WorkspacePaths::new(root);
        for dir in paths.directories() {
            fs::create_dir_all(&dir).await?;
        }

        let name = name.unwrap_or_else(|| {
            paths
                .root()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "workspace".to_string())
        });
        let config = WorkspaceConfig::new(name);
        write_config(&paths.config_file(), &config).await?;

        debug!(name = %config.name, "Workspace created");
        Ok(Workspace { paths, config })
    }

    /// Opens the workspace containing `start`, looking in `start` and then in each ancestor.
    pub async fn find(start: &Path) -> Result<Workspace> {
        let start = fs::canonicalize(start).await?;
        for dir in start.ancestors() {
            if fs::metadata(dir.join(WORKSPACE_CONFIG_FILENAME)).await.is_ok() {
                return Workspace::open(dir).await;
            }
        }
        Err(StorageError::NotAWorkspace(start))
    }

    /// Replaces the config and writes it to `lectern.json`.
    pub async fn save_config(&mut self, config: WorkspaceConfig) -> Result<()> {
        write_config(&self.paths.config_file(), &config).await?;
        self.config = config;
        Ok(())
    }
}

async fn read_config(path: &Path) -> Result<WorkspaceConfig> {
    let content = fs::read(path).await.map_err(|e| {
        warn!("Failed to read workspace config '{}': {}", path.display(), e);
        StorageError::InvalidWorkspaceConfig(path.to_path_buf())
    })?;
    serde_json::from_slice(&content).map_err(|e| {
        warn!("Failed to parse workspace config '{}': {}", path.display(), e);
        StorageError::InvalidWorkspaceConfig(path.to_path_buf())
    })
}

async fn write_config(path: &Path, config: &WorkspaceConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    let temp: PathBuf = path.with_extension("json.tmp");
    fs::write(&temp, content).await?;
    fs::rename(&temp, path).await?;
    debug!("Workspace config written to {}", path.display());
    Ok(())
}
