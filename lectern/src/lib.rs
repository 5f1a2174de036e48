use std::path::PathBuf;

use anyhow::Context;
use lectern_core::catalog::Catalog;
use lectern_core::storage::Workspace;

pub mod cli;
pub mod commands;

pub struct AppContext {
    pub workspace: anyhow::Result<Workspace>,
}

impl AppContext {
    /// Resolves the workspace from `--workspace` or, failing that, from the current directory and
    /// its ancestors. Not finding one is only an error for commands that need it.
    pub async fn new(workspace_flag: Option<PathBuf>) -> Self {
        AppContext { workspace: locate_workspace(workspace_flag).await }
    }

    pub fn workspace(&self) -> anyhow::Result<&Workspace> {
        self.workspace.as_ref().map_err(|e| anyhow::anyhow!("{e:#}"))
    }

    pub async fn catalog(&self) -> anyhow::Result<Catalog> {
        let workspace = self.workspace()?;
        lectern_extensions::open_catalog(workspace)
            .await
            .with_context(|| format!("Failed to open catalog of {}", workspace.path().display()))
    }
}

async fn locate_workspace(workspace_flag: Option<PathBuf>) -> anyhow::Result<Workspace> {
    match workspace_flag {
        Some(path) => Workspace::open(&path)
            .await
            .with_context(|| format!("Failed to open workspace at {}", path.display())),
        None => {
            let dir = std::env::current_dir()?;
            Workspace::find(&dir)
                .await
                .with_context(|| format!("No workspace found in {} or its parents", dir.display()))
        }
    }
}
