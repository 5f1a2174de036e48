//! Concrete persist adapters and search indexes for Lectern workspaces.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info};

use lectern_core::catalog::{Catalog, Result};
use lectern_core::document::{Bible, Media, Show, Slide, Song};
use lectern_core::storage::Workspace;

pub mod persist;
pub mod search;

use crate::persist::JsonFolderAdapter;
use crate::search::InvertedIndex;

/// Opens the catalog of `workspace` with a JSON folder adapter for every document kind and the
/// inverted index persisted in the workspace's index directory.
///
/// The index is rebuilt when it does not cover exactly the documents found on disk.
pub async fn open_catalog(workspace: &Workspace) -> Result<Catalog> {
    let paths = workspace.paths();
    let index = Arc::new(InvertedIndex::open(paths.index_dir()).await?);
    let catalog = Catalog::new(index.clone())?;

    catalog.register_persist_adapter(JsonFolderAdapter::<Bible>::for_workspace(paths)).await?;
    catalog.register_persist_adapter(JsonFolderAdapter::<Song>::for_workspace(paths)).await?;
    catalog.register_persist_adapter(JsonFolderAdapter::<Slide>::for_workspace(paths)).await?;
    catalog.register_persist_adapter(JsonFolderAdapter::<Media>::for_workspace(paths)).await?;
    catalog.register_persist_adapter(JsonFolderAdapter::<Show>::for_workspace(paths)).await?;

    let snapshot = catalog.snapshot().await?;
    let on_disk: BTreeSet<_> = snapshot.ids().into_iter().collect();
    if index.ids().await != on_disk {
        info!(documents = on_disk.len(), "Search index is stale, rebuilding");
        catalog.reindex().await?;
    }

    debug!(workspace = %workspace.path().display(), documents = snapshot.len(), "Catalog opened");
    Ok(catalog)
}
