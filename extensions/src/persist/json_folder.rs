use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use lectern_core::archive;
use lectern_core::document::{Document, Persistable};
use lectern_core::persist::{AdapterError, DataImportResult, ExportFormat, ImportOptions, PersistAdapter, Result};
use lectern_core::storage::WorkspacePaths;

const EXTENSION: &str = "json";

/// Stores each document as `<id>.json` in one directory.
///
/// Files hold the `Persistable` envelope (tagged with `"kind"`), so a document of another kind
/// that ends up in the directory is recognized and skipped rather than misread.
pub struct JsonFolderAdapter<T> {
    dir: PathBuf,
    _kind: PhantomData<fn() -> T>,
}

impl<T: Document> JsonFolderAdapter<T> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonFolderAdapter { dir: dir.into(), _kind: PhantomData }
    }

    /// The adapter for `T` inside a workspace, using the kind's category directory.
    pub fn for_workspace(paths: &WorkspacePaths) -> Self {
        Self::new(paths.kind_dir(T::KIND))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    /// Writes `item` to a sibling temp file and renames it over the final path.
    async fn write(&self, item: &T) -> Result<()> {
        let path = self.path_for(item.id());
        let json = serde_json::to_vec_pretty(&item.clone().into_persistable())?;
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, json).await?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_entry(&self, path: &Path) -> Option<T> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unreadable document file");
                return None;
            }
        };
        let item = match serde_json::from_slice::<Persistable>(&bytes) {
            Ok(item) => item,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping unparsable document file");
                return None;
            }
        };
        let kind = item.kind();
        let item = match T::from_persistable(item) {
            Ok(item) => item,
            Err(_) => {
                warn!(path = %path.display(), found = %kind, expected = %T::KIND, "Skipping document of another kind");
                return None;
            }
        };
        let stem_matches = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .is_some_and(|stem| stem == item.id().to_string());
        if !stem_matches {
            warn!(path = %path.display(), id = %item.id(), "Skipping document whose file name does not match its id");
            return None;
        }
        Some(item)
    }

    /// Collects every document of type `T` found at `path`.
    async fn collect_candidates(&self, path: &Path) -> Result<Vec<T>> {
        let meta = fs::metadata(path).await?;

        if meta.is_dir() {
            let mut found = Vec::new();
            let mut pending = vec![path.to_path_buf()];
            while let Some(dir) = pending.pop() {
                let mut entries = fs::read_dir(&dir).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let entry_path = entry.path();
                    if entry.file_type().await?.is_dir() {
                        pending.push(entry_path);
                    } else if has_json_extension(&entry_path) {
                        if let Ok(bytes) = fs::read(&entry_path).await {
                            found.extend(decode::<T>(&bytes));
                        }
                    }
                }
            }
            return Ok(found);
        }

        if archive::is_archive(path).await {
            let entries = archive::read_entries(path)
                .await
                .map_err(|e| AdapterError::Archive(e.to_string()))?;
            return Ok(entries
                .iter()
                .filter(|entry| has_json_extension(&entry.path))
                .flat_map(|entry| decode::<T>(&entry.contents))
                .collect());
        }

        Ok(decode::<T>(&fs::read(path).await?))
    }
}

fn has_json_extension(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case(EXTENSION))
}

/// Interprets `bytes` as one document or an array of documents, keeping those of type `T`.
/// Anything unparsable yields nothing.
fn decode<T: Document>(bytes: &[u8]) -> Vec<T> {
    let value: serde_json::Value = match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(_) => return Vec::new(),
    };
    let values = match value {
        serde_json::Value::Array(values) => values,
        other => vec![other],
    };
    values
        .into_iter()
        .filter_map(|value| serde_json::from_value::<Persistable>(value).ok())
        .filter_map(|item| T::from_persistable(item).ok())
        .collect()
}

#[async_trait]
impl<T: Document> PersistAdapter<T> for JsonFolderAdapter<T> {
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    async fn initialize(&self) -> Result<Vec<T>> {
        fs::create_dir_all(&self.dir).await?;

        let mut items = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !has_json_extension(&path) {
                continue;
            }
            if let Some(item) = self.read_entry(&path).await {
                items.push(item);
            }
        }
        items.sort_by(|a, b| a.header().created().cmp(&b.header().created()).then_with(|| a.id().cmp(&b.id())));

        debug!(count = items.len(), "Documents loaded");
        Ok(items)
    }

    async fn create(&self, item: &T) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        if fs::try_exists(self.path_for(item.id())).await? {
            return Err(AdapterError::AlreadyExists(item.id()));
        }
        self.write(item).await
    }

    async fn update(&self, item: &T) -> Result<()> {
        if !fs::try_exists(self.path_for(item.id())).await? {
            return Err(AdapterError::NotFound(item.id()));
        }
        self.write(item).await
    }

    async fn delete(&self, item: &T) -> Result<()> {
        match fs::remove_file(self.path_for(item.id())).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AdapterError::NotFound(item.id())),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, path, options), fields(kind = %T::KIND, path = %path.display(), merge = options.merge))]
    async fn import_data(&self, path: &Path, options: &ImportOptions) -> Result<DataImportResult<T>> {
        // Later occurrences of an id win.
        let mut candidates: BTreeMap<Uuid, T> = BTreeMap::new();
        let mut order = Vec::new();
        for item in self.collect_candidates(path).await? {
            if options.is_excluded(item.id()) {
                warn!(id = %item.id(), "Skipping imported document whose id is held by another kind");
                continue;
            }
            if candidates.insert(item.id(), item.clone()).is_none() {
                order.push(item.id());
            }
        }

        let mut result = DataImportResult::default();
        if candidates.is_empty() {
            return Ok(result);
        }
        fs::create_dir_all(&self.dir).await?;

        for id in order {
            let Some(item) = candidates.remove(&id) else { continue };
            let exists = fs::try_exists(self.path_for(id)).await?;
            if exists && !options.merge {
                debug!(%id, "Skipping existing document");
                continue;
            }
            self.write(&item).await?;
            if exists {
                result.updated.push(item);
            } else {
                result.created.push(item);
            }
        }
        debug!(created = result.created.len(), updated = result.updated.len(), "Import written");
        Ok(result)
    }

    #[instrument(skip(self, items), fields(destination = %destination.display(), count = items.len()))]
    async fn export_data(&self, format: ExportFormat, destination: &Path, items: &[T]) -> Result<()> {
        let existed = fs::try_exists(destination).await?;
        let outcome = export_into(format, destination, items).await;
        if outcome.is_err() && !existed {
            let _ = fs::remove_dir_all(destination).await;
        }
        outcome
    }

    fn file_path(&self, item: &T) -> Option<PathBuf> {
        Some(self.path_for(item.id()))
    }
}

async fn export_into<T: Document>(format: ExportFormat, destination: &Path, items: &[T]) -> Result<()> {
    fs::create_dir_all(destination).await?;
    for item in items {
        let (file_name, contents) = match format {
            ExportFormat::Native => (
                format!("{}.{EXTENSION}", item.id()),
                serde_json::to_vec_pretty(&item.clone().into_persistable())?,
            ),
            ExportFormat::Text => (
                format!("{}.txt", item.id()),
                format!("{}\n\n{}\n", item.name(), item.searchable_text()).into_bytes(),
            ),
        };
        fs::write(destination.join(file_name), contents).await?;
    }
    Ok(())
}
