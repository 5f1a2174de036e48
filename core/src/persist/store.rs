use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::catalog::CatalogError;
use crate::document::{Document, Persistable, PersistableKind};
use crate::index::SearchIndex;

use super::{DataImportResult, ExportFormat, ImportOptions, PersistAdapter, Result};

/// Binds one [`PersistAdapter`] to the shared search index.
///
/// Every write follows the same sequence: durable write through the adapter, then the in-memory
/// list of this store, then the search index. If the adapter fails nothing else is touched. If
/// the index fails the write stands and the failure is logged; the document is searchable again
/// after the next reindex.
pub struct PersistentStore<T: Document> {
    adapter: Box<dyn PersistAdapter<T>>,
    index: Arc<dyn SearchIndex>,
    items: RwLock<Vec<T>>,
}

impl<T: Document> PersistentStore<T> {
    pub fn new(adapter: impl PersistAdapter<T> + 'static, index: Arc<dyn SearchIndex>) -> Self {
        PersistentStore {
            adapter: Box::new(adapter),
            index,
            items: RwLock::new(Vec::new()),
        }
    }

    pub fn kind(&self) -> PersistableKind {
        T::KIND
    }

    /// Returns a copy of the items of this store.
    pub async fn items(&self) -> Vec<T> {
        self.items.read().await.clone()
    }

    /// Loads every durable item and makes it this store's list.
    #[instrument(skip(self), fields(kind = %T::KIND))]
    pub async fn initialize(&self) -> Result<Vec<T>> {
        let items = self.adapter.initialize().await?;
        *self.items.write().await = items.clone();
        debug!(count = items.len(), "Store initialized");
        Ok(items)
    }

    /// Persists a new item and returns the stored version (with its write timestamp).
    #[instrument(skip(self, item), fields(kind = %T::KIND, id = %item.id()))]
    pub async fn create(&self, mut item: T) -> Result<T> {
        item.header_mut().touch(Utc::now());
        self.adapter.create(&item).await?;

        self.items.write().await.push(item.clone());
        self.index_item(&item).await;
        debug!("Document created");
        Ok(item)
    }

    /// Replaces the stored item with the same id and returns the stored version.
    #[instrument(skip(self, item), fields(kind = %T::KIND, id = %item.id()))]
    pub async fn update(&self, mut item: T) -> Result<T> {
        if let Some(previous) = self.items.read().await.iter().find(|i| i.id() == item.id()) {
            item.header_mut().inherit_dates(previous.header());
        }
        item.header_mut().touch(Utc::now());
        self.adapter.update(&item).await?;

        replace_or_push(&mut *self.items.write().await, item.clone());
        self.index_item(&item).await;
        debug!("Document updated");
        Ok(item)
    }

    #[instrument(skip(self, item), fields(kind = %T::KIND, id = %item.id()))]
    pub async fn delete(&self, item: &T) -> Result<()> {
        self.adapter.delete(item).await?;

        let id = item.id();
        self.items.write().await.retain(|i| i.id() != id);
        if let Err(e) = self.index.remove(id).await {
            warn!(error = %e, "Removing document from the search index failed; it may appear in results until the next reindex");
        }
        debug!("Document deleted");
        Ok(())
    }

    /// Imports a foreign file through the adapter and folds the result into this store.
    #[instrument(skip(self, path, options), fields(kind = %T::KIND, path = %path.display(), merge = options.merge))]
    pub async fn import_data(&self, path: &Path, options: &ImportOptions) -> Result<DataImportResult<T>> {
        let result = self.adapter.import_data(path, options).await?;

        {
            let mut items = self.items.write().await;
            for item in result.iter() {
                replace_or_push(&mut items, item.clone());
            }
        }
        join_all(result.iter().map(|item| self.index_item(item))).await;

        debug!(created = result.created.len(), updated = result.updated.len(), "Import finished");
        Ok(result)
    }

    pub async fn export_data(&self, format: ExportFormat, destination: &Path, items: &[T]) -> Result<()> {
        self.adapter.export_data(format, destination, items).await
    }

    pub fn file_path(&self, item: &T) -> Option<PathBuf> {
        self.adapter.file_path(item)
    }

    async fn index_item(&self, item: &T) {
        if let Err(e) = self.index.index(item.indexable()).await {
            warn!(id = %item.id(), error = %e, "Indexing failed; document stays unsearchable until the next reindex");
        }
    }
}

fn replace_or_push<T: Document>(items: &mut Vec<T>, item: T) {
    match items.iter_mut().find(|existing| existing.id() == item.id()) {
        Some(existing) => *existing = item,
        None => items.push(item),
    }
}

/// A [`PersistentStore`] seen through [`Persistable`], so the catalog can hold stores of all
/// types in one registry.
#[async_trait]
pub(crate) trait ErasedStore: Send + Sync {
    fn kind(&self) -> PersistableKind;

    async fn create(&self, item: Persistable) -> std::result::Result<Persistable, CatalogError>;

    async fn update(&self, item: Persistable) -> std::result::Result<Persistable, CatalogError>;

    async fn delete(&self, item: Persistable) -> std::result::Result<(), CatalogError>;

    async fn import_data(&self, path: &Path, options: &ImportOptions) -> std::result::Result<DataImportResult<Persistable>, CatalogError>;

    async fn export_data(&self, format: ExportFormat, destination: &Path, items: Vec<Persistable>) -> std::result::Result<(), CatalogError>;

    fn file_path(&self, item: &Persistable) -> std::result::Result<Option<PathBuf>, CatalogError>;
}

fn downcast<T: Document>(item: Persistable) -> std::result::Result<T, CatalogError> {
    T::from_persistable(item).map_err(|other| CatalogError::KindMismatch {
        expected: T::KIND,
        found: other.kind(),
    })
}

#[async_trait]
impl<T: Document> ErasedStore for PersistentStore<T> {
    fn kind(&self) -> PersistableKind {
        T::KIND
    }

    async fn create(&self, item: Persistable) -> std::result::Result<Persistable, CatalogError> {
        let stored = PersistentStore::create(self, downcast::<T>(item)?).await?;
        Ok(stored.into_persistable())
    }

    async fn update(&self, item: Persistable) -> std::result::Result<Persistable, CatalogError> {
        let stored = PersistentStore::update(self, downcast::<T>(item)?).await?;
        Ok(stored.into_persistable())
    }

    async fn delete(&self, item: Persistable) -> std::result::Result<(), CatalogError> {
        let item = downcast::<T>(item)?;
        PersistentStore::delete(self, &item).await?;
        Ok(())
    }

    async fn import_data(&self, path: &Path, options: &ImportOptions) -> std::result::Result<DataImportResult<Persistable>, CatalogError> {
        let result = PersistentStore::import_data(self, path, options).await?;
        Ok(result.map(Document::into_persistable))
    }

    async fn export_data(&self, format: ExportFormat, destination: &Path, items: Vec<Persistable>) -> std::result::Result<(), CatalogError> {
        let items = items.into_iter().map(downcast::<T>).collect::<std::result::Result<Vec<_>, _>>()?;
        PersistentStore::export_data(self, format, destination, &items).await?;
        Ok(())
    }

    fn file_path(&self, item: &Persistable) -> std::result::Result<Option<PathBuf>, CatalogError> {
        let item = T::from_persistable_ref(item).ok_or(CatalogError::KindMismatch {
            expected: T::KIND,
            found: item.kind(),
        })?;
        Ok(PersistentStore::file_path(self, item))
    }
}
