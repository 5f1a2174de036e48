//! In-memory doubles of the persist adapter and search index, with failure injection.
//!
//! Available to this crate's unit tests and, through the `test_utils` feature, to other crates.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::document::Document;
use crate::index::{self, Indexable, SearchCriteria, SearchHit, SearchIndex, SearchResults};
use crate::persist::{AdapterError, DataImportResult, ExportFormat, ImportOptions, PersistAdapter, Result};

/// An export the adapter performed.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRecord {
    pub format: ExportFormat,
    pub destination: PathBuf,
    pub ids: Vec<Uuid>,
}

struct AdapterState<T> {
    items: Vec<T>,
    staged: HashMap<PathBuf, Vec<T>>,
    exports: Vec<ExportRecord>,
    fail_writes: bool,
    fail_exports: bool,
    delay: Option<Duration>,
}

/// A [`PersistAdapter`] that keeps its items in memory.
///
/// Clones share the same state, so a test can keep a handle after giving the adapter away.
pub struct MemoryAdapter<T> {
    state: Arc<Mutex<AdapterState<T>>>,
}

impl<T> Clone for MemoryAdapter<T> {
    fn clone(&self) -> Self {
        MemoryAdapter { state: self.state.clone() }
    }
}

impl<T: Document> Default for MemoryAdapter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Document> MemoryAdapter<T> {
    pub fn new() -> Self {
        Self::with_items(Vec::new())
    }

    /// An adapter whose durable state initially holds `items`.
    pub fn with_items(items: Vec<T>) -> Self {
        MemoryAdapter {
            state: Arc::new(Mutex::new(AdapterState {
                items,
                staged: HashMap::new(),
                exports: Vec::new(),
                fail_writes: false,
                fail_exports: false,
                delay: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AdapterState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn items(&self) -> Vec<T> {
        self.lock().items.clone()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().items.iter().any(|item| item.id() == id)
    }

    /// Makes create, update, delete and import fail with an IO error.
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn fail_exports(&self, fail: bool) {
        self.lock().fail_exports = fail;
    }

    /// Delays every write by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Makes `import_data(path, ..)` recognize `items`. Unstaged paths import nothing.
    pub fn stage_import(&self, path: impl Into<PathBuf>, items: Vec<T>) {
        self.lock().staged.insert(path.into(), items);
    }

    pub fn exports(&self) -> Vec<ExportRecord> {
        self.lock().exports.clone()
    }

    async fn before_write(&self) -> Result<()> {
        let (delay, fail) = {
            let state = self.lock();
            (state.delay, state.fail_writes)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(AdapterError::Io(io::Error::other("injected write failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Document> PersistAdapter<T> for MemoryAdapter<T> {
    async fn initialize(&self) -> Result<Vec<T>> {
        Ok(self.items())
    }

    async fn create(&self, item: &T) -> Result<()> {
        self.before_write().await?;
        let mut state = self.lock();
        if state.items.iter().any(|i| i.id() == item.id()) {
            return Err(AdapterError::AlreadyExists(item.id()));
        }
        state.items.push(item.clone());
        Ok(())
    }

    async fn update(&self, item: &T) -> Result<()> {
        self.before_write().await?;
        let mut state = self.lock();
        let existing = state
            .items
            .iter_mut()
            .find(|i| i.id() == item.id())
            .ok_or(AdapterError::NotFound(item.id()))?;
        *existing = item.clone();
        Ok(())
    }

    async fn delete(&self, item: &T) -> Result<()> {
        self.before_write().await?;
        let mut state = self.lock();
        let before = state.items.len();
        state.items.retain(|i| i.id() != item.id());
        if state.items.len() == before {
            return Err(AdapterError::NotFound(item.id()));
        }
        Ok(())
    }

    async fn import_data(&self, path: &Path, options: &ImportOptions) -> Result<DataImportResult<T>> {
        self.before_write().await?;
        let mut state = self.lock();
        let incoming = state.staged.get(path).cloned().unwrap_or_default();

        let mut result = DataImportResult::default();
        for item in incoming.into_iter().filter(|item| !options.is_excluded(item.id())) {
            match state.items.iter_mut().find(|i| i.id() == item.id()) {
                Some(existing) if options.merge => {
                    *existing = item.clone();
                    result.updated.push(item);
                }
                Some(_) => {}
                None => {
                    state.items.push(item.clone());
                    result.created.push(item);
                }
            }
        }
        Ok(result)
    }

    async fn export_data(&self, format: ExportFormat, destination: &Path, items: &[T]) -> Result<()> {
        if self.lock().fail_exports {
            return Err(AdapterError::Io(io::Error::other("injected export failure")));
        }

        tokio::fs::create_dir_all(destination).await?;
        for item in items {
            let (file_name, contents) = match format {
                ExportFormat::Native => (
                    format!("{}.json", item.id()),
                    serde_json::to_vec_pretty(&item.clone().into_persistable())?,
                ),
                ExportFormat::Text => (format!("{}.txt", item.id()), item.searchable_text().into_bytes()),
            };
            tokio::fs::write(destination.join(file_name), contents).await?;
        }

        self.lock().exports.push(ExportRecord {
            format,
            destination: destination.to_path_buf(),
            ids: items.iter().map(Document::id).collect(),
        });
        Ok(())
    }

    fn file_path(&self, _item: &T) -> Option<PathBuf> {
        None
    }
}

/// Gives `item` the id `id`, e.g. to build two documents of different kinds sharing one id.
pub fn with_id<T: Document>(mut item: T, id: Uuid) -> T {
    item.header_mut().reassign_id(id);
    item
}

/// A [`SearchIndex`] matching whole lower-cased words of the name and text.
#[derive(Default)]
pub struct MemoryIndex {
    entries: RwLock<BTreeMap<Uuid, Indexable>>,
    fail_writes: AtomicBool,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes index, remove and reindex fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn entries(&self) -> Vec<Indexable> {
        self.entries.read().await.values().cloned().collect()
    }

    fn check_writable(&self) -> index::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(index::IndexError::Io(io::Error::other("injected index failure")));
        }
        Ok(())
    }
}

fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl SearchIndex for MemoryIndex {
    async fn reindex(&self, items: Vec<Indexable>) -> index::Result<()> {
        self.check_writable()?;
        *self.entries.write().await = items.into_iter().map(|item| (item.id, item)).collect();
        Ok(())
    }

    async fn index(&self, item: Indexable) -> index::Result<()> {
        self.check_writable()?;
        self.entries.write().await.insert(item.id, item);
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> index::Result<()> {
        self.check_writable()?;
        self.entries.write().await.remove(&id);
        Ok(())
    }

    async fn search(&self, criteria: &SearchCriteria) -> index::Result<SearchResults> {
        let terms = words(&criteria.query);
        let entries = self.entries.read().await;

        let mut hits: Vec<SearchHit> = entries
            .values()
            .filter(|item| criteria.admits(item))
            .filter_map(|item| {
                let haystack = words(&format!("{} {}", item.name, item.text));
                let score = terms.iter().filter(|term| haystack.contains(term)).count() as u32;
                (terms.is_empty() || score > 0).then(|| SearchHit {
                    id: item.id,
                    kind: item.kind,
                    name: item.name.clone(),
                    score,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(criteria.limit);
        Ok(SearchResults { hits })
    }
}
