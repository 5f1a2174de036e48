//! The workspace catalog.
//!
//! A [`Catalog`] aggregates one [`PersistentStore`] per document kind and maintains the global
//! snapshot of the workspace: an id lookup, the ordered document list and the set of tags in use.
//!
//! The snapshot is owned by a dedicated coordinator thread. Durable I/O and indexing run on tokio
//! worker tasks; once they succeed the change is sent to the coordinator, which applies changes
//! one at a time in submission order. Two mutations of the same id therefore never interleave
//! their effect on the snapshot, and no lock on the snapshot is ever taken by callers.
//!
//! Mutating operations are spawned as a whole. Dropping the future returned by
//! [`Catalog::create`] does not abort the write: the operation runs to completion or failure.
//!
//! ```ignore
//! # use std::sync::Arc;
//! # use lectern_core::catalog::Catalog;
//! # use lectern_core::document::Song;
//! # use lectern_core::testing::{MemoryAdapter, MemoryIndex};
//! # async fn example() -> lectern_core::catalog::Result<()> {
//! let catalog = Catalog::new(Arc::new(MemoryIndex::new()))?;
//! catalog.register_persist_adapter(MemoryAdapter::<Song>::new()).await?;
//!
//! let song = catalog.create(Song::new("Amazing Grace")).await?;
//! assert!(catalog.get(song.id()).await?.is_some());
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use futures::future::{join_all, try_join_all};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::archive;
use crate::document::{Document, Persistable, PersistableKind};
use crate::event::{CatalogChanged, CatalogEvents};
use crate::index::{SearchCriteria, SearchIndex, SearchResults};
use crate::persist::{DataImportResult, ErasedStore, ExportFormat, ImportOptions, PersistAdapter, PersistentStore};

use self::coordinator::{Change, Command};

pub use self::coordinator::CatalogSnapshot;
pub use self::error::{CatalogError, Result};

mod coordinator;
mod error;

struct Inner {
    commands: mpsc::UnboundedSender<Command>,
    coordinator: ThreadId,
    index: Arc<dyn SearchIndex>,
    events: Arc<CatalogEvents>,
}

/// Handle to a workspace catalog. Cheap to clone; all clones share one coordinator.
///
/// The coordinator thread exits once every handle is dropped.
#[derive(Clone)]
pub struct Catalog {
    inner: Arc<Inner>,
}

impl fmt::Debug for Catalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Catalog").field("coordinator", &self.inner.coordinator).finish()
    }
}

impl Catalog {
    /// Starts the coordinator thread of a new, empty catalog backed by `index`.
    pub fn new(index: Arc<dyn SearchIndex>) -> Result<Self> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let events = Arc::new(CatalogEvents::new());
        let coordinator = coordinator::spawn(receiver, events.clone())?;
        debug!(?coordinator, "Catalog created");

        Ok(Catalog {
            inner: Arc::new(Inner { commands, coordinator, index, events }),
        })
    }

    /// Change notifications, dispatched on the coordinator thread.
    pub fn on(&self) -> &CatalogEvents {
        &self.inner.events
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.inner.index
    }

    /// Whether the calling thread is this catalog's coordinator.
    pub fn is_coordinator(&self) -> bool {
        thread::current().id() == self.inner.coordinator
    }

    async fn request<R>(&self, command: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (reply, response) = oneshot::channel();
        self.inner
            .commands
            .send(command(reply))
            .map_err(|_| CatalogError::CoordinatorStopped)?;
        response.await.map_err(|_| CatalogError::CoordinatorStopped)
    }

    async fn apply(&self, change: Change) -> Result<CatalogChanged> {
        self.request(|reply| Command::Apply { change, reply }).await
    }

    /// Fails unless the snapshot holds `id` as a document of `kind`.
    async fn require_existing(&self, id: Uuid, kind: PersistableKind) -> Result<()> {
        match self.request(|reply| Command::Get { id, reply }).await? {
            None => Err(CatalogError::NotFound(id)),
            Some(existing) if existing.kind() != kind => Err(CatalogError::KindMismatch {
                expected: existing.kind(),
                found: kind,
            }),
            Some(_) => Ok(()),
        }
    }

    /// Applies an import and keeps only the documents the snapshot actually took.
    async fn apply_import(&self, result: DataImportResult<Persistable>) -> Result<DataImportResult<Persistable>> {
        let event = self.apply(Change::Imported(result.clone())).await?;
        let CatalogChanged::Imported { created, updated } = event else {
            return Ok(result);
        };
        Ok(DataImportResult {
            created: result.created.into_iter().filter(|item| created.contains(&item.id())).collect(),
            updated: result.updated.into_iter().filter(|item| updated.contains(&item.id())).collect(),
        })
    }

    async fn import_options(&self, kind: PersistableKind, merge: bool) -> Result<ImportOptions> {
        let claimed = self.request(|reply| Command::Claimed { kind, reply }).await?;
        let options = if merge { ImportOptions::merge() } else { ImportOptions::keep_existing() };
        Ok(options.excluding(claimed))
    }

    async fn store(&self, kind: PersistableKind) -> Result<Arc<dyn ErasedStore>> {
        self.request(|reply| Command::Store { kind, reply })
            .await?
            .ok_or(CatalogError::UnregisteredType(kind))
    }

    /// Runs `operation` to completion on a worker task, even if the returned future is dropped.
    async fn detached<R, F>(operation: F) -> Result<R>
    where
        R: Send + 'static,
        F: Future<Output = Result<R>> + Send + 'static,
    {
        tokio::spawn(operation)
            .await
            .map_err(|e| CatalogError::Task(e.to_string()))?
    }

    /// Creates the store for `T`, loads its durable items and adds them to the snapshot.
    ///
    /// Call once per kind. Registering a kind again replaces its store and upserts its items.
    /// Items whose id already belongs to another kind are left out of the snapshot. Returns the
    /// number of items added.
    pub async fn register_persist_adapter<T, A>(&self, adapter: A) -> Result<usize>
    where
        T: Document,
        A: PersistAdapter<T> + 'static,
    {
        let store = Arc::new(PersistentStore::new(adapter, self.inner.index.clone()));
        let catalog = self.clone();
        Self::detached(async move {
            let items = store.initialize().await?;
            let loaded = items.len();
            let store: Arc<dyn ErasedStore> = store;
            catalog.request(|reply| Command::Register { store, reply }).await?;
            let items = items.into_iter().map(Document::into_persistable).collect();
            let count = match catalog.apply(Change::Registered(T::KIND, items)).await? {
                CatalogChanged::Registered { count, .. } => count,
                _ => loaded,
            };
            debug!(kind = %T::KIND, count, "Persist adapter registered");
            Ok(count)
        })
        .await
    }

    /// Kinds with a registered store, in kind order.
    pub async fn registered_kinds(&self) -> Result<Vec<PersistableKind>> {
        self.request(|reply| Command::Kinds { reply }).await
    }

    /// Makes `item` durable and adds it to the snapshot. Returns the stored copy.
    ///
    /// Fails before any I/O if the kind is unregistered or the id is already used by any
    /// document of the workspace. The id is reserved until the write finishes, so a concurrent
    /// create of the same id fails with [`CatalogError::DuplicateId`] whatever its kind.
    #[instrument(skip_all)]
    pub async fn create(&self, item: impl Into<Persistable>) -> Result<Persistable> {
        let item = item.into();
        let catalog = self.clone();
        Self::detached(async move {
            let id = item.id();
            let store = catalog.store(item.kind()).await?;
            if !catalog.request(|reply| Command::Reserve { id, reply }).await? {
                return Err(CatalogError::DuplicateId(id));
            }
            let stored = match store.create(item).await {
                Ok(stored) => stored,
                Err(e) => {
                    let _ = catalog.inner.commands.send(Command::Release { id });
                    return Err(e);
                }
            };
            catalog.apply(Change::Created(stored.clone())).await?;
            Ok(stored)
        })
        .await
    }

    /// Replaces the document with the same id, durably and in the snapshot.
    ///
    /// Fails with [`CatalogError::NotFound`] before any I/O if the catalog holds no document with
    /// that id.
    #[instrument(skip_all)]
    pub async fn update(&self, item: impl Into<Persistable>) -> Result<Persistable> {
        let item = item.into();
        let catalog = self.clone();
        Self::detached(async move {
            let store = catalog.store(item.kind()).await?;
            catalog.require_existing(item.id(), item.kind()).await?;
            let stored = store.update(item).await?;
            catalog.apply(Change::Updated(stored.clone())).await?;
            Ok(stored)
        })
        .await
    }

    /// Deletes the document durably and removes it from the snapshot.
    ///
    /// Documents referencing it are not checked; use [`Catalog::dependents`] first. Fails with
    /// [`CatalogError::NotFound`] before any I/O if the catalog holds no document with that id.
    #[instrument(skip_all)]
    pub async fn delete(&self, item: impl Into<Persistable>) -> Result<()> {
        let item = item.into();
        let catalog = self.clone();
        Self::detached(async move {
            let id = item.id();
            let store = catalog.store(item.kind()).await?;
            catalog.require_existing(id, item.kind()).await?;
            store.delete(item).await?;
            catalog.apply(Change::Deleted(id)).await?;
            Ok(())
        })
        .await
    }

    /// Imports the documents of type `T` found in `path`, overwriting existing ids.
    pub async fn import_data<T: Document>(&self, path: impl AsRef<Path>) -> Result<DataImportResult<T>> {
        let result = self.import_kind(path, T::KIND).await?;
        Ok(DataImportResult {
            created: result.created.into_iter().filter_map(|item| T::from_persistable(item).ok()).collect(),
            updated: result.updated.into_iter().filter_map(|item| T::from_persistable(item).ok()).collect(),
        })
    }

    /// Imports the documents of one kind found in `path`, overwriting existing ids.
    ///
    /// Documents whose id belongs to another kind are skipped without being written. Finding
    /// nothing is not an error.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn import_kind(&self, path: impl AsRef<Path>, kind: PersistableKind) -> Result<DataImportResult<Persistable>> {
        let path = path.as_ref().to_path_buf();
        let catalog = self.clone();
        Self::detached(async move {
            let store = catalog.store(kind).await?;
            let options = catalog.import_options(kind, true).await?;
            let result = store.import_data(&path, &options).await?;
            catalog.apply_import(result).await
        })
        .await
    }

    /// Tries the adapter of every registered kind on `path`.
    pub async fn import_all(&self, path: impl AsRef<Path>) -> Result<DataImportResult<Persistable>> {
        let kinds = self.registered_kinds().await?;
        self.import_kinds(path, &kinds).await
    }

    /// Tries the adapters of `kinds` on `path` concurrently. Existing ids are skipped, as are
    /// ids that belong to another kind.
    ///
    /// Succeeds if at least one adapter recognized something and fails with
    /// [`CatalogError::NoFormatRecognized`] if none did. Results of adapters that succeeded are
    /// applied even when another adapter failed; the first failure is then returned.
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub async fn import_kinds(&self, path: impl AsRef<Path>, kinds: &[PersistableKind]) -> Result<DataImportResult<Persistable>> {
        let path = path.as_ref().to_path_buf();
        let kinds = kinds.to_vec();
        let catalog = self.clone();
        Self::detached(async move {
            let mut stores = Vec::with_capacity(kinds.len());
            for kind in kinds {
                let store = catalog.store(kind).await?;
                stores.push((store, catalog.import_options(kind, false).await?));
            }

            let outcomes = join_all(stores.iter().map(|(store, options)| store.import_data(&path, options))).await;

            let mut combined = DataImportResult::default();
            let mut first_error = None;
            for outcome in outcomes {
                match outcome {
                    Ok(result) => combined.extend(result),
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }

            if !combined.is_empty() {
                combined = catalog.apply_import(combined).await?;
            }
            if let Some(e) = first_error {
                return Err(e);
            }
            if combined.is_empty() {
                return Err(CatalogError::NoFormatRecognized(path));
            }
            debug!(created = combined.created.len(), updated = combined.updated.len(), "Import finished");
            Ok(combined)
        })
        .await
    }

    /// Exports `items` into a gzipped tar at `destination`, one directory per kind.
    ///
    /// Every kind's export must succeed; otherwise `destination` is left untouched.
    #[instrument(skip(self, destination, items), fields(destination = %destination.as_ref().display(), count = items.len()))]
    pub async fn export_data(&self, format: ExportFormat, destination: impl AsRef<Path>, items: Vec<Persistable>) -> Result<()> {
        let destination = destination.as_ref().to_path_buf();
        let catalog = self.clone();
        Self::detached(async move {
            if destination.is_dir() {
                return Err(CatalogError::Export(format!("{} is a directory", destination.display())));
            }

            let mut groups: BTreeMap<PersistableKind, Vec<Persistable>> = BTreeMap::new();
            for item in items {
                groups.entry(item.kind()).or_default().push(item);
            }
            let mut exports = Vec::with_capacity(groups.len());
            for (kind, items) in groups {
                exports.push((catalog.store(kind).await?, kind, items));
            }

            let parent = match destination.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            let staging = tempfile::Builder::new().prefix(".lectern-export").tempdir_in(&parent)?;

            try_join_all(exports.into_iter().map(|(store, kind, items)| {
                let group_dir = staging.path().join(kind.dir_name());
                async move { store.export_data(format, &group_dir, items).await }
            }))
            .await?;

            archive::pack_directory(staging.path(), &destination).await?;
            debug!("Export finished");
            Ok(())
        })
        .await
    }

    pub async fn search(&self, criteria: &SearchCriteria) -> Result<SearchResults> {
        Ok(self.inner.index.search(criteria).await?)
    }

    /// Rebuilds the search index from the current document list.
    #[instrument(skip(self))]
    pub async fn reindex(&self) -> Result<()> {
        let catalog = self.clone();
        Self::detached(async move {
            let snapshot = catalog.snapshot().await?;
            let items = snapshot.items.iter().map(Persistable::indexable).collect();
            catalog.inner.index.reindex(items).await?;
            debug!(count = snapshot.len(), "Search index rebuilt");
            Ok(())
        })
        .await
    }

    /// Location of the durable copy of `item`, if its adapter stores one file per document.
    pub async fn file_path(&self, item: &Persistable) -> Result<Option<PathBuf>> {
        self.store(item.kind()).await?.file_path(item)
    }

    /// Constant-time lookup in the snapshot.
    ///
    /// Only valid on the coordinator thread, i.e. inside [`Catalog::on_coordinator`] closures and
    /// change listeners. Fails with [`CatalogError::NotOnCoordinator`] anywhere else.
    pub fn get_persistable_by_id(&self, id: Uuid) -> Result<Option<Persistable>> {
        if !self.is_coordinator() {
            return Err(CatalogError::NotOnCoordinator);
        }
        Ok(coordinator::lookup(id))
    }

    /// Looks `id` up from any thread.
    pub async fn get(&self, id: Uuid) -> Result<Option<Persistable>> {
        self.request(|reply| Command::Get { id, reply }).await
    }

    pub async fn snapshot(&self) -> Result<CatalogSnapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Documents whose dependencies contain `id`.
    pub async fn dependents(&self, id: Uuid) -> Result<Vec<Persistable>> {
        self.request(|reply| Command::Dependents { id, reply }).await
    }

    /// Runs `f` on the coordinator thread after every previously submitted change.
    ///
    /// `f` must not block on other catalog operations; they are answered by the same thread.
    pub async fn on_coordinator<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Catalog) -> R + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let catalog = self.clone();
        let job = Box::new(move || {
            let _ = reply.send(f(&catalog));
        });
        self.inner
            .commands
            .send(Command::Run(job))
            .map_err(|_| CatalogError::CoordinatorStopped)?;
        response.await.map_err(|_| CatalogError::CoordinatorStopped)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Mutex;
    use std::time::Duration;

    use tempfile::tempdir;

    use super::*;
    use crate::archive::read_entries;
    use crate::document::{Bible, Media, MediaType, Show, Slide, Song, Tag};
    use crate::event::{CatalogChanged, Listener};
    use crate::testing::{MemoryAdapter, MemoryIndex, with_id};

    struct Fixture {
        catalog: Catalog,
        index: Arc<MemoryIndex>,
        songs: MemoryAdapter<Song>,
        media: MemoryAdapter<Media>,
        bibles: MemoryAdapter<Bible>,
        slides: MemoryAdapter<Slide>,
    }

    async fn fixture() -> Fixture {
        let index = Arc::new(MemoryIndex::new());
        let catalog = Catalog::new(index.clone()).unwrap();
        let fixture = Fixture {
            catalog,
            index,
            songs: MemoryAdapter::new(),
            media: MemoryAdapter::new(),
            bibles: MemoryAdapter::new(),
            slides: MemoryAdapter::new(),
        };
        fixture.catalog.register_persist_adapter(fixture.songs.clone()).await.unwrap();
        fixture.catalog.register_persist_adapter(fixture.media.clone()).await.unwrap();
        fixture.catalog.register_persist_adapter(fixture.bibles.clone()).await.unwrap();
        fixture.catalog.register_persist_adapter(fixture.slides.clone()).await.unwrap();
        fixture
    }

    fn with_tags<T: Document>(mut item: T, tags: &[&str]) -> T {
        for tag in tags {
            item.header_mut().tags_mut().insert(Tag::new(tag).unwrap());
        }
        item
    }

    async fn assert_consistent(catalog: &Catalog) {
        let snapshot = catalog.snapshot().await.unwrap();
        let ids: BTreeSet<Uuid> = snapshot.ids().into_iter().collect();
        assert_eq!(ids.len(), snapshot.len(), "duplicate ids in the list");
        for item in &snapshot.items {
            assert_eq!(catalog.get(item.id()).await.unwrap().as_ref(), Some(item));
        }
        let union: BTreeSet<Tag> = snapshot.items.iter().flat_map(|i| i.tags().iter().cloned()).collect();
        assert_eq!(snapshot.tags, union);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_register_loads_existing_items() {
        let existing = with_tags(Song::new("Existing"), &["hymn"]);
        let catalog = Catalog::new(Arc::new(MemoryIndex::new())).unwrap();

        let count = catalog
            .register_persist_adapter(MemoryAdapter::with_items(vec![existing.clone()]))
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(catalog.registered_kinds().await.unwrap(), vec![PersistableKind::Song]);
        let snapshot = catalog.snapshot().await.unwrap();
        assert_eq!(snapshot.ids(), vec![existing.id()]);
        assert_eq!(snapshot.tags.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_then_delete_media() {
        let catalog = Catalog::new(Arc::new(MemoryIndex::new())).unwrap();
        catalog.register_persist_adapter(MemoryAdapter::<Media>::new()).await.unwrap();

        let media = with_tags(Media::new("Sunrise", "sunrise.jpg", MediaType::Image), &["nature", "morning"]);
        catalog.create(media.clone()).await.unwrap();

        let snapshot = catalog.snapshot().await.unwrap();
        assert_eq!(snapshot.ids(), vec![media.id()]);
        assert_eq!(&snapshot.tags, media.tags());

        catalog.delete(media.clone()).await.unwrap();
        let snapshot = catalog.snapshot().await.unwrap();
        assert!(snapshot.is_empty());
        assert!(snapshot.tags.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unregistered_kind_fails_immediately() {
        let f = fixture().await;
        let result = f.catalog.create(Show::new("Sunday")).await;
        assert!(matches!(result, Err(CatalogError::UnregisteredType(PersistableKind::Show))));
        assert!(f.catalog.snapshot().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_create_rejects_id_used_by_another_kind() {
        let f = fixture().await;
        let media = f.catalog.create(Media::new("Logo", "logo.png", MediaType::Image)).await.unwrap();

        let song = with_id(Song::new("Clash"), media.id());
        let result = f.catalog.create(song).await;

        assert!(matches!(result, Err(CatalogError::DuplicateId(id)) if id == media.id()));
        assert!(f.songs.items().is_empty());
        assert_consistent(&f.catalog).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_simultaneous_creates_of_one_id_admit_one() {
        let f = fixture().await;
        f.songs.set_delay(Duration::from_millis(50));
        f.media.set_delay(Duration::from_millis(50));
        let media = Media::new("Logo", "logo.png", MediaType::Image);
        let song = with_id(Song::new("Clash"), media.id());

        let (a, b) = tokio::join!(f.catalog.create(media.clone()), f.catalog.create(song));

        let duplicates = [&a, &b]
            .iter()
            .filter(|r| matches!(r, Err(CatalogError::DuplicateId(id)) if *id == media.id()))
            .count();
        assert_eq!(a.is_ok() as usize + b.is_ok() as usize, 1);
        assert_eq!(duplicates, 1);
        assert_eq!(f.songs.contains(media.id()) as usize + f.media.contains(media.id()) as usize, 1);
        assert_eq!(f.catalog.snapshot().await.unwrap().len(), 1);
        assert_consistent(&f.catalog).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_create_releases_its_id() {
        let f = fixture().await;
        let song = Song::new("Retry");
        f.songs.fail_writes(true);
        assert!(f.catalog.create(song.clone()).await.is_err());

        f.songs.fail_writes(false);
        f.catalog.create(song.clone()).await.unwrap();
        assert!(f.songs.contains(song.id()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_create_is_absent_everywhere() {
        let f = fixture().await;
        f.songs.fail_writes(true);

        let song = Song::new("Lost Chord");
        let result = f.catalog.create(song.clone()).await;

        assert!(matches!(result, Err(CatalogError::Adapter(_))));
        assert!(f.catalog.get(song.id()).await.unwrap().is_none());
        assert!(f.catalog.snapshot().await.unwrap().is_empty());
        assert!(f.catalog.search(&SearchCriteria::new("chord")).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_replaces_and_recomputes_tags() {
        let f = fixture().await;
        let song = f.catalog.create(with_tags(Song::new("Draft"), &["draft"])).await.unwrap();
        let other = f.catalog.create(with_tags(Slide::new("Notices"), &["weekly"])).await.unwrap();

        let mut edited = song.clone();
        edited.header_mut().tags_mut().clear();
        edited.header_mut().tags_mut().insert(Tag::new("final").unwrap());
        f.catalog.update(edited).await.unwrap();

        let snapshot = f.catalog.snapshot().await.unwrap();
        assert_eq!(snapshot.ids(), vec![song.id(), other.id()]);
        let tags: Vec<&str> = snapshot.tags.iter().map(Tag::name).collect();
        assert_eq!(tags, vec!["final", "weekly"]);
        assert_consistent(&f.catalog).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_and_delete_of_unknown_id_touch_nothing() {
        let f = fixture().await;
        let stranger = Song::new("Never Created");

        let updated = f.catalog.update(stranger.clone()).await;
        assert!(matches!(updated, Err(CatalogError::NotFound(id)) if id == stranger.id()));
        let deleted = f.catalog.delete(stranger.clone()).await;
        assert!(matches!(deleted, Err(CatalogError::NotFound(id)) if id == stranger.id()));

        assert!(f.songs.items().is_empty());
        assert!(f.catalog.snapshot().await.unwrap().is_empty());
        assert!(f.index.entries().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_update_with_id_of_another_kind_is_rejected() {
        let f = fixture().await;
        let media = f.catalog.create(Media::new("Logo", "logo.png", MediaType::Image)).await.unwrap();

        let result = f.catalog.update(with_id(Song::new("Clash"), media.id())).await;

        assert!(matches!(
            result,
            Err(CatalogError::KindMismatch { expected: PersistableKind::Media, found: PersistableKind::Song })
        ));
        assert!(f.songs.items().is_empty());
        assert_eq!(f.catalog.get(media.id()).await.unwrap().unwrap().kind(), PersistableKind::Media);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_get_persistable_by_id_is_confined_to_coordinator() {
        let f = fixture().await;
        let song = f.catalog.create(Song::new("Confined")).await.unwrap();

        assert!(matches!(f.catalog.get_persistable_by_id(song.id()), Err(CatalogError::NotOnCoordinator)));

        let id = song.id();
        let found = f
            .catalog
            .on_coordinator(move |catalog| catalog.get_persistable_by_id(id))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.map(|item| item.id()), Some(id));

        let handle = f.catalog.clone();
        let from_worker = tokio::spawn(async move { handle.get_persistable_by_id(id) }).await.unwrap();
        assert!(matches!(from_worker, Err(CatalogError::NotOnCoordinator)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_listeners_run_on_coordinator_after_apply() {
        let f = fixture().await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let catalog = f.catalog.clone();
        let _listener = Listener::new(&f.catalog.on().changed, move |change: &CatalogChanged| {
            if let CatalogChanged::Created(id) = change {
                let visible = catalog.get_persistable_by_id(*id).ok().flatten().is_some();
                sink.lock().unwrap().push(visible);
            }
        });

        f.catalog.create(Song::new("Observed")).await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_panicking_listener_leaves_coordinator_running() {
        let f = fixture().await;
        let _listener = Listener::new(&f.catalog.on().changed, |change: &CatalogChanged| {
            if matches!(change, CatalogChanged::Created(_)) {
                panic!("listener failure");
            }
        });

        let first = f.catalog.create(Song::new("First")).await.unwrap();
        let second = f.catalog.create(Song::new("Second")).await.unwrap();

        assert_eq!(f.catalog.snapshot().await.unwrap().ids(), vec![first.id(), second.id()]);
        assert!(f.catalog.get(second.id()).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dropped_future_does_not_cancel_create() {
        let f = fixture().await;
        f.songs.set_delay(Duration::from_millis(50));

        let song = Song::new("Slow");
        let result = tokio::time::timeout(Duration::from_millis(1), f.catalog.create(song.clone())).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(f.songs.contains(song.id()));
        assert!(f.catalog.get(song.id()).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_import_partition() {
        let f = fixture().await;
        let existing = f.catalog.create(Song::new("Old Name")).await.unwrap();

        let mut replacement = existing.clone().downcast::<Song>().unwrap();
        replacement.header_mut().set_name("New Name");
        let new_a = Song::new("New A");
        let new_b = Song::new("New B");
        f.songs.stage_import("hymnal.tgz", vec![replacement, new_a.clone(), new_b.clone()]);

        let result = f.catalog.import_data::<Song>("hymnal.tgz").await.unwrap();
        assert_eq!(result.created.len(), 2);
        assert_eq!(result.updated.len(), 1);

        let snapshot = f.catalog.snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 3);
        let updated = f.catalog.get(existing.id()).await.unwrap().unwrap();
        assert_eq!(updated.name(), "New Name");
        assert_consistent(&f.catalog).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cross_type_sweep() {
        let f = fixture().await;
        let songs = vec![Song::new("One"), Song::new("Two"), Song::new("Three")];
        f.songs.stage_import("mixed.tgz", songs.clone());

        let result = f.catalog.import_all("mixed.tgz").await.unwrap();
        assert_eq!(result.created.len(), 3);
        assert!(result.updated.is_empty());
        let snapshot = f.catalog.snapshot().await.unwrap();
        assert_eq!(snapshot.of_kind(PersistableKind::Song).count(), 3);
        assert!(f.bibles.items().is_empty() && f.media.items().is_empty());

        let result = f.catalog.import_all("unknown.bin").await;
        assert!(matches!(result, Err(CatalogError::NoFormatRecognized(path)) if path == PathBuf::from("unknown.bin")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sweep_never_writes_id_held_by_another_kind() {
        let f = fixture().await;
        let media = f.catalog.create(Media::new("Sunrise Photo", "sunrise.png", MediaType::Image)).await.unwrap();
        f.songs.stage_import("clash.tgz", vec![with_id(Song::new("Sunrise Hymn"), media.id())]);

        let result = f.catalog.import_all("clash.tgz").await;

        assert!(matches!(result, Err(CatalogError::NoFormatRecognized(_))));
        assert!(!f.songs.contains(media.id()));
        assert_eq!(f.catalog.get(media.id()).await.unwrap().unwrap().kind(), PersistableKind::Media);
        let entries = f.index.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, PersistableKind::Media);
        assert_eq!(f.catalog.search(&SearchCriteria::new("sunrise")).await.unwrap().ids(), vec![media.id()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_kind_import_reports_only_what_it_applied() {
        let f = fixture().await;
        let media = f.catalog.create(Media::new("Logo", "logo.png", MediaType::Image)).await.unwrap();
        let fresh = Song::new("Fresh");
        f.songs.stage_import("merge.tgz", vec![with_id(Song::new("Clash"), media.id()), fresh.clone()]);

        let result = f.catalog.import_kind("merge.tgz", PersistableKind::Song).await.unwrap();

        assert_eq!(result.created.iter().map(Persistable::id).collect::<Vec<_>>(), vec![fresh.id()]);
        assert!(result.updated.is_empty());
        assert_eq!(f.songs.items().iter().map(Song::id).collect::<Vec<_>>(), vec![fresh.id()]);
        assert_consistent(&f.catalog).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_registration_leaves_out_id_held_by_another_kind() {
        let f = fixture().await;
        let media = f.catalog.create(Media::new("Logo", "logo.png", MediaType::Image)).await.unwrap();
        let kept = Slide::new("Kept");

        let count = f
            .catalog
            .register_persist_adapter(MemoryAdapter::with_items(vec![with_id(Slide::new("Clash"), media.id()), kept.clone()]))
            .await
            .unwrap();

        assert_eq!(count, 1);
        assert_eq!(f.catalog.get(media.id()).await.unwrap().unwrap().kind(), PersistableKind::Media);
        assert!(f.catalog.get(kept.id()).await.unwrap().is_some());
        assert_consistent(&f.catalog).await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_sweep_does_not_overwrite_existing_ids() {
        let f = fixture().await;
        let existing = f.catalog.create(Song::new("Keep Me")).await.unwrap();
        let mut changed = existing.clone().downcast::<Song>().unwrap();
        changed.header_mut().set_name("Overwritten");
        f.songs.stage_import("again.tgz", vec![changed, Song::new("Extra")]);

        let result = f.catalog.import_all("again.tgz").await.unwrap();
        assert_eq!(result.created.len(), 1);
        assert_eq!(f.catalog.get(existing.id()).await.unwrap().unwrap().name(), "Keep Me");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reindex_is_idempotent() {
        let f = fixture().await;
        f.catalog.create(Song::new("Great Is Thy Faithfulness")).await.unwrap();
        f.catalog.create(Slide::new("Great Notices")).await.unwrap();
        let criteria = SearchCriteria::new("great");

        f.catalog.reindex().await.unwrap();
        let first = f.catalog.search(&criteria).await.unwrap();
        f.catalog.reindex().await.unwrap();
        let second = f.catalog.search(&criteria).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
        assert_eq!(f.index.entries().await.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dependents() {
        let f = fixture().await;
        let background = f.catalog.create(Media::new("Clouds", "clouds.png", MediaType::Image)).await.unwrap();
        let mut slide = Slide::new("Welcome");
        slide.background = Some(background.id());
        let slide = f.catalog.create(slide).await.unwrap();

        let dependents = f.catalog.dependents(background.id()).await.unwrap();
        assert_eq!(dependents.iter().map(Persistable::id).collect::<Vec<_>>(), vec![slide.id()]);
        assert!(f.catalog.dependents(slide.id()).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_export_groups_by_kind_into_archive() {
        let f = fixture().await;
        let song = f.catalog.create(Song::new("Exported Song")).await.unwrap();
        let media = f.catalog.create(Media::new("Exported Media", "m.png", MediaType::Image)).await.unwrap();

        let dir = tempdir().unwrap();
        let destination = dir.path().join("export.tar.gz");
        f.catalog
            .export_data(ExportFormat::Native, &destination, vec![song.clone(), media.clone()])
            .await
            .unwrap();

        let mut paths: Vec<PathBuf> = read_entries(&destination).await.unwrap().into_iter().map(|e| e.path).collect();
        paths.sort();
        assert_eq!(
            paths,
            vec![
                PathBuf::from(format!("media/{}.json", media.id())),
                PathBuf::from(format!("songs/{}.json", song.id())),
            ]
        );
        assert_eq!(f.songs.exports().len(), 1);
        assert_eq!(f.media.exports()[0].ids, vec![media.id()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_group_export_leaves_no_archive() {
        let f = fixture().await;
        let song = f.catalog.create(Song::new("Fine")).await.unwrap();
        let slide = f.catalog.create(Slide::new("Broken")).await.unwrap();
        f.slides.fail_exports(true);

        let dir = tempdir().unwrap();
        let destination = dir.path().join("export.tar.gz");
        let result = f.catalog.export_data(ExportFormat::Native, &destination, vec![song, slide]).await;

        assert!(matches!(result, Err(CatalogError::Adapter(_))));
        assert!(!destination.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_export_of_unregistered_kind_fails() {
        let f = fixture().await;
        let dir = tempdir().unwrap();
        let result = f
            .catalog
            .export_data(ExportFormat::Text, dir.path().join("x.tgz"), vec![Show::new("Unregistered").into()])
            .await;
        assert!(matches!(result, Err(CatalogError::UnregisteredType(PersistableKind::Show))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_creates_stay_consistent() {
        let f = fixture().await;
        let creates = (0..20).map(|n| {
            let catalog = f.catalog.clone();
            async move {
                let song = with_tags(Song::new(format!("Song {n}")), &[if n % 2 == 0 { "even" } else { "odd" }]);
                catalog.create(song).await
            }
        });
        for result in join_all(creates).await {
            result.unwrap();
        }

        assert_eq!(f.catalog.snapshot().await.unwrap().len(), 20);
        assert_eq!(f.songs.items().len(), 20);
        assert_consistent(&f.catalog).await;
    }
}
