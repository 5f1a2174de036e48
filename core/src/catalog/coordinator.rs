//! The coordinating thread and the global state it owns.
//!
//! The lookup map, the ordered list and the tag set live in a thread local of the coordinator
//! thread. Nothing else can reach them; every other thread sends a [`Command`] and waits for the
//! reply.
//!
//! An id belongs to at most one document. Creates reserve their id here before writing, and
//! imports are told which ids they may not take, so two kinds never end up holding the same id.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::document::{Persistable, PersistableKind, Tag};
use crate::event::{CatalogChanged, CatalogEvents};
use crate::persist::{DataImportResult, ErasedStore};

pub(super) const THREAD_NAME: &str = "catalog-coordinator";

/// A consistent copy of the catalog's documents and tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogSnapshot {
    pub items: Vec<Persistable>,
    pub tags: BTreeSet<Tag>,
}

impl CatalogSnapshot {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn ids(&self) -> Vec<Uuid> {
        self.items.iter().map(Persistable::id).collect()
    }

    pub fn of_kind(&self, kind: PersistableKind) -> impl Iterator<Item = &Persistable> {
        self.items.iter().filter(move |item| item.kind() == kind)
    }
}

/// A durable change to fold into the global state.
pub(super) enum Change {
    Registered(PersistableKind, Vec<Persistable>),
    Created(Persistable),
    Updated(Persistable),
    Deleted(Uuid),
    Imported(DataImportResult<Persistable>),
}

pub(super) enum Command {
    Register { store: Arc<dyn ErasedStore>, reply: oneshot::Sender<()> },
    Store { kind: PersistableKind, reply: oneshot::Sender<Option<Arc<dyn ErasedStore>>> },
    Kinds { reply: oneshot::Sender<Vec<PersistableKind>> },
    /// Claims `id` for a create that is about to write. Fails if a document or another pending
    /// create already holds it.
    Reserve { id: Uuid, reply: oneshot::Sender<bool> },
    /// Gives up a reservation whose write failed.
    Release { id: Uuid },
    /// Ids a document of `kind` may not take: those of other kinds and those reserved.
    Claimed { kind: PersistableKind, reply: oneshot::Sender<HashSet<Uuid>> },
    Apply { change: Change, reply: oneshot::Sender<CatalogChanged> },
    Snapshot { reply: oneshot::Sender<CatalogSnapshot> },
    Get { id: Uuid, reply: oneshot::Sender<Option<Persistable>> },
    Dependents { id: Uuid, reply: oneshot::Sender<Vec<Persistable>> },
    Run(Box<dyn FnOnce() + Send>),
}

#[derive(Default)]
pub(super) struct CatalogState {
    stores: HashMap<PersistableKind, Arc<dyn ErasedStore>>,
    lookup: HashMap<Uuid, Persistable>,
    list: Vec<Persistable>,
    tags: BTreeSet<Tag>,
    pending: HashSet<Uuid>,
}

thread_local! {
    static STATE: RefCell<CatalogState> = RefCell::new(CatalogState::default());
}

/// Starts the coordinator thread. It runs until every sender of `commands` is dropped.
pub(super) fn spawn(
    commands: mpsc::UnboundedReceiver<Command>,
    events: Arc<CatalogEvents>,
) -> std::io::Result<ThreadId> {
    let handle = thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || run(commands, events))?;
    Ok(handle.thread().id())
}

fn run(mut commands: mpsc::UnboundedReceiver<Command>, events: Arc<CatalogEvents>) {
    debug!("Catalog coordinator started");

    while let Some(command) = commands.blocking_recv() {
        match command {
            Command::Run(job) => {
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("A closure run on the catalog coordinator panicked");
                }
            }
            Command::Apply { change, reply } => {
                let mut event = with_state_mut(|state| state.apply(change));
                if catch_unwind(AssertUnwindSafe(|| events.changed.dispatch(&mut event))).is_err() {
                    error!(?event, "A catalog listener panicked");
                }
                let _ = reply.send(event);
            }
            Command::Register { store, reply } => {
                with_state_mut(|state| {
                    state.stores.insert(store.kind(), store);
                });
                let _ = reply.send(());
            }
            Command::Store { kind, reply } => {
                let _ = reply.send(with_state(|state| state.stores.get(&kind).cloned()));
            }
            Command::Kinds { reply } => {
                let _ = reply.send(with_state(|state| {
                    let mut kinds: Vec<_> = state.stores.keys().copied().collect();
                    kinds.sort();
                    kinds
                }));
            }
            Command::Reserve { id, reply } => {
                let _ = reply.send(with_state_mut(|state| state.reserve(id)));
            }
            Command::Release { id } => {
                with_state_mut(|state| {
                    state.pending.remove(&id);
                });
            }
            Command::Claimed { kind, reply } => {
                let _ = reply.send(with_state(|state| state.claimed(kind)));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(with_state(CatalogState::snapshot));
            }
            Command::Get { id, reply } => {
                let _ = reply.send(with_state(|state| state.lookup.get(&id).cloned()));
            }
            Command::Dependents { id, reply } => {
                let _ = reply.send(with_state(|state| state.dependents(id)));
            }
        }
    }

    with_state_mut(|state| *state = CatalogState::default());
    debug!("Catalog coordinator stopped");
}

fn with_state<R>(f: impl FnOnce(&CatalogState) -> R) -> R {
    STATE.with(|state| f(&state.borrow()))
}

fn with_state_mut<R>(f: impl FnOnce(&mut CatalogState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

/// Looks `id` up in the state owned by the current thread. Only meaningful on the coordinator.
pub(super) fn lookup(id: Uuid) -> Option<Persistable> {
    with_state(|state| state.lookup.get(&id).cloned())
}

impl CatalogState {
    fn apply(&mut self, change: Change) -> CatalogChanged {
        match change {
            Change::Registered(kind, items) => {
                let mut count = 0;
                for item in items {
                    if let Some(holder) = self.holder_of_other_kind(&item) {
                        warn!(
                            id = %item.id(),
                            existing = %holder,
                            loaded = %item.kind(),
                            "Ignoring loaded document whose id belongs to another kind"
                        );
                        continue;
                    }
                    self.upsert(item);
                    count += 1;
                }
                self.recompute_tags();
                CatalogChanged::Registered { kind, count }
            }
            Change::Created(item) => {
                let id = item.id();
                self.pending.remove(&id);
                self.tags.extend(item.tags().iter().cloned());
                self.upsert(item);
                CatalogChanged::Created(id)
            }
            Change::Updated(item) => {
                let id = item.id();
                self.upsert(item);
                self.recompute_tags();
                CatalogChanged::Updated(id)
            }
            Change::Deleted(id) => {
                if self.lookup.remove(&id).is_some() {
                    self.list.retain(|item| item.id() != id);
                }
                self.recompute_tags();
                CatalogChanged::Deleted(id)
            }
            Change::Imported(result) => {
                let created = self.fold_imported(result.created);
                let updated = self.fold_imported(result.updated);
                self.recompute_tags();
                CatalogChanged::Imported { created, updated }
            }
        }
    }

    fn fold_imported(&mut self, items: Vec<Persistable>) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            if let Some(holder) = self.holder_of_other_kind(&item) {
                warn!(
                    id = %item.id(),
                    existing = %holder,
                    imported = %item.kind(),
                    "Skipping imported document whose id belongs to another kind"
                );
                continue;
            }
            ids.push(item.id());
            self.upsert(item);
        }
        ids
    }

    fn holder_of_other_kind(&self, item: &Persistable) -> Option<PersistableKind> {
        self.lookup
            .get(&item.id())
            .map(Persistable::kind)
            .filter(|kind| *kind != item.kind())
    }

    fn reserve(&mut self, id: Uuid) -> bool {
        !self.lookup.contains_key(&id) && self.pending.insert(id)
    }

    fn claimed(&self, kind: PersistableKind) -> HashSet<Uuid> {
        self.lookup
            .values()
            .filter(|item| item.kind() != kind)
            .map(Persistable::id)
            .chain(self.pending.iter().copied())
            .collect()
    }

    /// Replaces the entry with the same id in place, or appends.
    fn upsert(&mut self, item: Persistable) {
        let id = item.id();
        match self.list.iter_mut().find(|existing| existing.id() == id) {
            Some(existing) => *existing = item.clone(),
            None => self.list.push(item.clone()),
        }
        self.lookup.insert(id, item);
    }

    fn recompute_tags(&mut self) {
        self.tags = self.list.iter().flat_map(|item| item.tags().iter().cloned()).collect();
    }

    fn snapshot(&self) -> CatalogSnapshot {
        CatalogSnapshot { items: self.list.clone(), tags: self.tags.clone() }
    }

    fn dependents(&self, id: Uuid) -> Vec<Persistable> {
        self.list
            .iter()
            .filter(|item| item.id() != id && item.dependencies().contains(&id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Document, Media, MediaType, Show, Song};
    use crate::testing::with_id;

    fn tagged(mut song: Song, tags: &[&str]) -> Persistable {
        for tag in tags {
            song.header_mut().tags_mut().insert(tag.parse().unwrap());
        }
        song.into()
    }

    fn tag_names(state: &CatalogState) -> Vec<&str> {
        state.tags.iter().map(Tag::name).collect()
    }

    fn assert_consistent(state: &CatalogState) {
        assert_eq!(state.lookup.len(), state.list.len());
        for item in &state.list {
            assert_eq!(state.lookup.get(&item.id()), Some(item));
        }
        let union: BTreeSet<Tag> = state.list.iter().flat_map(|i| i.tags().iter().cloned()).collect();
        assert_eq!(state.tags, union);
    }

    #[test]
    fn test_tags_shrink_when_last_user_is_deleted() {
        let mut state = CatalogState::default();
        let a = tagged(Song::new("A"), &["hymn", "easter"]);
        let b = tagged(Song::new("B"), &["hymn"]);
        state.apply(Change::Created(a.clone()));
        state.apply(Change::Created(b.clone()));
        assert_eq!(tag_names(&state), vec!["easter", "hymn"]);

        state.apply(Change::Deleted(a.id()));
        assert_eq!(tag_names(&state), vec!["hymn"]);
        assert_consistent(&state);

        state.apply(Change::Deleted(b.id()));
        assert!(state.tags.is_empty());
        assert!(state.list.is_empty());
    }

    #[test]
    fn test_update_replaces_in_place_and_drops_unused_tags() {
        let mut state = CatalogState::default();
        let first = tagged(Song::new("First"), &["draft"]);
        let second = tagged(Song::new("Second"), &[]);
        state.apply(Change::Created(first.clone()));
        state.apply(Change::Created(second.clone()));

        let mut edited = first.clone();
        edited.header_mut().tags_mut().clear();
        edited.header_mut().set_name("First (final)");
        let event = state.apply(Change::Updated(edited));

        assert_eq!(event, CatalogChanged::Updated(first.id()));
        assert_eq!(state.list[0].name(), "First (final)");
        assert_eq!(state.list[1].id(), second.id());
        assert!(state.tags.is_empty());
        assert_consistent(&state);
    }

    #[test]
    fn test_import_skips_id_held_by_another_kind() {
        let mut state = CatalogState::default();
        let media = Media::new("Logo", "logo.png", MediaType::Image);
        state.apply(Change::Created(media.clone().into()));

        let impostor = with_id(Song::new("Impostor"), media.id());
        let fresh = Song::new("Fresh");
        let event = state.apply(Change::Imported(DataImportResult {
            created: vec![fresh.clone().into()],
            updated: vec![impostor.into()],
        }));

        assert_eq!(event, CatalogChanged::Imported { created: vec![fresh.id()], updated: vec![] });
        assert_eq!(state.lookup[&media.id()].kind(), PersistableKind::Media);
        assert_eq!(state.list.len(), 2);
        assert_consistent(&state);
    }

    #[test]
    fn test_registration_ignores_id_held_by_another_kind() {
        let mut state = CatalogState::default();
        let media = Media::new("Logo", "logo.png", MediaType::Image);
        state.apply(Change::Registered(PersistableKind::Media, vec![media.clone().into()]));

        let clash = tagged(with_id(Song::new("Clash"), media.id()), &["hymn"]);
        let other = Song::new("Other");
        let event = state.apply(Change::Registered(
            PersistableKind::Song,
            vec![clash, other.clone().into()],
        ));

        assert_eq!(event, CatalogChanged::Registered { kind: PersistableKind::Song, count: 1 });
        assert_eq!(state.lookup[&media.id()].kind(), PersistableKind::Media);
        assert_eq!(state.list.len(), 2);
        assert!(state.tags.is_empty());
        assert_consistent(&state);
    }

    #[test]
    fn test_reservation_blocks_known_and_pending_ids() {
        let mut state = CatalogState::default();
        let song = Song::new("Stored");
        state.apply(Change::Created(song.clone().into()));
        assert!(!state.reserve(song.id()));

        let id = Uuid::new_v4();
        assert!(state.reserve(id));
        assert!(!state.reserve(id));
        assert!(state.claimed(PersistableKind::Song).contains(&id));
        assert!(!state.claimed(PersistableKind::Song).contains(&song.id()));
        assert!(state.claimed(PersistableKind::Media).contains(&song.id()));

        state.apply(Change::Created(with_id(Song::new("Reserved"), id).into()));
        assert!(state.pending.is_empty());
        assert!(!state.reserve(id));
        assert_consistent(&state);
    }

    #[test]
    fn test_dependents_scan_the_list() {
        let mut state = CatalogState::default();
        let song = Song::new("Opening");
        let mut show = Show::new("Sunday");
        show.items.push(song.id());
        state.apply(Change::Created(song.clone().into()));
        state.apply(Change::Created(show.clone().into()));

        let dependents = state.dependents(song.id());
        assert_eq!(dependents.len(), 1);
        assert_eq!(dependents[0].id(), show.id());
        assert!(state.dependents(show.id()).is_empty());
    }
}
