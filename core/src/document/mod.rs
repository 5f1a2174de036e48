//! The persistable documents of a workspace.
//!
//! Every document type (bibles, songs, slides, media and shows) shares a common [`Header`] and
//! implements the [`Document`] capability trait. The closed set of types is also represented by
//! the [`Persistable`] enum, which is what the catalog stores and hands out. Routing an item to
//! the store responsible for it only requires its [`PersistableKind`]; no downcasting is needed.
//!
//! Cloning a document (Rust's `Clone`) is the "copy before edit" capability: the catalog only
//! ever hands out owned copies, so edits to a copy are invisible until it is passed to
//! `Catalog::update`.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::index::Indexable;

pub use self::tag::{EmptyTagName, Tag};
pub use self::variants::{Bible, BibleBook, BibleChapter, Media, MediaType, Show, Slide, Song, SongSection, Verse};

mod tag;
mod variants;

/// Discriminant of the document variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistableKind {
    Bible,
    Song,
    Slide,
    Media,
    Show,
}

impl PersistableKind {
    pub const ALL: [PersistableKind; 5] = [
        PersistableKind::Bible,
        PersistableKind::Song,
        PersistableKind::Slide,
        PersistableKind::Media,
        PersistableKind::Show,
    ];

    /// Name of the workspace subdirectory holding documents of this kind.
    pub fn dir_name(self) -> &'static str {
        match self {
            PersistableKind::Bible => "bibles",
            PersistableKind::Song => "songs",
            PersistableKind::Slide => "slides",
            PersistableKind::Media => "media",
            PersistableKind::Show => "shows",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PersistableKind::Bible => "bible",
            PersistableKind::Song => "song",
            PersistableKind::Slide => "slide",
            PersistableKind::Media => "media",
            PersistableKind::Show => "show",
        }
    }
}

impl fmt::Display for PersistableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown document kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for PersistableKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        PersistableKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lower || kind.dir_name() == lower)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

/// Fields shared by every document type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    id: Uuid,
    name: String,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    #[serde(default)]
    tags: BTreeSet<Tag>,
    // Explicit references only; payload references are added by `Document::dependencies`.
    #[serde(default)]
    dependencies: BTreeSet<Uuid>,
}

impl Header {
    /// Creates a header with a fresh id and both timestamps set to now.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    pub fn with_id(id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Header {
            id,
            name: name.into(),
            created: now,
            modified: now,
            tags: BTreeSet::new(),
            dependencies: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    pub fn tags_mut(&mut self) -> &mut BTreeSet<Tag> {
        &mut self.tags
    }

    pub fn dependencies(&self) -> &BTreeSet<Uuid> {
        &self.dependencies
    }

    pub fn dependencies_mut(&mut self) -> &mut BTreeSet<Uuid> {
        &mut self.dependencies
    }

    /// Records a successful write at `now`. `modified` never moves backwards.
    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.modified {
            self.modified = now;
        }
    }

    /// Carries the creation date and last modification date over from the stored version of the
    /// same document, so an update cannot rewind either of them.
    pub(crate) fn inherit_dates(&mut self, previous: &Header) {
        self.created = previous.created;
        if previous.modified > self.modified {
            self.modified = previous.modified;
        }
    }
}

/// Mutable access to the editable fields of a document's header.
///
/// The id and the creation date are fixed once a document exists, so the header as a whole is
/// never handed out mutably.
#[derive(Debug)]
pub struct HeaderMut<'a>(&'a mut Header);

impl<'a> HeaderMut<'a> {
    pub(crate) fn new(header: &'a mut Header) -> Self {
        HeaderMut(header)
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.0.set_name(name);
    }

    pub fn tags_mut(&mut self) -> &mut BTreeSet<Tag> {
        self.0.tags_mut()
    }

    pub fn dependencies_mut(&mut self) -> &mut BTreeSet<Uuid> {
        self.0.dependencies_mut()
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.0.touch(now);
    }

    pub(crate) fn inherit_dates(&mut self, previous: &Header) {
        self.0.inherit_dates(previous);
    }

    #[cfg(any(test, feature = "test_utils"))]
    pub(crate) fn reassign_id(&mut self, id: Uuid) {
        self.0.id = id;
    }
}

/// Capability interface implemented by every document type.
pub trait Document: Clone + fmt::Debug + Send + Sync + 'static {
    const KIND: PersistableKind;

    fn header(&self) -> &Header;
    fn header_mut(&mut self) -> HeaderMut<'_>;

    /// Text fed to the search index in addition to the name.
    fn searchable_text(&self) -> String;

    /// Ids referenced by the type-specific payload (e.g. a slide's background media).
    fn payload_dependencies(&self) -> BTreeSet<Uuid> {
        BTreeSet::new()
    }

    fn into_persistable(self) -> Persistable;

    /// Unwraps the matching variant, handing the value back if the kind differs.
    fn from_persistable(item: Persistable) -> Result<Self, Persistable>;

    fn from_persistable_ref(item: &Persistable) -> Option<&Self>;

    fn id(&self) -> Uuid {
        self.header().id()
    }

    fn name(&self) -> &str {
        self.header().name()
    }

    fn tags(&self) -> &BTreeSet<Tag> {
        self.header().tags()
    }

    /// All ids this document references.
    fn dependencies(&self) -> BTreeSet<Uuid> {
        let mut deps = self.header().dependencies().clone();
        deps.extend(self.payload_dependencies());
        deps
    }

    /// Projects the document for the search index.
    fn indexable(&self) -> Indexable {
        Indexable {
            id: self.id(),
            kind: Self::KIND,
            name: self.name().to_string(),
            text: self.searchable_text(),
            tags: self.tags().clone(),
        }
    }
}

/// Any document of the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Persistable {
    Bible(Bible),
    Song(Song),
    Slide(Slide),
    Media(Media),
    Show(Show),
}

macro_rules! dispatch {
    ($self:expr, $item:ident => $body:expr) => {
        match $self {
            Persistable::Bible($item) => $body,
            Persistable::Song($item) => $body,
            Persistable::Slide($item) => $body,
            Persistable::Media($item) => $body,
            Persistable::Show($item) => $body,
        }
    };
}

impl Persistable {
    pub fn kind(&self) -> PersistableKind {
        match self {
            Persistable::Bible(_) => PersistableKind::Bible,
            Persistable::Song(_) => PersistableKind::Song,
            Persistable::Slide(_) => PersistableKind::Slide,
            Persistable::Media(_) => PersistableKind::Media,
            Persistable::Show(_) => PersistableKind::Show,
        }
    }

    pub fn header(&self) -> &Header {
        dispatch!(self, item => item.header())
    }

    pub fn header_mut(&mut self) -> HeaderMut<'_> {
        dispatch!(self, item => item.header_mut())
    }

    pub fn id(&self) -> Uuid {
        self.header().id()
    }

    pub fn name(&self) -> &str {
        self.header().name()
    }

    pub fn tags(&self) -> &BTreeSet<Tag> {
        self.header().tags()
    }

    pub fn dependencies(&self) -> BTreeSet<Uuid> {
        dispatch!(self, item => item.dependencies())
    }

    pub fn searchable_text(&self) -> String {
        dispatch!(self, item => item.searchable_text())
    }

    pub fn indexable(&self) -> Indexable {
        dispatch!(self, item => item.indexable())
    }

    /// Returns the concrete document if it is of type `T`.
    pub fn downcast<T: Document>(self) -> Result<T, Persistable> {
        T::from_persistable(self)
    }
}

macro_rules! impl_from_variant {
    ($($ty:ident),*) => {
        $(
            impl From<$ty> for Persistable {
                fn from(item: $ty) -> Self {
                    Persistable::$ty(item)
                }
            }
        )*
    };
}

impl_from_variant!(Bible, Song, Slide, Media, Show);
