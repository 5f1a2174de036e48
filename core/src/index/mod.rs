//! Contract for the full-text search index shared by all stores.
//!
//! The index only ever sees [`Indexable`] projections of documents. Implementations must accept
//! concurrent writes coming from several stores and must keep readers responsive while a write is
//! in progress: a search may wait for at most one commit.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use std::error::Error as StdError;
use uuid::Uuid;

use crate::document::{PersistableKind, Tag};

/// Read-only, type-erased view of a document sufficient for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Indexable {
    pub id: Uuid,
    pub kind: PersistableKind,
    pub name: String,
    pub text: String,
    #[serde(default)]
    pub tags: BTreeSet<Tag>,
}

/// What to look for.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchCriteria {
    /// Free text. May be empty when only filtering by kind or tag.
    pub query: String,
    /// Restrict hits to these kinds. `None` means all kinds.
    pub kinds: Option<BTreeSet<PersistableKind>>,
    /// Every hit must carry all of these tags.
    pub tags: BTreeSet<Tag>,
    pub limit: usize,
}

impl SearchCriteria {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn new(query: impl Into<String>) -> Self {
        SearchCriteria {
            query: query.into(),
            kinds: None,
            tags: BTreeSet::new(),
            limit: Self::DEFAULT_LIMIT,
        }
    }

    pub fn with_kind(mut self, kind: PersistableKind) -> Self {
        self.kinds.get_or_insert_with(BTreeSet::new).insert(kind);
        self
    }

    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tags.insert(tag);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether the kind and tag filters admit `item`.
    pub fn admits(&self, item: &Indexable) -> bool {
        let kind_ok = self.kinds.as_ref().is_none_or(|kinds| kinds.contains(&item.kind));
        kind_ok && self.tags.is_subset(&item.tags)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub kind: PersistableKind,
    pub name: String,
    pub score: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub hits: Vec<SearchHit>,
}

impl SearchResults {
    pub fn ids(&self) -> Vec<Uuid> {
        self.hits.iter().map(|hit| hit.id).collect()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index IO error")]
    Io(#[from] std::io::Error),

    #[error("Index serialization error")]
    Serialization(#[from] serde_json::Error),

    /// An error specific to the index implementation.
    #[error("Index error: {0}")]
    Other(#[source] Box<dyn StdError + Send + Sync>),
}

pub type Result<T> = std::result::Result<T, IndexError>;

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Replaces the entire contents of the index.
    async fn reindex(&self, items: Vec<Indexable>) -> Result<()>;

    /// Inserts the item, replacing any entry with the same id.
    async fn index(&self, item: Indexable) -> Result<()>;

    /// Removes the entry with the given id. Removing an unknown id is not an error.
    async fn remove(&self, id: Uuid) -> Result<()>;

    async fn search(&self, criteria: &SearchCriteria) -> Result<SearchResults>;
}
