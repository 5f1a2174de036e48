use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use lectern_core::index::{Indexable, Result, SearchCriteria, SearchHit, SearchIndex, SearchResults};

const INDEX_FILENAME: &str = "index.json";

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("word pattern is valid"));

fn terms(text: &str) -> BTreeSet<String> {
    WORD.find_iter(text).map(|m| m.as_str().to_lowercase()).collect()
}

struct Entry {
    item: Indexable,
    name_terms: BTreeSet<String>,
    terms: BTreeSet<String>,
}

impl Entry {
    fn new(item: Indexable) -> Self {
        let name_terms = terms(&item.name);
        let mut all = terms(&item.text);
        all.extend(name_terms.iter().cloned());
        Entry { item, name_terms, terms: all }
    }
}

#[derive(Default)]
struct State {
    entries: BTreeMap<Uuid, Entry>,
    postings: HashMap<String, BTreeSet<Uuid>>,
}

impl State {
    fn insert(&mut self, item: Indexable) {
        self.remove(item.id);
        let entry = Entry::new(item);
        for term in &entry.terms {
            self.postings.entry(term.clone()).or_default().insert(entry.item.id);
        }
        self.entries.insert(entry.item.id, entry);
    }

    fn remove(&mut self, id: Uuid) {
        let Some(entry) = self.entries.remove(&id) else { return };
        for term in &entry.terms {
            if let Some(ids) = self.postings.get_mut(term) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
    }

    fn items(&self) -> Vec<&Indexable> {
        self.entries.values().map(|entry| &entry.item).collect()
    }
}

/// A word-level inverted index over document projections.
///
/// Each write (index, remove, reindex) is one commit under the write lock. With a backing
/// directory the entries are written to `index.json` as part of the commit.
pub struct InvertedIndex {
    state: RwLock<State>,
    file: Option<PathBuf>,
}

impl InvertedIndex {
    /// An index that is never written to disk.
    pub fn in_memory() -> Self {
        InvertedIndex { state: RwLock::new(State::default()), file: None }
    }

    /// Opens the index persisted in `dir`, creating the directory if needed.
    ///
    /// A missing file gives an empty index. So does a corrupt one, after a warning; the next
    /// reindex repairs it.
    #[instrument(skip(dir), fields(dir = %dir.as_ref().display()))]
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir).await?;
        let file = dir.join(INDEX_FILENAME);

        let mut state = State::default();
        match fs::read(&file).await {
            Ok(bytes) => match serde_json::from_slice::<Vec<Indexable>>(&bytes) {
                Ok(items) => {
                    for item in items {
                        state.insert(item);
                    }
                }
                Err(e) => warn!(path = %file.display(), error = %e, "Ignoring corrupt search index file"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(entries = state.entries.len(), "Search index opened");

        Ok(InvertedIndex { state: RwLock::new(state), file: Some(file) })
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Ids of every indexed document.
    pub async fn ids(&self) -> BTreeSet<Uuid> {
        self.state.read().await.entries.keys().copied().collect()
    }

    async fn persist(&self, state: &State) -> Result<()> {
        let Some(file) = &self.file else { return Ok(()) };
        let json = serde_json::to_vec(&state.items())?;
        let temp = file.with_extension("json.tmp");
        fs::write(&temp, json).await?;
        fs::rename(&temp, file).await?;
        Ok(())
    }
}

#[async_trait]
impl SearchIndex for InvertedIndex {
    async fn reindex(&self, items: Vec<Indexable>) -> Result<()> {
        let mut state = self.state.write().await;
        *state = State::default();
        for item in items {
            state.insert(item);
        }
        self.persist(&state).await
    }

    async fn index(&self, item: Indexable) -> Result<()> {
        let mut state = self.state.write().await;
        state.insert(item);
        self.persist(&state).await
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.entries.contains_key(&id) {
            return Ok(());
        }
        state.remove(id);
        self.persist(&state).await
    }

    async fn search(&self, criteria: &SearchCriteria) -> Result<SearchResults> {
        let query = terms(&criteria.query);
        let state = self.state.read().await;

        let mut hits: Vec<SearchHit> = if query.is_empty() {
            state
                .entries
                .values()
                .filter(|entry| criteria.admits(&entry.item))
                .map(|entry| hit(entry, 0))
                .collect()
        } else {
            let candidates: BTreeSet<Uuid> = query
                .iter()
                .filter_map(|term| state.postings.get(term))
                .flatten()
                .copied()
                .collect();
            candidates
                .iter()
                .filter_map(|id| state.entries.get(id))
                .filter(|entry| criteria.admits(&entry.item))
                .filter_map(|entry| {
                    let in_text = query.iter().filter(|term| entry.terms.contains(*term)).count();
                    let in_name = query.iter().filter(|term| entry.name_terms.contains(*term)).count();
                    let score = (in_text + in_name) as u32;
                    (score > 0).then(|| hit(entry, score))
                })
                .collect()
        };

        hits.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.name.cmp(&b.name))
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(criteria.limit);
        Ok(SearchResults { hits })
    }
}

fn hit(entry: &Entry, score: u32) -> SearchHit {
    SearchHit {
        id: entry.item.id,
        kind: entry.item.kind,
        name: entry.item.name.clone(),
        score,
    }
}
