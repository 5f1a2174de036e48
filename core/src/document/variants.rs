use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Document, Header, HeaderMut, Persistable, PersistableKind};

/// A bible translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bible {
    header: Header,
    #[serde(default)]
    pub abbreviation: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub books: Vec<BibleBook>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibleBook {
    pub name: String,
    #[serde(default)]
    pub chapters: Vec<BibleChapter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BibleChapter {
    pub number: u32,
    #[serde(default)]
    pub verses: Vec<Verse>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verse {
    pub number: u32,
    pub text: String,
}

impl Bible {
    pub fn new(name: impl Into<String>, abbreviation: impl Into<String>) -> Self {
        Bible {
            header: Header::new(name),
            abbreviation: abbreviation.into(),
            language: String::new(),
            books: Vec::new(),
        }
    }
}

/// Song lyrics with their metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    header: Header,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub copyright: String,
    #[serde(default)]
    pub ccli: Option<u32>,
    #[serde(default)]
    pub sections: Vec<SongSection>,
}

/// A labelled block of lyrics, e.g. "Verse 1" or "Chorus".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongSection {
    pub label: String,
    pub text: String,
}

impl Song {
    pub fn new(name: impl Into<String>) -> Self {
        Song {
            header: Header::new(name),
            author: String::new(),
            copyright: String::new(),
            ccli: None,
            sections: Vec::new(),
        }
    }

    pub fn with_section(mut self, label: impl Into<String>, text: impl Into<String>) -> Self {
        self.sections.push(SongSection { label: label.into(), text: text.into() });
        self
    }
}

/// A free-form slide with optional background media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    header: Header,
    #[serde(default)]
    pub lines: Vec<String>,
    #[serde(default)]
    pub background: Option<Uuid>,
}

impl Slide {
    pub fn new(name: impl Into<String>) -> Self {
        Slide {
            header: Header::new(name),
            lines: Vec::new(),
            background: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
    Audio,
}

/// An image, video or audio file known to the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    header: Header,
    pub source: PathBuf,
    pub media_type: MediaType,
}

impl Media {
    pub fn new(name: impl Into<String>, source: impl Into<PathBuf>, media_type: MediaType) -> Self {
        Media {
            header: Header::new(name),
            source: source.into(),
            media_type,
        }
    }
}

/// An ordered running order of other documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Show {
    header: Header,
    #[serde(default)]
    pub items: Vec<Uuid>,
}

impl Show {
    pub fn new(name: impl Into<String>) -> Self {
        Show {
            header: Header::new(name),
            items: Vec::new(),
        }
    }
}

macro_rules! document_basics {
    ($ty:ident) => {
        fn header(&self) -> &Header {
            &self.header
        }

        fn header_mut(&mut self) -> HeaderMut<'_> {
            HeaderMut::new(&mut self.header)
        }

        fn into_persistable(self) -> Persistable {
            Persistable::$ty(self)
        }

        fn from_persistable(item: Persistable) -> Result<Self, Persistable> {
            match item {
                Persistable::$ty(inner) => Ok(inner),
                other => Err(other),
            }
        }

        fn from_persistable_ref(item: &Persistable) -> Option<&Self> {
            match item {
                Persistable::$ty(inner) => Some(inner),
                _ => None,
            }
        }
    };
}

impl Document for Bible {
    const KIND: PersistableKind = PersistableKind::Bible;
    document_basics!(Bible);

    fn searchable_text(&self) -> String {
        let mut text = self.abbreviation.clone();
        for book in &self.books {
            text.push('\n');
            text.push_str(&book.name);
            for verse in book.chapters.iter().flat_map(|c| &c.verses) {
                text.push('\n');
                text.push_str(&verse.text);
            }
        }
        text
    }
}

impl Document for Song {
    const KIND: PersistableKind = PersistableKind::Song;
    document_basics!(Song);

    fn searchable_text(&self) -> String {
        let mut parts = vec![self.author.as_str()];
        parts.extend(self.sections.iter().map(|s| s.text.as_str()));
        parts.join("\n")
    }
}

impl Document for Slide {
    const KIND: PersistableKind = PersistableKind::Slide;
    document_basics!(Slide);

    fn searchable_text(&self) -> String {
        self.lines.join("\n")
    }

    fn payload_dependencies(&self) -> BTreeSet<Uuid> {
        self.background.into_iter().collect()
    }
}

impl Document for Media {
    const KIND: PersistableKind = PersistableKind::Media;
    document_basics!(Media);

    fn searchable_text(&self) -> String {
        self.source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl Document for Show {
    const KIND: PersistableKind = PersistableKind::Show;
    document_basics!(Show);

    // Shows are found by name only.
    fn searchable_text(&self) -> String {
        String::new()
    }

    fn payload_dependencies(&self) -> BTreeSet<Uuid> {
        self.items.iter().copied().collect()
    }
}
