use std::path::{Path, PathBuf};

use crate::document::PersistableKind;

use super::{INDEX_DIR_NAME, WORKSPACE_CONFIG_FILENAME};

/// Canonical locations inside a workspace root.
///
/// Pure path arithmetic; nothing here touches the filesystem. The same root always yields the
/// same paths, so callers may keep the resolved paths around.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspacePaths {
    root: PathBuf,
}

impl WorkspacePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        WorkspacePaths { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(WORKSPACE_CONFIG_FILENAME)
    }

    /// Directory the search index persists into.
    pub fn index_dir(&self) -> PathBuf {
        self.root.join(INDEX_DIR_NAME)
    }

    /// Directory holding the documents of `kind`.
    pub fn kind_dir(&self, kind: PersistableKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    pub fn bibles(&self) -> PathBuf {
        self.kind_dir(PersistableKind::Bible)
    }

    pub fn songs(&self) -> PathBuf {
        self.kind_dir(PersistableKind::Song)
    }

    pub fn slides(&self) -> PathBuf {
        self.kind_dir(PersistableKind::Slide)
    }

    pub fn media(&self) -> PathBuf {
        self.kind_dir(PersistableKind::Media)
    }

    pub fn shows(&self) -> PathBuf {
        self.kind_dir(PersistableKind::Show)
    }

    /// Every directory a workspace consists of: one per kind plus the index directory.
    pub fn directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<_> = PersistableKind::ALL.into_iter().map(|kind| self.kind_dir(kind)).collect();
        dirs.push(self.index_dir());
        dirs
    }
}
