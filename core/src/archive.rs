//! Gzipped tar archives used for multi-kind exports and archive imports.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, instrument};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// Entry sizes come from the archive header and are not trusted for allocation.
const MAX_PREALLOCATION: u64 = 1 << 20;

/// One regular file read from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path inside the archive, relative to its root.
    pub path: PathBuf,
    pub contents: Vec<u8>,
}

/// Packs every file below `source` into a gzipped tar at `destination`.
///
/// The archive is written to a temporary file next to `destination` and renamed into place, so
/// `destination` is either the complete archive or untouched.
#[instrument(skip_all, fields(source = %source.display(), destination = %destination.display()))]
pub async fn pack_directory(source: &Path, destination: &Path) -> io::Result<()> {
    let source = source.to_path_buf();
    let destination = destination.to_path_buf();
    tokio::task::spawn_blocking(move || pack_blocking(&source, &destination))
        .await
        .map_err(io::Error::other)?
}

fn pack_blocking(source: &Path, destination: &Path) -> io::Result<()> {
    let parent = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let temp = tempfile::NamedTempFile::new_in(parent)?;

    let encoder = GzEncoder::new(BufWriter::new(temp.as_file()), Compression::default());
    let mut tar = tar::Builder::new(encoder);
    tar.follow_symlinks(false);
    tar.append_dir_all("", source)?;
    let mut writer = tar.into_inner()?.finish()?;
    writer.flush()?;
    drop(writer);

    temp.as_file().sync_all()?;
    temp.persist(destination).map_err(|e| e.error)?;
    debug!("Archive written");
    Ok(())
}

/// Reads every regular file of the gzipped tar at `archive` into memory.
#[instrument(skip_all, fields(archive = %archive.display()))]
pub async fn read_entries(archive: &Path) -> io::Result<Vec<ArchiveEntry>> {
    let archive = archive.to_path_buf();
    tokio::task::spawn_blocking(move || read_blocking(&archive))
        .await
        .map_err(io::Error::other)?
}

fn read_blocking(archive: &Path) -> io::Result<Vec<ArchiveEntry>> {
    let decoder = GzDecoder::new(BufReader::new(File::open(archive)?));
    let mut tar = tar::Archive::new(decoder);

    let mut entries = Vec::new();
    for entry in tar.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.into_owned();
        let mut contents = Vec::with_capacity(entry.size().min(MAX_PREALLOCATION) as usize);
        entry.read_to_end(&mut contents)?;
        entries.push(ArchiveEntry { path, contents });
    }
    debug!(count = entries.len(), "Archive read");
    Ok(entries)
}

/// Whether `path` starts with the gzip magic bytes. Unreadable files are not archives.
pub async fn is_archive(path: &Path) -> bool {
    let mut magic = [0u8; 2];
    match tokio::fs::File::open(path).await {
        Ok(mut file) => {
            use tokio::io::AsyncReadExt;
            file.read_exact(&mut magic).await.is_ok() && magic == GZIP_MAGIC
        }
        Err(_) => false,
    }
}
