use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use console::style;
use dialoguer::Confirm;
use tracing::{debug, info};
use uuid::Uuid;

use crate::AppContext;
use crate::cli::{
    DeleteArgs, ExportArgs, ImportArgs, ListArgs, NewArgs, SearchArgs, ShowArgs, TagArgs, WorkspaceArgs,
    WorkspaceCommands,
};
use lectern_core::catalog::Catalog;
use lectern_core::document::{Bible, Media, MediaType, Persistable, PersistableKind, Show, Slide, Song};
use lectern_core::index::SearchCriteria;
use lectern_core::persist::DataImportResult;
use lectern_core::storage::Workspace;

const WRAP_WIDTH: usize = 80;

pub async fn handle_workspace(args: WorkspaceArgs, cx: AppContext) -> Result<()> {
    match args.command {
        WorkspaceCommands::Create { path, name } => {
            if path.is_none() && cx.workspace.is_ok() {
                bail!("Cannot create a new workspace while in an existing one.");
            }
            let target = match path {
                Some(path) => path,
                None => std::env::current_dir()?,
            };
            info!("Creating workspace at: {}", target.display());
            let workspace = Workspace::create(&target, name).await?;
            println!("Created workspace {} at {}", style(workspace.name()).bold(), workspace.path().display());
        }
        WorkspaceCommands::Info => {
            let workspace = cx.workspace()?;
            let catalog = cx.catalog().await?;
            let snapshot = catalog.snapshot().await?;

            println!("Workspace: {}", style(workspace.name()).bold());
            println!("  Path: {}", workspace.path().display());
            println!("  ID: {}", workspace.config().id);
            println!("  Export format: {}", workspace.config().export_format);
            for kind in PersistableKind::ALL {
                println!("  {:<8} {}", format!("{}:", kind.dir_name()), snapshot.of_kind(kind).count());
            }
            println!("  Tags: {}", snapshot.tags.len());
        }
        WorkspaceCommands::Set { name, export_format } => {
            let mut workspace = cx.workspace?;
            let mut config = workspace.config().clone();
            if let Some(name) = name {
                config.name = name;
            }
            if let Some(format) = export_format {
                config.export_format = format;
            }
            workspace.save_config(config).await?;
            println!("Updated workspace {}", style(workspace.name()).bold());
        }
    }
    Ok(())
}

pub async fn handle_list(args: ListArgs, cx: AppContext) -> Result<()> {
    let snapshot = cx.catalog().await?.snapshot().await?;
    let items = snapshot
        .items
        .iter()
        .filter(|item| args.kind.is_none_or(|kind| item.kind() == kind))
        .filter(|item| args.tag.as_ref().is_none_or(|tag| item.tags().contains(tag)));

    let mut count = 0;
    for item in items {
        print_summary(item);
        count += 1;
    }
    if count == 0 {
        println!("No documents found.");
    }
    Ok(())
}

pub async fn handle_tags(cx: AppContext) -> Result<()> {
    let snapshot = cx.catalog().await?.snapshot().await?;
    let mut usage: BTreeMap<&str, usize> = snapshot.tags.iter().map(|tag| (tag.name(), 0)).collect();
    for tag in snapshot.items.iter().flat_map(Persistable::tags) {
        if let Some(count) = usage.get_mut(tag.name()) {
            *count += 1;
        }
    }
    for (tag, count) in usage {
        println!("{tag} ({count})");
    }
    Ok(())
}

pub async fn handle_show(args: ShowArgs, cx: AppContext) -> Result<()> {
    let catalog = cx.catalog().await?;
    let item = require(&catalog, args.id).await?;
    let header = item.header();

    println!("{}", style(item.name()).bold());
    println!("  Kind: {}", item.kind());
    println!("  ID: {}", item.id());
    println!("  Created: {}", header.created().to_rfc3339());
    println!("  Modified: {}", header.modified().to_rfc3339());
    if !item.tags().is_empty() {
        println!("  Tags: {}", join(item.tags().iter().map(|tag| tag.name().to_string())));
    }
    if let Some(path) = catalog.file_path(&item).await? {
        println!("  File: {}", path.display());
    }
    let dependencies = item.dependencies();
    if !dependencies.is_empty() {
        println!("  References: {}", join(dependencies.iter().map(Uuid::to_string)));
    }
    let dependents = catalog.dependents(item.id()).await?;
    if !dependents.is_empty() {
        println!("  Referenced by: {}", join(dependents.iter().map(|d| format!("{} ({})", d.name(), d.id()))));
    }

    let text = item.searchable_text();
    if !text.trim().is_empty() {
        println!();
        for line in text.lines() {
            println!("{}", textwrap::fill(line, WRAP_WIDTH));
        }
    }
    Ok(())
}

pub async fn handle_new(args: NewArgs, cx: AppContext) -> Result<()> {
    let catalog = cx.catalog().await?;
    let mut item = new_document(args.kind, &args.name, args.source.as_deref())?;
    let mut header = item.header_mut();
    header.tags_mut().extend(args.tags);
    header.dependencies_mut().extend(args.dependencies);

    let created = catalog.create(item).await?;
    println!("Created {} {} ({})", created.kind(), style(created.name()).bold(), created.id());
    Ok(())
}

pub async fn handle_tag(args: TagArgs, cx: AppContext) -> Result<()> {
    let catalog = cx.catalog().await?;
    let mut item = require(&catalog, args.id).await?;
    item.header_mut().tags_mut().extend(args.tags);
    let updated = catalog.update(item).await?;
    println!("{}: {}", updated.name(), join(updated.tags().iter().map(|tag| tag.name().to_string())));
    Ok(())
}

pub async fn handle_import(args: ImportArgs, cx: AppContext) -> Result<()> {
    let catalog = cx.catalog().await?;
    let result = match args.kind {
        Some(kind) => catalog.import_kind(&args.path, kind).await?,
        None => catalog.import_all(&args.path).await?,
    };
    print_import(&args.path, &result);
    Ok(())
}

pub async fn handle_export(args: ExportArgs, cx: AppContext) -> Result<()> {
    let format = match args.format {
        Some(format) => format,
        None => cx.workspace()?.config().export_format,
    };
    let catalog = cx.catalog().await?;
    let items: Vec<Persistable> = catalog
        .snapshot()
        .await?
        .items
        .into_iter()
        .filter(|item| args.kind.is_none_or(|kind| item.kind() == kind))
        .collect();
    if items.is_empty() {
        bail!("Nothing to export");
    }

    let count = items.len();
    catalog.export_data(format, &args.destination, items).await?;
    println!("Exported {count} documents to {} ({format})", args.destination.display());
    Ok(())
}

pub async fn handle_search(args: SearchArgs, cx: AppContext) -> Result<()> {
    let catalog = cx.catalog().await?;
    let mut criteria = SearchCriteria::new(args.query).with_limit(args.limit);
    if let Some(kind) = args.kind {
        criteria = criteria.with_kind(kind);
    }
    if let Some(tag) = args.tag {
        criteria = criteria.with_tag(tag);
    }

    let results = catalog.search(&criteria).await?;
    if results.is_empty() {
        println!("No matches.");
    }
    for hit in &results.hits {
        println!("{:>3}  {:<6} {}  {}", hit.score, hit.kind, style(&hit.name).bold(), style(hit.id).dim());
    }
    Ok(())
}

pub async fn handle_reindex(cx: AppContext) -> Result<()> {
    let catalog = cx.catalog().await?;
    catalog.reindex().await?;
    println!("Reindexed {} documents.", catalog.snapshot().await?.len());
    Ok(())
}

pub async fn handle_delete(args: DeleteArgs, cx: AppContext) -> Result<()> {
    let catalog = cx.catalog().await?;
    let item = require(&catalog, args.id).await?;

    let dependents = catalog.dependents(item.id()).await?;
    if !dependents.is_empty() && !args.force {
        println!("{} is referenced by:", style(item.name()).bold());
        for dependent in &dependents {
            print_summary(dependent);
        }
        let confirmed = Confirm::new()
            .with_prompt("Delete it anyway?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let name = item.name().to_string();
    catalog.delete(item).await?;
    println!("Deleted {name}");
    Ok(())
}

async fn require(catalog: &Catalog, id: Uuid) -> Result<Persistable> {
    match catalog.get(id).await? {
        Some(item) => Ok(item),
        None => bail!("No document with id {id}"),
    }
}

/// Builds an empty document of `kind`. Media documents need a source file.
fn new_document(kind: PersistableKind, name: &str, source: Option<&Path>) -> Result<Persistable> {
    debug!(%kind, name, "Building new document");
    let item = match kind {
        PersistableKind::Bible => Bible::new(name, abbreviate(name)).into(),
        PersistableKind::Song => Song::new(name).into(),
        PersistableKind::Slide => Slide::new(name).into(),
        PersistableKind::Show => Show::new(name).into(),
        PersistableKind::Media => {
            let Some(source) = source else {
                bail!("A media document needs --source");
            };
            Media::new(name, PathBuf::from(source), media_type(source)?).into()
        }
    };
    Ok(item)
}

fn abbreviate(name: &str) -> String {
    name.split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(char::to_uppercase)
        .collect()
}

fn media_type(source: &Path) -> Result<MediaType> {
    let extension = source
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" | "png" | "gif" | "webp" | "bmp" | "svg" => Ok(MediaType::Image),
        "mp4" | "mov" | "mkv" | "webm" | "avi" => Ok(MediaType::Video),
        "mp3" | "wav" | "ogg" | "flac" | "m4a" => Ok(MediaType::Audio),
        _ => bail!("Cannot tell the media type of {}", source.display()),
    }
}

fn print_summary(item: &Persistable) {
    let tags = if item.tags().is_empty() {
        String::new()
    } else {
        format!("  [{}]", join(item.tags().iter().map(|tag| tag.name().to_string())))
    };
    println!("{}  {:<6} {}{}", style(item.id()).dim(), item.kind(), item.name(), tags);
}

fn print_import(path: &Path, result: &DataImportResult<Persistable>) {
    println!(
        "Imported {}: {} created, {} updated",
        path.display(),
        result.created.len(),
        result.updated.len()
    );
    for item in result.iter() {
        print_summary(item);
    }
}

fn join(parts: impl Iterator<Item = String>) -> String {
    parts.collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_core::document::Document;

    #[test]
    fn test_new_document_per_kind() {
        let bible = new_document(PersistableKind::Bible, "King James Version", None).unwrap();
        let bible = bible.downcast::<Bible>().unwrap();
        assert_eq!(bible.abbreviation, "KJV");
        assert_eq!(bible.name(), "King James Version");

        let slide = new_document(PersistableKind::Slide, "Welcome", None).unwrap();
        assert_eq!(slide.kind(), PersistableKind::Slide);

        let media = new_document(PersistableKind::Media, "Intro", Some(Path::new("clips/intro.MP4"))).unwrap();
        let media = media.downcast::<Media>().unwrap();
        assert_eq!(media.media_type, MediaType::Video);
        assert_eq!(media.source, PathBuf::from("clips/intro.MP4"));
    }

    #[test]
    fn test_media_requires_known_source() {
        assert!(new_document(PersistableKind::Media, "Intro", None).is_err());
        assert!(new_document(PersistableKind::Media, "Intro", Some(Path::new("notes.doc"))).is_err());
    }
}
