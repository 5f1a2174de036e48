use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use lectern_core::document::{PersistableKind, Tag};
use lectern_core::persist::ExportFormat;
use uuid::Uuid;

/// Lectern: manage the songs, slides, media and shows of a presentation workspace.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override the default workspace path detection.
    #[arg(long, global = true, env = "LECTERN_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Increase verbosity (use multiple times for more).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage Lectern workspaces.
    Workspace(WorkspaceArgs),
    /// List documents of the workspace.
    List(ListArgs),
    /// List every tag in use.
    Tags,
    /// Show a document.
    Show(ShowArgs),
    /// Create an empty document.
    New(NewArgs),
    /// Add tags to a document.
    Tag(TagArgs),
    /// Import documents from a file, directory or archive.
    Import(ImportArgs),
    /// Export documents into a gzipped archive.
    Export(ExportArgs),
    /// Search for documents within the workspace.
    Search(SearchArgs),
    /// Rebuild the search index from the documents on disk.
    Reindex,
    /// Delete a document.
    Delete(DeleteArgs),
}

#[derive(Args, Debug)]
pub struct WorkspaceArgs {
    #[command(subcommand)]
    pub command: WorkspaceCommands,
}

#[derive(Subcommand, Debug)]
pub enum WorkspaceCommands {
    /// Create and initialize a new workspace at the specified path. Defaults to current directory.
    Create {
        path: Option<PathBuf>,
        /// Display name; defaults to the directory name.
        #[arg(long, short)]
        name: Option<String>,
    },
    /// Show information about the current workspace.
    Info,
    /// Change settings of the current workspace.
    Set {
        #[arg(long, short)]
        name: Option<String>,
        /// Format used by `export` when `--format` is omitted.
        #[arg(long)]
        export_format: Option<ExportFormat>,
    },
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, short)]
    pub kind: Option<PersistableKind>,

    /// Only documents carrying this tag.
    #[arg(long, short)]
    pub tag: Option<Tag>,
}

#[derive(Args, Debug)]
pub struct ShowArgs {
    pub id: Uuid,
}

#[derive(Args, Debug)]
pub struct NewArgs {
    pub kind: PersistableKind,
    pub name: String,

    #[arg(long = "tag", short)]
    pub tags: Vec<Tag>,

    /// Id of a document this one references.
    #[arg(long = "depends")]
    pub dependencies: Vec<Uuid>,

    /// Source file of a media document.
    #[arg(long)]
    pub source: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct TagArgs {
    pub id: Uuid,
    #[arg(required = true)]
    pub tags: Vec<Tag>,
}

#[derive(Args, Debug)]
pub struct ImportArgs {
    pub path: PathBuf,

    /// Import a single kind, replacing documents that already exist. Without it every kind is
    /// tried and existing documents are kept.
    #[arg(long, short)]
    pub kind: Option<PersistableKind>,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Archive to write.
    pub destination: PathBuf,

    #[arg(long, short)]
    pub kind: Option<PersistableKind>,

    /// `native` or `text`; defaults to the workspace setting.
    #[arg(long, short)]
    pub format: Option<ExportFormat>,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    #[arg(required = true)]
    pub query: String,

    #[arg(long, short)]
    pub kind: Option<PersistableKind>,

    #[arg(long, short)]
    pub tag: Option<Tag>,

    /// Number of results to return.
    #[arg(long, short, default_value = "10")]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    pub id: Uuid,

    /// Skip confirmation when other documents reference this one.
    #[arg(long, short)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_well_formed() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_new_with_tags_and_dependencies() {
        let id = Uuid::new_v4();
        let id_arg = id.to_string();
        let cli = Cli::try_parse_from([
            "lectern", "new", "slide", "Welcome", "--tag", "intro", "-t", "sunday", "--depends", id_arg.as_str(),
        ])
        .unwrap();
        let Commands::New(args) = cli.command else { panic!("expected new") };
        assert_eq!(args.kind, PersistableKind::Slide);
        assert_eq!(args.tags.iter().map(Tag::name).collect::<Vec<_>>(), vec!["intro", "sunday"]);
        assert_eq!(args.dependencies, vec![id]);
    }

    #[test]
    fn test_parses_export_format_and_global_flags() {
        let cli = Cli::try_parse_from(["lectern", "export", "out.tgz", "--format", "text", "-vv", "--workspace", "/tmp/ws"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.workspace, Some(PathBuf::from("/tmp/ws")));
        let Commands::Export(args) = cli.command else { panic!("expected export") };
        assert_eq!(args.format, Some(ExportFormat::Text));
        assert!(args.kind.is_none());
    }

    #[test]
    fn test_rejects_unknown_kind() {
        assert!(Cli::try_parse_from(["lectern", "list", "--kind", "hymnal"]).is_err());
    }
}
