use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lectern::cli::{Cli, Commands};
use lectern::{AppContext, commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let cx = AppContext::new(cli.workspace).await;

    match cli.command {
        Commands::Workspace(args) => commands::handle_workspace(args, cx).await,
        Commands::List(args) => commands::handle_list(args, cx).await,
        Commands::Tags => commands::handle_tags(cx).await,
        Commands::Show(args) => commands::handle_show(args, cx).await,
        Commands::New(args) => commands::handle_new(args, cx).await,
        Commands::Tag(args) => commands::handle_tag(args, cx).await,
        Commands::Import(args) => commands::handle_import(args, cx).await,
        Commands::Export(args) => commands::handle_export(args, cx).await,
        Commands::Search(args) => commands::handle_search(args, cx).await,
        Commands::Reindex => commands::handle_reindex(cx).await,
        Commands::Delete(args) => commands::handle_delete(args, cx).await,
    }
}

/// `RUST_LOG` wins over the command-line flags.
fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
