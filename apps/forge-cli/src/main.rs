use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

use commands::{
    AdjudicateArgs, BookmarksCmd, BulkArgs, ConfigCmd, DiffArgs, DriftArgs, HistoryArgs,
    NarrativesCmd, PersonasCmd, ProjectsArgs, PromotableArgs,
};

#[derive(Parser)]
#[command(name = "forge", version, about = "Review source drift and curate the overlay store")]
struct Cli {
    /// Configuration file (defaults to ./forge.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding project subdirectories (overrides config and FORGE_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List projects under the data directory
    Projects(ProjectsArgs),
    /// Show entities that changed since the last review
    Drift(DriftArgs),
    /// Field-level diff of one entity against its last reviewed content
    Diff(DiffArgs),
    /// Record a decision for one entity
    Adjudicate(AdjudicateArgs),
    /// Apply one decision to every pending drift entry
    Bulk(BulkArgs),
    /// Adjudication history of one entity
    History(HistoryArgs),
    /// Persona records
    Personas {
        #[command(subcommand)]
        cmd: PersonasCmd,
    },
    /// Spatial bookmarks
    Bookmarks {
        #[command(subcommand)]
        cmd: BookmarksCmd,
    },
    /// Narrative contexts framing the world
    Narratives {
        #[command(subcommand)]
        cmd: NarrativesCmd,
    },
    /// Entities eligible for a persona that do not have one yet
    Promotable(PromotableArgs),
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

fn main() {
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    let ctx = commands::Context {
        config_path: cli.config,
        data_dir: cli.data_dir,
    };
    let result = match cli.command {
        Commands::Projects(args) => commands::projects::run(&ctx, args),
        Commands::Drift(args) => commands::review::drift(&ctx, args),
        Commands::Diff(args) => commands::review::diff(&ctx, args),
        Commands::Adjudicate(args) => commands::review::adjudicate(&ctx, args),
        Commands::Bulk(args) => commands::review::bulk(&ctx, args),
        Commands::History(args) => commands::review::history(&ctx, args),
        Commands::Personas { cmd } => commands::overlay::personas(&ctx, cmd),
        Commands::Bookmarks { cmd } => commands::overlay::bookmarks(&ctx, cmd),
        Commands::Narratives { cmd } => commands::overlay::narratives(&ctx, cmd),
        Commands::Promotable(args) => commands::overlay::promotable(&ctx, args),
        Commands::Config { cmd } => commands::config::run(&ctx, cmd),
    };
    if let Err(e) = result {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
