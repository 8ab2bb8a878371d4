mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{config::ConfigSubcommand, history::HistorySubcommand, inventory::InventorySubcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "armada",
    about = "Shared hosts, inventories and playbook runs behind one permission model",
    version,
    propagate_version = true
)]
struct Cli {
    /// Workspace root (default: auto-detect from .armada/)
    #[arg(long, global = true, env = "ARMADA_ROOT")]
    root: Option<PathBuf>,

    /// Act as this directory user (default: the first superuser)
    #[arg(long, global = true, env = "ARMADA_USER")]
    user: Option<u64>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .armada/ and a default config
    Init,

    /// Run the HTTP API server
    Serve {
        /// Listen address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Inspect and validate the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Inspect run history
    History {
        #[command(subcommand)]
        subcommand: HistorySubcommand,
    },

    /// Inspect inventories
    Inventory {
        #[command(subcommand)]
        subcommand: InventorySubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Serve { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root),
        Commands::Serve { bind } => cmd::serve::run(&root, bind),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::History { subcommand } => {
            cmd::history::run(&root, subcommand, cli.user, cli.json)
        }
        Commands::Inventory { subcommand } => {
            cmd::inventory::run(&root, subcommand, cli.user, cli.json)
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
