//! `graphscout`: ask questions about on-chain protocols in plain language.

mod settings;

use anyhow::Context;
use clap::{Parser, Subcommand};
use graphscout_engine::build_orchestrator;
use tracing::Level;

use crate::settings::SettingsArgs;

#[derive(Parser, Debug)]
#[command(name = "graphscout")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    settings: SettingsArgs,

    /// Debug-level logging on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer a question against every protocol it mentions.
    Query {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// Run up to five `;`-separated questions.
    Multi { queries: String },

    /// Show how a question would be resolved, without querying datasets.
    Explain {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// Registry statistics.
    Stats,

    /// Record a known dataset in the registry.
    Add {
        protocol: String,
        network: String,
        dataset_id: String,
        /// Display name (defaults to "Protocol on Network").
        #[arg(long)]
        name: Option<String>,
    },

    /// Indexing status of a dataset.
    Meta { dataset_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .init();
    tracing::debug!("graphscout v{}", env!("CARGO_PKG_VERSION"));

    let settings = cli.settings.into_settings()?;
    let mut orchestrator = build_orchestrator(&settings).context("setting up the query pipeline")?;

    let output = match cli.command {
        Commands::Query { question } => orchestrator.query(&question.join(" ")).await?,
        Commands::Multi { queries } => orchestrator.multi_query(&queries).await?,
        Commands::Explain { question } => orchestrator.explain(&question.join(" ")).await?,
        Commands::Stats => orchestrator.registry_stats(),
        Commands::Add {
            protocol,
            network,
            dataset_id,
            name,
        } => orchestrator.add_known_dataset(&protocol, &network, &dataset_id, name.as_deref()),
        Commands::Meta { dataset_id } => orchestrator.dataset_status(&dataset_id).await?,
    };
    println!("{output}");
    Ok(())
}
