// SPDX-License-Identifier: MIT OR Apache-2.0
//! `procworld` - procedural world graph runner.
//!
//! Loads an engine configuration and a graph file (or builds the demo
//! graph), runs evaluation passes and prints the values reaching the root
//! graph's output proxy. Each pass is one host tick.

mod demo;

use clap::{Parser, Subcommand};
use procworld_graph::config::{ConfigError, CONFIG_FILE_NAME};
use procworld_graph::graphs::terrain::create_terrain_registry;
use procworld_graph::persistence::PersistenceError;
use procworld_graph::{EngineConfig, EvaluationError, Graph, GraphFile, GraphSession, SessionError};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_DIRECTIVES: &[&str] = &["procworld_cli=info", "procworld_graph=info"];

#[derive(Parser)]
#[command(name = "procworld")]
#[command(about = "Run procedural world node graphs", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file
    #[arg(long, global = true, default_value = CONFIG_FILE_NAME)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a graph file and evaluate it
    Run {
        /// Graph file (.ron or .json)
        graph: PathBuf,

        /// Number of evaluation passes
        #[arg(short, long, default_value = "1")]
        ticks: u64,

        /// Write the evaluated graph to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Build the demo graph and evaluate it
    Demo {
        /// Number of evaluation passes
        #[arg(short, long, default_value = "1")]
        ticks: u64,

        /// Write the evaluated graph to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },

    /// Write the default engine configuration
    Config {
        /// Destination, the `--config` path when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

fn init_logging(config: &EngineConfig) {
    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let mut rejected = Vec::new();
    let directives = DEFAULT_DIRECTIVES
        .iter()
        .copied()
        .chain(config.log_directives.iter().map(String::as_str));
    for directive in directives {
        match directive.parse() {
            Ok(directive) => env_filter = env_filter.add_directive(directive),
            Err(err) => rejected.push(format!("{directive}: {err}")),
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    for rejected in rejected {
        tracing::warn!("Ignoring log directive {rejected}");
    }
}

fn print_outputs(graph: &Graph) {
    let output = graph.output_node();
    if output.anchors().is_empty() {
        println!("{}: no output fields", graph.name);
        return;
    }
    for anchor in output.anchors() {
        match anchor.single() {
            Some(value) => println!("{}.{} = {value}", graph.name, anchor.field_name),
            None => println!("{}.{} = <none>", graph.name, anchor.field_name),
        }
    }
}

fn evaluate(mut session: GraphSession, ticks: u64, save: Option<&Path>) -> Result<(), CliError> {
    session.enable()?;
    let mut failed = 0;
    for _ in 0..ticks.max(1) {
        if !session.tick().is_clean() {
            failed += 1;
        }
    }
    tracing::info!(passes = session.pass_count(), failed, "Evaluation finished");
    print_outputs(session.root());

    if let Some(path) = save {
        session.snapshot().save(path)?;
        tracing::info!("Saved graph to {}", path.display());
    }
    Ok(())
}

fn run(cli: Cli, config: EngineConfig) -> Result<(), CliError> {
    match cli.command {
        Commands::Run { graph, ticks, save } => {
            let file = GraphFile::load(&graph)?;
            tracing::info!("Loaded {} from {}", file.root.name, graph.display());
            let session = GraphSession::from_file(&file, create_terrain_registry(), config)?;
            evaluate(session, ticks, save.as_deref())
        }
        Commands::Demo { ticks, save } => {
            let mut session = GraphSession::new(create_terrain_registry(), config);
            demo::build(&mut session)?;
            evaluate(session, ticks, save.as_deref())
        }
        Commands::Config { output } => {
            let path = output.unwrap_or(cli.config);
            config.save(&path)?;
            tracing::info!("Wrote engine config to {}", path.display());
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let (config, config_error) = match EngineConfig::load(&cli.config) {
        Ok(config) => (config, None),
        Err(err) => (EngineConfig::default(), Some(err)),
    };
    init_logging(&config);
    if let Some(err) = config_error {
        tracing::error!("Failed to load {}: {err}", cli.config.display());
        std::process::exit(1);
    }

    tracing::info!("Starting procworld v{}", env!("CARGO_PKG_VERSION"));
    if let Err(e) = run(cli, config) {
        tracing::error!("procworld failed: {e}");
        std::process::exit(1);
    }
}
