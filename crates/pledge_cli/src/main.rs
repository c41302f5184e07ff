//! PLEDGE CLI
//!
//! Runs promise graphs described in JSON files and walks the application
//! lifecycle from the command line.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod graph_file;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use graph_file::{GraphEngine, GraphFile};
use pledge_app::{Application, ApplicationState};
use pledge_runtime::EngineConfig;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pledge")]
#[command(about = "PLEDGE - Promise graph execution engine", long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a graph, apply its settle steps, and print every node
    Run {
        /// Path to graph description
        #[arg(short, long)]
        file: PathBuf,
        /// How long to wait for the graph to settle
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Validate a graph description without settling anything
    Check {
        /// Path to graph description
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Drive an application through lifecycle states
    Lifecycle {
        /// States to enter, in order
        #[arg(long, value_delimiter = ',', required = true)]
        to: Vec<ApplicationState>,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pledge=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Run { file, timeout_ms } => run(&file, Duration::from_millis(timeout_ms)).await,
        Commands::Check { file } => check(&file),
        Commands::Lifecycle { to } => lifecycle(&to),
    }
}

async fn run(path: &Path, timeout: Duration) -> Result<()> {
    let graph = GraphFile::load(path)?;
    let engine = GraphEngine::new(graph.engine.clone())?;
    engine.on_settled(|event| {
        tracing::info!(
            promise = %event.promise,
            state = %event.state,
            at = %event.at,
            label = event.label.as_deref().unwrap_or(""),
            "promise settled"
        );
    });
    tracing::info!(file = %path.display(), runner = engine.runner_name(), "running graph");

    let promises = graph.build(&engine)?;
    for step in &graph.settle {
        let Some(promise) = promises.get(step.node()) else {
            continue;
        };
        if let Err(err) = graph_file::apply(step, promise) {
            tracing::warn!(node = step.node(), error = %err, "settle step refused");
        }
    }

    let waits = promises
        .values()
        .map(|promise| engine.when_settled(promise))
        .collect::<Result<Vec<_>, _>>()?;
    if tokio::time::timeout(timeout, futures::future::join_all(waits))
        .await
        .is_err()
    {
        tracing::warn!(?timeout, "graph did not fully settle");
    }

    for (name, promise) in &promises {
        let outcome = match promise.value_if_settled() {
            Some(Ok(value)) => value.to_string(),
            Some(Err(error)) => format!("error: {error}"),
            None => "-".to_string(),
        };
        println!("{name:<16} {:<10} {outcome}", promise.state().to_string());
    }
    println!("{}", serde_json::to_string(&engine.metrics())?);
    Ok(())
}

fn check(path: &Path) -> Result<()> {
    let graph = GraphFile::load(path)?;
    let config = EngineConfig {
        report_unobserved_rejections: false,
        ..graph.engine.clone()
    };
    let promises = graph.build(&GraphEngine::new(config)?)?;
    println!(
        "{}: {} nodes, {} settle steps",
        path.display(),
        promises.len(),
        graph.settle.len()
    );
    Ok(())
}

fn lifecycle(targets: &[ApplicationState]) -> Result<()> {
    let app = Application::new();
    let state_observer = app.on_state_change(|state| println!("state -> {state}"));
    let focus_observer = app.on_focus_change(|focus| println!("focus -> {focus}"));

    let walked = targets.iter().try_for_each(|&target| app.set_state(target).map(drop));

    app.remove_observer(state_observer);
    app.remove_observer(focus_observer);
    if app.state() != ApplicationState::Stopped {
        app.teardown()?;
    }
    walked?;
    Ok(())
}
