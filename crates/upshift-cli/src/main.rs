//! upshift - declarative dependency-update automation CLI
//!
//! ## Commands
//!
//! - `run`: execute every pipeline, then reconcile pushes and pull requests
//! - `diff`: dry run, report what would change without touching anything
//! - `show`: display the loaded pipelines
//! - `graph`: render each pipeline's dependency graph in DOT format

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use upshift_core::{Engine, EngineOptions, PipelineOptions};

#[derive(Parser)]
#[command(name = "upshift")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Declarative dependency-update automation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute every pipeline and reconcile pushes and pull requests
    Run {
        /// Manifest files (default: upshift.yaml, then upshift.d/)
        manifests: Vec<PathBuf>,

        /// Report what would change without touching anything
        #[arg(long)]
        dry_run: bool,

        /// Do not commit target changes into their working copies
        #[arg(long)]
        no_commit: bool,

        /// Do not push committed changes
        #[arg(long)]
        no_push: bool,

        /// Write the run reports as JSON to this file
        #[arg(long)]
        report_file: Option<PathBuf>,
    },

    /// Run every pipeline in dry-run mode
    Diff {
        /// Manifest files (default: upshift.yaml, then upshift.d/)
        manifests: Vec<PathBuf>,
    },

    /// Display the loaded pipelines
    Show {
        /// Manifest files (default: upshift.yaml, then upshift.d/)
        manifests: Vec<PathBuf>,
    },

    /// Render each pipeline's dependency graph in DOT format
    Graph {
        /// Manifest files (default: upshift.yaml, then upshift.d/)
        manifests: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    upshift_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            manifests,
            dry_run,
            no_commit,
            no_push,
            report_file,
        } => {
            cmd_run(
                manifests,
                PipelineOptions {
                    dry_run,
                    commit: !no_commit,
                    push: !no_push,
                },
                report_file,
            )
            .await
        }
        Commands::Diff { manifests } => {
            cmd_run(
                manifests,
                PipelineOptions {
                    dry_run: true,
                    commit: false,
                    push: false,
                },
                None,
            )
            .await
        }
        Commands::Show { manifests } => cmd_show(manifests).await,
        Commands::Graph { manifests } => cmd_graph(manifests).await,
    }
}

async fn cmd_run(
    manifests: Vec<PathBuf>,
    pipeline: PipelineOptions,
    report_file: Option<PathBuf>,
) -> Result<()> {
    let mut engine = Engine::new(EngineOptions {
        manifests,
        pipeline,
    });
    engine.prepare().await?;
    let outcome = engine.run().await;

    // The report is written even when the run failed.
    if let Some(path) = &report_file {
        engine.reports.write_json(path)?;
    }

    outcome.map(|_| ())
}

async fn cmd_show(manifests: Vec<PathBuf>) -> Result<()> {
    let mut engine = Engine::new(EngineOptions {
        manifests,
        pipeline: PipelineOptions {
            dry_run: true,
            commit: false,
            push: false,
        },
    });
    engine.load_pipelines()?;

    for pipeline in &engine.pipelines {
        println!("{}", pipeline);
    }
    Ok(())
}

async fn cmd_graph(manifests: Vec<PathBuf>) -> Result<()> {
    let mut engine = Engine::new(EngineOptions {
        manifests,
        pipeline: PipelineOptions {
            dry_run: true,
            commit: false,
            push: false,
        },
    });
    engine.load_pipelines()?;

    for pipeline in &engine.pipelines {
        println!("{}", pipeline.graph_dot()?);
    }
    Ok(())
}
