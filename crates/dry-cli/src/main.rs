//! DryScan CLI.
//!
//! Command-line interface for building the duplicate index, generating
//! reports, and managing pair exclusions. Exits non-zero on any unrecovered
//! core error and zero on success, whether or not duplicates were found.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dry_core::pipeline::{Engine, InitOptions};

/// DryScan - semantic duplicate-code analyser
#[derive(Parser, Debug)]
#[command(name = "dryscan", version, about = "Find semantically duplicated code units in a repository")]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,

    /// Log level.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the full unit index from scratch.
    Init {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,

        /// Skip the embedding pass (units persist without vectors).
        #[arg(long)]
        skip_embeddings: bool,
    },

    /// Incrementally update the index from on-disk changes.
    Update {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,
    },

    /// Generate a duplicate report and write it under .dry/reports/.
    Report {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,

        /// Write the report JSON to this file instead.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Permanently exclude a duplicate group from future reports.
    Exclude {
        /// Short id of the group, as printed in the latest report.
        short_id: String,

        /// Path to the repository root.
        #[arg(long, default_value = ".")]
        path: String,
    },

    /// Drop configured exclusions that no longer match any actual pair.
    CleanExclusions {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,
    },

    /// Show the effective configuration.
    Config {
        /// Path to the repository root.
        #[arg(default_value = ".")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(cli.log_level.as_str())
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { path, skip_embeddings } => {
            let mut engine = Engine::open(path.as_ref()).await?;
            let stats = engine.init(&InitOptions { skip_embeddings }).await?;
            println!(
                "Indexed {} files ({} units, {} failed); embedded {} ({} failed)",
                stats.files_indexed,
                stats.units_indexed,
                stats.files_failed,
                stats.embed.embedded,
                stats.embed.failed,
            );
        }
        Commands::Update { path } => {
            let mut engine = Engine::open(path.as_ref()).await?;
            let stats = engine.update_index().await?;
            println!(
                "Updated: {} new, {} changed, {} deleted, {} unchanged",
                stats.new_files, stats.changed_files, stats.deleted_files, stats.unchanged_files,
            );
        }
        Commands::Report { path, output } => {
            let mut engine = Engine::open(path.as_ref()).await?;
            let report = engine.build_duplicate_report().await?;

            let target = match output {
                Some(path) => path,
                None => {
                    let stamp = chrono::Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
                    engine.reports_dir().join(format!("dupes-{stamp}.json"))
                }
            };
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            let json = serde_json::to_string_pretty(&report)?;
            std::fs::write(&target, json)
                .with_context(|| format!("writing {}", target.display()))?;

            println!(
                "Duplication score {:.2} ({:?}), {} groups -> {}",
                report.score.score,
                report.grade,
                report.duplicates.len(),
                target.display(),
            );
            for group in &report.duplicates {
                println!(
                    "  [{}] {:.3} {} <-> {} ({})",
                    group.short_id,
                    group.similarity,
                    group.left.name,
                    group.right.name,
                    group.left.file_path,
                );
            }
        }
        Commands::Exclude { short_id, path } => {
            let mut engine = Engine::open(path.as_ref()).await?;
            let added = engine.add_exclusion(&short_id).await?;
            if added {
                println!("Excluded group {short_id}");
            } else {
                println!("Group {short_id} was already excluded");
            }
        }
        Commands::CleanExclusions { path } => {
            let mut engine = Engine::open(path.as_ref()).await?;
            let cleanup = engine.clean_exclusions().await?;
            println!("Exclusions: kept {}, removed {}", cleanup.kept, cleanup.removed);
        }
        Commands::Config { path } => {
            let engine = Engine::open(path.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(engine.config())?);
        }
    }

    Ok(())
}
