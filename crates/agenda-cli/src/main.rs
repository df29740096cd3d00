use std::path::PathBuf;

use agenda_sync::{EnrichmentPipeline, SyncConfig};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "agenda-cli")]
#[command(about = "Cultural agenda enrichment and sync")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Enrich a raw batch and write reports.
    Enrich(InputArgs),
    /// Enrich a raw batch, then upsert the results into the database.
    Sync(InputArgs),
    /// Apply pending database migrations.
    Migrate,
    /// Print a digest of recent runs.
    Report {
        #[arg(long, default_value_t = 1)]
        runs: usize,
    },
}

#[derive(Debug, Default, Args)]
struct InputArgs {
    /// Overrides AGENDA_INPUT_FILE.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Overrides AGENDA_INPUT_FORMAT (`raw-v2` or `openagenda`).
    #[arg(long)]
    format: Option<String>,
}

impl InputArgs {
    fn apply(self, config: &mut SyncConfig) -> Result<()> {
        if let Some(input) = self.input {
            config.input_file = input;
        }
        if let Some(format) = self.format {
            config.input_format = format
                .parse()
                .with_context(|| format!("parsing --format {format}"))?;
        }
        Ok(())
    }
}

async fn run_pipeline(args: InputArgs, sync_enabled: bool) -> Result<()> {
    let mut config = SyncConfig::from_env()?;
    args.apply(&mut config)?;
    config.sync_enabled |= sync_enabled;

    let summary = EnrichmentPipeline::new(config)?.run_once().await?;
    info!(run_id = %summary.run_id, "run finished");
    println!(
        "enrich complete: run_id={} attempted={} succeeded={} failed={} reports={}",
        summary.run_id, summary.attempted, summary.succeeded, summary.failed, summary.reports_dir
    );
    if let Some(sync) = &summary.sync {
        println!(
            "sync complete: eligible={} synced={} failed={}",
            sync.eligible, sync.synced, sync.failed
        );
    }
    if let Some(error) = &summary.sync_error {
        anyhow::bail!("sync skipped, reports written to {}: {error}", summary.reports_dir);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli
        .command
        .unwrap_or_else(|| Commands::Enrich(InputArgs::default()))
    {
        Commands::Enrich(args) => run_pipeline(args, false).await?,
        Commands::Sync(args) => run_pipeline(args, true).await?,
        Commands::Migrate => {
            agenda_sync::migrate_from_env().await?;
            println!("migrations applied");
        }
        Commands::Report { runs } => {
            println!("{}", agenda_sync::report_recent_runs(runs, None)?);
        }
    }

    Ok(())
}
