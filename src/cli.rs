use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use contentmig::assets::{AssetTransferQueue, UploadPool};
use contentmig::config::Config;
use contentmig::http::HttpClient;
use contentmig::ledger::HttpLedger;
use contentmig::migration::orchestrator::pending_uploads_path;
use contentmig::migration::{MigrationOrchestrator, RunReport, Shutdown};
use contentmig::observability::Metrics;
use contentmig::snapshot::{EntityId, Snapshot, SnapshotFetcher};

pub type CliResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser, Debug)]
#[command(name = "contentmig")]
#[command(about = "Migrate content and members onto the destination ledger", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to CONTENTMIG_CONFIG or config/contentmig.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export every source collection into a snapshot file
    Snapshot(SnapshotArgs),
    /// Migrate categories, channels and videos
    MigrateContent(MigrateContentArgs),
    /// Migrate memberships
    MigrateMembers(MigrateMembersArgs),
    /// Retry uploads left in a saved queue file
    RetryUploads(RetryUploadsArgs),
}

impl Commands {
    /// Migrations stop between chunks on SIGINT/SIGTERM; the other commands
    /// keep the default disposition and die immediately
    pub fn traps_signals(&self) -> bool {
        matches!(self, Commands::MigrateContent(_) | Commands::MigrateMembers(_))
    }
}

#[derive(clap::Args, Debug)]
pub struct SnapshotArgs {
    #[arg(long, short)]
    pub output: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct MigrateContentArgs {
    #[arg(long)]
    pub snapshot: PathBuf,

    /// Comma-separated source channel ids; all channels when omitted
    #[arg(long, value_delimiter = ',')]
    pub channel_ids: Vec<EntityId>,
}

#[derive(clap::Args, Debug)]
pub struct MigrateMembersArgs {
    #[arg(long)]
    pub snapshot: PathBuf,
}

#[derive(clap::Args, Debug)]
pub struct RetryUploadsArgs {
    /// Queue file; defaults to the pending uploads file in the results directory
    #[arg(long)]
    pub file: Option<PathBuf>,
}

/// Run a command; `Ok(false)` means it finished but left work undone
pub async fn run(cli: Cli, shutdown: Shutdown) -> CliResult<bool> {
    let config = Config::load(cli.config)?;

    match cli.command {
        Commands::Snapshot(args) => snapshot(&config, args).await,
        Commands::MigrateContent(args) => {
            let snapshot = Snapshot::load(&args.snapshot).await?;
            let mut orchestrator = orchestrator(&config, shutdown).await?;
            let report = orchestrator
                .migrate_content(&snapshot, &args.channel_ids)
                .await?;
            Ok(summarize(&report))
        }
        Commands::MigrateMembers(args) => {
            let snapshot = Snapshot::load(&args.snapshot).await?;
            let mut orchestrator = orchestrator(&config, shutdown).await?;
            let report = orchestrator.migrate_members(&snapshot).await?;
            Ok(summarize(&report))
        }
        Commands::RetryUploads(args) => retry_uploads(&config, args).await,
    }
}

async fn snapshot(config: &Config, args: SnapshotArgs) -> CliResult<bool> {
    let endpoint = config
        .source
        .query_endpoint
        .as_deref()
        .ok_or("source.query_endpoint is not configured")?;

    let fetcher = SnapshotFetcher::new(
        HttpClient::new(&config.http)?,
        endpoint,
        config.source.page_size,
    );
    let snapshot = fetcher.fetch().await?;
    snapshot.save(&args.output).await?;

    info!(output = %args.output.display(), "Snapshot written");
    Ok(true)
}

async fn orchestrator(config: &Config, shutdown: Shutdown) -> CliResult<MigrationOrchestrator> {
    let ledger = Arc::new(HttpLedger::new(&config.ledger)?);
    let metrics = Arc::new(Metrics::new());
    Ok(MigrationOrchestrator::from_config(config, ledger, metrics, shutdown).await?)
}

async fn retry_uploads(config: &Config, args: RetryUploadsArgs) -> CliResult<bool> {
    let file = args
        .file
        .unwrap_or_else(|| pending_uploads_path(&config.migration.results_dir));

    let pool = UploadPool::from_endpoints(&config.destination.upload_endpoints, &config.http)?;
    let mut queue = AssetTransferQueue::new(
        file.clone(),
        config.destination.uploads_dir.clone(),
        Arc::new(pool),
        Arc::new(Metrics::new()),
    );
    queue.load_from_file(&file).await?;

    if queue.is_empty() {
        info!(file = %file.display(), "No pending uploads");
        return Ok(true);
    }

    let report = queue.drain().await?;
    info!(
        uploaded = report.uploaded,
        still_pending = report.failed.len(),
        file = %file.display(),
        "Retry finished"
    );
    Ok(report.is_complete())
}

fn summarize(report: &RunReport) -> bool {
    for stage in &report.stages {
        info!(
            stage = stage.stage,
            candidates = stage.candidates,
            already_migrated = stage.already_migrated,
            migrated = stage.migrated,
            "Stage summary"
        );
    }
    if report.interrupted {
        warn!("Run interrupted; rerun the same command to continue");
    }
    report.is_complete()
}
