use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use harvest_client::{CompaniesHouseSource, OpenCorporatesSource};
use harvest_core::{
    CollectionParams, CollectionRequest, CollectorConfig, CollectorService, Context, MemoryStore,
    Provider, ProviderRegistry, RecordStore,
};
use harvest_db::{Database, DatabaseConfig, RawRecordRepository};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Parser)]
#[command(name = "harvest", version, about = "Multi-provider company data collector")]
struct Cli {
    /// Companies House API key
    #[arg(long, global = true, env = "COMPANIES_HOUSE_API_KEY", hide_env_values = true)]
    companies_house_key: Option<String>,

    /// OpenCorporates API key
    #[arg(long, global = true, env = "OPENCORPORATES_API_KEY", hide_env_values = true)]
    opencorporates_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct QueryArgs {
    /// Search query
    #[arg(short, long)]
    query: String,

    /// Jurisdiction or location filter, where the provider supports one
    #[arg(long)]
    location: Option<String>,

    /// Maximum records per provider (0 uses the provider default)
    #[arg(short, long, default_value_t = 20)]
    limit: u32,

    /// Number of leading results to skip
    #[arg(long, default_value_t = 0)]
    offset: u32,

    /// Save collected records to the database (requires DATABASE_URL)
    #[arg(long, default_value_t = false)]
    save: bool,
}

impl QueryArgs {
    fn params(&self) -> CollectionParams {
        let mut params = CollectionParams::new(&self.query)
            .with_limit(self.limit)
            .with_offset(self.offset);
        if let Some(location) = &self.location {
            params = params.with_location(location);
        }
        params
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Collect from one provider as a tracked background job
    Collect {
        /// Provider name (see `harvest sources`)
        #[arg(short, long)]
        source: String,

        #[command(flatten)]
        query: QueryArgs,

        /// Retry budget (defaults to HARVEST_RETRY_ATTEMPTS)
        #[arg(long)]
        max_retries: Option<u32>,

        /// Per-attempt timeout in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Query every configured provider concurrently
    CollectAll {
        #[command(flatten)]
        query: QueryArgs,
    },

    /// List configured providers
    Sources,

    /// Show stored records for a provider
    Records {
        /// Provider name
        #[arg(short, long)]
        source: String,

        /// Number of records to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("harvest=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let registry = Arc::new(build_registry(
        cli.companies_house_key.as_deref(),
        cli.opencorporates_key.as_deref(),
    ));

    match cli.command {
        Commands::Collect {
            source,
            query,
            max_retries,
            timeout_secs,
        } => {
            let mut request = CollectionRequest::new(source, query.params());
            if let Some(max_retries) = max_retries {
                request = request.with_max_retries(max_retries);
            }
            if let Some(secs) = timeout_secs {
                request = request.with_timeout(Duration::from_secs(secs));
            }

            if query.save {
                let repo = connect_db().await?;
                cmd_collect(registry, repo, request).await?;
            } else {
                cmd_collect(registry, MemoryStore::new(), request).await?;
            }
        }
        Commands::CollectAll { query } => {
            let repo = if query.save {
                Some(connect_db().await?)
            } else {
                None
            };
            cmd_collect_all(&registry, &query.params(), repo.as_ref()).await?;
        }
        Commands::Sources => cmd_sources(&registry),
        Commands::Records { source, limit } => {
            let repo = connect_db().await?;
            cmd_records(&repo, &source, limit).await?;
        }
    }

    Ok(())
}

/// Registers every provider that has an API key. A provider that fails to
/// register is skipped with a warning.
fn build_registry(
    companies_house_key: Option<&str>,
    opencorporates_key: Option<&str>,
) -> ProviderRegistry {
    let registry = ProviderRegistry::new();

    if let Some(key) = companies_house_key {
        register(&registry, CompaniesHouseSource::new(key));
    }
    if let Some(key) = opencorporates_key {
        register(&registry, OpenCorporatesSource::new(key));
    }
    if registry.is_empty() {
        tracing::warn!(
            "No providers configured. Set COMPANIES_HOUSE_API_KEY and/or OPENCORPORATES_API_KEY."
        );
    }
    registry
}

fn register<P: Provider + 'static>(
    registry: &ProviderRegistry,
    provider: Result<P, harvest_core::AppError>,
) {
    if let Err(e) = provider.and_then(|p| registry.register_source(p)) {
        tracing::warn!(error = %e, "Skipping provider");
    }
}

/// Connect to PostgreSQL using DATABASE_URL and apply migrations.
async fn connect_db() -> Result<RawRecordRepository> {
    let config = DatabaseConfig::from_env()?;
    let db = Database::connect(&config)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await?;
    Ok(db.record_repo())
}

/// Cancelled on the first Ctrl-C.
fn shutdown_signal() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting down");
            trigger.cancel();
        }
    });
    token
}

async fn cmd_collect<S: RecordStore>(
    registry: Arc<ProviderRegistry>,
    store: S,
    request: CollectionRequest,
) -> Result<()> {
    let config = CollectorConfig::from_env()?;
    let shutdown_timeout = config.shutdown_timeout;
    let service = CollectorService::new(registry, store, config)?;
    service.start()?;

    let job_id = service.schedule_collection(request)?;
    let shutdown = shutdown_signal();

    let report = loop {
        let report = service.get_job_status(&job_id)?;
        if report.status.is_terminal() {
            break report;
        }
        tokio::select! {
            () = shutdown.cancelled() => break report,
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    };

    service.stop(shutdown_timeout).await?;

    // Re-read after shutdown so an interrupted job shows its final state.
    let report = service.get_job_status(&job_id).unwrap_or(report);
    println!("{}", serde_json::to_string_pretty(&report)?);
    tracing::info!(
        metrics = %serde_json::to_string(&service.get_metrics())?,
        "Collector metrics"
    );
    Ok(())
}

async fn cmd_collect_all(
    registry: &ProviderRegistry,
    params: &CollectionParams,
    repo: Option<&RawRecordRepository>,
) -> Result<()> {
    let ctx = Context::with_cancellation(shutdown_signal());
    let outcome = registry.collect_from_all_sources(&ctx, params).await;

    if let Some(repo) = repo {
        let mut saved = 0usize;
        for record in outcome.results.values().flatten() {
            repo.store_raw_record(record).await?;
            saved += 1;
        }
        tracing::info!(saved, "Saved records to database");
    }

    let mut summary = serde_json::Map::new();
    for name in registry.list_sources() {
        let entry = match (outcome.results.get(&name), outcome.errors.get(&name)) {
            (Some(records), _) => serde_json::json!({ "records": records.len() }),
            (None, Some(error)) => serde_json::json!({ "error": error.to_string() }),
            (None, None) => serde_json::json!({ "records": 0 }),
        };
        summary.insert(name, entry);
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_sources(registry: &ProviderRegistry) {
    let sources = registry.list_sources();
    if sources.is_empty() {
        println!("No providers configured");
        return;
    }
    for name in sources {
        match registry.get_source(&name) {
            Ok(provider) => {
                let limit = provider.rate_limit();
                println!(
                    "  {name} ({} req/s, burst {})",
                    limit.requests_per_second, limit.burst
                );
            }
            Err(_) => println!("  {name}"),
        }
    }
}

async fn cmd_records(repo: &RawRecordRepository, source: &str, limit: usize) -> Result<()> {
    let records = repo.list_by_source(source, limit).await?;

    if records.is_empty() {
        println!("No records found for source={source}");
        return Ok(());
    }

    println!("Records from {source}:\n");
    for record in &records {
        let name = record
            .data
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        println!(
            "  {} {} ({})",
            record.collected_at.format("%Y-%m-%d %H:%M:%S UTC"),
            record.id,
            name
        );
    }
    println!("\nTotal: {} records", records.len());
    Ok(())
}
