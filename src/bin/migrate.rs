use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use mage_migrate::config::MigrationConfig;
use mage_migrate::payload::HttpAssets;
use mage_migrate::pipeline::{self, Pipeline, PipelineContext};
use mage_migrate::source::{SoapClient, SourceDb, SourceReader};
use mage_migrate::target::RestClient;
use mage_migrate::tracing::{init_tracing, DEFAULT_FILTER};
use mage_migrate::util::env;

#[derive(Parser, Debug)]
#[command(name = "migrate", version, about = "Magento 1 → Magento 2 catalog migration")]
struct Cli {
    /// Config file (falls back to MIGRATE_CONFIG, then ./config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Build and log payloads without writing to the target (also MIGRATE_DRY_RUN=1)
    #[arg(long, global = true, default_value_t = false)]
    dry_run: bool,
    /// Write the run report as JSON to this path
    #[arg(long, global = true)]
    report: Option<PathBuf>,
    /// Debug logging for this crate
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Attribute groups, attributes and set assignments for every mapped set
    Attributes,
    /// Category subtrees under the configured roots
    Categories,
    /// Admin-store values of user-defined category attributes
    CategoryAttributes,
    /// Default-scope products
    Products,
    /// Store-view values of products, one payload per target store
    ProductStoreViews,
    /// Attribute codes of source vs target sets (read-only)
    Compare,
}

impl From<Commands> for Pipeline {
    fn from(c: Commands) -> Self {
        match c {
            Commands::Attributes => Pipeline::Attributes,
            Commands::Categories => Pipeline::Categories,
            Commands::CategoryAttributes => Pipeline::CategoryAttributes,
            Commands::Products => Pipeline::Products,
            Commands::ProductStoreViews => Pipeline::ProductStoreViews,
            Commands::Compare => Pipeline::Compare,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env::init_env();
    let cli = Cli::parse();
    init_tracing(DEFAULT_FILTER, cli.verbose)?;

    let config_path = env::config_path(cli.config.clone());
    let cfg = MigrationConfig::load(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;
    let pipeline = Pipeline::from(cli.command);

    let soap = SoapClient::connect(&cfg.magento_domain, &cfg.api_user, &cfg.api_key, cfg.timeout())
        .await
        .context("opening source soap session")?;
    let db = SourceDb::connect(
        &cfg.db_host,
        cfg.db_port,
        &cfg.db_name,
        &cfg.db_user,
        &cfg.db_password,
        cfg.timeout(),
    )
    .await
    .context("connecting to source database")?;
    let target = RestClient::connect(&cfg)
        .await
        .context("authenticating against target rest api")?;
    let assets = HttpAssets::new(cfg.timeout()).context("building media client")?;

    let ctx = PipelineContext {
        cfg: &cfg,
        source: SourceReader::new(&soap, &db),
        target: &target,
        assets: &assets,
        dry_run: cli.dry_run || env::env_flag("MIGRATE_DRY_RUN", false),
    };
    let outcome = pipeline::run(&ctx, pipeline).await;
    soap.end_session().await;
    db.pool.close().await;

    // The report is written even when the run was cut short.
    let (report, fatal) = match outcome {
        Ok(report) => (report, None),
        Err(aborted) => (aborted.report, Some(aborted.error)),
    };
    if let Some(path) = &cli.report {
        report
            .write_json(path)
            .with_context(|| format!("writing report to {}", path.display()))?;
    }
    if let Some(e) = fatal {
        error!(%pipeline, failures = report.failures.len(), "run aborted; partial migration");
        return Err(e).with_context(|| format!("pipeline {pipeline} aborted"));
    }
    info!(
        %pipeline,
        failures = report.failures.len(),
        clean = !report.has_failures(),
        dry_run = report.dry_run,
        "done"
    );
    Ok(())
}
