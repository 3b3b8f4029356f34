use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gnt_sync::backend::{GanetiBackend, RapiClient};
use gnt_sync::config::{AppConfig, CliConfig, FileConfig};
use gnt_sync::reconcile::{ReconcileOptions, ReconcileReport, Reconciler};
use gnt_sync::server_store::SqliteServerStore;

/// Detect and repair drift between the server database and the Ganeti
/// backend.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite server database file.
    #[clap(long)]
    pub db: Option<PathBuf>,

    /// Path to a TOML config file. File values override CLI values.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Detect DB records whose backend instance no longer exists.
    #[clap(long)]
    pub detect_stale: bool,

    /// Detect backend instances with no corresponding DB record.
    #[clap(long)]
    pub detect_orphans: bool,

    /// Detect records whose power state disagrees with the backend.
    #[clap(long)]
    pub detect_unsynced: bool,

    /// Enable all detectors.
    #[clap(long)]
    pub detect_all: bool,

    /// Tombstone stale records. Requires --detect-stale.
    #[clap(long)]
    pub fix_stale: bool,

    /// Remove orphan instances from the backend. Requires --detect-orphans.
    #[clap(long)]
    pub fix_orphans: bool,

    /// Force DB power state to match the backend. Requires --detect-unsynced.
    #[clap(long)]
    pub fix_unsynced: bool,

    /// Enable all repairs.
    #[clap(long)]
    pub fix_all: bool,

    /// Ganeti RAPI endpoint URL.
    #[clap(long)]
    pub backend_url: Option<String>,

    /// Ganeti RAPI username.
    #[clap(long)]
    pub backend_username: Option<String>,

    /// Ganeti RAPI password.
    #[clap(long)]
    pub backend_password: Option<String>,

    /// Instance-name prefix joining DB records to backend instances.
    #[clap(long)]
    pub backend_prefix: Option<String>,

    /// Timeout in seconds for backend requests.
    #[clap(long, default_value_t = 30)]
    pub backend_timeout_sec: u64,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_path: self.db.clone(),
            backend_url: self.backend_url.clone(),
            backend_username: self.backend_username.clone(),
            backend_password: self.backend_password.clone(),
            backend_prefix: self.backend_prefix.clone(),
            backend_timeout_sec: self.backend_timeout_sec,
            exchange_timeout_sec: 30,
            reconnect_delay_sec: 5,
            ..Default::default()
        }
    }

    fn to_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            detect_stale: self.detect_stale,
            detect_orphans: self.detect_orphans,
            detect_unsynced: self.detect_unsynced,
            fix_stale: self.fix_stale,
            fix_orphans: self.fix_orphans,
            fix_unsynced: self.fix_unsynced,
        }
        .with_umbrellas(self.detect_all, self.fix_all)
    }
}

fn print_report(report: &ReconcileReport, options: &ReconcileOptions) {
    if options.detect_stale {
        if report.stale.is_empty() {
            println!("Found no stale server records in the DB.");
        } else {
            println!("Found stale server records in the DB:");
            for id in &report.stale {
                println!("  {}", id);
            }
            if options.fix_stale {
                println!("  marked {} record(s) as deleted", report.fixed_stale);
            }
        }
    }

    if options.detect_orphans {
        if report.orphans.is_empty() {
            println!("Found no orphan instances in the backend.");
        } else {
            println!("Found orphan instances in the backend:");
            for name in &report.orphans {
                println!("  {}", name);
            }
            if options.fix_orphans {
                println!(
                    "  submitted removal for {} instance(s), {} failed",
                    report.fixed_orphans, report.failed_orphans
                );
            }
        }
    }

    if options.detect_unsynced {
        if report.unsynced.is_empty() {
            println!("Found no servers with out-of-sync power state.");
        } else {
            println!("Found servers with out-of-sync power state:");
            for (id, db_up, backend_up) in &report.unsynced {
                println!(
                    "  server {}: DB says {}, backend says {}",
                    id,
                    if *db_up { "UP" } else { "DOWN" },
                    if *backend_up { "UP" } else { "DOWN" }
                );
            }
            if options.fix_unsynced {
                println!("  updated {} record(s) from backend state", report.fixed_unsynced);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let options = cli_args.to_options();
    options.validate()?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;
    let db_path = config.db_path()?;
    let backend_settings = config.backend()?;

    info!("Opening SQLite server database at {:?}...", db_path);
    let store = Arc::new(SqliteServerStore::new(db_path)?);

    let backend: Arc<dyn GanetiBackend> = Arc::new(RapiClient::new(
        backend_settings.url.clone(),
        backend_settings.username.clone(),
        backend_settings.password.clone(),
        backend_settings.timeout_sec,
    )?);
    backend
        .verify_connectivity()
        .await
        .context("Backend connectivity check failed")?;

    let reconciler = Reconciler::new(store, backend, config.backend_prefix.clone(), options);
    let report = reconciler.run().await?;

    print_report(&report, &options);
    if report.is_clean() {
        info!("Database and backend are in sync");
    }
    Ok(())
}
