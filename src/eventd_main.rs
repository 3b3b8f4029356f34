use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gnt_sync::config::{AppConfig, CliConfig, FileConfig};
use gnt_sync::eventd::{EventDaemon, EventExchange, RabbitExchangeClient};
use tokio_util::sync::CancellationToken;

/// Publish Ganeti job-queue events to the message exchange.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the Ganeti job queue directory to watch.
    #[clap(long)]
    pub queue_dir: Option<PathBuf>,

    /// Path to a TOML config file. File values override CLI values.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Message broker HTTP API URL.
    #[clap(long)]
    pub exchange_url: Option<String>,

    /// Broker virtual host.
    #[clap(long)]
    pub exchange_vhost: Option<String>,

    /// Exchange to publish events to.
    #[clap(long)]
    pub exchange_name: Option<String>,

    /// Broker username.
    #[clap(long)]
    pub exchange_username: Option<String>,

    /// Broker password.
    #[clap(long)]
    pub exchange_password: Option<String>,

    /// Timeout in seconds for publish requests.
    #[clap(long, default_value_t = 30)]
    pub exchange_timeout_sec: u64,

    /// Delay in seconds between reconnection attempts.
    #[clap(long, default_value_t = 5)]
    pub reconnect_delay_sec: u64,

    /// Log at debug level unless LOG_LEVEL overrides it.
    #[clap(long)]
    pub debug: bool,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            exchange_url: self.exchange_url.clone(),
            exchange_vhost: self.exchange_vhost.clone(),
            exchange_name: self.exchange_name.clone(),
            exchange_username: self.exchange_username.clone(),
            exchange_password: self.exchange_password.clone(),
            exchange_timeout_sec: self.exchange_timeout_sec,
            reconnect_delay_sec: self.reconnect_delay_sec,
            queue_dir: self.queue_dir.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let default_level = if cli_args.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;
    let queue_dir = config.queue_dir()?.clone();

    let exchange: Arc<dyn EventExchange> = Arc::new(RabbitExchangeClient::new(
        &config.exchange.url,
        &config.exchange.vhost,
        &config.exchange.name,
        &config.exchange.username,
        &config.exchange.password,
        config.exchange.timeout_sec,
    )?);

    let daemon = EventDaemon::new(queue_dir, exchange, config.exchange.reconnect_delay_sec);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
            _ = sigterm.recv() => info!("Received SIGTERM"),
        }
        signal_token.cancel();
    });

    daemon.run(shutdown).await
}
