//! Ganeti event ingestion daemon.
//!
//! Watches the Ganeti job queue directory, parses job files into
//! normalized events and publishes them persistently to the message
//! exchange. Broker outages are survived by retrying the in-flight event
//! forever; any other failure terminates the daemon so its supervisor can
//! restart it from a clean slate.

mod exchange;
mod job_file;
mod watcher;

pub use exchange::{EventExchange, PublishError, RabbitExchangeClient};
pub use job_file::{is_job_file, parse_job_events, routing_key};
pub use watcher::{spawn_watch_thread, WatchEvent, WatchHandle};

#[cfg(feature = "mock")]
pub use exchange::MockEventExchange;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bound on events buffered between the watch thread and the daemon.
const WATCH_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExchangeState {
    Disconnected,
    Connecting,
    Connected,
}

pub struct EventDaemon {
    queue_dir: PathBuf,
    exchange: Arc<dyn EventExchange>,
    reconnect_delay: Duration,
    state: std::sync::Mutex<ExchangeState>,
}

impl EventDaemon {
    pub fn new(
        queue_dir: PathBuf,
        exchange: Arc<dyn EventExchange>,
        reconnect_delay_secs: u64,
    ) -> Self {
        Self {
            queue_dir,
            exchange,
            reconnect_delay: Duration::from_secs(reconnect_delay_secs),
            state: std::sync::Mutex::new(ExchangeState::Disconnected),
        }
    }

    /// Run until cancelled or a fatal fault occurs.
    ///
    /// The watch handle is dropped on every return path, which stops the
    /// watch thread and closes the inotify descriptor before exit.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let (tx, mut rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let _watch = spawn_watch_thread(&self.queue_dir, tx)?;
        info!("Watching job queue directory {:?}", self.queue_dir);

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(WatchEvent::JobFile(path)) => {
                        self.process_job_file(&path, &shutdown).await?
                    }
                    Some(WatchEvent::Fault(reason)) => {
                        bail!("Job queue watcher failed: {}", reason);
                    }
                    None => bail!("Job queue watcher stopped unexpectedly"),
                },
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, stopping event daemon");
                    return Ok(());
                }
            }
        }
    }

    /// Handle one reported file. Unreadable or malformed files are logged
    /// and skipped; publish failures other than broker outages propagate.
    async fn process_job_file(&self, path: &Path, shutdown: &CancellationToken) -> Result<()> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        if !is_job_file(name) {
            debug!("Ignoring non-job file {:?}", path);
            return Ok(());
        }

        let data = match tokio::fs::read_to_string(path).await {
            Ok(data) => data,
            Err(e) => {
                // Job files get archived by the queue; a vanished file is
                // routine.
                debug!("Could not read job file {:?}: {}", path, e);
                return Ok(());
            }
        };

        let events = match parse_job_events(&data) {
            Ok(events) => events,
            Err(e) => {
                warn!("Skipping job file {:?}: {:#}", path, e);
                return Ok(());
            }
        };

        for event in events {
            debug!(
                "Job {}: {} on {} is {}",
                event.job_id, event.operation, event.instance, event.status
            );
            let key = routing_key(&event.instance);
            if !self.publish_event(&key, &event, shutdown).await? {
                return Ok(());
            }
        }
        Ok(())
    }

    /// Publish one event, retrying across broker outages.
    ///
    /// The in-flight event is re-sent once the broker comes back, never
    /// dropped — except on explicit shutdown, which abandons it and returns
    /// `false`. Non-connection failures are fatal.
    async fn publish_event(
        &self,
        routing_key: &str,
        event: &crate::models::JobEvent,
        shutdown: &CancellationToken,
    ) -> Result<bool> {
        loop {
            self.transition(ExchangeState::Connecting);
            let attempt = tokio::select! {
                result = self.exchange.publish(routing_key, event) => result,
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, abandoning in-flight event");
                    return Ok(false);
                }
            };
            match attempt {
                Ok(()) => {
                    self.transition(ExchangeState::Connected);
                    return Ok(true);
                }
                Err(e) if e.is_connection() => {
                    self.transition(ExchangeState::Disconnected);
                    warn!(
                        "Exchange unreachable ({}), retrying in {:?}",
                        e, self.reconnect_delay
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.reconnect_delay) => {}
                        _ = shutdown.cancelled() => {
                            info!("Shutdown requested, abandoning in-flight event");
                            return Ok(false);
                        }
                    }
                }
                Err(e) => {
                    return Err(e).context("Unexpected failure publishing event, terminating");
                }
            }
        }
    }

    fn transition(&self, next: ExchangeState) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == next {
            return;
        }
        match next {
            ExchangeState::Connected => info!("Connected to message exchange"),
            ExchangeState::Disconnected => info!("Lost connection to message exchange"),
            ExchangeState::Connecting => {}
        }
        *state = next;
    }
}
