//! Job-queue directory watcher.
//!
//! A dedicated thread polls a non-blocking inotify descriptor and forwards
//! file events into a bounded channel the async daemon consumes. Files are
//! reported on rename-in and on close-after-write, which covers both ways
//! the job queue materializes files. Dropping the returned handle stops
//! the thread and closes the watch descriptor.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::inotify::{AddWatchFlags, InitFlags, Inotify};
use tokio::sync::mpsc::Sender;
use tracing::debug;

/// How often the watch thread checks for new events and the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub enum WatchEvent {
    /// A file appeared or was rewritten in the watched directory.
    JobFile(PathBuf),
    /// The watch itself broke; the daemon must stop rather than run blind.
    Fault(String),
}

/// Running watch thread. Dropping it stops the thread and closes the
/// inotify descriptor.
pub struct WatchHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Start the watch thread over `queue_dir`.
///
/// The thread runs until the handle is dropped, the receiver side goes
/// away or a fault occurs.
pub fn spawn_watch_thread(queue_dir: &Path, tx: Sender<WatchEvent>) -> Result<WatchHandle> {
    let mask = AddWatchFlags::IN_MOVED_TO | AddWatchFlags::IN_CLOSE_WRITE;

    let inotify = Inotify::init(InitFlags::IN_CLOEXEC | InitFlags::IN_NONBLOCK)
        .context("Failed to initialize inotify")?;
    inotify
        .add_watch(queue_dir, mask)
        .with_context(|| format!("Failed to watch job queue directory {:?}", queue_dir))?;

    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();
    let dir = queue_dir.to_path_buf();
    let thread = std::thread::Builder::new()
        .name("job-queue-watch".to_string())
        .spawn(move || watch_loop(&inotify, &dir, mask, &tx, &thread_stop))
        .context("Failed to spawn watch thread")?;
    Ok(WatchHandle {
        stop,
        thread: Some(thread),
    })
}

fn watch_loop(
    inotify: &Inotify,
    dir: &Path,
    mask: AddWatchFlags,
    tx: &Sender<WatchEvent>,
    stop: &AtomicBool,
) {
    while !stop.load(Ordering::Relaxed) {
        let events = match inotify.read_events() {
            Ok(events) => events,
            Err(Errno::EAGAIN) => {
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
            Err(e) => {
                let _ = tx.blocking_send(WatchEvent::Fault(format!("inotify read failed: {}", e)));
                return;
            }
        };

        for event in events {
            if event.mask.contains(AddWatchFlags::IN_Q_OVERFLOW) {
                // Events were dropped by the kernel; continuing would mean
                // silently missing jobs.
                let _ = tx.blocking_send(WatchEvent::Fault(
                    "inotify event queue overflowed, job events were lost".to_string(),
                ));
                return;
            }
            if !event.mask.intersects(mask) {
                debug!("Ignoring inotify event with mask {:?}", event.mask);
                continue;
            }
            let Some(name) = event.name else { continue };
            if tx.blocking_send(WatchEvent::JobFile(dir.join(&name))).is_err() {
                // Receiver gone, the daemon shut down.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_dropping_handle_stops_the_thread() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = tokio::sync::mpsc::channel(16);

        let handle = spawn_watch_thread(dir.path(), tx).unwrap();

        // Drop joins the thread, which closes the inotify descriptor. A
        // hanging join would mean the watch outlives the daemon.
        let started = Instant::now();
        drop(handle);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_watch_fails_on_missing_directory() {
        let (tx, _rx) = tokio::sync::mpsc::channel(16);
        assert!(spawn_watch_thread(Path::new("/nonexistent-queue-dir"), tx).is_err());
    }
}
