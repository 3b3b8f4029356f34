//! End-to-end tests for the event daemon
//!
//! Run the daemon against a real watched directory and a recording
//! exchange, drive it by writing job files, and assert on the published
//! messages.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeExchange;
use gnt_sync::eventd::{EventDaemon, EventExchange};
use gnt_sync::models::JobEvent;
use tokio_util::sync::CancellationToken;

/// Poll the exchange until it holds `count` events or the deadline passes.
async fn wait_for_events(exchange: &FakeExchange, count: usize) -> Vec<(String, JobEvent)> {
    for _ in 0..100 {
        let events = exchange.published_events();
        if events.len() >= count {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!(
        "Timed out waiting for {} events, got {:?}",
        count,
        exchange.published_events()
    );
}

fn spawn_daemon(
    queue_dir: std::path::PathBuf,
    exchange: Arc<FakeExchange>,
) -> (CancellationToken, tokio::task::JoinHandle<anyhow::Result<()>>) {
    let daemon = EventDaemon::new(queue_dir, exchange as Arc<dyn EventExchange>, 0);
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move { daemon.run(token).await });
    (shutdown, handle)
}

#[tokio::test]
async fn test_job_file_is_published_with_routing_key() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = FakeExchange::new();
    let (shutdown, handle) = spawn_daemon(dir.path().to_path_buf(), exchange.clone());

    // Give the watch time to attach before creating the file.
    tokio::time::sleep(Duration::from_millis(100)).await;
    tokio::fs::write(
        dir.path().join("job-1773"),
        r#"{"id": 1773, "ops": [{
            "input": {"OP_ID": "OP_INSTANCE_SHUTDOWN", "instance_name": "snf-25"},
            "status": "success",
            "log": [[1, 1.0, "message", "instance stopped"]]
        }]}"#,
    )
    .await
    .unwrap();

    let events = wait_for_events(&exchange, 1).await;
    assert_eq!(events[0].0, "ganeti.snf.event.op");
    assert_eq!(events[0].1.event_type, "ganeti-op-status");
    assert_eq!(events[0].1.job_id, 1773);
    assert_eq!(events[0].1.instance, "snf-25");
    assert_eq!(events[0].1.status, "success");
    assert_eq!(events[0].1.logmsg.as_deref(), Some("instance stopped"));

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_multi_op_job_publishes_one_event_per_op() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = FakeExchange::new();
    let (shutdown, handle) = spawn_daemon(dir.path().to_path_buf(), exchange.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    tokio::fs::write(
        dir.path().join("job-8"),
        r#"{"id": 8, "ops": [
            {"input": {"OP_ID": "OP_INSTANCE_SHUTDOWN", "instance_name": "snf-5"},
             "status": "success", "log": []},
            {"input": {"OP_ID": "OP_INSTANCE_REMOVE", "instance_name": "snf-5"},
             "status": "success", "log": []}
        ]}"#,
    )
    .await
    .unwrap();

    let events = wait_for_events(&exchange, 2).await;
    assert_eq!(events[0].1.operation, "OP_INSTANCE_SHUTDOWN");
    assert_eq!(events[1].1.operation, "OP_INSTANCE_REMOVE");

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_non_job_and_malformed_files_are_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = FakeExchange::new();
    let (shutdown, handle) = spawn_daemon(dir.path().to_path_buf(), exchange.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    tokio::fs::write(dir.path().join("serial"), "17").await.unwrap();
    tokio::fs::write(dir.path().join("job-bad"), "{not json").await.unwrap();
    tokio::fs::write(
        dir.path().join("job-9"),
        r#"{"id": 9, "ops": [{
            "input": {"OP_ID": "OP_INSTANCE_STARTUP", "instance_name": "snf-2"},
            "status": "running", "log": []
        }]}"#,
    )
    .await
    .unwrap();

    // Only the well-formed job file produces an event.
    let events = wait_for_events(&exchange, 1).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1.job_id, 9);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_events_survive_broker_outage() {
    let dir = tempfile::tempdir().unwrap();
    let exchange = FakeExchange::failing_first(3);
    let (shutdown, handle) = spawn_daemon(dir.path().to_path_buf(), exchange.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    tokio::fs::write(
        dir.path().join("job-11"),
        r#"{"id": 11, "ops": [{
            "input": {"OP_ID": "OP_INSTANCE_REBOOT", "instance_name": "snf-4"},
            "status": "success", "log": []
        }]}"#,
    )
    .await
    .unwrap();

    // The event is retried through the outage and published exactly once.
    let events = wait_for_events(&exchange, 1).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].1.operation, "OP_INSTANCE_REBOOT");

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_during_broker_outage_stops_promptly() {
    let dir = tempfile::tempdir().unwrap();
    // The broker never comes back, so the daemon is stuck retrying the
    // in-flight event when shutdown arrives.
    let exchange = FakeExchange::failing_first(usize::MAX);
    let (shutdown, handle) = spawn_daemon(dir.path().to_path_buf(), exchange.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    tokio::fs::write(
        dir.path().join("job-33"),
        r#"{"id": 33, "ops": [{
            "input": {"OP_ID": "OP_INSTANCE_STARTUP", "instance_name": "snf-6"},
            "status": "success", "log": []
        }]}"#,
    )
    .await
    .unwrap();

    // Let the daemon pick the file up and enter the retry loop.
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown.cancel();

    let finished = tokio::time::timeout(Duration::from_secs(2), handle).await;
    finished
        .expect("daemon did not honor shutdown while retrying a publish")
        .unwrap()
        .unwrap();
    assert!(exchange.published_events().is_empty());
}

#[tokio::test]
async fn test_renamed_in_file_is_picked_up() {
    // The job queue materializes files by renaming them into place.
    let staging = tempfile::tempdir().unwrap();
    let queue = tempfile::tempdir().unwrap();
    let exchange = FakeExchange::new();
    let (shutdown, handle) = spawn_daemon(queue.path().to_path_buf(), exchange.clone());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let staged = staging.path().join("job-21");
    tokio::fs::write(
        &staged,
        r#"{"id": 21, "ops": [{
            "input": {"OP_ID": "OP_INSTANCE_CREATE", "instance_name": "snf-30"},
            "status": "success", "log": []
        }]}"#,
    )
    .await
    .unwrap();
    tokio::fs::rename(&staged, queue.path().join("job-21")).await.unwrap();

    let events = wait_for_events(&exchange, 1).await;
    assert_eq!(events[0].1.job_id, 21);
    assert_eq!(events[0].1.operation, "OP_INSTANCE_CREATE");

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}
