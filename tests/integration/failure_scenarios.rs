//! Failure tests for the broker
//!
//! Faults must stay contained:
//! - A failed publish drops one record, not the stream
//! - A bad command record is skipped
//! - A disconnect or shutdown releases everything the session held

use std::time::Duration;

use pretty_assertions::assert_eq;
use telemetry_broker::proto::{Command, CommandType};

use crate::helpers::*;

#[tokio::test]
async fn test_publish_failure_keeps_stream_alive() {
    let broker = spawn_broker().await;
    broker.log.fail_next_publishes(1);

    let mut client = broker.client().await;
    let mut agent = connect_agent(&mut client, Some("a1")).await;

    agent.send(metrics_request("a1", 0, 1.0)).await;
    agent.send(metrics_request("a1", 1, 2.0)).await;

    wait_until("one metrics record", || broker.log.records("metrics").len() == 1).await;
    let json = payload_json(&broker.log.records("metrics")[0]);
    assert_eq!(json["metrics"]["cpu_percent"], 2.0);

    // both directions still work
    agent.send(metrics_request("a1", 2, 3.0)).await;
    wait_until("two metrics records", || broker.log.records("metrics").len() == 2).await;

    broker.log.append("command", None, b"START");
    assert_eq!(agent.next_command().await, "START");

    drop(agent);
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_flush_failure_drops_record() {
    let broker = spawn_broker().await;
    let mut client = broker.client().await;
    let mut agent = connect_agent(&mut client, Some("a1")).await;

    broker.log.fail_flushes(true);
    agent.send(metrics_request("a1", 0, 1.0)).await;

    broker.log.append("command", None, b"STOP");
    assert_eq!(agent.next_command().await, "STOP");
    assert!(broker.registry.contains("a1"));

    drop(agent);
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_error_command_record_skipped() {
    let broker = spawn_broker().await;
    broker.log.append_error("command", "corrupt record");
    broker.log.append("command", None, b"START");

    let mut client = broker.client().await;
    let mut agent = connect_agent(&mut client, None).await;

    assert_eq!(agent.next_command().await, "START");
    agent.expect_no_command().await;

    drop(agent);
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_releases_subscription() {
    let broker = spawn_broker().await;
    let mut client = broker.client().await;
    let agent = connect_agent(&mut client, Some("a1")).await;

    wait_until("a1 to register", || broker.registry.contains("a1")).await;
    assert_eq!(broker.log.open_subscriptions(), 1);

    drop(agent);

    wait_until("subscription release", || broker.log.released_subscriptions() == 1).await;
    wait_until("a1 to unregister", || !broker.registry.contains("a1")).await;
    assert_eq!(broker.log.open_subscriptions(), 0);

    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_not_evicted_by_old_session() {
    let broker = spawn_broker().await;
    let mut client = broker.client().await;

    let old = connect_agent(&mut client, Some("a1")).await;
    wait_until("first session", || broker.log.open_subscriptions() == 1).await;

    let new = connect_agent(&mut client, Some("a1")).await;
    wait_until("second session", || broker.log.open_subscriptions() == 2).await;

    drop(old);
    wait_until("old session release", || broker.log.released_subscriptions() == 1).await;

    assert!(broker.registry.contains("a1"));

    drop(new);
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_live_sessions() {
    let mut broker = spawn_broker().await;
    let mut client = broker.client().await;
    let mut agent = connect_agent(&mut client, Some("a1")).await;

    wait_until("a1 to register", || broker.registry.contains("a1")).await;

    broker.trigger_shutdown();

    // command stream ends once the session is cancelled
    let ended = tokio::time::timeout(Duration::from_secs(2), agent.commands.message()).await;
    assert!(matches!(ended, Ok(Ok(None)) | Ok(Err(_))), "stream still open: {ended:?}");

    wait_until("subscription release", || broker.log.released_subscriptions() == 1).await;
    assert!(broker.registry.is_empty());

    drop(agent);
    drop(client);
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_send_command_rejects_bad_requests() {
    let broker = spawn_broker().await;
    let mut client = broker.client().await;

    let ack = client
        .send_command(Command {
            agent_id: String::new(),
            r#type: CommandType::Start as i32,
        })
        .await
        .unwrap()
        .into_inner();
    assert!(!ack.success);

    let ack = client
        .send_command(Command {
            agent_id: "a1".to_string(),
            r#type: 7,
        })
        .await
        .unwrap()
        .into_inner();
    assert!(!ack.success);

    assert!(broker.log.records("command").is_empty());

    broker.stop().await.unwrap();
}
