//! Metrics in, commands out, over a real gRPC connection

use std::collections::HashMap;

use pretty_assertions::assert_eq;
use telemetry_broker::proto::{Command, CommandType, MetricsRequest, SystemMetrics};

use crate::helpers::*;

#[tokio::test]
async fn test_metrics_published_in_order_keyed_by_agent() {
    let broker = spawn_broker().await;
    let mut client = broker.client().await;
    let agent = connect_agent(&mut client, None).await;

    for (i, cpu) in [10.0, 20.0, 30.0].into_iter().enumerate() {
        agent.send(metrics_request("a1", 1_700_000_000 + i as i64, cpu)).await;
    }

    wait_until("three metrics records", || broker.log.records("metrics").len() == 3).await;

    let records = broker.log.records("metrics");
    let published: Vec<(String, f64)> = records
        .iter()
        .map(|record| {
            assert_eq!(record.key.as_deref(), Some(&b"a1"[..]));
            let json = payload_json(record);
            (
                json["timestamp"].as_str().unwrap().to_string(),
                json["metrics"]["cpu_percent"].as_f64().unwrap(),
            )
        })
        .collect();

    assert_eq!(
        published,
        vec![
            ("2023-11-14T22:13:20Z".to_string(), 10.0),
            ("2023-11-14T22:13:21Z".to_string(), 20.0),
            ("2023-11-14T22:13:22Z".to_string(), 30.0),
        ]
    );

    drop(agent);
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_record_flattened_into_envelope() {
    let broker = spawn_broker().await;
    let mut client = broker.client().await;
    let agent = connect_agent(&mut client, None).await;

    agent
        .send(MetricsRequest {
            agent_id: "a1".to_string(),
            hostname: "db-1".to_string(),
            timestamp: 1_700_000_000,
            metrics: Some(SystemMetrics {
                cpu_percent: 12.5,
                custom_metrics: HashMap::from([("queue_depth".to_string(), "7".to_string())]),
                ..Default::default()
            }),
            metadata: HashMap::from([("region".to_string(), "eu-1".to_string())]),
        })
        .await;

    wait_until("one metrics record", || broker.log.records("metrics").len() == 1).await;

    let json = payload_json(&broker.log.records("metrics")[0]);
    assert_eq!(json["agent_id"], "a1");
    assert_eq!(json["metrics"]["cpu_percent"], 12.5);
    assert_eq!(json["metrics"]["queue_depth"], 7.0);
    assert_eq!(json["metadata"]["hostname"], "db-1");
    assert_eq!(json["metadata"]["region"], "eu-1");

    drop(agent);
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_command_history_delivered_in_order() {
    let broker = spawn_broker().await;
    broker.log.append("command", Some(b"a1"), b"START");
    broker.log.append("command", Some(b"a1"), b"STOP");

    let mut client = broker.client().await;
    let mut agent = connect_agent(&mut client, Some("a1")).await;

    assert_eq!(agent.next_command().await, "START");
    assert_eq!(agent.next_command().await, "STOP");
    agent.expect_no_command().await;

    drop(agent);
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_every_session_sees_full_history() {
    let broker = spawn_broker().await;
    broker.log.append("command", None, b"START");

    let mut client = broker.client().await;
    let mut first = connect_agent(&mut client, Some("a1")).await;
    let mut second = connect_agent(&mut client, Some("a2")).await;

    assert_eq!(first.next_command().await, "START");
    assert_eq!(second.next_command().await, "START");

    broker.log.append("command", None, b"STOP");
    assert_eq!(first.next_command().await, "STOP");
    assert_eq!(second.next_command().await, "STOP");

    drop((first, second));
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_send_command_reaches_connected_agent() {
    let broker = spawn_broker().await;
    let mut client = broker.client().await;
    let mut agent = connect_agent(&mut client, Some("a1")).await;

    wait_until("a1 to register", || broker.registry.contains("a1")).await;

    let ack = client
        .send_command(Command {
            agent_id: "a1".to_string(),
            r#type: CommandType::Start as i32,
        })
        .await
        .unwrap()
        .into_inner();

    assert!(ack.success);
    assert_eq!(ack.message, "START queued for a1 (connected)");
    assert_eq!(agent.next_command().await, "START");

    let records = broker.log.records("command");
    assert_eq!(records[0].key.as_deref(), Some(&b"a1"[..]));

    drop(agent);
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_agent_registered_from_first_record() {
    let broker = spawn_broker().await;
    let mut client = broker.client().await;
    let agent = connect_agent(&mut client, None).await;

    agent.send(metrics_request("a9", 0, 1.0)).await;
    wait_until("a9 to register", || broker.registry.contains("a9")).await;

    assert_eq!(broker.registry.agent_ids(), vec!["a9"]);

    drop(agent);
    broker.stop().await.unwrap();
}

#[tokio::test]
async fn test_commands_flow_after_metrics_stream_ends() {
    let broker = spawn_broker().await;
    let mut client = broker.client().await;
    let AgentConnection {
        metrics,
        mut commands,
    } = connect_agent(&mut client, Some("a1")).await;

    metrics.send(metrics_request("a1", 0, 1.0)).await.unwrap();
    wait_until("one metrics record", || broker.log.records("metrics").len() == 1).await;
    drop(metrics);

    broker.log.append("command", None, b"STOP");
    let command = tokio::time::timeout(std::time::Duration::from_secs(2), commands.message())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(command.command, "STOP");

    drop(commands);
    broker.stop().await.unwrap();
}
