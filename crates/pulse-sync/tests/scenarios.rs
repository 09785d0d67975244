//! End-to-end client scenarios against the mock transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pulse_core::backoff::delay_window;
use pulse_core::schema::OPERATIONS_COLLECTION;
use pulse_sync::{
    names, ClientConfig, ClientState, ConnectionStatus, MockTransport, StorageManager, SyncClient,
    SyncClientBuilder, SyncError,
};
use serde_json::{json, Value};

fn config() -> ClientConfig {
    let mut config = ClientConfig::with_url("ws://localhost:3001");
    config.reconnect.interval_ms = 1000;
    config.reconnect.max_attempts = 3;
    config.connection.timeout_ms = 1000;
    config.health.ping_interval_ms = 0;
    config.health.check_interval_ms = 0;
    config
}

fn build(mock: &MockTransport, config: ClientConfig) -> SyncClient {
    let storage = Arc::new(StorageManager::in_memory(config.storage_schema()));
    SyncClientBuilder::new(config)
        .with_transport(Arc::new(mock.clone()))
        .with_token("token")
        .with_storage(storage)
        .build()
        .unwrap()
}

fn record(client: &SyncClient, event: &str) -> Arc<Mutex<Vec<Value>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let _ = client.on(event, move |v| sink.lock().unwrap().push(v.clone()));
    log
}

async fn persisted(client: &SyncClient) -> u64 {
    client
        .storage()
        .unwrap()
        .count(OPERATIONS_COLLECTION)
        .await
        .unwrap()
}

fn queued_events(client: &SyncClient) -> Vec<String> {
    client
        .queued_operations()
        .into_iter()
        .map(|op| op.event)
        .collect()
}

#[tokio::test(start_paused = true)]
async fn offline_ping_is_sent_once_after_reconnect() {
    let mock = MockTransport::new();
    mock.set_unreachable(true);
    let client = build(&mock, config());

    assert!(client.initialize().await.is_err());

    let response = client.send_event("ping", json!({})).await.unwrap();
    assert!(response.is_queued());
    assert_eq!(persisted(&client).await, 1);

    // First retry fires within [1000, 2000]ms.
    mock.set_unreachable(false);
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(client.is_connected());
    assert_eq!(mock.sent_event_names(), vec!["ping"]);
    assert_eq!(persisted(&client).await, 0);
    assert!(client.queued_operations().is_empty());

    // Nothing is resent later.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(mock.sent_event_names(), vec!["ping"]);
}

#[tokio::test(start_paused = true)]
async fn reconnect_backoff_windows_then_single_terminal_error() {
    let mock = MockTransport::new();
    mock.set_unreachable(true);
    let client = build(&mock, config());
    let errors = record(&client, names::CONNECTION_ERROR);

    assert!(client.initialize().await.is_err());
    tokio::time::sleep(Duration::from_secs(60)).await;

    let times = mock.connect_times();
    assert_eq!(times.len(), 4, "initial attempt plus three retries");
    for (attempt, pair) in times.windows(2).enumerate() {
        let gap = pair[1] - pair[0];
        let (min, max) = delay_window(Duration::from_secs(1), attempt as u32);
        assert!(gap >= min && gap <= max, "retry {attempt} after {gap:?}");
    }

    let errors = errors.lock().unwrap();
    let terminal: Vec<_> = errors.iter().filter(|e| e["fatal"] == true).collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(client.connection_state().status, ConnectionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn dropped_link_mid_replay_keeps_remaining_ops_at_head() {
    let mock = MockTransport::new();
    mock.set_unreachable(true);
    let mut config = config();
    config.reconnect.auto_reconnect = false;
    let client = build(&mock, config);

    let _ = client.initialize().await;
    for event in ["a", "b", "c"] {
        assert!(client.send_event(event, json!({})).await.unwrap().is_queued());
    }

    mock.set_unreachable(false);
    mock.close_on_next("b");
    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!client.is_connected());
    assert_eq!(mock.sent_event_names(), vec!["a", "b"]);
    assert_eq!(queued_events(&client), vec!["b", "c"]);
    assert_eq!(persisted(&client).await, 2);

    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(mock.sent_event_names(), vec!["a", "b", "b", "c"]);
    assert!(client.queued_operations().is_empty());
    assert_eq!(persisted(&client).await, 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_operation_is_dropped_after_max_retries() {
    let mock = MockTransport::new();
    mock.respond_with(
        "order:create",
        pulse_core::EventResponse::failure("REJECTED", "duplicate order"),
    );
    mock.set_unreachable(true);
    let mut config = config();
    config.queue.max_retries = 3;
    config.reconnect.auto_reconnect = false;
    let client = build(&mock, config);
    let failed = record(&client, names::OFFLINE_OPERATION_FAILED);

    let _ = client.initialize().await;
    client.send_event("order:create", json!({ "id": 7 })).await.unwrap();
    mock.set_unreachable(false);

    // One pass per reconnect.
    for _ in 0..3 {
        client.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.disconnect();
    }

    assert_eq!(mock.sent_event_names().len(), 3);
    assert!(client.queued_operations().is_empty());
    assert_eq!(persisted(&client).await, 0);

    let failed = failed.lock().unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0]["operation"]["retryCount"], 3);
    assert_eq!(failed[0]["error"]["message"], "duplicate order");
}

#[tokio::test(start_paused = true)]
async fn offline_send_without_offline_support_errors() {
    let mock = MockTransport::new();
    let mut config = config();
    config.offline_support = false;
    let client = build(&mock, config);

    let err = client.send_event("ping", json!({})).await.unwrap_err();
    assert!(matches!(err, SyncError::NotConnected));
    assert!(client.storage().is_none());
}

#[tokio::test(start_paused = true)]
async fn destroy_twice_leaves_initial_state() {
    let mock = MockTransport::new();
    let client = build(&mock, config());
    client.initialize().await.unwrap();
    let _sub = client.subscribe("notification:new", |_| {});

    client.destroy().await;
    client.destroy().await;

    assert_eq!(client.client_state(), ClientState::default());
    assert!(client.is_destroyed());
    assert!(client.events().is_destroyed());
}

#[tokio::test]
async fn queue_survives_restart_with_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.storage.database_path = Some(dir.path().join("pulse.db"));
    config.reconnect.auto_reconnect = false;

    let offline = MockTransport::new();
    offline.set_unreachable(true);
    let first = SyncClientBuilder::new(config.clone())
        .with_transport(Arc::new(offline))
        .with_token("token")
        .build()
        .unwrap();
    let _ = first.initialize().await;
    first.send_event("ping", json!({ "n": 1 })).await.unwrap();
    first.destroy().await;

    let online = MockTransport::new();
    let second = SyncClientBuilder::new(config)
        .with_transport(Arc::new(online.clone()))
        .with_token("token")
        .build()
        .unwrap();
    second.initialize().await.unwrap();

    for _ in 0..200 {
        if second.queued_operations().is_empty() && !online.sent_event_names().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(online.sent_event_names(), vec!["ping"]);
    assert!(second.queued_operations().is_empty());
    second.destroy().await;
}

#[tokio::test]
async fn offline_burst_replays_in_send_order_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.storage.database_path = Some(dir.path().join("pulse.db"));
    config.reconnect.auto_reconnect = false;

    let expected: Vec<String> = (0..30).map(|i| format!("e{i:02}")).collect();

    let offline = MockTransport::new();
    offline.set_unreachable(true);
    let first = SyncClientBuilder::new(config.clone())
        .with_transport(Arc::new(offline))
        .with_token("token")
        .build()
        .unwrap();
    let _ = first.initialize().await;
    for event in &expected {
        assert!(first.send_event(event, json!({})).await.unwrap().is_queued());
    }
    first.destroy().await;

    let online = MockTransport::new();
    let second = SyncClientBuilder::new(config)
        .with_transport(Arc::new(online.clone()))
        .with_token("token")
        .build()
        .unwrap();
    second.initialize().await.unwrap();

    for _ in 0..200 {
        if online.sent_event_names().len() == expected.len() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(online.sent_event_names(), expected);
    assert!(second.queued_operations().is_empty());
    second.destroy().await;
}
