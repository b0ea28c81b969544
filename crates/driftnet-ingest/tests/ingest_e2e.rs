//! Full-pipeline test: in-process websocket relays, the real connector,
//! the worker pool, and a real SQLite database.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use driftnet_ingest::config::FileRelaySource;
use driftnet_ingest::processor::EventStore;
use driftnet_ingest::relay::WsConnector;
use driftnet_ingest::storage::EventFilter;
use driftnet_ingest::{EventProcessor, IngestConfig, RelayManager, StorageEngine};

/// A relay that serves a fixed event list to every subscriber, then holds
/// the connection open.
async fn spawn_relay(events: Vec<Value>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let events = events.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                // The client opens with its subscription request.
                let Some(Ok(Message::Text(req))) = ws.next().await else {
                    return;
                };
                let req: Value = serde_json::from_str(&req).unwrap();
                assert_eq!(req[0], "REQ");
                let sub_id = req[1].as_str().unwrap_or("sub").to_string();

                for event in &events {
                    let frame = json!(["EVENT", sub_id, event]).to_string();
                    if ws.send(Message::Text(frame)).await.is_err() {
                        return;
                    }
                }
                let eose = json!(["EOSE", sub_id]).to_string();
                let _ = ws.send(Message::Text(eose)).await;

                // Stay connected; live events would follow here.
                while let Some(Ok(_)) = ws.next().await {}
            });
        }
    });
    (url, handle)
}

fn event(id: &str, created_at: i64, content: &str) -> Value {
    json!({
        "id": id,
        "pubkey": "35e433c42e5bb838daabd178d54620e427cccb214c55b95daac3dbd9506fbcaf",
        "created_at": created_at,
        "kind": 1,
        "content": content,
        "sig": "00",
        "tags": [["t", "test"]]
    })
}

#[tokio::test]
async fn overlapping_relays_index_once_with_both_sources() {
    let shared = event("shared", 300, "gossip seen everywhere");
    let only_r1 = event("only-r1", 100, "alpha exclusive");
    let only_r2 = event("only-r2", 200, "bravo exclusive");

    let (r1_url, r1) = spawn_relay(vec![shared.clone(), only_r1]).await;
    let (r2_url, r2) = spawn_relay(vec![shared, only_r2]).await;

    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    std::fs::write(
        &config_path,
        json!({ "relays": [r1_url, r2_url] }).to_string(),
    )
    .unwrap();

    let config = IngestConfig {
        worker_pool_size: 2,
        event_batch_size: 10,
        event_batch_interval: Duration::from_millis(50),
        reconnect_delay: Duration::from_millis(50),
        reconcile_interval: Duration::from_millis(100),
        ..IngestConfig::default()
    };

    let database_url = format!("sqlite://{}", dir.path().join("events.db").display());
    let storage = Arc::new(StorageEngine::new(database_url, &config));
    storage.initialize().await.unwrap();

    let processor = Arc::new(EventProcessor::new(
        &config,
        Arc::clone(&storage) as Arc<dyn EventStore>,
    ));
    processor.start();

    let manager = Arc::new(RelayManager::new(
        config,
        Arc::new(FileRelaySource::new(&config_path)),
        Arc::new(WsConnector),
        Arc::clone(&processor),
    ));
    let run = tokio::spawn(Arc::clone(&manager).run());

    // Wait until both relays have reported the shared event.
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let sources = storage.get_event_sources("shared").await.unwrap();
            if sources.len() == 2 && storage.event_count().await.unwrap() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("pipeline did not converge in time");

    manager.stop();
    let _ = run.await;
    processor.shutdown().await;
    r1.abort();
    r2.abort();

    // The shared event exists once, attributed to both relays.
    assert_eq!(storage.event_count().await.unwrap(), 3);
    let mut sources = storage.get_event_sources("shared").await.unwrap();
    sources.sort();
    let mut expected = vec![r1_url.clone(), r2_url.clone()];
    expected.sort();
    assert_eq!(sources, expected);

    // Filtering by the second relay returns its two events, and the shared
    // one still carries both source relays.
    let result = storage
        .query_events(&EventFilter {
            relay: Some(r2_url.clone()),
            ..Default::default()
        })
        .await
        .unwrap();
    let ids: Vec<&str> = result.events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["shared", "only-r2"]);
    assert_eq!(result.total, 2);
    let shared_row = &result.events[0];
    assert_eq!(shared_row.relays.len(), 2);
    assert!(shared_row.npub.starts_with("npub1"));

    // Full-text search reaches events from either relay.
    let result = storage
        .query_events(&EventFilter {
            q: Some("exclusive".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    let ids: Vec<&str> = result.events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, ["only-r2", "only-r1"]);
}
