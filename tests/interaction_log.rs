//! Interaction log durability: concurrent appends and the full application lifecycle

mod common;

use common::*;
use config::{File, FileFormat};
use http_body_util::BodyExt;
use std::collections::HashSet;
use std::sync::Arc;
use tapline::config::Settings;
use tapline::interaction::{InteractionRecord, JsonlFileSink};
use tapline::Application;
use tokio::task::JoinSet;

fn read_records(contents: &str) -> Vec<InteractionRecord> {
    contents
        .lines()
        .map(|line| serde_json::from_str(line).expect("every line is one complete record"))
        .collect()
}

#[tokio::test]
async fn test_concurrent_requests_produce_one_intact_line_each() {
    let upstream = spawn_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("interactions.jsonl");
    let sink = Arc::new(JsonlFileSink::open(&path).await.unwrap());
    let (addr, logger) = serve_proxy(proxy_config(&upstream.base_url(), 5_000), sink).await;

    let client = client();
    let mut requests = JoinSet::new();
    for n in 0..50u32 {
        let client = client.clone();
        let (uri, body) = if n % 5 == 0 {
            (
                format!("http://{addr}/v1/chat"),
                serde_json::json!({"model": "demo", "stream": true, "n": n}),
            )
        } else {
            (
                format!("http://{addr}/echo?n={n}"),
                serde_json::json!({"n": n, "padding": "x".repeat(n as usize * 64)}),
            )
        };
        requests.spawn(async move {
            let response = client.request(json_request(&uri, body)).await.unwrap();
            response.into_body().collect().await.unwrap().to_bytes()
        });
    }
    while let Some(result) = requests.join_next().await {
        result.unwrap();
    }

    logger.flush().await;
    let records = read_records(&tokio::fs::read_to_string(&path).await.unwrap());
    assert_eq!(records.len(), 50);

    let ids: HashSet<_> = records.iter().map(|record| record.id).collect();
    assert_eq!(ids.len(), 50);

    for record in &records {
        let n = record.request.body.json().unwrap()["n"].as_u64().unwrap();
        if n % 5 == 0 {
            assert!(record.streaming);
            assert_eq!(record.stream().unwrap().chunk_count, 3);
        } else {
            assert!(record.request.url.ends_with(&format!("/echo?n={n}")));
            assert!(!record.streaming);
        }
    }
}

#[tokio::test]
async fn test_application_serves_and_flushes_log_on_shutdown() {
    let upstream = spawn_upstream().await;
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs/interactions.jsonl");

    let toml = format!(
        "[application]\nport = 0\n\
         [upstream]\nbase_url = {:?}\nread_timeout_ms = 2000\n\
         [log_sink]\nkind = \"jsonl\"\npath = {:?}\n",
        upstream.base_url(),
        path.display().to_string(),
    );
    let settings: Settings = Settings::builder()
        .unwrap()
        .add_source(File::from_str(&toml, FileFormat::Toml))
        .build()
        .unwrap()
        .try_deserialize()
        .unwrap();

    let app = Application::new(settings).await.unwrap();
    let addr = app.local_addr().unwrap();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(app.run_until(async {
        let _ = stop_rx.await;
    }));

    let response = client()
        .request(json_request(
            &format!("http://{addr}/v1/chat"),
            serde_json::json!({"model": "demo", "stream": false}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.into_body().collect().await.unwrap();

    stop_tx.send(()).unwrap();
    server.await.unwrap().unwrap();

    let records = read_records(&tokio::fs::read_to_string(&path).await.unwrap());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].request.url, format!("{}/v1/chat", upstream.base_url()));
    assert!(records[0].request.client_addr.is_some());
}
