//! Scrapes served while the engine refreshes in the background

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::{custom_query, FakeMailClient};
use prometheus::Registry;
use prometheus_gmail_exporter::config::Config;
use prometheus_gmail_exporter::engine::RefreshEngine;
use prometheus_gmail_exporter::readiness::{Readiness, ReadinessHandle};
use prometheus_gmail_exporter::scheduler::{ScheduleMode, Scheduler};
use prometheus_gmail_exporter::server::{router, ServerState, METRICS_PATH, READINESS_PATH};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

async fn get(app: Router, path: &str) -> (StatusCode, String) {
    let response = app
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn exporter_config() -> Config {
    let mut config = Config::default();
    config.labels.include = vec!["INBOX".to_string()];
    config.labels.sender_count = vec!["INBOX".to_string()];
    config.custom_queries = vec![custom_query("urgent", "is:important")];
    config
}

#[tokio::test]
async fn test_scrape_after_foreground_cycle() {
    let client = Arc::new(
        FakeMailClient::new()
            .with_label("INBOX", "INBOX", 42, 5)
            .with_unread_pages("INBOX", vec![vec![("t1", "a@x.com")]])
            .with_search("is:important", 7),
    );
    let registry = Registry::new();
    let readiness = ReadinessHandle::default();
    let mut engine = RefreshEngine::from_config(&exporter_config(), client, registry.clone())
        .with_readiness(readiness.clone());
    let app = router(ServerState::new(registry).with_readiness(readiness.clone()));

    let (status, body) = get(app.clone(), READINESS_PATH).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body, "awaiting-authorization");

    let cycles = Scheduler::new(ScheduleMode::Foreground)
        .run(&mut engine, CancellationToken::new())
        .await;
    assert_eq!(cycles, 1);

    let (status, body) = get(app.clone(), METRICS_PATH).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("gmail_INBOX_total 42"));
    assert!(body.contains("gmail_INBOX_unread 5"));
    assert!(body.contains(r#"gmail_INBOX_sender{sender="a@x.com"} 1"#));
    assert!(body.contains("gmail_urgent 7"));

    let (status, body) = get(app, READINESS_PATH).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Readiness::Ready.as_str());
}

#[tokio::test]
async fn test_namespace_prefixes_every_gauge() {
    let client = Arc::new(FakeMailClient::new().with_label("INBOX", "INBOX", 3, 1));
    let mut config = Config::default();
    config.labels.include = vec!["INBOX".to_string()];
    config.metrics.namespace = "mailbox".to_string();

    let registry = Registry::new();
    let mut engine = RefreshEngine::from_config(&config, client, registry.clone());
    engine.run_cycle().await;

    let (_, body) = get(router(ServerState::new(registry)), METRICS_PATH).await;
    assert!(body.contains("mailbox_INBOX_total 3"));
    assert!(!body.contains("gmail_"));
}

#[tokio::test]
async fn test_daemon_updates_are_visible_to_scrapes() {
    let client = Arc::new(FakeMailClient::new().with_label("INBOX", "INBOX", 1, 1));
    let mut config = Config::default();
    config.labels.include = vec!["INBOX".to_string()];

    let registry = Registry::new();
    let mut engine = RefreshEngine::from_config(&config, client.clone(), registry.clone());
    let app = router(ServerState::new(registry));

    let shutdown = CancellationToken::new();
    let scheduler = Scheduler::new(ScheduleMode::Daemon {
        interval: Duration::from_millis(10),
    });
    let token = shutdown.clone();
    let refresher = tokio::spawn(async move { scheduler.run(&mut engine, token).await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.set_label("INBOX", "INBOX", 2, 0);

    let mut updated = false;
    for _ in 0..100 {
        let (_, body) = get(app.clone(), METRICS_PATH).await;
        if body.contains("gmail_INBOX_total 2") && body.contains("gmail_INBOX_unread 0") {
            updated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown.cancel();
    let cycles = refresher.await.unwrap();

    assert!(updated);
    assert!(cycles >= 2);
}
