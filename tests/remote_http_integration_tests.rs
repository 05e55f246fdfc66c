//! Contract tests for the HTTP RemoteStore against a mock server
//!
//! Covers content-type handling, empty responses, status codes and the
//! full-replace POST body, plus how the StateStore reacts to each.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use syncdeck::remote::{FailureKind, HttpRemoteStore};
use syncdeck::sync::SyncError;
use syncdeck::{
    FetchOutcome, ReadinessState, RemoteError, RemoteStore, Snapshot, StateStore, StoreOptions,
    SyncWriter,
};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> HttpRemoteStore {
    HttpRemoteStore::new(&server.uri(), Duration::from_secs(2)).unwrap()
}

fn sample_snapshot() -> Snapshot {
    let mut snapshot = Snapshot::default();
    snapshot.revision = 9;
    snapshot
        .collections
        .insert("reports".to_string(), vec![json!({"title": "weekly"})]);
    snapshot
}

#[tokio::test]
async fn test_fetch_json_snapshot() {
    let server = MockServer::start().await;
    let snapshot = sample_snapshot();
    Mock::given(method("GET"))
        .and(path("/state"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&snapshot))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client(&server).fetch().await.unwrap();
    assert_eq!(outcome, FetchOutcome::Found(snapshot));
}

#[tokio::test]
async fn test_no_content_and_empty_object_are_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let remote = client(&server);
    assert_eq!(remote.fetch().await.unwrap(), FetchOutcome::Empty);
    assert_eq!(remote.fetch().await.unwrap(), FetchOutcome::Empty);
}

#[tokio::test]
async fn test_html_content_type_is_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string("<!doctype html><html><body>index</body></html>"),
        )
        .mount(&server)
        .await;

    let err = client(&server).fetch().await.unwrap_err();
    assert!(matches!(err, RemoteError::UnexpectedContentType { ref found } if found.starts_with("text/html")));
    assert_eq!(err.kind(), FailureKind::Transport);
}

#[tokio::test]
async fn test_server_error_is_status_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server).fetch().await.unwrap_err();
    assert!(matches!(err, RemoteError::Status(503)));
}

#[tokio::test]
async fn test_malformed_json_is_schema_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string(r#"{"revision": "nine"}"#),
        )
        .mount(&server)
        .await;

    let err = client(&server).fetch().await.unwrap_err();
    assert_eq!(err.kind(), FailureKind::Schema);
}

#[tokio::test]
async fn test_replace_posts_full_snapshot() {
    let server = MockServer::start().await;
    let snapshot = sample_snapshot();
    Mock::given(method("POST"))
        .and(path("/state"))
        .and(header("content-type", "application/json"))
        .and(body_json(&snapshot))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).replace(&snapshot).await.unwrap();
}

#[tokio::test]
async fn test_degraded_bootstrap_never_posts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html></html>"),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let remote: Arc<dyn RemoteStore> = Arc::new(client(&server));
    let store = StateStore::new(remote.clone(), StoreOptions::default());
    assert_eq!(store.ensure_ready().await, Ok(ReadinessState::Degraded));
    assert_eq!(store.snapshot().unwrap(), Snapshot::default());

    // Local edits keep working but stay off the wire
    let writer = SyncWriter::spawn(store.clone(), remote, Duration::from_secs(60));
    store.push_to_collection("notes", json!("offline")).unwrap();
    assert_eq!(writer.handle().flush_now().await, Err(SyncError::Degraded));
    writer.shutdown().await;
}

#[tokio::test]
async fn test_empty_remote_is_seeded_then_flushed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    // One seed write from bootstrap, one explicit flush
    Mock::given(method("POST"))
        .and(path("/state"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let remote: Arc<dyn RemoteStore> = Arc::new(client(&server));
    let store = StateStore::new(remote.clone(), StoreOptions::default());
    assert_eq!(store.ensure_ready().await, Ok(ReadinessState::Ready));

    let writer = SyncWriter::spawn(store.clone(), remote, Duration::from_secs(60));
    store.push_to_collection("notes", json!("hello")).unwrap();
    let revision = writer.handle().flush_now().await.unwrap();
    assert_eq!(revision, 1);
    writer.shutdown().await;
}
