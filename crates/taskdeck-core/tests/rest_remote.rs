use std::sync::Arc;
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Value, json};
use taskdeck_core::datastore::rest::RestSettings;
use taskdeck_core::{
    ChangeKind, NewTask, Priority, RemoteError, RemoteStore, RestRemote, TaskId, TaskPatch,
};

/// What the stand-in table server saw and holds.
#[derive(Debug, Default)]
struct Table {
    // newest first, like `order=created_at.desc`
    rows: Vec<Value>,
    next_id: u64,
    prefer: Vec<String>,
    api_keys: Vec<String>,
    list_queries: Vec<String>,
}

type Shared = Arc<Mutex<Table>>;

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn record_prefer(table: &mut Table, headers: &HeaderMap) {
    if let Some(prefer) = header(headers, "prefer") {
        table.prefer.push(prefer);
    }
}

fn row_id(query: Option<&str>) -> Option<String> {
    query?.strip_prefix("id=eq.").map(str::to_string)
}

fn position(table: &Table, id: &str) -> Option<usize> {
    table
        .rows
        .iter()
        .position(|row| row["id"].to_string() == id)
}

async fn list(
    State(shared): State<Shared>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Json<Vec<Value>> {
    let mut table = shared.lock();
    if let Some(key) = header(&headers, "apikey") {
        table.api_keys.push(key);
    }
    table.list_queries.push(query.unwrap_or_default());
    Json(table.rows.clone())
}

async fn insert(
    State(shared): State<Shared>,
    headers: HeaderMap,
    Json(mut row): Json<Value>,
) -> (StatusCode, Json<Vec<Value>>) {
    let mut table = shared.lock();
    record_prefer(&mut table, &headers);
    table.next_id += 1;
    let now = Utc::now().to_rfc3339();
    if let Some(fields) = row.as_object_mut() {
        fields.insert("id".to_string(), json!(table.next_id));
        fields.insert("created_at".to_string(), json!(now));
        fields.insert("updated_at".to_string(), json!(now));
    }
    table.rows.insert(0, row.clone());
    (StatusCode::CREATED, Json(vec![row]))
}

async fn patch_row(
    State(shared): State<Shared>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
    Json(patch): Json<Value>,
) -> Json<Vec<Value>> {
    let mut table = shared.lock();
    record_prefer(&mut table, &headers);
    let Some(idx) = row_id(query.as_deref()).and_then(|id| position(&table, &id)) else {
        return Json(Vec::new());
    };
    let row = &mut table.rows[idx];
    if let (Some(fields), Some(changes)) = (row.as_object_mut(), patch.as_object()) {
        for (key, value) in changes {
            fields.insert(key.clone(), value.clone());
        }
        fields.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));
    }
    Json(vec![row.clone()])
}

async fn delete_row(
    State(shared): State<Shared>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Json<Vec<Value>> {
    let mut table = shared.lock();
    record_prefer(&mut table, &headers);
    match row_id(query.as_deref()).and_then(|id| position(&table, &id)) {
        Some(idx) => Json(vec![table.rows.remove(idx)]),
        None => Json(Vec::new()),
    }
}

async fn expired() -> (StatusCode, &'static str) {
    (StatusCode::UNAUTHORIZED, "JWT expired")
}

async fn garbled() -> &'static str {
    "<html>maintenance</html>"
}

async fn no_rows() -> (StatusCode, Json<Vec<Value>>) {
    (StatusCode::CREATED, Json(Vec::new()))
}

fn app(shared: Shared) -> Router {
    Router::new()
        .route(
            "/rest/v1/tasks",
            get(list).post(insert).patch(patch_row).delete(delete_row),
        )
        .route("/rest/v1/locked", get(expired).post(expired))
        .route("/rest/v1/garbled", get(garbled))
        .route("/rest/v1/silent", post(no_rows))
        .with_state(shared)
}

async fn serve() -> (String, Shared) {
    let shared = Shared::default();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    let router = app(Arc::clone(&shared));
    tokio::spawn(async move { axum::serve(listener, router).await });
    (format!("http://{addr}"), shared)
}

fn client(base: &str, table: &str) -> RestRemote {
    RestRemote::new(&RestSettings {
        url: base.to_string(),
        api_key: Some("anon-key".to_string()),
        table: table.to_string(),
        poll_interval: Duration::from_millis(25),
        timeout: Duration::from_secs(5),
    })
    .expect("remote")
}

#[tokio::test]
async fn rows_round_trip_through_the_table() {
    let (base, shared) = serve().await;
    let remote = client(&base, "tasks");

    let created = remote
        .insert(&NewTask::new(
            "Write report",
            Some("2024-03-20".to_string()),
            Priority::High,
        ))
        .await
        .expect("insert");
    assert_eq!(created.id, TaskId::new("1"));
    assert_eq!(created.title, "Write report");
    assert!(!created.completed);

    remote
        .update(&created.id, &TaskPatch::completed(true))
        .await
        .expect("update");
    let rows = remote.fetch_all().await.expect("fetch");
    assert_eq!(rows.len(), 1);
    assert!(rows[0].completed);
    assert_eq!(rows[0].due_date.as_deref(), Some("2024-03-20"));

    remote.delete(&created.id).await.expect("delete");
    assert!(remote.fetch_all().await.expect("fetch").is_empty());

    let table = shared.lock();
    assert_eq!(table.prefer, vec!["return=representation"; 3]);
    assert!(table.api_keys.iter().all(|key| key == "anon-key"));
    assert_eq!(table.list_queries[0], "select=*&order=created_at.desc");
}

#[tokio::test]
async fn empty_representation_means_not_found() {
    let (base, _shared) = serve().await;
    let remote = client(&base, "tasks");
    let missing = TaskId::new("42");

    assert_eq!(
        remote.update(&missing, &TaskPatch::completed(true)).await,
        Err(RemoteError::NotFound(missing.clone()))
    );
    assert_eq!(
        remote.delete(&missing).await,
        Err(RemoteError::NotFound(missing))
    );
}

#[tokio::test]
async fn error_status_carries_code_and_body() {
    let (base, _shared) = serve().await;
    let remote = client(&base, "locked");

    match remote.fetch_all().await {
        Err(RemoteError::Http { status, body }) => {
            assert_eq!(status, 401);
            assert_eq!(body, "JWT expired");
        }
        other => panic!("expected http error, got {other:?}"),
    }
    assert!(matches!(
        remote
            .insert(&NewTask::new("x", None, Priority::Low))
            .await,
        Err(RemoteError::Http { status: 401, .. })
    ));
}

#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let (base, _shared) = serve().await;
    let remote = client(&base, "garbled");

    assert!(matches!(
        remote.fetch_all().await,
        Err(RemoteError::Decode(_))
    ));
}

#[tokio::test]
async fn insert_without_returned_row_is_a_decode_error() {
    let (base, _shared) = serve().await;
    let remote = client(&base, "silent");

    match remote
        .insert(&NewTask::new("Lost", None, Priority::Medium))
        .await
    {
        Err(RemoteError::Decode(message)) => assert!(message.contains("no row")),
        other => panic!("expected decode error, got {other:?}"),
    }
}

#[tokio::test]
async fn poller_reports_table_changes() {
    let (base, _shared) = serve().await;
    let remote = client(&base, "tasks");
    let mut feed = remote.subscribe().await.expect("subscribe");

    let created = remote
        .insert(&NewTask::new("Watch me", None, Priority::Low))
        .await
        .expect("insert");
    let event = tokio::time::timeout(Duration::from_secs(5), feed.recv())
        .await
        .expect("insert event within timeout")
        .expect("feed open");
    assert_eq!(event.kind, ChangeKind::Insert);

    remote.delete(&created.id).await.expect("delete");
    let event = tokio::time::timeout(Duration::from_secs(5), feed.recv())
        .await
        .expect("delete event within timeout")
        .expect("feed open");
    assert_eq!(event.kind, ChangeKind::Delete);
}
