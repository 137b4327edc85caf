//! Client behaviour against a mocked admin API.

use tokio_util::sync::CancellationToken;
use vector_rebuild::config::ClientConfig;
use vector_rebuild::models::{RebuildFilters, RebuildProgressEvent, RebuildStatus};
use vector_rebuild::{Error, RebuildClient};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STREAM_PATH: &str = "/rag/admin/vector/rebuild/stream";

/// Encode events the way the server frames them.
fn sse(events: &[serde_json::Value]) -> String {
    events
        .iter()
        .enumerate()
        .map(|(i, ev)| format!("event: rebuild_update\nid: {i}\ndata: {ev}\n\n"))
        .collect()
}

fn event(status: &str, progress: f64) -> serde_json::Value {
    serde_json::json!({
        "status": status,
        "progress": progress,
        "message": format!("{status} at {progress}"),
        "total_chunks": 10,
        "processed_chunks": 0,
        "total_documents": 2,
        "processed_documents": 0,
    })
}

async fn mount_stream(server: &MockServer, body: String) {
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .and(header("authorization", "Bearer admin-token"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(server)
        .await;
}

fn client(server: &MockServer) -> RebuildClient {
    RebuildClient::new(ClientConfig::new(server.uri(), "admin-token")).unwrap()
}

async fn collect_run(
    client: &RebuildClient,
    filters: &RebuildFilters,
) -> (vector_rebuild::Result<vector_rebuild::models::RebuildOutcome>, Vec<RebuildProgressEvent>) {
    let mut seen = Vec::new();
    let outcome = client
        .rebuild_with_progress(filters, CancellationToken::new(), |ev| seen.push(ev.clone()))
        .await;
    (outcome, seen)
}

#[tokio::test]
async fn test_completed_stream_succeeds() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        sse(&[
            event("starting", 0.0),
            event("counting", 10.0),
            event("processing", 50.0),
            event("completed", 100.0),
        ]),
    )
    .await;

    let (outcome, seen) = collect_run(&client(&server), &RebuildFilters::default()).await;
    let outcome = outcome.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.data.progress, 100.0);
    assert_eq!(seen.len(), 4);
    assert_eq!(seen.last().unwrap().status, RebuildStatus::Completed);
}

#[tokio::test]
async fn test_progress_seen_by_callback_is_non_decreasing() {
    let server = MockServer::start().await;
    mount_stream(
        &server,
        sse(&[
            event("starting", 0.0),
            event("initializing", 5.0),
            event("counting", 10.0),
            event("processing", 26.0),
            event("processing", 58.0),
            event("finalizing", 95.0),
            event("completed", 100.0),
        ]),
    )
    .await;

    let (_, seen) = collect_run(&client(&server), &RebuildFilters::default()).await;
    assert_eq!(seen.len(), 7);
    assert!(seen.windows(2).all(|w| w[0].progress <= w[1].progress));
}

#[tokio::test]
async fn test_failed_stream_surfaces_server_message() {
    let server = MockServer::start().await;
    let failed = serde_json::json!({"status": "failed", "progress": 36.7, "message": "X"});
    mount_stream(&server, sse(&[event("starting", 0.0), failed])).await;

    let (outcome, _) = collect_run(&client(&server), &RebuildFilters::default()).await;
    let outcome = outcome.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message(), "X");

    match outcome.into_result() {
        Err(Error::RebuildFailed { message, data }) => {
            assert_eq!(message, "X");
            assert_eq!(data.progress, 36.7);
        }
        other => panic!("expected RebuildFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_line_does_not_change_outcome() {
    let clean = sse(&[event("starting", 0.0), event("processing", 50.0), event("completed", 100.0)]);
    let corrupted = format!(
        "data: {}\n\ndata: {{\"status\": \"proc\n\ndata: {}\n\ndata: {}\n\n",
        event("starting", 0.0),
        event("processing", 50.0),
        event("completed", 100.0)
    );

    let clean_server = MockServer::start().await;
    mount_stream(&clean_server, clean).await;
    let corrupt_server = MockServer::start().await;
    mount_stream(&corrupt_server, corrupted).await;

    let (clean_outcome, clean_seen) = collect_run(&client(&clean_server), &RebuildFilters::default()).await;
    let (corrupt_outcome, corrupt_seen) =
        collect_run(&client(&corrupt_server), &RebuildFilters::default()).await;

    assert_eq!(clean_outcome.unwrap(), corrupt_outcome.unwrap());
    assert_eq!(clean_seen, corrupt_seen);
}

#[tokio::test]
async fn test_http_500_rejects_before_any_callback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(STREAM_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&server)
        .await;

    let (outcome, seen) = collect_run(&client(&server), &RebuildFilters::default()).await;
    let err = outcome.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.status(), Some(500));
    assert!(seen.is_empty());
}

#[tokio::test]
async fn test_unreachable_server_is_transport_error() {
    // Nothing listens on a freshly released port
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let client = RebuildClient::new(ClientConfig::new(format!("http://{addr}"), "t")).unwrap();
    let err = client
        .rebuild_with_progress(&RebuildFilters::default(), CancellationToken::new(), |_| {})
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.status(), None);
}

#[tokio::test]
async fn test_stream_without_terminal_event_is_truncated() {
    let server = MockServer::start().await;
    mount_stream(&server, sse(&[event("starting", 0.0), event("processing", 40.0)])).await;

    let (outcome, seen) = collect_run(&client(&server), &RebuildFilters::default()).await;
    assert_eq!(seen.len(), 2);
    match outcome {
        Err(Error::StreamTruncated { last_event: Some(last) }) => {
            assert_eq!(last.status, RebuildStatus::Processing);
            assert_eq!(last.progress, 40.0);
        }
        other => panic!("expected StreamTruncated, got {other:?}"),
    }
}

#[tokio::test]
async fn test_filters_sent_as_query_parameters() {
    let server = MockServer::start().await;
    mount_stream(&server, sse(&[event("completed", 100.0)])).await;

    let filters = RebuildFilters::for_user("u1").with_batch_size(50);
    let (outcome, _) = collect_run(&client(&server), &filters).await;
    assert!(outcome.unwrap().success);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].url.query(), Some("user_filter=u1&batch_size=50"));
}

#[tokio::test]
async fn test_no_filters_sends_no_query() {
    let server = MockServer::start().await;
    mount_stream(&server, sse(&[event("completed", 100.0)])).await;

    let (outcome, _) = collect_run(&client(&server), &RebuildFilters::default()).await;
    assert!(outcome.is_ok());

    let requests = server.received_requests().await.unwrap();
    assert!(requests[0].url.query().map_or(true, str::is_empty));
}

#[tokio::test]
async fn test_cancelled_token_rejects_without_request() {
    let server = MockServer::start().await;
    mount_stream(&server, sse(&[event("completed", 100.0)])).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = client(&server)
        .rebuild_with_progress(&RebuildFilters::default(), cancel, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_one_stream_at_a_time_per_client() {
    let server = MockServer::start().await;
    mount_stream(&server, sse(&[event("starting", 0.0), event("completed", 100.0)])).await;
    let client = client(&server);

    let first = client
        .rebuild_stream(&RebuildFilters::default(), CancellationToken::new())
        .await
        .unwrap();
    assert!(client.is_rebuilding());

    let second = client
        .rebuild_stream(&RebuildFilters::default(), CancellationToken::new())
        .await;
    assert!(matches!(second, Err(Error::RebuildInProgress)));

    drop(first);
    assert!(!client.is_rebuilding());
    assert!(client
        .rebuild_stream(&RebuildFilters::default(), CancellationToken::new())
        .await
        .is_ok());
}

#[tokio::test]
async fn test_zero_batch_size_rejected_locally() {
    let server = MockServer::start().await;
    let (outcome, _) = collect_run(&client(&server), &RebuildFilters::default().with_batch_size(0)).await;
    assert!(matches!(outcome, Err(Error::InvalidFilters(_))));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_trigger_rebuild_returns_ack() {
    let server = MockServer::start().await;
    let run_id = uuid::Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/rag/admin/vector/rebuild"))
        .and(header("authorization", "Bearer admin-token"))
        .respond_with(ResponseTemplate::new(202).set_body_json(serde_json::json!({
            "message": "Vector store rebuild started",
            "run_id": run_id,
            "filters": {"document_filter": "d1", "batch_size": 100},
        })))
        .mount(&server)
        .await;

    let ack = client(&server)
        .trigger_rebuild(&RebuildFilters::for_document("d1"))
        .await
        .unwrap();
    assert_eq!(ack.run_id, run_id);
    assert_eq!(ack.filters.document_filter.as_deref(), Some("d1"));

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].url.query(), Some("document_filter=d1"));
}

#[tokio::test]
async fn test_trigger_rebuild_conflict() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rag/admin/vector/rebuild"))
        .respond_with(ResponseTemplate::new(409).set_body_string("A rebuild is already in progress"))
        .mount(&server)
        .await;

    let err = client(&server)
        .trigger_rebuild(&RebuildFilters::default())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(409));
    assert!(err.to_string().contains("already in progress"));
}

#[tokio::test]
async fn test_backup_stats() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rag/admin/vector/backup/stats"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "total_documents": 3,
            "total_chunks": 42,
            "average_chunks_per_document": 14.0,
            "user_distribution": [{"value": "alice", "count": 2}, {"value": "bob", "count": 1}],
            "file_type_distribution": [{"value": "pdf", "count": 3}],
            "status_distribution": [{"value": "completed", "count": 3}],
            "total_users": 2,
        })))
        .mount(&server)
        .await;

    let stats = client(&server).backup_stats().await.unwrap();
    assert_eq!(stats.total_chunks, 42);
    assert_eq!(stats.user_distribution[0].value, "alice");
    assert_eq!(stats.total_users, 2);
}
