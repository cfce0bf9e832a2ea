//! Integration tests for the backend client and the session dispatcher,
//! against an in-process mock of the koboldcpp REST API.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use kobold_core::api::GenerateRequest;
use kobold_core::{BackendError, BridgeConfig, ChatSession, KoboldClient, TurnContext};
use kobold_ipc::ExtensionMessage;

struct MockBackend {
    /// Final text returned by the generate POST.
    final_text: String,
    /// How long the generate POST blocks before answering.
    generate_delay: Duration,
    /// Cumulative texts served by successive check GETs; the last one
    /// repeats once the sequence is exhausted.
    check_texts: Mutex<Vec<String>>,
    check_cursor: AtomicUsize,
    abort_calls: AtomicUsize,
    fail_generate: bool,
}

impl MockBackend {
    fn new(final_text: &str, check_texts: &[&str]) -> Arc<Self> {
        Arc::new(MockBackend {
            final_text: final_text.to_string(),
            generate_delay: Duration::from_millis(150),
            check_texts: Mutex::new(check_texts.iter().map(|s| s.to_string()).collect()),
            check_cursor: AtomicUsize::new(0),
            abort_calls: AtomicUsize::new(0),
            fail_generate: false,
        })
    }

    fn next_check_text(&self) -> String {
        let texts = self.check_texts.lock().unwrap();
        if texts.is_empty() {
            return String::new();
        }
        let idx = self.check_cursor.fetch_add(1, Ordering::SeqCst);
        texts[idx.min(texts.len() - 1)].clone()
    }
}

async fn mock_generate(
    State(state): State<Arc<MockBackend>>,
) -> Result<Json<Value>, StatusCode> {
    if state.fail_generate {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }
    tokio::time::sleep(state.generate_delay).await;
    Ok(Json(json!({"results": [{"text": state.final_text}]})))
}

async fn mock_check(State(state): State<Arc<MockBackend>>) -> Json<Value> {
    Json(json!({"results": [{"text": state.next_check_text()}]}))
}

async fn mock_abort(State(state): State<Arc<MockBackend>>) -> Json<Value> {
    state.abort_calls.fetch_add(1, Ordering::SeqCst);
    Json(json!({"success": true}))
}

async fn mock_max_context() -> Json<Value> {
    Json(json!({"value": 4096}))
}

/// Serve the mock on an ephemeral port; returns its base URL.
fn spawn_backend(state: Arc<MockBackend>) -> String {
    let app = Router::new()
        .route("/api/v1/generate", post(mock_generate))
        .route("/api/extra/generate/check", get(mock_check))
        .route("/api/extra/abort", post(mock_abort))
        .route("/api/extra/true_max_context_length", get(mock_max_context))
        .with_state(state);

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    format!("http://{}", addr)
}

fn test_config(endpoint: String, dir: &tempfile::TempDir) -> BridgeConfig {
    BridgeConfig {
        endpoint,
        history_file: dir.path().join("conv_history.txt"),
        poll_interval_ms: 10,
        ..Default::default()
    }
}

fn turn_context() -> (TurnContext, mpsc::Receiver<String>) {
    let (tx, rx) = mpsc::channel(64);
    (
        TurnContext::new(Arc::new(AtomicBool::new(false)), tx),
        rx,
    )
}

fn frame(raw: &str) -> ExtensionMessage {
    serde_json::from_str(raw).unwrap()
}

async fn drain(mut rx: mpsc::Receiver<String>) -> Vec<String> {
    let mut chunks = Vec::new();
    while let Some(chunk) = rx.recv().await {
        chunks.push(chunk);
    }
    chunks
}

#[tokio::test]
async fn streaming_forwards_deltas_and_returns_final_text() {
    let backend = MockBackend::new("Hello world", &["Hel", "Hello wor", "Hello world"]);
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(spawn_backend(Arc::clone(&backend)), &dir);
    let client = KoboldClient::new(&config);

    let (ctx, rx) = turn_context();
    let request = GenerateRequest::new("prompt".to_string(), 2048, 120);
    let final_text = client
        .generate_streaming(&request, ctx.chunks.clone(), Arc::clone(&ctx.cancel))
        .await
        .unwrap();
    drop(ctx);

    assert_eq!(final_text.as_deref(), Some("Hello world"));
    let chunks = drain(rx).await;
    assert!(!chunks.is_empty());
    let streamed: String = chunks.concat();
    assert!("Hello world".starts_with(&streamed));
}

#[tokio::test]
async fn runaway_generation_aborts_exactly_once() {
    let backend = MockBackend::new(
        "A fine answer.\n### Instruction: junk",
        &[
            "A fine answer",
            "A fine answer.\n### Instruction: junk",
            "A fine answer.\n### Instruction: junk and more junk",
        ],
    );
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(spawn_backend(Arc::clone(&backend)), &dir);
    let client = KoboldClient::new(&config);

    let (ctx, rx) = turn_context();
    let request = GenerateRequest::new("prompt".to_string(), 2048, 120);
    client
        .generate_streaming(&request, ctx.chunks.clone(), Arc::clone(&ctx.cancel))
        .await
        .unwrap();
    drop(ctx);

    assert_eq!(backend.abort_calls.load(Ordering::SeqCst), 1);
    for chunk in drain(rx).await {
        assert!(!chunk.contains("###"), "marker leaked in chunk: {chunk:?}");
        assert!(!chunk.contains("junk"), "post-marker text leaked: {chunk:?}");
    }
}

#[tokio::test]
async fn marker_arriving_split_across_polls_still_aborts_once() {
    let backend = MockBackend::new(
        "A fine answer.###garbage",
        &[
            "A fine answer",
            "A fine answer.#",
            "A fine answer.###garbage",
            "A fine answer.###garbage and worse",
        ],
    );
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(spawn_backend(Arc::clone(&backend)), &dir);
    let client = KoboldClient::new(&config);

    let (ctx, rx) = turn_context();
    let request = GenerateRequest::new("prompt".to_string(), 2048, 120);
    client
        .generate_streaming(&request, ctx.chunks.clone(), Arc::clone(&ctx.cancel))
        .await
        .unwrap();
    drop(ctx);

    assert_eq!(backend.abort_calls.load(Ordering::SeqCst), 1);
    for chunk in drain(rx).await {
        assert!(!chunk.contains("garbage"), "post-marker text leaked: {chunk:?}");
        assert!(!chunk.contains("###"), "full marker leaked: {chunk:?}");
    }
}

#[tokio::test]
async fn max_context_falls_back_when_backend_is_down() {
    // Nothing listens on this port.
    let config = BridgeConfig {
        endpoint: "http://127.0.0.1:1".to_string(),
        fallback_max_context_length: 2048,
        ..Default::default()
    };
    let client = KoboldClient::new(&config);
    assert_eq!(client.true_max_context_length().await, 2048);
}

#[tokio::test]
async fn generate_surfaces_backend_status_errors() {
    let mut backend = MockBackend::new("unused", &[]);
    Arc::get_mut(&mut backend).unwrap().fail_generate = true;
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(spawn_backend(backend), &dir);
    let client = KoboldClient::new(&config);

    let request = GenerateRequest::new("prompt".to_string(), 2048, 120);
    match client.generate(&request).await {
        Err(BackendError::Status(code)) => assert_eq!(code.as_u16(), 500),
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn chat_turn_replies_and_persists_history() {
    let backend = MockBackend::new("Hello there.\n### Instruction: noise", &[]);
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(spawn_backend(backend), &dir);
    let session = ChatSession::new(&config, KoboldClient::new(&config)).unwrap();

    let (ctx, _rx) = turn_context();
    let reply = session
        .handle_message(&frame(r#"{"data":{"task":"chat","text":"hi"}}"#), &ctx)
        .await
        .unwrap();
    assert_eq!(reply.as_deref(), Some("Hello there."));

    let on_disk = std::fs::read_to_string(dir.path().join("conv_history.txt")).unwrap();
    assert!(on_disk.contains("### Instruction:\nhi\n"));
    assert!(on_disk.contains("### Response:\nHello there.\n"));
}

#[tokio::test]
async fn new_chat_resets_history_before_the_turn() {
    let backend = MockBackend::new("fresh reply", &[]);
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(spawn_backend(backend), &dir);
    let session = ChatSession::new(&config, KoboldClient::new(&config)).unwrap();

    let (ctx, _rx) = turn_context();
    session
        .handle_message(&frame(r#"{"data":{"task":"chat","text":"old turn"}}"#), &ctx)
        .await
        .unwrap();

    let (ctx, _rx) = turn_context();
    session
        .handle_message(
            &frame(r#"{"data":{"status":"new_chat","task":"chat","text":"hi again"}}"#),
            &ctx,
        )
        .await
        .unwrap();

    let history = session.history();
    let history = history.lock().await;
    assert!(!history.contents().contains("old turn"));
    assert!(history.contents().contains("hi again"));
}

#[tokio::test]
async fn empty_text_is_silently_dropped() {
    let backend = MockBackend::new("unused", &[]);
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(spawn_backend(backend), &dir);
    let session = ChatSession::new(&config, KoboldClient::new(&config)).unwrap();

    let (ctx, _rx) = turn_context();
    let reply = session
        .handle_message(&frame(r#"{"data":{"task":"chat","text":"   "}}"#), &ctx)
        .await
        .unwrap();
    assert!(reply.is_none());
}

#[tokio::test]
async fn summary_processes_every_chunk_sequentially() {
    let backend = MockBackend::new("partial summary", &[]);
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(spawn_backend(backend), &dir);
    config.chunk_size = 100;
    config.chunk_overlap = 10;
    let session = ChatSession::new(&config, KoboldClient::new(&config)).unwrap();

    let long_text = "lorem ipsum dolor sit amet ".repeat(20);
    let raw = format!(
        r#"{{"data":{{"task":"summary","text":"{}"}}}}"#,
        long_text.trim()
    );

    let (ctx, _rx) = turn_context();
    let reply = session.handle_message(&frame(&raw), &ctx).await.unwrap();

    // Three chunks of input produce three joined partial summaries.
    let expected_parts = kobold_core::chunker::text_chunker(long_text.trim(), 100, 10).len();
    let reply = reply.expect("summary should produce text");
    assert_eq!(reply.matches("partial summary").count(), expected_parts);
    // Summaries are not conversation turns.
    let on_disk = std::fs::read_to_string(dir.path().join("conv_history.txt"))
        .unwrap_or_default();
    assert!(on_disk.is_empty());
}

#[tokio::test]
async fn cancelled_summary_stops_between_chunks() {
    let backend = MockBackend::new("partial summary", &[]);
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(spawn_backend(backend), &dir);
    config.chunk_size = 100;
    config.chunk_overlap = 10;
    let session = ChatSession::new(&config, KoboldClient::new(&config)).unwrap();

    let long_text = "word ".repeat(200);
    let raw = format!(
        r#"{{"data":{{"task":"summary","text":"{}"}}}}"#,
        long_text.trim()
    );

    let (ctx, _rx) = turn_context();
    ctx.cancel.store(true, Ordering::SeqCst);
    let reply = session.handle_message(&frame(&raw), &ctx).await.unwrap();
    assert!(reply.is_none(), "cancelled before the first chunk ran");
}

#[tokio::test]
async fn concurrent_turns_both_complete() {
    let backend = MockBackend::new("a reply", &[]);
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(spawn_backend(backend), &dir);
    let session = Arc::new(ChatSession::new(&config, KoboldClient::new(&config)).unwrap());

    let (ctx_a, _rx_a) = turn_context();
    let (ctx_b, _rx_b) = turn_context();
    let msg_a = frame(r#"{"data":{"task":"chat","text":"one"}}"#);
    let msg_b = frame(r#"{"data":{"task":"chat","text":"two"}}"#);
    let first = session.handle_message(&msg_a, &ctx_a);
    let second = session.handle_message(&msg_b, &ctx_b);

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.unwrap().as_deref(), Some("a reply"));
    assert_eq!(second.unwrap().as_deref(), Some("a reply"));

    // Both turns were recorded; the mutex kept the file writes whole.
    let on_disk = std::fs::read_to_string(dir.path().join("conv_history.txt")).unwrap();
    assert!(on_disk.contains("one"));
    assert!(on_disk.contains("two"));
}
