//! End-to-end tests over a temporary SQLite database.
//!
//! These run entirely offline: `OPENAI_API_KEY` is cleared so the pipeline
//! and chat take their deterministic fallbacks, and the HTTP layer is
//! driven through the router without binding a socket.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use session_scribe::chat::LOW_CONFIDENCE_ANSWER;
use session_scribe::config::{
    ChunkingConfig, Config, DbConfig, OpenAiConfig, RetrievalConfig, SearchConfig, ServerConfig,
    UploadsConfig,
};
use session_scribe::{db, migrate, pipeline, server};

async fn setup() -> (TempDir, Config, SqlitePool) {
    std::env::remove_var("OPENAI_API_KEY");
    std::env::remove_var("GOOGLE_SEARCH_API_KEY");
    std::env::remove_var("GOOGLE_SEARCH_CX");

    let tmp = TempDir::new().unwrap();
    let config = Config {
        db: DbConfig {
            path: tmp.path().join("data/scribe.sqlite"),
        },
        server: ServerConfig::default(),
        uploads: UploadsConfig {
            dir: tmp.path().join("uploads"),
        },
        chunking: ChunkingConfig::default(),
        retrieval: RetrievalConfig::default(),
        openai: OpenAiConfig::default(),
        search: SearchConfig::default(),
    };

    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (tmp, config, pool)
}

async fn insert_session(pool: &SqlitePool, title: &str) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO sessions (id, title, status, started_at) VALUES (?, ?, 'recording', ?)",
    )
    .bind(&id)
    .bind(title)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(pool)
    .await
    .unwrap();
    id
}

async fn insert_audio(pool: &SqlitePool, session_id: &str) {
    sqlx::query(
        "INSERT INTO audio_recordings (id, session_id, file_url, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(session_id)
    .bind("/uploads/audio/demo.m4a")
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_segment(pool: &SqlitePool, session_id: &str, start: f64, end: f64, text: &str) {
    sqlx::query(
        "INSERT INTO transcript_segments (id, session_id, start_seconds, end_seconds, text) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(session_id)
    .bind(start)
    .bind(end)
    .bind(text)
    .execute(pool)
    .await
    .unwrap();
}

async fn session_status(pool: &SqlitePool, session_id: &str) -> String {
    sqlx::query("SELECT status FROM sessions WHERE id = ?")
        .bind(session_id)
        .fetch_one(pool)
        .await
        .unwrap()
        .get("status")
}

async fn wait_for_status(pool: &SqlitePool, session_id: &str, want: &str) {
    for _ in 0..200 {
        if session_status(pool, session_id).await == want {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!(
        "session {} never reached status {} (stuck at {})",
        session_id,
        want,
        session_status(pool, session_id).await
    );
}

async fn count_rows(pool: &SqlitePool, table: &str, session_id: &str) -> i64 {
    sqlx::query(&format!(
        "SELECT COUNT(*) AS n FROM {} WHERE session_id = ?",
        table
    ))
    .bind(session_id)
    .fetch_one(pool)
    .await
    .unwrap()
    .get("n")
}

async fn send(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(payload) => builder
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_offline_pipeline_produces_ready_session() {
    let (_tmp, config, pool) = setup().await;
    let session_id = insert_session(&pool, "Offline pipeline").await;
    insert_audio(&pool, &session_id).await;

    pipeline::spawn_processing(pool.clone(), Arc::new(config.clone()), session_id.clone());
    wait_for_status(&pool, &session_id, "ready").await;

    assert_eq!(count_rows(&pool, "transcript_segments", &session_id).await, 4);
    assert_eq!(count_rows(&pool, "resources", &session_id).await, 2);

    let summary = sqlx::query("SELECT * FROM summaries WHERE session_id = ?")
        .bind(&session_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    let highlights: String = summary.get("highlights_json");
    let highlights: Vec<String> = serde_json::from_str(&highlights).unwrap();
    assert_eq!(highlights.len(), 3);
    let language: Option<String> = summary.get("language");
    assert_eq!(language.as_deref(), Some("en"));

    // Indexing runs in its own background task after the commit.
    for _ in 0..200 {
        if count_rows(&pool, "transcript_chunks", &session_id).await > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    let chunks = pipeline::fetch_chunks(&pool, &session_id).await.unwrap();
    assert!(!chunks.is_empty());
    for chunk in &chunks {
        assert!(chunk.embedding.is_some());
        assert_eq!(chunk.embedding_model.as_deref(), Some("mock-bow-128"));
    }
}

#[tokio::test]
async fn test_pipeline_without_audio_marks_failed() {
    let (_tmp, config, pool) = setup().await;
    let session_id = insert_session(&pool, "No audio").await;

    pipeline::spawn_processing(pool.clone(), Arc::new(config.clone()), session_id.clone());
    wait_for_status(&pool, &session_id, "failed").await;
}

#[tokio::test]
async fn test_reindex_is_idempotent() {
    let (_tmp, config, pool) = setup().await;
    let session_id = insert_session(&pool, "Reindex").await;
    insert_segment(&pool, &session_id, 0.0, 30.0, "We discussed retrieval quality at length.")
        .await;
    insert_segment(&pool, &session_id, 30.0, 60.0, "Then we compared embedding strategies.").await;
    insert_segment(&pool, &session_id, 60.0, 90.0, "Finally we looked at chunk boundaries.").await;

    let first = pipeline::index_session_transcript(&pool, &config, &session_id)
        .await
        .unwrap();
    let first_chunks = pipeline::fetch_chunks(&pool, &session_id).await.unwrap();

    let second = pipeline::index_session_transcript(&pool, &config, &session_id)
        .await
        .unwrap();
    let second_chunks = pipeline::fetch_chunks(&pool, &session_id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first_chunks.len(), second_chunks.len());
    for (a, b) in first_chunks.iter().zip(second_chunks.iter()) {
        assert_eq!(a.text, b.text);
        assert_eq!(a.embedding, b.embedding);
    }
    assert_eq!(
        count_rows(&pool, "transcript_chunks", &session_id).await,
        first as i64
    );
}

#[tokio::test]
async fn test_reindex_without_transcript_writes_nothing() {
    let (_tmp, config, pool) = setup().await;
    let session_id = insert_session(&pool, "Empty").await;

    let count = pipeline::index_session_transcript(&pool, &config, &session_id)
        .await
        .unwrap();
    assert_eq!(count, 0);
    assert_eq!(count_rows(&pool, "transcript_chunks", &session_id).await, 0);
}

#[tokio::test]
async fn test_http_health() {
    let (_tmp, config, pool) = setup().await;
    let app = server::build_router(Arc::new(config), pool);

    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_http_create_and_list_sessions() {
    let (_tmp, config, pool) = setup().await;
    let app = server::build_router(Arc::new(config), pool);

    let (status, created) = send(&app, "POST", "/sessions", Some(json!({}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["title"], "Untitled Session");
    assert_eq!(created["status"], "recording");

    let (status, named) = send(
        &app,
        "POST",
        "/sessions",
        Some(json!({ "title": "Distributed systems talk" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(named["title"], "Distributed systems talk");

    let (status, listed) = send(&app, "GET", "/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_http_get_session_detail() {
    let (_tmp, config, pool) = setup().await;
    let session_id = insert_session(&pool, "Detail").await;
    insert_segment(&pool, &session_id, 0.0, 10.0, "hello world").await;
    let app = server::build_router(Arc::new(config), pool);

    let (status, body) = send(&app, "GET", &format!("/sessions/{}", session_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["id"], session_id.as_str());
    assert_eq!(body["transcript"].as_array().unwrap().len(), 1);
    assert!(body["summary"].is_null());
    assert!(body["audio"].is_null());

    let (status, body) = send(&app, "GET", "/sessions/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_http_attach_audio_requires_payload() {
    let (_tmp, config, pool) = setup().await;
    let session_id = insert_session(&pool, "Audio").await;
    let app = server::build_router(Arc::new(config), pool.clone());

    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/audio", session_id),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = send(
        &app,
        "POST",
        &format!("/sessions/{}/audio", session_id),
        Some(json!({ "file_url": "/uploads/audio/x.m4a", "duration_seconds": 120.5 })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // Accepted flips the session out of recording before processing lands.
    let status_now = session_status(&pool, &session_id).await;
    assert_ne!(status_now, "recording");
    wait_for_status(&pool, &session_id, "ready").await;
}

#[tokio::test]
async fn test_http_chat_gate_without_chunks() {
    let (_tmp, config, pool) = setup().await;
    let session_id = insert_session(&pool, "Gated chat").await;
    let app = server::build_router(Arc::new(config), pool.clone());

    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/chat", session_id),
        Some(json!({ "message": "what was the main point?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assistant_message"], LOW_CONFIDENCE_ANSWER);
    assert!(body["citations"].as_array().unwrap().is_empty());
    assert!(body["external_links"].as_array().unwrap().is_empty());

    // Both the question and the gated answer land in history.
    assert_eq!(count_rows(&pool, "chat_messages", &session_id).await, 2);
}

#[tokio::test]
async fn test_http_chat_requires_message() {
    let (_tmp, config, pool) = setup().await;
    let session_id = insert_session(&pool, "Chat").await;
    let app = server::build_router(Arc::new(config), pool);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/chat", session_id),
        Some(json!({ "message": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_http_chat_answers_from_indexed_transcript() {
    let (_tmp, config, pool) = setup().await;
    let session_id = insert_session(&pool, "Grounded chat").await;
    insert_segment(
        &pool,
        &session_id,
        0.0,
        30.0,
        "The speaker explained backpressure in streaming systems.",
    )
    .await;
    let app = server::build_router(Arc::new(config), pool.clone());

    // No chunks yet, so this chat triggers lazy indexing first. The hash
    // strategy scores word overlap, so asking with the transcript's own
    // words clears the confidence floor.
    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/chat", session_id),
        Some(json!({ "message": "what was said about backpressure in streaming systems?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(count_rows(&pool, "transcript_chunks", &session_id).await > 0);
    assert_ne!(body["assistant_message"], LOW_CONFIDENCE_ANSWER);
    assert_eq!(body["citations"].as_array().unwrap().len(), 1);

    assert_eq!(count_rows(&pool, "chat_messages", &session_id).await, 2);
}

#[tokio::test]
async fn test_http_reindex_endpoint() {
    let (_tmp, config, pool) = setup().await;
    let session_id = insert_session(&pool, "Reindex route").await;
    insert_segment(&pool, &session_id, 0.0, 20.0, "indexing works").await;
    let app = server::build_router(Arc::new(config), pool);

    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/reindex", session_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chunks_indexed"], 1);

    let (status, body) = send(&app, "POST", "/sessions/nope/reindex", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_http_resummarize() {
    let (_tmp, config, pool) = setup().await;
    let session_id = insert_session(&pool, "Resummarize").await;
    let app = server::build_router(Arc::new(config), pool.clone());

    // No transcript yet.
    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/resummarize", session_id),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "not_ready");

    insert_segment(&pool, &session_id, 0.0, 30.0, "the talk covered observability").await;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/sessions/{}/resummarize", session_id),
        Some(json!({
            "topic_context": "observability practices",
            "speakers": [{ "name": "Ada", "role": "host" }],
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let short = body["summary"]["short_summary"].as_str().unwrap();
    assert!(short.contains("Ada (host)"));
    assert!(short.contains("observability practices"));

    let row = sqlx::query("SELECT topic_context, speaker_metadata_json FROM sessions WHERE id = ?")
        .bind(&session_id)
        .fetch_one(&pool)
        .await
        .unwrap();
    let topic: Option<String> = row.get("topic_context");
    assert_eq!(topic.as_deref(), Some("observability practices"));
}
