//! HTTP API server.
//!
//! Exposes the session lifecycle over a JSON HTTP API: create and list
//! sessions, attach an audio recording (which kicks off background
//! processing), rebuild the retrieval index, regenerate the summary, and
//! chat against the indexed transcript.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/sessions` | Create a session in `recording` state |
//! | `GET`  | `/sessions` | List sessions, newest first |
//! | `GET`  | `/sessions/{id}` | Full session detail |
//! | `POST` | `/sessions/{id}/audio` | Attach audio, start processing (202) |
//! | `POST` | `/sessions/{id}/reindex` | Rebuild the chunk index |
//! | `POST` | `/sessions/{id}/resummarize` | Regenerate the summary |
//! | `POST` | `/sessions/{id}/chat` | Ask a grounded question |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "message required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_ready` (400), `not_found` (404),
//! `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::audio;
use crate::chat::{self, ChatContext, LOW_CONFIDENCE_ANSWER};
use crate::config::Config;
use crate::models::{
    AudioRecording, ChatMessage, ChatRole, Resource, Session, SessionStatus, Speaker, Summary,
};
use crate::pipeline::{self, ResummarizeUpdate};
use crate::search::search_external_reading;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    pool: SqlitePool,
}

/// Builds the application router. Split from [`run_server`] so tests can
/// drive handlers without binding a socket.
pub fn build_router(config: Arc<Config>, pool: SqlitePool) -> Router {
    let state = AppState { config, pool };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/sessions", post(handle_create_session).get(handle_list_sessions))
        .route("/sessions/{id}", get(handle_get_session))
        .route("/sessions/{id}/audio", post(handle_attach_audio))
        .route("/sessions/{id}/reindex", post(handle_reindex))
        .route("/sessions/{id}/resummarize", post(handle_resummarize))
        .route("/sessions/{id}/chat", post(handle_chat))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on the configured bind address. The pool is
/// created by the caller and injected; the server never opens its own
/// connections.
pub async fn run_server(config: &Config, pool: SqlitePool) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = build_router(Arc::new(config.clone()), pool);

    tracing::info!("listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// 400 for operations that need pipeline output that does not exist yet.
fn not_ready(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "not_ready".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        internal(err.into())
    }
}

// ============ Handlers ============

async fn handle_health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize, Default)]
struct CreateSessionRequest {
    title: Option<String>,
    event_name: Option<String>,
    topic_context: Option<String>,
    #[serde(default)]
    speakers: Vec<Speaker>,
    summary_language: Option<String>,
    source_session_id: Option<String>,
}

async fn handle_create_session(
    State(state): State<AppState>,
    payload: Option<Json<CreateSessionRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let req = payload.map(|Json(r)| r).unwrap_or_default();
    let id = Uuid::new_v4().to_string();
    let title = req
        .title
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| "Untitled Session".to_string());
    let now = chrono::Utc::now().timestamp_millis();

    sqlx::query(
        "INSERT INTO sessions (id, title, event_name, status, started_at, topic_context, \
         speaker_metadata_json, summary_language, source_session_id) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&title)
    .bind(req.event_name.as_deref())
    .bind(SessionStatus::Recording.as_str())
    .bind(now)
    .bind(req.topic_context.as_deref())
    .bind(serde_json::to_string(&req.speakers).map_err(|e| internal(e.into()))?)
    .bind(req.summary_language.as_deref())
    .bind(req.source_session_id.as_deref())
    .execute(&state.pool)
    .await?;

    let session = pipeline::fetch_session(&state.pool, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Session not found"))?;

    Ok((StatusCode::CREATED, Json(session)))
}

async fn handle_list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<Session>>, AppError> {
    let rows = sqlx::query("SELECT * FROM sessions ORDER BY started_at DESC, rowid DESC")
        .fetch_all(&state.pool)
        .await?;
    Ok(Json(rows.iter().map(Session::from_row).collect()))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let session = pipeline::fetch_session(&state.pool, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Session not found"))?;

    let audio = sqlx::query(
        "SELECT * FROM audio_recordings WHERE session_id = ? ORDER BY created_at DESC, rowid DESC LIMIT 1",
    )
    .bind(&id)
    .fetch_optional(&state.pool)
    .await?
    .map(|row| AudioRecording::from_row(&row));

    let transcript = pipeline::fetch_segments(&state.pool, &id)
        .await
        .map_err(internal)?;

    let summary = sqlx::query("SELECT * FROM summaries WHERE session_id = ?")
        .bind(&id)
        .fetch_optional(&state.pool)
        .await?
        .map(|row| Summary::from_row(&row));

    let resources: Vec<Resource> =
        sqlx::query("SELECT * FROM resources WHERE session_id = ? ORDER BY created_at DESC, rowid DESC")
            .bind(&id)
            .fetch_all(&state.pool)
            .await?
            .iter()
            .map(Resource::from_row)
            .collect();

    let chat_messages: Vec<ChatMessage> = sqlx::query(
        "SELECT * FROM chat_messages WHERE session_id = ? ORDER BY created_at ASC, rowid ASC",
    )
    .bind(&id)
    .fetch_all(&state.pool)
    .await?
    .iter()
    .map(ChatMessage::from_row)
    .collect();

    Ok(Json(json!({
        "session": session,
        "audio": audio,
        "transcript": transcript,
        "summary": summary,
        "resources": resources,
        "chat_messages": chat_messages,
    })))
}

#[derive(Deserialize)]
struct AttachAudioRequest {
    file_url: Option<String>,
    audio_base64: Option<String>,
    file_name: Option<String>,
    mime_type: Option<String>,
    duration_seconds: Option<f64>,
}

async fn handle_attach_audio(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AttachAudioRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.file_url.is_none() && req.audio_base64.is_none() {
        return Err(bad_request("file_url or audio_base64 required"));
    }

    let session = pipeline::fetch_session(&state.pool, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Session not found"))?;

    let stored_url = match &req.audio_base64 {
        Some(payload) => audio::save_uploaded_audio(
            &state.config.uploads.dir,
            &session.id,
            payload,
            req.file_name.as_deref(),
            req.mime_type.as_deref(),
        )
        .map_err(|e| bad_request(e.to_string()))?,
        None => req.file_url.clone().unwrap_or_default(),
    };

    let now = chrono::Utc::now().timestamp_millis();
    let mut tx = state.pool.begin().await?;
    sqlx::query(
        "INSERT INTO audio_recordings (id, session_id, file_url, duration_seconds, created_at) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&id)
    .bind(&stored_url)
    .bind(req.duration_seconds)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "UPDATE sessions SET status = ?, ended_at = ?, \
         duration_seconds = COALESCE(?, duration_seconds) WHERE id = ?",
    )
    .bind(SessionStatus::Processing.as_str())
    .bind(now)
    .bind(req.duration_seconds)
    .bind(&id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    pipeline::spawn_processing(state.pool.clone(), state.config.clone(), id);

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Audio accepted, processing started" })),
    ))
}

async fn handle_reindex(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    pipeline::fetch_session(&state.pool, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Session not found"))?;

    let chunks_indexed = pipeline::index_session_transcript(&state.pool, &state.config, &id)
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "message": "Reindexed",
        "chunks_indexed": chunks_indexed,
    })))
}

#[derive(Deserialize, Default)]
struct ResummarizeRequest {
    speakers: Option<Vec<Speaker>>,
    topic_context: Option<String>,
    language: Option<String>,
}

async fn handle_resummarize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Option<Json<ResummarizeRequest>>,
) -> Result<Json<Value>, AppError> {
    let req = payload.map(|Json(r)| r).unwrap_or_default();

    pipeline::fetch_session(&state.pool, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Session not found"))?;

    let update = ResummarizeUpdate {
        speakers: req.speakers,
        topic_context: req.topic_context,
        summary_language: req.language,
    };

    let summary = pipeline::resummarize(&state.pool, &state.config, &id, update)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_ready("Transcript not ready yet"))?;

    Ok(Json(json!({ "summary": summary })))
}

#[derive(Deserialize)]
struct ChatRequest {
    message: Option<String>,
    language: Option<String>,
    #[serde(default)]
    include_external_reading: bool,
}

async fn handle_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<Value>, AppError> {
    let message = req
        .message
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or_else(|| bad_request("message required"))?
        .to_string();

    let session = pipeline::fetch_session(&state.pool, &id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found("Session not found"))?;

    let history = fetch_recent_history(&state.pool, &id, state.config.retrieval.history_window)
        .await
        .map_err(internal)?;

    // Sessions processed before indexing existed (or whose index write
    // failed) get indexed on first chat.
    let existing = pipeline::fetch_chunks(&state.pool, &id)
        .await
        .map_err(internal)?;
    if existing.is_empty() {
        pipeline::index_session_transcript(&state.pool, &state.config, &id)
            .await
            .map_err(internal)?;
    }

    let ranked = pipeline::retrieve_relevant_chunks(&state.pool, &state.config, &id, &message, &history)
        .await
        .map_err(internal)?;
    let top_score = crate::retrieval::top_score(&ranked);

    let response_language = req
        .language
        .clone()
        .or_else(|| session.summary_language.clone())
        .or_else(|| session.transcript_language.clone())
        .unwrap_or_else(|| "en".to_string());

    let context = ChatContext {
        title: Some(session.title.clone()),
        topic_context: session.topic_context.clone(),
        speakers: session.speakers.clone(),
        language: Some(response_language.clone()),
        transcript_language: session.transcript_language.clone(),
    };

    let response = chat::answer(
        &state.config.openai,
        &message,
        &context,
        &history,
        &ranked,
        top_score,
    )
    .await
    .map_err(internal)?;

    let low_confidence = response.answer == LOW_CONFIDENCE_ANSWER;

    let mut external_links = if req.include_external_reading {
        let query = format!("{} {}", message, session.title).trim().to_string();
        search_external_reading(
            &state.config.search,
            &query,
            session.topic_context.as_deref(),
            Some(&session.title),
        )
        .await
    } else {
        Vec::new()
    };
    if low_confidence {
        for link in &mut external_links {
            let note = link
                .note
                .take()
                .unwrap_or_else(|| "relevant background reading.".to_string());
            link.note = Some(format!("Not discussed in the session; {}", note));
        }
    }

    // Both turns are appended even for gated answers, so the history shows
    // what was asked and what the gate said.
    let now = chrono::Utc::now().timestamp_millis();
    sqlx::query(
        "INSERT INTO chat_messages (id, session_id, role, content, citations_json, \
         external_links_json, language, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&id)
    .bind(ChatRole::User.as_str())
    .bind(&message)
    .bind(Option::<String>::None)
    .bind(Option::<String>::None)
    .bind(&response_language)
    .bind(now)
    .execute(&state.pool)
    .await?;
    sqlx::query(
        "INSERT INTO chat_messages (id, session_id, role, content, citations_json, \
         external_links_json, language, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&id)
    .bind(ChatRole::Assistant.as_str())
    .bind(&response.answer)
    .bind(serde_json::to_string(&response.citations).map_err(|e| internal(e.into()))?)
    .bind(serde_json::to_string(&external_links).map_err(|e| internal(e.into()))?)
    .bind(&response_language)
    .bind(now)
    .execute(&state.pool)
    .await?;

    Ok(Json(json!({
        "assistant_message": response.answer,
        "citations": response.citations,
        "external_links": external_links,
    })))
}

/// The most recent `window` chat messages, oldest first.
async fn fetch_recent_history(
    pool: &SqlitePool,
    session_id: &str,
    window: i64,
) -> anyhow::Result<Vec<ChatMessage>> {
    let rows = sqlx::query(
        "SELECT * FROM chat_messages WHERE session_id = ? \
         ORDER BY created_at DESC, rowid DESC LIMIT ?",
    )
    .bind(session_id)
    .bind(window)
    .fetch_all(pool)
    .await?;
    let mut history: Vec<ChatMessage> = rows.iter().map(ChatMessage::from_row).collect();
    history.reverse();
    Ok(history)
}
