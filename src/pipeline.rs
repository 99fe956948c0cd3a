//! Session processing pipeline.
//!
//! Processing runs in a supervised background task spawned after an audio
//! upload is accepted. The run transcribes (or falls back to the offline
//! fixtures), summarizes, and persists transcript + summary + resources in
//! one transaction that also flips the session to `ready`. Any failure
//! rolls that transaction back and the supervisor records `failed` in a
//! separate write, so a session never gets stuck in `processing`.
//!
//! Chunking and embedding run after the commit as their own supervised
//! task; an indexing failure is logged but never fails an already-ready
//! session, and chat lazily indexes on demand if the chunk set is empty.

use anyhow::{anyhow, Result};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use uuid::Uuid;

use crate::audio;
use crate::chunker::chunk_segments;
use crate::config::Config;
use crate::embedding::{embed_query, embed_texts, vec_to_blob};
use crate::models::{
    ChatMessage, ResourceDraft, SegmentDraft, Session, SessionStatus, Summary, TranscriptChunk,
    TranscriptSegment,
};
use crate::offline;
use crate::openai::{self, StudyParams};
use crate::retrieval::{build_query_text, rank_chunks, RankedChunk};

/// Spawn supervised background processing for a session. Errors are
/// recorded on the session row, never propagated to the caller.
pub fn spawn_processing(pool: SqlitePool, config: Arc<Config>, session_id: String) {
    tokio::spawn(async move {
        if let Err(err) = run_processing(&pool, &config, &session_id).await {
            tracing::error!(session_id = %session_id, error = %err, "session processing failed");
            if let Err(mark_err) = mark_failed(&pool, &session_id).await {
                tracing::error!(
                    session_id = %session_id,
                    error = %mark_err,
                    "could not record failed status"
                );
            }
        }
    });
}

async fn mark_failed(pool: &SqlitePool, session_id: &str) -> Result<()> {
    sqlx::query("UPDATE sessions SET status = ? WHERE id = ?")
        .bind(SessionStatus::Failed.as_str())
        .bind(session_id)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_processing(pool: &SqlitePool, config: &Config, session_id: &str) -> Result<()> {
    let session = fetch_session(pool, session_id)
        .await?
        .ok_or_else(|| anyhow!("session {} not found", session_id))?;

    let audio_row = sqlx::query(
        "SELECT file_url, duration_seconds FROM audio_recordings WHERE session_id = ? \
         ORDER BY created_at DESC, rowid DESC LIMIT 1",
    )
    .bind(session_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| anyhow!("session {} has no audio recording", session_id))?;
    let file_url: String = audio_row.get("file_url");
    let audio_duration: Option<f64> = audio_row.get("duration_seconds");

    let params = StudyParams {
        title: Some(session.title.clone()),
        speakers: session.speakers.clone(),
        topic_context: session.topic_context.clone(),
        language: session.summary_language.clone(),
    };

    let audio_path = audio::resolve_audio_path(&config.uploads.dir, &file_url);

    let (segments, transcript_language, summary, resources) =
        match (config.openai.is_enabled(), audio_path) {
            (true, Some(path)) => {
                let transcription = openai::transcribe_audio(&config.openai, &path).await?;
                let segments = openai::coalesce_segments(
                    transcription.segments,
                    &transcription.text,
                    audio_duration,
                );
                let outputs =
                    openai::generate_study_outputs(&config.openai, &transcription.text, &params)
                        .await?;
                (segments, transcription.language, outputs.summary, outputs.resources)
            }
            _ => (
                offline::transcript_segments(),
                Some("en".to_string()),
                offline::summary(&params),
                offline::resources(),
            ),
        };

    persist_processing_outputs(
        pool,
        session_id,
        &segments,
        transcript_language.as_deref(),
        &summary,
        &resources,
    )
    .await?;

    tracing::info!(
        session_id = %session_id,
        segments = segments.len(),
        resources = resources.len(),
        "session processed"
    );

    // Indexing runs after the status commit; a failure here leaves the
    // session ready and chat indexes lazily instead.
    let pool = pool.clone();
    let config = config.clone();
    let session_id = session_id.to_string();
    tokio::spawn(async move {
        if let Err(err) = index_session_transcript(&pool, &config, &session_id).await {
            tracing::warn!(session_id = %session_id, error = %err, "transcript indexing failed");
        }
    });

    Ok(())
}

/// Persist all pipeline outputs and flip the session to ready, atomically.
async fn persist_processing_outputs(
    pool: &SqlitePool,
    session_id: &str,
    segments: &[SegmentDraft],
    transcript_language: Option<&str>,
    summary: &Summary,
    resources: &[ResourceDraft],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM transcript_segments WHERE session_id = ?")
        .bind(session_id)
        .execute(&mut *tx)
        .await?;
    for segment in segments {
        sqlx::query(
            "INSERT INTO transcript_segments (id, session_id, start_seconds, end_seconds, text) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(segment.start_seconds)
        .bind(segment.end_seconds)
        .bind(&segment.text)
        .execute(&mut *tx)
        .await?;
    }

    upsert_summary(&mut tx, session_id, summary).await?;

    sqlx::query("DELETE FROM resources WHERE session_id = ?")
        .bind(session_id)
        .execute(&mut *tx)
        .await?;
    for resource in resources {
        sqlx::query(
            "INSERT INTO resources (id, session_id, title, url, source_name, description, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(&resource.title)
        .bind(&resource.url)
        .bind(&resource.source_name)
        .bind(&resource.description)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query(
        "UPDATE sessions SET status = ?, transcript_language = COALESCE(?, transcript_language), \
         summary_language = COALESCE(?, summary_language) WHERE id = ?",
    )
    .bind(SessionStatus::Ready.as_str())
    .bind(transcript_language)
    .bind(summary.language.as_deref())
    .bind(session_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

async fn upsert_summary(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    session_id: &str,
    summary: &Summary,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO summaries (session_id, short_summary, detailed_summary, key_points_json, \
         action_items_json, highlights_json, language) VALUES (?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(session_id) DO UPDATE SET short_summary = excluded.short_summary, \
         detailed_summary = excluded.detailed_summary, key_points_json = excluded.key_points_json, \
         action_items_json = excluded.action_items_json, highlights_json = excluded.highlights_json, \
         language = excluded.language",
    )
    .bind(session_id)
    .bind(&summary.short_summary)
    .bind(&summary.detailed_summary)
    .bind(serde_json::to_string(&summary.key_points)?)
    .bind(serde_json::to_string(&summary.action_items)?)
    .bind(serde_json::to_string(&summary.highlights)?)
    .bind(summary.language.as_deref())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Rebuild the session's chunk index from its stored transcript: chunk,
/// embed, then replace the whole chunk set in one transaction. Returns the
/// number of chunks written; a session without transcript text indexes to
/// zero without touching existing rows.
pub async fn index_session_transcript(
    pool: &SqlitePool,
    config: &Config,
    session_id: &str,
) -> Result<usize> {
    let segments = fetch_segments(pool, session_id).await?;
    if segments.is_empty() {
        return Ok(0);
    }

    let drafts: Vec<SegmentDraft> = segments
        .iter()
        .map(|s| SegmentDraft {
            start_seconds: s.start_seconds,
            end_seconds: s.end_seconds,
            text: s.text.clone(),
        })
        .collect();

    let chunks = chunk_segments(
        &drafts,
        config.chunking.max_tokens,
        config.chunking.min_tokens,
    );
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let batch = embed_texts(&config.openai, &texts).await;

    let now = chrono::Utc::now().timestamp_millis();
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM transcript_chunks WHERE session_id = ?")
        .bind(session_id)
        .execute(&mut *tx)
        .await?;

    for (chunk, vector) in chunks.iter().zip(batch.vectors.iter()) {
        sqlx::query(
            "INSERT INTO transcript_chunks (id, session_id, text, start_seconds, end_seconds, \
             speaker, embedding, embedding_model, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id)
        .bind(&chunk.text)
        .bind(chunk.start_seconds)
        .bind(chunk.end_seconds)
        .bind(chunk.speaker.as_deref())
        .bind(vec_to_blob(vector))
        .bind(&batch.model_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(
        session_id = %session_id,
        chunks = chunks.len(),
        model = %batch.model_id,
        "transcript indexed"
    );

    Ok(chunks.len())
}

/// Retrieve the chunks most relevant to a question, with recent history
/// folded into the query text.
pub async fn retrieve_relevant_chunks(
    pool: &SqlitePool,
    config: &Config,
    session_id: &str,
    question: &str,
    history: &[ChatMessage],
) -> Result<Vec<RankedChunk>> {
    let chunks = fetch_chunks(pool, session_id).await?;
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let query_text = build_query_text(question, history);
    let (query_embedding, _) = embed_query(&config.openai, &query_text).await;
    Ok(rank_chunks(chunks, &query_embedding, config.retrieval.limit))
}

/// Context updates applied before regenerating a summary.
#[derive(Debug, Clone, Default)]
pub struct ResummarizeUpdate {
    pub speakers: Option<Vec<crate::models::Speaker>>,
    pub topic_context: Option<String>,
    pub summary_language: Option<String>,
}

/// Regenerate the session summary from the stored transcript, applying any
/// context updates first. Returns `None` when the session has no transcript
/// yet.
pub async fn resummarize(
    pool: &SqlitePool,
    config: &Config,
    session_id: &str,
    update: ResummarizeUpdate,
) -> Result<Option<Summary>> {
    let session = fetch_session(pool, session_id)
        .await?
        .ok_or_else(|| anyhow!("session {} not found", session_id))?;

    let segments = fetch_segments(pool, session_id).await?;
    if segments.is_empty() {
        return Ok(None);
    }

    let speakers = update.speakers.unwrap_or(session.speakers);
    let topic_context = update.topic_context.or(session.topic_context);
    let summary_language = update.summary_language.or(session.summary_language);

    sqlx::query(
        "UPDATE sessions SET speaker_metadata_json = ?, topic_context = ?, summary_language = ? \
         WHERE id = ?",
    )
    .bind(serde_json::to_string(&speakers)?)
    .bind(topic_context.as_deref())
    .bind(summary_language.as_deref())
    .bind(session_id)
    .execute(pool)
    .await?;

    let params = StudyParams {
        title: Some(session.title),
        speakers,
        topic_context,
        language: summary_language,
    };

    let summary = if config.openai.is_enabled() {
        let transcript_text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        openai::generate_study_outputs(&config.openai, &transcript_text, &params)
            .await?
            .summary
    } else {
        offline::summary(&params)
    };

    let mut tx = pool.begin().await?;
    upsert_summary(&mut tx, session_id, &summary).await?;
    tx.commit().await?;

    Ok(Some(summary))
}

pub async fn fetch_session(pool: &SqlitePool, session_id: &str) -> Result<Option<Session>> {
    let row = sqlx::query("SELECT * FROM sessions WHERE id = ?")
        .bind(session_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| Session::from_row(&r)))
}

pub async fn fetch_segments(pool: &SqlitePool, session_id: &str) -> Result<Vec<TranscriptSegment>> {
    let rows = sqlx::query(
        "SELECT * FROM transcript_segments WHERE session_id = ? ORDER BY start_seconds ASC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(TranscriptSegment::from_row).collect())
}

pub async fn fetch_chunks(pool: &SqlitePool, session_id: &str) -> Result<Vec<TranscriptChunk>> {
    let rows = sqlx::query(
        "SELECT * FROM transcript_chunks WHERE session_id = ? ORDER BY start_seconds ASC, rowid ASC",
    )
    .bind(session_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(TranscriptChunk::from_row).collect())
}
