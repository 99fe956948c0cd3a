//! Core data models used throughout session-scribe.
//!
//! These types represent the sessions, transcript segments, summaries,
//! retrieval chunks, and chat messages that flow through the processing
//! pipeline. Columns holding serialized JSON (`speaker_metadata_json`,
//! `key_points_json`, `citations_json`, ...) are decoded explicitly at every
//! read site via the helpers at the bottom; malformed or missing payloads
//! decode to an empty value rather than an error, since historical rows may
//! predate the current shape.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

/// Lifecycle status of a session. Only the ingestion pipeline moves a
/// session between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Recording,
    Processing,
    Ready,
    Failed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Recording => "recording",
            SessionStatus::Processing => "processing",
            SessionStatus::Ready => "ready",
            SessionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "recording" => Some(SessionStatus::Recording),
            "processing" => Some(SessionStatus::Processing),
            "ready" => Some(SessionStatus::Ready),
            "failed" => Some(SessionStatus::Failed),
            _ => None,
        }
    }
}

/// One named speaker from the session's optional speaker metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Speaker {
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// A recorded session and its lifecycle state.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub event_name: Option<String>,
    pub status: SessionStatus,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub transcript_language: Option<String>,
    pub summary_language: Option<String>,
    pub topic_context: Option<String>,
    pub speakers: Vec<Speaker>,
    pub source_session_id: Option<String>,
}

impl Session {
    pub fn from_row(row: &SqliteRow) -> Self {
        let status: String = row.get("status");
        let speaker_json: Option<String> = row.get("speaker_metadata_json");
        Session {
            id: row.get("id"),
            title: row.get("title"),
            event_name: row.get("event_name"),
            status: SessionStatus::parse(&status).unwrap_or(SessionStatus::Recording),
            started_at: row.get("started_at"),
            ended_at: row.get("ended_at"),
            duration_seconds: row.get("duration_seconds"),
            transcript_language: row.get("transcript_language"),
            summary_language: row.get("summary_language"),
            topic_context: row.get("topic_context"),
            speakers: decode_json_list(speaker_json.as_deref()),
            source_session_id: row.get("source_session_id"),
        }
    }
}

/// A stored audio upload attached to a session. Only the most recent
/// recording drives processing.
#[derive(Debug, Clone, Serialize)]
pub struct AudioRecording {
    pub id: String,
    pub session_id: String,
    pub file_url: String,
    pub duration_seconds: Option<f64>,
    pub created_at: i64,
}

impl AudioRecording {
    pub fn from_row(row: &SqliteRow) -> Self {
        AudioRecording {
            id: row.get("id"),
            session_id: row.get("session_id"),
            file_url: row.get("file_url"),
            duration_seconds: row.get("duration_seconds"),
            created_at: row.get("created_at"),
        }
    }
}

/// Time-coded slice of transcript text, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDraft {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

/// A persisted transcript segment belonging to one session.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptSegment {
    pub id: String,
    pub session_id: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

impl TranscriptSegment {
    pub fn from_row(row: &SqliteRow) -> Self {
        TranscriptSegment {
            id: row.get("id"),
            session_id: row.get("session_id"),
            start_seconds: row.get("start_seconds"),
            end_seconds: row.get("end_seconds"),
            text: row.get("text"),
        }
    }
}

/// Structured summary of a session. At most one exists per session,
/// keyed by session id. `highlights` is always exactly three entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub short_summary: String,
    pub detailed_summary: String,
    pub key_points: Vec<String>,
    pub action_items: Vec<String>,
    pub highlights: Vec<String>,
    pub language: Option<String>,
}

impl Summary {
    pub fn from_row(row: &SqliteRow) -> Self {
        let key_points: Option<String> = row.get("key_points_json");
        let action_items: Option<String> = row.get("action_items_json");
        let highlights: Option<String> = row.get("highlights_json");
        Summary {
            short_summary: row.get("short_summary"),
            detailed_summary: row.get("detailed_summary"),
            key_points: decode_json_list(key_points.as_deref()),
            action_items: decode_json_list(action_items.as_deref()),
            highlights: decode_json_list(highlights.as_deref()),
            language: row.get("language"),
        }
    }
}

/// A suggested reading resource produced alongside the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDraft {
    pub title: String,
    pub url: String,
    pub source_name: String,
    pub description: String,
}

/// A persisted resource row.
#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub id: String,
    pub session_id: String,
    pub title: String,
    pub url: String,
    pub source_name: String,
    pub description: String,
    pub created_at: i64,
}

impl Resource {
    pub fn from_row(row: &SqliteRow) -> Self {
        Resource {
            id: row.get("id"),
            session_id: row.get("session_id"),
            title: row.get("title"),
            url: row.get("url"),
            source_name: row.get("source_name"),
            description: row.get("description"),
            created_at: row.get("created_at"),
        }
    }
}

/// Chunker output before embedding and persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkDraft {
    pub text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub speaker: Option<String>,
}

/// A retrieval unit: a contiguous span of transcript text with its
/// embedding, decoded from storage.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptChunk {
    pub id: String,
    pub session_id: String,
    pub text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub speaker: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
}

impl TranscriptChunk {
    pub fn from_row(row: &SqliteRow) -> Self {
        let blob: Option<Vec<u8>> = row.get("embedding");
        TranscriptChunk {
            id: row.get("id"),
            session_id: row.get("session_id"),
            text: row.get("text"),
            start_seconds: row.get("start_seconds"),
            end_seconds: row.get("end_seconds"),
            speaker: row.get("speaker"),
            embedding: blob.map(|b| crate::embedding::blob_to_vec(&b)),
            embedding_model: row.get("embedding_model"),
        }
    }
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(ChatRole::User),
            "assistant" => Some(ChatRole::Assistant),
            _ => None,
        }
    }
}

/// A citation from an answer back to the chunk that justifies it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

/// A link to background reading outside the session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalLink {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub note: Option<String>,
}

/// One entry in a session's append-only chat history.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: ChatRole,
    pub content: String,
    pub citations: Vec<Citation>,
    pub external_links: Vec<ExternalLink>,
    pub language: Option<String>,
    pub created_at: i64,
}

impl ChatMessage {
    pub fn from_row(row: &SqliteRow) -> Self {
        let role: String = row.get("role");
        let citations: Option<String> = row.get("citations_json");
        let links: Option<String> = row.get("external_links_json");
        ChatMessage {
            id: row.get("id"),
            session_id: row.get("session_id"),
            role: ChatRole::parse(&role).unwrap_or(ChatRole::User),
            content: row.get("content"),
            citations: decode_json_list(citations.as_deref()),
            external_links: decode_json_list(links.as_deref()),
            language: row.get("language"),
            created_at: row.get("created_at"),
        }
    }
}

/// Decode a JSON array column. `None`, empty, or malformed payloads
/// decode to an empty list.
pub fn decode_json_list<T: DeserializeOwned>(raw: Option<&str>) -> Vec<T> {
    match raw {
        Some(s) if !s.trim().is_empty() => serde_json::from_str(s).unwrap_or_default(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            SessionStatus::Recording,
            SessionStatus::Processing,
            SessionStatus::Ready,
            SessionStatus::Failed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("bogus"), None);
    }

    #[test]
    fn test_decode_json_list_tolerates_garbage() {
        let speakers: Vec<Speaker> = decode_json_list(Some("not json"));
        assert!(speakers.is_empty());

        let speakers: Vec<Speaker> = decode_json_list(None);
        assert!(speakers.is_empty());

        let speakers: Vec<Speaker> =
            decode_json_list(Some(r#"[{"name":"Ada","role":"host"},{"name":"Lin"}]"#));
        assert_eq!(speakers.len(), 2);
        assert_eq!(speakers[0].role.as_deref(), Some("host"));
        assert!(speakers[1].role.is_none());
    }
}
