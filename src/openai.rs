//! Remote engine adapter.
//!
//! Wraps the OpenAI-style HTTP endpoints behind plain async functions:
//! audio transcription (multipart), structured summarization and chat
//! completion (JSON mode), and batch embeddings. Every call carries the
//! configured timeout; callers decide whether a failure is fatal (the
//! ingestion pipeline) or degrades to an offline strategy (embeddings,
//! chat).

use anyhow::{anyhow, bail, Result};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use crate::config::OpenAiConfig;
use crate::models::{ResourceDraft, SegmentDraft, Speaker, Summary};

/// Transcripts longer than this are condensed chunk-by-chunk before the
/// final summarization call.
const MAX_SUMMARY_INPUT_CHARS: usize = 12_000;

/// Result of transcribing one audio file.
#[derive(Debug, Clone)]
pub struct Transcription {
    pub text: String,
    pub language: Option<String>,
    pub segments: Vec<SegmentDraft>,
}

/// Summary plus suggested resources derived from one transcript.
#[derive(Debug, Clone)]
pub struct StudyOutputs {
    pub summary: Summary,
    pub resources: Vec<ResourceDraft>,
}

/// Context handed to the summarizer alongside the transcript.
#[derive(Debug, Clone, Default)]
pub struct StudyParams {
    pub title: Option<String>,
    pub speakers: Vec<Speaker>,
    pub topic_context: Option<String>,
    pub language: Option<String>,
}

fn client(config: &OpenAiConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

fn api_key(config: &OpenAiConfig) -> Result<String> {
    config
        .resolved_api_key()
        .ok_or_else(|| anyhow!("OpenAI API key is not configured"))
}

async fn post_json(config: &OpenAiConfig, path: &str, body: &Value) -> Result<Value> {
    let key = api_key(config)?;
    let response = client(config)?
        .post(format!("{}{}", config.base_url, path))
        .header("Authorization", format!("Bearer {}", key))
        .json(body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("OpenAI request failed ({}): {}", status, body_text);
    }

    Ok(response.json().await?)
}

/// Transcribe an audio file into text, a detected language, and time-coded
/// segments. Whisper-family models get `verbose_json` with per-segment
/// timestamps; other models get plain `json`.
pub async fn transcribe_audio(config: &OpenAiConfig, file_path: &Path) -> Result<Transcription> {
    let key = api_key(config)?;
    let data = tokio::fs::read(file_path).await?;
    let file_name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio.m4a".to_string());

    let verbose = config.transcribe_model.to_lowercase().contains("whisper");
    let response_format = if verbose { "verbose_json" } else { "json" };

    let mut form = reqwest::multipart::Form::new()
        .text("model", config.transcribe_model.clone())
        .text("response_format", response_format.to_string())
        .text("temperature", "0".to_string())
        .part(
            "file",
            reqwest::multipart::Part::bytes(data)
                .file_name(file_name)
                .mime_str("audio/mp4")?,
        );
    if verbose {
        form = form.text("timestamp_granularities[]", "segment".to_string());
    }

    let response = client(config)?
        .post(format!("{}/v1/audio/transcriptions", config.base_url))
        .header("Authorization", format!("Bearer {}", key))
        .multipart(form)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        bail!("OpenAI transcription failed ({}): {}", status, body_text);
    }

    let body: Value = response.json().await?;

    let text = body
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();
    let language = body
        .get("language")
        .and_then(|l| l.as_str())
        .map(|l| l.to_string());

    let segments = body
        .get("segments")
        .and_then(|s| s.as_array())
        .map(|segs| {
            segs.iter()
                .filter_map(|seg| {
                    let seg_text = seg.get("text")?.as_str()?.trim().to_string();
                    if seg_text.is_empty() {
                        return None;
                    }
                    Some(SegmentDraft {
                        start_seconds: seg.get("start").and_then(|v| v.as_f64()).unwrap_or(0.0),
                        end_seconds: seg.get("end").and_then(|v| v.as_f64()).unwrap_or(0.0),
                        text: seg_text,
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Transcription {
        text,
        language,
        segments,
    })
}

/// Guarantee usable time-coded segments for a transcription.
///
/// Plain `json` responses (the non-whisper default) carry only text, no
/// `segments` array. When that happens and the transcript text is
/// non-blank, synthesize a single segment spanning the whole recording so
/// downstream persistence and indexing always have something to work with.
/// Segments whose end precedes their start are dropped either way.
pub fn coalesce_segments(
    segments: Vec<SegmentDraft>,
    text: &str,
    duration_seconds: Option<f64>,
) -> Vec<SegmentDraft> {
    let segments = if segments.is_empty() && !text.trim().is_empty() {
        vec![SegmentDraft {
            start_seconds: 0.0,
            end_seconds: duration_seconds.unwrap_or(0.0).max(0.0),
            text: text.trim().to_string(),
        }]
    } else {
        segments
    };

    segments
        .into_iter()
        .filter(|s| !s.text.trim().is_empty() && s.end_seconds >= s.start_seconds)
        .collect()
}

/// Summarize a transcript into the structured summary + resources shape.
///
/// Long transcripts are split on word boundaries and condensed with one
/// summarization call per piece before the final call; the final response
/// must carry both summary forms or the whole call fails.
pub async fn generate_study_outputs(
    config: &OpenAiConfig,
    transcript_text: &str,
    params: &StudyParams,
) -> Result<StudyOutputs> {
    let pieces = split_transcript(transcript_text, MAX_SUMMARY_INPUT_CHARS);

    let (condensed, chunked) = if pieces.len() > 1 {
        let mut piece_summaries = Vec::with_capacity(pieces.len());
        for (idx, piece) in pieces.iter().enumerate() {
            let (piece_summary, key_points) =
                summarize_transcript_piece(config, piece, params.title.as_deref(), idx, pieces.len())
                    .await?;
            piece_summaries.push(format!(
                "Chunk {}: {}\nKey points: {}",
                idx + 1,
                piece_summary,
                key_points.join("; ")
            ));
        }
        (piece_summaries.join("\n\n"), true)
    } else {
        (transcript_text.to_string(), false)
    };

    let user_content = [
        params.title.as_deref().map(|t| format!("Title: {}", t)),
        Some(if chunked {
            "Transcript summary (chunked):".to_string()
        } else {
            "Transcript:".to_string()
        }),
        Some(condensed),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join("\n");

    let body = json!({
        "model": config.summary_model,
        "temperature": 0.2,
        "response_format": { "type": "json_object" },
        "messages": [
            { "role": "system", "content": build_summary_system_prompt(params) },
            { "role": "user", "content": user_content },
        ],
    });

    let response = post_json(config, "/v1/chat/completions", &body).await?;
    let parsed = completion_content(&response)
        .ok_or_else(|| anyhow!("OpenAI summary response was not valid JSON"))?;

    let short_summary = string_field(&parsed, "short_summary");
    let detailed_summary = string_field(&parsed, "detailed_summary");
    if short_summary.is_empty() || detailed_summary.is_empty() {
        bail!("OpenAI summary response missing required fields");
    }

    let language = string_field(&parsed, "language");
    let language = if language.is_empty() {
        params.language.clone()
    } else {
        Some(language)
    };

    Ok(StudyOutputs {
        summary: Summary {
            short_summary,
            detailed_summary,
            key_points: coerce_string_list(parsed.get("key_points")),
            action_items: coerce_string_list(parsed.get("action_items")),
            highlights: coerce_highlights(coerce_string_list(parsed.get("highlights"))),
            language,
        },
        resources: coerce_resources(parsed.get("resources")),
    })
}

async fn summarize_transcript_piece(
    config: &OpenAiConfig,
    piece: &str,
    title: Option<&str>,
    idx: usize,
    total: usize,
) -> Result<(String, Vec<String>)> {
    let user_content = [
        title.map(|t| format!("Title: {}", t)),
        Some(format!("Chunk {} of {}:", idx + 1, total)),
        Some(piece.to_string()),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join("\n");

    let body = json!({
        "model": config.summary_model,
        "temperature": 0.2,
        "response_format": { "type": "json_object" },
        "messages": [
            {
                "role": "system",
                "content": "Summarize this transcript chunk. Return ONLY valid JSON with keys: \
                    chunk_summary (string), key_points (string[]). Keep it grounded in the text."
            },
            { "role": "user", "content": user_content },
        ],
    });

    let response = post_json(config, "/v1/chat/completions", &body).await?;
    let parsed = completion_content(&response).unwrap_or(Value::Null);

    let summary = string_field(&parsed, "chunk_summary");
    let summary = if summary.is_empty() {
        "Chunk summary unavailable.".to_string()
    } else {
        summary
    };

    Ok((summary, coerce_string_list(parsed.get("key_points"))))
}

fn build_summary_system_prompt(params: &StudyParams) -> String {
    let mut context_lines = Vec::new();
    if !params.speakers.is_empty() {
        if let Ok(serialized) = serde_json::to_string(&params.speakers) {
            context_lines.push(format!("Speaker metadata: {}", serialized));
        }
    }
    if let Some(topic) = &params.topic_context {
        context_lines.push(format!("Session context: {}", topic));
    }
    if let Some(language) = &params.language {
        context_lines.push(format!("Respond in language: {}.", language));
    }

    let mut prompt = String::from(
        "You summarize talk transcripts. Return ONLY valid JSON with keys: \
         short_summary (string), detailed_summary (string), key_points (string[]), \
         action_items (string[]), highlights (string[3]), language (string), \
         resources (array of {title,url,source_name,description}). \
         Highlights must be exactly 3 items. Keep the summary grounded in the transcript. ",
    );
    if !context_lines.is_empty() {
        prompt.push_str(&format!("Context:\n{}", context_lines.join("\n")));
    }
    prompt
}

/// Embed a batch of texts. Empty input returns an empty batch without a
/// network round-trip.
pub async fn generate_embeddings(
    config: &OpenAiConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let body = json!({
        "model": config.embed_model,
        "input": texts,
    });

    let response = post_json(config, "/v1/embeddings", &body).await?;
    let data = response
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid embeddings response: missing data array"))?;

    let mut vectors = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid embeddings response: missing embedding"))?;
        vectors.push(
            embedding
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect(),
        );
    }

    Ok(vectors)
}

/// Run a JSON-mode chat completion and parse the returned content.
/// Returns `None` when the model's output is not valid JSON — the caller
/// substitutes a clarifying non-answer rather than surfacing a raw error.
pub async fn chat_completion(config: &OpenAiConfig, messages: Vec<Value>) -> Result<Option<Value>> {
    let body = json!({
        "model": config.chat_model(),
        "temperature": 0.2,
        "response_format": { "type": "json_object" },
        "messages": messages,
    });

    let response = post_json(config, "/v1/chat/completions", &body).await?;
    Ok(completion_content(&response))
}

/// Pull the first choice's message content out of a chat completion
/// response and parse it as JSON.
fn completion_content(response: &Value) -> Option<Value> {
    let content = response
        .get("choices")?
        .as_array()?
        .first()?
        .get("message")?
        .get("content")?
        .as_str()?;
    if content.trim().is_empty() {
        return None;
    }
    serde_json::from_str(content).ok()
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Coerce a JSON value into a list of non-empty strings.
pub fn coerce_string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(|s| s.to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Force the highlight list to exactly three entries: truncate extras, pad
/// shortfalls with a placeholder.
pub fn coerce_highlights(mut highlights: Vec<String>) -> Vec<String> {
    highlights.truncate(3);
    while highlights.len() < 3 {
        highlights.push("Highlight not available.".to_string());
    }
    highlights
}

fn coerce_resources(value: Option<&Value>) -> Vec<ResourceDraft> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .map(|r| ResourceDraft {
                    title: string_field(r, "title"),
                    url: string_field(r, "url"),
                    source_name: string_field(r, "source_name"),
                    description: string_field(r, "description"),
                })
                .filter(|r| !r.title.is_empty() && !r.url.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Split a transcript into word-aligned pieces of at most `max_chars`
/// (approximately — a piece closes once it reaches the cap).
fn split_transcript(text: &str, max_chars: usize) -> Vec<String> {
    if text.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut length = 0usize;

    for word in text.split_whitespace() {
        current.push(word);
        length += word.len() + 1;
        if length >= max_chars {
            pieces.push(current.join(" "));
            current.clear();
            length = 0;
        }
    }
    if !current.is_empty() {
        pieces.push(current.join(" "));
    }
    pieces
}
