//! Grounded chat composition.
//!
//! Answers are composed strictly from retrieved transcript chunks. The
//! confidence gate runs first: when the best retrieval score is below the
//! floor (or nothing was retrieved), the fixed non-answer is returned and
//! the language model is never invoked — a hard policy, reproducible
//! bit-for-bit. Past the gate, the model is constrained to the supplied
//! chunks and must emit a JSON answer with chunk-id citations; citations
//! are then normalized against the actual chunk set, with one synthesized
//! from the top chunk if the model cited nothing valid.

use anyhow::Result;
use serde_json::{json, Value};

use crate::config::OpenAiConfig;
use crate::models::{ChatMessage, ChatRole, Citation, Speaker, TranscriptChunk};
use crate::offline;
use crate::openai;
use crate::retrieval::RankedChunk;

/// Minimum top retrieval score for grounded generation. Exactly this value
/// passes; anything below returns the fixed non-answer.
pub const CONFIDENCE_FLOOR: f32 = 0.15;

/// The fixed non-answer returned below the confidence floor.
pub const LOW_CONFIDENCE_ANSWER: &str = "That was not covered in this session. What part of the \
talk should I focus on, or do you want related background instead?";

/// Substituted when the model returns an empty or unparseable answer.
const UNPARSEABLE_ANSWER: &str =
    "This was not clearly covered in the session. What specific part should I focus on?";

/// Maximum characters kept from a citation quote.
const CITATION_QUOTE_CHARS: usize = 320;

/// Session context fed into the prompt.
#[derive(Debug, Clone, Default)]
pub struct ChatContext {
    pub title: Option<String>,
    pub topic_context: Option<String>,
    pub speakers: Vec<Speaker>,
    pub language: Option<String>,
    pub transcript_language: Option<String>,
}

/// A composed answer with its supporting citations.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Compose an answer for `question` from the ranked chunks.
///
/// Below the confidence floor (or with no chunks at all) this returns the
/// fixed non-answer without calling any model. With no remote engine
/// configured, the offline excerpt composer answers instead.
pub async fn answer(
    config: &OpenAiConfig,
    question: &str,
    context: &ChatContext,
    history: &[ChatMessage],
    ranked: &[RankedChunk],
    top_score: f32,
) -> Result<ChatResponse> {
    if top_score < CONFIDENCE_FLOOR || ranked.is_empty() {
        return Ok(ChatResponse {
            answer: LOW_CONFIDENCE_ANSWER.to_string(),
            citations: Vec::new(),
        });
    }

    let chunks: Vec<&TranscriptChunk> = ranked.iter().map(|r| &r.chunk).collect();

    if !config.is_enabled() {
        let owned: Vec<TranscriptChunk> = chunks.iter().map(|c| (*c).clone()).collect();
        let (answer, citations) = offline::chat_answer(&owned);
        return Ok(ChatResponse { answer, citations });
    }

    let messages = vec![
        json!({ "role": "system", "content": build_system_prompt(context) }),
        json!({
            "role": "user",
            "content": build_user_prompt(question, context, history, &chunks),
        }),
    ];

    let parsed = openai::chat_completion(config, messages).await?;

    let answer = parsed
        .as_ref()
        .and_then(|p| p.get("answer"))
        .and_then(|a| a.as_str())
        .map(|a| a.trim().to_string())
        .unwrap_or_default();

    let mut citations =
        normalize_citations(parsed.as_ref().and_then(|p| p.get("citations")), &chunks);
    if citations.is_empty() {
        if let Some(top) = chunks.first() {
            citations.push(Citation {
                chunk_id: top.id.clone(),
                start_seconds: top.start_seconds,
                end_seconds: top.end_seconds,
                text: truncate_chars(&top.text, CITATION_QUOTE_CHARS),
            });
        }
    }

    let answer = if answer.is_empty() {
        UNPARSEABLE_ANSWER.to_string()
    } else {
        answer
    };

    Ok(ChatResponse { answer, citations })
}

fn build_system_prompt(context: &ChatContext) -> String {
    let mut parts = vec![
        "You are the session itself. Answer only using the provided transcript chunks."
            .to_string(),
        "If the answer is not covered, say so explicitly and ask a follow-up question."
            .to_string(),
        "Be concise by default; expand only if asked.".to_string(),
    ];
    if let Some(language) = &context.language {
        parts.push(format!("Respond in language: {}.", language));
        if let Some(transcript_language) = &context.transcript_language {
            if transcript_language != language {
                parts.push(format!(
                    "Citations can remain in the original transcript language ({}).",
                    transcript_language
                ));
            }
        }
    }
    parts.push(
        "Return ONLY valid JSON with keys: answer (string), citations (array of {chunk_id, quote})."
            .to_string(),
    );
    parts.join(" ")
}

fn build_user_prompt(
    question: &str,
    context: &ChatContext,
    history: &[ChatMessage],
    chunks: &[&TranscriptChunk],
) -> String {
    let mut context_lines = Vec::new();
    if let Some(title) = &context.title {
        context_lines.push(format!("Title: {}", title));
    }
    if let Some(topic) = &context.topic_context {
        context_lines.push(format!("Session context: {}", topic));
    }
    if !context.speakers.is_empty() {
        if let Ok(serialized) = serde_json::to_string(&context.speakers) {
            context_lines.push(format!("Speaker metadata: {}", serialized));
        }
    }

    let history_lines = history
        .iter()
        .map(|msg| {
            let prefix = match msg.role {
                ChatRole::Assistant => "Assistant",
                ChatRole::User => "User",
            };
            format!("{}: {}", prefix, msg.content)
        })
        .collect::<Vec<_>>()
        .join("\n");

    let chunk_lines = chunks
        .iter()
        .map(|chunk| {
            format!(
                "[{}|{}-{}] {}",
                chunk.id, chunk.start_seconds, chunk.end_seconds, chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let mut blocks = Vec::new();
    if !context_lines.is_empty() {
        blocks.push(context_lines.join("\n"));
    }
    if !history_lines.is_empty() {
        blocks.push(format!("Chat history:\n{}", history_lines));
    }
    blocks.push(format!("Transcript chunks:\n{}", chunk_lines));
    blocks.push(format!("Question:\n{}", question));
    blocks.join("\n\n")
}

/// Keep only citations that reference a supplied chunk; quotes default to
/// the chunk text and are capped.
fn normalize_citations(citations: Option<&Value>, chunks: &[&TranscriptChunk]) -> Vec<Citation> {
    let Some(items) = citations.and_then(|c| c.as_array()) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|citation| {
            let chunk_id = citation.get("chunk_id")?.as_str()?;
            let chunk = chunks.iter().find(|c| c.id == chunk_id)?;
            let quote = citation
                .get("quote")
                .and_then(|q| q.as_str())
                .unwrap_or(&chunk.text);
            Some(Citation {
                chunk_id: chunk.id.clone(),
                start_seconds: chunk.start_seconds,
                end_seconds: chunk.end_seconds,
                text: truncate_chars(quote, CITATION_QUOTE_CHARS),
            })
        })
        .collect()
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
