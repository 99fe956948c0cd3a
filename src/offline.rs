//! Deterministic offline generators.
//!
//! Used whenever the remote engine is unconfigured or the audio artifact
//! cannot be resolved to a readable file. Everything here is pure and
//! reproducible, so pipeline tests run without network access.

use crate::models::{Citation, ResourceDraft, SegmentDraft, Summary, TranscriptChunk};
use crate::openai::StudyParams;

const DEMO_SUMMARY: &str = "Speaker outlined a practical path for AI-assisted note taking and \
study workflows, focusing on capturing audio and slide context with minimal friction.";

/// Answer used when no chunks are available to ground a response.
pub const NO_CHUNK_ANSWER: &str =
    "That was not directly covered in this session. Can you clarify what part you want to focus on?";

/// Canned transcript segments standing in for a real transcription pass.
pub fn transcript_segments() -> Vec<SegmentDraft> {
    [
        "Welcome to the session, where we help you capture talks effortlessly.",
        "We align the transcript to timestamps so you can revisit moments quickly.",
        "Our study hub surfaces key takeaways and related resources.",
        "Future versions will ship real AI summaries and smart resource discovery.",
    ]
    .iter()
    .enumerate()
    .map(|(idx, text)| SegmentDraft {
        start_seconds: idx as f64 * 45.0,
        end_seconds: idx as f64 * 45.0 + 40.0,
        text: text.to_string(),
    })
    .collect()
}

/// Canned structured summary, with the supplied speaker metadata and topic
/// context woven into the short form.
pub fn summary(params: &StudyParams) -> Summary {
    let metadata_note = if params.speakers.is_empty() {
        String::new()
    } else {
        let names: Vec<String> = params
            .speakers
            .iter()
            .map(|s| match &s.role {
                Some(role) => format!("{} ({})", s.name, role),
                None => s.name.clone(),
            })
            .collect();
        format!("Speakers include {}. ", names.join(", "))
    };
    let context_note = params
        .topic_context
        .as_deref()
        .map(|topic| format!("Session context: {}. ", topic))
        .unwrap_or_default();

    Summary {
        short_summary: format!("{}{}{}", metadata_note, context_note, DEMO_SUMMARY),
        detailed_summary: format!(
            "{} The talk emphasized aligning notes to transcript timestamps and delivering \
             concise study-ready outputs.",
            DEMO_SUMMARY
        ),
        key_points: vec![
            "Capture audio and slides together to preserve context.".to_string(),
            "Auto-transcribe and align notes to transcript segments.".to_string(),
            "Provide TL;DR, takeaways, and study resources quickly.".to_string(),
        ],
        action_items: vec![
            "Test the recording workflow in noisy environments.".to_string(),
            "Prototype alignment on a larger sample.".to_string(),
            "Ship resource recommendations backed by search.".to_string(),
        ],
        highlights: vec![
            "Audio + slide capture keeps context intact.".to_string(),
            "Transcript alignment speeds review.".to_string(),
            "Study summaries make sessions reusable.".to_string(),
        ],
        language: Some(params.language.clone().unwrap_or_else(|| "en".to_string())),
    }
}

/// Canned suggested reading.
pub fn resources() -> Vec<ResourceDraft> {
    vec![
        ResourceDraft {
            title: "Designing delightful capture flows".to_string(),
            url: "https://example.com/designing-capture-flows".to_string(),
            source_name: "Product Patterns".to_string(),
            description: "Patterns for low-friction capture with progressive disclosure."
                .to_string(),
        },
        ResourceDraft {
            title: "Building robust audio recorders on mobile".to_string(),
            url: "https://example.com/mobile-audio-recording".to_string(),
            source_name: "Audio Guide".to_string(),
            description: "Best practices for audio sessions, background modes, and interruptions."
                .to_string(),
        },
    ]
}

/// Compose an answer from the top retrieved chunk without a language model:
/// echo a truncated excerpt and cite the chunk. No chunks yields the fixed
/// clarifying non-answer with no citations.
pub fn chat_answer(chunks: &[TranscriptChunk]) -> (String, Vec<Citation>) {
    let Some(top) = chunks.first() else {
        return (NO_CHUNK_ANSWER.to_string(), Vec::new());
    };

    let excerpt: String = top.text.chars().take(160).collect();
    let answer = format!(
        "From what was discussed, the session highlights: {}...",
        excerpt
    );
    let citations = vec![Citation {
        chunk_id: top.id.clone(),
        start_seconds: top.start_seconds,
        end_seconds: top.end_seconds,
        text: top.text.clone(),
    }];

    (answer, citations)
}
