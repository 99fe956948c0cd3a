//! Retrieval ranking over a session's chunk set.
//!
//! The chunk set for one session is small, so scoring is exhaustive: every
//! stored chunk is compared against the query vector by cosine similarity
//! and the list is stable-sorted descending. The top score feeds the chat
//! confidence gate.

use crate::embedding::cosine_similarity;
use crate::models::{ChatMessage, ChatRole, TranscriptChunk};

/// A chunk with its similarity score against one query.
#[derive(Debug, Clone)]
pub struct RankedChunk {
    pub chunk: TranscriptChunk,
    pub score: f32,
}

/// Score and order chunks against a query vector, keeping at most `limit`.
/// Chunks without an embedding score 0. The sort is stable, so equal scores
/// keep their stored order.
pub fn rank_chunks(
    chunks: Vec<TranscriptChunk>,
    query_embedding: &[f32],
    limit: usize,
) -> Vec<RankedChunk> {
    let mut ranked: Vec<RankedChunk> = chunks
        .into_iter()
        .map(|chunk| {
            let score = match &chunk.embedding {
                Some(embedding) => cosine_similarity(query_embedding, embedding),
                None => 0.0,
            };
            RankedChunk { chunk, score }
        })
        .collect();

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(limit);
    ranked
}

/// The confidence signal for gating: the best similarity in the ranked
/// list, or 0 when nothing was retrieved.
pub fn top_score(ranked: &[RankedChunk]) -> f32 {
    ranked.first().map(|r| r.score).unwrap_or(0.0)
}

/// Build the text that gets embedded for retrieval: recent chat history as
/// "User:"/"Assistant:" lines, then the question.
pub fn build_query_text(question: &str, history: &[ChatMessage]) -> String {
    let history_text = history
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

    [history_text, question.to_string()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::hash_embedding;

    fn chunk(id: &str, text: &str, embedding: Option<Vec<f32>>) -> TranscriptChunk {
        TranscriptChunk {
            id: id.to_string(),
            session_id: "s1".to_string(),
            text: text.to_string(),
            start_seconds: 0.0,
            end_seconds: 10.0,
            speaker: None,
            embedding,
            embedding_model: None,
        }
    }

    fn message(role: ChatRole, content: &str) -> ChatMessage {
        ChatMessage {
            id: "m".to_string(),
            session_id: "s1".to_string(),
            role,
            content: content.to_string(),
            citations: Vec::new(),
            external_links: Vec::new(),
            language: None,
            created_at: 0,
        }
    }

    #[test]
    fn test_rank_sorted_descending_and_limited() {
        let query = hash_embedding("rust ownership");
        let chunks = vec![
            chunk("a", "gardening tips", Some(hash_embedding("gardening tips"))),
            chunk(
                "b",
                "rust ownership rules",
                Some(hash_embedding("rust ownership rules")),
            ),
            chunk("c", "cooking pasta", Some(hash_embedding("cooking pasta"))),
        ];

        let ranked = rank_chunks(chunks, &query, 2);
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].score >= ranked[1].score);
        assert_eq!(ranked[0].chunk.id, "b");
    }

    #[test]
    fn test_missing_embedding_scores_zero() {
        let query = hash_embedding("anything");
        let ranked = rank_chunks(vec![chunk("a", "text", None)], &query, 8);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].score, 0.0);
    }

    #[test]
    fn test_ties_keep_stored_order() {
        let query = hash_embedding("query");
        let chunks = vec![
            chunk("first", "x", None),
            chunk("second", "y", None),
            chunk("third", "z", None),
        ];
        let ranked = rank_chunks(chunks, &query, 8);
        let ids: Vec<&str> = ranked.iter().map(|r| r.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_top_score_empty_is_zero() {
        assert_eq!(top_score(&[]), 0.0);
    }

    #[test]
    fn test_build_query_text_with_history() {
        let history = vec![
            message(ChatRole::User, "What was the demo about?"),
            message(ChatRole::Assistant, "A capture workflow."),
        ];
        let text = build_query_text("Any action items?", &history);
        assert_eq!(
            text,
            "User: What was the demo about?\nAssistant: A capture workflow.\nAny action items?"
        );
    }

    #[test]
    fn test_build_query_text_without_history() {
        assert_eq!(build_query_text("Just the question", &[]), "Just the question");
    }
}
