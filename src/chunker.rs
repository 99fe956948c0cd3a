//! Segment-boundary transcript chunker.
//!
//! Groups ordered transcript segments into token-bounded retrieval units.
//! A chunk boundary never falls mid-segment: segments are accumulated
//! greedily and the buffer is flushed once it would exceed `max_tokens`
//! while already holding at least `min_tokens`. Token counts are estimated
//! at 1.3 tokens per whitespace-separated word, rounded up.

use crate::models::{ChunkDraft, SegmentDraft};

/// Estimate the token cost of a piece of text: `ceil(words × 1.3)`.
pub fn estimate_tokens(text: &str) -> usize {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0;
    }
    let words = trimmed.split_whitespace().count();
    (words as f64 * 1.3).ceil() as usize
}

/// Partition ordered segments into chunks. Blank segments are skipped
/// entirely; they neither start nor extend a chunk. Single pass, no
/// lookahead. Non-empty input always yields at least one chunk.
pub fn chunk_segments(
    segments: &[SegmentDraft],
    max_tokens: usize,
    min_tokens: usize,
) -> Vec<ChunkDraft> {
    let mut chunks: Vec<ChunkDraft> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_tokens = 0usize;
    let mut buf_start: Option<f64> = None;
    let mut buf_end: f64 = 0.0;

    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }

        let seg_tokens = estimate_tokens(text);

        if !current.is_empty()
            && current_tokens + seg_tokens > max_tokens
            && current_tokens >= min_tokens
        {
            chunks.push(ChunkDraft {
                text: current.join(" "),
                start_seconds: buf_start.unwrap_or(0.0),
                end_seconds: buf_end,
                speaker: None,
            });
            current.clear();
            current_tokens = 0;
            buf_start = None;
        }

        if current.is_empty() {
            buf_start = Some(segment.start_seconds);
        }
        current.push(text);
        current_tokens += seg_tokens;
        buf_end = segment.end_seconds;
    }

    if !current.is_empty() {
        chunks.push(ChunkDraft {
            text: current.join(" "),
            start_seconds: buf_start.unwrap_or(0.0),
            end_seconds: buf_end,
            speaker: None,
        });
    }

    chunks.retain(|chunk| !chunk.text.is_empty());
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str) -> SegmentDraft {
        SegmentDraft {
            start_seconds: start,
            end_seconds: end,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("   "), 0);
        // 1 word * 1.3 = 1.3 -> 2
        assert_eq!(estimate_tokens("hello"), 2);
        // 10 words * 1.3 = 13
        assert_eq!(estimate_tokens("a b c d e f g h i j"), 13);
    }

    #[test]
    fn test_small_input_single_chunk() {
        let segments = vec![seg(0.0, 10.0, "Hello there."), seg(10.0, 20.0, "More text.")];
        let chunks = chunk_segments(&segments, 700, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello there. More text.");
        assert_eq!(chunks[0].start_seconds, 0.0);
        assert_eq!(chunks[0].end_seconds, 20.0);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(chunk_segments(&[], 700, 200).is_empty());
    }

    #[test]
    fn test_blank_segments_skipped() {
        let segments = vec![
            seg(0.0, 5.0, "   "),
            seg(5.0, 10.0, "Real content."),
            seg(10.0, 15.0, ""),
        ];
        let chunks = chunk_segments(&segments, 700, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Real content.");
        // Chunk bounds come from the non-blank segment, not the blanks.
        assert_eq!(chunks[0].start_seconds, 5.0);
        assert_eq!(chunks[0].end_seconds, 10.0);
    }

    #[test]
    fn test_flush_at_threshold_produces_segment_aligned_chunks() {
        let segments = vec![
            seg(0.0, 10.0, "Intro."),
            seg(10.0, 20.0, "Topic A discussed."),
            seg(20.0, 30.0, "Topic A discussed more."),
        ];
        // Segments estimate to 2, 4, and 6 tokens, so with max=5/min=1 every
        // addition after the first crosses the max: one segment per chunk.
        let chunks = chunk_segments(&segments, 5, 1);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "Intro.");
        assert_eq!(chunks[1].text, "Topic A discussed.");
        assert_eq!(chunks[2].text, "Topic A discussed more.");
        for (chunk, segment) in chunks.iter().zip(segments.iter()) {
            assert_eq!(chunk.start_seconds, segment.start_seconds);
            assert_eq!(chunk.end_seconds, segment.end_seconds);
        }
    }

    #[test]
    fn test_min_threshold_keeps_buffer_growing() {
        // Buffer below min_tokens never flushes, even past max_tokens.
        let segments = vec![
            seg(0.0, 1.0, "one two three"),
            seg(1.0, 2.0, "four five six"),
            seg(2.0, 3.0, "seven eight nine"),
        ];
        let chunks = chunk_segments(&segments, 5, 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].text,
            "one two three four five six seven eight nine"
        );
    }

    #[test]
    fn test_no_text_lost_or_duplicated() {
        let segments: Vec<SegmentDraft> = (0..40)
            .map(|i| {
                seg(
                    i as f64 * 10.0,
                    i as f64 * 10.0 + 10.0,
                    &format!("segment number {} with a few extra words", i),
                )
            })
            .collect();

        let chunks = chunk_segments(&segments, 60, 20);
        assert!(chunks.len() > 1);

        let rejoined: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let all_chunk_text = rejoined.join(" ");
        let all_segment_text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        assert_eq!(all_chunk_text, all_segment_text);

        // Boundaries are a partition in original order.
        for pair in chunks.windows(2) {
            assert!(pair[0].end_seconds <= pair[1].start_seconds);
        }
    }

    #[test]
    fn test_deterministic() {
        let segments = vec![
            seg(0.0, 10.0, "alpha beta gamma"),
            seg(10.0, 20.0, "delta epsilon"),
        ];
        let a = chunk_segments(&segments, 4, 1);
        let b = chunk_segments(&segments, 4, 1);
        assert_eq!(a, b);
    }
}
