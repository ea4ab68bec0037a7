use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_RELEVANCE_THRESHOLD;

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// A single hit returned by [`MemoryService::find_similar`](super::MemoryService::find_similar).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// Viability the matched chunk belongs to.
    pub viability_id: i64,
    /// The matched chunk text.
    pub chunk_text: String,
    /// Euclidean distance to the query; `0.0` means identical embeddings.
    pub distance: f32,
}

// ---------------------------------------------------------------------------
// Caller-side relevance policy
// ---------------------------------------------------------------------------

/// Shown to the assistant when no stored excerpt is close enough.
pub const NO_RELEVANT_HISTORY: &str = "No relevant history found.";

/// Keep only hits strictly closer than `threshold`, preserving rank order.
///
/// The service itself never filters; this is the policy the chat front end
/// applies before building a prompt.
pub fn filter_relevant(results: &[SimilarityResult], threshold: f32) -> Vec<SimilarityResult> {
    results
        .iter()
        .filter(|r| r.distance < threshold)
        .cloned()
        .collect()
}

/// [`filter_relevant`] with the stock threshold.
pub fn filter_relevant_default(results: &[SimilarityResult]) -> Vec<SimilarityResult> {
    filter_relevant(results, DEFAULT_RELEVANCE_THRESHOLD)
}

/// Format up to `limit` relevant hits as numbered excerpts for a prompt.
pub fn render_context(relevant: &[SimilarityResult], limit: usize) -> String {
    if relevant.is_empty() || limit == 0 {
        return NO_RELEVANT_HISTORY.to_string();
    }

    relevant
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, r)| {
            format!(
                "Excerpt {} (distance {:.2}):\n{}",
                i + 1,
                r.distance,
                r.chunk_text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: i64, text: &str, distance: f32) -> SimilarityResult {
        SimilarityResult {
            viability_id: id,
            chunk_text: text.to_string(),
            distance,
        }
    }

    #[test]
    fn test_filter_is_strict() {
        let results = vec![hit(1, "a", 0.2), hit(2, "b", 1.0), hit(3, "c", 0.99)];
        let kept: Vec<i64> = filter_relevant_default(&results)
            .iter()
            .map(|r| r.viability_id)
            .collect();
        assert_eq!(kept, vec![1, 3]);
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render_context(&[], 3), NO_RELEVANT_HISTORY);
    }

    #[test]
    fn test_render_limits_and_numbers() {
        let results = vec![hit(1, "first", 0.1), hit(2, "second", 0.25), hit(3, "third", 0.5)];
        let text = render_context(&results, 2);
        assert_eq!(
            text,
            "Excerpt 1 (distance 0.10):\nfirst\n\nExcerpt 2 (distance 0.25):\nsecond"
        );
    }

    #[test]
    fn test_serializes_with_snake_case_keys() {
        let json = serde_json::to_value(hit(4, "x", 0.5)).unwrap();
        assert_eq!(json["viability_id"], 4);
        assert_eq!(json["chunk_text"], "x");
    }
}
