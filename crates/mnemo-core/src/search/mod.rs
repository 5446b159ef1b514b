//! Search Module
//!
//! Ranking shared by every network:
//! - Vector ranking over stored embeddings (`score = 1 - cosine_distance`)
//! - Text fallback with a fixed score so results degrade instead of failing
//! - Heuristic similarity for dedup when no embedding is available

mod text;

pub use text::{
    capitalised_phrases, extract_keywords, normalize, text_similarity, tokenize, word_overlap,
    STOPWORDS,
};

use serde::{Deserialize, Serialize};

/// Score given to every text-fallback match
pub const TEXT_MATCH_SCORE: f64 = 0.5;

/// Bounds applied to caller-supplied result limits
pub const MIN_SEARCH_LIMIT: usize = 1;
pub const MAX_SEARCH_LIMIT: usize = 100;

/// Clamp a requested limit into `[1, 100]`
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(MIN_SEARCH_LIMIT, MAX_SEARCH_LIMIT)
}

memory_enum! {
    /// How a hit was found
    pub enum MatchMethod ("match_method") {
        Vector => "vector",
        Text => "text",
    }
}

/// One ranked result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit<T> {
    pub item: T,
    pub score: f64,
    pub method: MatchMethod,
}

impl<T> SearchHit<T> {
    pub fn vector(item: T, score: f64) -> Self {
        Self {
            item,
            score,
            method: MatchMethod::Vector,
        }
    }

    pub fn text(item: T) -> Self {
        Self {
            item,
            score: TEXT_MATCH_SCORE,
            method: MatchMethod::Text,
        }
    }
}

/// Sort hits best first (stable for equal scores) and keep `limit`
pub fn rank<T>(mut hits: Vec<SearchHit<T>>, limit: usize) -> Vec<SearchHit<T>> {
    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(0), 1);
        assert_eq!(clamp_limit(10), 10);
        assert_eq!(clamp_limit(1000), 100);
    }

    #[test]
    fn test_rank_orders_and_truncates() {
        let hits = vec![
            SearchHit::text("a"),
            SearchHit::vector("b", 0.9),
            SearchHit::vector("c", 0.2),
        ];
        let ranked = rank(hits, 2);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].item, "b");
        assert_eq!(ranked[1].method, MatchMethod::Text);
    }
}
