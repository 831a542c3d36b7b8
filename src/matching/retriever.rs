//! Cascading-threshold similarity retrieval.
//!
//! The retriever queries the index once per acceptance threshold, from
//! strictest to most lenient, and returns the first non-empty tier. Tiers
//! are never mixed: the result favors precision over recall. An index
//! error aborts the cascade instead of sliding to a laxer threshold; the
//! ladder is a different-query retry, never an error-recovery retry.

use super::index::{IndexError, SearchResult, VectorIndex};
use crate::eid::Eid;

/// Minimum characters for a free-text query.
const MIN_QUERY_CHARS: usize = 5;

/// Minimum count of tokens longer than this many characters.
const MIN_SIGNIFICANT_TOKENS: usize = 2;
const SIGNIFICANT_TOKEN_LEN: usize = 2;

/// A free-text query below the vagueness floor. Deliberate anti-fishing
/// measure: never retried, never relaxed.
#[derive(Debug, thiserror::Error)]
#[error("query too vague: need at least {MIN_QUERY_CHARS} characters and {MIN_SIGNIFICANT_TOKENS} words longer than {SIGNIFICANT_TOKEN_LEN} characters")]
pub struct QueryTooVague;

/// Reject queries too short or too generic to search with.
pub fn validate_query(text: &str) -> Result<(), QueryTooVague> {
    let trimmed = text.trim();
    if trimmed.len() < MIN_QUERY_CHARS {
        return Err(QueryTooVague);
    }

    let significant = trimmed
        .split_whitespace()
        .filter(|w| w.len() > SIGNIFICANT_TOKEN_LEN)
        .count();
    if significant < MIN_SIGNIFICANT_TOKENS {
        return Err(QueryTooVague);
    }

    Ok(())
}

/// Threshold-ladder retriever. Construct once per policy (search vs
/// reverse-match) from config.
pub struct Retriever {
    thresholds: Vec<f32>,
    limit: usize,
}

impl Retriever {
    pub fn new(thresholds: Vec<f32>, limit: usize) -> Self {
        Self { thresholds, limit }
    }

    /// Run the cascade. Returns the first non-empty tier, or an empty vec
    /// when every threshold yields nothing; the caller decides whether to
    /// attempt the lexical fallback.
    pub fn retrieve(
        &self,
        index: &VectorIndex,
        query: &[f32],
        candidate_ids: Option<&[Eid]>,
    ) -> Result<Vec<SearchResult>, IndexError> {
        for &threshold in &self.thresholds {
            let results = index.search(query, candidate_ids, threshold, self.limit)?;
            if !results.is_empty() {
                log::debug!(
                    "vector search hit {} result(s) at threshold {threshold}",
                    results.len()
                );
                return Ok(results);
            }
        }

        Ok(vec![])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_short() {
        assert!(validate_query("red").is_err());
        assert!(validate_query("  hi  ").is_err());
    }

    #[test]
    fn test_validate_rejects_too_few_significant_tokens() {
        // long enough but only one token > 2 chars
        assert!(validate_query("wallet a b").is_err());
    }

    #[test]
    fn test_validate_accepts_real_query() {
        assert!(validate_query("black leather wallet").is_ok());
        assert!(validate_query("red bag").is_ok());
    }

    fn index_with(entries: &[(&str, [f32; 3])]) -> VectorIndex {
        let mut index = VectorIndex::new(3);
        for (id, v) in entries {
            index.insert(Eid::from(*id), v.to_vec()).unwrap();
        }
        index
    }

    #[test]
    fn test_cascade_returns_first_nonempty_tier() {
        // three vectors near cosine 0.6 against the query, none at 0.65
        let index = index_with(&[
            ("a", [0.6, 0.8, 0.0]),
            ("b", [0.62, 0.78, 0.0]),
            ("c", [0.64, 0.77, 0.0]),
            // far-away vector that only the 0.55 tier would admit
            ("d", [0.56, 0.83, 0.0]),
        ]);

        let retriever = Retriever::new(vec![0.65, 0.60, 0.55], 10);
        let results = retriever.retrieve(&index, &[1.0, 0.0, 0.0], None).unwrap();

        // exactly the 0.60 tier; the 0.55-only candidate is not mixed in
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.similarity >= 0.60));
        assert!(!results.iter().any(|r| r.id == Eid::from("d")));
    }

    #[test]
    fn test_cascade_strictest_tier_wins_when_populated() {
        let index = index_with(&[("a", [1.0, 0.0, 0.0]), ("b", [0.6, 0.8, 0.0])]);

        let retriever = Retriever::new(vec![0.9, 0.5], 10);
        let results = retriever.retrieve(&index, &[1.0, 0.0, 0.0], None).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, Eid::from("a"));
    }

    #[test]
    fn test_cascade_empty_when_all_tiers_empty() {
        let index = index_with(&[("a", [0.0, 1.0, 0.0])]);

        let retriever = Retriever::new(vec![0.9, 0.8], 10);
        let results = retriever.retrieve(&index, &[1.0, 0.0, 0.0], None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_cascade_aborts_on_index_error() {
        let index = index_with(&[("a", [1.0, 0.0, 0.0])]);

        // wrong query dimensionality errors at the first tier
        let retriever = Retriever::new(vec![0.9, 0.1], 10);
        let result = retriever.retrieve(&index, &[1.0, 0.0], None);
        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
    }
}
