//! Lexical fallback for when vector search comes up empty or errors.
//!
//! Matches on token overlap between the query text and a candidate's
//! combined title+description+tags text. A candidate must share at least
//! two distinct significant tokens with the query: one common word must
//! never be enough to expose somebody else's reported item.

use std::collections::HashSet;

use super::index::SearchResult;
use super::FALLBACK_SCORE;
use crate::eid::Eid;

/// Tokens at or below this length carry no matching signal.
const MIN_TOKEN_LEN: usize = 3;

/// Distinct shared tokens required for a fallback match.
const MIN_SHARED_TOKENS: usize = 2;

/// Lowercased significant tokens of a text.
pub fn tokenize(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() >= MIN_TOKEN_LEN)
        .map(|s| s.to_lowercase())
        .collect()
}

/// Score candidates against a query by token overlap.
///
/// Returns matches ordered by shared-token count descending, ties by
/// ascending id. Every match carries the fixed approximate similarity
/// [`FALLBACK_SCORE`] since no true similarity was computed.
pub fn fallback_matches(query: &str, candidates: &[(Eid, String)]) -> Vec<SearchResult> {
    let query_tokens = tokenize(query);
    if query_tokens.len() < MIN_SHARED_TOKENS {
        return vec![];
    }

    let mut scored: Vec<(usize, Eid)> = candidates
        .iter()
        .filter_map(|(id, text)| {
            let shared = tokenize(text).intersection(&query_tokens).count();
            (shared >= MIN_SHARED_TOKENS).then(|| (shared, id.clone()))
        })
        .collect();

    scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

    scored
        .into_iter()
        .map(|(_, id)| SearchResult {
            id,
            similarity: FALLBACK_SCORE,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, text: &str) -> (Eid, String) {
        (Eid::from(id), text.to_string())
    }

    #[test]
    fn test_tokenize_drops_short_tokens() {
        let tokens = tokenize("a red.. 22 umbrella!");
        assert!(tokens.contains("red"));
        assert!(tokens.contains("umbrella"));
        assert!(!tokens.contains("a"));
        assert!(!tokens.contains("22"));
    }

    #[test]
    fn test_single_shared_token_excluded() {
        let candidates = vec![candidate("a", "black umbrella with wooden handle")];

        // only "black" is shared
        let results = fallback_matches("black leather wallet", &candidates);
        assert!(results.is_empty());
    }

    #[test]
    fn test_two_shared_tokens_included() {
        let candidates = vec![
            candidate("a", "black leather bifold, worn corners"),
            candidate("b", "blue ceramic mug"),
        ];

        let results = fallback_matches("black leather wallet", &candidates);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, Eid::from("a"));
        assert_eq!(results[0].similarity, FALLBACK_SCORE);
    }

    #[test]
    fn test_case_insensitive() {
        let candidates = vec![candidate("a", "BLACK LEATHER WALLET")];
        let results = fallback_matches("black leather", &candidates);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_ordered_by_overlap() {
        let candidates = vec![
            candidate("two", "black wallet"),
            candidate("three", "black leather wallet"),
        ];

        let results = fallback_matches("black leather wallet", &candidates);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, Eid::from("three"));
    }

    #[test]
    fn test_duplicate_tokens_count_once() {
        // "black black black" shares only the single distinct token "black"
        let candidates = vec![candidate("a", "black black black")];
        let results = fallback_matches("black leather wallet", &candidates);
        assert!(results.is_empty());
    }

    #[test]
    fn test_vague_query_matches_nothing() {
        let candidates = vec![candidate("a", "black leather wallet")];
        let results = fallback_matches("the of an", &candidates);
        assert!(results.is_empty());
    }
}
