//! Search query construction.

use librarian_shared::SearchResult;

/// Word budget for refined queries after the first round.
const REFINED_QUERY_WORDS: usize = 3;

/// Build the queries for the next search directive.
///
/// Round 0 uses the user query verbatim. Later rounds shorten queries longer
/// than three words to their first three words. Never returns an empty list.
///
/// `prior_results` is where result-aware refinement plugs in; the current
/// rules do not read it.
pub fn build_queries(
    user_query: &str,
    loop_count: u32,
    _prior_results: &[SearchResult],
) -> Vec<String> {
    if loop_count == 0 {
        return vec![user_query.to_string()];
    }

    let words: Vec<&str> = user_query.split_whitespace().collect();
    if words.len() > REFINED_QUERY_WORDS {
        vec![words[..REFINED_QUERY_WORDS].join(" ")]
    } else {
        vec![user_query.to_string()]
    }
}
