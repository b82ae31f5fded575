//! Decoding of the opaque `state` payload.

use librarian_shared::{SearchResult, SearchState};
use tracing::warn;

/// Characters of a bad payload echoed into the log.
const PREVIEW_CHARS: usize = 100;

/// Decode the search results carried in a follow-up message.
///
/// Never fails: an empty payload means no results, and a payload that does
/// not match `{"search_results": [...]}` is logged and treated the same way.
pub fn decode_search_state(request_id: &str, payload: &str) -> Vec<SearchResult> {
    if payload.trim().is_empty() {
        return Vec::new();
    }

    match SearchState::from_payload(payload) {
        Ok(state) => state.search_results,
        Err(e) => {
            let preview: String = payload.chars().take(PREVIEW_CHARS).collect();
            warn!(
                request_id = %request_id,
                error = %e,
                preview = %preview,
                "Failed to decode search state, treating as no results"
            );
            Vec::new()
        }
    }
}
