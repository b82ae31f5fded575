//! Evidence selection over a ranked search result set.

use librarian_shared::{Evidence, SearchResult};

/// Pick up to `max_results` hits in received order.
///
/// Item `i` points at `results[i]`. Only the count of `results` is read.
pub fn select_evidence(results: &[SearchResult], max_results: i32) -> Vec<Evidence> {
    let cap = usize::try_from(max_results).unwrap_or(0);
    let limit = results.len().min(cap);

    (0..limit)
        .map(|i| Evidence {
            temp_index: i as i32,
            why_relevant: format!("rank-{} chunk by search score", i + 1),
        })
        .collect()
}
