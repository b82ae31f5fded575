//! Search results exchanged through the `state` payload.

use crate::error::ProtocolError;
use serde::{Deserialize, Deserializer, Serialize};

/// One hit returned by the Requester's search backend.
///
/// The position in [`SearchState::search_results`] is the rank; the
/// Librarian never re-sorts by `score`. Metadata is lenient: `null` reads as
/// absent and page/chunk numbers are signed, so one odd record does not
/// void the whole result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<i32>,
}

impl SearchResult {
    pub fn new(chunk_id: impl Into<String>, content: impl Into<String>, score: f64) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            content: content.into(),
            score,
            file_id: None,
            file_name: None,
            page_number: None,
            chunk_index: None,
        }
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decoded shape of `ThinkRequest::state`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchState {
    #[serde(default)]
    pub search_results: Vec<SearchResult>,
}

impl SearchState {
    pub fn new(search_results: Vec<SearchResult>) -> Self {
        Self { search_results }
    }

    pub fn to_payload(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Strict decode. Callers that must never fail wrap this themselves.
    pub fn from_payload(payload: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(payload)?)
    }
}
