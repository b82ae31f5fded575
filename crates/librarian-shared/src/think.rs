//! Think stream messages.
//!
//! One inbound [`ThinkRequest`] per Requester turn, one outbound
//! [`ThinkResponse`] per Librarian turn. Every response carries exactly one
//! [`Action`].

use serde::{Deserialize, Serialize};

/// Requester -> Librarian
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinkRequest {
    pub request_id: String,
    pub user_query: String,
    pub subject_id: String,
    pub constraints: Constraints,
    /// Opaque payload, only meaningful after the first message.
    /// Decodes to [`crate::SearchState`].
    pub state: String,
}

impl ThinkRequest {
    /// First message of a session.
    pub fn opening(
        request_id: impl Into<String>,
        user_query: impl Into<String>,
        subject_id: impl Into<String>,
        constraints: Constraints,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            user_query: user_query.into(),
            subject_id: subject_id.into(),
            constraints,
            state: String::new(),
        }
    }

    /// Follow-up message carrying serialized search results.
    pub fn with_state(request_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            state: state.into(),
            ..Self::default()
        }
    }
}

/// Per-session limits requested by the Requester. Zero means "use the
/// service default".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub max_loops: i32,
    pub max_results: i32,
}

/// Librarian -> Requester
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkResponse {
    pub request_id: String,
    pub action: Action,
}

impl ThinkResponse {
    pub fn new(request_id: impl Into<String>, action: Action) -> Self {
        Self {
            request_id: request_id.into(),
            action,
        }
    }

    /// True for complete and error actions; the stream ends after them.
    pub fn is_terminal(&self) -> bool {
        !matches!(self.action, Action::Search(_))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Search(SearchAction),
    Complete(CompleteAction),
    Error(ErrorAction),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Search(_) => "search",
            Action::Complete(_) => "complete",
            Action::Error(_) => "error",
        }
    }
}

/// Ask the Requester to run these queries and send the hits back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchAction {
    pub queries_text: Vec<String>,
    pub queries_vector: Vec<String>,
    pub rationale: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompleteAction {
    pub evidence: Vec<Evidence>,
    pub coverage_notes: String,
}

/// Pointer into the most recent search result set of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub temp_index: i32,
    pub why_relevant: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorAction {
    pub error_type: String,
    pub message: String,
}

impl ErrorAction {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.as_str().to_string(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> Option<ErrorType> {
        ErrorType::parse(&self.error_type)
    }
}

/// Error taxonomy carried in [`ErrorAction::error_type`].
///
/// Kept as a string on the wire so Requesters tolerate types added later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// Another search round would exceed the session's loop budget.
    LoopLimit,
    /// Unexpected internal fault while handling the session.
    ModelFailure,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::LoopLimit => "LOOP_LIMIT",
            ErrorType::ModelFailure => "MODEL_FAILURE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOOP_LIMIT" => Some(ErrorType::LoopLimit),
            "MODEL_FAILURE" => Some(ErrorType::ModelFailure),
            _ => None,
        }
    }
}
