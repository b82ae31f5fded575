//! Think session state machine.
//!
//! A [`ThinkMachine`] is built once from configuration and shared by
//! reference with every session. It holds no per-session data: each call to
//! [`ThinkMachine::step`] consumes the current [`Session`] value and returns
//! the next one together with the message to send.
//!
//! ```text
//! AwaitingFirstMessage --first--> SearchIssued --results--> Completed
//!                                              \--limit---> Errored
//! ```
//!
//! Only one result-bearing round is processed. After the first complete or
//! error action the session is terminal, even when `max_loops` would allow
//! another search.

use librarian_shared::{
    Action, CompleteAction, Constraints, ErrorAction, ErrorType, SearchAction, ThinkRequest,
    ThinkResponse,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::evidence::select_evidence;
use crate::query::build_queries;
use crate::search_state::decode_search_state;

const NO_EVIDENCE_NOTE: &str = "No relevant chunks found.";

/// Loop and evidence budgets of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_loops: i32,
    pub max_results: i32,
}

impl Limits {
    /// Requested constraints win unless zero.
    pub fn resolve(&self, requested: &Constraints) -> Limits {
        Limits {
            max_loops: non_zero_or(requested.max_loops, self.max_loops),
            max_results: non_zero_or(requested.max_results, self.max_results),
        }
    }
}

fn non_zero_or(requested: i32, fallback: i32) -> i32 {
    if requested == 0 {
        fallback
    } else {
        requested
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingFirstMessage,
    SearchIssued,
    Completed,
    Errored,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Errored)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::AwaitingFirstMessage => "awaiting_first_message",
            Phase::SearchIssued => "search_issued",
            Phase::Completed => "completed",
            Phase::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Faults caught at the session boundary and reported as `MODEL_FAILURE`.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("malformed inbound message: {0}")]
    MalformedFrame(#[from] librarian_shared::ProtocolError),

    #[error("message received after session reached {0}")]
    Terminated(Phase),
}

/// One session's data. Owned by exactly one driver task.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    request_id: String,
    subject_id: String,
    loop_count: u32,
    limits: Limits,
    phase: Phase,
}

impl Session {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn loop_limit_reached(&self) -> bool {
        i64::from(self.loop_count) >= i64::from(self.limits.max_loops)
    }
}

/// Result of one transition.
#[derive(Debug, Clone)]
pub struct Step {
    pub session: Session,
    pub response: ThinkResponse,
}

impl Step {
    pub fn is_terminal(&self) -> bool {
        self.session.phase.is_terminal()
    }
}

/// The immutable session definition shared by all sessions of a service.
#[derive(Debug, Clone)]
pub struct ThinkMachine {
    defaults: Limits,
}

impl ThinkMachine {
    pub fn new(defaults: Limits) -> Self {
        Self { defaults }
    }

    pub fn defaults(&self) -> Limits {
        self.defaults
    }

    /// A fresh session waiting for its first message.
    pub fn open(&self) -> Session {
        Session {
            request_id: String::new(),
            subject_id: String::new(),
            loop_count: 0,
            limits: self.defaults,
            phase: Phase::AwaitingFirstMessage,
        }
    }

    /// Advance `session` with one inbound message.
    pub fn step(&self, session: Session, message: ThinkRequest) -> Result<Step, SessionError> {
        match session.phase {
            Phase::AwaitingFirstMessage => Ok(self.begin(message)),
            Phase::SearchIssued => Ok(self.receive_results(session, &message)),
            phase @ (Phase::Completed | Phase::Errored) => Err(SessionError::Terminated(phase)),
        }
    }

    fn begin(&self, message: ThinkRequest) -> Step {
        let limits = self.defaults.resolve(&message.constraints);
        let ThinkRequest {
            request_id,
            user_query,
            subject_id,
            ..
        } = message;

        info!(
            request_id = %request_id,
            subject_id = %subject_id,
            max_loops = limits.max_loops,
            max_results = limits.max_results,
            "Think session started"
        );

        let queries = build_queries(&user_query, 0, &[]);
        let action = SearchAction {
            queries_text: queries.clone(),
            queries_vector: queries,
            rationale: format!(
                "Searching for chunks relevant to the user query \"{}\"",
                user_query
            ),
        };
        let response = ThinkResponse::new(request_id.clone(), Action::Search(action));

        Step {
            session: Session {
                request_id,
                subject_id,
                loop_count: 1,
                limits,
                phase: Phase::SearchIssued,
            },
            response,
        }
    }

    fn receive_results(&self, mut session: Session, message: &ThinkRequest) -> Step {
        let results = decode_search_state(&session.request_id, &message.state);
        info!(
            request_id = %session.request_id,
            subject_id = %session.subject_id,
            results_count = results.len(),
            loop_count = session.loop_count,
            "Search results received"
        );

        if session.loop_limit_reached() {
            warn!(
                request_id = %session.request_id,
                subject_id = %session.subject_id,
                max_loops = session.limits.max_loops,
                "Loop limit reached"
            );
            let action = ErrorAction::new(
                ErrorType::LoopLimit,
                format!(
                    "Reached the maximum loop count of {}",
                    session.limits.max_loops
                ),
            );
            session.phase = Phase::Errored;
            let response = ThinkResponse::new(session.request_id.clone(), Action::Error(action));
            return Step { session, response };
        }

        let evidence = select_evidence(&results, session.limits.max_results);
        let coverage_notes = if evidence.is_empty() {
            NO_EVIDENCE_NOTE.to_string()
        } else {
            coverage_note(evidence.len())
        };

        session.loop_count += 1;
        session.phase = Phase::Completed;
        let response = ThinkResponse::new(
            session.request_id.clone(),
            Action::Complete(CompleteAction {
                evidence,
                coverage_notes,
            }),
        );
        Step { session, response }
    }
}

fn coverage_note(selected: usize) -> String {
    if selected == 1 {
        "Selected 1 chunk.".to_string()
    } else {
        format!("Selected {} chunks.", selected)
    }
}

/// Build the `MODEL_FAILURE` report for a fault caught at the boundary.
pub fn fault_response(request_id: &str, error: &dyn std::fmt::Display) -> ThinkResponse {
    ThinkResponse::new(
        request_id,
        Action::Error(ErrorAction::new(ErrorType::ModelFailure, error.to_string())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use librarian_shared::{SearchResult, SearchState};

    const QUERY: &str = "explain the Schrödinger equation";

    fn machine() -> ThinkMachine {
        ThinkMachine::new(Limits {
            max_loops: 3,
            max_results: 10,
        })
    }

    fn opening(max_loops: i32, max_results: i32) -> ThinkRequest {
        ThinkRequest::opening(
            "r1",
            QUERY,
            "s1",
            Constraints {
                max_loops,
                max_results,
            },
        )
    }

    fn results_message(n: usize) -> ThinkRequest {
        let results = (0..n)
            .map(|i| SearchResult::new(format!("c{}", i), "text", 0.9))
            .collect();
        let payload = SearchState::new(results).to_payload().unwrap();
        ThinkRequest::with_state("r1", payload)
    }

    #[test]
    fn test_first_message_issues_search() {
        let machine = machine();
        let step = machine.step(machine.open(), opening(3, 10)).unwrap();

        assert!(!step.is_terminal());
        assert_eq!(step.session.phase(), Phase::SearchIssued);
        assert_eq!(step.session.loop_count(), 1);
        assert_eq!(step.response.request_id, "r1");
        match &step.response.action {
            Action::Search(search) => {
                assert_eq!(search.queries_text, vec![QUERY.to_string()]);
                assert_eq!(search.queries_vector, search.queries_text);
                assert!(search.rationale.contains(QUERY));
            }
            other => panic!("expected search, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_constraints_fall_back_to_defaults() {
        let machine = machine();
        let step = machine.step(machine.open(), opening(0, 0)).unwrap();
        assert_eq!(step.session.limits(), machine.defaults());

        let step = machine.step(machine.open(), opening(7, 2)).unwrap();
        assert_eq!(
            step.session.limits(),
            Limits {
                max_loops: 7,
                max_results: 2
            }
        );
    }

    #[test]
    fn test_results_complete_the_session() {
        let machine = machine();
        let step = machine.step(machine.open(), opening(3, 10)).unwrap();
        let step = machine.step(step.session, results_message(3)).unwrap();

        assert!(step.is_terminal());
        assert_eq!(step.session.phase(), Phase::Completed);
        match &step.response.action {
            Action::Complete(complete) => {
                let indices: Vec<i32> = complete.evidence.iter().map(|e| e.temp_index).collect();
                assert_eq!(indices, vec![0, 1, 2]);
                assert!(complete.coverage_notes.contains('3'));
            }
            other => panic!("expected complete, got {:?}", other),
        }
    }

    #[test]
    fn test_evidence_capped_by_session_max_results() {
        let machine = machine();
        let step = machine.step(machine.open(), opening(3, 2)).unwrap();
        let step = machine.step(step.session, results_message(5)).unwrap();
        match step.response.action {
            Action::Complete(complete) => assert_eq!(complete.evidence.len(), 2),
            other => panic!("expected complete, got {:?}", other),
        }
    }

    #[test]
    fn test_loop_limit_checked_before_evidence() {
        let machine = machine();
        let step = machine.step(machine.open(), opening(1, 10)).unwrap();
        let step = machine.step(step.session, results_message(3)).unwrap();

        assert_eq!(step.session.phase(), Phase::Errored);
        assert_eq!(step.session.loop_count(), 1);
        match &step.response.action {
            Action::Error(error) => {
                assert_eq!(error.kind(), Some(ErrorType::LoopLimit));
                assert!(error.message.contains('1'));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_negative_max_loops_hits_limit() {
        let machine = machine();
        let step = machine.step(machine.open(), opening(-1, 10)).unwrap();
        let step = machine.step(step.session, results_message(1)).unwrap();
        assert_eq!(step.session.phase(), Phase::Errored);
    }

    #[test]
    fn test_empty_and_malformed_state_complete_with_no_evidence() {
        let machine = machine();
        for state in ["", "not json at all", r#"{"search_results":[{"oops":1}]}"#] {
            let step = machine.step(machine.open(), opening(3, 10)).unwrap();
            let step = machine
                .step(step.session, ThinkRequest::with_state("r1", state))
                .unwrap();
            match step.response.action {
                Action::Complete(complete) => {
                    assert!(complete.evidence.is_empty());
                    assert_eq!(complete.coverage_notes, NO_EVIDENCE_NOTE);
                }
                other => panic!("state {:?}: expected complete, got {:?}", state, other),
            }
        }
    }

    #[test]
    fn test_request_id_fixed_by_first_message() {
        let machine = machine();
        let step = machine.step(machine.open(), opening(3, 10)).unwrap();
        let step = machine
            .step(step.session, ThinkRequest::with_state("other-id", ""))
            .unwrap();
        assert_eq!(step.response.request_id, "r1");
        assert_eq!(step.session.request_id(), "r1");
        assert_eq!(step.session.subject_id(), "s1");
    }

    #[test]
    fn test_coverage_note_counts_selected_chunks() {
        let machine = machine();
        let step = machine.step(machine.open(), opening(3, 10)).unwrap();
        let step = machine.step(step.session, results_message(1)).unwrap();
        match step.response.action {
            Action::Complete(complete) => assert_eq!(complete.coverage_notes, "Selected 1 chunk."),
            other => panic!("expected complete, got {:?}", other),
        }

        assert_eq!(coverage_note(3), "Selected 3 chunks.");
    }

    #[test]
    fn test_terminal_session_rejects_messages() {
        let machine = machine();
        let step = machine.step(machine.open(), opening(3, 10)).unwrap();
        let step = machine.step(step.session, results_message(1)).unwrap();
        let err = machine.step(step.session, results_message(1)).unwrap_err();
        assert!(matches!(err, SessionError::Terminated(Phase::Completed)));
    }

    #[test]
    fn test_fault_response_is_model_failure() {
        let err = SessionError::Terminated(Phase::Errored);
        let response = fault_response("r9", &err);
        assert_eq!(response.request_id, "r9");
        match response.action {
            Action::Error(error) => {
                assert_eq!(error.error_type, "MODEL_FAILURE");
                assert!(error.message.contains("errored"));
            }
            other => panic!("expected error, got {:?}", other),
        }
    }
}
