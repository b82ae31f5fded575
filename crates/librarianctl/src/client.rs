//! Think client - drives one session against librariand as the Requester.
//!
//! Flow:
//! 1. send the opening request (query, subject, constraints)
//! 2. on every search action, run the caller's search and send the hits
//!    back inside the `state` payload
//! 3. return on complete or error

use librarian_shared::{
    frame, Action, Constraints, ErrorType, Evidence, ProtocolError, SearchAction, SearchResult,
    SearchState, ThinkRequest, ThinkResponse,
};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Environment variable with the daemon address
pub const ADDR_ENV: &str = "LIBRARIAN_ADDR";

pub type SearchError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to connect to librariand at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection to librariand at {0} timed out")]
    ConnectTimeout(String),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Search failed: {0}")]
    Search(#[source] SearchError),
}

/// Final result of a Think session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ThinkOutcome {
    pub request_id: String,
    pub evidence: Vec<Evidence>,
    pub coverage_notes: String,
    /// Set when the session ended with an error action.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    /// Loop limit: the search ran but evidence selection was cut short.
    pub is_partial: bool,
    pub search_rounds: u32,
}

impl ThinkOutcome {
    fn from_terminal(response: ThinkResponse, search_rounds: u32) -> Self {
        let request_id = response.request_id;
        match response.action {
            Action::Complete(complete) => Self {
                request_id,
                evidence: complete.evidence,
                coverage_notes: complete.coverage_notes,
                error_type: None,
                is_partial: false,
                search_rounds,
            },
            Action::Error(error) => Self {
                request_id,
                is_partial: error.kind() == Some(ErrorType::LoopLimit),
                coverage_notes: error.message,
                error_type: Some(error.error_type),
                evidence: Vec::new(),
                search_rounds,
            },
            Action::Search(_) => Self {
                request_id,
                search_rounds,
                ..Self::default()
            },
        }
    }
}

/// Build the opening request. An empty `request_id` gets a fresh UUID.
pub fn opening_request(
    request_id: Option<String>,
    user_query: &str,
    subject_id: &str,
    constraints: Constraints,
) -> ThinkRequest {
    let request_id = request_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    ThinkRequest::opening(request_id, user_query, subject_id, constraints)
}

pub struct ThinkClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl ThinkClient {
    /// Address priority: explicit flag, $LIBRARIAN_ADDR, 127.0.0.1:<default port>.
    pub fn discover_addr(explicit: Option<&str>) -> String {
        if let Some(addr) = explicit {
            return addr.to_string();
        }
        if let Ok(addr) = std::env::var(ADDR_ENV) {
            return addr;
        }
        format!("127.0.0.1:{}", librarian_shared::DEFAULT_PORT)
    }

    pub async fn connect(addr: &str) -> Result<Self, ClientError> {
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => {
                let _ = stream.set_nodelay(true);
                let (reader, writer) = stream.into_split();
                Ok(Self {
                    reader: BufReader::new(reader),
                    writer,
                })
            }
            Ok(Err(source)) => Err(ClientError::Connect {
                addr: addr.to_string(),
                source,
            }),
            Err(_) => Err(ClientError::ConnectTimeout(addr.to_string())),
        }
    }

    /// Run a whole session. One connection carries exactly one session, so
    /// the client is consumed.
    pub async fn think<F, Fut, E>(
        mut self,
        request: ThinkRequest,
        mut on_search: F,
    ) -> Result<ThinkOutcome, ClientError>
    where
        F: FnMut(SearchAction) -> Fut,
        Fut: Future<Output = Result<Vec<SearchResult>, E>>,
        E: Into<SearchError>,
    {
        let request_id = request.request_id.clone();
        self.send(&request).await?;

        let mut search_rounds = 0;
        loop {
            let Some(response) = self.recv().await? else {
                warn!(request_id = %request_id, "librariand closed stream without a final action");
                return Ok(ThinkOutcome {
                    request_id,
                    search_rounds,
                    ..ThinkOutcome::default()
                });
            };

            if response.is_terminal() {
                info!(
                    request_id = %request_id,
                    action = response.action.kind(),
                    "Think session finished"
                );
                let _ = self.writer.shutdown().await;
                return Ok(ThinkOutcome::from_terminal(response, search_rounds));
            }

            let Action::Search(search) = response.action else {
                continue;
            };
            search_rounds += 1;
            info!(
                request_id = %request_id,
                queries = search.queries_text.len(),
                rationale = %search.rationale,
                "Search requested"
            );

            let results = match on_search(search).await {
                Ok(results) => results,
                Err(e) => {
                    let _ = self.writer.shutdown().await;
                    return Err(ClientError::Search(e.into()));
                }
            };
            let payload = SearchState::new(results).to_payload()?;
            self.send(&ThinkRequest::with_state(request_id.clone(), payload))
                .await?;
        }
    }

    async fn send(&mut self, request: &ThinkRequest) -> Result<(), ClientError> {
        let line = frame::encode(request)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<ThinkResponse>, ClientError> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line).await? == 0 {
                return Ok(None);
            }
            match frame::decode(&line) {
                Ok(response) => return Ok(Some(response)),
                Err(ProtocolError::EmptyFrame) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
