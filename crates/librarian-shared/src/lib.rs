//! Shared types for the Librarian daemon and its Requesters.
//!
//! The `Think` method runs over one duplex stream per session. Both sides
//! exchange newline-delimited JSON frames defined in [`think`]; the search
//! results travelling inside the opaque `state` field are defined in
//! [`search`].

pub mod error;
pub mod frame;
pub mod search;
pub mod think;

pub use error::ProtocolError;
pub use search::{SearchResult, SearchState};
pub use think::{
    Action, CompleteAction, Constraints, ErrorAction, ErrorType, Evidence, SearchAction,
    ThinkRequest, ThinkResponse,
};

/// Default TCP port of the Librarian daemon.
pub const DEFAULT_PORT: u16 = 50051;
