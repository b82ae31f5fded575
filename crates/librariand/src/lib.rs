//! Librarian daemon library - exposes modules for testing.

pub mod config;
pub mod driver;
pub mod evidence;
pub mod logging;
pub mod query;
pub mod search_state;
pub mod server;
pub mod session;
pub mod status;

pub use config::Config;
pub use server::{serve, LibrarianService};
pub use session::{Limits, Phase, Session, ThinkMachine};
