//! Requester-side library for librariand.

pub mod client;

pub use client::{opening_request, ClientError, ThinkClient, ThinkOutcome};
