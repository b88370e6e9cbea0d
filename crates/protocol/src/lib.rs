//! UIDeck Protocol
//!
//! Shared types for communication between the UIDeck bridge and its clients:
//! UI frame envelopes, correlated RPC request/response pairs, the JSON-RPC 2.0
//! envelope used by both HTTP transports, and the wait-predicate model.

use uuid::Uuid;

pub mod jsonrpc;
pub mod types;

pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
