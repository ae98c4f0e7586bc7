use serde::{Deserialize, Serialize};

use crate::domain::{CandidateProfile, SessionId};

/// Header carrying the session identifier on authenticated directory calls.
pub const SESSION_HEADER: &str = "user";
/// Query parameter carrying the session identifier on the push connection.
pub const PUSH_SESSION_PARAM: &str = "user";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(rename = "_id")]
    pub id: SessionId,
}

/// Frames emitted by the server on the push connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PushEvent {
    Match(CandidateProfile),
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
