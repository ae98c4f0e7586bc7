use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    InvalidProfile,
    Unauthorized,
    Internal,
    #[serde(other)]
    Unknown,
}

impl ErrorCode {
    /// Classifies a directory status code. The backend answers 404 for an
    /// unknown GitHub user and 406 when the GitHub profile is unusable.
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => Self::NotFound,
            406 => Self::InvalidProfile,
            401 | 403 => Self::Unauthorized,
            500..=599 => Self::Internal,
            _ => Self::Unknown,
        }
    }
}

/// Error body returned by the directory backend. Both fields are optional on
/// the wire; older deployments only send `{ "error": "..." }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
    #[serde(default, alias = "error")]
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{code:?} (status {status}): {message}")]
pub struct ApiException {
    pub status: u16,
    pub code: ErrorCode,
    pub message: String,
}

impl ApiException {
    /// Builds an exception from a status code and an optional decoded body.
    /// An explicit code in the body wins over the status classification.
    pub fn from_response(status: u16, body: Option<ApiError>) -> Self {
        let (code, message) = match body {
            Some(body) => (
                body.code.unwrap_or_else(|| ErrorCode::from_status(status)),
                body.message,
            ),
            None => (ErrorCode::from_status(status), String::new()),
        };
        Self {
            status,
            code,
            message,
        }
    }
}

#[cfg(test)]
#[path = "tests/error_tests.rs"]
mod tests;
