use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use shared::{
    domain::{CandidateProfile, DecisionEvent, SessionId},
    error::{ApiError, ApiException, ErrorCode},
    protocol::{RegisterRequest, RegisterResponse, SESSION_HEADER},
};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Error)]
pub enum DirectoryError {
    #[error("directory rejected request: {0}")]
    Status(#[from] ApiException),
    #[error("directory request failed: {0}")]
    Transport(String),
    #[error("invalid directory response: {0}")]
    Decode(String),
    #[error("invalid directory url: {0}")]
    InvalidUrl(String),
}

impl DirectoryError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status(exception) => Some(exception.status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Status(exception) => Some(exception.code),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DirectoryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// The remote developer directory: registration, candidate listing and
/// like/dislike recording.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn register(&self, username: &str) -> Result<SessionId, DirectoryError>;
    async fn list_candidates(
        &self,
        session: &SessionId,
    ) -> Result<Vec<CandidateProfile>, DirectoryError>;
    async fn send_decision(
        &self,
        session: &SessionId,
        decision: &DecisionEvent,
    ) -> Result<(), DirectoryError>;
}

pub struct HttpDirectoryClient {
    http: Client,
    base_url: Url,
}

impl HttpDirectoryClient {
    pub fn new(base_url: &str) -> Result<Self, DirectoryError> {
        Self::with_timeout(base_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let base_url = parse_base_url(base_url)?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| DirectoryError::Transport(err.to_string()))?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, DirectoryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| DirectoryError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn register(&self, username: &str) -> Result<SessionId, DirectoryError> {
        let url = self.endpoint(&["devs"])?;
        debug!(%url, username, "directory: registering developer");
        let res = self
            .http
            .post(url)
            .json(&RegisterRequest {
                username: username.to_string(),
            })
            .send()
            .await?;
        let body: RegisterResponse = ensure_success(res).await?.json().await?;
        Ok(body.id)
    }

    async fn list_candidates(
        &self,
        session: &SessionId,
    ) -> Result<Vec<CandidateProfile>, DirectoryError> {
        let url = self.endpoint(&["devs"])?;
        debug!(%url, "directory: listing candidates");
        let res = self
            .http
            .get(url)
            .header(SESSION_HEADER, session.as_str())
            .send()
            .await?;
        let candidates: Vec<CandidateProfile> = ensure_success(res).await?.json().await?;
        debug!(count = candidates.len(), "directory: candidates received");
        Ok(candidates)
    }

    async fn send_decision(
        &self,
        session: &SessionId,
        decision: &DecisionEvent,
    ) -> Result<(), DirectoryError> {
        let url = self.endpoint(&[
            "devs",
            decision.candidate_id.as_str(),
            decision.kind.path_segment(),
        ])?;
        debug!(%url, candidate_id = %decision.candidate_id, kind = ?decision.kind, "directory: sending decision");
        let res = self
            .http
            .post(url)
            .header(SESSION_HEADER, session.as_str())
            .send()
            .await?;
        ensure_success(res).await?;
        Ok(())
    }
}

fn parse_base_url(raw: &str) -> Result<Url, DirectoryError> {
    let trimmed = raw.trim();
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(DirectoryError::InvalidUrl(format!(
            "'{trimmed}' must start with http:// or https://"
        )));
    }
    Url::parse(trimmed).map_err(|err| DirectoryError::InvalidUrl(format!("'{trimmed}': {err}")))
}

async fn ensure_success(res: Response) -> Result<Response, DirectoryError> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.text().await.unwrap_or_default();
    let api_error = serde_json::from_str::<ApiError>(&body).ok();
    Err(ApiException::from_response(status.as_u16(), api_error).into())
}

#[cfg(test)]
#[path = "tests/directory_tests.rs"]
mod tests;
