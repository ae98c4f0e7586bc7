use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use shared::{domain::SessionId, error::ErrorCode};
use storage::SessionStore;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::directory::{DirectoryClient, DirectoryError};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("username must not be empty")]
    EmptyUsername,
    #[error("a registration is already in progress")]
    Busy,
    #[error("no such GitHub user")]
    NotFound,
    #[error("GitHub user failed profile validation")]
    InvalidProfile,
    #[error("directory server error: {0}")]
    ServerError(String),
}

impl RegistrationError {
    /// Message suitable for showing on the login screen.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::EmptyUsername => "Type your GitHub username",
            Self::Busy => "Still signing you in, hang on",
            Self::NotFound => "User does not exist",
            Self::InvalidProfile => "This GitHub user has invalid information",
            Self::ServerError(_) => "Something went wrong on the server, try again later",
        }
    }
}

impl From<DirectoryError> for RegistrationError {
    fn from(err: DirectoryError) -> Self {
        match err.code() {
            Some(ErrorCode::NotFound) => Self::NotFound,
            Some(ErrorCode::InvalidProfile) => Self::InvalidProfile,
            _ => Self::ServerError(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateStatus {
    Absent,
    Busy,
    Established(SessionId),
}

#[derive(Default)]
struct GateState {
    session: Option<SessionId>,
    last_error: Option<RegistrationError>,
}

/// Decides whether a usable identity exists: either persisted from an
/// earlier run or obtained by registering a username.
pub struct SessionGate {
    directory: Arc<dyn DirectoryClient>,
    store: Arc<dyn SessionStore>,
    registering: AtomicBool,
    inner: Mutex<GateState>,
}

struct RegistrationGuard<'a>(&'a AtomicBool);

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SessionGate {
    pub fn new(directory: Arc<dyn DirectoryClient>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            directory,
            store,
            registering: AtomicBool::new(false),
            inner: Mutex::new(GateState::default()),
        }
    }

    /// Returns the current session, loading it from the store when this gate
    /// has not established one yet. Never touches the network.
    pub async fn resolve_session(&self) -> Result<Option<SessionId>> {
        if let Some(session) = self.inner.lock().await.session.clone() {
            return Ok(Some(session));
        }
        let stored = self
            .store
            .load_session()
            .await
            .context("failed to read persisted session")?;
        if let Some(session) = &stored {
            info!("session gate: resumed persisted session");
            self.inner.lock().await.session = Some(session.clone());
        }
        Ok(stored)
    }

    /// Registers `username` with the directory and persists the returned
    /// session. Only one registration may be outstanding; an overlapping
    /// call fails with [`RegistrationError::Busy`].
    pub async fn register(&self, username: &str) -> Result<SessionId, RegistrationError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(self.record_failure(RegistrationError::EmptyUsername).await);
        }
        if self
            .registering
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RegistrationError::Busy);
        }
        let _guard = RegistrationGuard(&self.registering);
        self.inner.lock().await.last_error = None;

        let session = match self.directory.register(username).await {
            Ok(session) => session,
            Err(err) => {
                warn!(username, error = %err, "session gate: registration failed");
                return Err(self.record_failure(err.into()).await);
            }
        };

        if let Err(err) = self.store.save_session(&session).await {
            warn!(error = %err, "session gate: failed to persist session; continuing");
        }
        info!(username, "session gate: registered");
        self.inner.lock().await.session = Some(session.clone());
        Ok(session)
    }

    /// Forgets the session locally and in the persisted store.
    pub async fn logout(&self) -> Result<()> {
        self.store
            .clear_session()
            .await
            .context("failed to clear persisted session")?;
        let mut guard = self.inner.lock().await;
        guard.session = None;
        guard.last_error = None;
        info!("session gate: logged out");
        Ok(())
    }

    pub async fn status(&self) -> GateStatus {
        if self.registering.load(Ordering::Acquire) {
            return GateStatus::Busy;
        }
        match &self.inner.lock().await.session {
            Some(session) => GateStatus::Established(session.clone()),
            None => GateStatus::Absent,
        }
    }

    pub async fn session(&self) -> Option<SessionId> {
        self.inner.lock().await.session.clone()
    }

    pub async fn last_error(&self) -> Option<RegistrationError> {
        self.inner.lock().await.last_error.clone()
    }

    async fn record_failure(&self, err: RegistrationError) -> RegistrationError {
        self.inner.lock().await.last_error = Some(err.clone());
        err
    }
}

#[cfg(test)]
#[path = "tests/session_gate_tests.rs"]
mod tests;
