use async_trait::async_trait;
use futures::StreamExt;
use shared::{
    domain::{CandidateProfile, SessionId},
    protocol::{PushEvent, PUSH_SESSION_PARAM},
};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::controller::ControllerMessage;

pub const DEFAULT_PUSH_PATH: &str = "/ws";

#[derive(Debug, Clone, Error)]
pub enum PushError {
    #[error("invalid push url: {0}")]
    InvalidUrl(String),
    #[error("failed to connect push channel {url}: {reason}")]
    Connect { url: String, reason: String },
}

/// Delivery handle a push channel uses to hand matches to the controller
/// that opened the subscription.
#[derive(Debug, Clone)]
pub struct MatchSink {
    generation: u64,
    tx: mpsc::UnboundedSender<ControllerMessage>,
}

impl MatchSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<ControllerMessage>) -> Self {
        Self { generation, tx }
    }

    /// Returns `false` once the receiving controller has gone away.
    pub fn deliver(&self, profile: CandidateProfile) -> bool {
        self.tx
            .send(ControllerMessage::Match {
                generation: self.generation,
                profile,
            })
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Cancellation handle for a live push subscription. Dropping it cancels.
#[derive(Debug)]
pub struct MatchSubscription {
    task: Option<JoinHandle<()>>,
}

impl MatchSubscription {
    pub fn new(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for MatchSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn subscribe(
        &self,
        session: &SessionId,
        sink: MatchSink,
    ) -> Result<MatchSubscription, PushError>;
}

/// WebSocket push connection. The server only talks; the client never sends.
pub struct WsPushChannel {
    base_url: Url,
    path: String,
}

impl WsPushChannel {
    pub fn new(base_url: &Url, path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.clone(),
            path: path.into(),
        }
    }

    pub fn endpoint(&self, session: &SessionId) -> Result<Url, PushError> {
        push_endpoint(&self.base_url, &self.path, session)
    }
}

#[async_trait]
impl PushChannel for WsPushChannel {
    async fn subscribe(
        &self,
        session: &SessionId,
        sink: MatchSink,
    ) -> Result<MatchSubscription, PushError> {
        let url = self.endpoint(session)?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| PushError::Connect {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        let (_, mut ws_reader) = ws_stream.split();
        info!(%url, "push: connected");

        let task = tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match serde_json::from_str::<PushEvent>(&text) {
                        Ok(PushEvent::Match(profile)) => {
                            info!(candidate_id = %profile.id, "push: match received");
                            if !sink.deliver(profile) {
                                debug!("push: controller gone, closing reader");
                                break;
                            }
                        }
                        Err(err) => debug!(%err, "push: ignoring unrecognized frame"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "push: receive failed");
                        break;
                    }
                }
            }
            debug!("push: reader finished");
        });

        Ok(MatchSubscription::new(task))
    }
}

/// Derives the push URL from the directory base URL: `http` becomes `ws`,
/// `https` becomes `wss`, `path` is appended and the session rides in the
/// query string.
pub fn push_endpoint(base_url: &Url, path: &str, session: &SessionId) -> Result<Url, PushError> {
    let mut url = base_url.clone();
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(PushError::InvalidUrl(format!(
                "unsupported scheme '{other}' in {base_url}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| PushError::InvalidUrl(base_url.to_string()))?;
    url.path_segments_mut()
        .map_err(|()| PushError::InvalidUrl(base_url.to_string()))?
        .pop_if_empty()
        .extend(path.split('/').filter(|segment| !segment.is_empty()));
    url.query_pairs_mut()
        .clear()
        .append_pair(PUSH_SESSION_PARAM, session.as_str());
    Ok(url)
}

#[cfg(test)]
#[path = "tests/push_tests.rs"]
mod tests;
