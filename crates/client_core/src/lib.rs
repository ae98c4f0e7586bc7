use std::{sync::Arc, time::Duration};

pub mod controller;
pub mod directory;
pub mod push;
pub mod session_gate;

pub use controller::{CandidateController, ControllerError, ControllerUpdate, QueueState};
pub use directory::{DirectoryClient, DirectoryError, HttpDirectoryClient};
pub use push::{MatchSink, MatchSubscription, PushChannel, PushError, WsPushChannel};
pub use session_gate::{GateStatus, RegistrationError, SessionGate};

/// Network collaborators shared by the session gate and the controller.
#[derive(Clone)]
pub struct ClientServices {
    pub directory: Arc<dyn DirectoryClient>,
    pub push: Arc<dyn PushChannel>,
}

impl ClientServices {
    /// HTTP directory at `api_url` plus a WebSocket push channel on the same
    /// host under `push_path`.
    pub fn connect(
        api_url: &str,
        push_path: &str,
        request_timeout: Duration,
    ) -> Result<Self, DirectoryError> {
        let directory = HttpDirectoryClient::with_timeout(api_url, request_timeout)?;
        let push = WsPushChannel::new(directory.base_url(), push_path);
        Ok(Self {
            directory: Arc::new(directory),
            push: Arc::new(push),
        })
    }

    pub fn session_gate(&self, store: Arc<dyn storage::SessionStore>) -> SessionGate {
        SessionGate::new(Arc::clone(&self.directory), store)
    }

    pub fn candidate_controller(&self) -> CandidateController {
        CandidateController::new(Arc::clone(&self.directory), Arc::clone(&self.push))
    }
}
