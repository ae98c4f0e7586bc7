//! Candidate queue and match-notification controller.
//!
//! The controller is owned by a single task. Network work runs in spawned
//! tasks that report back through the controller's inbox; the owner applies
//! those reports with [`CandidateController::next_update`] (or
//! [`CandidateController::apply_pending`]) so every state change happens on
//! the owning task. Each report is stamped with the load generation that
//! issued it, and reports from an older generation are discarded.

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};

use shared::domain::{
    CandidateProfile, DecisionEvent, DecisionKind, MatchNotification, SessionId,
};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, info, warn};

use crate::{
    directory::{DirectoryClient, DirectoryError},
    push::{MatchSink, MatchSubscription, PushChannel, PushError},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("failed to load candidates: {0}")]
    FetchFailure(String),
    #[error("controller has not been initialized")]
    NotInitialized,
    #[error("controller has been torn down")]
    TornDown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueState {
    Uninitialized,
    Loading,
    /// Front of the deque is the next candidate to decide on. An empty
    /// queue means every candidate has been decided.
    Ready(VecDeque<CandidateProfile>),
    Failed(ControllerError),
}

/// What changed after the controller applied one inbox report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerUpdate {
    CandidatesLoaded { count: usize },
    LoadFailed(ControllerError),
    MatchReceived(CandidateProfile),
    PushConnected,
    PushUnavailable(String),
    Stale,
}

#[derive(Debug)]
pub(crate) enum ControllerMessage {
    CandidatesLoaded {
        generation: u64,
        result: Result<Vec<CandidateProfile>, DirectoryError>,
    },
    Subscribed {
        generation: u64,
        result: Result<MatchSubscription, PushError>,
    },
    Match {
        generation: u64,
        profile: CandidateProfile,
    },
}

pub struct CandidateController {
    directory: Arc<dyn DirectoryClient>,
    push: Arc<dyn PushChannel>,
    session: Option<SessionId>,
    state: QueueState,
    active_match: Option<MatchNotification>,
    subscription: Option<MatchSubscription>,
    subscribe_pending: bool,
    generation: u64,
    torn_down: bool,
    decisions: JoinSet<()>,
    inbox_tx: mpsc::UnboundedSender<ControllerMessage>,
    inbox_rx: mpsc::UnboundedReceiver<ControllerMessage>,
}

impl CandidateController {
    pub fn new(directory: Arc<dyn DirectoryClient>, push: Arc<dyn PushChannel>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            directory,
            push,
            session: None,
            state: QueueState::Uninitialized,
            active_match: None,
            subscription: None,
            subscribe_pending: false,
            generation: 0,
            torn_down: false,
            decisions: JoinSet::new(),
            inbox_tx,
            inbox_rx,
        }
    }

    /// Starts loading the candidate batch for `session` and opens the match
    /// subscription. Any previous queue, match and subscription are dropped.
    pub fn initialize(&mut self, session: SessionId) {
        if self.torn_down {
            warn!("controller: initialize called after teardown");
            return;
        }
        self.cancel_subscription();
        self.generation += 1;
        self.session = Some(session.clone());
        self.state = QueueState::Loading;
        self.active_match = None;
        info!(generation = self.generation, "controller: loading candidates");

        self.spawn_fetch(session.clone());
        self.spawn_subscribe(session);
    }

    /// Reloads candidates after a failed load. Returns `false` when there is
    /// nothing to retry.
    pub fn retry(&mut self) -> bool {
        if self.torn_down || !matches!(self.state, QueueState::Failed(_)) {
            return false;
        }
        let Some(session) = self.session.clone() else {
            return false;
        };
        self.state = QueueState::Loading;
        info!(generation = self.generation, "controller: retrying candidate load");
        self.spawn_fetch(session.clone());
        if !self.has_live_subscription() && !self.subscribe_pending {
            // A subscription whose reader has ended is as good as none.
            self.cancel_subscription();
            self.spawn_subscribe(session);
        }
        true
    }

    /// Removes the front candidate and records the decision remotely.
    ///
    /// The queue advances immediately; the send runs in the background and
    /// a failed send is logged and dropped. Outside `Ready`, or with an
    /// empty queue, this does nothing and returns `None`.
    pub fn decide(&mut self, kind: DecisionKind) -> Option<DecisionEvent> {
        if self.torn_down {
            debug!("controller: ignoring decision after teardown");
            return None;
        }
        let Some(session) = self.session.clone() else {
            debug!("controller: ignoring decision without a session");
            return None;
        };
        let QueueState::Ready(queue) = &mut self.state else {
            debug!("controller: ignoring decision before candidates are ready");
            return None;
        };
        let candidate = queue.pop_front()?;
        let remaining = queue.len();

        let event = DecisionEvent {
            candidate_id: candidate.id,
            kind,
        };
        debug!(candidate_id = %event.candidate_id, ?kind, remaining, "controller: decided");
        self.spawn_decision(session, event.clone());
        Some(event)
    }

    pub fn like(&mut self) -> Option<DecisionEvent> {
        self.decide(DecisionKind::Like)
    }

    pub fn dislike(&mut self) -> Option<DecisionEvent> {
        self.decide(DecisionKind::Dislike)
    }

    /// Replaces the active match. The newest notification always wins.
    pub fn on_match_notification(&mut self, profile: CandidateProfile) {
        if self.torn_down {
            debug!(candidate_id = %profile.id, "controller: dropping match after teardown");
            return;
        }
        info!(candidate_id = %profile.id, "controller: match");
        self.active_match = Some(MatchNotification::new(profile));
    }

    pub fn dismiss_match(&mut self) {
        self.active_match = None;
    }

    /// Releases the push subscription and stops applying reports. Safe to
    /// call more than once. Decision sends already started keep running; see
    /// [`CandidateController::drain_decisions`].
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        self.cancel_subscription();
        self.inbox_rx.close();
        // Late subscriptions sitting in the inbox are cancelled on drop.
        while let Ok(message) = self.inbox_rx.try_recv() {
            drop(message);
        }
        info!("controller: torn down");
    }

    /// Waits for the next report and applies it. Returns `None` once the
    /// controller has been torn down.
    pub async fn next_update(&mut self) -> Option<ControllerUpdate> {
        if self.torn_down {
            return None;
        }
        let message = self.inbox_rx.recv().await?;
        Some(self.apply(message))
    }

    /// Applies every report already queued, without waiting.
    pub fn apply_pending(&mut self) -> Vec<ControllerUpdate> {
        let mut updates = Vec::new();
        while !self.torn_down {
            let Ok(message) = self.inbox_rx.try_recv() else {
                break;
            };
            updates.push(self.apply(message));
        }
        updates
    }

    /// Applies reports until the current load settles. Returns the number of
    /// queued candidates, or the load failure.
    pub async fn wait_ready(&mut self) -> Result<usize, ControllerError> {
        loop {
            if self.torn_down {
                return Err(ControllerError::TornDown);
            }
            match &self.state {
                QueueState::Ready(queue) => return Ok(queue.len()),
                QueueState::Failed(err) => return Err(err.clone()),
                QueueState::Uninitialized => return Err(ControllerError::NotInitialized),
                QueueState::Loading => {
                    if self.next_update().await.is_none() {
                        return Err(ControllerError::TornDown);
                    }
                }
            }
        }
    }

    /// Waits up to `limit` for decision sends still in flight. Returns
    /// `true` when every send has finished.
    pub async fn drain_decisions(&mut self, limit: Duration) -> bool {
        let decisions = &mut self.decisions;
        let drained = tokio::time::timeout(limit, async {
            while let Some(joined) = decisions.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "controller: decision send task failed");
                }
            }
        })
        .await
        .is_ok();
        if !drained {
            warn!(
                pending = self.decisions.len(),
                "controller: gave up waiting for decision sends"
            );
        }
        drained
    }

    pub fn pending_decisions(&self) -> usize {
        self.decisions.len()
    }

    pub fn state(&self) -> &QueueState {
        &self.state
    }

    pub fn session(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    pub fn head(&self) -> Option<&CandidateProfile> {
        match &self.state {
            QueueState::Ready(queue) => queue.front(),
            _ => None,
        }
    }

    pub fn candidates(&self) -> impl Iterator<Item = &CandidateProfile> {
        let queue = match &self.state {
            QueueState::Ready(queue) => Some(queue),
            _ => None,
        };
        queue.into_iter().flatten()
    }

    pub fn remaining(&self) -> usize {
        match &self.state {
            QueueState::Ready(queue) => queue.len(),
            _ => 0,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(&self.state, QueueState::Ready(queue) if queue.is_empty())
    }

    pub fn active_match(&self) -> Option<&MatchNotification> {
        self.active_match.as_ref()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn has_live_subscription(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(MatchSubscription::is_active)
    }

    fn apply(&mut self, message: ControllerMessage) -> ControllerUpdate {
        match message {
            ControllerMessage::CandidatesLoaded { generation, result } => {
                if self.torn_down
                    || generation != self.generation
                    || self.state != QueueState::Loading
                {
                    debug!(generation, "controller: discarding stale candidate batch");
                    return ControllerUpdate::Stale;
                }
                match result {
                    Ok(profiles) => {
                        let queue = dedupe_candidates(profiles);
                        let count = queue.len();
                        info!(count, generation, "controller: candidates ready");
                        self.state = QueueState::Ready(queue);
                        ControllerUpdate::CandidatesLoaded { count }
                    }
                    Err(err) => {
                        warn!(error = %err, generation, "controller: candidate load failed");
                        let err = ControllerError::FetchFailure(err.to_string());
                        self.state = QueueState::Failed(err.clone());
                        ControllerUpdate::LoadFailed(err)
                    }
                }
            }
            ControllerMessage::Subscribed { generation, result } => {
                let current = !self.torn_down && generation == self.generation;
                if current {
                    self.subscribe_pending = false;
                }
                match result {
                    Ok(subscription) if current => {
                        if !subscription.is_active() {
                            debug!(generation, "controller: push subscription already closed");
                        }
                        self.subscription = Some(subscription);
                        ControllerUpdate::PushConnected
                    }
                    Ok(mut subscription) => {
                        subscription.cancel();
                        debug!(generation, "controller: cancelled stale push subscription");
                        ControllerUpdate::Stale
                    }
                    Err(err) if current => {
                        warn!(error = %err, "controller: live matches unavailable");
                        ControllerUpdate::PushUnavailable(err.to_string())
                    }
                    Err(_) => ControllerUpdate::Stale,
                }
            }
            ControllerMessage::Match {
                generation,
                profile,
            } => {
                if self.torn_down || generation != self.generation {
                    debug!(generation, "controller: discarding stale match");
                    return ControllerUpdate::Stale;
                }
                self.on_match_notification(profile.clone());
                ControllerUpdate::MatchReceived(profile)
            }
        }
    }

    fn spawn_fetch(&self, session: SessionId) {
        let directory = Arc::clone(&self.directory);
        let inbox = self.inbox_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result = directory.list_candidates(&session).await;
            let _ = inbox.send(ControllerMessage::CandidatesLoaded { generation, result });
        });
    }

    fn spawn_subscribe(&mut self, session: SessionId) {
        self.subscribe_pending = true;
        let push = Arc::clone(&self.push);
        let inbox = self.inbox_tx.clone();
        let generation = self.generation;
        let sink = MatchSink::new(generation, self.inbox_tx.clone());
        tokio::spawn(async move {
            let result = push.subscribe(&session, sink).await;
            let _ = inbox.send(ControllerMessage::Subscribed { generation, result });
        });
    }

    fn spawn_decision(&mut self, session: SessionId, event: DecisionEvent) {
        while self.decisions.try_join_next().is_some() {}
        let directory = Arc::clone(&self.directory);
        self.decisions.spawn(async move {
            if let Err(err) = directory.send_decision(&session, &event).await {
                warn!(
                    candidate_id = %event.candidate_id,
                    kind = ?event.kind,
                    error = %err,
                    "controller: decision send failed; not retried"
                );
            }
        });
    }

    fn cancel_subscription(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
            debug!("controller: push subscription cancelled");
        }
        self.subscribe_pending = false;
    }
}

impl Drop for CandidateController {
    fn drop(&mut self) {
        self.teardown();
        // Sends outlive the controller; only runtime shutdown stops them.
        self.decisions.detach_all();
    }
}

/// Keeps the first occurrence of each id, preserving server order.
fn dedupe_candidates(profiles: Vec<CandidateProfile>) -> VecDeque<CandidateProfile> {
    let mut seen = HashSet::with_capacity(profiles.len());
    let mut queue = VecDeque::with_capacity(profiles.len());
    for profile in profiles {
        if seen.insert(profile.id.clone()) {
            queue.push_back(profile);
        } else {
            warn!(candidate_id = %profile.id, "controller: dropping duplicate candidate");
        }
    }
    queue
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
