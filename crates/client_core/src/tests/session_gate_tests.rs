use super::*;
use std::{sync::atomic::AtomicUsize, time::Duration};

use async_trait::async_trait;
use shared::{
    domain::{CandidateProfile, DecisionEvent},
    error::{ApiError, ApiException},
};
use storage::MemorySessionStore;

struct FakeDirectory {
    outcome: Result<SessionId, DirectoryError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeDirectory {
    fn ok(session: &str) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok(SessionId::from(session)),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn status(status: u16) -> Arc<Self> {
        Arc::new(Self {
            outcome: Err(ApiException::from_response(status, None).into()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        })
    }

    fn slow(session: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok(SessionId::from(session)),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectory {
    async fn register(&self, _username: &str) -> Result<SessionId, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.outcome.clone()
    }

    async fn list_candidates(
        &self,
        _session: &SessionId,
    ) -> Result<Vec<CandidateProfile>, DirectoryError> {
        Ok(Vec::new())
    }

    async fn send_decision(
        &self,
        _session: &SessionId,
        _decision: &DecisionEvent,
    ) -> Result<(), DirectoryError> {
        Ok(())
    }
}

struct BrokenStore;

#[async_trait]
impl SessionStore for BrokenStore {
    async fn load_session(&self) -> anyhow::Result<Option<SessionId>> {
        Err(anyhow::anyhow!("disk unavailable"))
    }

    async fn save_session(&self, _session: &SessionId) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("disk unavailable"))
    }

    async fn clear_session(&self) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("disk unavailable"))
    }
}

#[tokio::test]
async fn persisted_session_resolves_without_network() {
    let directory = FakeDirectory::ok("unused");
    let store = Arc::new(MemorySessionStore::with_session(SessionId::from("stored")));
    let gate = SessionGate::new(directory.clone(), store);

    let session = gate.resolve_session().await.expect("resolve");
    assert_eq!(session, Some(SessionId::from("stored")));
    assert_eq!(
        gate.status().await,
        GateStatus::Established(SessionId::from("stored"))
    );
    assert_eq!(directory.calls(), 0);
}

#[tokio::test]
async fn empty_store_resolves_absent() {
    let gate = SessionGate::new(
        FakeDirectory::ok("unused"),
        Arc::new(MemorySessionStore::new()),
    );
    assert_eq!(gate.resolve_session().await.expect("resolve"), None);
    assert_eq!(gate.status().await, GateStatus::Absent);
}

#[tokio::test]
async fn successful_registration_persists_session() {
    let store = Arc::new(MemorySessionStore::new());
    let gate = SessionGate::new(FakeDirectory::ok("abc123"), store.clone());

    let session = gate.register("octocat").await.expect("register");
    assert_eq!(session, SessionId::from("abc123"));
    assert_eq!(gate.status().await, GateStatus::Established(session.clone()));
    assert_eq!(store.load_session().await.expect("load"), Some(session));
    assert_eq!(gate.last_error().await, None);
}

#[tokio::test]
async fn unknown_user_reports_not_found_and_stays_absent() {
    let store = Arc::new(MemorySessionStore::new());
    let gate = SessionGate::new(FakeDirectory::status(404), store.clone());

    let err = gate.register("ghost").await.expect_err("must fail");
    assert_eq!(err, RegistrationError::NotFound);
    assert_eq!(err.user_message(), "User does not exist");
    assert_eq!(gate.status().await, GateStatus::Absent);
    assert_eq!(gate.last_error().await, Some(RegistrationError::NotFound));
    assert_eq!(store.load_session().await.expect("load"), None);
}

#[tokio::test]
async fn invalid_profile_maps_from_406() {
    let gate = SessionGate::new(
        FakeDirectory::status(406),
        Arc::new(MemorySessionStore::new()),
    );
    assert_eq!(
        gate.register("bot").await,
        Err(RegistrationError::InvalidProfile)
    );
}

#[tokio::test]
async fn other_failures_map_to_server_error() {
    let gate = SessionGate::new(
        FakeDirectory::status(500),
        Arc::new(MemorySessionStore::new()),
    );
    assert!(matches!(
        gate.register("octocat").await,
        Err(RegistrationError::ServerError(_))
    ));

    let transport: RegistrationError =
        DirectoryError::Transport("connection refused".to_string()).into();
    assert!(matches!(transport, RegistrationError::ServerError(ref m) if m.contains("connection refused")));
}

#[test]
fn explicit_error_code_in_body_is_honoured() {
    let body = ApiError::new(ErrorCode::InvalidProfile, "no avatar");
    let err: RegistrationError = DirectoryError::from(ApiException::from_response(400, Some(body))).into();
    assert_eq!(err, RegistrationError::InvalidProfile);
}

#[tokio::test]
async fn failed_registration_can_be_retried() {
    let store = Arc::new(MemorySessionStore::new());
    let failing = SessionGate::new(FakeDirectory::status(404), store.clone());
    assert!(failing.register("ghost").await.is_err());
    assert!(failing.register("ghost").await.is_err());
    assert_eq!(failing.status().await, GateStatus::Absent);

    let gate = SessionGate::new(FakeDirectory::ok("real"), store);
    assert_eq!(
        gate.register("octocat").await,
        Ok(SessionId::from("real"))
    );
}

#[tokio::test]
async fn empty_username_is_rejected_locally() {
    let directory = FakeDirectory::ok("unused");
    let gate = SessionGate::new(directory.clone(), Arc::new(MemorySessionStore::new()));

    assert_eq!(
        gate.register("   ").await,
        Err(RegistrationError::EmptyUsername)
    );
    assert_eq!(directory.calls(), 0);
}

#[tokio::test]
async fn overlapping_registration_is_suppressed() {
    let directory = FakeDirectory::slow("abc", Duration::from_millis(100));
    let gate = Arc::new(SessionGate::new(
        directory.clone(),
        Arc::new(MemorySessionStore::new()),
    ));

    let first = {
        let gate = Arc::clone(&gate);
        tokio::spawn(async move { gate.register("octocat").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(gate.status().await, GateStatus::Busy);
    assert_eq!(
        gate.register("octocat").await,
        Err(RegistrationError::Busy)
    );

    let session = first.await.expect("join").expect("register");
    assert_eq!(session, SessionId::from("abc"));
    assert_eq!(directory.calls(), 1);
    assert_eq!(gate.status().await, GateStatus::Established(session));
}

#[tokio::test]
async fn cancelled_registration_releases_busy_flag() {
    let gate = SessionGate::new(
        FakeDirectory::slow("abc", Duration::from_secs(5)),
        Arc::new(MemorySessionStore::new()),
    );

    let attempt = tokio::time::timeout(Duration::from_millis(20), gate.register("octocat")).await;
    assert!(attempt.is_err(), "registration should still be pending");
    assert_eq!(gate.status().await, GateStatus::Absent);
}

#[tokio::test]
async fn persistence_failure_does_not_fail_registration() {
    let gate = SessionGate::new(FakeDirectory::ok("abc"), Arc::new(BrokenStore));
    assert_eq!(gate.register("octocat").await, Ok(SessionId::from("abc")));
    assert_eq!(gate.session().await, Some(SessionId::from("abc")));
}

#[tokio::test]
async fn unreadable_store_surfaces_error() {
    let gate = SessionGate::new(FakeDirectory::ok("abc"), Arc::new(BrokenStore));
    let err = gate.resolve_session().await.expect_err("must fail");
    assert!(format!("{err:#}").contains("disk unavailable"));
}

#[tokio::test]
async fn logout_clears_store_and_session() {
    let store = Arc::new(MemorySessionStore::with_session(SessionId::from("stored")));
    let gate = SessionGate::new(FakeDirectory::ok("unused"), store.clone());
    gate.resolve_session().await.expect("resolve");

    gate.logout().await.expect("logout");

    assert_eq!(gate.status().await, GateStatus::Absent);
    assert_eq!(store.load_session().await.expect("load"), None);
    assert_eq!(gate.resolve_session().await.expect("resolve"), None);
}
