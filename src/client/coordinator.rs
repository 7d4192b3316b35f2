use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::errors::RefreshFailure;
use crate::metrics::{Metrics, MetricsRecorder};
use crate::models::Session;
use crate::session::{EndReason, SessionEvent};
use crate::store::TokenStore;
use crate::utils::LogThrottle;

const JOINED_LOG_WINDOW: Duration = Duration::from_secs(5);

/// Something that can trade the current session for a fresh one.
#[async_trait]
pub trait Refresher: Send + Sync {
    /// Whether a refresh has any chance of succeeding for this session.
    fn can_refresh(&self, session: Option<&Session>) -> bool;
    async fn refresh(&self, current: Option<&Session>) -> Result<Session, RefreshFailure>;
}

type SharedOutcome = Shared<BoxFuture<'static, Result<Session, RefreshFailure>>>;

enum RefreshState {
    Idle,
    Refreshing { cycle: u64, outcome: SharedOutcome },
}

/// Turns authentication failures into at most one refresh call at a time.
///
/// The refresh runs as its own task. Every caller that needs a fresh token
/// while a cycle is in flight awaits a clone of the same shared outcome, so a
/// caller going away never cancels the cycle for the others. A cycle settles
/// the token store and emits its event before the state returns to idle, and
/// only then do waiters resume.
pub struct RefreshCoordinator {
    app: String,
    store: Arc<TokenStore>,
    refresher: Arc<dyn Refresher>,
    events: broadcast::Sender<SessionEvent>,
    metrics: Metrics,
    skew: chrono::Duration,
    state: Mutex<RefreshState>,
    next_cycle: AtomicU64,
    throttle: LogThrottle,
}

impl RefreshCoordinator {
    pub fn new(
        app: impl Into<String>,
        store: Arc<TokenStore>,
        refresher: Arc<dyn Refresher>,
        events: broadcast::Sender<SessionEvent>,
        metrics: Metrics,
        skew: chrono::Duration,
    ) -> Self {
        Self {
            app: app.into(),
            store,
            refresher,
            events,
            metrics,
            skew,
            state: Mutex::new(RefreshState::Idle),
            next_cycle: AtomicU64::new(0),
            throttle: LogThrottle::new(JOINED_LOG_WINDOW),
        }
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), RefreshState::Refreshing { .. })
    }

    /// Runs a refresh cycle, or joins the one already in flight.
    pub async fn refresh(self: &Arc<Self>) -> Result<Session, RefreshFailure> {
        self.join_or_start().await
    }

    /// Called before dispatch. Waits for an in-flight cycle, and starts one
    /// when the stored access token is known to be expired.
    pub async fn ensure_fresh(self: &Arc<Self>) -> Result<(), RefreshFailure> {
        if let Some(outcome) = self.join() {
            return outcome.await.map(|_| ());
        }

        let session = match self.store.get().await {
            Some(session) => session,
            None => return Ok(()),
        };
        if session.is_expired(self.skew) && self.refresher.can_refresh(Some(&session)) {
            debug!(app = %self.app, "Access token expires within skew; refreshing before dispatch");
            self.join_or_start().await?;
        }
        Ok(())
    }

    /// Called after a request sent with `sent_with` failed authentication.
    ///
    /// Returns the session to replay with. If the store already holds a
    /// different, unexpired token, another cycle has done the work and no
    /// refresh call is made. `Ok(None)` means there is no session and nothing
    /// to refresh it from, so the failure is not a session ending.
    pub async fn recover(
        self: &Arc<Self>,
        sent_with: Option<&str>,
    ) -> Result<Option<Session>, RefreshFailure> {
        if let Some(outcome) = self.join() {
            return outcome.await.map(Some);
        }

        match self.store.get().await {
            Some(current) => {
                if Some(current.access_token.as_str()) != sent_with && !current.is_expired(self.skew) {
                    debug!(app = %self.app, "Token was replaced after dispatch; replaying without refresh");
                    return Ok(Some(current));
                }
            }
            None if !self.refresher.can_refresh(None) => {
                debug!(app = %self.app, "Unauthenticated request rejected; no session to refresh");
                return Ok(None);
            }
            None => {}
        }

        self.join_or_start().await.map(Some)
    }

    /// Clears the store and, if there was a session, tells subscribers it ended.
    ///
    /// Returns whether this call removed a session. When several writers
    /// race, only the one whose compare-and-replace clears the session
    /// announces it. Storage errors are logged; the in-memory copy is gone
    /// regardless.
    pub async fn teardown(&self, reason: EndReason) -> bool {
        loop {
            let current = match self.store.get().await {
                Some(current) => current,
                None => return false,
            };
            match self
                .store
                .replace_if_current(Some(&current.access_token), None)
                .await
            {
                Ok(true) => break,
                // Rotated or replaced in the meantime; clear whatever is there now.
                Ok(false) => continue,
                Err(e) => {
                    warn!(app = %self.app, error = %e, "Session cleared in memory only");
                    break;
                }
            }
        }

        info!(app = %self.app, reason = ?reason, "Session ended");
        let _ = self.events.send(SessionEvent::Ended {
            app: self.app.clone(),
            reason,
        });
        true
    }

    fn lock_state(&self) -> MutexGuard<'_, RefreshState> {
        // The guarded sections never panic midway; a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&self) -> Option<SharedOutcome> {
        match &*self.lock_state() {
            RefreshState::Refreshing { cycle, outcome } => {
                self.note_joined(*cycle);
                Some(outcome.clone())
            }
            RefreshState::Idle => None,
        }
    }

    fn join_or_start(self: &Arc<Self>) -> SharedOutcome {
        let mut state = self.lock_state();
        if let RefreshState::Refreshing { cycle, outcome } = &*state {
            self.note_joined(*cycle);
            return outcome.clone();
        }

        let cycle = self.next_cycle.fetch_add(1, Ordering::Relaxed) + 1;
        let this = Arc::clone(self);
        // The cycle runs in its own task so a panic inside a refresher or a
        // storage backend is caught here and still settles the cycle.
        let handle = tokio::spawn(async move {
            match tokio::spawn(Arc::clone(&this).run_cycle(cycle)).await {
                Ok(result) => result,
                Err(e) => Err(this.abandon(cycle, e.to_string()).await),
            }
        });
        let outcome = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => Err(RefreshFailure::new(None, format!("Refresh task failed: {}", e))),
            }
        }
        .boxed()
        .shared();

        *state = RefreshState::Refreshing {
            cycle,
            outcome: outcome.clone(),
        };
        outcome
    }

    fn note_joined(&self, cycle: u64) {
        self.metrics.record_refresh_joined(&self.app);
        if let Some(suppressed) = self.throttle.should_emit("refresh.joined") {
            debug!(
                app = %self.app,
                cycle,
                suppressed_count = suppressed,
                "Joined refresh already in flight"
            );
        }
    }

    fn finish(&self, cycle: u64) {
        let mut state = self.lock_state();
        if matches!(&*state, RefreshState::Refreshing { cycle: current, .. } if *current == cycle) {
            *state = RefreshState::Idle;
        }
    }

    /// Settles a cycle whose task died before it could settle itself.
    async fn abandon(&self, cycle: u64, reason: String) -> RefreshFailure {
        let failure = RefreshFailure::new(None, format!("Refresh task failed: {}", reason));
        warn!(app = %self.app, cycle, "Refresh task failed: {}", reason);
        self.metrics.record_refresh(&self.app, "failure");
        self.teardown(EndReason::from(&failure)).await;
        self.finish(cycle);
        failure
    }

    async fn run_cycle(self: Arc<Self>, cycle: u64) -> Result<Session, RefreshFailure> {
        let started = Instant::now();
        let current = self.store.get().await;
        let expected = current.as_ref().map(|s| s.access_token.clone());

        info!(app = %self.app, cycle, "Refreshing access token");
        let result = self.refresher.refresh(current.as_ref()).await;
        let outcome = self.settle(cycle, expected.as_deref(), result).await;

        self.metrics
            .record_refresh_duration(&self.app, started.elapsed().as_secs_f64());
        self.finish(cycle);
        outcome
    }

    /// Applies a refresh result to the store, unless a login or logout
    /// replaced the session while the call was in flight.
    async fn settle(
        &self,
        cycle: u64,
        expected: Option<&str>,
        result: Result<Session, RefreshFailure>,
    ) -> Result<Session, RefreshFailure> {
        match result {
            Ok(next) => {
                self.metrics.record_refresh(&self.app, "success");
                match self.store.replace_if_current(expected, Some(next.clone())).await {
                    Ok(false) => {
                        return self
                            .superseded(cycle, RefreshFailure::new(None, "Session ended during refresh"))
                            .await
                    }
                    Ok(true) => {}
                    Err(e) => warn!(app = %self.app, cycle, error = %e, "Refreshed session not persisted"),
                }
                info!(app = %self.app, cycle, "Access token refreshed");
                let _ = self.events.send(SessionEvent::Refreshed {
                    app: self.app.clone(),
                });
                Ok(next)
            }
            Err(failure) => {
                self.metrics.record_refresh(&self.app, "failure");
                warn!(app = %self.app, cycle, status = ?failure.status, "Refresh failed: {}", failure.message);
                match self.store.replace_if_current(expected, None).await {
                    Ok(false) => return self.superseded(cycle, failure).await,
                    Ok(true) => {}
                    Err(e) => warn!(app = %self.app, cycle, error = %e, "Session cleared in memory only"),
                }
                if expected.is_some() {
                    let _ = self.events.send(SessionEvent::Ended {
                        app: self.app.clone(),
                        reason: EndReason::from(&failure),
                    });
                }
                Err(failure)
            }
        }
    }

    async fn superseded(&self, cycle: u64, fallback: RefreshFailure) -> Result<Session, RefreshFailure> {
        debug!(app = %self.app, cycle, "Session changed during refresh; outcome discarded");
        match self.store.get().await {
            Some(session) => Ok(session),
            None => Err(fallback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStorage;
    use std::sync::atomic::AtomicUsize;

    struct FakeRefresher {
        calls: AtomicUsize,
        delay: Duration,
        result: Result<Session, RefreshFailure>,
    }

    impl FakeRefresher {
        fn new(result: Result<Session, RefreshFailure>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                result,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Refresher for FakeRefresher {
        fn can_refresh(&self, session: Option<&Session>) -> bool {
            session.map_or(false, |s| s.refresh_token.is_some())
        }

        async fn refresh(&self, _current: Option<&Session>) -> Result<Session, RefreshFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    async fn coordinator(
        refresher: Arc<FakeRefresher>,
    ) -> (Arc<RefreshCoordinator>, Arc<TokenStore>, broadcast::Receiver<SessionEvent>) {
        let store = Arc::new(TokenStore::new("k", Arc::new(MemoryStorage::new())));
        store
            .set(Session::new("old", Some("r1".to_string())))
            .await
            .unwrap();
        let (events, rx) = broadcast::channel(16);
        let coordinator = Arc::new(RefreshCoordinator::new(
            "user",
            store.clone(),
            refresher,
            events,
            Metrics::new(),
            chrono::Duration::seconds(30),
        ));
        (coordinator, store, rx)
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_cycle() {
        let refresher = FakeRefresher::new(Ok(Session::new("new", Some("r2".to_string()))));
        let (coordinator, store, mut rx) = coordinator(refresher.clone()).await;

        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.recover(Some("old")).await })
            })
            .collect();
        for waiter in waiters {
            let session = waiter.await.unwrap().unwrap().expect("session to replay with");
            assert_eq!(session.access_token, "new");
        }

        assert_eq!(refresher.calls(), 1);
        assert!(!coordinator.is_refreshing());
        assert_eq!(store.access_token().await.as_deref(), Some("new"));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::Refreshed { app: "user".to_string() }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failed_cycle_tears_down_once() {
        let failure = RefreshFailure::new(Some(401), "Refresh token expired");
        let refresher = FakeRefresher::new(Err(failure.clone()));
        let (coordinator, store, mut rx) = coordinator(refresher.clone()).await;

        let (a, b) = tokio::join!(coordinator.recover(Some("old")), coordinator.refresh());
        assert_eq!(a.unwrap_err(), failure);
        assert_eq!(b.unwrap_err(), failure);

        assert_eq!(refresher.calls(), 1);
        assert!(store.get().await.is_none());
        assert!(rx.try_recv().unwrap().is_end());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_waiter_does_not_cancel_cycle() {
        let refresher = FakeRefresher::new(Ok(Session::new("new", None)));
        let (coordinator, store, _rx) = coordinator(refresher.clone()).await;

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        first.abort();

        let session = coordinator.refresh().await.unwrap();
        assert_eq!(session.access_token, "new");
        assert_eq!(refresher.calls(), 1);
        assert_eq!(store.access_token().await.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_stale_token_replays_without_refresh() {
        let refresher = FakeRefresher::new(Ok(Session::new("unused", None)));
        let (coordinator, _store, _rx) = coordinator(refresher.clone()).await;

        let session = coordinator.recover(Some("older")).await.unwrap().unwrap();
        assert_eq!(session.access_token, "old");
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn test_login_during_cycle_wins() {
        let refresher = FakeRefresher::new(Err(RefreshFailure::new(Some(401), "expired")));
        let (coordinator, store, mut rx) = coordinator(refresher.clone()).await;

        let pending = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.refresh().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        store
            .set(Session::new("fresh-login", Some("r9".to_string())))
            .await
            .unwrap();

        let session = pending.await.unwrap().unwrap();
        assert_eq!(session.access_token, "fresh-login");
        assert_eq!(store.access_token().await.as_deref(), Some("fresh-login"));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_anonymous_rejection_starts_no_cycle() {
        let refresher = FakeRefresher::new(Ok(Session::new("unused", None)));
        let (coordinator, store, mut rx) = coordinator(refresher.clone()).await;
        store.clear().await.unwrap();

        assert!(coordinator.recover(None).await.unwrap().is_none());
        assert_eq!(refresher.calls(), 0);
        assert!(!coordinator.is_refreshing());
        assert!(rx.try_recv().is_err());
    }

    /// Panics on its first call, then hands out a fresh session.
    struct PanicOnceRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Refresher for PanicOnceRefresher {
        fn can_refresh(&self, _session: Option<&Session>) -> bool {
            true
        }

        async fn refresh(&self, _current: Option<&Session>) -> Result<Session, RefreshFailure> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("refresher blew up");
            }
            Ok(Session::new("new", Some("r2".to_string())))
        }
    }

    #[tokio::test]
    async fn test_panicking_refresher_settles_cycle() {
        let store = Arc::new(TokenStore::new("k", Arc::new(MemoryStorage::new())));
        store
            .set(Session::new("old", Some("r1".to_string())))
            .await
            .unwrap();
        let refresher = Arc::new(PanicOnceRefresher {
            calls: AtomicUsize::new(0),
        });
        let (events, mut rx) = broadcast::channel(16);
        let coordinator = Arc::new(RefreshCoordinator::new(
            "user",
            store.clone(),
            refresher.clone(),
            events,
            Metrics::new(),
            chrono::Duration::seconds(30),
        ));

        let failure = coordinator.refresh().await.unwrap_err();
        assert!(failure.message.starts_with("Refresh task failed"));
        assert!(!coordinator.is_refreshing());
        assert!(store.get().await.is_none());
        assert!(rx.try_recv().unwrap().is_end());

        // The next cycle is a real attempt, not the dead outcome.
        let session = coordinator.refresh().await.unwrap();
        assert_eq!(session.access_token, "new");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_racing_teardowns_announce_once() {
        let refresher = FakeRefresher::new(Ok(Session::new("unused", None)));
        let (coordinator, store, mut rx) = coordinator(refresher).await;

        let (a, b) = tokio::join!(
            coordinator.teardown(EndReason::Logout),
            coordinator.teardown(EndReason::Logout)
        );
        assert!(a ^ b);
        assert!(store.get().await.is_none());
        assert!(rx.try_recv().unwrap().is_end());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_teardown_without_session_is_silent() {
        let refresher = FakeRefresher::new(Ok(Session::new("unused", None)));
        let (coordinator, _store, mut rx) = coordinator(refresher).await;

        assert!(coordinator.teardown(EndReason::Logout).await);
        assert!(!coordinator.teardown(EndReason::Logout).await);
        assert!(rx.try_recv().unwrap().is_end());
        assert!(rx.try_recv().is_err());
    }
}
