use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};

use super::events::{EndReason, SessionEvent};
use crate::client::{ApiClient, AuthEndpoints, RefreshCoordinator, RequestInterceptor};
use crate::config::{AppConfig, RefreshTransport};
use crate::errors::{SessionError, SessionResult};
use crate::metrics::Metrics;
use crate::models::{
    AuthPayload, LoginCredentials, ProfilePayload, RegisterRequest, Session, User,
};
use crate::store::{Storage, TokenStore};

/// Lifecycle events buffered per subscriber before the slowest one starts lagging.
const EVENT_CAPACITY: usize = 100;

/// Result of a successful login or registration.
#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub user: User,
    pub session: Session,
}

/// The session of one app: the only place tokens are minted from credentials.
///
/// Build one per deployed frontend (end-user, admin, ...), each with its own
/// base URL and storage key. Clones of [`ApiClient`] handed out by
/// [`SessionManager::api`] share this session's store and refresh coordinator.
pub struct SessionManager {
    config: Arc<AppConfig>,
    store: Arc<TokenStore>,
    endpoints: Arc<AuthEndpoints>,
    coordinator: Arc<RefreshCoordinator>,
    api: ApiClient,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn Storage>,
        metrics: Metrics,
    ) -> SessionResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let http = reqwest::Client::builder()
            .cookie_store(config.refresh_transport == RefreshTransport::Cookie)
            .build()
            .map_err(|e| SessionError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let store = Arc::new(TokenStore::new(config.storage_key.clone(), storage));
        let endpoints = Arc::new(AuthEndpoints::new(config.clone(), http.clone()));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let coordinator = Arc::new(RefreshCoordinator::new(
            config.name.clone(),
            store.clone(),
            endpoints.clone(),
            events.clone(),
            metrics.clone(),
            config.expiry_skew(),
        ));
        let api = ApiClient::new(
            config.clone(),
            http,
            RequestInterceptor::new(store.clone()),
            coordinator.clone(),
            metrics,
        );

        info!(
            app = %config.name,
            base_url = %config.base_url,
            storage_key = %config.storage_key,
            "Session manager ready"
        );

        Ok(Self {
            config,
            store,
            endpoints,
            coordinator,
            api,
            events,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Authenticated client for the rest of the app's API.
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub async fn session(&self) -> Option<Session> {
        self.store.get().await
    }

    pub async fn is_authenticated(&self) -> bool {
        self.store.get().await.is_some()
    }

    /// Exchanges credentials for a session. On failure the store is untouched.
    pub async fn login(&self, credentials: &LoginCredentials) -> SessionResult<AuthOutcome> {
        let payload = self.endpoints.login(credentials).await?;
        Ok(self.establish(payload).await)
    }

    /// Creates an account and signs into it, with the same contract as `login`.
    pub async fn register(&self, request: &RegisterRequest) -> SessionResult<AuthOutcome> {
        let payload = self.endpoints.register(request).await?;
        Ok(self.establish(payload).await)
    }

    /// Rotates the access token now. Joins a refresh already in flight.
    ///
    /// A failed refresh ends the session.
    pub async fn refresh(&self) -> SessionResult<Session> {
        self.coordinator
            .refresh()
            .await
            .map_err(SessionError::RefreshFailed)
    }

    /// Ends the session. The server is told on a best-effort basis; the local
    /// session is cleared whatever it answers, so this never fails.
    pub async fn logout(&self) {
        let session = self.store.get().await;
        // With cookie transport the server may hold a session we have no token for.
        let notify =
            session.is_some() || self.config.refresh_transport == RefreshTransport::Cookie;

        if notify {
            if let Err(e) = self.endpoints.logout(session.as_ref()).await {
                warn!(app = %self.config.name, error = %e, "Server logout failed; clearing local session anyway");
            }
        }

        self.coordinator.teardown(EndReason::Logout).await;
    }

    /// Profile of the signed-in user. Token freshness is handled transparently.
    pub async fn current_user(&self) -> SessionResult<User> {
        let profile: ProfilePayload = self.api.get(&self.config.endpoints.profile).await?;
        Ok(profile.user)
    }

    async fn establish(&self, payload: AuthPayload) -> AuthOutcome {
        let session = Session::new(payload.token, payload.refresh_token);
        if let Err(e) = self.store.set(session.clone()).await {
            // The in-memory copy is set; only survival across restarts is lost.
            warn!(app = %self.config.name, error = %e, "Session not persisted");
        }

        info!(app = %self.config.name, "Session established");
        let _ = self.events.send(SessionEvent::Established {
            app: self.config.name.clone(),
        });

        AuthOutcome {
            user: payload.user,
            session,
        }
    }
}
