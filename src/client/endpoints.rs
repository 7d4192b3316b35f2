use std::sync::Arc;

use async_trait::async_trait;
use http::StatusCode;
use reqwest::RequestBuilder;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::coordinator::Refresher;
use super::transport::exchange;
use crate::config::{AppConfig, RefreshTransport};
use crate::errors::{RefreshFailure, SessionError, SessionResult};
use crate::models::envelope::error_message;
use crate::models::{
    ApiEnvelope, AuthPayload, LoginCredentials, RefreshPayload, RegisterRequest, Session,
};

/// The raw calls against the auth endpoints of one app.
///
/// These bypass the request interceptor: login and register carry no bearer,
/// and the refresh call must never recurse into the refresh path.
pub struct AuthEndpoints {
    config: Arc<AppConfig>,
    http: reqwest::Client,
}

impl AuthEndpoints {
    pub fn new(config: Arc<AppConfig>, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    pub async fn login(&self, credentials: &LoginCredentials) -> SessionResult<AuthPayload> {
        self.authenticate(&self.config.endpoints.login, credentials)
            .await
    }

    pub async fn register(&self, request: &RegisterRequest) -> SessionResult<AuthPayload> {
        self.authenticate(&self.config.endpoints.register, request)
            .await
    }

    /// Tells the server the session is over. The caller decides what a failure means.
    pub async fn logout(&self, session: Option<&Session>) -> SessionResult<()> {
        let url = self.config.url(&self.config.endpoints.logout);
        let mut builder = self.http.post(&url);
        if let Some(session) = session {
            builder = builder.bearer_auth(&session.access_token);
            if let Some(refresh_token) = &session.refresh_token {
                builder = builder.json(&json!({ "refreshToken": refresh_token }));
            }
        }

        let (status, body) = self.exchange(builder).await?;
        if !status.is_success() {
            return Err(SessionError::Api {
                status: status.as_u16(),
                message: error_message(&body, status),
            });
        }
        debug!(app = %self.config.name, "Server acknowledged logout");
        Ok(())
    }

    async fn authenticate<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> SessionResult<AuthPayload> {
        let url = self.config.url(path);
        debug!(app = %self.config.name, path = %path, "Sending credentials");

        let (status, body) = self.exchange(self.http.post(&url).json(body)).await?;
        if !status.is_success() {
            let message = error_message(&body, status);
            info!(
                app = %self.config.name,
                path = %path,
                status = status.as_u16(),
                "Credentials rejected: {}",
                message
            );
            return Err(SessionError::Credential(message));
        }

        let envelope: ApiEnvelope<AuthPayload> = serde_json::from_str(&body)
            .map_err(|e| SessionError::Credential(format!("Malformed auth response: {}", e)))?;
        if !envelope.is_success() {
            return Err(SessionError::Credential(
                envelope
                    .message
                    .unwrap_or_else(|| "Authentication failed".to_string()),
            ));
        }
        match envelope.data {
            Some(payload) => Ok(payload),
            None => Err(SessionError::Credential(
                "Auth response carried no token".to_string(),
            )),
        }
    }

    async fn exchange(&self, builder: RequestBuilder) -> SessionResult<(StatusCode, String)> {
        exchange(builder, self.config.timeout()).await.map_err(|e| {
            if let SessionError::Timeout = e {
                warn!(
                    app = %self.config.name,
                    timeout_ms = self.config.timeout_in_ms,
                    "Auth call timed out"
                );
            }
            e
        })
    }
}

#[async_trait]
impl Refresher for AuthEndpoints {
    fn can_refresh(&self, session: Option<&Session>) -> bool {
        match self.config.refresh_transport {
            // The cookie jar holds the refresh token; only the server knows if it is valid.
            RefreshTransport::Cookie => true,
            RefreshTransport::Body => session.map_or(false, |s| s.refresh_token.is_some()),
        }
    }

    async fn refresh(&self, current: Option<&Session>) -> Result<Session, RefreshFailure> {
        let url = self.config.url(&self.config.endpoints.refresh);
        let body = match self.config.refresh_transport {
            RefreshTransport::Body => {
                let refresh_token = current
                    .and_then(|s| s.refresh_token.as_deref())
                    .ok_or_else(|| RefreshFailure::new(None, "No refresh token stored"))?;
                json!({ "refreshToken": refresh_token })
            }
            RefreshTransport::Cookie => json!({}),
        };

        let (status, body) = self
            .exchange(self.http.post(&url).json(&body))
            .await
            .map_err(|e| RefreshFailure::new(None, e.to_string()))?;
        if !status.is_success() {
            return Err(RefreshFailure::new(
                Some(status.as_u16()),
                error_message(&body, status),
            ));
        }

        let envelope: ApiEnvelope<RefreshPayload> = serde_json::from_str(&body).map_err(|e| {
            RefreshFailure::new(Some(status.as_u16()), format!("Malformed refresh response: {}", e))
        })?;
        if !envelope.is_success() {
            return Err(RefreshFailure::new(
                Some(status.as_u16()),
                envelope
                    .message
                    .unwrap_or_else(|| "Refresh rejected".to_string()),
            ));
        }
        let payload = envelope.data.ok_or_else(|| {
            RefreshFailure::new(Some(status.as_u16()), "Refresh response carried no token")
        })?;

        Ok(match current {
            Some(session) => session.rotate(payload.token, payload.refresh_token),
            None => Session::new(payload.token, payload.refresh_token),
        })
    }
}
