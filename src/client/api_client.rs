use std::sync::Arc;

use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::coordinator::RefreshCoordinator;
use super::interceptor::RequestInterceptor;
use super::request::ApiRequest;
use super::transport::exchange;
use crate::config::AppConfig;
use crate::errors::{RefreshFailure, SessionError, SessionResult};
use crate::metrics::{Metrics, MetricsRecorder};
use crate::models::envelope::error_message;
use crate::session::EndReason;

/// Authenticated access to an app's REST API.
///
/// Every call goes through the request interceptor. A 401 is handed to the
/// refresh coordinator and the call is replayed with the recovered token, at
/// most `max_auth_retries` times. Other error responses are returned as-is.
#[derive(Clone)]
pub struct ApiClient {
    config: Arc<AppConfig>,
    http: reqwest::Client,
    interceptor: RequestInterceptor,
    coordinator: Arc<RefreshCoordinator>,
    metrics: Metrics,
}

impl ApiClient {
    pub fn new(
        config: Arc<AppConfig>,
        http: reqwest::Client,
        interceptor: RequestInterceptor,
        coordinator: Arc<RefreshCoordinator>,
        metrics: Metrics,
    ) -> Self {
        Self {
            config,
            http,
            interceptor,
            coordinator,
            metrics,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> SessionResult<T> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> SessionResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(ApiRequest::post(path, body)?).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> SessionResult<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(ApiRequest::put(path, body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> SessionResult<T> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Sends `request` and decodes the `data` of the response envelope.
    pub async fn send<T: DeserializeOwned>(&self, request: ApiRequest) -> SessionResult<T> {
        let result = match self.execute(request).await {
            Ok(data) => serde_json::from_value(data).map_err(SessionError::from),
            Err(e) => Err(e),
        };
        self.metrics
            .record_request(&self.config.name, outcome_label(&result));
        result
    }

    async fn execute(&self, mut request: ApiRequest) -> SessionResult<Value> {
        let refresh_call = self.is_refresh_path(&request.path);

        loop {
            if !refresh_call && !request.is_replay() {
                self.coordinator
                    .ensure_fresh()
                    .await
                    .map_err(SessionError::RefreshFailed)?;
            }

            let (status, body, sent_with) = self.dispatch(&request).await?;

            if status == StatusCode::UNAUTHORIZED {
                let message = error_message(&body, status);

                if refresh_call {
                    let failure = RefreshFailure::new(Some(status.as_u16()), message);
                    self.coordinator
                        .teardown(EndReason::from(&failure))
                        .await;
                    return Err(SessionError::RefreshFailed(failure));
                }

                if request.attempt >= self.config.max_auth_retries {
                    warn!(
                        app = %self.config.name,
                        path = %request.path,
                        attempt = request.attempt,
                        request_id = %request.request_id,
                        "Still unauthorized after replay; giving up"
                    );
                    return Err(SessionError::Unauthorized(message));
                }

                let recovered = self
                    .coordinator
                    .recover(sent_with.as_deref())
                    .await
                    .map_err(SessionError::RefreshFailed)?;
                if recovered.is_none() {
                    return Err(SessionError::Unauthorized(message));
                }
                self.metrics.record_replay(&self.config.name);
                request = request.replay();
                continue;
            }

            if !status.is_success() {
                return Err(SessionError::Api {
                    status: status.as_u16(),
                    message: error_message(&body, status),
                });
            }

            return unwrap_envelope(status, &body);
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
    ) -> SessionResult<(StatusCode, String, Option<String>)> {
        let url = self.config.url(&request.path);
        let mut builder = self.http.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let (builder, sent_with) = self.interceptor.intercept(builder).await;

        debug!(
            app = %self.config.name,
            method = %request.method,
            path = %request.path,
            attempt = request.attempt,
            request_id = %request.request_id,
            "Dispatching request"
        );
        let (status, body) = exchange(builder, self.config.timeout()).await?;
        debug!(
            app = %self.config.name,
            path = %request.path,
            status = status.as_u16(),
            request_id = %request.request_id,
            "Response received"
        );
        Ok((status, body, sent_with))
    }

    fn is_refresh_path(&self, path: &str) -> bool {
        normalize(path) == normalize(&self.config.endpoints.refresh)
    }
}

fn normalize(path: &str) -> &str {
    path.split('?').next().unwrap_or(path).trim_matches('/')
}

/// Extracts `data` from a `{success, message, data}` envelope.
///
/// `success: false` on a 2xx is still an error. Bodies that are not envelopes
/// are returned whole, and an empty body decodes as `null`.
fn unwrap_envelope(status: StatusCode, body: &str) -> SessionResult<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }

    let mut value: Value = serde_json::from_str(body)?;
    let is_envelope = value
        .as_object()
        .map_or(false, |o| o.contains_key("success") || o.contains_key("data"));
    if !is_envelope {
        return Ok(value);
    }

    if value.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(SessionError::Api {
            status: status.as_u16(),
            message: error_message(body, status),
        });
    }
    Ok(value
        .as_object_mut()
        .and_then(|o| o.remove("data"))
        .unwrap_or(Value::Null))
}

fn outcome_label<T>(result: &SessionResult<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(SessionError::Api { .. }) => "api_error",
        Err(SessionError::Unauthorized(_)) => "unauthorized",
        Err(SessionError::RefreshFailed(_)) => "refresh_failed",
        Err(SessionError::Timeout) => "timeout",
        Err(SessionError::Http(_)) => "transport_error",
        Err(_) => "other",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_envelope() {
        assert_eq!(
            unwrap_envelope(StatusCode::OK, r#"{"success": true, "data": {"bmi": 22.4}}"#).unwrap(),
            json!({ "bmi": 22.4 })
        );
        assert_eq!(
            unwrap_envelope(StatusCode::OK, r#"{"success": true, "message": "deleted"}"#).unwrap(),
            Value::Null
        );
        assert_eq!(
            unwrap_envelope(StatusCode::OK, "[1, 2]").unwrap(),
            json!([1, 2])
        );
        assert_eq!(unwrap_envelope(StatusCode::NO_CONTENT, "").unwrap(), Value::Null);
    }

    #[test]
    fn test_success_false_on_2xx_is_api_error() {
        let err = unwrap_envelope(
            StatusCode::OK,
            r#"{"success": false, "message": "Plan not found"}"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Api { status: 200, ref message } if message == "Plan not found"
        ));
    }

    #[test]
    fn test_refresh_path_normalization() {
        assert_eq!(normalize("/auth/refresh-token/"), "auth/refresh-token");
        assert_eq!(normalize("auth/refresh-token?x=1"), "auth/refresh-token");
    }
}
