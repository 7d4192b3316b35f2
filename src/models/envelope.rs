use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::user::User;

/// The `{success, message, data}` wrapper every API response uses.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ApiEnvelope<T> {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// An envelope that does not say `success: false` is treated as a success.
    pub fn is_success(&self) -> bool {
        self.success.unwrap_or(true)
    }
}

/// `data` of a login or registration response.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user: User,
    #[serde(alias = "accessToken")]
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// `data` of a refresh response.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RefreshPayload {
    #[serde(alias = "accessToken")]
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// `data` of a profile response.
#[derive(Deserialize, Debug, Clone)]
pub struct ProfilePayload {
    pub user: User,
}

/// Best-effort human message from an error response body.
///
/// Tries the envelope's `message`, then a bare `error` field, then falls back
/// to the canonical reason of the status code.
pub fn error_message(body: &str, status: http::StatusCode) -> String {
    let fallback = || {
        status
            .canonical_reason()
            .unwrap_or("Unknown error")
            .to_string()
    };

    match serde_json::from_str::<Value>(body) {
        Ok(value) => value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(fallback),
        Err(_) => fallback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_auth_payload_accepts_both_token_names() {
        let envelope: ApiEnvelope<AuthPayload> = serde_json::from_str(
            r#"{"success": true, "message": "ok", "data": {"user": {"email": "a@b.c"}, "token": "t1", "refreshToken": "r1"}}"#,
        )
        .unwrap();
        let data = envelope.data.unwrap();
        assert_eq!(data.token, "t1");
        assert_eq!(data.refresh_token.as_deref(), Some("r1"));

        let payload: AuthPayload = serde_json::from_str(
            r#"{"user": {}, "accessToken": "t2"}"#,
        )
        .unwrap();
        assert_eq!(payload.token, "t2");
        assert_eq!(payload.refresh_token, None);
    }

    #[test]
    fn test_envelope_without_success_flag_is_success() {
        let envelope: ApiEnvelope<RefreshPayload> =
            serde_json::from_str(r#"{"data": {"token": "t"}}"#).unwrap();
        assert!(envelope.is_success());

        let failed: ApiEnvelope<Value> =
            serde_json::from_str(r#"{"success": false, "message": "nope"}"#).unwrap();
        assert!(!failed.is_success());
        assert!(failed.data.is_none());
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(
                r#"{"success": false, "message": "Invalid email or password"}"#,
                StatusCode::UNAUTHORIZED
            ),
            "Invalid email or password"
        );
        assert_eq!(
            error_message(r#"{"error": "Account locked"}"#, StatusCode::FORBIDDEN),
            "Account locked"
        );
        assert_eq!(
            error_message("<html>bad gateway</html>", StatusCode::BAD_GATEWAY),
            "Bad Gateway"
        );
    }
}
