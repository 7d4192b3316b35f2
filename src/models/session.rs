use chrono::{DateTime, Duration, TimeZone, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// The access/refresh token pair held for one app.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// `None` when the access token is opaque and its lifetime unknown.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Only the expiry claim matters to the client.
#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

impl Session {
    /// Builds a session, reading the expiry from the access token when it is a JWT.
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        let access_token = access_token.into();
        let expires_at = decode_expiry(&access_token);
        Session {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// The session that results from a refresh. A refresh token that was not
    /// rotated by the server is carried over.
    pub fn rotate(&self, access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Session::new(
            access_token,
            refresh_token.or_else(|| self.refresh_token.clone()),
        )
    }

    /// True when the access token is known to expire within `skew` from now.
    /// Unknown expiry is never considered expired; the server decides.
    pub fn is_expired(&self, skew: Duration) -> bool {
        // A horizon past the representable range means every known expiry is within it.
        self.expires_at
            .map(|expires_at| {
                Utc::now()
                    .checked_add_signed(skew)
                    .map_or(true, |horizon| expires_at <= horizon)
            })
            .unwrap_or(false)
    }
}

// Tokens stay out of logs.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Reads the `exp` claim without verifying the signature; the client holds no key.
fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let decoded = decode::<ExpiryClaim>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    Utc.timestamp_opt(decoded.claims.exp?, 0).single()
}
