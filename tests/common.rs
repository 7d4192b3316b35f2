#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use sessionkeeper::config::AppConfig;
use sessionkeeper::metrics::Metrics;
use sessionkeeper::models::Session;
use sessionkeeper::store::{MemoryStorage, Storage};
use sessionkeeper::SessionManager;

pub fn app_config(base_url: &str) -> AppConfig {
    let mut config = AppConfig::new("user", base_url, "bmi.user.session");
    config.timeout_in_ms = 2_000;
    config
}

pub fn manager(base_url: &str) -> SessionManager {
    manager_with(app_config(base_url), Arc::new(MemoryStorage::new()))
}

pub fn manager_with(config: AppConfig, storage: Arc<dyn Storage>) -> SessionManager {
    SessionManager::new(config, storage, Metrics::new()).expect("failed to build session manager")
}

/// A manager whose store already holds a session, as after a page reload.
pub async fn signed_in(base_url: &str, access: &str, refresh: Option<&str>) -> SessionManager {
    let manager = manager(base_url);
    manager
        .store()
        .set(Session::new(access, refresh.map(str::to_string)))
        .await
        .expect("failed to seed session");
    manager
}

pub fn jwt_expiring_in(secs: i64) -> String {
    encode(
        &Header::default(),
        &json!({ "sub": "u1", "exp": Utc::now().timestamp() + secs }),
        &EncodingKey::from_secret(b"server-secret"),
    )
    .expect("failed to mint test token")
}

pub fn user_json() -> serde_json::Value {
    json!({
        "_id": "65a1f0c2",
        "email": "ada@example.com",
        "firstName": "Ada",
        "lastName": "Lovelace",
        "role": "user"
    })
}

pub fn auth_response(token: &str, refresh_token: &str) -> String {
    json!({
        "success": true,
        "message": "Login successful",
        "data": { "user": user_json(), "token": token, "refreshToken": refresh_token }
    })
    .to_string()
}

pub fn profile_response() -> String {
    json!({ "success": true, "data": { "user": user_json() } }).to_string()
}

pub fn refresh_response(token: &str, refresh_token: Option<&str>) -> String {
    json!({ "success": true, "data": { "token": token, "refreshToken": refresh_token } })
        .to_string()
}
