use std::collections::HashSet;
use std::path::Path;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use super::logging::LoggingConfig;
use super::store::StoreConfig;
use crate::errors::{SessionError, SessionResult};

/// Prefix for environment overrides, e.g. `SESSIONKEEPER_LOGGING__LEVEL=debug`.
const ENV_PREFIX: &str = "SESSIONKEEPER_";

/// Upper bound for `expiry_skew_secs`: one day.
pub const MAX_EXPIRY_SKEW_SECS: i64 = 86_400;

/// A top-level enum for versioned configurations.
#[derive(Deserialize, Serialize, JsonSchema)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1.0.0")]
    ConfigV1(ConfigV1),
}

/// Main config for v1.0.0: logging, the shared durable store and one entry per app.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct ConfigV1 {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    pub apps: Vec<AppConfig>,
}

/// One deployed frontend (end-user, admin, ...) talking to its own API base.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
pub struct AppConfig {
    pub name: String,
    pub base_url: String,
    /// Key under which this app's token pair is persisted. Must be unique per store.
    pub storage_key: String,
    #[serde(default)]
    pub refresh_transport: RefreshTransport,
    #[serde(default = "default_timeout_in_ms")]
    pub timeout_in_ms: u64,
    /// Tokens expiring within this many seconds are refreshed before use.
    #[serde(default = "default_expiry_skew_secs")]
    pub expiry_skew_secs: i64,
    /// How many times a request may be replayed after an authentication failure.
    #[serde(default = "default_max_auth_retries")]
    pub max_auth_retries: u32,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
}

/// How the refresh token reaches `/auth/refresh-token`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RefreshTransport {
    /// `{"refreshToken": "..."}` in the JSON body.
    #[default]
    Body,
    /// An HTTP-only cookie set by the server; the client sends no token itself.
    Cookie,
}

/// Paths of the auth endpoints, relative to `base_url`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
pub struct EndpointsConfig {
    #[serde(default = "default_login")]
    pub login: String,
    #[serde(default = "default_register")]
    pub register: String,
    #[serde(default = "default_refresh")]
    pub refresh: String,
    #[serde(default = "default_logout")]
    pub logout: String,
    #[serde(default = "default_profile")]
    pub profile: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            login: default_login(),
            register: default_register(),
            refresh: default_refresh(),
            logout: default_logout(),
            profile: default_profile(),
        }
    }
}

fn default_timeout_in_ms() -> u64 {
    10_000
}

fn default_expiry_skew_secs() -> i64 {
    30
}

fn default_max_auth_retries() -> u32 {
    1
}

fn default_login() -> String {
    "/auth/login".to_string()
}

fn default_register() -> String {
    "/auth/register".to_string()
}

fn default_refresh() -> String {
    "/auth/refresh-token".to_string()
}

fn default_logout() -> String {
    "/auth/logout".to_string()
}

fn default_profile() -> String {
    "/auth/profile".to_string()
}

impl AppConfig {
    /// Minimal config for an app with default endpoints and timings.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        storage_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            storage_key: storage_key.into(),
            refresh_transport: RefreshTransport::default(),
            timeout_in_ms: default_timeout_in_ms(),
            expiry_skew_secs: default_expiry_skew_secs(),
            max_auth_retries: default_max_auth_retries(),
            endpoints: EndpointsConfig::default(),
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_in_ms)
    }

    /// The skew as a duration, clamped to `0..=MAX_EXPIRY_SKEW_SECS`.
    pub fn expiry_skew(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.expiry_skew_secs.clamp(0, MAX_EXPIRY_SKEW_SECS))
            .unwrap_or_default()
    }

    /// Checks the settings a single session manager depends on.
    pub fn validate(&self) -> SessionResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(SessionError::Config(format!(
                "App '{}' has an empty base_url",
                self.name
            )));
        }
        if !(0..=MAX_EXPIRY_SKEW_SECS).contains(&self.expiry_skew_secs) {
            return Err(SessionError::Config(format!(
                "App '{}' has expiry_skew_secs {} outside 0..={}",
                self.name, self.expiry_skew_secs, MAX_EXPIRY_SKEW_SECS
            )));
        }
        Ok(())
    }

    /// Joins `base_url` and an endpoint path without doubling the slash.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl ConfigV1 {
    /// Rejects invalid apps and configs where two apps would share a name or a storage key.
    pub fn validate(&self) -> SessionResult<()> {
        if self.apps.is_empty() {
            return Err(SessionError::Config("No apps configured".into()));
        }

        let mut names = HashSet::new();
        let mut keys = HashSet::new();
        for app in &self.apps {
            app.validate()?;
            if !names.insert(app.name.as_str()) {
                return Err(SessionError::Config(format!(
                    "Duplicate app name '{}'",
                    app.name
                )));
            }
            if !keys.insert(app.storage_key.as_str()) {
                return Err(SessionError::Config(format!(
                    "App '{}' reuses storage key '{}'",
                    app.name, app.storage_key
                )));
            }
        }
        Ok(())
    }
}

fn extract(figment: Figment) -> SessionResult<ConfigV1> {
    let config = figment.extract::<Config>()?;
    let config = match config {
        Config::ConfigV1(c) => c,
    };
    config.validate()?;
    Ok(config)
}

/// Load config from a YAML file, with `SESSIONKEEPER_*` environment overrides.
pub fn load_config(path: impl AsRef<Path>) -> SessionResult<ConfigV1> {
    extract(
        Figment::new()
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__")),
    )
}

/// Load config from an inline YAML document.
pub fn load_config_from_str(yaml: &str) -> SessionResult<ConfigV1> {
    extract(Figment::new().merge(Yaml::string(yaml)))
}

/// Render the JSON schema for the configuration.
pub fn print_schema() -> String {
    let schema = schema_for!(Config);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}
