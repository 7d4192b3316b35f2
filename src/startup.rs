//! Builds the session managers for every configured app.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::config::ConfigV1;
use crate::errors::SessionResult;
use crate::metrics::Metrics;
use crate::session::SessionManager;
use crate::store::create_storage;

/// One [`SessionManager`] per configured app, over one shared storage backend.
///
/// Apps are isolated by their storage keys; the registry refuses configs
/// where two apps would share one.
pub struct SessionRegistry {
    managers: BTreeMap<String, Arc<SessionManager>>,
    metrics: Metrics,
}

impl SessionRegistry {
    /// Validates the config and initializes the storage and every app's session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` if the config is invalid or an HTTP
    /// client cannot be built.
    pub fn from_config(config: &ConfigV1) -> SessionResult<Self> {
        config.validate()?;

        let storage = create_storage(&config.store);
        let metrics = Metrics::new();

        info!("Creating session managers...");
        let mut managers = BTreeMap::new();
        for app in &config.apps {
            let manager = SessionManager::new(app.clone(), storage.clone(), metrics.clone())?;
            managers.insert(app.name.clone(), Arc::new(manager));
        }

        Ok(Self { managers, metrics })
    }

    pub fn get(&self, name: &str) -> Option<Arc<SessionManager>> {
        self.managers.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.managers.keys().map(String::as_str)
    }

    /// Metrics shared by every app in this registry.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    #[tokio::test]
    async fn test_registry_builds_one_manager_per_app() {
        let config = load_config_from_str(
            r#"
version: "1.0.0"
store:
  type: memory
apps:
  - name: user
    base_url: http://localhost:5000/api
    storage_key: bmi.user.session
  - name: admin
    base_url: http://localhost:5000/api
    storage_key: bmi.admin.session
"#,
        )
        .unwrap();

        let registry = SessionRegistry::from_config(&config).unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["admin", "user"]);

        let admin = registry.get("admin").unwrap();
        assert_eq!(admin.store().key(), "bmi.admin.session");
        assert!(!admin.is_authenticated().await);
        assert!(registry.get("nobody").is_none());
    }
}
