use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Durable client-side storage backing every app's token store.
/// We differentiate the backends via a "type" tag in the YAML.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
#[serde(tag = "type")]
pub enum StoreConfig {
    /// A JSON key/value file that survives process restarts.
    #[serde(rename = "file")]
    File(FileStoreConfig),
    /// Process-lifetime storage; sessions do not survive a restart.
    #[serde(rename = "memory")]
    Memory,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq, JsonSchema)]
pub struct FileStoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::Memory
    }
}
