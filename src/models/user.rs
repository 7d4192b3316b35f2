use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::utils::value::value_to_id;

/// The profile the API returns for the signed-in account.
///
/// Only the fields the session layer cares about are modelled; everything else
/// the server sends (BMI goals, avatar, timestamps, ...) is kept in `extra`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, alias = "_id", deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    /// Any additional fields we don't explicitly model.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role
            .as_deref()
            .map(|role| role.eq_ignore_ascii_case("admin"))
            .unwrap_or(false)
    }

    pub fn display_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{} {}", first, last)),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => self.email.clone(),
        }
    }
}

/// Ids arrive as strings, numbers or `{"$oid": ...}` depending on the backend.
fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(value_to_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_from_mongo_style_payload() {
        let user: User = serde_json::from_value(json!({
            "_id": "65a1f0",
            "email": "ada@example.com",
            "firstName": "Ada",
            "lastName": "Lovelace",
            "role": "admin",
            "heightCm": 170
        }))
        .unwrap();

        assert_eq!(user.id.as_deref(), Some("65a1f0"));
        assert!(user.is_admin());
        assert_eq!(user.display_name().as_deref(), Some("Ada Lovelace"));
        assert_eq!(user.extra.get("heightCm"), Some(&json!(170)));
    }

    #[test]
    fn test_numeric_id() {
        let user: User = serde_json::from_value(json!({ "id": 42, "role": "user" })).unwrap();
        assert_eq!(user.id.as_deref(), Some("42"));
        assert!(!user.is_admin());
        assert_eq!(user.display_name(), None);
    }
}
