use serde_json::Value;

/// Flattens an identifier-like JSON value into a string.
///
/// Handles plain strings and numbers as well as Mongo extended JSON
/// (`{"$oid": "..."}`). Null, blank strings and other shapes yield `None`.
pub fn value_to_id(value: Value) -> Option<String> {
    let raw = match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Object(mut map) => match map.remove("$oid") {
            Some(Value::String(s)) => s,
            _ => return None,
        },
        _ => return None,
    };
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_to_id() {
        assert_eq!(value_to_id(json!("abc")), Some("abc".to_string()));
        assert_eq!(value_to_id(json!(7)), Some("7".to_string()));
        assert_eq!(
            value_to_id(json!({ "$oid": "65a1f0" })),
            Some("65a1f0".to_string())
        );
        assert_eq!(value_to_id(json!("  ")), None);
        assert_eq!(value_to_id(json!(null)), None);
        assert_eq!(value_to_id(json!([1, 2])), None);
    }
}
