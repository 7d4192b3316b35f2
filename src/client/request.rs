use http::Method;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::SessionResult;

/// Description of one outbound API call.
///
/// A request that failed authentication is replayed from this descriptor; the
/// replay is a new value with `attempt` incremented, the original is never mutated.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    /// 0 for the original dispatch, 1 for the first replay, ...
    pub attempt: u32,
    /// Shared by the original and its replays, for log correlation.
    pub request_id: Uuid,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        ApiRequest {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            attempt: 0,
            request_id: Uuid::new_v4(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn post<B: Serialize + ?Sized>(path: impl Into<String>, body: &B) -> SessionResult<Self> {
        Self::new(Method::POST, path).with_json(body)
    }

    pub fn put<B: Serialize + ?Sized>(path: impl Into<String>, body: &B) -> SessionResult<Self> {
        Self::new(Method::PUT, path).with_json(body)
    }

    pub fn patch<B: Serialize + ?Sized>(path: impl Into<String>, body: &B) -> SessionResult<Self> {
        Self::new(Method::PATCH, path).with_json(body)
    }

    pub fn with_json<B: Serialize + ?Sized>(mut self, body: &B) -> SessionResult<Self> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// The descriptor for the next dispatch of this same call.
    pub fn replay(&self) -> Self {
        ApiRequest {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }

    pub fn is_replay(&self) -> bool {
        self.attempt > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_replay_increments_attempt_only() {
        let original = ApiRequest::post("/bmi", &json!({ "weightKg": 70 }))
            .unwrap()
            .with_query("unit", "metric");
        let replay = original.replay();

        assert_eq!(original.attempt, 0);
        assert!(!original.is_replay());
        assert_eq!(replay.attempt, 1);
        assert!(replay.is_replay());
        assert_eq!(replay.request_id, original.request_id);
        assert_eq!(replay.method, Method::POST);
        assert_eq!(replay.body, Some(json!({ "weightKg": 70 })));
        assert_eq!(replay.query, vec![("unit".to_string(), "metric".to_string())]);
    }
}
