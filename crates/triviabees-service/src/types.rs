use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One call to the generation endpoint, as submitted by a caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The generation kind, e.g. `text-to-image`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Arbitrary input for the endpoint.
    #[serde(default)]
    pub payload: Value,

    /// Higher values are dispatched first.
    #[serde(default)]
    pub priority: i32,
}

impl GenerationRequest {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A diagnostic snapshot of the coordinator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStatus {
    /// Requests waiting for a free slot.
    pub queue_length: usize,
    /// Requests currently being executed against the endpoint.
    pub active_requests: usize,
    /// Results currently held by the cache, including ones that expired but were not looked up yet.
    pub cache_size: usize,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_from_json() {
        let request: GenerationRequest =
            serde_json::from_value(json!({"type": "describe-image", "payload": {"imageUrl": "a.png"}}))
                .unwrap();
        assert_eq!(request.kind, "describe-image");
        assert_eq!(request.payload, json!({"imageUrl": "a.png"}));
        assert_eq!(request.priority, 0);

        let request: GenerationRequest =
            serde_json::from_value(json!({"type": "text-to-image", "priority": 2})).unwrap();
        assert_eq!(request.payload, Value::Null);
        assert_eq!(request.priority, 2);
    }
}
