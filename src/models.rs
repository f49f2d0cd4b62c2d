use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Domain Models
// ============================================================================

/// Message relayed through the pipeline, serialized as JSON on the wire.
///
/// `id` is stable across the primary-to-retry hop and is the correlation key
/// used in logs. The payload is opaque to the pipeline.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RelayMessage {
    pub id: Uuid,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RelayMessage {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_survives_a_serialization_round_trip() {
        let message = RelayMessage::new(json!({"amount": 42, "currency": "BRL"}));

        let encoded = serde_json::to_string(&message).unwrap();
        let decoded: RelayMessage = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.id, message.id);
        assert_eq!(decoded.payload, message.payload);
    }

    #[test]
    fn payload_is_optional_on_the_wire() {
        let id = Uuid::new_v4();
        let decoded: RelayMessage =
            serde_json::from_str(&format!("{{\"id\":\"{id}\"}}")).unwrap();

        assert_eq!(decoded.id, id);
        assert!(decoded.payload.is_null());
    }
}
