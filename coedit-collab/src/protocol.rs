//! Shapes exchanged with the core's collaborators.
//!
//! The write path returns an [`OperationAck`] for the fan-out collaborator to
//! broadcast; reconnecting clients catch up with an [`OperationsResponse`].
//! Relay payloads are bincode-encoded:
//!
//! ```text
//! ┌─────────────────┬──────────────────────────────────┐
//! │ applied_version │ operations (server-assigned ids, │
//! │ 8 bytes         │ versions, anchors, values)       │
//! └─────────────────┴──────────────────────────────────┘
//! ```

use coedit_core::Operation;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Acknowledgement of a committed batch, relayed to other clients.
///
/// Delivery is at-most-once and best-effort; clients that miss an ack
/// reconcile through `get_operations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationAck {
    /// Document version after the whole batch was applied
    pub applied_version: u64,
    /// Accepted operations with server-assigned ids and versions
    pub operations: Vec<Operation>,
}

impl OperationAck {
    /// Serialize to the binary relay format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    /// Deserialize from the binary relay format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (ack, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(ack)
    }
}

/// Catch-up response: all operations newer than the requested version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationsResponse {
    /// The version the caller asked to catch up from
    pub from_version: u64,
    /// Version of the last returned operation; equals `from_version` when
    /// nothing newer exists
    pub to_version: u64,
    /// Operations in ascending version order
    pub operations: Vec<Operation>,
}

impl OperationsResponse {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (resp, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::DeserializationError(e.to_string()))?;
        Ok(resp)
    }
}

/// Read-path view of a document's summary record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentState {
    pub document_id: Uuid,
    pub version: u64,
    pub text: String,
    /// Seconds since the Unix epoch
    pub updated_at: u64,
}

/// Monitoring view of a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentStats {
    pub document_id: Uuid,
    pub version: u64,
    /// Total operations in the append-only log
    pub operation_count: u64,
    /// Version of the newest snapshot, 0 when none exists
    pub last_snapshot_version: u64,
    /// Subscribers currently registered with the fan-out hub
    pub active_participants: usize,
}

/// Participant identity with display metadata, registered with the fan-out
/// hub for presence counting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub author_id: Uuid,
    pub name: String,
    /// RGBA color for cursor/selection rendering
    pub color: [f32; 4],
}

impl ParticipantInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create with an explicit author id. The color is derived from the id
    /// hash so the same participant always renders the same.
    pub fn with_id(author_id: Uuid, name: impl Into<String>) -> Self {
        let hash = author_id.as_u128();
        let r = (hash & 0xFF) as f32 / 255.0;
        let g = ((hash >> 8) & 0xFF) as f32 / 255.0;
        let b = ((hash >> 16) & 0xFF) as f32 / 255.0;
        Self {
            author_id,
            name: name.into(),
            color: [r, g, b, 1.0],
        }
    }
}

/// Protocol errors.
#[derive(Debug, Clone)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use coedit_core::{epoch_seconds, OperationKind};

    fn sample_op(version: u64) -> Operation {
        Operation {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            kind: OperationKind::Insert,
            counter: 1,
            site: 2,
            left_anchor: Some(Uuid::new_v4()),
            right_anchor: None,
            value: "x".to_string(),
            color: Some("#34d399".to_string()),
            version,
            author_id: Uuid::new_v4(),
            created_at: epoch_seconds(),
        }
    }

    #[test]
    fn test_ack_roundtrip() {
        let ack = OperationAck {
            applied_version: 7,
            operations: vec![sample_op(6), sample_op(7)],
        };

        let encoded = ack.encode().unwrap();
        let decoded = OperationAck::decode(&encoded).unwrap();

        assert_eq!(decoded, ack);
    }

    #[test]
    fn test_operations_response_roundtrip() {
        let resp = OperationsResponse {
            from_version: 3,
            to_version: 5,
            operations: vec![sample_op(4), sample_op(5)],
        };

        let encoded = resp.encode().unwrap();
        let decoded = OperationsResponse::decode(&encoded).unwrap();

        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_empty_ack_roundtrip() {
        let ack = OperationAck {
            applied_version: 0,
            operations: Vec::new(),
        };
        let decoded = OperationAck::decode(&ack.encode().unwrap()).unwrap();
        assert!(decoded.operations.is_empty());
        assert_eq!(decoded.applied_version, 0);
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let garbage = vec![0xFF, 0xFE, 0xFD];
        assert!(OperationAck::decode(&garbage).is_err());
        assert!(OperationsResponse::decode(&garbage).is_err());
    }

    #[test]
    fn test_participant_stable_color() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let first = ParticipantInfo::with_id(id, "Test");
        let second = ParticipantInfo::with_id(id, "Test");
        assert_eq!(first.color, second.color);
    }

    #[test]
    fn test_participant_new_assigns_id() {
        let alice = ParticipantInfo::new("Alice");
        let bob = ParticipantInfo::new("Bob");
        assert_ne!(alice.author_id, bob.author_id);
    }
}
