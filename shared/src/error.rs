use thiserror::Error;

use crate::id::NetworkId;

/// Errors surfaced by the replication engine
///
/// Attachment and permission errors are returned synchronously to the code
/// that attempted the write. Wire-level errors are confined to the packet
/// being processed and logged by the receive loop.
#[derive(Debug, Error)]
pub enum NetError {
    /// A value was used before being attached to a behaviour, or a handle
    /// points at a slot that does not exist
    #[error("network value is not attached: {detail}")]
    InvalidAttachment { detail: String },

    /// The local end lacks the role required for the operation
    #[error("permission denied: cannot {operation} without the required authority")]
    PermissionDenied { operation: &'static str },

    /// Packet id not present in the registry
    #[error("unknown packet id {packet_id}")]
    UnknownPacket { packet_id: u16 },

    /// Index or length bounds violation while decoding a payload
    #[error("malformed payload: {detail}")]
    MalformedPayload { detail: String },

    /// Packet type was never registered, so it has no wire id
    #[error("packet type {type_name} is not registered")]
    UnregisteredPacket { type_name: &'static str },

    /// Session handshake refused by the server
    #[error("session rejected: {reason}")]
    SessionRejected { reason: String },

    /// Registry modified after networking started
    #[error("packet registry is locked; register every packet before starting the network")]
    ProtocolLocked,

    #[error("no network identity {0}")]
    UnknownIdentity(NetworkId),

    #[error("no prefab registered for {0}")]
    UnknownPrefab(NetworkId),

    /// The hooks could not resolve the scene name
    #[error("scene '{0}' could not be loaded")]
    UnknownScene(String),

    #[error("behaviour already holds the maximum of 255 network values")]
    TooManyValues,

    #[error("network session is not running")]
    NotRunning,

    #[error("network session is already running")]
    AlreadyRunning,

    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),
}

impl NetError {
    pub(crate) fn malformed(detail: impl Into<String>) -> Self {
        NetError::MalformedPayload {
            detail: detail.into(),
        }
    }

    pub(crate) fn detached(detail: impl Into<String>) -> Self {
        NetError::InvalidAttachment {
            detail: detail.into(),
        }
    }

    /// True for faults caused by the bytes of a single packet
    pub fn is_wire_fault(&self) -> bool {
        matches!(
            self,
            NetError::MalformedPayload { .. } | NetError::UnknownPacket { .. } | NetError::Codec(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_fault_classification() {
        assert!(NetError::malformed("index 9 out of range").is_wire_fault());
        assert!(NetError::UnknownPacket { packet_id: 77 }.is_wire_fault());
        assert!(!NetError::PermissionDenied { operation: "write" }.is_wire_fault());
        assert!(!NetError::detached("value").is_wire_fault());
    }

    #[test]
    fn test_error_message_formatting() {
        let err = NetError::SessionRejected {
            reason: "Server full".to_string(),
        };
        assert_eq!(err.to_string(), "session rejected: Server full");

        let err = NetError::UnknownPacket { packet_id: 12 };
        assert_eq!(err.to_string(), "unknown packet id 12");
    }
}
