use crate::node_id::NodeId;
use thiserror::Error;

/// Main error type for the security sublayer
///
/// Errors are `Clone` because handshake failures travel inside completion
/// events delivered to listeners.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ZwError {
    #[error("Out of resources: {0}")]
    Memory(&'static str),

    #[error("Transport busy")]
    Busy,

    #[error("Payload too large: {len} bytes (max {max})")]
    TooLarge { len: usize, max: usize },

    #[error("Payload too small: {len} bytes (min {min})")]
    TooSmall { len: usize, min: usize },

    #[error("Node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Nonce not found")]
    NonceNotFound,

    #[error("Nonce expired")]
    Expired,

    #[error("Authentication failed")]
    Auth,

    #[error("Sequence number mismatch")]
    SeqNumber,

    #[error("Timeout")]
    Timeout,

    #[error("Unsupported security scheme: 0x{0:02X}")]
    SecScheme(u8),

    #[error("Transmit failed")]
    Transmit,

    #[error("Transmit queue full")]
    QueueFull,

    #[error("Network key not installed")]
    KeyMissing,

    #[error("Entropy source error: {0}")]
    Entropy(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for security sublayer operations
pub type ZwResult<T> = Result<T, ZwError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ZwError::TooLarge { len: 53, max: 52 };
        assert_eq!(err.to_string(), "Payload too large: 53 bytes (max 52)");
        assert_eq!(ZwError::SecScheme(0x01).to_string(), "Unsupported security scheme: 0x01");
    }
}
