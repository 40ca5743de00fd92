//! Transmit-completion plumbing shared by the transport and the session layer

use std::fmt;

/// Opaque handle tying a transmit-completion report to the frame it covers
///
/// Tokens are allocated by the security context and handed to the transport
/// with each frame; the transport hands the same token back on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxToken(u64);

impl TxToken {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx#{}", self.0)
    }
}

/// Outcome of a frame transmission as reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// Frame delivered (acknowledged, or sent for unacknowledged frames)
    Ok,
    /// Destination did not acknowledge the frame
    NoAck,
    /// Transmission failed locally
    Failed,
}

impl TxStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, TxStatus::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tx_status() {
        assert!(TxStatus::Ok.is_ok());
        assert!(!TxStatus::NoAck.is_ok());
        assert!(!TxStatus::Failed.is_ok());
        assert_eq!(TxToken::new(7).to_string(), "tx#7");
    }
}
