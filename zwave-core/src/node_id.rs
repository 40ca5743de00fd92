use crate::error::{ZwError, ZwResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Z-Wave node identifier
///
/// Valid node ids in a classic Z-Wave network are 1..=232. Id 0 is not a
/// node and 255 is the broadcast address; neither may own a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(u8);

impl NodeId {
    /// Highest assignable node id
    pub const MAX: u8 = 232;

    /// Broadcast destination
    pub const BROADCAST: u8 = 0xFF;

    /// Create a node id
    ///
    /// # Errors
    /// Returns `InvalidData` for 0 and for ids above [`NodeId::MAX`].
    pub fn new(id: u8) -> ZwResult<Self> {
        if id == 0 || id > Self::MAX {
            return Err(ZwError::InvalidData(format!("Invalid node id: {}", id)));
        }
        Ok(Self(id))
    }

    /// Raw id as carried on the wire
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for NodeId {
    type Error = ZwError;

    fn try_from(id: u8) -> ZwResult<Self> {
        Self::new(id)
    }
}

impl From<NodeId> for u8 {
    fn from(id: NodeId) -> u8 {
        id.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_range() {
        assert!(NodeId::new(0).is_err());
        assert!(NodeId::new(1).is_ok());
        assert!(NodeId::new(232).is_ok());
        assert!(NodeId::new(233).is_err());
        assert!(NodeId::try_from(NodeId::BROADCAST).is_err());
    }

    #[test]
    fn test_node_id_display() {
        let id = NodeId::new(42).unwrap();
        assert_eq!(id.to_string(), "42");
        assert_eq!(u8::from(id), 42);
    }
}
