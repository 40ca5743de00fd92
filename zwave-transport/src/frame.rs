//! Frame transport trait

use bytes::Bytes;
use zwave_core::{NodeId, TxToken, ZwResult};

/// A frame handed to the link layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Destination node
    pub dest: NodeId,
    /// Complete frame, command class byte first
    pub frame: Bytes,
    /// Token to report the transmit outcome with
    pub token: TxToken,
}

impl OutboundFrame {
    pub fn new(dest: NodeId, frame: &[u8], token: TxToken) -> Self {
        Self {
            dest,
            frame: Bytes::copy_from_slice(frame),
            token,
        }
    }
}

/// Link layer accepting frames for transmission
///
/// `send_frame` only queues. The outcome is reported later by whoever drives
/// the link, quoting `token`.
pub trait FrameTransport: Send + Sync {
    /// Queue a frame for transmission
    ///
    /// # Arguments
    /// * `dest` - Destination node
    /// * `frame` - Frame bytes
    /// * `token` - Completion token
    ///
    /// # Errors
    /// - `ZwError::Busy` if the link cannot take the frame now
    /// - `ZwError::Transmit` if the link is gone
    fn send_frame(&self, dest: NodeId, frame: &[u8], token: TxToken) -> ZwResult<()>;
}
