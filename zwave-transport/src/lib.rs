//! Transport seam for the Z-Wave security layer
//!
//! The security layer hands finished frames to a [`FrameTransport`] and
//! learns about delivery through a completion callback carrying the
//! [`TxToken`](zwave_core::TxToken) it passed along.

pub mod channel;
pub mod frame;

pub use channel::{ChannelSettings, ChannelTransport, FrameReceiver};
pub use frame::{FrameTransport, OutboundFrame};
