//! In-process transport over a bounded tokio channel

use crate::frame::{FrameTransport, OutboundFrame};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use zwave_core::{NodeId, TxToken, ZwError, ZwResult};

/// Default number of frames the channel buffers
pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Channel transport settings
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub capacity: usize,
}

impl ChannelSettings {
    pub fn new(capacity: usize) -> Self {
        Self { capacity }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Transport that forwards frames into a bounded channel
///
/// A full channel reports `Busy`; a dropped receiver reports `Transmit`.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<OutboundFrame>,
}

impl ChannelTransport {
    /// Create a transport and the receiving end the link driver reads from
    pub fn new(settings: ChannelSettings) -> (Self, FrameReceiver) {
        let (tx, rx) = mpsc::channel(settings.capacity.max(1));
        (Self { tx }, FrameReceiver { rx })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl FrameTransport for ChannelTransport {
    fn send_frame(&self, dest: NodeId, frame: &[u8], token: TxToken) -> ZwResult<()> {
        match self.tx.try_send(OutboundFrame::new(dest, frame, token)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                log::debug!("Transport channel full, {} to node {} refused", token, dest);
                Err(ZwError::Busy)
            }
            Err(TrySendError::Closed(_)) => {
                log::error!("Transport channel closed");
                Err(ZwError::Transmit)
            }
        }
    }
}

/// Receiving end of a [`ChannelTransport`]
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::Receiver<OutboundFrame>,
}

impl FrameReceiver {
    /// Wait for the next frame; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.rx.recv().await
    }

    /// Take a frame if one is queued
    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.rx.try_recv().ok()
    }

    /// Drain every queued frame
    pub fn drain(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }

    #[test]
    fn test_frames_arrive_in_order() {
        let (transport, mut rx) = ChannelTransport::new(ChannelSettings::default());
        transport.send_frame(node(2), &[0x98, 0x40], TxToken::new(1)).unwrap();
        transport.send_frame(node(3), &[0x98, 0x04, 0x00], TxToken::new(2)).unwrap();

        let frames = rx.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].dest, node(2));
        assert_eq!(frames[0].frame.as_ref(), &[0x98, 0x40]);
        assert_eq!(frames[1].token, TxToken::new(2));
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_full_channel_is_busy() {
        let (transport, mut rx) = ChannelTransport::new(ChannelSettings::new(1));
        transport.send_frame(node(2), &[1], TxToken::new(1)).unwrap();
        assert_eq!(
            transport.send_frame(node(2), &[2], TxToken::new(2)),
            Err(ZwError::Busy)
        );
        rx.drain();
        assert!(transport.send_frame(node(2), &[3], TxToken::new(3)).is_ok());
    }

    #[test]
    fn test_closed_channel_fails() {
        let (transport, rx) = ChannelTransport::new(ChannelSettings::default());
        drop(rx);
        assert!(transport.is_closed());
        assert_eq!(
            transport.send_frame(node(2), &[1], TxToken::new(1)),
            Err(ZwError::Transmit)
        );
    }

    #[tokio::test]
    async fn test_recv_waits_for_frame() {
        let (transport, mut rx) = ChannelTransport::new(ChannelSettings::default());
        let handle = tokio::spawn(async move { rx.recv().await });
        transport.send_frame(node(5), &[0x98, 0x02], TxToken::new(9)).unwrap();
        let frame = handle.await.unwrap().unwrap();
        assert_eq!(frame.dest, node(5));
    }
}
