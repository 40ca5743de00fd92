//! Completion events of the security layer
//!
//! Every operation that finishes asynchronously (a secure send, a secure
//! inclusion, adding a node) reports its outcome through a
//! [`SecurityEventListener`]. Listeners run after the context lock has been
//! released and may call back into the context.

use std::fmt;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use zwave_core::{NodeId, ZwResult};

/// Who asked for a secure send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendOrigin {
    /// `secure_send` called by the application
    Application,
    /// Included-node handshake
    IncludedNode,
    /// Adding-node handshake
    AddingNode,
    /// Commands-supported request or report
    CommandsSupported,
}

impl fmt::Display for SendOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SendOrigin::Application => "application",
            SendOrigin::IncludedNode => "included-node",
            SendOrigin::AddingNode => "adding-node",
            SendOrigin::CommandsSupported => "commands-supported",
        };
        write!(f, "{}", name)
    }
}

/// An event reported by the security layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityEvent {
    /// A queued secure send finished
    SendCompleted {
        node: NodeId,
        origin: SendOrigin,
        result: ZwResult<()>,
    },

    /// The included-node handshake finished
    InclusionCompleted {
        /// Controller that ran the handshake, once known
        controller: Option<NodeId>,
        result: ZwResult<()>,
    },

    /// The adding-node handshake finished
    AddNodeCompleted { node: NodeId, result: ZwResult<()> },

    /// A peer listed the command classes it supports securely
    SupportedCommands { node: NodeId, command_classes: Vec<u8> },

    /// A network key became active
    NetworkKeyInstalled,
}

impl SecurityEvent {
    /// Check if the event reports a failure
    #[must_use]
    pub fn is_failure(&self) -> bool {
        match self {
            Self::SendCompleted { result, .. }
            | Self::InclusionCompleted { result, .. }
            | Self::AddNodeCompleted { result, .. } => result.is_err(),
            Self::SupportedCommands { .. } | Self::NetworkKeyInstalled => false,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        fn outcome(result: &ZwResult<()>) -> String {
            match result {
                Ok(()) => "succeeded".to_string(),
                Err(e) => format!("failed: {}", e),
            }
        }

        match self {
            Self::SendCompleted {
                node,
                origin,
                result,
            } => format!("Secure send ({}) to node {} {}", origin, node, outcome(result)),
            Self::InclusionCompleted { controller, result } => match controller {
                Some(controller) => format!(
                    "Secure inclusion by controller {} {}",
                    controller,
                    outcome(result)
                ),
                None => format!("Secure inclusion {}", outcome(result)),
            },
            Self::AddNodeCompleted { node, result } => {
                format!("Secure add of node {} {}", node, outcome(result))
            }
            Self::SupportedCommands {
                node,
                command_classes,
            } => format!(
                "Node {} supports {} secure command classes",
                node,
                command_classes.len()
            ),
            Self::NetworkKeyInstalled => "Network key installed".to_string(),
        }
    }
}

/// Event listener for security events
pub trait SecurityEventListener: Send + Sync {
    /// Called when an event occurs
    ///
    /// # Arguments
    /// * `event` - The event that occurred
    fn on_event(&self, event: SecurityEvent);
}

/// Closure-based event listener
pub struct CallbackEventListener<F>
where
    F: Fn(SecurityEvent) + Send + Sync,
{
    callback: F,
}

impl<F> CallbackEventListener<F>
where
    F: Fn(SecurityEvent) + Send + Sync,
{
    #[must_use]
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> SecurityEventListener for CallbackEventListener<F>
where
    F: Fn(SecurityEvent) + Send + Sync,
{
    fn on_event(&self, event: SecurityEvent) {
        (self.callback)(event);
    }
}

/// Listener forwarding events into a tokio channel
pub struct ChannelEventListener {
    tx: UnboundedSender<SecurityEvent>,
}

impl ChannelEventListener {
    /// Create a listener
    ///
    /// # Returns
    /// The listener and the receiver its events arrive on
    pub fn new() -> (Self, UnboundedReceiver<SecurityEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl SecurityEventListener for ChannelEventListener {
    fn on_event(&self, event: SecurityEvent) {
        // the receiver may be gone
        let _ = self.tx.send(event);
    }
}
