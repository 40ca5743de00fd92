//! Adding-node state machine
//!
//! Controller side of secure inclusion: ask the joining node for its
//! schemes, hand it the network key under the bootstrap key, wait for the
//! verification and, when the new node is a controller too, run scheme
//! inheritance.

use crate::events::{SecurityEvent, SendOrigin};
use crate::resources::{Resources, TokenOwner};
use crate::state::AddingState;
use crate::timer::TimerKind;
use crate::tx::{TxMachine, TxRequest};
use std::time::Duration;
use zeroize::Zeroize;
use zwave_core::{
    COMMAND_CLASS_SECURITY, NodeId, SCHEMES_SUPPORTED, SecurityCommand, ZwError, ZwResult,
    offers_scheme_0,
};
use zwave_security::KeySlot;

/// Input of the adding-node machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddingNodeEvent {
    /// Start securing a freshly added node
    Start {
        node: NodeId,
        /// Whether the new node is a controller
        is_controller: bool,
        /// Wait before sending the scheme request
        delay: Option<Duration>,
    },
    /// Scheme report from the joining node
    SchemeReport {
        node: NodeId,
        schemes: u8,
        /// Whether the report arrived encapsulated
        secured: bool,
    },
    /// Joining node proved it holds the network key
    NetworkKeyVerify { node: NodeId },
    /// Step timer fired
    Timeout,
}

/// Adding-node state machine
#[derive(Debug, Default)]
pub struct AddingNodeMachine {
    state: AddingState,
    node: Option<NodeId>,
    node_is_controller: bool,
}

impl AddingNodeMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AddingState {
        self.state
    }

    /// Node being added
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    fn transition(&mut self, new_state: AddingState) -> ZwResult<()> {
        self.state.validate_transition(new_state)?;
        log::debug!("Adding node: {} -> {}", self.state, new_state);
        self.state = new_state;
        Ok(())
    }

    fn check_node(&self, src: NodeId) -> ZwResult<()> {
        if self.node == Some(src) {
            Ok(())
        } else {
            Err(ZwError::NodeNotFound(src))
        }
    }

    /// Feed one event
    ///
    /// # Errors
    /// - `KeyMissing` when starting without a network key
    /// - `InvalidState` for an event the current state does not expect
    /// - `NodeNotFound` for traffic from a node other than the one being added
    ///
    /// Handshake failures end the handshake and are reported through
    /// `AddNodeCompleted`.
    pub fn handle(
        &mut self,
        res: &mut Resources,
        tx: &mut TxMachine,
        event: AddingNodeEvent,
    ) -> ZwResult<()> {
        match (self.state, event) {
            (
                AddingState::Idle,
                AddingNodeEvent::Start {
                    node,
                    is_controller,
                    delay,
                },
            ) => {
                if !res.keys.has_network_key() {
                    return Err(ZwError::KeyMissing);
                }
                self.node = Some(node);
                self.node_is_controller = is_controller;
                match delay.filter(|d| !d.is_zero()) {
                    Some(delay) => {
                        log::debug!("Securing node {} in {:?}", node, delay);
                        res.arm(TimerKind::AddNode, delay);
                        self.transition(AddingState::Delayed)
                    }
                    None => self.request_scheme(res, node),
                }
            }

            (AddingState::Delayed, AddingNodeEvent::Timeout) => match self.node {
                Some(node) => self.request_scheme(res, node),
                None => Err(ZwError::InvalidState("No node to add".to_string())),
            },

            (
                AddingState::WaitScheme,
                AddingNodeEvent::SchemeReport {
                    node,
                    schemes,
                    secured: false,
                },
            ) => {
                self.check_node(node)?;
                if !offers_scheme_0(schemes) {
                    self.fail(res, ZwError::SecScheme(schemes));
                    return Ok(());
                }

                let mut payload = Vec::with_capacity(18);
                payload.extend_from_slice(&SecurityCommand::NetworkKeySet.header());
                match res.keys.network_key() {
                    Some(key) => payload.extend_from_slice(key.as_bytes()),
                    None => {
                        self.fail(res, ZwError::KeyMissing);
                        return Ok(());
                    }
                }
                let request =
                    TxRequest::new(node, &payload, KeySlot::Bootstrap, SendOrigin::AddingNode);
                payload.zeroize();

                match request.and_then(|r| tx.submit(res, r)) {
                    Ok(_) => {
                        log::info!("Network key sent to node {}", node);
                        res.arm(TimerKind::AddNode, res.config.inclusion_timeout());
                        self.transition(AddingState::WaitVerify)
                    }
                    Err(e) => {
                        self.fail(res, e);
                        Ok(())
                    }
                }
            }

            (AddingState::WaitVerify, AddingNodeEvent::NetworkKeyVerify { node }) => {
                self.check_node(node)?;
                log::info!("Node {} verified the network key", node);
                if !self.node_is_controller {
                    self.succeed(res);
                    return Ok(());
                }

                let inherit = TxRequest::new(
                    node,
                    &[
                        COMMAND_CLASS_SECURITY,
                        SecurityCommand::SchemeInherit.id(),
                        SCHEMES_SUPPORTED,
                    ],
                    KeySlot::Network,
                    SendOrigin::AddingNode,
                )?;
                match tx.submit(res, inherit) {
                    Ok(_) => {
                        res.arm(TimerKind::AddNode, res.config.inclusion_timeout());
                        self.transition(AddingState::WaitInheritReport)
                    }
                    Err(e) => {
                        self.fail(res, e);
                        Ok(())
                    }
                }
            }

            (
                AddingState::WaitInheritReport,
                AddingNodeEvent::SchemeReport {
                    node,
                    schemes,
                    secured: true,
                },
            ) => {
                self.check_node(node)?;
                if offers_scheme_0(schemes) {
                    self.succeed(res);
                } else {
                    self.fail(res, ZwError::SecScheme(schemes));
                }
                Ok(())
            }

            (AddingState::Idle, AddingNodeEvent::Timeout) => Ok(()),
            (_, AddingNodeEvent::Timeout) => {
                res.stats.increment_timeouts();
                self.fail(res, ZwError::Timeout);
                Ok(())
            }

            (state, event) => Err(ZwError::InvalidState(format!(
                "Adding node in {} cannot handle {:?}",
                state, event
            ))),
        }
    }

    fn request_scheme(&mut self, res: &mut Resources, node: NodeId) -> ZwResult<()> {
        let get = [
            COMMAND_CLASS_SECURITY,
            SecurityCommand::SchemeGet.id(),
            SCHEMES_SUPPORTED,
        ];
        res.transmit(node, &get, TokenOwner::AddingNode);
        res.arm(TimerKind::AddNode, res.config.inclusion_timeout());
        log::info!("Secure add of node {} started", node);
        self.transition(AddingState::WaitScheme)
    }

    /// Outcome of a frame or secure send this machine issued
    pub fn on_send_result(&mut self, res: &mut Resources, result: ZwResult<()>) {
        if let Err(e) = result {
            if !self.state.is_idle() {
                self.fail(res, e);
            }
        }
    }

    fn succeed(&mut self, res: &mut Resources) {
        self.finish(res, Ok(()));
    }

    fn fail(&mut self, res: &mut Resources, error: ZwError) {
        log::error!("Secure add failed in {}: {}", self.state, error);
        self.finish(res, Err(error));
    }

    fn finish(&mut self, res: &mut Resources, result: ZwResult<()>) {
        res.stop(TimerKind::AddNode);
        self.state = AddingState::Idle;
        match self.node.take() {
            Some(node) => {
                if result.is_ok() {
                    log::info!("Node {} added securely", node);
                }
                res.notify(SecurityEvent::AddNodeCompleted { node, result });
            }
            None => log::warn!("Adding-node handshake finished without a node"),
        }
    }
}
