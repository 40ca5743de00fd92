//! Included-node state machine
//!
//! Drives the joining side of secure inclusion: answer the controller's
//! scheme request, accept the network key under the bootstrap key, prove
//! possession of it and, for controllers, answer scheme inheritance.

use crate::events::{SecurityEvent, SendOrigin};
use crate::resources::{Resources, TokenOwner};
use crate::state::IncludedState;
use crate::timer::TimerKind;
use crate::tx::{TxMachine, TxRequest};
use zwave_core::{
    COMMAND_CLASS_SECURITY, NodeId, SCHEMES_SUPPORTED, SecurityCommand, ZwError, ZwResult,
    offers_scheme_0,
};
use zwave_security::{KeySlot, NetworkKey};

/// Input of the included-node machine
#[derive(Debug)]
pub enum IncludedNodeEvent {
    /// Plain inclusion finished; secure inclusion may start
    UnsecuredInclusionDone,
    /// Controller asked for supported schemes
    SchemeGet { controller: NodeId, schemes: u8 },
    /// Controller delivered the network key
    NetworkKeySet {
        controller: NodeId,
        key: NetworkKey,
        /// Key set the carrying frame was authenticated with
        slot: KeySlot,
    },
    /// Controller asked to inherit its schemes
    SchemeInherit { controller: NodeId, schemes: u8 },
    /// Step timer fired
    Timeout,
}

/// Included-node state machine
#[derive(Debug, Default)]
pub struct IncludedNodeMachine {
    state: IncludedState,
    controller: Option<NodeId>,
}

impl IncludedNodeMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> IncludedState {
        self.state
    }

    /// Controller running the handshake, once known
    pub fn controller(&self) -> Option<NodeId> {
        self.controller
    }

    fn transition(&mut self, new_state: IncludedState) -> ZwResult<()> {
        self.state.validate_transition(new_state)?;
        log::debug!("Included node: {} -> {}", self.state, new_state);
        self.state = new_state;
        Ok(())
    }

    fn check_controller(&self, src: NodeId) -> ZwResult<()> {
        match self.controller {
            Some(controller) if controller != src => Err(ZwError::NodeNotFound(src)),
            _ => Ok(()),
        }
    }

    /// Feed one event
    ///
    /// # Errors
    /// - `InvalidState` for an event the current state does not expect
    /// - `NodeNotFound` for handshake traffic from another controller
    ///
    /// Handshake failures are not returned here; they end the handshake and
    /// are reported through `InclusionCompleted`.
    pub fn handle(
        &mut self,
        res: &mut Resources,
        tx: &mut TxMachine,
        event: IncludedNodeEvent,
    ) -> ZwResult<()> {
        match (self.state, event) {
            (IncludedState::Idle, IncludedNodeEvent::UnsecuredInclusionDone) => {
                self.controller = None;
                res.keys.clear_network();
                res.arm(TimerKind::Inclusion, res.config.inclusion_timeout());
                log::info!("Secure inclusion started, waiting for scheme get");
                self.transition(IncludedState::WaitSchemeGet)
            }

            (
                IncludedState::WaitSchemeGet,
                IncludedNodeEvent::SchemeGet {
                    controller,
                    schemes,
                },
            ) => {
                self.controller = Some(controller);
                if !offers_scheme_0(schemes) {
                    self.fail(res, ZwError::SecScheme(schemes));
                    return Ok(());
                }
                let report = [
                    COMMAND_CLASS_SECURITY,
                    SecurityCommand::SchemeReport.id(),
                    SCHEMES_SUPPORTED,
                ];
                res.transmit(controller, &report, TokenOwner::IncludedNode);
                res.arm(TimerKind::Inclusion, res.config.inclusion_timeout());
                self.transition(IncludedState::WaitNetworkKey)
            }

            (
                IncludedState::WaitNetworkKey,
                IncludedNodeEvent::NetworkKeySet {
                    controller,
                    key,
                    slot,
                },
            ) => {
                self.check_controller(controller)?;
                if slot != KeySlot::Bootstrap {
                    return Err(ZwError::InvalidState(
                        "Network key must arrive under the bootstrap key".to_string(),
                    ));
                }
                res.install_network_key(key);
                log::info!("Network key received from controller {}", controller);

                let verify = TxRequest::new(
                    controller,
                    &SecurityCommand::NetworkKeyVerify.header(),
                    KeySlot::Network,
                    SendOrigin::IncludedNode,
                )?;
                if let Err(e) = tx.submit(res, verify) {
                    self.fail(res, e);
                    return Ok(());
                }

                if res.config.is_controller {
                    res.arm(TimerKind::Inclusion, res.config.inclusion_timeout());
                    self.transition(IncludedState::WaitSchemeInherit)
                } else {
                    self.succeed(res);
                    Ok(())
                }
            }

            (
                IncludedState::WaitSchemeInherit,
                IncludedNodeEvent::SchemeInherit {
                    controller,
                    schemes,
                },
            ) => {
                self.check_controller(controller)?;
                if !offers_scheme_0(schemes) {
                    self.fail(res, ZwError::SecScheme(schemes));
                    return Ok(());
                }
                let report = TxRequest::new(
                    controller,
                    &[
                        COMMAND_CLASS_SECURITY,
                        SecurityCommand::SchemeReport.id(),
                        SCHEMES_SUPPORTED,
                    ],
                    KeySlot::Network,
                    SendOrigin::IncludedNode,
                )?;
                match tx.submit(res, report) {
                    Ok(_) => self.succeed(res),
                    Err(e) => self.fail(res, e),
                }
                Ok(())
            }

            (IncludedState::Idle, IncludedNodeEvent::Timeout) => Ok(()),
            (_, IncludedNodeEvent::Timeout) => {
                res.stats.increment_timeouts();
                self.fail(res, ZwError::Timeout);
                Ok(())
            }

            (state, event) => Err(ZwError::InvalidState(format!(
                "Included node in {} cannot handle {:?}",
                state, event
            ))),
        }
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
        res.stop(TimerKind::Inclusion);
        log::info!("Secure inclusion completed");
        self.state = IncludedState::Idle;
        res.notify(SecurityEvent::InclusionCompleted {
            controller: self.controller,
            result: Ok(()),
        });
    }

    fn fail(&mut self, res: &mut Resources, error: ZwError) {
        res.stop(TimerKind::Inclusion);
        log::error!("Secure inclusion failed in {}: {}", self.state, error);
        self.state = IncludedState::Idle;
        res.notify(SecurityEvent::InclusionCompleted {
            controller: self.controller,
            result: Err(error),
        });
    }
}
