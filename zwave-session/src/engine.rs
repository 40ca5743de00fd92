//! Lock-free core of a security context
//!
//! [`Engine`] owns the shared resources and the three state machines and
//! routes every input (inbound frame, transmit status, timer, API call) to
//! them. It never blocks and never calls out: frames, events and timer
//! changes are collected as [`Effects`] for the caller to carry out.

use crate::adding::{AddingNodeEvent, AddingNodeMachine};
use crate::config::SecurityConfig;
use crate::events::{SecurityEvent, SendOrigin};
use crate::inclusion::{IncludedNodeEvent, IncludedNodeMachine};
use crate::resources::{Effects, Resources, TokenOwner};
use crate::state::{AddingState, IncludedState, TxState};
use crate::statistics::SecurityStatistics;
use crate::timer::TimerKind;
use crate::tx::{SendOutcome, TxMachine, TxRequest};
use zeroize::Zeroize;
use zwave_core::{
    COMMAND_CLASS_SECURITY, MAX_OPP_LEN, NodeId, Opp, SecurityCommand, TxStatus, TxToken,
    ZwError, ZwResult,
};
use zwave_security::{
    Depacketed, KeySlot, NetworkKey, Nonce, NonceState, Prng, constants::NONCE_SIZE,
};

/// Result of handling an inbound Security Command Class frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Consumed by the security layer
    Handled,
    /// Decrypted command for the application dispatcher
    Command(Opp),
    /// First half of a split message buffered
    FragmentPending,
}

/// Byte at `index` of a handshake frame
fn field(frame: &[u8], index: usize) -> ZwResult<u8> {
    frame.get(index).copied().ok_or(ZwError::TooSmall {
        len: frame.len(),
        min: index + 1,
    })
}

pub struct Engine {
    res: Resources,
    tx: TxMachine,
    included: IncludedNodeMachine,
    adding: AddingNodeMachine,
}

impl Engine {
    /// Create an engine
    ///
    /// # Errors
    /// Returns `InvalidData` for an invalid configuration.
    pub fn new(config: SecurityConfig, prng: Prng) -> ZwResult<Self> {
        config.validate()?;
        let own = config.own_node()?;
        let tx = TxMachine::new(config.queue_capacity);
        Ok(Self {
            res: Resources::new(config, own, prng),
            tx,
            included: IncludedNodeMachine::new(),
            adding: AddingNodeMachine::new(),
        })
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.res.config
    }

    pub fn node_id(&self) -> NodeId {
        self.res.own
    }

    pub fn tx_state(&self) -> TxState {
        self.tx.state()
    }

    pub fn included_state(&self) -> IncludedState {
        self.included.state()
    }

    pub fn adding_state(&self) -> AddingState {
        self.adding.state()
    }

    /// Secure sends accepted and not yet completed
    pub fn pending_sends(&self) -> usize {
        self.tx.pending()
    }

    pub fn statistics(&self) -> SecurityStatistics {
        self.res.stats.clone()
    }

    pub fn clear_statistics(&mut self) {
        self.res.stats.clear();
    }

    /// Advance the clock nonce lifetimes are measured against
    pub fn set_now(&mut self, now: u64) {
        self.res.now = now;
    }

    pub fn take_effects(&mut self) -> Effects {
        self.res.take_effects()
    }

    /// Change the own node id (assigned during plain inclusion)
    pub fn set_node_id(&mut self, id: NodeId) {
        log::info!("Own node id set to {}", id);
        self.res.own = id;
        self.res.config.node_id = id.as_u8();
    }

    pub fn set_network_key(&mut self, key: NetworkKey) {
        self.res.install_network_key(key);
        log::info!("Network key installed");
    }

    /// Draw a network key from the PRNG and install it
    pub fn generate_network_key(&mut self) -> ZwResult<NetworkKey> {
        let mut bytes = [0u8; 16];
        self.res.prng.generate(&mut bytes[..NONCE_SIZE])?;
        self.res.prng.generate(&mut bytes[NONCE_SIZE..])?;
        let key = NetworkKey::new(bytes);
        bytes.zeroize();
        self.set_network_key(key.clone());
        Ok(key)
    }

    pub fn network_key_installed(&self) -> bool {
        self.res.keys.has_network_key()
    }

    /// Queue an application payload for secure transmission
    ///
    /// # Errors
    /// - `KeyMissing` before a network key is installed
    /// - `TooSmall` / `TooLarge` for payloads outside 1..=52 bytes
    /// - `QueueFull` when the queue is at capacity
    pub fn secure_send(&mut self, node: NodeId, payload: &[u8]) -> ZwResult<SendOutcome> {
        self.submit(node, payload, SendOrigin::Application)
    }

    /// Ask `node` for the command classes it supports securely
    pub fn request_supported_commands(&mut self, node: NodeId) -> ZwResult<SendOutcome> {
        self.submit(
            node,
            &SecurityCommand::CommandsSupportedGet.header(),
            SendOrigin::CommandsSupported,
        )
    }

    fn submit(&mut self, node: NodeId, payload: &[u8], origin: SendOrigin) -> ZwResult<SendOutcome> {
        if !self.res.keys.has_network_key() {
            return Err(ZwError::KeyMissing);
        }
        let request = TxRequest::new(node, payload, KeySlot::Network, origin)?;
        let outcome = self.tx.submit(&mut self.res, request);
        self.route_completions();
        outcome
    }

    /// Transmit status reported by the transport
    pub fn on_tx_complete(&mut self, token: TxToken, status: TxStatus) {
        let Some(owner) = self.res.take_token(token) else {
            log::trace!("Transmit status for unknown {}", token);
            return;
        };
        if !status.is_ok() && owner != TokenOwner::Tx {
            self.res.stats.increment_transmit_failures();
        }

        match owner {
            TokenOwner::Tx => self.tx.on_tx_status(&mut self.res, token, status),
            TokenOwner::NonceReport { slot, tag } => {
                let current = self.res.nonces.internal(slot).map(|n| n.tag());
                if current != Some(tag) {
                    log::trace!("Nonce 0x{:02X} gone before its report completed", tag);
                } else if status.is_ok() {
                    self.res.nonces.set_internal_state(slot, NonceState::Valid);
                } else {
                    log::warn!("Nonce report {} failed: {:?}", token, status);
                    self.res.nonces.consume_internal(slot);
                }
            }
            TokenOwner::IncludedNode if !status.is_ok() => {
                self.included
                    .on_send_result(&mut self.res, Err(ZwError::Transmit));
            }
            TokenOwner::AddingNode if !status.is_ok() => {
                self.adding
                    .on_send_result(&mut self.res, Err(ZwError::Transmit));
            }
            TokenOwner::IncludedNode | TokenOwner::AddingNode => {}
        }
        self.route_completions();
    }

    /// Nonce received from `src`
    ///
    /// # Errors
    /// `NodeNotFound` unless a secure send to `src` is in progress.
    pub fn on_nonce_report(&mut self, src: NodeId, nonce: Nonce) -> ZwResult<()> {
        let result = self.tx.on_nonce_report(&mut self.res, src, nonce);
        self.route_completions();
        result
    }

    /// Inject an included-node event
    pub fn included_node_event(&mut self, event: IncludedNodeEvent) -> ZwResult<()> {
        let result = self.included.handle(&mut self.res, &mut self.tx, event);
        self.route_completions();
        result
    }

    /// Inject an adding-node event
    pub fn adding_node_event(&mut self, event: AddingNodeEvent) -> ZwResult<()> {
        let result = self.adding.handle(&mut self.res, &mut self.tx, event);
        self.route_completions();
        result
    }

    /// A timer armed through [`Effects`] fired
    pub fn on_timer(&mut self, kind: TimerKind) {
        match kind {
            TimerKind::NonceRequest => self.tx.on_timeout(&mut self.res),
            TimerKind::Inclusion => {
                if let Err(e) = self
                    .included
                    .handle(&mut self.res, &mut self.tx, IncludedNodeEvent::Timeout)
                {
                    log::debug!("Inclusion timer: {}", e);
                }
            }
            TimerKind::AddNode => {
                if let Err(e) = self
                    .adding
                    .handle(&mut self.res, &mut self.tx, AddingNodeEvent::Timeout)
                {
                    log::debug!("Add-node timer: {}", e);
                }
            }
        }
        self.route_completions();
    }

    /// Drop the external nonce once it aged out
    pub fn expire_external(&mut self, now: u64) {
        self.res.now = now;
        if self.res.nonces.expire_external(now) {
            log::trace!("External nonce expired at tick {}", now);
        }
    }

    /// Free expired internal nonces
    pub fn sweep_nonces(&mut self, now: u64) {
        self.res.now = now;
        let swept = self.res.nonces.sweep_internal(now);
        if swept > 0 {
            log::trace!("Swept {} expired nonces at tick {}", swept, now);
        }
    }

    /// Key set inbound secured frames are checked against
    fn decode_slot(&self) -> KeySlot {
        if self.included.state().uses_bootstrap_key() {
            KeySlot::Bootstrap
        } else {
            KeySlot::Network
        }
    }

    /// Authenticate and decrypt a secured frame from `src`
    ///
    /// # Errors
    /// Rejections (`Auth`, `SeqNumber`, `NonceNotFound`, `Expired`, length
    /// errors) leave nonce and sequence state untouched and produce no reply.
    pub fn depacket(&mut self, src: NodeId, frame: &[u8]) -> ZwResult<Depacketed> {
        let slot = self.decode_slot();
        self.depacket_with(src, frame, slot)
    }

    fn depacket_with(&mut self, src: NodeId, frame: &[u8], slot: KeySlot) -> ZwResult<Depacketed> {
        let res = &mut self.res;
        let result = match res.keys.get(slot) {
            Ok(keys) => res
                .framer
                .depacket(keys, &mut res.nonces, src, res.own, frame, res.now),
            Err(e) => Err(e),
        };
        match &result {
            Ok(_) => res.stats.increment_frames_decoded(),
            Err(e) => {
                res.stats.record_rejection(e);
                log::warn!("Dropped secured frame from node {}: {}", src, e);
            }
        }
        result
    }

    /// Answer a nonce request from `src`
    fn serve_nonce(&mut self, src: NodeId) -> ZwResult<()> {
        let res = &mut self.res;
        res.nonces.remove_internal(src);
        let slot = res
            .nonces
            .gen_internal(&mut res.prng, src, NonceState::Init, res.now)?;
        let (mut bytes, tag) = match res.nonces.internal(slot) {
            Some(nonce) => (*nonce.bytes(), nonce.tag()),
            None => return Err(ZwError::Memory("generated nonce vanished")),
        };

        let mut frame = [0u8; 2 + NONCE_SIZE];
        frame[..2].copy_from_slice(&SecurityCommand::NonceReport.header());
        frame[2..].copy_from_slice(&bytes);
        res.transmit(src, &frame, TokenOwner::NonceReport { slot, tag });
        frame.zeroize();
        bytes.zeroize();

        res.stats.increment_nonce_requests_served();
        log::trace!("Served nonce 0x{:02X} to node {}", tag, src);
        Ok(())
    }

    /// Handle an inbound Security Command Class frame from `src`
    ///
    /// # Errors
    /// - frame rejections from [`Engine::depacket`]
    /// - `InvalidData` for handshake commands that must be encapsulated
    /// - state machine errors for unexpected handshake traffic
    pub fn handle_frame(&mut self, src: NodeId, frame: &[u8]) -> ZwResult<Inbound> {
        let command = SecurityCommand::of_frame(frame)?;
        let result = match command {
            SecurityCommand::NonceGet => self.serve_nonce(src).map(|_| Inbound::Handled),

            SecurityCommand::NonceReport => {
                let nonce: Nonce = frame
                    .get(2..2 + NONCE_SIZE)
                    .and_then(|b| b.try_into().ok())
                    .ok_or(ZwError::TooSmall {
                        len: frame.len(),
                        min: 2 + NONCE_SIZE,
                    })?;
                self.tx
                    .on_nonce_report(&mut self.res, src, nonce)
                    .map(|_| Inbound::Handled)
            }

            command if command.is_encapsulation() => {
                let slot = self.decode_slot();
                let depacketed = self.depacket_with(src, frame, slot)?;
                if command == SecurityCommand::MessageEncapsulationNonceGet {
                    if let Err(e) = self.serve_nonce(src) {
                        log::warn!("Cannot answer nonce request from node {}: {}", src, e);
                    }
                }
                match depacketed {
                    Depacketed::FragmentPending => Ok(Inbound::FragmentPending),
                    Depacketed::Complete(opp) => self.route_opp(src, opp, slot),
                }
            }

            SecurityCommand::SchemeGet => {
                let schemes = field(frame, 2)?;
                self.included
                    .handle(
                        &mut self.res,
                        &mut self.tx,
                        IncludedNodeEvent::SchemeGet {
                            controller: src,
                            schemes,
                        },
                    )
                    .map(|_| Inbound::Handled)
            }

            SecurityCommand::SchemeReport => {
                let schemes = field(frame, 2)?;
                self.adding
                    .handle(
                        &mut self.res,
                        &mut self.tx,
                        AddingNodeEvent::SchemeReport {
                            node: src,
                            schemes,
                            secured: false,
                        },
                    )
                    .map(|_| Inbound::Handled)
            }

            other => Err(ZwError::InvalidData(format!(
                "{:?} from node {} must be encapsulated",
                other, src
            ))),
        };
        self.route_completions();
        result
    }

    /// Route a decrypted payload
    fn route_opp(&mut self, src: NodeId, opp: Opp, slot: KeySlot) -> ZwResult<Inbound> {
        if opp.first() != Some(&COMMAND_CLASS_SECURITY) {
            return Ok(Inbound::Command(opp));
        }

        match SecurityCommand::of_frame(&opp)? {
            SecurityCommand::NetworkKeySet => {
                let key = NetworkKey::from_slice(opp.get(2..).unwrap_or_default())?;
                self.included.handle(
                    &mut self.res,
                    &mut self.tx,
                    IncludedNodeEvent::NetworkKeySet {
                        controller: src,
                        key,
                        slot,
                    },
                )?;
            }
            SecurityCommand::NetworkKeyVerify => {
                self.adding.handle(
                    &mut self.res,
                    &mut self.tx,
                    AddingNodeEvent::NetworkKeyVerify { node: src },
                )?;
            }
            SecurityCommand::SchemeInherit => {
                let schemes = field(&opp, 2)?;
                self.included.handle(
                    &mut self.res,
                    &mut self.tx,
                    IncludedNodeEvent::SchemeInherit {
                        controller: src,
                        schemes,
                    },
                )?;
            }
            SecurityCommand::SchemeReport => {
                let schemes = field(&opp, 2)?;
                self.adding.handle(
                    &mut self.res,
                    &mut self.tx,
                    AddingNodeEvent::SchemeReport {
                        node: src,
                        schemes,
                        secured: true,
                    },
                )?;
            }
            SecurityCommand::CommandsSupportedGet => {
                let mut report = SecurityCommand::CommandsSupportedReport.header().to_vec();
                // no further reports follow
                report.push(0x00);
                let room = MAX_OPP_LEN - report.len();
                let classes = &self.res.config.secure_command_classes;
                report.extend(classes.iter().take(room));
                let request =
                    TxRequest::new(src, &report, KeySlot::Network, SendOrigin::CommandsSupported)?;
                self.tx.submit(&mut self.res, request)?;
            }
            SecurityCommand::CommandsSupportedReport => {
                let command_classes = opp.get(3..).unwrap_or_default().to_vec();
                log::debug!(
                    "Node {} supports {} command classes securely",
                    src,
                    command_classes.len()
                );
                self.res.notify(SecurityEvent::SupportedCommands {
                    node: src,
                    command_classes,
                });
            }
            other => {
                return Err(ZwError::InvalidData(format!(
                    "Unexpected encapsulated {:?} from node {}",
                    other, src
                )));
            }
        }
        Ok(Inbound::Handled)
    }

    /// Hand finished secure sends to the machines that issued them
    fn route_completions(&mut self) {
        while let Some(completion) = self.res.next_completion() {
            match completion.origin {
                SendOrigin::IncludedNode => self
                    .included
                    .on_send_result(&mut self.res, completion.result),
                SendOrigin::AddingNode => self
                    .adding
                    .on_send_result(&mut self.res, completion.result),
                SendOrigin::Application | SendOrigin::CommandsSupported => {}
            }
        }
    }
}
