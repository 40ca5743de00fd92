//! Resources shared by the state machines of one context
//!
//! State machine steps run against [`Resources`] and record what they want
//! done outside the lock (frames to transmit, events to publish, timers to
//! change) in [`Effects`].

use crate::config::SecurityConfig;
use crate::events::{SecurityEvent, SendOrigin};
use crate::statistics::SecurityStatistics;
use crate::timer::{TimerCommand, TimerKind};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use zwave_core::{NodeId, TxToken, ZwResult};
use zwave_security::{Framer, KeyStore, NetworkKey, NonceManager, Prng};
use zwave_transport::OutboundFrame;

/// What a transmit token belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOwner {
    /// Frame of the transmission machine
    Tx,
    /// Nonce report carrying the internal nonce in `slot`
    NonceReport { slot: usize, tag: u8 },
    /// Unsecured frame of the included-node machine
    IncludedNode,
    /// Unsecured frame of the adding-node machine
    AddingNode,
}

/// Outcome of a finished secure send, for the machine that requested it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub node: NodeId,
    pub origin: SendOrigin,
    pub result: ZwResult<()>,
}

/// Work collected during one step
#[derive(Debug, Default)]
pub struct Effects {
    pub frames: Vec<OutboundFrame>,
    pub events: Vec<SecurityEvent>,
    pub timers: Vec<TimerCommand>,
}

pub struct Resources {
    pub config: SecurityConfig,
    pub own: NodeId,
    pub keys: KeyStore,
    pub prng: Prng,
    pub nonces: NonceManager,
    pub framer: Framer,
    pub stats: SecurityStatistics,
    /// Current tick
    pub now: u64,
    next_token: u64,
    tokens: HashMap<TxToken, TokenOwner>,
    effects: Effects,
    completions: VecDeque<Completion>,
}

impl Resources {
    pub fn new(config: SecurityConfig, own: NodeId, prng: Prng) -> Self {
        let nonces = NonceManager::with_config(
            config.nonce_table_capacity,
            config.internal_nonce_life_ticks,
            config.external_nonce_life_ticks,
        );
        Self {
            config,
            own,
            keys: KeyStore::new(),
            prng,
            nonces,
            framer: Framer::new(),
            stats: SecurityStatistics::new(),
            now: 0,
            next_token: 1,
            tokens: HashMap::new(),
            effects: Effects::default(),
            completions: VecDeque::new(),
        }
    }

    /// Queue a frame for the transport under a fresh token
    pub fn transmit(&mut self, dest: NodeId, frame: &[u8], owner: TokenOwner) -> TxToken {
        let token = TxToken::new(self.next_token);
        self.next_token += 1;
        self.tokens.insert(token, owner);
        self.effects
            .frames
            .push(OutboundFrame::new(dest, frame, token));
        token
    }

    /// Resolve the owner of a completed token; each token resolves once
    pub fn take_token(&mut self, token: TxToken) -> Option<TokenOwner> {
        self.tokens.remove(&token)
    }

    /// Install `key` as the network key
    ///
    /// A split message half-received under the previous key can no longer
    /// complete and is dropped.
    pub fn install_network_key(&mut self, key: NetworkKey) {
        self.keys.install(key);
        self.framer.discard_pending();
        self.notify(SecurityEvent::NetworkKeyInstalled);
    }

    pub fn notify(&mut self, event: SecurityEvent) {
        self.effects.events.push(event);
    }

    pub fn arm(&mut self, kind: TimerKind, delay: Duration) {
        self.effects.timers.push(TimerCommand::Arm(kind, delay));
    }

    pub fn stop(&mut self, kind: TimerKind) {
        self.effects.timers.push(TimerCommand::Stop(kind));
    }

    /// Report a finished secure send
    pub fn complete(&mut self, completion: Completion) {
        self.notify(SecurityEvent::SendCompleted {
            node: completion.node,
            origin: completion.origin,
            result: completion.result.clone(),
        });
        self.completions.push_back(completion);
    }

    pub fn next_completion(&mut self) -> Option<Completion> {
        self.completions.pop_front()
    }

    pub fn take_effects(&mut self) -> Effects {
        std::mem::take(&mut self.effects)
    }
}
