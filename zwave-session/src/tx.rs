//! Transmission state machine
//!
//! Turns queued OPPs into a nonce request, one or two secured frames and a
//! completion report. One destination is served at a time; further requests
//! wait in a FIFO whose capacity includes the request in flight.

use crate::events::SendOrigin;
use crate::resources::{Completion, Resources, TokenOwner};
use crate::state::TxState;
use crate::timer::TimerKind;
use std::collections::VecDeque;
use zwave_core::{
    MAX_FRAGMENT_DATA, MAX_OPP_LEN, NodeId, Opp, SecurityCommand, TxStatus, TxToken, ZwError,
    ZwResult,
};
use zwave_security::{FragmentPlan, KeySlot, Nonce, split_opp};

/// Accepted secure send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Queued; the result arrives as a `SendCompleted` event
    Queued,
}

/// A secure send waiting for or under transmission
#[derive(Debug, Clone)]
pub struct TxRequest {
    pub node: NodeId,
    pub opp: Opp,
    pub slot: KeySlot,
    pub origin: SendOrigin,
}

impl TxRequest {
    /// Build a request, checking the payload size
    ///
    /// # Errors
    /// `TooSmall` for an empty payload, `TooLarge` beyond two fragments.
    pub fn new(node: NodeId, payload: &[u8], slot: KeySlot, origin: SendOrigin) -> ZwResult<Self> {
        if payload.is_empty() {
            return Err(ZwError::TooSmall { len: 0, min: 1 });
        }
        if payload.len() > MAX_OPP_LEN {
            return Err(ZwError::TooLarge {
                len: payload.len(),
                max: MAX_OPP_LEN,
            });
        }
        Ok(Self {
            node,
            opp: Opp::from_slice(payload)?,
            slot,
            origin,
        })
    }
}

#[derive(Debug)]
struct Active {
    request: TxRequest,
    plan: FragmentPlan,
    /// Fragments already handed to the transport
    sent: usize,
    /// Token whose transmit status is awaited
    awaiting: Option<TxToken>,
}

impl Active {
    fn fragment_count(&self) -> usize {
        if self.plan.second.is_some() { 2 } else { 1 }
    }

    fn has_unsent_fragment(&self) -> bool {
        self.sent < self.fragment_count()
    }
}

/// Transmission state machine
#[derive(Debug)]
pub struct TxMachine {
    state: TxState,
    active: Option<Active>,
    queue: VecDeque<TxRequest>,
    capacity: usize,
}

impl TxMachine {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: TxState::Idle,
            active: None,
            queue: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Destination currently served
    pub fn active_node(&self) -> Option<NodeId> {
        self.active.as_ref().map(|a| a.request.node)
    }

    /// Requests accepted and not yet completed, in-flight one included
    pub fn pending(&self) -> usize {
        self.queue.len() + usize::from(self.active.is_some())
    }

    fn transition(&mut self, new_state: TxState) {
        if let Err(e) = self.state.validate_transition(new_state) {
            log::error!("{}", e);
        }
        log::debug!("Tx: {} -> {}", self.state, new_state);
        self.state = new_state;
    }

    /// Accept a secure send
    ///
    /// # Errors
    /// `QueueFull` when `capacity` requests are already pending.
    pub fn submit(&mut self, res: &mut Resources, request: TxRequest) -> ZwResult<SendOutcome> {
        if self.pending() >= self.capacity {
            res.stats.increment_queue_full();
            log::warn!(
                "Secure send to node {} refused: queue full ({} pending)",
                request.node,
                self.pending()
            );
            return Err(ZwError::QueueFull);
        }
        log::debug!(
            "Queued {} byte secure send to node {} ({})",
            request.opp.len(),
            request.node,
            request.origin
        );
        self.queue.push_back(request);
        if self.active.is_none() {
            self.start_next(res);
        }
        Ok(SendOutcome::Queued)
    }

    /// Start the next queued request, completing any that cannot start
    fn start_next(&mut self, res: &mut Resources) {
        while self.active.is_none() {
            let Some(request) = self.queue.pop_front() else {
                self.transition(TxState::Idle);
                return;
            };

            let counter = if request.opp.len() > MAX_FRAGMENT_DATA {
                res.framer.next_sequence(request.node)
            } else {
                0
            };
            let plan = match split_opp(&request.opp, counter) {
                Ok(plan) => plan,
                Err(e) => {
                    Self::report(res, &request, Err(e));
                    continue;
                }
            };

            // every request runs on a nonce it asked for
            if res.nonces.discard_external(request.node) {
                log::trace!("Dropped leftover nonce from node {}", request.node);
            }
            let token = res.transmit(
                request.node,
                &SecurityCommand::NonceGet.header(),
                TokenOwner::Tx,
            );
            res.arm(TimerKind::NonceRequest, res.config.nonce_request_timeout());
            self.active = Some(Active {
                request,
                plan,
                sent: 0,
                awaiting: Some(token),
            });
            self.transition(TxState::WaitNonceGetTxStatus);
        }
    }

    /// Transmit status of a frame sent by this machine
    pub fn on_tx_status(&mut self, res: &mut Resources, token: TxToken, status: TxStatus) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.awaiting != Some(token) {
            log::trace!("Ignoring stale transmit status for {}", token);
            return;
        }
        active.awaiting = None;
        let node = active.request.node;
        let more = active.has_unsent_fragment();

        if !status.is_ok() {
            res.stats.increment_transmit_failures();
            log::warn!("Transmit to node {} failed in {}: {:?}", node, self.state, status);
            self.finish(res, Err(ZwError::Transmit));
            return;
        }

        match self.state {
            TxState::WaitNonceGetTxStatus | TxState::WaitSppTxStatus if more => {
                if res.nonces.has_external(node, res.now) {
                    self.send_fragment(res);
                } else {
                    self.transition(TxState::WaitExternalNonce);
                }
            }
            TxState::WaitSppTxStatus => self.finish(res, Ok(())),
            state => log::debug!("Transmit status for {} in state {}", token, state),
        }
    }

    /// Nonce report from `src`
    ///
    /// # Errors
    /// `NodeNotFound` if `src` is not the destination being served.
    pub fn on_nonce_report(&mut self, res: &mut Resources, src: NodeId, nonce: Nonce) -> ZwResult<()> {
        if self.active_node() != Some(src) {
            log::debug!("Unsolicited nonce report from node {}", src);
            return Err(ZwError::NodeNotFound(src));
        }
        let expects_nonce = match self.state {
            TxState::WaitNonceGetTxStatus | TxState::WaitExternalNonce => true,
            TxState::WaitSppTxStatus => self
                .active
                .as_ref()
                .is_some_and(|active| active.has_unsent_fragment()),
            TxState::Idle => false,
        };
        if !expects_nonce {
            log::debug!("Nonce report from node {} ignored in {}", src, self.state);
            return Ok(());
        }
        if !res.nonces.put_external(nonce, src, res.now) {
            log::trace!("Duplicate nonce report from node {}", src);
            return Ok(());
        }
        if self.state == TxState::WaitExternalNonce {
            self.send_fragment(res);
        }
        Ok(())
    }

    /// Nonce request timer fired
    pub fn on_timeout(&mut self, res: &mut Resources) {
        if self.active.is_none() {
            return;
        }
        res.stats.increment_timeouts();
        log::warn!(
            "No nonce from node {:?} within {:?}",
            self.active_node(),
            res.config.nonce_request_timeout()
        );
        self.finish(res, Err(ZwError::Timeout));
    }

    fn send_fragment(&mut self, res: &mut Resources) {
        res.stop(TimerKind::NonceRequest);
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let node = active.request.node;

        let nonce = match res.nonces.get_external(node, res.now) {
            Ok(nonce) => nonce,
            Err(e) => {
                self.finish(res, Err(e));
                return;
            }
        };
        let fragment = match (active.sent, active.plan.second) {
            (0, _) => active.plan.first,
            (_, Some(second)) => second,
            (_, None) => {
                self.finish(res, Ok(()));
                return;
            }
        };

        let frame = match res.keys.get(active.request.slot) {
            Ok(keys) => res
                .framer
                .packet(keys, &mut res.prng, &fragment, &nonce, res.own, node),
            Err(e) => Err(e),
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                self.finish(res, Err(e));
                return;
            }
        };

        active.sent += 1;
        if active.has_unsent_fragment() {
            // the first frame carries the nonce request for the second
            res.arm(TimerKind::NonceRequest, res.config.nonce_request_timeout());
        }
        active.awaiting = Some(res.transmit(node, &frame, TokenOwner::Tx));
        res.stats.increment_frames_secured();
        self.transition(TxState::WaitSppTxStatus);
    }

    fn finish(&mut self, res: &mut Resources, result: ZwResult<()>) {
        res.stop(TimerKind::NonceRequest);
        if let Some(active) = self.active.take() {
            Self::report(res, &active.request, result);
        }
        self.transition(TxState::Idle);
        self.start_next(res);
    }

    fn report(res: &mut Resources, request: &TxRequest, result: ZwResult<()>) {
        match &result {
            Ok(()) => log::debug!("Secure send to node {} completed", request.node),
            Err(e) => log::warn!("Secure send to node {} failed: {}", request.node, e),
        }
        res.complete(Completion {
            node: request.node,
            origin: request.origin,
            result,
        });
    }
}
