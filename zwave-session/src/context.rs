//! Security context
//!
//! [`SecurityContext`] wraps the [`Engine`] in a mutex and carries out the
//! effects each step records. Timers are armed under the mutex; frames and
//! events are handed out only after it is released.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zwave_session::{SecurityConfig, SecurityContext};
//! use zwave_transport::{ChannelSettings, ChannelTransport};
//!
//! # async fn example() -> zwave_core::ZwResult<()> {
//! let (transport, _frames) = ChannelTransport::new(ChannelSettings::default());
//! let config = SecurityConfig::builder().node_id(1).build()?;
//! let context = SecurityContext::builder(Arc::new(transport))
//!     .config(config)
//!     .build()
//!     .await?;
//! context.generate_network_key()?;
//! # Ok(())
//! # }
//! ```

use crate::adding::AddingNodeEvent;
use crate::config::SecurityConfig;
use crate::engine::{Engine, Inbound};
use crate::events::{SecurityEvent, SecurityEventListener};
use crate::inclusion::IncludedNodeEvent;
use crate::resources::Effects;
use crate::state::{AddingState, IncludedState, TxState};
use crate::statistics::SecurityStatistics;
use crate::ticker::{TickWork, Ticker};
use crate::timer::{TimerCommand, TimerKind, TimerTable};
use crate::tx::SendOutcome;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use zwave_core::{NodeId, TxStatus, TxToken, ZwError, ZwResult};
use zwave_security::{
    Depacketed, EntropySource, NetworkKey, Nonce, Prng, SystemEntropy, UnseededPrng,
};
use zwave_transport::FrameTransport;

struct Inner {
    engine: Engine,
    timers: TimerTable,
}

struct Shared {
    inner: Mutex<Inner>,
    transport: Arc<dyn FrameTransport>,
    listeners: RwLock<Vec<Arc<dyn SecurityEventListener>>>,
    runtime: Handle,
    clock: Arc<AtomicU64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one engine step and carry out its effects
    fn run<R>(self: &Arc<Self>, op: impl FnOnce(&mut Engine) -> R) -> R {
        let (result, effects) = {
            let mut inner = self.lock();
            inner.engine.set_now(self.clock.load(Ordering::Acquire));
            let result = op(&mut inner.engine);
            let effects = inner.engine.take_effects();
            self.apply_timers(&mut inner.timers, &effects.timers);
            (result, effects)
        };
        self.flush(effects);
        result
    }

    fn apply_timers(self: &Arc<Self>, timers: &mut TimerTable, commands: &[TimerCommand]) {
        for command in commands {
            match *command {
                TimerCommand::Arm(kind, delay) => {
                    let weak = Arc::downgrade(self);
                    timers.arm(&self.runtime, kind, delay, move |generation| async move {
                        if let Some(shared) = weak.upgrade() {
                            shared.fire(kind, generation);
                        }
                    });
                }
                TimerCommand::Stop(kind) => timers.stop(kind),
            }
        }
    }

    fn fire(self: &Arc<Self>, kind: TimerKind, generation: u64) {
        let effects = {
            let mut inner = self.lock();
            if !inner.timers.claim(kind, generation) {
                log::trace!("Stale {:?} timer ignored", kind);
                return;
            }
            log::debug!("{:?} timer fired", kind);
            inner.engine.set_now(self.clock.load(Ordering::Acquire));
            inner.engine.on_timer(kind);
            let effects = inner.engine.take_effects();
            self.apply_timers(&mut inner.timers, &effects.timers);
            effects
        };
        self.flush(effects);
    }

    fn tick(&self, work: TickWork) {
        if work.sweep {
            let mut inner = self.lock();
            inner.engine.expire_external(work.tick);
            inner.engine.sweep_nonces(work.tick);
            return;
        }
        let mut inner = match self.inner.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                log::trace!("Context busy, expiry skipped at tick {}", work.tick);
                return;
            }
        };
        inner.engine.expire_external(work.tick);
    }

    /// Publish events, then hand frames to the transport
    fn flush(self: &Arc<Self>, effects: Effects) {
        if !effects.events.is_empty() {
            let listeners = self
                .listeners
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            for event in effects.events {
                log::debug!("{}", event.description());
                for listener in &listeners {
                    listener.on_event(event.clone());
                }
            }
        }

        for out in effects.frames {
            if let Err(e) = self.transport.send_frame(out.dest, &out.frame, out.token) {
                log::warn!("Transport refused {} to node {}: {}", out.token, out.dest, e);
                self.run(|engine| engine.on_tx_complete(out.token, TxStatus::Failed));
            }
        }
    }
}

/// Security layer context of one network connection
///
/// All entry points may be called from any thread; state machine steps run
/// under one mutex and never block on the transport.
pub struct SecurityContext {
    shared: Arc<Shared>,
    ticker: Mutex<Option<Ticker>>,
    closed: AtomicBool,
}

impl SecurityContext {
    /// Start building a context that sends through `transport`
    pub fn builder(transport: Arc<dyn FrameTransport>) -> SecurityContextBuilder {
        SecurityContextBuilder::new(transport)
    }

    fn ensure_open(&self) -> ZwResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ZwError::InvalidState("Security context shut down".to_string()));
        }
        Ok(())
    }

    /// Register an event listener
    pub fn add_listener(&self, listener: Arc<dyn SecurityEventListener>) {
        self.shared
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Queue an application payload for secure transmission
    ///
    /// The outcome is reported through `SecurityEvent::SendCompleted`.
    ///
    /// # Errors
    /// - `KeyMissing` before a network key is installed
    /// - `TooSmall` / `TooLarge` for payloads outside 1..=52 bytes
    /// - `QueueFull` when 8 sends are already pending
    pub fn secure_send(&self, node: NodeId, payload: &[u8]) -> ZwResult<SendOutcome> {
        self.ensure_open()?;
        self.shared.run(|engine| engine.secure_send(node, payload))
    }

    /// Ask `node` which command classes it supports securely
    pub fn request_supported_commands(&self, node: NodeId) -> ZwResult<SendOutcome> {
        self.ensure_open()?;
        self.shared
            .run(|engine| engine.request_supported_commands(node))
    }

    /// Handle an inbound Security Command Class frame from `src`
    pub fn handle_frame(&self, src: NodeId, frame: &[u8]) -> ZwResult<Inbound> {
        self.shared.run(|engine| engine.handle_frame(src, frame))
    }

    /// Authenticate and decrypt a secured frame without further routing
    pub fn depacket(&self, src: NodeId, frame: &[u8]) -> ZwResult<Depacketed> {
        self.shared.run(|engine| engine.depacket(src, frame))
    }

    pub fn on_nonce_report(&self, src: NodeId, nonce: Nonce) -> ZwResult<()> {
        self.shared.run(|engine| engine.on_nonce_report(src, nonce))
    }

    /// Transmit outcome of a frame handed to the transport
    pub fn on_tx_complete(&self, token: TxToken, status: TxStatus) {
        self.shared
            .run(|engine| engine.on_tx_complete(token, status));
    }

    pub fn included_node_event(&self, event: IncludedNodeEvent) -> ZwResult<()> {
        self.shared.run(|engine| engine.included_node_event(event))
    }

    pub fn adding_node_event(&self, event: AddingNodeEvent) -> ZwResult<()> {
        self.shared.run(|engine| engine.adding_node_event(event))
    }

    pub fn set_network_key(&self, key: NetworkKey) {
        self.shared.run(|engine| engine.set_network_key(key));
    }

    /// Generate and install a network key
    pub fn generate_network_key(&self) -> ZwResult<NetworkKey> {
        self.shared.run(|engine| engine.generate_network_key())
    }

    pub fn network_key_installed(&self) -> bool {
        self.shared.lock().engine.network_key_installed()
    }

    pub fn set_node_id(&self, id: NodeId) {
        self.shared.lock().engine.set_node_id(id);
    }

    pub fn node_id(&self) -> NodeId {
        self.shared.lock().engine.node_id()
    }

    pub fn config(&self) -> SecurityConfig {
        self.shared.lock().engine.config().clone()
    }

    pub fn statistics(&self) -> SecurityStatistics {
        self.shared.lock().engine.statistics()
    }

    pub fn clear_statistics(&self) {
        self.shared.lock().engine.clear_statistics();
    }

    pub fn tx_state(&self) -> TxState {
        self.shared.lock().engine.tx_state()
    }

    pub fn included_state(&self) -> IncludedState {
        self.shared.lock().engine.included_state()
    }

    pub fn adding_state(&self) -> AddingState {
        self.shared.lock().engine.adding_state()
    }

    pub fn pending_sends(&self) -> usize {
        self.shared.lock().engine.pending_sends()
    }

    /// Ticks elapsed since the context was built
    pub fn ticks(&self) -> u64 {
        self.shared.clock.load(Ordering::Acquire)
    }

    /// Stop the ticker and every timer
    ///
    /// Inbound frames and transmit completions are still processed; new
    /// secure sends are refused with `InvalidState`.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(ticker) = self
            .ticker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            ticker.stop();
        }
        self.shared.lock().timers.stop_all();
        log::info!("Security context shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for SecurityContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for [`SecurityContext`]
pub struct SecurityContextBuilder {
    transport: Arc<dyn FrameTransport>,
    config: SecurityConfig,
    entropy: Option<Box<dyn EntropySource>>,
    listeners: Vec<Arc<dyn SecurityEventListener>>,
    runtime: Option<Handle>,
}

impl SecurityContextBuilder {
    pub fn new(transport: Arc<dyn FrameTransport>) -> Self {
        Self {
            transport,
            config: SecurityConfig::default(),
            entropy: None,
            listeners: Vec::new(),
            runtime: None,
        }
    }

    pub fn config(mut self, config: SecurityConfig) -> Self {
        self.config = config;
        self
    }

    /// Seed the PRNG from `source` instead of the operating system
    pub fn entropy(mut self, source: Box<dyn EntropySource>) -> Self {
        self.entropy = Some(source);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn SecurityEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Runtime timers and the ticker run on; defaults to the current one
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the context and start its ticker
    ///
    /// Failed entropy draws are retried with linear backoff.
    ///
    /// # Errors
    /// - `InvalidData` for an invalid configuration
    /// - `InvalidState` without a tokio runtime
    /// - `Entropy` if the PRNG could not be seeded
    pub async fn build(self) -> ZwResult<SecurityContext> {
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|_| {
                ZwError::InvalidState("Security context needs a tokio runtime".to_string())
            })?,
        };
        self.config.validate()?;

        let source = self
            .entropy
            .unwrap_or_else(|| Box::new(SystemEntropy::new()));
        let prng = seed_prng(
            source,
            self.config.entropy_retries,
            self.config.entropy_backoff(),
        )
        .await?;

        let tick_period = self.config.tick_period();
        let sweep_every = self.config.nonce_sweep_interval_ticks;
        let node = self.config.node_id;
        let engine = Engine::new(self.config, prng)?;

        let clock = Arc::new(AtomicU64::new(0));
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                engine,
                timers: TimerTable::new(),
            }),
            transport: self.transport,
            listeners: RwLock::new(self.listeners),
            runtime,
            clock: Arc::clone(&clock),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        let ticker = Ticker::spawn(&shared.runtime, tick_period, sweep_every, move |work| {
            match weak.upgrade() {
                Some(shared) => {
                    shared.clock.store(work.tick, Ordering::Release);
                    shared.tick(work);
                    true
                }
                None => false,
            }
        });

        log::info!("Security context for node {} started", node);
        Ok(SecurityContext {
            shared,
            ticker: Mutex::new(Some(ticker)),
            closed: AtomicBool::new(false),
        })
    }
}

/// Seed a PRNG, waiting `backoff * attempt` after each failed draw
async fn seed_prng(
    source: Box<dyn EntropySource>,
    attempts: u32,
    backoff: Duration,
) -> ZwResult<Prng> {
    let attempts = attempts.max(1);
    let mut unseeded = UnseededPrng::new(source);
    let mut attempt = 1;
    loop {
        match unseeded.seed() {
            Ok(prng) => return Ok(prng),
            Err((retry, e)) if attempt < attempts => {
                log::warn!("PRNG seed attempt {}/{} failed: {}", attempt, attempts, e);
                tokio::time::sleep(backoff * attempt).await;
                unseeded = retry;
                attempt += 1;
            }
            Err((_, e)) => {
                log::error!("PRNG seeding failed after {} attempts: {}", attempts, e);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ChannelEventListener;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use zwave_security::RngEntropy;
    use zwave_security::constants::ENTROPY_SIZE;
    use zwave_transport::{ChannelSettings, ChannelTransport, FrameReceiver};

    mockall::mock! {
        Source {}
        impl EntropySource for Source {
            fn fill(&mut self, buf: &mut [u8; ENTROPY_SIZE]) -> ZwResult<()>;
        }
    }

    fn node(id: u8) -> NodeId {
        NodeId::new(id).unwrap()
    }

    async fn context(id: u8) -> (SecurityContext, FrameReceiver) {
        let (transport, frames) = ChannelTransport::new(ChannelSettings::default());
        let config = SecurityConfig::builder().node_id(id).build().unwrap();
        let context = SecurityContext::builder(Arc::new(transport))
            .config(config)
            .entropy(Box::new(RngEntropy::new(StdRng::seed_from_u64(id as u64))))
            .build()
            .await
            .unwrap();
        (context, frames)
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonce_request_timeout_reported_once() {
        let (ctx, mut frames) = context(1).await;
        let (listener, mut events) = ChannelEventListener::new();
        ctx.add_listener(Arc::new(listener));
        ctx.set_network_key(NetworkKey::new([7; 16]));
        assert_eq!(events.recv().await, Some(SecurityEvent::NetworkKeyInstalled));

        ctx.secure_send(node(2), &[0x20, 0x01, 0xFF]).unwrap();
        let nonce_get = frames.recv().await.unwrap();
        assert_eq!(&nonce_get.frame[..], &[0x98, 0x40]);
        ctx.on_tx_complete(nonce_get.token, TxStatus::Ok);
        assert_eq!(ctx.tx_state(), TxState::WaitExternalNonce);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(
            events.try_recv().ok(),
            Some(SecurityEvent::SendCompleted {
                node: node(2),
                origin: crate::events::SendOrigin::Application,
                result: Err(ZwError::Timeout),
            })
        );
        assert!(events.try_recv().is_err());
        assert_eq!(ctx.tx_state(), TxState::Idle);
        assert_eq!(ctx.statistics().timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_advances_clock() {
        let (ctx, _frames) = context(1).await;
        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(ctx.ticks(), 5);
    }

    #[tokio::test]
    async fn test_transport_refusal_fails_send() {
        let (transport, frames) = ChannelTransport::new(ChannelSettings::default());
        drop(frames);
        let ctx = SecurityContext::builder(Arc::new(transport))
            .entropy(Box::new(RngEntropy::new(StdRng::seed_from_u64(1))))
            .build()
            .await
            .unwrap();
        let (listener, mut events) = ChannelEventListener::new();
        ctx.add_listener(Arc::new(listener));
        ctx.set_network_key(NetworkKey::new([7; 16]));

        ctx.secure_send(node(2), &[0x20, 0x02]).unwrap();
        assert_eq!(events.recv().await, Some(SecurityEvent::NetworkKeyInstalled));
        assert!(matches!(
            events.recv().await,
            Some(SecurityEvent::SendCompleted {
                result: Err(ZwError::Transmit),
                ..
            })
        ));
        assert_eq!(ctx.tx_state(), TxState::Idle);
        assert_eq!(ctx.pending_sends(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_sends() {
        let (ctx, _frames) = context(1).await;
        ctx.set_network_key(NetworkKey::new([7; 16]));
        ctx.shutdown();
        assert!(ctx.is_shut_down());
        assert!(matches!(
            ctx.secure_send(node(2), &[1]),
            Err(ZwError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_entropy_failure_surfaces() {
        let mut source = MockSource::new();
        source
            .expect_fill()
            .times(2)
            .returning(|_| Err(ZwError::Entropy("no source".to_string())));
        let (transport, _frames) = ChannelTransport::new(ChannelSettings::default());
        let config = SecurityConfig::builder()
            .entropy_retry(2, Duration::from_millis(1))
            .build()
            .unwrap();
        let result = SecurityContext::builder(Arc::new(transport))
            .config(config)
            .entropy(Box::new(source))
            .build()
            .await;
        assert!(matches!(result, Err(ZwError::Entropy(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entropy_retry_waits_without_blocking() {
        let mut source = MockSource::new();
        let mut calls = 0;
        source.expect_fill().times(3).returning(move |buf| {
            calls += 1;
            if calls < 3 {
                Err(ZwError::Entropy("warming up".to_string()))
            } else {
                buf.fill(0x5A);
                Ok(())
            }
        });
        let (transport, _frames) = ChannelTransport::new(ChannelSettings::default());
        let config = SecurityConfig::builder()
            .entropy_retry(3, Duration::from_millis(100))
            .build()
            .unwrap();

        let started = tokio::time::Instant::now();
        let ctx = SecurityContext::builder(Arc::new(transport))
            .config(config)
            .entropy(Box::new(source))
            .build()
            .await
            .unwrap();
        // 100ms after the first failure, 200ms after the second
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!ctx.is_shut_down());
    }
}
