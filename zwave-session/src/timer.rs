//! One-shot timers with stale-firing protection
//!
//! Each timer slot carries a generation. Arming or stopping a slot bumps the
//! generation and aborts the previous task, so a timer that fires after being
//! replaced finds a different generation and does nothing.

use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// The timers a security context runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Nonce report wait of the transmission machine
    NonceRequest,
    /// Step timeout of the included-node machine
    Inclusion,
    /// Step timeout or initial delay of the adding-node machine
    AddNode,
}

impl TimerKind {
    const ALL: [TimerKind; 3] = [
        TimerKind::NonceRequest,
        TimerKind::Inclusion,
        TimerKind::AddNode,
    ];

    fn index(&self) -> usize {
        match self {
            TimerKind::NonceRequest => 0,
            TimerKind::Inclusion => 1,
            TimerKind::AddNode => 2,
        }
    }
}

/// Timer change requested by a state machine step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCommand {
    Arm(TimerKind, Duration),
    Stop(TimerKind),
}

#[derive(Debug, Default)]
struct TimerSlot {
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl TimerSlot {
    fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The context's timer slots
#[derive(Debug, Default)]
pub struct TimerTable {
    slots: [TimerSlot; 3],
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind`, replacing any running timer of that kind
    ///
    /// `fire` receives the generation the timer was armed with and is run on
    /// `runtime` once `delay` has elapsed.
    pub fn arm<F, Fut>(&mut self, runtime: &Handle, kind: TimerKind, delay: Duration, fire: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let slot = &mut self.slots[kind.index()];
        slot.cancel();
        let generation = slot.generation;
        slot.task = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            fire(generation).await;
        }));
        log::trace!("Armed {:?} timer for {:?} (generation {})", kind, delay, generation);
    }

    /// Stop `kind`; stopping an idle slot is a no-op apart from the generation bump
    pub fn stop(&mut self, kind: TimerKind) {
        self.slots[kind.index()].cancel();
    }

    /// Claim a firing timer
    ///
    /// Returns `true` if `generation` is the current one; the slot is then
    /// disarmed. A stale or stopped timer returns `false`.
    pub fn claim(&mut self, kind: TimerKind, generation: u64) -> bool {
        let slot = &mut self.slots[kind.index()];
        if slot.generation != generation || slot.task.is_none() {
            return false;
        }
        slot.task = None;
        slot.generation = slot.generation.wrapping_add(1);
        true
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.slots[kind.index()].task.is_some()
    }

    /// Stop every timer
    pub fn stop_all(&mut self) {
        for kind in TimerKind::ALL {
            self.stop(kind);
        }
    }
}

impl Drop for TimerTable {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let table = Arc::new(Mutex::new(TimerTable::new()));
        let fired = Arc::new(AtomicU64::new(0));

        let (t, f) = (table.clone(), fired.clone());
        table.lock().unwrap().arm(
            &Handle::current(),
            TimerKind::NonceRequest,
            Duration::from_secs(10),
            move |generation| async move {
                if t.lock().unwrap().claim(TimerKind::NonceRequest, generation) {
                    f.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(9_999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!table.lock().unwrap().is_armed(TimerKind::NonceRequest));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_timer_never_fires() {
        let mut table = TimerTable::new();
        let fired = Arc::new(AtomicU64::new(0));
        let f = fired.clone();
        table.arm(
            &Handle::current(),
            TimerKind::Inclusion,
            Duration::from_secs(1),
            move |_| async move {
                f.fetch_add(1, Ordering::SeqCst);
            },
        );
        table.stop(TimerKind::Inclusion);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stale_generation_rejected() {
        let mut table = TimerTable::new();
        assert!(!table.claim(TimerKind::AddNode, 0));
        table.stop(TimerKind::AddNode);
        assert!(!table.claim(TimerKind::AddNode, 0));
        assert!(!table.claim(TimerKind::AddNode, 1));
    }
}
