//! Periodic ticker
//!
//! Counts ticks on a lock-free counter and hands each tick to a callback,
//! flagging every `sweep_every`-th tick for the heavier cleanup.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Work due on one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickWork {
    /// Tick number, starting at 1
    pub tick: u64,
    /// Whether the internal nonce sweep is due
    pub sweep: bool,
}

/// Handle to a running ticker task; the task stops when dropped
#[derive(Debug)]
pub struct Ticker {
    ticks: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl Ticker {
    /// Start a ticker on `runtime`
    ///
    /// `on_tick` runs once per period; returning `false` ends the ticker.
    pub fn spawn<F>(runtime: &Handle, period: Duration, sweep_every: u64, mut on_tick: F) -> Self
    where
        F: FnMut(TickWork) -> bool + Send + 'static,
    {
        let ticks = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&ticks);
        let sweep_every = sweep_every.max(1);

        let task = runtime.spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let tick = counter.fetch_add(1, Ordering::AcqRel) + 1;
                let work = TickWork {
                    tick,
                    sweep: tick % sweep_every == 0,
                };
                if !on_tick(work) {
                    log::debug!("Ticker stopped at tick {}", tick);
                    break;
                }
            }
        });

        Self { ticks, task }
    }

    /// Ticks elapsed so far
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    /// Shared tick counter
    pub fn clock(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.ticks)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_and_sweeps() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let ticker = Ticker::spawn(
            &Handle::current(),
            Duration::from_millis(200),
            5,
            move |work| {
                sink.lock().unwrap().push(work);
                true
            },
        );

        tokio::time::sleep(Duration::from_millis(1_050)).await;
        assert_eq!(ticker.ticks(), 5);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 5);
        assert!(seen[..4].iter().all(|w| !w.sweep));
        assert_eq!(seen[4], TickWork { tick: 5, sweep: true });
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_ends_ticker() {
        let ticker = Ticker::spawn(&Handle::current(), Duration::from_millis(10), 5, |work| {
            work.tick < 3
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticker.ticks(), 3);
        assert!(!ticker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop() {
        let ticker = Ticker::spawn(&Handle::current(), Duration::from_millis(10), 5, |_| true);
        tokio::time::sleep(Duration::from_millis(25)).await;
        ticker.stop();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(ticker.ticks(), 2);
        assert!(!ticker.is_running());
    }
}
