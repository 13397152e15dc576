use std::collections::HashMap;
use std::time::Duration;

use murmur_types::primitives::{MessageId, ProposalId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Every timer the node can arm. At most one timer per key is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Next overlay formation cycle.
    FormOverlay,
    /// Expiry of a pending offer or answer.
    ProposalExpiry(ProposalId),
    /// Next drain of the pull queue.
    PullTick,
    /// Give up on the current source of a pull.
    PullRetry(MessageId),
    /// Expiry of a call that has not connected yet.
    CallExpiry(ProposalId),
    /// Reconnect to the rendezvous and feed the room.
    RendezvousFeed,
    /// Close the rendezvous socket.
    RendezvousLinger,
}

/// A timer that went off, as delivered to the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub key: TimerKey,
    generation: u64,
}

/// Cancellable one-shot timers keyed by [`TimerKey`].
///
/// Each timer is a task that sleeps and then reports on a channel. A firing
/// is only honoured through [`Timers::accept`], which rejects firings of
/// timers that were cancelled or rescheduled in the meantime, so
/// cancellation is idempotent even if the task already fired.
pub struct Timers {
    armed: HashMap<TimerKey, (u64, JoinHandle<()>)>,
    next_generation: u64,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl Timers {
    pub fn new(fired_tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self {
            armed: HashMap::new(),
            next_generation: 0,
            fired_tx,
        }
    }

    /// Arm `key` to fire after `delay`, replacing any earlier arming.
    pub fn schedule(&mut self, key: TimerKey, delay: Duration) {
        self.cancel(key);
        let generation = self.next_generation;
        self.next_generation += 1;
        let tx = self.fired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TimerFired { key, generation });
        });
        self.armed.insert(key, (generation, handle));
    }

    /// Arm `key` unless it is already armed.
    pub fn ensure(&mut self, key: TimerKey, delay: Duration) {
        if !self.is_armed(key) {
            self.schedule(key, delay);
        }
    }

    /// Disarm `key`. No-op if it is not armed or has already fired.
    pub fn cancel(&mut self, key: TimerKey) {
        if let Some((_, handle)) = self.armed.remove(&key) {
            handle.abort();
        }
    }

    pub fn is_armed(&self, key: TimerKey) -> bool {
        self.armed.contains_key(&key)
    }

    /// Consume a firing. Returns `false` for stale firings.
    pub fn accept(&mut self, fired: &TimerFired) -> bool {
        match self.armed.get(&fired.key) {
            Some((generation, _)) if *generation == fired.generation => {
                self.armed.remove(&fired.key);
                true
            }
            _ => {
                debug!(key = ?fired.key, "dropping stale timer");
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.armed.drain() {
            handle.abort();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.schedule(TimerKey::PullTick, Duration::from_millis(100));
        assert!(timers.is_armed(TimerKey::PullTick));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.key, TimerKey::PullTick);
        assert!(timers.accept(&fired));
        assert!(!timers.is_armed(TimerKey::PullTick));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.schedule(TimerKey::FormOverlay, Duration::from_secs(1));
        timers.cancel(TimerKey::FormOverlay);
        timers.cancel(TimerKey::FormOverlay);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_fire_rejects_firing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.schedule(TimerKey::ProposalExpiry(4), Duration::from_millis(10));
        let fired = rx.recv().await.unwrap();
        timers.cancel(TimerKey::ProposalExpiry(4));
        assert!(!timers.accept(&fired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_supersedes_earlier_arming() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timers = Timers::new(tx);
        timers.schedule(TimerKey::RendezvousFeed, Duration::from_millis(10));
        timers.schedule(TimerKey::RendezvousFeed, Duration::from_millis(50));
        timers.ensure(TimerKey::RendezvousFeed, Duration::from_millis(1));

        let started = tokio::time::Instant::now();
        let fired = rx.recv().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(timers.accept(&fired));
        assert!(rx.try_recv().is_err());
    }
}
