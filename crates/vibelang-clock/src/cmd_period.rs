//! Global reset signal.
//!
//! Firing the signal is the "stop everything" gesture of a live session:
//! non-permanent responders free themselves, tracing stops, and (by default)
//! the scheduler queue is emptied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by [`CmdPeriod::subscribe`].
pub type SubscriptionId = u64;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Broadcast reset event.
pub struct CmdPeriod {
    subscribers: Mutex<Vec<(SubscriptionId, Callback)>>,
    next_id: AtomicU64,
    fired: AtomicU64,
}

impl CmdPeriod {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            fired: AtomicU64::new(0),
        }
    }

    /// Call `callback` every time the signal fires.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap()
            .push((id, Arc::new(callback)));
        id
    }

    /// Remove a subscription. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap();
        let before = subscribers.len();
        subscribers.retain(|(sub_id, _)| *sub_id != id);
        subscribers.len() != before
    }

    /// Notify every current subscriber, in subscription order.
    ///
    /// Callbacks may unsubscribe themselves (or others) while the signal is
    /// being delivered; everyone subscribed when `fire` started is called.
    pub fn fire(&self) {
        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .unwrap()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        let count = self.fired.fetch_add(1, Ordering::Relaxed) + 1;
        log::info!(
            "[CMD_PERIOD] Reset #{} ({} subscribers)",
            count,
            callbacks.len()
        );
        for callback in callbacks {
            callback();
        }
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }

    /// How many times the signal has fired.
    pub fn fire_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }
}

impl Default for CmdPeriod {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CmdPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CmdPeriod")
            .field("subscribers", &self.subscriber_count())
            .field("fired", &self.fire_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_fire_calls_subscribers_in_order() {
        let cmd_period = CmdPeriod::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            cmd_period.subscribe(move || order.lock().unwrap().push(n));
        }
        cmd_period.fire();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(cmd_period.fire_count(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let cmd_period = CmdPeriod::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = cmd_period.subscribe(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(cmd_period.unsubscribe(id));
        assert!(!cmd_period.unsubscribe(id));
        cmd_period.fire();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(cmd_period.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_may_unsubscribe_during_fire() {
        let cmd_period = Arc::new(CmdPeriod::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let id_slot = Arc::new(AtomicU64::new(0));

        let cp = Arc::downgrade(&cmd_period);
        let slot = id_slot.clone();
        let h = hits.clone();
        let id = cmd_period.subscribe(move || {
            h.fetch_add(1, Ordering::SeqCst);
            if let Some(cp) = cp.upgrade() {
                cp.unsubscribe(slot.load(Ordering::SeqCst));
            }
        });
        id_slot.store(id, Ordering::SeqCst);

        cmd_period.fire();
        cmd_period.fire();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
