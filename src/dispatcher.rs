// =============================================================================
// Alert Dispatcher — C9
// =============================================================================
//
// Deduplicates by the alert's stable id and fans out to subscribers in
// registration order, isolating one subscriber's panic/failure from the
// rest. The dedupe set is bounded: once it exceeds 1 000 entries, the oldest
// 500 are evicted (FIFO), per §4.9.
// =============================================================================

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{error, warn};

use crate::types::Alert;

const DEDUPE_MAX: usize = 1_000;
const DEDUPE_EVICT: usize = 500;

pub type AlertSubscriber = Arc<dyn Fn(&Alert) + Send + Sync>;

struct DedupeSet {
    order: VecDeque<String>,
    seen: std::collections::HashSet<String>,
}

impl DedupeSet {
    fn new() -> Self {
        Self { order: VecDeque::new(), seen: std::collections::HashSet::new() }
    }

    /// Returns `true` if `id` was newly inserted (not previously seen).
    fn insert_if_new(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > DEDUPE_MAX {
            for _ in 0..DEDUPE_EVICT {
                if let Some(old) = self.order.pop_front() {
                    self.seen.remove(&old);
                } else {
                    break;
                }
            }
        }
        true
    }
}

pub struct AlertDispatcher {
    dedupe: Mutex<DedupeSet>,
    subscribers: RwLock<Vec<AlertSubscriber>>,
}

impl AlertDispatcher {
    pub fn new() -> Self {
        Self { dedupe: Mutex::new(DedupeSet::new()), subscribers: RwLock::new(Vec::new()) }
    }

    /// Register a subscriber; returns a handle that, when dropped, does not
    /// automatically unsubscribe (callers hold the handle for the scanner's
    /// lifetime, per the Orchestrator owning subscriber lists — see §9).
    pub fn subscribe(&self, callback: AlertSubscriber) {
        self.subscribers.write().push(callback);
    }

    /// Reject if `alert.id` is already present; otherwise insert and invoke
    /// every subscriber in registration order. One failing subscriber does
    /// not prevent the others from running.
    pub fn fire(&self, alert: Alert) {
        let is_new = self.dedupe.lock().insert_if_new(&alert.id);
        if !is_new {
            return;
        }

        let subscribers = self.subscribers.read();
        for subscriber in subscribers.iter() {
            let result = catch_unwind(AssertUnwindSafe(|| subscriber(&alert)));
            if let Err(e) = result {
                let message = e.downcast_ref::<&str>().map(|s| s.to_string()).unwrap_or_else(|| "panic".to_string());
                error!(alert_id = %alert.id, error = message, "alert subscriber panicked, continuing fan-out");
            }
        }
        warn_if_empty(&subscribers);
    }

    pub fn clear_dedupe(&self) {
        *self.dedupe.lock() = DedupeSet::new();
    }
}

fn warn_if_empty(subscribers: &[AlertSubscriber]) {
    if subscribers.is_empty() {
        warn!("alert fired with no subscribers registered");
    }
}

impl Default for AlertDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn alert(id: &str) -> Alert {
        Alert {
            id: id.to_string(),
            ts: 0,
            symbol: "SYM".to_string(),
            kind: crate::types::AlertType::ToppingTail5m,
            detail: String::new(),
            price: 1.0,
            volume: 1,
            gap_percent: None,
            hod: None,
            historical: false,
        }
    }

    #[test]
    fn p6_duplicate_fire_notifies_once() {
        let dispatcher = AlertDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        dispatcher.subscribe(Arc::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        dispatcher.fire(alert("a"));
        dispatcher.fire(alert("a"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn one_failing_subscriber_does_not_block_others() {
        let dispatcher = AlertDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        dispatcher.subscribe(Arc::new(|_| panic!("boom")));
        dispatcher.subscribe(Arc::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        dispatcher.fire(alert("a"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dedupe_set_evicts_oldest_half_past_1000() {
        let dispatcher = AlertDispatcher::new();
        for i in 0..1001 {
            dispatcher.fire(alert(&format!("id-{i}")));
        }
        let dedupe = dispatcher.dedupe.lock();
        assert!(dedupe.order.len() <= DEDUPE_MAX);
        assert!(!dedupe.seen.contains("id-0")); // evicted
        assert!(dedupe.seen.contains("id-1000")); // most recent retained
    }
}
