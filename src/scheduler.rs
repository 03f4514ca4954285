// =============================================================================
// Boundary-aligned Scheduler — C8
// =============================================================================
//
// Fires REST validation scans on wall-clock 5-minute boundaries plus a
// publish delay (default 15s), accounting for provider publish latency. On
// each fire: refresh the watchlist if due, pull-validate every watched
// symbol, then reschedule. Self-stops once `now >= session.end`.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::config::ScannerConfig;
use crate::ingestion::IngestionEngine;
use crate::state::SymbolStateStore;

/// Milliseconds until the next 5-minute wall-clock boundary plus
/// `delay_after_boundary_ms`. If the computed wait would be under 500ms
/// (i.e. we're essentially already at a boundary), advances by one full
/// period to avoid double-firing.
pub fn ms_until_next_boundary(clock: &Clock, delay_after_boundary_ms: u64) -> u64 {
    let et = clock.et_now();
    let minute = et.minute as i64;
    let second = et.second as i64;
    let until_boundary_s = (5 - minute % 5) * 60 - second;
    let mut ms = until_boundary_s * 1000 + delay_after_boundary_ms as i64 - (clock.now().timestamp_millis() % 1000);

    if ms < 500 {
        ms += 5 * 60 * 1000;
    }
    ms.max(0) as u64
}

pub struct Scheduler {
    store: Arc<SymbolStateStore>,
    ingestion: Arc<IngestionEngine>,
}

impl Scheduler {
    pub fn new(store: Arc<SymbolStateStore>, ingestion: Arc<IngestionEngine>) -> Self {
        Self { store, ingestion }
    }

    /// Runs the boundary loop until `stop` fires or the session ends.
    /// `on_boundary` is invoked on every fire to let the orchestrator decide
    /// whether a watchlist refresh is due (it owns the refresh interval
    /// state so this loop stays pattern-detector-free of selector logic).
    pub async fn run<F, Fut>(
        &self,
        clock: Clock,
        config: Arc<RwLock<ScannerConfig>>,
        mut stop: watch::Receiver<bool>,
        on_boundary: F,
    ) where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        loop {
            if *stop.borrow() {
                return;
            }

            let delay_ms = config.read().scanning.backfill_delay_after_boundary_ms;
            let wait_ms = ms_until_next_boundary(&clock, delay_ms);

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(wait_ms)) => {}
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return;
                    }
                }
            }

            let session_end = config.read().session.end_minutes();
            if clock.et_now().minutes_since_midnight() >= session_end {
                info!("scheduler self-stopping: session end reached");
                return;
            }

            on_boundary().await;

            let symbols = self.store.symbols();
            for symbol in symbols {
                let cfg_snapshot = config.read().clone();
                if let Err(e) = self.ingestion.pull_validate(&symbol, &clock, &cfg_snapshot).await {
                    warn!(symbol, error = %e, "pull-validation failed, rescheduling anyway");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn boundary_math_targets_next_5min_plus_delay() {
        // ET 09:33:12 -> next boundary is 09:35:00, +15s delay.
        let instant = Utc.with_ymd_and_hms(2024, 7, 1, 13, 33, 12).unwrap();
        let clock = Clock::fixed(instant);
        let ms = ms_until_next_boundary(&clock, 15_000);
        // (5 - 33%5)*60 - 12 = (5-3)*60-12 = 108s = 108000ms, + 15000ms delay.
        assert_eq!(ms, 108_000 + 15_000);
    }

    #[test]
    fn near_boundary_advances_a_full_period() {
        // ET 09:34:59.9 would otherwise compute <500ms; advance by 300_000ms.
        let instant = Utc.with_ymd_and_hms(2024, 7, 1, 13, 34, 59).unwrap();
        let clock = Clock::fixed(instant);
        let ms = ms_until_next_boundary(&clock, 0);
        assert!(ms >= 5 * 60 * 1000);
    }
}
