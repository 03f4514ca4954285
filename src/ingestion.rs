// =============================================================================
// Ingestion Engine — C6
// =============================================================================
//
// Two input sources feed one per-symbol state: the WebSocket stream
// (primary) and the REST pull path (validation). Both write into the same
// `SymbolState`, serialized through its per-symbol mutex (see
// `state::SymbolStateStore`), so the two paths never interleave a write.
// =============================================================================

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ScannerConfig;
use crate::dispatcher::AlertDispatcher;
use crate::market_data::client::MarketDataClient;
use crate::market_data::stream::StreamEvent;
use crate::patterns;
use crate::state::symbol_state::SymbolState;
use crate::state::SymbolStateStore;
use crate::types::{Candle, WatchlistEntry};

pub struct IngestionEngine {
    store: Arc<SymbolStateStore>,
    client: Arc<MarketDataClient>,
    dispatcher: Arc<AlertDispatcher>,
}

impl IngestionEngine {
    pub fn new(store: Arc<SymbolStateStore>, client: Arc<MarketDataClient>, dispatcher: Arc<AlertDispatcher>) -> Self {
        Self { store, client, dispatcher }
    }

    /// Backfill a newly-watchlisted symbol: seed `minuteRing` with today's
    /// bars in the session window, set `cumulativeVolume` to their sum, and
    /// set `hod` to scan **all** of today's bars (not just session ones), per
    /// the backfill windowing rule in §4.6.
    pub async fn backfill(&self, entry: &WatchlistEntry, clock: &Clock, config: &ScannerConfig) -> anyhow::Result<()> {
        let today_start = day_start_ms(clock);
        let now_ms = clock.now().timestamp_millis();
        let bars = self.client.get_minute_aggs(&entry.symbol, today_start, now_ms, config.api.aggregates_limit).await?;

        let mut state = SymbolState::new(&entry.symbol, entry.gap_percent, entry.previous_close, entry.hod);
        let mut cumulative_volume = 0i64;
        let mut hod = entry.hod;

        for raw in &bars.results {
            let candle = Candle::from(raw);
            if candle.high > hod {
                hod = candle.high;
            }
            if clock.is_within_session_window(candle.start_ts, &config.session) {
                cumulative_volume += candle.volume;
                state.append_minute(candle, clock, &config.session);
            }
        }

        state.hod = hod;
        state.cumulative_volume = cumulative_volume;
        self.store.upsert(&entry.symbol, state);
        debug!(symbol = %entry.symbol, bars = bars.results.len(), "backfilled symbol state");
        Ok(())
    }

    /// Handle a decoded stream event: append the minute bar, and on period
    /// completion synthesize the 5-min candle and run the pattern engine.
    pub fn handle_stream_event(&self, event: StreamEvent, clock: &Clock, config: &ScannerConfig) {
        let StreamEvent::Bar { symbol, candle } = event else { return };
        let Some(handle) = self.store.get(&symbol) else {
            return; // symbol no longer watched — drop silently.
        };

        let period_start = {
            let mut state = handle.lock();
            state.append_minute(candle, clock, &config.session)
        };

        if let Some(period_start) = period_start {
            self.evaluate_period(&symbol, period_start, clock, config);
        }
    }

    fn evaluate_period(&self, symbol: &str, period_start: i64, clock: &Clock, config: &ScannerConfig) {
        let Some(handle) = self.store.get(symbol) else { return };
        let alerts = {
            let mut state = handle.lock();
            if state.has_processed(period_start) {
                return; // already evaluated — P5 period-once guarantee.
            }
            state.synthesize_5min(period_start);
            state.mark_processed(period_start);
            patterns::evaluate(&state, period_start, config, clock)
        };

        for alert in alerts {
            self.dispatcher.fire(alert);
        }
    }

    /// REST pull validation path (§4.6): fetch 5-min aggregates for `symbol`,
    /// merge into its state by `start_ts`, and evaluate any newly-complete
    /// periods that the stream path has not already covered.
    pub async fn pull_validate(&self, symbol: &str, clock: &Clock, config: &ScannerConfig) -> anyhow::Result<()> {
        let Some(handle) = self.store.get(symbol) else { return Ok(()) };

        let today_start = day_start_ms(clock);
        let now_ms = clock.now().timestamp_millis();
        let pulled = self.client.get_5min_aggs(symbol, today_start, now_ms, config.api.aggregates_limit).await?;

        let periods_to_evaluate: Vec<i64> = {
            let mut state = handle.lock();
            let mut newly_covered = Vec::new();
            for raw in &pulled.results {
                let candle = Candle::from(raw);
                if !state.has_processed(candle.start_ts) {
                    newly_covered.push(candle.start_ts);
                }
                state.merge_5min_pull(candle);
            }
            newly_covered
        };

        for period_start in periods_to_evaluate {
            self.evaluate_period(symbol, period_start, clock, config);
        }
        Ok(())
    }

    pub fn teardown(&self, symbol: &str) {
        self.store.remove(symbol);
        info!(symbol, "symbol state torn down");
    }
}

fn day_start_ms(clock: &Clock) -> i64 {
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    let et = clock.et_now();
    New_York
        .with_ymd_and_hms(et.year, et.month, et.day, 0, 0, 0)
        .single()
        .map(|dt| dt.with_timezone(&chrono::Utc).timestamp_millis())
        .unwrap_or_else(|| clock.now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;

    fn dispatcher() -> Arc<AlertDispatcher> {
        Arc::new(AlertDispatcher::new())
    }

    #[test]
    fn handle_stream_event_ignores_unwatched_symbol() {
        let store = Arc::new(SymbolStateStore::new());
        let client = Arc::new(MarketDataClient::new("key", &ApiConfig::default()).unwrap());
        let engine = IngestionEngine::new(store, client, dispatcher());
        let clock = Clock::live();
        let config = ScannerConfig::default();

        let event = StreamEvent::Bar {
            symbol: "GHOST".to_string(),
            candle: Candle { start_ts: 0, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 1 },
        };
        engine.handle_stream_event(event, &clock, &config); // must not panic
    }

    #[test]
    fn teardown_removes_state() {
        let store = Arc::new(SymbolStateStore::new());
        store.upsert("AAA", SymbolState::new("AAA", 10.0, 1.0, 1.0));
        let client = Arc::new(MarketDataClient::new("key", &ApiConfig::default()).unwrap());
        let engine = IngestionEngine::new(store.clone(), client, dispatcher());
        engine.teardown("AAA");
        assert!(store.get("AAA").is_none());
    }
}
