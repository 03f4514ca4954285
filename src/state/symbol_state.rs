// =============================================================================
// Symbol State — C5
// =============================================================================
//
// Per-symbol mutable state: a rolling ring of 1-minute candles, true
// High-of-Day, progressive cumulative session volume, and the
// last-processed 5-minute period marker that guards against double
// evaluation. Mutated only through `append_minute`/`merge_5min_pull`, which
// maintain invariants I1-I4 from the data model.
// =============================================================================

use std::collections::VecDeque;

use serde::Serialize;

use crate::clock::Clock;
use crate::config::SessionConfig;
use crate::types::Candle;

/// Maximum number of 1-minute candles retained per symbol.
const MAX_MINUTE_RING: usize = 120;

/// Tracks a consecutive run of green 5-minute candles for the
/// Green-Run-Reject detector (§4.7.2). Reset whenever a non-green bar breaks
/// the run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GreenRunState {
    pub consecutive_green: u32,
    pub last_bar_was_green: bool,
    pub green_run_start_price: Option<f64>,
    pub green_run_high: Option<f64>,
}

impl GreenRunState {
    fn observe(&mut self, bar: &Candle) {
        if bar.is_green() {
            if !self.last_bar_was_green {
                self.green_run_start_price = Some(bar.open);
                self.green_run_high = Some(bar.high);
                self.consecutive_green = 0;
            }
            self.consecutive_green += 1;
            self.green_run_high = Some(self.green_run_high.unwrap_or(bar.high).max(bar.high));
            self.last_bar_was_green = true;
        } else {
            self.last_bar_was_green = false;
            self.consecutive_green = 0;
            self.green_run_start_price = None;
            self.green_run_high = None;
        }
    }
}

/// Mutable per-symbol state, owned by the Symbol State Store and mutated
/// only by the ingestion engine's stream and pull paths (serialized per
/// symbol — see `SymbolStateStore`).
#[derive(Debug, Clone)]
pub struct SymbolState {
    pub symbol: String,
    minute_ring: VecDeque<Candle>,
    pub hod: f64,
    pub gap_percent: f64,
    pub previous_close: f64,
    pub cumulative_volume: i64,
    pub last_processed_5min_start: i64,
    pub daily_state: GreenRunState,
    /// Completed 5-minute candles built during ingestion/backfill, most
    /// recent last. Capped at 20 for detector context (§4.6).
    five_min_history: VecDeque<Candle>,
}

impl SymbolState {
    pub fn new(symbol: impl Into<String>, gap_percent: f64, previous_close: f64, hod: f64) -> Self {
        Self {
            symbol: symbol.into(),
            minute_ring: VecDeque::with_capacity(MAX_MINUTE_RING),
            hod,
            gap_percent,
            previous_close,
            cumulative_volume: 0,
            last_processed_5min_start: 0,
            daily_state: GreenRunState::default(),
            five_min_history: VecDeque::with_capacity(20),
        }
    }

    pub fn minute_ring(&self) -> &VecDeque<Candle> {
        &self.minute_ring
    }

    pub fn five_min_history(&self) -> &VecDeque<Candle> {
        &self.five_min_history
    }

    /// Append a 1-minute bar. Maintains I1 (strict monotonic `startTs`, with
    /// out-of-order/duplicate bars discarded), I2 (HOD), I3 (cumulative
    /// volume over the session window), and trims the ring to
    /// `MAX_MINUTE_RING`.
    ///
    /// Returns `Some(period_start_ms)` when this bar completes a 5-minute
    /// period (ET minute ≡ 4 mod 5) that has not already been processed.
    pub fn append_minute(&mut self, bar: Candle, clock: &Clock, session: &SessionConfig) -> Option<i64> {
        if let Some(last) = self.minute_ring.back() {
            if bar.start_ts <= last.start_ts {
                return None; // out-of-order or duplicate — discard.
            }
        }

        if bar.high > self.hod {
            self.hod = bar.high;
        }

        if clock.is_within_session_window(bar.start_ts, session) {
            self.cumulative_volume += bar.volume;
        }

        self.minute_ring.push_back(bar);
        while self.minute_ring.len() > MAX_MINUTE_RING {
            self.minute_ring.pop_front();
        }

        let minute_mod_5 = clock.minutes_since_midnight_ms(bar.start_ts) % 5;
        if minute_mod_5 == 4 {
            let period_start = clock.align_5min_start_ms_of(bar.start_ts);
            if period_start > self.last_processed_5min_start || self.last_processed_5min_start == 0 {
                return Some(period_start);
            }
        }
        None
    }

    /// Synthesize the 5-minute candle from the up-to-five minute bars whose
    /// ET minute falls within `[period_start, period_start + 4min]`, and
    /// record it in `five_min_history` capped at 20 entries. Returns `None`
    /// when fewer than one constituent bar is available.
    pub fn synthesize_5min(&mut self, period_start_ms: i64) -> Option<Candle> {
        let period_end_ms = period_start_ms + 5 * 60_000;
        let mut constituents: Vec<Candle> = self
            .minute_ring
            .iter()
            .filter(|c| c.start_ts >= period_start_ms && c.start_ts < period_end_ms)
            .copied()
            .collect();
        constituents.sort_by_key(|c| c.start_ts);
        let candle = fold_candles(period_start_ms, &constituents)?;
        self.push_5min_history(candle);
        Some(candle)
    }

    /// Merge an externally-sourced 5-minute candle (REST pull or
    /// relaxed-alignment fallback) into the history, deduped by `start_ts`.
    /// The freshest source (ring-derived) wins over the pull when both cover
    /// the same period — callers pass pulled bars only for periods the ring
    /// cannot yet cover.
    pub fn merge_5min_pull(&mut self, candle: Candle) {
        if self.five_min_history.iter().any(|c| c.start_ts == candle.start_ts) {
            return;
        }
        self.push_5min_history(candle);
    }

    fn push_5min_history(&mut self, candle: Candle) {
        if let Some(pos) = self.five_min_history.iter().position(|c| c.start_ts == candle.start_ts) {
            self.five_min_history[pos] = candle;
            return;
        }
        self.five_min_history.push_back(candle);
        self.five_min_history.make_contiguous().sort_by_key(|c| c.start_ts);
        while self.five_min_history.len() > 20 {
            self.five_min_history.pop_front();
        }
    }

    /// Mark `period_start_ms` as evaluated. Monotonically non-decreasing
    /// (I4) — a caller passing an older value is a no-op.
    pub fn mark_processed(&mut self, period_start_ms: i64) {
        if period_start_ms > self.last_processed_5min_start {
            self.last_processed_5min_start = period_start_ms;
        }
    }

    pub fn has_processed(&self, period_start_ms: i64) -> bool {
        period_start_ms <= self.last_processed_5min_start && self.last_processed_5min_start != 0
    }

    /// Project this state into the downstream `symbolData()` shape: last
    /// price from the most recent minute bar, bid/ask synthesized as
    /// `price ± spread`.
    pub fn snapshot(&self, bid_ask_spread: f64) -> crate::types::SymbolSnapshot {
        let last_price = self.minute_ring.back().map(|c| c.close).unwrap_or(self.previous_close);
        crate::types::SymbolSnapshot {
            symbol: self.symbol.clone(),
            last_price,
            gap_percent: self.gap_percent,
            volume: self.cumulative_volume,
            hod: self.hod,
            bid: last_price - bid_ask_spread,
            ask: last_price + bid_ask_spread,
        }
    }
}

/// Fold a run of same-period 1-minute candles into one 5-minute candle.
fn fold_candles(start_ts: i64, bars: &[Candle]) -> Option<Candle> {
    let first = bars.first()?;
    let last = bars.last()?;
    let high = bars.iter().fold(f64::MIN, |acc, c| acc.max(c.high));
    let low = bars.iter().fold(f64::MAX, |acc, c| acc.min(c.low));
    let volume = bars.iter().map(|c| c.volume).sum();
    Some(Candle { start_ts, open: first.open, high, low, close: last.close, volume })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use chrono::{TimeZone, Utc};

    fn session() -> SessionConfig {
        SessionConfig { start: "09:30".to_string(), end: "16:00".to_string() }
    }

    fn minute_at(hour: u32, minute: u32, high: f64, volume: i64) -> (Candle, i64) {
        let instant = Utc.with_ymd_and_hms(2024, 7, 1, hour, minute, 0).unwrap();
        let ts = instant.timestamp_millis();
        (Candle { start_ts: ts, open: high - 0.1, high, low: high - 0.2, close: high - 0.05, volume }, ts)
    }

    #[test]
    fn hod_is_monotonic_non_decreasing() {
        let clock = Clock::live();
        let mut state = SymbolState::new("AAA", 20.0, 1.0, 1.0);
        let (bar1, _) = minute_at(13, 30, 5.0, 1000); // 09:30 ET
        let (bar2, _) = minute_at(13, 31, 4.5, 1000); // lower high
        let (bar3, _) = minute_at(13, 32, 6.0, 1000); // new high

        state.append_minute(bar1, &clock, &session());
        assert_eq!(state.hod, 5.0);
        state.append_minute(bar2, &clock, &session());
        assert_eq!(state.hod, 5.0);
        state.append_minute(bar3, &clock, &session());
        assert_eq!(state.hod, 6.0);
    }

    #[test]
    fn ring_strictly_monotonic_and_trimmed() {
        let clock = Clock::live();
        let mut state = SymbolState::new("AAA", 20.0, 1.0, 1.0);
        let (dup, _) = minute_at(13, 30, 5.0, 1000);
        state.append_minute(dup, &clock, &session());
        state.append_minute(dup, &clock, &session()); // duplicate start_ts, discarded
        assert_eq!(state.minute_ring().len(), 1);
    }

    #[test]
    fn cumulative_volume_only_counts_session_window() {
        let clock = Clock::live();
        let mut state = SymbolState::new("AAA", 20.0, 1.0, 1.0);
        let (premarket, _) = minute_at(8, 0, 5.0, 500); // 04:00 ET, before session
        let (in_session, _) = minute_at(13, 30, 5.0, 700); // 09:30 ET
        state.append_minute(premarket, &clock, &session());
        state.append_minute(in_session, &clock, &session());
        assert_eq!(state.cumulative_volume, 700);
    }

    #[test]
    fn period_completion_detected_on_minute_4_mod_5() {
        let clock = Clock::live();
        let mut state = SymbolState::new("AAA", 20.0, 1.0, 1.0);
        let (bar, _) = minute_at(13, 34, 5.0, 100); // ET minute 34 => 34 % 5 == 4
        let period = state.append_minute(bar, &clock, &session());
        assert!(period.is_some());
    }

    #[test]
    fn period_processed_at_most_once() {
        let mut state = SymbolState::new("AAA", 20.0, 1.0, 1.0);
        let period_start = 1_000_000;
        assert!(!state.has_processed(period_start));
        state.mark_processed(period_start);
        assert!(state.has_processed(period_start));
        state.mark_processed(period_start - 1); // older — no-op
        assert_eq!(state.last_processed_5min_start, period_start);
    }
}
