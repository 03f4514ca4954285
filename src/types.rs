// =============================================================================
// Shared types used across the gap-scanner engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single OHLCV candle, either a 1-minute provider aggregate or a
/// synthesized/pulled 5-minute bar.
///
/// Invariant: `low <= min(open, close) <= max(open, close) <= high`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    /// Epoch-ms start of the period, aligned in ET (1-min: multiple of
    /// 60_000; 5-min: multiple of 300_000).
    pub start_ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

impl Candle {
    /// Check the OHLC ordering invariant. Does not check timestamp alignment.
    pub fn is_valid(&self) -> bool {
        let body_lo = self.open.min(self.close);
        let body_hi = self.open.max(self.close);
        self.volume >= 0
            && self.low <= body_lo
            && body_lo <= body_hi
            && body_hi <= self.high
    }

    pub fn is_green(&self) -> bool {
        self.close - self.open > 0.001
    }

    pub fn is_red(&self) -> bool {
        self.open - self.close > 0.001
    }
}

/// A qualifying gap stock, produced by the watchlist selector and replaced
/// atomically on every refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub symbol: String,
    pub gap_percent: f64,
    pub current_price: f64,
    pub previous_close: f64,
    pub cumulative_volume: i64,
    pub hod: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ema200: Option<f64>,
    /// Epoch-ms when this entry first appeared in a watchlist refresh.
    pub discovered_at: i64,
}

/// Which detector produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    ToppingTail5m,
    GreenRunReject,
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ToppingTail5m => write!(f, "ToppingTail5m"),
            Self::GreenRunReject => write!(f, "GreenRunReject"),
        }
    }
}

/// A detected pattern, ready for dispatch to subscribers.
///
/// `id` is the stable dedupe key: `"{symbol}-{ts}-{index}-{type}"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub ts: i64,
    pub symbol: String,
    #[serde(rename = "type")]
    pub kind: AlertType,
    pub detail: String,
    pub price: f64,
    pub volume: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hod: Option<f64>,
    pub historical: bool,
}

impl Alert {
    /// Build the stable dedupe id for an alert at `index` within its series.
    pub fn make_id(symbol: &str, ts: i64, index: usize, kind: AlertType) -> String {
        format!("{symbol}-{ts}-{index}-{kind}")
    }
}

/// Which dispatchable selector mode is active, per §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorMode {
    LiveRegular,
    LivePreMarket,
    Historical,
}

impl std::fmt::Display for SelectorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LiveRegular => write!(f, "LiveRegular"),
            Self::LivePreMarket => write!(f, "LivePreMarket"),
            Self::Historical => write!(f, "Historical"),
        }
    }
}

/// Global orchestrator lifecycle state machine (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScannerPhase {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl Default for ScannerPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for ScannerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

/// Per-symbol snapshot exposed by the downstream `symbolData()` API (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolSnapshot {
    pub symbol: String,
    pub last_price: f64,
    pub gap_percent: f64,
    pub volume: i64,
    pub hod: f64,
    pub bid: f64,
    pub ask: f64,
}
