// =============================================================================
// Provider wire types — §6
// =============================================================================
//
// Shapes returned by the upstream REST endpoints and WebSocket stream. Only
// the fields the core depends on are modeled; everything else is ignored by
// serde's default "unknown fields are dropped" behavior.
// =============================================================================

use serde::Deserialize;

use crate::types::Candle;

#[derive(Debug, Clone, Deserialize)]
pub struct GainersSnapshotResponse {
    #[serde(default)]
    pub tickers: Vec<GainerTicker>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GainerTicker {
    pub ticker: String,
    #[serde(default)]
    pub last_trade: Option<LastTrade>,
    #[serde(default)]
    pub todays_change_perc: Option<f64>,
    #[serde(default)]
    pub prev_day: Option<PrevDay>,
    #[serde(default)]
    pub min: Option<MinuteSummary>,
    #[serde(default)]
    pub day: Option<DaySummary>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastTrade {
    pub p: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrevDay {
    pub c: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MinuteSummary {
    #[serde(default)]
    pub av: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DaySummary {
    #[serde(default)]
    pub h: Option<f64>,
}

/// A single grouped-daily-bars entry (`/v2/aggs/grouped/...`).
#[derive(Debug, Clone, Deserialize)]
pub struct GroupedBar {
    #[serde(rename = "T")]
    pub ticker: String,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupedResponse {
    #[serde(default, rename = "results")]
    pub results: Vec<GroupedBar>,
}

/// One bar from the N-minute aggregates endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AggBar {
    pub t: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

impl From<&AggBar> for Candle {
    fn from(bar: &AggBar) -> Self {
        Candle { start_ts: bar.t, open: bar.o, high: bar.h, low: bar.l, close: bar.c, volume: bar.v as i64 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggsResponse {
    #[serde(default, rename = "results")]
    pub results: Vec<AggBar>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerTypeResponse {
    pub results: TickerTypeResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TickerTypeResult {
    #[serde(rename = "type")]
    pub ticker_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmaResponse {
    pub results: EmaResults,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmaResults {
    #[serde(default)]
    pub values: Vec<EmaValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmaValue {
    pub value: f64,
}

/// Response from `/v1/open-close/{sym}/{date}`.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenCloseResponse {
    pub open: f64,
}

/// A single minute-aggregate event from the WebSocket stream (`ev: "AM"`).
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMinuteAgg {
    pub ev: String,
    pub sym: String,
    pub s: i64,
    #[serde(default)]
    pub e: i64,
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
    pub v: f64,
}

impl From<&StreamMinuteAgg> for Candle {
    fn from(agg: &StreamMinuteAgg) -> Self {
        Candle { start_ts: agg.s, open: agg.o, high: agg.h, low: agg.l, close: agg.c, volume: agg.v as i64 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamStatus {
    pub ev: String,
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
}
