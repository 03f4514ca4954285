// =============================================================================
// Runtime Configuration — hot-reloadable scanner settings with atomic save
// =============================================================================
//
// Every tunable threshold lives here so the scanner can be reconfigured at
// runtime (via `Orchestrator::update_config`) without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default = "...")]` so that adding a new
// field never breaks loading an older config file from disk.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ScannerError;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_session_start() -> String {
    "09:30".to_string()
}
fn default_session_end() -> String {
    "16:00".to_string()
}
fn default_gap_min_pct() -> f64 {
    10.0
}
fn default_gap_max_pct() -> f64 {
    1000.0
}
fn default_gap_min_price() -> f64 {
    1.0
}
fn default_gap_max_price() -> f64 {
    20.0
}
fn default_gap_min_cum_volume() -> i64 {
    500_000
}
fn default_true() -> bool {
    true
}
fn default_max_high_distance_pct() -> f64 {
    1.0
}
fn default_max_close_distance_pct() -> f64 {
    2.0
}
fn default_min_shadow_to_body_ratio() -> f64 {
    2.0
}
fn default_min_close_percent() -> f64 {
    60.0
}
fn default_min_bar_volume() -> i64 {
    1_000
}
fn default_max_bar_volume() -> i64 {
    50_000_000
}
fn default_min_consecutive_green() -> u32 {
    4
}
fn default_max_consecutive_green() -> u32 {
    20
}
fn default_min_run_gain_pct() -> f64 {
    2.0
}
fn default_max_distance_from_hod_pct() -> f64 {
    3.0
}
fn default_max_retries() -> u32 {
    3
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_http_timeout_ms() -> u64 {
    5_000
}
fn default_aggregates_limit() -> u32 {
    5_000
}
fn default_backfill_delay_ms() -> u64 {
    15_000
}
fn default_bid_ask_spread() -> f64 {
    0.01
}
fn default_max_lookback_days() -> u32 {
    5
}
fn default_max_symbols_to_analyze() -> usize {
    20
}
fn default_min_discovery_volume() -> i64 {
    500_000
}
fn default_min_early_peak_gap() -> f64 {
    15.0
}
fn default_early_peak_window_end() -> String {
    "07:30".to_string()
}
fn default_min_fade_percent() -> f64 {
    30.0
}
fn default_max_additional_faders() -> usize {
    5
}
fn default_min_daily_volume_for_faders() -> i64 {
    1_000_000
}
fn default_watchlist_refresh_secs() -> u64 {
    120
}

// =============================================================================
// Sub-configs
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_start")]
    pub start: String,
    #[serde(default = "default_session_end")]
    pub end: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { start: default_session_start(), end: default_session_end() }
    }
}

impl SessionConfig {
    /// Parse `"HH:MM"` into minutes since ET midnight.
    fn parse_minutes(s: &str) -> Option<i64> {
        let (h, m) = s.split_once(':')?;
        let h: i64 = h.parse().ok()?;
        let m: i64 = m.parse().ok()?;
        Some(h * 60 + m)
    }

    pub fn start_minutes(&self) -> i64 {
        Self::parse_minutes(&self.start).unwrap_or(570)
    }

    pub fn end_minutes(&self) -> i64 {
        Self::parse_minutes(&self.end).unwrap_or(960)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapConfig {
    #[serde(default = "default_gap_min_pct")]
    pub min_pct: f64,
    #[serde(default = "default_gap_max_pct")]
    pub max_pct: f64,
    #[serde(default = "default_gap_min_price")]
    pub min_price: f64,
    #[serde(default = "default_gap_max_price")]
    pub max_price: f64,
    #[serde(default = "default_gap_min_cum_volume")]
    pub min_cumulative_volume: i64,
}

impl Default for GapConfig {
    fn default() -> Self {
        Self {
            min_pct: default_gap_min_pct(),
            max_pct: default_gap_max_pct(),
            min_price: default_gap_min_price(),
            max_price: default_gap_max_price(),
            min_cumulative_volume: default_gap_min_cum_volume(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToppingTail5mConfig {
    #[serde(default = "default_true")]
    pub require_strict_hod_break: bool,
    #[serde(default = "default_max_high_distance_pct")]
    pub max_high_distance_pct: f64,
    #[serde(default = "default_max_close_distance_pct")]
    pub max_close_distance_pct: f64,
    #[serde(default)]
    pub must_close_red: bool,
    #[serde(default = "default_min_shadow_to_body_ratio")]
    pub min_shadow_to_body_ratio: f64,
    #[serde(default = "default_min_close_percent")]
    pub min_close_percent: f64,
    #[serde(default = "default_min_bar_volume")]
    pub min_bar_volume: i64,
    #[serde(default = "default_max_bar_volume")]
    pub max_bar_volume: i64,
}

impl Default for ToppingTail5mConfig {
    fn default() -> Self {
        Self {
            require_strict_hod_break: default_true(),
            max_high_distance_pct: default_max_high_distance_pct(),
            max_close_distance_pct: default_max_close_distance_pct(),
            must_close_red: false,
            min_shadow_to_body_ratio: default_min_shadow_to_body_ratio(),
            min_close_percent: default_min_close_percent(),
            min_bar_volume: default_min_bar_volume(),
            max_bar_volume: default_max_bar_volume(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreenRunConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_consecutive_green")]
    pub min_consecutive_green: u32,
    #[serde(default = "default_max_consecutive_green")]
    pub max_consecutive_green: u32,
    #[serde(default = "default_min_run_gain_pct")]
    pub min_run_gain_pct: f64,
    #[serde(default = "default_max_distance_from_hod_pct")]
    pub max_distance_from_hod_pct: f64,
}

impl Default for GreenRunConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_consecutive_green: default_min_consecutive_green(),
            max_consecutive_green: default_max_consecutive_green(),
            min_run_gain_pct: default_min_run_gain_pct(),
            max_distance_from_hod_pct: default_max_distance_from_hod_pct(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default = "default_aggregates_limit")]
    pub aggregates_limit: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            request_timeout_ms: default_request_timeout_ms(),
            http_timeout_ms: default_http_timeout_ms(),
            aggregates_limit: default_aggregates_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanningConfig {
    #[serde(default = "default_backfill_delay_ms")]
    pub backfill_delay_after_boundary_ms: u64,
    #[serde(default = "default_bid_ask_spread")]
    pub bid_ask_spread: f64,
    #[serde(default = "default_watchlist_refresh_secs")]
    pub watchlist_refresh_secs: u64,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            backfill_delay_after_boundary_ms: default_backfill_delay_ms(),
            bid_ask_spread: default_bid_ask_spread(),
            watchlist_refresh_secs: default_watchlist_refresh_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyGainerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_min_early_peak_gap")]
    pub min_early_peak_gap: f64,
    #[serde(default = "default_early_peak_window_end")]
    pub early_peak_window_end: String,
    #[serde(default = "default_min_fade_percent")]
    pub min_fade_percent: f64,
    #[serde(default = "default_max_additional_faders")]
    pub max_additional_faders: usize,
    #[serde(default = "default_min_daily_volume_for_faders")]
    pub min_daily_volume_for_faders: i64,
}

impl Default for EarlyGainerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_early_peak_gap: default_min_early_peak_gap(),
            early_peak_window_end: default_early_peak_window_end(),
            min_fade_percent: default_min_fade_percent(),
            max_additional_faders: default_max_additional_faders(),
            min_daily_volume_for_faders: default_min_daily_volume_for_faders(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalConfig {
    #[serde(default = "default_max_lookback_days")]
    pub max_lookback_days: u32,
    #[serde(default = "default_max_symbols_to_analyze")]
    pub max_symbols_to_analyze: usize,
    #[serde(default = "default_min_discovery_volume")]
    pub min_discovery_volume: i64,
    #[serde(default)]
    pub early_gainer: EarlyGainerConfig,
    /// `YYYY-MM-DD`. When set, the selector dispatches to Historical mode
    /// for this date instead of Live-Regular/Live-Pre-market, driving the
    /// replay pipeline end to end via the normal refresh loop.
    #[serde(default)]
    pub replay_date: Option<String>,
}

impl Default for HistoricalConfig {
    fn default() -> Self {
        Self {
            max_lookback_days: default_max_lookback_days(),
            max_symbols_to_analyze: default_max_symbols_to_analyze(),
            min_discovery_volume: default_min_discovery_volume(),
            early_gainer: EarlyGainerConfig::default(),
            replay_date: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevConfig {
    #[serde(default)]
    pub debug: bool,
    /// Overrides `Clock::now()`; epoch-ms. Used for tests and historical
    /// replay.
    #[serde(default)]
    pub override_now: Option<i64>,
}

// =============================================================================
// ScannerConfig
// =============================================================================

/// Top-level runtime configuration for the gap scanner.
///
/// Every field has a serde default so older JSON files missing new fields
/// still deserialize correctly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub gap: GapConfig,
    #[serde(default)]
    pub topping_tail_5m: ToppingTail5mConfig,
    #[serde(default)]
    pub green_run: GreenRunConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub scanning: ScanningConfig,
    #[serde(default)]
    pub historical: HistoricalConfig,
    #[serde(default)]
    pub dev: DevConfig,
}

impl ScannerConfig {
    /// Load from `path`, falling back to defaults (with a logged warning) on
    /// any read or parse failure — the config file is a convenience, not a
    /// hard startup requirement.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(cfg) => {
                    info!(path = %path.display(), "loaded scanner config");
                    cfg
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read config, using defaults");
                Self::default()
            }
        }
    }

    /// Persist via an atomic tmp-then-rename so a crash mid-write cannot
    /// corrupt the config file on disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(&tmp_path, json)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename {} -> {}", tmp_path.display(), path.display()))?;
        Ok(())
    }

    /// Validate thresholds per §4.2. Rejects `start >= end`, `minPct >=
    /// maxPct`, non-positive prices, and `nearHOD > maxHOD`.
    pub fn validate(&self) -> Result<(), ScannerError> {
        if self.session.start_minutes() >= self.session.end_minutes() {
            return Err(ScannerError::Config(format!(
                "session.start ({}) must be before session.end ({})",
                self.session.start, self.session.end
            )));
        }
        if self.gap.min_pct >= self.gap.max_pct {
            return Err(ScannerError::Config(format!(
                "gap.min_pct ({}) must be less than gap.max_pct ({})",
                self.gap.min_pct, self.gap.max_pct
            )));
        }
        if self.gap.min_price <= 0.0 || self.gap.max_price <= 0.0 {
            return Err(ScannerError::Config(
                "gap.min_price and gap.max_price must be positive".to_string(),
            ));
        }
        if self.gap.min_price >= self.gap.max_price {
            return Err(ScannerError::Config(format!(
                "gap.min_price ({}) must be less than gap.max_price ({})",
                self.gap.min_price, self.gap.max_price
            )));
        }
        if self.topping_tail_5m.max_high_distance_pct > self.topping_tail_5m.max_close_distance_pct {
            return Err(ScannerError::Config(
                "topping_tail_5m.max_high_distance_pct must not exceed max_close_distance_pct".to_string(),
            ));
        }
        if self.green_run.min_consecutive_green > self.green_run.max_consecutive_green {
            return Err(ScannerError::Config(
                "green_run.min_consecutive_green must not exceed max_consecutive_green".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(ScannerConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_session() {
        let mut cfg = ScannerConfig::default();
        cfg.session.start = "16:00".to_string();
        cfg.session.end = "09:30".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_gap_pct() {
        let mut cfg = ScannerConfig::default();
        cfg.gap.min_pct = 50.0;
        cfg.gap.max_pct = 10.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_positive_price() {
        let mut cfg = ScannerConfig::default();
        cfg.gap.min_price = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("gap-scanner-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("scanner_config.json");

        let mut cfg = ScannerConfig::default();
        cfg.gap.min_pct = 25.0;
        cfg.save(&path).unwrap();

        let loaded = ScannerConfig::load(&path);
        assert_eq!(loaded.gap.min_pct, 25.0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let loaded = ScannerConfig::load("/nonexistent/path/scanner_config.json");
        assert_eq!(loaded.gap.min_pct, default_gap_min_pct());
    }
}
