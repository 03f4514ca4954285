// =============================================================================
// Watchlist Selector — C4
// =============================================================================
//
// Produces the current qualifying gap-stock set. Three dispatchable modes
// (Live-Regular, Live-Pre-market, Historical), picked deterministically from
// Clock + Config. Selector output is idempotent for a fixed `now` given the
// same cached provider responses (the request cache in `MarketDataClient`
// supplies that determinism).
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ScannerConfig;
use crate::market_data::client::MarketDataClient;
use crate::types::{SelectorMode, WatchlistEntry};

const HISTORICAL_BATCH_SIZE: usize = 25;
const PRE_MARKET_CANDIDATE_CAP: usize = 20;

pub struct WatchlistSelector {
    client: Arc<MarketDataClient>,
    ticker_type_cache: Mutex<HashMap<String, String>>,
}

impl WatchlistSelector {
    pub fn new(client: Arc<MarketDataClient>) -> Self {
        Self { client, ticker_type_cache: Mutex::new(HashMap::new()) }
    }

    /// Pick the dispatchable mode from clock + config. `historical.replay_date`
    /// set selects Historical regardless of the clock; otherwise regular
    /// session hours use Live-Regular and the pre-market window uses
    /// Live-Pre-market.
    pub fn select_mode(&self, clock: &Clock, config: &ScannerConfig) -> SelectorMode {
        if config.historical.replay_date.is_some() {
            return SelectorMode::Historical;
        }
        let et = clock.et_now();
        let minutes = et.minutes_since_midnight();
        if minutes >= config.session.start_minutes() {
            SelectorMode::LiveRegular
        } else {
            SelectorMode::LivePreMarket
        }
    }

    /// Run the selector for `now`, dispatching to the mode `select_mode`
    /// picked. On catastrophic failure, returns the previous watchlist
    /// unchanged (the orchestrator keeps running).
    pub async fn refresh(
        &self,
        clock: &Clock,
        config: &ScannerConfig,
        previous: &[WatchlistEntry],
    ) -> Vec<WatchlistEntry> {
        let mode = self.select_mode(clock, config);
        let result = match mode {
            SelectorMode::LiveRegular => self.run_live_regular(clock, config).await,
            SelectorMode::LivePreMarket => self.run_live_pre_market(clock, config).await,
            SelectorMode::Historical => match &config.historical.replay_date {
                Some(date) => self.run_historical(date, &previous_calendar_date(date), config).await,
                None => Ok(Vec::new()),
            },
        };

        match result {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, mode = %mode, "watchlist selector failed, keeping previous watchlist");
                previous.to_vec()
            }
        }
    }

    // -------------------------------------------------------------------
    // Mode L: Live-Regular
    // -------------------------------------------------------------------

    async fn run_live_regular(&self, clock: &Clock, config: &ScannerConfig) -> anyhow::Result<Vec<WatchlistEntry>> {
        let snapshot = self.client.get_gainers_snapshot().await?;
        let now_ms = clock.now().timestamp_millis();
        let mut entries = Vec::new();

        for ticker in snapshot.tickers {
            let price = match ticker.last_trade.as_ref().map(|t| t.p) {
                Some(p) => p,
                None => continue,
            };
            let prev_close = match ticker.prev_day.as_ref().map(|p| p.c) {
                Some(c) => c,
                None => continue,
            };
            let change_pct = ticker.todays_change_perc.unwrap_or(0.0);
            let volume = ticker.min.as_ref().map(|m| m.av as i64).unwrap_or(0);

            if price < config.gap.min_price || price > config.gap.max_price {
                continue;
            }
            if volume < config.gap.min_cumulative_volume {
                continue;
            }
            if change_pct < config.gap.min_pct {
                continue;
            }

            let hod = self.calculate_true_hod(&ticker.ticker, clock, config, prev_close.max(price)).await.unwrap_or(price);

            entries.push(WatchlistEntry {
                symbol: ticker.ticker,
                gap_percent: change_pct,
                current_price: price,
                previous_close: prev_close,
                cumulative_volume: volume,
                hod,
                ema200: None,
                discovered_at: now_ms,
            });
        }

        info!(count = entries.len(), "live-regular watchlist refresh complete");
        Ok(entries)
    }

    // -------------------------------------------------------------------
    // Mode P: Live-Pre-market
    // -------------------------------------------------------------------

    async fn run_live_pre_market(&self, clock: &Clock, config: &ScannerConfig) -> anyhow::Result<Vec<WatchlistEntry>> {
        let snapshot = self.client.get_gainers_snapshot().await?;
        let now_ms = clock.now().timestamp_millis();

        let candidates: Vec<_> = snapshot
            .tickers
            .into_iter()
            .filter_map(|t| {
                let price = t.last_trade.as_ref().map(|lt| lt.p)?;
                let prev_close = t.prev_day.as_ref().map(|p| p.c)?;
                let change_pct = t.todays_change_perc.unwrap_or(0.0);
                if price < config.gap.min_price || price > config.gap.max_price {
                    return None;
                }
                if change_pct < config.gap.min_pct {
                    return None;
                }
                Some((t.ticker, price, prev_close, change_pct))
            })
            .take(PRE_MARKET_CANDIDATE_CAP)
            .collect();

        let mut entries = Vec::new();
        for (symbol, price, prev_close, change_pct) in candidates {
            let today_start = session_day_start_ms(clock);
            let minute_bars = self
                .client
                .get_minute_aggs(&symbol, today_start, clock.now().timestamp_millis(), config.api.aggregates_limit)
                .await?;

            let mut cumulative_volume = 0i64;
            let mut hod = prev_close;
            for bar in &minute_bars.results {
                if bar.h > hod {
                    hod = bar.h;
                }
                if clock.is_within_session_window(bar.t, &config.session) {
                    cumulative_volume += bar.v as i64;
                }
            }

            if cumulative_volume < config.gap.min_cumulative_volume {
                continue;
            }

            entries.push(WatchlistEntry {
                symbol,
                gap_percent: change_pct,
                current_price: price,
                previous_close: prev_close,
                cumulative_volume,
                hod,
                ema200: None,
                discovered_at: now_ms,
            });
        }

        info!(count = entries.len(), "live-pre-market watchlist refresh complete");
        Ok(entries)
    }

    // -------------------------------------------------------------------
    // Mode H: Historical
    // -------------------------------------------------------------------

    pub async fn run_historical(&self, date: &str, prev_date: &str, config: &ScannerConfig) -> anyhow::Result<Vec<WatchlistEntry>> {
        // Stage 1: grouped daily bars build prevClose and candidate set.
        let today = self.client.get_grouped(date).await?;
        let prev = self.client.get_grouped(prev_date).await?;
        let prev_close: HashMap<String, f64> = prev.results.iter().map(|b| (b.ticker.clone(), b.c)).collect();

        struct Candidate {
            symbol: String,
            prev_close: f64,
            daily_volume: f64,
            open: f64,
            needs_peak_check: bool,
        }

        let mut candidates: Vec<Candidate> = Vec::new();
        for bar in &today.results {
            let Some(&pc) = prev_close.get(&bar.ticker) else { continue };
            if bar.v < config.historical.min_discovery_volume as f64 {
                continue;
            }
            let in_core_range = bar.o >= config.gap.min_price && bar.o <= config.gap.max_price;
            let in_edge_range = bar.o >= 0.60 && bar.o < config.gap.min_price;
            if !in_core_range && !in_edge_range {
                continue;
            }
            candidates.push(Candidate {
                symbol: bar.ticker.clone(),
                prev_close: pc,
                daily_volume: bar.v,
                open: bar.o,
                needs_peak_check: in_edge_range,
            });
        }

        candidates.sort_by(|a, b| b.daily_volume.partial_cmp(&a.daily_volume).unwrap_or(std::cmp::Ordering::Equal));
        let keep = ((config.historical.max_symbols_to_analyze as f64) * 1.5).ceil() as usize;
        candidates.truncate(keep);

        // Stage 1b + Stage 2: peak-gap over 06:30-10:00 ET 5-min bars, bounded
        // concurrency of 25, early-terminating once enough qualify.
        let window_start = et_window_ms(date, 6, 30);
        let window_end = et_window_ms(date, 10, 0);
        let (early_peak_hour, early_peak_minute) = parse_hh_mm(&config.historical.early_gainer.early_peak_window_end);
        let early_peak_window_end_ms = et_window_ms(date, early_peak_hour, early_peak_minute);
        let client = self.client.clone();
        let gap_min_pct = config.gap.min_pct;
        let min_price = config.gap.min_price;
        let max_price = config.gap.max_price;
        let max_symbols = config.historical.max_symbols_to_analyze;
        let aggregates_limit = config.api.aggregates_limit;

        let mut qualified: Vec<WatchlistEntry> = Vec::new();
        let mut fader_pool: Vec<(WatchlistEntry, f64, bool, f64)> = Vec::new();

        let mut batch_stream = stream::iter(candidates.into_iter().map(|c| {
            let client = client.clone();
            async move {
                let bars =
                    client.get_5min_aggs(&c.symbol, window_start, window_end, aggregates_limit).await.ok()?;
                if bars.results.is_empty() {
                    return None;
                }

                if c.needs_peak_check {
                    let peak = bars.results.iter().map(|b| b.h).fold(f64::MIN, f64::max);
                    if !(peak >= min_price && peak <= max_price) {
                        return None;
                    }
                }

                let (peak_price, peak_time) = bars
                    .results
                    .iter()
                    .map(|b| (b.h, b.t))
                    .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
                    .unwrap_or((c.open, window_start));
                let peak_gap = (peak_price - c.prev_close) / c.prev_close * 100.0;

                let open_price = match bars.results.iter().find(|b| b.t >= et_window_ms(date, 9, 30)).map(|b| b.o) {
                    Some(o) => o,
                    None => match client.get_open_close(&c.symbol, date).await {
                        Ok(oc) => oc.open,
                        Err(_) => c.open,
                    },
                };
                let fade_pct = (peak_price - open_price) / peak_price * 100.0;
                let is_early_peak = peak_time <= early_peak_window_end_ms;

                Some((c, peak_gap, peak_price, fade_pct, is_early_peak))
            }
        }))
        .buffer_unordered(HISTORICAL_BATCH_SIZE);

        while let Some(result) = batch_stream.next().await {
            let Some((c, peak_gap, peak_price, fade_pct, is_early_peak)) = result else { continue };
            let entry = WatchlistEntry {
                symbol: c.symbol.clone(),
                gap_percent: peak_gap,
                current_price: peak_price,
                previous_close: c.prev_close,
                cumulative_volume: c.daily_volume as i64,
                hod: peak_price,
                ema200: None,
                discovered_at: 0,
            };

            if peak_gap >= gap_min_pct {
                qualified.push(entry);
                if qualified.len() >= max_symbols {
                    break; // early termination
                }
            } else if c.daily_volume >= config.historical.early_gainer.min_daily_volume_for_faders as f64 {
                fader_pool.push((entry, peak_gap, is_early_peak, fade_pct));
            }
        }

        // Stage 2b: optional faders.
        if config.historical.early_gainer.enabled {
            let eg = &config.historical.early_gainer;
            let mut added = 0usize;
            for (entry, peak_gap, is_early_peak, fade_pct) in fader_pool {
                if added >= eg.max_additional_faders {
                    break;
                }
                if peak_gap >= eg.min_early_peak_gap && is_early_peak && fade_pct >= eg.min_fade_percent {
                    qualified.push(entry);
                    added += 1;
                }
            }
        }

        // Stage 3: ticker type must be common stock.
        let mut survivors = Vec::new();
        for entry in qualified {
            if self.is_common_stock(&entry.symbol, date).await.unwrap_or(false) {
                survivors.push(entry);
            } else {
                debug!(symbol = %entry.symbol, "excluded: not common stock");
            }
        }

        // Stage 4: sort by |gapPct| descending, truncate.
        survivors.sort_by(|a, b| b.gap_percent.abs().partial_cmp(&a.gap_percent.abs()).unwrap_or(std::cmp::Ordering::Equal));
        survivors.truncate(config.historical.max_symbols_to_analyze);

        info!(count = survivors.len(), date, "historical watchlist selection complete");
        Ok(survivors)
    }

    async fn is_common_stock(&self, symbol: &str, date: &str) -> anyhow::Result<bool> {
        {
            let cache = self.ticker_type_cache.lock();
            if let Some(t) = cache.get(symbol) {
                return Ok(t == "CS");
            }
        }
        let ticker_type = self.client.get_ticker_type(symbol, date).await?;
        let is_cs = ticker_type == "CS";
        self.ticker_type_cache.lock().insert(symbol.to_string(), ticker_type);
        Ok(is_cs)
    }

    /// True HOD = max(previous trading day's after-hours high, current day's
    /// high across all extended-hours bars). Never the provider's daily `h`.
    async fn calculate_true_hod(
        &self,
        symbol: &str,
        clock: &Clock,
        config: &ScannerConfig,
        floor: f64,
    ) -> anyhow::Result<f64> {
        let today_start = session_day_start_ms(clock);
        let now_ms = clock.now().timestamp_millis();
        let yesterday_start = today_start - 24 * 60 * 60 * 1000;

        let today_bars =
            self.client.get_minute_aggs(symbol, today_start, now_ms, config.api.aggregates_limit).await?;
        let prev_bars =
            self.client.get_minute_aggs(symbol, yesterday_start, today_start, config.api.aggregates_limit).await?;

        let today_high = today_bars.results.iter().map(|b| b.h).fold(floor, f64::max);
        let prev_after_hours_high = prev_bars
            .results
            .iter()
            .filter(|b| clock.minutes_since_midnight_ms(b.t) >= 16 * 60) // 16:00 ET
            .map(|b| b.h)
            .fold(0.0, f64::max);

        Ok(today_high.max(prev_after_hours_high))
    }
}

fn session_day_start_ms(clock: &Clock) -> i64 {
    let et = clock.et_now();
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    New_York
        .with_ymd_and_hms(et.year, et.month, et.day, 0, 0, 0)
        .single()
        .map(|dt| dt.with_timezone(&chrono::Utc).timestamp_millis())
        .unwrap_or_else(|| clock.now().timestamp_millis())
}

/// Parse an `"HH:MM"` config string into `(hour, minute)`, falling back to
/// `07:30` (the historical default early-peak cutoff) on any parse failure.
fn parse_hh_mm(s: &str) -> (u32, u32) {
    s.split_once(':')
        .and_then(|(h, m)| Some((h.parse::<u32>().ok()?, m.parse::<u32>().ok()?)))
        .unwrap_or((7, 30))
}

/// The prior calendar day for `date` (`YYYY-MM-DD`), stepping back over
/// weekends to the closest preceding trading day. Does not account for
/// market holidays.
fn previous_calendar_date(date: &str) -> String {
    use chrono::{Datelike, NaiveDate};
    let Ok(parsed) = NaiveDate::parse_from_str(date, "%Y-%m-%d") else {
        return date.to_string();
    };
    let mut prev = parsed.pred_opt().unwrap_or(parsed);
    while matches!(prev.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) {
        prev = prev.pred_opt().unwrap_or(prev);
    }
    prev.format("%Y-%m-%d").to_string()
}

fn et_window_ms(date: &str, hour: u32, minute: u32) -> i64 {
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    let parts: Vec<&str> = date.split('-').collect();
    if parts.len() != 3 {
        return 0;
    }
    let (Ok(y), Ok(m), Ok(d)) = (parts[0].parse::<i32>(), parts[1].parse::<u32>(), parts[2].parse::<u32>()) else {
        return 0;
    };
    New_York
        .with_ymd_and_hms(y, m, d, hour, minute, 0)
        .single()
        .map(|dt| dt.with_timezone(&chrono::Utc).timestamp_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiConfig;
    use chrono::{TimeZone, Utc};

    #[test]
    fn mode_dispatch_uses_session_start() {
        let client = Arc::new(MarketDataClient::new("k", &ApiConfig::default()).unwrap());
        let selector = WatchlistSelector::new(client);
        let config = ScannerConfig::default();

        let pre_market = Clock::fixed(Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap()); // 08:00 ET
        assert_eq!(selector.select_mode(&pre_market, &config), SelectorMode::LivePreMarket);

        let regular = Clock::fixed(Utc.with_ymd_and_hms(2024, 7, 1, 14, 0, 0).unwrap()); // 10:00 ET
        assert_eq!(selector.select_mode(&regular, &config), SelectorMode::LiveRegular);
    }

    #[test]
    fn et_window_ms_computes_expected_instant() {
        let ms = et_window_ms("2024-09-25", 9, 30);
        let expected = Utc.with_ymd_and_hms(2024, 9, 25, 13, 30, 0).unwrap().timestamp_millis();
        assert_eq!(ms, expected);
    }

    #[test]
    fn replay_date_selects_historical_mode() {
        let client = Arc::new(MarketDataClient::new("k", &ApiConfig::default()).unwrap());
        let selector = WatchlistSelector::new(client);
        let mut config = ScannerConfig::default();
        config.historical.replay_date = Some("2024-09-25".to_string());

        let regular = Clock::fixed(Utc.with_ymd_and_hms(2024, 7, 1, 14, 0, 0).unwrap()); // 10:00 ET
        assert_eq!(selector.select_mode(&regular, &config), SelectorMode::Historical);
    }

    #[test]
    fn previous_calendar_date_steps_back_over_weekend() {
        assert_eq!(previous_calendar_date("2024-09-25"), "2024-09-24");
        assert_eq!(previous_calendar_date("2024-09-23"), "2024-09-20"); // Monday -> Friday
    }

    #[test]
    fn parse_hh_mm_falls_back_on_bad_input() {
        assert_eq!(parse_hh_mm("07:30"), (7, 30));
        assert_eq!(parse_hh_mm("garbage"), (7, 30));
    }
}
