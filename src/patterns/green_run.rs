// =============================================================================
// Green-Run-Reject detector — §4.7.2 (optional, config-gated)
// =============================================================================
//
// A pure function: no I/O, no mutation of `bars`. Looks back up to 20 prior
// bars from `index` counting a consecutive green run, then checks the
// red bar at `index` rejects near the run's high.
// =============================================================================

use crate::clock::Clock;
use crate::config::GreenRunConfig;
use crate::types::{Alert, AlertType, Candle};

const LOOKBACK: usize = 20;
const VOLUME_SANITY_CEILING: i64 = 50_000_000;

pub fn evaluate(
    bars: &[Candle],
    index: usize,
    hod: f64,
    cumulative_volume: i64,
    symbol: &str,
    cfg: &GreenRunConfig,
    clock: &Clock,
) -> Option<Alert> {
    let bar = bars.get(index)?;

    // 1. Bar is 5-min aligned: ET minute ≡ 0 mod 5, second = 0.
    if bar.start_ts % 60_000 != 0 {
        return None;
    }
    if clock.minutes_since_midnight_ms(bar.start_ts) % 5 != 0 {
        return None;
    }

    // 2. Target bar is red.
    if !(bar.open - bar.close > 0.001) {
        return None;
    }

    // 3. Look back up to 20 prior bars, counting the consecutive green run.
    let mut count = 0u32;
    let mut run_start: Option<f64> = None;
    let mut run_high: Option<f64> = None;
    for i in (0..index).rev().take(LOOKBACK) {
        let prior = &bars[i];
        if prior.close - prior.open > 0.001 {
            count += 1;
            run_start = Some(prior.open);
            run_high = Some(run_high.map_or(prior.high, |h: f64| h.max(prior.high)));
        } else {
            break;
        }
    }

    let (run_start, run_high) = match (run_start, run_high) {
        (Some(s), Some(h)) => (s, h),
        _ => return None,
    };

    // 4. Consecutive-green bounds.
    if count < cfg.min_consecutive_green || count > cfg.max_consecutive_green {
        return None;
    }

    // 5. Run gain.
    let run_gain_pct = (run_high - run_start) / run_start * 100.0;
    if run_gain_pct < cfg.min_run_gain_pct {
        return None;
    }

    // 6. Near HOD.
    let distance_from_hod_pct = (hod - run_high) / hod * 100.0;
    if distance_from_hod_pct > cfg.max_distance_from_hod_pct {
        return None;
    }

    // 7. Volume sanity.
    if cumulative_volume > VOLUME_SANITY_CEILING {
        return None;
    }

    let id = Alert::make_id(symbol, bar.start_ts, index, AlertType::GreenRunReject);
    Some(Alert {
        id,
        ts: bar.start_ts,
        symbol: symbol.to_string(),
        kind: AlertType::GreenRunReject,
        detail: format!("rejected {count}-bar green run near HOD {hod:.4} at {:.4}", bar.close),
        price: bar.close,
        volume: cumulative_volume,
        gap_percent: None,
        hod: Some(hod),
        historical: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bar_at(hour: u32, minute: u32, o: f64, c: f64, h: f64) -> Candle {
        let ts = Utc.with_ymd_and_hms(2024, 7, 1, hour, minute, 0).unwrap().timestamp_millis();
        Candle { start_ts: ts, open: o, high: h, low: o.min(c) - 0.01, close: c, volume: 10_000 }
    }

    #[test]
    fn s5_green_run_reject_happy_path() {
        let clock = Clock::live();
        let cfg = GreenRunConfig {
            enabled: true,
            min_consecutive_green: 4,
            max_consecutive_green: 20,
            min_run_gain_pct: 2.0,
            max_distance_from_hod_pct: 3.0,
        };
        // ET 07:00..07:20 greens, then a red bar at 07:20 (UTC 11:00 in summer).
        let bars = vec![
            bar_at(11, 0, 4.80, 4.85, 4.85),
            bar_at(11, 5, 4.85, 4.90, 4.90),
            bar_at(11, 10, 4.90, 4.95, 4.95),
            bar_at(11, 15, 4.95, 5.00, 5.00),
            bar_at(11, 20, 5.00, 4.92, 5.00),
        ];
        let alert = evaluate(&bars, 4, 5.00, 700_000, "SYM", &cfg, &clock).expect("alert expected");
        assert_eq!(alert.price, 4.92);
    }

    #[test]
    fn red_bar_without_green_run_yields_no_alert() {
        let clock = Clock::live();
        let cfg = GreenRunConfig { enabled: true, ..GreenRunConfig::default() };
        let bars = vec![bar_at(11, 0, 5.00, 4.80, 5.00), bar_at(11, 5, 5.00, 4.70, 5.00)];
        assert!(evaluate(&bars, 1, 5.00, 700_000, "SYM", &cfg, &clock).is_none());
    }

    #[test]
    fn misaligned_bar_is_skipped() {
        let clock = Clock::live();
        let cfg = GreenRunConfig::default();
        let mut bar = bar_at(11, 0, 5.00, 4.80, 5.00);
        bar.start_ts += 30_000; // not minute-aligned
        assert!(evaluate(&[bar], 0, 5.00, 700_000, "SYM", &cfg, &clock).is_none());
    }
}
