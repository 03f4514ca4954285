// =============================================================================
// Topping-Tail-5m detector — §4.7.1
// =============================================================================
//
// A pure function: no I/O, no mutation of `bars` or any shared state. Seven
// ordered gates; the first failure short-circuits with `None`. `hod` must
// already include the target bar's own high (callers update HOD before
// calling this).
// =============================================================================

use crate::clock::Clock;
use crate::config::{GapConfig, SessionConfig, ToppingTail5mConfig};
use crate::types::{Alert, AlertType, Candle};

#[allow(clippy::too_many_arguments)]
pub fn evaluate(
    bars: &[Candle],
    index: usize,
    hod: f64,
    cumulative_volume: i64,
    gap_percent: f64,
    symbol: &str,
    cfg: &ToppingTail5mConfig,
    gap_cfg: &GapConfig,
    session: &SessionConfig,
    clock: &Clock,
) -> Option<Alert> {
    let bar = bars.get(index)?;

    // 1. Session gate.
    if !clock.is_within_session_window(bar.start_ts, session) {
        return None;
    }

    // 2. Volume gate.
    if cumulative_volume < gap_cfg.min_cumulative_volume {
        return None;
    }

    // 3. HOD proximity.
    if cfg.require_strict_hod_break {
        if bar.high < hod {
            return None;
        }
    } else {
        let high_distance_pct = (hod - bar.high).abs() / hod * 100.0;
        let close_distance_pct = (hod - bar.close) / hod * 100.0;
        if high_distance_pct > cfg.max_high_distance_pct || close_distance_pct > cfg.max_close_distance_pct {
            return None;
        }
    }

    // 4. Color.
    if cfg.must_close_red && bar.close >= bar.open {
        return None;
    }

    // 5. Upper-shadow test.
    let range = bar.high - bar.low;
    if range <= 0.0 {
        return None;
    }
    let body = (bar.open - bar.close).abs();
    let upper_shadow = bar.high - bar.open.max(bar.close);
    let shadow_to_body = if body == 0.0 { f64::INFINITY } else { upper_shadow / body };
    if shadow_to_body < cfg.min_shadow_to_body_ratio {
        return None;
    }

    // 6. Close-position.
    let close_pct = (bar.high - bar.close) / range * 100.0;
    if close_pct < cfg.min_close_percent {
        return None;
    }

    // 7. Per-bar volume.
    if bar.volume < cfg.min_bar_volume {
        return None;
    }
    if cumulative_volume > cfg.max_bar_volume {
        return None;
    }

    let id = Alert::make_id(symbol, bar.start_ts, index, AlertType::ToppingTail5m);
    Some(Alert {
        id,
        ts: bar.start_ts,
        symbol: symbol.to_string(),
        kind: AlertType::ToppingTail5m,
        detail: format!("topping tail at {:.4} against HOD {:.4}", bar.close, hod),
        price: bar.close,
        volume: cumulative_volume,
        gap_percent: Some(gap_percent),
        hod: Some(hod),
        historical: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(o: f64, h: f64, l: f64, c: f64, v: i64, start_ts: i64) -> Candle {
        Candle { start_ts, open: o, high: h, low: l, close: c, volume: v }
    }

    fn live_clock() -> Clock {
        use chrono::{TimeZone, Utc};
        Clock::fixed(Utc.with_ymd_and_hms(2024, 7, 1, 11, 15, 0).unwrap())
    }

    #[test]
    fn s1_hod_break_and_topping_tail_detected() {
        let clock = live_clock();
        let session = SessionConfig::default();
        let cfg = ToppingTail5mConfig::default();
        let gap_cfg = GapConfig::default();
        let bars = vec![bar(4.90, 5.20, 4.85, 4.92, 40_000, clock.now().timestamp_millis())];

        let alert =
            evaluate(&bars, 0, 5.20, 700_000, 200.0, "SYM", &cfg, &gap_cfg, &session, &clock).expect("alert expected");
        assert_eq!(alert.price, 4.92);
        assert_eq!(alert.hod, Some(5.20));
        assert_eq!(alert.id, format!("SYM-{}-0-ToppingTail5m", bars[0].start_ts));
    }

    #[test]
    fn s2_hod_not_broken_no_alert() {
        let clock = live_clock();
        let session = SessionConfig::default();
        let cfg = ToppingTail5mConfig::default();
        let gap_cfg = GapConfig::default();
        let bars = vec![bar(4.90, 5.20, 4.85, 4.92, 40_000, clock.now().timestamp_millis())];

        assert!(evaluate(&bars, 0, 5.50, 700_000, 200.0, "SYM", &cfg, &gap_cfg, &session, &clock).is_none());
    }

    #[test]
    fn s3_shallow_close_no_alert() {
        let clock = live_clock();
        let session = SessionConfig::default();
        let cfg = ToppingTail5mConfig::default();
        let gap_cfg = GapConfig::default();
        let bars = vec![bar(4.90, 5.20, 4.85, 5.10, 40_000, clock.now().timestamp_millis())];

        assert!(evaluate(&bars, 0, 5.00, 700_000, 200.0, "SYM", &cfg, &gap_cfg, &session, &clock).is_none());
    }

    #[test]
    fn s4_volume_gate_blocks_alert() {
        let clock = live_clock();
        let session = SessionConfig::default();
        let cfg = ToppingTail5mConfig::default();
        let gap_cfg = GapConfig::default();
        let bars = vec![bar(4.90, 5.20, 4.85, 4.92, 40_000, clock.now().timestamp_millis())];

        assert!(evaluate(&bars, 0, 5.20, 300_000, 200.0, "SYM", &cfg, &gap_cfg, &session, &clock).is_none());
    }

    #[test]
    fn zero_range_bar_is_rejected() {
        let clock = live_clock();
        let session = SessionConfig::default();
        let cfg = ToppingTail5mConfig::default();
        let gap_cfg = GapConfig::default();
        let bars = vec![bar(5.0, 5.0, 5.0, 5.0, 40_000, clock.now().timestamp_millis())];

        assert!(evaluate(&bars, 0, 5.0, 700_000, 200.0, "SYM", &cfg, &gap_cfg, &session, &clock).is_none());
    }

    #[test]
    fn detector_is_pure_and_deterministic() {
        let clock = live_clock();
        let session = SessionConfig::default();
        let cfg = ToppingTail5mConfig::default();
        let gap_cfg = GapConfig::default();
        let bars = vec![bar(4.90, 5.20, 4.85, 4.92, 40_000, clock.now().timestamp_millis())];
        let bars_before = bars.clone();

        let a = evaluate(&bars, 0, 5.20, 700_000, 200.0, "SYM", &cfg, &gap_cfg, &session, &clock);
        let b = evaluate(&bars, 0, 5.20, 700_000, 200.0, "SYM", &cfg, &gap_cfg, &session, &clock);
        assert_eq!(bars, bars_before);
        assert_eq!(a.map(|x| x.id), b.map(|x| x.id));
    }
}
