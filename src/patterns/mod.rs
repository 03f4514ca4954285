pub mod green_run;
pub mod topping_tail;

use crate::clock::Clock;
use crate::config::ScannerConfig;
use crate::state::symbol_state::SymbolState;
use crate::types::Alert;

/// Evaluates both detectors against the 5-minute history for a symbol at
/// `period_start`. Stateless beyond reading `state`'s already-updated
/// fields; never mutates `state`. `period_start` identifies which bar in
/// `five_min_history` is being evaluated — the caller may be catching up on
/// several periods at once, so the tail of the history is not necessarily
/// the bar in question.
pub fn evaluate(state: &SymbolState, period_start: i64, config: &ScannerConfig, clock: &Clock) -> Vec<Alert> {
    let bars: Vec<_> = state.five_min_history().iter().copied().collect();
    if bars.len() < 5 {
        return Vec::new(); // insufficient bars for pattern detection — skip.
    }
    let Some(index) = bars.iter().position(|b| b.start_ts == period_start) else {
        return Vec::new(); // the period's bar isn't in history — skip.
    };
    let bar = bars[index];
    if bar.start_ts % 300_000 != 0 {
        return Vec::new(); // bad timestamp alignment — skip evaluation.
    }

    let mut alerts = Vec::new();

    if let Some(alert) = topping_tail::evaluate(
        &bars,
        index,
        state.hod,
        state.cumulative_volume,
        state.gap_percent,
        &state.symbol,
        &config.topping_tail_5m,
        &config.gap,
        &config.session,
        clock,
    ) {
        alerts.push(alert);
    }

    if config.green_run.enabled {
        if let Some(alert) =
            green_run::evaluate(&bars, index, state.hod, state.cumulative_volume, &state.symbol, &config.green_run, clock)
        {
            alerts.push(alert);
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Candle;

    #[test]
    fn skips_when_fewer_than_five_bars() {
        let mut state = SymbolState::new("SYM", 20.0, 1.0, 5.0);
        state.merge_5min_pull(Candle { start_ts: 0, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 100 });
        let config = ScannerConfig::default();
        let clock = Clock::live();
        assert!(evaluate(&state, 0, &config, &clock).is_empty());
    }
}
