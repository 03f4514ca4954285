// =============================================================================
// Orchestrator — C10
// =============================================================================
//
// Owns the full subsystem graph (selector, ingestion, scheduler, dispatcher,
// stream task) and drives the lifecycle state machine:
//
//   Idle → Starting → Running → Stopping → Idle
//
// Mirrors the central-state ownership pattern of a long-running trading
// engine: one struct holds `Arc`s to every subsystem, `parking_lot::RwLock`
// guards the mutable collections (watchlist, recent alerts, phase), and a
// `tokio::sync::watch` channel fans a stop signal out to every background
// task.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::config::ScannerConfig;
use crate::dispatcher::AlertDispatcher;
use crate::error::ScannerError;
use crate::ingestion::IngestionEngine;
use crate::market_data::client::MarketDataClient;
use crate::market_data::stream::{run_stream, StreamEvent, SubscriptionSet};
use crate::scheduler::Scheduler;
use crate::state::SymbolStateStore;
use crate::types::{Alert, ScannerPhase, WatchlistEntry};
use crate::watchlist::WatchlistSelector;

/// Maximum number of recent alerts retained for the dashboard feed.
const MAX_RECENT_ALERTS: usize = 200;

pub struct Orchestrator {
    api_key: String,
    config: Arc<RwLock<ScannerConfig>>,
    clock: Clock,
    phase: RwLock<ScannerPhase>,

    client: Arc<MarketDataClient>,
    selector: Arc<WatchlistSelector>,
    store: Arc<SymbolStateStore>,
    dispatcher: Arc<AlertDispatcher>,
    ingestion: Arc<IngestionEngine>,

    watchlist: RwLock<Vec<WatchlistEntry>>,
    recent_alerts: RwLock<VecDeque<Alert>>,
    subscriptions: SubscriptionSet,
    last_watchlist_refresh: RwLock<Option<std::time::Instant>>,

    stop_tx: RwLock<Option<watch::Sender<bool>>>,
    tasks: RwLock<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(api_key: impl Into<String>, config: ScannerConfig, clock: Clock) -> Result<Arc<Self>, ScannerError> {
        let api_key = api_key.into();
        let client = Arc::new(MarketDataClient::new(&api_key, &config.api)?);
        let store = Arc::new(SymbolStateStore::new());
        let dispatcher = Arc::new(AlertDispatcher::new());
        let selector = Arc::new(WatchlistSelector::new(client.clone()));
        let ingestion = Arc::new(IngestionEngine::new(store.clone(), client.clone(), dispatcher.clone()));

        Ok(Arc::new(Self {
            api_key,
            config: Arc::new(RwLock::new(config)),
            clock,
            phase: RwLock::new(ScannerPhase::Idle),
            client,
            selector,
            store,
            dispatcher,
            ingestion,
            watchlist: RwLock::new(Vec::new()),
            recent_alerts: RwLock::new(VecDeque::new()),
            subscriptions: SubscriptionSet::new(Vec::new()),
            last_watchlist_refresh: RwLock::new(None),
            stop_tx: RwLock::new(None),
            tasks: RwLock::new(Vec::new()),
        }))
    }

    pub fn phase(&self) -> ScannerPhase {
        *self.phase.read()
    }

    pub fn config_snapshot(&self) -> ScannerConfig {
        self.config.read().clone()
    }

    pub fn watchlist_snapshot(&self) -> Vec<WatchlistEntry> {
        self.watchlist.read().clone()
    }

    pub fn recent_alerts_snapshot(&self) -> Vec<Alert> {
        self.recent_alerts.read().iter().cloned().collect()
    }

    pub fn store(&self) -> &Arc<SymbolStateStore> {
        &self.store
    }

    /// Transitions Idle → Starting → Running. No-op if already running.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        if *self.phase.read() != ScannerPhase::Idle {
            warn!(phase = %self.phase(), "start requested while not idle, ignoring");
            return Ok(());
        }
        *self.phase.write() = ScannerPhase::Starting;
        info!("orchestrator starting");

        let config = self.config_snapshot();

        let initial_watchlist = self.selector.refresh(&self.clock, &config, &[]).await;
        for entry in &initial_watchlist {
            if let Err(e) = self.ingestion.backfill(entry, &self.clock, &config).await {
                error!(symbol = %entry.symbol, error = %e, "backfill failed, symbol will start cold");
            }
        }
        *self.watchlist.write() = initial_watchlist.clone();
        *self.last_watchlist_refresh.write() = Some(std::time::Instant::now());
        self.subscriptions.set(initial_watchlist.iter().map(|e| e.symbol.clone()).collect());

        let self_for_alerts = self.clone();
        self.dispatcher.subscribe(Arc::new(move |alert: &Alert| {
            let mut buf = self_for_alerts.recent_alerts.write();
            buf.push_back(alert.clone());
            if buf.len() > MAX_RECENT_ALERTS {
                buf.pop_front();
            }
        }));

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.stop_tx.write() = Some(stop_tx);

        let mut tasks = Vec::new();

        // Stream ingestion task: forwards decoded bars into the ingestion
        // engine as they arrive.
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<StreamEvent>();
        let stream_api_key = self.api_key.clone();
        let stream_subs = self.subscriptions.clone();
        let stream_stop = stop_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = run_stream(stream_api_key, stream_subs, event_tx, stream_stop).await {
                error!(error = %e, "stream task exited with error");
            }
        }));

        let consumer_self = self.clone();
        let mut consumer_stop = stop_rx.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = event_rx.recv() => {
                        let config = consumer_self.config_snapshot();
                        consumer_self.ingestion.handle_stream_event(event, &consumer_self.clock, &config);
                    }
                    _ = consumer_stop.changed() => {
                        if *consumer_stop.borrow() {
                            break;
                        }
                    }
                    else => break,
                }
            }
        }));

        // Scheduler task: boundary-aligned watchlist refresh + pull-validate.
        let scheduler = Scheduler::new(self.store.clone(), self.ingestion.clone());
        let scheduler_self = self.clone();
        let scheduler_stop = stop_rx.clone();
        let scheduler_config = self.config.clone();
        tasks.push(tokio::spawn(async move {
            let clock = scheduler_self.clock.clone();
            scheduler
                .run(clock, scheduler_config, scheduler_stop, || {
                    let scheduler_self = scheduler_self.clone();
                    async move {
                        scheduler_self.maybe_refresh_watchlist().await;
                    }
                })
                .await;
        }));

        *self.tasks.write() = tasks;
        *self.phase.write() = ScannerPhase::Running;
        info!(symbols = self.watchlist.read().len(), "orchestrator running");
        Ok(())
    }

    async fn maybe_refresh_watchlist(self: &Arc<Self>) {
        let config = self.config_snapshot();
        let refresh_interval = Duration::from_secs(config.scanning.watchlist_refresh_secs);
        let due = self.last_watchlist_refresh.read().map(|at| at.elapsed() >= refresh_interval).unwrap_or(true);
        if !due {
            return;
        }
        *self.last_watchlist_refresh.write() = Some(std::time::Instant::now());

        let previous = self.watchlist_snapshot();
        let refreshed = self.selector.refresh(&self.clock, &config, &previous).await;

        let previous_symbols: std::collections::HashSet<_> = previous.iter().map(|e| e.symbol.clone()).collect();
        for entry in &refreshed {
            if !previous_symbols.contains(&entry.symbol) {
                if let Err(e) = self.ingestion.backfill(entry, &self.clock, &config).await {
                    error!(symbol = %entry.symbol, error = %e, "backfill failed for newly-added symbol");
                }
            }
        }
        let refreshed_symbols: std::collections::HashSet<_> = refreshed.iter().map(|e| e.symbol.clone()).collect();
        for symbol in previous_symbols.difference(&refreshed_symbols) {
            self.ingestion.teardown(symbol);
        }

        self.subscriptions.set(refreshed.iter().map(|e| e.symbol.clone()).collect());
        *self.watchlist.write() = refreshed;
    }

    /// Transitions Running → Stopping → Idle, tearing down background tasks
    /// and clearing per-symbol state.
    pub async fn stop(self: &Arc<Self>) {
        if *self.phase.read() == ScannerPhase::Idle {
            return;
        }
        *self.phase.write() = ScannerPhase::Stopping;
        info!("orchestrator stopping");

        if let Some(tx) = self.stop_tx.write().take() {
            let _ = tx.send(true);
        }
        let tasks = std::mem::take(&mut *self.tasks.write());
        for task in tasks {
            let _ = task.await;
        }

        self.store.clear();
        self.watchlist.write().clear();
        self.subscriptions.set(Vec::new());
        *self.phase.write() = ScannerPhase::Idle;
        info!("orchestrator stopped");
    }

    /// Merges `patch` into the live config, re-validates, and clears caches
    /// that could otherwise serve stale data under the old thresholds.
    pub fn update_config(&self, new_config: ScannerConfig) -> Result<(), ScannerError> {
        new_config.validate()?;
        *self.config.write() = new_config;
        self.client.invalidate_cache();
        self.dispatcher.clear_dedupe();
        info!("configuration updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_stop_round_trip_returns_to_idle() {
        let orchestrator = Orchestrator::new("test-key", ScannerConfig::default(), Clock::live()).unwrap();
        assert_eq!(orchestrator.phase(), ScannerPhase::Idle);
        // `start` will attempt real network calls via the selector; in a
        // unit-test environment without network access this is expected to
        // fail inside `run_live_regular`/`run_live_pre_market`, which the
        // selector itself treats as catastrophic-failure-returns-previous,
        // so `start` still completes and reaches Running before we stop it.
        let _ = orchestrator.start().await;
        orchestrator.stop().await;
        assert_eq!(orchestrator.phase(), ScannerPhase::Idle);
    }

    #[test]
    fn update_config_rejects_invalid_config() {
        let orchestrator = Orchestrator::new("test-key", ScannerConfig::default(), Clock::live()).unwrap();
        let mut bad = ScannerConfig::default();
        bad.gap.min_pct = -5.0;
        assert!(orchestrator.update_config(bad).is_err());
    }
}
