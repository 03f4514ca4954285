// =============================================================================
// WebSocket ingestion stream — C3 (stream half)
// =============================================================================
//
// Connects to the provider's minute-aggregate stream, authenticates,
// subscribes to the current watchlist, and forwards decoded bars to the
// caller through an unbounded channel. Reconnects with exponential backoff
// (5s × 2^(attempt-1), up to 10 attempts) and re-subscribes to whatever
// symbol set is current at reconnect time.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ScannerError;
use crate::market_data::types::{StreamMinuteAgg, StreamStatus};
use crate::types::Candle;

const STREAM_URL: &str = "wss://socket.polygon.io/stocks";
const MAX_RECONNECT_ATTEMPTS: u32 = 10;
const BASE_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// A decoded stream event handed to the ingestion engine.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Bar { symbol: String, candle: Candle },
    Status { status: String, message: Option<String> },
}

/// Shared, swappable set of symbols the stream should be subscribed to.
/// Updated by the watchlist refresh loop; read by the reconnect path.
#[derive(Clone, Default)]
pub struct SubscriptionSet {
    inner: Arc<RwLock<Vec<String>>>,
}

impl SubscriptionSet {
    pub fn new(symbols: Vec<String>) -> Self {
        Self { inner: Arc::new(RwLock::new(symbols)) }
    }

    pub fn set(&self, symbols: Vec<String>) {
        *self.inner.write() = symbols;
    }

    pub fn get(&self) -> Vec<String> {
        self.inner.read().clone()
    }
}

/// Runs the stream connect/auth/subscribe/decode loop until `stop` fires,
/// reconnecting on disconnect. Forwards every decoded bar/status through
/// `tx`. Returns `ScannerError::StreamDisconnect` once the reconnect budget
/// (10 attempts) is exhausted.
#[instrument(skip(api_key, subscriptions, tx, stop))]
pub async fn run_stream(
    api_key: String,
    subscriptions: SubscriptionSet,
    tx: mpsc::UnboundedSender<StreamEvent>,
    mut stop: tokio::sync::watch::Receiver<bool>,
) -> Result<(), ScannerError> {
    let mut attempt = 0u32;

    loop {
        if *stop.borrow() {
            return Ok(());
        }

        match run_once(&api_key, &subscriptions, &tx, &mut stop).await {
            Ok(()) => return Ok(()), // graceful stop from within run_once
            Err(e) => {
                attempt += 1;
                if attempt > MAX_RECONNECT_ATTEMPTS {
                    error!(attempts = attempt, "exhausted stream reconnect budget");
                    return Err(ScannerError::StreamDisconnect(format!(
                        "gave up after {attempt} attempts: {e}"
                    )));
                }
                let delay = BASE_RECONNECT_DELAY * 2u32.pow(attempt.saturating_sub(1).min(10));
                warn!(attempt, delay_secs = delay.as_secs(), error = %e, "stream disconnected, reconnecting");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = stop.changed() => {
                        if *stop.borrow() {
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

async fn run_once(
    api_key: &str,
    subscriptions: &SubscriptionSet,
    tx: &mpsc::UnboundedSender<StreamEvent>,
    stop: &mut tokio::sync::watch::Receiver<bool>,
) -> Result<(), ScannerError> {
    let (ws_stream, _) = connect_async(STREAM_URL)
        .await
        .map_err(|e| ScannerError::Provider { message: format!("stream connect failed: {e}"), retryable: true })?;
    let (mut write, mut read) = ws_stream.split();

    let auth_frame = json!({ "action": "auth", "params": api_key }).to_string();
    write
        .send(Message::Text(auth_frame))
        .await
        .map_err(|e| ScannerError::Provider { message: format!("auth send failed: {e}"), retryable: true })?;

    let symbols = subscriptions.get();
    if !symbols.is_empty() {
        subscribe(&mut write, &symbols).await?;
    }
    info!(symbol_count = symbols.len(), "stream connected and subscribed");

    let mut last_subscribed = symbols;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        for event in parse_stream_message(&text) {
                            let _ = tx.send(event);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(ScannerError::StreamDisconnect("connection closed by peer".to_string()));
                    }
                    Some(Ok(_)) => {} // ping/pong/binary frames ignored
                    Some(Err(e)) => {
                        return Err(ScannerError::Provider { message: format!("read error: {e}"), retryable: true });
                    }
                }
            }
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                // Periodically re-sync subscriptions without waiting for a
                // reconnect, so a mid-session watchlist refresh takes effect.
                let current = subscriptions.get();
                if current != last_subscribed {
                    let to_add: Vec<String> = current.iter().filter(|s| !last_subscribed.contains(s)).cloned().collect();
                    let to_remove: Vec<String> = last_subscribed.iter().filter(|s| !current.contains(s)).cloned().collect();
                    if !to_add.is_empty() {
                        subscribe(&mut write, &to_add).await?;
                    }
                    if !to_remove.is_empty() {
                        unsubscribe(&mut write, &to_remove).await?;
                    }
                    last_subscribed = current;
                }
            }
            _ = stop.changed() => {
                if *stop.borrow() {
                    let _ = write.close().await;
                    return Ok(());
                }
            }
        }
    }
}

type WsWrite = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

async fn subscribe(write: &mut WsWrite, symbols: &[String]) -> Result<(), ScannerError> {
    let params = symbols.iter().map(|s| format!("AM.{s}")).collect::<Vec<_>>().join(",");
    let frame = json!({ "action": "subscribe", "params": params }).to_string();
    write
        .send(Message::Text(frame))
        .await
        .map_err(|e| ScannerError::Provider { message: format!("subscribe send failed: {e}"), retryable: true })
}

async fn unsubscribe(write: &mut WsWrite, symbols: &[String]) -> Result<(), ScannerError> {
    let params = symbols.iter().map(|s| format!("AM.{s}")).collect::<Vec<_>>().join(",");
    let frame = json!({ "action": "unsubscribe", "params": params }).to_string();
    write
        .send(Message::Text(frame))
        .await
        .map_err(|e| ScannerError::Provider { message: format!("unsubscribe send failed: {e}"), retryable: true })
}

/// Decode a raw stream text frame (a JSON array of events) into zero or more
/// `StreamEvent`s. Unknown/malformed entries are logged and skipped rather
/// than failing the whole batch.
fn parse_stream_message(text: &str) -> Vec<StreamEvent> {
    let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(text) else {
        debug!(raw = text, "non-array stream frame ignored");
        return Vec::new();
    };

    let mut events = Vec::with_capacity(values.len());
    for value in values {
        let ev = value.get("ev").and_then(|v| v.as_str()).unwrap_or_default();
        match ev {
            "AM" => match serde_json::from_value::<StreamMinuteAgg>(value) {
                Ok(agg) => events.push(StreamEvent::Bar { symbol: agg.sym.clone(), candle: Candle::from(&agg) }),
                Err(e) => warn!(error = %e, "dropping malformed minute-agg frame"),
            },
            "status" => match serde_json::from_value::<StreamStatus>(value) {
                Ok(status) => events.push(StreamEvent::Status { status: status.status, message: status.message }),
                Err(e) => warn!(error = %e, "dropping malformed status frame"),
            },
            other => debug!(event = other, "ignoring unrecognized stream event type"),
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minute_agg_frame() {
        let text = r#"[{"ev":"AM","sym":"GME","s":1000,"e":60000,"o":10.0,"h":10.5,"l":9.9,"c":10.2,"v":1200}]"#;
        let events = parse_stream_message(text);
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Bar { symbol, candle } => {
                assert_eq!(symbol, "GME");
                assert_eq!(candle.start_ts, 1000);
                assert_eq!(candle.volume, 1200);
            }
            _ => panic!("expected bar event"),
        }
    }

    #[test]
    fn parses_status_frame() {
        let text = r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#;
        let events = parse_stream_message(text);
        assert_eq!(events.len(), 1);
        match &events[0] {
            StreamEvent::Status { status, .. } => assert_eq!(status, "auth_success"),
            _ => panic!("expected status event"),
        }
    }

    #[test]
    fn ignores_unknown_event_types() {
        let text = r#"[{"ev":"T","sym":"GME","p":10.0}]"#;
        assert!(parse_stream_message(text).is_empty());
    }

    #[test]
    fn ignores_malformed_frame() {
        assert!(parse_stream_message("not json").is_empty());
    }

    #[test]
    fn subscription_set_reflects_updates() {
        let subs = SubscriptionSet::new(vec!["AAA".to_string()]);
        assert_eq!(subs.get(), vec!["AAA".to_string()]);
        subs.set(vec!["BBB".to_string(), "CCC".to_string()]);
        assert_eq!(subs.get(), vec!["BBB".to_string(), "CCC".to_string()]);
    }
}
