// =============================================================================
// Error taxonomy — §7
// =============================================================================
//
// `ScannerError` is the typed error surfaced across component boundaries
// where the caller needs to branch on the error kind (e.g. "is this
// retryable?"). Internal glue code that only needs to propagate failures
// upward uses `anyhow::Result` with `.context(...)`, the same split the
// market-data client and orchestrator wiring use throughout this crate.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScannerError {
    /// Invalid thresholds or missing API key. Fatal at startup.
    #[error("config error: {0}")]
    Config(String),

    /// Provider HTTP/network failure. `retryable` distinguishes 5xx/timeout
    /// (retry) from 4xx auth failures (fatal) and single-symbol 4xx (skip).
    #[error("provider error: {message}")]
    Provider { message: String, retryable: bool },

    /// Malformed or out-of-bounds market data (misaligned candle, volume
    /// above the sanity ceiling).
    #[error("data error: {0}")]
    Data(String),

    /// WebSocket stream exhausted its reconnect budget.
    #[error("stream disconnected: {0}")]
    StreamDisconnect(String),

    /// A subscriber callback raised while handling a dispatched alert.
    #[error("dispatch error: {0}")]
    Dispatch(String),
}

impl ScannerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { retryable: true, .. })
    }
}
