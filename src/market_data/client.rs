// =============================================================================
// Market-data REST client — C3
// =============================================================================
//
// Typed wrappers over the upstream endpoints (§6). Every fetch goes through
// the URL-keyed `RequestCache` (TTL = `api.request_timeout_ms`, with
// in-flight deduplication) and retries non-2xx responses with delays of
// 1s, 2s, 4s up to `api.max_retries`.
//
// The API key is sent only as a query parameter to the documented
// endpoints and is never logged.
// =============================================================================

use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::config::ApiConfig;
use crate::error::ScannerError;
use crate::market_data::cache::RequestCache;
use crate::market_data::types::{
    AggsResponse, EmaResponse, GainersSnapshotResponse, GroupedResponse, OpenCloseResponse, TickerTypeResponse,
};

const BASE_URL: &str = "https://api.polygon.io";

/// Market-data REST client with response caching and exponential-backoff
/// retries.
#[derive(Debug)]
pub struct MarketDataClient {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    cache: RequestCache,
    max_retries: u32,
}

impl MarketDataClient {
    pub fn new(api_key: impl Into<String>, config: &ApiConfig) -> Result<Self, ScannerError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(ScannerError::Config("MARKET_API_KEY is not set".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.http_timeout_ms))
            .build()
            .map_err(|e| ScannerError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_key,
            base_url: BASE_URL.to_string(),
            client,
            cache: RequestCache::new(Duration::from_millis(config.request_timeout_ms)),
            max_retries: config.max_retries,
        })
    }

    #[cfg(test)]
    fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>, config: &ApiConfig) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            cache: RequestCache::new(Duration::from_millis(config.request_timeout_ms)),
            max_retries: config.max_retries,
        }
    }

    fn with_key(&self, url: &str) -> String {
        let sep = if url.contains('?') { '&' } else { '?' };
        format!("{url}{sep}apiKey={}", self.api_key)
    }

    /// GET `url` (without the API key — appended internally), retrying
    /// non-2xx responses with delays of 1s, 2s, 4s up to `max_retries`,
    /// through the shared request cache.
    #[instrument(skip(self), name = "market_data::fetch")]
    async fn fetch(&self, url: &str) -> Result<Value, ScannerError> {
        self.cache
            .get_or_fetch(url, || async {
                let mut attempt = 0u32;
                loop {
                    match self.try_once(&self.with_key(url)).await {
                        Ok(body) => return Ok(body),
                        Err(e) if e.is_retryable() && attempt < self.max_retries => {
                            let delay_ms = 1000u64 << attempt;
                            warn!(url, attempt, delay_ms, error = %e, "provider request failed, retrying");
                            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                            attempt += 1;
                        }
                        Err(e) => return Err(anyhow::anyhow!(e)),
                    }
                }
            })
            .await
            .map_err(|e| match e.downcast::<ScannerError>() {
                Ok(scanner_err) => scanner_err,
                Err(other) => ScannerError::Provider { message: other.to_string(), retryable: false },
            })
    }

    async fn try_once(&self, signed_url: &str) -> Result<Value, ScannerError> {
        let resp = self
            .client
            .get(signed_url)
            .send()
            .await
            .map_err(|e| ScannerError::Provider { message: format!("request failed: {e}"), retryable: true })?;

        let status = resp.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ScannerError::Provider { message: format!("provider returned {status}"), retryable: true });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ScannerError::Provider {
                message: format!("authentication failed: {status}"),
                retryable: false,
            });
        }
        if status.is_client_error() {
            return Err(ScannerError::Provider { message: format!("provider returned {status}"), retryable: false });
        }

        resp.json::<Value>().await.map_err(|e| ScannerError::Data(format!("malformed response body: {e}")))
    }

    // -------------------------------------------------------------------
    // Typed endpoints
    // -------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn get_gainers_snapshot(&self) -> Result<GainersSnapshotResponse, ScannerError> {
        let url = format!("{}/v2/snapshot/locale/us/markets/stocks/gainers", self.base_url);
        let body = self.fetch(&url).await?;
        serde_json::from_value(body).map_err(|e| ScannerError::Data(format!("bad gainers snapshot: {e}")))
    }

    #[instrument(skip(self))]
    pub async fn get_grouped(&self, date: &str) -> Result<GroupedResponse, ScannerError> {
        let url = format!("{}/v2/aggs/grouped/locale/us/market/stocks/{date}", self.base_url);
        let body = self.fetch(&url).await?;
        serde_json::from_value(body).map_err(|e| ScannerError::Data(format!("bad grouped bars: {e}")))
    }

    /// 1-minute aggregates for `symbol` between `from_ms` and `to_ms`
    /// (inclusive), with extended hours included.
    #[instrument(skip(self))]
    pub async fn get_minute_aggs(&self, symbol: &str, from_ms: i64, to_ms: i64, limit: u32) -> Result<AggsResponse, ScannerError> {
        self.get_n_minute_aggs(symbol, 1, from_ms, to_ms, limit).await
    }

    #[instrument(skip(self))]
    pub async fn get_5min_aggs(&self, symbol: &str, from_ms: i64, to_ms: i64, limit: u32) -> Result<AggsResponse, ScannerError> {
        self.get_n_minute_aggs(symbol, 5, from_ms, to_ms, limit).await
    }

    async fn get_n_minute_aggs(
        &self,
        symbol: &str,
        n: u32,
        from_ms: i64,
        to_ms: i64,
        limit: u32,
    ) -> Result<AggsResponse, ScannerError> {
        let url = format!(
            "{}/v2/aggs/ticker/{symbol}/range/{n}/minute/{from_ms}/{to_ms}?adjusted=true&sort=asc&limit={limit}&include_extended_hours=true",
            self.base_url
        );
        let body = self.fetch(&url).await?;
        debug!(symbol, n, "fetched minute aggregates");
        serde_json::from_value(body).map_err(|e| ScannerError::Data(format!("bad aggregates: {e}")))
    }

    #[instrument(skip(self))]
    pub async fn get_ticker_type(&self, symbol: &str, date: &str) -> Result<String, ScannerError> {
        let url = format!("{}/v3/reference/tickers/{symbol}?date={date}", self.base_url);
        let body = self.fetch(&url).await?;
        let parsed: TickerTypeResponse =
            serde_json::from_value(body).map_err(|e| ScannerError::Data(format!("bad ticker reference: {e}")))?;
        Ok(parsed.results.ticker_type)
    }

    #[instrument(skip(self))]
    pub async fn get_ema(&self, symbol: &str, date: &str, window: u32) -> Result<Option<f64>, ScannerError> {
        let url = format!("{}/v1/indicators/ema/{symbol}?timestamp={date}&window={window}&timespan=day", self.base_url);
        let body = self.fetch(&url).await?;
        let parsed: EmaResponse =
            serde_json::from_value(body).map_err(|e| ScannerError::Data(format!("bad EMA response: {e}")))?;
        Ok(parsed.results.values.first().map(|v| v.value))
    }

    /// Day open/close for `symbol` on `date` (`YYYY-MM-DD`).
    #[instrument(skip(self))]
    pub async fn get_open_close(&self, symbol: &str, date: &str) -> Result<OpenCloseResponse, ScannerError> {
        let url = format!("{}/v1/open-close/{symbol}/{date}", self.base_url);
        let body = self.fetch(&url).await?;
        serde_json::from_value(body).map_err(|e| ScannerError::Data(format!("bad open-close response: {e}")))
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_api_key() {
        let cfg = ApiConfig::default();
        let err = MarketDataClient::new("", &cfg).unwrap_err();
        assert!(matches!(err, ScannerError::Config(_)));
    }

    #[tokio::test]
    async fn signs_url_with_api_key() {
        let cfg = ApiConfig::default();
        let client = MarketDataClient::with_base_url("secret-key", "http://example.invalid", &cfg);
        assert_eq!(client.with_key("http://example.invalid/x"), "http://example.invalid/x?apiKey=secret-key");
        assert_eq!(
            client.with_key("http://example.invalid/x?a=1"),
            "http://example.invalid/x?a=1&apiKey=secret-key"
        );
    }
}
