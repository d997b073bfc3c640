//! Polygon.io REST client.
//!
//! Aggregates come from `/v2/aggs/ticker/{T}/range/{mult}/{span}/{from}/{to}`
//! with millisecond bounds; reference data from `/v3/reference/tickers`.
//! Large responses are paginated through `next_url`.
//!
//! Status handling: 403 trips the circuit breaker immediately, 429 and 5xx
//! count toward it and are retried with backoff, 401 is an authentication
//! error, 404 means the symbol does not exist.

use super::circuit_breaker::CircuitBreaker;
use super::{BarProvider, BarResolution, DataError, FetchWindow, ReferenceProvider};
use crate::domain::{Bar, TickerDetails, TickerRecord};
use crate::retry::RetryPolicy;
use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.polygon.io";
pub const API_KEY_ENV: &str = "POLYGON_API_KEY";

/// Aggregates page size; the endpoint maximum.
const AGGS_LIMIT: u32 = 50_000;
const TICKERS_LIMIT: u32 = 1_000;
/// Guards against a server that keeps returning `next_url`.
const MAX_PAGES: usize = 10_000;

#[derive(Debug, Deserialize)]
struct AggsResponse {
    #[serde(default)]
    results: Option<Vec<AggBar>>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AggBar {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
    #[serde(default)]
    vw: Option<f64>,
    #[serde(default)]
    n: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TickersResponse {
    #[serde(default)]
    results: Vec<TickerRecord>,
    #[serde(default)]
    next_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    results: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct PolygonConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Request split/dividend adjusted aggregates.
    pub adjusted: bool,
}

impl PolygonConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            adjusted: true,
        }
    }
}

pub struct PolygonProvider {
    client: reqwest::blocking::Client,
    config: PolygonConfig,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl PolygonProvider {
    pub fn new(config: PolygonConfig, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        if config.api_key.trim().is_empty() {
            return Err(DataError::AuthenticationRequired("empty API key".into()));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("bararchive/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            circuit_breaker,
        })
    }

    /// Build from `POLYGON_API_KEY`, keeping the rest of `config`.
    pub fn from_env(
        mut config: PolygonConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        config.api_key = std::env::var(API_KEY_ENV)
            .map_err(|_| DataError::AuthenticationRequired(format!("{API_KEY_ENV} is not set")))?;
        Self::new(config, circuit_breaker)
    }

    fn aggs_url(&self, series: &str, window: &FetchWindow, resolution: &BarResolution) -> String {
        let from_ms = window.start.timestamp_millis();
        // Upper bound is inclusive on the server side
        let to_ms = window.end.timestamp_millis() - 1;
        format!(
            "{}/v2/aggs/ticker/{series}/range/{}/{}/{from_ms}/{to_ms}?adjusted={}&sort=asc&limit={AGGS_LIMIT}",
            self.config.base_url.trim_end_matches('/'),
            resolution.multiplier,
            resolution.timespan,
            self.config.adjusted,
        )
    }

    fn tickers_url(&self, market: &str, exchange: &str) -> String {
        format!(
            "{}/v3/reference/tickers?market={market}&exchange={exchange}&active=true&order=asc&sort=ticker&limit={TICKERS_LIMIT}",
            self.config.base_url.trim_end_matches('/'),
        )
    }

    fn details_url(&self, ticker: &str) -> String {
        format!(
            "{}/v3/reference/tickers/{ticker}",
            self.config.base_url.trim_end_matches('/'),
        )
    }

    /// One GET with status classification; no retry.
    fn get_once<T: DeserializeOwned>(&self, url: &str, symbol: &str) -> Result<T, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.config.api_key)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    DataError::Timeout(e.to_string())
                } else {
                    DataError::NetworkUnreachable(e.to_string())
                }
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(DataError::CircuitBreakerTripped);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DataError::AuthenticationRequired(
                "Polygon rejected the API key".into(),
            ));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        if status.is_server_error() {
            self.circuit_breaker.record_failure();
            return Err(DataError::ServerError {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(DataError::Other(format!("HTTP {status} for {symbol}")));
        }

        let body = resp
            .json::<T>()
            .map_err(|e| DataError::ResponseFormatChanged(format!("{symbol}: {e}")))?;
        self.circuit_breaker.record_success();
        Ok(body)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str, symbol: &str) -> Result<T, DataError> {
        self.config
            .retry
            .run_with_hint(
                |_| self.get_once(url, symbol),
                DataError::is_transient,
                DataError::retry_after,
            )
    }
}

/// Convert one aggregates page to bars; returns the next page URL if any.
fn parse_aggs_page(
    series: &str,
    page: AggsResponse,
) -> Result<(Vec<Bar>, Option<String>), DataError> {
    if page.status.as_deref() == Some("ERROR") {
        return Err(DataError::ResponseFormatChanged(format!(
            "{series}: {}",
            page.error.unwrap_or_else(|| "provider reported an error".into())
        )));
    }
    let bars = page
        .results
        .unwrap_or_default()
        .into_iter()
        .map(|a| {
            let timestamp = DateTime::from_timestamp_millis(a.t).ok_or_else(|| {
                DataError::ResponseFormatChanged(format!("{series}: invalid timestamp {}", a.t))
            })?;
            Ok(Bar {
                timestamp,
                open: a.o,
                high: a.h,
                low: a.l,
                close: a.c,
                volume: a.v,
                vwap: a.vw,
                transactions: a.n,
            })
        })
        .collect::<Result<Vec<_>, DataError>>()?;
    Ok((bars, page.next_url))
}

impl BarProvider for PolygonProvider {
    fn name(&self) -> &str {
        "polygon"
    }

    fn fetch_bars(
        &self,
        series: &str,
        window: &FetchWindow,
        resolution: &BarResolution,
    ) -> Result<Vec<Bar>, DataError> {
        let mut url = self.aggs_url(series, window, resolution);
        let mut bars = Vec::new();
        for page_no in 0..MAX_PAGES {
            let page: AggsResponse = self.get_json(&url, series)?;
            let (page_bars, next) = parse_aggs_page(series, page)?;
            debug!(series, page = page_no, rows = page_bars.len(), "aggregates page");
            bars.extend(page_bars.into_iter().filter(|b| window.contains(b.timestamp)));
            match next {
                Some(next) => url = next,
                None => break,
            }
        }
        bars.sort_by_key(|b| b.timestamp);
        Ok(bars)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

impl ReferenceProvider for PolygonProvider {
    fn list_tickers(&self, market: &str, exchange: &str) -> Result<Vec<TickerRecord>, DataError> {
        let mut url = self.tickers_url(market, exchange);
        let mut out = Vec::new();
        for _ in 0..MAX_PAGES {
            let page: TickersResponse = self.get_json(&url, exchange)?;
            out.extend(page.results);
            match page.next_url {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(out)
    }

    fn ticker_details(&self, ticker: &str) -> Result<(TickerDetails, Vec<String>), DataError> {
        let resp: DetailsResponse = self.get_json(&self.details_url(ticker), ticker)?;
        let results = resp.results.ok_or_else(|| DataError::SymbolNotFound {
            symbol: ticker.to_string(),
        })?;
        TickerDetails::from_provider_json(results)
            .map_err(|e| DataError::ResponseFormatChanged(format!("{ticker} details: {e}")))
    }
}
