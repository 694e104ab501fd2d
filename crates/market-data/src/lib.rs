use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use futures_util::stream::{self, StreamExt};
use perf_core::{normalize_ticker, PerfError, PriceSeries, PriceSource, TickerFetch};
use reqwest::Client;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

const BASE_URL: &str = "https://api.polygon.io";
const DEFAULT_CONCURRENCY: usize = 8;

/// Sliding-window rate limiter: at most `max_requests` per `window` duration.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            let Some(&oldest) = ts.front() else {
                continue;
            };
            let sleep_dur = (oldest + self.window).duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!(
                "Rate limiter: waiting {:.1}s for Polygon API slot",
                sleep_dur.as_secs_f64()
            );
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Provider symbol for a ticker: Yahoo-style index tickers map to Polygon
/// index symbols, everything else passes through.
pub fn provider_symbol(ticker: &str) -> String {
    let ticker = normalize_ticker(ticker);
    match ticker.as_str() {
        "^GSPC" => "I:SPX".to_string(),
        "^IXIC" => "I:COMP".to_string(),
        _ => match ticker.strip_prefix('^') {
            Some(index) => format!("I:{}", index),
            None => ticker,
        },
    }
}

#[derive(Debug, Deserialize)]
struct AggregateResponse {
    #[serde(default)]
    results: Vec<AggregateResult>,
}

#[derive(Debug, Deserialize)]
struct AggregateResult {
    t: i64, // timestamp (ms)
    c: f64, // close
}

/// Daily closes from an aggregates response body, ascending.
pub fn parse_daily_closes(body: &str) -> Result<Vec<(NaiveDate, f64)>, PerfError> {
    let response: AggregateResponse =
        serde_json::from_str(body).map_err(|e| PerfError::Api(e.to_string()))?;
    let mut closes: Vec<(NaiveDate, f64)> = response
        .results
        .into_iter()
        .filter_map(|r| {
            let date = DateTime::from_timestamp_millis(r.t)?.date_naive();
            Some((date, r.c))
        })
        .collect();
    closes.sort_by_key(|(d, _)| *d);
    Ok(closes)
}

#[derive(Clone)]
pub struct PolygonClient {
    api_key: String,
    base_url: String,
    client: Client,
    rate_limiter: RateLimiter,
    concurrency: usize,
}

impl PolygonClient {
    pub fn new(api_key: String) -> Self {
        Self::with_base_url(api_key, BASE_URL)
    }

    pub fn with_base_url(api_key: String, base_url: &str) -> Self {
        // Free tier users should set POLYGON_RATE_LIMIT=5.
        let rate_limit: usize = std::env::var("POLYGON_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(500);

        let client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            rate_limiter: RateLimiter::new(rate_limit, Duration::from_secs(60)),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Send a request with rate limiting and automatic 429 retry.
    async fn send_request(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, PerfError> {
        let request = builder.build().map_err(|e| PerfError::Api(e.to_string()))?;

        for attempt in 0..3u32 {
            self.rate_limiter.acquire().await;
            let req_clone = request
                .try_clone()
                .ok_or_else(|| PerfError::Api("Cannot clone request".to_string()))?;
            let response = self
                .client
                .execute(req_clone)
                .await
                .map_err(|e| PerfError::Api(e.to_string()))?;

            if response.status().as_u16() != 429 {
                return Ok(response);
            }

            let wait_secs = 15u64;
            tracing::warn!(
                "Polygon 429 rate limited, waiting {}s before retry {}/3",
                wait_secs,
                attempt + 1
            );
            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
        }

        Err(PerfError::Api(
            "Rate limited by Polygon after 3 retries".to_string(),
        ))
    }

    /// Adjusted daily closes of `ticker` between `from` and `to` inclusive.
    pub async fn get_daily_closes(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<(NaiveDate, f64)>, PerfError> {
        let url = format!(
            "{}/v2/aggs/ticker/{}/range/1/day/{}/{}",
            self.base_url,
            provider_symbol(ticker),
            from.format("%Y-%m-%d"),
            to.format("%Y-%m-%d")
        );

        let response = self
            .send_request(self.client.get(&url).query(&[
                ("apiKey", self.api_key.as_str()),
                ("adjusted", "true"),
                ("sort", "asc"),
                ("limit", "50000"),
            ]))
            .await?;

        if !response.status().is_success() {
            return Err(PerfError::Api(format!(
                "HTTP {}: {}",
                response.status(),
                response.text().await.unwrap_or_default()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PerfError::Api(e.to_string()))?;
        parse_daily_closes(&body)
    }
}

#[async_trait]
impl PriceSource for PolygonClient {
    async fn fetch_closes(
        &self,
        tickers: &[String],
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TickerFetch>, PerfError> {
        let wanted: Vec<String> = tickers.iter().map(|t| normalize_ticker(t)).collect();
        let results: Vec<(String, Result<Vec<(NaiveDate, f64)>, PerfError>)> =
            stream::iter(wanted)
                .map(|ticker| async move {
                    let closes = self.get_daily_closes(&ticker, from, to).await;
                    (ticker, closes)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        if !results.is_empty() && failed == results.len() {
            let detail = results
                .iter()
                .find_map(|(_, r)| r.as_ref().err().map(|e| e.to_string()))
                .unwrap_or_default();
            return Err(PerfError::Api(format!(
                "all {} price requests failed: {}",
                failed, detail
            )));
        }

        let mut fetches: Vec<TickerFetch> = results
            .into_iter()
            .map(|(ticker, result)| match result {
                Ok(points) if !points.is_empty() => {
                    TickerFetch::Fetched(PriceSeries::new(ticker, points))
                }
                Ok(_) => TickerFetch::unavailable(ticker, "no prices in range"),
                Err(e) => {
                    tracing::warn!("Failed to fetch {}: {}", ticker, e);
                    TickerFetch::unavailable(ticker, e.to_string())
                }
            })
            .collect();
        fetches.sort_by(|a, b| a.ticker().cmp(b.ticker()));
        Ok(fetches)
    }

    fn name(&self) -> &str {
        "polygon"
    }
}
