//! Retry/fetch orchestration against the provider's two surfaces.
//!
//! Page scrapes (HTML with an embedded, possibly encrypted payload) get a
//! deeper retry budget than the JSON API endpoints; both run behind a
//! per-instance URL cache and a minimum-spacing request gate.

pub mod cleaner;
pub mod endpoints;
pub mod http_client;
pub mod payload;

use crate::config::RequestConfig;
use crate::errors::{EtlError, Result};
use rand::RngExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, warn};

use self::endpoints::alternate_host;
use self::http_client::{HttpTransport, Transport};

/// Retry ceiling for HTML page scrapes.
const MAX_SCRAPE_ATTEMPTS: u32 = 10;

/// Retry ceiling for JSON API endpoints.
const MAX_API_ATTEMPTS: u32 = 6;

// ── Request gate ──────────────────────────────────────────────────────────────

/// Enforces a minimum spacing between fresh provider requests. Workers share
/// one gate per pipeline instance; each waiter reserves the next slot under
/// the lock, then sleeps outside it.
pub struct RequestGate {
    min_interval: Duration,
    next_slot: AsyncMutex<Option<Instant>>,
}

impl RequestGate {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: AsyncMutex::new(None),
        }
    }

    pub async fn wait(&self) {
        let deadline = {
            let mut slot = self.next_slot.lock().await;
            let now = Instant::now();
            let deadline = match *slot {
                Some(at) if at > now => at,
                _ => now,
            };
            *slot = Some(deadline + self.min_interval);
            deadline
        };
        sleep_until(deadline).await;
    }
}

// ── Fetcher ───────────────────────────────────────────────────────────────────

/// Issues provider requests with retries, host alternation, session refresh
/// and per-instance caching.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    cache: Mutex<HashMap<String, Value>>,
    gate: RequestGate,
    crumb: AsyncMutex<Option<String>>,
    backoff_unit: Duration,
}

impl Fetcher {
    pub fn new(config: &RequestConfig) -> Result<Self> {
        Ok(Self::with_transport(
            Arc::new(HttpTransport::new(config)?),
            Duration::from_secs(config.min_interval_secs),
            Duration::from_secs(1),
        ))
    }

    /// Assemble a fetcher over any transport. `backoff_unit` scales every
    /// retry sleep; tests pass zero.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        min_interval: Duration,
        backoff_unit: Duration,
    ) -> Self {
        Self {
            transport,
            cache: Mutex::new(HashMap::new()),
            gate: RequestGate::new(min_interval),
            crumb: AsyncMutex::new(None),
            backoff_unit,
        }
    }

    fn cache_get(&self, url: &str) -> Option<Value> {
        self.cache.lock().unwrap().get(url).cloned()
    }

    fn cache_put(&self, url: &str, value: Value) {
        self.cache.lock().unwrap().insert(url.to_string(), value);
    }

    /// Drop a cached payload so the next fetch goes back to the network.
    pub fn evict(&self, url: &str) {
        self.cache.lock().unwrap().remove(url);
    }

    async fn backoff(&self, lo: u32, hi: u32) {
        let units = rand::rng().random_range(lo..hi);
        sleep(self.backoff_unit * units).await;
    }

    /// Fetch a JSON API endpoint and return its response envelope field.
    /// 401 triggers the session handshake; other failures back off with
    /// jitter and flip between the two query hosts every second attempt.
    pub async fn module_json(&self, url: &str, response_field: &str) -> Result<Value> {
        if let Some(hit) = self.cache_get(url) {
            return Ok(hit);
        }
        self.gate.wait().await;

        let mut cur_url = url.to_string();
        if let Some(crumb) = self.crumb.lock().await.clone() {
            cur_url = with_crumb(&cur_url, &crumb);
        }
        let mut last_status = 0u16;

        for attempt in 0..MAX_API_ATTEMPTS {
            let response = match self.transport.get(&cur_url).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("GET {} failed on attempt {}: {}", cur_url, attempt + 1, e);
                    self.backoff(1, 5).await;
                    continue;
                }
            };
            last_status = response.status;

            match response.status {
                200 => match serde_json::from_str::<Value>(&response.body) {
                    Ok(parsed) => {
                        let data = parsed.get(response_field).cloned().unwrap_or(Value::Null);
                        self.cache_put(url, data.clone());
                        return Ok(data);
                    }
                    Err(e) => {
                        warn!("unparseable body from {}: {}", cur_url, e);
                        self.backoff(1, 5).await;
                    }
                },
                401 => match self.transport.refresh_crumb().await {
                    Ok(crumb) => {
                        cur_url = with_crumb(&cur_url, &crumb);
                        *self.crumb.lock().await = Some(crumb);
                    }
                    Err(e) => {
                        warn!("crumb refresh failed: {}", e);
                        self.backoff(1, 5).await;
                    }
                },
                status => {
                    debug!("HTTP {} from {} (attempt {})", status, cur_url, attempt + 1);
                    self.backoff(1, 5).await;
                    self.backoff(1, 5).await;
                    if attempt % 2 == 1 {
                        cur_url = alternate_host(&cur_url);
                    }
                }
            }
        }

        Err(EtlError::RetriesExhausted {
            status: last_status,
            url: cur_url,
        })
    }

    /// Fetch the chart endpoint. Best-effort: exhausting the budget yields
    /// `None` instead of an error.
    pub async fn chart_json(&self, url: &str) -> Option<Value> {
        if let Some(hit) = self.cache_get(url) {
            return Some(hit);
        }

        let mut cur_url = url.to_string();
        for attempt in 0..MAX_API_ATTEMPTS {
            if attempt > 0 && attempt % 2 == 0 {
                cur_url = alternate_host(&cur_url);
            }
            match self.transport.get(&cur_url).await {
                Ok(response) if response.is_success() => {
                    match serde_json::from_str::<Value>(&response.body) {
                        Ok(parsed) => {
                            self.cache_put(url, parsed.clone());
                            return Some(parsed);
                        }
                        Err(e) => warn!("unparseable chart body from {}: {}", cur_url, e),
                    }
                }
                Ok(response) => debug!(
                    "HTTP {} from {} (attempt {})",
                    response.status,
                    cur_url,
                    attempt + 1
                ),
                Err(e) => warn!("GET {} failed on attempt {}: {}", cur_url, attempt + 1, e),
            }
            self.backoff(1, 5).await;
            self.backoff(1, 5).await;
        }
        None
    }

    /// Scrape an HTML page, pull out the embedded payload and decrypt it
    /// when needed. Only responses carrying a recognizable store section
    /// count as success.
    pub async fn page_stores(&self, url: &str) -> Result<Value> {
        if let Some(hit) = self.cache_get(url) {
            return Ok(hit);
        }
        self.gate.wait().await;

        let mut last_status = 0u16;
        for attempt in 0..MAX_SCRAPE_ATTEMPTS {
            let response = match self.transport.get(url).await {
                Ok(response) => response,
                Err(e) => {
                    warn!("GET {} failed on attempt {}: {}", url, attempt + 1, e);
                    self.backoff(10, 20).await;
                    continue;
                }
            };
            last_status = response.status;

            if response.status == 401 {
                // Session went stale; run the handshake before the next try.
                match self.transport.refresh_crumb().await {
                    Ok(crumb) => *self.crumb.lock().await = Some(crumb),
                    Err(e) => warn!("crumb refresh failed: {}", e),
                }
                continue;
            }
            if !response.is_success() {
                self.backoff(10, 20).await;
                continue;
            }

            match payload::extract_bootstrap_json(&response.body)
                .and_then(|root| payload::decode_stores(&root))
            {
                Ok(stores)
                    if stores.get("QuoteSummaryStore").is_some()
                        || stores.get("HistoricalPriceStore").is_some() =>
                {
                    self.cache_put(url, stores.clone());
                    return Ok(stores);
                }
                Ok(_) => warn!("page payload has no recognizable store: {}", url),
                Err(e) => warn!("payload decode failed for {}: {}", url, e),
            }
            self.backoff(10, 20).await;
        }

        Err(EtlError::RetriesExhausted {
            status: last_status,
            url: url.to_string(),
        })
    }
}

/// Append (or replace) the crumb query parameter.
fn with_crumb(url: &str, crumb: &str) -> String {
    let base = url.split("&crumb=").next().unwrap_or(url);
    format!("{base}&crumb={crumb}")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
