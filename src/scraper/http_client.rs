use crate::config::RequestConfig;
use crate::errors::{EtlError, Result};
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, ORIGIN, REFERER};
use std::time::Duration;
use tracing::debug;

/// Endpoint that seeds the session cookie; the response body is irrelevant.
const COOKIE_URL: &str = "https://fc.yahoo.com";

/// Endpoint that exchanges the session cookie for a crumb token.
const CRUMB_URL: &str = "https://query2.finance.yahoo.com/v1/test/getcrumb";

/// Browser user-agents rotated across instances.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/119.0",
];

// ── Wire types ────────────────────────────────────────────────────────────────

/// Raw outcome of one GET. Error statuses are data here, not errors; the
/// orchestrator inspects them and decides what to do next.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub status: u16,
    pub body: String,
}

impl WireResponse {
    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Swappable transport abstraction.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET a URL. Network and timeout failures are `Err`; HTTP error
    /// statuses come back as a normal `WireResponse`.
    async fn get(&self, url: &str) -> Result<WireResponse>;

    /// Run the session handshake and return a fresh crumb token.
    async fn refresh_crumb(&self) -> Result<String>;
}

// ── reqwest transport ─────────────────────────────────────────────────────────

pub struct HttpTransport {
    clients: Vec<reqwest::Client>,
}

impl HttpTransport {
    pub fn new(config: &RequestConfig) -> Result<Self> {
        let user_agent = config.user_agent.clone().unwrap_or_else(|| {
            USER_AGENTS
                .choose(&mut rand::rng())
                .copied()
                .unwrap_or(USER_AGENTS[0])
                .to_string()
        });
        let timeout = Duration::from_secs(config.timeout_secs);

        // One client per proxy; requests pick among them at random.
        let clients = match config.proxies.as_deref() {
            Some(proxies) if !proxies.is_empty() => proxies
                .iter()
                .map(|proxy| build_client(&user_agent, timeout, Some(proxy.as_str())))
                .collect::<Result<Vec<_>>>()?,
            _ => vec![build_client(&user_agent, timeout, None)?],
        };

        Ok(Self { clients })
    }

    fn client(&self) -> &reqwest::Client {
        self.clients
            .choose(&mut rand::rng())
            .unwrap_or(&self.clients[0])
    }
}

fn build_client(
    user_agent: &str,
    timeout: Duration,
    proxy: Option<&str>,
) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(ORIGIN, HeaderValue::from_static("https://finance.yahoo.com"));
    headers.insert(REFERER, HeaderValue::from_static("https://finance.yahoo.com"));

    let mut builder = reqwest::Client::builder()
        .user_agent(user_agent)
        .default_headers(headers)
        .timeout(timeout)
        .gzip(true)
        // Accept cookies so the crumb handshake works
        .cookie_store(true);

    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::https(proxy)?);
    }

    Ok(builder.build()?)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<WireResponse> {
        let response = self.client().get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(WireResponse { status, body })
    }

    async fn refresh_crumb(&self) -> Result<String> {
        let client = self.client();

        // Seed the cookie jar; the endpoint 404s but still sets cookies.
        let _ = client.get(COOKIE_URL).send().await;

        let response = client.get(CRUMB_URL).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        if status != 200 || body.trim().is_empty() || body.contains('{') {
            return Err(EtlError::Payload(format!(
                "crumb handshake failed with HTTP {status}"
            )));
        }

        let crumb = body.trim().to_string();
        debug!("refreshed session crumb");
        Ok(crumb)
    }
}
