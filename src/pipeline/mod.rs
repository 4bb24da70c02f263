//! Per-ticker ETL engine and the public query surface.
//!
//! ## Execution modes
//!
//! A single ticker runs its fetch→normalize pipeline inline. Collections run
//! either sequentially or with one task per ticker behind a bounded
//! semaphore. Both modes treat a failing ticker the same way: log, map the
//! ticker to `None`, keep going. Results always come back keyed by ticker,
//! one-key maps included.

use crate::config::{locale_for, RequestConfig};
use crate::errors::{EtlError, Result};
use crate::models::{
    Dividend, Frequency, HistoricalSeries, Interval, PriceRecord, QuoteModule, StatementKind,
    StatementRecord, StatementTable,
};
use crate::scraper::cleaner;
use crate::scraper::endpoints::Endpoints;
use crate::scraper::Fetcher;
use crate::utils::date_to_epoch;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

/// Per-ticker results; `None` marks an irrecoverable per-ticker failure.
pub type TickerMap<T> = HashMap<String, Option<T>>;

type OpFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// How many times a series missing its date field is discarded and pulled
/// again before a null date is accepted.
const SERIES_REBUILD_ATTEMPTS: u32 = 7;

// ── Engine ────────────────────────────────────────────────────────────────────

/// One ticker's fetch→normalize operations. Shared by every worker of a
/// pipeline instance; the fetcher's cache and request gate come with it.
struct Engine {
    fetcher: Fetcher,
    endpoints: Endpoints,
    flat_format: bool,
}

impl Engine {
    async fn statements_for(
        &self,
        ticker: &str,
        kind: StatementKind,
        frequency: Frequency,
    ) -> Result<StatementTable> {
        let url = self
            .endpoints
            .timeseries(ticker, kind, frequency, Utc::now().timestamp())?;
        let raw = self.fetcher.module_json(&url, "timeseries").await?;
        let table = cleaner::statement_table(&raw);

        Ok(if self.flat_format {
            StatementTable::Flat(table)
        } else {
            StatementTable::Periods(
                table
                    .into_iter()
                    .map(|(date, fields)| StatementRecord { date, fields })
                    .collect(),
            )
        })
    }

    /// Fetch one quote-summary module, preferring the JSON API and falling
    /// back to the scraped page payload when the API yields nothing.
    async fn module_for(&self, ticker: &str, module: QuoteModule) -> Result<Value> {
        let url = self.endpoints.quote_summary(ticker, module)?;
        match self.fetcher.module_json(&url, "quoteSummary").await {
            Ok(envelope) => {
                let data = cleaner::module_data(&envelope, module.as_str());
                if data.as_object().is_some_and(|map| !map.is_empty()) {
                    return Ok(data);
                }
                debug!(
                    "{}: empty {} module from the API, scraping instead",
                    ticker,
                    module.as_str()
                );
            }
            Err(e) => warn!(
                "{}: API fetch for {} failed ({}), falling back to scrape",
                ticker,
                module.as_str(),
                e
            ),
        }
        self.scrape_module(ticker, module).await
    }

    async fn scrape_module(&self, ticker: &str, module: QuoteModule) -> Result<Value> {
        let url = self.endpoints.statement_page(ticker, module.scrape_page());
        let stores = self.fetcher.page_stores(&url).await?;
        stores
            .pointer(&format!("/QuoteSummaryStore/{}", module.as_str()))
            .filter(|data| !data.is_null())
            .cloned()
            .ok_or(EtlError::MissingData("quote summary module"))
    }

    async fn history_for(
        &self,
        ticker: &str,
        start: i64,
        end: i64,
        interval: Interval,
    ) -> Result<HistoricalSeries> {
        let url = self.endpoints.chart(ticker, start, end, interval)?;

        for attempt in 1..=SERIES_REBUILD_ATTEMPTS {
            let last = attempt == SERIES_REBUILD_ATTEMPTS;
            let Some(raw) = self.fetcher.chart_json(&url).await else {
                return self.scrape_history(ticker, start, end, interval).await;
            };
            if let Some(series) = cleaner::chart_series(&raw, last) {
                return Ok(series);
            }
            // Series came back without its date field; pull it again.
            debug!("{}: dateless chart payload, refetching", ticker);
            self.fetcher.evict(&url);
        }
        Ok(HistoricalSeries::default())
    }

    /// History fallback through the scraped page. Degrades to an empty
    /// series rather than raising.
    async fn scrape_history(
        &self,
        ticker: &str,
        start: i64,
        end: i64,
        interval: Interval,
    ) -> Result<HistoricalSeries> {
        let url = self.endpoints.history_page(ticker, start, end, interval);
        match self.fetcher.page_stores(&url).await {
            Ok(stores) => {
                let store = stores
                    .get("HistoricalPriceStore")
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(cleaner::store_series(&store, true).unwrap_or_default())
            }
            Err(e) => {
                warn!("{}: history scrape failed ({}), returning degraded series", ticker, e);
                Ok(HistoricalSeries::default())
            }
        }
    }

    async fn dividends_for(&self, ticker: &str, start: i64, end: i64) -> Result<Vec<Dividend>> {
        let url = self.endpoints.chart(ticker, start, end, Interval::Daily)?;
        let raw = self
            .fetcher
            .chart_json(&url)
            .await
            .ok_or(EtlError::MissingData("chart response"))?;
        cleaner::dividend_history(&raw).ok_or(EtlError::MissingData("dividend events"))
    }

    async fn recommendations_for(&self, ticker: &str) -> Result<Value> {
        let url = self.endpoints.recommendations(ticker)?;
        let finance = self.fetcher.module_json(&url, "finance").await?;
        Ok(finance.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn insights_for(&self, ticker: &str) -> Result<Value> {
        let url = self.endpoints.insights(ticker)?;
        let finance = self.fetcher.module_json(&url, "finance").await?;
        Ok(finance.get("result").cloned().unwrap_or(Value::Null))
    }
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// The public facade: validated configuration, a shared engine, and the
/// fan-out executor over one or many tickers.
pub struct Pipeline {
    engine: Arc<Engine>,
    tickers: Vec<String>,
    concurrent: bool,
    max_workers: usize,
}

impl Pipeline {
    pub fn new<I, S>(tickers: I, config: RequestConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let locale = locale_for(&config.country)?;
        let fetcher = Fetcher::new(&config)?;
        Ok(Self::assemble(tickers, config, locale, fetcher))
    }

    /// Build over a pre-assembled fetcher (custom transport, tests).
    pub fn with_fetcher<I, S>(tickers: I, config: RequestConfig, fetcher: Fetcher) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let locale = locale_for(&config.country)?;
        Ok(Self::assemble(tickers, config, locale, fetcher))
    }

    fn assemble<I, S>(
        tickers: I,
        config: RequestConfig,
        locale: crate::config::Locale,
        fetcher: Fetcher,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tickers: Vec<String> = tickers
            .into_iter()
            .map(|ticker| ticker.into().trim().to_uppercase())
            .collect();

        Self {
            engine: Arc::new(Engine {
                fetcher,
                endpoints: Endpoints::new(locale),
                flat_format: config.flat_format,
            }),
            tickers,
            concurrent: config.concurrent,
            max_workers: config.max_workers.max(1),
        }
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    fn worker_count(&self) -> usize {
        self.max_workers.min(self.tickers.len()).max(1)
    }

    /// Run one operation across all tickers. Sequential and pooled modes
    /// handle a failing ticker identically: warn and record `None`.
    async fn fan_out<T, F>(&self, what: &str, job: F) -> TickerMap<T>
    where
        T: Send + 'static,
        F: Fn(Arc<Engine>, String) -> OpFuture<T> + Send + Sync + 'static,
    {
        let mut results = TickerMap::new();

        if !self.concurrent || self.tickers.len() <= 1 {
            for ticker in &self.tickers {
                match job(Arc::clone(&self.engine), ticker.clone()).await {
                    Ok(value) => {
                        results.insert(ticker.clone(), Some(value));
                    }
                    Err(e) => {
                        warn!("{}: error getting {} - {}; continuing extraction", ticker, what, e);
                        results.insert(ticker.clone(), None);
                    }
                }
            }
            return results;
        }

        let sem = Arc::new(Semaphore::new(self.worker_count()));
        let job = Arc::new(job);
        let mut handles = Vec::with_capacity(self.tickers.len());

        for ticker in self.tickers.clone() {
            let sem = Arc::clone(&sem);
            let engine = Arc::clone(&self.engine);
            let job = Arc::clone(&job);
            let task_ticker = ticker.clone();

            let handle = tokio::spawn(async move {
                let _permit = sem.acquire().await.ok();
                job(engine, task_ticker).await
            });
            handles.push((ticker, handle));
        }

        for (ticker, handle) in handles {
            match handle.await {
                Ok(Ok(value)) => {
                    results.insert(ticker, Some(value));
                }
                Ok(Err(e)) => {
                    warn!("{}: error getting {} - {}; continuing extraction", ticker, what, e);
                    results.insert(ticker, None);
                }
                Err(e) => {
                    error!("task panic for {}: {}", ticker, e);
                    results.insert(ticker, None);
                }
            }
        }
        results
    }

    // ── Fundamentals ──────────────────────────────────────────────────────────

    /// Financial statements by frequency and kind, keyed by report name then
    /// ticker. Output shape per period list or flat mapping follows the
    /// instance's `flat_format` flag.
    pub async fn financial_statements(
        &self,
        frequency: Frequency,
        kinds: &[StatementKind],
    ) -> HashMap<String, TickerMap<StatementTable>> {
        let mut out = HashMap::new();
        for &kind in kinds {
            let per_ticker = self
                .fan_out("financial statements", move |engine, ticker| -> OpFuture<StatementTable> {
                    Box::pin(async move { engine.statements_for(&ticker, kind, frequency).await })
                })
                .await;
            out.insert(kind.report_name(frequency).to_string(), per_ticker);
        }
        out
    }

    // ── Quote-summary family ──────────────────────────────────────────────────

    async fn module_report(&self, module: QuoteModule) -> TickerMap<PriceRecord> {
        self.fan_out(module.as_str(), move |engine, ticker| -> OpFuture<PriceRecord> {
            Box::pin(async move {
                let raw = engine.module_for(&ticker, module).await?;
                cleaner::clean_report(&raw).ok_or(EtlError::MissingData("module report"))
            })
        })
        .await
    }

    async fn module_passthrough(&self, module: QuoteModule, earnings_clean: bool) -> TickerMap<Value> {
        self.fan_out(module.as_str(), move |engine, ticker| -> OpFuture<Value> {
            Box::pin(async move {
                let raw = engine.module_for(&ticker, module).await?;
                if earnings_clean {
                    cleaner::clean_earnings(&raw).ok_or(EtlError::MissingData("module data"))
                } else {
                    Ok(raw)
                }
            })
        })
        .await
    }

    /// Current price/market state per ticker.
    pub async fn price_data(&self) -> TickerMap<PriceRecord> {
        self.module_report(QuoteModule::Price).await
    }

    /// Summary detail (yields, ranges, averages) per ticker.
    pub async fn summary_data(&self) -> TickerMap<PriceRecord> {
        self.module_report(QuoteModule::SummaryDetail).await
    }

    /// Key statistics per ticker.
    pub async fn key_statistics(&self) -> TickerMap<PriceRecord> {
        self.module_report(QuoteModule::DefaultKeyStatistics).await
    }

    /// Analyst-oriented financial data per ticker.
    pub async fn financial_data(&self) -> TickerMap<PriceRecord> {
        self.module_report(QuoteModule::FinancialData).await
    }

    /// Company profile per ticker.
    pub async fn profile_data(&self) -> TickerMap<Value> {
        self.module_passthrough(QuoteModule::AssetProfile, true).await
    }

    /// Earnings history and estimates per ticker.
    pub async fn earnings_data(&self) -> TickerMap<Value> {
        self.module_passthrough(QuoteModule::Earnings, true).await
    }

    /// ESG scores per ticker, unreformatted.
    pub async fn esg_scores(&self) -> TickerMap<Value> {
        self.module_passthrough(QuoteModule::EsgScores, false).await
    }

    /// Quote type metadata per ticker, unreformatted.
    pub async fn quote_type_data(&self) -> TickerMap<Value> {
        self.module_passthrough(QuoteModule::QuoteType, false).await
    }

    // ── History & events ──────────────────────────────────────────────────────

    /// Historical OHLCV series between two `YYYY-MM-DD` dates.
    pub async fn historical_price_data(
        &self,
        start_date: &str,
        end_date: &str,
        interval: Interval,
    ) -> Result<TickerMap<HistoricalSeries>> {
        let start = date_to_epoch(start_date)?;
        let end = date_to_epoch(end_date)?;
        Ok(self
            .fan_out("historical prices", move |engine, ticker| -> OpFuture<HistoricalSeries> {
                Box::pin(async move { engine.history_for(&ticker, start, end, interval).await })
            })
            .await)
    }

    /// Daily dividend history between two `YYYY-MM-DD` dates.
    pub async fn daily_dividend_data(
        &self,
        start_date: &str,
        end_date: &str,
    ) -> Result<TickerMap<Vec<Dividend>>> {
        let start = date_to_epoch(start_date)?;
        let end = date_to_epoch(end_date)?;
        Ok(self
            .fan_out("dividends", move |engine, ticker| -> OpFuture<Vec<Dividend>> {
                Box::pin(async move { engine.dividends_for(&ticker, start, end).await })
            })
            .await)
    }

    // ── Analytics ─────────────────────────────────────────────────────────────

    /// Analyst recommendations per ticker.
    pub async fn recommendations(&self) -> TickerMap<Value> {
        self.fan_out("recommendations", move |engine, ticker| -> OpFuture<Value> {
            Box::pin(async move { engine.recommendations_for(&ticker).await })
        })
        .await
    }

    /// Research insights per ticker.
    pub async fn insights(&self) -> TickerMap<Value> {
        self.fan_out("insights", move |engine, ticker| -> OpFuture<Value> {
            Box::pin(async move { engine.insights_for(&ticker).await })
        })
        .await
    }

    /// Provider page URL per ticker. No network use.
    pub fn summary_url(&self) -> HashMap<String, String> {
        self.tickers
            .iter()
            .map(|ticker| (ticker.clone(), self.engine.endpoints.summary_page(ticker)))
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::http_client::{Transport, WireResponse};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Routes responses by URL substring; unmatched URLs 404.
    struct RoutedTransport {
        routes: Vec<(&'static str, u16, String)>,
        calls: AtomicUsize,
    }

    impl RoutedTransport {
        fn new(routes: Vec<(&'static str, u16, String)>) -> Arc<Self> {
            Arc::new(Self {
                routes,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Transport for RoutedTransport {
        async fn get(&self, url: &str) -> crate::errors::Result<WireResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for (needle, status, body) in &self.routes {
                if url.contains(needle) {
                    return Ok(WireResponse {
                        status: *status,
                        body: body.clone(),
                    });
                }
            }
            Ok(WireResponse {
                status: 404,
                body: "not found".to_string(),
            })
        }

        async fn refresh_crumb(&self) -> crate::errors::Result<String> {
            Ok("testcrumb".to_string())
        }
    }

    fn pipeline(
        tickers: &[&str],
        concurrent: bool,
        flat_format: bool,
        transport: Arc<RoutedTransport>,
    ) -> Pipeline {
        let config = RequestConfig {
            concurrent,
            flat_format,
            max_workers: 4,
            ..Default::default()
        };
        let fetcher = Fetcher::with_transport(transport, Duration::ZERO, Duration::ZERO);
        Pipeline::with_fetcher(tickers.to_vec(), config, fetcher).unwrap()
    }

    fn price_envelope(price: f64) -> String {
        json!({
            "quoteSummary": {
                "result": [
                    {"price": {"regularMarketPrice": {"raw": price, "fmt": "p"}, "currency": "USD"}}
                ],
                "error": null
            }
        })
        .to_string()
    }

    fn chart_body() -> String {
        json!({
            "chart": {
                "result": [{
                    "meta": {"currency": "USD", "instrumentType": "EQUITY", "firstTradeDate": 345479400, "gmtoffset": -18000},
                    "timestamp": [1421280000, 1421884800],
                    "indicators": {
                        "quote": [{"high": [110.3, 113.75], "low": [105.2, 109.03], "open": [108.7, 110.0], "close": [105.99, 113.1], "volume": [283056000, 198737000]}],
                        "adjclose": [{"adjclose": [95.3, 101.7]}]
                    },
                    "events": {"dividends": {"1422027000": {"amount": 0.47, "date": 1422027000}}}
                }],
                "error": null
            }
        })
        .to_string()
    }

    #[test]
    fn test_invalid_country_fails_at_construction() {
        let config = RequestConfig {
            country: "ZZ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            Pipeline::new(["AAPL"], config),
            Err(EtlError::InvalidCountry(code)) if code == "ZZ"
        ));
    }

    #[test]
    fn test_tickers_are_uppercased() {
        let transport = RoutedTransport::new(vec![]);
        let pipeline = pipeline(&["aapl ", "msft"], false, false, transport);
        assert_eq!(pipeline.tickers(), ["AAPL", "MSFT"]);
    }

    #[tokio::test]
    async fn test_sequential_batch_keeps_partial_results() {
        let transport = RoutedTransport::new(vec![
            ("quoteSummary/aaa", 200, price_envelope(12.0)),
            // BBB survives transport but nothing downstream accepts it, on
            // either the API or the scrape-fallback path.
            (
                "quoteSummary/bbb",
                200,
                json!({"quoteSummary": {"result": [{}], "error": null}}).to_string(),
            ),
            ("/quote/BBB/", 200, "<html>maintenance page</html>".to_string()),
        ]);

        let result = pipeline(&["AAA", "BBB"], false, false, transport)
            .price_data()
            .await;

        assert_eq!(result.len(), 2);
        assert_eq!(
            result["AAA"].as_ref().unwrap().number("regularMarketPrice"),
            Some(12.0)
        );
        assert!(result["BBB"].is_none());
    }

    #[tokio::test]
    async fn test_concurrent_batch_matches_sequential_shape() {
        let transport = RoutedTransport::new(vec![
            ("quoteSummary/aaa", 200, price_envelope(12.0)),
            ("quoteSummary/ccc", 200, price_envelope(34.5)),
        ]);

        let result = pipeline(&["AAA", "BBB", "CCC"], true, false, transport)
            .price_data()
            .await;

        assert_eq!(result.len(), 3);
        assert!(result["AAA"].is_some());
        // Worker failure maps to None, same as sequential mode.
        assert!(result["BBB"].is_none());
        assert_eq!(result["CCC"].as_ref().unwrap().number("regularMarketPrice"), Some(34.5));
    }

    #[tokio::test]
    async fn test_single_ticker_still_returns_a_map() {
        let transport = RoutedTransport::new(vec![(
            "quoteSummary/aaa",
            200,
            price_envelope(99.0),
        )]);

        let result = pipeline(&["AAA"], false, false, transport).price_data().await;
        assert_eq!(result.len(), 1);
        assert!(result["AAA"].is_some());
    }

    #[tokio::test]
    async fn test_statement_output_shapes() {
        let envelope = json!({
            "timeseries": {
                "result": [{
                    "meta": {"symbol": ["aaa"]},
                    "annualTotalRevenue": [
                        {"asOfDate": "2023-09-30", "reportedValue": {"raw": 383285000000.0, "fmt": "383B"}}
                    ]
                }],
                "error": null
            }
        })
        .to_string();

        let transport = RoutedTransport::new(vec![("timeseries/aaa", 200, envelope.clone())]);
        let result = pipeline(&["AAA"], false, false, Arc::clone(&transport))
            .financial_statements(Frequency::Annual, &[StatementKind::Income])
            .await;

        let per_ticker = &result["incomeStatementHistory"];
        let Some(StatementTable::Periods(records)) = &per_ticker["AAA"] else {
            panic!("expected period records");
        };
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, "2023-09-30");
        assert_eq!(records[0].fields["totalRevenue"], Some(383_285_000_000.0));

        let transport = RoutedTransport::new(vec![("timeseries/aaa", 200, envelope)]);
        let result = pipeline(&["AAA"], false, true, transport)
            .financial_statements(Frequency::Annual, &[StatementKind::Income])
            .await;
        let Some(StatementTable::Flat(table)) = &result["incomeStatementHistory"]["AAA"] else {
            panic!("expected flat table");
        };
        assert!(table.contains_key("2023-09-30"));
    }

    #[tokio::test]
    async fn test_history_and_dividends() {
        let transport = RoutedTransport::new(vec![("/v8/finance/chart/AAA", 200, chart_body())]);
        let pipeline = pipeline(&["AAA"], false, false, transport);

        let history = pipeline
            .historical_price_data("2015-01-01", "2015-03-01", Interval::Weekly)
            .await
            .unwrap();
        let series = history["AAA"].as_ref().unwrap();
        assert_eq!(series.prices.len(), 2);
        assert_eq!(series.currency.as_deref(), Some("USD"));

        let dividends = pipeline
            .daily_dividend_data("2015-01-01", "2015-03-01")
            .await
            .unwrap();
        let dividends = dividends["AAA"].as_ref().unwrap();
        assert_eq!(dividends.len(), 1);
        assert_eq!(dividends[0].amount, Some(0.47));
        assert_eq!(dividends[0].formatted_date.as_deref(), Some("2015-01-23"));
    }

    #[tokio::test]
    async fn test_bad_date_is_a_caller_error() {
        let transport = RoutedTransport::new(vec![]);
        let pipeline = pipeline(&["AAA"], false, false, transport);
        assert!(matches!(
            pipeline
                .historical_price_data("01/15/2015", "2015-03-01", Interval::Daily)
                .await,
            Err(EtlError::Date(_))
        ));
    }

    #[test]
    fn test_summary_url_needs_no_network() {
        let transport = RoutedTransport::new(vec![]);
        let pipeline = pipeline(&["AAPL", "JPY=X"], false, false, Arc::clone(&transport));
        let urls = pipeline.summary_url();
        assert_eq!(urls["AAPL"], "https://finance.yahoo.com/quote/AAPL");
        assert_eq!(urls["JPY=X"], "https://finance.yahoo.com/quote/JPY%3DX");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }
}
