//! ETL pipeline for publicly exposed Yahoo Finance market data.
//!
//! Fetches quotes, fundamentals, historical prices and dividends for one or
//! more tickers, normalizes the provider's heterogeneous JSON shapes into
//! uniform per-ticker records, and fans out across tickers sequentially or
//! over a bounded worker pool. Scraped pages with encrypted embedded
//! payloads and the JSON chart/timeseries APIs are both supported, with
//! retries, host rotation and crumb-session refresh handled internally.
//!
//! ```rust,ignore
//! use yfin_etl::{Pipeline, RequestConfig};
//! use yfin_etl::models::{Frequency, StatementKind};
//!
//! let pipeline = Pipeline::new(["AAPL", "MSFT"], RequestConfig::default())?;
//! let statements = pipeline
//!     .financial_statements(Frequency::Quarterly, &[StatementKind::Balance])
//!     .await;
//! ```

pub mod config;
pub mod errors;
pub mod models;
pub mod pipeline;
pub mod scraper;
pub mod utils;

pub use config::{AppConfig, RequestConfig};
pub use errors::{EtlError, Result};
pub use pipeline::{Pipeline, TickerMap};
