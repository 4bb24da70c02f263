use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

// ── Request vocabulary ────────────────────────────────────────────────────────

/// Reporting frequency for fundamentals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    Annual,
    Quarterly,
    Trailing,
}

impl Frequency {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "annual" => Some(Self::Annual),
            "quarterly" => Some(Self::Quarterly),
            "trailing" => Some(Self::Trailing),
            _ => None,
        }
    }

    /// Prefix the timeseries endpoint puts on every field code.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Quarterly => "quarterly",
            Self::Trailing => "trailing",
        }
    }
}

/// One of the three financial statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Income,
    Balance,
    Cash,
}

impl StatementKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "income" => Some(Self::Income),
            "balance" => Some(Self::Balance),
            "cash" => Some(Self::Cash),
            _ => None,
        }
    }

    /// Page path segment for the scraped statement page.
    pub fn page(&self) -> &'static str {
        match self {
            Self::Income => "financials",
            Self::Balance => "balance-sheet",
            Self::Cash => "cash-flow",
        }
    }

    /// Report label the output map is keyed by.
    pub fn report_name(&self, frequency: Frequency) -> &'static str {
        match (self, frequency) {
            (Self::Income, Frequency::Annual) => "incomeStatementHistory",
            (Self::Income, Frequency::Quarterly) => "incomeStatementHistoryQuarterly",
            (Self::Income, Frequency::Trailing) => "incomeStatements",
            (Self::Balance, Frequency::Annual) => "balanceSheetHistory",
            (Self::Balance, Frequency::Quarterly) => "balanceSheetHistoryQuarterly",
            (Self::Balance, Frequency::Trailing) => "balanceSheetStatements",
            (Self::Cash, Frequency::Annual) => "cashflowStatementHistory",
            (Self::Cash, Frequency::Quarterly) => "cashflowStatementHistoryQuarterly",
            (Self::Cash, Frequency::Trailing) => "cashflowStatements",
        }
    }
}

/// Sampling interval for historical price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interval {
    Daily,
    Weekly,
    Monthly,
}

impl Interval {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }

    /// Wire code the chart endpoint expects.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Daily => "1d",
            Self::Weekly => "1wk",
            Self::Monthly => "1mo",
        }
    }
}

/// Named quote-summary sub-sections served by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteModule {
    Price,
    SummaryDetail,
    DefaultKeyStatistics,
    AssetProfile,
    EsgScores,
    Earnings,
    FinancialData,
    QuoteType,
}

impl QuoteModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::SummaryDetail => "summaryDetail",
            Self::DefaultKeyStatistics => "defaultKeyStatistics",
            Self::AssetProfile => "assetProfile",
            Self::EsgScores => "esgScores",
            Self::Earnings => "earnings",
            Self::FinancialData => "financialData",
            Self::QuoteType => "quoteType",
        }
    }

    /// Page whose embedded payload carries this module when the JSON API
    /// is unavailable.
    pub fn scrape_page(&self) -> &'static str {
        match self {
            Self::DefaultKeyStatistics | Self::FinancialData => "key-statistics",
            _ => "financials",
        }
    }
}

// ── Statement records ─────────────────────────────────────────────────────────

pub type FieldMap = BTreeMap<String, Option<f64>>;

/// One fundamental statement for one reporting period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatementRecord {
    pub date: String,
    pub fields: FieldMap,
}

/// Per-ticker fundamentals output. Shape follows the `flat_format` flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatementTable {
    Periods(Vec<StatementRecord>),
    Flat(BTreeMap<String, FieldMap>),
}

impl StatementTable {
    pub fn len(&self) -> usize {
        match self {
            Self::Periods(records) => records.len(),
            Self::Flat(table) => table.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Labeled scalar records ────────────────────────────────────────────────────

/// Flat field → scalar mapping produced from one quote-summary module.
/// Date-like fields carry pre-formatted strings, time-like fields UTC
/// strings; everything else is a plain scalar or null.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PriceRecord(pub BTreeMap<String, Value>);

impl PriceRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.0.get(field).and_then(Value::as_f64)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Historical series ─────────────────────────────────────────────────────────

/// An epoch stamp together with its `YYYY-MM-DD` rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatedValue {
    pub date: Option<i64>,
    pub formatted_date: Option<String>,
}

/// One OHLCV period.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceBar {
    pub date: i64,
    pub formatted_date: Option<String>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub adjclose: Option<f64>,
    pub volume: Option<i64>,
}

/// Corporate events keyed by formatted event date.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EventsData {
    pub dividends: BTreeMap<String, Value>,
    pub splits: BTreeMap<String, Value>,
    pub earnings: BTreeMap<String, Value>,
}

/// Ordered per-period price history plus instrument metadata and events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoricalSeries {
    pub currency: Option<String>,
    pub instrument_type: Option<String>,
    pub first_trade_date: Option<DatedValue>,
    pub gmt_offset: Option<i64>,
    pub prices: Vec<PriceBar>,
    pub events: EventsData,
}

/// One cash dividend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dividend {
    pub date: i64,
    pub formatted_date: Option<String>,
    pub amount: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_codes() {
        assert_eq!(Interval::parse("daily"), Some(Interval::Daily));
        assert_eq!(Interval::parse("Weekly"), Some(Interval::Weekly));
        assert_eq!(Interval::Daily.code(), "1d");
        assert_eq!(Interval::Weekly.code(), "1wk");
        assert_eq!(Interval::Monthly.code(), "1mo");
        assert_eq!(Interval::parse("hourly"), None);
    }

    #[test]
    fn test_report_names() {
        assert_eq!(
            StatementKind::Income.report_name(Frequency::Annual),
            "incomeStatementHistory"
        );
        assert_eq!(
            StatementKind::Balance.report_name(Frequency::Quarterly),
            "balanceSheetHistoryQuarterly"
        );
        assert_eq!(
            StatementKind::Cash.report_name(Frequency::Trailing),
            "cashflowStatements"
        );
    }

    #[test]
    fn test_statement_pages() {
        assert_eq!(StatementKind::Income.page(), "financials");
        assert_eq!(StatementKind::Balance.page(), "balance-sheet");
        assert_eq!(StatementKind::Cash.page(), "cash-flow");
    }
}
