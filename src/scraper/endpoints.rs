use crate::config::Locale;
use crate::errors::Result;
use crate::models::{Frequency, Interval, QuoteModule, StatementKind};
use url::Url;

/// Base page URL tickers are appended to.
pub const QUOTE_BASE: &str = "https://finance.yahoo.com/quote/";

const QUERY_HOST: &str = "https://query2.finance.yahoo.com";

/// Earliest `period1` the fundamentals timeseries endpoint accepts.
const TIMESERIES_FLOOR: i64 = 493_590_046;

// ── Field codes ───────────────────────────────────────────────────────────────

const INCOME_FIELDS: &[&str] = &[
    "TotalRevenue",
    "CostOfRevenue",
    "GrossProfit",
    "OperatingExpense",
    "OperatingIncome",
    "SellingGeneralAndAdministration",
    "ResearchAndDevelopment",
    "InterestExpense",
    "PretaxIncome",
    "TaxProvision",
    "NetIncome",
    "NetIncomeCommonStockholders",
    "BasicEPS",
    "DilutedEPS",
    "EBIT",
    "EBITDA",
    "TotalExpenses",
];

const BALANCE_FIELDS: &[&str] = &[
    "TotalAssets",
    "CurrentAssets",
    "CashAndCashEquivalents",
    "Receivables",
    "Inventory",
    "TotalLiabilitiesNetMinorityInterest",
    "CurrentLiabilities",
    "AccountsPayable",
    "CurrentDebt",
    "LongTermDebt",
    "TotalDebt",
    "NetDebt",
    "TotalEquityGrossMinorityInterest",
    "StockholdersEquity",
    "RetainedEarnings",
    "WorkingCapital",
];

const CASH_FIELDS: &[&str] = &[
    "OperatingCashFlow",
    "InvestingCashFlow",
    "FinancingCashFlow",
    "FreeCashFlow",
    "CapitalExpenditure",
    "RepurchaseOfCapitalStock",
    "CashDividendsPaid",
    "DepreciationAndAmortization",
    "ChangesInCash",
    "EndCashPosition",
    "NetIncomeFromContinuingOperations",
];

fn timeseries_types(kind: StatementKind, frequency: Frequency) -> String {
    let fields = match kind {
        StatementKind::Income => INCOME_FIELDS,
        StatementKind::Balance => BALANCE_FIELDS,
        StatementKind::Cash => CASH_FIELDS,
    };
    fields
        .iter()
        .map(|field| format!("{}{}", frequency.prefix(), field))
        .collect::<Vec<_>>()
        .join(",")
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Builds fully-qualified provider URLs with the instance locale injected.
#[derive(Debug, Clone)]
pub struct Endpoints {
    locale: Locale,
}

impl Endpoints {
    pub fn new(locale: Locale) -> Self {
        Self { locale }
    }

    fn push_locale(&self, url: &mut Url, cors: bool) {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("lang", self.locale.lang);
        pairs.append_pair("region", self.locale.region);
        if cors {
            pairs.append_pair("corsDomain", self.locale.cors_domain);
        }
    }

    /// HTML page for a statement category, e.g. `/quote/AAPL/financials`.
    pub fn statement_page(&self, ticker: &str, page: &str) -> String {
        let ticker = encode_ticker(ticker);
        format!(
            "{QUOTE_BASE}{ticker}/{page}?p={ticker}&lang={}&region={}",
            self.locale.lang, self.locale.region
        )
    }

    /// Scraped history page with an explicit date window.
    pub fn history_page(&self, ticker: &str, start: i64, end: i64, interval: Interval) -> String {
        let ticker = encode_ticker(ticker);
        let code = interval.code();
        format!(
            "{QUOTE_BASE}{ticker}/history?period1={start}&period2={end}&interval={code}\
             &filter=history&frequency={code}&lang={}&region={}",
            self.locale.lang, self.locale.region
        )
    }

    /// Landing page for a ticker; no locale, no network use here.
    pub fn summary_page(&self, ticker: &str) -> String {
        format!("{QUOTE_BASE}{}", encode_ticker(ticker))
    }

    /// Quote-summary module endpoint (`modules=` query).
    pub fn quote_summary(&self, ticker: &str, module: QuoteModule) -> Result<String> {
        let mut url = Url::parse(&format!(
            "{QUERY_HOST}/v10/finance/quoteSummary/{}",
            encode_ticker(&ticker.to_lowercase())
        ))?;
        url.query_pairs_mut()
            .append_pair("modules", module.as_str());
        self.push_locale(&mut url, true);
        Ok(url.into())
    }

    /// Fundamentals timeseries endpoint (`type=` lists the field codes).
    pub fn timeseries(
        &self,
        ticker: &str,
        kind: StatementKind,
        frequency: Frequency,
        now: i64,
    ) -> Result<String> {
        let mut url = Url::parse(&format!(
            "{QUERY_HOST}/ws/fundamentals-timeseries/v1/finance/timeseries/{}",
            encode_ticker(&ticker.to_lowercase())
        ))?;
        url.query_pairs_mut()
            .append_pair("symbol", &ticker.to_lowercase())
            .append_pair("type", &timeseries_types(kind, frequency))
            .append_pair("period1", &TIMESERIES_FLOOR.to_string())
            .append_pair("period2", &now.to_string())
            .append_pair("merge", "false");
        self.push_locale(&mut url, true);
        Ok(url.into())
    }

    /// Historical chart endpoint with period bounds, interval and events.
    pub fn chart(&self, ticker: &str, start: i64, end: i64, interval: Interval) -> Result<String> {
        let upper = ticker.to_uppercase();
        let mut url = Url::parse(&format!(
            "{QUERY_HOST}/v8/finance/chart/{}",
            encode_ticker(&upper)
        ))?;
        url.query_pairs_mut()
            .append_pair("symbol", &upper)
            .append_pair("period1", &start.to_string())
            .append_pair("period2", &end.to_string())
            .append_pair("interval", interval.code())
            .append_pair("events", "div|split|earn");
        self.push_locale(&mut url, false);
        Ok(url.into())
    }

    /// Analyst recommendations endpoint.
    pub fn recommendations(&self, ticker: &str) -> Result<String> {
        let mut url = Url::parse(&format!(
            "{QUERY_HOST}/v6/finance/recommendationsbysymbol/{}",
            encode_ticker(&ticker.to_lowercase())
        ))?;
        self.push_locale(&mut url, true);
        Ok(url.into())
    }

    /// Research insights endpoint.
    pub fn insights(&self, ticker: &str) -> Result<String> {
        let mut url = Url::parse(&format!("{QUERY_HOST}/ws/insights/v2/finance/insights"))?;
        url.query_pairs_mut()
            .append_pair("symbol", &ticker.to_lowercase());
        self.push_locale(&mut url, true);
        Ok(url.into())
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// The provider rejects bare `=` in path positions (FX pairs, futures).
pub fn encode_ticker(ticker: &str) -> String {
    ticker.replace('=', "%3D")
}

/// Flip between the two load-balanced query hosts.
pub fn alternate_host(url: &str) -> String {
    if url.contains("query2.") {
        url.replace("query2.", "query1.")
    } else if url.contains("query1.") {
        url.replace("query1.", "query2.")
    } else {
        url.to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{locale_for, supported_countries};

    fn endpoints() -> Endpoints {
        Endpoints::new(locale_for("US").unwrap())
    }

    #[test]
    fn test_every_locale_lands_in_urls() {
        for code in supported_countries() {
            let ep = Endpoints::new(locale_for(code).unwrap());
            let url = ep.quote_summary("AAPL", QuoteModule::Price).unwrap();
            assert!(url.contains("lang="), "{code}: {url}");
            assert!(url.contains("region="), "{code}: {url}");
            assert!(url.contains("corsDomain="), "{code}: {url}");
        }
    }

    #[test]
    fn test_quote_summary_url() {
        let url = endpoints()
            .quote_summary("AAPL", QuoteModule::DefaultKeyStatistics)
            .unwrap();
        assert!(url.starts_with("https://query2.finance.yahoo.com/v10/finance/quoteSummary/aapl?"));
        assert!(url.contains("modules=defaultKeyStatistics"));
        assert!(url.contains("lang=en-US"));
        assert!(url.contains("region=US"));
    }

    #[test]
    fn test_timeseries_url_lists_typed_fields() {
        let url = endpoints()
            .timeseries("AAPL", StatementKind::Income, Frequency::Quarterly, 1_700_000_000)
            .unwrap();
        assert!(url.contains("/ws/fundamentals-timeseries/v1/finance/timeseries/aapl?"));
        assert!(url.contains("quarterlyTotalRevenue%2CquarterlyCostOfRevenue"));
        assert!(url.contains("period1=493590046"));
        assert!(url.contains("period2=1700000000"));
    }

    #[test]
    fn test_chart_url() {
        let url = endpoints()
            .chart("AAPL", 1_421_280_000, 1_508_025_600, Interval::Weekly)
            .unwrap();
        assert!(url.contains("/v8/finance/chart/AAPL?"));
        assert!(url.contains("symbol=AAPL"));
        assert!(url.contains("period1=1421280000"));
        assert!(url.contains("period2=1508025600"));
        assert!(url.contains("interval=1wk"));
        assert!(url.contains("events=div%7Csplit%7Cearn"));
    }

    #[test]
    fn test_fx_tickers_are_path_encoded() {
        let url = endpoints()
            .chart("JPY=X", 0, 1, Interval::Daily)
            .unwrap();
        assert!(url.contains("/v8/finance/chart/JPY%3DX?"));
        let page = endpoints().statement_page("JPY=X", "financials");
        assert!(page.contains("/quote/JPY%3DX/financials?p=JPY%3DX"));
    }

    #[test]
    fn test_statement_page_url() {
        let url = endpoints().statement_page("AAPL", StatementKind::Balance.page());
        assert_eq!(
            url,
            "https://finance.yahoo.com/quote/AAPL/balance-sheet?p=AAPL&lang=en-US&region=US"
        );
    }

    #[test]
    fn test_alternate_host_flips_both_ways() {
        let q2 = "https://query2.finance.yahoo.com/v8/finance/chart/AAPL?x=1";
        let q1 = alternate_host(q2);
        assert!(q1.contains("query1."));
        assert_eq!(alternate_host(&q1), q2);
        // Page URLs have no query host to flip.
        let page = "https://finance.yahoo.com/quote/AAPL/financials";
        assert_eq!(alternate_host(page), page);
    }
}
