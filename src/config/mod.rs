use crate::errors::{EtlError, Result};
use anyhow::Result as AnyResult;
use serde::{Deserialize, Serialize};

// ── Locale table ──────────────────────────────────────────────────────────────

/// Query-string locale parameters attached to every provider request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Locale {
    pub lang: &'static str,
    pub region: &'static str,
    pub cors_domain: &'static str,
}

const COUNTRIES: &[(&str, Locale)] = &[
    ("US", Locale { lang: "en-US", region: "US", cors_domain: "finance.yahoo.com" }),
    ("AU", Locale { lang: "en-AU", region: "AU", cors_domain: "au.finance.yahoo.com" }),
    ("CA", Locale { lang: "en-CA", region: "CA", cors_domain: "ca.finance.yahoo.com" }),
    ("DE", Locale { lang: "de-DE", region: "DE", cors_domain: "de.finance.yahoo.com" }),
    ("ES", Locale { lang: "es-ES", region: "ES", cors_domain: "es.finance.yahoo.com" }),
    ("FR", Locale { lang: "fr-FR", region: "FR", cors_domain: "fr.finance.yahoo.com" }),
    ("GB", Locale { lang: "en-GB", region: "GB", cors_domain: "uk.finance.yahoo.com" }),
    ("HK", Locale { lang: "zh-Hant-HK", region: "HK", cors_domain: "hk.finance.yahoo.com" }),
    ("IN", Locale { lang: "en-IN", region: "IN", cors_domain: "in.finance.yahoo.com" }),
    ("IT", Locale { lang: "it-IT", region: "IT", cors_domain: "it.finance.yahoo.com" }),
    ("SG", Locale { lang: "en-SG", region: "SG", cors_domain: "sg.finance.yahoo.com" }),
];

/// Locale for a country code. Unsupported codes are a construction-time error.
pub fn locale_for(country: &str) -> Result<Locale> {
    let code = country.trim().to_uppercase();
    COUNTRIES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, locale)| *locale)
        .ok_or(EtlError::InvalidCountry(code))
}

pub fn supported_countries() -> impl Iterator<Item = &'static str> {
    COUNTRIES.iter().map(|(code, _)| *code)
}

// ── Per-instance request configuration ────────────────────────────────────────

/// Options for one pipeline instance. Immutable after construction.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequestConfig {
    #[serde(default = "default_country")]
    pub country: String,

    /// Fan tickers out over a bounded worker pool instead of iterating.
    #[serde(default)]
    pub concurrent: bool,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// One proxy or several; picked at random per client when several.
    #[serde(default)]
    pub proxies: Option<Vec<String>>,

    /// Fundamentals come back as one date→fields mapping instead of a
    /// list of per-period records.
    #[serde(default)]
    pub flat_format: bool,

    /// Overrides the built-in user-agent pool when set.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Minimum spacing between fresh (non-cached) provider requests.
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: u64,
}

// ── Defaults ─────────────────────────────────────────────────────────────────

fn default_country() -> String {
    "US".to_string()
}
fn default_max_workers() -> usize {
    8
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_min_interval_secs() -> u64 {
    7
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            country: default_country(),
            concurrent: false,
            max_workers: default_max_workers(),
            timeout_secs: default_timeout_secs(),
            proxies: None,
            flat_format: false,
            user_agent: None,
            min_interval_secs: default_min_interval_secs(),
        }
    }
}

// ── CLI configuration ────────────────────────────────────────────────────────

/// Top-level application configuration for the binary.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub request: RequestConfig,
}

impl AppConfig {
    /// Load configuration from file + environment overrides
    pub fn load() -> AnyResult<Self> {
        dotenv::dotenv().ok();

        let cfg = config::Config::builder()
            .add_source(
                config::File::with_name("config/default")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::File::with_name("config/local")
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(config::Environment::with_prefix("YFIN").separator("__"))
            .build()?;

        let app_cfg: AppConfig = cfg.try_deserialize().unwrap_or_else(|_| AppConfig::default());
        Ok(app_cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_country_has_locale_params() {
        for code in supported_countries() {
            let locale = locale_for(code).unwrap();
            assert!(!locale.lang.is_empty(), "{code}: empty lang");
            assert!(!locale.region.is_empty(), "{code}: empty region");
            assert!(!locale.cors_domain.is_empty(), "{code}: empty corsDomain");
        }
    }

    #[test]
    fn test_country_lookup_is_case_insensitive() {
        assert_eq!(locale_for("us").unwrap(), locale_for("US").unwrap());
        assert_eq!(locale_for(" fr ").unwrap().region, "FR");
    }

    #[test]
    fn test_unknown_country_is_rejected() {
        assert!(matches!(
            locale_for("XX"),
            Err(EtlError::InvalidCountry(code)) if code == "XX"
        ));
    }

    #[test]
    fn test_request_defaults() {
        let cfg = RequestConfig::default();
        assert_eq!(cfg.country, "US");
        assert!(!cfg.concurrent);
        assert_eq!(cfg.max_workers, 8);
        assert_eq!(cfg.timeout_secs, 30);
        assert_eq!(cfg.min_interval_secs, 7);
        assert!(!cfg.flat_format);
    }
}
