//! Normalization of the provider's three raw JSON shapes into the canonical
//! record types: dated statement tables, labeled scalar reports, and
//! historical price series.

use crate::models::{
    DatedValue, EventsData, FieldMap, HistoricalSeries, PriceBar, PriceRecord,
};
use crate::utils::epoch_to_date;
use chrono::{DateTime, TimeZone, Timelike, Utc};
use chrono_tz::US::Eastern;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

// ── Shared rules ──────────────────────────────────────────────────────────────

/// The `.raw` extraction rule: value wrappers like `{"raw": 42.5,
/// "fmt": "42.50"}` reduce to their numeric part, anything else to null.
pub fn raw_number(value: &Value) -> Option<f64> {
    value.get("raw").and_then(Value::as_f64)
}

/// `quarterlyTotalRevenue` → `totalRevenue`, `annualEBIT` → `ebit`.
pub fn canonical_field(key: &str) -> String {
    let stripped = key
        .strip_prefix("quarterly")
        .or_else(|| key.strip_prefix("annual"))
        .or_else(|| key.strip_prefix("trailing"))
        .unwrap_or(key);
    if stripped == "EBIT" {
        return "ebit".to_string();
    }
    let mut chars = stripped.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Epoch stamp → US/Eastern wall clock → UTC string. Midnight is shifted to
/// noon before localizing; the provider emits date-only stamps at 0:00 whose
/// DST side is ambiguous.
pub fn format_time(epoch: i64) -> Option<String> {
    let stamp = DateTime::from_timestamp(epoch, 0)?.naive_utc();
    let wall = if stamp.hour() == 0 {
        stamp.with_hour(12)?
    } else {
        stamp
    };
    let eastern = Eastern.from_local_datetime(&wall).single()?;
    Some(
        eastern
            .with_timezone(&Utc)
            .format("%Y-%m-%d %H:%M:%S %Z%z")
            .to_string(),
    )
}

// ── Fundamentals timeseries ───────────────────────────────────────────────────

/// Regroup a timeseries response by reporting date. Null period entries are
/// skipped; missing `reportedValue.raw` becomes an explicit null field.
pub fn statement_table(raw: &Value) -> BTreeMap<String, FieldMap> {
    let mut table: BTreeMap<String, FieldMap> = BTreeMap::new();
    let Some(results) = raw.get("result").and_then(Value::as_array) else {
        return table;
    };

    for entry in results {
        let Some(obj) = entry.as_object() else { continue };
        for (key, periods) in obj {
            if key == "meta" || key == "timestamp" {
                continue;
            }
            let field = canonical_field(key);
            let Some(periods) = periods.as_array() else { continue };
            for record in periods {
                let Some(date) = record.get("asOfDate").and_then(Value::as_str) else {
                    continue;
                };
                let value = record.get("reportedValue").and_then(raw_number);
                table
                    .entry(date.to_string())
                    .or_default()
                    .insert(field.clone(), value);
            }
        }
    }
    table
}

// ── Quote-summary modules ─────────────────────────────────────────────────────

/// Merge the module object out of a quote-summary response envelope.
pub fn module_data(raw: &Value, module: &str) -> Value {
    let mut data = Map::new();
    if let Some(results) = raw.get("result").and_then(Value::as_array) {
        for entry in results {
            if let Some(obj) = entry.get(module).and_then(Value::as_object) {
                for (key, value) in obj {
                    data.insert(key.clone(), value.clone());
                }
            }
        }
    }
    Value::Object(data)
}

/// Flatten one module object into a labeled scalar record.
pub fn clean_report(raw: &Value) -> Option<PriceRecord> {
    let obj = raw.as_object()?;
    let mut record = BTreeMap::new();

    for (key, value) in obj {
        let cleaned = if key.contains("Time") {
            value
                .as_i64()
                .and_then(format_time)
                .map(Value::String)
                .unwrap_or(Value::Null)
        } else if key.contains("Date") {
            match value.get("fmt").and_then(Value::as_str) {
                Some(fmt) => Value::String(fmt.to_string()),
                None => Value::String("-".to_string()),
            }
        } else if value.is_null() || value.is_string() || value.is_number() || value.is_boolean() {
            value.clone()
        } else {
            raw_number(value).map(Value::from).unwrap_or(Value::Null)
        };
        record.insert(key.clone(), cleaned);
    }

    Some(PriceRecord(record))
}

/// Earnings get their own treatment: the chart sub-objects are renamed and
/// cleaned row-wise, `maxAge` is dropped, everything else passes through.
pub fn clean_earnings(raw: &Value) -> Option<Value> {
    let obj = raw.as_object()?;
    let mut out = Map::new();

    for (key, value) in obj {
        match key.as_str() {
            "earningsChart" => {
                let mut sub = Map::new();
                if let Some(chart) = value.as_object() {
                    for (chart_key, chart_value) in chart {
                        let cleaned = match chart_key.as_str() {
                            "quarterly" => clean_dated_rows(chart_value),
                            "currentQuarterEstimate" => {
                                raw_number(chart_value).map(Value::from).unwrap_or(Value::Null)
                            }
                            _ => chart_value.clone(),
                        };
                        sub.insert(chart_key.clone(), cleaned);
                    }
                }
                out.insert("earningsData".to_string(), Value::Object(sub));
            }
            "financialsChart" => {
                let mut sub = Map::new();
                if let Some(chart) = value.as_object() {
                    for (chart_key, chart_value) in chart {
                        sub.insert(chart_key.clone(), clean_dated_rows(chart_value));
                    }
                }
                out.insert("financialsData".to_string(), Value::Object(sub));
            }
            "maxAge" => {}
            _ => {
                out.insert(key.clone(), value.clone());
            }
        }
    }

    Some(Value::Object(out))
}

/// Clean a list of `{date, field: {raw,..}}` rows into plain scalars.
fn clean_dated_rows(rows: &Value) -> Value {
    let Some(rows) = rows.as_array() else {
        return Value::Array(Vec::new());
    };
    let cleaned = rows
        .iter()
        .map(|row| {
            let mut out = Map::new();
            if let Some(obj) = row.as_object() {
                for (key, value) in obj {
                    if key == "date" {
                        out.insert(key.clone(), value.clone());
                    } else {
                        out.insert(
                            key.clone(),
                            raw_number(value).map(Value::from).unwrap_or(Value::Null),
                        );
                    }
                }
            }
            Value::Object(out)
        })
        .collect();
    Value::Array(cleaned)
}

// ── Historical series ─────────────────────────────────────────────────────────

/// Normalize a chart API response. Returns `None` when the series-level date
/// field is missing and this is not the final attempt, so the caller can
/// discard and re-fetch.
pub fn chart_series(raw: &Value, last_attempt: bool) -> Option<HistoricalSeries> {
    let mut series = HistoricalSeries::default();
    let Some(results) = raw.pointer("/chart/result").and_then(Value::as_array) else {
        return Some(series);
    };

    for result in results {
        let meta = result.get("meta");
        series.currency = meta
            .and_then(|m| m.get("currency"))
            .and_then(Value::as_str)
            .map(str::to_string);
        series.instrument_type = meta
            .and_then(|m| m.get("instrumentType"))
            .and_then(Value::as_str)
            .map(str::to_string);
        series.gmt_offset = meta.and_then(|m| m.get("gmtoffset")).and_then(Value::as_i64);

        series.first_trade_date =
            match meta.and_then(|m| m.get("firstTradeDate")).and_then(Value::as_i64) {
                Some(epoch) => Some(DatedValue {
                    date: Some(epoch),
                    formatted_date: epoch_to_date(epoch),
                }),
                None if last_attempt => Some(DatedValue {
                    date: None,
                    formatted_date: None,
                }),
                None => return None,
            };

        series.events = events_data(result.get("events"));
        series.prices = zip_prices(result);
    }
    Some(series)
}

/// Zip the parallel indicator arrays into one bar per timestamp.
fn zip_prices(result: &Value) -> Vec<PriceBar> {
    let Some(timestamps) = result.get("timestamp").and_then(Value::as_array) else {
        return Vec::new();
    };
    let quote = result.pointer("/indicators/quote/0");
    let column = |name: &str| quote.and_then(|q| q.get(name)).and_then(Value::as_array);

    let highs = column("high");
    let lows = column("low");
    let opens = column("open");
    let closes = column("close");
    let volumes = column("volume");
    let adjcloses = result
        .pointer("/indicators/adjclose/0/adjclose")
        .and_then(Value::as_array);

    let cell = |col: Option<&Vec<Value>>, i: usize| col.and_then(|a| a.get(i)).and_then(Value::as_f64);

    timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, stamp)| {
            let date = stamp.as_i64()?;
            Some(PriceBar {
                date,
                formatted_date: epoch_to_date(date),
                open: cell(opens, i),
                high: cell(highs, i),
                low: cell(lows, i),
                close: cell(closes, i),
                adjclose: cell(adjcloses, i),
                volume: volumes.and_then(|a| a.get(i)).and_then(Value::as_i64),
            })
        })
        .collect()
}

/// Re-key event tables by formatted date, keeping the raw fields and adding
/// a `formatted_date` alongside each entry.
fn events_data(events: Option<&Value>) -> EventsData {
    let mut out = EventsData::default();
    let Some(obj) = events.and_then(Value::as_object) else {
        return out;
    };

    for (kind, table) in obj {
        let target = match kind.as_str() {
            "dividends" => &mut out.dividends,
            "splits" => &mut out.splits,
            "earnings" => &mut out.earnings,
            _ => continue,
        };
        let Some(entries) = table.as_object() else { continue };
        for (epoch_key, event) in entries {
            let Some(label) = epoch_key.parse::<i64>().ok().and_then(epoch_to_date) else {
                continue;
            };
            let mut event = event.clone();
            if let (Some(formatted), Some(map)) = (
                event.get("date").and_then(Value::as_i64).and_then(epoch_to_date),
                event.as_object_mut(),
            ) {
                map.insert("formatted_date".to_string(), Value::String(formatted));
            }
            target.insert(label, event);
        }
    }
    out
}

/// Normalize a scraped `HistoricalPriceStore` section into the same series
/// shape the chart API produces.
pub fn store_series(store: &Value, last_attempt: bool) -> Option<HistoricalSeries> {
    let mut series = HistoricalSeries::default();

    series.currency = store
        .get("currency")
        .and_then(Value::as_str)
        .map(str::to_string);
    series.first_trade_date = match store.get("firstTradeDate").and_then(Value::as_i64) {
        Some(epoch) => Some(DatedValue {
            date: Some(epoch),
            formatted_date: epoch_to_date(epoch),
        }),
        None if last_attempt => Some(DatedValue {
            date: None,
            formatted_date: None,
        }),
        None => return None,
    };
    series.events = events_data(store.get("eventsData"));

    if let Some(rows) = store.get("prices").and_then(Value::as_array) {
        series.prices = rows
            .iter()
            .filter_map(|row| {
                let date = row.get("date").and_then(Value::as_i64)?;
                let field = |name: &str| row.get(name).and_then(Value::as_f64);
                Some(PriceBar {
                    date,
                    formatted_date: epoch_to_date(date),
                    open: field("open"),
                    high: field("high"),
                    low: field("low"),
                    close: field("close"),
                    adjclose: field("adjclose"),
                    volume: row.get("volume").and_then(Value::as_i64),
                })
            })
            .collect();
    }
    Some(series)
}

// ── Dividends ─────────────────────────────────────────────────────────────────

/// Pull the dividend table out of a raw chart response, sorted by date.
pub fn dividend_history(raw: &Value) -> Option<Vec<crate::models::Dividend>> {
    let table = raw
        .pointer("/chart/result/0/events/dividends")?
        .as_object()?;
    let mut dividends: Vec<_> = table
        .values()
        .filter_map(|event| {
            let date = event.get("date").and_then(Value::as_i64)?;
            Some(crate::models::Dividend {
                date,
                formatted_date: epoch_to_date(date),
                amount: event.get("amount").and_then(Value::as_f64),
            })
        })
        .collect();
    dividends.sort_by_key(|dividend| dividend.date);
    Some(dividends)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
