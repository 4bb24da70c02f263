use crate::errors::{EtlError, Result};
use chrono::{DateTime, NaiveDate, NaiveTime};
use std::time::{Duration, Instant};
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.start.elapsed()
        );
    }
}

// ── Date serials ──────────────────────────────────────────────────────────────

/// Epoch seconds → `YYYY-MM-DD` (UTC calendar date).
pub fn epoch_to_date(epoch: i64) -> Option<String> {
    DateTime::from_timestamp(epoch, 0).map(|dt| dt.format("%Y-%m-%d").to_string())
}

/// `YYYY-MM-DD` → epoch seconds at midnight UTC.
pub fn date_to_epoch(date: &str) -> Result<i64> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
        .map_err(|_| EtlError::Date(date.to_string()))?;
    Ok(day.and_time(NaiveTime::MIN).and_utc().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_to_date() {
        assert_eq!(epoch_to_date(0).as_deref(), Some("1970-01-01"));
        assert_eq!(epoch_to_date(1_676_246_460).as_deref(), Some("2023-02-13"));
    }

    #[test]
    fn test_date_round_trip() {
        // Calendar date survives the epoch conversion in both directions.
        for date in ["1970-01-01", "2015-01-15", "2023-02-13", "2024-02-29"] {
            let epoch = date_to_epoch(date).unwrap();
            assert_eq!(epoch_to_date(epoch).as_deref(), Some(date));
        }
        let noon = date_to_epoch("2023-02-13").unwrap() + 12 * 3600;
        assert_eq!(epoch_to_date(noon).as_deref(), Some("2023-02-13"));
    }

    #[test]
    fn test_date_to_epoch_rejects_garbage() {
        assert!(date_to_epoch("13/02/2023").is_err());
        assert!(date_to_epoch("not a date").is_err());
    }
}
