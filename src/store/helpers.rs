//! Conversions between session fields and SQLite column values.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Counters are `u64` in memory and `INTEGER` (signed) on disk.
pub fn count_to_sql(count: u64) -> Result<i64> {
    i64::try_from(count).map_err(|_| anyhow!("count {count} does not fit an SQLite INTEGER"))
}

pub fn count_from_sql(raw: i64, column: &str) -> Result<u64> {
    u64::try_from(raw).map_err(|_| anyhow!("column {column} holds negative count {raw}"))
}

/// Timestamps are stored as RFC 3339 text with full sub-second precision.
pub fn timestamp_to_sql(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

pub fn timestamp_from_sql(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .with_context(|| format!("column {column} holds an invalid timestamp '{raw}'"))
}

pub fn optional_timestamp_from_sql(raw: Option<String>, column: &str) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref()
        .map(|value| timestamp_from_sql(value, column))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_keep_sub_second_precision() {
        let at = DateTime::parse_from_rfc3339("2024-03-01T10:15:30.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(timestamp_from_sql(&timestamp_to_sql(&at), "t").unwrap(), at);
        assert_eq!(optional_timestamp_from_sql(None, "t").unwrap(), None);
    }

    #[test]
    fn out_of_range_counts_are_errors() {
        assert!(count_to_sql(u64::MAX).is_err());
        assert!(count_from_sql(-1, "frame_count").is_err());
        assert_eq!(count_from_sql(7, "frame_count").unwrap(), 7);
    }
}
