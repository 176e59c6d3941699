//! Time arithmetic for the bucketed snapshot tables.
//!
//! Wall clock (UTC, integer milliseconds) is used for alignment and
//! logging; interval waits use the tokio monotonic clock at the call
//! sites. Scheduling code takes `now_ms` as a value so tests can feed a
//! virtual clock.

use chrono::{DateTime, Utc};

/// Current wall clock in milliseconds since the epoch, UTC.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Snap a timestamp down to its bucket boundary.
pub fn align(ts_ms: i64, bucket_ms: i64) -> i64 {
    debug_assert!(bucket_ms > 0);
    (ts_ms / bucket_ms) * bucket_ms
}

/// Parse an upstream RFC 3339 timestamp into epoch milliseconds.
/// Returns `None` for absent or unparsable input; the column stays null.
pub fn rfc3339_to_ms(raw: Option<&str>) -> Option<i64> {
    let raw = raw?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUCKET: i64 = 180_000;

    #[test]
    fn align_snaps_down() {
        assert_eq!(align(1_700_000_030_000, BUCKET), 1_699_999_920_000);
        assert_eq!(align(1_699_999_920_000, BUCKET), 1_699_999_920_000);
        assert_eq!(align(1_699_999_919_999, BUCKET), 1_699_999_740_000);
    }

    #[test]
    fn aligned_is_multiple_and_not_after_raw() {
        for raw in [0i64, 1, 179_999, 180_000, 1_700_000_030_000] {
            let aligned = align(raw, BUCKET);
            assert_eq!(aligned % BUCKET, 0);
            assert!(aligned <= raw);
        }
    }

    #[test]
    fn parses_provider_timestamps() {
        assert_eq!(
            rfc3339_to_ms(Some("2023-11-14T22:13:50.000Z")),
            Some(1_700_000_030_000)
        );
        assert_eq!(rfc3339_to_ms(Some("not a date")), None);
        assert_eq!(rfc3339_to_ms(None), None);
    }
}
