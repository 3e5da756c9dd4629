use std::time::{SystemTime, UNIX_EPOCH};

use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Governance payloads carry vote boundaries as unix seconds.
pub fn unix_seconds_to_ms(seconds: i64) -> i64 {
    seconds.saturating_mul(1_000)
}

pub fn datetime_to_ms(value: OffsetDateTime) -> i64 {
    (value.unix_timestamp_nanos() / 1_000_000) as i64
}

pub fn format_ms_rfc3339(epoch_ms: i64) -> String {
    let fallback = OffsetDateTime::from_unix_timestamp(0).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let value =
        OffsetDateTime::from_unix_timestamp_nanos(epoch_ms as i128 * 1_000_000).unwrap_or(fallback);
    value
        .format(&Rfc3339)
        .unwrap_or("1970-01-01T00:00:00Z".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn converts_datetime_to_epoch_ms() {
        assert_eq!(datetime_to_ms(datetime!(2024-01-01 00:00:01.250 UTC)), 1_704_067_201_250);
    }

    #[test]
    fn formats_epoch_ms_as_rfc3339() {
        assert_eq!(format_ms_rfc3339(0), "1970-01-01T00:00:00Z");
        assert_eq!(unix_seconds_to_ms(1_700_000_000), 1_700_000_000_000);
    }
}
