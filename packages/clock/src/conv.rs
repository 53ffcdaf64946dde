//! Conversions between timestamps and human readable date-times.
use chrono::{DateTime, Utc};
use swarmscan_primitives::DurationSinceUnixEpoch;

/// Renders a timestamp as an RFC 3339 UTC date-time string, e.g.
/// `1970-01-01 00:00:00 UTC`.
///
/// Falls back to the raw second count when the timestamp does not fit a
/// `chrono` date-time.
#[must_use]
pub fn format_timestamp(timestamp: DurationSinceUnixEpoch) -> String {
    let secs = i64::try_from(timestamp.as_secs()).ok();

    match secs.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, timestamp.subsec_nanos())) {
        Some(date_time) => date_time.to_string(),
        None => format!("{}s", timestamp.as_secs()),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::format_timestamp;

    #[test]
    fn it_should_format_the_unix_epoch() {
        assert_eq!(format_timestamp(Duration::ZERO), "1970-01-01 00:00:00 UTC");
    }

    #[test]
    fn it_should_fall_back_to_seconds_for_out_of_range_timestamps() {
        assert_eq!(format_timestamp(Duration::from_secs(u64::MAX)), format!("{}s", u64::MAX));
    }
}
