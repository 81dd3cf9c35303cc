//! Time helpers
//!
//! Profiles and catalogs store times as naive ISO strings
//! (`%Y-%m-%dT%H:%M:%S`) interpreted as UTC. The raw store keeps epoch
//! seconds.

use crate::error::{CommonError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Format used for every persisted or configured time
pub const ISO_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parse a time in ISO format.
///
/// Accepts `YYYY-MM-DDTHH:MM:SS`, a bare `YYYY-MM-DD` (midnight) and full
/// RFC 3339 strings with an offset.
pub fn from_iso_time(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(naive) = NaiveDateTime::parse_from_str(value, ISO_TIME_FORMAT) {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| CommonError::invalid_time(value, e))
}

/// Format a time in ISO format
pub fn to_iso_time(time: &DateTime<Utc>) -> String {
    time.format(ISO_TIME_FORMAT).to_string()
}

/// Start of the day containing `time`
pub fn midnight(time: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&time.date_naive().and_time(NaiveTime::MIN))
}

/// Convert epoch seconds to a UTC time
pub fn from_epoch(seconds: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(seconds, 0).ok_or(CommonError::TimestampOutOfRange(seconds))
}

/// Serde adapter for `DateTime<Utc>` fields stored with [`ISO_TIME_FORMAT`]
pub mod iso_format {
    use super::{from_iso_time, to_iso_time};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&to_iso_time(time))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let value = String::deserialize(deserializer)?;
        from_iso_time(&value).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional `DateTime<Utc>` fields stored with [`ISO_TIME_FORMAT`]
pub mod iso_format_opt {
    use super::{from_iso_time, to_iso_time};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        time: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(t) => serializer.serialize_some(&to_iso_time(t)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<String>::deserialize(deserializer)?;
        value
            .map(|v| from_iso_time(&v).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Timelike;
    use proptest::prelude::*;

    #[test]
    fn test_from_iso_time_formats() {
        let a = from_iso_time("2024-01-08T12:30:00").unwrap();
        assert_eq!(a.hour(), 12);

        let b = from_iso_time("2024-01-08").unwrap();
        assert_eq!(b, midnight(a));

        let c = from_iso_time("2024-01-08T12:30:00+02:00").unwrap();
        assert_eq!(c.hour(), 10);

        assert!(from_iso_time("08/01/2024").is_err());
    }

    #[test]
    fn test_midnight() {
        let t = from_iso_time("2024-03-05T23:59:59").unwrap();
        assert_eq!(to_iso_time(&midnight(t)), "2024-03-05T00:00:00");
    }

    #[test]
    fn test_from_epoch() {
        let t = from_epoch(1704067200).unwrap();
        assert_eq!(to_iso_time(&t), "2024-01-01T00:00:00");
        assert!(from_epoch(i64::MAX).is_err());
    }

    proptest! {
        #[test]
        fn prop_iso_time_round_trip(secs in 0i64..4_102_444_800) {
            let t = from_epoch(secs).unwrap();
            prop_assert_eq!(from_iso_time(&to_iso_time(&t)).unwrap(), t);
        }
    }
}
