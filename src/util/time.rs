//! Timestamp formatting and parsing.
//!
//! Everything stored or sent to the remote uses `YYYY-MM-DDTHH:MM:SSZ`, which
//! also makes SQL string comparison order chronologically.

use crate::error::{Result, SyncError};
use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Utc};

/// Format used for watermarks, cached timestamps and `updated:>=` qualifiers.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Length of the ` updated:>=YYYY-MM-DDTHH:MM:SSZ` suffix appended to queries.
pub const UPDATED_QUALIFIER_LEN: usize = " updated:>=YYYY-MM-DDTHH:MM:SSZ".len();

/// Current time truncated to whole seconds.
#[must_use]
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

/// Format a timestamp in the canonical storage format.
#[must_use]
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored or remote timestamp.
///
/// Accepts RFC3339 (which covers the canonical format) and the
/// `YYYY-MM-DD HH:MM:SS` form SQLite's `datetime()` produces.
///
/// # Errors
///
/// Returns a validation error if the string matches neither form.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(SyncError::validation("timestamp", format!("unrecognized format: {s}")))
}

/// Serde adapter writing timestamps in the canonical format.
pub mod canonical {
    use super::{TIMESTAMP_FORMAT, parse_timestamp};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// # Errors
    ///
    /// Propagates serializer errors.
    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&dt.format(TIMESTAMP_FORMAT).to_string())
    }

    /// # Errors
    ///
    /// Fails when the value is not a recognizable timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse_timestamp(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::{TIMESTAMP_FORMAT, parse_timestamp};
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        /// # Errors
        ///
        /// Propagates serializer errors.
        #[allow(clippy::ref_option)]
        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => s.serialize_str(&dt.format(TIMESTAMP_FORMAT).to_string()),
                None => s.serialize_none(),
            }
        }

        /// # Errors
        ///
        /// Fails when a present value is not a recognizable timestamp.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let raw = Option::<String>::deserialize(d)?;
            raw.filter(|s| !s.is_empty())
                .map(|s| parse_timestamp(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_format_is_sortable_utc() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_timestamp(&dt), "2024-03-09T07:05:01Z");
        assert_eq!(format_timestamp(&dt).len() + " updated:>=".len(), UPDATED_QUALIFIER_LEN);
    }

    #[test]
    fn test_parse_accepts_both_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(parse_timestamp("2024-03-09T07:05:01Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-09T09:05:01+02:00").unwrap(), expected);
        assert_eq!(parse_timestamp("2024-03-09 07:05:01").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_now_has_no_subseconds() {
        assert_eq!(now_utc().nanosecond(), 0);
    }
}
