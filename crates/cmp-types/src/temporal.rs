use std::fmt;

use chrono::{DateTime, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// UTC instant recorded on a ledger entry.
///
/// Precision is fixed at microseconds. The canonical text form is
/// `YYYY-MM-DDTHH:MM:SS.ffffffZ` with exactly six fractional digits, and that
/// exact string is what enters the entry hash. Construction truncates any
/// sub-microsecond component so a stored timestamp always round-trips.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// The current wall-clock time, truncated to microseconds.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Wrap a `DateTime<Utc>`, truncating it to microseconds.
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        let micros_only = at.nanosecond() / 1_000 * 1_000;
        Self(at.with_nanosecond(micros_only).unwrap_or(at))
    }

    /// Parse the canonical text form.
    ///
    /// Anything that does not re-render to exactly the same string is
    /// rejected, so a verifier never hashes a reformatted value.
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        let parsed = DateTime::parse_from_rfc3339(value).map_err(|e| {
            ValidationError::InvalidTimestamp {
                value: value.to_string(),
                reason: e.to_string(),
            }
        })?;
        let ts = Self::from_datetime(parsed.with_timezone(&Utc));
        if ts.to_canonical_string() != value {
            return Err(ValidationError::InvalidTimestamp {
                value: value.to_string(),
                reason: "not in canonical microsecond UTC form".into(),
            });
        }
        Ok(ts)
    }

    /// Render as `YYYY-MM-DDTHH:MM:SS.ffffffZ`.
    pub fn to_canonical_string(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(at: DateTime<Utc>) -> Self {
        Self::from_datetime(at)
    }
}

impl TryFrom<String> for Timestamp {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.to_canonical_string()
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.to_canonical_string())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_canonical_string())
    }
}
