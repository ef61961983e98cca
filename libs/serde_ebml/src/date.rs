use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

pub(crate) const DATE_TOKEN: &str = "$serde_ebml::private::Date";

/// The epoch of EBML dates, 2001-01-01T00:00:00Z, in unix seconds.
const EPOCH_UNIX_SECS: i64 = 978_307_200;
const EPOCH_UNIX_NANOS: i64 = EPOCH_UNIX_SECS * 1_000_000_000;

/// An EBML date: signed nanoseconds since 2001-01-01T00:00:00Z.
///
/// Unlike integers, dates are always encoded as 8 bytes, even at the epoch.
///
/// ```
/// use chrono::{TimeZone as _, Utc};
/// use serde_ebml::Date;
///
/// let time = Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 1).unwrap();
/// let date = Date::from_datetime(time).unwrap();
/// assert_eq!(date.nanos(), 1_000_000_000);
/// assert_eq!(date.to_datetime(), Some(time));
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date {
    nanos: i64,
}

impl Date {
    /// The EBML epoch.
    pub const EPOCH: Self = Self::from_nanos(0);

    /// Creates a date from nanoseconds relative to the epoch.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self { nanos }
    }

    /// Gets the nanoseconds relative to the epoch.
    pub const fn nanos(self) -> i64 {
        self.nanos
    }

    /// Converts a [`DateTime`].
    ///
    /// Returns [`None`] if the time is out of range.
    pub fn from_datetime(time: DateTime<Utc>) -> Option<Self> {
        let nanos = time.timestamp_nanos_opt()?;
        nanos.checked_sub(EPOCH_UNIX_NANOS).map(Self::from_nanos)
    }

    /// Converts to a [`DateTime`].
    ///
    /// Returns [`None`] if the time is out of range.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        self.nanos
            .checked_add(EPOCH_UNIX_NANOS)
            .map(DateTime::from_timestamp_nanos)
    }
}

impl TryFrom<DateTime<Utc>> for Date {
    type Error = DateTime<Utc>;

    fn try_from(value: DateTime<Utc>) -> Result<Self, Self::Error> {
        Self::from_datetime(value).ok_or(value)
    }
}

impl Serialize for Date {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_newtype_struct(DATE_TOKEN, &self.nanos)
    }
}

impl<'de> Deserialize<'de> for Date {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct Visitor;

        impl<'de> de::Visitor<'de> for Visitor {
            type Value = Date;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("an ebml date")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Date::from_nanos(v))
            }

            fn visit_newtype_struct<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
            where
                D: Deserializer<'de>,
            {
                i64::deserialize(deserializer).map(Date::from_nanos)
            }
        }

        deserializer.deserialize_newtype_struct(DATE_TOKEN, Visitor)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    #[test]
    fn epoch() {
        let epoch = Utc
            .with_ymd_and_hms(2001, 1, 1, 0, 0, 0)
            .single()
            .expect("valid time");
        assert_eq!(Date::from_datetime(epoch), Some(Date::EPOCH), "epoch is zero");
        assert_eq!(Date::EPOCH.to_datetime(), Some(epoch), "zero is the epoch");
    }

    #[test]
    fn before_epoch() {
        let time = Utc
            .with_ymd_and_hms(1999, 12, 31, 23, 59, 59)
            .single()
            .expect("valid time");
        let date = Date::from_datetime(time).expect("in range");
        assert_eq!(
            date.nanos(),
            -(366 * 86_400 + 1) * 1_000_000_000,
            "a leap year and a second before the epoch"
        );
        assert_eq!(date.to_datetime(), Some(time), "round trip");
    }

    #[test]
    fn out_of_range() {
        assert_eq!(Date::from_nanos(i64::MAX).to_datetime(), None, "past i64 unix nanos");
    }
}
