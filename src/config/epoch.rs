//! Epoch-milliseconds timestamp codec
//!
//! Instance configuration payloads carry timestamps as integer epoch
//! milliseconds. [`Epoch`] wraps a [`DateTime<Utc>`] with that wire format.

use chrono::{DateTime, TimeZone, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A point in time serialized as epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Epoch(pub DateTime<Utc>);

impl Epoch {
    pub fn timestamp_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl From<DateTime<Utc>> for Epoch {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl From<Epoch> for DateTime<Utc> {
    fn from(value: Epoch) -> Self {
        value.0
    }
}

impl Serialize for Epoch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0.timestamp_millis())
    }
}

impl<'de> Deserialize<'de> for Epoch {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        Utc.timestamp_millis_opt(millis)
            .single()
            .map(Epoch)
            .ok_or_else(|| D::Error::custom(format!("epoch millis out of range: {millis}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_as_millis() {
        let epoch = Epoch(Utc.timestamp_millis_opt(1_700_000_000_123).unwrap());
        assert_eq!(serde_json::to_string(&epoch).unwrap(), "1700000000123");
    }

    #[test]
    fn round_trips() {
        let epoch = Epoch(Utc.timestamp_millis_opt(1_700_000_000_123).unwrap());
        let encoded = serde_json::to_string(&epoch).unwrap();
        let decoded: Epoch = serde_json::from_str(&encoded).unwrap();
        assert_eq!(epoch, decoded);
    }

    #[test]
    fn rejects_non_numeric_input() {
        assert!(serde_json::from_str::<Epoch>("\"2023-01-01\"").is_err());
    }
}
