//! Timestamp cursor used to resume extraction after a restart.
//!
//! A cursor is split in a millisecond component and the sub-millisecond rest
//! in nanoseconds, so one representation covers databases created with any of
//! the `ms`, `us` and `ns` precisions.

use crate::schemaless::Precision;
use chrono::{DateTime, NaiveDateTime, Utc};
use tdengine_connect_core::{ConnectorError, ConnectorResult, Offset};
use tracing::{debug, warn};

/// Persisted key of the millisecond component
pub const TIMESTAMP_MS_KEY: &str = "timestamp_ms";
/// Persisted key of the nanosecond component
pub const TIMESTAMP_NS_KEY: &str = "timestamp_ns";

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Position in a time-ordered table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimestampOffset {
    millis: i64,
    nanos: u32,
}

impl TimestampOffset {
    /// Build an offset, carrying nanoseconds outside `[0, 999_999]` into milliseconds
    pub fn new(millis: i64, nanos: i64) -> Self {
        let carry = nanos.div_euclid(NANOS_PER_MILLI);
        Self {
            millis: millis.saturating_add(carry),
            nanos: nanos.rem_euclid(NANOS_PER_MILLI) as u32,
        }
    }

    pub fn from_millis(millis: i64) -> Self {
        Self { millis, nanos: 0 }
    }

    pub fn millis(&self) -> i64 {
        self.millis
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    /// Interpret a raw timestamp expressed in `precision`
    pub fn from_precision(value: i64, precision: Precision) -> Self {
        let per_milli = precision.per_milli();
        let rest = value.rem_euclid(per_milli);
        Self {
            millis: value.div_euclid(per_milli),
            nanos: (rest * (NANOS_PER_MILLI / per_milli)) as u32,
        }
    }

    /// Express the offset in `precision`, truncating finer components
    pub fn to_precision(&self, precision: Precision) -> i64 {
        let per_milli = precision.per_milli();
        let rest = self.nanos as i64 / (NANOS_PER_MILLI / per_milli);
        self.millis.saturating_mul(per_milli).saturating_add(rest)
    }

    /// Rebuild from a persisted snapshot; missing components default to zero
    pub fn from_persisted(offset: &Offset) -> Self {
        Self::new(
            offset.get(TIMESTAMP_MS_KEY).unwrap_or(0),
            offset.get(TIMESTAMP_NS_KEY).unwrap_or(0),
        )
    }

    /// Snapshot for the host offset store
    pub fn to_persisted(&self, partition: &str) -> Offset {
        Offset::new(partition)
            .with_position(TIMESTAMP_MS_KEY, self.millis)
            .with_position(TIMESTAMP_NS_KEY, self.nanos as i64)
    }

    /// Parse a configured start position
    ///
    /// Accepts epoch milliseconds, RFC 3339, or `YYYY-MM-DD HH:MM:SS[.fff]` in
    /// UTC. `None` means the current time.
    pub fn parse_initial(value: Option<&str>) -> ConnectorResult<Self> {
        let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
            return Ok(Self::from_datetime(Utc::now()));
        };

        if let Ok(millis) = raw.parse::<i64>() {
            return Ok(Self::from_millis(millis));
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(Self::from_datetime(dt.with_timezone(&Utc)));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
            return Ok(Self::from_datetime(naive.and_utc()));
        }

        Err(ConnectorError::config(format!(
            "invalid initial_timestamp '{}': expected epoch milliseconds, RFC 3339 or 'YYYY-MM-DD HH:MM:SS'",
            raw
        )))
    }

    fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self::new(
            dt.timestamp_millis(),
            (dt.timestamp_subsec_nanos() % NANOS_PER_MILLI as u32) as i64,
        )
    }
}

/// Committed cursor of one source partition; never moves backwards
#[derive(Debug, Clone)]
pub struct OffsetTracker {
    partition: String,
    current: TimestampOffset,
}

impl OffsetTracker {
    pub fn new(partition: impl Into<String>, start: TimestampOffset) -> Self {
        Self {
            partition: partition.into(),
            current: start,
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn current(&self) -> TimestampOffset {
        self.current
    }

    /// Move to `newer` if it is strictly greater; returns the resulting position
    pub fn advance(&mut self, newer: TimestampOffset) -> TimestampOffset {
        if newer > self.current {
            debug!(
                partition = %self.partition,
                "Offset advanced from {:?} to {:?}", self.current, newer
            );
            self.current = newer;
        }
        self.current
    }

    /// Apply a persisted snapshot, keeping the current value if it is newer
    pub fn restore(&mut self, persisted: &Offset) -> TimestampOffset {
        let restored = TimestampOffset::from_persisted(persisted);
        if restored < self.current {
            warn!(
                partition = %self.partition,
                "Ignoring persisted offset {:?} older than current {:?}", restored, self.current
            );
        }
        self.advance(restored)
    }

    pub fn to_persisted(&self) -> Offset {
        self.current.to_persisted(&self.partition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = TimestampOffset::new(10, 999_999);
        let b = TimestampOffset::new(11, 0);
        let c = TimestampOffset::new(11, 1);
        assert!(a < b && b < c);
        assert_eq!(TimestampOffset::new(10, 5), TimestampOffset::new(10, 5));
    }

    #[test]
    fn test_nanos_are_normalized() {
        let o = TimestampOffset::new(10, 1_500_000);
        assert_eq!((o.millis(), o.nanos()), (11, 500_000));

        let o = TimestampOffset::new(10, -1);
        assert_eq!((o.millis(), o.nanos()), (9, 999_999));
    }

    #[test]
    fn test_advance_is_monotonic() {
        let start = TimestampOffset::new(100, 50);
        let mut tracker = OffsetTracker::new("meters", start);

        assert_eq!(tracker.advance(TimestampOffset::new(100, 50)), start);
        assert_eq!(tracker.advance(TimestampOffset::new(99, 999_999)), start);

        let newer = TimestampOffset::new(100, 51);
        assert_eq!(tracker.advance(newer), newer);
        assert_eq!(tracker.current(), newer);
    }

    #[test]
    fn test_persisted_round_trip() {
        for o in [
            TimestampOffset::default(),
            TimestampOffset::new(1626006833639, 123_456),
            TimestampOffset::new(-5, 999_999),
        ] {
            assert_eq!(TimestampOffset::from_persisted(&o.to_persisted("p")), o);
        }
    }

    #[test]
    fn test_missing_components_default_to_zero() {
        let only_ms = Offset::new("p").with_position(TIMESTAMP_MS_KEY, 42);
        assert_eq!(
            TimestampOffset::from_persisted(&only_ms),
            TimestampOffset::from_millis(42)
        );
        assert_eq!(
            TimestampOffset::from_persisted(&Offset::new("p")),
            TimestampOffset::default()
        );
    }

    #[test]
    fn test_restore_clamps_to_known_good() {
        let mut tracker = OffsetTracker::new("p", TimestampOffset::from_millis(500));
        let older = TimestampOffset::from_millis(400).to_persisted("p");
        assert_eq!(tracker.restore(&older), TimestampOffset::from_millis(500));

        let newer = TimestampOffset::new(600, 7).to_persisted("p");
        assert_eq!(tracker.restore(&newer), TimestampOffset::new(600, 7));
        assert_eq!(tracker.to_persisted().get(TIMESTAMP_NS_KEY), Some(7));
    }

    #[test]
    fn test_precision_conversion() {
        let ns = TimestampOffset::from_precision(1626006833639123456, Precision::Nanos);
        assert_eq!((ns.millis(), ns.nanos()), (1626006833639, 123_456));
        assert_eq!(ns.to_precision(Precision::Nanos), 1626006833639123456);
        assert_eq!(ns.to_precision(Precision::Micros), 1626006833639123);
        assert_eq!(ns.to_precision(Precision::Millis), 1626006833639);

        let us = TimestampOffset::from_precision(1626006833639123, Precision::Micros);
        assert_eq!((us.millis(), us.nanos()), (1626006833639, 123_000));
        assert_eq!(us.to_precision(Precision::Micros), 1626006833639123);

        let ms = TimestampOffset::from_precision(-1, Precision::Millis);
        assert_eq!(ms.to_precision(Precision::Millis), -1);
    }

    #[test]
    fn test_parse_initial() {
        assert_eq!(
            TimestampOffset::parse_initial(Some("1626006833639")).unwrap(),
            TimestampOffset::from_millis(1626006833639)
        );
        assert_eq!(
            TimestampOffset::parse_initial(Some("2021-07-11T12:33:53.639Z")).unwrap(),
            TimestampOffset::from_millis(1626006833639)
        );
        assert_eq!(
            TimestampOffset::parse_initial(Some("2021-07-11 12:33:53.639")).unwrap(),
            TimestampOffset::from_millis(1626006833639)
        );
        assert!(TimestampOffset::parse_initial(Some("yesterday")).is_err());

        let now = TimestampOffset::parse_initial(None).unwrap();
        assert!(now.millis() > 1626006833639);
    }
}
