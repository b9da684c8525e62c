//! Half-open timestamp windows.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Rejected window bounds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    /// `start` is not strictly before `end`.
    #[error("window start {start} must be before end {end}")]
    Inverted {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Timestamp range `[start, end)` selecting rows for one run.
///
/// A row stamped exactly at `end` belongs to the next window, so windows
/// that advance monotonically never archive a row twice or skip one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArchiveWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ArchiveWindow {
    /// Build a window, rejecting empty or inverted bounds.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::Inverted`] unless `start < end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, WindowError> {
        if start >= end {
            return Err(WindowError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// Inclusive lower bound.
    #[must_use]
    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive upper bound.
    #[must_use]
    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Whether `ts` falls inside `[start, end)`.
    #[must_use]
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }

    /// The window that picks up where this one stops.
    ///
    /// # Errors
    ///
    /// Returns [`WindowError::Inverted`] if `end` is not after `self.end()`.
    pub fn following(&self, end: DateTime<Utc>) -> Result<Self, WindowError> {
        Self::new(self.end, end)
    }
}

impl fmt::Display for ArchiveWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.to_rfc3339_opts(SecondsFormat::Secs, true),
            self.end.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn ts(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn rejects_equal_bounds() {
        let t = ts(2023, 1, 1);
        assert!(matches!(
            ArchiveWindow::new(t, t),
            Err(WindowError::Inverted { .. })
        ));
    }

    #[test]
    fn rejects_inverted_bounds() {
        assert!(ArchiveWindow::new(ts(2023, 2, 1), ts(2023, 1, 1)).is_err());
    }

    #[test]
    fn end_is_exclusive() {
        let w = ArchiveWindow::new(ts(2023, 1, 1), ts(2023, 2, 1)).unwrap();
        assert!(w.contains(ts(2023, 1, 1)));
        assert!(w.contains(ts(2023, 1, 31)));
        assert!(!w.contains(ts(2023, 2, 1)));
    }

    #[test]
    fn display_is_half_open() {
        let w = ArchiveWindow::new(ts(2023, 1, 1), ts(2023, 2, 1)).unwrap();
        assert_eq!(w.to_string(), "[2023-01-01T00:00:00Z, 2023-02-01T00:00:00Z)");
    }

    proptest! {
        #[test]
        fn adjacent_windows_never_share_a_row(
            a in 0i64..1_000_000,
            b in 1i64..1_000_000,
            c in 1i64..1_000_000,
            offset_secs in 0i64..3_000_000,
        ) {
            let base = ts(2020, 1, 1);
            let first = ArchiveWindow::new(
                base + Duration::seconds(a),
                base + Duration::seconds(a + b),
            ).unwrap();
            let second = first.following(first.end() + Duration::seconds(c)).unwrap();
            let p = base + Duration::seconds(offset_secs);
            prop_assert!(!(first.contains(p) && second.contains(p)));
            if p >= first.start() && p < second.end() {
                prop_assert!(first.contains(p) || second.contains(p));
            }
        }
    }
}
