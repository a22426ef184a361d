//! Generation stamps for layer and WAL files.
//!
//! A stamp orders files by recency. The timestamp is wall-clock milliseconds
//! clamped so it never moves backwards, and the sequence is global and
//! strictly increasing, so `(timestamp, sequence)` ordering agrees with write
//! order even if the system clock steps back.

use std::fmt;

use parking_lot::Mutex;

/// Recency stamp embedded in layer and WAL filenames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    /// Wall-clock milliseconds since the Unix epoch (clamped monotonic).
    pub timestamp_ms: u64,
    /// Global write sequence.
    pub sequence: u64,
}

impl Stamp {
    /// Creates a stamp.
    pub const fn new(timestamp_ms: u64, sequence: u64) -> Self {
        Self { timestamp_ms, sequence }
    }

    /// Parses the `{timestamp}-{sequence}` filename component.
    pub fn parse(s: &str) -> Option<Self> {
        let (timestamp, sequence) = s.split_once('-')?;
        Some(Self { timestamp_ms: timestamp.parse().ok()?, sequence: sequence.parse().ok()? })
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:013}-{:010}", self.timestamp_ms, self.sequence)
    }
}

/// Issues strictly increasing stamps.
pub(crate) struct StampClock {
    last: Mutex<Stamp>,
}

impl StampClock {
    /// Creates a clock whose first stamp is greater than `floor`.
    pub(crate) fn new(floor: Stamp) -> Self {
        Self { last: Mutex::new(floor) }
    }

    pub(crate) fn next(&self) -> Stamp {
        let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        let mut last = self.last.lock();
        let next = Stamp {
            timestamp_ms: now.max(last.timestamp_ms),
            sequence: last.sequence.saturating_add(1),
        };
        *last = next;
        next
    }
}
