//! Read consistency levels.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::timestamp::Timestamp;

/// Policy deciding which writes a read must observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyLevel {
    /// Observe every write committed before the read started.
    Strong,
    /// Observe every write older than the staleness window.
    BoundedStaleness(Duration),
    /// Observe the caller's own writes up to the given timestamp.
    Session(Timestamp),
    /// Best effort; never waits.
    Eventual,
    /// Read as of a fixed timestamp (time travel).
    Customized(Timestamp),
}

impl Default for ConsistencyLevel {
    fn default() -> Self {
        Self::BoundedStaleness(Duration::from_secs(5))
    }
}

impl ConsistencyLevel {
    /// Builds the read view for this level.
    ///
    /// `latest` is a freshly allocated timestamp; for `Strong` reads it must come
    /// from a read barrier so every batch stamped before it is already buffered.
    #[must_use]
    pub fn read_view(&self, latest: Timestamp) -> ReadView {
        match *self {
            Self::Strong => ReadView {
                guarantee_ts: latest,
                read_ts: latest,
            },
            Self::BoundedStaleness(window) => ReadView {
                guarantee_ts: latest
                    .saturating_sub_ms(u64::try_from(window.as_millis()).unwrap_or(u64::MAX)),
                read_ts: latest,
            },
            Self::Session(ts) => ReadView {
                guarantee_ts: ts.min(latest),
                read_ts: latest,
            },
            Self::Eventual => ReadView {
                guarantee_ts: Timestamp::ZERO,
                read_ts: latest,
            },
            Self::Customized(ts) => ReadView {
                guarantee_ts: ts,
                read_ts: ts,
            },
        }
    }

    /// Short name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Strong => "strong",
            Self::BoundedStaleness(_) => "bounded",
            Self::Session(_) => "session",
            Self::Eventual => "eventual",
            Self::Customized(_) => "customized",
        }
    }
}

/// Timestamps governing one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadView {
    /// Every segment holding writes at or before this must be flushed and loaded.
    pub guarantee_ts: Timestamp,
    /// MVCC visibility bound: rows and tombstones after this are ignored.
    pub read_ts: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_views() {
        let latest = Timestamp::compose(10_000, 3);

        let strong = ConsistencyLevel::Strong.read_view(latest);
        assert_eq!(strong.guarantee_ts, latest);
        assert_eq!(strong.read_ts, latest);

        let bounded =
            ConsistencyLevel::BoundedStaleness(Duration::from_millis(500)).read_view(latest);
        assert_eq!(bounded.guarantee_ts, Timestamp::compose(9_500, 0));
        assert_eq!(bounded.read_ts, latest);

        let eventual = ConsistencyLevel::Eventual.read_view(latest);
        assert_eq!(eventual.guarantee_ts, Timestamp::ZERO);

        let session = ConsistencyLevel::Session(Timestamp::compose(9_000, 1)).read_view(latest);
        assert_eq!(session.guarantee_ts, Timestamp::compose(9_000, 1));

        let pinned = Timestamp::compose(5_000, 0);
        let travel = ConsistencyLevel::Customized(pinned).read_view(latest);
        assert_eq!(travel.read_ts, pinned);
        assert_eq!(travel.guarantee_ts, pinned);
    }
}
