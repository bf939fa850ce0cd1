use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BuildId, CollectionId, SegmentId};
use crate::row::{PrimaryKey, RowRecord};
use crate::timestamp::Timestamp;

/// Lifecycle state for a segment.
///
/// Transitions only move forward: `Growing → Sealed → Flushing → Flushed`.
/// Any live segment may be moved to `Dropped` when its collection is dropped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SegmentState {
    Growing,
    Sealed,
    Flushing,
    Flushed,
    Dropped,
}

impl SegmentState {
    /// Returns true if `self → next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Growing, Self::Sealed)
                | (Self::Sealed, Self::Flushing)
                | (Self::Flushing, Self::Flushed)
                | (Self::Growing | Self::Sealed | Self::Flushing | Self::Flushed, Self::Dropped)
        )
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Growing => "Growing",
            Self::Sealed => "Sealed",
            Self::Flushing => "Flushing",
            Self::Flushed => "Flushed",
            Self::Dropped => "Dropped",
        }
    }
}

impl fmt::Display for SegmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build state of one index on one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexBuildState {
    InProgress { attempts: u32 },
    Finished,
    Failed { attempts: u32, reason: String },
}

/// Per-segment record of an index built (or being built) for a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentIndexState {
    pub index_name: String,
    pub build_id: BuildId,
    pub state: IndexBuildState,
}

/// Metadata for one segment, as held in the segment state store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub segment_id: SegmentId,
    pub collection_id: CollectionId,
    pub shard: u32,
    pub state: SegmentState,
    pub row_count: u64,
    pub size_bytes: u64,
    /// Smallest write timestamp of any row in the segment.
    pub min_ts: Option<Timestamp>,
    /// Largest write timestamp of any row in the segment.
    pub max_ts: Option<Timestamp>,
    /// Timestamp at which the segment was sealed.
    pub seal_ts: Option<Timestamp>,
    /// Durability timestamp, set when the segment reaches `Flushed`.
    pub flush_ts: Option<Timestamp>,
    pub persist_attempts: u32,
    /// Last persistence error; set once retries are exhausted.
    pub persist_error: Option<String>,
    /// Index build state keyed by field name.
    pub indexes: BTreeMap<String, SegmentIndexState>,
    pub created_at: DateTime<Utc>,
}

impl SegmentInfo {
    /// Creates metadata for a new, empty growing segment.
    #[must_use]
    pub fn growing(segment_id: SegmentId, collection_id: CollectionId, shard: u32) -> Self {
        Self {
            segment_id,
            collection_id,
            shard,
            state: SegmentState::Growing,
            row_count: 0,
            size_bytes: 0,
            min_ts: None,
            max_ts: None,
            seal_ts: None,
            flush_ts: None,
            persist_attempts: 0,
            persist_error: None,
            indexes: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// True if any row was written at or before `ts`.
    #[must_use]
    pub fn holds_writes_at_or_before(&self, ts: Timestamp) -> bool {
        self.row_count > 0 && self.min_ts.map_or(false, |min| min <= ts)
    }

    /// True if the named index on `field` finished building on this segment.
    #[must_use]
    pub fn has_finished_index(&self, field: &str, index_name: &str) -> bool {
        self.indexes.get(field).map_or(false, |s| {
            s.index_name == index_name && s.state == IndexBuildState::Finished
        })
    }
}

/// Immutable row set of a sealed segment, handed to durable storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentData {
    pub segment_id: SegmentId,
    pub collection_id: CollectionId,
    pub shard: u32,
    pub rows: Vec<RowRecord>,
}

impl SegmentData {
    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if the segment holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Delete marker: hides versions of `pk` written before `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tombstone {
    pub pk: PrimaryKey,
    pub timestamp: Timestamp,
}

/// Result of the most recent flush call on a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushRecord {
    pub collection_id: CollectionId,
    pub flush_ts: Timestamp,
    pub segment_ids: Vec<SegmentId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_only_move_forward() {
        use SegmentState::*;
        assert!(Growing.can_transition_to(Sealed));
        assert!(Sealed.can_transition_to(Flushing));
        assert!(Flushing.can_transition_to(Flushed));
        assert!(Flushed.can_transition_to(Dropped));

        assert!(!Growing.can_transition_to(Flushed));
        assert!(!Flushed.can_transition_to(Growing));
        assert!(!Sealed.can_transition_to(Growing));
        assert!(!Dropped.can_transition_to(Dropped));
        assert!(!Flushing.can_transition_to(Sealed));
    }

    #[test]
    fn test_holds_writes_at_or_before() {
        let mut info = SegmentInfo::growing(SegmentId::new(1), CollectionId::new(), 0);
        assert!(!info.holds_writes_at_or_before(Timestamp::MAX));
        info.row_count = 3;
        info.min_ts = Some(Timestamp::from_raw(10));
        assert!(info.holds_writes_at_or_before(Timestamp::from_raw(10)));
        assert!(!info.holds_writes_at_or_before(Timestamp::from_raw(9)));
    }
}
