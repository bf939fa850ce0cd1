//! MVCC visibility: which row versions a read at `read_ts` observes.
//!
//! A version written at `w` is visible at `T` when `w <= T` and no tombstone
//! for its key has a timestamp in `(w, T]`. When several versions of a key are
//! visible, the newest one wins.

use std::collections::HashMap;

use roaring::RoaringBitmap;

use tidal_core::{PrimaryKey, RowRecord, SegmentId, Timestamp, Tombstone};

/// Tombstones of one collection, keyed by primary key.
#[derive(Debug, Default, Clone)]
pub struct TombstoneSet {
    by_key: HashMap<PrimaryKey, Vec<Timestamp>>,
    len: usize,
}

impl TombstoneSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a tombstone. Timestamps per key are kept sorted.
    pub fn insert(&mut self, tombstone: Tombstone) {
        let stamps = self.by_key.entry(tombstone.pk).or_default();
        match stamps.binary_search(&tombstone.timestamp) {
            Ok(_) => {}
            Err(pos) => {
                stamps.insert(pos, tombstone.timestamp);
                self.len += 1;
            }
        }
    }

    /// Total number of tombstones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True if a version of `pk` written at `write_ts` is hidden at `read_ts`.
    #[must_use]
    pub fn hides(&self, pk: &PrimaryKey, write_ts: Timestamp, read_ts: Timestamp) -> bool {
        if write_ts >= read_ts {
            return false;
        }
        self.by_key.get(pk).map_or(false, |stamps| {
            // First tombstone strictly after the write
            let idx = stamps.partition_point(|ts| *ts <= write_ts);
            stamps.get(idx).map_or(false, |ts| *ts <= read_ts)
        })
    }
}

/// One segment's rows as seen by a read.
#[derive(Debug, Clone, Copy)]
pub struct SegmentView<'a> {
    pub segment_id: SegmentId,
    pub rows: &'a [RowRecord],
}

/// Computes, per segment, the offsets of rows visible at `read_ts`.
///
/// Returns one bitmap per input segment, in input order. Each visible key
/// appears in exactly one bitmap: the one holding its newest visible version.
#[must_use]
pub fn visible_offsets(
    segments: &[SegmentView<'_>],
    tombstones: &TombstoneSet,
    read_ts: Timestamp,
) -> Vec<RoaringBitmap> {
    // pk -> (write ts, segment index, offset) of the newest candidate
    let mut newest: HashMap<&PrimaryKey, (Timestamp, usize, u32)> = HashMap::new();

    for (seg_idx, segment) in segments.iter().enumerate() {
        for (offset, row) in segment.rows.iter().enumerate() {
            if row.timestamp > read_ts {
                continue;
            }
            let candidate = (row.timestamp, seg_idx, offset as u32);
            newest
                .entry(&row.pk)
                .and_modify(|best| {
                    if candidate.0 >= best.0 {
                        *best = candidate;
                    }
                })
                .or_insert(candidate);
        }
    }

    let mut bitmaps = vec![RoaringBitmap::new(); segments.len()];
    for (pk, (write_ts, seg_idx, offset)) in newest {
        if !tombstones.hides(pk, write_ts, read_ts) {
            bitmaps[seg_idx].insert(offset);
        }
    }
    bitmaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn ts(raw: u64) -> Timestamp {
        Timestamp::from_raw(raw)
    }

    fn row(pk: i64, at: u64) -> RowRecord {
        RowRecord {
            pk: PrimaryKey::from(pk),
            timestamp: ts(at),
            fields: BTreeMap::new(),
        }
    }

    fn tombstone(pk: i64, at: u64) -> Tombstone {
        Tombstone {
            pk: PrimaryKey::from(pk),
            timestamp: ts(at),
        }
    }

    #[test]
    fn test_delete_hides_only_older_versions() {
        let mut set = TombstoneSet::new();
        set.insert(tombstone(1, 20));

        let pk = PrimaryKey::from(1);
        assert!(!set.hides(&pk, ts(10), ts(15)), "delete not yet visible");
        assert!(set.hides(&pk, ts(10), ts(20)));
        assert!(set.hides(&pk, ts(10), ts(99)));
        // Same-timestamp write (upsert) survives its own delete
        assert!(!set.hides(&pk, ts(20), ts(99)));
        assert!(!set.hides(&pk, ts(25), ts(99)));
        assert!(!set.hides(&PrimaryKey::from(2), ts(10), ts(99)));
    }

    #[test]
    fn test_duplicate_tombstones_counted_once() {
        let mut set = TombstoneSet::new();
        set.insert(tombstone(1, 20));
        set.insert(tombstone(1, 20));
        set.insert(tombstone(1, 30));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_newest_visible_version_wins() {
        let seg_a = vec![row(1, 10), row(2, 10)];
        let seg_b = vec![row(1, 30)];
        let views = [
            SegmentView {
                segment_id: SegmentId::new(1),
                rows: &seg_a,
            },
            SegmentView {
                segment_id: SegmentId::new(2),
                rows: &seg_b,
            },
        ];
        let empty = TombstoneSet::new();

        let at_20 = visible_offsets(&views, &empty, ts(20));
        assert_eq!(at_20[0].iter().collect::<Vec<_>>(), vec![0, 1]);
        assert!(at_20[1].is_empty());

        let at_40 = visible_offsets(&views, &empty, ts(40));
        assert_eq!(at_40[0].iter().collect::<Vec<_>>(), vec![1]);
        assert_eq!(at_40[1].iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_upsert_hides_old_and_shows_new() {
        let seg_a = vec![row(7, 10)];
        let seg_b = vec![row(7, 20)];
        let views = [
            SegmentView {
                segment_id: SegmentId::new(1),
                rows: &seg_a,
            },
            SegmentView {
                segment_id: SegmentId::new(2),
                rows: &seg_b,
            },
        ];
        let mut set = TombstoneSet::new();
        set.insert(tombstone(7, 20));

        let visible = visible_offsets(&views, &set, ts(25));
        assert!(visible[0].is_empty());
        assert_eq!(visible[1].len(), 1);
    }

    #[test]
    fn test_deleted_key_is_invisible() {
        let seg = vec![row(1, 10), row(2, 10)];
        let views = [SegmentView {
            segment_id: SegmentId::new(1),
            rows: &seg,
        }];
        let mut set = TombstoneSet::new();
        set.insert(tombstone(1, 15));

        assert_eq!(visible_offsets(&views, &set, ts(12))[0].len(), 2);
        assert_eq!(
            visible_offsets(&views, &set, ts(15))[0].iter().collect::<Vec<_>>(),
            vec![1]
        );
    }
}
