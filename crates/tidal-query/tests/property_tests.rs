// Property-based tests for the read path
//
// Properties tested:
// 1. Top-K merge: sorted best first, unique primary keys, at most k hits
// 2. Top-K merge: same result however hits are split across segments
// 3. Visibility: every key is visible at most once
// 4. Visibility: a key is visible iff its newest version at read_ts survives
//    the tombstones in (write_ts, read_ts]

use std::collections::{BTreeMap, HashMap};

use proptest::prelude::*;
use tidal_core::{DistanceMetric, PrimaryKey, RowRecord, SearchHit, SegmentId, Timestamp, Tombstone};
use tidal_query::{merge_top_k, visible_offsets, SegmentView, TombstoneSet};

fn hits_strategy() -> impl Strategy<Value = Vec<(i64, i32)>> {
    prop::collection::vec((0i64..50, 0i32..20), 0..80)
}

fn to_hits(raw: &[(i64, i32)], segment: u64) -> Vec<SearchHit> {
    raw.iter()
        .map(|(pk, score)| SearchHit::new(PrimaryKey::from(*pk), *score as f32, SegmentId::new(segment)))
        .collect()
}

proptest! {
    #[test]
    fn prop_merge_sorted_unique_bounded(
        raw in hits_strategy(),
        k in 0usize..30,
        higher in any::<bool>(),
    ) {
        let metric = if higher { DistanceMetric::Dot } else { DistanceMetric::L2 };
        let merged = merge_top_k(metric, vec![to_hits(&raw, 1)], k);

        prop_assert!(merged.len() <= k);
        let mut seen = std::collections::HashSet::new();
        for hit in &merged {
            prop_assert!(seen.insert(hit.pk.clone()), "duplicate pk {:?}", hit.pk);
        }
        for pair in merged.windows(2) {
            prop_assert_ne!(metric.rank_hits(&pair[0], &pair[1]), std::cmp::Ordering::Greater);
        }
    }

    #[test]
    fn prop_merge_independent_of_partitioning(
        raw in hits_strategy(),
        split in 0usize..80,
        k in 1usize..30,
    ) {
        let split = split.min(raw.len());
        let whole = merge_top_k(DistanceMetric::L2, vec![to_hits(&raw, 1)], k);
        let parts = merge_top_k(
            DistanceMetric::L2,
            vec![to_hits(&raw[..split], 1), to_hits(&raw[split..], 1)],
            k,
        );
        let whole: Vec<_> = whole.iter().map(|h| (h.pk.clone(), h.score)).collect();
        let parts: Vec<_> = parts.iter().map(|h| (h.pk.clone(), h.score)).collect();
        prop_assert_eq!(whole, parts);
    }

    #[test]
    fn prop_visibility_matches_model(
        writes in prop::collection::vec((0i64..10, 1u64..100, 0usize..3), 0..60),
        deletes in prop::collection::vec((0i64..10, 1u64..100), 0..20),
        read_ts in 0u64..120,
    ) {
        let mut segments: Vec<Vec<RowRecord>> = vec![Vec::new(); 3];
        // Versions of one key never share a timestamp
        let mut used = std::collections::HashSet::new();
        for (pk, ts, seg) in &writes {
            if used.insert((*pk, *ts)) {
                segments[*seg].push(RowRecord {
                    pk: PrimaryKey::from(*pk),
                    timestamp: Timestamp::from_raw(*ts),
                    fields: BTreeMap::new(),
                });
            }
        }
        let mut tombstones = TombstoneSet::new();
        for (pk, ts) in &deletes {
            tombstones.insert(Tombstone {
                pk: PrimaryKey::from(*pk),
                timestamp: Timestamp::from_raw(*ts),
            });
        }

        let views: Vec<_> = segments
            .iter()
            .enumerate()
            .map(|(i, rows)| SegmentView { segment_id: SegmentId::new(i as u64 + 1), rows })
            .collect();
        let visible = visible_offsets(&views, &tombstones, Timestamp::from_raw(read_ts));

        let mut observed: HashMap<i64, u64> = HashMap::new();
        for (seg, bitmap) in visible.iter().enumerate() {
            for offset in bitmap {
                let row = &segments[seg][offset as usize];
                let PrimaryKey::Int64(pk) = row.pk else { unreachable!() };
                prop_assert!(observed.insert(pk, row.timestamp.as_u64()).is_none(), "pk {} visible twice", pk);
            }
        }

        // Reference model
        let mut expected: HashMap<i64, u64> = HashMap::new();
        for (pk, ts, _) in &writes {
            if *ts <= read_ts {
                let entry = expected.entry(*pk).or_insert(*ts);
                *entry = (*entry).max(*ts);
            }
        }
        expected.retain(|pk, w| {
            !deletes.iter().any(|(dpk, dts)| dpk == pk && *dts > *w && *dts <= read_ts)
        });
        prop_assert_eq!(observed, expected);
    }
}
