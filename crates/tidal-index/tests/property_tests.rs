// Property-based tests for segment indexes
//
// Properties tested:
// 1. Flat index search returns exactly what a brute-force scan returns
// 2. Search results only contain allowed offsets, best first, at most k
// 3. Inverted index lookup matches a linear scan of the field

use std::collections::BTreeMap;

use proptest::prelude::*;
use roaring::RoaringBitmap;
use tidal_core::{
    CollectionId, DistanceMetric, FieldValue, IndexDescriptor, IndexType, PrimaryKey, RowRecord,
    SegmentData, SegmentId, Timestamp,
};
use tidal_index::{brute_force_search, FlatIndex, InvertedIndex, SegmentIndex};

const DIM: usize = 4;

fn segment(vectors: &[Vec<i8>], tags: &[i64]) -> SegmentData {
    let rows = vectors
        .iter()
        .zip(tags)
        .enumerate()
        .map(|(i, (v, tag))| RowRecord {
            // Descending keys so offset order and pk order disagree
            pk: PrimaryKey::from(1_000 - i as i64),
            timestamp: Timestamp::from_raw(1),
            fields: BTreeMap::from([
                (
                    "vec".to_string(),
                    FieldValue::FloatVector(v.iter().map(|x| f32::from(*x)).collect()),
                ),
                ("tag".to_string(), FieldValue::Int64(*tag)),
            ]),
        })
        .collect();
    SegmentData {
        segment_id: SegmentId::new(7),
        collection_id: CollectionId::new(),
        shard: 0,
        rows,
    }
}

fn metric_strategy() -> impl Strategy<Value = DistanceMetric> {
    prop_oneof![
        Just(DistanceMetric::L2),
        Just(DistanceMetric::Dot),
        Just(DistanceMetric::Cosine),
    ]
}

fn rows_strategy() -> impl Strategy<Value = (Vec<Vec<i8>>, Vec<i64>, Vec<bool>)> {
    (1usize..60).prop_flat_map(|n| {
        (
            prop::collection::vec(prop::collection::vec(1i8..5, DIM), n),
            prop::collection::vec(0i64..4, n),
            prop::collection::vec(any::<bool>(), n),
        )
    })
}

proptest! {
    #[test]
    fn prop_flat_matches_brute_force(
        (vectors, tags, mask) in rows_strategy(),
        query in prop::collection::vec(1i8..5, DIM),
        metric in metric_strategy(),
        k in 1usize..20,
    ) {
        let segment = segment(&vectors, &tags);
        let allowed: RoaringBitmap = mask
            .iter()
            .enumerate()
            .filter(|(_, keep)| **keep)
            .map(|(i, _)| i as u32)
            .collect();
        let query: Vec<f32> = query.iter().map(|x| f32::from(*x)).collect();
        let descriptor = IndexDescriptor::new("vec", "vec_flat", IndexType::Flat).with_metric(metric);

        let index = FlatIndex::build(&segment, &descriptor).unwrap();
        let indexed = index.search(&query, k, &allowed).unwrap();
        let scanned = brute_force_search(&segment, "vec", metric, &query, k, &allowed).unwrap();

        prop_assert_eq!(&indexed, &scanned);
        prop_assert_eq!(indexed.len(), k.min(allowed.len() as usize));
        prop_assert!(indexed.iter().all(|hit| allowed.contains(hit.offset)));
        for pair in indexed.windows(2) {
            let order = metric.rank(pair[0].score, pair[1].score);
            prop_assert!(order.is_le());
            if order.is_eq() {
                let pks = (&segment.rows[pair[0].offset as usize].pk, &segment.rows[pair[1].offset as usize].pk);
                prop_assert!(pks.0 < pks.1);
            }
        }
    }

    #[test]
    fn prop_inverted_lookup_matches_scan(
        (vectors, tags, _mask) in rows_strategy(),
        probe in 0i64..5,
    ) {
        let segment = segment(&vectors, &tags);
        let descriptor = IndexDescriptor::new("tag", "tag_idx", IndexType::Inverted);
        let index = InvertedIndex::build(&segment, &descriptor).unwrap();

        let expected: RoaringBitmap = tags
            .iter()
            .enumerate()
            .filter(|(_, tag)| **tag == probe)
            .map(|(i, _)| i as u32)
            .collect();
        prop_assert_eq!(index.lookup(&FieldValue::Int64(probe)), expected);
        prop_assert_eq!(index.len(), tags.len());
    }
}
