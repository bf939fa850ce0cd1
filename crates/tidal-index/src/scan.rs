//! Brute-force scan over a segment's rows, used when a segment has no
//! finished index and the collection does not require one.

use roaring::RoaringBitmap;

use tidal_core::{CoreError, CoreResult, DistanceMetric, SegmentData};

use crate::types::ScoredOffset;

/// Returns the best `k` rows among `allowed`, best first, ties broken by
/// lowest primary key. Rows whose field is missing or null are skipped.
pub fn brute_force_search(
    segment: &SegmentData,
    field: &str,
    metric: DistanceMetric,
    query: &[f32],
    k: usize,
    allowed: &RoaringBitmap,
) -> CoreResult<Vec<ScoredOffset>> {
    let mut results = Vec::with_capacity(allowed.len() as usize);
    for offset in allowed.iter() {
        let Some(row) = segment.rows.get(offset as usize) else {
            continue;
        };
        let Some(vector) = row.get(field).and_then(|v| v.as_vector()) else {
            continue;
        };
        if vector.len() != query.len() {
            return Err(CoreError::schema_violation(
                field,
                format!(
                    "query dimension mismatch: expected {}, got {}",
                    vector.len(),
                    query.len()
                ),
            ));
        }
        results.push(ScoredOffset {
            offset,
            score: metric.compute(query, vector),
        });
    }

    results.sort_by(|a, b| {
        metric.rank(a.score, b.score).then_with(|| {
            segment.rows[a.offset as usize]
                .pk
                .cmp(&segment.rows[b.offset as usize].pk)
        })
    });
    results.truncate(k);
    Ok(results)
}
