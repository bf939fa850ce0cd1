//! Cross-segment result merging.

use std::collections::HashSet;

use tidal_core::{DistanceMetric, PrimaryKey, RowRecord, SearchHit};

/// Merges per-segment hit lists into the global top `k`.
///
/// Hits are ordered best first for `metric`, ties broken by lowest primary
/// key; each primary key appears at most once (its best hit).
#[must_use]
pub fn merge_top_k(metric: DistanceMetric, per_segment: Vec<Vec<SearchHit>>, k: usize) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = per_segment.into_iter().flatten().collect();
    hits.sort_by(|a, b| metric.rank_hits(a, b));

    let mut seen = HashSet::with_capacity(hits.len().min(k));
    let mut merged = Vec::with_capacity(k.min(hits.len()));
    for hit in hits {
        if merged.len() == k {
            break;
        }
        if seen.insert(hit.pk.clone()) {
            merged.push(hit);
        }
    }
    merged
}

/// Concatenates query rows from several segments, keeping one row per
/// primary key, ordered by primary key and cut to `limit`.
#[must_use]
pub fn merge_rows(per_segment: Vec<Vec<RowRecord>>, limit: Option<usize>) -> Vec<RowRecord> {
    let mut seen: HashSet<PrimaryKey> = HashSet::new();
    let mut rows: Vec<RowRecord> = per_segment
        .into_iter()
        .flatten()
        .filter(|row| seen.insert(row.pk.clone()))
        .collect();
    rows.sort_by(|a, b| a.pk.cmp(&b.pk));
    if let Some(limit) = limit {
        rows.truncate(limit);
    }
    rows
}
