//! End-to-end lifecycle tests: create, insert, delete, flush, index, load,
//! search, release and drop.

mod common;

use std::collections::HashSet;

use common::*;
use tidal_core::{
    CollectionOptions, ConsistencyLevel, CoreError, DistanceMetric, IndexDescriptor, IndexType,
    SegmentState,
};
use tidal_service::{LifecycleService, QueryRequest, SearchRequest};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_hello_workflow() {
    let service = LifecycleService::new(fast_config());
    create(&service, "hello").await;

    for start in (0..100_000i64).step_by(10_000) {
        let result = service
            .insert("hello", rows(start..start + 10_000))
            .await
            .unwrap();
        assert_eq!(result.insert_count, 10_000);
    }
    let deleted = service.delete("hello", "id in [1, 2]").await.unwrap();
    assert_eq!(deleted.delete_count, 2);

    flush_and_wait(&service, "hello").await;
    let segments = service.show_segments("hello").await.unwrap();
    assert_eq!(segments.len(), 2, "65536-row threshold splits the data");
    assert!(segments.iter().all(|s| s.state == SegmentState::Flushed));
    assert_eq!(segments.iter().map(|s| s.row_count).sum::<u64>(), 100_000);

    service.build_index("hello", flat_index()).await.unwrap();
    service.wait_for_index("hello", "vec", WAIT).await.unwrap();
    service.load("hello").await.unwrap();

    let count = service
        .count("hello", "", Some(ConsistencyLevel::Strong))
        .await
        .unwrap();
    assert_eq!(count, 99_998);

    let (nq, top_k) = (3, 10);
    let request = SearchRequest::new(
        "hello",
        "vec",
        (0..nq).map(|i| vector(i * 1_000 + 5)).collect(),
        top_k,
    )
    .with_output_fields(["category"])
    .with_consistency(ConsistencyLevel::Strong);
    let response = service.search(&request).await.unwrap();

    assert_eq!(response.results.len(), nq as usize);
    assert_eq!(response.indexed_segments.len(), 2);
    assert!(response.brute_force_segments.is_empty());
    for hits in &response.results {
        assert_eq!(hits.len(), top_k);
        assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));
        let unique: HashSet<_> = hits.iter().map(|h| h.pk.clone()).collect();
        assert_eq!(unique.len(), hits.len());
        assert!(hits.iter().all(|h| h.fields.contains_key("category")));
    }
}

#[tokio::test]
async fn test_flush_without_new_writes() {
    let service = LifecycleService::new(fast_config());
    create(&service, "books").await;

    let empty = service.flush("books").await.unwrap();
    assert!(empty.segment_ids.is_empty());

    service.insert("books", rows(0..50)).await.unwrap();
    let first = flush_and_wait(&service, "books").await;
    assert_eq!(first.segment_ids.len(), 1);

    let second = service.flush("books").await.unwrap();
    assert!(second.flush_ts >= first.flush_ts);
    assert!(second.segment_ids.is_empty());

    let record = service.last_flush("books").await.unwrap().unwrap();
    assert_eq!(record.flush_ts, second.flush_ts);
    assert!(service.is_flush_complete(&first.segment_ids).unwrap());
}

#[tokio::test]
async fn test_load_release_load_keeps_segment_set() {
    let service = LifecycleService::new(fast_config());
    create(&service, "books").await;
    service.insert("books", rows(0..20)).await.unwrap();
    flush_and_wait(&service, "books").await;

    let first = service.load("books").await.unwrap();
    let again = service.load("books").await.unwrap();
    assert_eq!(again.replica_id, first.replica_id, "second load is a no-op");

    service.release("books").await.unwrap();
    service.release("books").await.unwrap();
    assert!(!service.is_loaded("books").await.unwrap());
    let err = service.count("books", "", None).await.unwrap_err();
    assert!(matches!(err, CoreError::CollectionNotLoaded { .. }));

    let reloaded = service.load("books").await.unwrap();
    assert_eq!(reloaded.segment_ids, first.segment_ids);
    assert_ne!(reloaded.replica_id, first.replica_id);
}

#[tokio::test]
async fn test_drop_requires_release() {
    let service = LifecycleService::new(fast_config());
    create(&service, "books").await;
    service.insert("books", rows(0..10)).await.unwrap();
    let flush = flush_and_wait(&service, "books").await;
    service.load("books").await.unwrap();

    let err = service.drop_collection("books").await.unwrap_err();
    assert!(matches!(err, CoreError::CollectionInUse { .. }));

    service.release("books").await.unwrap();
    service.drop_collection("books").await.unwrap();

    let err = service.describe_collection("books").await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
    let err = service.insert("books", rows(0..1)).await.unwrap_err();
    assert!(matches!(err, CoreError::NotFound { .. }));
    assert!(service.flush_state(&flush.segment_ids).is_err());
    assert!(service.list_collections().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_segments_flushed_after_load_are_incorporated() {
    let service = LifecycleService::new(fast_config());
    create(&service, "books").await;
    service.insert("books", rows(0..10)).await.unwrap();
    flush_and_wait(&service, "books").await;
    service.load("books").await.unwrap();

    service.insert("books", rows(10..25)).await.unwrap();
    let flush = flush_and_wait(&service, "books").await;
    service
        .wait_for_load("books", &flush.segment_ids, WAIT)
        .await
        .unwrap();

    assert_eq!(service.loaded_segments("books").await.unwrap().len(), 2);
    let count = service
        .count("books", "", Some(ConsistencyLevel::Strong))
        .await
        .unwrap();
    assert_eq!(count, 25);
}

#[tokio::test]
async fn test_query_projects_filters_and_limits() {
    let service = LifecycleService::new(fast_config());
    create(&service, "books").await;
    service.insert("books", rows(0..100)).await.unwrap();
    flush_and_wait(&service, "books").await;
    service.load("books").await.unwrap();

    let request = QueryRequest::new("books", "category == 3 and id > 20")
        .with_output_fields(["category"])
        .with_limit(5)
        .with_consistency(ConsistencyLevel::Strong);
    let response = service.query(&request).await.unwrap();
    let rows = response.rows();

    assert_eq!(rows.len(), 5);
    let ids: Vec<_> = rows.iter().map(|r| r.pk.to_string()).collect();
    assert_eq!(ids, ["23", "33", "43", "53", "63"]);
    for row in rows {
        assert!(row.get("id").is_some());
        assert!(row.get("category").is_some());
        assert!(row.get("vec").is_none());
    }

    let count = service
        .count("books", "category in [1, 2] or id == 0", Some(ConsistencyLevel::Strong))
        .await
        .unwrap();
    assert_eq!(count, 21);
}

#[tokio::test]
async fn test_upsert_replaces_previous_version() {
    let service = LifecycleService::new(fast_config());
    create(&service, "books").await;
    service.insert("books", rows(0..5)).await.unwrap();
    flush_and_wait(&service, "books").await;
    service.load("books").await.unwrap();

    let replacement = common::row(3).with("category", 42i64);
    service.upsert("books", vec![replacement]).await.unwrap();
    flush_and_wait(&service, "books").await;

    let request = QueryRequest::new("books", "id == 3").with_consistency(ConsistencyLevel::Strong);
    let response = service.query(&request).await.unwrap();
    assert_eq!(response.rows().len(), 1);
    assert_eq!(
        response.rows()[0].get("category"),
        Some(&tidal_core::FieldValue::Int64(42))
    );
    let count = service
        .count("books", "", Some(ConsistencyLevel::Strong))
        .await
        .unwrap();
    assert_eq!(count, 5);
}

#[tokio::test]
async fn test_superseded_index_name_is_not_found() {
    let service = LifecycleService::new(fast_config());
    create(&service, "books").await;
    service.insert("books", rows(0..40)).await.unwrap();
    flush_and_wait(&service, "books").await;

    let first = service.build_index("books", flat_index()).await.unwrap();
    let same = service.build_index("books", flat_index()).await.unwrap();
    assert_eq!(first, same, "identical descriptor keeps the build");

    let replacement = IndexDescriptor::new("vec", "vec_ivf", IndexType::IvfFlat)
        .with_metric(DistanceMetric::L2)
        .with_param("nlist", "16");
    let second = service.build_index("books", replacement).await.unwrap();
    assert_ne!(first, second);
    service.wait_for_index("books", "vec", WAIT).await.unwrap();

    let progress = service.describe_index("books", "vec").await.unwrap();
    assert_eq!(progress.record.descriptor.index_name, "vec_ivf");
    assert_eq!(progress.indexed_rows, 40);
    assert!(progress.complete);

    service.load("books").await.unwrap();
    let stale = SearchRequest::new("books", "vec", vec![vector(1)], 3)
        .with_index_name("vec_flat")
        .with_consistency(ConsistencyLevel::Strong);
    let err = service.search(&stale).await.unwrap_err();
    assert!(matches!(err, CoreError::IndexNotFound { .. }));

    let current = SearchRequest::new("books", "vec", vec![vector(1)], 3)
        .with_index_name("vec_ivf")
        .with_consistency(ConsistencyLevel::Strong);
    let response = service.search(&current).await.unwrap();
    assert_eq!(response.results[0].len(), 3);

    let err = service.drop_index("books", "vec").await.unwrap_err();
    assert!(matches!(err, CoreError::CollectionInUse { .. }));
    service.release("books").await.unwrap();
    service.drop_index("books", "vec").await.unwrap();
    let err = service.describe_index("books", "vec").await.unwrap_err();
    assert!(matches!(err, CoreError::IndexNotFound { .. }));
}

#[tokio::test]
async fn test_index_required_policy() {
    let service = LifecycleService::new(fast_config());
    let options = CollectionOptions {
        index_required: true,
        ..CollectionOptions::default()
    };
    service
        .create_collection_with_options("strict", schema(), options)
        .await
        .unwrap();
    service.insert("strict", rows(0..30)).await.unwrap();
    flush_and_wait(&service, "strict").await;
    service.load("strict").await.unwrap();

    let request = SearchRequest::new("strict", "vec", vec![vector(2)], 5)
        .with_consistency(ConsistencyLevel::Strong);
    let err = service.search(&request).await.unwrap_err();
    assert!(matches!(err, CoreError::IndexNotFound { .. }));

    service.build_index("strict", flat_index()).await.unwrap();
    let response = service.search(&request).await.unwrap();
    assert!(response.brute_force_segments.is_empty());
    assert_eq!(response.indexed_segments.len(), 1);
    assert_eq!(response.results[0].len(), 5);
}

#[tokio::test]
async fn test_unindexed_search_reports_brute_force() {
    let service = LifecycleService::new(fast_config());
    create(&service, "books").await;
    service.insert("books", rows(0..30)).await.unwrap();
    flush_and_wait(&service, "books").await;
    service.load("books").await.unwrap();

    let request = SearchRequest::new("books", "vec", vec![vector(7)], 4)
        .with_filter("category != 7")
        .with_consistency(ConsistencyLevel::Strong);
    let response = service.search(&request).await.unwrap();
    assert!(response.indexed_segments.is_empty());
    assert_eq!(response.brute_force_segments.len(), 1);
    assert_eq!(response.results[0].len(), 4);
    assert!(response.results[0]
        .iter()
        .all(|hit| hit.pk != tidal_core::PrimaryKey::from(7)));

    let segments = service.show_segments("books").await.unwrap();
    assert!(segments.iter().all(|s| s.state == SegmentState::Flushed));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_inserts_across_seal_boundaries() {
    const WRITERS: i64 = 8;
    const PER_WRITER: i64 = 25;
    let mut config = fast_config();
    config.segment.max_rows = 7;
    let service = std::sync::Arc::new(LifecycleService::new(config));
    create(&service, "books").await;

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let service = std::sync::Arc::clone(&service);
            tokio::spawn(async move {
                let base = writer * 1_000;
                for start in (0..PER_WRITER).step_by(3) {
                    let end = (start + 3).min(PER_WRITER);
                    service
                        .insert("books", rows(base + start..base + end))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.await.unwrap();
    }

    flush_and_wait(&service, "books").await;
    let segments = service.show_segments("books").await.unwrap();
    assert!(segments.len() > 1);
    assert!(segments.iter().all(|s| s.row_count <= 7), "{segments:?}");
    assert_eq!(
        segments.iter().map(|s| s.row_count).sum::<u64>(),
        (WRITERS * PER_WRITER) as u64,
        "every row stored exactly once"
    );

    service.load("books").await.unwrap();
    let count = service
        .count("books", "", Some(ConsistencyLevel::Strong))
        .await
        .unwrap();
    assert_eq!(count, (WRITERS * PER_WRITER) as u64);

    let request = QueryRequest::new("books", "id >= 0").with_consistency(ConsistencyLevel::Strong);
    let response = service.query(&request).await.unwrap();
    let pks: HashSet<_> = response.rows().iter().map(|r| r.pk.to_string()).collect();
    assert_eq!(pks.len(), response.rows().len());
    assert_eq!(pks.len(), (WRITERS * PER_WRITER) as usize);
}

#[tokio::test]
async fn test_range_search_keeps_hits_inside_the_window() {
    let service = LifecycleService::new(fast_config());
    create(&service, "books").await;
    service.insert("books", rows(0..60)).await.unwrap();
    flush_and_wait(&service, "books").await;
    service.build_index("books", flat_index()).await.unwrap();
    service.wait_for_index("books", "vec", WAIT).await.unwrap();
    service.load("books").await.unwrap();

    let query = vector(3);
    let (radius, range_filter) = (0.5f32, 0.04f32);
    let mut expected: Vec<String> = (0..60i64)
        .filter(|id| {
            let d = DistanceMetric::L2.compute(&query, &vector(*id));
            d < radius && d >= range_filter
        })
        .map(|id| id.to_string())
        .collect();
    expected.sort();
    assert_eq!(expected, ["25", "50", "53"]);

    let request = SearchRequest::new("books", "vec", vec![query.clone()], 60)
        .with_range(radius, Some(range_filter))
        .with_consistency(ConsistencyLevel::Strong);
    let response = service.search(&request).await.unwrap();
    let hits = &response.results[0];
    assert!(hits
        .iter()
        .all(|h| h.score < radius && h.score >= range_filter));
    let mut found: Vec<String> = hits.iter().map(|h| h.pk.to_string()).collect();
    found.sort();
    assert_eq!(found, expected);
    assert!(!found.contains(&"3".to_string()), "exact match is closer than range_filter");

    // top_k still caps a range search
    let capped = SearchRequest {
        top_k: 1,
        ..request.clone()
    };
    assert_eq!(service.search(&capped).await.unwrap().results[0].len(), 1);

    let inverted = SearchRequest::new("books", "vec", vec![query], 5).with_range(0.04, Some(0.5));
    let err = service.search(&inverted).await.unwrap_err();
    assert!(matches!(err, CoreError::SchemaViolation { .. }));
}
