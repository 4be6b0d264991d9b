//! Block cache integration tests.
//!
//! Tests verify:
//! - Repeat requests are served from memory
//! - Concurrent misses for the same block share one upstream computation
//! - Failed computations leave nothing behind
//! - Dirty notices drop only the overlapping blocks
//! - Cached values always match the upstream data

use std::sync::Arc;
use std::time::Duration;

use ndarray::{ArrayD, IxDyn};

use objflow::graph::{ArraySource, Roi, SubRegion};
use objflow::{ArrayCache, BlockShape, GraphError};

use super::test_utils::{ramp, DirtyProbe, TrackingSource};

fn cached(source: &TrackingSource, block: Vec<usize>) -> Arc<ArrayCache<f32>> {
    let cache = ArrayCache::new("Cache", BlockShape::Fixed(block));
    cache.input.connect(&source.output).unwrap();
    cache
}

// =============================================================================
// Hits and Misses
// =============================================================================

#[tokio::test]
async fn test_repeat_request_served_from_memory() {
    let data = ramp(&[8, 8]);
    let source = TrackingSource::new(data.clone(), "xy");
    let cache = cached(&source, vec![4, 4]);

    let first = cache.output.request(SubRegion::full(&[8, 8])).await.unwrap();
    assert_eq!(first, data);
    assert_eq!(source.calls(), 4);

    let second = cache.output.request(SubRegion::full(&[8, 8])).await.unwrap();
    assert_eq!(second, data);
    assert_eq!(source.calls(), 4);

    let stats = cache.stats();
    assert_eq!(stats.misses, 4);
    assert_eq!(stats.hits, 4);
    assert_eq!(stats.blocks, 4);
}

#[tokio::test]
async fn test_upstream_requests_are_block_aligned() {
    let source = TrackingSource::new(ramp(&[8, 8]), "xy");
    let cache = cached(&source, vec![4, 4]);

    let roi = SubRegion::new(vec![3, 1], vec![5, 2]).unwrap();
    let part = cache.output.request(roi.clone()).await.unwrap();
    assert_eq!(part, roi.view(&ramp(&[8, 8])).to_owned());

    let mut requested = source.requests();
    requested.sort_by(|a, b| a.start().cmp(b.start()));
    assert_eq!(
        requested,
        vec![
            SubRegion::new(vec![0, 0], vec![4, 4]).unwrap(),
            SubRegion::new(vec![4, 0], vec![8, 4]).unwrap(),
        ]
    );
}

#[tokio::test]
async fn test_concurrent_misses_coalesce() {
    let data = ramp(&[6, 6]);
    let source = TrackingSource::with_delay(data.clone(), "xy", Duration::from_millis(50));
    let cache = cached(&source, vec![6, 6]);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let output = cache.output.clone();
        handles.push(tokio::spawn(async move {
            output.request(SubRegion::full(&[6, 6])).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), data);
    }

    assert_eq!(source.calls(), 1);
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test]
async fn test_failure_leaves_block_uncached() {
    let data = ramp(&[4, 4]);
    let source = TrackingSource::new(data.clone(), "xy");
    let cache = cached(&source, vec![4, 4]);

    source.fail_next(1);
    let err = cache.output.request(SubRegion::full(&[4, 4])).await.unwrap_err();
    assert!(matches!(err, GraphError::Precondition { .. }));
    assert_eq!(cache.stats().blocks, 0);

    let retry = cache.output.request(SubRegion::full(&[4, 4])).await.unwrap();
    assert_eq!(retry, data);
    assert_eq!(source.calls(), 2);
    assert_eq!(cache.stats().blocks, 1);
}

#[tokio::test]
async fn test_capacity_evicts_least_recent_blocks() {
    let source = TrackingSource::new(ramp(&[8, 8]), "xy");
    let cache = ArrayCache::with_capacity("Bounded", BlockShape::Fixed(vec![4, 4]), Some(2));
    cache.input.connect(&source.output).unwrap();

    cache.output.request(SubRegion::full(&[8, 8])).await.unwrap();
    assert_eq!(cache.stats().blocks, 2);

    source.reset_tracking();
    let full = cache.output.request(SubRegion::full(&[8, 8])).await.unwrap();
    assert_eq!(full, ramp(&[8, 8]));
    assert!(source.calls() >= 2);
    assert_eq!(cache.stats().blocks, 2);
}

// =============================================================================
// Invalidation
// =============================================================================

#[tokio::test]
async fn test_dirty_drops_only_overlapping_blocks() {
    let source = ArraySource::new("Source", ramp(&[8, 8]), "xy").unwrap();
    let cache = ArrayCache::new("Cache", BlockShape::Fixed(vec![4, 4]));
    cache.input.connect(source.output()).unwrap();

    cache.output.request(SubRegion::full(&[8, 8])).await.unwrap();
    assert_eq!(source.request_count(), 4);

    let region = SubRegion::new(vec![1, 1], vec![3, 3]).unwrap();
    source
        .write(&region, &ArrayD::from_elem(IxDyn(&[2, 2]), -1.0))
        .unwrap();
    assert_eq!(cache.stats().blocks, 3);

    let full = cache.output.request(SubRegion::full(&[8, 8])).await.unwrap();
    assert_eq!(source.request_count(), 5);
    assert_eq!(full, source.snapshot());
    assert_eq!(full[[2, 2]], -1.0);
}

#[tokio::test]
async fn test_dirty_reaches_downstream_conservatively() {
    let source = ArraySource::new("Source", ramp(&[8, 8]), "xy").unwrap();
    let cache = ArrayCache::new("Cache", BlockShape::Fixed(vec![4, 4]));
    cache.input.connect(source.output()).unwrap();
    let probe = DirtyProbe::<ArrayD<f32>>::new();
    probe.input.connect(&cache.output).unwrap();
    probe.clear();

    let region = SubRegion::new(vec![5, 0], vec![6, 2]).unwrap();
    source
        .write(&region, &ArrayD::zeros(IxDyn(&[1, 2])))
        .unwrap();

    let seen = probe.seen();
    assert!(!seen.is_empty());
    assert!(seen.iter().any(|roi| match roi {
        Roi::Box(dirty) => dirty.intersect(&region).as_ref() == Some(&region),
        Roi::List(_) => true,
    }));
}

#[tokio::test]
async fn test_cached_matches_upstream_after_writes() {
    let source = ArraySource::new("Source", ramp(&[6, 9]), "xy").unwrap();
    let cache = ArrayCache::new("Cache", BlockShape::Fixed(vec![4, 4]));
    cache.input.connect(source.output()).unwrap();

    let writes = [
        (vec![0, 0], vec![2, 2], 100.0),
        (vec![3, 4], vec![6, 9], 200.0),
        (vec![5, 8], vec![6, 9], 300.0),
    ];
    for (start, stop, value) in writes {
        let probe_roi = SubRegion::new(vec![1, 2], vec![6, 7]).unwrap();
        let before = cache.output.request(probe_roi.clone()).await.unwrap();
        assert_eq!(before, probe_roi.view(&source.snapshot()).to_owned());

        let region = SubRegion::new(start, stop).unwrap();
        let values = ArrayD::from_elem(IxDyn(&region.shape()), value);
        source.write(&region, &values).unwrap();

        let after = cache.output.request(SubRegion::full(&[6, 9])).await.unwrap();
        assert_eq!(after, source.snapshot());
    }
}

#[tokio::test]
async fn test_request_outside_bounds_rejected() {
    let source = TrackingSource::new(ramp(&[4, 4]), "xy");
    let cache = cached(&source, vec![2, 2]);

    let roi = SubRegion::new(vec![0, 0], vec![5, 4]).unwrap();
    let err = cache.output.request(roi).await.unwrap_err();
    assert!(matches!(err, GraphError::Roi(_)));
    assert_eq!(source.calls(), 0);
}
