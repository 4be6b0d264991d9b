//! Object extraction pipeline integration tests.
//!
//! Tests verify:
//! - End-to-end labels, region features and center overlay
//! - Results do not depend on request history
//! - Upstream writes recompute exactly the affected time steps
//! - Replacing inputs with a new shape never serves stale features
//! - Channels keep their order and their own background value
//! - Slicing and stacking reproduce the input
//! - Wiring errors surface at connect time

use std::sync::Arc;

use ndarray::{ArrayD, IxDyn};

use objflow::graph::{ArraySource, AxisTag, ElementKind, Level, ListRoi, Meta, SubRegion};
use objflow::{
    FeatureReport, GraphError, MultiArraySlicer, MultiArrayStacker, ObjectExtraction, TimeMap,
    MARKER_VALUE,
};

use super::test_utils::{blobs, volumes, Blob, VOLUME_SHAPE};

struct Wired {
    raw: Arc<ArraySource<f32>>,
    binary: Arc<ArraySource<u8>>,
    extraction: Arc<ObjectExtraction>,
}

fn wire(blobs: &[Blob], features: &[&str], background: u8) -> Wired {
    let (raw, binary) = volumes(blobs);
    let raw = ArraySource::new("Raw", raw, "txyzc").unwrap();
    let binary = ArraySource::new("Binary", binary, "txyzc").unwrap();

    let features: Vec<String> = features.iter().map(|f| f.to_string()).collect();
    let extraction = ObjectExtraction::new(&features).unwrap();
    extraction.raw_image.connect(raw.output()).unwrap();
    extraction.binary_image.connect(binary.output()).unwrap();
    extraction
        .background_labels
        .set_value(vec![background], Meta::list(1, AxisTag::C, ElementKind::U8))
        .unwrap();

    Wired {
        raw,
        binary,
        extraction,
    }
}

fn sorted_column(map: &TimeMap, t: usize, feature: &str) -> Vec<f64> {
    let table = &map[&t][0];
    let mut values: Vec<f64> = table
        .get(feature)
        .unwrap()
        .rows()
        .into_iter()
        .skip(1)
        .map(|row| row[0])
        .collect();
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    values
}

// =============================================================================
// End to End
// =============================================================================

#[tokio::test]
async fn test_extraction_end_to_end() {
    let blobs = blobs();
    let wired = wire(&blobs, &["Count", "Mean"], 0);
    let extraction = &wired.extraction;

    let map = extraction
        .region_features
        .request(ListRoi::all())
        .await
        .unwrap();
    assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(map[&0][0].object_count(), 2);
    assert_eq!(map[&1][0].object_count(), 1);

    assert_eq!(sorted_column(&map, 0, "Count"), vec![18.0, 24.0]);
    assert_eq!(sorted_column(&map, 0, "Mean"), vec![10.0, 20.0]);
    assert_eq!(sorted_column(&map, 1, "Count"), vec![9.0]);

    let centers = map[&1][0].get("RegionCenter").unwrap();
    let expected = blobs[2].center();
    for (column, value) in expected.iter().enumerate() {
        assert!((centers[[1, column]] - value).abs() < 1e-9);
    }

    let labels = extraction
        .label_image
        .request(SubRegion::full(&VOLUME_SHAPE))
        .await
        .unwrap();
    assert_eq!(labels.shape(), &VOLUME_SHAPE);
    assert_eq!(labels[[0, 0, 0, 0, 0]], 0);
    assert_eq!(
        labels.iter().filter(|&&l| l != 0).count(),
        blobs.iter().map(Blob::volume).sum::<usize>()
    );

    let report = FeatureReport::from_time_map(2, &map);
    assert_eq!(report.object_count(), 3);
    assert!(report.features[0].features.contains_key("Coord<Maximum>"));
}

#[tokio::test]
async fn test_center_overlay_excludes_background() {
    let wired = wire(&blobs(), &[], 0);
    let overlay = wired
        .extraction
        .object_center_image
        .request(SubRegion::full(&VOLUME_SHAPE))
        .await
        .unwrap();

    let marked = |t: usize| {
        overlay
            .indexed_iter()
            .filter(|(ix, v)| ix[0] == t && **v == MARKER_VALUE)
            .count()
    };
    // One full cross per object and none for the background.
    assert_eq!(marked(0), 14);
    assert_eq!(marked(1), 7);
    assert!(overlay.iter().all(|&v| v == 0 || v == MARKER_VALUE));

    // Truncated center of the t = 1 object.
    assert_eq!(overlay[[1, 7, 7, 2, 0]], MARKER_VALUE);
}

#[tokio::test]
async fn test_background_value_selects_objects() {
    // With 1 as background the surrounding zeros form a single object.
    let wired = wire(&blobs(), &["Count"], 1);
    let map = wired
        .extraction
        .region_features
        .request(ListRoi::new(vec![0]))
        .await
        .unwrap();

    let spatial: usize = VOLUME_SHAPE[1..4].iter().product();
    assert_eq!(map[&0][0].object_count(), 1);
    assert_eq!(
        sorted_column(&map, 0, "Count"),
        vec![(spatial - 18 - 24) as f64]
    );
}

// =============================================================================
// Laziness and Invalidation
// =============================================================================

#[tokio::test]
async fn test_only_requested_times_are_computed() {
    let wired = wire(&blobs(), &["Count"], 0);
    let extraction = &wired.extraction;

    let map = extraction
        .region_features
        .request(ListRoi::new(vec![1]))
        .await
        .unwrap();
    assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![1]);

    let stats = extraction.feature_cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.blocks, 1);
    assert_eq!(extraction.label_cache_stats().misses, 1);
}

#[tokio::test]
async fn test_results_independent_of_request_history() {
    let features = ["Count", "Mean", "Variance"];
    let fresh = wire(&blobs(), &features, 0);
    let direct = fresh
        .extraction
        .region_features
        .request(ListRoi::all())
        .await
        .unwrap();

    let warmed = wire(&blobs(), &features, 0);
    let out = &warmed.extraction;
    out.object_center_image
        .request(SubRegion::new(vec![1, 0, 0, 0, 0], vec![2, 8, 8, 5, 1]).unwrap())
        .await
        .unwrap();
    out.region_features.request(ListRoi::new(vec![1])).await.unwrap();
    out.region_features.request(ListRoi::new(vec![0])).await.unwrap();
    let replayed = out.region_features.request(ListRoi::all()).await.unwrap();

    assert_eq!(replayed, direct);
}

#[tokio::test]
async fn test_raw_write_recomputes_affected_time_only() {
    let wired = wire(&blobs(), &["Mean"], 0);
    let extraction = &wired.extraction;

    extraction
        .region_features
        .request(ListRoi::all())
        .await
        .unwrap();
    assert_eq!(extraction.feature_cache_stats().misses, 2);

    // Brighten the t = 1 object.
    let region = SubRegion::new(vec![1, 6, 6, 2, 0], vec![2, 9, 9, 3, 1]).unwrap();
    wired
        .raw
        .write(&region, &ArrayD::from_elem(IxDyn(&[1, 3, 3, 1, 1]), 50.0))
        .unwrap();

    let map = extraction
        .region_features
        .request(ListRoi::all())
        .await
        .unwrap();
    assert_eq!(extraction.feature_cache_stats().misses, 3);
    assert_eq!(sorted_column(&map, 1, "Mean"), vec![50.0]);
    assert_eq!(sorted_column(&map, 0, "Mean"), vec![10.0, 20.0]);
    assert_eq!(extraction.label_cache_stats().misses, 2);
}

#[tokio::test]
async fn test_binary_write_relabels() {
    let wired = wire(&blobs(), &["Count"], 0);
    let extraction = &wired.extraction;
    extraction
        .region_features
        .request(ListRoi::all())
        .await
        .unwrap();

    // A third object at t = 0, away from the others.
    let region = SubRegion::new(vec![0, 13, 1, 0, 0], vec![1, 15, 3, 1, 1]).unwrap();
    wired
        .binary
        .write(&region, &ArrayD::from_elem(IxDyn(&[1, 2, 2, 1, 1]), 1))
        .unwrap();

    let map = extraction
        .region_features
        .request(ListRoi::all())
        .await
        .unwrap();
    assert_eq!(sorted_column(&map, 0, "Count"), vec![4.0, 18.0, 24.0]);
    assert_eq!(sorted_column(&map, 1, "Count"), vec![9.0]);

    let overlay = extraction
        .object_center_image
        .request(SubRegion::full(&VOLUME_SHAPE))
        .await
        .unwrap();
    let count = overlay.iter().filter(|&&v| v == MARKER_VALUE).count();
    // The new object touches z = 0, so its cross loses the voxel below.
    assert_eq!(count, 14 + 6 + 7);
}

/// A single-voxel object at (x, y) in both time steps of a 2 x n x n x 1 x 1
/// volume.
fn dot_volumes(n: usize, x: usize, y: usize) -> (ArrayD<f32>, ArrayD<u8>) {
    let binary = ArrayD::from_shape_fn(IxDyn(&[2, n, n, 1, 1]), |ix| {
        u8::from(ix[1] == x && ix[2] == y)
    });
    (binary.mapv(f32::from), binary)
}

#[tokio::test]
async fn test_spatial_reshape_recomputes_features() {
    let (raw, binary) = dot_volumes(8, 2, 2);
    let raw_source = ArraySource::new("Raw", raw, "txyzc").unwrap();
    let binary_source = ArraySource::new("Binary", binary, "txyzc").unwrap();
    let extraction = ObjectExtraction::new(&[]).unwrap();
    extraction.raw_image.connect(raw_source.output()).unwrap();
    extraction.binary_image.connect(binary_source.output()).unwrap();

    let before = extraction
        .region_features
        .request(ListRoi::all())
        .await
        .unwrap();
    assert_eq!(before[&1][0].get("RegionCenter").unwrap()[[1, 0]], 2.0);

    // Replacing raw first leaves the inputs disagreeing for a moment.
    let (raw, binary) = dot_volumes(6, 4, 4);
    let err = raw_source.replace(raw, "txyzc").unwrap_err();
    assert!(matches!(err, GraphError::Precondition { .. }));
    assert!(extraction
        .region_features
        .request(ListRoi::all())
        .await
        .is_err());

    binary_source.replace(binary, "txyzc").unwrap();
    let after = extraction
        .region_features
        .request(ListRoi::all())
        .await
        .unwrap();
    for t in 0..2 {
        let centers = after[&t][0].get("RegionCenter").unwrap();
        assert_eq!(after[&t][0].object_count(), 1);
        assert_eq!(centers[[1, 0]], 4.0);
        assert_eq!(centers[[1, 1]], 4.0);
    }

    let overlay = extraction
        .object_center_image
        .request(SubRegion::full(&[2, 6, 6, 1, 1]))
        .await
        .unwrap();
    assert_eq!(overlay[[1, 4, 4, 0, 0]], MARKER_VALUE);
    assert_eq!(overlay[[1, 2, 2, 0, 0]], 0);
}

#[tokio::test]
async fn test_channels_keep_order_and_background() {
    // Channel 0: ones on a background of zeros.
    // Channel 1: zeros on a background of ones.
    let shape = [1, 8, 8, 1, 2];
    let binary = ArrayD::from_shape_fn(IxDyn(&shape), |ix| {
        let (x, y) = (ix[1], ix[2]);
        if ix[4] == 0 {
            u8::from((1..3).contains(&x) && (1..3).contains(&y))
        } else {
            u8::from(!((5..7).contains(&x) && (4..7).contains(&y)))
        }
    });
    let raw = ArraySource::new("Raw", binary.mapv(f32::from), "txyzc").unwrap();
    let binary = ArraySource::new("Binary", binary, "txyzc").unwrap();

    let extraction = ObjectExtraction::new(&["Count".to_string()]).unwrap();
    extraction.raw_image.connect(raw.output()).unwrap();
    extraction.binary_image.connect(binary.output()).unwrap();
    extraction
        .background_labels
        .set_value(vec![0, 1], Meta::list(2, AxisTag::C, ElementKind::U8))
        .unwrap();

    let map = extraction
        .region_features
        .request(ListRoi::all())
        .await
        .unwrap();
    let channels = &map[&0];
    assert_eq!(channels.len(), 2);

    assert_eq!(channels[0].object_count(), 1);
    assert_eq!(channels[0].get("Count").unwrap()[[1, 0]], 4.0);
    let centers = channels[0].get("RegionCenter").unwrap();
    assert_eq!(centers.row(1).to_vec(), vec![1.5, 1.5, 0.0]);

    assert_eq!(channels[1].object_count(), 1);
    assert_eq!(channels[1].get("Count").unwrap()[[1, 0]], 6.0);
    let centers = channels[1].get("RegionCenter").unwrap();
    assert_eq!(centers.row(1).to_vec(), vec![5.5, 5.0, 0.0]);

    // Each cross loses its two z neighbours in a single z plane.
    let overlay = extraction
        .object_center_image
        .request(SubRegion::full(&shape))
        .await
        .unwrap();
    assert_eq!(overlay.iter().filter(|&&v| v == MARKER_VALUE).count(), 10);
    assert_eq!(overlay[[0, 1, 1, 0, 0]], MARKER_VALUE);
    assert_eq!(overlay[[0, 5, 5, 0, 1]], MARKER_VALUE);
    assert_eq!(overlay[[0, 5, 5, 0, 0]], 0);
    assert_eq!(overlay[[0, 1, 1, 0, 1]], 0);
}

// =============================================================================
// Wiring
// =============================================================================

#[test]
fn test_mismatched_raw_and_binary_rejected() {
    let raw = ArraySource::new("Raw", ArrayD::<f32>::zeros(IxDyn(&VOLUME_SHAPE)), "txyzc").unwrap();
    let binary =
        ArraySource::new("Binary", ArrayD::<u8>::zeros(IxDyn(&[2, 8, 8, 5, 1])), "txyzc").unwrap();

    let extraction = ObjectExtraction::new(&[]).unwrap();
    extraction.raw_image.connect(raw.output()).unwrap();
    let err = extraction.binary_image.connect(binary.output()).unwrap_err();
    assert!(matches!(err, GraphError::Precondition { .. }));
}

#[tokio::test]
async fn test_unknown_feature_fails_on_request() {
    let wired = wire(&blobs(), &["Skewness"], 0);
    let err = wired
        .extraction
        .region_features
        .request(ListRoi::all())
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::UnknownFeature(name) if name == "Skewness"));
}

#[tokio::test]
async fn test_time_out_of_range() {
    let wired = wire(&blobs(), &[], 0);
    let err = wired
        .extraction
        .region_features
        .request(ListRoi::new(vec![2]))
        .await
        .unwrap_err();
    assert!(matches!(err, GraphError::Roi(_)));
}

#[tokio::test]
async fn test_slice_then_stack_round_trip() {
    let (raw, _) = volumes(&blobs());
    let source = ArraySource::new("Raw", raw.clone(), "txyzc").unwrap();

    let by_time = MultiArraySlicer::<f32>::new("ByTime", AxisTag::T);
    by_time.input.connect(source.output()).unwrap();
    assert_eq!(by_time.outputs.len(), 2);

    let stacked = MultiArrayStacker::<f32>::new("Stack", AxisTag::T);
    stacked.images.connect(&by_time.outputs.as_level()).unwrap();

    let meta = stacked.output.meta().unwrap();
    assert_eq!(meta.shape, VOLUME_SHAPE.to_vec());

    let whole = stacked
        .output
        .request(SubRegion::full(&VOLUME_SHAPE))
        .await
        .unwrap();
    assert_eq!(whole, raw);

    let part = SubRegion::new(vec![1, 5, 5, 1, 0], vec![2, 10, 10, 4, 1]).unwrap();
    let sliced = stacked.output.request(part.clone()).await.unwrap();
    assert_eq!(sliced, part.view(&raw).to_owned());
}

#[test]
fn test_nested_level_rejected_by_multi_input() {
    let source = ArraySource::new("Raw", ArrayD::<f32>::zeros(IxDyn(&[2, 2])), "xy").unwrap();
    let stacker = MultiArrayStacker::<f32>::new("Stack", AxisTag::X);

    let nested = Level::List(vec![Level::List(vec![Level::Scalar(
        source.output().clone(),
    )])]);
    let err = stacker.images.connect(&nested).unwrap_err();
    assert!(matches!(err, GraphError::LevelMismatch { .. }));
}
