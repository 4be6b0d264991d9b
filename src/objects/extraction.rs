use std::sync::{Arc, Weak};

use async_trait::async_trait;
use ndarray::ArrayD;
use tracing::info;

use crate::cache::CacheStats;
use crate::error::GraphError;
use crate::graph::{unreachable_execute, Execute, InputSlot, Operator, OutputSlot, Roi};
use crate::ops::CachedLabelImage;

use super::center_image::ObjectCenterImage;
use super::features::DEFAULT_FEATURES;
use super::region_features::CachedRegionFeatures;
use super::time_list::{AdaptTimeListRoi, TimeMap};

/// Defaults first, then every configured name not seen yet.
pub fn feature_union(configured: &[String]) -> Vec<String> {
    let mut features: Vec<String> = Vec::new();
    for name in DEFAULT_FEATURES.iter().copied().chain(configured.iter().map(String::as_str)) {
        if !features.iter().any(|f| f == name) {
            features.push(name.to_string());
        }
    }
    features
}

/// Object extraction: labels, region features and center markers.
///
/// ```text
/// BackgroundLabels             LabelImage
///                 \           /
/// BinaryImage ---> labeler ------> features ---> time-list adapter ---> RegionFeatures
///                                 /                               \
/// RawImage -----------------------             BinaryImage ---> centers ---> ObjectCenterImage
/// ```
pub struct ObjectExtraction {
    name: String,
    features: Vec<String>,
    pub raw_image: InputSlot<ArrayD<f32>>,
    pub binary_image: InputSlot<ArrayD<u8>>,
    /// One background value per channel
    pub background_labels: InputSlot<Vec<u8>>,
    pub label_image: OutputSlot<ArrayD<u32>>,
    pub object_center_image: OutputSlot<ArrayD<u8>>,
    pub region_features: OutputSlot<TimeMap>,
    labeler: Arc<CachedLabelImage>,
    extractor: Arc<CachedRegionFeatures>,
    adapter: Arc<AdaptTimeListRoi>,
    centers: Arc<ObjectCenterImage>,
}

impl ObjectExtraction {
    pub const RAW_IMAGE: usize = 0;
    pub const BINARY_IMAGE: usize = 1;
    pub const BACKGROUND_LABELS: usize = 2;

    /// Build the graph computing `configured` features plus the defaults.
    pub fn new(configured: &[String]) -> Result<Arc<Self>, GraphError> {
        Self::with_cache_capacity(configured, None)
    }

    /// Like [`ObjectExtraction::new`], bounding the feature cache to
    /// `capacity` cells.
    pub fn with_cache_capacity(
        configured: &[String],
        capacity: Option<usize>,
    ) -> Result<Arc<Self>, GraphError> {
        let name = "ObjectExtraction".to_string();
        let features = feature_union(configured);

        let labeler = CachedLabelImage::new(format!("{}.LabelImage", name))?;
        let extractor = CachedRegionFeatures::new(
            format!("{}.RegionFeatures", name),
            features.clone(),
            capacity,
        )?;
        let adapter = AdaptTimeListRoi::new(format!("{}.TimeListAdapter", name));
        let centers = ObjectCenterImage::new(format!("{}.ObjectCenterImage", name));

        let op = Self {
            raw_image: InputSlot::new(format!("{}.RawImage", name)),
            binary_image: InputSlot::new(format!("{}.BinaryImage", name)),
            background_labels: InputSlot::new(format!("{}.BackgroundLabels", name)),
            label_image: OutputSlot::new(format!("{}.LabelImage", name)),
            object_center_image: OutputSlot::new(format!("{}.ObjectCenterImage", name)),
            region_features: OutputSlot::new(format!("{}.RegionFeatures", name)),
            name,
            features,
            labeler,
            extractor,
            adapter,
            centers,
        };

        op.labeler.input.connect(op.binary_image.as_output())?;
        op.labeler.background.connect(op.background_labels.as_output())?;

        op.extractor.raw.connect(op.raw_image.as_output())?;
        op.extractor.labels.connect(&op.labeler.output)?;

        op.adapter.input.connect(&op.extractor.output)?;

        op.centers.binary.connect(op.binary_image.as_output())?;
        op.centers.centers.connect(&op.adapter.output)?;

        op.label_image.forward(&op.labeler.output)?;
        op.object_center_image.forward(&op.centers.output)?;
        op.region_features.forward(&op.adapter.output)?;

        let op = Arc::new(op);
        let weak: Weak<Self> = Arc::downgrade(&op);
        let owner: Weak<dyn Operator> = weak;
        op.raw_image.attach(owner.clone(), Self::RAW_IMAGE);
        op.binary_image.attach(owner.clone(), Self::BINARY_IMAGE);
        op.background_labels.attach(owner, Self::BACKGROUND_LABELS);

        info!(features = ?op.features, "object extraction ready");
        Ok(op)
    }

    /// Feature names computed for every object, defaults first.
    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn label_cache_stats(&self) -> CacheStats {
        self.labeler.cache_stats()
    }

    pub fn feature_cache_stats(&self) -> CacheStats {
        self.extractor.cache_stats()
    }
}

impl Operator for ObjectExtraction {
    fn name(&self) -> &str {
        &self.name
    }

    /// Raw and binary images must describe the same voxels.
    fn setup_outputs(&self) -> Result<(), GraphError> {
        let (Some(raw), Some(binary)) = (self.raw_image.meta(), self.binary_image.meta()) else {
            return Ok(());
        };
        if raw.shape != binary.shape || raw.axistags != binary.axistags {
            return Err(GraphError::Precondition {
                operator: self.name.clone(),
                message: format!(
                    "raw image {:?} '{}' does not match binary image {:?} '{}'",
                    raw.shape, raw.axistags, binary.shape, binary.axistags
                ),
            });
        }
        Ok(())
    }

    fn propagate_dirty(&self, _input: usize, _roi: &Roi) {}
}

#[async_trait]
impl Execute<ArrayD<u32>> for ObjectExtraction {
    async fn execute(&self, _output: usize, _roi: &Roi) -> Result<ArrayD<u32>, GraphError> {
        Err(unreachable_execute(self))
    }
}

#[async_trait]
impl Execute<ArrayD<u8>> for ObjectExtraction {
    async fn execute(&self, _output: usize, _roi: &Roi) -> Result<ArrayD<u8>, GraphError> {
        Err(unreachable_execute(self))
    }
}

#[async_trait]
impl Execute<TimeMap> for ObjectExtraction {
    async fn execute(&self, _output: usize, _roi: &Roi) -> Result<TimeMap, GraphError> {
        Err(unreachable_execute(self))
    }
}
