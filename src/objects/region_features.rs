use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use ndarray::{ArrayD, ArrayViewD, Ix3, IxDyn};
use tracing::debug;

use crate::cache::{ArrayCache, BlockShape, CacheStats};
use crate::error::GraphError;
use crate::graph::{
    lock, unreachable_execute, AxisTag, ElementKind, Execute, InputSlot, Level, Meta, Operator,
    OperatorWrapper, OutputSlot, Roi,
};
use crate::ops::{MultiArraySlicer, MultiArrayStacker};

use super::features::{extract_region_features, FeatureTable};

/// One feature table per (t, c) cell.
pub type FeatureArray = ArrayD<Arc<FeatureTable>>;

fn precondition(operator: &str, message: impl Into<String>) -> GraphError {
    GraphError::Precondition {
        operator: operator.to_string(),
        message: message.into(),
    }
}

/// Raw and label metadata must agree exactly.
fn check_same_layout(operator: &str, raw: &Meta, labels: &Meta) -> Result<(), GraphError> {
    if raw.shape != labels.shape {
        return Err(precondition(
            operator,
            format!("raw shape {:?} differs from label shape {:?}", raw.shape, labels.shape),
        ));
    }
    if raw.axistags != labels.axistags {
        return Err(precondition(
            operator,
            format!("raw axes '{}' differ from label axes '{}'", raw.axistags, labels.axistags),
        ));
    }
    Ok(())
}

/// Drop every axis with extent 1 that is not spatial, leaving x, y, z.
fn spatial_volume<'a, T>(
    array: &'a ArrayD<T>,
    meta: &Meta,
) -> Result<ndarray::ArrayView3<'a, T>, GraphError> {
    let mut view: ArrayViewD<'a, T> = array.view();
    let tagged = meta.tagged_shape();
    for (axis, a) in tagged.axes().iter().enumerate().rev() {
        if !a.tag.is_spatial() {
            view = view.index_axis_move(ndarray::Axis(axis), 0);
        }
    }
    Ok(view.into_dimensionality::<Ix3>()?)
}

// =============================================================================
// Single-cell Extractor
// =============================================================================

/// Region features of one (t, c) cell.
///
/// Both inputs must be xyz volumes, optionally with t and c axes of extent 1.
/// The output keeps only the t and c axes; every request recomputes the
/// features over the whole spatial volume.
pub struct RegionFeatures3d {
    name: String,
    features: Vec<String>,
    pub raw: InputSlot<ArrayD<f32>>,
    pub labels: InputSlot<ArrayD<u32>>,
    pub output: OutputSlot<FeatureArray>,
}

impl RegionFeatures3d {
    pub const RAW: usize = 0;
    pub const LABELS: usize = 1;

    pub fn new(name: impl Into<String>, features: Vec<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this: &Weak<Self>| {
            let owner: Weak<dyn Operator> = this.clone();
            let raw = InputSlot::new(format!("{}.RawVolume", name));
            raw.attach(owner.clone(), Self::RAW);
            let labels = InputSlot::new(format!("{}.LabelVolume", name));
            labels.attach(owner, Self::LABELS);

            let output = OutputSlot::new(format!("{}.Output", name));
            let exec: Weak<dyn Execute<FeatureArray>> = this.clone();
            output.bind(exec, 0);

            Self {
                name,
                features,
                raw,
                labels,
                output,
            }
        })
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Output metadata for the current inputs, `None` while either is unready.
    fn cell_meta(&self) -> Result<Option<Meta>, GraphError> {
        let (Some(raw), Some(labels)) = (self.raw.meta(), self.labels.meta()) else {
            return Ok(None);
        };
        check_same_layout(&self.name, &raw, &labels)?;

        let tagged = labels.tagged_shape();
        for tag in [AxisTag::T, AxisTag::C] {
            if let Some(extent) = tagged.extent(tag) {
                if extent != 1 {
                    return Err(precondition(
                        &self.name,
                        format!("axis '{}' has extent {}, expected 1", tag, extent),
                    ));
                }
            }
        }
        if tagged.spatial_indices().len() != 3 {
            return Err(precondition(
                &self.name,
                format!("input volumes must have xyz axes, got '{}'", labels.axistags),
            ));
        }

        let cells = tagged.retain(|tag| !tag.is_spatial());
        Ok(Some(Meta::new(cells.shape(), cells.tags(), ElementKind::Object)?))
    }
}

impl Operator for RegionFeatures3d {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup_outputs(&self) -> Result<(), GraphError> {
        match self.cell_meta() {
            Ok(Some(meta)) => self.output.set_meta(meta),
            Ok(None) => self.output.clear_meta(),
            Err(err) => {
                // Unready until the inputs agree again.
                self.output.clear_meta()?;
                Err(err)
            }
        }
    }

    fn propagate_dirty(&self, _input: usize, roi: &Roi) {
        let Some(meta) = self.output.meta() else {
            return;
        };
        match (roi, self.raw.meta()) {
            (Roi::Box(region), Some(raw)) if region.ndim() == raw.ndim() => {
                let kept: Vec<usize> = raw
                    .axistags
                    .iter()
                    .enumerate()
                    .filter(|(_, tag)| !tag.is_spatial())
                    .map(|(i, _)| i)
                    .collect();
                self.output.set_dirty(region.select_axes(&kept));
            }
            _ => self.output.set_dirty(meta.full_roi()),
        }
    }
}

#[async_trait]
impl Execute<FeatureArray> for RegionFeatures3d {
    async fn execute(&self, _output: usize, roi: &Roi) -> Result<FeatureArray, GraphError> {
        let region = roi.as_box(self.output.name())?;
        if region.is_empty() {
            return Ok(ArrayD::from_shape_vec(IxDyn(&region.shape()), Vec::new())?);
        }

        let raw_meta = self.raw.require_meta()?;
        let label_meta = self.labels.require_meta()?;
        let raw = self.raw.request(raw_meta.full_region()).await?;
        let labels = self.labels.request(label_meta.full_region()).await?;

        let table = extract_region_features(
            spatial_volume(&raw, &raw_meta)?,
            spatial_volume(&labels, &label_meta)?,
            &self.features,
        )?;
        debug!(operator = %self.name, objects = table.object_count(), "extracted region features");

        Ok(ArrayD::from_elem(IxDyn(&region.shape()), Arc::new(table)))
    }
}

// =============================================================================
// Composite Pipeline
// =============================================================================

/// Region features of every (t, c) cell of a 5D image.
///
/// ```text
/// Raw    --> time slicer --> channel slicers --\
///                                               +--> extractors --> channel stackers --> time stacker --> Output
/// Labels --> time slicer --> channel slicers --/
/// ```
///
/// The channel slicers, extractors and channel stackers are rebuilt whenever
/// the number of time steps or channels changes.
pub struct RegionFeatures {
    name: String,
    features: Vec<String>,
    pub raw: InputSlot<ArrayD<f32>>,
    pub labels: InputSlot<ArrayD<u32>>,
    pub output: OutputSlot<FeatureArray>,
    raw_time: Arc<MultiArraySlicer<f32>>,
    label_time: Arc<MultiArraySlicer<u32>>,
    raw_channels: OperatorWrapper<MultiArraySlicer<f32>>,
    label_channels: OperatorWrapper<MultiArraySlicer<u32>>,
    extractors: OperatorWrapper<RegionFeatures3d>,
    channel_stackers: OperatorWrapper<MultiArrayStacker<Arc<FeatureTable>>>,
    time_stacker: Arc<MultiArrayStacker<Arc<FeatureTable>>>,
    /// (time steps, channels) the wrappers were last built for
    layout: Mutex<Option<(usize, usize)>>,
}

impl RegionFeatures {
    pub const RAW: usize = 0;
    pub const LABELS: usize = 1;

    pub fn new(name: impl Into<String>, features: Vec<String>) -> Result<Arc<Self>, GraphError> {
        let name = name.into();
        let op = Arc::new(Self {
            raw: InputSlot::new(format!("{}.RawImage", name)),
            labels: InputSlot::new(format!("{}.LabelImage", name)),
            output: OutputSlot::new(format!("{}.Output", name)),
            raw_time: MultiArraySlicer::new(format!("{}.RawTimeSlicer", name), AxisTag::T),
            label_time: MultiArraySlicer::new(format!("{}.LabelTimeSlicer", name), AxisTag::T),
            raw_channels: OperatorWrapper::new(format!("{}.RawChannelSlicers", name), 1),
            label_channels: OperatorWrapper::new(format!("{}.LabelChannelSlicers", name), 1),
            extractors: OperatorWrapper::new(format!("{}.Extractors", name), 2),
            channel_stackers: OperatorWrapper::new(format!("{}.ChannelStackers", name), 1),
            time_stacker: MultiArrayStacker::new(format!("{}.TimeStacker", name), AxisTag::T),
            layout: Mutex::new(None),
            name,
            features,
        });

        op.raw_time.input.connect(op.raw.as_output())?;
        op.label_time.input.connect(op.labels.as_output())?;
        op.output.forward(&op.time_stacker.output)?;

        // Inner slicers see metadata changes before the rebuild below.
        let weak: Weak<Self> = Arc::downgrade(&op);
        let owner: Weak<dyn Operator> = weak;
        op.raw.attach(owner.clone(), Self::RAW);
        op.labels.attach(owner, Self::LABELS);
        Ok(op)
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// Number of single-cell extractors currently wired.
    pub fn extractor_count(&self) -> usize {
        self.extractors.len()
    }

    fn rebuild(&self) -> Result<(), GraphError> {
        let name = &self.name;

        self.raw_channels
            .rebuild(&self.raw_time.outputs.as_level(), |path, slice| {
                let op = MultiArraySlicer::new(
                    format!("{}.RawChannelSlicer[{}]", name, path[0]),
                    AxisTag::C,
                );
                op.input.connect(slice)?;
                Ok(op)
            })?;
        self.label_channels
            .rebuild(&self.label_time.outputs.as_level(), |path, slice| {
                let op = MultiArraySlicer::new(
                    format!("{}.LabelChannelSlicer[{}]", name, path[0]),
                    AxisTag::C,
                );
                op.input.connect(slice)?;
                Ok(op)
            })?;

        let raw_cells = self.raw_channels.collect(|op| op.outputs.as_level());
        let label_cells = self.label_channels.collect(|op| op.outputs.as_level());
        self.extractors
            .rebuild(&raw_cells.zip(&label_cells)?, |path, (raw, labels)| {
                let op = RegionFeatures3d::new(
                    format!("{}.Extractor[{}][{}]", name, path[0], path[1]),
                    self.features.clone(),
                );
                op.raw.connect(raw)?;
                op.labels.connect(labels)?;
                Ok(op)
            })?;

        let rows = self
            .extractors
            .collect(|op| Level::Scalar(op.output.clone()))
            .outer();
        self.channel_stackers.rebuild(&rows, |path, row| {
            let op = MultiArrayStacker::new(
                format!("{}.ChannelStacker[{}]", name, path[0]),
                AxisTag::C,
            );
            op.images.connect(row)?;
            Ok(op)
        })?;

        let stacked = self
            .channel_stackers
            .collect(|op| Level::Scalar(op.output.clone()));
        self.time_stacker.images.connect(&stacked)?;

        debug!(
            operator = %self.name,
            extractors = self.extractors.len(),
            "rebuilt region feature pipeline"
        );
        Ok(())
    }
}

impl Operator for RegionFeatures {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup_outputs(&self) -> Result<(), GraphError> {
        let (Some(raw), Some(labels)) = (self.raw.meta(), self.labels.meta()) else {
            *lock(&self.layout) = None;
            return Ok(());
        };
        let t = raw.require_axis(AxisTag::T, &self.name)?;
        let c = raw.require_axis(AxisTag::C, &self.name)?;
        check_same_layout(&self.name, &raw, &labels)?;

        let layout = (raw.shape[t], raw.shape[c]);
        if *lock(&self.layout) != Some(layout) {
            self.rebuild()?;
            *lock(&self.layout) = Some(layout);
        }
        Ok(())
    }

    fn propagate_dirty(&self, _input: usize, _roi: &Roi) {}
}

#[async_trait]
impl Execute<FeatureArray> for RegionFeatures {
    async fn execute(&self, _output: usize, _roi: &Roi) -> Result<FeatureArray, GraphError> {
        Err(unreachable_execute(self))
    }
}

// =============================================================================
// Cached Pipeline
// =============================================================================

/// [`RegionFeatures`] followed by a cache holding one block per cell.
pub struct CachedRegionFeatures {
    name: String,
    pub raw: InputSlot<ArrayD<f32>>,
    pub labels: InputSlot<ArrayD<u32>>,
    pub output: OutputSlot<FeatureArray>,
    pipeline: Arc<RegionFeatures>,
    cache: Arc<ArrayCache<Arc<FeatureTable>>>,
}

impl CachedRegionFeatures {
    pub const RAW: usize = 0;
    pub const LABELS: usize = 1;

    pub fn new(
        name: impl Into<String>,
        features: Vec<String>,
        capacity: Option<usize>,
    ) -> Result<Arc<Self>, GraphError> {
        let name = name.into();
        let pipeline = RegionFeatures::new(format!("{}.Features", name), features)?;
        let cache = ArrayCache::with_capacity(format!("{}.Cache", name), BlockShape::Cells, capacity);

        let op = Arc::new(Self {
            raw: InputSlot::new(format!("{}.RawImage", name)),
            labels: InputSlot::new(format!("{}.LabelImage", name)),
            output: OutputSlot::new(format!("{}.Output", name)),
            name,
            pipeline,
            cache,
        });

        op.pipeline.raw.connect(op.raw.as_output())?;
        op.pipeline.labels.connect(op.labels.as_output())?;
        op.cache.input.connect(&op.pipeline.output)?;
        op.output.forward(&op.cache.output)?;

        let weak: Weak<Self> = Arc::downgrade(&op);
        let owner: Weak<dyn Operator> = weak;
        op.raw.attach(owner.clone(), Self::RAW);
        op.labels.attach(owner, Self::LABELS);
        Ok(op)
    }

    pub fn pipeline(&self) -> &Arc<RegionFeatures> {
        &self.pipeline
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl Operator for CachedRegionFeatures {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup_outputs(&self) -> Result<(), GraphError> {
        match (self.raw.meta(), self.labels.meta()) {
            (Some(raw), Some(labels)) => check_same_layout(&self.name, &raw, &labels),
            _ => Ok(()),
        }
    }

    fn propagate_dirty(&self, _input: usize, _roi: &Roi) {}
}

#[async_trait]
impl Execute<FeatureArray> for CachedRegionFeatures {
    async fn execute(&self, _output: usize, _roi: &Roi) -> Result<FeatureArray, GraphError> {
        Err(unreachable_execute(self))
    }
}
