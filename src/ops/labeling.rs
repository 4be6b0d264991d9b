use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Dimension, IxDyn};
use tracing::debug;

use crate::cache::{ArrayCache, BlockShape, CacheStats};
use crate::error::GraphError;
use crate::graph::{
    unreachable_execute, AxisTag, ElementKind, Execute, InputSlot, ListRoi, Meta, Operator,
    OutputSlot, Roi, RoiKind, SubRegion,
};

/// Background value for channel `channel`: its own entry, else the last
/// entry, else 0.
pub fn background_for(background: &[u8], channel: usize) -> u8 {
    background
        .get(channel)
        .or(background.last())
        .copied()
        .unwrap_or(0)
}

/// Label the connected components of one (t, c) slab.
///
/// Face-adjacent voxels along `spatial` axes with equal value belong to the
/// same component. Voxels equal to `background` stay 0. Components are
/// numbered from 1 in raster order of their first voxel. Returns the number
/// of components.
pub fn label_slab(
    values: ArrayViewD<'_, u8>,
    background: u8,
    spatial: &[usize],
    mut labels: ArrayViewMutD<'_, u32>,
) -> u32 {
    let shape = values.shape().to_vec();
    let mut next = 0u32;
    let mut queue: VecDeque<Vec<usize>> = VecDeque::new();

    for (start, &value) in values.indexed_iter() {
        let start = start.slice().to_vec();
        if value == background || labels[&start[..]] != 0 {
            continue;
        }
        next += 1;
        labels[&start[..]] = next;
        queue.push_back(start);

        while let Some(voxel) = queue.pop_front() {
            for &axis in spatial {
                let mut neighbours = Vec::with_capacity(2);
                if voxel[axis] > 0 {
                    let mut n = voxel.clone();
                    n[axis] -= 1;
                    neighbours.push(n);
                }
                if voxel[axis] + 1 < shape[axis] {
                    let mut n = voxel.clone();
                    n[axis] += 1;
                    neighbours.push(n);
                }
                for n in neighbours {
                    if values[&n[..]] == value && labels[&n[..]] == 0 {
                        labels[&n[..]] = next;
                        queue.push_back(n);
                    }
                }
            }
        }
    }
    next
}

// =============================================================================
// Label Image
// =============================================================================

/// Connected-component labeling of a binary image.
///
/// Every (t, c) slab is labelled independently over its full spatial volume,
/// so any request is widened to whole slabs before computing.
pub struct LabelImage {
    name: String,
    pub input: InputSlot<ArrayD<u8>>,
    /// One background value per channel
    pub background: InputSlot<Vec<u8>>,
    pub output: OutputSlot<ArrayD<u32>>,
}

impl LabelImage {
    pub const INPUT: usize = 0;
    pub const BACKGROUND: usize = 1;

    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this: &Weak<Self>| {
            let owner: Weak<dyn Operator> = this.clone();
            let input = InputSlot::new(format!("{}.Input", name));
            input.attach(owner.clone(), Self::INPUT);
            let background = InputSlot::new(format!("{}.BackgroundLabels", name));
            background.attach(owner, Self::BACKGROUND);

            let output = OutputSlot::new(format!("{}.Output", name));
            let exec: Weak<dyn Execute<ArrayD<u32>>> = this.clone();
            output.bind(exec, 0);

            Self {
                name,
                input,
                background,
                output,
            }
        })
    }

    /// `region` widened to the full extent of every spatial axis.
    fn whole_slabs(meta: &Meta, region: &SubRegion) -> SubRegion {
        meta.tagged_shape()
            .spatial_indices()
            .into_iter()
            .fold(region.clone(), |roi, axis| {
                roi.with_axis(axis, 0, meta.shape[axis])
            })
    }
}

impl Operator for LabelImage {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup_outputs(&self) -> Result<(), GraphError> {
        match self.input.meta() {
            Some(meta) => self.output.set_meta(meta.with_dtype(ElementKind::U32)),
            None => self.output.clear_meta(),
        }
    }

    fn propagate_dirty(&self, input: usize, roi: &Roi) {
        let Some(meta) = self.output.meta() else {
            return;
        };
        match (input, roi) {
            (Self::INPUT, Roi::Box(region)) if region.ndim() == meta.ndim() => {
                self.output.set_dirty(Self::whole_slabs(&meta, region));
            }
            _ => self.output.set_dirty(meta.full_roi()),
        }
    }
}

#[async_trait]
impl Execute<ArrayD<u32>> for LabelImage {
    async fn execute(&self, _output: usize, roi: &Roi) -> Result<ArrayD<u32>, GraphError> {
        let region = roi.as_box(self.output.name())?;
        let meta = self.input.require_meta()?;
        let expanded = Self::whole_slabs(&meta, region);

        let data = self.input.request(expanded.clone()).await?;
        let background = if self.background.is_ready() {
            self.background.request(ListRoi::all()).await?
        } else {
            Vec::new()
        };

        let spatial = meta.tagged_shape().spatial_indices();
        let channel_axis = meta.axistags.index_of(AxisTag::C);
        let shape = data.shape().to_vec();
        let mut labels = ArrayD::<u32>::zeros(IxDyn(&shape));

        // One point per slab: spatial axes collapsed to their first index.
        let slabs = spatial
            .iter()
            .fold(SubRegion::full(&shape), |roi, &axis| roi.with_axis(axis, 0, 1));
        let mut components = 0;
        for point in slabs.points() {
            let slab = (0..shape.len())
                .filter(|axis| !spatial.contains(axis))
                .fold(SubRegion::full(&shape), |roi, axis| {
                    roi.with_axis(axis, point[axis], point[axis] + 1)
                });
            let channel = channel_axis.map_or(0, |c| expanded.start()[c] + point[c]);
            components += label_slab(
                slab.view(&data),
                background_for(&background, channel),
                &spatial,
                slab.view_mut(&mut labels),
            );
        }
        debug!(operator = %self.name, %expanded, components, "labelled");

        Ok(region.relative_to(expanded.start()).view(&labels).to_owned())
    }
}

// =============================================================================
// Cached Label Image
// =============================================================================

/// [`LabelImage`] followed by a per-(t, c) block cache.
pub struct CachedLabelImage {
    name: String,
    pub input: InputSlot<ArrayD<u8>>,
    pub background: InputSlot<Vec<u8>>,
    pub output: OutputSlot<ArrayD<u32>>,
    labeler: Arc<LabelImage>,
    cache: Arc<ArrayCache<u32>>,
}

impl CachedLabelImage {
    pub const INPUT: usize = 0;
    pub const BACKGROUND: usize = 1;

    pub fn new(name: impl Into<String>) -> Result<Arc<Self>, GraphError> {
        let name = name.into();
        let op = Arc::new(Self {
            input: InputSlot::new(format!("{}.Input", name)),
            background: InputSlot::new(format!("{}.BackgroundLabels", name)),
            output: OutputSlot::new(format!("{}.Output", name)),
            labeler: LabelImage::new(format!("{}.Labeler", name)),
            cache: ArrayCache::new(format!("{}.Cache", name), BlockShape::PerTimeChannel),
            name,
        });

        op.labeler.input.connect(op.input.as_output())?;
        op.labeler.background.connect(op.background.as_output())?;
        op.cache.input.connect(&op.labeler.output)?;
        op.output.forward(&op.cache.output)?;

        let weak: Weak<Self> = Arc::downgrade(&op);
        let owner: Weak<dyn Operator> = weak;
        op.input.attach(owner.clone(), Self::INPUT);
        op.background.attach(owner, Self::BACKGROUND);
        Ok(op)
    }

    pub fn labeler(&self) -> &Arc<LabelImage> {
        &self.labeler
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

impl Operator for CachedLabelImage {
    fn name(&self) -> &str {
        &self.name
    }

    /// Background values are looked up per channel, so they must arrive as
    /// a list of `u8`.
    fn setup_outputs(&self) -> Result<(), GraphError> {
        let Some(meta) = self.background.meta() else {
            return Ok(());
        };
        if meta.roi_kind != RoiKind::List || meta.dtype != ElementKind::U8 {
            return Err(GraphError::Precondition {
                operator: self.name.clone(),
                message: format!(
                    "background labels must be a u8 list, got {} {:?}",
                    meta.roi_kind, meta.dtype
                ),
            });
        }
        Ok(())
    }

    fn propagate_dirty(&self, _input: usize, _roi: &Roi) {}
}

#[async_trait]
impl Execute<ArrayD<u32>> for CachedLabelImage {
    async fn execute(&self, _output: usize, _roi: &Roi) -> Result<ArrayD<u32>, GraphError> {
        Err(unreachable_execute(self))
    }
}
