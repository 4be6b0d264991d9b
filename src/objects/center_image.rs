use std::sync::{Arc, Weak};

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use tracing::trace;

use crate::error::GraphError;
use crate::graph::{AxisTag, Execute, InputSlot, ListRoi, Operator, OutputSlot, Roi, SubRegion};

use super::time_list::TimeMap;

/// Value painted at object centers.
pub const MARKER_VALUE: u8 = 255;

/// A small cross at the center of every object.
///
/// The output has the binary image's metadata. For every labelled object the
/// voxel at its truncated `RegionCenter` and its six face neighbours are set
/// to [`MARKER_VALUE`]; voxels outside the requested region are skipped.
pub struct ObjectCenterImage {
    name: String,
    pub binary: InputSlot<ArrayD<u8>>,
    pub centers: InputSlot<TimeMap>,
    pub output: OutputSlot<ArrayD<u8>>,
}

impl ObjectCenterImage {
    pub const BINARY: usize = 0;
    pub const CENTERS: usize = 1;

    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this: &Weak<Self>| {
            let owner: Weak<dyn Operator> = this.clone();
            let binary = InputSlot::new(format!("{}.BinaryImage", name));
            binary.attach(owner.clone(), Self::BINARY);
            let centers = InputSlot::new(format!("{}.RegionCenters", name));
            centers.attach(owner, Self::CENTERS);

            let output = OutputSlot::new(format!("{}.Output", name));
            let exec: Weak<dyn Execute<ArrayD<u8>>> = this.clone();
            output.bind(exec, 0);

            Self {
                name,
                binary,
                centers,
                output,
            }
        })
    }
}

/// Set every voxel of the cross around `center` that lies inside `region`.
fn paint_cross(result: &mut ArrayD<u8>, region: &SubRegion, center: &[i64], spatial: &[usize]) {
    for &axis in spatial {
        for offset in [-1, 0, 1] {
            let mut point = center.to_vec();
            point[axis] += offset;
            if region.contains_point(&point) {
                let index: Vec<usize> = point
                    .iter()
                    .zip(region.start())
                    .map(|(&p, &s)| p as usize - s)
                    .collect();
                result[&index[..]] = MARKER_VALUE;
            }
        }
    }
}

impl Operator for ObjectCenterImage {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup_outputs(&self) -> Result<(), GraphError> {
        match self.binary.meta() {
            Some(meta) => self.output.set_meta(meta),
            None => self.output.clear_meta(),
        }
    }

    fn propagate_dirty(&self, input: usize, _roi: &Roi) {
        if input != Self::CENTERS {
            return;
        }
        if let Some(meta) = self.output.meta() {
            self.output.set_dirty(meta.full_roi());
        }
    }
}

#[async_trait]
impl Execute<ArrayD<u8>> for ObjectCenterImage {
    async fn execute(&self, _output: usize, roi: &Roi) -> Result<ArrayD<u8>, GraphError> {
        let region = roi.as_box(self.output.name())?;
        let meta = self.output.require_meta()?;
        let t_axis = meta.require_axis(AxisTag::T, &self.name)?;
        let c_axis = meta.require_axis(AxisTag::C, &self.name)?;
        let spatial = meta.tagged_shape().spatial_indices();

        let mut result = ArrayD::<u8>::zeros(IxDyn(&region.shape()));
        if region.is_empty() {
            return Ok(result);
        }

        let mut painted = 0usize;
        for t in region.start()[t_axis]..region.stop()[t_axis] {
            let map = self.centers.request(ListRoi::new(vec![t])).await?;
            let Some(channels) = map.get(&t) else {
                continue;
            };
            for c in region.start()[c_axis]..region.stop()[c_axis] {
                let Some(table) = channels.get(c) else {
                    continue;
                };
                let centers = table.get("RegionCenter").ok_or_else(|| GraphError::Precondition {
                    operator: self.name.clone(),
                    message: "region features lack RegionCenter".to_string(),
                })?;

                for row in centers.rows().into_iter().skip(1) {
                    if row.len() < spatial.len() || row.iter().any(|v| !v.is_finite()) {
                        continue;
                    }
                    let mut center = vec![0i64; meta.ndim()];
                    center[t_axis] = t as i64;
                    center[c_axis] = c as i64;
                    for (column, &axis) in spatial.iter().enumerate() {
                        center[axis] = row[column].trunc() as i64;
                    }
                    paint_cross(&mut result, region, &center, &spatial);
                    painted += 1;
                }
            }
        }
        trace!(operator = %self.name, %region, painted, "painted object centers");
        Ok(result)
    }
}
