use std::sync::{Arc, Weak};

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};

use crate::error::GraphError;
use crate::graph::{
    AxisTag, Element, Execute, Meta, MultiInputSlot, Operator, OutputSlot, Roi,
};

/// Concatenates a list of arrays along `axis`, in input order.
///
/// All inputs must share axis tags and agree on every extent except the
/// stacking axis.
pub struct MultiArrayStacker<T> {
    name: String,
    axis: AxisTag,
    pub images: MultiInputSlot<ArrayD<T>>,
    pub output: OutputSlot<ArrayD<T>>,
}

impl<T: Element> MultiArrayStacker<T> {
    pub fn new(name: impl Into<String>, axis: AxisTag) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this: &Weak<Self>| {
            let images = MultiInputSlot::new(format!("{}.Images", name));
            let owner: Weak<dyn Operator> = this.clone();
            images.attach(owner);

            let output = OutputSlot::new(format!("{}.Output", name));
            let exec: Weak<dyn Execute<ArrayD<T>>> = this.clone();
            output.bind(exec, 0);

            Self {
                name,
                axis,
                images,
                output,
            }
        })
    }

    fn precondition(&self, message: String) -> GraphError {
        GraphError::Precondition {
            operator: self.name.clone(),
            message,
        }
    }

    /// Offset of input `input` along the stacking axis.
    fn offset_of(&self, metas: &[Meta], axis: usize, input: usize) -> usize {
        metas.iter().take(input).map(|m| m.shape[axis]).sum()
    }
}

impl<T: Element> Operator for MultiArrayStacker<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup_outputs(&self) -> Result<(), GraphError> {
        let Some(metas) = self.images.metas() else {
            return self.output.clear_meta();
        };
        let Some(first) = metas.first() else {
            return self.output.clear_meta();
        };

        let axis = first.require_axis(self.axis, &self.name)?;
        for (i, meta) in metas.iter().enumerate().skip(1) {
            if meta.axistags != first.axistags {
                return Err(self.precondition(format!(
                    "input {} has axes '{}', expected '{}'",
                    i, meta.axistags, first.axistags
                )));
            }
            let agrees = meta
                .shape
                .iter()
                .zip(first.shape.iter())
                .enumerate()
                .all(|(a, (x, y))| a == axis || x == y);
            if !agrees {
                return Err(self.precondition(format!(
                    "input {} has shape {:?}, incompatible with {:?}",
                    i, meta.shape, first.shape
                )));
            }
        }

        let total = metas.iter().map(|m| m.shape[axis]).sum();
        self.output.set_meta(first.clone().with_extent(self.axis, total))
    }

    fn propagate_dirty(&self, input: usize, roi: &Roi) {
        let Some(meta) = self.output.meta() else {
            return;
        };
        let region = match roi {
            Roi::Box(region) => region,
            Roi::List(_) => {
                self.output.set_dirty(meta.full_roi());
                return;
            }
        };
        let (Some(metas), Some(axis)) = (self.images.metas(), meta.axistags.index_of(self.axis))
        else {
            return;
        };
        if axis >= region.ndim() {
            return;
        }

        let offset = self.offset_of(&metas, axis, input);
        self.output.set_dirty(region.with_axis(
            axis,
            region.start()[axis] + offset,
            region.stop()[axis] + offset,
        ));
    }
}

#[async_trait]
impl<T: Element> Execute<ArrayD<T>> for MultiArrayStacker<T> {
    async fn execute(&self, _output: usize, roi: &Roi) -> Result<ArrayD<T>, GraphError> {
        let region = roi.as_box(self.output.name())?;
        let meta = self.output.require_meta()?;
        let axis = meta.require_axis(self.axis, &self.name)?;
        let metas = self.images.metas().ok_or_else(|| GraphError::NotReady {
            slot: self.images.name().to_string(),
        })?;

        let mut parts = Vec::new();
        let mut offset = 0;
        for (slot, input_meta) in self.images.slots().iter().zip(&metas) {
            let len = input_meta.shape[axis];
            let lo = region.start()[axis].max(offset);
            let hi = region.stop()[axis].min(offset + len);
            if lo < hi {
                let part = slot
                    .request(region.with_axis(axis, lo - offset, hi - offset))
                    .await?;
                parts.push(part);
            }
            offset += len;
        }

        if parts.is_empty() {
            return Ok(ArrayD::from_shape_vec(IxDyn(&region.shape()), Vec::new())?);
        }
        let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
        Ok(ndarray::concatenate(ndarray::Axis(axis), &views)?)
    }
}
