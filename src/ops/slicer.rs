use std::sync::{Arc, Weak};

use async_trait::async_trait;
use ndarray::ArrayD;

use crate::error::GraphError;
use crate::graph::{
    AxisTag, Element, Execute, InputSlot, MultiOutputSlot, Operator, OutputSlot, Roi,
};

/// Splits an array into one output per index along `axis`.
///
/// Each slice keeps the sliced axis with extent 1, so slices carry the same
/// axis tags as the input.
pub struct MultiArraySlicer<T> {
    name: String,
    axis: AxisTag,
    this: Weak<Self>,
    pub input: InputSlot<ArrayD<T>>,
    pub outputs: MultiOutputSlot<ArrayD<T>>,
}

impl<T: Element> MultiArraySlicer<T> {
    pub fn new(name: impl Into<String>, axis: AxisTag) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this: &Weak<Self>| {
            let input = InputSlot::new(format!("{}.Input", name));
            let owner: Weak<dyn Operator> = this.clone();
            input.attach(owner, 0);
            Self {
                outputs: MultiOutputSlot::new(format!("{}.Slices", name)),
                name,
                axis,
                this: this.clone(),
                input,
            }
        })
    }

    pub fn axis(&self) -> AxisTag {
        self.axis
    }

    /// Slice `index`, if it exists.
    pub fn slice(&self, index: usize) -> Option<OutputSlot<ArrayD<T>>> {
        self.outputs.get(index)
    }
}

impl<T: Element> Operator for MultiArraySlicer<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup_outputs(&self) -> Result<(), GraphError> {
        let Some(meta) = self.input.meta() else {
            for slot in self.outputs.slots() {
                slot.clear_meta()?;
            }
            return Ok(());
        };

        let axis = meta.require_axis(self.axis, &self.name)?;
        let this = self.this.clone();
        self.outputs.resize(meta.shape[axis], |slot, index| {
            let exec: Weak<dyn Execute<ArrayD<T>>> = this.clone();
            slot.bind(exec, index);
        });

        let slice_meta = meta.with_extent(self.axis, 1);
        for slot in self.outputs.slots() {
            slot.set_meta(slice_meta.clone())?;
        }
        Ok(())
    }

    fn propagate_dirty(&self, _input: usize, roi: &Roi) {
        let region = match roi {
            Roi::Box(region) => region,
            Roi::List(_) => {
                for slot in self.outputs.slots() {
                    if let Some(meta) = slot.meta() {
                        slot.set_dirty(meta.full_roi());
                    }
                }
                return;
            }
        };
        let Some(axis) = self.input.meta().and_then(|m| m.axistags.index_of(self.axis)) else {
            return;
        };
        if axis >= region.ndim() {
            return;
        }

        let slots = self.outputs.slots();
        let stop = region.stop()[axis].min(slots.len());
        for index in region.start()[axis]..stop {
            slots[index].set_dirty(region.with_axis(axis, 0, 1));
        }
    }
}

#[async_trait]
impl<T: Element> Execute<ArrayD<T>> for MultiArraySlicer<T> {
    async fn execute(&self, output: usize, roi: &Roi) -> Result<ArrayD<T>, GraphError> {
        let region = roi.as_box(&self.name)?;
        let meta = self.input.require_meta()?;
        let axis = meta.require_axis(self.axis, &self.name)?;
        let upstream = region.with_axis(
            axis,
            output + region.start()[axis],
            output + region.stop()[axis],
        );
        self.input.request(upstream).await
    }
}
