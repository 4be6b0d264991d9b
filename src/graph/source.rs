//! In-memory array source.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use async_trait::async_trait;
use ndarray::ArrayD;
use tracing::debug;

use crate::error::GraphError;

use super::axis::{AxisTags, Element, Meta};
use super::operator::{Execute, Operator};
use super::roi::{Roi, SubRegion};
use super::slot::OutputSlot;
use super::{read, write};

/// Holds an array and serves sub-regions of it through [`ArraySource::output`].
///
/// Writes mark the touched region dirty so cached consumers recompute it.
pub struct ArraySource<T> {
    name: String,
    data: RwLock<ArrayD<T>>,
    output: OutputSlot<ArrayD<T>>,
    requests: AtomicUsize,
}

impl<T: Element> ArraySource<T> {
    /// Create a source holding `array` with axis tags such as `"txyzc"`.
    pub fn new(name: impl Into<String>, array: ArrayD<T>, tags: &str) -> Result<Arc<Self>, GraphError> {
        let name = name.into();
        let meta = Meta::new(array.shape().to_vec(), AxisTags::parse(tags)?, T::KIND)?;

        let source = Arc::new_cyclic(|this: &Weak<Self>| {
            let output = OutputSlot::new(format!("{}.Output", name));
            let op: Weak<dyn Execute<ArrayD<T>>> = this.clone();
            output.bind(op, 0);
            Self {
                name,
                data: RwLock::new(array),
                output,
                requests: AtomicUsize::new(0),
            }
        });
        source.output.set_meta(meta)?;
        Ok(source)
    }

    pub fn output(&self) -> &OutputSlot<ArrayD<T>> {
        &self.output
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> ArrayD<T> {
        read(&self.data).clone()
    }

    /// Number of execute calls served so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Overwrite `region` with `values` and mark it dirty.
    pub fn write(&self, region: &SubRegion, values: &ArrayD<T>) -> Result<(), GraphError> {
        {
            let mut data = write(&self.data);
            region.check_within(data.shape())?;
            if values.shape() != region.shape().as_slice() {
                return Err(GraphError::Shape(format!(
                    "cannot write {:?} values into region {}",
                    values.shape(),
                    region
                )));
            }
            region.view_mut(&mut *data).assign(values);
        }
        debug!(source = %self.name, %region, "write");
        self.output.set_dirty(region.clone());
        Ok(())
    }

    /// Swap in a new array, republishing metadata and dirtying everything.
    ///
    /// Downstream consumers are dirtied even when one of them rejects the new
    /// metadata, so no cache keeps serving the old contents.
    pub fn replace(&self, array: ArrayD<T>, tags: &str) -> Result<(), GraphError> {
        let meta = Meta::new(array.shape().to_vec(), AxisTags::parse(tags)?, T::KIND)?;
        let full = meta.full_roi();
        *write(&self.data) = array;
        let published = self.output.set_meta(meta);
        self.output.set_dirty(full);
        published
    }
}

impl<T: Element> Operator for ArraySource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup_outputs(&self) -> Result<(), GraphError> {
        Ok(())
    }

    fn propagate_dirty(&self, _input: usize, _roi: &Roi) {}
}

#[async_trait]
impl<T: Element> Execute<ArrayD<T>> for ArraySource<T> {
    async fn execute(&self, _output: usize, roi: &Roi) -> Result<ArrayD<T>, GraphError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let region = roi.as_box(self.output.name())?;
        let array = {
            let data = read(&self.data);
            region.view(&*data).to_owned()
        };
        Ok(array)
    }
}
