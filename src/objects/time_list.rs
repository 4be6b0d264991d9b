use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::error::GraphError;
use crate::graph::{
    AxisTag, ElementKind, Execute, InputSlot, ListRoi, Meta, Operator, OutputSlot, Roi,
};

use super::features::FeatureTable;
use super::region_features::FeatureArray;

/// Feature tables by time step, one entry per channel in channel order.
pub type TimeMap = BTreeMap<usize, Vec<Arc<FeatureTable>>>;

/// Re-addresses a (t, c) feature array by lists of time steps.
///
/// The empty list requests every time step.
pub struct AdaptTimeListRoi {
    name: String,
    pub input: InputSlot<FeatureArray>,
    pub output: OutputSlot<TimeMap>,
}

impl AdaptTimeListRoi {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|this: &Weak<Self>| {
            let input = InputSlot::new(format!("{}.Input", name));
            let owner: Weak<dyn Operator> = this.clone();
            input.attach(owner, 0);

            let output = OutputSlot::new(format!("{}.Output", name));
            let exec: Weak<dyn Execute<TimeMap>> = this.clone();
            output.bind(exec, 0);

            Self {
                name,
                input,
                output,
            }
        })
    }
}

impl Operator for AdaptTimeListRoi {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup_outputs(&self) -> Result<(), GraphError> {
        let Some(meta) = self.input.meta() else {
            return self.output.clear_meta();
        };
        let t = meta.require_axis(AxisTag::T, &self.name)?;
        meta.require_axis(AxisTag::C, &self.name)?;
        self.output
            .set_meta(Meta::list(meta.shape[t], AxisTag::T, ElementKind::Object))
    }

    fn propagate_dirty(&self, _input: usize, roi: &Roi) {
        let Some(meta) = self.input.meta() else {
            return;
        };
        let Some(t) = meta.axistags.index_of(AxisTag::T) else {
            return;
        };
        match roi {
            Roi::Box(region) if t < region.ndim() => {
                let times: Vec<usize> = (region.start()[t]..region.stop()[t]).collect();
                if !times.is_empty() {
                    self.output.set_dirty(ListRoi::new(times));
                }
            }
            _ => self.output.set_dirty(ListRoi::all()),
        }
    }
}

#[async_trait]
impl Execute<TimeMap> for AdaptTimeListRoi {
    async fn execute(&self, _output: usize, roi: &Roi) -> Result<TimeMap, GraphError> {
        let list = roi.as_list(self.output.name())?;
        let meta = self.input.require_meta()?;
        let t_axis = meta.require_axis(AxisTag::T, &self.name)?;
        let c_axis = meta.require_axis(AxisTag::C, &self.name)?;
        let channels = meta.shape[c_axis];

        let mut result = TimeMap::new();
        for t in list.resolve(meta.shape[t_axis])? {
            let row = meta.full_region().with_axis(t_axis, t, t + 1);
            let cells = self.input.request(row).await?;

            let mut index = vec![0; meta.ndim()];
            let tables = (0..channels)
                .map(|c| {
                    index[c_axis] = c;
                    cells[&index[..]].clone()
                })
                .collect();
            result.insert(t, tables);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ArraySource, SubRegion};
    use crate::objects::extract_region_features;
    use ndarray::{Array3, ArrayD, IxDyn};

    fn tables(shape: &[usize]) -> ArrayD<Arc<FeatureTable>> {
        ArrayD::from_elem(IxDyn(shape), Arc::new(FeatureTable::default()))
    }

    fn adapter(shape: &[usize]) -> (Arc<ArraySource<Arc<FeatureTable>>>, Arc<AdaptTimeListRoi>) {
        let source = ArraySource::new("Features", tables(shape), "tc").unwrap();
        let op = AdaptTimeListRoi::new("Adapter");
        op.input.connect(source.output()).unwrap();
        (source, op)
    }

    #[tokio::test]
    async fn test_empty_list_means_all_times() {
        let (_source, op) = adapter(&[3, 2]);
        let meta = op.output.meta().unwrap();
        assert_eq!(meta.shape, vec![3]);

        let map = op.output.request(ListRoi::all()).await.unwrap();
        assert_eq!(map.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert!(map.values().all(|channels| channels.len() == 2));
    }

    /// Table holding `objects` single-voxel objects.
    fn table_with(objects: usize) -> Arc<FeatureTable> {
        let len = 2 * objects + 1;
        let raw = Array3::<f32>::zeros((len, 1, 1));
        let labels = Array3::from_shape_fn((len, 1, 1), |(x, _, _)| {
            if x % 2 == 1 {
                (x / 2 + 1) as u32
            } else {
                0
            }
        });
        let table = extract_region_features(raw.view(), labels.view(), &["Count".to_string()])
            .unwrap();
        Arc::new(table)
    }

    #[tokio::test]
    async fn test_channel_order_preserved() {
        // Cell (t, c) holds 3t + c + 1 objects.
        let cells = ArrayD::from_shape_fn(IxDyn(&[2, 3]), |ix| table_with(3 * ix[0] + ix[1] + 1));
        let source = ArraySource::new("Features", cells, "tc").unwrap();
        let op = AdaptTimeListRoi::new("Adapter");
        op.input.connect(source.output()).unwrap();

        let map = op.output.request(ListRoi::new(vec![1, 0])).await.unwrap();
        for (&t, channels) in &map {
            let counts: Vec<usize> = channels.iter().map(|table| table.object_count()).collect();
            assert_eq!(counts, vec![3 * t + 1, 3 * t + 2, 3 * t + 3]);
        }
        assert_eq!(map.len(), 2);
    }

    #[tokio::test]
    async fn test_selected_times() {
        let (source, op) = adapter(&[4, 1]);
        let map = op.output.request(ListRoi::new(vec![2, 0])).await.unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.contains_key(&2));
        assert_eq!(source.request_count(), 2);

        let err = op.output.request(ListRoi::new(vec![4])).await.unwrap_err();
        assert!(matches!(err, GraphError::Roi(_)));
        let err = op.output.request(SubRegion::full(&[4])).await.unwrap_err();
        assert!(matches!(err, GraphError::Roi(_)));
    }

    #[test]
    fn test_requires_time_and_channel_axes() {
        let source = ArraySource::new("Features", tables(&[3]), "t").unwrap();
        let op = AdaptTimeListRoi::new("Adapter");
        let err = op.input.connect(source.output()).unwrap_err();
        assert!(matches!(err, GraphError::MissingAxis { axis: 'c', .. }));
    }
}
