//! Per-label region statistics over a 3D volume.

use std::collections::BTreeMap;
use std::fmt;

use ndarray::{Array2, ArrayView3};

use crate::error::GraphError;

/// Features every object extraction computes, whatever else is configured.
pub const DEFAULT_FEATURES: [&str; 3] = ["RegionCenter", "Coord<Minimum>", "Coord<Maximum>"];

/// A region feature the extractor knows how to accumulate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Number of voxels
    Count,
    /// Sum of intensities
    Sum,
    /// Mean intensity
    Mean,
    /// Population variance of intensities
    Variance,
    /// Minimum intensity
    Minimum,
    /// Maximum intensity
    Maximum,
    /// Mean voxel coordinate
    RegionCenter,
    /// Lower corner of the bounding box
    CoordMinimum,
    /// Upper corner of the bounding box (inclusive)
    CoordMaximum,
}

impl Feature {
    pub const ALL: [Feature; 9] = [
        Feature::Count,
        Feature::Sum,
        Feature::Mean,
        Feature::Variance,
        Feature::Minimum,
        Feature::Maximum,
        Feature::RegionCenter,
        Feature::CoordMinimum,
        Feature::CoordMaximum,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Feature::Count => "Count",
            Feature::Sum => "Sum",
            Feature::Mean => "Mean",
            Feature::Variance => "Variance",
            Feature::Minimum => "Minimum",
            Feature::Maximum => "Maximum",
            Feature::RegionCenter => "RegionCenter",
            Feature::CoordMinimum => "Coord<Minimum>",
            Feature::CoordMaximum => "Coord<Maximum>",
        }
    }

    pub fn parse(name: &str) -> Result<Self, GraphError> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.name() == name)
            .ok_or_else(|| GraphError::UnknownFeature(name.to_string()))
    }

    /// Columns per label: 3 for coordinate features, 1 otherwise.
    pub fn columns(self) -> usize {
        match self {
            Feature::RegionCenter | Feature::CoordMinimum | Feature::CoordMaximum => 3,
            _ => 1,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Region features of one (t, c) cell.
///
/// Each feature maps to a `(max_label + 1) x columns` array. Row 0 belongs to
/// the background and is always zero.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    features: BTreeMap<String, Array2<f64>>,
    rows: usize,
}

impl FeatureTable {
    pub fn get(&self, name: &str) -> Option<&Array2<f64>> {
        self.features.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Array2<f64>)> {
        self.features.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Rows per feature, background row included.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of labels after the background row.
    pub fn object_count(&self) -> usize {
        self.rows.saturating_sub(1)
    }
}

#[derive(Clone)]
struct Accumulator {
    count: u64,
    sum: f64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    coord_sum: [f64; 3],
    coord_min: [usize; 3],
    coord_max: [usize; 3],
}

impl Default for Accumulator {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            coord_sum: [0.0; 3],
            coord_min: [usize::MAX; 3],
            coord_max: [0; 3],
        }
    }
}

impl Accumulator {
    fn push(&mut self, value: f64, coord: [usize; 3]) {
        self.count += 1;
        self.sum += value;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        for axis in 0..3 {
            self.coord_sum[axis] += coord[axis] as f64;
            self.coord_min[axis] = self.coord_min[axis].min(coord[axis]);
            self.coord_max[axis] = self.coord_max[axis].max(coord[axis]);
        }
    }

    /// Feature values for this label; NaN where the label has no voxels.
    fn values(&self, feature: Feature) -> Vec<f64> {
        let n = self.count as f64;
        let present = self.count > 0;
        let or_nan = |v: f64| if present { v } else { f64::NAN };
        match feature {
            Feature::Count => vec![n],
            Feature::Sum => vec![self.sum],
            Feature::Mean => vec![or_nan(self.mean)],
            Feature::Variance => vec![or_nan(self.m2 / n)],
            Feature::Minimum => vec![or_nan(self.min)],
            Feature::Maximum => vec![or_nan(self.max)],
            Feature::RegionCenter => self.coord_sum.iter().map(|s| or_nan(s / n)).collect(),
            Feature::CoordMinimum => self.coord_min.iter().map(|&c| or_nan(c as f64)).collect(),
            Feature::CoordMaximum => self.coord_max.iter().map(|&c| or_nan(c as f64)).collect(),
        }
    }
}

/// Compute `names` for every label of `labels`, ignoring label 0.
///
/// Coordinates follow the axis order of the volume. Unknown names fail
/// before any voxel is visited. Table rows are indexed by label value, so a
/// table has `max label + 1` rows; labels are expected to be consecutive as
/// [`LabelImage`](crate::ops::LabelImage) numbers them. Only labels that occur
/// are accumulated.
pub fn extract_region_features(
    raw: ArrayView3<'_, f32>,
    labels: ArrayView3<'_, u32>,
    names: &[String],
) -> Result<FeatureTable, GraphError> {
    let features = names
        .iter()
        .map(|n| Feature::parse(n))
        .collect::<Result<Vec<_>, _>>()?;
    if raw.shape() != labels.shape() {
        return Err(GraphError::Shape(format!(
            "raw volume {:?} and label volume {:?} differ",
            raw.shape(),
            labels.shape()
        )));
    }

    let mut accumulators: BTreeMap<u32, Accumulator> = BTreeMap::new();
    for ((x, y, z), &label) in labels.indexed_iter() {
        if label == 0 {
            continue;
        }
        accumulators
            .entry(label)
            .or_default()
            .push(raw[[x, y, z]] as f64, [x, y, z]);
    }
    let rows = accumulators.keys().next_back().map_or(0, |&l| l as usize) + 1;
    let absent = Accumulator::default();

    let mut table = FeatureTable {
        features: BTreeMap::new(),
        rows,
    };
    for feature in features {
        let mut values = Array2::<f64>::zeros((rows, feature.columns()));
        for label in 1..rows {
            let acc = accumulators.get(&(label as u32)).unwrap_or(&absent);
            for (column, value) in acc.values(feature).into_iter().enumerate() {
                values[[label, column]] = value;
            }
        }
        table.features.insert(feature.name().to_string(), values);
    }
    Ok(table)
}
