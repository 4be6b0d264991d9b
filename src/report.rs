//! JSON report of extracted region features.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::objects::TimeMap;

/// Features of one (time, channel) cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellReport {
    /// Time step
    pub time: usize,

    /// Channel index
    pub channel: usize,

    /// Number of labelled objects
    pub labels: usize,

    /// Feature name to one row per object, background excluded.
    /// Missing values serialize as `null`.
    pub features: BTreeMap<String, Vec<Vec<f64>>>,
}

/// Report printed by `objflow extract`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureReport {
    /// Number of time steps in the input
    pub frames: usize,

    /// One entry per reported (time, channel) cell, time-major
    pub features: Vec<CellReport>,
}

impl FeatureReport {
    pub fn from_time_map(frames: usize, map: &TimeMap) -> Self {
        let mut features = Vec::new();
        for (&time, channels) in map {
            for (channel, table) in channels.iter().enumerate() {
                let columns = table
                    .iter()
                    .map(|(name, values)| {
                        let rows = values
                            .rows()
                            .into_iter()
                            .skip(1)
                            .map(|row| row.to_vec())
                            .collect();
                        (name.to_string(), rows)
                    })
                    .collect();
                features.push(CellReport {
                    time,
                    channel,
                    labels: table.object_count(),
                    features: columns,
                });
            }
        }
        Self { frames, features }
    }

    /// Total object count over all cells.
    pub fn object_count(&self) -> usize {
        self.features.iter().map(|cell| cell.labels).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::extract_region_features;
    use ndarray::Array3;
    use std::sync::Arc;

    fn table() -> TimeMap {
        let mut raw = Array3::<f32>::zeros((4, 4, 1));
        let mut labels = Array3::<u32>::zeros((4, 4, 1));
        labels[[0, 0, 0]] = 1;
        labels[[3, 3, 0]] = 2;
        raw[[0, 0, 0]] = 10.0;
        raw[[3, 3, 0]] = 30.0;
        let table = extract_region_features(
            raw.view(),
            labels.view(),
            &["Count".to_string(), "Mean".to_string()],
        )
        .unwrap();
        TimeMap::from([(1, vec![Arc::new(table)])])
    }

    #[test]
    fn test_background_row_excluded() {
        let report = FeatureReport::from_time_map(2, &table());
        assert_eq!(report.frames, 2);
        assert_eq!(report.features.len(), 1);

        let cell = &report.features[0];
        assert_eq!((cell.time, cell.channel, cell.labels), (1, 0, 2));
        assert_eq!(cell.features["Count"], vec![vec![1.0], vec![1.0]]);
        assert_eq!(cell.features["Mean"], vec![vec![10.0], vec![30.0]]);
        assert_eq!(report.object_count(), 2);
    }

    #[test]
    fn test_json_shape() {
        let report = FeatureReport::from_time_map(2, &table());
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["frames"], 2);
        assert_eq!(json["features"][0]["time"], 1);
        assert_eq!(json["features"][0]["labels"], 2);
        assert_eq!(json["features"][0]["features"]["Mean"][1][0], 30.0);
    }

    #[test]
    fn test_empty_map() {
        let report = FeatureReport::from_time_map(0, &TimeMap::new());
        assert!(report.features.is_empty());
        assert_eq!(serde_json::to_string(&report).unwrap(), r#"{"frames":0,"features":[]}"#);
    }
}
