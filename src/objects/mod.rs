//! Object extraction.
//!
//! Turns a binary segmentation and its raw intensities into labelled objects
//! with per-object region features, addressable per time step, plus an
//! overlay marking every object center.
//!
//! - [`features`]: feature names and per-label accumulation over a 3D volume
//! - [`RegionFeatures3d`], [`RegionFeatures`], [`CachedRegionFeatures`]: the
//!   per-cell extractor, the sliced (t, c) pipeline around it, and its cached
//!   form
//! - [`AdaptTimeListRoi`]: time-list view of the (t, c) feature array
//! - [`ObjectCenterImage`]: center-marker overlay
//! - [`ObjectExtraction`]: the complete graph

pub mod features;

mod center_image;
mod extraction;
mod region_features;
mod time_list;

pub use center_image::{ObjectCenterImage, MARKER_VALUE};
pub use extraction::{feature_union, ObjectExtraction};
pub use features::{extract_region_features, Feature, FeatureTable, DEFAULT_FEATURES};
pub use region_features::{CachedRegionFeatures, FeatureArray, RegionFeatures, RegionFeatures3d};
pub use time_list::{AdaptTimeListRoi, TimeMap};
