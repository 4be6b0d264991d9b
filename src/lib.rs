//! # objflow
//!
//! Lazy object extraction for 5D (time, x, y, z, channel) images.
//!
//! This library provides a demand-driven dataflow graph and the operators
//! needed to turn a binary segmentation into labelled objects with
//! per-object region features. Nothing is computed until a region of an
//! output is requested, and block caches keep what was computed until
//! upstream data changes.
//!
//! ## Features
//!
//! - **Lazy requests**: only the requested region, and the blocks it touches, are computed
//! - **Dirty propagation**: upstream changes invalidate exactly the affected downstream blocks
//! - **Slicing pipelines**: per-(t, c) operators are replicated automatically as shapes change
//! - **Object extraction**: labeling, region features and center overlays in one graph
//!
//! ## Architecture
//!
//! - [`graph`] - Slots, operators, regions of interest and the array source
//! - [`cache`] - Block cache operator with singleflight misses
//! - [`ops`] - Slicing, stacking and connected-component labeling
//! - [`objects`] - Region features, time-list adapter, center overlay, extraction
//! - [`imageio`] - Frame stacks on disk
//! - [`report`] - JSON feature report
//! - [`capability`] - Optional solver probing
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use ndarray::{ArrayD, IxDyn};
//! use objflow::{ArraySource, AxisTag, ElementKind, ListRoi, Meta, ObjectExtraction};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), objflow::GraphError> {
//!     let raw = ArraySource::new("Raw", ArrayD::<f32>::zeros(IxDyn(&[2, 32, 32, 1, 1])), "txyzc")?;
//!     let binary = ArraySource::new("Binary", ArrayD::<u8>::zeros(IxDyn(&[2, 32, 32, 1, 1])), "txyzc")?;
//!
//!     let extraction = ObjectExtraction::new(&["Count".to_string()])?;
//!     extraction.raw_image.connect(raw.output())?;
//!     extraction.binary_image.connect(binary.output())?;
//!     extraction
//!         .background_labels
//!         .set_value(vec![0], Meta::list(1, AxisTag::C, ElementKind::U8))?;
//!
//!     let features = extraction.region_features.request(ListRoi::all()).await?;
//!     println!("{} time steps", features.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod capability;
pub mod config;
pub mod error;
pub mod graph;
pub mod imageio;
pub mod objects;
pub mod ops;
pub mod report;

// Re-export commonly used types
pub use cache::{ArrayCache, BlockShape, CacheStats};
pub use capability::{probe_solver, SolverCapability};
pub use config::{CheckConfig, Cli, Command, ExtractConfig};
pub use error::{GraphError, LoadError, RoiError};
pub use graph::{
    ArraySource, AxisTag, AxisTags, ElementKind, Execute, InputSlot, Level, ListRoi, Meta,
    MultiInputSlot, MultiOutputSlot, Operator, OperatorWrapper, OutputSlot, Roi, SubRegion,
    TaggedShape,
};
pub use imageio::{load_frames, load_inputs, write_overlay_frames, FRAME_AXES};
pub use objects::{
    extract_region_features, AdaptTimeListRoi, CachedRegionFeatures, Feature, FeatureTable,
    ObjectCenterImage, ObjectExtraction, RegionFeatures, RegionFeatures3d, TimeMap,
    DEFAULT_FEATURES, MARKER_VALUE,
};
pub use ops::{CachedLabelImage, LabelImage, MultiArraySlicer, MultiArrayStacker};
pub use report::FeatureReport;
