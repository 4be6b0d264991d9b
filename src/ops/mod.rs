//! General-purpose array operators.
//!
//! - [`MultiArraySlicer`]: one output per index along an axis
//! - [`MultiArrayStacker`]: concatenation of a list of inputs along an axis
//! - [`LabelImage`] / [`CachedLabelImage`]: connected-component labeling

mod labeling;
mod slicer;
mod stacker;

pub use labeling::{background_for, label_slab, CachedLabelImage, LabelImage};
pub use slicer::MultiArraySlicer;
pub use stacker::MultiArrayStacker;
