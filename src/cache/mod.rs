//! Block caching.
//!
//! [`ArrayCache`] is an operator that memoises its upstream output block by
//! block. It is placed wherever recomputation is expensive: after labeling
//! (one block per (t, c) slab) and after region-feature extraction (one block
//! per cell).

mod array_cache;

pub use array_cache::{ArrayCache, BlockShape, CacheStats};
