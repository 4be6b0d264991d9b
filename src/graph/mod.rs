//! Lazy dataflow graph.
//!
//! Operators own typed input and output slots. Connecting an input to an
//! upstream output propagates metadata downstream immediately, but data is
//! only computed when somebody requests a region of an output slot. When
//! upstream data changes, dirty notices travel downstream so caches can drop
//! stale blocks.
//!
//! # Components
//!
//! - [`axis`]: axis tags, tagged shapes and slot metadata
//! - [`roi`]: box and list regions of interest
//! - [`slot`]: input and output slots, including level-1 multi-slots
//! - [`operator`]: the `Operator` and `Execute` traits
//! - [`wrapper`]: nested slot levels and operator replication
//! - [`source`]: an in-memory array that feeds the graph

pub mod axis;
pub mod operator;
pub mod roi;
pub mod slot;
pub mod source;
pub mod wrapper;

use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use axis::{Axis, AxisTag, AxisTags, Element, ElementKind, Layout, Meta, TaggedShape};
pub use operator::{unreachable_execute, Execute, Operator};
pub use roi::{ListRoi, Roi, RoiKind, SubRegion};
pub use slot::{InputSlot, MultiInputSlot, MultiOutputSlot, OutputSlot, SlotData};
pub use source::ArraySource;
pub use wrapper::{Level, OperatorWrapper};

// Graph state stays usable after a panic in another task.

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
