use std::sync::Weak;

use async_trait::async_trait;

use crate::error::GraphError;

use super::roi::Roi;
use super::slot::{SlotData, SlotListener};

/// A named computation unit with fixed input and output slots.
///
/// Operators are always held in an `Arc`; slots refer back to them weakly.
/// Input slots report to their owner through [`Operator::setup_outputs`] when
/// upstream metadata changes and through [`Operator::propagate_dirty`] when
/// upstream data goes stale.
pub trait Operator: Send + Sync {
    fn name(&self) -> &str;

    /// Re-derive output metadata from the current input metadata.
    ///
    /// Called whenever an input's metadata changes. Operators whose inputs are
    /// not all ready clear their outputs instead of failing.
    fn setup_outputs(&self) -> Result<(), GraphError>;

    /// Map a dirty region on input number `input` to the affected outputs.
    ///
    /// The mapping may over-approximate but must never miss a stale element.
    fn propagate_dirty(&self, input: usize, roi: &Roi);
}

/// Computes the data of one kind of output slot.
#[async_trait]
pub trait Execute<D: SlotData>: Operator {
    /// Produce the data of output number `output` covering exactly `roi`.
    async fn execute(&self, output: usize, roi: &Roi) -> Result<D, GraphError>;
}

/// Error for operators that only re-expose an internal sub-graph.
pub fn unreachable_execute(op: &dyn Operator) -> GraphError {
    GraphError::Unreachable {
        operator: op.name().to_string(),
    }
}

/// Routes slot notifications to the owning operator.
pub(crate) struct InputHook {
    pub(crate) op: Weak<dyn Operator>,
    pub(crate) index: usize,
}

impl SlotListener for InputHook {
    fn meta_changed(&self) -> Result<(), GraphError> {
        match self.op.upgrade() {
            Some(op) => op.setup_outputs(),
            None => Ok(()),
        }
    }

    fn dirty(&self, roi: &Roi) {
        if let Some(op) = self.op.upgrade() {
            op.propagate_dirty(self.index, roi);
        }
    }
}
