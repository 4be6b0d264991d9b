//! Test utilities for integration tests.
//!
//! This module provides instrumented operators and helper functions for
//! building small labelled volumes.

use async_trait::async_trait;
use ndarray::{ArrayD, IxDyn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use objflow::graph::{
    AxisTags, ElementKind, Execute, InputSlot, Meta, Operator, OutputSlot, Roi, SlotData,
    SubRegion,
};
use objflow::GraphError;

// =============================================================================
// Tracking Source
// =============================================================================

/// An upstream operator that counts and optionally delays or fails requests.
///
/// This is useful for verifying cache behavior and request patterns.
pub struct TrackingSource {
    name: String,
    data: ArrayD<f32>,
    pub output: OutputSlot<ArrayD<f32>>,
    calls: AtomicUsize,
    failures: AtomicUsize,
    delay: Duration,
    requests: Mutex<Vec<SubRegion>>,
}

impl TrackingSource {
    pub fn new(data: ArrayD<f32>, tags: &str) -> Arc<Self> {
        Self::with_delay(data, tags, Duration::ZERO)
    }

    /// Every request sleeps for `delay` before answering.
    pub fn with_delay(data: ArrayD<f32>, tags: &str, delay: Duration) -> Arc<Self> {
        let meta = Meta::new(
            data.shape().to_vec(),
            AxisTags::parse(tags).unwrap(),
            ElementKind::F32,
        )
        .unwrap();

        let source = Arc::new_cyclic(|this: &Weak<Self>| {
            let output = OutputSlot::new("Tracking.Output");
            let op: Weak<dyn Execute<ArrayD<f32>>> = this.clone();
            output.bind(op, 0);
            Self {
                name: "Tracking".to_string(),
                data,
                output,
                calls: AtomicUsize::new(0),
                failures: AtomicUsize::new(0),
                delay,
                requests: Mutex::new(Vec::new()),
            }
        });
        source.output.set_meta(meta).unwrap();
        source
    }

    /// Fail the next `count` requests.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<SubRegion> {
        self.requests.lock().unwrap().clone()
    }

    pub fn reset_tracking(&self) {
        self.calls.store(0, Ordering::SeqCst);
        self.requests.lock().unwrap().clear();
    }
}

impl Operator for TrackingSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup_outputs(&self) -> Result<(), GraphError> {
        Ok(())
    }

    fn propagate_dirty(&self, _input: usize, _roi: &Roi) {}
}

#[async_trait]
impl Execute<ArrayD<f32>> for TrackingSource {
    async fn execute(&self, _output: usize, roi: &Roi) -> Result<ArrayD<f32>, GraphError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let region = roi.as_box(self.output.name())?.clone();
        self.requests.lock().unwrap().push(region.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(GraphError::Precondition {
                operator: self.name.clone(),
                message: "injected failure".to_string(),
            });
        }

        Ok(region.view(&self.data).to_owned())
    }
}

// =============================================================================
// Dirty Probe
// =============================================================================

/// A sink that records every dirty notice reaching its input.
pub struct DirtyProbe<D> {
    pub input: InputSlot<D>,
    seen: Mutex<Vec<Roi>>,
}

impl<D: SlotData> DirtyProbe<D> {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this: &Weak<Self>| {
            let input = InputSlot::new("Probe.Input");
            let owner: Weak<dyn Operator> = this.clone();
            input.attach(owner, 0);
            Self {
                input,
                seen: Mutex::new(Vec::new()),
            }
        })
    }

    pub fn seen(&self) -> Vec<Roi> {
        self.seen.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }
}

impl<D: SlotData> Operator for DirtyProbe<D> {
    fn name(&self) -> &str {
        "Probe"
    }

    fn setup_outputs(&self) -> Result<(), GraphError> {
        Ok(())
    }

    fn propagate_dirty(&self, _input: usize, roi: &Roi) {
        self.seen.lock().unwrap().push(roi.clone());
    }
}

// =============================================================================
// Volume Helpers
// =============================================================================

/// Shape of the test volumes: 2 time steps of 16 x 16 x 5, one channel.
pub const VOLUME_SHAPE: [usize; 5] = [2, 16, 16, 5, 1];

/// A box of foreground voxels `[start, stop)` in x, y, z at time `t`.
pub struct Blob {
    pub t: usize,
    pub start: [usize; 3],
    pub stop: [usize; 3],
    pub intensity: f32,
}

impl Blob {
    pub fn volume(&self) -> usize {
        (0..3).map(|i| self.stop[i] - self.start[i]).product()
    }

    /// Mean voxel coordinate.
    pub fn center(&self) -> [f64; 3] {
        let mut center = [0.0; 3];
        for (i, c) in center.iter_mut().enumerate() {
            *c = (self.start[i] + self.stop[i] - 1) as f64 / 2.0;
        }
        center
    }

    fn region(&self) -> SubRegion {
        SubRegion::new(
            vec![self.t, self.start[0], self.start[1], self.start[2], 0],
            vec![self.t + 1, self.stop[0], self.stop[1], self.stop[2], 1],
        )
        .unwrap()
    }
}

/// Two objects at t = 0, one at t = 1. All crosses fit inside the volume.
pub fn blobs() -> Vec<Blob> {
    vec![
        Blob {
            t: 0,
            start: [2, 2, 1],
            stop: [5, 5, 3],
            intensity: 10.0,
        },
        Blob {
            t: 0,
            start: [10, 10, 1],
            stop: [12, 14, 4],
            intensity: 20.0,
        },
        Blob {
            t: 1,
            start: [6, 6, 2],
            stop: [9, 9, 3],
            intensity: 30.0,
        },
    ]
}

/// Raw intensities and binary mask for `blobs`.
pub fn volumes(blobs: &[Blob]) -> (ArrayD<f32>, ArrayD<u8>) {
    let mut raw = ArrayD::<f32>::zeros(IxDyn(&VOLUME_SHAPE));
    let mut binary = ArrayD::<u8>::zeros(IxDyn(&VOLUME_SHAPE));
    for blob in blobs {
        let region = blob.region();
        region.view_mut(&mut raw).fill(blob.intensity);
        region.view_mut(&mut binary).fill(1);
    }
    (raw, binary)
}

/// A ramp over `shape` so every element is distinct.
pub fn ramp(shape: &[usize]) -> ArrayD<f32> {
    let mut value = 0.0f32;
    ArrayD::from_shape_simple_fn(IxDyn(shape), || {
        value += 1.0;
        value
    })
}
