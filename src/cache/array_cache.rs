use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use lru::LruCache;
use ndarray::{ArrayD, IxDyn};
use tokio::sync::Notify;
use tracing::{debug, trace, warn};

use crate::error::{GraphError, RoiError};
use crate::graph::{
    lock, read, write, AxisTag, Element, Execute, InputSlot, Meta, Operator, OutputSlot, Roi,
    SubRegion,
};

/// How a cache partitions its array into blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockShape {
    /// One block per element
    Cells,
    /// One block per (t, c) slab spanning the full spatial extent
    PerTimeChannel,
    /// Explicit block extents, one per axis
    Fixed(Vec<usize>),
}

impl BlockShape {
    /// Concrete block extents for an array described by `meta`.
    pub fn resolve(&self, meta: &Meta, operator: &str) -> Result<Vec<usize>, GraphError> {
        match self {
            BlockShape::Cells => Ok(vec![1; meta.ndim()]),
            BlockShape::PerTimeChannel => Ok(meta
                .tagged_shape()
                .axes()
                .iter()
                .map(|a| match a.tag {
                    AxisTag::T | AxisTag::C => 1,
                    _ => a.extent.max(1),
                })
                .collect()),
            BlockShape::Fixed(shape) if shape.len() == meta.ndim() => {
                Ok(shape.iter().map(|&b| b.max(1)).collect())
            }
            BlockShape::Fixed(shape) => Err(GraphError::Precondition {
                operator: operator.to_string(),
                message: format!(
                    "block shape {:?} does not match {} axes",
                    shape,
                    meta.ndim()
                ),
            }),
        }
    }
}

/// Counters describing cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Blocks served from memory
    pub hits: u64,
    /// Blocks computed upstream
    pub misses: u64,
    /// Blocks currently resident
    pub blocks: usize,
}

enum Role {
    Leader(Arc<Notify>),
    Follower(Arc<Notify>),
}

/// Block cache operator.
///
/// Sits between an upstream output and its consumers. Requests are split
/// along a block grid; resident blocks are served from memory and only the
/// missing ones are requested upstream, one request per block.
///
/// Features:
/// - Singleflight: concurrent requests for the same missing block share one
///   upstream computation
/// - Failed computations are not cached; waiters retry
/// - Dirty notices drop overlapping blocks only
/// - Optional block capacity with LRU eviction
///
/// Results computed from data that went stale while they were in flight are
/// returned to their caller but never stored.
pub struct ArrayCache<T> {
    name: String,
    policy: BlockShape,
    pub input: InputSlot<ArrayD<T>>,
    pub output: OutputSlot<ArrayD<T>>,
    /// Metadata and resolved block extents of the current input
    grid: RwLock<Option<(Meta, Vec<usize>)>>,
    blocks: Mutex<LruCache<Vec<usize>, ArrayD<T>>>,
    in_flight: Mutex<HashMap<Vec<usize>, Arc<Notify>>>,
    epoch: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Element> ArrayCache<T> {
    /// Create an unbounded cache.
    pub fn new(name: impl Into<String>, policy: BlockShape) -> Arc<Self> {
        Self::with_capacity(name, policy, None)
    }

    /// Create a cache holding at most `capacity` blocks (unbounded for `None`
    /// or zero).
    pub fn with_capacity(
        name: impl Into<String>,
        policy: BlockShape,
        capacity: Option<usize>,
    ) -> Arc<Self> {
        let name = name.into();
        let blocks = match capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };

        Arc::new_cyclic(|this: &Weak<Self>| {
            let input = InputSlot::new(format!("{}.Input", name));
            let owner: Weak<dyn Operator> = this.clone();
            input.attach(owner, 0);

            let output = OutputSlot::new(format!("{}.Output", name));
            let exec: Weak<dyn Execute<ArrayD<T>>> = this.clone();
            output.bind(exec, 0);

            Self {
                name,
                policy,
                input,
                output,
                grid: RwLock::new(None),
                blocks: Mutex::new(blocks),
                in_flight: Mutex::new(HashMap::new()),
                epoch: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            blocks: lock(&self.blocks).len(),
        }
    }

    /// Drop every resident block.
    pub fn reset(&self) {
        let dropped = {
            let mut blocks = lock(&self.blocks);
            self.epoch.fetch_add(1, Ordering::SeqCst);
            let dropped = blocks.len();
            blocks.clear();
            dropped
        };
        debug!(cache = %self.name, dropped, "cache reset");
    }

    /// Get a block from memory or compute it upstream.
    async fn get_block(&self, index: &[usize], bounds: &SubRegion) -> Result<ArrayD<T>, GraphError> {
        loop {
            let cached = lock(&self.blocks).get(index).cloned();
            if let Some(data) = cached {
                self.hits.fetch_add(1, Ordering::Relaxed);
                trace!(cache = %self.name, block = ?index, "hit");
                return Ok(data);
            }

            let role = {
                let mut in_flight = lock(&self.in_flight);
                if let Some(data) = lock(&self.blocks).get(index).cloned() {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(data);
                }
                match in_flight.get(index) {
                    Some(notify) => Role::Follower(Arc::clone(notify)),
                    None => {
                        let notify = Arc::new(Notify::new());
                        in_flight.insert(index.to_vec(), Arc::clone(&notify));
                        Role::Leader(notify)
                    }
                }
            };

            match role {
                Role::Follower(notify) => {
                    // Register before re-checking so a completion in between
                    // is not missed.
                    let notified = notify.notified();
                    let running = lock(&self.in_flight)
                        .get(index)
                        .is_some_and(|n| Arc::ptr_eq(n, &notify));
                    if running {
                        notified.await;
                    }
                }
                Role::Leader(notify) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    debug!(cache = %self.name, block = ?index, %bounds, "miss");

                    let epoch = self.epoch.load(Ordering::SeqCst);
                    let result = self.input.request(bounds.clone()).await;

                    {
                        let mut in_flight = lock(&self.in_flight);
                        if let Ok(data) = &result {
                            let mut blocks = lock(&self.blocks);
                            if self.epoch.load(Ordering::SeqCst) == epoch {
                                blocks.put(index.to_vec(), data.clone());
                            } else {
                                debug!(cache = %self.name, block = ?index, "discarding stale block");
                            }
                        }
                        in_flight.remove(index);
                    }
                    notify.notify_waiters();

                    if let Err(err) = &result {
                        warn!(cache = %self.name, block = ?index, error = %err, "block computation failed");
                    }
                    return result;
                }
            }
        }
    }
}

/// Block-grid coordinates of every block overlapping `region`.
fn block_range(region: &SubRegion, block: &[usize]) -> Result<SubRegion, RoiError> {
    let start = region.start().iter().zip(block).map(|(s, b)| s / b).collect();
    let stop = region
        .stop()
        .iter()
        .zip(block)
        .map(|(s, b)| s.div_ceil(*b))
        .collect();
    SubRegion::new(start, stop)
}

/// Array region covered by block `index`, clipped to `shape`.
fn block_bounds(index: &[usize], block: &[usize], shape: &[usize]) -> Result<SubRegion, RoiError> {
    let start = index
        .iter()
        .zip(block)
        .zip(shape)
        .map(|((i, b), e)| (i * b).min(*e))
        .collect();
    let stop = index
        .iter()
        .zip(block)
        .zip(shape)
        .map(|((i, b), e)| ((i + 1) * b).min(*e))
        .collect();
    SubRegion::new(start, stop)
}

impl<T: Element> Operator for ArrayCache<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup_outputs(&self) -> Result<(), GraphError> {
        let Some(meta) = self.input.meta() else {
            *write(&self.grid) = None;
            self.reset();
            return self.output.clear_meta();
        };

        let block = self.policy.resolve(&meta, &self.name)?;
        let next = Some((meta.clone(), block));
        let changed = {
            let mut grid = write(&self.grid);
            if *grid != next {
                *grid = next;
                true
            } else {
                false
            }
        };
        if changed {
            self.reset();
        }
        self.output.set_meta(meta)
    }

    fn propagate_dirty(&self, _input: usize, roi: &Roi) {
        let region = match roi {
            Roi::Box(region) => region,
            Roi::List(_) => {
                self.reset();
                self.output.set_dirty(roi.clone());
                return;
            }
        };

        let grid = read(&self.grid).clone();
        if let Some((meta, block)) = grid {
            let dropped = {
                let mut blocks = lock(&self.blocks);
                self.epoch.fetch_add(1, Ordering::SeqCst);
                let stale: Vec<Vec<usize>> = blocks
                    .iter()
                    .filter(|(index, _)| {
                        block_bounds(index, &block, &meta.shape)
                            .map_or(true, |bounds| bounds.overlaps(region))
                    })
                    .map(|(index, _)| index.clone())
                    .collect();
                for index in &stale {
                    blocks.pop(index);
                }
                stale.len()
            };
            trace!(cache = %self.name, %region, dropped, "dirty");
        }
        self.output.set_dirty(region.clone());
    }
}

#[async_trait]
impl<T: Element> Execute<ArrayD<T>> for ArrayCache<T> {
    async fn execute(&self, _output: usize, roi: &Roi) -> Result<ArrayD<T>, GraphError> {
        let region = roi.as_box(self.output.name())?;
        let (meta, block) = read(&self.grid).clone().ok_or_else(|| GraphError::NotReady {
            slot: self.input.name().to_string(),
        })?;

        if region.is_empty() {
            return Ok(ArrayD::from_shape_vec(IxDyn(&region.shape()), Vec::new())?);
        }

        let grid = block_range(region, &block)?;
        let mut result: Option<ArrayD<T>> = None;
        for index in grid.points() {
            let bounds = block_bounds(&index, &block, &meta.shape)?;
            let data = self.get_block(&index, &bounds).await?;
            let Some(overlap) = bounds.intersect(region) else {
                continue;
            };

            if result.is_none() {
                result = data
                    .first()
                    .map(|first| ArrayD::from_elem(IxDyn(&region.shape()), first.clone()));
            }
            if let Some(out) = result.as_mut() {
                overlap
                    .relative_to(region.start())
                    .view_mut(out)
                    .assign(&overlap.relative_to(bounds.start()).view(&data));
            }
        }

        result.ok_or_else(|| GraphError::Shape(format!("no block data covers {}", region)))
    }
}
