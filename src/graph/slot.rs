//! Input and output slots.
//!
//! An [`OutputSlot`] publishes metadata and produces data on request. Its data
//! comes from one of three providers: an operator bound to it, a constant
//! value, or another output slot it forwards. An [`InputSlot`] is a thin
//! wrapper around a forwarding output slot (its "face"): connecting an input
//! makes the face forward the upstream output, so operators nested inside a
//! composite can connect directly to the composite's inputs.
//!
//! Notifications travel downstream synchronously through listener lists that
//! hold weak references, so dropping an operator silently detaches it.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::{debug, trace};

use crate::error::{GraphError, RoiError};

use super::axis::Meta;
use super::operator::{Execute, InputHook, Operator};
use super::roi::{Roi, RoiKind};
use super::wrapper::Level;
use super::{lock, read, write};

/// Anything that can travel through a slot.
pub trait SlotData: Clone + Send + Sync + 'static {}

impl<D: Clone + Send + Sync + 'static> SlotData for D {}

/// Receiver of slot notifications.
pub(crate) trait SlotListener: Send + Sync {
    fn meta_changed(&self) -> Result<(), GraphError>;
    fn dirty(&self, roi: &Roi);
}

type SlotFuture<'a, D> = Pin<Box<dyn Future<Output = Result<D, GraphError>> + Send + 'a>>;

// =============================================================================
// Output Slot
// =============================================================================

#[derive(Clone)]
enum Provider<D> {
    Unbound,
    Value(D),
    Operator {
        op: Weak<dyn Execute<D>>,
        index: usize,
    },
    Forward(OutputSlot<D>),
}

struct OutputInner<D> {
    name: String,
    meta: RwLock<Option<Meta>>,
    provider: RwLock<Provider<D>>,
    listeners: Mutex<Vec<Weak<dyn SlotListener>>>,
}

/// A declared output of an operator, or the face of an input slot.
///
/// Cloning yields another handle to the same slot.
pub struct OutputSlot<D> {
    inner: Arc<OutputInner<D>>,
}

impl<D> Clone for OutputSlot<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<D: SlotData> OutputSlot<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(OutputInner {
                name: name.into(),
                meta: RwLock::new(None),
                provider: RwLock::new(Provider::Unbound),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Currently published metadata. Never triggers computation.
    pub fn meta(&self) -> Option<Meta> {
        read(&self.inner.meta).clone()
    }

    pub fn require_meta(&self) -> Result<Meta, GraphError> {
        self.meta().ok_or_else(|| GraphError::NotReady {
            slot: self.inner.name.clone(),
        })
    }

    pub fn is_ready(&self) -> bool {
        read(&self.inner.meta).is_some()
    }

    /// Publish metadata and cascade it downstream.
    ///
    /// Publishing metadata equal to the current one is a no-op. The cascade
    /// always reaches every listener; the first setup error is returned.
    pub fn set_meta(&self, meta: Meta) -> Result<(), GraphError> {
        self.inner.publish(Some(meta))
    }

    /// Withdraw metadata; downstream slots become unready.
    pub fn clear_meta(&self) -> Result<(), GraphError> {
        self.inner.publish(None)
    }

    /// Let output number `index` of `op` produce this slot's data.
    pub fn bind(&self, op: Weak<dyn Execute<D>>, index: usize) {
        self.detach();
        *write(&self.inner.provider) = Provider::Operator { op, index };
    }

    /// Re-expose `source`: metadata, dirtiness and requests pass through.
    pub fn forward(&self, source: &OutputSlot<D>) -> Result<(), GraphError> {
        self.detach();
        *write(&self.inner.provider) = Provider::Forward(source.clone());
        source.add_listener(self.listener_handle());
        let published = self.inner.publish(source.meta());
        if let Some(meta) = self.meta() {
            self.inner.notify_dirty(&meta.full_roi());
        }
        published
    }

    /// Serve a constant value for every request.
    pub fn set_value(&self, value: D, meta: Meta) -> Result<(), GraphError> {
        self.detach();
        *write(&self.inner.provider) = Provider::Value(value);
        let full = meta.full_roi();
        let published = self.inner.publish(Some(meta));
        self.inner.notify_dirty(&full);
        published
    }

    /// Mark `roi` stale for every downstream consumer.
    pub fn set_dirty(&self, roi: impl Into<Roi>) {
        let roi = roi.into();
        trace!(slot = %self.inner.name, %roi, "dirty");
        self.inner.notify_dirty(&roi);
    }

    /// Produce the data covering `roi`.
    ///
    /// Fails when the slot is unready, when `roi` has the wrong form or lies
    /// outside the published shape, or when the provider fails.
    pub async fn request(&self, roi: impl Into<Roi>) -> Result<D, GraphError> {
        self.request_roi(roi.into()).await
    }

    fn request_roi(&self, roi: Roi) -> SlotFuture<'_, D> {
        Box::pin(async move {
            let meta = self.require_meta()?;
            check_roi(&self.inner.name, &meta, &roi)?;
            trace!(slot = %self.inner.name, %roi, "request");

            let provider = read(&self.inner.provider).clone();
            match provider {
                Provider::Unbound => Err(GraphError::Unbound {
                    slot: self.inner.name.clone(),
                }),
                Provider::Value(value) => Ok(value),
                Provider::Operator { op, index } => {
                    let op = op.upgrade().ok_or_else(|| GraphError::Unbound {
                        slot: self.inner.name.clone(),
                    })?;
                    op.execute(index, &roi).await
                }
                Provider::Forward(source) => source.request_roi(roi).await,
            }
        })
    }

    /// Drop the current provider, unsubscribing from a forwarded source.
    fn detach(&self) {
        let previous = std::mem::replace(&mut *write(&self.inner.provider), Provider::Unbound);
        if let Provider::Forward(source) = previous {
            source.remove_listener(&self.listener_handle());
        }
    }

    fn listener_handle(&self) -> Weak<dyn SlotListener> {
        let weak: Weak<OutputInner<D>> = Arc::downgrade(&self.inner);
        weak
    }

    pub(crate) fn add_listener(&self, listener: Weak<dyn SlotListener>) {
        lock(&self.inner.listeners).push(listener);
    }

    fn remove_listener(&self, listener: &Weak<dyn SlotListener>) {
        lock(&self.inner.listeners).retain(|l| !l.ptr_eq(listener));
    }
}

impl<D: SlotData> OutputInner<D> {
    fn publish(&self, meta: Option<Meta>) -> Result<(), GraphError> {
        {
            let mut current = write(&self.meta);
            if *current == meta {
                return Ok(());
            }
            *current = meta;
        }
        // Every listener sees the change even when an earlier one rejects it.
        let mut first_error = None;
        for listener in self.live_listeners() {
            if let Err(err) = listener.meta_changed() {
                debug!(slot = %self.name, error = %err, "metadata rejected downstream");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn notify_dirty(&self, roi: &Roi) {
        for listener in self.live_listeners() {
            listener.dirty(roi);
        }
    }

    fn live_listeners(&self) -> Vec<Arc<dyn SlotListener>> {
        let mut listeners = lock(&self.listeners);
        listeners.retain(|l| l.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }
}

impl<D: SlotData> SlotListener for OutputInner<D> {
    fn meta_changed(&self) -> Result<(), GraphError> {
        let source = match &*read(&self.provider) {
            Provider::Forward(source) => source.clone(),
            _ => return Ok(()),
        };
        self.publish(source.meta())
    }

    fn dirty(&self, roi: &Roi) {
        self.notify_dirty(roi);
    }
}

fn check_roi(slot: &str, meta: &Meta, roi: &Roi) -> Result<(), RoiError> {
    match (meta.roi_kind, roi) {
        (RoiKind::Box, Roi::Box(region)) => region.check_within(&meta.shape),
        (RoiKind::List, Roi::List(list)) => list
            .resolve(meta.shape.first().copied().unwrap_or(0))
            .map(|_| ()),
        (kind, _) => Err(RoiError::WrongKind {
            slot: slot.to_string(),
            expected: kind.as_str(),
        }),
    }
}

// =============================================================================
// Input Slot
// =============================================================================

/// A declared input of an operator. Connects to at most one upstream output.
pub struct InputSlot<D> {
    face: OutputSlot<D>,
    hook: Mutex<Option<Arc<InputHook>>>,
}

impl<D: SlotData> InputSlot<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            face: OutputSlot::new(name),
            hook: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        self.face.name()
    }

    pub fn meta(&self) -> Option<Meta> {
        self.face.meta()
    }

    pub fn require_meta(&self) -> Result<Meta, GraphError> {
        self.face.require_meta()
    }

    pub fn is_ready(&self) -> bool {
        self.face.is_ready()
    }

    /// The output view of this input, for operators nested in a composite.
    pub fn as_output(&self) -> &OutputSlot<D> {
        &self.face
    }

    /// Bind to `upstream`, replacing any previous connection.
    ///
    /// Metadata propagation runs before this returns; a setup error anywhere
    /// downstream is returned here.
    pub fn connect(&self, upstream: &OutputSlot<D>) -> Result<(), GraphError> {
        debug!(input = %self.name(), output = %upstream.name(), "connect");
        self.face.forward(upstream)
    }

    /// Bind to a constant value.
    pub fn set_value(&self, value: D, meta: Meta) -> Result<(), GraphError> {
        self.face.set_value(value, meta)
    }

    pub fn disconnect(&self) -> Result<(), GraphError> {
        self.face.detach();
        self.face.clear_meta()
    }

    pub async fn request(&self, roi: impl Into<Roi>) -> Result<D, GraphError> {
        self.face.request(roi).await
    }

    /// Report metadata changes and dirtiness to input number `index` of `op`.
    pub fn attach(&self, op: Weak<dyn Operator>, index: usize) {
        let hook = Arc::new(InputHook { op, index });
        let weak: Weak<InputHook> = Arc::downgrade(&hook);
        self.face.add_listener(weak);
        *lock(&self.hook) = Some(hook);
    }
}

// =============================================================================
// Level-1 Slots
// =============================================================================

/// An ordered list of scalar output slots (nesting level 1).
pub struct MultiOutputSlot<D> {
    name: String,
    slots: RwLock<Vec<OutputSlot<D>>>,
}

impl<D: SlotData> MultiOutputSlot<D> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        read(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<OutputSlot<D>> {
        read(&self.slots).get(index).cloned()
    }

    pub fn slots(&self) -> Vec<OutputSlot<D>> {
        read(&self.slots).clone()
    }

    /// The sub-slots as a depth-1 [`Level`].
    pub fn as_level(&self) -> Level<OutputSlot<D>> {
        Level::List(self.slots().into_iter().map(Level::Scalar).collect())
    }

    /// Grow or shrink to `len` sub-slots; `bind` is called for each new one.
    ///
    /// Existing sub-slots below `len` are kept, so their connections survive.
    pub fn resize(&self, len: usize, mut bind: impl FnMut(&OutputSlot<D>, usize)) {
        let mut slots = write(&self.slots);
        slots.truncate(len);
        while slots.len() < len {
            let index = slots.len();
            let slot = OutputSlot::new(format!("{}[{}]", self.name, index));
            bind(&slot, index);
            slots.push(slot);
        }
    }
}

/// An ordered list of scalar input slots (nesting level 1).
pub struct MultiInputSlot<D> {
    name: String,
    owner: Mutex<Option<Weak<dyn Operator>>>,
    slots: RwLock<Vec<Arc<InputSlot<D>>>>,
}

impl<D: SlotData> MultiInputSlot<D> {
    pub const LEVEL: usize = 1;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: Mutex::new(None),
            slots: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sub-slot `i` reports to `op` as input number `i`.
    pub fn attach(&self, op: Weak<dyn Operator>) {
        *lock(&self.owner) = Some(op);
    }

    pub fn len(&self) -> usize {
        read(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slots(&self) -> Vec<Arc<InputSlot<D>>> {
        read(&self.slots).clone()
    }

    /// Metadata of every sub-slot, or `None` while any is unready.
    pub fn metas(&self) -> Option<Vec<Meta>> {
        read(&self.slots).iter().map(|s| s.meta()).collect()
    }

    /// Connect one sub-slot per leaf of a depth-1 `upstream`.
    pub fn connect(&self, upstream: &Level<OutputSlot<D>>) -> Result<(), GraphError> {
        let leaves = upstream
            .scalars()
            .ok_or_else(|| GraphError::LevelMismatch {
                input: self.name.clone(),
                input_level: Self::LEVEL,
                output: format!("{} slot(s)", upstream.leaves().len()),
                output_level: upstream.depth(),
            })?;

        let owner = lock(&self.owner).clone();
        let slots: Vec<Arc<InputSlot<D>>> = (0..leaves.len())
            .map(|i| {
                let slot = Arc::new(InputSlot::new(format!("{}[{}]", self.name, i)));
                if let Some(op) = &owner {
                    slot.attach(op.clone(), i);
                }
                slot
            })
            .collect();
        *write(&self.slots) = slots.clone();

        let mut first_error = None;
        for (slot, source) in slots.iter().zip(leaves) {
            if let Err(err) = slot.connect(source) {
                first_error.get_or_insert(err);
            }
        }
        if let Some(err) = first_error {
            return Err(err);
        }

        if slots.is_empty() {
            if let Some(op) = owner.and_then(|w| w.upgrade()) {
                op.setup_outputs()?;
            }
        }
        Ok(())
    }
}
