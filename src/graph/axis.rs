//! Axis tags, tagged shapes and slot metadata.
//!
//! Every array flowing through the graph is described by a [`Meta`]: its shape,
//! the semantic tag of each axis, the element kind and the kind of ROI used to
//! address it. Axis order is significant and always explicit: a [`TaggedShape`]
//! is an ordered list of `{tag, extent}` pairs rather than a map.

use std::fmt;
use std::sync::Arc;

use crate::error::GraphError;
use crate::objects::FeatureTable;

use super::roi::{ListRoi, Roi, RoiKind, SubRegion};

// =============================================================================
// Axis Tags
// =============================================================================

/// Semantic label of one array dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AxisTag {
    T,
    X,
    Y,
    Z,
    C,
}

impl AxisTag {
    /// Parse a single axis letter.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            't' => Some(AxisTag::T),
            'x' => Some(AxisTag::X),
            'y' => Some(AxisTag::Y),
            'z' => Some(AxisTag::Z),
            'c' => Some(AxisTag::C),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            AxisTag::T => 't',
            AxisTag::X => 'x',
            AxisTag::Y => 'y',
            AxisTag::Z => 'z',
            AxisTag::C => 'c',
        }
    }

    /// True for x, y and z.
    pub fn is_spatial(self) -> bool {
        matches!(self, AxisTag::X | AxisTag::Y | AxisTag::Z)
    }
}

impl fmt::Display for AxisTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Ordered sequence of distinct axis tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AxisTags(Vec<AxisTag>);

impl AxisTags {
    /// Build from a list of tags, rejecting duplicates.
    pub fn new(tags: Vec<AxisTag>) -> Result<Self, GraphError> {
        for (i, tag) in tags.iter().enumerate() {
            if tags[..i].contains(tag) {
                let text: String = tags.iter().map(|t| t.as_char()).collect();
                return Err(GraphError::InvalidAxisTags(text));
            }
        }
        Ok(Self(tags))
    }

    /// Parse a tag string such as `"txyzc"`.
    pub fn parse(text: &str) -> Result<Self, GraphError> {
        let tags = text
            .chars()
            .map(|c| AxisTag::from_char(c).ok_or_else(|| GraphError::InvalidAxisTags(text.into())))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(tags)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[AxisTag] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = AxisTag> + '_ {
        self.0.iter().copied()
    }

    /// Position of `tag`, if present.
    pub fn index_of(&self, tag: AxisTag) -> Option<usize> {
        self.0.iter().position(|t| *t == tag)
    }

    pub fn contains(&self, tag: AxisTag) -> bool {
        self.0.contains(&tag)
    }
}

impl fmt::Display for AxisTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for tag in &self.0 {
            write!(f, "{}", tag)?;
        }
        Ok(())
    }
}

// =============================================================================
// Tagged Shape
// =============================================================================

/// One axis of a tagged shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Axis {
    pub tag: AxisTag,
    pub extent: usize,
}

/// Ordered `{tag, extent}` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedShape(Vec<Axis>);

impl TaggedShape {
    pub fn axes(&self) -> &[Axis] {
        &self.0
    }

    /// Extent of the axis tagged `tag`.
    pub fn extent(&self, tag: AxisTag) -> Option<usize> {
        self.0.iter().find(|a| a.tag == tag).map(|a| a.extent)
    }

    pub fn index_of(&self, tag: AxisTag) -> Option<usize> {
        self.0.iter().position(|a| a.tag == tag)
    }

    /// Keep only the axes for which `keep` holds, preserving order.
    pub fn retain(&self, keep: impl Fn(AxisTag) -> bool) -> TaggedShape {
        TaggedShape(self.0.iter().copied().filter(|a| keep(a.tag)).collect())
    }

    /// Positions of the spatial axes, in axis order.
    pub fn spatial_indices(&self) -> Vec<usize> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, a)| a.tag.is_spatial())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn tags(&self) -> AxisTags {
        AxisTags(self.0.iter().map(|a| a.tag).collect())
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.iter().map(|a| a.extent).collect()
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Element type carried by a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    U8,
    U32,
    F32,
    /// Opaque records such as feature tables
    Object,
}

/// Rust element types that may fill a slot array.
pub trait Element: Clone + Send + Sync + 'static {
    const KIND: ElementKind;
}

impl Element for u8 {
    const KIND: ElementKind = ElementKind::U8;
}

impl Element for u32 {
    const KIND: ElementKind = ElementKind::U32;
}

impl Element for f32 {
    const KIND: ElementKind = ElementKind::F32;
}

impl Element for Arc<FeatureTable> {
    const KIND: ElementKind = ElementKind::Object;
}

/// Memory layout flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Row-major (last axis fastest)
    pub c_order: bool,
}

impl Default for Layout {
    fn default() -> Self {
        Self { c_order: true }
    }
}

/// Published description of a slot's data.
///
/// Invariant: `shape.len() == axistags.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Meta {
    pub shape: Vec<usize>,
    pub axistags: AxisTags,
    pub dtype: ElementKind,
    pub layout: Layout,
    pub roi_kind: RoiKind,
}

impl Meta {
    /// Metadata for a box-addressed array.
    pub fn new(shape: Vec<usize>, axistags: AxisTags, dtype: ElementKind) -> Result<Self, GraphError> {
        if shape.len() != axistags.len() {
            return Err(GraphError::Shape(format!(
                "shape {:?} does not match axis tags '{}'",
                shape, axistags
            )));
        }
        Ok(Self {
            shape,
            axistags,
            dtype,
            layout: Layout::default(),
            roi_kind: RoiKind::Box,
        })
    }

    /// Metadata for a list-addressed slot with `len` entries along `axis`.
    pub fn list(len: usize, axis: AxisTag, dtype: ElementKind) -> Self {
        Self {
            shape: vec![len],
            axistags: AxisTags(vec![axis]),
            dtype,
            layout: Layout::default(),
            roi_kind: RoiKind::List,
        }
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn tagged_shape(&self) -> TaggedShape {
        TaggedShape(
            self.axistags
                .iter()
                .zip(self.shape.iter())
                .map(|(tag, &extent)| Axis { tag, extent })
                .collect(),
        )
    }

    /// Same metadata with a different element kind.
    pub fn with_dtype(mut self, dtype: ElementKind) -> Self {
        self.dtype = dtype;
        self
    }

    /// Same metadata with a different shape along `tag`.
    pub fn with_extent(mut self, tag: AxisTag, extent: usize) -> Self {
        if let Some(i) = self.axistags.index_of(tag) {
            self.shape[i] = extent;
        }
        self
    }

    /// Box covering the whole array.
    pub fn full_region(&self) -> SubRegion {
        SubRegion::full(&self.shape)
    }

    /// ROI covering everything the slot can produce.
    pub fn full_roi(&self) -> Roi {
        match self.roi_kind {
            RoiKind::Box => Roi::Box(self.full_region()),
            RoiKind::List => Roi::List(ListRoi::all()),
        }
    }

    /// Index of `tag`, or a `MissingAxis` error naming `operator`.
    pub fn require_axis(&self, tag: AxisTag, operator: &str) -> Result<usize, GraphError> {
        self.axistags
            .index_of(tag)
            .ok_or_else(|| GraphError::MissingAxis {
                operator: operator.to_string(),
                axis: tag.as_char(),
            })
    }
}
