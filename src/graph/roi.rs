//! Regions of interest.
//!
//! Two addressing modes exist:
//!
//! - [`SubRegion`]: a half-open hyper-rectangle `[start, stop)` over every axis
//! - [`ListRoi`]: an explicit list of indices along one axis (time steps),
//!   where the empty list stands for "every valid index"

use std::fmt;

use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, Slice};

use crate::error::RoiError;

/// Which ROI form a slot is addressed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoiKind {
    Box,
    List,
}

impl RoiKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RoiKind::Box => "box",
            RoiKind::List => "list",
        }
    }
}

impl fmt::Display for RoiKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Box ROI
// =============================================================================

/// Half-open box `[start, stop)`.
///
/// Invariant: `start.len() == stop.len()` and `start[i] <= stop[i]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubRegion {
    start: Vec<usize>,
    stop: Vec<usize>,
}

impl SubRegion {
    pub fn new(start: Vec<usize>, stop: Vec<usize>) -> Result<Self, RoiError> {
        if start.len() != stop.len() {
            return Err(RoiError::LengthMismatch {
                start: start.len(),
                stop: stop.len(),
            });
        }
        for (axis, (&a, &b)) in start.iter().zip(stop.iter()).enumerate() {
            if a > b {
                return Err(RoiError::Inverted {
                    axis,
                    start: a,
                    stop: b,
                });
            }
        }
        Ok(Self { start, stop })
    }

    /// Box covering an entire array of the given shape.
    pub fn full(shape: &[usize]) -> Self {
        Self {
            start: vec![0; shape.len()],
            stop: shape.to_vec(),
        }
    }

    pub fn start(&self) -> &[usize] {
        &self.start
    }

    pub fn stop(&self) -> &[usize] {
        &self.stop
    }

    pub fn ndim(&self) -> usize {
        self.start.len()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.start
            .iter()
            .zip(self.stop.iter())
            .map(|(a, b)| b - a)
            .collect()
    }

    /// Number of elements covered.
    pub fn volume(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.volume() == 0
    }

    /// Check that the box lies within an array of `shape`.
    pub fn check_within(&self, shape: &[usize]) -> Result<(), RoiError> {
        if self.ndim() != shape.len() {
            return Err(RoiError::DimensionMismatch {
                roi: self.ndim(),
                shape: shape.len(),
            });
        }
        for (axis, (&stop, &extent)) in self.stop.iter().zip(shape.iter()).enumerate() {
            if stop > extent {
                return Err(RoiError::OutOfBounds { axis, stop, extent });
            }
        }
        Ok(())
    }

    /// Overlap with `other`, or `None` when they share no element.
    pub fn intersect(&self, other: &SubRegion) -> Option<SubRegion> {
        if self.ndim() != other.ndim() {
            return None;
        }
        let start: Vec<usize> = self
            .start
            .iter()
            .zip(other.start.iter())
            .map(|(a, b)| *a.max(b))
            .collect();
        let stop: Vec<usize> = self
            .stop
            .iter()
            .zip(other.stop.iter())
            .map(|(a, b)| *a.min(b))
            .collect();
        if start.iter().zip(stop.iter()).any(|(a, b)| a >= b) {
            return None;
        }
        Some(SubRegion { start, stop })
    }

    pub fn overlaps(&self, other: &SubRegion) -> bool {
        self.intersect(other).is_some()
    }

    /// True when the signed point lies inside the box.
    pub fn contains_point(&self, point: &[i64]) -> bool {
        point.len() == self.ndim()
            && point
                .iter()
                .zip(self.start.iter().zip(self.stop.iter()))
                .all(|(&p, (&a, &b))| p >= a as i64 && p < b as i64)
    }

    /// Same box with axis `axis` replaced by `[start, stop)`.
    pub fn with_axis(&self, axis: usize, start: usize, stop: usize) -> SubRegion {
        let mut roi = self.clone();
        roi.start[axis] = start;
        roi.stop[axis] = stop.max(start);
        roi
    }

    /// Box expressed relative to `origin`.
    ///
    /// `origin` must not exceed `start` on any axis.
    pub fn relative_to(&self, origin: &[usize]) -> SubRegion {
        SubRegion {
            start: self.start.iter().zip(origin).map(|(a, o)| a - o).collect(),
            stop: self.stop.iter().zip(origin).map(|(b, o)| b - o).collect(),
        }
    }

    /// Box restricted to the listed axes, in the listed order.
    pub fn select_axes(&self, axes: &[usize]) -> SubRegion {
        SubRegion {
            start: axes.iter().map(|&i| self.start[i]).collect(),
            stop: axes.iter().map(|&i| self.stop[i]).collect(),
        }
    }

    /// Every integer coordinate inside the box, last axis fastest.
    pub fn points(&self) -> Points<'_> {
        let next = if self.is_empty() {
            None
        } else {
            Some(self.start.clone())
        };
        Points { roi: self, next }
    }

    fn slice(&self, axis: usize) -> Slice {
        Slice::from(self.start[axis] as isize..self.stop[axis] as isize)
    }

    /// View of the part of `array` covered by this box.
    pub fn view<'a, T>(&self, array: &'a ArrayD<T>) -> ArrayViewD<'a, T> {
        array.slice_each_axis(|ax| self.slice(ax.axis.index()))
    }

    pub fn view_mut<'a, T>(&self, array: &'a mut ArrayD<T>) -> ArrayViewMutD<'a, T> {
        array.slice_each_axis_mut(|ax| self.slice(ax.axis.index()))
    }
}

impl fmt::Display for SubRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}..{:?})", self.start, self.stop)
    }
}

/// Iterator over the integer points of a [`SubRegion`].
pub struct Points<'a> {
    roi: &'a SubRegion,
    next: Option<Vec<usize>>,
}

impl Iterator for Points<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.next.take()?;
        let mut following = current.clone();
        let mut axis = following.len();
        while axis > 0 {
            axis -= 1;
            following[axis] += 1;
            if following[axis] < self.roi.stop[axis] {
                self.next = Some(following);
                return Some(current);
            }
            following[axis] = self.roi.start[axis];
        }
        Some(current)
    }
}

// =============================================================================
// List ROI
// =============================================================================

/// Ordered list of indices along one axis. Empty means "all".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListRoi(Vec<usize>);

impl ListRoi {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    /// The "every index" sentinel.
    pub fn all() -> Self {
        Self(Vec::new())
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn is_all(&self) -> bool {
        self.0.is_empty()
    }

    /// Concrete indices for an axis of length `extent`.
    pub fn resolve(&self, extent: usize) -> Result<Vec<usize>, RoiError> {
        if self.is_all() {
            return Ok((0..extent).collect());
        }
        for &index in &self.0 {
            if index >= extent {
                return Err(RoiError::IndexOutOfBounds { index, extent });
            }
        }
        Ok(self.0.clone())
    }
}

impl fmt::Display for ListRoi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            f.write_str("[*]")
        } else {
            write!(f, "{:?}", self.0)
        }
    }
}

// =============================================================================
// Roi
// =============================================================================

/// A region of interest in either form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Roi {
    Box(SubRegion),
    List(ListRoi),
}

impl Roi {
    pub fn kind(&self) -> RoiKind {
        match self {
            Roi::Box(_) => RoiKind::Box,
            Roi::List(_) => RoiKind::List,
        }
    }

    /// Borrow the box form, or fail naming `slot`.
    pub fn as_box(&self, slot: &str) -> Result<&SubRegion, RoiError> {
        match self {
            Roi::Box(roi) => Ok(roi),
            Roi::List(_) => Err(RoiError::WrongKind {
                slot: slot.to_string(),
                expected: RoiKind::Box.as_str(),
            }),
        }
    }

    pub fn as_list(&self, slot: &str) -> Result<&ListRoi, RoiError> {
        match self {
            Roi::List(roi) => Ok(roi),
            Roi::Box(_) => Err(RoiError::WrongKind {
                slot: slot.to_string(),
                expected: RoiKind::List.as_str(),
            }),
        }
    }
}

impl From<SubRegion> for Roi {
    fn from(roi: SubRegion) -> Self {
        Roi::Box(roi)
    }
}

impl From<ListRoi> for Roi {
    fn from(roi: ListRoi) -> Self {
        Roi::List(roi)
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Roi::Box(roi) => roi.fmt(f),
            Roi::List(roi) => roi.fmt(f),
        }
    }
}
