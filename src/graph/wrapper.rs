//! Nested slot levels.
//!
//! A level-0 slot carries one array; a level-n slot is an ordered list of
//! level-(n-1) slots. [`Level`] is the recursive container used to pass such
//! nested collections around, and [`OperatorWrapper`] replicates an inner
//! operator once per scalar leaf of a nested input.

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::error::GraphError;

use super::{read, write};

// =============================================================================
// Level
// =============================================================================

/// A scalar or an ordered list of nested levels.
#[derive(Debug, Clone, PartialEq)]
pub enum Level<T> {
    Scalar(T),
    List(Vec<Level<T>>),
}

impl<T> Level<T> {
    /// Nesting depth, following the first element of each list.
    pub fn depth(&self) -> usize {
        match self {
            Level::Scalar(_) => 0,
            Level::List(items) => 1 + items.first().map_or(0, Level::depth),
        }
    }

    /// True when every branch has exactly `level` list layers.
    ///
    /// An empty list conforms to any level of at least one.
    pub fn conforms(&self, level: usize) -> bool {
        match self {
            Level::Scalar(_) => level == 0,
            Level::List(items) => level > 0 && items.iter().all(|i| i.conforms(level - 1)),
        }
    }

    /// Direct children; empty for a scalar.
    pub fn children(&self) -> &[Level<T>] {
        match self {
            Level::Scalar(_) => &[],
            Level::List(items) => items,
        }
    }

    /// Every scalar, depth-first in list order.
    pub fn leaves(&self) -> Vec<&T> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a T>) {
        match self {
            Level::Scalar(value) => out.push(value),
            Level::List(items) => items.iter().for_each(|i| i.collect_leaves(out)),
        }
    }

    /// Element at `path`, one index per list layer.
    pub fn get(&self, path: &[usize]) -> Option<&Level<T>> {
        match path.split_first() {
            None => Some(self),
            Some((&head, rest)) => self.children().get(head)?.get(rest),
        }
    }

    /// The elements of a flat list of scalars, or `None` for any other shape.
    pub fn scalars(&self) -> Option<Vec<&T>> {
        match self {
            Level::Scalar(_) => None,
            Level::List(items) => items
                .iter()
                .map(|i| match i {
                    Level::Scalar(value) => Some(value),
                    Level::List(_) => None,
                })
                .collect(),
        }
    }

    /// Apply `f` to every scalar together with its path.
    pub fn try_map<U, E>(
        &self,
        mut f: impl FnMut(&[usize], &T) -> Result<U, E>,
    ) -> Result<Level<U>, E> {
        let mut path = Vec::new();
        self.try_map_at(&mut path, &mut f)
    }

    fn try_map_at<U, E>(
        &self,
        path: &mut Vec<usize>,
        f: &mut impl FnMut(&[usize], &T) -> Result<U, E>,
    ) -> Result<Level<U>, E> {
        match self {
            Level::Scalar(value) => Ok(Level::Scalar(f(path, value)?)),
            Level::List(items) => {
                let mut mapped = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    path.push(i);
                    let result = item.try_map_at(path, f);
                    path.pop();
                    mapped.push(result?);
                }
                Ok(Level::List(mapped))
            }
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Level<U> {
        match self.try_map(|_, value| Ok::<U, std::convert::Infallible>(f(value))) {
            Ok(level) => level,
            Err(never) => match never {},
        }
    }

    /// Treat the top list layer as a list of scalars holding the sub-levels.
    pub fn outer(self) -> Level<Level<T>> {
        match self {
            Level::Scalar(value) => Level::Scalar(Level::Scalar(value)),
            Level::List(items) => Level::List(items.into_iter().map(Level::Scalar).collect()),
        }
    }
}

impl<T: Clone> Level<T> {
    /// Pair up two levels of identical structure.
    pub fn zip<U: Clone>(&self, other: &Level<U>) -> Result<Level<(T, U)>, GraphError> {
        match (self, other) {
            (Level::Scalar(a), Level::Scalar(b)) => Ok(Level::Scalar((a.clone(), b.clone()))),
            (Level::List(a), Level::List(b)) if a.len() == b.len() => Ok(Level::List(
                a.iter()
                    .zip(b.iter())
                    .map(|(x, y)| x.zip(y))
                    .collect::<Result<_, _>>()?,
            )),
            _ => Err(GraphError::Shape(
                "nested slot structures differ".to_string(),
            )),
        }
    }
}

impl<T> Level<Level<T>> {
    /// Replace every scalar by the level it holds.
    pub fn graft(self) -> Level<T> {
        match self {
            Level::Scalar(inner) => inner,
            Level::List(items) => Level::List(items.into_iter().map(Level::graft).collect()),
        }
    }
}

// =============================================================================
// Operator Wrapper
// =============================================================================

/// One inner operator per scalar of a nested input of fixed `level`.
///
/// The wrapper's outputs are the inner operators' outputs grafted onto the
/// input nesting, so a wrapped operator with level-0 outputs exposes level-n
/// outputs and one with level-1 outputs exposes level-(n+1) outputs.
pub struct OperatorWrapper<Op> {
    name: String,
    level: usize,
    inner: RwLock<Level<Arc<Op>>>,
}

impl<Op: Send + Sync> OperatorWrapper<Op> {
    pub fn new(name: impl Into<String>, level: usize) -> Self {
        Self {
            name: name.into(),
            level,
            inner: RwLock::new(Level::List(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// Replace every inner operator, building one per scalar of `inputs`.
    ///
    /// `make` receives the scalar's path and is expected to connect the new
    /// operator's inputs. Fails with `LevelMismatch` when `inputs` is not
    /// nested exactly `level` deep.
    pub fn rebuild<S>(
        &self,
        inputs: &Level<S>,
        make: impl FnMut(&[usize], &S) -> Result<Arc<Op>, GraphError>,
    ) -> Result<(), GraphError> {
        if !inputs.conforms(self.level) {
            return Err(GraphError::LevelMismatch {
                input: self.name.clone(),
                input_level: self.level,
                output: format!("{} nested slot(s)", inputs.leaves().len()),
                output_level: inputs.depth(),
            });
        }
        let ops = inputs.try_map(make)?;
        debug!(wrapper = %self.name, operators = ops.leaves().len(), "rebuilt wrapped operators");
        *write(&self.inner) = ops;
        Ok(())
    }

    /// Current inner operators, nested like the last rebuild input.
    pub fn inner(&self) -> Level<Arc<Op>> {
        read(&self.inner).clone()
    }

    pub fn len(&self) -> usize {
        read(&self.inner).leaves().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collect something level-shaped from every inner operator and graft
    /// it in place of the operator.
    pub fn collect<U>(&self, mut f: impl FnMut(&Op) -> Level<U>) -> Level<U> {
        read(&self.inner).map(|op| f(op)).graft()
    }
}
