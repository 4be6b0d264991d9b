use thiserror::Error;

/// Errors raised while building or checking a region of interest.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoiError {
    /// Start and stop vectors have different lengths
    #[error("ROI start has {start} coordinates but stop has {stop}")]
    LengthMismatch { start: usize, stop: usize },

    /// A start coordinate lies past its stop coordinate
    #[error("ROI start exceeds stop on axis {axis}: {start} > {stop}")]
    Inverted {
        axis: usize,
        start: usize,
        stop: usize,
    },

    /// ROI dimensionality does not match the addressed slot
    #[error("ROI has {roi} dimensions, slot has {shape}")]
    DimensionMismatch { roi: usize, shape: usize },

    /// Box ROI reaches past the end of an axis
    #[error("ROI out of bounds on axis {axis}: stop {stop} exceeds extent {extent}")]
    OutOfBounds {
        axis: usize,
        stop: usize,
        extent: usize,
    },

    /// List ROI names an index outside the addressed axis
    #[error("Index {index} out of bounds for extent {extent}")]
    IndexOutOfBounds { index: usize, extent: usize },

    /// A box ROI was sent to a list slot or the other way around
    #[error("Slot {slot} expects a {expected} ROI")]
    WrongKind { slot: String, expected: &'static str },
}

/// Errors raised by the operator graph: wiring, setup and execution.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    /// Region-of-interest error
    #[error("ROI error: {0}")]
    Roi(#[from] RoiError),

    /// Slot nesting levels are incompatible
    #[error("Cannot connect {input} (level {input_level}) to {output} (level {output_level})")]
    LevelMismatch {
        input: String,
        input_level: usize,
        output: String,
        output_level: usize,
    },

    /// Input metadata violates an operator precondition
    #[error("Precondition violated in {operator}: {message}")]
    Precondition { operator: String, message: String },

    /// A required axis is absent from the input axis tags
    #[error("{operator} requires a '{axis}' axis")]
    MissingAxis { operator: String, axis: char },

    /// Axis tag string could not be parsed
    #[error("Invalid axis tags '{0}'")]
    InvalidAxisTags(String),

    /// Slot has no published metadata yet
    #[error("Slot {slot} is not ready")]
    NotReady { slot: String },

    /// Slot has nothing that can produce its data
    #[error("Slot {slot} is not bound to a provider")]
    Unbound { slot: String },

    /// A composite operator was asked to compute directly
    #[error("{operator} only routes data and cannot execute")]
    Unreachable { operator: String },

    /// The feature extractor does not know this feature name
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    /// Array shape error
    #[error("Shape error: {0}")]
    Shape(String),
}

impl From<ndarray::ShapeError> for GraphError {
    fn from(err: ndarray::ShapeError) -> Self {
        GraphError::Shape(err.to_string())
    }
}

/// Errors from loading input frames or writing overlay frames.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    /// No frame paths were given
    #[error("No input frames given")]
    Empty,

    /// Frame could not be opened or decoded
    #[error("Failed to decode {path}: {message}")]
    Decode { path: String, message: String },

    /// Frame size differs from the first frame
    #[error("Frame {path} is {actual:?}, expected {expected:?}")]
    FrameSize {
        path: String,
        expected: (u32, u32),
        actual: (u32, u32),
    },

    /// Raw and binary stacks do not line up
    #[error("Raw stack has shape {raw:?} but binary stack has {binary:?}")]
    StackMismatch { raw: Vec<usize>, binary: Vec<usize> },

    /// Overlay frame could not be written
    #[error("Failed to write {path}: {message}")]
    Encode { path: String, message: String },

    /// Error from the operator graph
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),
}
