use thiserror::Error;

/// Failure kinds of the geometric core.
///
/// None of these are retried inside the crate. Falling back (e.g. to the
/// unmodified image) is the caller's decision.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("matrix is singular (|det| = {det:e})")]
    SingularMatrix { det: f64 },

    #[error("vector has zero magnitude")]
    ZeroMagnitude,

    #[error("linear system is singular (zero pivot in column {column})")]
    SingularSystem { column: usize },

    #[error("segment endpoints coincide, no direction can be derived")]
    DegenerateSegment,

    #[error("at least 2 seed points are required, got {got}")]
    InsufficientSeedPoints { got: usize },

    #[error("exactly 3 vessel directions are required, got {got}")]
    InvalidVesselCount { got: usize },

    #[error("vessel directions are parallel, bifurcation plane is undefined")]
    ParallelVessels,

    #[error("no bifurcation candidate could be estimated")]
    BifurcationNotFound,

    #[error("perspective correction failed: {reason}")]
    PerspectiveCorrectionFailed { reason: String },

    #[error("{name} = {value} is outside [{min}, {max}]")]
    AngleOutOfRange {
        name: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("non-finite value encountered in {context}")]
    NonFiniteValue { context: &'static str },

    #[error("triangulated point lies at infinity")]
    TriangulationFailed,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type GeometryResult<T> = Result<T, GeometryError>;
