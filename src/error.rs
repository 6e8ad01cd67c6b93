use thiserror::Error;

pub type FftResult<T> = Result<T, FftError>;

/// Errors raised by buffer construction, plan creation, and the wisdom store.
///
/// All variants are raised synchronously to the caller of the failing
/// operation and are never retried internally. A planner that legitimately
/// cannot produce a plan is *not* an error: plan creation signals that case
/// as `Ok(None)`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FftError {
    #[error("shape mismatch: {detail}")]
    ShapeMismatch { detail: String },
    #[error("{buffer} buffer too small: holds {capacity} elements, transform needs {required}")]
    BufferTooSmall {
        buffer: &'static str,
        capacity: usize,
        required: usize,
    },
    #[error("invalid shape: {detail}")]
    InvalidShape { detail: String },
    #[error("alignment {0} is not a supported power of two for this element type")]
    InvalidAlignment(usize),
    #[error("aligned allocation of {bytes} bytes (alignment {alignment}) failed")]
    AllocationFailure { bytes: usize, alignment: usize },
    #[error("thread count must be at least one")]
    InvalidThreads,
    #[error("no plan available for the requested configuration")]
    PlanUnavailable,
    #[error("wisdom import from {path} failed: {reason}")]
    ImportFailure { path: String, reason: String },
    #[error("wisdom export to {path} failed: {reason}")]
    ExportFailure { path: String, reason: String },
    #[error("backend failure: {detail}")]
    Backend { detail: String },
}
