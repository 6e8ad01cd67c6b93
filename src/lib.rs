//! Plan-based FFT execution over ecosystem transform backends.
//!
//! The transform kernels themselves live in external crates (`rustfft` for
//! complex transforms, `realfft` for real↔complex, `rustdct` for the
//! real-to-real DCT family). This crate owns everything around them:
//! - buffer shape/capacity bookkeeping ([`buffer`])
//! - plan creation, validation, and lifetime ([`plan`])
//! - a process-wide wisdom store shared by all plan creations ([`wisdom`])
//! - a one-shot transform facade for callers who do not want to manage
//!   plan lifetime explicitly ([`dft`])
//!
//! Plan creation serializes on one process-wide lock because the backend
//! planners are `&mut` APIs; executing distinct already-created plans takes
//! no lock and may run concurrently.

pub mod buffer;
pub mod dft;
pub mod error;
pub mod plan;
pub mod wisdom;

use serde::{Deserialize, Serialize};

pub use buffer::{AlignedBuffer, PinnedBuffer, SampleBuffer, SIMD_ALIGNMENT};
pub use error::{FftError, FftResult};
pub use plan::{
    complex_output_shape, take_plan_traces, C2cPlan, C2rPlan, PlanKey, PlanTrace, R2cPlan, R2rPlan,
};
pub use rustfft::num_complex::Complex64;
pub use wisdom::WisdomRecord;

/// Transform direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Backward,
}

/// Transform families served by the plan layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransformFamily {
    C2c,
    R2r,
    R2c,
    C2r,
}

/// Advisory planning effort, part of every plan key.
///
/// The backend planners do not probe empirically, so rigor does not change
/// the produced plan; it is recorded so that wisdom imported from a future
/// backend that does distinguish effort levels stays keyed correctly.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum PlanningRigor {
    #[default]
    Estimate,
    Measure,
    Patient,
    Exhaustive,
}

/// Strategy hints passed to plan creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlannerFlags {
    pub rigor: PlanningRigor,
    /// Only produce a plan when the wisdom store already holds an entry for
    /// the requested geometry; otherwise plan creation yields `Ok(None)`.
    pub wisdom_only: bool,
}

impl PlannerFlags {
    #[must_use]
    pub fn with_rigor(mut self, rigor: PlanningRigor) -> Self {
        self.rigor = rigor;
        self
    }

    #[must_use]
    pub fn with_wisdom_only(mut self, wisdom_only: bool) -> Self {
        self.wisdom_only = wisdom_only;
        self
    }
}

pub(crate) fn family_name(family: TransformFamily) -> &'static str {
    match family {
        TransformFamily::C2c => "c2c",
        TransformFamily::R2r => "r2r",
        TransformFamily::R2c => "r2c",
        TransformFamily::C2r => "c2r",
    }
}

pub(crate) fn direction_name(direction: Direction) -> &'static str {
    match direction {
        Direction::Forward => "forward",
        Direction::Backward => "backward",
    }
}

pub(crate) fn rigor_name(rigor: PlanningRigor) -> &'static str {
    match rigor {
        PlanningRigor::Estimate => "estimate",
        PlanningRigor::Measure => "measure",
        PlanningRigor::Patient => "patient",
        PlanningRigor::Exhaustive => "exhaustive",
    }
}
