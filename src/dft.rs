//! One-shot transform facade: create a plan with default flags, execute it
//! once, and drop it.
//!
//! Every call re-plans, which is the cost of the convenience; callers
//! transforming the same buffer pair repeatedly should create a plan from
//! [`crate::plan`] directly and call `execute` as often as needed. The
//! facade shares the per-family validators with the plan constructors, so
//! the two paths cannot diverge in what they accept.

use crate::buffer::SampleBuffer;
use crate::error::{FftError, FftResult};
use crate::plan::{C2cPlan, C2rPlan, R2cPlan, R2rPlan};
use crate::{Complex64, Direction, PlannerFlags};

fn one_shot_c2c(
    input: &mut dyn SampleBuffer<Complex64>,
    output: &mut dyn SampleBuffer<Complex64>,
    direction: Direction,
) -> FftResult<()> {
    let Some(mut plan) = C2cPlan::create(input, output, direction, PlannerFlags::default(), 1)?
    else {
        return Err(FftError::PlanUnavailable);
    };
    plan.execute()
}

fn one_shot_r2r(
    input: &mut dyn SampleBuffer<f64>,
    output: &mut dyn SampleBuffer<f64>,
    direction: Direction,
) -> FftResult<()> {
    let Some(mut plan) = R2rPlan::create(input, output, direction, PlannerFlags::default(), 1)?
    else {
        return Err(FftError::PlanUnavailable);
    };
    plan.execute()
}

/// Forward complex transform, unnormalized.
pub fn fft(
    input: &mut dyn SampleBuffer<Complex64>,
    output: &mut dyn SampleBuffer<Complex64>,
) -> FftResult<()> {
    one_shot_c2c(input, output, Direction::Forward)
}

/// Backward complex transform, unnormalized: `ifft` of `fft` recovers the
/// input scaled by the transform size.
pub fn ifft(
    input: &mut dyn SampleBuffer<Complex64>,
    output: &mut dyn SampleBuffer<Complex64>,
) -> FftResult<()> {
    one_shot_c2c(input, output, Direction::Backward)
}

/// Forward real-to-complex transform; the output buffer's shape must match
/// [`crate::plan::complex_output_shape`] of the input shape.
pub fn rfft(
    input: &mut dyn SampleBuffer<f64>,
    output: &mut dyn SampleBuffer<Complex64>,
) -> FftResult<()> {
    let Some(mut plan) = R2cPlan::create(input, output, PlannerFlags::default(), 1)? else {
        return Err(FftError::PlanUnavailable);
    };
    plan.execute()
}

/// Backward complex-to-real transform, the inverse of [`rfft`].
pub fn irfft(
    input: &mut dyn SampleBuffer<Complex64>,
    output: &mut dyn SampleBuffer<f64>,
) -> FftResult<()> {
    let Some(mut plan) = C2rPlan::create(input, output, PlannerFlags::default(), 1)? else {
        return Err(FftError::PlanUnavailable);
    };
    plan.execute()
}

/// Forward real-to-real transform (DCT-II).
pub fn dct(
    input: &mut dyn SampleBuffer<f64>,
    output: &mut dyn SampleBuffer<f64>,
) -> FftResult<()> {
    one_shot_r2r(input, output, Direction::Forward)
}

/// Backward real-to-real transform (DCT-III): `idct` of `dct` recovers the
/// input scaled by half the transform size per axis.
pub fn idct(
    input: &mut dyn SampleBuffer<f64>,
    output: &mut dyn SampleBuffer<f64>,
) -> FftResult<()> {
    one_shot_r2r(input, output, Direction::Backward)
}
