//! Plan lifecycle: validation, creation under the shared planner lock, and
//! execution.
//!
//! A plan borrows its input and output buffers exclusively for its whole
//! lifetime, so the "buffers must outlive the plan" and "execute must not
//! race with disposal" contracts of the wrapped planning model are enforced
//! by the borrow checker instead of by documentation. Creation and
//! destruction of backend planner state serialize on one process-wide
//! mutex; executing distinct plans takes no lock.
//!
//! Planning may overwrite buffer contents with probe data, so callers are
//! expected to write input samples *after* creating a plan, through the
//! plan's buffer accessors.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Instant;

use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustdct::{DctPlanner, TransformType2And3};
use rustfft::{Fft, FftDirection, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::buffer::{checked_shape_len, SampleBuffer};
use crate::error::{FftError, FftResult};
use crate::{
    direction_name, family_name, rigor_name, Complex64, Direction, PlannerFlags, PlanningRigor,
    TransformFamily,
};

/// Stable identity of a planning decision; keys the wisdom store.
///
/// `shape` is the logical transform geometry: for the real↔complex families
/// it is the real-side shape, with the complex side derived through
/// [`complex_output_shape`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanKey {
    pub family: TransformFamily,
    pub shape: Vec<usize>,
    pub direction: Direction,
    pub rigor: PlanningRigor,
}

impl From<Direction> for FftDirection {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::Forward => FftDirection::Forward,
            Direction::Backward => FftDirection::Inverse,
        }
    }
}

/// Backend planners plus the wisdom map, shared process-wide.
pub(crate) struct PlannerState {
    complex: FftPlanner<f64>,
    real: RealFftPlanner<f64>,
    dct: DctPlanner<f64>,
    pub(crate) wisdom: BTreeMap<PlanKey, u64>,
}

impl PlannerState {
    fn new() -> Self {
        Self {
            complex: FftPlanner::new(),
            real: RealFftPlanner::new(),
            dct: DctPlanner::new(),
            wisdom: BTreeMap::new(),
        }
    }

    /// Wisdom admission for one plan creation. Returns `None` for a
    /// wisdom-only request with no recorded entry, otherwise whether the
    /// geometry was already known.
    fn admit(&mut self, key: &PlanKey, wisdom_only: bool) -> Option<bool> {
        match self.wisdom.get_mut(key) {
            Some(plans) => {
                *plans += 1;
                Some(true)
            }
            None if wisdom_only => None,
            None => {
                self.wisdom.insert(key.clone(), 1);
                Some(false)
            }
        }
    }

    /// Re-plans the backend handles for an imported wisdom key so that
    /// later plan creations for the same geometry are served from the
    /// backend planner caches.
    pub(crate) fn prewarm(&mut self, key: &PlanKey) {
        match key.family {
            TransformFamily::C2c => {
                for &len in &key.shape {
                    self.complex.plan_fft(len, key.direction.into());
                }
            }
            TransformFamily::R2r => {
                for &len in &key.shape {
                    match key.direction {
                        Direction::Forward => self.dct.plan_dct2(len),
                        Direction::Backward => self.dct.plan_dct3(len),
                    };
                }
            }
            TransformFamily::R2c => {
                if let Some((&last, rest)) = key.shape.split_last() {
                    self.real.plan_fft_forward(last);
                    for &len in rest {
                        self.complex.plan_fft_forward(len);
                    }
                }
            }
            TransformFamily::C2r => {
                if let Some((&last, rest)) = key.shape.split_last() {
                    self.real.plan_fft_inverse(last);
                    for &len in rest {
                        self.complex.plan_fft_inverse(len);
                    }
                }
            }
        }
    }
}

static PLANNER: OnceLock<Mutex<PlannerState>> = OnceLock::new();

fn planner() -> &'static Mutex<PlannerState> {
    PLANNER.get_or_init(|| Mutex::new(PlannerState::new()))
}

/// Runs `f` with exclusive access to the process-wide planner state. All
/// plan creation and wisdom mutation funnels through here.
pub(crate) fn with_planner<R>(f: impl FnOnce(&mut PlannerState) -> R) -> R {
    let mut guard = planner().lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// Record of one successful plan creation, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanTrace {
    pub operation_id: String,
    pub family: TransformFamily,
    pub shape: Vec<usize>,
    pub direction: Direction,
    pub rigor: PlanningRigor,
    pub wisdom_hit: bool,
    pub timing_ns: u128,
}

impl PlanTrace {
    #[must_use]
    pub fn to_json_line(&self) -> String {
        let shape = self
            .shape
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{{\"operation_id\":\"{}\",\"family\":\"{}\",\"shape\":[{}],\"direction\":\"{}\",\"rigor\":\"{}\",\"wisdom_hit\":{},\"timing_ns\":{}}}",
            self.operation_id,
            family_name(self.family),
            shape,
            direction_name(self.direction),
            rigor_name(self.rigor),
            self.wisdom_hit,
            self.timing_ns,
        )
    }
}

static TRACE_LOG: OnceLock<Mutex<Vec<PlanTrace>>> = OnceLock::new();
static OPERATION_COUNTER: AtomicU64 = AtomicU64::new(1);

fn trace_log() -> &'static Mutex<Vec<PlanTrace>> {
    TRACE_LOG.get_or_init(|| Mutex::new(Vec::new()))
}

fn next_operation_id() -> String {
    let next = OPERATION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("plan-op-{next:016x}")
}

fn record_trace(key: &PlanKey, wisdom_hit: bool, started: Instant) {
    let trace = PlanTrace {
        operation_id: next_operation_id(),
        family: key.family,
        shape: key.shape.clone(),
        direction: key.direction,
        rigor: key.rigor,
        wisdom_hit,
        timing_ns: started.elapsed().as_nanos(),
    };
    if let Ok(mut log) = trace_log().lock() {
        log.push(trace);
    }
}

/// Drains and returns all plan-creation traces recorded so far.
#[must_use]
pub fn take_plan_traces() -> Vec<PlanTrace> {
    if let Ok(mut log) = trace_log().lock() {
        let mut out = Vec::with_capacity(log.len());
        std::mem::swap(&mut *log, &mut out);
        return out;
    }
    Vec::new()
}

/// Output geometry of a real-to-complex transform: the last dimension is
/// halved plus one, reflecting conjugate symmetry of real-input spectra.
#[must_use]
pub fn complex_output_shape(real_shape: &[usize]) -> Vec<usize> {
    let mut shape = real_shape.to_vec();
    if let Some(last) = shape.last_mut() {
        *last = *last / 2 + 1;
    }
    shape
}

fn ensure_threads(threads: usize) -> FftResult<()> {
    if threads == 0 {
        return Err(FftError::InvalidThreads);
    }
    Ok(())
}

fn ensure_capacity(buffer: &'static str, capacity: usize, required: usize) -> FftResult<()> {
    if capacity < required {
        return Err(FftError::BufferTooSmall {
            buffer,
            capacity,
            required,
        });
    }
    Ok(())
}

/// Shared shape rule for the same-geometry families (c2c and r2r): both
/// sides must declare identical rank and per-dimension lengths, and both
/// must have capacity for the transform size. Returns the transform shape.
fn validate_same_shape<A, B>(
    input: &dyn SampleBuffer<A>,
    output: &dyn SampleBuffer<B>,
) -> FftResult<Vec<usize>> {
    if input.shape() != output.shape() {
        return Err(FftError::ShapeMismatch {
            detail: format!(
                "input shape {:?} and output shape {:?} must be identical",
                input.shape(),
                output.shape()
            ),
        });
    }
    let size = checked_shape_len(input.shape())?;
    ensure_capacity("input", input.len(), size)?;
    ensure_capacity("output", output.len(), size)?;
    Ok(input.shape().to_vec())
}

/// Shape rule for the real↔complex families: equal rank, equal leading
/// dimensions, and the complex side's last dimension derived from the real
/// side. Returns the real-side (logical) transform shape.
fn validate_real_complex(
    real: &dyn SampleBuffer<f64>,
    complex: &dyn SampleBuffer<Complex64>,
    real_name: &'static str,
    complex_name: &'static str,
) -> FftResult<Vec<usize>> {
    let derived = complex_output_shape(real.shape());
    if complex.shape() != derived {
        return Err(FftError::ShapeMismatch {
            detail: format!(
                "{complex_name} shape {:?} must be {derived:?}, derived from {real_name} shape {:?}",
                complex.shape(),
                real.shape()
            ),
        });
    }
    let real_size = checked_shape_len(real.shape())?;
    let complex_size = checked_shape_len(&derived)?;
    ensure_capacity(real_name, real.len(), real_size)?;
    ensure_capacity(complex_name, complex.len(), complex_size)?;
    Ok(real.shape().to_vec())
}

/// Applies a 1-D complex transform along `axis` of row-major `data`,
/// gathering strided lanes into `lane` where the axis is not contiguous.
fn transform_complex_axis(
    fft: &dyn Fft<f64>,
    data: &mut [Complex64],
    shape: &[usize],
    axis: usize,
    lane: &mut Vec<Complex64>,
    scratch: &mut [Complex64],
) {
    let axis_len = shape[axis];
    let stride: usize = shape[axis + 1..].iter().product::<usize>().max(1);
    let repeats: usize = shape[..axis].iter().product::<usize>().max(1);
    let block = axis_len * stride;
    let scratch = &mut scratch[..fft.get_inplace_scratch_len()];

    if stride == 1 {
        // Contiguous lanes: the backend processes the whole run in
        // axis_len-sized chunks.
        fft.process_with_scratch(data, scratch);
        return;
    }

    lane.resize(axis_len, Complex64::new(0.0, 0.0));
    for outer in 0..repeats {
        let base = outer * block;
        for offset in 0..stride {
            for (index, slot) in lane.iter_mut().enumerate() {
                *slot = data[base + index * stride + offset];
            }
            fft.process_with_scratch(lane, scratch);
            for (index, &value) in lane.iter().enumerate() {
                data[base + index * stride + offset] = value;
            }
        }
    }
}

/// Applies a 1-D DCT along `axis` of row-major real `data`.
fn transform_real_axis(
    dct: &dyn TransformType2And3<f64>,
    direction: Direction,
    data: &mut [f64],
    shape: &[usize],
    axis: usize,
    lane: &mut Vec<f64>,
) {
    let axis_len = shape[axis];
    let stride: usize = shape[axis + 1..].iter().product::<usize>().max(1);
    let repeats: usize = shape[..axis].iter().product::<usize>().max(1);
    let block = axis_len * stride;

    let run = |buffer: &mut [f64]| match direction {
        Direction::Forward => dct.process_dct2(buffer),
        Direction::Backward => dct.process_dct3(buffer),
    };

    if stride == 1 {
        for chunk in data.chunks_exact_mut(axis_len) {
            run(chunk);
        }
        return;
    }

    lane.resize(axis_len, 0.0);
    for outer in 0..repeats {
        let base = outer * block;
        for offset in 0..stride {
            for (index, slot) in lane.iter_mut().enumerate() {
                *slot = data[base + index * stride + offset];
            }
            run(lane);
            for (index, &value) in lane.iter().enumerate() {
                data[base + index * stride + offset] = value;
            }
        }
    }
}

fn backend_error(err: realfft::FftError) -> FftError {
    FftError::Backend {
        detail: err.to_string(),
    }
}

/// Complex-to-complex transform plan over two same-shape buffers.
pub struct C2cPlan<'buf> {
    input: &'buf mut dyn SampleBuffer<Complex64>,
    output: &'buf mut dyn SampleBuffer<Complex64>,
    axes: Vec<Arc<dyn Fft<f64>>>,
    shape: Vec<usize>,
    size: usize,
    scratch: Vec<Complex64>,
    lane: Vec<Complex64>,
    threads: usize,
}

impl fmt::Debug for C2cPlan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("C2cPlan")
            .field("shape", &self.shape)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

impl<'buf> C2cPlan<'buf> {
    /// Plans a transform for the buffers' declared geometry.
    ///
    /// Returns `Ok(None)` when `flags.wisdom_only` is set and the wisdom
    /// store holds no entry for this geometry; that is the "no plan
    /// available" outcome, distinct from the validation errors.
    pub fn create(
        input: &'buf mut dyn SampleBuffer<Complex64>,
        output: &'buf mut dyn SampleBuffer<Complex64>,
        direction: Direction,
        flags: PlannerFlags,
        threads: usize,
    ) -> FftResult<Option<Self>> {
        ensure_threads(threads)?;
        let shape = validate_same_shape(&*input, &*output)?;
        let size = checked_shape_len(&shape)?;
        let key = PlanKey {
            family: TransformFamily::C2c,
            shape: shape.clone(),
            direction,
            rigor: flags.rigor,
        };

        let started = Instant::now();
        let planned = with_planner(|state| {
            let wisdom_hit = state.admit(&key, flags.wisdom_only)?;
            let axes = shape
                .iter()
                .map(|&len| state.complex.plan_fft(len, direction.into()))
                .collect::<Vec<_>>();
            Some((axes, wisdom_hit))
        });
        let Some((axes, wisdom_hit)) = planned else {
            return Ok(None);
        };
        record_trace(&key, wisdom_hit, started);

        let scratch_len = axes
            .iter()
            .map(|fft| fft.get_inplace_scratch_len())
            .max()
            .unwrap_or(0);
        Ok(Some(Self {
            input,
            output,
            axes,
            shape,
            size,
            scratch: vec![Complex64::new(0.0, 0.0); scratch_len],
            lane: Vec::new(),
            threads,
        }))
    }

    /// Runs the planned transform over the input buffer's current contents,
    /// overwriting the output buffer.
    pub fn execute(&mut self) -> FftResult<()> {
        let dst = &mut self.output.as_mut_slice()[..self.size];
        dst.copy_from_slice(&self.input.as_slice()[..self.size]);
        for (axis, fft) in self.axes.iter().enumerate() {
            transform_complex_axis(
                fft.as_ref(),
                dst,
                &self.shape,
                axis,
                &mut self.lane,
                &mut self.scratch,
            );
        }
        Ok(())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Advisory execution thread count recorded at creation; the backend
    /// executes single-threaded regardless.
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn input(&self) -> &dyn SampleBuffer<Complex64> {
        &*self.input
    }

    pub fn input_mut(&mut self) -> &mut dyn SampleBuffer<Complex64> {
        &mut *self.input
    }

    pub fn output(&self) -> &dyn SampleBuffer<Complex64> {
        &*self.output
    }

    pub fn output_mut(&mut self) -> &mut dyn SampleBuffer<Complex64> {
        &mut *self.output
    }
}

/// Real-to-real transform plan: DCT-II forward, DCT-III backward.
pub struct R2rPlan<'buf> {
    input: &'buf mut dyn SampleBuffer<f64>,
    output: &'buf mut dyn SampleBuffer<f64>,
    axes: Vec<Arc<dyn TransformType2And3<f64>>>,
    direction: Direction,
    shape: Vec<usize>,
    size: usize,
    lane: Vec<f64>,
    threads: usize,
}

impl fmt::Debug for R2rPlan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("R2rPlan")
            .field("shape", &self.shape)
            .field("direction", &self.direction)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

impl<'buf> R2rPlan<'buf> {
    pub fn create(
        input: &'buf mut dyn SampleBuffer<f64>,
        output: &'buf mut dyn SampleBuffer<f64>,
        direction: Direction,
        flags: PlannerFlags,
        threads: usize,
    ) -> FftResult<Option<Self>> {
        ensure_threads(threads)?;
        let shape = validate_same_shape(&*input, &*output)?;
        let size = checked_shape_len(&shape)?;
        let key = PlanKey {
            family: TransformFamily::R2r,
            shape: shape.clone(),
            direction,
            rigor: flags.rigor,
        };

        let started = Instant::now();
        let planned = with_planner(|state| {
            let wisdom_hit = state.admit(&key, flags.wisdom_only)?;
            let axes = shape
                .iter()
                .map(|&len| match direction {
                    Direction::Forward => state.dct.plan_dct2(len),
                    Direction::Backward => state.dct.plan_dct3(len),
                })
                .collect::<Vec<_>>();
            Some((axes, wisdom_hit))
        });
        let Some((axes, wisdom_hit)) = planned else {
            return Ok(None);
        };
        record_trace(&key, wisdom_hit, started);

        Ok(Some(Self {
            input,
            output,
            axes,
            direction,
            shape,
            size,
            lane: Vec::new(),
            threads,
        }))
    }

    pub fn execute(&mut self) -> FftResult<()> {
        let dst = &mut self.output.as_mut_slice()[..self.size];
        dst.copy_from_slice(&self.input.as_slice()[..self.size]);
        for (axis, dct) in self.axes.iter().enumerate() {
            transform_real_axis(
                dct.as_ref(),
                self.direction,
                dst,
                &self.shape,
                axis,
                &mut self.lane,
            );
        }
        Ok(())
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn input_mut(&mut self) -> &mut dyn SampleBuffer<f64> {
        &mut *self.input
    }

    pub fn output(&self) -> &dyn SampleBuffer<f64> {
        &*self.output
    }

    pub fn output_mut(&mut self) -> &mut dyn SampleBuffer<f64> {
        &mut *self.output
    }
}

/// Real-to-complex forward transform plan.
///
/// The output buffer's declared shape must equal
/// [`complex_output_shape`]`(input.shape())`.
pub struct R2cPlan<'buf> {
    input: &'buf mut dyn SampleBuffer<f64>,
    output: &'buf mut dyn SampleBuffer<Complex64>,
    r2c: Arc<dyn RealToComplex<f64>>,
    axes: Vec<Arc<dyn Fft<f64>>>,
    out_shape: Vec<usize>,
    n: usize,
    half: usize,
    rows: usize,
    lane_real: Vec<f64>,
    r2c_scratch: Vec<Complex64>,
    scratch: Vec<Complex64>,
    lane: Vec<Complex64>,
    threads: usize,
}

impl fmt::Debug for R2cPlan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("R2cPlan")
            .field("output_shape", &self.out_shape)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

impl<'buf> R2cPlan<'buf> {
    pub fn create(
        input: &'buf mut dyn SampleBuffer<f64>,
        output: &'buf mut dyn SampleBuffer<Complex64>,
        flags: PlannerFlags,
        threads: usize,
    ) -> FftResult<Option<Self>> {
        ensure_threads(threads)?;
        let shape = validate_real_complex(&*input, &*output, "input", "output")?;
        let out_shape = complex_output_shape(&shape);
        let key = PlanKey {
            family: TransformFamily::R2c,
            shape: shape.clone(),
            direction: Direction::Forward,
            rigor: flags.rigor,
        };

        let (n, leading) = match shape.split_last() {
            Some((&last, rest)) => (last, rest.to_vec()),
            None => (1, Vec::new()),
        };
        let half = n / 2 + 1;
        let rows = checked_shape_len(&shape)? / n;

        let started = Instant::now();
        let planned = with_planner(|state| {
            let wisdom_hit = state.admit(&key, flags.wisdom_only)?;
            let r2c = state.real.plan_fft_forward(n);
            let axes = leading
                .iter()
                .map(|&len| state.complex.plan_fft_forward(len))
                .collect::<Vec<_>>();
            Some((r2c, axes, wisdom_hit))
        });
        let Some((r2c, axes, wisdom_hit)) = planned else {
            return Ok(None);
        };
        record_trace(&key, wisdom_hit, started);

        let scratch_len = axes
            .iter()
            .map(|fft| fft.get_inplace_scratch_len())
            .max()
            .unwrap_or(0);
        let r2c_scratch = r2c.make_scratch_vec();
        Ok(Some(Self {
            input,
            output,
            r2c,
            axes,
            out_shape,
            n,
            half,
            rows,
            lane_real: vec![0.0; n],
            r2c_scratch,
            scratch: vec![Complex64::new(0.0, 0.0); scratch_len],
            lane: Vec::new(),
            threads,
        }))
    }

    pub fn execute(&mut self) -> FftResult<()> {
        let src = self.input.as_slice();
        let dst = &mut self.output.as_mut_slice()[..self.rows * self.half];
        for row in 0..self.rows {
            let in_base = row * self.n;
            let out_base = row * self.half;
            self.lane_real
                .copy_from_slice(&src[in_base..in_base + self.n]);
            self.r2c
                .process_with_scratch(
                    &mut self.lane_real,
                    &mut dst[out_base..out_base + self.half],
                    &mut self.r2c_scratch,
                )
                .map_err(backend_error)?;
        }
        for (axis, fft) in self.axes.iter().enumerate() {
            transform_complex_axis(
                fft.as_ref(),
                dst,
                &self.out_shape,
                axis,
                &mut self.lane,
                &mut self.scratch,
            );
        }
        Ok(())
    }

    /// Declared complex output geometry.
    pub fn output_shape(&self) -> &[usize] {
        &self.out_shape
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn input_mut(&mut self) -> &mut dyn SampleBuffer<f64> {
        &mut *self.input
    }

    pub fn output(&self) -> &dyn SampleBuffer<Complex64> {
        &*self.output
    }

    pub fn output_mut(&mut self) -> &mut dyn SampleBuffer<Complex64> {
        &mut *self.output
    }
}

/// Complex-to-real inverse transform plan, the inverse of [`R2cPlan`].
///
/// The input spectrum is assumed conjugate-symmetric; the imaginary parts
/// of the bins that symmetry forces to be real (DC, and Nyquist for even
/// lengths) are zeroed before the backend call.
pub struct C2rPlan<'buf> {
    input: &'buf mut dyn SampleBuffer<Complex64>,
    output: &'buf mut dyn SampleBuffer<f64>,
    c2r: Arc<dyn ComplexToReal<f64>>,
    axes: Vec<Arc<dyn Fft<f64>>>,
    in_shape: Vec<usize>,
    n: usize,
    half: usize,
    rows: usize,
    work: Vec<Complex64>,
    lane_complex: Vec<Complex64>,
    c2r_scratch: Vec<Complex64>,
    scratch: Vec<Complex64>,
    lane: Vec<Complex64>,
    threads: usize,
}

impl fmt::Debug for C2rPlan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("C2rPlan")
            .field("input_shape", &self.in_shape)
            .field("threads", &self.threads)
            .finish_non_exhaustive()
    }
}

impl<'buf> C2rPlan<'buf> {
    pub fn create(
        input: &'buf mut dyn SampleBuffer<Complex64>,
        output: &'buf mut dyn SampleBuffer<f64>,
        flags: PlannerFlags,
        threads: usize,
    ) -> FftResult<Option<Self>> {
        ensure_threads(threads)?;
        let shape = validate_real_complex(&*output, &*input, "output", "input")?;
        let in_shape = complex_output_shape(&shape);
        let key = PlanKey {
            family: TransformFamily::C2r,
            shape: shape.clone(),
            direction: Direction::Backward,
            rigor: flags.rigor,
        };

        let (n, leading) = match shape.split_last() {
            Some((&last, rest)) => (last, rest.to_vec()),
            None => (1, Vec::new()),
        };
        let half = n / 2 + 1;
        let rows = checked_shape_len(&shape)? / n;

        let started = Instant::now();
        let planned = with_planner(|state| {
            let wisdom_hit = state.admit(&key, flags.wisdom_only)?;
            let c2r = state.real.plan_fft_inverse(n);
            let axes = leading
                .iter()
                .map(|&len| state.complex.plan_fft_inverse(len))
                .collect::<Vec<_>>();
            Some((c2r, axes, wisdom_hit))
        });
        let Some((c2r, axes, wisdom_hit)) = planned else {
            return Ok(None);
        };
        record_trace(&key, wisdom_hit, started);

        let scratch_len = axes
            .iter()
            .map(|fft| fft.get_inplace_scratch_len())
            .max()
            .unwrap_or(0);
        let c2r_scratch = c2r.make_scratch_vec();
        Ok(Some(Self {
            input,
            output,
            c2r,
            axes,
            in_shape,
            n,
            half,
            rows,
            work: vec![Complex64::new(0.0, 0.0); rows * half],
            lane_complex: vec![Complex64::new(0.0, 0.0); half],
            c2r_scratch,
            scratch: vec![Complex64::new(0.0, 0.0); scratch_len],
            lane: Vec::new(),
            threads,
        }))
    }

    pub fn execute(&mut self) -> FftResult<()> {
        self.work
            .copy_from_slice(&self.input.as_slice()[..self.rows * self.half]);
        for (axis, fft) in self.axes.iter().enumerate() {
            transform_complex_axis(
                fft.as_ref(),
                &mut self.work,
                &self.in_shape,
                axis,
                &mut self.lane,
                &mut self.scratch,
            );
        }
        let dst = &mut self.output.as_mut_slice()[..self.rows * self.n];
        for row in 0..self.rows {
            let in_base = row * self.half;
            let out_base = row * self.n;
            self.lane_complex
                .copy_from_slice(&self.work[in_base..in_base + self.half]);
            self.lane_complex[0].im = 0.0;
            if self.n % 2 == 0 {
                self.lane_complex[self.half - 1].im = 0.0;
            }
            self.c2r
                .process_with_scratch(
                    &mut self.lane_complex,
                    &mut dst[out_base..out_base + self.n],
                    &mut self.c2r_scratch,
                )
                .map_err(backend_error)?;
        }
        Ok(())
    }

    /// Declared real output geometry.
    pub fn output_shape(&self) -> &[usize] {
        self.output.shape()
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn input_mut(&mut self) -> &mut dyn SampleBuffer<Complex64> {
        &mut *self.input
    }

    pub fn output(&self) -> &dyn SampleBuffer<f64> {
        &*self.output
    }

    pub fn output_mut(&mut self) -> &mut dyn SampleBuffer<f64> {
        &mut *self.output
    }
}

#[cfg(test)]
mod tests {
    use super::{complex_output_shape, take_plan_traces, C2cPlan, R2cPlan, R2rPlan};
    use crate::buffer::{PinnedBuffer, SampleBuffer};
    use crate::error::FftError;
    use crate::{Complex64, Direction, PlannerFlags, TransformFamily};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!((actual - expected).abs() <= tol, "{actual} !~= {expected}");
    }

    /// Deliberately under-backed buffer: declares more shape than storage.
    struct ShortBuffer {
        data: Vec<Complex64>,
        shape: Vec<usize>,
    }

    impl SampleBuffer<Complex64> for ShortBuffer {
        fn shape(&self) -> &[usize] {
            &self.shape
        }

        fn as_slice(&self) -> &[Complex64] {
            &self.data
        }

        fn as_mut_slice(&mut self) -> &mut [Complex64] {
            &mut self.data
        }
    }

    #[test]
    fn complex_output_shape_halves_last_dimension_plus_one() {
        assert_eq!(complex_output_shape(&[97]), vec![49]);
        assert_eq!(complex_output_shape(&[64, 16]), vec![64, 9]);
        assert_eq!(complex_output_shape(&[5, 7, 8]), vec![5, 7, 5]);
    }

    #[test]
    fn c2c_create_rejects_mismatched_shapes() {
        let mut a = vec![Complex64::new(0.0, 0.0); 6];
        let mut b = vec![Complex64::new(0.0, 0.0); 6];
        let mut input = PinnedBuffer::with_shape(&mut a, &[2, 3]).expect("shape");
        let mut output = PinnedBuffer::with_shape(&mut b, &[3, 2]).expect("shape");
        let err = C2cPlan::create(
            &mut input,
            &mut output,
            Direction::Forward,
            PlannerFlags::default(),
            1,
        )
        .expect_err("shapes differ");
        assert!(matches!(err, FftError::ShapeMismatch { .. }));
    }

    #[test]
    fn c2c_create_rejects_under_backed_buffer() {
        let mut short = ShortBuffer {
            data: vec![Complex64::new(0.0, 0.0); 4],
            shape: vec![9],
        };
        let mut b = vec![Complex64::new(0.0, 0.0); 9];
        let mut output = PinnedBuffer::new(&mut b);
        let err = C2cPlan::create(
            &mut short,
            &mut output,
            Direction::Forward,
            PlannerFlags::default(),
            1,
        )
        .expect_err("input capacity below transform size");
        assert_eq!(
            err,
            FftError::BufferTooSmall {
                buffer: "input",
                capacity: 4,
                required: 9,
            }
        );
    }

    #[test]
    fn c2c_create_rejects_zero_threads() {
        let mut a = vec![Complex64::new(0.0, 0.0); 3];
        let mut b = vec![Complex64::new(0.0, 0.0); 3];
        let mut input = PinnedBuffer::new(&mut a);
        let mut output = PinnedBuffer::new(&mut b);
        let err = C2cPlan::create(
            &mut input,
            &mut output,
            Direction::Forward,
            PlannerFlags::default(),
            0,
        )
        .expect_err("zero threads");
        assert_eq!(err, FftError::InvalidThreads);
    }

    #[test]
    fn plans_format_their_geometry_in_debug_output() {
        let mut a = vec![Complex64::new(0.0, 0.0); 6];
        let mut b = vec![Complex64::new(0.0, 0.0); 6];
        let mut input = PinnedBuffer::with_shape(&mut a, &[2, 3]).expect("shape");
        let mut output = PinnedBuffer::with_shape(&mut b, &[2, 3]).expect("shape");
        let plan = C2cPlan::create(
            &mut input,
            &mut output,
            Direction::Forward,
            PlannerFlags::default(),
            1,
        )
        .expect("validation passes")
        .expect("plan available");
        let rendered = format!("{plan:?}");
        assert!(rendered.contains("C2cPlan"));
        assert!(rendered.contains("[2, 3]"));
    }

    #[test]
    fn wisdom_only_without_prior_plan_yields_no_plan() {
        // Length chosen to be unique to this test so parallel tests cannot
        // seed wisdom for it.
        let mut a = vec![Complex64::new(0.0, 0.0); 131];
        let mut b = vec![Complex64::new(0.0, 0.0); 131];
        let mut input = PinnedBuffer::new(&mut a);
        let mut output = PinnedBuffer::new(&mut b);
        let plan = C2cPlan::create(
            &mut input,
            &mut output,
            Direction::Forward,
            PlannerFlags::default().with_wisdom_only(true),
            1,
        )
        .expect("validation passes");
        assert!(plan.is_none());
    }

    #[test]
    fn wisdom_only_succeeds_after_a_normal_plan() {
        let mut a = vec![Complex64::new(0.0, 0.0); 137];
        let mut b = vec![Complex64::new(0.0, 0.0); 137];
        {
            let mut input = PinnedBuffer::new(&mut a);
            let mut output = PinnedBuffer::new(&mut b);
            let plan = C2cPlan::create(
                &mut input,
                &mut output,
                Direction::Forward,
                PlannerFlags::default(),
                1,
            )
            .expect("validation passes");
            assert!(plan.is_some());
        }
        let mut input = PinnedBuffer::new(&mut a);
        let mut output = PinnedBuffer::new(&mut b);
        let plan = C2cPlan::create(
            &mut input,
            &mut output,
            Direction::Forward,
            PlannerFlags::default().with_wisdom_only(true),
            1,
        )
        .expect("validation passes");
        assert!(plan.is_some());
    }

    #[test]
    fn repeated_plans_emit_wisdom_hits_in_traces() {
        let len = 139;
        let mut a = vec![Complex64::new(0.0, 0.0); len];
        let mut b = vec![Complex64::new(0.0, 0.0); len];
        for _ in 0..2 {
            let mut input = PinnedBuffer::new(&mut a);
            let mut output = PinnedBuffer::new(&mut b);
            let plan = C2cPlan::create(
                &mut input,
                &mut output,
                Direction::Forward,
                PlannerFlags::default(),
                1,
            )
            .expect("validation passes");
            assert!(plan.is_some());
        }

        let mut traces = take_plan_traces()
            .into_iter()
            .filter(|trace| trace.family == TransformFamily::C2c && trace.shape == vec![len])
            .collect::<Vec<_>>();
        traces.sort_by(|lhs, rhs| lhs.operation_id.cmp(&rhs.operation_id));
        assert!(traces.len() >= 2);
        let last_two = &traces[traces.len() - 2..];
        assert!(!last_two[0].wisdom_hit);
        assert!(last_two[1].wisdom_hit);
        assert!(last_two[0].to_json_line().contains("\"family\":\"c2c\""));
    }

    #[test]
    fn c2c_forward_backward_roundtrip_scales_by_length() {
        let len = 8;
        let original: Vec<Complex64> = (0..len)
            .map(|i| Complex64::new(i as f64, (i % 3) as f64 - 1.0))
            .collect();
        let mut time = original.clone();
        let mut freq = vec![Complex64::new(0.0, 0.0); len];
        let mut back = vec![Complex64::new(0.0, 0.0); len];

        {
            let mut input = PinnedBuffer::new(&mut time);
            let mut output = PinnedBuffer::new(&mut freq);
            let mut plan = C2cPlan::create(
                &mut input,
                &mut output,
                Direction::Forward,
                PlannerFlags::default(),
                1,
            )
            .expect("validation passes")
            .expect("plan available");
            plan.execute().expect("execute succeeds");
        }
        {
            let mut input = PinnedBuffer::new(&mut freq);
            let mut output = PinnedBuffer::new(&mut back);
            let mut plan = C2cPlan::create(
                &mut input,
                &mut output,
                Direction::Backward,
                PlannerFlags::default(),
                1,
            )
            .expect("validation passes")
            .expect("plan available");
            plan.execute().expect("execute succeeds");
        }

        for (recovered, expected) in back.iter().zip(&original) {
            assert_close(recovered.re, expected.re * len as f64, 1e-9);
            assert_close(recovered.im, expected.im * len as f64, 1e-9);
        }
    }

    #[test]
    fn c2c_plan_reads_input_written_after_creation() {
        let len = 16;
        let mut time = vec![Complex64::new(0.0, 0.0); len];
        let mut freq = vec![Complex64::new(0.0, 0.0); len];
        let mut input = PinnedBuffer::new(&mut time);
        let mut output = PinnedBuffer::new(&mut freq);
        let mut plan = C2cPlan::create(
            &mut input,
            &mut output,
            Direction::Forward,
            PlannerFlags::default(),
            1,
        )
        .expect("validation passes")
        .expect("plan available");

        for sample in plan.input_mut().as_mut_slice() {
            *sample = Complex64::new(1.0, 0.0);
        }
        plan.execute().expect("execute succeeds");

        // A constant signal concentrates everything in the DC bin.
        assert_close(plan.output().as_slice()[0].re, len as f64, 1e-9);
        for bin in &plan.output().as_slice()[1..] {
            assert_close(bin.re, 0.0, 1e-9);
            assert_close(bin.im, 0.0, 1e-9);
        }
    }

    #[test]
    fn r2r_dct_roundtrip_scales_by_half_length() {
        let len = 8;
        let original: Vec<f64> = (0..len).map(|i| (i as f64) * 0.5 - 1.0).collect();
        let mut time = original.clone();
        let mut freq = vec![0.0; len];
        let mut back = vec![0.0; len];

        {
            let mut input = PinnedBuffer::new(&mut time);
            let mut output = PinnedBuffer::new(&mut freq);
            let mut plan = R2rPlan::create(
                &mut input,
                &mut output,
                Direction::Forward,
                PlannerFlags::default(),
                1,
            )
            .expect("validation passes")
            .expect("plan available");
            plan.execute().expect("execute succeeds");
        }
        {
            let mut input = PinnedBuffer::new(&mut freq);
            let mut output = PinnedBuffer::new(&mut back);
            let mut plan = R2rPlan::create(
                &mut input,
                &mut output,
                Direction::Backward,
                PlannerFlags::default(),
                1,
            )
            .expect("validation passes")
            .expect("plan available");
            plan.execute().expect("execute succeeds");
        }

        // DCT-II then DCT-III recovers the input scaled by len/2.
        let scale = len as f64 / 2.0;
        for (recovered, expected) in back.iter().zip(&original) {
            assert_close(*recovered, expected * scale, 1e-9);
        }
    }

    #[test]
    fn r2c_rejects_output_not_matching_derived_shape() {
        let mut a = vec![0.0f64; 10];
        let mut b = vec![Complex64::new(0.0, 0.0); 10];
        let mut input = PinnedBuffer::new(&mut a);
        let mut output = PinnedBuffer::new(&mut b);
        let err = R2cPlan::create(&mut input, &mut output, PlannerFlags::default(), 1)
            .expect_err("derived shape is [6]");
        assert!(matches!(err, FftError::ShapeMismatch { .. }));
    }

    #[test]
    fn r2c_produces_conjugate_symmetric_length() {
        let n = 97;
        let mut a: Vec<f64> = (0..n).map(|i| (i as f64 * 0.1).sin()).collect();
        let mut b = vec![Complex64::new(0.0, 0.0); n / 2 + 1];
        let mut input = PinnedBuffer::new(&mut a);
        let mut output = PinnedBuffer::new(&mut b);
        let mut plan = R2cPlan::create(&mut input, &mut output, PlannerFlags::default(), 1)
            .expect("validation passes")
            .expect("plan available");
        assert_eq!(plan.output_shape(), &[49]);
        plan.execute().expect("execute succeeds");
        assert_eq!(plan.output().len(), 49);
    }
}
