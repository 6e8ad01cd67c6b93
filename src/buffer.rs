//! Pinned and aligned sample storage consumed by the plan layer.
//!
//! Plans see buffers only through [`SampleBuffer`]: a declared shape plus
//! slice access over the backing storage. The two provided implementations
//! cover the two ownership situations the original wrapper supported:
//! borrowing caller-owned storage ([`PinnedBuffer`]) and owning an
//! alignment-controlled allocation ([`AlignedBuffer`]).

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::ptr::NonNull;
use std::slice;

use crate::error::{FftError, FftResult};

/// Default alignment for SIMD-friendly transform buffers, in bytes.
pub const SIMD_ALIGNMENT: usize = 16;

/// A contiguous memory region with a declared multidimensional shape.
///
/// The element capacity reported by [`len`](SampleBuffer::len) is the
/// backing storage size; the declared shape describes the transform
/// geometry. Implementations in this crate keep the two equal, but the
/// plan layer re-checks capacity against the transform size at creation
/// time and reports [`FftError::BufferTooSmall`] when an implementation
/// declares more shape than it can back.
///
/// The backing address is stable for as long as the buffer is borrowed by
/// a plan; exclusive borrows make that a compile-time guarantee rather
/// than a documented contract.
pub trait SampleBuffer<T> {
    /// Declared per-dimension lengths, outermost first (row-major).
    fn shape(&self) -> &[usize];

    fn as_slice(&self) -> &[T];

    fn as_mut_slice(&mut self) -> &mut [T];

    /// Number of dimensions of the declared shape.
    fn rank(&self) -> usize {
        self.shape().len()
    }

    /// Element capacity of the backing storage.
    fn len(&self) -> usize {
        self.as_slice().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stable address of the first element, valid while the buffer is alive.
    fn as_ptr(&self) -> *const T {
        self.as_slice().as_ptr()
    }
}

pub(crate) fn checked_shape_len(shape: &[usize]) -> FftResult<usize> {
    if shape.is_empty() {
        return Err(FftError::InvalidShape {
            detail: "shape cannot be empty".into(),
        });
    }
    if let Some(axis) = shape.iter().position(|&dim| dim == 0) {
        return Err(FftError::InvalidShape {
            detail: format!("axis {axis} has length zero"),
        });
    }
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| FftError::InvalidShape {
            detail: "shape element count overflows usize".into(),
        })
}

/// Caller-owned storage pinned behind an exclusive borrow for the lifetime
/// of this value, with an attached shape descriptor.
///
/// Because the slice is borrowed mutably, nothing else can move, resize,
/// or touch the storage while the buffer (or a plan referencing it) is
/// alive, and the pin is released exactly once when the value is dropped.
#[derive(Debug)]
pub struct PinnedBuffer<'a, T> {
    data: &'a mut [T],
    shape: Vec<usize>,
}

impl<'a, T> PinnedBuffer<'a, T> {
    /// Pins `data` as a one-dimensional buffer.
    pub fn new(data: &'a mut [T]) -> Self {
        let shape = vec![data.len()];
        Self { data, shape }
    }

    /// Pins `data` with an explicit shape.
    ///
    /// Fails with [`FftError::InvalidShape`] when the shape's element
    /// product does not equal the backing slice length.
    pub fn with_shape(data: &'a mut [T], shape: &[usize]) -> FftResult<Self> {
        let declared = checked_shape_len(shape)?;
        if declared != data.len() {
            return Err(FftError::InvalidShape {
                detail: format!(
                    "shape declares {declared} elements but backing storage holds {}",
                    data.len()
                ),
            });
        }
        Ok(Self {
            data,
            shape: shape.to_vec(),
        })
    }
}

impl<T> SampleBuffer<T> for PinnedBuffer<'_, T> {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn as_slice(&self) -> &[T] {
        self.data
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        self.data
    }
}

/// An owned allocation whose base address is a multiple of a caller-chosen
/// power-of-two alignment, zero-initialized, with row-major indexed access.
///
/// The allocation is freed exactly once when the buffer is dropped; the
/// type is not `Clone`, so a double free cannot be expressed.
pub struct AlignedBuffer<T: Copy + Default> {
    ptr: NonNull<T>,
    len: usize,
    shape: Vec<usize>,
    layout: Layout,
}

// Safety: the buffer exclusively owns its allocation; access follows the
// usual &/&mut rules through the slice accessors.
unsafe impl<T: Copy + Default + Send> Send for AlignedBuffer<T> {}
unsafe impl<T: Copy + Default + Sync> Sync for AlignedBuffer<T> {}

impl<T: Copy + Default> AlignedBuffer<T> {
    /// Allocates a zeroed buffer for `shape` with the given byte alignment.
    pub fn new(alignment: usize, shape: &[usize]) -> FftResult<Self> {
        if !alignment.is_power_of_two() || alignment < std::mem::align_of::<T>() {
            return Err(FftError::InvalidAlignment(alignment));
        }
        if std::mem::size_of::<T>() == 0 {
            return Err(FftError::InvalidShape {
                detail: "element type is zero-sized; nothing to allocate".into(),
            });
        }
        let len = checked_shape_len(shape)?;
        let bytes = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| FftError::InvalidShape {
                detail: "shape byte size overflows usize".into(),
            })?;
        let layout = Layout::from_size_align(bytes, alignment)
            .map_err(|_| FftError::AllocationFailure { bytes, alignment })?;

        // SAFETY: layout is valid and non-zero sized (the element type and
        // all shape dimensions are non-zero), and a null result is reported
        // instead of used.
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(ptr.cast::<T>()) else {
            return Err(FftError::AllocationFailure { bytes, alignment });
        };

        Ok(Self {
            ptr,
            len,
            shape: shape.to_vec(),
            layout,
        })
    }

    /// Allocates with the default SIMD alignment of [`SIMD_ALIGNMENT`] bytes.
    pub fn simd_aligned(shape: &[usize]) -> FftResult<Self> {
        Self::new(SIMD_ALIGNMENT.max(std::mem::align_of::<T>()), shape)
    }

    /// Byte alignment of the allocation.
    pub fn alignment(&self) -> usize {
        self.layout.align()
    }

    fn offset(&self, index: &[usize]) -> usize {
        assert_eq!(
            index.len(),
            self.shape.len(),
            "index rank {} does not match buffer rank {}",
            index.len(),
            self.shape.len()
        );
        let mut flat = 0;
        for (axis, (&idx, &dim)) in index.iter().zip(&self.shape).enumerate() {
            assert!(
                idx < dim,
                "index {idx} out of bounds for axis {axis} with length {dim}"
            );
            flat = flat * dim + idx;
        }
        flat
    }
}

impl<T: Copy + Default> fmt::Debug for AlignedBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlignedBuffer")
            .field("shape", &self.shape)
            .field("len", &self.len)
            .field("alignment", &self.layout.align())
            .finish_non_exhaustive()
    }
}

impl<T: Copy + Default> SampleBuffer<T> for AlignedBuffer<T> {
    fn shape(&self) -> &[usize] {
        &self.shape
    }

    fn as_slice(&self) -> &[T] {
        // SAFETY: ptr/len describe a live allocation owned by self.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as above, and &mut self guarantees exclusive access.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T: Copy + Default> Drop for AlignedBuffer<T> {
    fn drop(&mut self) {
        // SAFETY: ptr was produced by alloc_zeroed with this layout and is
        // released exactly once because Drop runs once and the type is not
        // Clone.
        unsafe { dealloc(self.ptr.as_ptr().cast::<u8>(), self.layout) }
    }
}

impl<T: Copy + Default> Index<usize> for AlignedBuffer<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.as_slice()[index]
    }
}

impl<T: Copy + Default> IndexMut<usize> for AlignedBuffer<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.as_mut_slice()[index]
    }
}

impl<T: Copy + Default> Index<(usize, usize)> for AlignedBuffer<T> {
    type Output = T;

    fn index(&self, (row, col): (usize, usize)) -> &T {
        let flat = self.offset(&[row, col]);
        &self.as_slice()[flat]
    }
}

impl<T: Copy + Default> IndexMut<(usize, usize)> for AlignedBuffer<T> {
    fn index_mut(&mut self, (row, col): (usize, usize)) -> &mut T {
        let flat = self.offset(&[row, col]);
        &mut self.as_mut_slice()[flat]
    }
}

impl<T: Copy + Default> Index<&[usize]> for AlignedBuffer<T> {
    type Output = T;

    fn index(&self, index: &[usize]) -> &T {
        let flat = self.offset(index);
        &self.as_slice()[flat]
    }
}

impl<T: Copy + Default> IndexMut<&[usize]> for AlignedBuffer<T> {
    fn index_mut(&mut self, index: &[usize]) -> &mut T {
        let flat = self.offset(index);
        &mut self.as_mut_slice()[flat]
    }
}
