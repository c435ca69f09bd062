//! Unnormalized N-d transforms on host scalars, built on `rustfft`.
//!
//! Shared by the reference backends. Buffers are interleaved scalars; the
//! real side of an in-place plan uses rows of `2 * packed[last]` scalars.

use std::fmt::{Debug, Formatter};

use rustfft::num_complex::Complex;
use rustfft::num_traits::Zero;
use rustfft::{FftDirection, FftNum, FftPlanner};

use crate::backend::PlanRequest;
use crate::descriptor::{Direction, TransformKind};
use crate::element::Precision;
use crate::error::BackendError;
use crate::operand::HostData;

/// A validated plan in canonical (slowest-first) order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct KernelPlan {
    pub kind: TransformKind,
    pub direction: Direction,
    pub precision: Precision,
    pub full: Vec<usize>,
    pub in_place: bool,
}

impl KernelPlan {
    pub fn from_request(request: &PlanRequest) -> Result<Self, BackendError> {
        let full = request.canonical_extents();
        if full.is_empty() || full.len() != request.rank || full.contains(&0) {
            return Err(BackendError::new(format!(
                "invalid plan extents {full:?} for rank {}",
                request.rank
            )));
        }
        if request.input_kind.precision != request.output_kind.precision {
            return Err(BackendError::new("mixed-precision plans are not supported"));
        }
        Ok(Self {
            kind: request.kind,
            direction: request.direction,
            precision: request.input_kind.precision,
            full,
            in_place: request.in_place,
        })
    }

    fn count(&self) -> usize {
        self.full.iter().product()
    }

    fn last(&self) -> usize {
        self.full[self.full.len() - 1]
    }

    fn packed_last(&self) -> usize {
        self.last() / 2 + 1
    }

    fn rows(&self) -> usize {
        self.count() / self.last()
    }

    /// Scalars per row of the real side.
    fn real_pitch(&self) -> usize {
        if self.in_place {
            2 * self.packed_last()
        } else {
            self.last()
        }
    }
}

/// Planners for both precisions. `rustfft` caches plans by length internally.
pub(crate) struct HostKernel {
    single: FftPlanner<f32>,
    double: FftPlanner<f64>,
}

impl Default for HostKernel {
    fn default() -> Self {
        Self {
            single: FftPlanner::new(),
            double: FftPlanner::new(),
        }
    }
}

impl Debug for HostKernel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostKernel").finish_non_exhaustive()
    }
}

impl HostKernel {
    /// Run `plan` on `input`, writing `output`, or back into `input` when `output` is `None`.
    pub fn execute(
        &mut self,
        plan: &KernelPlan,
        input: &mut HostData,
        output: Option<&mut HostData>,
    ) -> Result<(), BackendError> {
        match (input, output) {
            (HostData::F32(input), None) => {
                let result = transform(&mut self.single, plan, input)?;
                store(&result, input)
            }
            (HostData::F64(input), None) => {
                let result = transform(&mut self.double, plan, input)?;
                store(&result, input)
            }
            (HostData::F32(input), Some(HostData::F32(output))) => {
                let result = transform(&mut self.single, plan, input)?;
                store(&result, output)
            }
            (HostData::F64(input), Some(HostData::F64(output))) => {
                let result = transform(&mut self.double, plan, input)?;
                store(&result, output)
            }
            _ => Err(BackendError::new("input and output precision differ")),
        }
    }
}

fn store<T: Copy>(result: &[T], target: &mut [T]) -> Result<(), BackendError> {
    if target.len() < result.len() {
        return Err(BackendError::new(format!(
            "output buffer holds {} scalars, {} required",
            target.len(),
            result.len()
        )));
    }
    target[..result.len()].copy_from_slice(result);
    Ok(())
}

/// Output scalars of `plan` applied to `input`, in the output's physical layout.
fn transform<T: FftNum>(
    planner: &mut FftPlanner<T>,
    plan: &KernelPlan,
    input: &[T],
) -> Result<Vec<T>, BackendError> {
    let inverse = plan.direction.is_inverse();
    match plan.kind {
        TransformKind::C2C => {
            let mut data = load_complex(input, plan.count())?;
            transform_axes(planner, &mut data, &plan.full, inverse);
            Ok(interleave(&data))
        }
        TransformKind::R2C => {
            let mut data = load_real(input, plan.rows(), plan.last(), plan.real_pitch())?;
            transform_axes(planner, &mut data, &plan.full, false);
            let packed = truncate_rows(&data, plan.rows(), plan.last(), plan.packed_last());
            Ok(interleave(&packed))
        }
        TransformKind::C2R => {
            let packed = load_complex(input, plan.rows() * plan.packed_last())?;
            let mut data = rebuild_hermitian(&packed, &plan.full);
            transform_axes(planner, &mut data, &plan.full, true);
            Ok(real_rows(&data, plan.rows(), plan.last(), plan.real_pitch()))
        }
    }
}

fn load_complex<T: FftNum>(input: &[T], count: usize) -> Result<Vec<Complex<T>>, BackendError> {
    if input.len() < 2 * count {
        return Err(BackendError::new(format!(
            "input buffer holds {} scalars, {} required",
            input.len(),
            2 * count
        )));
    }
    Ok(input[..2 * count]
        .chunks_exact(2)
        .map(|pair| Complex::new(pair[0], pair[1]))
        .collect())
}

fn load_real<T: FftNum>(
    input: &[T],
    rows: usize,
    width: usize,
    pitch: usize,
) -> Result<Vec<Complex<T>>, BackendError> {
    let required = (rows - 1) * pitch + width;
    if input.len() < required {
        return Err(BackendError::new(format!(
            "input buffer holds {} scalars, {required} required",
            input.len()
        )));
    }
    let mut data = Vec::with_capacity(rows * width);
    for row in 0..rows {
        let start = row * pitch;
        data.extend(
            input[start..start + width]
                .iter()
                .map(|&value| Complex::new(value, T::zero())),
        );
    }
    Ok(data)
}

fn interleave<T: FftNum>(data: &[Complex<T>]) -> Vec<T> {
    data.iter().flat_map(|z| [z.re, z.im]).collect()
}

fn truncate_rows<T: FftNum>(
    data: &[Complex<T>],
    rows: usize,
    width: usize,
    keep: usize,
) -> Vec<Complex<T>> {
    (0..rows)
        .flat_map(move |row| data[row * width..row * width + keep].iter().copied())
        .collect()
}

/// Real parts laid out in rows of `pitch` scalars; padding is zeroed.
fn real_rows<T: FftNum>(data: &[Complex<T>], rows: usize, width: usize, pitch: usize) -> Vec<T> {
    let mut out = vec![T::zero(); rows * pitch.max(width)];
    for row in 0..rows {
        for col in 0..width {
            out[row * pitch + col] = data[row * width + col].re;
        }
    }
    out
}

/// Expand a packed half spectrum to the full Hermitian-symmetric spectrum.
///
/// Entries beyond the packed width are `conj(X[(F - k) mod F])` taken over
/// every dimension.
fn rebuild_hermitian<T: FftNum>(packed: &[Complex<T>], full: &[usize]) -> Vec<Complex<T>> {
    let rank = full.len();
    let last = full[rank - 1];
    let packed_last = last / 2 + 1;
    let count: usize = full.iter().product();
    let mut spectrum = vec![Complex::zero(); count];
    let mut idx = vec![0usize; rank];

    for slot in &mut spectrum {
        let value = if idx[rank - 1] < packed_last {
            packed[packed_offset(&idx, full, packed_last)]
        } else {
            let mirror: Vec<usize> = idx
                .iter()
                .zip(full)
                .map(|(&k, &extent)| (extent - k) % extent)
                .collect();
            packed[packed_offset(&mirror, full, packed_last)].conj()
        };
        *slot = value;

        for dim in (0..rank).rev() {
            idx[dim] += 1;
            if idx[dim] < full[dim] {
                break;
            }
            idx[dim] = 0;
        }
    }
    spectrum
}

fn packed_offset(idx: &[usize], full: &[usize], packed_last: usize) -> usize {
    let rank = full.len();
    let row = idx[..rank - 1]
        .iter()
        .zip(&full[..rank - 1])
        .fold(0usize, |acc, (&index, &extent)| acc * extent + index);
    row * packed_last + idx[rank - 1]
}

/// Unnormalized transform along every axis of a row-major buffer.
fn transform_axes<T: FftNum>(
    planner: &mut FftPlanner<T>,
    data: &mut [Complex<T>],
    shape: &[usize],
    inverse: bool,
) {
    let direction = if inverse {
        FftDirection::Inverse
    } else {
        FftDirection::Forward
    };
    for axis in 0..shape.len() {
        let axis_len = shape[axis];
        if axis_len == 1 {
            continue;
        }
        let fft = planner.plan_fft(axis_len, direction);
        let stride = shape[axis + 1..].iter().product::<usize>().max(1);
        let repeats = shape[..axis].iter().product::<usize>().max(1);
        let block = axis_len * stride;

        let mut line = vec![Complex::zero(); axis_len];
        for outer in 0..repeats {
            let base = outer * block;
            for offset in 0..stride {
                for (index, slot) in line.iter_mut().enumerate() {
                    *slot = data[base + index * stride + offset];
                }
                fft.process(&mut line);
                for (index, &value) in line.iter().enumerate() {
                    data[base + index * stride + offset] = value;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{HostKernel, KernelPlan};
    use crate::descriptor::{Direction, TransformKind};
    use crate::element::Precision;
    use crate::operand::HostData;

    fn plan(kind: TransformKind, direction: Direction, full: &[usize], in_place: bool) -> KernelPlan {
        KernelPlan {
            kind,
            direction,
            precision: Precision::Double,
            full: full.to_vec(),
            in_place,
        }
    }

    fn scalars(data: &HostData) -> Vec<f64> {
        (0..data.len()).map(|i| data.get(i)).collect()
    }

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!((actual - expected).abs() <= tol, "{actual} !~= {expected}");
    }

    #[test]
    fn r2c_of_impulse_is_flat() {
        let mut kernel = HostKernel::default();
        let mut input = HostData::F64(vec![1.0, 0.0, 0.0, 0.0]);
        let mut output = HostData::F64(vec![0.0; 6]);
        kernel
            .execute(
                &plan(TransformKind::R2C, Direction::Forward, &[4], false),
                &mut input,
                Some(&mut output),
            )
            .expect("r2c should succeed");
        assert_eq!(scalars(&output), vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn c2r_inverts_r2c_up_to_scale() {
        let mut kernel = HostKernel::default();
        let signal = vec![1.0, -2.0, 0.5, 3.0, 4.0, -1.0];
        let mut input = HostData::F64(signal.clone());
        let mut spectrum = HostData::F64(vec![0.0; 2 * 2 * 2]);
        kernel
            .execute(
                &plan(TransformKind::R2C, Direction::Forward, &[2, 3], false),
                &mut input,
                Some(&mut spectrum),
            )
            .expect("r2c");
        let mut restored = HostData::F64(vec![0.0; 6]);
        kernel
            .execute(
                &plan(TransformKind::C2R, Direction::Inverse, &[2, 3], false),
                &mut spectrum,
                Some(&mut restored),
            )
            .expect("c2r");
        for (actual, expected) in scalars(&restored).iter().zip(&signal) {
            assert_close(actual / 6.0, *expected, 1e-12);
        }
    }

    #[test]
    fn in_place_r2c_reads_padded_rows() {
        let mut kernel = HostKernel::default();
        // two rows of 4 reals, pitch 6 scalars (3 complex)
        let mut buffer = HostData::F64(vec![
            1.0, 1.0, 1.0, 1.0, 9.0, 9.0, //
            0.0, 0.0, 0.0, 0.0, 9.0, 9.0,
        ]);
        kernel
            .execute(
                &plan(TransformKind::R2C, Direction::Forward, &[2, 4], true),
                &mut buffer,
                None,
            )
            .expect("in-place r2c");
        let out = scalars(&buffer);
        // DC of the 2x4 transform sums every meaningful real, padding excluded
        assert_close(out[0], 4.0, 1e-12);
        assert_close(out[1], 0.0, 1e-12);
        // second row holds the difference between rows at frequency 0
        assert_close(out[6], 4.0, 1e-12);
    }

    #[test]
    fn precision_mismatch_is_reported() {
        let mut kernel = HostKernel::default();
        let mut input = HostData::F32(vec![0.0; 8]);
        let mut output = HostData::F64(vec![0.0; 8]);
        assert!(
            kernel
                .execute(
                    &plan(TransformKind::C2C, Direction::Forward, &[4], false),
                    &mut input,
                    Some(&mut output),
                )
                .is_err()
        );
    }
}
