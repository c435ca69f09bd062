use crate::Normalization;
use crate::descriptor::Direction;
use crate::error::{FftError, FftResult};
use crate::operand::Operand;

/// Length of the packed last dimension of a real transform over `n` samples.
#[must_use]
pub const fn packed_len(n: usize) -> usize {
    n / 2 + 1
}

/// Factor applied to a transform over `n` elements in `direction`.
#[must_use]
pub fn normalization_scale(normalization: Normalization, n: usize, direction: Direction) -> f64 {
    let n = n as f64;
    match (normalization, direction) {
        (Normalization::Unscaled, _)
        | (Normalization::Backward, Direction::Forward)
        | (Normalization::Forward, Direction::Inverse) => 1.0,
        (Normalization::Backward, Direction::Inverse)
        | (Normalization::Forward, Direction::Forward) => 1.0 / n,
        (Normalization::Ortho, _) => 1.0 / n.sqrt(),
    }
}

/// `|z|^2` of every element of a host operand, in row-major order.
pub fn intensity(operand: &Operand) -> FftResult<Vec<f64>> {
    let values = operand.values().ok_or(FftError::Unsupported {
        detail: "intensity needs a host-resident operand",
    })?;
    Ok(values.into_iter().map(|z| z.norm_sqr()).collect())
}
