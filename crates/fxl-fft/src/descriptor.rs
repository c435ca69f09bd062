use serde::{Deserialize, Serialize};

use crate::element::{ElementKind, Precision};
use crate::error::{FftError, FftResult};

/// Highest transform rank a descriptor accepts.
pub const MAX_RANK: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransformKind {
    C2C,
    R2C,
    C2R,
}

impl TransformKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::C2C => "c2c",
            Self::R2C => "r2c",
            Self::C2R => "c2r",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Direction {
    Forward,
    Inverse,
}

impl Direction {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Inverse => "inverse",
        }
    }

    #[must_use]
    pub const fn is_inverse(self) -> bool {
        matches!(self, Self::Inverse)
    }
}

/// What to compute: kind, direction, placement, rank and precision.
///
/// Validated once at construction. R2C is always forward and C2R always inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformDescriptor {
    kind: TransformKind,
    direction: Direction,
    in_place: bool,
    rank: usize,
    precision: Precision,
}

impl TransformDescriptor {
    pub fn new(
        kind: TransformKind,
        direction: Direction,
        in_place: bool,
        rank: usize,
        precision: Precision,
    ) -> FftResult<Self> {
        if rank == 0 || rank > MAX_RANK {
            return Err(FftError::InvalidRank {
                rank,
                max: MAX_RANK,
            });
        }
        match (kind, direction) {
            (TransformKind::R2C, Direction::Inverse) => {
                return Err(FftError::InvalidDescriptor {
                    detail: "real-to-complex transforms are always forward",
                });
            }
            (TransformKind::C2R, Direction::Forward) => {
                return Err(FftError::InvalidDescriptor {
                    detail: "complex-to-real transforms are always inverse",
                });
            }
            _ => {}
        }
        Ok(Self {
            kind,
            direction,
            in_place,
            rank,
            precision,
        })
    }

    pub fn c2c(direction: Direction, rank: usize, precision: Precision) -> FftResult<Self> {
        Self::new(TransformKind::C2C, direction, false, rank, precision)
    }

    pub fn r2c(rank: usize, precision: Precision) -> FftResult<Self> {
        Self::new(TransformKind::R2C, Direction::Forward, false, rank, precision)
    }

    pub fn c2r(rank: usize, precision: Precision) -> FftResult<Self> {
        Self::new(TransformKind::C2R, Direction::Inverse, false, rank, precision)
    }

    /// Same transform, executed in place on a single operand.
    #[must_use]
    pub fn in_place(mut self) -> Self {
        self.in_place = true;
        self
    }

    #[must_use]
    pub const fn kind(&self) -> TransformKind {
        self.kind
    }

    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    #[must_use]
    pub const fn is_in_place(&self) -> bool {
        self.in_place
    }

    #[must_use]
    pub const fn rank(&self) -> usize {
        self.rank
    }

    #[must_use]
    pub const fn precision(&self) -> Precision {
        self.precision
    }

    #[must_use]
    pub const fn input_kind(&self) -> ElementKind {
        match self.kind {
            TransformKind::R2C => ElementKind::real(self.precision),
            TransformKind::C2C | TransformKind::C2R => ElementKind::complex(self.precision),
        }
    }

    #[must_use]
    pub const fn output_kind(&self) -> ElementKind {
        match self.kind {
            TransformKind::C2R => ElementKind::real(self.precision),
            TransformKind::C2C | TransformKind::R2C => ElementKind::complex(self.precision),
        }
    }

    /// True for R2C and C2R.
    #[must_use]
    pub const fn is_real(&self) -> bool {
        !matches!(self.kind, TransformKind::C2C)
    }
}

#[cfg(test)]
mod tests {
    use super::{Direction, MAX_RANK, TransformDescriptor, TransformKind};
    use crate::{Domain, FftError, Precision};

    #[test]
    fn rank_outside_one_to_three_is_rejected() {
        for rank in [0, MAX_RANK + 1] {
            let err = TransformDescriptor::c2c(Direction::Forward, rank, Precision::Double)
                .expect_err("rank out of range");
            assert_eq!(err, FftError::InvalidRank { rank, max: 3 });
        }
    }

    #[test]
    fn real_transforms_have_fixed_direction() {
        assert!(
            TransformDescriptor::new(
                TransformKind::R2C,
                Direction::Inverse,
                false,
                1,
                Precision::Single
            )
            .is_err()
        );
        assert!(
            TransformDescriptor::new(
                TransformKind::C2R,
                Direction::Forward,
                false,
                1,
                Precision::Single
            )
            .is_err()
        );
        let r2c = TransformDescriptor::r2c(2, Precision::Single).expect("valid");
        assert_eq!(r2c.direction(), Direction::Forward);
        assert_eq!(r2c.input_kind().domain, Domain::Real);
        assert_eq!(r2c.output_kind().domain, Domain::Complex);
    }

    #[test]
    fn in_place_builder_keeps_other_fields() {
        let desc = TransformDescriptor::c2r(3, Precision::Double)
            .expect("valid")
            .in_place();
        assert!(desc.is_in_place());
        assert_eq!(desc.rank(), 3);
        assert_eq!(desc.kind(), TransformKind::C2R);
    }
}
