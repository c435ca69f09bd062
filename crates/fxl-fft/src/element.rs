use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Scalar precision of an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Precision {
    Single,
    #[default]
    Double,
}

impl Precision {
    /// Size in bytes of one real scalar.
    #[must_use]
    pub const fn scalar_bytes(self) -> usize {
        match self {
            Self::Single => 4,
            Self::Double => 8,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Single => "f32",
            Self::Double => "f64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Domain {
    Real,
    Complex,
}

/// Element interpretation of an operand buffer: real or complex, single or double.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementKind {
    pub precision: Precision,
    pub domain: Domain,
}

impl ElementKind {
    #[must_use]
    pub const fn real(precision: Precision) -> Self {
        Self {
            precision,
            domain: Domain::Real,
        }
    }

    #[must_use]
    pub const fn complex(precision: Precision) -> Self {
        Self {
            precision,
            domain: Domain::Complex,
        }
    }

    /// Scalars per element: 1 for real, 2 for complex.
    #[must_use]
    pub const fn scalars(self) -> usize {
        match self.domain {
            Domain::Real => 1,
            Domain::Complex => 2,
        }
    }

    /// Bytes per element. A complex element counts twice the scalar size.
    #[must_use]
    pub const fn size_bytes(self) -> usize {
        self.scalars() * self.precision.scalar_bytes()
    }

    #[must_use]
    pub const fn is_complex(self) -> bool {
        matches!(self.domain, Domain::Complex)
    }
}

impl Display for ElementKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let domain = match self.domain {
            Domain::Real => "real",
            Domain::Complex => "complex",
        };
        write!(f, "{domain}<{}>", self.precision.name())
    }
}

/// Physical arrangement of an operand's elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StorageLayout {
    /// Interleaved (re, im) pairs, contiguous.
    #[default]
    AoS,
    /// Separate real and imaginary planes.
    SoA,
    /// Caller-supplied strides over an interleaved buffer.
    Strided,
}

/// Where an operand's buffer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Residency {
    #[default]
    Host,
    Device,
}
