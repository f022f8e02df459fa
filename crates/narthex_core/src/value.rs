//! Field values.
//!
//! `Value` is the storage cell type of the data view. The variants
//! mirror the storage classes the server transmits; arithmetic is
//! only defined between numerics, everything else degrades to `Null`.

use serde::{Deserialize, Serialize};

/// A single field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Text value
    Alpha(String),
    /// Numeric value
    Numeric(f64),
    /// Boolean value
    Logical(bool),
    /// Absent value
    Null,
}

impl Value {
    /// Check for the absent value
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Truthiness: `Logical` is itself, non-zero numerics are true,
    /// non-empty text is true, `Null` is false
    #[must_use]
    pub fn as_bool(&self) -> bool {
        match self {
            Self::Logical(b) => *b,
            Self::Numeric(n) => *n != 0.0,
            Self::Alpha(s) => !s.is_empty(),
            Self::Null => false,
        }
    }

    /// Numeric view of the value, if it has one
    #[must_use]
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Self::Numeric(n) => Some(*n),
            Self::Logical(true) => Some(1.0),
            Self::Logical(false) => Some(0.0),
            _ => None,
        }
    }

    /// Numeric addition; `Null` acts as zero on either side
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        match (self.numeric_or_zero(), other.numeric_or_zero()) {
            (Some(a), Some(b)) => Self::Numeric(a + b),
            _ => Self::Null,
        }
    }

    /// Numeric subtraction; `Null` acts as zero on either side
    #[must_use]
    pub fn subtract(&self, other: &Self) -> Self {
        match (self.numeric_or_zero(), other.numeric_or_zero()) {
            (Some(a), Some(b)) => Self::Numeric(a - b),
            _ => Self::Null,
        }
    }

    fn numeric_or_zero(&self) -> Option<f64> {
        if self.is_null() {
            Some(0.0)
        } else {
            self.as_numeric()
        }
    }

    /// Storage class name, for diagnostics
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Alpha(_) => "alpha",
            Self::Numeric(_) => "numeric",
            Self::Logical(_) => "logical",
            Self::Null => "null",
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alpha(s) => write!(f, "{}", s),
            Self::Numeric(n) => write!(f, "{}", n),
            Self::Logical(b) => write!(f, "{}", b),
            Self::Null => write!(f, "<null>"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Alpha(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Numeric(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Logical(b)
    }
}
