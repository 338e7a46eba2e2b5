use std::{
    error::Error,
    fmt::{self, Display},
};

use rand_distr::{NormalError, uniform::Error as UniformError};

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The crate's error type.
///
/// Every variant that concerns a model carries its `name#id` label so that errors raised deep
/// inside a nested architecture can be traced back to the offending layer.
#[derive(Debug)]
pub enum MlErr {
    DimensionConflict {
        model: String,
        dim: String,
        current: usize,
        requested: usize,
    },
    UnresolvedDimension {
        model: String,
        dim: String,
    },
    UnknownDimension {
        model: String,
        dim: String,
    },
    IndexOutOfRange {
        model: String,
        index: usize,
        len: usize,
    },
    ShapeMismatch {
        model: String,
        what: &'static str,
        got: usize,
        expected: usize,
    },
    MissingParam {
        model: String,
        param: String,
    },
    InvalidInput {
        model: String,
        reason: String,
    },
    BackwardUnavailable {
        model: String,
    },
    Initializer(String),
    Spec(serde_json::Error),
}

impl MlErr {
    /// Shorthand for building an `InvalidInput` error.
    pub(crate) fn invalid(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            model: model.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for building a `ShapeMismatch` error.
    pub(crate) fn shape(
        model: impl Into<String>,
        what: &'static str,
        got: usize,
        expected: usize,
    ) -> Self {
        Self::ShapeMismatch {
            model: model.into(),
            what,
            got,
            expected,
        }
    }
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::DimensionConflict {
                model,
                dim,
                current,
                requested,
            } => write!(
                f,
                "dimension {dim} of {model} is already set to {current}, can't change it to {requested}"
            ),
            MlErr::UnresolvedDimension { model, dim } => {
                write!(f, "dimension {dim} of {model} could not be resolved")
            }
            MlErr::UnknownDimension { model, dim } => {
                write!(f, "{model} has no dimension named {dim}")
            }
            MlErr::IndexOutOfRange { model, index, len } => {
                write!(f, "layer index {index} is out of range for {model} with {len} layers")
            }
            MlErr::ShapeMismatch {
                model,
                what,
                got,
                expected,
            } => write!(
                f,
                "shape mismatch for {what} in {model}: got {got}, expected {expected}"
            ),
            MlErr::MissingParam { model, param } => {
                write!(f, "parameter {param} of {model} is not allocated")
            }
            MlErr::InvalidInput { model, reason } => write!(f, "invalid input for {model}: {reason}"),
            MlErr::BackwardUnavailable { model } => write!(
                f,
                "{model} was called in inference mode, there's no backward pass to run"
            ),
            MlErr::Initializer(msg) => write!(f, "invalid initializer: {msg}"),
            MlErr::Spec(e) => write!(f, "invalid architecture spec: {e}"),
        }
    }
}

impl Error for MlErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MlErr::Spec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for MlErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Spec(value)
    }
}

impl From<NormalError> for MlErr {
    fn from(value: NormalError) -> Self {
        Self::Initializer(value.to_string())
    }
}

impl From<UniformError> for MlErr {
    fn from(value: UniformError) -> Self {
        Self::Initializer(value.to_string())
    }
}
