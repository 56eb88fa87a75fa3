use tc_core::{DType, TcError};
use tc_ops::ShapeError;

use crate::target::Arch;

pub type Result<T> = std::result::Result<T, FrontendError>;

#[derive(thiserror::Error, Debug)]
pub enum FrontendError {
    #[error("variable name {0:?} is already defined")]
    DuplicateName(String),

    #[error("unknown variable {0:?}")]
    UnknownVariable(String),

    #[error("unsupported dtype {0} (programs execute in f32 only)")]
    Unsupported(DType),

    #[error("dtype mismatch in {op}: {lhs} vs {rhs}")]
    DTypeMismatch {
        op: &'static str,
        lhs: DType,
        rhs: DType,
    },

    #[error("{op}: {source}")]
    Shape {
        op: &'static str,
        #[source]
        source: ShapeError,
    },

    #[error("target {0} is not available in this build")]
    TargetUnavailable(Arch),

    #[error("no feed provided for input {0:?}")]
    MissingFeed(String),

    #[error("feed {name:?} has {got} elements, input shape needs {expected}")]
    FeedLength {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Core(#[from] TcError),
}
