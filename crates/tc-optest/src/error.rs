use tc_core::TcError;
use tc_frontend::FrontendError;

pub type Result<T> = std::result::Result<T, OpTestError>;

#[derive(thiserror::Error, Debug)]
pub enum OpTestError {
    #[error("reference framework: {0}")]
    Reference(#[from] TcError),

    #[error("compiler: {0}")]
    Compiler(#[from] FrontendError),

    #[error(
        "{what}: mismatch at [{index}]: got={got} expected={expected} \
         (max relative diff {max_rel_diff} at [{worst_index}])"
    )]
    Mismatch {
        what: String,
        index: usize,
        got: f32,
        expected: f32,
        max_rel_diff: f32,
        worst_index: usize,
    },

    #[error("{what}: got {got} values, expected {expected}")]
    LengthMismatch {
        what: String,
        got: usize,
        expected: usize,
    },

    #[error("{what}: compiled shape {got:?} differs from reference shape {expected:?}")]
    ShapeMismatch {
        what: String,
        got: Vec<i64>,
        expected: Vec<i64>,
    },

    #[error("invalid case: {0}")]
    InvalidCase(String),

    #[error("invalid config: {0}")]
    Config(String),
}
