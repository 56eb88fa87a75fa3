//! Reference tensor framework: lazy tensors over a graph IR.
//!
//! `tc-core` provides the foundational types (`Tensor`, `DType`, `Shape`),
//! the graph IR shared with the compiler frontend, and the `Backend` trait that
//! every kernel set implements.
//!
//! # Backends
//!
//! - `CpuRefBackend` (built in): plain Rust correctness oracle
//! - `tc-accel`: tiled, parallel kernels used by the compiler's accelerator target

pub mod backend;
pub mod cpu_kernels;
pub mod graph;
pub mod tensor;
pub mod types;

pub use graph::NodeId;
pub use tensor::Tensor;
pub use types::{DType, Shape};

pub type Result<T> = std::result::Result<T, TcError>;

#[derive(thiserror::Error, Debug)]
pub enum TcError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<i64>, got: Vec<i64> },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported dtype {0} (only f32 is executable)")]
    UnsupportedDType(DType),

    #[error("Backend not available: {0}")]
    BackendUnavailable(&'static str),

    #[error("Graph error: {0}")]
    Graph(&'static str),
}
