//! Reverse-mode automatic differentiation (autograd).
//!
//! Provides per-op VJP rules and [`grad`], which walks a stream's lazy graph
//! backwards from a set of outputs and returns cotangents for chosen inputs.

pub mod grad;
pub mod vjp;

pub use grad::grad;
pub use vjp::vjp;
