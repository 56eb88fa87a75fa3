//! Output-shape rules for graph ops, used by the compiler frontend to type
//! every variable before lowering.

pub mod shape_inference;

pub use shape_inference::{ShapeError, infer_shape};
