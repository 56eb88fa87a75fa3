//! OpTest harness.
//!
//! Checks operators built with the compiler frontend against the reference
//! framework. A test implements [`OpTest`] for its case, then calls
//! [`check_outputs`] or [`check_outputs_and_grads`]; both feed identical
//! random inputs to the two systems and compare elementwise within the
//! tolerances of an [`OpTestConfig`].

pub mod cases;
pub mod compare;
pub mod config;
pub mod data;
pub mod error;
pub mod op_test;

pub use cases::TransposeCase;
pub use compare::{CompareStats, assert_allclose, check_allclose};
pub use config::OpTestConfig;
pub use data::{Feed, random_uniform};
pub use error::{OpTestError, Result};
pub use op_test::{
    CheckReport, CompiledOutputs, OpTest, OpTestTool, ReferenceOutputs, check_outputs,
    check_outputs_and_grads,
};
