//! Compiler frontend for tensor programs.
//!
//! Programs are recorded with a [`NetBuilder`], extended with gradients by
//! [`append_backward`], and lowered onto the `tc-core` graph IR by a
//! [`GraphCompiler`] for a given [`Target`]:
//!
//! ```ignore
//! let mut builder = NetBuilder::new("transpose_test");
//! let x = builder.create_input(DType::F32, &[2, 3], "x")?;
//! let y = builder.transpose(&x, &[1, 0])?;
//! let runtime = GraphCompiler::new(default_target()).build(&builder.build())?;
//! let out = runtime.execute(&[("x", &data)], &[y.id.as_str()])?;
//! ```

pub mod backward;
pub mod compiler;
pub mod error;
pub mod net_builder;
pub mod program;
pub mod syntax;
pub mod target;

pub use backward::{Backward, append_backward, grad_var_name};
pub use compiler::{GraphCompiler, Runtime};
pub use error::{FrontendError, Result};
pub use net_builder::NetBuilder;
pub use program::Program;
pub use syntax::{InstrKind, Instruction, Variable};
pub use target::{Arch, Target, default_target, is_compiled_with_accel, target_from_lookup};
