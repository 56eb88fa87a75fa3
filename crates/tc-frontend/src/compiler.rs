//! Lowering of programs onto the graph IR and their execution.
//!
//! Compilation is a validation pass plus a one-to-one mapping of instructions
//! to `OpKind`s. Each `Runtime::execute` builds those ops on a fresh `Stream`
//! bound to the target's backend, so runs never share buffers.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use smallvec::SmallVec;
use tc_core::backend::Stream;
use tc_core::backend::cpu_stream;
use tc_core::graph::{OpKind, TensorMeta};
use tc_core::{DType, NodeId};
use tracing::{debug, info};

use crate::error::{FrontendError, Result};
use crate::program::Program;
use crate::syntax::{InstrKind, Variable};
use crate::target::{Arch, Target};

#[derive(Debug, Clone)]
pub struct GraphCompiler {
    target: Target,
}

impl GraphCompiler {
    pub fn new(target: Target) -> Self {
        Self { target }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Validate `program` for this target and lower it.
    pub fn build(&self, program: &Program) -> Result<Runtime> {
        if !self.target.is_available() {
            return Err(FrontendError::TargetUnavailable(self.target.arch));
        }
        let executor = Executor::for_target(self.target)?;

        let mut defined: HashSet<&str> = HashSet::new();
        for v in program.inputs() {
            check_dtype(v)?;
            defined.insert(v.id.as_str());
        }

        let mut steps = Vec::with_capacity(program.len());
        for instr in program.instructions() {
            for v in &instr.inputs {
                if !defined.contains(v.id.as_str()) {
                    return Err(FrontendError::UnknownVariable(v.id.clone()));
                }
            }
            let [output] = instr.outputs.as_slice() else {
                return Err(tc_core::TcError::InvalidArgument(format!(
                    "{} must have exactly one output",
                    instr.kind.name()
                ))
                .into());
            };
            check_dtype(output)?;
            let op = match (&instr.kind, instr.kind.lower()) {
                (InstrKind::FillConstant { value }, _) => Step::Fill(*value),
                (_, Some(op)) => Step::Op(op),
                (kind, None) => {
                    return Err(tc_core::TcError::InvalidArgument(format!(
                        "{} has no lowering",
                        kind.name()
                    ))
                    .into());
                }
            };
            steps.push(Lowered {
                step: op,
                inputs: instr.inputs.iter().map(|v| v.id.clone()).collect(),
                output: output.clone(),
            });
            defined.insert(output.id.as_str());
        }

        info!(
            program = %program.name(),
            target = %self.target,
            steps = steps.len(),
            "compiled program"
        );
        Ok(Runtime {
            name: program.name().to_string(),
            target: self.target,
            inputs: program.inputs().to_vec(),
            steps,
            executor,
        })
    }
}

fn check_dtype(v: &Variable) -> Result<()> {
    if v.dtype != DType::F32 {
        return Err(FrontendError::Unsupported(v.dtype));
    }
    Ok(())
}

#[derive(Debug)]
enum Step {
    Op(OpKind),
    Fill(f32),
}

#[derive(Debug)]
struct Lowered {
    step: Step,
    inputs: SmallVec<[String; 2]>,
    output: Variable,
}

/// Backend factory for a target; one fresh stream per execution.
#[derive(Debug)]
enum Executor {
    Host,
    #[cfg(feature = "accel")]
    Accel(tc_accel::TiledBackend),
}

impl Executor {
    fn for_target(target: Target) -> Result<Self> {
        match target.arch {
            Arch::Host => Ok(Executor::Host),
            #[cfg(feature = "accel")]
            Arch::Accel => Ok(Executor::Accel(tc_accel::TiledBackend::from_env()?)),
            #[cfg(not(feature = "accel"))]
            Arch::Accel => Err(FrontendError::TargetUnavailable(Arch::Accel)),
        }
    }

    fn stream(&self) -> Arc<Stream> {
        match self {
            Executor::Host => cpu_stream(),
            #[cfg(feature = "accel")]
            Executor::Accel(backend) => Arc::new(Stream::new(Box::new(backend.clone()))),
        }
    }
}

/// A compiled program, ready to run.
#[derive(Debug)]
pub struct Runtime {
    name: String,
    target: Target,
    inputs: Vec<Variable>,
    steps: Vec<Lowered>,
    executor: Executor,
}

impl Runtime {
    pub fn target(&self) -> Target {
        self.target
    }

    /// Run with `feeds` bound to the program inputs and return one buffer per
    /// entry of `fetches`, in order.
    pub fn execute(&self, feeds: &[(&str, &[f32])], fetches: &[&str]) -> Result<Vec<Vec<f32>>> {
        let stream = self.executor.stream();
        let mut nodes: HashMap<&str, NodeId> =
            HashMap::with_capacity(self.inputs.len() + self.steps.len());

        for (name, _) in feeds {
            if !self.inputs.iter().any(|v| v.id == *name) {
                return Err(FrontendError::UnknownVariable(name.to_string()));
            }
        }
        for v in &self.inputs {
            let data = feeds
                .iter()
                .find(|(name, _)| *name == v.id)
                .map(|(_, data)| *data)
                .ok_or_else(|| FrontendError::MissingFeed(v.id.clone()))?;
            if data.len() != v.numel() {
                return Err(FrontendError::FeedLength {
                    name: v.id.clone(),
                    expected: v.numel(),
                    got: data.len(),
                });
            }
            let id = stream.add_constant(data.to_vec(), TensorMeta::f32(v.shape.clone()));
            nodes.insert(v.id.as_str(), id);
        }

        for lowered in &self.steps {
            let meta = TensorMeta::f32(lowered.output.shape.clone());
            let id = match &lowered.step {
                Step::Fill(value) => {
                    stream.add_constant(vec![*value; lowered.output.numel()], meta)
                }
                Step::Op(op) => {
                    let inputs = lowered
                        .inputs
                        .iter()
                        .map(|name| {
                            nodes
                                .get(name.as_str())
                                .copied()
                                .ok_or_else(|| FrontendError::UnknownVariable(name.clone()))
                        })
                        .collect::<Result<SmallVec<[NodeId; 2]>>>()?;
                    stream.add_op(op.clone(), inputs, meta)
                }
            };
            nodes.insert(lowered.output.id.as_str(), id);
        }

        let mut results = Vec::with_capacity(fetches.len());
        for &name in fetches {
            let id = *nodes
                .get(name)
                .ok_or_else(|| FrontendError::UnknownVariable(name.to_string()))?;
            stream.eval(id)?;
            let buf = stream
                .get_buffer(id)
                .ok_or(tc_core::TcError::Graph("fetched node was not materialised"))?;
            results.push(buf);
        }
        debug!(
            program = %self.name,
            backend = stream.backend_name(),
            nodes = stream.graph_node_count(),
            fetched = results.len(),
            "executed program"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net_builder::NetBuilder;

    const X: &[f32] = &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0];

    fn transpose_program() -> Program {
        let mut b = NetBuilder::new("transpose_test");
        let x = b.create_input(DType::F32, &[2, 3], "x").unwrap();
        b.transpose(&x, &[1, 0]).unwrap();
        b.build()
    }

    #[test]
    fn test_host_transpose() {
        let rt = GraphCompiler::new(Target::host())
            .build(&transpose_program())
            .unwrap();
        let out = rt
            .execute(&[("x", X)], &["var_0"])
            .unwrap();
        assert_eq!(out, vec![vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]]);
    }

    #[test]
    fn test_fetch_input_directly() {
        let rt = GraphCompiler::new(Target::host())
            .build(&transpose_program())
            .unwrap();
        let out = rt.execute(&[("x", X)], &["x"]).unwrap();
        assert_eq!(out[0], X.to_vec());
    }

    #[test]
    fn test_missing_and_bad_feeds() {
        let rt = GraphCompiler::new(Target::host())
            .build(&transpose_program())
            .unwrap();
        assert!(matches!(
            rt.execute(&[], &["var_0"]),
            Err(FrontendError::MissingFeed(n)) if n == "x"
        ));
        assert!(matches!(
            rt.execute(&[("x", &X[..2])], &["var_0"]),
            Err(FrontendError::FeedLength { expected: 6, got: 2, .. })
        ));
        assert!(matches!(
            rt.execute(&[("x", X)], &["nope"]),
            Err(FrontendError::UnknownVariable(_))
        ));
    }

    #[test]
    fn test_non_f32_rejected() {
        let mut b = NetBuilder::new("ints");
        let x = b.create_input(DType::I32, &[2, 3], "x").unwrap();
        b.transpose(&x, &[1, 0]).unwrap();
        assert!(matches!(
            GraphCompiler::new(Target::host()).build(&b.build()),
            Err(FrontendError::Unsupported(DType::I32))
        ));
    }

    #[test]
    fn test_fill_constant_lowering() {
        let mut b = NetBuilder::new("fill");
        b.create_input(DType::F32, &[1], "x").unwrap();
        let z = b.fill_constant(&[2, 2], 0.0, DType::F32).unwrap();
        let rt = GraphCompiler::new(Target::host()).build(&b.build()).unwrap();
        let out = rt.execute(&[("x", &X[..1])], &[z.id.as_str()]).unwrap();
        assert_eq!(out[0], vec![0.0; 4]);
    }

    #[cfg(not(feature = "accel"))]
    #[test]
    fn test_accel_unavailable_without_feature() {
        assert!(matches!(
            GraphCompiler::new(Target::accel()).build(&transpose_program()),
            Err(FrontendError::TargetUnavailable(Arch::Accel))
        ));
    }

    #[cfg(feature = "accel")]
    #[test]
    fn test_accel_transpose() {
        let rt = GraphCompiler::new(Target::accel())
            .build(&transpose_program())
            .unwrap();
        let out = rt
            .execute(&[("x", X)], &["var_0"])
            .unwrap();
        assert_eq!(out, vec![vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]]);
    }
}
