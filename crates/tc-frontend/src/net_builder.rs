//! Graph-construction API of the compiler frontend.
//!
//! A `NetBuilder` records instructions into a `Program`. Every op builder
//! runs shape inference eagerly, so an invalid program is rejected at the
//! call that would have produced it rather than at compile time.

use std::collections::HashMap;

use tc_core::graph::OpKind;
use tc_core::{DType, Shape, TcError};
use tc_ops::infer_shape;
use tc_ops::shape_inference::check_dims;
use tracing::debug;

use crate::error::{FrontendError, Result};
use crate::program::Program;
use crate::syntax::{InstrKind, Instruction, Variable};

#[derive(Debug)]
pub struct NetBuilder {
    name: String,
    inputs: Vec<Variable>,
    instructions: Vec<Instruction>,
    vars: HashMap<String, Variable>,
    next_id: usize,
}

impl NetBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inputs: Vec::new(),
            instructions: Vec::new(),
            vars: HashMap::new(),
            next_id: 0,
        }
    }

    /// Reopen a built program so more instructions can be appended to it.
    pub fn from_program(program: &Program) -> Self {
        let mut builder = Self::new(program.name.clone());
        for v in &program.inputs {
            builder.vars.insert(v.id.clone(), v.clone());
        }
        for instr in &program.instructions {
            for v in &instr.outputs {
                builder.vars.insert(v.id.clone(), v.clone());
            }
        }
        builder.inputs = program.inputs.clone();
        builder.instructions = program.instructions.clone();
        builder
    }

    /// Declare a program input.
    pub fn create_input(&mut self, dtype: DType, shape: &[i64], name: &str) -> Result<Variable> {
        if self.vars.contains_key(name) {
            return Err(FrontendError::DuplicateName(name.to_string()));
        }
        let var = Variable {
            id: name.to_string(),
            shape: checked_shape("create_input", shape)?,
            dtype,
        };
        self.vars.insert(var.id.clone(), var.clone());
        self.inputs.push(var.clone());
        Ok(var)
    }

    /// Permute axes: output dim `i` is input dim `axis[i]`.
    pub fn transpose(&mut self, x: &Variable, axis: &[usize]) -> Result<Variable> {
        self.unary(InstrKind::Transpose { axis: axis.to_vec() }, x)
    }

    pub fn reshape(&mut self, x: &Variable, shape: &[i64]) -> Result<Variable> {
        let shape = Shape::new(shape.to_vec());
        self.unary(InstrKind::Reshape { shape }, x)
    }

    pub fn broadcast_to(&mut self, x: &Variable, shape: &[i64]) -> Result<Variable> {
        let shape = Shape::new(shape.to_vec());
        if x.shape == shape {
            self.lookup(x)?;
            return Ok(x.clone());
        }
        self.unary(InstrKind::BroadcastTo { shape }, x)
    }

    pub fn negative(&mut self, x: &Variable) -> Result<Variable> {
        self.unary(InstrKind::Negative, x)
    }

    pub fn reduce_sum(&mut self, x: &Variable, axis: Option<i32>) -> Result<Variable> {
        self.unary(InstrKind::ReduceSum { axis }, x)
    }

    pub fn elementwise_add(&mut self, a: &Variable, b: &Variable) -> Result<Variable> {
        self.elementwise(InstrKind::ElementwiseAdd, a, b)
    }

    pub fn elementwise_sub(&mut self, a: &Variable, b: &Variable) -> Result<Variable> {
        self.elementwise(InstrKind::ElementwiseSub, a, b)
    }

    pub fn elementwise_mul(&mut self, a: &Variable, b: &Variable) -> Result<Variable> {
        self.elementwise(InstrKind::ElementwiseMul, a, b)
    }

    pub fn elementwise_div(&mut self, a: &Variable, b: &Variable) -> Result<Variable> {
        self.elementwise(InstrKind::ElementwiseDiv, a, b)
    }

    pub fn matmul(&mut self, a: &Variable, b: &Variable) -> Result<Variable> {
        check_same_dtype("matmul", a, b)?;
        self.emit(InstrKind::Matmul, vec![a.clone(), b.clone()])
    }

    /// A tensor of `shape` filled with `value`.
    pub fn fill_constant(&mut self, shape: &[i64], value: f32, dtype: DType) -> Result<Variable> {
        let out = Variable {
            shape: checked_shape("fill_constant", shape)?,
            id: self.fresh_name(),
            dtype,
        };
        self.push(InstrKind::FillConstant { value }, Vec::new(), out.clone());
        Ok(out)
    }

    /// Finish building.
    pub fn build(self) -> Program {
        debug!(
            program = %self.name,
            inputs = self.inputs.len(),
            instructions = self.instructions.len(),
            "built program"
        );
        Program {
            name: self.name,
            inputs: self.inputs,
            instructions: self.instructions,
        }
    }

    /// Elementwise ops broadcast explicitly: a mismatched operand gets its own
    /// `broadcast_to` instruction first, so lowering only sees equal shapes.
    fn elementwise(&mut self, kind: InstrKind, a: &Variable, b: &Variable) -> Result<Variable> {
        check_same_dtype(kind.name(), a, b)?;
        self.lookup(a)?;
        self.lookup(b)?;
        let out_shape = infer_shape(&OpKind::Add, &[&a.shape, &b.shape])
            .map_err(|source| FrontendError::Shape {
                op: kind.name(),
                source,
            })?;
        let a = self.broadcast_to(a, &out_shape.0)?;
        let b = self.broadcast_to(b, &out_shape.0)?;
        self.emit(kind, vec![a, b])
    }

    fn unary(&mut self, kind: InstrKind, x: &Variable) -> Result<Variable> {
        self.emit(kind, vec![x.clone()])
    }

    /// Infer the output, allocate a fresh name and record the instruction.
    fn emit(&mut self, kind: InstrKind, inputs: Vec<Variable>) -> Result<Variable> {
        for v in &inputs {
            self.lookup(v)?;
        }
        let op = kind.lower().ok_or_else(|| {
            TcError::InvalidArgument(format!("{} does not lower to a graph op", kind.name()))
        })?;
        let shapes: Vec<&Shape> = inputs.iter().map(|v| &v.shape).collect();
        let shape = infer_shape(&op, &shapes).map_err(|source| FrontendError::Shape {
            op: kind.name(),
            source,
        })?;
        let out = Variable {
            id: self.fresh_name(),
            shape,
            dtype: inputs[0].dtype,
        };
        self.push(kind, inputs, out.clone());
        Ok(out)
    }

    fn push(&mut self, kind: InstrKind, inputs: Vec<Variable>, out: Variable) {
        self.vars.insert(out.id.clone(), out.clone());
        self.instructions.push(Instruction {
            kind,
            inputs,
            outputs: vec![out],
        });
    }

    /// The variable must belong to this builder and agree with its record.
    fn lookup(&self, v: &Variable) -> Result<()> {
        match self.vars.get(&v.id) {
            Some(known) if known == v => Ok(()),
            _ => Err(FrontendError::UnknownVariable(v.id.clone())),
        }
    }

    fn fresh_name(&mut self) -> String {
        loop {
            let name = format!("var_{}", self.next_id);
            self.next_id += 1;
            if !self.vars.contains_key(&name) {
                return name;
            }
        }
    }
}

fn check_same_dtype(op: &'static str, a: &Variable, b: &Variable) -> Result<()> {
    if a.dtype != b.dtype {
        return Err(FrontendError::DTypeMismatch {
            op,
            lhs: a.dtype,
            rhs: b.dtype,
        });
    }
    Ok(())
}

fn checked_shape(op: &'static str, dims: &[i64]) -> Result<Shape> {
    let shape = Shape::new(dims.to_vec());
    check_dims(&shape).map_err(|source| FrontendError::Shape { op, source })?;
    Ok(shape)
}
