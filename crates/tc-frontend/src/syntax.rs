//! Program building blocks: variables and instructions.

use std::fmt;

use tc_core::graph::OpKind;
use tc_core::{DType, Shape};

/// A named, typed value in a program.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub id: String,
    pub shape: Shape,
    pub dtype: DType,
}

impl Variable {
    pub fn numel(&self) -> usize {
        self.shape.numel() as usize
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}{}", self.id, self.dtype, self.shape)
    }
}

/// Instruction opcodes understood by the compiler.
#[derive(Clone, Debug, PartialEq)]
pub enum InstrKind {
    /// Output dim `i` is input dim `axis[i]`.
    Transpose { axis: Vec<usize> },
    Reshape { shape: Shape },
    BroadcastTo { shape: Shape },
    ElementwiseAdd,
    ElementwiseSub,
    ElementwiseMul,
    ElementwiseDiv,
    Negative,
    /// `None` sums every element into a `[1]` result.
    ReduceSum { axis: Option<i32> },
    Matmul,
    /// Materialise a tensor of the output shape holding one value.
    FillConstant { value: f32 },
}

impl InstrKind {
    pub fn name(&self) -> &'static str {
        match self {
            InstrKind::Transpose { .. } => "transpose",
            InstrKind::Reshape { .. } => "reshape",
            InstrKind::BroadcastTo { .. } => "broadcast_to",
            InstrKind::ElementwiseAdd => "elementwise_add",
            InstrKind::ElementwiseSub => "elementwise_sub",
            InstrKind::ElementwiseMul => "elementwise_mul",
            InstrKind::ElementwiseDiv => "elementwise_div",
            InstrKind::Negative => "negative",
            InstrKind::ReduceSum { .. } => "reduce_sum",
            InstrKind::Matmul => "matmul",
            InstrKind::FillConstant { .. } => "fill_constant",
        }
    }

    /// The graph op this instruction lowers to. `FillConstant` has none: it
    /// becomes a constant node at execution time.
    pub fn lower(&self) -> Option<OpKind> {
        let op = match self {
            InstrKind::Transpose { axis } => OpKind::Transpose {
                axes: Some(axis.clone()),
            },
            InstrKind::Reshape { shape } => OpKind::Reshape {
                new_shape: shape.clone(),
            },
            InstrKind::BroadcastTo { shape } => OpKind::Broadcast {
                target_shape: shape.clone(),
            },
            InstrKind::ElementwiseAdd => OpKind::Add,
            InstrKind::ElementwiseSub => OpKind::Sub,
            InstrKind::ElementwiseMul => OpKind::Mul,
            InstrKind::ElementwiseDiv => OpKind::Div,
            InstrKind::Negative => OpKind::Neg,
            InstrKind::ReduceSum { axis } => OpKind::Sum { axis: *axis },
            InstrKind::Matmul => OpKind::MatMul,
            InstrKind::FillConstant { .. } => return None,
        };
        Some(op)
    }
}

/// One step of a program: `outputs = kind(inputs)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Instruction {
    pub kind: InstrKind,
    pub inputs: Vec<Variable>,
    pub outputs: Vec<Variable>,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outs: Vec<&str> = self.outputs.iter().map(|v| v.id.as_str()).collect();
        let ins: Vec<&str> = self.inputs.iter().map(|v| v.id.as_str()).collect();
        write!(f, "{} = {}({}", outs.join(", "), self.kind.name(), ins.join(", "))?;
        match &self.kind {
            InstrKind::Transpose { axis } => write!(f, ", axis={axis:?}")?,
            InstrKind::Reshape { shape } | InstrKind::BroadcastTo { shape } => {
                write!(f, ", shape={shape}")?
            }
            InstrKind::ReduceSum { axis: Some(ax) } => write!(f, ", axis={ax}")?,
            InstrKind::FillConstant { value } => write!(f, "value={value}")?,
            _ => {}
        }
        f.write_str(")")
    }
}
