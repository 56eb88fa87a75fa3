//! Backward-program generation.
//!
//! `append_backward` extends a forward program with gradient instructions.
//! Each requested output `y` gets a new input `y@GRAD` carrying its cotangent;
//! instructions are then visited in reverse and each one emits the
//! instructions for its vector-Jacobian product.

use std::collections::HashMap;

use tc_core::types::invert_permutation;
use tracing::debug;

use crate::error::{FrontendError, Result};
use crate::net_builder::NetBuilder;
use crate::program::Program;
use crate::syntax::{InstrKind, Instruction, Variable};

/// Name of the gradient input fed for output `id`.
pub fn grad_var_name(id: &str) -> String {
    format!("{id}@GRAD")
}

/// A forward program extended with its backward pass.
#[derive(Clone, Debug)]
pub struct Backward {
    pub program: Program,
    /// The `<output>@GRAD` inputs, in the order of the requested outputs.
    pub grad_inputs: Vec<Variable>,
    /// Forward input name → variable holding its gradient.
    pub input_grads: HashMap<String, Variable>,
}

pub fn append_backward(program: &Program, outputs: &[Variable]) -> Result<Backward> {
    let mut b = NetBuilder::from_program(program);
    let mut grads: HashMap<String, Variable> = HashMap::new();
    let mut grad_inputs = Vec::with_capacity(outputs.len());

    for out in outputs {
        if program.variable(&out.id) != Some(out) {
            return Err(FrontendError::UnknownVariable(out.id.clone()));
        }
        let g = b.create_input(out.dtype, &out.shape.0, &grad_var_name(&out.id))?;
        grad_inputs.push(g.clone());
        accumulate(&mut b, &mut grads, out, g)?;
    }

    for instr in program.instructions().iter().rev() {
        let Some(g) = instr.outputs.first().and_then(|o| grads.get(&o.id)).cloned() else {
            continue;
        };
        for (input, ig) in instr_vjp(&mut b, instr, &g)? {
            accumulate(&mut b, &mut grads, &input, ig)?;
        }
    }

    let mut input_grads = HashMap::with_capacity(program.inputs().len());
    for x in program.inputs() {
        let g = match grads.remove(&x.id) {
            Some(g) => g,
            // Unreached inputs still get a gradient variable the caller can fetch.
            None => b.fill_constant(&x.shape.0, 0.0, x.dtype)?,
        };
        input_grads.insert(x.id.clone(), g);
    }

    let program = b.build();
    debug!(
        program = %program.name(),
        outputs = outputs.len(),
        instructions = program.len(),
        "appended backward"
    );
    Ok(Backward {
        program,
        grad_inputs,
        input_grads,
    })
}

fn accumulate(
    b: &mut NetBuilder,
    grads: &mut HashMap<String, Variable>,
    var: &Variable,
    g: Variable,
) -> Result<()> {
    let total = match grads.remove(&var.id) {
        Some(prev) => b.elementwise_add(&prev, &g)?,
        None => g,
    };
    grads.insert(var.id.clone(), total);
    Ok(())
}

/// Emit the gradient instructions for one forward instruction.
fn instr_vjp(
    b: &mut NetBuilder,
    instr: &Instruction,
    g: &Variable,
) -> Result<Vec<(Variable, Variable)>> {
    let ins = &instr.inputs;
    let pairs = match &instr.kind {
        InstrKind::Transpose { axis } => {
            vec![(ins[0].clone(), b.transpose(g, &invert_permutation(axis))?)]
        }
        InstrKind::Reshape { .. } => {
            vec![(ins[0].clone(), b.reshape(g, &ins[0].shape.0)?)]
        }
        InstrKind::BroadcastTo { .. } => {
            vec![(ins[0].clone(), unbroadcast(b, g, &ins[0])?)]
        }
        InstrKind::ElementwiseAdd => vec![(ins[0].clone(), g.clone()), (ins[1].clone(), g.clone())],
        InstrKind::ElementwiseSub => {
            vec![(ins[0].clone(), g.clone()), (ins[1].clone(), b.negative(g)?)]
        }
        InstrKind::ElementwiseMul => vec![
            (ins[0].clone(), b.elementwise_mul(g, &ins[1])?),
            (ins[1].clone(), b.elementwise_mul(g, &ins[0])?),
        ],
        InstrKind::ElementwiseDiv => {
            // d(a/b)/db = -a / b^2
            let da = b.elementwise_div(g, &ins[1])?;
            let ga = b.elementwise_mul(g, &ins[0])?;
            let b2 = b.elementwise_mul(&ins[1], &ins[1])?;
            let q = b.elementwise_div(&ga, &b2)?;
            vec![(ins[0].clone(), da), (ins[1].clone(), b.negative(&q)?)]
        }
        InstrKind::Negative => vec![(ins[0].clone(), b.negative(g)?)],
        InstrKind::ReduceSum { axis } => {
            let x = &ins[0];
            let kept = match axis {
                None => g.clone(),
                Some(ax) => {
                    let ax = tc_ops::shape_inference::resolve_axis(*ax, x.shape.ndim())
                        .map_err(|source| FrontendError::Shape {
                            op: "reduce_sum",
                            source,
                        })?;
                    let mut dims = x.shape.0.clone();
                    dims[ax] = 1;
                    b.reshape(g, &dims)?
                }
            };
            vec![(x.clone(), b.broadcast_to(&kept, &x.shape.0)?)]
        }
        InstrKind::Matmul => {
            let (lhs, rhs) = (&ins[0], &ins[1]);
            let rhs_t = b.transpose(rhs, &[1, 0])?;
            let lhs_t = b.transpose(lhs, &[1, 0])?;
            vec![
                (lhs.clone(), b.matmul(g, &rhs_t)?),
                (rhs.clone(), b.matmul(&lhs_t, g)?),
            ]
        }
        InstrKind::FillConstant { .. } => Vec::new(),
    };
    Ok(pairs)
}

/// Sum `g` down to the shape of the broadcast source `x`.
fn unbroadcast(b: &mut NetBuilder, g: &Variable, x: &Variable) -> Result<Variable> {
    let out_dims = &g.shape.0;
    let in_dims = &x.shape.0;
    let pad = out_dims.len() - in_dims.len();

    let mut cur = g.clone();
    for _ in 0..pad {
        cur = b.reduce_sum(&cur, Some(0))?;
    }
    // Highest axis first so earlier indices stay valid.
    for i in (0..in_dims.len()).rev() {
        if in_dims[i] == 1 && out_dims[pad + i] != 1 {
            cur = b.reduce_sum(&cur, Some(i as i32))?;
        }
    }
    if cur.shape != x.shape {
        cur = b.reshape(&cur, in_dims)?;
    }
    Ok(cur)
}
