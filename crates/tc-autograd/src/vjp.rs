//! Per-op gradient rules for the reference framework.
//!
//! Each rule maps the cotangent of an op's output to one cotangent per input,
//! built from the same lazy `Tensor` ops so the backward pass is itself a
//! graph on the forward stream.

use tc_core::graph::OpKind;
use tc_core::types::invert_permutation;
use tc_core::{Result, Shape, TcError, Tensor};

/// Cotangents for `inputs` given the cotangent `dout` of their op's output.
pub fn vjp(op: &OpKind, inputs: &[Tensor], dout: &Tensor) -> Result<Vec<Tensor>> {
    let x = inputs
        .first()
        .ok_or_else(|| TcError::InvalidArgument(format!("{} has no inputs", op.name())))?;
    match op {
        OpKind::Transpose { axes } => {
            let perm = match axes {
                Some(p) => p.clone(),
                None => (0..x.shape().ndim()).rev().collect(),
            };
            Ok(vec![dout.transpose(Some(&invert_permutation(&perm)))?])
        }
        OpKind::Reshape { .. } => Ok(vec![dout.reshape(x.shape())?]),
        OpKind::Broadcast { .. } => Ok(vec![unbroadcast(dout, x.shape())?]),
        OpKind::Sum { axis: None } => Ok(vec![dout.reshape(&Shape::scalar())?.broadcast_to(x.shape())?]),
        OpKind::Sum { axis: Some(axis) } => {
            let ax = x.shape().resolve_axis(*axis).ok_or_else(|| {
                TcError::InvalidArgument(format!("axis {axis} out of range for {}", x.shape()))
            })?;
            let mut kept = x.shape().0.clone();
            kept[ax] = 1;
            Ok(vec![dout.reshape(&Shape::new(kept))?.broadcast_to(x.shape())?])
        }
        OpKind::Neg => Ok(vec![dout.neg()]),
        OpKind::Add => Ok(vec![dout.clone(), dout.clone()]),
        OpKind::Mul => {
            let y = inputs
                .get(1)
                .ok_or(TcError::InvalidArgument("mul needs two inputs".into()))?;
            Ok(vec![dout.mul(y)?, dout.mul(x)?])
        }
        OpKind::Sub | OpKind::Div | OpKind::MatMul | OpKind::Constant | OpKind::Parameter => {
            Err(TcError::InvalidArgument(format!(
                "no reference gradient for {}",
                op.name()
            )))
        }
    }
}

/// Sum `dout` back down to `shape`: leading axes the broadcast added are
/// summed away, and axes broadcast from size 1 are summed and kept.
fn unbroadcast(dout: &Tensor, shape: &Shape) -> Result<Tensor> {
    let mut g = dout.clone();
    while g.shape().ndim() > shape.ndim() {
        g = match g.shape().ndim() {
            1 => g.sum_all().reshape(&Shape::scalar())?,
            _ => g.sum_axis(0)?,
        };
    }
    for (ax, &d) in shape.0.iter().enumerate() {
        if d == 1 && g.shape().0[ax] != 1 {
            let mut kept = g.shape().0.clone();
            kept[ax] = 1;
            g = g.sum_axis(ax as i32)?.reshape(&Shape::new(kept))?;
        }
    }
    Ok(g)
}
