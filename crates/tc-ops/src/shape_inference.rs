//! Shape inference for graph ops.
//!
//! Given an `OpKind` and input shapes, computes the output shape. The
//! `NetBuilder` uses this to type every variable it creates, so malformed
//! programs are rejected before lowering.

use tc_core::Shape;
use tc_core::graph::OpKind;

/// Error returned when shapes are incompatible for an op.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ShapeError {
    #[error("shape mismatch: {0}")]
    Mismatch(String),

    #[error("invalid axis {axis} for ndim {ndim}")]
    InvalidAxis { axis: i32, ndim: usize },

    #[error("matmul inner dimensions mismatch: {k1} vs {k2}")]
    MatmulMismatch { k1: i64, k2: i64 },

    #[error("axes {perm:?} are not a permutation of 0..{ndim}")]
    InvalidPermutation { perm: Vec<usize>, ndim: usize },

    #[error("dimension {axis} of {shape} is negative")]
    NegativeDim { shape: Shape, axis: usize },

    #[error("cannot reshape {from} ({from_numel} elements) to {to} ({to_numel} elements)")]
    ReshapeNumel {
        from: Shape,
        to: Shape,
        from_numel: i64,
        to_numel: i64,
    },
}

fn input<'a>(inputs: &[&'a Shape], idx: usize) -> Result<&'a Shape, ShapeError> {
    inputs
        .get(idx)
        .copied()
        .ok_or_else(|| ShapeError::Mismatch(format!("missing input {idx}")))
}

/// `Ok(())` when every dimension of `shape` is non-negative.
pub fn check_dims(shape: &Shape) -> Result<(), ShapeError> {
    match shape.negative_dim() {
        Some((axis, _)) => Err(ShapeError::NegativeDim {
            shape: shape.clone(),
            axis,
        }),
        None => Ok(()),
    }
}

/// Infer the output shape for a given op and input shapes.
pub fn infer_shape(op: &OpKind, inputs: &[&Shape]) -> Result<Shape, ShapeError> {
    match op {
        OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div => {
            let a = input(inputs, 0)?;
            let b = input(inputs, 1)?;
            Shape::broadcast_shapes(a, b)
                .ok_or_else(|| ShapeError::Mismatch(format!("cannot broadcast {a} with {b}")))
        }

        OpKind::Neg | OpKind::Constant | OpKind::Parameter => Ok(input(inputs, 0)?.clone()),

        // a rank-1 reduction keeps a single element
        OpKind::Sum { axis } => {
            let a = input(inputs, 0)?;
            match axis {
                None => Ok(Shape::new(vec![1])),
                Some(ax) => {
                    let resolved = resolve_axis(*ax, a.ndim())?;
                    let mut dims = a.0.clone();
                    dims.remove(resolved);
                    if dims.is_empty() {
                        dims.push(1);
                    }
                    Ok(Shape::new(dims))
                }
            }
        }

        // MatMul: [M, K] @ [K, N] → [M, N]
        OpKind::MatMul => {
            let a = input(inputs, 0)?;
            let b = input(inputs, 1)?;
            if a.ndim() != 2 || b.ndim() != 2 {
                return Err(ShapeError::Mismatch("matmul requires 2D tensors".into()));
            }
            let k1 = a.0[1];
            let k2 = b.0[0];
            if k1 != k2 {
                return Err(ShapeError::MatmulMismatch { k1, k2 });
            }
            Ok(Shape::new(vec![a.0[0], b.0[1]]))
        }

        OpKind::Reshape { new_shape } => {
            let a = input(inputs, 0)?;
            check_dims(new_shape)?;
            if a.numel() != new_shape.numel() {
                return Err(ShapeError::ReshapeNumel {
                    from: a.clone(),
                    to: new_shape.clone(),
                    from_numel: a.numel(),
                    to_numel: new_shape.numel(),
                });
            }
            Ok(new_shape.clone())
        }

        OpKind::Broadcast { target_shape } => {
            let a = input(inputs, 0)?;
            check_dims(target_shape)?;
            if !a.broadcasts_to(target_shape) {
                return Err(ShapeError::Mismatch(format!(
                    "cannot broadcast {a} to {target_shape}"
                )));
            }
            Ok(target_shape.clone())
        }

        // output dim i is input dim perm[i]; no axes reverses them
        OpKind::Transpose { axes } => {
            let a = input(inputs, 0)?;
            let perm: Vec<usize> = match axes {
                Some(ax) => ax.clone(),
                None => (0..a.ndim()).rev().collect(),
            };
            a.permuted(&perm).ok_or(ShapeError::InvalidPermutation {
                perm,
                ndim: a.ndim(),
            })
        }
    }
}

/// Resolve a possibly negative axis against a rank.
pub fn resolve_axis(axis: i32, ndim: usize) -> Result<usize, ShapeError> {
    Shape::new(vec![1; ndim])
        .resolve_axis(axis)
        .ok_or(ShapeError::InvalidAxis { axis, ndim })
}
