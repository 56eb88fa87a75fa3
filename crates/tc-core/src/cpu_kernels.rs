//! `CpuRefBackend`: the correctness oracle.
//!
//! Every data-movement op (transpose, broadcast) is a strided gather: the
//! output is walked in row-major order while an odometer tracks the matching
//! source offset. Nothing here is tuned; readability wins.

use crate::backend::{Backend, NodeInput};
use crate::graph::{OpKind, TensorMeta};
use crate::types::{DType, Shape, is_permutation};
use crate::{Result, TcError};

pub struct CpuRefBackend;

impl Backend for CpuRefBackend {
    fn name(&self) -> &'static str {
        "cpu-ref"
    }

    fn eval_node(
        &self,
        op: &OpKind,
        inputs: &[NodeInput<'_>],
        output_meta: &TensorMeta,
    ) -> Result<Vec<f32>> {
        if output_meta.dtype != DType::F32 {
            return Err(TcError::UnsupportedDType(output_meta.dtype));
        }
        match op {
            OpKind::Constant | OpKind::Parameter => Err(TcError::InvalidArgument(format!(
                "{} nodes carry their data and are never evaluated",
                op.name()
            ))),
            OpKind::Add => zip_with(inputs, |x, y| x + y),
            OpKind::Sub => zip_with(inputs, |x, y| x - y),
            OpKind::Mul => zip_with(inputs, |x, y| x * y),
            OpKind::Div => zip_with(inputs, |x, y| x / y),
            OpKind::Neg => Ok(require_input(inputs, 0)?.data.iter().map(|x| -x).collect()),
            OpKind::Sum { axis: None } => Ok(vec![require_input(inputs, 0)?.data.iter().sum()]),
            OpKind::Sum { axis: Some(axis) } => sum_axis(require_input(inputs, 0)?, *axis),
            OpKind::MatMul => matmul(require_input(inputs, 0)?, require_input(inputs, 1)?),
            OpKind::Reshape { .. } => Ok(require_input(inputs, 0)?.data.to_vec()),
            OpKind::Transpose { axes } => {
                let a = require_input(inputs, 0)?;
                let perm = resolve_perm(axes.as_deref(), a.shape.ndim())?;
                let dims = dims_of(a.shape)?;
                let strides = a.shape.strides();
                strided_gather(
                    a.data,
                    &perm.iter().map(|&p| dims[p]).collect::<Vec<_>>(),
                    &perm.iter().map(|&p| strides[p]).collect::<Vec<_>>(),
                )
            }
            OpKind::Broadcast { target_shape } => broadcast(require_input(inputs, 0)?, target_shape),
        }
    }
}

pub fn require_input<'a>(inputs: &'a [NodeInput<'_>], idx: usize) -> Result<&'a NodeInput<'a>> {
    inputs
        .get(idx)
        .ok_or_else(|| TcError::InvalidArgument(format!("expected input at index {idx}")))
}

/// Resolve transpose axes against a rank. `None` reverses the axes.
pub fn resolve_perm(axes: Option<&[usize]>, ndim: usize) -> Result<Vec<usize>> {
    let perm = axes.map_or_else(|| (0..ndim).rev().collect(), <[usize]>::to_vec);
    if !is_permutation(&perm, ndim) {
        return Err(TcError::InvalidArgument(format!(
            "transpose axes {perm:?} are not a permutation of 0..{ndim}"
        )));
    }
    Ok(perm)
}

/// Validate a 2-D matmul and return `(m, k, n)`.
pub fn matmul_dims(a: &NodeInput<'_>, b: &NodeInput<'_>) -> Result<(usize, usize, usize)> {
    let a_dims = dims_of(a.shape)?;
    let b_dims = dims_of(b.shape)?;
    let (&[m, k], &[k2, n]) = (a_dims.as_slice(), b_dims.as_slice()) else {
        return Err(TcError::InvalidArgument("matmul requires 2D tensors".into()));
    };
    if k != k2 {
        return Err(TcError::ShapeMismatch {
            expected: a.shape.0.clone(),
            got: b.shape.0.clone(),
        });
    }
    if a.data.len() != m * k || b.data.len() != k * n {
        return Err(TcError::InvalidArgument(
            "matmul buffers do not match their shapes".into(),
        ));
    }
    Ok((m, k, n))
}

/// Copy `src` into a row-major buffer of `out_dims`, where stepping output
/// axis `k` advances the source offset by `strides[k]`. A zero stride repeats
/// the source along that axis.
pub fn strided_gather(src: &[f32], out_dims: &[usize], strides: &[usize]) -> Result<Vec<f32>> {
    let total: usize = out_dims.iter().product();
    let mut out = Vec::with_capacity(total);
    let mut idx = vec![0usize; out_dims.len()];
    let mut offset = 0usize;
    for _ in 0..total {
        let v = src.get(offset).ok_or_else(|| {
            TcError::InvalidArgument(format!(
                "gather offset {offset} outside a {}-element source",
                src.len()
            ))
        })?;
        out.push(*v);
        for k in (0..out_dims.len()).rev() {
            idx[k] += 1;
            offset += strides[k];
            if idx[k] < out_dims[k] {
                break;
            }
            offset -= idx[k] * strides[k];
            idx[k] = 0;
        }
    }
    Ok(out)
}

fn dims_of(shape: &Shape) -> Result<Vec<usize>> {
    shape
        .dims_usize()
        .ok_or_else(|| TcError::InvalidArgument(format!("negative dimension in {shape}")))
}

fn zip_with(inputs: &[NodeInput<'_>], f: fn(f32, f32) -> f32) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    let b = require_input(inputs, 1)?;
    if a.shape != b.shape || a.data.len() != b.data.len() {
        return Err(TcError::ShapeMismatch {
            expected: a.shape.0.clone(),
            got: b.shape.0.clone(),
        });
    }
    Ok(a.data.iter().zip(b.data).map(|(&x, &y)| f(x, y)).collect())
}

/// Sum over one axis; the axis is removed (a rank-1 input reduces to `[1]`).
fn sum_axis(a: &NodeInput<'_>, axis: i32) -> Result<Vec<f32>> {
    let ax = a.shape.resolve_axis(axis).ok_or_else(|| {
        TcError::InvalidArgument(format!("axis {axis} out of range for {}", a.shape))
    })?;
    let dims = dims_of(a.shape)?;
    let outer: usize = dims[..ax].iter().product();
    let len = dims[ax];
    let inner: usize = dims[ax + 1..].iter().product();

    let mut out = vec![0.0f32; outer * inner];
    if len == 0 || inner == 0 {
        return Ok(out);
    }
    for (acc, block) in out.chunks_mut(inner).zip(a.data.chunks(len * inner)) {
        for row in block.chunks(inner) {
            for (o, &x) in acc.iter_mut().zip(row) {
                *o += x;
            }
        }
    }
    Ok(out)
}

fn matmul(a: &NodeInput<'_>, b: &NodeInput<'_>) -> Result<Vec<f32>> {
    let (m, k, n) = matmul_dims(a, b)?;
    let mut out = Vec::with_capacity(m * n);
    for i in 0..m {
        let a_row = &a.data[i * k..(i + 1) * k];
        out.extend((0..n).map(|j| {
            a_row
                .iter()
                .enumerate()
                .map(|(p, &av)| av * b.data[p * n + j])
                .sum::<f32>()
        }));
    }
    Ok(out)
}

/// Broadcast as a gather: padded and size-1 input axes get stride zero.
pub fn broadcast(a: &NodeInput<'_>, target: &Shape) -> Result<Vec<f32>> {
    if !a.shape.broadcasts_to(target) {
        return Err(TcError::InvalidArgument(format!(
            "cannot broadcast shape {} to {target}",
            a.shape
        )));
    }
    let out_dims = dims_of(target)?;
    let in_dims = dims_of(a.shape)?;
    let in_strides = a.shape.strides();
    let pad = out_dims.len() - in_dims.len();
    let strides: Vec<usize> = (0..out_dims.len())
        .map(|k| match k.checked_sub(pad) {
            Some(i) if in_dims[i] != 1 => in_strides[i],
            _ => 0,
        })
        .collect();
    strided_gather(a.data, &out_dims, &strides)
}
