//! Lazy tensor handles.
//!
//! A `Tensor` names one node of its stream's graph. Ops record new nodes;
//! `to_vec_f32` evaluates whatever the node depends on. The op set is what
//! reverse mode needs to differentiate a transpose and push gradients back
//! through reshapes, broadcasts and sums.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::backend::{Stream, default_stream};
use crate::cpu_kernels::resolve_perm;
use crate::graph::{OpKind, TensorMeta};
use crate::{DType, NodeId, Result, Shape, TcError};

#[derive(Clone)]
pub struct Tensor {
    node: NodeId,
    meta: TensorMeta,
    stream: Arc<Stream>,
}

impl Tensor {
    /// An f32 constant on the shared default stream.
    pub fn from_f32(data: &[f32], shape: &Shape) -> Result<Self> {
        Self::from_f32_on(default_stream(), data, shape)
    }

    /// An f32 constant on `stream`. `data` must hold exactly `shape.numel()` values.
    pub fn from_f32_on(stream: Arc<Stream>, data: &[f32], shape: &Shape) -> Result<Self> {
        if let Some((axis, dim)) = shape.negative_dim() {
            return Err(TcError::InvalidArgument(format!(
                "dimension {axis} of {shape} is negative ({dim})"
            )));
        }
        if data.len() as i64 != shape.numel() {
            return Err(TcError::InvalidArgument(format!(
                "{} values do not fill shape {shape} ({} elements)",
                data.len(),
                shape.numel()
            )));
        }
        let meta = TensorMeta::f32(shape.clone());
        let node = stream.add_constant(data.to_vec(), meta.clone());
        Ok(Self { node, meta, stream })
    }

    /// A handle to an existing node of `stream`.
    pub fn from_node(stream: Arc<Stream>, node: NodeId, meta: TensorMeta) -> Self {
        Self { node, meta, stream }
    }

    /// A constant of `self`'s shape filled with `value`, on the same stream.
    pub fn full_like(&self, value: f32) -> Result<Self> {
        let data = vec![value; self.numel() as usize];
        Self::from_f32_on(Arc::clone(&self.stream), &data, self.shape())
    }

    pub fn zeros_like(&self) -> Result<Self> {
        self.full_like(0.0)
    }

    /// Permute axes: output dim `i` is input dim `perm[i]`. `None` reverses them.
    pub fn transpose(&self, axes: Option<&[usize]>) -> Result<Tensor> {
        let perm = resolve_perm(axes, self.shape().ndim())?;
        let shape = Shape::new(perm.iter().map(|&p| self.shape().0[p]).collect::<Vec<_>>());
        Ok(self.record(OpKind::Transpose { axes: Some(perm) }, &[], shape))
    }

    pub fn reshape(&self, shape: &Shape) -> Result<Tensor> {
        if shape.negative_dim().is_some() || shape.numel() != self.numel() {
            return Err(TcError::ShapeMismatch {
                expected: self.shape().0.clone(),
                got: shape.0.clone(),
            });
        }
        let op = OpKind::Reshape {
            new_shape: shape.clone(),
        };
        Ok(self.record(op, &[], shape.clone()))
    }

    /// NumPy-style broadcast. A no-op when the shape already matches.
    pub fn broadcast_to(&self, target: &Shape) -> Result<Tensor> {
        if self.shape() == target {
            return Ok(self.clone());
        }
        if !self.shape().broadcasts_to(target) {
            return Err(TcError::InvalidArgument(format!(
                "cannot broadcast {} to {target}",
                self.shape()
            )));
        }
        let op = OpKind::Broadcast {
            target_shape: target.clone(),
        };
        Ok(self.record(op, &[], target.clone()))
    }

    /// Sum over `axis`, dropping it. A rank-1 input reduces to shape `[1]`.
    pub fn sum_axis(&self, axis: i32) -> Result<Tensor> {
        let ax = self.shape().resolve_axis(axis).ok_or_else(|| {
            TcError::InvalidArgument(format!("axis {axis} out of range for {}", self.shape()))
        })?;
        let mut dims = self.shape().0.clone();
        dims.remove(ax);
        if dims.is_empty() {
            dims.push(1);
        }
        Ok(self.record(OpKind::Sum { axis: Some(axis) }, &[], Shape::new(dims)))
    }

    /// Sum of every element, as shape `[1]`.
    pub fn sum_all(&self) -> Tensor {
        self.record(OpKind::Sum { axis: None }, &[], Shape::new(vec![1]))
    }

    pub fn add(&self, rhs: &Tensor) -> Result<Tensor> {
        self.elementwise(OpKind::Add, rhs)
    }

    pub fn mul(&self, rhs: &Tensor) -> Result<Tensor> {
        self.elementwise(OpKind::Mul, rhs)
    }

    pub fn neg(&self) -> Tensor {
        self.record(OpKind::Neg, &[], self.shape().clone())
    }

    pub fn eval(&self) -> Result<()> {
        self.stream.eval(self.node)
    }

    /// Evaluate if needed and copy the data out.
    pub fn to_vec_f32(&self) -> Result<Vec<f32>> {
        self.eval()?;
        self.stream
            .get_buffer(self.node)
            .ok_or(TcError::Graph("node has no buffer after eval"))
    }

    pub fn shape(&self) -> &Shape {
        &self.meta.shape
    }

    pub fn dtype(&self) -> DType {
        self.meta.dtype
    }

    pub fn meta(&self) -> &TensorMeta {
        &self.meta
    }

    pub fn numel(&self) -> i64 {
        self.meta.shape.numel()
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn stream(&self) -> Arc<Stream> {
        Arc::clone(&self.stream)
    }

    fn elementwise(&self, op: OpKind, rhs: &Tensor) -> Result<Tensor> {
        if !Arc::ptr_eq(&self.stream, &rhs.stream) {
            return Err(TcError::InvalidArgument(format!(
                "{} operands live on different streams",
                op.name()
            )));
        }
        if self.shape() != rhs.shape() {
            return Err(TcError::ShapeMismatch {
                expected: self.shape().0.clone(),
                got: rhs.shape().0.clone(),
            });
        }
        Ok(self.record(op, &[rhs.node], self.shape().clone()))
    }

    /// Record `op(self, extra...)` with the given output shape.
    fn record(&self, op: OpKind, extra: &[NodeId], shape: Shape) -> Tensor {
        let mut inputs: SmallVec<[NodeId; 2]> = SmallVec::from_slice(&[self.node]);
        inputs.extend_from_slice(extra);
        let meta = TensorMeta {
            shape,
            dtype: self.meta.dtype,
        };
        let node = self.stream.add_op(op, inputs, meta.clone());
        Tensor::from_node(Arc::clone(&self.stream), node, meta)
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tensor({:?}, {}{})", self.node, self.meta.dtype, self.meta.shape)
    }
}
