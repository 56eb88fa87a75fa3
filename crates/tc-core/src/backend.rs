//! Backend trait and Stream: pluggable compute engine for tensor evaluation.
//!
//! A `Backend` knows how to execute a single graph node (op + inputs → output).
//! A `Stream` binds a `Backend` to a lazy computation `Graph`, managing
//! materialized buffers and evaluation scheduling.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use smallvec::SmallVec;
use tracing::trace;

use crate::graph::{Graph, Node, NodeId, OpKind, TensorMeta};
use crate::types::{DType, Shape};
use crate::{Result, TcError};

/// CSE key for deduplicating pure operations.
#[derive(Clone, PartialEq, Eq, Hash)]
struct CseKey {
    op: OpKind,
    inputs: SmallVec<[NodeId; 2]>,
    meta: TensorMeta,
}

/// Materialized input data passed to a backend for evaluation.
pub struct NodeInput<'a> {
    pub data: &'a [f32],
    pub shape: &'a Shape,
    pub dtype: DType,
}

/// Pluggable compute backend.
///
/// Backends evaluate individual graph nodes. The `Stream` handles scheduling
/// (topological sort) and buffer management; the backend only needs to
/// implement the actual kernel dispatch.
pub trait Backend: Send + Sync {
    /// Human-readable backend name.
    fn name(&self) -> &'static str;

    /// Evaluate a single op node given its materialized inputs.
    fn eval_node(
        &self,
        op: &OpKind,
        inputs: &[NodeInput<'_>],
        output_meta: &TensorMeta,
    ) -> Result<Vec<f32>>;
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A computation stream binding a graph to a backend.
///
/// Operations on tensors add nodes to the stream's graph lazily.
/// Calling `eval()` topologically sorts and evaluates pending nodes.
pub struct Stream {
    graph: Mutex<Graph>,
    backend: Box<dyn Backend>,
    buffers: Mutex<HashMap<NodeId, Vec<f32>>>,
    cse_ops: Mutex<HashMap<CseKey, NodeId>>,
}

impl Stream {
    /// Create a new stream with the given backend.
    pub fn new(backend: Box<dyn Backend>) -> Self {
        Self {
            graph: Mutex::new(Graph::new()),
            backend,
            buffers: Mutex::new(HashMap::new()),
            cse_ops: Mutex::new(HashMap::new()),
        }
    }

    /// Name of the backend this stream dispatches to.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Add a constant node (data already known).
    ///
    /// Constants are never deduplicated, even when their payloads match.
    pub fn add_constant(&self, data: Vec<f32>, meta: TensorMeta) -> NodeId {
        let id = lock(&self.graph).add_node(OpKind::Constant, SmallVec::new(), meta);
        lock(&self.buffers).insert(id, data);
        id
    }

    /// Add an operation node to the graph.
    ///
    /// CSE-eligible ops with identical (op, inputs, meta) are deduplicated.
    pub fn add_op(&self, op: OpKind, inputs: SmallVec<[NodeId; 2]>, meta: TensorMeta) -> NodeId {
        if !op.is_cse_eligible() {
            return lock(&self.graph).add_node(op, inputs, meta);
        }

        let key = CseKey {
            op: op.clone(),
            inputs: inputs.clone(),
            meta: meta.clone(),
        };
        let mut cse_ops = lock(&self.cse_ops);
        if let Some(&existing) = cse_ops.get(&key) {
            return existing;
        }
        let id = lock(&self.graph).add_node(op, inputs, meta);
        cse_ops.insert(key, id);
        id
    }

    /// Evaluate all nodes needed to materialize the given output.
    pub fn eval(&self, output: NodeId) -> Result<()> {
        if lock(&self.buffers).contains_key(&output) {
            return Ok(());
        }

        let order = lock(&self.graph).topo_sort(&[output]);

        // Evaluate each node in order. Never hold both locks simultaneously.
        for &node_id in &order {
            if lock(&self.buffers).contains_key(&node_id) {
                continue;
            }

            let (node, input_metas): (Node, Vec<TensorMeta>) = {
                let graph = lock(&self.graph);
                let node = graph
                    .get(node_id)
                    .cloned()
                    .ok_or(TcError::Graph("missing graph node"))?;
                let metas = node
                    .inputs
                    .iter()
                    .map(|&id| {
                        graph
                            .get(id)
                            .map(|n| n.meta.clone())
                            .ok_or(TcError::Graph("input node missing from graph"))
                    })
                    .collect::<Result<Vec<_>>>()?;
                (node, metas)
            };

            if matches!(node.op, OpKind::Constant | OpKind::Parameter) {
                return Err(TcError::Graph("source node has no materialized buffer"));
            }

            let input_buffers: Vec<Vec<f32>> = {
                let buffers = lock(&self.buffers);
                node.inputs
                    .iter()
                    .map(|id| {
                        buffers
                            .get(id)
                            .cloned()
                            .ok_or(TcError::Graph("input evaluated out of order"))
                    })
                    .collect::<Result<Vec<_>>>()?
            };

            let inputs: Vec<NodeInput<'_>> = input_buffers
                .iter()
                .zip(input_metas.iter())
                .map(|(data, meta)| NodeInput {
                    data: data.as_slice(),
                    shape: &meta.shape,
                    dtype: meta.dtype,
                })
                .collect();

            trace!(
                backend = self.backend.name(),
                op = node.op.name(),
                shape = %node.meta.shape,
                "eval node"
            );
            let result = self.backend.eval_node(&node.op, &inputs, &node.meta)?;
            let expected = node.meta.shape.numel() as usize;
            if result.len() != expected {
                return Err(TcError::ShapeMismatch {
                    expected: node.meta.shape.0.clone(),
                    got: vec![result.len() as i64],
                });
            }

            lock(&self.buffers).insert(node_id, result);
        }

        Ok(())
    }

    /// Get materialized buffer data for a node (must call eval first).
    pub fn get_buffer(&self, id: NodeId) -> Option<Vec<f32>> {
        lock(&self.buffers).get(&id).cloned()
    }

    /// Get a clone of a graph node by ID.
    pub fn get_node(&self, id: NodeId) -> Option<Node> {
        lock(&self.graph).get(id).cloned()
    }

    /// Topological sort of the subgraph rooted at the given outputs.
    pub fn topo_sort(&self, outputs: &[NodeId]) -> Vec<NodeId> {
        lock(&self.graph).topo_sort(outputs)
    }

    /// Number of nodes in the graph.
    pub fn graph_node_count(&self) -> usize {
        lock(&self.graph).len()
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}

/// Shared stream behind `Tensor::from_f32`, always on the reference backend.
static DEFAULT_STREAM: LazyLock<Arc<Stream>> =
    LazyLock::new(|| Arc::new(Stream::new(Box::new(crate::cpu_kernels::CpuRefBackend))));

/// Get the default computation stream.
pub fn default_stream() -> Arc<Stream> {
    Arc::clone(&DEFAULT_STREAM)
}

/// A fresh stream on the CPU reference backend, isolated from the default one.
pub fn cpu_stream() -> Arc<Stream> {
    Arc::new(Stream::new(Box::new(crate::cpu_kernels::CpuRefBackend)))
}
