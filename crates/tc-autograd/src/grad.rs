//! Graph-walking reverse-mode driver.

use std::collections::HashMap;

use tc_core::graph::OpKind;
use tc_core::{NodeId, Result, TcError, Tensor};
use tracing::debug;

use crate::vjp::vjp;

/// Compute gradients of `outputs` with respect to `wrt`.
///
/// `cotangents[i]` seeds the backward pass for `outputs[i]` and must have the
/// same shape. Every tensor must live on the same stream. Inputs in `wrt` that
/// the outputs do not depend on receive a zero gradient.
pub fn grad(outputs: &[Tensor], cotangents: &[Tensor], wrt: &[Tensor]) -> Result<Vec<Tensor>> {
    if outputs.len() != cotangents.len() {
        return Err(TcError::InvalidArgument(format!(
            "{} outputs but {} cotangents",
            outputs.len(),
            cotangents.len()
        )));
    }
    for (out, ct) in outputs.iter().zip(cotangents) {
        if out.shape() != ct.shape() {
            return Err(TcError::ShapeMismatch {
                expected: out.shape().0.clone(),
                got: ct.shape().0.clone(),
            });
        }
    }
    let Some(first) = outputs.first() else {
        return wrt.iter().map(Tensor::zeros_like).collect();
    };
    let stream = first.stream();

    let mut grads: HashMap<NodeId, Tensor> = HashMap::new();
    for (out, ct) in outputs.iter().zip(cotangents) {
        accumulate(&mut grads, out.node_id(), ct.clone())?;
    }

    let roots: Vec<NodeId> = outputs.iter().map(Tensor::node_id).collect();
    let order = stream.topo_sort(&roots);
    debug!(nodes = order.len(), "backward pass");

    for &id in order.iter().rev() {
        let Some(grad_output) = grads.get(&id).cloned() else {
            continue;
        };
        let node = stream
            .get_node(id)
            .ok_or(TcError::Graph("missing graph node"))?;
        if matches!(node.op, OpKind::Constant | OpKind::Parameter) {
            continue;
        }

        let inputs: Vec<Tensor> = node
            .inputs
            .iter()
            .map(|&input_id| {
                let input = stream
                    .get_node(input_id)
                    .ok_or(TcError::Graph("missing input node"))?;
                Ok(Tensor::from_node(stream.clone(), input_id, input.meta))
            })
            .collect::<Result<_>>()?;

        let input_grads = vjp(&node.op, &inputs, &grad_output)?;
        for (&input_id, g) in node.inputs.iter().zip(input_grads) {
            accumulate(&mut grads, input_id, g)?;
        }
    }

    wrt.iter()
        .map(|t| match grads.get(&t.node_id()) {
            Some(g) => Ok(g.clone()),
            None => t.zeros_like(),
        })
        .collect()
}

fn accumulate(grads: &mut HashMap<NodeId, Tensor>, id: NodeId, g: Tensor) -> Result<()> {
    let summed = match grads.remove(&id) {
        Some(existing) => existing.add(&g)?,
        None => g,
    };
    grads.insert(id, summed);
    Ok(())
}
