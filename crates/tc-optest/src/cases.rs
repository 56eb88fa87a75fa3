//! Reusable op cases.

use std::sync::Arc;

use rand::rngs::StdRng;
use tc_core::backend::Stream;
use tc_core::types::is_permutation;
use tc_core::{DType, Tensor};
use tc_frontend::NetBuilder;

use crate::data::Feed;
use crate::error::{OpTestError, Result};
use crate::op_test::{CompiledOutputs, OpTest, ReferenceOutputs};

/// `transpose(x, perm)` for an arbitrary shape and permutation.
#[derive(Clone, Debug)]
pub struct TransposeCase {
    shape: Vec<i64>,
    perm: Vec<usize>,
    inputs: Vec<Feed>,
}

impl TransposeCase {
    pub fn new(shape: &[i64], perm: &[usize]) -> Result<Self> {
        if !is_permutation(perm, shape.len()) {
            return Err(OpTestError::InvalidCase(format!(
                "{perm:?} is not a permutation of 0..{}",
                shape.len()
            )));
        }
        if shape.iter().any(|&d| d < 0) {
            return Err(OpTestError::InvalidCase(format!("negative dim in {shape:?}")));
        }
        Ok(Self {
            shape: shape.to_vec(),
            perm: perm.to_vec(),
            inputs: Vec::new(),
        })
    }

    pub fn shape(&self) -> &[i64] {
        &self.shape
    }

    pub fn perm(&self) -> &[usize] {
        &self.perm
    }
}

impl OpTest for TransposeCase {
    fn name(&self) -> &str {
        "transpose"
    }

    fn init_case(&mut self, rng: &mut StdRng) {
        self.inputs = vec![Feed::random("x", &self.shape, rng)];
    }

    fn inputs(&self) -> &[Feed] {
        &self.inputs
    }

    fn build_reference_program(&self, stream: &Arc<Stream>) -> Result<ReferenceOutputs> {
        let feed = self
            .inputs
            .first()
            .ok_or_else(|| OpTestError::InvalidCase("init_case was not run".into()))?;
        let x = Tensor::from_f32_on(Arc::clone(stream), &feed.data, &feed.shape)?;
        let out = x.transpose(Some(&self.perm))?;
        Ok(ReferenceOutputs {
            inputs: vec![x],
            outputs: vec![out],
        })
    }

    fn build_compiled_program(&self) -> Result<CompiledOutputs> {
        let mut builder = NetBuilder::new("transpose_test");
        let x = builder.create_input(DType::F32, &self.shape, "x")?;
        let out = builder.transpose(&x, &self.perm)?;
        Ok(CompiledOutputs {
            program: builder.build(),
            inputs: vec![x],
            outputs: vec![out],
        })
    }
}
