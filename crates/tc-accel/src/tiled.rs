use tc_core::backend::{Backend, NodeInput};
use tc_core::cpu_kernels::{CpuRefBackend, require_input, resolve_perm};
use tc_core::graph::{OpKind, TensorMeta};
use tc_core::{DType, Result, TcError};
use tracing::info;

use crate::kernels;

/// Edge length of the square tiles used by the rank-2 transpose.
pub const DEFAULT_TILE: usize = 32;

/// Accelerator backend.
#[derive(Debug, Clone)]
pub struct TiledBackend {
    tile: usize,
}

impl TiledBackend {
    pub fn new() -> Self {
        Self { tile: DEFAULT_TILE }
    }

    /// Use a custom tile edge. Zero is rejected.
    pub fn with_tile(tile: usize) -> Result<Self> {
        if tile == 0 {
            return Err(TcError::InvalidArgument("tile size must be positive".into()));
        }
        Ok(Self { tile })
    }

    /// Read the tile edge from `TC_ACCEL_TILE`, falling back to [`DEFAULT_TILE`].
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// [`TiledBackend::from_env`] over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = match lookup("TC_ACCEL_TILE") {
            Some(raw) => {
                let tile = raw.trim().parse::<usize>().map_err(|e| {
                    TcError::InvalidArgument(format!("TC_ACCEL_TILE={raw:?}: {e}"))
                })?;
                Self::with_tile(tile)?
            }
            None => Self::new(),
        };
        info!(
            tile = backend.tile,
            threads = rayon::current_num_threads(),
            "Initialized tiled accelerator backend"
        );
        Ok(backend)
    }

    pub fn tile(&self) -> usize {
        self.tile
    }
}

impl Default for TiledBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for TiledBackend {
    fn name(&self) -> &'static str {
        "accel-tiled"
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
            OpKind::Transpose { axes } => {
                let a = require_input(inputs, 0)?;
                let perm = resolve_perm(axes.as_deref(), a.shape.ndim())?;
                let dims = a.shape.dims_usize().ok_or_else(|| {
                    TcError::InvalidArgument(format!("negative dimension in {}", a.shape))
                })?;
                if dims.iter().product::<usize>() != a.data.len() {
                    return Err(TcError::InvalidArgument(format!(
                        "{} values for shape {}",
                        a.data.len(),
                        a.shape
                    )));
                }
                match (perm.as_slice(), dims.as_slice()) {
                    ([1, 0], &[rows, cols]) => {
                        Ok(kernels::transpose_2d_tiled(a.data, rows, cols, self.tile))
                    }
                    _ => Ok(kernels::transpose_nd(a.data, &dims, &perm)),
                }
            }
            OpKind::Add => binary(inputs, |x, y| x + y),
            OpKind::Sub => binary(inputs, |x, y| x - y),
            OpKind::Mul => binary(inputs, |x, y| x * y),
            OpKind::Div => binary(inputs, |x, y| x / y),
            OpKind::Neg => {
                let a = require_input(inputs, 0)?;
                Ok(kernels::unary(a.data, |x| -x))
            }
            OpKind::MatMul => {
                let a = require_input(inputs, 0)?;
                let b = require_input(inputs, 1)?;
                kernels::matmul(a, b)
            }
            OpKind::Constant
            | OpKind::Parameter
            | OpKind::Sum { .. }
            | OpKind::Reshape { .. }
            | OpKind::Broadcast { .. } => CpuRefBackend.eval_node(op, inputs, output_meta),
        }
    }
}

fn binary(inputs: &[NodeInput<'_>], f: fn(f32, f32) -> f32) -> Result<Vec<f32>> {
    let a = require_input(inputs, 0)?;
    let b = require_input(inputs, 1)?;
    if a.data.len() != b.data.len() {
        return Err(TcError::ShapeMismatch {
            expected: a.shape.0.clone(),
            got: b.shape.0.clone(),
        });
    }
    Ok(kernels::binary(a.data, b.data, f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::Shape;

    fn meta(shape: Vec<i64>) -> TensorMeta {
        TensorMeta::f32(Shape::new(shape))
    }

    fn transpose_2x3(backend: &TiledBackend, dims: Vec<i64>) -> Result<Vec<f32>> {
        let s = Shape::new(dims);
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        backend.eval_node(
            &OpKind::Transpose {
                axes: Some(vec![1, 0]),
            },
            &[NodeInput {
                data: &data,
                shape: &s,
                dtype: DType::F32,
            }],
            &meta(vec![3, 2]),
        )
    }

    fn env(v: &'static str) -> impl Fn(&str) -> Option<String> {
        move |k: &str| (k == "TC_ACCEL_TILE").then(|| v.to_string())
    }

    #[test]
    fn test_zero_tile_rejected() {
        assert!(TiledBackend::with_tile(0).is_err());
        assert_eq!(TiledBackend::with_tile(4).unwrap().tile(), 4);
    }

    #[test]
    fn test_tile_from_lookup() {
        assert_eq!(TiledBackend::from_lookup(env("8")).unwrap().tile(), 8);
        assert_eq!(TiledBackend::from_lookup(env(" 16 ")).unwrap().tile(), 16);
        assert!(TiledBackend::from_lookup(env("0")).is_err());
        assert!(TiledBackend::from_lookup(env("wide")).is_err());
        assert!(TiledBackend::from_lookup(env("-4")).is_err());
        let unset = TiledBackend::from_lookup(|_| None).unwrap();
        assert_eq!(unset.tile(), DEFAULT_TILE);
    }

    #[test]
    fn test_transpose_2x3() {
        let out = transpose_2x3(&TiledBackend::new(), vec![2, 3]).unwrap();
        assert_eq!(out, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_huge_tile_transposes() {
        let backend = TiledBackend::with_tile(usize::MAX).unwrap();
        let out = transpose_2x3(&backend, vec![2, 3]).unwrap();
        assert_eq!(out, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_bad_input_shapes_are_errors() {
        let backend = TiledBackend::new();
        assert!(transpose_2x3(&backend, vec![-2, -3]).is_err());
        assert!(transpose_2x3(&backend, vec![2, 4]).is_err());
    }

    #[test]
    fn test_sum_falls_back_to_reference() {
        let s = Shape::new(vec![2, 2]);
        let data = [1.0, 2.0, 3.0, 4.0];
        let out = TiledBackend::new()
            .eval_node(
                &OpKind::Sum { axis: None },
                &[NodeInput {
                    data: &data,
                    shape: &s,
                    dtype: DType::F32,
                }],
                &meta(vec![1]),
            )
            .unwrap();
        assert_eq!(out, vec![10.0]);
    }
}
