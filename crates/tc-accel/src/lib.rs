//! Tiled, data-parallel kernels backing the compiler's accelerator target.
//!
//! `TiledBackend` implements the same `Backend` trait as the CPU reference
//! oracle but with a different kernel strategy: cache-blocked transposes and
//! rayon-parallel elementwise and matmul loops. Ops with no specialised
//! kernel fall through to the reference implementation.

mod kernels;
mod tiled;

pub use tiled::{DEFAULT_TILE, TiledBackend};

use std::sync::Arc;

use tc_core::Result;
use tc_core::backend::Stream;

/// Create a new stream on the accelerator backend, configured from the environment.
pub fn accel_stream() -> Result<Arc<Stream>> {
    Ok(Arc::new(Stream::new(Box::new(TiledBackend::from_env()?))))
}
