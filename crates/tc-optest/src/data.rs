//! Input data generation.

use rand::Rng;
use rand::rngs::StdRng;
use tc_core::Shape;

/// `n` values drawn uniformly from [0, 1).
pub fn random_uniform(rng: &mut StdRng, n: usize) -> Vec<f32> {
    (0..n).map(|_| rng.random::<f32>()).collect()
}

/// A named input together with the data both systems receive.
#[derive(Clone, Debug, PartialEq)]
pub struct Feed {
    pub name: String,
    pub shape: Shape,
    pub data: Vec<f32>,
}

impl Feed {
    /// A feed of uniform [0, 1) values.
    pub fn random(name: &str, dims: &[i64], rng: &mut StdRng) -> Self {
        let shape = Shape::new(dims.to_vec());
        let data = random_uniform(rng, shape.numel() as usize);
        Self {
            name: name.to_string(),
            shape,
            data,
        }
    }
}
