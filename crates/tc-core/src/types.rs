//! Element types and shapes.

/// Element types a program can declare. Only `F32` executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    BF16,
    I32,
    I64,
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::I32 => "i32",
            DType::I64 => "i64",
        })
    }
}

/// Row-major tensor dimensions.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Shape(pub Vec<i64>);

impl Shape {
    pub fn new(dims: impl Into<Vec<i64>>) -> Self {
        Self(dims.into())
    }

    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn ndim(&self) -> usize {
        self.0.len()
    }

    pub fn numel(&self) -> i64 {
        self.0.iter().product()
    }

    /// The first negative dimension as `(axis, dim)`, if there is one.
    pub fn negative_dim(&self) -> Option<(usize, i64)> {
        self.0.iter().copied().enumerate().find(|&(_, d)| d < 0)
    }

    /// Dimensions as `usize`, or `None` when one is negative.
    pub fn dims_usize(&self) -> Option<Vec<usize>> {
        self.0.iter().map(|&d| usize::try_from(d).ok()).collect()
    }

    /// Resolve a possibly negative axis (`-1` is the last one).
    pub fn resolve_axis(&self, axis: i32) -> Option<usize> {
        let ndim = self.ndim() as i64;
        let ax = if axis < 0 { ndim + i64::from(axis) } else { i64::from(axis) };
        (0..ndim).contains(&ax).then_some(ax as usize)
    }

    /// Row-major strides, in elements.
    pub fn strides(&self) -> Vec<usize> {
        let mut strides = vec![1usize; self.ndim()];
        for k in (1..self.ndim()).rev() {
            strides[k - 1] = strides[k] * self.0[k].max(0) as usize;
        }
        strides
    }

    /// Output dim `i` is `self[perm[i]]`; `None` unless `perm` permutes `0..ndim`.
    pub fn permuted(&self, perm: &[usize]) -> Option<Shape> {
        is_permutation(perm, self.ndim()).then(|| Shape(perm.iter().map(|&p| self.0[p]).collect()))
    }

    /// NumPy broadcast of two shapes, aligned from the trailing dimension.
    pub fn broadcast_shapes(a: &Shape, b: &Shape) -> Option<Shape> {
        let ndim = a.ndim().max(b.ndim());
        let from_right = |s: &Shape, i: usize| {
            if i < s.ndim() { s.0[s.ndim() - 1 - i] } else { 1 }
        };
        let mut dims = (0..ndim)
            .map(|i| match (from_right(a, i), from_right(b, i)) {
                (x, y) if x == y || y == 1 => Some(x),
                (1, y) => Some(y),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()?;
        dims.reverse();
        Some(Shape(dims))
    }

    /// Whether `self` broadcasts to exactly `target`.
    pub fn broadcasts_to(&self, target: &Shape) -> bool {
        Shape::broadcast_shapes(self, target).as_ref() == Some(target)
    }
}

impl From<&[i64]> for Shape {
    fn from(dims: &[i64]) -> Self {
        Shape(dims.to_vec())
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

/// Whether `perm` names each axis of `0..ndim` exactly once.
pub fn is_permutation(perm: &[usize], ndim: usize) -> bool {
    let mut seen = vec![false; ndim];
    perm.len() == ndim
        && perm
            .iter()
            .all(|&ax| ax < ndim && !std::mem::replace(&mut seen[ax], true))
}

/// Inverse of a permutation: `inv[perm[i]] == i`.
pub fn invert_permutation(perm: &[usize]) -> Vec<usize> {
    let mut inv = vec![0usize; perm.len()];
    for (i, &p) in perm.iter().enumerate() {
        inv[p] = i;
    }
    inv
}
