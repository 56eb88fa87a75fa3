//! Elementwise closeness checks.

use serde::Serialize;

use crate::error::{OpTestError, Result};

/// Summary of one compared buffer.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CompareStats {
    pub name: String,
    pub numel: usize,
    pub max_abs_diff: f32,
    pub max_rel_diff: f32,
    /// Index of the largest relative difference.
    pub offset: usize,
}

/// Check `|got - expected| <= atol + rtol * |expected|` elementwise.
///
/// The first element outside tolerance is reported together with the worst
/// relative difference over the whole buffer.
pub fn check_allclose(
    name: &str,
    got: &[f32],
    expected: &[f32],
    atol: f32,
    rtol: f32,
) -> Result<CompareStats> {
    if got.len() != expected.len() {
        return Err(OpTestError::LengthMismatch {
            what: name.to_string(),
            got: got.len(),
            expected: expected.len(),
        });
    }

    let mut stats = CompareStats {
        name: name.to_string(),
        numel: got.len(),
        max_abs_diff: 0.0,
        max_rel_diff: 0.0,
        offset: 0,
    };
    let mut first_bad = None;
    for (i, (&x, &y)) in got.iter().zip(expected).enumerate() {
        let diff = (x - y).abs();
        let rel = if diff == 0.0 { 0.0 } else { diff / y.abs() };
        // NaN compares false, so it must be caught explicitly.
        let bad = diff.is_nan() || diff > atol + rtol * y.abs();
        if bad && first_bad.is_none() {
            first_bad = Some(i);
        }
        stats.max_abs_diff = stats.max_abs_diff.max(diff);
        if rel > stats.max_rel_diff || (rel.is_nan() && !stats.max_rel_diff.is_nan()) {
            stats.max_rel_diff = rel;
            stats.offset = i;
        }
    }

    match first_bad {
        None => Ok(stats),
        Some(index) => Err(OpTestError::Mismatch {
            what: name.to_string(),
            index,
            got: got[index],
            expected: expected[index],
            max_rel_diff: stats.max_rel_diff,
            worst_index: stats.offset,
        }),
    }
}

/// Assert two f32 slices are element-wise close.
pub fn assert_allclose(a: &[f32], b: &[f32], atol: f32, rtol: f32) {
    if let Err(e) = check_allclose("values", a, b, atol, rtol) {
        panic!("{e}");
    }
}
