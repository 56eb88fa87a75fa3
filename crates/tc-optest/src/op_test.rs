//! The `OpTest` trait and the checks that drive it.
//!
//! A case describes one operator twice: once against the reference framework
//! and once as a compiler program. The harness feeds both the same inputs,
//! compares their outputs, and for gradient checks seeds both backward passes
//! with the same random cotangents.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use tc_core::backend::{Stream, cpu_stream};
use tc_core::Tensor;
use tc_frontend::{GraphCompiler, Program, Variable, append_backward};
use tracing::{debug, info, warn};

use crate::compare::{CompareStats, check_allclose};
use crate::config::OpTestConfig;
use crate::data::{Feed, random_uniform};
use crate::error::{OpTestError, Result};

/// Reference-framework side of a case.
pub struct ReferenceOutputs {
    /// Tensors gradients are taken with respect to, in `OpTest::inputs` order.
    pub inputs: Vec<Tensor>,
    pub outputs: Vec<Tensor>,
}

/// Compiler side of a case.
pub struct CompiledOutputs {
    pub program: Program,
    /// Program inputs, in `OpTest::inputs` order.
    pub inputs: Vec<Variable>,
    pub outputs: Vec<Variable>,
}

pub trait OpTest {
    fn name(&self) -> &str;

    /// Generate the case's input data.
    fn init_case(&mut self, rng: &mut StdRng);

    fn inputs(&self) -> &[Feed];

    /// Build the computation on `stream` using the reference framework.
    fn build_reference_program(&self, stream: &Arc<Stream>) -> Result<ReferenceOutputs>;

    /// Build the same computation with the compiler frontend.
    fn build_compiled_program(&self) -> Result<CompiledOutputs>;
}

/// Skip helpers for op tests.
pub struct OpTestTool;

impl OpTestTool {
    /// Returns `cond`, logging `reason` when the test is being skipped.
    ///
    /// ```ignore
    /// if OpTestTool::skip_if(!is_compiled_with_accel(), "accel backend not built") {
    ///     return;
    /// }
    /// ```
    pub fn skip_if(cond: bool, reason: &str) -> bool {
        if cond {
            warn!(reason, "skipping op test");
        }
        cond
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct CheckReport {
    pub case: String,
    pub seed: u64,
    pub target: String,
    pub atol: f32,
    pub rtol: f32,
    pub outputs: Vec<CompareStats>,
    pub grads: Vec<CompareStats>,
}

/// Compare the compiled program's outputs against the reference framework.
pub fn check_outputs<T: OpTest + ?Sized>(
    case: &mut T,
    config: &OpTestConfig,
) -> Result<CheckReport> {
    run_check(case, config, false)
}

/// Compare outputs and the gradients of every input.
pub fn check_outputs_and_grads<T: OpTest + ?Sized>(
    case: &mut T,
    config: &OpTestConfig,
) -> Result<CheckReport> {
    run_check(case, config, true)
}

fn run_check<T: OpTest + ?Sized>(
    case: &mut T,
    config: &OpTestConfig,
    with_grads: bool,
) -> Result<CheckReport> {
    let seed = config.resolve_seed();
    let mut rng = StdRng::seed_from_u64(seed);
    case.init_case(&mut rng);
    info!(
        case = case.name(),
        seed,
        target = %config.target,
        with_grads,
        "running op test"
    );

    let stream = cpu_stream();
    let reference = case.build_reference_program(&stream)?;
    let compiled = case.build_compiled_program()?;
    check_arity(case, &reference, &compiled)?;

    let mut report = CheckReport {
        case: case.name().to_string(),
        seed,
        target: config.target.to_string(),
        atol: config.atol,
        rtol: config.rtol,
        outputs: Vec::new(),
        grads: Vec::new(),
    };

    let feeds: Vec<(&str, &[f32])> = case
        .inputs()
        .iter()
        .map(|f| (f.name.as_str(), f.data.as_slice()))
        .collect();

    if !with_grads {
        let runtime = GraphCompiler::new(config.target).build(&compiled.program)?;
        let fetches: Vec<&str> = compiled.outputs.iter().map(|v| v.id.as_str()).collect();
        let got = runtime.execute(&feeds, &fetches)?;
        report.outputs = compare_outputs(&reference, &compiled, &got, config)?;
        return Ok(report);
    }

    // One cotangent per output, shared by both systems.
    let cotangents: Vec<Vec<f32>> = reference
        .outputs
        .iter()
        .map(|o| random_uniform(&mut rng, o.numel() as usize))
        .collect();

    let ref_cts = reference
        .outputs
        .iter()
        .zip(&cotangents)
        .map(|(o, ct)| Tensor::from_f32_on(Arc::clone(&stream), ct, o.shape()))
        .collect::<tc_core::Result<Vec<_>>>()?;
    let ref_grads = tc_autograd::grad(&reference.outputs, &ref_cts, &reference.inputs)?;

    let backward = append_backward(&compiled.program, &compiled.outputs)?;
    debug!(program = %backward.program, "backward program");
    let runtime = GraphCompiler::new(config.target).build(&backward.program)?;

    let mut grad_feeds = feeds.clone();
    for (g, ct) in backward.grad_inputs.iter().zip(&cotangents) {
        grad_feeds.push((g.id.as_str(), ct.as_slice()));
    }
    let mut fetches: Vec<&str> = compiled.outputs.iter().map(|v| v.id.as_str()).collect();
    for x in &compiled.inputs {
        let g = backward
            .input_grads
            .get(&x.id)
            .ok_or_else(|| OpTestError::InvalidCase(format!("no gradient for input {:?}", x.id)))?;
        fetches.push(g.id.as_str());
    }
    let got = runtime.execute(&grad_feeds, &fetches)?;
    let (got_outputs, got_grads) = got.split_at(compiled.outputs.len());

    report.outputs = compare_outputs(&reference, &compiled, got_outputs, config)?;
    for ((x, expected), actual) in compiled.inputs.iter().zip(&ref_grads).zip(got_grads) {
        let what = format!("grad of {}", x.id);
        check_shape(&what, &x.shape.0, &expected.shape().0)?;
        let expected = expected.to_vec_f32()?;
        let stats = check_allclose(&what, actual, &expected, config.atol, config.rtol)?;
        report.grads.push(stats);
    }
    info!(
        case = case.name(),
        outputs = report.outputs.len(),
        grads = report.grads.len(),
        "op test passed"
    );
    Ok(report)
}

fn compare_outputs(
    reference: &ReferenceOutputs,
    compiled: &CompiledOutputs,
    got: &[Vec<f32>],
    config: &OpTestConfig,
) -> Result<Vec<CompareStats>> {
    let mut stats = Vec::with_capacity(got.len());
    for ((expected, var), actual) in reference.outputs.iter().zip(&compiled.outputs).zip(got) {
        let what = format!("output {}", var.id);
        check_shape(&what, &var.shape.0, &expected.shape().0)?;
        stats.push(check_allclose(
            &what,
            actual,
            &expected.to_vec_f32()?,
            config.atol,
            config.rtol,
        )?);
    }
    Ok(stats)
}

fn check_arity<T: OpTest + ?Sized>(
    case: &T,
    reference: &ReferenceOutputs,
    compiled: &CompiledOutputs,
) -> Result<()> {
    let n_in = case.inputs().len();
    if reference.inputs.len() != n_in || compiled.inputs.len() != n_in {
        return Err(OpTestError::InvalidCase(format!(
            "{} inputs declared, reference uses {}, compiled uses {}",
            n_in,
            reference.inputs.len(),
            compiled.inputs.len()
        )));
    }
    if reference.outputs.len() != compiled.outputs.len() {
        return Err(OpTestError::InvalidCase(format!(
            "reference has {} outputs, compiled has {}",
            reference.outputs.len(),
            compiled.outputs.len()
        )));
    }
    Ok(())
}

fn check_shape(what: &str, got: &[i64], expected: &[i64]) -> Result<()> {
    if got != expected {
        return Err(OpTestError::ShapeMismatch {
            what: what.to_string(),
            got: got.to_vec(),
            expected: expected.to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tc_core::DType;
    use tc_frontend::{NetBuilder, Target};

    /// y = x * w with a deliberately wrong reference when `broken` is set.
    struct ScaleCase {
        inputs: Vec<Feed>,
        broken: bool,
    }

    impl OpTest for ScaleCase {
        fn name(&self) -> &str {
            "scale"
        }

        fn init_case(&mut self, rng: &mut StdRng) {
            self.inputs = vec![Feed::random("x", &[2, 2], rng), Feed::random("w", &[2, 2], rng)];
        }

        fn inputs(&self) -> &[Feed] {
            &self.inputs
        }

        fn build_reference_program(&self, stream: &Arc<Stream>) -> Result<ReferenceOutputs> {
            let t = |f: &Feed| {
                Tensor::from_f32_on(Arc::clone(stream), &f.data, &f.shape)
            };
            let x = t(&self.inputs[0])?;
            let w = t(&self.inputs[1])?;
            let y = if self.broken { x.add(&w)? } else { x.mul(&w)? };
            Ok(ReferenceOutputs {
                inputs: vec![x, w],
                outputs: vec![y],
            })
        }

        fn build_compiled_program(&self) -> Result<CompiledOutputs> {
            let mut b = NetBuilder::new("scale");
            let x = b.create_input(DType::F32, &[2, 2], "x")?;
            let w = b.create_input(DType::F32, &[2, 2], "w")?;
            let y = b.elementwise_mul(&x, &w)?;
            Ok(CompiledOutputs {
                program: b.build(),
                inputs: vec![x, w],
                outputs: vec![y],
            })
        }
    }

    fn config() -> OpTestConfig {
        OpTestConfig::default().with_seed(11).with_target(Target::host())
    }

    #[test]
    fn test_matching_case_passes() {
        let mut case = ScaleCase {
            inputs: Vec::new(),
            broken: false,
        };
        let report = check_outputs_and_grads(&mut case, &config()).unwrap();
        assert_eq!(report.seed, 11);
        assert_eq!(report.outputs.len(), 1);
        assert_eq!(report.grads.len(), 2);
        assert_eq!(report.target, "host");
    }

    #[test]
    fn test_broken_reference_is_reported() {
        let mut case = ScaleCase {
            inputs: Vec::new(),
            broken: true,
        };
        assert!(matches!(
            check_outputs(&mut case, &config()),
            Err(OpTestError::Mismatch { .. })
        ));
    }

    #[test]
    fn test_skip_if() {
        assert!(OpTestTool::skip_if(true, "reason"));
        assert!(!OpTestTool::skip_if(false, "reason"));
    }
}
