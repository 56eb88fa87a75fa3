use std::process::ExitCode;

use clap::{Args as ClapArgs, Parser, Subcommand};
use tc_core::{DType, Shape, Tensor};
use tc_frontend::{Arch, GraphCompiler, NetBuilder, Target};
use tc_optest::{CheckReport, OpTestConfig, OpTestError, TransposeCase, check_outputs_and_grads};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tc-cli")]
#[command(about = "Transpose parity development CLI")]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run a quick smoke test of reference-framework ops.
    Smoke,
    /// Check a compiled op against the reference framework.
    Check {
        #[command(subcommand)]
        op: CheckOp,
    },
}

#[derive(Subcommand)]
enum CheckOp {
    /// transpose(x, perm) on random input.
    Transpose(TransposeArgs),
}

#[derive(ClapArgs)]
struct TransposeArgs {
    /// Input shape, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "2,3")]
    shape: Vec<i64>,
    /// Axis permutation, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "1,0")]
    perm: Vec<usize>,
    /// Input seed (default: TC_TEST_SEED or random).
    #[arg(long)]
    seed: Option<u64>,
    /// host or accel (default: TC_TARGET or the best compiled-in target).
    #[arg(long)]
    target: Option<Arch>,
    #[arg(long)]
    atol: Option<f32>,
    #[arg(long)]
    rtol: Option<f32>,
    /// Print the report as JSON.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match args.cmd {
        Cmd::Smoke => match smoke() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("smoke failed: {e}");
                ExitCode::FAILURE
            }
        },
        Cmd::Check {
            op: CheckOp::Transpose(t),
        } => match check_transpose(&t) {
            Ok(report) => {
                print_report(&report, t.json);
                ExitCode::SUCCESS
            }
            Err(e @ (OpTestError::Mismatch { .. } | OpTestError::ShapeMismatch { .. })) => {
                eprintln!("MISMATCH: {e}");
                ExitCode::from(1)
            }
            Err(e) => {
                eprintln!("error: {e}");
                ExitCode::from(2)
            }
        },
    }
}

fn check_transpose(t: &TransposeArgs) -> tc_optest::Result<CheckReport> {
    let mut config = OpTestConfig::from_env()?;
    if let Some(seed) = t.seed {
        config = config.with_seed(seed);
    }
    if let Some(arch) = t.target {
        config = config.with_target(Target { arch });
    }
    let atol = t.atol.unwrap_or(config.atol);
    let rtol = t.rtol.unwrap_or(config.rtol);
    config = config.with_tolerance(atol, rtol);
    debug!(?config, shape = ?t.shape, perm = ?t.perm, "check transpose");
    let mut case = TransposeCase::new(&t.shape, &t.perm)?;
    check_outputs_and_grads(&mut case, &config)
}

fn print_report(report: &CheckReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("failed to serialise report: {e}"),
        }
        return;
    }
    println!(
        "{}: OK (seed={}, target={}, atol={}, rtol={})",
        report.case, report.seed, report.target, report.atol, report.rtol
    );
    for s in report.outputs.iter().chain(&report.grads) {
        println!(
            "  {:<16} numel={:<6} max_abs_diff={:e} max_rel_diff={:e} at [{}]",
            s.name, s.numel, s.max_abs_diff, s.max_rel_diff, s.offset
        );
    }
}

fn smoke() -> tc_frontend::Result<()> {
    println!("Reference: lazy graph on {}", tc_core::backend::default_stream().backend_name());

    let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
    let x = Tensor::from_f32(&data, &Shape::new(vec![2, 3]))?;
    let xt = x.transpose(Some(&[1, 0]))?;
    println!("transpose [2,3]->[3,2] = {:?}", xt.to_vec_f32()?);
    println!("transpose twice = {:?}", xt.transpose(None)?.to_vec_f32()?);

    let row = Tensor::from_f32(&[10.0, 20.0], &Shape::new(vec![2]))?;
    let scaled = xt.mul(&row.broadcast_to(xt.shape())?)?;
    println!("x^T * [10, 20] = {:?}", scaled.to_vec_f32()?);

    let g = tc_autograd::grad(&[xt.clone()], &[xt.full_like(1.0)?], &[x.clone()])?;
    println!("d/dx sum(transpose(x)) = {:?}", g[0].to_vec_f32()?);

    let mut builder = NetBuilder::new("smoke_transpose");
    let xv = builder.create_input(DType::F32, &[2, 3], "x")?;
    let yv = builder.transpose(&xv, &[1, 0])?;
    let runtime = GraphCompiler::new(Target::host()).build(&builder.build())?;
    let compiled = runtime.execute(&[("x", &data)], &[yv.id.as_str()])?;
    println!("compiled transpose on host = {:?}", compiled[0]);
    if compiled[0] != xt.to_vec_f32()? {
        return Err(tc_core::TcError::InvalidArgument(
            "compiled transpose disagrees with reference".into(),
        )
        .into());
    }

    println!("\nAll smoke checks passed.");
    Ok(())
}
