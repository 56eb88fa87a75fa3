//! Forward + backward programs executed end to end on every available target.

use tc_core::DType;
use tc_frontend::{GraphCompiler, NetBuilder, Target, append_backward, is_compiled_with_accel};

fn targets() -> Vec<Target> {
    let mut ts = vec![Target::host()];
    if is_compiled_with_accel() {
        ts.push(Target::accel());
    }
    ts
}

#[test]
fn transpose_grad_is_inverse_transpose() {
    let _ = tracing_subscriber::fmt::try_init();
    let mut b = NetBuilder::new("transpose_test");
    let x = b.create_input(DType::F32, &[2, 3], "x").unwrap();
    let y = b.transpose(&x, &[1, 0]).unwrap();
    let bw = append_backward(&b.build(), &[y.clone()]).unwrap();
    let dx = &bw.input_grads["x"];

    let x_data: &[f32] = &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
    // Cotangent laid out as [3, 2].
    let dy_data: &[f32] = &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0];

    for target in targets() {
        let rt = GraphCompiler::new(target).build(&bw.program).unwrap();
        let out = rt
            .execute(
                &[("x", x_data), (bw.grad_inputs[0].id.as_str(), dy_data)],
                &[y.id.as_str(), dx.id.as_str()],
            )
            .unwrap();
        assert_eq!(out[0], vec![0.1, 0.4, 0.2, 0.5, 0.3, 0.6], "{target}");
        assert_eq!(out[1], vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0], "{target}");
    }
}

#[test]
fn product_rule_and_reduction() {
    // loss = sum(a * b), so da = b and db = a.
    let mut bld = NetBuilder::new("mul_sum");
    let a = bld.create_input(DType::F32, &[2, 2], "a").unwrap();
    let b = bld.create_input(DType::F32, &[2, 2], "b").unwrap();
    let p = bld.elementwise_mul(&a, &b).unwrap();
    let loss = bld.reduce_sum(&p, None).unwrap();
    let bw = append_backward(&bld.build(), &[loss]).unwrap();

    let a_data: &[f32] = &[1.0, 2.0, 3.0, 4.0];
    let b_data: &[f32] = &[5.0, 6.0, 7.0, 8.0];
    for target in targets() {
        let rt = GraphCompiler::new(target).build(&bw.program).unwrap();
        let out = rt
            .execute(
                &[
                    ("a", a_data),
                    ("b", b_data),
                    (bw.grad_inputs[0].id.as_str(), &[1.0]),
                ],
                &[bw.input_grads["a"].id.as_str(), bw.input_grads["b"].id.as_str()],
            )
            .unwrap();
        assert_eq!(out[0], b_data.to_vec(), "{target}");
        assert_eq!(out[1], a_data.to_vec(), "{target}");
    }
}

#[test]
fn matmul_grads() {
    let mut bld = NetBuilder::new("mm");
    let a = bld.create_input(DType::F32, &[2, 2], "a").unwrap();
    let b = bld.create_input(DType::F32, &[2, 2], "b").unwrap();
    let c = bld.matmul(&a, &b).unwrap();
    let bw = append_backward(&bld.build(), &[c]).unwrap();

    let rt = GraphCompiler::new(Target::host()).build(&bw.program).unwrap();
    let out = rt
        .execute(
            &[
                ("a", &[1.0, 2.0, 3.0, 4.0]),
                ("b", &[5.0, 6.0, 7.0, 8.0]),
                (bw.grad_inputs[0].id.as_str(), &[1.0; 4]),
            ],
            &[bw.input_grads["a"].id.as_str(), bw.input_grads["b"].id.as_str()],
        )
        .unwrap();
    // dA = ones @ B^T, dB = A^T @ ones
    assert_eq!(out[0], vec![11.0, 15.0, 11.0, 15.0]);
    assert_eq!(out[1], vec![4.0, 4.0, 6.0, 6.0]);
}

#[test]
fn broadcast_bias_grad_sums_rows() {
    let mut bld = NetBuilder::new("bias");
    let x = bld.create_input(DType::F32, &[2, 3], "x").unwrap();
    let bias = bld.create_input(DType::F32, &[3], "bias").unwrap();
    let y = bld.elementwise_add(&x, &bias).unwrap();
    let bw = append_backward(&bld.build(), &[y]).unwrap();

    let rt = GraphCompiler::new(Target::host()).build(&bw.program).unwrap();
    let out = rt
        .execute(
            &[
                ("x", &[0.0; 6]),
                ("bias", &[0.0; 3]),
                (bw.grad_inputs[0].id.as_str(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]),
            ],
            &[bw.input_grads["bias"].id.as_str()],
        )
        .unwrap();
    assert_eq!(out[0], vec![5.0, 7.0, 9.0]);
}
