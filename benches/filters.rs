use criterion::{black_box, Criterion};
use ndarray::{ArrayD, IxDyn};

use imsignal::filters;

fn synthetic_grid(n: usize) -> ArrayD<f32> {
    ArrayD::from_shape_fn(IxDyn(&[n, n]), |ix| {
        let x = ix[0] as f32 / n as f32;
        let y = ix[1] as f32 / n as f32;
        (x * 37.0).sin().abs() * (y * 53.0).cos().abs() * 1e4
    })
}

fn stdev(a: &ArrayD<f32>) -> f32 {
    let out = filters::stdev(a, &[5, 5]).unwrap();
    black_box(out.sum())
}

fn matched_gaussian(a: &ArrayD<f32>) -> f32 {
    let out = filters::matched_gaussian(a, &[3, 3]).unwrap();
    black_box(out.sum())
}

fn filtering(c: &mut Criterion) {
    let grid = synthetic_grid(256);

    c.bench_function("stdev_256", |b| b.iter(|| stdev(&grid)));

    c.bench_function("matched_gaussian_256", |b| {
        b.iter(|| matched_gaussian(&grid))
    });
}

criterion::criterion_group!(benches, filtering);
criterion::criterion_main!(benches);
