use criterion::{black_box, criterion_group, criterion_main, Criterion};

use rust_mlpe::{Dataset, Matrix, Network, NetworkBuilder, OutputKind};

fn classifier() -> Network {
    NetworkBuilder::new(16, 4)
        .unwrap()
        .hidden(32)
        .unwrap()
        .hidden(16)
        .unwrap()
        .output(OutputKind::Classifier)
        .unwrap()
        .build_with_seed(0)
        .unwrap()
}

fn dataset(len: usize, nin: usize, classes: usize) -> Dataset {
    let mut values = Vec::with_capacity(len * (nin + 1));
    for i in 0..len {
        values.extend((0..nin).map(|j| ((i * 7 + j * 3) % 11) as f64 / 11.0 - 0.5));
        values.push((i % classes) as f64);
    }
    Dataset::from_flat(values, nin + 1).unwrap()
}

fn forward_bench(c: &mut Criterion) {
    let net = classifier();
    let mut ws = net.workspace();
    let x = vec![0.1; net.input_count()];

    c.bench_function("forward_16_32_16_4", |b| {
        b.iter(|| {
            let y = net.forward(black_box(&x), &mut ws);
            black_box(y[0]);
        })
    });
}

fn grad_batch_bench(c: &mut Criterion) {
    let net = classifier();
    let data = dataset(256, 16, 4);
    let mut ws = net.workspace();
    let mut grad = vec![0.0; net.weight_count()];

    c.bench_function("grad_natural_batch_256", |b| {
        b.iter(|| {
            let e = net
                .grad_natural_batch(black_box(&data), &mut ws, &mut grad)
                .unwrap();
            black_box(e);
        })
    });
}

fn hessian_batch_bench(c: &mut Criterion) {
    // Hessian cost grows with W^2, keep the network small.
    let net = NetworkBuilder::new(4, 1)
        .unwrap()
        .hidden(8)
        .unwrap()
        .build_with_seed(0)
        .unwrap();
    let data = dataset(64, 4, 3);
    let wc = net.weight_count();
    let mut grad = vec![0.0; wc];
    let mut h = Matrix::zeros(wc, wc);

    c.bench_function("hessian_batch_4_8_1_64", |b| {
        b.iter(|| {
            let e = net.hessian_batch(black_box(&data), &mut grad, &mut h).unwrap();
            black_box(e);
        })
    });
}

criterion_group!(benches, forward_bench, grad_batch_bench, hessian_batch_bench);
criterion_main!(benches);
