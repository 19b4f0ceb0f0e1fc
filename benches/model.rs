use criterion::{black_box, criterion_group, criterion_main, Criterion};

use ffnet::{Activation, Loss, Model, Optimizer};

fn model() -> Model {
    Model::new_with_seed(
        &[128, 256, 256, 10],
        &[Activation::ReLU, Activation::ReLU, Activation::Softmax],
        0,
    )
    .unwrap()
}

fn forward_bench(c: &mut Criterion) {
    let model = model();
    let input = vec![0.1; model.input_dim()];

    c.bench_function("forward_128_256_256_10", |b| {
        b.iter(|| black_box(model.forward(black_box(&input))))
    });
}

fn predict_batch_bench(c: &mut Criterion) {
    let model = model();
    let batch = 64;
    let inputs = vec![0.1; batch * model.input_dim()];

    c.bench_function("predict_batch_64x128_256_256_10", |b| {
        b.iter(|| black_box(model.predict_batch(black_box(&inputs), batch).unwrap()))
    });
}

fn train_step_bench(c: &mut Criterion) {
    let mut model = model();
    let input = vec![0.1; model.input_dim()];
    let mut target = vec![0.0; model.output_dim()];
    target[3] = 1.0;

    c.bench_function("train_step_adam_128_256_256_10", |b| {
        b.iter(|| {
            let loss = model
                .train_step(
                    black_box(&input),
                    black_box(&target),
                    Loss::CrossEntropy,
                    Optimizer::adam(1e-3),
                )
                .unwrap();
            black_box(loss)
        })
    });
}

criterion_group!(benches, forward_bench, predict_batch_bench, train_step_bench);
criterion_main!(benches);
