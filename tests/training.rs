use approx::assert_abs_diff_eq;

use ffnet::{
    loss, Activation, Dataset, FitConfig, Loss, Model, ModelBuilder, Optimizer, Shuffle,
};

fn linear_data() -> Dataset {
    // y = 2 * x0 - x1
    let xs = vec![
        vec![1.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 1.0],
        vec![-1.0, 1.0],
    ];
    let ys: Vec<Vec<f64>> = xs.iter().map(|x| vec![2.0 * x[0] - x[1]]).collect();
    Dataset::from_rows(&xs, &ys).unwrap()
}

fn clusters() -> Dataset {
    let centers = [(2.0, 0.0), (-2.0, 0.0), (0.0, 2.0)];
    let offsets = [(0.0, 0.0), (0.3, 0.1), (-0.2, 0.3), (0.1, -0.3)];
    let mut samples = Vec::new();
    let mut labels = Vec::new();
    for (class, (cx, cy)) in centers.iter().enumerate() {
        for (dx, dy) in offsets {
            samples.extend([cx + dx, cy + dy]);
            labels.push(class);
        }
    }
    Dataset::from_labels(samples, 2, &labels, 3).unwrap()
}

#[test]
fn single_sgd_step_reduces_loss_on_identity_model() {
    let mut model = Model::new_with_seed(&[2, 1], &[Activation::Identity], 17).unwrap();
    let x = [1.0, -1.0];
    let y = [0.0];

    let before = loss::mse(&model.forward(&x), &y).unwrap();
    model
        .train_step(&x, &y, Loss::Mse, Optimizer::Sgd { lr: 0.01 })
        .unwrap();
    let after = loss::mse(&model.forward(&x), &y).unwrap();
    assert!(after < before, "before {before} after {after}");
}

#[test]
fn sgd_recovers_linear_map() {
    let mut model = Model::new_with_seed(&[2, 1], &[Activation::Identity], 3).unwrap();
    let data = linear_data();
    let report = model
        .fit(
            &data,
            None,
            FitConfig {
                epochs: 300,
                loss: Loss::Mse,
                optimizer: Optimizer::Sgd { lr: 0.05 },
                ..FitConfig::default()
            },
        )
        .unwrap();

    let dense = model.layer(0).unwrap().as_dense().unwrap();
    assert_abs_diff_eq!(dense.weights()[0], 2.0, epsilon = 1e-2);
    assert_abs_diff_eq!(dense.weights()[1], -1.0, epsilon = 1e-2);
    assert_abs_diff_eq!(dense.biases()[0], 0.0, epsilon = 1e-2);
    assert!(report.final_loss < 1e-4, "final loss {}", report.final_loss);
}

#[test]
fn momentum_and_adam_reduce_loss() {
    for optimizer in [
        Optimizer::Momentum { lr: 0.05, beta: 0.9 },
        Optimizer::adam(0.05),
    ] {
        let mut model =
            Model::new_with_seed(&[2, 4, 1], &[Activation::Tanh, Activation::Identity], 5).unwrap();
        let report = model
            .fit(
                &linear_data(),
                None,
                FitConfig {
                    epochs: 200,
                    loss: Loss::Mse,
                    optimizer,
                    shuffle: Shuffle::Seeded(1),
                    lr_decay: 1.0,
                },
            )
            .unwrap();
        let first = report.epochs[0].train_loss;
        assert!(
            report.final_loss < first,
            "{}: first {first} final {}",
            optimizer.name(),
            report.final_loss
        );
    }
}

#[test]
fn softmax_cross_entropy_classifies_clusters() {
    let data = clusters();
    let mut model = Model::new_with_seed(&[2, 3], &[Activation::Softmax], 0).unwrap();
    let before = model.evaluate(&data, Loss::CrossEntropy).unwrap();

    model
        .fit(
            &data,
            Some(&data),
            FitConfig {
                epochs: 100,
                loss: Loss::CrossEntropy,
                optimizer: Optimizer::Sgd { lr: 0.1 },
                shuffle: Shuffle::Seeded(9),
                lr_decay: 1.0,
            },
        )
        .unwrap();

    let after = model.evaluate(&data, Loss::CrossEntropy).unwrap();
    assert!(after.loss < before.loss);
    assert_eq!(after.accuracy, 1.0);

    let probs = model.predict(data.input(0)).unwrap();
    assert_abs_diff_eq!(probs.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
}

#[test]
fn logits_with_softmax_cross_entropy_classify_clusters() {
    let data = clusters();
    let mut model = ModelBuilder::new(2)
        .unwrap()
        .add_dense(3, Activation::Identity)
        .unwrap()
        .build_with_seed(1)
        .unwrap();

    model
        .fit(
            &data,
            None,
            FitConfig {
                epochs: 100,
                loss: Loss::SoftmaxCrossEntropy,
                optimizer: Optimizer::Sgd { lr: 0.1 },
                ..FitConfig::default()
            },
        )
        .unwrap();
    let report = model.evaluate(&data, Loss::SoftmaxCrossEntropy).unwrap();
    assert_eq!(report.accuracy, 1.0);
}

#[test]
fn dropout_network_trains_and_infers_deterministically() {
    let mut model = ModelBuilder::new(2)
        .unwrap()
        .add_dense(16, Activation::ReLU)
        .unwrap()
        .add_dropout(0.2)
        .unwrap()
        .add_dense(1, Activation::Identity)
        .unwrap()
        .build_with_seed(11)
        .unwrap();

    model
        .fit(
            &linear_data(),
            None,
            FitConfig {
                epochs: 20,
                optimizer: Optimizer::adam(0.01),
                ..FitConfig::default()
            },
        )
        .unwrap();

    let x = [0.5, 0.5];
    assert_eq!(model.forward(&x), model.forward(&x));
    assert!(model.dense_layers().all(|l| !l.has_cache()));
}

#[test]
fn train_runs_in_input_order() {
    let xs = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
    let ys = vec![vec![1.0], vec![0.0]];
    let opt = Optimizer::Sgd { lr: 0.1 };

    let mut a = Model::new_with_seed(&[2, 1], &[Activation::Identity], 0).unwrap();
    let mut b = a.clone();
    a.train(&xs, &ys, 2, Loss::Mse, opt).unwrap();
    for _ in 0..2 {
        for (x, y) in xs.iter().zip(&ys) {
            b.train_step(x, y, Loss::Mse, opt).unwrap();
        }
    }
    assert_eq!(a.forward(&[0.3, 0.7]), b.forward(&[0.3, 0.7]));
}

#[test]
fn models_can_move_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<Model>();

    let model = Model::new_with_seed(&[2, 1], &[Activation::Sigmoid], 0).unwrap();
    let expected = model.forward(&[1.0, 1.0]);
    let out = std::thread::spawn(move || model.forward(&[1.0, 1.0]))
        .join()
        .unwrap();
    assert_eq!(out, expected);
}
