use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ffnet::{Activation, Dataset, FitConfig, Loss, ModelBuilder, Optimizer, Shuffle};

fn main() -> ffnet::Result<()> {
    // Tiny synthetic 3-class dataset in 2D: a noisy blob around each center.
    let mut rng = StdRng::seed_from_u64(0);

    let centers = [[-1.0, -1.0], [1.0, -1.0], [0.0, 1.0]];
    let n_per_class = 128;
    let mut samples = Vec::with_capacity(3 * n_per_class * 2);
    let mut labels = Vec::with_capacity(3 * n_per_class);

    for (class, center) in centers.iter().enumerate() {
        for _ in 0..n_per_class {
            samples.push(center[0] + rng.gen_range(-0.3..0.3));
            samples.push(center[1] + rng.gen_range(-0.3..0.3));
            labels.push(class);
        }
    }

    let train = Dataset::from_labels(samples, 2, &labels, 3)?;

    // Softmax output with cross-entropy trains on the fused `softmax - target` gradient.
    let mut model = ModelBuilder::new(2)?
        .add_dense(16, Activation::ReLU)?
        .add_dropout(0.1)?
        .add_dense(3, Activation::Softmax)?
        .build_with_seed(0)?;

    let report = model.fit(
        &train,
        Some(&train),
        FitConfig {
            epochs: 30,
            loss: Loss::CrossEntropy,
            optimizer: Optimizer::Momentum { lr: 0.05, beta: 0.9 },
            shuffle: Shuffle::Seeded(0),
            lr_decay: 0.95,
        },
    )?;

    if let Some(last) = report.epochs.last() {
        println!("epoch {} train_loss={:.4} valid={:?}", last.epoch, last.train_loss, last.valid);
    }

    let eval = model.evaluate(&train, Loss::CrossEntropy)?;
    println!("evaluate: loss={:.4} accuracy={:.3}", eval.loss, eval.accuracy);
    Ok(())
}
