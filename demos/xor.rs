use ffnet::{Activation, Dataset, FitConfig, Loss, ModelBuilder, Optimizer, Shuffle};

fn main() -> ffnet::Result<()> {
    let xs = vec![
        vec![0.0, 0.0],
        vec![0.0, 1.0],
        vec![1.0, 0.0],
        vec![1.0, 1.0],
    ];
    let ys = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];
    let train = Dataset::from_rows(&xs, &ys)?;

    let mut model = ModelBuilder::new(2)?
        .add_dense(8, Activation::Tanh)?
        .add_dense(1, Activation::Sigmoid)?
        .build_with_seed(0)?;

    let report = model.fit(
        &train,
        None,
        FitConfig {
            epochs: 500,
            loss: Loss::Mse,
            optimizer: Optimizer::adam(0.05),
            shuffle: Shuffle::Seeded(0),
            lr_decay: 1.0,
        },
    )?;
    println!("final loss {:.6}", report.final_loss);

    for x in &xs {
        println!("{x:?} -> {:.4}", model.predict(x)?[0]);
    }
    Ok(())
}
