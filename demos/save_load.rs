use ffnet::{Activation, Loss, Model, Optimizer};

fn main() -> ffnet::Result<()> {
    let mut model = Model::new_with_seed(&[2, 4, 1], &[Activation::ReLU, Activation::Identity], 0)?;
    model.train(
        &[vec![1.0, 2.0], vec![-1.0, 0.5]],
        &[vec![3.0], vec![-0.5]],
        100,
        Loss::Mse,
        Optimizer::Sgd { lr: 0.01 },
    )?;

    std::fs::create_dir_all("target")?;
    let path = "target/tmp_model.bin";
    model.save(path)?;

    // Same architecture, different initial weights: parameters are overwritten.
    let mut restored =
        Model::new_with_seed(&[2, 4, 1], &[Activation::ReLU, Activation::Identity], 1)?;
    restored.load_parameters(path)?;

    let x = [1.0, 2.0];
    println!("original {:?} restored {:?}", model.forward(&x), restored.forward(&x));

    #[cfg(feature = "serde")]
    {
        let json_path = "target/tmp_model.json";
        model.save_json(json_path)?;
        let from_json = Model::load_json(json_path)?;
        println!("from json {:?}", from_json.forward(&x));
    }
    Ok(())
}
