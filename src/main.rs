//! `ffnet` command line driver.
//!
//! Usage:
//!   ffnet train --train-images train-images.idx3-ubyte --train-labels train-labels.idx1-ubyte \
//!       --layers 784,128,10 --activations relu,softmax --loss cross-entropy --out model.bin
//!   ffnet eval --model model.bin --images t10k-images.idx3-ubyte --labels t10k-labels.idx1-ubyte

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use ffnet::{idx, Activation, Error, FitConfig, Loss, ModelBuilder, Optimizer, Result, Shuffle};

#[derive(Parser, Debug)]
#[command(name = "ffnet")]
#[command(about = "Train and evaluate feedforward networks on IDX (MNIST) data")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model and write a binary checkpoint
    Train(TrainArgs),
    /// Evaluate a checkpoint on a labelled image set
    Eval(EvalArgs),
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    #[arg(long)]
    train_images: PathBuf,

    #[arg(long)]
    train_labels: PathBuf,

    /// Held-out images, evaluated after every epoch
    #[arg(long, requires = "test_labels")]
    test_images: Option<PathBuf>,

    #[arg(long, requires = "test_images")]
    test_labels: Option<PathBuf>,

    /// Layer sizes including input and output
    #[arg(long, value_delimiter = ',', default_value = "784,128,10")]
    layers: Vec<usize>,

    /// One activation per dense layer
    #[arg(long, value_delimiter = ',', default_value = "relu,softmax")]
    activations: Vec<String>,

    /// Dropout rate inserted after every hidden layer (0 disables)
    #[arg(long, default_value = "0")]
    dropout: f64,

    /// JSON training config; explicit flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    lr: Option<f64>,

    /// sgd, momentum or adam
    #[arg(long)]
    optimizer: Option<String>,

    /// mse, cross-entropy or softmax-cross-entropy
    #[arg(long)]
    loss: Option<String>,

    #[arg(long)]
    lr_decay: Option<f64>,

    /// Shuffle samples every epoch (seeded from --seed)
    #[arg(long)]
    shuffle: bool,

    #[arg(long, default_value = "42")]
    seed: u64,

    /// Checkpoint output path
    #[arg(long, default_value = "model.bin")]
    out: PathBuf,

    /// Also write the model as JSON
    #[arg(long)]
    json_out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct EvalArgs {
    #[arg(long)]
    model: PathBuf,

    #[arg(long)]
    images: PathBuf,

    #[arg(long)]
    labels: PathBuf,

    #[arg(long, default_value = "cross-entropy")]
    loss: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Cli::parse().command {
        Command::Train(args) => train(args),
        Command::Eval(args) => eval(args),
    }
}

fn optimizer_from_name(name: &str, lr: f64) -> Result<Optimizer> {
    match name.trim().to_ascii_lowercase().as_str() {
        "sgd" => Ok(Optimizer::Sgd { lr }),
        "momentum" => Ok(Optimizer::Momentum { lr, beta: 0.9 }),
        "adam" => Ok(Optimizer::adam(lr)),
        other => Err(Error::InvalidConfig(format!("unknown optimizer {other:?}"))),
    }
}

fn fit_config(args: &TrainArgs) -> Result<FitConfig> {
    let mut cfg = match &args.config {
        Some(path) => {
            let s = std::fs::read_to_string(path)?;
            serde_json::from_str::<FitConfig>(&s).map_err(|e| {
                Error::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
            })?
        }
        None => FitConfig::default(),
    };

    if let Some(epochs) = args.epochs {
        cfg.epochs = epochs;
    }
    if let Some(loss) = &args.loss {
        cfg.loss = Loss::from_name(loss)?;
    }
    let lr = args.lr.unwrap_or(cfg.optimizer.lr());
    cfg.optimizer = match &args.optimizer {
        Some(name) => optimizer_from_name(name, lr)?,
        None => cfg.optimizer.with_lr(lr),
    };
    if let Some(decay) = args.lr_decay {
        cfg.lr_decay = decay;
    }
    if args.shuffle {
        cfg.shuffle = Shuffle::Seeded(args.seed);
    }
    Ok(cfg)
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

fn train(args: TrainArgs) -> Result<()> {
    let cfg = fit_config(&args)?;
    let activations = args
        .activations
        .iter()
        .map(|s| Activation::from_name(s))
        .collect::<Result<Vec<_>>>()?;
    if args.layers.len() < 2 {
        return Err(Error::InvalidConfig(
            "--layers needs at least input and output sizes".to_owned(),
        ));
    }
    if activations.len() != args.layers.len() - 1 {
        return Err(Error::InvalidConfig(format!(
            "{} activations given for {} dense layers",
            activations.len(),
            args.layers.len() - 1
        )));
    }
    let classes = args.layers[args.layers.len() - 1];

    let train = idx::load_dataset(&args.train_images, &args.train_labels, classes)?;
    let test = match (&args.test_images, &args.test_labels) {
        (Some(images), Some(labels)) => Some(idx::load_dataset(images, labels, classes)?),
        _ => None,
    };
    info!(
        "loaded {} training samples ({} features)",
        train.len(),
        train.input_dim()
    );

    let hidden = args.layers.len() - 2;
    let mut builder = ModelBuilder::new(args.layers[0])?;
    for (i, (&out_dim, &act)) in args.layers[1..].iter().zip(&activations).enumerate() {
        builder = builder.add_dense(out_dim, act)?;
        if i < hidden && args.dropout > 0.0 {
            builder = builder.add_dropout(args.dropout)?;
        }
    }
    let mut model = builder.build_with_seed(args.seed)?;
    info!(
        "model: {} layers, {} parameters, {} with {}",
        model.num_layers(),
        model.num_params(),
        cfg.optimizer.name(),
        cfg.loss
    );

    let pb = progress_bar((cfg.epochs * train.len()) as u64);
    let report = model.fit_with_progress(&train, test.as_ref(), cfg, |done, _| {
        pb.set_position(done as u64);
    })?;
    pb.finish_and_clear();

    info!("final training loss {:.6}", report.final_loss);
    if let Some(valid) = report.epochs.last().and_then(|e| e.valid) {
        info!("test accuracy {:.2}%", valid.accuracy * 100.0);
    }

    model.save(&args.out)?;
    info!("wrote {}", args.out.display());
    if let Some(path) = &args.json_out {
        model.save_json(path)?;
        info!("wrote {}", path.display());
    }
    Ok(())
}

fn eval(args: EvalArgs) -> Result<()> {
    let loss = Loss::from_name(&args.loss)?;
    let model = ffnet::Model::load(&args.model)?;
    let data = idx::load_dataset(&args.images, &args.labels, model.output_dim())?;

    let report = model.evaluate(&data, loss)?;
    println!(
        "samples {}  loss {:.6}  accuracy {:.2}%",
        data.len(),
        report.loss,
        report.accuracy * 100.0
    );
    Ok(())
}
