//! A from-scratch feedforward neural network engine.
//!
//! `ffnet` trains dense networks one sample at a time: a [`Model`] is an ordered stack
//! of [`Layer`]s, each [`Dense`] layer owns its weights, biases and optimizer
//! accumulators, and [`Model::train_step`] runs forward, loss gradient and backward with
//! in-place parameter updates.
//!
//! # Panics vs `Result`
//!
//! - Low-level hot path (panics on misuse): [`Model::forward`], [`Dense::forward`],
//!   [`Optimizer::update`]. Shape mismatches are programmer error and panic via `assert!`.
//! - High-level APIs ([`Model::predict`], [`Model::train_step`], [`Model::fit`],
//!   persistence) validate their inputs and return [`Result`].
//!
//! # Data layout
//!
//! - Scalars are `f64`.
//! - Layer weights are row-major with shape `(out_dim, in_dim)`.
//! - [`Dataset`] and batched inputs are flat row-major buffers.
//!
//! # Quick start
//!
//! ```rust
//! use ffnet::{Activation, Dataset, FitConfig, Loss, ModelBuilder, Optimizer, Shuffle};
//!
//! # fn main() -> ffnet::Result<()> {
//! let xs = vec![
//!     vec![0.0, 0.0],
//!     vec![0.0, 1.0],
//!     vec![1.0, 0.0],
//!     vec![1.0, 1.0],
//! ];
//! let ys = vec![vec![0.0], vec![1.0], vec![1.0], vec![0.0]];
//! let train = Dataset::from_rows(&xs, &ys)?;
//!
//! let mut model = ModelBuilder::new(2)?
//!     .add_dense(8, Activation::Tanh)?
//!     .add_dense(1, Activation::Sigmoid)?
//!     .build_with_seed(0)?;
//!
//! let report = model.fit(
//!     &train,
//!     None,
//!     FitConfig {
//!         epochs: 50,
//!         loss: Loss::Mse,
//!         optimizer: Optimizer::adam(0.05),
//!         shuffle: Shuffle::Seeded(0),
//!         lr_decay: 1.0,
//!     },
//! )?;
//! assert_eq!(report.epochs.len(), 50);
//! # Ok(())
//! # }
//! ```
//!
//! # Custom loops
//!
//! ```rust
//! use ffnet::{Activation, Loss, Model, Optimizer};
//!
//! # fn main() -> ffnet::Result<()> {
//! let mut model = Model::new_with_seed(&[3, 8, 2], &[Activation::Tanh, Activation::Identity], 0)?;
//! let x = [0.1, -0.2, 0.3];
//! let t = [0.0, 1.0];
//!
//! let y = model.forward_train(&x)?;
//! let d_y = Loss::Mse.grad(&y, &t)?;
//! model.backward(&d_y, Optimizer::Sgd { lr: 1e-2 })?;
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod builder;
pub mod data;
pub mod error;
pub mod idx;
pub mod layer;
pub mod loss;
pub(crate) mod matmul;
pub mod metrics;
pub mod model;
pub mod optim;
pub mod persist;
pub mod stream;
pub mod train;

pub use activation::Activation;
pub use builder::ModelBuilder;
pub use data::{one_hot, Dataset};
pub use error::{Error, Result};
pub use layer::{Dense, DenseGradients, Dropout, Init, Layer};
pub use loss::Loss;
pub use model::Model;
pub use optim::{Optimizer, OptimizerState};
pub use train::{EpochReport, EvalReport, FitConfig, FitReport, Shuffle};
