//! Model builder.
//!
//! `ModelBuilder` defines a model layer by layer. Unless an initializer is given
//! explicitly, dense layers use the default [`Init::XavierNormal`].

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Activation, Dense, Dropout, Error, Init, Layer, Model, Result};

#[derive(Debug, Clone, Copy)]
enum LayerSpec {
    Dense {
        out_dim: usize,
        activation: Activation,
        init: Init,
    },
    Dropout {
        rate: f64,
    },
}

#[derive(Debug, Clone)]
/// Builder for a [`Model`].
///
/// Example:
///
/// ```rust
/// use ffnet::{Activation, ModelBuilder};
///
/// # fn main() -> ffnet::Result<()> {
/// let model = ModelBuilder::new(2)?
///     .add_dense(8, Activation::ReLU)?
///     .add_dropout(0.1)?
///     .add_dense(1, Activation::Sigmoid)?
///     .build_with_seed(0)?;
/// assert_eq!(model.output_dim(), 1);
/// # Ok(())
/// # }
/// ```
pub struct ModelBuilder {
    input_dim: usize,
    layers: Vec<LayerSpec>,
}

impl ModelBuilder {
    /// Start building a model that accepts inputs of length `input_dim`.
    pub fn new(input_dim: usize) -> Result<Self> {
        if input_dim == 0 {
            return Err(Error::InvalidConfig("input_dim must be > 0".to_owned()));
        }
        Ok(Self {
            input_dim,
            layers: Vec::new(),
        })
    }

    /// Convenience constructor from a sizes list + activations.
    ///
    /// `sizes` includes input and output dimensions, so its length must be at least 2.
    /// `activations` must have length `sizes.len() - 1`.
    pub fn from_sizes(sizes: &[usize], activations: &[Activation]) -> Result<Self> {
        if sizes.len() < 2 {
            return Err(Error::InvalidConfig(
                "sizes must include input and output dims".to_owned(),
            ));
        }
        if activations.len() != sizes.len() - 1 {
            return Err(Error::InvalidConfig(format!(
                "activations length {} does not match sizes.len() - 1 ({})",
                activations.len(),
                sizes.len() - 1
            )));
        }

        let mut b = Self::new(sizes[0])?;
        for (&out_dim, &act) in sizes[1..].iter().zip(activations) {
            b = b.add_dense(out_dim, act)?;
        }
        Ok(b)
    }

    /// Add a dense layer with `out_dim` outputs.
    pub fn add_dense(self, out_dim: usize, activation: Activation) -> Result<Self> {
        self.add_dense_with_init(out_dim, activation, Init::default())
    }

    pub fn add_dense_with_init(
        mut self,
        out_dim: usize,
        activation: Activation,
        init: Init,
    ) -> Result<Self> {
        if out_dim == 0 {
            return Err(Error::InvalidConfig("layer out_dim must be > 0".to_owned()));
        }
        self.layers.push(LayerSpec::Dense {
            out_dim,
            activation,
            init,
        });
        Ok(self)
    }

    /// Add an inverted-dropout layer over the current width.
    pub fn add_dropout(mut self, rate: f64) -> Result<Self> {
        if !(rate.is_finite() && (0.0..1.0).contains(&rate)) {
            return Err(Error::InvalidConfig(format!(
                "dropout rate must be finite and in [0,1), got {rate}"
            )));
        }
        self.layers.push(LayerSpec::Dropout { rate });
        Ok(self)
    }

    /// Build using a deterministic seed.
    pub fn build_with_seed(self, seed: u64) -> Result<Model> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with_rng(&mut rng)
    }

    /// Build using the provided RNG.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Model> {
        if self.layers.is_empty() {
            return Err(Error::InvalidConfig(
                "model must have at least one layer".to_owned(),
            ));
        }

        let mut layers = Vec::with_capacity(self.layers.len());
        let mut in_dim = self.input_dim;
        for spec in self.layers {
            match spec {
                LayerSpec::Dense {
                    out_dim,
                    activation,
                    init,
                } => {
                    let layer = Dense::new_with_rng(in_dim, out_dim, activation, init, rng)?;
                    debug!("dense layer {in_dim} -> {out_dim} ({activation}, {init:?})");
                    layers.push(Layer::Dense(layer));
                    in_dim = out_dim;
                }
                LayerSpec::Dropout { rate } => {
                    layers.push(Layer::Dropout(Dropout::new_with_rng(in_dim, rate, rng)?));
                    debug!("dropout layer {in_dim} (rate {rate})");
                }
            }
        }

        Model::from_layers(layers)
    }
}
