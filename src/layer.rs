//! Layers.
//!
//! [`Layer`] is a closed set of layer kinds sharing one capability set:
//! `forward` (inference, no caching), `forward_train` (caches what backward needs)
//! and `backward` (consumes the cache, updates parameters, returns `dL/d(input)`).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};

use crate::{Activation, Error, Optimizer, OptimizerState, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Weight initialization scheme.
pub enum Init {
    /// `N(0, sqrt(2 / (in + out)))`.
    #[default]
    XavierNormal,
    /// `U(-sqrt(6 / (in + out)), sqrt(6 / (in + out)))`.
    XavierUniform,
    /// `N(0, sqrt(2 / in))`.
    HeNormal,
}

impl Init {
    fn fill<R: Rng + ?Sized>(
        self,
        weights: &mut [f64],
        in_dim: usize,
        out_dim: usize,
        rng: &mut R,
    ) -> Result<()> {
        let fan_sum = (in_dim + out_dim) as f64;
        match self {
            Init::XavierNormal => {
                let dist = normal((2.0 / fan_sum).sqrt())?;
                weights.iter_mut().for_each(|w| *w = dist.sample(rng));
            }
            Init::XavierUniform => {
                let limit = (6.0 / fan_sum).sqrt();
                let dist = Uniform::new_inclusive(-limit, limit);
                weights.iter_mut().for_each(|w| *w = dist.sample(rng));
            }
            Init::HeNormal => {
                let dist = normal((2.0 / in_dim as f64).sqrt())?;
                weights.iter_mut().for_each(|w| *w = dist.sample(rng));
            }
        }
        Ok(())
    }
}

fn normal(std_dev: f64) -> Result<Normal<f64>> {
    Normal::new(0.0, std_dev)
        .map_err(|e| Error::InvalidConfig(format!("invalid init std dev {std_dev}: {e}")))
}

#[derive(Debug, Clone, PartialEq)]
struct ForwardCache {
    input: Vec<f64>,
    z: Vec<f64>,
}

/// Parameter gradients of a dense layer for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseGradients {
    /// Row-major `(out_dim, in_dim)`.
    pub d_weights: Vec<f64>,
    pub d_biases: Vec<f64>,
    /// `dL/d(input)`, computed with the current weights.
    pub d_input: Vec<f64>,
}

/// Fully connected layer: `y = activation(W x + b)`.
#[derive(Debug, Clone)]
pub struct Dense {
    in_dim: usize,
    out_dim: usize,
    activation: Activation,
    /// Row-major matrix with shape (out_dim, in_dim).
    weights: Vec<f64>,
    biases: Vec<f64>,
    weight_state: OptimizerState,
    bias_state: OptimizerState,
    cache: Option<ForwardCache>,
}

impl Dense {
    /// Build a layer with randomly initialized weights and zero biases.
    pub fn new_with_rng<R: Rng + ?Sized>(
        in_dim: usize,
        out_dim: usize,
        activation: Activation,
        init: Init,
        rng: &mut R,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "layer dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }

        let mut weights = vec![0.0; in_dim * out_dim];
        init.fill(&mut weights, in_dim, out_dim, rng)?;

        Ok(Self {
            in_dim,
            out_dim,
            activation,
            weights,
            biases: vec![0.0; out_dim],
            weight_state: OptimizerState::None,
            bias_state: OptimizerState::None,
            cache: None,
        })
    }

    /// Build a layer from explicit parameters.
    ///
    /// `weights` is row-major `(out_dim, in_dim)`. All values must be finite.
    pub fn from_parts(
        in_dim: usize,
        out_dim: usize,
        activation: Activation,
        weights: Vec<f64>,
        biases: Vec<f64>,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "layer dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }
        if weights.len() != in_dim * out_dim {
            return Err(Error::InvalidConfig(format!(
                "weights length {} does not match out_dim * in_dim ({out_dim} * {in_dim})",
                weights.len()
            )));
        }
        if biases.len() != out_dim {
            return Err(Error::InvalidConfig(format!(
                "biases length {} does not match out_dim {out_dim}",
                biases.len()
            )));
        }
        if weights.iter().chain(&biases).any(|v| !v.is_finite()) {
            return Err(Error::InvalidConfig(
                "layer parameters must be finite".to_owned(),
            ));
        }

        Ok(Self {
            in_dim,
            out_dim,
            activation,
            weights,
            biases,
            weight_state: OptimizerState::None,
            bias_state: OptimizerState::None,
            cache: None,
        })
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[inline]
    pub fn biases(&self) -> &[f64] {
        &self.biases
    }

    #[inline]
    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    #[inline]
    pub fn biases_mut(&mut self) -> &mut [f64] {
        &mut self.biases
    }

    #[inline]
    pub fn num_params(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    pub fn weight_state(&self) -> &OptimizerState {
        &self.weight_state
    }

    pub fn bias_state(&self) -> &OptimizerState {
        &self.bias_state
    }

    /// Whether a training forward pass is waiting for its backward pass.
    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn clear_cache(&mut self) {
        self.cache = None;
    }

    /// Forget all optimizer history (moments and step counters).
    pub fn reset_optimizer_state(&mut self) {
        self.weight_state.reset();
        self.bias_state.reset();
    }

    /// Replace weights and biases, resetting optimizer state and caches.
    pub(crate) fn set_params(&mut self, weights: Vec<f64>, biases: Vec<f64>) {
        debug_assert_eq!(weights.len(), self.weights.len());
        debug_assert_eq!(biases.len(), self.biases.len());
        self.weights = weights;
        self.biases = biases;
        self.reset_optimizer_state();
        self.clear_cache();
    }

    /// `z = W * input + b`.
    fn pre_activation(&self, input: &[f64], z: &mut [f64]) {
        assert_eq!(
            input.len(),
            self.in_dim,
            "input len {} does not match layer in_dim {}",
            input.len(),
            self.in_dim
        );

        for (o, z_o) in z.iter_mut().enumerate() {
            let row = &self.weights[o * self.in_dim..(o + 1) * self.in_dim];
            let mut sum = self.biases[o];
            for (&w, &x) in row.iter().zip(input) {
                sum = w.mul_add(x, sum);
            }
            *z_o = sum;
        }
    }

    /// Inference forward pass; does not touch the cache.
    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.out_dim];
        self.forward_into(input, &mut out);
        out
    }

    /// Inference forward pass writing into `out`.
    ///
    /// Shape contract:
    /// - `input.len() == self.in_dim()`
    /// - `out.len() == self.out_dim()`
    pub fn forward_into(&self, input: &[f64], out: &mut [f64]) {
        assert_eq!(
            out.len(),
            self.out_dim,
            "output len {} does not match layer out_dim {}",
            out.len(),
            self.out_dim
        );
        let mut z = vec![0.0; self.out_dim];
        self.pre_activation(input, &mut z);
        self.activation.apply_into(&z, out);
    }

    /// Training forward pass: same output as `forward`, but caches `input` and `z`.
    pub fn forward_train(&mut self, input: &[f64]) -> Vec<f64> {
        let mut z = vec![0.0; self.out_dim];
        self.pre_activation(input, &mut z);
        let out = self.activation.apply(&z);
        self.cache = Some(ForwardCache {
            input: input.to_vec(),
            z,
        });
        out
    }

    /// Gradients for the cached forward pass, without updating anything.
    pub fn gradients(&self, d_output: &[f64]) -> Result<DenseGradients> {
        let cache = self.cache.as_ref().ok_or(Error::MissingForwardCache { layer: "dense" })?;
        let d_z = self.d_z(cache, d_output)?;
        Ok(self.gradients_from_d_z(&cache.input, &d_z))
    }

    /// Backward pass for the cached sample.
    ///
    /// Consumes the cache, computes `dz = d_output ⊙ f'(z)` (softmax: Jacobian product),
    /// updates weights and biases through `optimizer` and returns `W^T dz` evaluated with
    /// the weights used in the forward pass. The result always has length `in_dim`.
    pub fn backward(&mut self, d_output: &[f64], optimizer: Optimizer) -> Result<Vec<f64>> {
        let cache = self.cache.take().ok_or(Error::MissingForwardCache { layer: "dense" })?;
        let d_z = match self.d_z(&cache, d_output) {
            Ok(d_z) => d_z,
            Err(e) => {
                self.cache = Some(cache);
                return Err(e);
            }
        };
        Ok(self.apply_d_z(&cache.input, &d_z, optimizer))
    }

    /// Backward pass given `dL/dz` directly, skipping the activation.
    ///
    /// Used when the activation's gradient is fused into the loss (softmax with
    /// cross-entropy).
    pub fn backward_from_d_z(&mut self, d_z: &[f64], optimizer: Optimizer) -> Result<Vec<f64>> {
        if d_z.len() != self.out_dim {
            return Err(Error::InvalidArgument(format!(
                "d_z len {} does not match layer out_dim {}",
                d_z.len(),
                self.out_dim
            )));
        }
        let cache = self.cache.take().ok_or(Error::MissingForwardCache { layer: "dense" })?;
        Ok(self.apply_d_z(&cache.input, d_z, optimizer))
    }

    /// The cached pre-activation of the last training forward pass.
    pub fn cached_z(&self) -> Option<&[f64]> {
        self.cache.as_ref().map(|c| c.z.as_slice())
    }

    fn d_z(&self, cache: &ForwardCache, d_output: &[f64]) -> Result<Vec<f64>> {
        if d_output.len() != self.out_dim {
            return Err(Error::InvalidArgument(format!(
                "d_output len {} does not match layer out_dim {}",
                d_output.len(),
                self.out_dim
            )));
        }
        let mut d_z = vec![0.0; self.out_dim];
        self.activation.backward(&cache.z, d_output, &mut d_z);
        Ok(d_z)
    }

    fn gradients_from_d_z(&self, input: &[f64], d_z: &[f64]) -> DenseGradients {
        let mut d_weights = vec![0.0; self.weights.len()];
        let mut d_input = vec![0.0; self.in_dim];

        for (o, &dz) in d_z.iter().enumerate() {
            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                d_weights[row + i] = dz * input[i];
                d_input[i] = self.weights[row + i].mul_add(dz, d_input[i]);
            }
        }

        DenseGradients {
            d_weights,
            d_biases: d_z.to_vec(),
            d_input,
        }
    }

    fn apply_d_z(&mut self, input: &[f64], d_z: &[f64], optimizer: Optimizer) -> Vec<f64> {
        let grads = self.gradients_from_d_z(input, d_z);
        optimizer.update(&mut self.weights, &mut self.weight_state, &grads.d_weights);
        optimizer.update(&mut self.biases, &mut self.bias_state, &grads.d_biases);
        grads.d_input
    }
}

/// Inverted dropout: at training time each unit is zeroed with probability `rate`
/// and survivors are scaled by `1 / (1 - rate)`; inference is the identity.
#[derive(Debug, Clone)]
pub struct Dropout {
    dim: usize,
    rate: f64,
    rng: StdRng,
    mask: Option<Vec<f64>>,
}

impl Dropout {
    /// The layer's mask RNG is seeded from `rng`.
    pub fn new_with_rng<R: Rng + ?Sized>(dim: usize, rate: f64, rng: &mut R) -> Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidConfig("dropout dim must be > 0".to_owned()));
        }
        if !(rate.is_finite() && (0.0..1.0).contains(&rate)) {
            return Err(Error::InvalidConfig(format!(
                "dropout rate must be finite and in [0,1), got {rate}"
            )));
        }
        Ok(Self {
            dim,
            rate,
            rng: StdRng::seed_from_u64(rng.gen()),
            mask: None,
        })
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        assert_eq!(
            input.len(),
            self.dim,
            "input len {} does not match dropout dim {}",
            input.len(),
            self.dim
        );
        input.to_vec()
    }

    pub fn forward_train(&mut self, input: &[f64]) -> Vec<f64> {
        assert_eq!(
            input.len(),
            self.dim,
            "input len {} does not match dropout dim {}",
            input.len(),
            self.dim
        );
        let keep = 1.0 - self.rate;
        let scale = 1.0 / keep;
        let mask: Vec<f64> = (0..self.dim)
            .map(|_| if self.rng.gen::<f64>() < keep { scale } else { 0.0 })
            .collect();
        let out = input.iter().zip(&mask).map(|(x, m)| x * m).collect();
        self.mask = Some(mask);
        out
    }

    pub fn backward(&mut self, d_output: &[f64]) -> Result<Vec<f64>> {
        let mask = self.mask.take().ok_or(Error::MissingForwardCache { layer: "dropout" })?;
        if d_output.len() != self.dim {
            return Err(Error::InvalidArgument(format!(
                "d_output len {} does not match dropout dim {}",
                d_output.len(),
                self.dim
            )));
        }
        Ok(d_output.iter().zip(&mask).map(|(g, m)| g * m).collect())
    }

    pub fn clear_cache(&mut self) {
        self.mask = None;
    }
}

/// A layer of a [`crate::Model`].
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    Dropout(Dropout),
}

impl Layer {
    #[inline]
    pub fn in_dim(&self) -> usize {
        match self {
            Layer::Dense(l) => l.in_dim(),
            Layer::Dropout(l) => l.dim(),
        }
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        match self {
            Layer::Dense(l) => l.out_dim(),
            Layer::Dropout(l) => l.dim(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Layer::Dense(_) => "dense",
            Layer::Dropout(_) => "dropout",
        }
    }

    pub fn num_params(&self) -> usize {
        match self {
            Layer::Dense(l) => l.num_params(),
            Layer::Dropout(_) => 0,
        }
    }

    pub fn as_dense(&self) -> Option<&Dense> {
        match self {
            Layer::Dense(l) => Some(l),
            Layer::Dropout(_) => None,
        }
    }

    pub fn as_dense_mut(&mut self) -> Option<&mut Dense> {
        match self {
            Layer::Dense(l) => Some(l),
            Layer::Dropout(_) => None,
        }
    }

    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        match self {
            Layer::Dense(l) => l.forward(input),
            Layer::Dropout(l) => l.forward(input),
        }
    }

    pub fn forward_train(&mut self, input: &[f64]) -> Vec<f64> {
        match self {
            Layer::Dense(l) => l.forward_train(input),
            Layer::Dropout(l) => l.forward_train(input),
        }
    }

    pub fn backward(&mut self, d_output: &[f64], optimizer: Optimizer) -> Result<Vec<f64>> {
        match self {
            Layer::Dense(l) => l.backward(d_output, optimizer),
            Layer::Dropout(l) => l.backward(d_output),
        }
    }

    pub fn clear_cache(&mut self) {
        match self {
            Layer::Dense(l) => l.clear_cache(),
            Layer::Dropout(l) => l.clear_cache(),
        }
    }

    pub fn reset_optimizer_state(&mut self) {
        if let Layer::Dense(l) = self {
            l.reset_optimizer_state();
        }
    }
}

impl From<Dense> for Layer {
    fn from(value: Dense) -> Self {
        Layer::Dense(value)
    }
}

impl From<Dropout> for Layer {
    fn from(value: Dropout) -> Self {
        Layer::Dropout(value)
    }
}
