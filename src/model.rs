use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::layer::{Dense, Layer};
use crate::matmul::gemm_f64;
use crate::{loss, Activation, Error, Init, Loss, Optimizer, Result};

/// An ordered stack of layers where each layer's output feeds the next one's input.
#[derive(Debug, Clone)]
pub struct Model {
    layers: Vec<Layer>,
}

impl Model {
    /// Dense model from layer sizes `[n0, n1, ..., nk]` and `k` activations.
    pub fn new_with_seed(sizes: &[usize], activations: &[Activation], seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new_with_rng(sizes, activations, &mut rng)
    }

    pub fn new_with_rng<R: Rng + ?Sized>(
        sizes: &[usize],
        activations: &[Activation],
        rng: &mut R,
    ) -> Result<Self> {
        if sizes.len() < 2 {
            return Err(Error::InvalidConfig(
                "sizes must include input and output dims".to_owned(),
            ));
        }
        if sizes.len() != activations.len() + 1 {
            return Err(Error::InvalidConfig(format!(
                "sizes length {} must be activations length {} + 1",
                sizes.len(),
                activations.len()
            )));
        }
        if sizes.contains(&0) {
            return Err(Error::InvalidConfig(
                "all layer sizes must be > 0".to_owned(),
            ));
        }

        let mut layers = Vec::with_capacity(activations.len());
        for (w, &act) in sizes.windows(2).zip(activations) {
            let layer = Dense::new_with_rng(w[0], w[1], act, Init::XavierNormal, rng)?;
            debug!("dense layer {} -> {} ({act})", w[0], w[1]);
            layers.push(Layer::Dense(layer));
        }
        Self::from_layers(layers)
    }

    /// Assemble a model from prebuilt layers.
    ///
    /// Fails if `layers` is empty or consecutive dims do not chain.
    pub fn from_layers(layers: Vec<Layer>) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::InvalidConfig(
                "model must have at least one layer".to_owned(),
            ));
        }
        for (i, pair) in layers.windows(2).enumerate() {
            if pair[0].out_dim() != pair[1].in_dim() {
                return Err(Error::InvalidConfig(format!(
                    "layer {i} out_dim {} does not match layer {} in_dim {}",
                    pair[0].out_dim(),
                    i + 1,
                    pair[1].in_dim()
                )));
            }
        }
        Ok(Self { layers })
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.layers[0].in_dim()
    }

    #[inline]
    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].out_dim()
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    #[inline]
    pub fn layer(&self, idx: usize) -> Option<&Layer> {
        self.layers.get(idx)
    }

    #[inline]
    pub fn layer_mut(&mut self, idx: usize) -> Option<&mut Layer> {
        self.layers.get_mut(idx)
    }

    /// Dense layers in order (the layers that own parameters).
    pub fn dense_layers(&self) -> impl Iterator<Item = &Dense> + '_ {
        self.layers.iter().filter_map(Layer::as_dense)
    }

    pub(crate) fn dense_layers_mut(&mut self) -> impl Iterator<Item = &mut Dense> + '_ {
        self.layers.iter_mut().filter_map(Layer::as_dense_mut)
    }

    pub fn num_params(&self) -> usize {
        self.layers.iter().map(Layer::num_params).sum()
    }

    /// Inference forward pass for a single sample. Nothing is cached.
    ///
    /// Panics if `input.len() != self.input_dim()`; see [`Model::predict`] for the
    /// checked variant.
    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        assert_eq!(
            input.len(),
            self.input_dim(),
            "input len {} does not match model input_dim {}",
            input.len(),
            self.input_dim()
        );

        let mut x = self.layers[0].forward(input);
        for layer in &self.layers[1..] {
            x = layer.forward(&x);
        }
        x
    }

    /// Shape-checked inference for a single sample.
    pub fn predict(&self, input: &[f64]) -> Result<Vec<f64>> {
        self.check_input(input)?;
        Ok(self.forward(input))
    }

    /// Inference over `batch` samples stored row-major in `inputs`.
    ///
    /// Returns a flat buffer with shape `(batch, output_dim)`.
    pub fn predict_batch(&self, inputs: &[f64], batch: usize) -> Result<Vec<f64>> {
        if batch == 0 {
            return Err(Error::InvalidArgument("batch must be > 0".to_owned()));
        }
        if inputs.len() != batch * self.input_dim() {
            return Err(Error::InvalidArgument(format!(
                "inputs len {} does not match batch * input_dim ({batch} * {})",
                inputs.len(),
                self.input_dim()
            )));
        }

        let mut x = inputs.to_vec();
        for layer in &self.layers {
            let Layer::Dense(dense) = layer else {
                continue;
            };
            let (in_dim, out_dim) = (dense.in_dim(), dense.out_dim());

            // Z = X * W^T, then add the bias row-wise.
            let mut z = vec![0.0; batch * out_dim];
            gemm_f64(
                batch,
                out_dim,
                in_dim,
                1.0,
                &x,
                in_dim,
                1,
                dense.weights(),
                1,
                in_dim,
                0.0,
                &mut z,
                out_dim,
                1,
            );

            let mut y = vec![0.0; batch * out_dim];
            for (z_row, y_row) in z.chunks_mut(out_dim).zip(y.chunks_mut(out_dim)) {
                for (v, &b) in z_row.iter_mut().zip(dense.biases()) {
                    *v += b;
                }
                dense.activation().apply_into(z_row, y_row);
            }
            x = y;
        }
        Ok(x)
    }

    /// Training forward pass: every layer caches what its backward pass needs.
    pub fn forward_train(&mut self, input: &[f64]) -> Result<Vec<f64>> {
        self.check_input(input)?;

        let mut x = input.to_vec();
        for layer in &mut self.layers {
            x = layer.forward_train(&x);
        }
        Ok(x)
    }

    /// Backprop `dL/d(output)` through all layers in reverse order, updating parameters
    /// with `optimizer`. Requires a preceding [`Model::forward_train`].
    ///
    /// Returns `dL/d(input)`.
    pub fn backward(&mut self, d_output: &[f64], optimizer: Optimizer) -> Result<Vec<f64>> {
        let mut grad = d_output.to_vec();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(&grad, optimizer)?;
        }
        Ok(grad)
    }

    /// One training step on a single sample.
    ///
    /// Runs a caching forward pass, computes the loss gradient at the output and
    /// backprops it, letting every layer update its parameters through `optimizer`.
    /// A softmax output layer trained with [`Loss::CrossEntropy`] receives the fused
    /// gradient `softmax(z) - y` directly on its pre-activation.
    ///
    /// Returns the loss measured before the update. Forward caches are consumed by the
    /// backward pass; on error they are cleared.
    pub fn train_step(
        &mut self,
        x: &[f64],
        y: &[f64],
        loss: Loss,
        optimizer: Optimizer,
    ) -> Result<f64> {
        optimizer.validate()?;
        if y.len() != self.output_dim() {
            return Err(Error::InvalidArgument(format!(
                "target len {} does not match model output_dim {}",
                y.len(),
                self.output_dim()
            )));
        }

        let result = self.train_step_inner(x, y, loss, optimizer);
        if result.is_err() {
            self.clear_caches();
        }
        result
    }

    fn train_step_inner(
        &mut self,
        x: &[f64],
        y: &[f64],
        loss: Loss,
        optimizer: Optimizer,
    ) -> Result<f64> {
        let output = self.forward_train(x)?;

        if loss == Loss::CrossEntropy {
            if let Some((Layer::Dense(last), rest)) = self.layers.split_last_mut() {
                if last.activation() == Activation::Softmax {
                    let value = loss::cross_entropy(&output, y)?;
                    let d_z: Vec<f64> = output.iter().zip(y).map(|(s, t)| s - t).collect();
                    let mut grad = last.backward_from_d_z(&d_z, optimizer)?;
                    for layer in rest.iter_mut().rev() {
                        grad = layer.backward(&grad, optimizer)?;
                    }
                    return Ok(value);
                }
            }
        }

        let mut d_output = vec![0.0; output.len()];
        let value = loss.backward(&output, y, &mut d_output)?;
        self.backward(&d_output, optimizer)?;
        Ok(value)
    }

    /// Drop every layer's pending forward cache.
    pub fn clear_caches(&mut self) {
        self.layers.iter_mut().for_each(Layer::clear_cache);
    }

    /// Forget optimizer history in every layer.
    pub fn reset_optimizer_state(&mut self) {
        self.layers.iter_mut().for_each(Layer::reset_optimizer_state);
    }

    fn check_input(&self, input: &[f64]) -> Result<()> {
        if input.len() != self.input_dim() {
            return Err(Error::InvalidArgument(format!(
                "input len {} does not match model input_dim {}",
                input.len(),
                self.input_dim()
            )));
        }
        Ok(())
    }
}
