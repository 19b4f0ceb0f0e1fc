//! Activation functions.
//!
//! A dense layer computes a pre-activation value `z = W x + b` and then applies an
//! activation: `y = activation(z)`.
//!
//! Derivatives are always evaluated on the cached pre-activation `z`. Activations
//! whose derivative is naturally expressed through their output (sigmoid, tanh)
//! recompute that output from `z`.
//!
//! Softmax couples all coordinates, so it has no element-wise derivative. Layers
//! backprop through it with the exact Jacobian-vector product (see
//! [`Activation::backward`]), and `Model::train_step` fuses softmax with
//! cross-entropy into `softmax(z) - target`.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Activation function tag.
pub enum Activation {
    #[cfg_attr(feature = "serde", serde(rename = "relu"))]
    ReLU,
    Sigmoid,
    Identity,
    Tanh,
    Softmax,
}

impl Activation {
    /// All activations, in code order.
    pub const ALL: [Activation; 5] = [
        Activation::ReLU,
        Activation::Sigmoid,
        Activation::Identity,
        Activation::Tanh,
        Activation::Softmax,
    ];

    /// Stable integer code used by the binary checkpoint format.
    #[inline]
    pub fn code(self) -> u32 {
        match self {
            Activation::ReLU => 0,
            Activation::Sigmoid => 1,
            Activation::Identity => 2,
            Activation::Tanh => 3,
            Activation::Softmax => 4,
        }
    }

    pub fn from_code(code: u32) -> Result<Self> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or(Error::UnknownActivation(code))
    }

    pub fn name(self) -> &'static str {
        match self {
            Activation::ReLU => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Identity => "identity",
            Activation::Tanh => "tanh",
            Activation::Softmax => "softmax",
        }
    }

    /// Parse a lowercase activation name (as produced by [`Activation::name`]).
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| Error::InvalidConfig(format!("unknown activation {name:?}")))
    }

    /// Whether `apply` works coordinate by coordinate.
    #[inline]
    pub fn is_elementwise(self) -> bool {
        !matches!(self, Activation::Softmax)
    }

    /// Applies the activation to `z`.
    pub fn apply(self, z: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; z.len()];
        self.apply_into(z, &mut out);
        out
    }

    /// Applies the activation to `z`, writing into `out`.
    ///
    /// Shape contract: `z.len() == out.len()`.
    pub fn apply_into(self, z: &[f64], out: &mut [f64]) {
        assert_eq!(
            z.len(),
            out.len(),
            "activation input len {} does not match output len {}",
            z.len(),
            out.len()
        );

        match self {
            Activation::Softmax => softmax_into(z, out),
            _ => {
                for (o, &x) in out.iter_mut().zip(z) {
                    *o = self.apply_scalar(x);
                }
            }
        }
    }

    /// Element-wise derivative `f'(z)`.
    ///
    /// Returns an error for softmax, whose derivative is a full Jacobian.
    pub fn derivative(self, z: &[f64]) -> Result<Vec<f64>> {
        if !self.is_elementwise() {
            return Err(Error::InvalidArgument(format!(
                "{} has no element-wise derivative",
                self.name()
            )));
        }
        Ok(z.iter().map(|&x| self.derivative_scalar(x)).collect())
    }

    /// Backprop through the activation: writes `dL/dz` given `dL/dy`.
    ///
    /// For element-wise activations this is `d_out ⊙ f'(z)`. For softmax it is the
    /// Jacobian-vector product `s_i (g_i - Σ_j g_j s_j)`.
    pub fn backward(self, z: &[f64], d_out: &[f64], d_z: &mut [f64]) {
        assert_eq!(z.len(), d_out.len(), "z and d_out lengths differ");
        assert_eq!(z.len(), d_z.len(), "z and d_z lengths differ");

        match self {
            Activation::Softmax => {
                softmax_into(z, d_z);
                let dot: f64 = d_z.iter().zip(d_out).map(|(s, g)| s * g).sum();
                for (dz, &g) in d_z.iter_mut().zip(d_out) {
                    *dz *= g - dot;
                }
            }
            _ => {
                for i in 0..z.len() {
                    d_z[i] = d_out[i] * self.derivative_scalar(z[i]);
                }
            }
        }
    }

    #[inline]
    fn apply_scalar(self, x: f64) -> f64 {
        match self {
            Activation::ReLU => x.max(0.0),
            Activation::Sigmoid => sigmoid(x),
            Activation::Identity => x,
            Activation::Tanh => x.tanh(),
            Activation::Softmax => unreachable!("softmax is not element-wise"),
        }
    }

    #[inline]
    fn derivative_scalar(self, x: f64) -> f64 {
        match self {
            Activation::ReLU => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            Activation::Identity => 1.0,
            Activation::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            Activation::Softmax => unreachable!("softmax is not element-wise"),
        }
    }
}

impl std::fmt::Display for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[inline]
pub(crate) fn sigmoid(x: f64) -> f64 {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// Max-shifted softmax.
pub(crate) fn softmax_into(z: &[f64], out: &mut [f64]) {
    if z.is_empty() {
        return;
    }
    let max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for (o, &x) in out.iter_mut().zip(z) {
        *o = (x - max).exp();
        sum += *o;
    }
    let inv = 1.0 / sum;
    for o in out.iter_mut() {
        *o *= inv;
    }
}
