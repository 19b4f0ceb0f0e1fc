//! Loss functions.
//!
//! These are small helpers intended to be used like:
//!
//! - run `model.forward_train(...)`
//! - compute `d_output` via a loss (e.g. [`Loss::backward`])
//! - backprop through the layers, which update their own parameters
//!
//! All functions require `pred.len() == target.len() > 0` and report
//! [`Error::InvalidArgument`] otherwise.

use crate::activation::softmax_into;
use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Additive stabilizer inside `ln` for probability-space cross-entropy.
pub const CROSS_ENTROPY_EPS: f64 = 1e-12;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Supported loss functions.
pub enum Loss {
    /// Mean squared error: `mean((pred - target)^2)`.
    #[default]
    Mse,
    /// Cross-entropy over probabilities: `-Σ t ln(p + ε)`.
    ///
    /// When the output layer uses a softmax activation, `Model::train_step`
    /// backprops the fused gradient `softmax(z) - target` instead.
    CrossEntropy,
    /// Softmax cross-entropy over raw logits.
    ///
    /// Use an `Identity` activation on the output layer.
    SoftmaxCrossEntropy,
}

impl Loss {
    pub fn name(self) -> &'static str {
        match self {
            Loss::Mse => "mse",
            Loss::CrossEntropy => "cross-entropy",
            Loss::SoftmaxCrossEntropy => "softmax-cross-entropy",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "mse" => Ok(Loss::Mse),
            "cross-entropy" | "ce" => Ok(Loss::CrossEntropy),
            "softmax-cross-entropy" => Ok(Loss::SoftmaxCrossEntropy),
            other => Err(Error::InvalidConfig(format!("unknown loss {other:?}"))),
        }
    }

    /// Compute a loss value.
    pub fn forward(self, pred: &[f64], target: &[f64]) -> Result<f64> {
        match self {
            Loss::Mse => mse(pred, target),
            Loss::CrossEntropy => cross_entropy(pred, target),
            Loss::SoftmaxCrossEntropy => softmax_cross_entropy(pred, target),
        }
    }

    /// Gradient of the loss w.r.t. `pred`.
    pub fn grad(self, pred: &[f64], target: &[f64]) -> Result<Vec<f64>> {
        let mut d_pred = vec![0.0; pred.len()];
        self.backward(pred, target, &mut d_pred)?;
        Ok(d_pred)
    }

    /// Compute loss + gradient w.r.t. `pred`.
    ///
    /// Writes `dL/d(pred)` into `d_pred` and returns the loss.
    pub fn backward(self, pred: &[f64], target: &[f64], d_pred: &mut [f64]) -> Result<f64> {
        check_lengths(pred, target)?;
        if d_pred.len() != pred.len() {
            return Err(Error::InvalidArgument(format!(
                "pred len {} does not match d_pred len {}",
                pred.len(),
                d_pred.len()
            )));
        }

        match self {
            Loss::Mse => {
                let inv_n = 1.0 / pred.len() as f64;
                let mut sum_sq = 0.0;
                for i in 0..pred.len() {
                    let diff = pred[i] - target[i];
                    sum_sq = diff.mul_add(diff, sum_sq);
                    d_pred[i] = 2.0 * diff * inv_n;
                }
                Ok(sum_sq * inv_n)
            }
            Loss::CrossEntropy => {
                let mut loss = 0.0;
                for i in 0..pred.len() {
                    let p = pred[i] + CROSS_ENTROPY_EPS;
                    loss -= target[i] * p.ln();
                    d_pred[i] = -target[i] / p;
                }
                Ok(loss)
            }
            Loss::SoftmaxCrossEntropy => {
                let loss = softmax_cross_entropy(pred, target)?;
                softmax_into(pred, d_pred);
                for (d, &t) in d_pred.iter_mut().zip(target) {
                    *d -= t;
                }
                Ok(loss)
            }
        }
    }
}

impl std::fmt::Display for Loss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn check_lengths(pred: &[f64], target: &[f64]) -> Result<()> {
    if pred.len() != target.len() {
        return Err(Error::InvalidArgument(format!(
            "pred len {} does not match target len {}",
            pred.len(),
            target.len()
        )));
    }
    if pred.is_empty() {
        return Err(Error::InvalidArgument(
            "loss requires non-empty prediction and target".to_owned(),
        ));
    }
    Ok(())
}

/// Mean squared error: `mean((pred - target)^2)`.
pub fn mse(pred: &[f64], target: &[f64]) -> Result<f64> {
    check_lengths(pred, target)?;

    let mut sum_sq = 0.0_f64;
    for (&p, &t) in pred.iter().zip(target) {
        let diff = p - t;
        sum_sq = diff.mul_add(diff, sum_sq);
    }
    Ok(sum_sq / pred.len() as f64)
}

/// MSE gradient: `(2 / n) (pred - target)`.
pub fn mse_grad(pred: &[f64], target: &[f64]) -> Result<Vec<f64>> {
    Loss::Mse.grad(pred, target)
}

/// Cross-entropy over probabilities: `-Σ target_i ln(pred_i + ε)`.
pub fn cross_entropy(pred: &[f64], target: &[f64]) -> Result<f64> {
    check_lengths(pred, target)?;

    Ok(-pred
        .iter()
        .zip(target)
        .map(|(&p, &t)| t * (p + CROSS_ENTROPY_EPS).ln())
        .sum::<f64>())
}

/// Cross-entropy gradient w.r.t. probabilities: `-target / (pred + ε)`.
pub fn cross_entropy_grad(pred: &[f64], target: &[f64]) -> Result<Vec<f64>> {
    Loss::CrossEntropy.grad(pred, target)
}

/// Softmax cross-entropy over logits: `-Σ t_i (x_i - logsumexp(x))`.
pub fn softmax_cross_entropy(logits: &[f64], target: &[f64]) -> Result<f64> {
    check_lengths(logits, target)?;

    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let sum_exp: f64 = logits.iter().map(|&x| (x - max).exp()).sum();
    let log_sum_exp = max + sum_exp.ln();

    let mut loss = 0.0;
    for (&x, &t) in logits.iter().zip(target) {
        if t != 0.0 {
            loss -= t * (x - log_sum_exp);
        }
    }
    Ok(loss)
}

/// Softmax cross-entropy gradient w.r.t. logits: `softmax(logits) - target`.
pub fn softmax_cross_entropy_grad(logits: &[f64], target: &[f64]) -> Result<Vec<f64>> {
    Loss::SoftmaxCrossEntropy.grad(logits, target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn mse_is_zero_when_equal() {
        let pred = [1.0, -2.0, 0.5];
        assert_eq!(mse(&pred, &pred).unwrap(), 0.0);
    }

    #[test]
    fn mse_is_positive_when_different() {
        let loss = mse(&[1.0, -2.0, 0.5], &[1.0, -2.0, 0.5 + 1e-9]).unwrap();
        assert!(loss > 0.0);
    }

    #[test]
    fn mse_backward_matches_expected_gradient() {
        let pred = [1.0, 3.0];
        let target = [2.0, 1.0];
        let mut d_pred = [0.0; 2];
        let loss = Loss::Mse.backward(&pred, &target, &mut d_pred).unwrap();

        // L = mean([1, 4]) = 2.5
        assert_abs_diff_eq!(loss, 2.5);
        // dL/dpred = 2 (pred - target) / N
        assert_abs_diff_eq!(d_pred[0], -1.0);
        assert_abs_diff_eq!(d_pred[1], 2.0);
    }

    #[test]
    fn mismatched_lengths_are_invalid_arguments() {
        assert!(matches!(
            mse(&[1.0, 2.0], &[1.0]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Loss::CrossEntropy.grad(&[0.5], &[0.5, 0.5]),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            Loss::SoftmaxCrossEntropy.forward(&[], &[]),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn cross_entropy_handles_zero_probability() {
        let loss = cross_entropy(&[0.0, 1.0], &[1.0, 0.0]).unwrap();
        assert!(loss.is_finite());
        assert_abs_diff_eq!(loss, -(CROSS_ENTROPY_EPS.ln()), epsilon = 1e-9);

        let grad = cross_entropy_grad(&[0.5, 0.5], &[1.0, 0.0]).unwrap();
        assert_abs_diff_eq!(grad[0], -2.0, epsilon = 1e-9);
        assert_eq!(grad[1], 0.0);
    }

    #[test]
    fn softmax_cross_entropy_prefers_correct_class() {
        let target = [1.0, 0.0, 0.0];
        let good = softmax_cross_entropy(&[5.0, 0.0, -1.0], &target).unwrap();
        let bad = softmax_cross_entropy(&[-1.0, 0.0, 5.0], &target).unwrap();
        assert!(good < bad);
    }

    #[test]
    fn softmax_cross_entropy_grad_is_softmax_minus_target() {
        let logits = [0.0, 0.0];
        let grad = softmax_cross_entropy_grad(&logits, &[0.0, 1.0]).unwrap();
        assert_abs_diff_eq!(grad[0], 0.5);
        assert_abs_diff_eq!(grad[1], -0.5);
        let loss = softmax_cross_entropy(&logits, &[0.0, 1.0]).unwrap();
        assert_abs_diff_eq!(loss, std::f64::consts::LN_2, epsilon = 1e-12);
    }

    #[test]
    fn names_parse() {
        for loss in [Loss::Mse, Loss::CrossEntropy, Loss::SoftmaxCrossEntropy] {
            assert_eq!(Loss::from_name(loss.name()).unwrap(), loss);
        }
        assert_eq!(
            Loss::from_name("softmax_cross_entropy").unwrap(),
            Loss::SoftmaxCrossEntropy
        );
        assert!(Loss::from_name("hinge").is_err());
    }
}
