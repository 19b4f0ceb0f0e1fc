//! Optimizers.
//!
//! An [`Optimizer`] is a pure strategy: it only holds hyperparameters, so one value can
//! drive every layer of a model.
//!
//! Design notes:
//! - Accumulator state (momentum velocity, Adam moments and step counter) lives in an
//!   [`OptimizerState`] owned by whoever owns the parameter (a `Dense` layer keeps one
//!   for its weights and one for its biases).
//! - State is created empty and lazily sized by the first gradient it sees.

use crate::{Error, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "kind", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq)]
/// Parameter update rule.
pub enum Optimizer {
    /// Plain gradient descent: `param -= lr * grad`.
    Sgd { lr: f64 },
    /// Exponential moving average of gradients: `vel = beta * vel + (1 - beta) * grad`.
    Momentum { lr: f64, beta: f64 },
    /// Adam (bias-corrected).
    Adam {
        lr: f64,
        beta1: f64,
        beta2: f64,
        eps: f64,
    },
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::adam(1e-3)
    }
}

impl Optimizer {
    /// Adam with the usual defaults (`beta1 = 0.9`, `beta2 = 0.999`, `eps = 1e-8`).
    pub fn adam(lr: f64) -> Self {
        Optimizer::Adam {
            lr,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }

    #[inline]
    pub fn lr(self) -> f64 {
        match self {
            Optimizer::Sgd { lr } | Optimizer::Momentum { lr, .. } | Optimizer::Adam { lr, .. } => {
                lr
            }
        }
    }

    /// Same optimizer with a different learning rate.
    #[must_use]
    pub fn with_lr(self, lr: f64) -> Self {
        match self {
            Optimizer::Sgd { .. } => Optimizer::Sgd { lr },
            Optimizer::Momentum { beta, .. } => Optimizer::Momentum { lr, beta },
            Optimizer::Adam {
                beta1, beta2, eps, ..
            } => Optimizer::Adam {
                lr,
                beta1,
                beta2,
                eps,
            },
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Optimizer::Sgd { .. } => "sgd",
            Optimizer::Momentum { .. } => "momentum",
            Optimizer::Adam { .. } => "adam",
        }
    }

    /// Validate optimizer hyperparameters.
    pub fn validate(self) -> Result<()> {
        let lr = self.lr();
        if !(lr.is_finite() && lr > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning rate must be finite and > 0, got {lr}"
            )));
        }

        match self {
            Optimizer::Sgd { .. } => Ok(()),
            Optimizer::Momentum { beta, .. } => {
                if !(beta.is_finite() && (0.0..1.0).contains(&beta)) {
                    return Err(Error::InvalidConfig(format!(
                        "momentum beta must be finite and in [0,1), got {beta}"
                    )));
                }
                Ok(())
            }
            Optimizer::Adam {
                beta1, beta2, eps, ..
            } => {
                if !(beta1.is_finite() && (0.0..1.0).contains(&beta1)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta1 must be finite and in [0,1), got {beta1}"
                    )));
                }
                if !(beta2.is_finite() && (0.0..1.0).contains(&beta2)) {
                    return Err(Error::InvalidConfig(format!(
                        "adam beta2 must be finite and in [0,1), got {beta2}"
                    )));
                }
                if !(eps.is_finite() && eps > 0.0) {
                    return Err(Error::InvalidConfig(format!(
                        "adam eps must be finite and > 0, got {eps}"
                    )));
                }
                Ok(())
            }
        }
    }

    /// Empty accumulator state matching this optimizer's kind.
    pub fn init_state(self) -> OptimizerState {
        match self {
            Optimizer::Sgd { .. } => OptimizerState::None,
            Optimizer::Momentum { .. } => OptimizerState::Momentum {
                velocity: Vec::new(),
            },
            Optimizer::Adam { .. } => OptimizerState::Adam {
                m: Vec::new(),
                v: Vec::new(),
                t: 0,
            },
        }
    }

    /// Apply one update to `param` in place.
    ///
    /// If `state` was built for a different optimizer kind it is replaced by a fresh one.
    /// Empty state is sized to `grad.len()`.
    ///
    /// Panics if `param` and `grad` lengths differ, or if a sized state has a different
    /// length: state must never be shared between unrelated parameters.
    pub fn update(self, param: &mut [f64], state: &mut OptimizerState, grad: &[f64]) {
        assert_eq!(
            param.len(),
            grad.len(),
            "param len {} does not match grad len {}",
            param.len(),
            grad.len()
        );

        if !state.matches(self) {
            *state = self.init_state();
        }
        state.ensure_len(grad.len());

        match (self, state) {
            (Optimizer::Sgd { lr }, OptimizerState::None) => {
                for (p, &g) in param.iter_mut().zip(grad) {
                    *p -= lr * g;
                }
            }
            (Optimizer::Momentum { lr, beta }, OptimizerState::Momentum { velocity }) => {
                let one_minus_beta = 1.0 - beta;
                for i in 0..param.len() {
                    velocity[i] = beta * velocity[i] + one_minus_beta * grad[i];
                    param[i] -= lr * velocity[i];
                }
            }
            (
                Optimizer::Adam {
                    lr,
                    beta1,
                    beta2,
                    eps,
                },
                OptimizerState::Adam { m, v, t },
            ) => {
                *t += 1;
                // t >= 1 here, so neither correction term is zero.
                let step = i32::try_from(*t).unwrap_or(i32::MAX);
                let corr1 = 1.0 - beta1.powi(step);
                let corr2 = 1.0 - beta2.powi(step);

                let one_minus_beta1 = 1.0 - beta1;
                let one_minus_beta2 = 1.0 - beta2;

                for i in 0..param.len() {
                    let g = grad[i];
                    m[i] = beta1 * m[i] + one_minus_beta1 * g;
                    v[i] = beta2 * v[i] + one_minus_beta2 * (g * g);

                    let m_hat = m[i] / corr1;
                    let v_hat = v[i] / corr2;
                    param[i] -= lr * m_hat / (v_hat.sqrt() + eps);
                }
            }
            _ => unreachable!("state kind was matched to the optimizer above"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
/// Per-parameter accumulator state.
pub enum OptimizerState {
    /// No accumulators (plain SGD, or not yet used).
    #[default]
    None,
    Momentum {
        velocity: Vec<f64>,
    },
    Adam {
        m: Vec<f64>,
        v: Vec<f64>,
        /// Number of updates applied so far.
        t: u64,
    },
}

impl OptimizerState {
    /// Drop all accumulated history.
    pub fn reset(&mut self) {
        *self = OptimizerState::None;
    }

    /// Number of updates applied (Adam only; 0 otherwise).
    pub fn step(&self) -> u64 {
        match self {
            OptimizerState::Adam { t, .. } => *t,
            _ => 0,
        }
    }

    fn matches(&self, optimizer: Optimizer) -> bool {
        matches!(
            (self, optimizer),
            (OptimizerState::None, Optimizer::Sgd { .. })
                | (OptimizerState::Momentum { .. }, Optimizer::Momentum { .. })
                | (OptimizerState::Adam { .. }, Optimizer::Adam { .. })
        )
    }

    fn ensure_len(&mut self, len: usize) {
        match self {
            OptimizerState::None => {}
            OptimizerState::Momentum { velocity } => {
                if velocity.is_empty() {
                    *velocity = vec![0.0; len];
                }
                assert_eq!(
                    velocity.len(),
                    len,
                    "optimizer state len {} does not match parameter len {len}",
                    velocity.len()
                );
            }
            OptimizerState::Adam { m, v, .. } => {
                if m.is_empty() {
                    *m = vec![0.0; len];
                    *v = vec![0.0; len];
                }
                assert_eq!(
                    m.len(),
                    len,
                    "optimizer state len {} does not match parameter len {len}",
                    m.len()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn validation_rejects_bad_hyperparams() {
        assert!(Optimizer::Sgd { lr: 0.0 }.validate().is_err());
        assert!(Optimizer::Sgd { lr: f64::NAN }.validate().is_err());
        assert!(Optimizer::Sgd { lr: 0.1 }.validate().is_ok());
        assert!(Optimizer::Momentum { lr: 0.1, beta: 1.0 }.validate().is_err());
        assert!(Optimizer::Adam {
            lr: 0.1,
            beta1: 1.0,
            beta2: 0.999,
            eps: 1e-8
        }
        .validate()
        .is_err());
        assert!(Optimizer::Adam {
            lr: 0.1,
            beta1: 0.9,
            beta2: 0.999,
            eps: 0.0
        }
        .validate()
        .is_err());
        assert!(Optimizer::adam(0.1).validate().is_ok());
    }

    #[test]
    fn sgd_step_on_ones_matrix() {
        let opt = Optimizer::Sgd { lr: 0.1 };
        let mut w = vec![1.0; 4]; // 2x2
        let mut state = opt.init_state();
        opt.update(&mut w, &mut state, &[1.0; 4]);
        for v in w {
            assert_abs_diff_eq!(v, 0.9, epsilon = 1e-12);
        }
        assert_eq!(state, OptimizerState::None);
    }

    #[test]
    fn adam_first_step_is_about_lr() {
        let opt = Optimizer::Adam {
            lr: 0.1,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        };
        let mut w = vec![1.0];
        let mut state = opt.init_state();
        opt.update(&mut w, &mut state, &[1.0]);

        assert!(w[0] > 0.89 && w[0] < 0.91, "w = {}", w[0]);
        assert_abs_diff_eq!(w[0], 0.9, epsilon = 1e-6);
        assert_eq!(state.step(), 1);
    }

    #[test]
    fn adam_state_is_lazily_sized_and_accumulates() {
        let opt = Optimizer::adam(0.01);
        let mut state = OptimizerState::None;
        let mut p = vec![0.0; 3];
        opt.update(&mut p, &mut state, &[1.0, -1.0, 0.0]);
        opt.update(&mut p, &mut state, &[1.0, -1.0, 0.0]);

        match &state {
            OptimizerState::Adam { m, v, t } => {
                assert_eq!(m.len(), 3);
                assert_eq!(v.len(), 3);
                assert_eq!(*t, 2);
                assert_abs_diff_eq!(m[0], 0.1 + 0.9 * 0.1, epsilon = 1e-12);
            }
            other => panic!("unexpected state {other:?}"),
        }
        assert!(p[0] < 0.0 && p[1] > 0.0);
        assert_eq!(p[2], 0.0);
    }

    #[test]
    fn momentum_first_step_scales_by_one_minus_beta() {
        let opt = Optimizer::Momentum { lr: 0.5, beta: 0.9 };
        let mut p = vec![1.0];
        let mut state = opt.init_state();
        opt.update(&mut p, &mut state, &[2.0]);
        // vel = 0.1 * 2 = 0.2; p = 1 - 0.5 * 0.2
        assert_abs_diff_eq!(p[0], 0.9, epsilon = 1e-12);
    }

    #[test]
    fn switching_optimizer_kind_resets_state() {
        let mut state = OptimizerState::None;
        let mut p = vec![0.0; 2];
        Optimizer::adam(0.1).update(&mut p, &mut state, &[1.0, 1.0]);
        assert_eq!(state.step(), 1);

        Optimizer::Momentum { lr: 0.1, beta: 0.5 }.update(&mut p, &mut state, &[1.0, 1.0]);
        assert!(matches!(state, OptimizerState::Momentum { .. }));

        state.reset();
        assert_eq!(state, OptimizerState::None);
    }

    #[test]
    #[should_panic(expected = "optimizer state len")]
    fn mis_shaped_state_panics() {
        let opt = Optimizer::adam(0.1);
        let mut state = opt.init_state();
        opt.update(&mut [0.0; 2], &mut state, &[1.0; 2]);
        opt.update(&mut [0.0; 3], &mut state, &[1.0; 3]);
    }

    #[test]
    fn with_lr_keeps_other_hyperparams() {
        let opt = Optimizer::Momentum { lr: 0.1, beta: 0.8 }.with_lr(0.05);
        assert_eq!(opt, Optimizer::Momentum { lr: 0.05, beta: 0.8 });
        assert_eq!(opt.lr(), 0.05);
    }
}
