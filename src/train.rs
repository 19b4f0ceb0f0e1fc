//! Training loop.
//!
//! `fit` walks the dataset once per epoch, one [`Model::train_step`] per sample, and
//! reports the mean training loss (and optional validation metrics) for every epoch.

use log::{info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::{metrics, Dataset, Error, Loss, Model, Optimizer, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Sample order within an epoch.
pub enum Shuffle {
    /// Dataset order.
    #[default]
    None,
    /// A fresh permutation every epoch, drawn from an RNG seeded once per `fit` call.
    Seeded(u64),
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitConfig {
    pub epochs: usize,
    pub loss: Loss,
    pub optimizer: Optimizer,
    pub shuffle: Shuffle,
    /// Learning-rate multiplier applied after every epoch (`1.0` keeps it constant).
    pub lr_decay: f64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            loss: Loss::default(),
            optimizer: Optimizer::default(),
            shuffle: Shuffle::None,
            lr_decay: 1.0,
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if !(self.lr_decay.is_finite() && self.lr_decay > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "lr_decay must be finite and > 0, got {}",
                self.lr_decay
            )));
        }
        self.optimizer.validate()
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvalReport {
    /// Mean per-sample loss.
    pub loss: f64,
    pub accuracy: f64,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// 1-based.
    pub epoch: usize,
    /// Mean of the per-sample losses measured before each update.
    pub train_loss: f64,
    /// Learning rate used during this epoch.
    pub lr: f64,
    pub valid: Option<EvalReport>,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    pub epochs: Vec<EpochReport>,
    /// Training loss of the last epoch.
    pub final_loss: f64,
}

impl Model {
    /// Train on `train` for `cfg.epochs` epochs.
    ///
    /// If `valid` is given it is evaluated after every epoch.
    pub fn fit(
        &mut self,
        train: &Dataset,
        valid: Option<&Dataset>,
        cfg: FitConfig,
    ) -> Result<FitReport> {
        self.fit_with_progress(train, valid, cfg, |_, _| {})
    }

    /// Like [`Model::fit`], calling `progress(done, total)` after every sample.
    pub fn fit_with_progress<F>(
        &mut self,
        train: &Dataset,
        valid: Option<&Dataset>,
        cfg: FitConfig,
        mut progress: F,
    ) -> Result<FitReport>
    where
        F: FnMut(usize, usize),
    {
        cfg.validate()?;
        if train.is_empty() {
            return Err(Error::InvalidConfig(
                "train dataset must not be empty".to_owned(),
            ));
        }
        self.check_dataset("train", train)?;
        if let Some(valid) = valid {
            self.check_dataset("valid", valid)?;
        }

        let mut order: Vec<usize> = (0..train.len()).collect();
        let mut rng = match cfg.shuffle {
            Shuffle::None => None,
            Shuffle::Seeded(seed) => Some(StdRng::seed_from_u64(seed)),
        };

        let total = cfg.epochs * train.len();
        let mut done = 0;
        let mut optimizer = cfg.optimizer;
        let mut epochs = Vec::with_capacity(cfg.epochs);

        for epoch in 1..=cfg.epochs {
            if let Some(rng) = rng.as_mut() {
                order.shuffle(rng);
            }

            let mut sum = 0.0;
            for &idx in &order {
                sum += self.train_step(train.input(idx), train.target(idx), cfg.loss, optimizer)?;
                done += 1;
                progress(done, total);
            }
            let train_loss = sum / train.len() as f64;

            let valid = valid.map(|v| self.evaluate(v, cfg.loss)).transpose()?;

            if !train_loss.is_finite() {
                warn!("epoch {epoch}: training loss is not finite ({train_loss})");
            }
            match valid {
                Some(v) => info!(
                    "epoch {epoch}/{}: loss {train_loss:.6} lr {:.3e} valid_loss {:.6} valid_acc {:.4}",
                    cfg.epochs,
                    optimizer.lr(),
                    v.loss,
                    v.accuracy
                ),
                None => info!(
                    "epoch {epoch}/{}: loss {train_loss:.6} lr {:.3e}",
                    cfg.epochs,
                    optimizer.lr()
                ),
            }

            epochs.push(EpochReport {
                epoch,
                train_loss,
                lr: optimizer.lr(),
                valid,
            });
            optimizer = optimizer.with_lr(optimizer.lr() * cfg.lr_decay);
        }

        let final_loss = epochs.last().map_or(f64::NAN, |e| e.train_loss);
        Ok(FitReport { epochs, final_loss })
    }

    /// Train on paired samples in input order, once per sample per epoch.
    pub fn train(
        &mut self,
        xs: &[Vec<f64>],
        ys: &[Vec<f64>],
        epochs: usize,
        loss: Loss,
        optimizer: Optimizer,
    ) -> Result<FitReport> {
        if xs.len() != ys.len() {
            return Err(Error::InvalidArgument(format!(
                "inputs/targets length mismatch: {} vs {}",
                xs.len(),
                ys.len()
            )));
        }
        if xs.is_empty() {
            return Err(Error::InvalidConfig(
                "training data must not be empty".to_owned(),
            ));
        }

        let data = Dataset::from_rows(xs, ys)?;
        self.fit(
            &data,
            None,
            FitConfig {
                epochs,
                loss,
                optimizer,
                shuffle: Shuffle::None,
                lr_decay: 1.0,
            },
        )
    }

    /// Mean loss and classification accuracy over `data`. Parameters are not touched.
    pub fn evaluate(&self, data: &Dataset, loss: Loss) -> Result<EvalReport> {
        if data.is_empty() {
            return Err(Error::InvalidArgument("dataset must not be empty".to_owned()));
        }
        self.check_dataset("eval", data)?;

        let mut sum = 0.0;
        let mut correct = 0_usize;
        for idx in 0..data.len() {
            let pred = self.forward(data.input(idx));
            let target = data.target(idx);
            sum += loss.forward(&pred, target)?;
            if metrics::is_correct(&pred, target) {
                correct += 1;
            }
        }

        let n = data.len() as f64;
        Ok(EvalReport {
            loss: sum / n,
            accuracy: correct as f64 / n,
        })
    }

    fn check_dataset(&self, what: &str, data: &Dataset) -> Result<()> {
        if data.input_dim() != self.input_dim() {
            return Err(Error::InvalidArgument(format!(
                "{what} input_dim {} does not match model input_dim {}",
                data.input_dim(),
                self.input_dim()
            )));
        }
        if data.target_dim() != self.output_dim() {
            return Err(Error::InvalidArgument(format!(
                "{what} target_dim {} does not match model output_dim {}",
                data.target_dim(),
                self.output_dim()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Activation;

    fn xor() -> Dataset {
        Dataset::from_rows(
            &[
                vec![0.0, 0.0],
                vec![0.0, 1.0],
                vec![1.0, 0.0],
                vec![1.0, 1.0],
            ],
            &[vec![0.0], vec![1.0], vec![1.0], vec![0.0]],
        )
        .unwrap()
    }

    #[test]
    fn fit_rejects_bad_config() {
        let mut model = Model::new_with_seed(&[2, 1], &[Activation::Sigmoid], 0).unwrap();
        let data = xor();
        let cfg = FitConfig {
            epochs: 0,
            ..FitConfig::default()
        };
        assert!(matches!(model.fit(&data, None, cfg), Err(Error::InvalidConfig(_))));

        let cfg = FitConfig {
            lr_decay: 0.0,
            ..FitConfig::default()
        };
        assert!(model.fit(&data, None, cfg).is_err());

        let mut wide = Model::new_with_seed(&[3, 1], &[Activation::Sigmoid], 0).unwrap();
        assert!(matches!(
            wide.fit(&data, None, FitConfig::default()),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn fit_reports_every_epoch_and_decays_lr() {
        let mut model = Model::new_with_seed(&[2, 4, 1], &[Activation::Tanh, Activation::Sigmoid], 1)
            .unwrap();
        let data = xor();
        let cfg = FitConfig {
            epochs: 3,
            optimizer: Optimizer::Sgd { lr: 0.1 },
            lr_decay: 0.5,
            shuffle: Shuffle::Seeded(7),
            ..FitConfig::default()
        };
        let report = model.fit(&data, Some(&data), cfg).unwrap();

        assert_eq!(report.epochs.len(), 3);
        assert_eq!(report.epochs[2].epoch, 3);
        assert!((report.epochs[2].lr - 0.025).abs() < 1e-12);
        assert_eq!(report.final_loss, report.epochs[2].train_loss);
        assert!(report.epochs.iter().all(|e| e.valid.is_some()));
    }

    #[test]
    fn progress_sees_every_sample() {
        let mut model = Model::new_with_seed(&[2, 1], &[Activation::Sigmoid], 0).unwrap();
        let data = xor();
        let cfg = FitConfig {
            epochs: 2,
            ..FitConfig::default()
        };
        let mut calls = Vec::new();
        model
            .fit_with_progress(&data, None, cfg, |done, total| calls.push((done, total)))
            .unwrap();
        assert_eq!(calls.len(), 8);
        assert_eq!(calls.last(), Some(&(8, 8)));
    }

    #[test]
    fn seeded_shuffle_is_reproducible() {
        let acts = [Activation::Tanh, Activation::Sigmoid];
        let cfg = FitConfig {
            epochs: 5,
            shuffle: Shuffle::Seeded(42),
            optimizer: Optimizer::adam(0.05),
            ..FitConfig::default()
        };
        let mut a = Model::new_with_seed(&[2, 3, 1], &acts, 2).unwrap();
        let mut b = Model::new_with_seed(&[2, 3, 1], &acts, 2).unwrap();
        let ra = a.fit(&xor(), None, cfg).unwrap();
        let rb = b.fit(&xor(), None, cfg).unwrap();
        assert_eq!(ra, rb);
    }

    #[test]
    fn train_validates_inputs() {
        let mut model = Model::new_with_seed(&[1, 1], &[Activation::Identity], 0).unwrap();
        let opt = Optimizer::Sgd { lr: 0.1 };
        assert!(matches!(
            model.train(&[vec![1.0]], &[], 1, Loss::Mse, opt),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            model.train(&[], &[], 1, Loss::Mse, opt),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            model.train(&[vec![1.0]], &[vec![1.0]], 0, Loss::Mse, opt),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn evaluate_reports_loss_and_accuracy() {
        let layer = crate::Dense::from_parts(
            2,
            2,
            Activation::Identity,
            vec![1.0, 0.0, 0.0, 1.0],
            vec![0.0, 0.0],
        )
        .unwrap();
        let model = Model::from_layers(vec![layer.into()]).unwrap();
        let data = Dataset::from_rows(
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
            &[vec![1.0, 0.0], vec![1.0, 0.0]],
        )
        .unwrap();
        let report = model.evaluate(&data, Loss::Mse).unwrap();
        assert!((report.accuracy - 0.5).abs() < 1e-12);
        // Sample losses are 0 and 1.
        assert!((report.loss - 0.5).abs() < 1e-12);
    }
}
