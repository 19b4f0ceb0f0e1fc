//! Contiguous dataset storage.
//!
//! `Dataset` keeps inputs and targets as validated row-major buffers so the training
//! loop can hand out per-sample slices without copying.

use crate::{Error, Result};

/// A supervised dataset: inputs (X) and targets (Y).
///
/// Stored as contiguous buffers with row-major layout:
/// - `inputs.len() == len * input_dim`
/// - `targets.len() == len * target_dim`
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: Vec<f64>,
    targets: Vec<f64>,
    len: usize,
    input_dim: usize,
    target_dim: usize,
}

impl Dataset {
    /// Build a dataset from flat buffers.
    ///
    /// `inputs` is `(len, input_dim)` and `targets` is `(len, target_dim)`.
    pub fn from_flat(
        inputs: Vec<f64>,
        targets: Vec<f64>,
        input_dim: usize,
        target_dim: usize,
    ) -> Result<Self> {
        if input_dim == 0 || target_dim == 0 {
            return Err(Error::InvalidArgument(format!(
                "dims must be > 0, got input_dim={input_dim} target_dim={target_dim}"
            )));
        }
        if inputs.len() % input_dim != 0 {
            return Err(Error::InvalidArgument(format!(
                "inputs length {} is not divisible by input_dim {input_dim}",
                inputs.len()
            )));
        }

        let len = inputs.len() / input_dim;
        if targets.len() != len * target_dim {
            return Err(Error::InvalidArgument(format!(
                "targets length {} does not match len * target_dim ({len} * {target_dim})",
                targets.len()
            )));
        }

        Ok(Self {
            inputs,
            targets,
            len,
            input_dim,
            target_dim,
        })
    }

    /// Build a dataset from per-sample rows (copies into contiguous storage).
    pub fn from_rows(inputs: &[Vec<f64>], targets: &[Vec<f64>]) -> Result<Self> {
        if inputs.len() != targets.len() {
            return Err(Error::InvalidArgument(format!(
                "inputs/targets length mismatch: {} vs {}",
                inputs.len(),
                targets.len()
            )));
        }
        if inputs.is_empty() {
            return Err(Error::InvalidArgument("inputs must not be empty".to_owned()));
        }

        let inputs = flatten("input", inputs)?;
        let targets = flatten("target", targets)?;
        Self::from_flat(inputs.0, targets.0, inputs.1, targets.1)
    }

    /// Build a classification dataset, one-hot encoding integer `labels` over `classes`.
    pub fn from_labels(
        samples: Vec<f64>,
        input_dim: usize,
        labels: &[usize],
        classes: usize,
    ) -> Result<Self> {
        let mut targets = Vec::with_capacity(labels.len() * classes);
        for &label in labels {
            targets.extend(one_hot(label, classes)?);
        }
        Self::from_flat(samples, targets, input_dim, classes)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    #[inline]
    pub fn target_dim(&self) -> usize {
        self.target_dim
    }

    /// All inputs as one `(len, input_dim)` buffer.
    #[inline]
    pub fn inputs(&self) -> &[f64] {
        &self.inputs
    }

    #[inline]
    /// Returns the `idx`-th input row.
    ///
    /// Panics if `idx >= len`.
    pub fn input(&self, idx: usize) -> &[f64] {
        let start = idx * self.input_dim;
        &self.inputs[start..start + self.input_dim]
    }

    #[inline]
    /// Returns the `idx`-th target row.
    ///
    /// Panics if `idx >= len`.
    pub fn target(&self, idx: usize) -> &[f64] {
        let start = idx * self.target_dim;
        &self.targets[start..start + self.target_dim]
    }
}

fn flatten(what: &str, rows: &[Vec<f64>]) -> Result<(Vec<f64>, usize)> {
    let dim = rows.first().map_or(0, Vec::len);
    if dim == 0 {
        return Err(Error::InvalidArgument(format!("{what} dim must be > 0")));
    }

    let mut flat = Vec::with_capacity(rows.len() * dim);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != dim {
            return Err(Error::InvalidArgument(format!(
                "{what} row {i} has len {}, expected {dim}",
                row.len()
            )));
        }
        flat.extend_from_slice(row);
    }
    Ok((flat, dim))
}

/// One-hot vector of length `classes` with a `1.0` at `label`.
pub fn one_hot(label: usize, classes: usize) -> Result<Vec<f64>> {
    if label >= classes {
        return Err(Error::InvalidArgument(format!(
            "label {label} out of range for {classes} classes"
        )));
    }
    let mut v = vec![0.0; classes];
    v[label] = 1.0;
    Ok(v)
}
