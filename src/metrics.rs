//! Metrics.
//!
//! Evaluation helpers; they do not participate in backprop.

/// Index of the largest value; the first one wins on ties.
///
/// Returns `None` for an empty slice.
pub fn argmax(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Whether a prediction counts as correct for `target`.
///
/// Single-output models are scored as binary classifiers (threshold 0.5); wider outputs
/// compare argmaxes.
pub fn is_correct(pred: &[f64], target: &[f64]) -> bool {
    match (pred, target) {
        ([p], [t]) => (*p >= 0.5) == (*t >= 0.5),
        _ => argmax(pred).is_some() && argmax(pred) == argmax(target),
    }
}

/// Fraction of `(pred, target)` pairs classified correctly. `0.0` when empty.
pub fn accuracy<'a, I>(pairs: I) -> f64
where
    I: IntoIterator<Item = (&'a [f64], &'a [f64])>,
{
    let mut total = 0_usize;
    let mut correct = 0_usize;
    for (pred, target) in pairs {
        total += 1;
        if is_correct(pred, target) {
            correct += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        correct as f64 / total as f64
    }
}
