//! Squared-error loss.
//!
//! Used like:
//!
//! - run `model.forward(...)`
//! - compute `d_output` via [`squared_error_backward`]
//! - run `model.backward(...)`
//! - update parameters with `sgd_step`
//!
//! The value reported to callers is the *mean* squared error over the output components.
//! The gradient is taken of `0.5 * sum((pred - target)^2)`, i.e. `pred - target` per
//! component, so the learning rate acts directly on the raw residual.

/// Mean squared error: `mean((pred - target)^2)`.
#[inline]
pub fn mse(pred: &[f64], target: &[f64]) -> f64 {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );

    if pred.is_empty() {
        return 0.0;
    }

    let mut sum_sq = 0.0_f64;
    for i in 0..pred.len() {
        let diff = pred[i] - target[i];
        sum_sq = diff.mul_add(diff, sum_sq);
    }
    sum_sq / pred.len() as f64
}

/// Squared-error gradient w.r.t. `pred`.
///
/// Writes `d_pred[i] = pred[i] - target[i]` and returns `mse(pred, target)`.
#[inline]
pub fn squared_error_backward(pred: &[f64], target: &[f64], d_pred: &mut [f64]) -> f64 {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );
    assert_eq!(
        pred.len(),
        d_pred.len(),
        "pred len {} does not match d_pred len {}",
        pred.len(),
        d_pred.len()
    );

    if pred.is_empty() {
        return 0.0;
    }

    let mut sum_sq = 0.0_f64;
    for i in 0..pred.len() {
        let diff = pred[i] - target[i];
        sum_sq = diff.mul_add(diff, sum_sq);
        d_pred[i] = diff;
    }
    sum_sq / pred.len() as f64
}
