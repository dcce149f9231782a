//! Ordinary least-squares linear regression.

use log::{debug, warn};

use crate::linalg::least_squares_with_bias;
use crate::model::{check_input_len, Model, Trainable};
use crate::{loss, Activation, Dataset, Error, FitReport, Layer, LayerWeights, Result};

/// `y = W x + b`, fitted in closed form.
///
/// Fitting is deterministic: the same `(X, Y)` always yields bit-identical weights.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearRegressor {
    layer: Layer,
}

impl LinearRegressor {
    /// Single-output regressor with zero-initialized weights.
    pub fn new(input_size: usize) -> Result<Self> {
        Self::with_outputs(input_size, 1)
    }

    pub fn with_outputs(input_size: usize, output_size: usize) -> Result<Self> {
        if input_size == 0 || output_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "regressor sizes must be > 0, got input_size={input_size} output_size={output_size}"
            )));
        }
        Ok(Self {
            layer: Layer::zeros(input_size, output_size, Activation::Identity)?,
        })
    }

    /// Least-squares fit on `data` via a QR factorization of the bias-augmented design.
    ///
    /// Fails with `NumericalFailure` when the bias-augmented design is rank deficient,
    /// including when there are fewer rows than `input_size + 1`. The report carries a
    /// single train error: the mean squared error of the fitted model on `data`.
    pub fn fit(&mut self, data: &Dataset<'_>) -> Result<FitReport> {
        data.check_dims(self.input_size(), self.output_size())?;
        debug!(
            "linear regression fit: {} rows x {} features -> {} outputs",
            data.len(),
            data.input_dim(),
            data.target_dim()
        );

        let solution = least_squares_with_bias(data.inputs(), data.targets()).map_err(|e| {
            warn!("linear regression fit rejected: {e}");
            e
        })?;

        let in_dim = self.input_size();
        let out_dim = self.output_size();
        let mut weights = vec![0.0; in_dim * out_dim];
        let mut biases = vec![0.0; out_dim];
        for o in 0..out_dim {
            biases[o] = solution[o];
            for i in 0..in_dim {
                weights[o * in_dim + i] = solution[(i + 1) * out_dim + o];
            }
        }
        let fitted = Layer::from_parts(in_dim, out_dim, Activation::Identity, weights, biases)?;

        let mut out = vec![0.0; out_dim];
        let mut total = 0.0;
        for r in 0..data.len() {
            fitted.forward(data.input(r), &mut out);
            total += loss::mse(&out, data.target(r));
        }
        let error = total / data.len() as f64;
        if !error.is_finite() {
            return Err(Error::NumericalFailure(
                "fitted model produces non-finite predictions".to_owned(),
            ));
        }

        self.layer = fitted;
        debug!("linear regression fit done: mse={error}");

        let mut report = FitReport::with_capacity(1);
        report.train_errors.push(error);
        Ok(report)
    }

    /// Coefficient of determination, summed over output columns.
    ///
    /// `1 - SS_res / SS_tot`; a constant target column contributes `SS_tot = 0`, in which
    /// case the score is `1.0` for a perfect fit and `0.0` otherwise.
    pub fn score(&self, data: &Dataset<'_>) -> Result<f64> {
        data.check_dims(self.input_size(), self.output_size())?;
        let out_dim = self.output_size();

        let mut means = vec![0.0; out_dim];
        for r in 0..data.len() {
            for (m, &t) in means.iter_mut().zip(data.target(r)) {
                *m += t;
            }
        }
        for m in means.iter_mut() {
            *m /= data.len() as f64;
        }

        let mut out = vec![0.0; out_dim];
        let mut ss_res = 0.0;
        let mut ss_tot = 0.0;
        for r in 0..data.len() {
            self.layer.forward(data.input(r), &mut out);
            for o in 0..out_dim {
                let t = data.target(r)[o];
                ss_res += (t - out[o]).powi(2);
                ss_tot += (t - means[o]).powi(2);
            }
        }

        if ss_tot == 0.0 {
            return Ok(if ss_res == 0.0 { 1.0 } else { 0.0 });
        }
        Ok(1.0 - ss_res / ss_tot)
    }
}

impl Model for LinearRegressor {
    fn input_size(&self) -> usize {
        self.layer.in_dim()
    }

    fn output_size(&self) -> usize {
        self.layer.out_dim()
    }

    fn predict_one(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_input_len(x, self.input_size())?;
        let mut out = vec![0.0; self.output_size()];
        self.layer.forward(x, &mut out);
        Ok(out)
    }

    fn weights(&self) -> Vec<LayerWeights> {
        vec![LayerWeights {
            weights: self.layer.weight_matrix(),
            biases: self.layer.biases().to_vec(),
        }]
    }
}

impl Trainable for LinearRegressor {
    type Params = ();

    fn fit(&mut self, data: &Dataset<'_>, _params: &()) -> Result<FitReport> {
        LinearRegressor::fit(self, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fits_plane_exactly() {
        // y = 1 + 2 x0 - 3 x1
        let x = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 2.0, 2.0, -1.0, 3.0];
        let y = [1.0, 3.0, -2.0, -1.0, -10.0];
        let data = Dataset::from_flat(&x, 5, 2, &y, 5, 1).unwrap();

        let mut model = LinearRegressor::new(2).unwrap();
        let report = model.fit(&data).unwrap();
        assert_eq!(report.train_errors.len(), 1);
        assert!(report.train_errors[0] < 1e-18);

        let w = &model.weights()[0];
        assert!((w.biases[0] - 1.0).abs() < 1e-9);
        assert!((w.weights.get(0, 0) - 2.0).abs() < 1e-9);
        assert!((w.weights.get(0, 1) + 3.0).abs() < 1e-9);
        assert!((model.score(&data).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn singular_design_keeps_previous_weights() {
        let y = [2.0, 4.0, 6.0];

        // Two identical feature columns.
        let x2 = [1.0, 1.0, 2.0, 2.0, 3.0, 3.0];
        let data2 = Dataset::from_flat(&x2, 3, 2, &y, 3, 1).unwrap();
        let mut wide = LinearRegressor::new(2).unwrap();
        let before = wide.clone();
        assert!(matches!(
            wide.fit(&data2),
            Err(Error::NumericalFailure(_))
        ));
        assert_eq!(wide, before);
    }

    #[test]
    fn fits_features_in_the_millions() {
        // y = 2e-6 x + 1
        let x = [1e6, 2e6, 3e6, 4e6];
        let y = [3.0, 5.0, 7.0, 9.0];
        let data = Dataset::from_flat(&x, 4, 1, &y, 4, 1).unwrap();

        let mut model = LinearRegressor::new(1).unwrap();
        model.fit(&data).unwrap();
        let w = &model.weights()[0];
        assert!((w.biases[0] - 1.0).abs() < 1e-6);
        assert!((w.weights.get(0, 0) - 2e-6).abs() < 1e-12);
        let pred = model.predict_one(&[5e6]).unwrap();
        assert!((pred[0] - 11.0).abs() < 1e-6);
    }

    #[test]
    fn too_few_rows_is_singular() {
        let x = [1.0, 2.0];
        let y = [3.0];
        let data = Dataset::from_flat(&x, 1, 2, &y, 1, 1).unwrap();
        let mut model = LinearRegressor::new(2).unwrap();
        assert!(matches!(
            model.fit(&data),
            Err(Error::NumericalFailure(_))
        ));
    }
}
