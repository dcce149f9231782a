//! Single-layer perceptron.
//!
//! A linear unit per output with a bias: `y = W x + b`. Inference returns the raw linear
//! output; [`Perceptron::classify`] thresholds it to `±1`.

use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::model::{check_input_len, Model, Trainable};
use crate::{Activation, Dataset, Error, FitReport, Layer, LayerWeights, Result, Shuffle};

/// How the prediction used for the weight update is derived from the linear output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UpdateRule {
    /// Widrow-Hoff: update on the raw linear output, `w += lr * (y - z) * x`.
    #[default]
    Delta,
    /// Rosenblatt: update on the thresholded output, `w += lr * (y - sign(z)) * x`.
    /// Labels are expected in `{-1, 1}`.
    Rosenblatt,
}

impl UpdateRule {
    #[inline]
    fn prediction(self, z: f64) -> f64 {
        match self {
            UpdateRule::Delta => z,
            UpdateRule::Rosenblatt => threshold(z),
        }
    }
}

#[inline]
fn threshold(z: f64) -> f64 {
    if z >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PerceptronConfig {
    /// Number of full passes over the dataset.
    pub epochs: usize,
    pub learning_rate: f64,
    pub rule: UpdateRule,
    /// Sample order within each pass. `Seeded` reshuffles every pass from one seeded stream.
    pub shuffle: Shuffle,
}

impl Default for PerceptronConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            learning_rate: 0.01,
            rule: UpdateRule::Delta,
            shuffle: Shuffle::None,
        }
    }
}

impl PerceptronConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::InvalidConfig("epochs must be > 0".to_owned()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Perceptron {
    layer: Layer,
}

impl Perceptron {
    /// Single-output perceptron with zero-initialized weights.
    pub fn new(input_size: usize) -> Result<Self> {
        Self::with_outputs(input_size, 1)
    }

    pub fn with_outputs(input_size: usize, output_size: usize) -> Result<Self> {
        if input_size == 0 || output_size == 0 {
            return Err(Error::InvalidConfig(format!(
                "perceptron sizes must be > 0, got input_size={input_size} output_size={output_size}"
            )));
        }
        Ok(Self {
            layer: Layer::zeros(input_size, output_size, Activation::Identity)?,
        })
    }

    /// Thresholded prediction: `1` where the linear output is `>= 0`, else `-1`.
    pub fn classify(&self, x: &[f64]) -> Result<Vec<f64>> {
        let mut out = self.predict_one(x)?;
        for v in out.iter_mut() {
            *v = threshold(*v);
        }
        Ok(out)
    }

    /// Train for `cfg.epochs` full passes.
    ///
    /// Returns one error per epoch: the mean squared difference between labels and the
    /// predictions the update rule acted on.
    pub fn fit(&mut self, data: &Dataset<'_>, cfg: &PerceptronConfig) -> Result<FitReport> {
        cfg.validate()?;
        data.check_dims(self.input_size(), self.output_size())?;

        debug!(
            "perceptron fit: {} rows, {} epochs, lr={}, rule={:?}",
            data.len(),
            cfg.epochs,
            cfg.learning_rate,
            cfg.rule
        );

        let mut layer = self.layer.clone();
        let in_dim = layer.in_dim();
        let out_dim = layer.out_dim();

        let mut z = vec![0.0; out_dim];
        let mut d_out = vec![0.0; out_dim];
        let mut d_in = vec![0.0; in_dim];
        let mut d_w = vec![0.0; in_dim * out_dim];
        let mut d_b = vec![0.0; out_dim];

        let mut order = Shuffle::None.order(data.len());
        let mut rng = match cfg.shuffle {
            Shuffle::Seeded(seed) => Some(StdRng::seed_from_u64(seed)),
            Shuffle::None => None,
        };

        let mut report = FitReport::with_capacity(cfg.epochs);
        let norm = (data.len() * out_dim) as f64;

        for epoch in 0..cfg.epochs {
            if let Some(rng) = rng.as_mut() {
                order.shuffle(rng);
            }

            let mut sum_sq = 0.0;
            for &idx in &order {
                let x = data.input(idx);
                let y = data.target(idx);

                layer.forward(x, &mut z);
                for o in 0..out_dim {
                    // Identity activation: d_out is the update direction for this rule.
                    let diff = cfg.rule.prediction(z[o]) - y[o];
                    sum_sq = diff.mul_add(diff, sum_sq);
                    d_out[o] = diff;
                }
                layer.backward(x, &z, &d_out, &mut d_in, &mut d_w, &mut d_b);
                layer.sgd_step(&d_w, &d_b, cfg.learning_rate);
            }

            let epoch_error = sum_sq / norm;
            if !epoch_error.is_finite() || !layer.is_finite() {
                warn!("perceptron fit diverged at epoch {epoch}");
                return Err(Error::NumericalFailure(format!(
                    "training diverged at epoch {epoch}"
                )));
            }
            trace!("perceptron epoch {epoch}: error={epoch_error}");
            report.train_errors.push(epoch_error);
        }

        self.layer = layer;
        debug!(
            "perceptron fit done: final error={:?}",
            report.train_errors.last()
        );
        Ok(report)
    }
}

impl Model for Perceptron {
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

impl Trainable for Perceptron {
    type Params = PerceptronConfig;

    fn fit(&mut self, data: &Dataset<'_>, params: &PerceptronConfig) -> Result<FitReport> {
        Perceptron::fit(self, data, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MatrixView;

    #[test]
    fn predict_is_affine_and_checks_width() {
        let p = Perceptron::new(2).unwrap();
        assert_eq!(p.predict_one(&[3.0, 4.0]).unwrap(), vec![0.0]);
        assert!(matches!(
            p.predict_one(&[1.0]),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn rosenblatt_separates_linearly_separable_points() {
        let x = [1.0, 1.0, 2.0, 3.0, 3.0, 3.0, -1.0, -2.0];
        let y = [1.0, -1.0, -1.0, 1.0];
        let data = Dataset::from_flat(&x, 4, 2, &y, 4, 1).unwrap();

        let mut p = Perceptron::new(2).unwrap();
        let cfg = PerceptronConfig {
            epochs: 500,
            learning_rate: 0.05,
            rule: UpdateRule::Rosenblatt,
            shuffle: Shuffle::Seeded(1),
        };
        let report = p.fit(&data, &cfg).unwrap();
        assert_eq!(report.train_errors.len(), 500);
        assert_eq!(*report.train_errors.last().unwrap(), 0.0);

        for i in 0..data.len() {
            assert_eq!(p.classify(data.input(i)).unwrap(), data.target(i));
        }
    }

    #[test]
    fn delta_rule_fits_multiple_outputs() {
        // y0 = x, y1 = -x + 1
        let x = [0.0, 0.5, 1.0];
        let y = [0.0, 1.0, 0.5, 0.5, 1.0, 0.0];
        let data = Dataset::from_flat(&x, 3, 1, &y, 3, 2).unwrap();

        let mut p = Perceptron::with_outputs(1, 2).unwrap();
        let cfg = PerceptronConfig {
            epochs: 2000,
            learning_rate: 0.1,
            ..PerceptronConfig::default()
        };
        p.fit(&data, &cfg).unwrap();

        let out = p.predict_batch(MatrixView::new(&x, 3, 1).unwrap()).unwrap();
        for (got, want) in out.as_slice().iter().zip(y) {
            assert!((got - want).abs() < 1e-3, "got {got}, want {want}");
        }
    }

    #[test]
    fn invalid_config_leaves_weights_untouched() {
        let x = [0.0, 1.0];
        let y = [1.0, 0.0];
        let data = Dataset::from_flat(&x, 2, 1, &y, 2, 1).unwrap();
        let mut p = Perceptron::new(1).unwrap();
        let before = p.clone();

        let cfg = PerceptronConfig {
            epochs: 0,
            ..PerceptronConfig::default()
        };
        assert!(matches!(p.fit(&data, &cfg), Err(Error::InvalidConfig(_))));
        assert_eq!(p, before);
    }

    #[test]
    fn divergence_is_a_numerical_failure() {
        let x = [1e200, -1e200];
        let y = [1.0, -1.0];
        let data = Dataset::from_flat(&x, 2, 1, &y, 2, 1).unwrap();
        let mut p = Perceptron::new(1).unwrap();
        let before = p.clone();

        let cfg = PerceptronConfig {
            epochs: 50,
            learning_rate: 10.0,
            ..PerceptronConfig::default()
        };
        assert!(matches!(
            p.fit(&data, &cfg),
            Err(Error::NumericalFailure(_))
        ));
        assert_eq!(p, before);
    }
}
