use rand::Rng;

use crate::{Activation, Error, Matrix, Result};

/// Weight initialization scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Init {
    /// Uniform in `[-1, 1)`.
    Uniform,
    /// Glorot uniform: `U(-a, a)`, `a = sqrt(6 / (in_dim + out_dim))`.
    #[default]
    Xavier,
    /// Kaiming uniform: `U(-a, a)`, `a = sqrt(6 / in_dim)`.
    He,
    /// All weights and biases start at zero.
    Zeros,
}

impl Init {
    fn limit(self, in_dim: usize, out_dim: usize) -> f64 {
        match self {
            Init::Uniform => 1.0,
            Init::Xavier => (6.0 / (in_dim + out_dim) as f64).sqrt(),
            Init::He => (6.0 / in_dim as f64).sqrt(),
            Init::Zeros => 0.0,
        }
    }

    /// Default initializer for an activation.
    pub fn for_activation(act: Activation) -> Self {
        match act {
            Activation::Tanh | Activation::Sigmoid | Activation::Identity => Init::Xavier,
            Activation::ReLU => Init::He,
        }
    }
}

/// Dense affine layer followed by an element-wise activation.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    in_dim: usize,
    out_dim: usize,
    activation: Activation,
    /// Row-major matrix with shape (out_dim, in_dim).
    weights: Vec<f64>,
    biases: Vec<f64>,
}

impl Layer {
    /// Build a layer with the given initializer. Biases are drawn like the weights.
    pub fn new_with_rng<R: Rng + ?Sized>(
        in_dim: usize,
        out_dim: usize,
        init: Init,
        activation: Activation,
        rng: &mut R,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "layer dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }

        let limit = init.limit(in_dim, out_dim);
        let mut draw = |n: usize| -> Vec<f64> {
            if limit > 0.0 {
                (0..n).map(|_| rng.gen_range(-limit..limit)).collect()
            } else {
                vec![0.0; n]
            }
        };
        let weights = draw(in_dim * out_dim);
        let biases = draw(out_dim);

        Ok(Self {
            in_dim,
            out_dim,
            activation,
            weights,
            biases,
        })
    }

    /// Zero-initialized layer.
    pub fn zeros(in_dim: usize, out_dim: usize, activation: Activation) -> Result<Self> {
        Self::from_parts(
            in_dim,
            out_dim,
            activation,
            vec![0.0; in_dim * out_dim],
            vec![0.0; out_dim],
        )
    }

    /// Assemble a layer from explicit parameters.
    ///
    /// Validates shapes and that every parameter is finite.
    pub fn from_parts(
        in_dim: usize,
        out_dim: usize,
        activation: Activation,
        weights: Vec<f64>,
        biases: Vec<f64>,
    ) -> Result<Self> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::InvalidConfig(format!(
                "layer dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }
        let expected_w = in_dim
            .checked_mul(out_dim)
            .ok_or_else(|| Error::InvalidConfig("layer weight shape overflow".to_owned()))?;
        if weights.len() != expected_w {
            return Err(Error::ShapeMismatch(format!(
                "weights length {} does not match out_dim * in_dim ({out_dim} * {in_dim})",
                weights.len()
            )));
        }
        if biases.len() != out_dim {
            return Err(Error::ShapeMismatch(format!(
                "biases length {} does not match out_dim {out_dim}",
                biases.len()
            )));
        }
        if weights.iter().chain(&biases).any(|v| !v.is_finite()) {
            return Err(Error::NumericalFailure(
                "layer parameters must be finite".to_owned(),
            ));
        }

        Ok(Self {
            in_dim,
            out_dim,
            activation,
            weights,
            biases,
        })
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    #[inline]
    pub fn biases(&self) -> &[f64] {
        &self.biases
    }

    #[inline]
    pub fn weights_mut(&mut self) -> &mut [f64] {
        &mut self.weights
    }

    #[inline]
    pub fn biases_mut(&mut self) -> &mut [f64] {
        &mut self.biases
    }

    /// Copy of the weights as an `(out_dim, in_dim)` matrix.
    pub fn weight_matrix(&self) -> Matrix {
        Matrix::from_vec(self.weights.clone(), self.out_dim, self.in_dim)
            .expect("layer weights always match (out_dim, in_dim)")
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.weights.iter().chain(&self.biases).all(|v| v.is_finite())
    }

    /// Forward pass for a single sample.
    ///
    /// Computes `outputs = activation(W * inputs + b)`.
    ///
    /// Shape contract:
    /// - `inputs.len() == self.in_dim`
    /// - `outputs.len() == self.out_dim`
    #[inline]
    pub fn forward(&self, inputs: &[f64], outputs: &mut [f64]) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(outputs.len(), self.out_dim);

        for o in 0..self.out_dim {
            let mut sum = self.biases[o];
            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                sum = self.weights[row + i].mul_add(inputs[i], sum);
            }
            outputs[o] = self.activation.forward(sum);
        }
    }

    /// Backward pass for a single sample.
    ///
    /// Overwrite semantics: `d_inputs`, `d_weights` and `d_biases` are overwritten.
    ///
    /// Inputs:
    /// - `inputs`: the same inputs passed to `forward`
    /// - `outputs`: the outputs previously produced by `forward` (post-activation)
    /// - `d_outputs`: upstream gradient dL/d(outputs)
    #[inline]
    pub fn backward(
        &self,
        inputs: &[f64],
        outputs: &[f64],
        d_outputs: &[f64],
        d_inputs: &mut [f64],
        d_weights: &mut [f64],
        d_biases: &mut [f64],
    ) {
        debug_assert_eq!(inputs.len(), self.in_dim);
        debug_assert_eq!(outputs.len(), self.out_dim);
        debug_assert_eq!(d_outputs.len(), self.out_dim);
        debug_assert_eq!(d_inputs.len(), self.in_dim);
        debug_assert_eq!(d_weights.len(), self.weights.len());
        debug_assert_eq!(d_biases.len(), self.out_dim);

        // d_inputs accumulates contributions from all outputs.
        d_inputs.fill(0.0);

        for o in 0..self.out_dim {
            let d_z = d_outputs[o] * self.activation.grad_from_output(outputs[o]);
            d_biases[o] = d_z;

            let row = o * self.in_dim;
            for i in 0..self.in_dim {
                let w = self.weights[row + i];
                d_weights[row + i] = d_z * inputs[i];
                d_inputs[i] = w.mul_add(d_z, d_inputs[i]);
            }
        }
    }

    /// `params -= lr * grads`.
    #[inline]
    pub fn sgd_step(&mut self, d_weights: &[f64], d_biases: &[f64], lr: f64) {
        debug_assert_eq!(d_weights.len(), self.weights.len());
        debug_assert_eq!(d_biases.len(), self.biases.len());

        for (w, &g) in self.weights.iter_mut().zip(d_weights) {
            *w -= lr * g;
        }
        for (b, &g) in self.biases.iter_mut().zip(d_biases) {
            *b -= lr * g;
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn from_parts_validates_shapes_and_finiteness() {
        assert!(Layer::from_parts(2, 1, Activation::Identity, vec![1.0, 2.0], vec![0.0]).is_ok());
        assert!(matches!(
            Layer::from_parts(2, 1, Activation::Identity, vec![1.0], vec![0.0]),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(matches!(
            Layer::from_parts(2, 1, Activation::Identity, vec![1.0, f64::NAN], vec![0.0]),
            Err(Error::NumericalFailure(_))
        ));
        assert!(matches!(
            Layer::from_parts(0, 1, Activation::Identity, vec![], vec![0.0]),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn forward_computes_affine_then_activation() {
        let layer = Layer::from_parts(
            2,
            2,
            Activation::ReLU,
            vec![1.0, 2.0, -1.0, -1.0],
            vec![0.5, 0.0],
        )
        .unwrap();
        let mut out = [0.0; 2];
        layer.forward(&[1.0, 1.0], &mut out);
        assert_eq!(out, [3.5, 0.0]);
    }

    #[test]
    fn init_respects_limits() {
        let mut rng = StdRng::seed_from_u64(7);
        let layer = Layer::new_with_rng(4, 3, Init::Xavier, Activation::Tanh, &mut rng).unwrap();
        let limit = (6.0_f64 / 7.0).sqrt();
        assert!(layer.weights().iter().all(|w| w.abs() <= limit));
        assert!(layer.biases().iter().all(|b| b.abs() <= limit));

        let zeros = Layer::new_with_rng(4, 3, Init::Zeros, Activation::Tanh, &mut rng).unwrap();
        assert!(zeros.weights().iter().chain(zeros.biases()).all(|&w| w == 0.0));
    }

    #[test]
    fn weight_matrix_has_out_by_in_shape() {
        let layer = Layer::zeros(5, 2, Activation::Identity).unwrap();
        assert_eq!(layer.weight_matrix().shape(), (2, 5));
    }
}
