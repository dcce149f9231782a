use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{check_batch_width, check_input_len, Model, Trainable};
use crate::{
    loss, Dataset, Error, FitConfig, FitReport, Layer, LayerWeights, Matrix, MatrixView,
    MlpBuilder, Result,
};

/// Multilayer perceptron: a stack of dense layers plus a classification/regression flag.
///
/// Invariant: at least one layer, and each layer's `in_dim` equals the previous `out_dim`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mlp {
    layers: Vec<Layer>,
    classification: bool,
}

/// Reusable buffers for `Mlp::forward`.
///
/// The output of the most recent forward pass lives inside `Scratch`.
#[derive(Debug, Clone)]
pub struct Scratch {
    layer_outputs: Vec<Vec<f64>>,
}

/// Parameter gradients for an `Mlp` (overwrite semantics).
///
/// Allocate once via `Mlp::gradients()` and reuse across training steps.
#[derive(Debug, Clone)]
pub struct Gradients {
    d_weights: Vec<Vec<f64>>,
    d_biases: Vec<Vec<f64>>,

    // Gradient w.r.t each layer output, including the final one; `Mlp::backward`
    // reads the upstream gradient from the last entry.
    d_layer_outputs: Vec<Vec<f64>>,

    d_input: Vec<f64>,
}

impl Mlp {
    /// Network over `sizes` (input width first, output width last).
    ///
    /// Hidden layers use `tanh`. The output layer uses `tanh` in classification mode and the
    /// identity in regression mode.
    pub fn new_with_seed(sizes: &[usize], classification: bool, seed: u64) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::new_with_rng(sizes, classification, &mut rng)
    }

    pub fn new_with_rng<R: Rng + ?Sized>(
        sizes: &[usize],
        classification: bool,
        rng: &mut R,
    ) -> Result<Self> {
        MlpBuilder::from_sizes(sizes, classification)?.build_with_rng(rng)
    }

    /// Assemble a network from layers, checking that consecutive dims chain.
    pub fn from_layers(layers: Vec<Layer>, classification: bool) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::InvalidConfig(
                "mlp must have at least one layer".to_owned(),
            ));
        }
        for i in 1..layers.len() {
            let prev_out = layers[i - 1].out_dim();
            if layers[i].in_dim() != prev_out {
                return Err(Error::ShapeMismatch(format!(
                    "layer {i} in_dim {} does not match previous out_dim {prev_out}",
                    layers[i].in_dim()
                )));
            }
        }
        Ok(Self {
            layers,
            classification,
        })
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.layers
            .first()
            .expect("mlp must have at least one layer")
            .in_dim()
    }

    #[inline]
    pub fn output_dim(&self) -> usize {
        self.layers
            .last()
            .expect("mlp must have at least one layer")
            .out_dim()
    }

    #[inline]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn is_classification(&self) -> bool {
        self.classification
    }

    /// Neurons per layer, input layer included.
    pub fn layer_sizes(&self) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(self.layers.len() + 1);
        sizes.push(self.input_dim());
        sizes.extend(self.layers.iter().map(Layer::out_dim));
        sizes
    }

    #[inline]
    pub fn layer(&self, idx: usize) -> Option<&Layer> {
        self.layers.get(idx)
    }

    #[inline]
    pub fn layer_mut(&mut self, idx: usize) -> Option<&mut Layer> {
        self.layers.get_mut(idx)
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub(crate) fn is_finite(&self) -> bool {
        self.layers.iter().all(Layer::is_finite)
    }

    pub fn scratch(&self) -> Scratch {
        Scratch::new(self)
    }

    pub fn gradients(&self) -> Gradients {
        Gradients::new(self)
    }

    /// Convenience constructor: allocate all training buffers.
    #[inline]
    pub fn trainer(&self) -> Trainer {
        Trainer::new(self)
    }

    /// Forward pass for a single sample.
    ///
    /// Writes intermediate activations into `scratch` and returns the final output slice.
    ///
    /// Shape contract:
    /// - `input.len() == self.input_dim()`
    /// - `scratch` must be built for this `Mlp` (same layer count and output sizes)
    pub fn forward<'a>(&self, input: &[f64], scratch: &'a mut Scratch) -> &'a [f64] {
        assert_eq!(
            input.len(),
            self.input_dim(),
            "input len {} does not match model input_dim {}",
            input.len(),
            self.input_dim()
        );
        assert_eq!(
            scratch.layer_outputs.len(),
            self.layers.len(),
            "scratch has {} layer outputs, model has {} layers",
            scratch.layer_outputs.len(),
            self.layers.len()
        );

        for (idx, layer) in self.layers.iter().enumerate() {
            if idx == 0 {
                let out = &mut scratch.layer_outputs[0];
                assert_eq!(
                    out.len(),
                    layer.out_dim(),
                    "scratch layer 0 output len {} does not match layer out_dim {}",
                    out.len(),
                    layer.out_dim()
                );
                layer.forward(input, out);
            } else {
                // Borrow the previous output immutably and the current output mutably.
                let (left, right) = scratch.layer_outputs.split_at_mut(idx);
                let prev = &left[idx - 1];
                let out = &mut right[0];
                assert_eq!(
                    out.len(),
                    layer.out_dim(),
                    "scratch layer {idx} output len {} does not match layer out_dim {}",
                    out.len(),
                    layer.out_dim()
                );
                layer.forward(prev, out);
            }
        }

        scratch.output()
    }

    /// Backward pass for a single sample.
    ///
    /// Call `forward` first with the same `input` and `scratch`, then write the upstream
    /// gradient `dL/d(output)` into `grads.d_output_mut()`.
    ///
    /// `grads` is overwritten with the gradients for this sample. Returns dL/d(input).
    pub fn backward<'a>(
        &self,
        input: &[f64],
        scratch: &Scratch,
        grads: &'a mut Gradients,
    ) -> &'a [f64] {
        assert_eq!(
            input.len(),
            self.input_dim(),
            "input len {} does not match model input_dim {}",
            input.len(),
            self.input_dim()
        );
        assert_eq!(
            scratch.layer_outputs.len(),
            self.layers.len(),
            "scratch has {} layer outputs, model has {} layers",
            scratch.layer_outputs.len(),
            self.layers.len()
        );
        assert_eq!(
            grads.d_weights.len(),
            self.layers.len(),
            "grads has {} d_weights entries, model has {} layers",
            grads.d_weights.len(),
            self.layers.len()
        );
        assert_eq!(
            grads.d_input.len(),
            self.input_dim(),
            "grads d_input len {} does not match model input_dim {}",
            grads.d_input.len(),
            self.input_dim()
        );

        for idx in (0..self.layers.len()).rev() {
            let layer = &self.layers[idx];

            let layer_input: &[f64] = if idx == 0 {
                input
            } else {
                &scratch.layer_outputs[idx - 1]
            };
            let layer_output: &[f64] = &scratch.layer_outputs[idx];

            if idx == 0 {
                let d_outputs = &grads.d_layer_outputs[0];
                layer.backward(
                    layer_input,
                    layer_output,
                    d_outputs,
                    &mut grads.d_input,
                    &mut grads.d_weights[0],
                    &mut grads.d_biases[0],
                );
            } else {
                // `d_inputs` of this layer is `d_outputs` of the previous one.
                let (left, right) = grads.d_layer_outputs.split_at_mut(idx);
                let d_inputs_prev = &mut left[idx - 1];
                let d_outputs = &right[0];
                layer.backward(
                    layer_input,
                    layer_output,
                    d_outputs,
                    d_inputs_prev,
                    &mut grads.d_weights[idx],
                    &mut grads.d_biases[idx],
                );
            }
        }

        &grads.d_input
    }

    /// Applies an SGD update to all layers.
    #[inline]
    pub fn sgd_step(&mut self, grads: &Gradients, lr: f64) {
        assert!(
            lr.is_finite() && lr > 0.0,
            "learning rate must be finite and > 0"
        );
        assert_eq!(
            self.layers.len(),
            grads.d_weights.len(),
            "grads has {} d_weights entries, model has {} layers",
            grads.d_weights.len(),
            self.layers.len()
        );

        for (i, layer) in self.layers.iter_mut().enumerate() {
            layer.sgd_step(&grads.d_weights[i], &grads.d_biases[i], lr);
        }
    }

    /// Mean squared error over `data`.
    pub fn evaluate_mse(&self, data: &Dataset<'_>) -> Result<f64> {
        data.check_dims(self.input_dim(), self.output_dim())?;
        let rows: Vec<usize> = (0..data.len()).collect();
        Ok(self.mean_error(data, &rows, &mut self.scratch()))
    }

    /// Mean per-row squared error over the selected rows. Shapes must already be checked.
    pub(crate) fn mean_error(
        &self,
        data: &Dataset<'_>,
        rows: &[usize],
        scratch: &mut Scratch,
    ) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        let mut total = 0.0;
        for &r in rows {
            let y = self.forward(data.input(r), scratch);
            total += loss::mse(y, data.target(r));
        }
        total / rows.len() as f64
    }
}

impl Model for Mlp {
    fn input_size(&self) -> usize {
        self.input_dim()
    }

    fn output_size(&self) -> usize {
        self.output_dim()
    }

    fn predict_one(&self, x: &[f64]) -> Result<Vec<f64>> {
        check_input_len(x, self.input_dim())?;
        let mut scratch = self.scratch();
        Ok(self.forward(x, &mut scratch).to_vec())
    }

    fn predict_batch(&self, x: MatrixView<'_>) -> Result<Matrix> {
        check_batch_width(x, self.input_dim())?;
        let mut scratch = self.scratch();
        let mut out = Matrix::zeros(x.rows(), self.output_dim());
        for r in 0..x.rows() {
            let y = self.forward(x.row(r), &mut scratch);
            out.row_mut(r).copy_from_slice(y);
        }
        Ok(out)
    }

    fn weights(&self) -> Vec<LayerWeights> {
        self.layers
            .iter()
            .map(|layer| LayerWeights {
                weights: layer.weight_matrix(),
                biases: layer.biases().to_vec(),
            })
            .collect()
    }
}

impl Trainable for Mlp {
    type Params = FitConfig;

    fn fit(&mut self, data: &Dataset<'_>, params: &FitConfig) -> Result<FitReport> {
        Mlp::fit(self, data, params)
    }
}

/// Reusable buffers for training a specific `Mlp`.
#[derive(Debug, Clone)]
pub struct Trainer {
    pub scratch: Scratch,
    pub grads: Gradients,
}

impl Trainer {
    pub fn new(mlp: &Mlp) -> Self {
        Self {
            scratch: Scratch::new(mlp),
            grads: Gradients::new(mlp),
        }
    }
}

impl Scratch {
    pub fn new(mlp: &Mlp) -> Self {
        let layer_outputs = mlp
            .layers
            .iter()
            .map(|layer| vec![0.0; layer.out_dim()])
            .collect();
        Self { layer_outputs }
    }

    #[inline]
    pub fn output(&self) -> &[f64] {
        self.layer_outputs
            .last()
            .expect("scratch must have at least one layer output")
            .as_slice()
    }
}

impl Gradients {
    pub fn new(mlp: &Mlp) -> Self {
        let mut d_weights = Vec::with_capacity(mlp.layers.len());
        let mut d_biases = Vec::with_capacity(mlp.layers.len());
        let mut d_layer_outputs = Vec::with_capacity(mlp.layers.len());

        for layer in &mlp.layers {
            d_weights.push(vec![0.0; layer.in_dim() * layer.out_dim()]);
            d_biases.push(vec![0.0; layer.out_dim()]);
            d_layer_outputs.push(vec![0.0; layer.out_dim()]);
        }

        Self {
            d_weights,
            d_biases,
            d_layer_outputs,
            d_input: vec![0.0; mlp.input_dim()],
        }
    }

    /// Mutable view of the upstream gradient buffer for the final model output.
    #[inline]
    pub fn d_output_mut(&mut self) -> &mut [f64] {
        self.d_layer_outputs
            .last_mut()
            .expect("mlp must have at least one layer")
            .as_mut_slice()
    }

    #[inline]
    pub fn d_input(&self) -> &[f64] {
        &self.d_input
    }

    #[inline]
    pub fn d_weights(&self, layer_idx: usize) -> &[f64] {
        &self.d_weights[layer_idx]
    }

    #[inline]
    pub fn d_biases(&self, layer_idx: usize) -> &[f64] {
        &self.d_biases[layer_idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Activation;

    fn loss_for_mlp(mlp: &Mlp, input: &[f64], target: &[f64], scratch: &mut Scratch) -> f64 {
        mlp.forward(input, scratch);
        // Same objective the gradient is taken of: 0.5 * sum of squares.
        0.5 * crate::loss::mse(scratch.output(), target) * target.len() as f64
    }

    fn assert_close(analytic: f64, numeric: f64, abs_tol: f64, rel_tol: f64) {
        let diff = (analytic - numeric).abs();
        let scale = analytic.abs().max(numeric.abs()).max(1.0);
        assert!(
            diff <= abs_tol || diff / scale <= rel_tol,
            "analytic={analytic} numeric={numeric} diff={diff}"
        );
    }

    #[test]
    fn seeded_init_is_deterministic() {
        let a = Mlp::new_with_seed(&[2, 3, 1], true, 123).unwrap();
        let b = Mlp::new_with_seed(&[2, 3, 1], true, 123).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            a.predict_one(&[0.3, -0.7]).unwrap(),
            b.predict_one(&[0.3, -0.7]).unwrap()
        );
    }

    #[test]
    fn output_activation_follows_mode() {
        let clf = Mlp::new_with_seed(&[2, 4, 3], true, 0).unwrap();
        let reg = Mlp::new_with_seed(&[2, 4, 3], false, 0).unwrap();
        assert_eq!(clf.layer(1).unwrap().activation(), Activation::Tanh);
        assert_eq!(reg.layer(1).unwrap().activation(), Activation::Identity);
        assert_eq!(reg.layer(0).unwrap().activation(), Activation::Tanh);
        assert_eq!(reg.layer_sizes(), vec![2, 4, 3]);
    }

    #[test]
    fn weights_follow_layer_shapes() {
        let mlp = Mlp::new_with_seed(&[3, 5, 2], false, 9).unwrap();
        let shapes: Vec<_> = mlp.weights().iter().map(|w| w.weights.shape()).collect();
        assert_eq!(shapes, vec![(5, 3), (2, 5)]);
    }

    #[test]
    fn backward_matches_numeric_gradients() {
        let mut mlp = Mlp::new_with_seed(&[2, 3, 2], false, 0).unwrap();
        let mut scratch = mlp.scratch();
        let mut grads = mlp.gradients();

        let input = [0.3, -0.7];
        let target = [0.2, -0.4];

        mlp.forward(&input, &mut scratch);
        loss::squared_error_backward(scratch.output(), &target, grads.d_output_mut());
        let d_input = mlp.backward(&input, &scratch, &mut grads).to_vec();

        let eps = 1e-6;
        let abs_tol = 1e-6;
        let rel_tol = 1e-4;
        let mut scratch_tmp = mlp.scratch();

        for layer_idx in 0..mlp.num_layers() {
            let w_len = mlp.layers[layer_idx].weights().len();
            for p in 0..w_len {
                let orig = mlp.layers[layer_idx].weights()[p];

                mlp.layers[layer_idx].weights_mut()[p] = orig + eps;
                let loss_plus = loss_for_mlp(&mlp, &input, &target, &mut scratch_tmp);
                mlp.layers[layer_idx].weights_mut()[p] = orig - eps;
                let loss_minus = loss_for_mlp(&mlp, &input, &target, &mut scratch_tmp);
                mlp.layers[layer_idx].weights_mut()[p] = orig;

                let numeric = (loss_plus - loss_minus) / (2.0 * eps);
                assert_close(grads.d_weights(layer_idx)[p], numeric, abs_tol, rel_tol);
            }

            let b_len = mlp.layers[layer_idx].out_dim();
            for p in 0..b_len {
                let orig = mlp.layers[layer_idx].biases()[p];

                mlp.layers[layer_idx].biases_mut()[p] = orig + eps;
                let loss_plus = loss_for_mlp(&mlp, &input, &target, &mut scratch_tmp);
                mlp.layers[layer_idx].biases_mut()[p] = orig - eps;
                let loss_minus = loss_for_mlp(&mlp, &input, &target, &mut scratch_tmp);
                mlp.layers[layer_idx].biases_mut()[p] = orig;

                let numeric = (loss_plus - loss_minus) / (2.0 * eps);
                assert_close(grads.d_biases(layer_idx)[p], numeric, abs_tol, rel_tol);
            }
        }

        let mut input_var = input;
        for i in 0..input_var.len() {
            let orig = input_var[i];
            input_var[i] = orig + eps;
            let loss_plus = loss_for_mlp(&mlp, &input_var, &target, &mut scratch_tmp);
            input_var[i] = orig - eps;
            let loss_minus = loss_for_mlp(&mlp, &input_var, &target, &mut scratch_tmp);
            input_var[i] = orig;

            let numeric = (loss_plus - loss_minus) / (2.0 * eps);
            assert_close(d_input[i], numeric, abs_tol, rel_tol);
        }
    }

    #[test]
    fn predict_checks_input_width() {
        let mlp = Mlp::new_with_seed(&[2, 3, 1], true, 0).unwrap();
        assert!(matches!(
            mlp.predict_one(&[1.0, 2.0, 3.0]),
            Err(Error::ShapeMismatch(_))
        ));
        let x = [0.0; 6];
        let batch = MatrixView::new(&x, 2, 3).unwrap();
        assert!(matches!(
            mlp.predict_batch(batch),
            Err(Error::ShapeMismatch(_))
        ));
    }

    #[test]
    fn from_layers_rejects_broken_chain() {
        let a = Layer::zeros(2, 3, Activation::Tanh).unwrap();
        let b = Layer::zeros(4, 1, Activation::Identity).unwrap();
        assert!(matches!(
            Mlp::from_layers(vec![a, b], false),
            Err(Error::ShapeMismatch(_))
        ));
        assert!(matches!(
            Mlp::from_layers(vec![], false),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    #[should_panic]
    fn forward_panics_on_scratch_mismatch() {
        let a = Mlp::new_with_seed(&[2, 3, 1], true, 0).unwrap();
        let b = Mlp::new_with_seed(&[2, 4, 1], true, 0).unwrap();
        let mut scratch_b = b.scratch();
        a.forward(&[0.0, 0.0], &mut scratch_b);
    }
}
