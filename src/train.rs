use log::{debug, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{loss, Dataset, Error, Mlp, Result, Shuffle, Trainer};

/// Training configuration for [`Mlp::fit`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FitConfig {
    /// Number of single-sample SGD steps.
    pub num_iter: usize,
    pub learning_rate: f64,
    /// Fraction of rows used for training; the rest is held out for the test trace.
    pub train_proportion: f64,
    /// Upper bound on the length of each error trace.
    pub error_list_size: usize,
    /// Row order the train/test partition is taken from.
    pub split: Shuffle,
    /// Seed for picking the training sample of each step.
    pub seed: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            num_iter: 1000,
            learning_rate: 0.01,
            train_proportion: 1.0,
            error_list_size: 100,
            split: Shuffle::Seeded(0),
            seed: 0,
        }
    }
}

impl FitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_iter == 0 {
            return Err(Error::InvalidConfig("num_iter must be > 0".to_owned()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be finite and > 0, got {}",
                self.learning_rate
            )));
        }
        if !(self.train_proportion > 0.0 && self.train_proportion <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "train_proportion must be in (0, 1], got {}",
                self.train_proportion
            )));
        }
        Ok(())
    }

    /// Iterations per recorded checkpoint and the trace cap, or `None` when nothing is
    /// recorded.
    ///
    /// The window is `ceil(num_iter / cap)`. A checkpoint lands on every multiple of it and
    /// on the final iteration, which never takes the trace past `cap`.
    fn checkpoint_window(&self) -> Option<(usize, usize)> {
        let cap = self.error_list_size.min(self.num_iter);
        if cap == 0 {
            return None;
        }
        Some((self.num_iter.div_ceil(cap), cap))
    }
}

/// Error traces produced by a training call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitReport {
    pub train_errors: Vec<f64>,
    /// Empty for models without a held-out subset.
    pub test_errors: Vec<f64>,
}

impl FitReport {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            train_errors: Vec::with_capacity(n),
            test_errors: Vec::new(),
        }
    }

    pub fn final_train_error(&self) -> Option<f64> {
        self.train_errors.last().copied()
    }
}

impl Mlp {
    /// Train with stochastic gradient descent on squared error.
    ///
    /// Each iteration draws one row from the training subset (seeded by `cfg.seed`), runs
    /// forward/backward and applies an SGD step. Every checkpoint window records the mean
    /// per-sample error over the window into `train_errors` and the mean error over the
    /// held-out rows into `test_errors`. The last iteration always closes a window, so the
    /// final trace entries describe the trained model.
    ///
    /// Training runs on a copy; on error `self` is unchanged.
    pub fn fit(&mut self, data: &Dataset<'_>, cfg: &FitConfig) -> Result<FitReport> {
        cfg.validate()?;
        data.check_dims(self.input_dim(), self.output_dim())?;
        let split = data.split(cfg.train_proportion, cfg.split)?;

        debug!(
            "mlp fit: layers={:?}, classification={}, {} train rows, {} test rows, num_iter={}, lr={}",
            self.layer_sizes(),
            self.is_classification(),
            split.train.len(),
            split.test.len(),
            cfg.num_iter,
            cfg.learning_rate
        );

        let mut model = self.clone();
        let mut trainer = Trainer::new(&model);
        let mut eval_scratch = model.scratch();
        let mut rng = StdRng::seed_from_u64(cfg.seed);

        let window = cfg.checkpoint_window();
        let mut report = FitReport::with_capacity(window.map_or(0, |(_, cap)| cap));
        if !split.test.is_empty() {
            report.test_errors.reserve(report.train_errors.capacity());
        }

        let mut window_sum = 0.0;
        let mut window_len = 0usize;

        for iter in 0..cfg.num_iter {
            let row = split.train[rng.gen_range(0..split.train.len())];
            let input = data.input(row);
            let target = data.target(row);

            model.forward(input, &mut trainer.scratch);
            let err = loss::squared_error_backward(
                trainer.scratch.output(),
                target,
                trainer.grads.d_output_mut(),
            );
            if !err.is_finite() {
                warn!("mlp fit diverged at iteration {iter}");
                return Err(Error::NumericalFailure(format!(
                    "training diverged at iteration {iter}"
                )));
            }
            model.backward(input, &trainer.scratch, &mut trainer.grads);
            model.sgd_step(&trainer.grads, cfg.learning_rate);

            window_sum += err;
            window_len += 1;

            let Some((every, cap)) = window else {
                continue;
            };
            let last = iter + 1 == cfg.num_iter;
            if ((iter + 1) % every != 0 && !last) || report.train_errors.len() >= cap {
                continue;
            }

            let train_error = window_sum / window_len as f64;
            window_sum = 0.0;
            window_len = 0;
            report.train_errors.push(train_error);

            if split.test.is_empty() {
                trace!("mlp iteration {iter}: train={train_error}");
            } else {
                let test_error = model.mean_error(data, &split.test, &mut eval_scratch);
                if !test_error.is_finite() {
                    warn!("mlp fit produced a non-finite test error at iteration {iter}");
                    return Err(Error::NumericalFailure(format!(
                        "test error is not finite at iteration {iter}"
                    )));
                }
                trace!("mlp iteration {iter}: train={train_error} test={test_error}");
                report.test_errors.push(test_error);
            }
        }

        if !model.is_finite() {
            warn!("mlp fit produced non-finite parameters");
            return Err(Error::NumericalFailure(
                "training produced non-finite parameters".to_owned(),
            ));
        }

        *self = model;
        debug!(
            "mlp fit done: final train error={:?}, final test error={:?}",
            report.train_errors.last(),
            report.test_errors.last()
        );
        Ok(report)
    }
}
