//! One capability shared by every model family.
//!
//! [`Model`] covers inference and weight introspection, [`Trainable`] adds fitting with
//! variant-specific parameters. [`AnyModel`] is the closed set of families, used where the
//! concrete type is only known at runtime (handles, the C ABI).

use crate::{
    Dataset, Error, FitConfig, FitReport, LinearRegressor, Matrix, MatrixView, Mlp, Perceptron,
    PerceptronConfig, Result,
};

/// Parameters of one affine stage: `y = W x + b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerWeights {
    /// Shape `(units, previous units)`.
    pub weights: Matrix,
    pub biases: Vec<f64>,
}

pub trait Model {
    /// Width of one input row.
    fn input_size(&self) -> usize;

    /// Width of one output row.
    fn output_size(&self) -> usize;

    /// Inference for a single sample.
    fn predict_one(&self, x: &[f64]) -> Result<Vec<f64>>;

    /// Row-wise inference over `(rows, input_size)`, returning `(rows, output_size)`.
    fn predict_batch(&self, x: MatrixView<'_>) -> Result<Matrix> {
        check_batch_width(x, self.input_size())?;
        let out_dim = self.output_size();
        let mut out = Matrix::zeros(x.rows(), out_dim);
        for r in 0..x.rows() {
            let y = self.predict_one(x.row(r))?;
            out.row_mut(r).copy_from_slice(&y);
        }
        Ok(out)
    }

    /// Copy of every affine stage, first layer first.
    fn weights(&self) -> Vec<LayerWeights>;
}

/// Models that can be fitted to a [`Dataset`].
pub trait Trainable: Model {
    type Params;

    /// Fit on `data`. On error the model is left exactly as it was.
    fn fit(&mut self, data: &Dataset<'_>, params: &Self::Params) -> Result<FitReport>;
}

pub(crate) fn check_input_len(x: &[f64], input_size: usize) -> Result<()> {
    if x.len() != input_size {
        return Err(Error::ShapeMismatch(format!(
            "input has {} values, model input size is {input_size}",
            x.len()
        )));
    }
    Ok(())
}

pub(crate) fn check_batch_width(x: MatrixView<'_>, input_size: usize) -> Result<()> {
    if x.cols() != input_size {
        return Err(Error::ShapeMismatch(format!(
            "x has {} columns, model input size is {input_size}",
            x.cols()
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Perceptron,
    LinearRegressor,
    Mlp,
}

/// Any model family.
#[derive(Debug, Clone)]
pub enum AnyModel {
    Perceptron(Perceptron),
    LinearRegressor(LinearRegressor),
    Mlp(Mlp),
}

/// Training parameters tagged by model family.
#[derive(Debug, Clone)]
pub enum FitParams {
    Perceptron(PerceptronConfig),
    LinearRegressor,
    Mlp(FitConfig),
}

impl AnyModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            AnyModel::Perceptron(_) => ModelKind::Perceptron,
            AnyModel::LinearRegressor(_) => ModelKind::LinearRegressor,
            AnyModel::Mlp(_) => ModelKind::Mlp,
        }
    }

    pub fn as_mlp(&self) -> Option<&Mlp> {
        match self {
            AnyModel::Mlp(mlp) => Some(mlp),
            _ => None,
        }
    }

    /// Fit with parameters matching this model's family.
    pub fn fit(&mut self, data: &Dataset<'_>, params: &FitParams) -> Result<FitReport> {
        match (self, params) {
            (AnyModel::Perceptron(m), FitParams::Perceptron(cfg)) => m.fit(data, cfg),
            (AnyModel::LinearRegressor(m), FitParams::LinearRegressor) => m.fit(data),
            (AnyModel::Mlp(m), FitParams::Mlp(cfg)) => m.fit(data, cfg),
            (model, _) => Err(Error::InvalidConfig(format!(
                "training parameters do not apply to a {:?} model",
                model.kind()
            ))),
        }
    }

    fn inner(&self) -> &dyn Model {
        match self {
            AnyModel::Perceptron(m) => m,
            AnyModel::LinearRegressor(m) => m,
            AnyModel::Mlp(m) => m,
        }
    }
}

impl Model for AnyModel {
    fn input_size(&self) -> usize {
        self.inner().input_size()
    }

    fn output_size(&self) -> usize {
        self.inner().output_size()
    }

    fn predict_one(&self, x: &[f64]) -> Result<Vec<f64>> {
        self.inner().predict_one(x)
    }

    fn predict_batch(&self, x: MatrixView<'_>) -> Result<Matrix> {
        self.inner().predict_batch(x)
    }

    fn weights(&self) -> Vec<LayerWeights> {
        self.inner().weights()
    }
}

impl From<Perceptron> for AnyModel {
    fn from(value: Perceptron) -> Self {
        AnyModel::Perceptron(value)
    }
}

impl From<LinearRegressor> for AnyModel {
    fn from(value: LinearRegressor) -> Self {
        AnyModel::LinearRegressor(value)
    }
}

impl From<Mlp> for AnyModel {
    fn from(value: Mlp) -> Self {
        AnyModel::Mlp(value)
    }
}
