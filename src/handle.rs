//! Owned model handle with an explicit release.
//!
//! A [`ModelHandle`] goes `Created -> {Trained}* -> Released`. After [`ModelHandle::release`]
//! every operation, including a second release, fails with [`Error::UseAfterRelease`].

use std::path::Path;

use log::debug;

use crate::model::Model;
use crate::{
    AnyModel, Dataset, Error, FitParams, FitReport, LayerWeights, Matrix, MatrixView, Mlp,
    ModelKind, Result,
};

#[derive(Debug)]
pub struct ModelHandle {
    model: Option<AnyModel>,
}

// Handles move between threads behind the C registry.
const _: () = {
    const fn assert_send<T: Send>() {}
    assert_send::<ModelHandle>();
    assert_send::<AnyModel>();
};

impl ModelHandle {
    pub fn new(model: impl Into<AnyModel>) -> Self {
        Self {
            model: Some(model.into()),
        }
    }

    /// Open a handle on a model saved with [`Mlp::save`].
    pub fn load_mlp<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(Mlp::load(path)?))
    }

    #[inline]
    pub fn is_released(&self) -> bool {
        self.model.is_none()
    }

    pub fn get(&self) -> Result<&AnyModel> {
        self.model.as_ref().ok_or(Error::UseAfterRelease)
    }

    pub fn get_mut(&mut self) -> Result<&mut AnyModel> {
        self.model.as_mut().ok_or(Error::UseAfterRelease)
    }

    pub fn kind(&self) -> Result<ModelKind> {
        Ok(self.get()?.kind())
    }

    pub fn input_size(&self) -> Result<usize> {
        Ok(self.get()?.input_size())
    }

    pub fn output_size(&self) -> Result<usize> {
        Ok(self.get()?.output_size())
    }

    pub fn predict_one(&self, x: &[f64]) -> Result<Vec<f64>> {
        self.get()?.predict_one(x)
    }

    pub fn predict_batch(&self, x: MatrixView<'_>) -> Result<Matrix> {
        self.get()?.predict_batch(x)
    }

    /// Train on `(x, y)`. Row counts must agree; on any error the model is unchanged.
    pub fn fit(
        &mut self,
        x: MatrixView<'_>,
        y: MatrixView<'_>,
        params: &FitParams,
    ) -> Result<FitReport> {
        let model = self.get_mut()?;
        let data = Dataset::new(x, y)?;
        model.fit(&data, params)
    }

    pub fn weights(&self) -> Result<Vec<LayerWeights>> {
        Ok(self.get()?.weights())
    }

    /// Persist the model. Only MLPs have an on-disk format.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        match self.get()? {
            AnyModel::Mlp(mlp) => mlp.save(path),
            other => Err(Error::InvalidConfig(format!(
                "{:?} models cannot be saved",
                other.kind()
            ))),
        }
    }

    /// Drop the model. Returns it so callers can keep using it outside the handle.
    pub fn release(&mut self) -> Result<AnyModel> {
        let model = self.model.take().ok_or(Error::UseAfterRelease)?;
        debug!("released {:?} model", model.kind());
        Ok(model)
    }
}
