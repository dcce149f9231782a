//! A small machine-learning runtime: perceptron, linear regression and MLP.
//!
//! `ml-lib` implements three model families over dynamically shaped `f64` matrices, with
//! training, single-sample and batch inference, weight introspection, binary persistence for
//! MLPs, and an owned handle type whose release is explicit and checked.
//!
//! # Panics vs `Result`
//!
//! This crate exposes two layers of API:
//!
//! - Low-level hot path (panics on misuse):
//!   - [`Mlp::forward`], [`Mlp::backward`], [`Layer::forward`], [`Layer::backward`]
//!     Shape mismatches are treated as programmer error and will panic via `assert!`.
//!
//! - Model APIs (shape-checked):
//!   - [`Model::predict_one`], [`Model::predict_batch`], [`Trainable::fit`], [`Mlp::load`]
//!     These validate inputs and return [`Result`].
//!
//! # Data layout and shapes
//!
//! - Scalars are `f64`.
//! - [`Matrix`] / [`MatrixView`] store rows contiguously in row-major layout.
//! - Layer weights are row-major with shape `(out_dim, in_dim)`.
//! - A failed `fit` leaves the model exactly as it was before the call.
//!
//! # Quick start
//!
//! ```rust
//! use ml_lib::{Dataset, FitConfig, Mlp, Model};
//!
//! # fn main() -> ml_lib::Result<()> {
//! let x = [0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0];
//! let y = [-1.0, 1.0, 1.0, -1.0];
//! let data = Dataset::from_flat(&x, 4, 2, &y, 4, 1)?;
//!
//! let mut mlp = Mlp::new_with_seed(&[2, 8, 1], true, 0)?;
//! let report = mlp.fit(
//!     &data,
//!     &FitConfig {
//!         num_iter: 2000,
//!         learning_rate: 0.05,
//!         ..FitConfig::default()
//!     },
//! )?;
//! assert!(report.train_errors.len() <= 100);
//!
//! let out = mlp.predict_batch(data.inputs())?;
//! assert_eq!(out.shape(), (4, 1));
//! # Ok(())
//! # }
//! ```
//!
//! Logging goes through the `log` facade; the crate installs no logger.

pub mod activation;
pub mod builder;
pub mod data;
pub mod error;
pub mod ffi;
pub mod handle;
pub mod layer;
pub(crate) mod linalg;
pub mod linear;
pub mod loss;
pub mod matrix;
pub mod mlp;
pub mod model;
pub mod perceptron;
pub mod persist;
pub mod train;

pub use activation::Activation;
pub use builder::MlpBuilder;
pub use data::{Dataset, Shuffle, Split};
pub use error::{Error, ErrorKind, Result};
pub use handle::ModelHandle;
pub use layer::{Init, Layer};
pub use linear::LinearRegressor;
pub use matrix::{Matrix, MatrixView};
pub use mlp::{Gradients, Mlp, Scratch, Trainer};
pub use model::{AnyModel, FitParams, LayerWeights, Model, ModelKind, Trainable};
pub use perceptron::{Perceptron, PerceptronConfig, UpdateRule};
pub use persist::{SerializedLayer, SerializedMlp};
pub use train::{FitConfig, FitReport};
