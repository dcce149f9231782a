//! Borrowed supervised datasets and train/test partitioning.
//!
//! A [`Dataset`] pairs an input matrix (X) with a label matrix (Y). Both are borrowed for the
//! duration of one training call; nothing is retained by the model afterwards.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::{Error, MatrixView, Result};

/// Sample ordering policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Shuffle {
    /// Keep dataset order.
    #[default]
    None,
    /// Deterministic permutation derived from the seed.
    Seeded(u64),
}

impl Shuffle {
    /// Returns `0..len`, permuted according to the policy.
    pub fn order(self, len: usize) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..len).collect();
        if let Shuffle::Seeded(seed) = self {
            let mut rng = StdRng::seed_from_u64(seed);
            idx.shuffle(&mut rng);
        }
        idx
    }
}

/// Inputs (X) and targets (Y) with matching row counts.
///
/// Row `i` of `x` is the sample whose label is row `i` of `y`.
#[derive(Debug, Clone, Copy)]
pub struct Dataset<'a> {
    x: MatrixView<'a>,
    y: MatrixView<'a>,
}

impl<'a> Dataset<'a> {
    pub fn new(x: MatrixView<'a>, y: MatrixView<'a>) -> Result<Self> {
        if x.rows() != y.rows() {
            return Err(Error::ShapeMismatch(format!(
                "x has {} rows but y has {} rows",
                x.rows(),
                y.rows()
            )));
        }
        Ok(Self { x, y })
    }

    /// Build a dataset from flat row-major buffers.
    pub fn from_flat(
        x: &'a [f64],
        x_rows: usize,
        x_cols: usize,
        y: &'a [f64],
        y_rows: usize,
        y_cols: usize,
    ) -> Result<Self> {
        Self::new(
            MatrixView::new(x, x_rows, x_cols)?,
            MatrixView::new(y, y_rows, y_cols)?,
        )
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.x.rows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.x.cols()
    }

    #[inline]
    pub fn target_dim(&self) -> usize {
        self.y.cols()
    }

    #[inline]
    pub fn inputs(&self) -> MatrixView<'a> {
        self.x
    }

    #[inline]
    pub fn targets(&self) -> MatrixView<'a> {
        self.y
    }

    #[inline]
    pub fn input(&self, idx: usize) -> &'a [f64] {
        self.x.row(idx)
    }

    #[inline]
    pub fn target(&self, idx: usize) -> &'a [f64] {
        self.y.row(idx)
    }

    /// Checks the dataset against a model's declared input/output widths.
    pub(crate) fn check_dims(&self, input_dim: usize, output_dim: usize) -> Result<()> {
        if self.is_empty() {
            return Err(Error::ShapeMismatch(
                "training data must contain at least one row".to_owned(),
            ));
        }
        if self.input_dim() != input_dim {
            return Err(Error::ShapeMismatch(format!(
                "x has {} columns, model input size is {input_dim}",
                self.input_dim()
            )));
        }
        if self.target_dim() != output_dim {
            return Err(Error::ShapeMismatch(format!(
                "y has {} columns, model output size is {output_dim}",
                self.target_dim()
            )));
        }
        Ok(())
    }

    /// Partition row indices into a training subset and a held-out subset.
    ///
    /// The first `floor(len * train_proportion)` rows of the `shuffle` order form the training
    /// subset. The same arguments always produce the same partition.
    pub fn split(&self, train_proportion: f64, shuffle: Shuffle) -> Result<Split> {
        if !(train_proportion > 0.0 && train_proportion <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "train_proportion must be in (0, 1], got {train_proportion}"
            )));
        }
        let train_count = (self.len() as f64 * train_proportion).floor() as usize;
        if train_count == 0 {
            return Err(Error::InvalidConfig(format!(
                "train_proportion {train_proportion} leaves no training rows out of {}",
                self.len()
            )));
        }

        let mut train = shuffle.order(self.len());
        let test = train.split_off(train_count.min(self.len()));
        Ok(Split { train, test })
    }
}

/// Row indices of a train/test partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}
