//! Model builder.
//!
//! `MlpBuilder` makes model structure explicit (layer sizes + activations) and chooses a
//! default weight initializer for each activation:
//!
//! - `tanh` / `sigmoid` / `identity`: Xavier/Glorot
//! - `relu`: He/Kaiming
//!
//! [`MlpBuilder::from_sizes`] applies the standard layout: `tanh` hidden layers, and a
//! `tanh` output in classification mode or an identity output in regression mode.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{Activation, Error, Init, Layer, Mlp, Result};

#[derive(Debug, Clone, Copy)]
struct LayerSpec {
    out_dim: usize,
    activation: Activation,
}

#[derive(Debug, Clone)]
/// Builder for an `Mlp`.
///
/// Example:
///
/// ```rust
/// use ml_lib::{Activation, MlpBuilder};
///
/// # fn main() -> ml_lib::Result<()> {
/// let mlp = MlpBuilder::new(2)?
///     .add_layer(8, Activation::ReLU)?
///     .add_layer(1, Activation::Tanh)?
///     .classification(true)
///     .build_with_seed(0)?;
/// assert_eq!(mlp.layer_sizes(), vec![2, 8, 1]);
/// # Ok(())
/// # }
/// ```
pub struct MlpBuilder {
    input_dim: usize,
    layers: Vec<LayerSpec>,
    classification: bool,
    init: Option<Init>,
}

impl MlpBuilder {
    /// Start building an MLP that accepts inputs of length `input_dim`.
    pub fn new(input_dim: usize) -> Result<Self> {
        if input_dim == 0 {
            return Err(Error::InvalidConfig("input_dim must be > 0".to_owned()));
        }
        Ok(Self {
            input_dim,
            layers: Vec::new(),
            classification: false,
            init: None,
        })
    }

    /// Standard layout from a neuron-count list.
    ///
    /// `sizes` includes input and output dimensions, so its length must be at least 2.
    pub fn from_sizes(sizes: &[usize], classification: bool) -> Result<Self> {
        if sizes.len() < 2 {
            return Err(Error::InvalidConfig(
                "sizes must include input and output dims".to_owned(),
            ));
        }
        if sizes.contains(&0) {
            return Err(Error::InvalidConfig(
                "all layer sizes must be > 0".to_owned(),
            ));
        }

        let last = sizes.len() - 2;
        let mut b = Self::new(sizes[0])?.classification(classification);
        for (idx, &out_dim) in sizes[1..].iter().enumerate() {
            let act = if idx < last || classification {
                Activation::Tanh
            } else {
                Activation::Identity
            };
            b = b.add_layer(out_dim, act)?;
        }
        Ok(b)
    }

    /// Add a dense layer with `out_dim` outputs.
    pub fn add_layer(mut self, out_dim: usize, activation: Activation) -> Result<Self> {
        if out_dim == 0 {
            return Err(Error::InvalidConfig("layer out_dim must be > 0".to_owned()));
        }
        self.layers.push(LayerSpec {
            out_dim,
            activation,
        });
        Ok(self)
    }

    /// Mark the network as a classifier (recorded in the model and persisted).
    pub fn classification(mut self, classification: bool) -> Self {
        self.classification = classification;
        self
    }

    /// Use one initializer for every layer instead of the per-activation default.
    pub fn init(mut self, init: Init) -> Self {
        self.init = Some(init);
        self
    }

    /// Build using a deterministic seed.
    pub fn build_with_seed(self, seed: u64) -> Result<Mlp> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with_rng(&mut rng)
    }

    /// Build using the provided RNG.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Mlp> {
        if self.layers.is_empty() {
            return Err(Error::InvalidConfig(
                "mlp must have at least one layer".to_owned(),
            ));
        }

        let mut layers = Vec::with_capacity(self.layers.len());
        let mut in_dim = self.input_dim;
        for spec in self.layers {
            let init = self
                .init
                .unwrap_or_else(|| Init::for_activation(spec.activation));
            let layer = Layer::new_with_rng(in_dim, spec.out_dim, init, spec.activation, rng)?;
            layers.push(layer);
            in_dim = spec.out_dim;
        }

        Mlp::from_layers(layers, self.classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_sizes_rejects_degenerate_layouts() {
        assert!(matches!(
            MlpBuilder::from_sizes(&[3], false),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            MlpBuilder::from_sizes(&[3, 0, 1], false),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            MlpBuilder::new(2).unwrap().build_with_seed(0),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn single_layer_network_uses_mode_for_output() {
        let reg = MlpBuilder::from_sizes(&[2, 1], false)
            .unwrap()
            .build_with_seed(0)
            .unwrap();
        assert_eq!(reg.layer(0).unwrap().activation(), Activation::Identity);
        assert!(!reg.is_classification());

        let clf = MlpBuilder::from_sizes(&[2, 1], true)
            .unwrap()
            .build_with_seed(0)
            .unwrap();
        assert_eq!(clf.layer(0).unwrap().activation(), Activation::Tanh);
        assert!(clf.is_classification());
    }

    #[test]
    fn zeros_init_override() {
        let mlp = MlpBuilder::new(3)
            .unwrap()
            .add_layer(4, Activation::ReLU)
            .unwrap()
            .add_layer(2, Activation::Identity)
            .unwrap()
            .init(Init::Zeros)
            .build_with_seed(7)
            .unwrap();
        assert!(mlp.layers().iter().all(|l| l.weights().iter().all(|&w| w == 0.0)));
    }
}
