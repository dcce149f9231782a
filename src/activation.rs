//! Activation functions.
//!
//! A dense layer computes a pre-activation value `z = W x + b` and then applies an
//! activation function element-wise: `y = activation(z)`.
//!
//! The post-activation outputs `y` are cached in `Scratch`. During backprop we compute
//! `dL/dz` from `dL/dy` using `y` alone, so no separate `z` buffer is needed.

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Element-wise activation function.
pub enum Activation {
    Tanh,
    Sigmoid,
    ReLU,
    Identity,
}

impl Activation {
    /// Tag written to model files.
    pub(crate) fn to_tag(self) -> u8 {
        match self {
            Activation::Tanh => 0,
            Activation::Sigmoid => 1,
            Activation::ReLU => 2,
            Activation::Identity => 3,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Activation::Tanh),
            1 => Ok(Activation::Sigmoid),
            2 => Ok(Activation::ReLU),
            3 => Ok(Activation::Identity),
            other => Err(Error::CorruptModel(format!(
                "unknown activation tag {other}"
            ))),
        }
    }

    #[inline]
    pub(crate) fn forward(self, x: f64) -> f64 {
        match self {
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => sigmoid(x),
            Activation::ReLU => x.max(0.0),
            Activation::Identity => x,
        }
    }

    /// Derivative of the activation with respect to its input, expressed in terms
    /// of the cached post-activation output `y`.
    #[inline]
    pub(crate) fn grad_from_output(self, y: f64) -> f64 {
        match self {
            Activation::Tanh => 1.0 - y * y,
            Activation::Sigmoid => y * (1.0 - y),
            Activation::ReLU => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Identity => 1.0,
        }
    }
}

#[inline]
fn sigmoid(x: f64) -> f64 {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigmoid_basic_values() {
        let y0 = Activation::Sigmoid.forward(0.0);
        assert!((y0 - 0.5).abs() < 1e-12);

        let y_pos = Activation::Sigmoid.forward(40.0);
        let y_neg = Activation::Sigmoid.forward(-40.0);
        assert!(y_pos > 0.999 && y_pos.is_finite());
        assert!(y_neg < 0.001 && y_neg.is_finite());
    }

    #[test]
    fn tanh_and_sigmoid_gradients_from_output() {
        let y_tanh = Activation::Tanh.forward(0.3);
        let g_tanh = Activation::Tanh.grad_from_output(y_tanh);
        assert!((g_tanh - (1.0 - y_tanh * y_tanh)).abs() < 1e-12);

        let y_sig = Activation::Sigmoid.forward(0.0);
        assert!((Activation::Sigmoid.grad_from_output(y_sig) - 0.25).abs() < 1e-12);

        assert_eq!(Activation::ReLU.grad_from_output(0.0), 0.0);
        assert_eq!(Activation::ReLU.grad_from_output(2.0), 1.0);
        assert_eq!(Activation::Identity.grad_from_output(-7.0), 1.0);
    }

    #[test]
    fn tags_are_stable() {
        for act in [
            Activation::Tanh,
            Activation::Sigmoid,
            Activation::ReLU,
            Activation::Identity,
        ] {
            assert_eq!(Activation::from_tag(act.to_tag()).unwrap(), act);
        }
        assert!(matches!(
            Activation::from_tag(9),
            Err(Error::CorruptModel(_))
        ));
    }
}
