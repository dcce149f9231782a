//! Binary model persistence for `Mlp`.
//!
//! The on-disk layout is versioned and independent of the in-memory structs. Everything is
//! little-endian:
//!
//! ```text
//! magic      4 bytes  "MLPB"
//! version    u32      1
//! mode       u8       0 = regression, 1 = classification
//! layers     u32      number of dense layers
//! per layer:
//!   in_dim   u32
//!   out_dim  u32
//!   act      u8       0 tanh, 1 sigmoid, 2 relu, 3 identity
//!   weights  f64 x (out_dim * in_dim), row-major (out_dim, in_dim)
//!   biases   f64 x out_dim
//! ```
//!
//! Decoding validates dimensions, chaining, payload lengths and that every parameter is
//! finite. Anything malformed is `Error::CorruptModel`.

use std::fs;
use std::path::Path;

use log::{debug, warn};

use crate::{Activation, Error, Layer, Mlp, Result};

pub const MODEL_MAGIC: [u8; 4] = *b"MLPB";
pub const MODEL_FORMAT_VERSION: u32 = 1;

const MODE_REGRESSION: u8 = 0;
const MODE_CLASSIFICATION: u8 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct SerializedMlp {
    pub format_version: u32,
    pub classification: bool,
    pub layers: Vec<SerializedLayer>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SerializedLayer {
    pub in_dim: usize,
    pub out_dim: usize,
    pub activation: Activation,
    /// Row-major (out_dim, in_dim).
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
}

impl SerializedMlp {
    pub fn validate(&self) -> Result<()> {
        if self.format_version != MODEL_FORMAT_VERSION {
            return Err(Error::CorruptModel(format!(
                "unsupported model format_version {}; expected {}",
                self.format_version, MODEL_FORMAT_VERSION
            )));
        }
        if self.layers.is_empty() {
            return Err(Error::CorruptModel(
                "serialized model must have at least one layer".to_owned(),
            ));
        }

        for (i, layer) in self.layers.iter().enumerate() {
            layer.validate()?;

            if i > 0 {
                let prev_out = self.layers[i - 1].out_dim;
                if layer.in_dim != prev_out {
                    return Err(Error::CorruptModel(format!(
                        "layer {i} in_dim {} does not match previous out_dim {}",
                        layer.in_dim, prev_out
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let params: usize = self
            .layers
            .iter()
            .map(|l| l.weights.len() + l.biases.len())
            .sum();
        let mut out = Vec::with_capacity(13 + self.layers.len() * 9 + params * 8);

        out.extend_from_slice(&MODEL_MAGIC);
        out.extend_from_slice(&self.format_version.to_le_bytes());
        out.push(if self.classification {
            MODE_CLASSIFICATION
        } else {
            MODE_REGRESSION
        });
        out.extend_from_slice(&(self.layers.len() as u32).to_le_bytes());

        for layer in &self.layers {
            out.extend_from_slice(&(layer.in_dim as u32).to_le_bytes());
            out.extend_from_slice(&(layer.out_dim as u32).to_le_bytes());
            out.push(layer.activation.to_tag());
            for v in layer.weights.iter().chain(&layer.biases) {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        out
    }

    /// Parse and validate a serialized model.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = Reader::new(bytes);

        if r.take(4, "magic")? != MODEL_MAGIC {
            return Err(Error::CorruptModel("bad magic".to_owned()));
        }
        let format_version = r.u32("format version")?;
        if format_version != MODEL_FORMAT_VERSION {
            return Err(Error::CorruptModel(format!(
                "unsupported model format_version {format_version}; expected {MODEL_FORMAT_VERSION}"
            )));
        }
        let classification = match r.u8("mode")? {
            MODE_REGRESSION => false,
            MODE_CLASSIFICATION => true,
            other => {
                return Err(Error::CorruptModel(format!("unknown mode {other}")));
            }
        };

        let num_layers = r.u32("layer count")? as usize;
        // Each layer needs at least its 9-byte header; bound the allocation by the input.
        let mut layers = Vec::with_capacity(num_layers.min(r.remaining() / 9));
        for i in 0..num_layers {
            let in_dim = r.u32("in_dim")? as usize;
            let out_dim = r.u32("out_dim")? as usize;
            let activation = Activation::from_tag(r.u8("activation")?)?;
            if in_dim == 0 || out_dim == 0 {
                return Err(Error::CorruptModel(format!(
                    "layer {i} dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
                )));
            }
            let w_len = in_dim
                .checked_mul(out_dim)
                .ok_or_else(|| Error::CorruptModel(format!("layer {i} weight shape overflow")))?;
            let weights = r.f64s(w_len, "weights")?;
            let biases = r.f64s(out_dim, "biases")?;
            layers.push(SerializedLayer {
                in_dim,
                out_dim,
                activation,
                weights,
                biases,
            });
        }

        if r.remaining() != 0 {
            return Err(Error::CorruptModel(format!(
                "{} trailing bytes after model payload",
                r.remaining()
            )));
        }

        let model = Self {
            format_version,
            classification,
            layers,
        };
        model.validate()?;
        Ok(model)
    }
}

impl SerializedLayer {
    fn validate(&self) -> Result<()> {
        if self.in_dim == 0 || self.out_dim == 0 {
            return Err(Error::CorruptModel(format!(
                "layer dims must be > 0, got in_dim={} out_dim={}",
                self.in_dim, self.out_dim
            )));
        }

        let expected_w = self
            .in_dim
            .checked_mul(self.out_dim)
            .ok_or_else(|| Error::CorruptModel("layer weight shape overflow".to_owned()))?;
        if self.weights.len() != expected_w {
            return Err(Error::CorruptModel(format!(
                "weights length {} does not match out_dim * in_dim ({} * {})",
                self.weights.len(),
                self.out_dim,
                self.in_dim
            )));
        }
        if self.biases.len() != self.out_dim {
            return Err(Error::CorruptModel(format!(
                "biases length {} does not match out_dim {}",
                self.biases.len(),
                self.out_dim
            )));
        }

        if self.weights.iter().any(|v| !v.is_finite()) {
            return Err(Error::CorruptModel(
                "weights must contain only finite values".to_owned(),
            ));
        }
        if self.biases.iter().any(|v| !v.is_finite()) {
            return Err(Error::CorruptModel(
                "biases must contain only finite values".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Bounds-checked little-endian cursor.
struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn remaining(&self) -> usize {
        self.bytes.len()
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(Error::CorruptModel(format!(
                "truncated model: need {n} bytes for {what}, {} left",
                self.bytes.len()
            )));
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4, what)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn f64s(&mut self, count: usize, what: &str) -> Result<Vec<f64>> {
        let n_bytes = count
            .checked_mul(8)
            .ok_or_else(|| Error::CorruptModel(format!("{what} length overflow")))?;
        let raw = self.take(n_bytes, what)?;
        Ok(raw
            .chunks_exact(8)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(chunk);
                f64::from_le_bytes(buf)
            })
            .collect())
    }
}

impl From<&Mlp> for SerializedMlp {
    fn from(model: &Mlp) -> Self {
        Self {
            format_version: MODEL_FORMAT_VERSION,
            classification: model.is_classification(),
            layers: model.layers().iter().map(SerializedLayer::from).collect(),
        }
    }
}

impl From<&Layer> for SerializedLayer {
    fn from(layer: &Layer) -> Self {
        Self {
            in_dim: layer.in_dim(),
            out_dim: layer.out_dim(),
            activation: layer.activation(),
            weights: layer.weights().to_vec(),
            biases: layer.biases().to_vec(),
        }
    }
}

impl TryFrom<SerializedMlp> for Mlp {
    type Error = Error;

    fn try_from(value: SerializedMlp) -> std::result::Result<Self, Self::Error> {
        value.validate()?;

        let mut layers = Vec::with_capacity(value.layers.len());
        for (i, layer) in value.layers.into_iter().enumerate() {
            let l = Layer::from_parts(
                layer.in_dim,
                layer.out_dim,
                layer.activation,
                layer.weights,
                layer.biases,
            )
            .map_err(|e| Error::CorruptModel(format!("layer {i} invalid: {e}")))?;
            layers.push(l);
        }

        Mlp::from_layers(layers, value.classification)
            .map_err(|e| Error::CorruptModel(e.to_string()))
    }
}

impl Mlp {
    /// Encode the model in the binary model format.
    pub fn to_bytes(&self) -> Vec<u8> {
        SerializedMlp::from(self).to_bytes()
    }

    /// Decode a model from the binary model format.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        SerializedMlp::from_bytes(bytes)?.try_into()
    }

    /// Write the model to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let p = path.as_ref();
        let bytes = self.to_bytes();
        fs::write(p, &bytes)?;
        debug!("saved mlp ({} bytes) to {}", bytes.len(), p.display());
        Ok(())
    }

    /// Read a model previously written by [`Mlp::save`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let p = path.as_ref();
        let bytes = fs::read(p).map_err(|e| {
            warn!("failed to read model {}: {e}", p.display());
            Error::from(e)
        })?;
        Self::from_bytes(&bytes).map_err(|e| {
            warn!("rejected model file {}: {e}", p.display());
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Model;

    fn small_mlp() -> Mlp {
        let l1 = Layer::from_parts(
            2,
            3,
            Activation::Tanh,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
            vec![0.1, 0.2, 0.3],
        )
        .unwrap();
        let l2 =
            Layer::from_parts(3, 1, Activation::Identity, vec![7.0, 8.0, 9.0], vec![0.4]).unwrap();
        Mlp::from_layers(vec![l1, l2], false).unwrap()
    }

    #[test]
    fn layout_is_stable() {
        let bytes = small_mlp().to_bytes();
        // header + 2 layer headers + 13 parameters
        assert_eq!(bytes.len(), 13 + 2 * 9 + 13 * 8);
        assert_eq!(&bytes[0..4], b"MLPB");
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(bytes[8], 0);
        assert_eq!(&bytes[9..13], &2u32.to_le_bytes());
        assert_eq!(&bytes[13..17], &2u32.to_le_bytes());
        assert_eq!(&bytes[17..21], &3u32.to_le_bytes());
        assert_eq!(bytes[21], 0);
        assert_eq!(&bytes[22..30], &1.0f64.to_le_bytes());
    }

    #[test]
    fn bytes_roundtrip_is_exact() {
        let mlp = Mlp::new_with_seed(&[3, 4, 2], true, 11).unwrap();
        let loaded = Mlp::from_bytes(&mlp.to_bytes()).unwrap();
        assert_eq!(loaded, mlp);
        assert!(loaded.is_classification());
        let x = [0.25, -1.5, 2.0];
        assert_eq!(loaded.predict_one(&x).unwrap(), mlp.predict_one(&x).unwrap());
    }

    #[test]
    fn rejects_malformed_payloads() {
        let good = small_mlp().to_bytes();

        let mut bad_magic = good.clone();
        bad_magic[0] = b'X';

        let mut bad_version = good.clone();
        bad_version[4..8].copy_from_slice(&7u32.to_le_bytes());

        let mut bad_mode = good.clone();
        bad_mode[8] = 9;

        let mut bad_act = good.clone();
        bad_act[21] = 42;

        let mut zero_dim = good.clone();
        zero_dim[13..17].copy_from_slice(&0u32.to_le_bytes());

        let mut nan_weight = good.clone();
        nan_weight[22..30].copy_from_slice(&f64::NAN.to_le_bytes());

        let mut trailing = good.clone();
        trailing.push(0);

        let truncated = &good[..good.len() - 3];

        let mut huge_layers = good.clone();
        huge_layers[9..13].copy_from_slice(&u32::MAX.to_le_bytes());

        for bytes in [
            &bad_magic[..],
            &bad_version[..],
            &bad_mode[..],
            &bad_act[..],
            &zero_dim[..],
            &nan_weight[..],
            &trailing[..],
            truncated,
            &huge_layers[..],
            &[][..],
        ] {
            assert!(
                matches!(Mlp::from_bytes(bytes), Err(Error::CorruptModel(_))),
                "accepted {} bytes",
                bytes.len()
            );
        }
    }

    #[test]
    fn rejects_broken_layer_chain() {
        let mut ser = SerializedMlp::from(&small_mlp());
        ser.layers[1].in_dim = 4;
        ser.layers[1].weights = vec![0.0; 4];
        assert!(matches!(ser.validate(), Err(Error::CorruptModel(_))));
        assert!(matches!(
            Mlp::from_bytes(&ser.to_bytes()),
            Err(Error::CorruptModel(_))
        ));
    }
}
