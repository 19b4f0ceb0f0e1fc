//! Model persistence.
//!
//! Two formats are supported:
//!
//! - A compact binary checkpoint holding the parameters of every dense layer
//!   (little-endian, written through [`StreamWriter`]):
//!
//!   ```text
//!   magic   b"FFNW"
//!   version u32
//!   count   u64                      dense layers
//!   repeat count times:
//!     weights  rows u64, cols u64, rows*cols f64 (row-major)
//!     biases   len u64, len f64
//!     activation code u32
//!   ```
//!
//!   Dropout layers carry no parameters and are not stored.
//!
//! - A versioned JSON document describing the full layer stack (feature: `serde`).
//!
//! Loading parses and validates a whole checkpoint before touching the model, so a
//! failed load leaves it unchanged.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::debug;

use crate::stream::{StreamReader, StreamWriter};
use crate::{Activation, Dense, Error, Layer, Model, Result};

pub const MAGIC: [u8; 4] = *b"FFNW";
pub const FORMAT_VERSION: u32 = 1;

/// Upper bound on the layer count field.
const MAX_LAYERS: u64 = 1 << 16;

#[derive(Debug)]
struct DenseParams {
    out_dim: usize,
    in_dim: usize,
    weights: Vec<f64>,
    biases: Vec<f64>,
    activation: Activation,
}

fn write_checkpoint<W: Write>(model: &Model, writer: &mut StreamWriter<W>) -> Result<()> {
    writer.write_bytes(&MAGIC)?;
    writer.write_u32(FORMAT_VERSION)?;
    writer.write_u64(model.dense_layers().count() as u64)?;
    for layer in model.dense_layers() {
        writer.write_matrix(layer.out_dim(), layer.in_dim(), layer.weights())?;
        writer.write_vector(layer.biases())?;
        writer.write_u32(layer.activation().code())?;
    }
    Ok(())
}

fn read_checkpoint<R: Read>(reader: &mut StreamReader<R>) -> Result<Vec<DenseParams>> {
    let mut magic = [0u8; 4];
    reader.read_bytes(&mut magic)?;
    if magic != MAGIC {
        return Err(Error::Format(format!("bad checkpoint magic {magic:?}")));
    }
    let version = reader.read_u32()?;
    if version != FORMAT_VERSION {
        return Err(Error::Format(format!(
            "unsupported checkpoint version {version}; expected {FORMAT_VERSION}"
        )));
    }

    let count = reader.read_u64()?;
    if count == 0 || count > MAX_LAYERS {
        return Err(Error::Format(format!("invalid dense layer count {count}")));
    }

    let mut layers = Vec::new();
    for i in 0..count {
        let (out_dim, in_dim, weights) = reader.read_matrix()?;
        let biases = reader.read_vector()?;
        let activation = Activation::from_code(reader.read_u32()?)?;

        if out_dim == 0 || in_dim == 0 {
            return Err(Error::Format(format!(
                "layer {i} has empty weight shape {out_dim}x{in_dim}"
            )));
        }
        if biases.len() != out_dim {
            return Err(Error::Format(format!(
                "layer {i} biases length {} does not match rows {out_dim}",
                biases.len()
            )));
        }
        if weights.iter().chain(&biases).any(|v| !v.is_finite()) {
            return Err(Error::Format(format!("layer {i} has non-finite parameters")));
        }

        layers.push(DenseParams {
            out_dim,
            in_dim,
            weights,
            biases,
            activation,
        });
    }
    Ok(layers)
}

impl Model {
    /// Write a binary checkpoint of every dense layer's parameters.
    pub fn save_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = StreamWriter::new(writer);
        write_checkpoint(self, &mut writer)?;
        writer.flush()
    }

    /// Write a binary checkpoint to `path`, creating or truncating the file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.save_to(BufWriter::new(File::create(path)?))?;
        debug!(
            "saved {} dense layers to {}",
            self.dense_layers().count(),
            path.display()
        );
        Ok(())
    }

    /// Overwrite this model's parameters from a binary checkpoint.
    ///
    /// The checkpoint must match the model's architecture: same number of dense
    /// layers, and for each the same weight shape, bias length and activation.
    /// Otherwise [`Error::Format`] is returned and the model is left unchanged.
    /// On success every optimizer state is reset and pending caches are dropped.
    pub fn load_parameters_from<R: Read>(&mut self, reader: R) -> Result<()> {
        let params = read_checkpoint(&mut StreamReader::new(reader))?;

        let expected = self.dense_layers().count();
        if params.len() != expected {
            return Err(Error::Format(format!(
                "checkpoint has {} dense layers, model has {expected}",
                params.len()
            )));
        }
        for (i, (layer, p)) in self.dense_layers().zip(&params).enumerate() {
            if (p.out_dim, p.in_dim) != (layer.out_dim(), layer.in_dim()) {
                return Err(Error::Format(format!(
                    "layer {i} shape {}x{} does not match model {}x{}",
                    p.out_dim,
                    p.in_dim,
                    layer.out_dim(),
                    layer.in_dim()
                )));
            }
            if p.activation != layer.activation() {
                return Err(Error::Format(format!(
                    "layer {i} activation {} does not match model {}",
                    p.activation,
                    layer.activation()
                )));
            }
        }

        for (layer, p) in self.dense_layers_mut().zip(params) {
            layer.set_params(p.weights, p.biases);
        }
        self.clear_caches();
        Ok(())
    }

    pub fn load_parameters<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.load_parameters_from(BufReader::new(File::open(path)?))?;
        debug!("loaded parameters from {}", path.display());
        Ok(())
    }

    /// Build a new dense-only model from a binary checkpoint.
    pub fn load_from<R: Read>(reader: R) -> Result<Self> {
        let params = read_checkpoint(&mut StreamReader::new(reader))?;

        let mut layers = Vec::with_capacity(params.len());
        for p in params {
            let layer = Dense::from_parts(p.in_dim, p.out_dim, p.activation, p.weights, p.biases)?;
            layers.push(Layer::Dense(layer));
        }
        Model::from_layers(layers).map_err(|e| Error::Format(format!("invalid checkpoint: {e}")))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let model = Self::load_from(BufReader::new(File::open(path)?))?;
        debug!(
            "loaded {}-layer model from {}",
            model.num_layers(),
            path.display()
        );
        Ok(model)
    }
}

#[cfg(feature = "serde")]
pub use json::{SerializedLayer, SerializedModel, JSON_FORMAT_VERSION};

#[cfg(feature = "serde")]
mod json {
    //! JSON model documents.
    //!
    //! The document is a stable description of the layer stack, not a dump of the
    //! internal structs. Deserialization validates dims, parameter lengths, layer
    //! chaining and finiteness.

    use std::path::Path;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde::{Deserialize, Serialize};

    use crate::{Activation, Dense, Dropout, Error, Layer, Model, Result};

    pub const JSON_FORMAT_VERSION: u32 = 1;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct SerializedModel {
        pub format_version: u32,
        pub layers: Vec<SerializedLayer>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "kind", rename_all = "snake_case")]
    pub enum SerializedLayer {
        Dense {
            in_dim: usize,
            out_dim: usize,
            activation: Activation,
            /// Row-major (out_dim, in_dim).
            weights: Vec<f64>,
            biases: Vec<f64>,
        },
        Dropout {
            dim: usize,
            rate: f64,
        },
    }

    impl From<&Layer> for SerializedLayer {
        fn from(layer: &Layer) -> Self {
            match layer {
                Layer::Dense(l) => SerializedLayer::Dense {
                    in_dim: l.in_dim(),
                    out_dim: l.out_dim(),
                    activation: l.activation(),
                    weights: l.weights().to_vec(),
                    biases: l.biases().to_vec(),
                },
                Layer::Dropout(l) => SerializedLayer::Dropout {
                    dim: l.dim(),
                    rate: l.rate(),
                },
            }
        }
    }

    impl From<&Model> for SerializedModel {
        fn from(model: &Model) -> Self {
            Self {
                format_version: JSON_FORMAT_VERSION,
                layers: model.layers().iter().map(SerializedLayer::from).collect(),
            }
        }
    }

    impl SerializedModel {
        /// Rebuild a model; dropout layers draw their mask RNG seeds from `rng`.
        pub fn into_model_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Model> {
            if self.format_version != JSON_FORMAT_VERSION {
                return Err(Error::Format(format!(
                    "unsupported model format_version {}; expected {JSON_FORMAT_VERSION}",
                    self.format_version
                )));
            }

            let mut layers = Vec::with_capacity(self.layers.len());
            for (i, layer) in self.layers.into_iter().enumerate() {
                let layer = match layer {
                    SerializedLayer::Dense {
                        in_dim,
                        out_dim,
                        activation,
                        weights,
                        biases,
                    } => Dense::from_parts(in_dim, out_dim, activation, weights, biases)
                        .map(Layer::Dense),
                    SerializedLayer::Dropout { dim, rate } => {
                        Dropout::new_with_rng(dim, rate, rng).map(Layer::Dropout)
                    }
                };
                layers.push(layer.map_err(|e| Error::Format(format!("layer {i} invalid: {e}")))?);
            }

            Model::from_layers(layers).map_err(|e| Error::Format(format!("invalid model: {e}")))
        }
    }

    impl TryFrom<SerializedModel> for Model {
        type Error = Error;

        /// Dropout layers are reseeded deterministically (seed 0).
        fn try_from(value: SerializedModel) -> std::result::Result<Self, Self::Error> {
            value.into_model_with_rng(&mut StdRng::seed_from_u64(0))
        }
    }

    impl Model {
        /// Serialize the model to a pretty-printed JSON string.
        pub fn to_json_string_pretty(&self) -> Result<String> {
            serde_json::to_string_pretty(&SerializedModel::from(self))
                .map_err(|e| Error::Format(format!("failed to serialize model: {e}")))
        }

        /// Serialize the model to a compact JSON string.
        pub fn to_json_string(&self) -> Result<String> {
            serde_json::to_string(&SerializedModel::from(self))
                .map_err(|e| Error::Format(format!("failed to serialize model: {e}")))
        }

        /// Parse a model from a JSON string.
        pub fn from_json_str(s: &str) -> Result<Self> {
            let ser: SerializedModel = serde_json::from_str(s)
                .map_err(|e| Error::Format(format!("failed to parse model json: {e}")))?;
            ser.try_into()
        }

        /// Save the model to a JSON file (pretty-printed).
        pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
            std::fs::write(path, self.to_json_string_pretty()?)?;
            Ok(())
        }

        pub fn load_json<P: AsRef<Path>>(path: P) -> Result<Self> {
            Self::from_json_str(&std::fs::read_to_string(path)?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Loss, Optimizer, OptimizerState};

    fn model(seed: u64) -> Model {
        Model::new_with_seed(&[3, 4, 2], &[Activation::Tanh, Activation::Softmax], seed).unwrap()
    }

    fn checkpoint(model: &Model) -> Vec<u8> {
        let mut buf = Vec::new();
        model.save_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn header_is_magic_then_version() {
        let buf = checkpoint(&model(0));
        assert_eq!(&buf[..4], b"FFNW");
        assert_eq!(&buf[4..8], &1u32.to_le_bytes());
        assert_eq!(&buf[8..16], &2u64.to_le_bytes());
    }

    #[test]
    fn load_parameters_restores_bit_identical_outputs() {
        let source = model(1);
        let mut target = model(2);
        let x = [0.25, -1.5, 3.0];
        assert_ne!(source.forward(&x), target.forward(&x));

        target.load_parameters_from(checkpoint(&source).as_slice()).unwrap();
        let a = source.forward(&x);
        let b = target.forward(&x);
        for (u, v) in a.iter().zip(&b) {
            assert_eq!(u.to_bits(), v.to_bits());
        }
    }

    #[test]
    fn load_resets_optimizer_state() {
        let source = model(1);
        let mut target = model(2);
        target
            .train_step(&[1.0, 0.0, 0.0], &[1.0, 0.0], Loss::CrossEntropy, Optimizer::adam(0.01))
            .unwrap();
        target.load_parameters_from(checkpoint(&source).as_slice()).unwrap();
        assert!(target
            .dense_layers()
            .all(|l| *l.weight_state() == OptimizerState::None
                && *l.bias_state() == OptimizerState::None));
    }

    #[test]
    fn mismatched_architecture_leaves_model_unchanged() {
        let other = Model::new_with_seed(&[3, 5, 2], &[Activation::Tanh, Activation::Softmax], 0)
            .unwrap();
        let mut target = model(2);
        let before = target.forward(&[1.0, 2.0, 3.0]);

        let err = target
            .load_parameters_from(checkpoint(&other).as_slice())
            .unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert_eq!(target.forward(&[1.0, 2.0, 3.0]), before);

        let relu = Model::new_with_seed(&[3, 4, 2], &[Activation::ReLU, Activation::Softmax], 0)
            .unwrap();
        assert!(matches!(
            target.load_parameters_from(checkpoint(&relu).as_slice()),
            Err(Error::Format(_))
        ));
    }

    #[test]
    fn corrupt_checkpoints_are_rejected() {
        let buf = checkpoint(&model(3));
        let mut target = model(4);

        let mut bad_magic = buf.clone();
        bad_magic[0] = b'X';
        assert!(matches!(
            target.load_parameters_from(bad_magic.as_slice()),
            Err(Error::Format(_))
        ));

        let truncated = &buf[..buf.len() - 5];
        assert!(matches!(
            target.load_parameters_from(truncated),
            Err(Error::Format(_))
        ));

        // The last four bytes are the output layer's activation code.
        let mut bad_code = buf.clone();
        let n = bad_code.len();
        bad_code[n - 4..].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            target.load_parameters_from(bad_code.as_slice()),
            Err(Error::UnknownActivation(99))
        ));
    }

    #[test]
    fn load_builds_fresh_model() {
        let source = model(5);
        let loaded = Model::load_from(checkpoint(&source).as_slice()).unwrap();
        assert_eq!(loaded.num_layers(), 2);
        assert_eq!(loaded.forward(&[0.1, 0.2, 0.3]), source.forward(&[0.1, 0.2, 0.3]));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_roundtrip_keeps_layer_kinds() {
        let dense = Dense::from_parts(2, 2, Activation::ReLU, vec![0.5, -1.0, 2.0, 0.25], vec![0.0, 1.0])
            .unwrap();
        use rand::SeedableRng;
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let dropout = crate::Dropout::new_with_rng(2, 0.5, &mut rng).unwrap();
        let out = Dense::from_parts(2, 1, Activation::Identity, vec![1.0, 1.0], vec![0.0]).unwrap();
        let model = Model::from_layers(vec![dense.into(), dropout.into(), out.into()]).unwrap();

        let json = model.to_json_string_pretty().unwrap();
        assert!(json.contains("\"kind\": \"dropout\""));
        assert!(json.contains("\"activation\": \"relu\""));

        let loaded = Model::from_json_str(&json).unwrap();
        assert_eq!(loaded.num_layers(), 3);
        assert_eq!(loaded.forward(&[1.0, 2.0]), model.forward(&[1.0, 2.0]));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_rejects_unknown_version_and_bad_chaining() {
        let err = Model::from_json_str(r#"{"format_version":999,"layers":[]}"#).unwrap_err();
        assert!(format!("{err}").contains("format_version"));

        let unchained = r#"{"format_version":1,"layers":[
            {"kind":"dense","in_dim":1,"out_dim":2,"activation":"identity","weights":[1.0,1.0],"biases":[0.0,0.0]},
            {"kind":"dropout","dim":3,"rate":0.1}
        ]}"#;
        assert!(matches!(Model::from_json_str(unchained), Err(Error::Format(_))));
    }
}
