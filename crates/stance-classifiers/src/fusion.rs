//! Fusion of embeddings and linguistic features into class logits
//!
//! Two architectures are available, chosen by [`FusionSpec`] when a model is
//! built:
//! - `concat_dense`: concatenate both vectors, dense hidden layer with ReLU,
//!   output layer
//! - `gated_attention`: tanh projections of each modality mixed by a learned
//!   sigmoid gate, output layer
//!
//! Parameters are plain named tensors so that the same head can be rebuilt
//! from an artifact for inference or from trainable variables for training.

use crate::device::candle_err;
use crate::features::{FeatureSlot, FEATURE_DIM};
use candle_core::{Device, Tensor};
use candle_nn::{Linear, Module};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use stance_core::{Error, Result, StanceLabel};
use std::collections::BTreeMap;
use std::fmt;

/// Fusion architecture identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionArchitecture {
    ConcatDense,
    GatedAttention,
}

impl FusionArchitecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConcatDense => "concat_dense",
            Self::GatedAttention => "gated_attention",
        }
    }
}

impl fmt::Display for FusionArchitecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fusion head configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionSpec {
    pub architecture: FusionArchitecture,
    #[serde(default = "default_hidden_dim")]
    pub hidden_dim: usize,
}

fn default_hidden_dim() -> usize {
    32
}

impl Default for FusionSpec {
    fn default() -> Self {
        Self {
            architecture: FusionArchitecture::ConcatDense,
            hidden_dim: default_hidden_dim(),
        }
    }
}

impl FusionSpec {
    pub fn new(architecture: FusionArchitecture, hidden_dim: usize) -> Self {
        Self {
            architecture,
            hidden_dim,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hidden_dim == 0 {
            return Err(Error::config("fusion hidden_dim must be positive"));
        }
        Ok(())
    }

    /// Names and shapes of every parameter, in a fixed order
    pub fn parameter_shapes(&self, embedding_dim: usize) -> Vec<(&'static str, Vec<usize>)> {
        let h = self.hidden_dim;
        let e = embedding_dim;
        let f = FEATURE_DIM;
        let c = StanceLabel::COUNT;
        match self.architecture {
            FusionArchitecture::ConcatDense => vec![
                ("fc1.weight", vec![h, e + f]),
                ("fc1.bias", vec![h]),
                ("fc2.weight", vec![c, h]),
                ("fc2.bias", vec![c]),
            ],
            FusionArchitecture::GatedAttention => vec![
                ("emb_proj.weight", vec![h, e]),
                ("emb_proj.bias", vec![h]),
                ("feat_proj.weight", vec![h, f]),
                ("feat_proj.bias", vec![h]),
                ("gate.weight", vec![h, e + f]),
                ("gate.bias", vec![h]),
                ("out.weight", vec![c, h]),
                ("out.bias", vec![c]),
            ],
        }
    }
}

/// A named parameter tensor in host memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterTensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl ParameterTensor {
    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            values: vec![0.0; len],
        }
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Copy a device tensor back to host memory
    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        let shape = tensor.dims().to_vec();
        let values = tensor
            .flatten_all()
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(candle_err("failed to read parameter"))?;
        Ok(Self { shape, values })
    }

    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Tensor::from_vec(self.values.clone(), self.shape.as_slice(), device)
            .map_err(candle_err("failed to build parameter tensor"))
    }

    fn set(&mut self, row: usize, col: usize, value: f32) {
        let cols = self.shape.get(1).copied().unwrap_or(1);
        self.values[row * cols + col] = value;
    }
}

/// Named parameters of a fusion head
pub type Parameters = BTreeMap<String, ParameterTensor>;

/// Forward pass shared by all fusion heads
pub trait FusionLayer: Send + Sync {
    /// Map `(N, E)` embeddings and `(N, F)` features to `(N, 4)` logits
    fn forward(&self, embeddings: &Tensor, features: &Tensor) -> candle_core::Result<Tensor>;
}

/// Concatenate, dense + ReLU, output
pub struct ConcatDense {
    fc1: Linear,
    fc2: Linear,
}

impl FusionLayer for ConcatDense {
    fn forward(&self, embeddings: &Tensor, features: &Tensor) -> candle_core::Result<Tensor> {
        let x = Tensor::cat(&[embeddings, features], 1)?;
        let hidden = self.fc1.forward(&x)?.relu()?;
        self.fc2.forward(&hidden)
    }
}

/// Sigmoid-gated mix of per-modality tanh projections
pub struct GatedAttention {
    emb_proj: Linear,
    feat_proj: Linear,
    gate: Linear,
    out: Linear,
}

fn sigmoid(x: &Tensor) -> candle_core::Result<Tensor> {
    x.neg()?.exp()?.affine(1.0, 1.0)?.recip()
}

impl FusionLayer for GatedAttention {
    fn forward(&self, embeddings: &Tensor, features: &Tensor) -> candle_core::Result<Tensor> {
        let emb = self.emb_proj.forward(embeddings)?.tanh()?;
        let feat = self.feat_proj.forward(features)?.tanh()?;
        let joint = Tensor::cat(&[embeddings, features], 1)?;
        let g = sigmoid(&self.gate.forward(&joint)?)?;
        let mixed = g.mul(&emb)?.add(&g.affine(-1.0, 1.0)?.mul(&feat)?)?;
        self.out.forward(&mixed)
    }
}

/// A fusion head built for one architecture
pub enum FusionHead {
    ConcatDense(ConcatDense),
    GatedAttention(GatedAttention),
}

impl FusionHead {
    /// Build a head from named tensors, checking names and shapes
    pub fn from_tensors(
        spec: &FusionSpec,
        embedding_dim: usize,
        tensors: &BTreeMap<String, Tensor>,
    ) -> Result<Self> {
        for (name, shape) in spec.parameter_shapes(embedding_dim) {
            let tensor = tensors
                .get(name)
                .ok_or_else(|| Error::artifact(format!("missing parameter `{name}`")))?;
            if tensor.dims() != shape.as_slice() {
                return Err(Error::artifact(format!(
                    "parameter `{name}` has shape {:?}, expected {:?}",
                    tensor.dims(),
                    shape
                )));
            }
        }

        let linear = |prefix: &str| -> Result<Linear> {
            let weight = tensors
                .get(&format!("{prefix}.weight"))
                .ok_or_else(|| Error::artifact(format!("missing parameter `{prefix}.weight`")))?;
            let bias = tensors
                .get(&format!("{prefix}.bias"))
                .ok_or_else(|| Error::artifact(format!("missing parameter `{prefix}.bias`")))?;
            Ok(Linear::new(weight.clone(), Some(bias.clone())))
        };

        Ok(match spec.architecture {
            FusionArchitecture::ConcatDense => Self::ConcatDense(ConcatDense {
                fc1: linear("fc1")?,
                fc2: linear("fc2")?,
            }),
            FusionArchitecture::GatedAttention => Self::GatedAttention(GatedAttention {
                emb_proj: linear("emb_proj")?,
                feat_proj: linear("feat_proj")?,
                gate: linear("gate")?,
                out: linear("out")?,
            }),
        })
    }

    /// Build a head from host parameters on a device
    pub fn from_parameters(
        spec: &FusionSpec,
        embedding_dim: usize,
        parameters: &Parameters,
        device: &Device,
    ) -> Result<Self> {
        let mut tensors = BTreeMap::new();
        for (name, param) in parameters {
            tensors.insert(name.clone(), param.to_tensor(device)?);
        }
        Self::from_tensors(spec, embedding_dim, &tensors)
    }

    pub fn architecture(&self) -> FusionArchitecture {
        match self {
            Self::ConcatDense(_) => FusionArchitecture::ConcatDense,
            Self::GatedAttention(_) => FusionArchitecture::GatedAttention,
        }
    }

    fn layer(&self) -> &dyn FusionLayer {
        match self {
            Self::ConcatDense(layer) => layer,
            Self::GatedAttention(layer) => layer,
        }
    }

    /// `(N, E)` and `(N, F)` inputs to `(N, 4)` logits
    pub fn forward(&self, embeddings: &Tensor, features: &Tensor) -> candle_core::Result<Tensor> {
        self.layer().forward(embeddings, features)
    }
}

/// Seeded Xavier-uniform weights with zero biases
pub fn init_parameters(spec: &FusionSpec, embedding_dim: usize, rng: &mut ChaCha8Rng) -> Parameters {
    spec.parameter_shapes(embedding_dim)
        .into_iter()
        .map(|(name, shape)| {
            let mut param = ParameterTensor::zeros(shape.clone());
            if shape.len() == 2 {
                let bound = (6.0 / (shape[0] + shape[1]) as f32).sqrt();
                for v in &mut param.values {
                    *v = rng.gen_range(-bound..bound);
                }
            }
            (name.to_string(), param)
        })
        .collect()
}

/// Per-slot logit weights (claim, opinion, speculative, neutral) of the
/// lexicon-prior parameterisation. Slots not listed contribute nothing.
const PRIOR_WEIGHTS: [(FeatureSlot, [f32; 4]); 18] = [
    (FeatureSlot::NumericPresent, [2.0, 0.0, 0.0, 0.0]),
    (FeatureSlot::CertaintyHighDensity, [3.0, 0.5, 0.0, 0.0]),
    (FeatureSlot::PastTense, [0.3, 0.0, 0.0, 0.4]),
    (FeatureSlot::NamedSource, [0.5, 0.0, 0.0, 0.0]),
    (FeatureSlot::QuotationPresent, [0.3, 0.2, 0.0, 0.0]),
    (FeatureSlot::SubjectivePresent, [0.0, 2.5, 0.0, 0.0]),
    (FeatureSlot::SubjectiveDensity, [0.0, 3.0, 0.0, 0.0]),
    (FeatureSlot::FirstPerson, [0.0, 1.0, 0.0, 0.0]),
    (FeatureSlot::NegationPresent, [0.0, 0.2, 0.0, 0.0]),
    (FeatureSlot::ModalDensity, [0.0, 0.0, 6.0, 0.0]),
    (FeatureSlot::HedgePresent, [0.0, 0.0, 1.5, 0.0]),
    (FeatureSlot::HedgeDensity, [0.0, 0.0, 4.0, 0.0]),
    (FeatureSlot::EpistemicVerbPresent, [0.0, 0.0, 1.0, 0.0]),
    (FeatureSlot::CertaintyLowDensity, [0.0, 0.0, 4.0, 0.0]),
    (FeatureSlot::FutureMarker, [0.0, 0.0, 0.8, 0.0]),
    (FeatureSlot::AttributionPattern, [0.0, 0.0, 0.5, 0.0]),
    (FeatureSlot::AnonymousSource, [0.0, 0.0, 0.6, 0.0]),
    (FeatureSlot::PerfectAspect, [0.2, 0.0, 0.0, 0.2]),
];

/// Neutral is the default stance when no marker fires
const PRIOR_BIAS: [f32; 4] = [0.0, 0.0, 0.0, 0.5];

/// Gate bias that keeps the gated head on the feature path
pub const CLOSED_GATE_BIAS: f32 = -30.0;

/// Deterministic parameters mapping feature slots straight to class logits.
///
/// Embedding weights are zero, so the head ignores the embedding provider.
/// `concat_dense` reproduces `W·f + b` exactly (features are non-negative,
/// so the ReLU is the identity); `gated_attention` computes `W·tanh(f) + b`
/// with the gate held near zero by `gate_bias`.
pub fn lexicon_prior_parameters(
    spec: &FusionSpec,
    embedding_dim: usize,
    gate_bias: f32,
) -> Result<Parameters> {
    if spec.hidden_dim < FEATURE_DIM {
        return Err(Error::config(format!(
            "lexicon prior needs hidden_dim >= {FEATURE_DIM}, got {}",
            spec.hidden_dim
        )));
    }

    let mut params: Parameters = spec
        .parameter_shapes(embedding_dim)
        .into_iter()
        .map(|(name, shape)| (name.to_string(), ParameterTensor::zeros(shape)))
        .collect();

    let (input, input_offset, output) = match spec.architecture {
        FusionArchitecture::ConcatDense => ("fc1.weight", embedding_dim, "fc2"),
        FusionArchitecture::GatedAttention => ("feat_proj.weight", 0, "out"),
    };

    if let Some(w) = params.get_mut(input) {
        for slot in 0..FEATURE_DIM {
            w.set(slot, input_offset + slot, 1.0);
        }
    }
    if let Some(w) = params.get_mut(&format!("{output}.weight")) {
        for (slot, weights) in PRIOR_WEIGHTS {
            for (class, weight) in weights.iter().enumerate() {
                w.set(class, slot.index(), *weight);
            }
        }
    }
    if let Some(b) = params.get_mut(&format!("{output}.bias")) {
        b.values.copy_from_slice(&PRIOR_BIAS);
    }
    if let Some(b) = params.get_mut("gate.bias") {
        b.values.iter_mut().for_each(|v| *v = gate_bias);
    }

    Ok(params)
}

/// Add seeded uniform noise in `[-scale, scale)` to every weight matrix
pub fn jitter(params: &mut Parameters, scale: f32, rng: &mut ChaCha8Rng) {
    if scale <= 0.0 {
        return;
    }
    for param in params.values_mut().filter(|p| p.shape.len() == 2) {
        for v in &mut param.values {
            *v += rng.gen_range(-scale..scale);
        }
    }
}
