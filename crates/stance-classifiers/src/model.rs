//! Versioned model artifacts, loading, and the keyed model cache
//!
//! A [`ModelArtifact`] is the frozen on-disk form of a trained fusion head.
//! Loading validates the artifact completely before any inference can run;
//! there is no best-effort path. A [`Model`] is the loaded, read-only handle
//! passed explicitly into every inference call.

use crate::device::candle_err;
use crate::features::{FeatureVector, FEATURE_DIM, FEATURE_SCHEMA_VERSION};
use crate::fusion::{lexicon_prior_parameters, FusionHead, FusionSpec, Parameters, CLOSED_GATE_BIAS};
use crate::lexicon::Lexicon;
use bincode::Options;
use candle_core::{Device, Tensor};
use hf_hub::{api::sync::Api, Repo, RepoType};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stance_core::{ClassDistribution, EmbeddingVector, Error, Result, StanceLabel};
use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Envelope format understood by this build
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

const MAX_ARTIFACT_BYTES: u64 = 1 << 30;

fn bincode_options() -> impl Options {
    bincode::DefaultOptions::new().with_limit(MAX_ARTIFACT_BYTES)
}

/// Where a model artifact came from and how it was trained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub run_id: String,
    /// Corpora the training set was drawn from
    pub corpora: Vec<String>,
    /// Corpora withheld for cross-domain evaluation
    pub held_out_corpora: Vec<String>,
    pub mapping_version: String,
    pub mapping_fingerprint: String,
    pub lexicon_version: String,
    pub lexicon_fingerprint: String,
    pub seed: u64,
    pub epochs_run: usize,
    pub best_val_loss: Option<f64>,
    /// Seconds since the Unix epoch
    pub created_at: u64,
}

impl Provenance {
    /// Provenance of a model that was never trained
    pub fn untrained(lexicon: &Lexicon) -> Self {
        Self {
            run_id: "untrained".to_string(),
            corpora: Vec::new(),
            held_out_corpora: Vec::new(),
            mapping_version: String::new(),
            mapping_fingerprint: String::new(),
            lexicon_version: lexicon.version().to_string(),
            lexicon_fingerprint: lexicon.fingerprint().to_string(),
            seed: 0,
            epochs_run: 0,
            best_val_loss: None,
            created_at: unix_now(),
        }
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Serialized model: fusion spec, parameters, and everything needed to
/// refuse incompatible inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub model_version: String,
    pub schema_version: String,
    pub feature_dim: usize,
    pub embedding_dim: usize,
    pub fusion: FusionSpec,
    /// Label of each output logit, in output order
    pub class_order: Vec<StanceLabel>,
    pub temperature: f64,
    pub parameters: Parameters,
    pub provenance: Provenance,
    /// SHA-256 over parameter names, shapes and values
    pub checksum: String,
}

impl ModelArtifact {
    /// Assemble an artifact in canonical class order at temperature 1
    pub fn new(
        model_version: impl Into<String>,
        embedding_dim: usize,
        fusion: FusionSpec,
        parameters: Parameters,
        provenance: Provenance,
    ) -> Result<Self> {
        let artifact = Self {
            format_version: ARTIFACT_FORMAT_VERSION,
            model_version: model_version.into(),
            schema_version: FEATURE_SCHEMA_VERSION.to_string(),
            feature_dim: FEATURE_DIM,
            embedding_dim,
            fusion,
            class_order: StanceLabel::ALL.to_vec(),
            temperature: 1.0,
            checksum: parameter_checksum(&parameters),
            parameters,
            provenance,
        };
        artifact.validate()?;
        Ok(artifact)
    }

    /// Untrained baseline driven entirely by lexicon features
    pub fn lexicon_prior(
        model_version: impl Into<String>,
        embedding_dim: usize,
        fusion: FusionSpec,
        lexicon: &Lexicon,
    ) -> Result<Self> {
        let parameters = lexicon_prior_parameters(&fusion, embedding_dim, CLOSED_GATE_BIAS)?;
        Self::new(
            model_version,
            embedding_dim,
            fusion,
            parameters,
            Provenance::untrained(lexicon),
        )
    }

    pub fn with_temperature(mut self, temperature: f64) -> Result<Self> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(Error::artifact(format!("invalid temperature {temperature}")));
        }
        self.temperature = temperature;
        Ok(self)
    }

    /// Check every invariant a loaded artifact must satisfy
    pub fn validate(&self) -> Result<()> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(Error::artifact(format!(
                "unsupported artifact format {}, expected {}",
                self.format_version, ARTIFACT_FORMAT_VERSION
            )));
        }
        if self.schema_version != FEATURE_SCHEMA_VERSION {
            return Err(Error::schema_mismatch(
                "model",
                FEATURE_SCHEMA_VERSION,
                &self.schema_version,
            ));
        }
        if self.feature_dim != FEATURE_DIM {
            return Err(Error::schema_mismatch(
                "model feature dimension",
                FEATURE_DIM.to_string(),
                self.feature_dim.to_string(),
            ));
        }
        if self.embedding_dim == 0 {
            return Err(Error::artifact("embedding dimension must be positive"));
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(Error::artifact(format!("invalid temperature {}", self.temperature)));
        }
        self.fusion
            .validate()
            .map_err(|e| Error::artifact(e.to_string()))?;

        let distinct: BTreeSet<_> = self.class_order.iter().map(|l| l.index()).collect();
        if self.class_order.len() != StanceLabel::COUNT || distinct.len() != StanceLabel::COUNT {
            return Err(Error::artifact(format!(
                "class order {:?} is not a permutation of the four stance labels",
                self.class_order
            )));
        }

        let expected = self.fusion.parameter_shapes(self.embedding_dim);
        if expected.len() != self.parameters.len() {
            return Err(Error::artifact(format!(
                "expected {} parameters for {}, found {}",
                expected.len(),
                self.fusion.architecture,
                self.parameters.len()
            )));
        }
        for (name, shape) in expected {
            let param = self
                .parameters
                .get(name)
                .ok_or_else(|| Error::artifact(format!("missing parameter `{name}`")))?;
            if param.shape != shape || param.values.len() != param.numel() {
                return Err(Error::artifact(format!(
                    "parameter `{name}` has shape {:?} with {} values, expected {:?}",
                    param.shape,
                    param.values.len(),
                    shape
                )));
            }
            if param.values.iter().any(|v| !v.is_finite()) {
                return Err(Error::artifact(format!("parameter `{name}` has non-finite values")));
            }
        }

        let checksum = parameter_checksum(&self.parameters);
        if checksum != self.checksum {
            return Err(Error::artifact(format!(
                "checksum mismatch: recorded {}, computed {checksum}",
                self.checksum
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode_options()
            .serialize(self)
            .map_err(|e| Error::artifact(format!("failed to encode artifact: {e}")))
    }

    /// Decode and validate
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let artifact: Self = bincode_options()
            .deserialize(bytes)
            .map_err(|e| Error::artifact(format!("failed to decode artifact: {e}")))?;
        artifact.validate()?;
        Ok(artifact)
    }

    /// Publish atomically to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_atomic(path, &self.to_bytes()?)?;
        info!(
            path = %path.display(),
            version = %self.model_version,
            fusion = %self.fusion.architecture,
            "Published model artifact"
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| {
            Error::artifact(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_bytes(&bytes)
    }
}

/// SHA-256 over parameter names, shapes and little-endian values
pub fn parameter_checksum(parameters: &Parameters) -> String {
    let mut hasher = Sha256::new();
    for (name, param) in parameters {
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        for dim in &param.shape {
            hasher.update((*dim as u64).to_le_bytes());
        }
        for value in &param.values {
            hasher.update(value.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Write `bytes` to a uniquely named temporary sibling, fsync, rename over
/// `path`, then fsync the directory.
///
/// Readers see either the previous file or the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => {
            fs::create_dir_all(parent)?;
            parent
        }
        None => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::artifact(format!("invalid artifact path {}", path.display())))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;

    // A failed persist hands the temp file back; dropping it removes it.
    tmp.persist(path).map_err(|e| Error::from(e.error))?;
    sync_dir(dir)?;

    debug!(path = %path.display(), bytes = bytes.len(), "Atomically replaced file");
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Source location for a model artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModelSource {
    /// Load from local file system
    Local { path: PathBuf },

    /// Download from Hugging Face Hub
    HuggingFace {
        repo_id: String,
        filename: String,
        #[serde(default)]
        revision: Option<String>,
    },
}

impl ModelSource {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local { path: path.into() }
    }

    /// Cache key identifying this source
    pub fn key(&self) -> String {
        match self {
            Self::Local { path } => format!("local:{}", path.display()),
            Self::HuggingFace {
                repo_id,
                filename,
                revision,
            } => format!(
                "hf:{repo_id}@{}/{filename}",
                revision.as_deref().unwrap_or("main")
            ),
        }
    }

    /// Local path of the artifact, downloading it if needed
    pub fn resolve(&self) -> Result<PathBuf> {
        match self {
            Self::Local { path } => {
                if !path.exists() {
                    return Err(Error::artifact(format!(
                        "model artifact not found: {}",
                        path.display()
                    )));
                }
                Ok(path.clone())
            }
            Self::HuggingFace {
                repo_id,
                filename,
                revision,
            } => {
                let api = Api::new()
                    .map_err(|e| Error::artifact(format!("failed to initialize HF API: {e}")))?;
                let repo = api.repo(Repo::with_revision(
                    repo_id.clone(),
                    RepoType::Model,
                    revision.clone().unwrap_or_else(|| "main".to_string()),
                ));
                repo.get(filename).map_err(|e| {
                    Error::artifact(format!("failed to download {filename} from {repo_id}: {e}"))
                })
            }
        }
    }
}

/// A loaded, read-only model
pub struct Model {
    artifact: ModelArtifact,
    head: FusionHead,
    device: Device,
}

impl Model {
    /// Validate the artifact and build its fusion head on `device`
    pub fn from_artifact(artifact: ModelArtifact, device: &Device) -> Result<Self> {
        artifact.validate()?;
        let head = FusionHead::from_parameters(
            &artifact.fusion,
            artifact.embedding_dim,
            &artifact.parameters,
            device,
        )?;
        Ok(Self {
            artifact,
            head,
            device: device.clone(),
        })
    }

    pub fn load(source: &ModelSource, device: &Device) -> Result<Self> {
        let path = source.resolve()?;
        let model = Self::from_artifact(ModelArtifact::load(&path)?, device)?;
        info!(
            source = %source.key(),
            version = %model.version(),
            fusion = %model.artifact.fusion.architecture,
            embedding_dim = model.artifact.embedding_dim,
            "Loaded stance model"
        );
        Ok(model)
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn version(&self) -> &str {
        &self.artifact.model_version
    }

    pub fn schema_version(&self) -> &str {
        &self.artifact.schema_version
    }

    pub fn embedding_dim(&self) -> usize {
        self.artifact.embedding_dim
    }

    pub fn fusion(&self) -> &FusionSpec {
        &self.artifact.fusion
    }

    fn check_inputs(&self, embedding: &EmbeddingVector, features: &FeatureVector) -> Result<()> {
        if features.schema_version() != self.artifact.schema_version {
            return Err(Error::schema_mismatch(
                "feature vector",
                &self.artifact.schema_version,
                features.schema_version(),
            ));
        }
        if features.len() != self.artifact.feature_dim {
            return Err(Error::schema_mismatch(
                "feature vector length",
                self.artifact.feature_dim.to_string(),
                features.len().to_string(),
            ));
        }
        if embedding.dim() != self.artifact.embedding_dim {
            return Err(Error::schema_mismatch(
                "embedding dimension",
                self.artifact.embedding_dim.to_string(),
                embedding.dim().to_string(),
            ));
        }
        if !embedding.is_finite() {
            return Err(Error::model("embedding contains non-finite values"));
        }
        Ok(())
    }

    /// Distribution over the four labels for one sentence
    pub fn classify(
        &self,
        embedding: &EmbeddingVector,
        features: &FeatureVector,
    ) -> Result<ClassDistribution> {
        self.classify_batch(std::slice::from_ref(embedding), std::slice::from_ref(features))?
            .pop()
            .ok_or_else(|| Error::internal("empty classification output"))
    }

    /// Classify several sentences in one forward pass
    pub fn classify_batch(
        &self,
        embeddings: &[EmbeddingVector],
        features: &[FeatureVector],
    ) -> Result<Vec<ClassDistribution>> {
        if embeddings.len() != features.len() {
            return Err(Error::internal(format!(
                "{} embeddings for {} feature vectors",
                embeddings.len(),
                features.len()
            )));
        }
        if embeddings.is_empty() {
            return Ok(Vec::new());
        }

        let n = embeddings.len();
        let mut emb = Vec::with_capacity(n * self.artifact.embedding_dim);
        let mut feat = Vec::with_capacity(n * self.artifact.feature_dim);
        for (e, f) in embeddings.iter().zip(features) {
            self.check_inputs(e, f)?;
            emb.extend_from_slice(e.as_slice());
            feat.extend_from_slice(f.as_slice());
        }

        let emb = Tensor::from_vec(emb, (n, self.artifact.embedding_dim), &self.device)
            .map_err(candle_err("failed to build embedding tensor"))?;
        let feat = Tensor::from_vec(feat, (n, self.artifact.feature_dim), &self.device)
            .map_err(candle_err("failed to build feature tensor"))?;
        let logits = self
            .head
            .forward(&emb, &feat)
            .and_then(|t| t.to_vec2::<f32>())
            .map_err(candle_err("fusion forward pass failed"))?;

        logits
            .iter()
            .map(|row| {
                let mut canonical = [0.0f64; 4];
                for (label, logit) in self.artifact.class_order.iter().zip(row) {
                    canonical[label.index()] = f64::from(*logit);
                }
                ClassDistribution::from_logits(&canonical, self.artifact.temperature)
            })
            .collect()
    }
}

/// Explicit, keyed, invalidatable model cache
pub struct ModelCache {
    device: Device,
    models: RwLock<HashMap<String, Arc<Model>>>,
}

impl ModelCache {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            models: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached model for `source`, loading it on first use
    pub fn get_or_load(&self, source: &ModelSource) -> Result<Arc<Model>> {
        let key = source.key();
        if let Some(model) = self.models.read().get(&key) {
            return Ok(model.clone());
        }

        // Loading happens outside the lock; a concurrent loader may win the
        // insert, in which case its model is returned.
        let model = Arc::new(Model::load(source, &self.device)?);
        let mut models = self.models.write();
        Ok(models.entry(key).or_insert(model).clone())
    }

    pub fn get(&self, source: &ModelSource) -> Option<Arc<Model>> {
        self.models.read().get(&source.key()).cloned()
    }

    /// Drop the cached model for `source`; returns whether one was cached
    pub fn invalidate(&self, source: &ModelSource) -> bool {
        let removed = self.models.write().remove(&source.key()).is_some();
        if removed {
            debug!(source = %source.key(), "Invalidated cached model");
        }
        removed
    }

    pub fn clear(&self) {
        self.models.write().clear();
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}
