//! Embedding providers
//!
//! The provider boundary is the only external I/O on the inference path.
//! Every failure here is reported as [`Error::EmbeddingProvider`] so callers
//! can tell it apart from feature or model errors.

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use hf_hub::{api::sync::Api, Repo, RepoType};
use sha2::{Digest, Sha256};
use stance_core::{EmbeddingVector, Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationDirection};
use tracing::{debug, info};

/// Source of fixed-dimension sentence embeddings
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name (for errors and logging)
    fn name(&self) -> &str;

    /// Dimension of every vector this provider returns
    fn dimension(&self) -> usize;

    /// Embed one sentence
    async fn embed(&self, text: &str) -> Result<EmbeddingVector>;

    /// Embed several sentences, one result per input in input order
    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<EmbeddingVector>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await);
        }
        results
    }
}

/// Deterministic signed feature hashing of unigrams and bigrams.
///
/// Needs no model files, which makes it the provider of choice for tests,
/// benchmarks, and lexicon-only baselines.
pub struct HashingEmbedder {
    dimension: usize,
    seed: u64,
}

impl HashingEmbedder {
    pub fn new(dimension: usize, seed: u64) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::config("hashing embedder dimension must be positive"));
        }
        Ok(Self { dimension, seed })
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(feature.as_bytes());
        let digest = hasher.finalize();

        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let h = u64::from_le_bytes(bytes);
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        ((h % self.dimension as u64) as usize, sign)
    }

    /// Synchronous embedding, shared by the async entry points
    pub fn embed_sync(&self, text: &str) -> EmbeddingVector {
        let words: Vec<String> = text
            .split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut values = vec![0.0f32; self.dimension];
        for word in &words {
            let (i, sign) = self.bucket(&format!("u:{word}"));
            values[i] += sign;
        }
        for pair in words.windows(2) {
            let (i, sign) = self.bucket(&format!("b:{} {}", pair[0], pair[1]));
            values[i] += 0.5 * sign;
        }

        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        EmbeddingVector::new(values)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<EmbeddingVector>> {
        texts.iter().map(|t| Ok(self.embed_sync(t))).collect()
    }
}

/// Where to find BERT weights, config, and tokenizer
#[derive(Debug, Clone)]
pub enum BertSource {
    /// Directory with `config.json`, `tokenizer.json`, `model.safetensors`
    Local(PathBuf),
    /// Download from Hugging Face Hub
    HuggingFace {
        repo_id: String,
        revision: Option<String>,
    },
}

struct BertInner {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    max_length: usize,
    hidden_size: usize,
}

/// BERT sentence embeddings with masked mean pooling
pub struct BertEmbedder {
    name: String,
    inner: Arc<BertInner>,
}

const BERT_PREFIXES: [&str; 2] = ["", "bert"];

impl BertEmbedder {
    /// Load the backbone and tokenizer
    pub fn load(source: BertSource, device: &Device, max_length: usize) -> Result<Self> {
        let (config_path, tokenizer_path, weights_path, name) = resolve_files(&source)?;

        let config: BertConfig = {
            let raw = std::fs::read_to_string(&config_path).map_err(|e| {
                Error::config(format!("failed to read {}: {e}", config_path.display()))
            })?;
            serde_json::from_str(&raw).map_err(|e| {
                Error::config(format!("failed to parse {}: {e}", config_path.display()))
            })?
        };

        let tokenizer = Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            Error::config(format!("failed to load tokenizer {}: {e}", tokenizer_path.display()))
        })?;

        // SAFETY: the weights file is memory-mapped read-only and is not
        // modified while the model is alive.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, device)
                .map_err(|e| Error::config(format!("failed to load BERT weights: {e}")))?
        };

        let model = load_backbone(&vb, &config)?;
        info!(model = %name, hidden_size = config.hidden_size, "Loaded BERT embedder");

        Ok(Self {
            name,
            inner: Arc::new(BertInner {
                model,
                tokenizer,
                device: device.clone(),
                max_length: max_length.max(2),
                hidden_size: config.hidden_size,
            }),
        })
    }
}

fn resolve_files(source: &BertSource) -> Result<(PathBuf, PathBuf, PathBuf, String)> {
    match source {
        BertSource::Local(dir) => {
            let files = ["config.json", "tokenizer.json", "model.safetensors"].map(|f| dir.join(f));
            for file in &files {
                if !file.exists() {
                    return Err(Error::config(format!("{} not found", file.display())));
                }
            }
            let [config, tokenizer, weights] = files;
            Ok((config, tokenizer, weights, dir_name(dir)))
        }
        BertSource::HuggingFace { repo_id, revision } => {
            let api = Api::new()
                .map_err(|e| Error::config(format!("failed to initialize HF API: {e}")))?;
            let repo = api.repo(Repo::with_revision(
                repo_id.clone(),
                RepoType::Model,
                revision.clone().unwrap_or_else(|| "main".to_string()),
            ));
            let fetch = |file: &str| {
                repo.get(file).map_err(|e| {
                    Error::config(format!("failed to download {file} from {repo_id}: {e}"))
                })
            };
            Ok((
                fetch("config.json")?,
                fetch("tokenizer.json")?,
                fetch("model.safetensors")?,
                repo_id.clone(),
            ))
        }
    }
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("bert")
        .to_string()
}

fn load_backbone(vb: &VarBuilder, config: &BertConfig) -> Result<BertModel> {
    let mut errors = Vec::new();
    for prefix in BERT_PREFIXES {
        let vb_prefix = if prefix.is_empty() { vb.clone() } else { vb.pp(prefix) };
        let label = if prefix.is_empty() { "<root>" } else { prefix };
        match BertModel::load(vb_prefix, config) {
            Ok(model) => {
                debug!(prefix = label, "Loaded BERT backbone");
                return Ok(model);
            }
            Err(e) => errors.push(format!("{label}: {e}")),
        }
    }
    Err(Error::config(format!(
        "failed to load BERT backbone with tried prefixes [{}]",
        errors.join(" | ")
    )))
}

impl BertInner {
    fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, String> {
        let mut encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| format!("tokenization failed: {e}"))?;
        encoding.truncate(self.max_length, 0, TruncationDirection::Right);

        let mask: Vec<u32> = encoding.get_attention_mask().to_vec();
        let tensor = |values: &[u32]| {
            Tensor::new(values, &self.device).and_then(|t| t.unsqueeze(0))
        };
        let run = || -> candle_core::Result<Vec<f32>> {
            let input_ids = tensor(encoding.get_ids())?;
            let token_type_ids = tensor(encoding.get_type_ids())?;
            let attention_mask = tensor(&mask)?;

            let hidden = self
                .model
                .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

            // Masked mean over the sequence dimension
            let weights = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?;
            let summed = hidden.broadcast_mul(&weights)?.sum(1)?;
            let count = weights.sum(1)?.clamp(1e-9f32, f32::MAX)?;
            summed.broadcast_div(&count)?.squeeze(0)?.to_vec1::<f32>()
        };
        run().map_err(|e| format!("forward pass failed: {e}"))
    }
}

#[async_trait]
impl EmbeddingProvider for BertEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimension(&self) -> usize {
        self.inner.hidden_size
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let inner = self.inner.clone();
        let text = text.to_string();
        let values = tokio::task::spawn_blocking(move || inner.embed(&text))
            .await
            .map_err(|e| Error::embedding(&self.name, format!("worker panicked: {e}")))?
            .map_err(|reason| Error::embedding(&self.name, reason))?;
        Ok(EmbeddingVector::new(values))
    }
}
