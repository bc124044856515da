//! Engine configuration (YAML)

use crate::device::DeviceSpec;
use crate::embedding::{BertEmbedder, BertSource, EmbeddingProvider, HashingEmbedder};
use crate::features::FEATURE_SCHEMA_VERSION;
use crate::inference::{InferenceEngine, InferenceSettings};
use crate::lexicon::{Lexicon, LexiconStore};
use crate::model::{Model, ModelCache, ModelSource};
use crate::parser::{HfTokenizerAdapter, RuleTokenizer, SentenceParser};
use candle_core::Device;
use serde::{Deserialize, Serialize};
use stance_core::{Error, Result};
use stance_telemetry::MetricsCollector;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Inference engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Model artifact to serve
    pub model: ModelSource,

    /// Lexicon file; the built-in lexicon when absent
    #[serde(default)]
    pub lexicon: Option<PathBuf>,

    #[serde(default)]
    pub parser: ParserSpec,

    pub embedding: EmbeddingSpec,

    #[serde(default)]
    pub device: DeviceSpec,

    #[serde(default)]
    pub inference: InferenceSettings,

    /// Attach an in-process metrics collector
    #[serde(default)]
    pub metrics: bool,
}

/// Tokenizer/parser adapter selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParserSpec {
    /// Regex tokenizer
    #[default]
    Rule,

    /// Hugging Face `tokenizer.json`
    HfTokenizer { path: PathBuf },
}

impl ParserSpec {
    pub fn build(&self) -> Result<Arc<dyn SentenceParser>> {
        Ok(match self {
            Self::Rule => Arc::new(RuleTokenizer::new()?),
            Self::HfTokenizer { path } => Arc::new(HfTokenizerAdapter::from_file(path)?),
        })
    }
}

/// Embedding provider selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmbeddingSpec {
    /// Signed feature hashing
    Hashing {
        dimension: usize,
        #[serde(default)]
        seed: u64,
    },

    /// BERT backbone from a local directory or the Hub
    Bert {
        #[serde(default)]
        repo_id: Option<String>,
        #[serde(default)]
        path: Option<PathBuf>,
        #[serde(default)]
        revision: Option<String>,
        #[serde(default = "default_max_length")]
        max_length: usize,
    },
}

fn default_max_length() -> usize {
    128
}

impl EmbeddingSpec {
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Hashing { dimension, .. } if *dimension == 0 => {
                Err(Error::config("hashing embedding dimension must be positive"))
            }
            Self::Bert { repo_id, path, .. } if repo_id.is_some() == path.is_some() => Err(
                Error::config("bert embedding needs exactly one of `repo_id` or `path`"),
            ),
            _ => Ok(()),
        }
    }

    pub fn build(&self, device: &Device) -> Result<Arc<dyn EmbeddingProvider>> {
        self.validate()?;
        Ok(match self {
            Self::Hashing { dimension, seed } => Arc::new(HashingEmbedder::new(*dimension, *seed)?),
            Self::Bert {
                repo_id,
                path,
                revision,
                max_length,
            } => {
                let source = match (repo_id, path) {
                    (Some(repo_id), _) => BertSource::HuggingFace {
                        repo_id: repo_id.clone(),
                        revision: revision.clone(),
                    },
                    (None, Some(path)) => BertSource::Local(path.clone()),
                    (None, None) => return Err(Error::config("bert embedding has no source")),
                };
                Arc::new(BertEmbedder::load(source, device, *max_length)?)
            }
        })
    }
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("failed to parse engine config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read engine config {}: {e}", path.display()))
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        self.embedding.validate()?;
        self.inference.validate()
    }

    /// Lexicon named by the config, or the built-in one
    pub fn load_lexicon(&self) -> Result<Lexicon> {
        match &self.lexicon {
            Some(path) => Lexicon::load(path),
            None => Lexicon::builtin(),
        }
    }
}

/// Build the engine and load its model through `cache`
pub fn build_engine_from_config(
    config: &EngineConfig,
    cache: &ModelCache,
) -> Result<(InferenceEngine, Arc<Model>)> {
    config.validate()?;
    let device = config.device.create()?;

    let lexicon = config.load_lexicon()?;
    info!(version = lexicon.version(), entries = lexicon.entries().len(), "Loaded lexicon");
    let lexicons = Arc::new(LexiconStore::new(FEATURE_SCHEMA_VERSION, lexicon)?);

    let parser = config.parser.build()?;
    let embedder = config.embedding.build(&device)?;
    let model = cache.get_or_load(&config.model)?;

    if model.embedding_dim() != embedder.dimension() {
        return Err(Error::schema_mismatch(
            "embedding provider",
            model.embedding_dim().to_string(),
            embedder.dimension().to_string(),
        ));
    }

    let mut engine = InferenceEngine::new(parser, embedder, lexicons)
        .with_settings(config.inference.clone());
    if config.metrics {
        engine = engine.with_metrics(MetricsCollector::new());
    }

    info!(
        model = model.version(),
        parser = ?config.parser,
        workers = config.inference.workers,
        "Inference engine ready"
    );
    Ok((engine, model))
}

/// Load an engine configuration file and build from it
pub fn build_engine_from_file(
    path: impl AsRef<Path>,
    cache: &ModelCache,
) -> Result<(InferenceEngine, Arc<Model>)> {
    build_engine_from_config(&EngineConfig::from_file(path)?, cache)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r#"
model:
  type: local
  path: /models/stance.bin
embedding:
  type: hashing
  dimension: 64
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.model, ModelSource::local("/models/stance.bin"));
        assert_eq!(config.parser, ParserSpec::Rule);
        assert_eq!(config.device, DeviceSpec::Cpu);
        assert_eq!(config.inference.max_chars, 2000);
        assert!(!config.metrics);
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
model:
  type: hugging_face
  repo_id: skelf/stance-fusion
  filename: stance.bin
  revision: v1
lexicon: lexicons/news.yaml
parser:
  type: hf_tokenizer
  path: tokenizer.json
embedding:
  type: bert
  repo_id: sentence-transformers/all-MiniLM-L6-v2
  max_length: 64
inference:
  workers: 2
  embedding_timeout_ms: 250
metrics: true
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(matches!(config.model, ModelSource::HuggingFace { .. }));
        assert_eq!(config.inference.workers, 2);
        assert_eq!(config.inference.embed_batch_size, 16);
        assert!(matches!(config.embedding, EmbeddingSpec::Bert { max_length: 64, .. }));
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let both = r#"
model: { type: local, path: m.bin }
embedding: { type: bert, repo_id: a/b, path: /x }
"#;
        assert!(EngineConfig::from_yaml(both).is_err());

        let zero_workers = r#"
model: { type: local, path: m.bin }
embedding: { type: hashing, dimension: 8 }
inference: { workers: 0 }
"#;
        assert!(EngineConfig::from_yaml(zero_workers).is_err());
    }
}
