//! Training run configuration (YAML)

use serde::{Deserialize, Serialize};
use stance_classifiers::{DeviceSpec, EmbeddingSpec, FusionSpec, ParserSpec};
use stance_core::{Error, Result};
use stance_unify::{CorpusSpec, MappingTable};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// How fusion parameters start out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMode {
    /// Seeded Xavier-uniform weights
    #[default]
    Random,
    /// Lexicon-prior weights plus seeded jitter
    LexiconPrior,
}

/// Where a run writes its outputs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPaths {
    /// Final model artifact
    pub model: PathBuf,
    /// Best-so-far checkpoint, rewritten on every improvement
    pub checkpoint: PathBuf,
    /// JSON evaluation report
    pub report: PathBuf,
    /// JSON-lines unification audit log
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
}

/// Training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub run_name: String,
    pub model_version: String,

    pub corpora: Vec<CorpusSpec>,

    /// Mapping table file
    pub mapping_path: PathBuf,
    /// Version the mapping table must declare
    pub mapping_version: String,

    /// Corpora used only for cross-domain evaluation
    #[serde(default)]
    pub held_out: Vec<String>,

    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,

    #[serde(default = "default_epochs")]
    pub epochs: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Epochs without improvement before stopping
    #[serde(default = "default_patience")]
    pub patience: usize,

    /// Minimum decrease in validation loss that counts as improvement
    #[serde(default)]
    pub min_delta: f64,

    #[serde(default = "default_validation_ratio")]
    pub validation_ratio: f64,

    #[serde(default)]
    pub init: InitMode,

    /// Scale of the seeded noise added to lexicon-prior weights
    #[serde(default = "default_init_jitter")]
    pub init_jitter: f32,

    #[serde(default = "default_true")]
    pub calibrate_temperature: bool,

    #[serde(default)]
    pub fusion: FusionSpec,

    pub embedding: EmbeddingSpec,

    #[serde(default)]
    pub parser: ParserSpec,

    /// Lexicon file; the built-in lexicon when absent
    #[serde(default)]
    pub lexicon: Option<PathBuf>,

    /// Concurrent featurisation tasks
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub device: DeviceSpec,

    pub output: OutputPaths,
}

fn default_seed() -> u64 {
    42
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_weight_decay() -> f64 {
    0.01
}

fn default_epochs() -> usize {
    20
}

fn default_batch_size() -> usize {
    32
}

fn default_patience() -> usize {
    3
}

fn default_validation_ratio() -> f64 {
    0.2
}

fn default_init_jitter() -> f32 {
    0.01
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    num_cpus::get()
}

impl TrainingConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("failed to parse training config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read training config {}: {e}", path.display()))
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_name.trim().is_empty() {
            return Err(Error::config("run_name must not be empty"));
        }
        if self.model_version.trim().is_empty() {
            return Err(Error::config("model_version must not be empty"));
        }
        if self.corpora.is_empty() {
            return Err(Error::config("at least one corpus is required"));
        }

        let mut ids = HashSet::new();
        for corpus in &self.corpora {
            if !ids.insert(corpus.id.as_str()) {
                return Err(Error::config(format!("corpus `{}` is listed twice", corpus.id)));
            }
        }
        for held in &self.held_out {
            if !ids.contains(held.as_str()) {
                return Err(Error::config(format!("held-out corpus `{held}` is not configured")));
            }
        }
        if self.held_out.len() == self.corpora.len() {
            return Err(Error::config("every corpus is held out; nothing left to train on"));
        }

        if !self.learning_rate.is_finite() || self.learning_rate < 0.0 {
            return Err(Error::config(format!(
                "learning_rate must be finite and non-negative, got {}",
                self.learning_rate
            )));
        }
        if !self.weight_decay.is_finite() || self.weight_decay < 0.0 {
            return Err(Error::config("weight_decay must be finite and non-negative"));
        }
        if !self.min_delta.is_finite() || self.min_delta < 0.0 {
            return Err(Error::config("min_delta must be finite and non-negative"));
        }
        if self.epochs == 0 {
            return Err(Error::config("epochs must be positive"));
        }
        if self.patience == 0 {
            return Err(Error::config("patience must be at least one epoch"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch_size must be positive"));
        }
        if self.workers == 0 {
            return Err(Error::config("workers must be positive"));
        }
        if !(0.0..1.0).contains(&self.validation_ratio) {
            return Err(Error::config(format!(
                "validation_ratio must be in [0, 1), got {}",
                self.validation_ratio
            )));
        }
        if !self.init_jitter.is_finite() || self.init_jitter < 0.0 {
            return Err(Error::config("init_jitter must be finite and non-negative"));
        }

        self.fusion.validate()?;
        self.embedding.validate()
    }

    /// Load the mapping table and check it is the pinned version
    pub fn load_mapping(&self) -> Result<MappingTable> {
        let table = MappingTable::load(&self.mapping_path)?;
        if table.version() != self.mapping_version {
            return Err(Error::config(format!(
                "mapping table {} has version `{}`, config pins `{}`",
                self.mapping_path.display(),
                table.version(),
                self.mapping_version
            )));
        }
        Ok(table)
    }

    pub fn is_held_out(&self, corpus: &str) -> bool {
        self.held_out.iter().any(|c| c == corpus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
run_name: news-baseline
model_version: "2024.06"
corpora:
  - { id: factbank, path: data/factbank.jsonl }
  - { id: mpqa, path: data/mpqa.jsonl }
  - { id: hedges, path: data/hedges.jsonl }
mapping_path: mappings/news.yaml
mapping_version: news-map-3
held_out: [hedges]
epochs: 5
fusion:
  architecture: gated_attention
  hidden_dim: 48
embedding:
  type: hashing
  dimension: 64
output:
  model: out/model.bin
  checkpoint: out/checkpoint.bin
  report: out/report.json
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = TrainingConfig::from_yaml(CONFIG).unwrap();
        assert_eq!(config.seed, 42);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.patience, 3);
        assert_eq!(config.init, InitMode::Random);
        assert!(config.calibrate_temperature);
        assert!(config.is_held_out("hedges"));
        assert!(!config.is_held_out("mpqa"));
        assert_eq!(config.fusion.hidden_dim, 48);
        assert!(config.output.audit_log.is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let cases = [
            CONFIG.replace("epochs: 5", "epochs: 0"),
            CONFIG.replace("epochs: 5", "epochs: 5\nbatch_size: 0"),
            CONFIG.replace("epochs: 5", "epochs: 5\npatience: 0"),
            CONFIG.replace("epochs: 5", "epochs: 5\nlearning_rate: -0.1"),
            CONFIG.replace("epochs: 5", "epochs: 5\nlearning_rate: .nan"),
            CONFIG.replace("epochs: 5", "epochs: 5\nvalidation_ratio: 1.0"),
            CONFIG.replace("held_out: [hedges]", "held_out: [semeval]"),
            CONFIG.replace("held_out: [hedges]", "held_out: [hedges, mpqa, factbank]"),
        ];
        for yaml in cases {
            assert!(TrainingConfig::from_yaml(&yaml).is_err(), "{yaml}");
        }
    }

    #[test]
    fn test_mapping_version_is_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let mapping = dir.path().join("map.yaml");
        std::fs::write(
            &mapping,
            "version: news-map-2\ncorpora:\n  mpqa:\n    labels: { objective: neutral }\n",
        )
        .unwrap();

        let mut config = TrainingConfig::from_yaml(CONFIG).unwrap();
        config.mapping_path = mapping;
        assert!(matches!(config.load_mapping(), Err(Error::Config(_))));

        config.mapping_version = "news-map-2".to_string();
        assert_eq!(config.load_mapping().unwrap().version(), "news-map-2");
    }
}
