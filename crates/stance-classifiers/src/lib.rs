//! Stance Classifiers
//!
//! Hybrid epistemic-stance classification for news sentences.
//!
//! A sentence flows through:
//! - a tokenizer/parser adapter ([`SentenceParser`])
//! - the lexicon-driven linguistic feature extractor ([`extract`])
//! - an embedding provider ([`EmbeddingProvider`])
//! - a fusion head that turns both vectors into a calibrated distribution
//!   over claim, opinion, speculative and neutral ([`Model`])
//!
//! [`InferenceEngine`] composes the stages for single and batch prediction.
//! Feature extraction is a pure function of the lexicon snapshot and the
//! sentence; lexicons can be hot-swapped through [`LexiconStore`] without
//! retraining as long as the feature schema is unchanged.

pub mod clauses;
pub mod config;
pub mod device;
pub mod embedding;
pub mod features;
pub mod fusion;
pub mod inference;
pub mod lexicon;
pub mod model;
pub mod parser;

pub use clauses::{Attribution, ClauseAnalysis, SourceType};
pub use config::{
    build_engine_from_config, build_engine_from_file, EmbeddingSpec, EngineConfig, ParserSpec,
};
pub use device::DeviceSpec;
pub use embedding::{BertEmbedder, BertSource, EmbeddingProvider, HashingEmbedder};
pub use features::{
    extract, FeatureExtractor, FeatureSlot, FeatureVector, FEATURE_DIM, FEATURE_SCHEMA_VERSION,
};
pub use fusion::{
    FusionArchitecture, FusionHead, FusionLayer, FusionSpec, ParameterTensor, Parameters,
};
pub use inference::{BatchItem, InferenceEngine, InferenceSettings};
pub use lexicon::{Lexicon, LexiconCategory, LexiconEntry, LexiconFile, LexiconStore};
pub use model::{
    write_atomic, Model, ModelArtifact, ModelCache, ModelSource, Provenance,
    ARTIFACT_FORMAT_VERSION,
};
pub use parser::{analyze, HfTokenizerAdapter, RuleTokenizer, SentenceParser};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::embedding::{EmbeddingProvider, HashingEmbedder};
    pub use crate::features::{FeatureSlot, FeatureVector, FEATURE_SCHEMA_VERSION};
    pub use crate::fusion::{FusionArchitecture, FusionSpec};
    pub use crate::inference::{BatchItem, InferenceEngine, InferenceSettings};
    pub use crate::lexicon::{Lexicon, LexiconStore};
    pub use crate::model::{Model, ModelArtifact, ModelCache, ModelSource};
    pub use crate::parser::{RuleTokenizer, SentenceParser};
}
