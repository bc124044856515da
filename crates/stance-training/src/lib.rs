//! Stance Training
//!
//! Training orchestrator for fusion stance classifiers.
//!
//! A [`Trainer`] run:
//! - takes the single-writer lock on the model path
//! - unifies the configured corpora through a pinned mapping table
//! - withholds held-out corpora and splits the rest into train and validation
//! - featurises examples on a bounded worker pool
//! - fits the fusion head with early stopping, checkpointing every improvement
//! - calibrates a softmax temperature, publishes the model atomically, and
//!   writes an in-domain and cross-domain evaluation report

pub mod config;
pub mod data;
pub mod evaluation;
pub mod lock;
pub mod trainer;

pub use config::{InitMode, OutputPaths, TrainingConfig};
pub use data::{partition, FeaturizedExample, FeaturizedSet, Featurizer, Partition};
pub use evaluation::{
    evaluate, evaluate_model, ClassMetrics, EpochRecord, EvaluationMetrics, TrainingReport,
};
pub use lock::{lock_path, ArtifactLock};
pub use trainer::{fit_temperature, Trainer, TrainingOutcome};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{InitMode, TrainingConfig};
    pub use crate::evaluation::{EvaluationMetrics, TrainingReport};
    pub use crate::trainer::{Trainer, TrainingOutcome};
}
