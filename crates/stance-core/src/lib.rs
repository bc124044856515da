//! Stance Core
//!
//! Core types and error handling shared across the stance classification crates.
//!
//! This crate provides:
//! - The unified four-class stance taxonomy and calibrated class distributions
//! - Sentence, token, and dependency-parse types consumed by feature extraction
//! - Corpus source labels and unified training examples
//! - Error types and result handling

pub mod error;
pub mod example;
pub mod label;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use example::{LabeledExample, Resolution, SourceLabel};
pub use label::{ClassDistribution, PredictionResult, StanceLabel};
pub use types::{DependencyArc, DependencyParse, EmbeddingVector, EntitySpan, Sentence, Token};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::example::{LabeledExample, Resolution, SourceLabel};
    pub use crate::label::{ClassDistribution, PredictionResult, StanceLabel};
    pub use crate::types::{DependencyParse, EmbeddingVector, Sentence, Token};
}
