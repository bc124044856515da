//! Error types for the stance engine

/// Result type alias using the engine's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for stance classification operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Empty or invalid input text (caller's fault, not retryable as-is)
    #[error("invalid input: {0}")]
    Input(String),

    /// Dependency parse could not be produced; callers degrade instead of failing
    #[error("dependency parse unavailable: {0}")]
    ParseUnavailable(String),

    /// External embedding provider failed or timed out
    #[error("embedding provider `{provider}` failed: {reason}")]
    EmbeddingProvider { provider: String, reason: String },

    /// Model, lexicon or feature schema incompatibility
    #[error("{component} schema mismatch: expected `{expected}`, found `{found}`")]
    SchemaMismatch {
        component: String,
        expected: String,
        found: String,
    },

    /// Source label could not be unified into the stance taxonomy
    #[error("label mapping failed for `{label}` from corpus `{corpus}`: {reason}")]
    LabelMapping {
        corpus: String,
        label: String,
        reason: String,
    },

    /// Non-finite loss during training
    #[error("training diverged at epoch {epoch}: loss = {loss}")]
    TrainingDivergence { epoch: usize, loss: f64 },

    /// Model artifact could not be read, verified or published
    #[error("artifact error: {0}")]
    Artifact(String),

    /// Tensor or forward-pass failures
    #[error("model error: {0}")]
    Model(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/IO errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

/// Discriminant of [`Error`], used for metrics labels and per-item reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Input,
    ParseUnavailable,
    EmbeddingProvider,
    SchemaMismatch,
    LabelMapping,
    TrainingDivergence,
    Artifact,
    Model,
    Config,
    Io,
    Serialization,
    Internal,
}

impl ErrorKind {
    /// Stable snake_case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::ParseUnavailable => "parse_unavailable",
            Self::EmbeddingProvider => "embedding_provider",
            Self::SchemaMismatch => "schema_mismatch",
            Self::LabelMapping => "label_mapping",
            Self::TrainingDivergence => "training_divergence",
            Self::Artifact => "artifact",
            Self::Model => "model",
            Self::Config => "config",
            Self::Io => "io",
            Self::Serialization => "serialization",
            Self::Internal => "internal",
        }
    }
}

impl Error {
    /// Create a new input error
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Create a new parse-unavailable warning
    pub fn parse_unavailable(msg: impl Into<String>) -> Self {
        Self::ParseUnavailable(msg.into())
    }

    /// Create a new embedding provider error
    pub fn embedding(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EmbeddingProvider {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Create a new schema mismatch error
    pub fn schema_mismatch(
        component: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::SchemaMismatch {
            component: component.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a new label mapping error
    pub fn label_mapping(
        corpus: impl Into<String>,
        label: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::LabelMapping {
            corpus: corpus.into(),
            label: label.into(),
            reason: reason.into(),
        }
    }

    /// Create a new artifact error
    pub fn artifact(msg: impl Into<String>) -> Self {
        Self::Artifact(msg.into())
    }

    /// Create a new model error
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Discriminant of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::Input,
            Self::ParseUnavailable(_) => ErrorKind::ParseUnavailable,
            Self::EmbeddingProvider { .. } => ErrorKind::EmbeddingProvider,
            Self::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Self::LabelMapping { .. } => ErrorKind::LabelMapping,
            Self::TrainingDivergence { .. } => ErrorKind::TrainingDivergence,
            Self::Artifact(_) => ErrorKind::Artifact,
            Self::Model(_) => ErrorKind::Model,
            Self::Config(_) => ErrorKind::Config,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EmbeddingProvider { .. } | Self::Io(_))
    }
}
