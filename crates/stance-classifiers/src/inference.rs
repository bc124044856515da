//! Inference API
//!
//! Composes parser → feature extractor → embedding provider → fusion model.
//! The engine holds no mutable state beyond the lexicon store's snapshot
//! pointer, so it can be cloned freely and called concurrently.

use crate::embedding::EmbeddingProvider;
use crate::features::{extract, FeatureSlot, FeatureVector};
use crate::lexicon::LexiconStore;
use crate::model::Model;
use crate::parser::{analyze, SentenceParser};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use stance_core::{EmbeddingVector, Error, PredictionResult, Result};
use stance_telemetry::MetricsCollector;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

/// Inference tuning knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// Longest accepted input, in characters
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,

    /// Sentences per embedding-provider call in batch mode
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,

    /// Chunks processed concurrently in batch mode
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Deadline for one embedding-provider call
    #[serde(default = "default_embedding_timeout_ms")]
    pub embedding_timeout_ms: u64,
}

fn default_max_chars() -> usize {
    2000
}

fn default_embed_batch_size() -> usize {
    16
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_embedding_timeout_ms() -> u64 {
    5000
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            embed_batch_size: default_embed_batch_size(),
            workers: default_workers(),
            embedding_timeout_ms: default_embedding_timeout_ms(),
        }
    }
}

impl InferenceSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_chars == 0 {
            return Err(Error::config("max_chars must be positive"));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::config("embed_batch_size must be positive"));
        }
        if self.workers == 0 {
            return Err(Error::config("workers must be positive"));
        }
        if self.embedding_timeout_ms == 0 {
            return Err(Error::config("embedding_timeout_ms must be positive"));
        }
        Ok(())
    }

    fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }
}

/// One batch result, tagged with its input position
#[derive(Debug)]
pub struct BatchItem {
    pub index: usize,
    pub outcome: Result<PredictionResult>,
}

impl BatchItem {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Sentence after validation and feature extraction
struct Prepared {
    text: String,
    features: FeatureVector,
    degraded: bool,
}

/// Stateless prediction front end
#[derive(Clone)]
pub struct InferenceEngine {
    parser: Arc<dyn SentenceParser>,
    embedder: Arc<dyn EmbeddingProvider>,
    lexicons: Arc<LexiconStore>,
    settings: InferenceSettings,
    metrics: Option<MetricsCollector>,
}

impl InferenceEngine {
    pub fn new(
        parser: Arc<dyn SentenceParser>,
        embedder: Arc<dyn EmbeddingProvider>,
        lexicons: Arc<LexiconStore>,
    ) -> Self {
        Self {
            parser,
            embedder,
            lexicons,
            settings: InferenceSettings::default(),
            metrics: None,
        }
    }

    pub fn with_settings(mut self, settings: InferenceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn settings(&self) -> &InferenceSettings {
        &self.settings
    }

    /// Lexicon store; swapping through it takes effect on the next call
    pub fn lexicons(&self) -> &Arc<LexiconStore> {
        &self.lexicons
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    pub fn metrics(&self) -> Option<&MetricsCollector> {
        self.metrics.as_ref()
    }

    /// Classify one sentence
    pub async fn predict(&self, model: &Model, text: &str) -> Result<PredictionResult> {
        let start = Instant::now();
        let outcome = self.predict_inner(model, text, start).await;
        self.record(&outcome);
        outcome
    }

    async fn predict_inner(
        &self,
        model: &Model,
        text: &str,
        start: Instant,
    ) -> Result<PredictionResult> {
        self.check_compatible(model)?;
        let prepared = self.prepare(text)?;

        let embedding = tokio::time::timeout(
            self.settings.embedding_timeout(),
            self.embedder.embed(&prepared.text),
        )
        .await
        .map_err(|_| self.timed_out())??;

        self.finish(model, &prepared, embedding, start)
    }

    /// Classify many sentences lazily, in input order.
    ///
    /// Sentences are grouped into chunks of `embed_batch_size`, each chunk
    /// making one provider call; up to `workers` chunks run at once. A
    /// failure affects only the items it concerns. When `cancel` fires the
    /// stream ends and in-flight chunks stop; items already yielded stay
    /// valid.
    pub fn predict_batch(
        &self,
        model: Arc<Model>,
        texts: Vec<String>,
        cancel: Option<CancellationToken>,
    ) -> BoxStream<'static, BatchItem> {
        let chunk_size = self.settings.embed_batch_size.max(1);
        let workers = self.settings.workers.max(1);
        let chunks: Vec<(usize, Vec<String>)> = texts
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| (i * chunk_size, chunk.to_vec()))
            .collect();
        debug!(items = texts.len(), chunks = chunks.len(), workers, "Starting batch");

        let engine = self.clone();
        let chunk_cancel = cancel.clone();
        let items = stream::iter(chunks)
            .map(move |(offset, chunk)| {
                let engine = engine.clone();
                let model = model.clone();
                let cancel = chunk_cancel.clone();
                let len = chunk.len();
                // Chunks still in flight when the stream is dropped are aborted.
                let handle = AbortOnDropHandle::new(tokio::spawn(async move {
                    match cancel {
                        Some(token) => tokio::select! {
                            biased;
                            _ = token.cancelled() => Vec::new(),
                            items = engine.run_chunk(&model, offset, chunk) => items,
                        },
                        None => engine.run_chunk(&model, offset, chunk).await,
                    }
                }));
                async move {
                    match handle.await {
                        Ok(items) => items,
                        Err(e) => (offset..offset + len)
                            .map(|index| BatchItem {
                                index,
                                outcome: Err(Error::internal(format!("batch worker failed: {e}"))),
                            })
                            .collect(),
                    }
                }
            })
            .buffered(workers)
            .flat_map(stream::iter);

        match cancel {
            Some(token) => items.take_until(token.cancelled_owned()).boxed(),
            None => items.boxed(),
        }
    }

    async fn run_chunk(&self, model: &Model, offset: usize, chunk: Vec<String>) -> Vec<BatchItem> {
        let start = Instant::now();
        let prepared: Vec<Result<Prepared>> = chunk
            .iter()
            .map(|text| self.check_compatible(model).and_then(|_| self.prepare(text)))
            .collect();

        // Only sentences that passed validation reach the provider; their
        // embeddings come back in the same relative order.
        let texts: Vec<String> = prepared
            .iter()
            .filter_map(|p| p.as_ref().ok().map(|p| p.text.clone()))
            .collect();
        let mut embeddings = self.embed_chunk(&texts).await.into_iter();

        let mut results: Vec<Result<PredictionResult>> = Vec::with_capacity(chunk.len());
        for outcome in prepared {
            let result = outcome.and_then(|prepared| match embeddings.next() {
                Some(Ok(embedding)) => self.finish(model, &prepared, embedding, start),
                Some(Err(e)) => Err(e),
                None => Err(Error::internal("embedding results exhausted")),
            });
            self.record(&result);
            results.push(result);
        }

        results
            .into_iter()
            .enumerate()
            .map(|(i, outcome)| BatchItem {
                index: offset + i,
                outcome,
            })
            .collect()
    }

    /// One provider call for the chunk; always one result per text
    async fn embed_chunk(&self, texts: &[String]) -> Vec<Result<EmbeddingVector>> {
        if texts.is_empty() {
            return Vec::new();
        }
        let call = tokio::time::timeout(
            self.settings.embedding_timeout(),
            self.embedder.embed_batch(texts),
        )
        .await;

        match call {
            Ok(results) if results.len() == texts.len() => results,
            Ok(results) => {
                warn!(
                    provider = self.embedder.name(),
                    expected = texts.len(),
                    got = results.len(),
                    "Embedding provider returned wrong number of results"
                );
                texts
                    .iter()
                    .map(|_| {
                        Err(Error::embedding(
                            self.embedder.name(),
                            format!("returned {} results for {} inputs", results.len(), texts.len()),
                        ))
                    })
                    .collect()
            }
            Err(_) => texts.iter().map(|_| Err(self.timed_out())).collect(),
        }
    }

    fn timed_out(&self) -> Error {
        Error::embedding(
            self.embedder.name(),
            format!("timed out after {} ms", self.settings.embedding_timeout_ms),
        )
    }

    fn check_compatible(&self, model: &Model) -> Result<()> {
        if model.schema_version() != self.lexicons.schema_version() {
            return Err(Error::schema_mismatch(
                "lexicon store",
                model.schema_version(),
                self.lexicons.schema_version(),
            ));
        }
        if model.embedding_dim() != self.embedder.dimension() {
            return Err(Error::schema_mismatch(
                "embedding provider",
                model.embedding_dim().to_string(),
                self.embedder.dimension().to_string(),
            ));
        }
        Ok(())
    }

    /// Validate input text, parse it, and extract features against one
    /// lexicon snapshot
    fn prepare(&self, text: &str) -> Result<Prepared> {
        if text.trim().is_empty() {
            return Err(Error::input("text is empty"));
        }
        let chars = text.chars().count();
        if chars > self.settings.max_chars {
            return Err(Error::input(format!(
                "text has {chars} characters, limit is {}",
                self.settings.max_chars
            )));
        }
        if text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
            return Err(Error::input("text contains control characters"));
        }

        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let (sentence, no_parse) = analyze(self.parser.as_ref(), &normalized)?;
        if sentence.word_count() == 0 {
            return Err(Error::input("text contains no words"));
        }

        let lexicon = self.lexicons.snapshot();
        let features = extract(&lexicon, &sentence);
        let degraded = no_parse || features.get(FeatureSlot::ParseUnavailable) > 0.0;

        Ok(Prepared {
            text: normalized,
            features,
            degraded,
        })
    }

    fn finish(
        &self,
        model: &Model,
        prepared: &Prepared,
        embedding: EmbeddingVector,
        start: Instant,
    ) -> Result<PredictionResult> {
        if embedding.dim() != self.embedder.dimension() {
            return Err(Error::embedding(
                self.embedder.name(),
                format!(
                    "returned {} dimensions, expected {}",
                    embedding.dim(),
                    self.embedder.dimension()
                ),
            ));
        }
        if !embedding.is_finite() {
            return Err(Error::embedding(
                self.embedder.name(),
                "returned non-finite values",
            ));
        }

        let distribution = model.classify(&embedding, &prepared.features)?;
        Ok(PredictionResult::from_distribution(
            distribution,
            prepared.degraded,
            model.version(),
            start.elapsed().as_micros() as u64,
        ))
    }

    fn record(&self, outcome: &Result<PredictionResult>) {
        match outcome {
            Ok(result) => {
                debug!(
                    label = %result.label,
                    confidence = result.confidence,
                    degraded = result.degraded,
                    latency_us = result.latency_us,
                    "Prediction"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_prediction(result.label, result.latency_us, result.degraded);
                }
            }
            Err(e) => {
                debug!(kind = e.kind().as_str(), error = %e, "Prediction failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_error(e.kind());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::features::FEATURE_SCHEMA_VERSION;
    use crate::fusion::{FusionArchitecture, FusionSpec};
    use crate::lexicon::Lexicon;
    use crate::model::ModelArtifact;
    use crate::parser::RuleTokenizer;
    use candle_core::Device;
    use stance_core::StanceLabel;

    fn engine() -> (InferenceEngine, Model) {
        let lexicon = Lexicon::builtin().unwrap();
        let artifact = ModelArtifact::lexicon_prior(
            "prior-1",
            16,
            FusionSpec::new(FusionArchitecture::ConcatDense, 32),
            &lexicon,
        )
        .unwrap();
        let model = Model::from_artifact(artifact, &Device::Cpu).unwrap();
        let store = Arc::new(LexiconStore::new(FEATURE_SCHEMA_VERSION, lexicon).unwrap());
        let engine = InferenceEngine::new(
            Arc::new(RuleTokenizer::new().unwrap()),
            Arc::new(HashingEmbedder::new(16, 0).unwrap()),
            store,
        );
        (engine, model)
    }

    #[tokio::test]
    async fn test_rejects_invalid_text() {
        let (engine, model) = engine();
        for text in ["", "   \n\t", "bad\u{0007}bell", "?!", "…"] {
            let err = engine.predict(&model, text).await.unwrap_err();
            assert!(matches!(err, Error::Input(_)), "{text:?}: {err}");
        }

        let long = "word ".repeat(1000);
        assert!(matches!(
            engine.predict(&model, &long).await,
            Err(Error::Input(_))
        ));
    }

    #[tokio::test]
    async fn test_predict_is_deterministic() {
        let (engine, model) = engine();
        let text = "This policy is misguided.";
        let a = engine.predict(&model, text).await.unwrap();
        let b = engine.predict(&model, text).await.unwrap();
        assert_eq!(a.label, StanceLabel::Opinion);
        assert_eq!(a.label, b.label);
        assert_eq!(a.confidence, b.confidence);
        assert!(a.degraded);
        assert_eq!(a.model_version, "prior-1");
    }

    #[tokio::test]
    async fn test_embedding_dimension_mismatch() {
        let (engine, model) = engine();
        let engine = InferenceEngine::new(
            Arc::new(RuleTokenizer::new().unwrap()),
            Arc::new(HashingEmbedder::new(8, 0).unwrap()),
            engine.lexicons().clone(),
        );
        let err = engine.predict(&model, "The GDP grew by 3%.").await.unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_metrics_are_recorded() {
        let (engine, model) = engine();
        let metrics = MetricsCollector::new();
        let engine = engine.with_metrics(metrics.clone());

        engine.predict(&model, "The GDP grew by 3%.").await.unwrap();
        let _ = engine.predict(&model, "").await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_predictions(), 1);
        assert_eq!(snapshot.errors, 1);
    }
}
