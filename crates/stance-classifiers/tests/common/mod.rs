//! Deterministic test doubles shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use candle_core::Device;
use stance_classifiers::prelude::*;
use stance_classifiers::{EmbeddingProvider, SentenceParser};
use stance_core::{DependencyParse, EmbeddingVector, Error, Result, Token};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const EMBEDDING_DIM: usize = 32;

/// Rule tokenizer plus hand-written parses for known sentences
pub struct FixtureParser {
    tokenizer: RuleTokenizer,
    parses: HashMap<String, DependencyParse>,
}

impl FixtureParser {
    pub fn new() -> Self {
        Self {
            tokenizer: RuleTokenizer::new().unwrap(),
            parses: HashMap::new(),
        }
    }

    /// Register a parse for the sentence whose tokens join to `key`
    pub fn with_parse(mut self, key: &str, parse: DependencyParse) -> Self {
        self.parses.insert(key.to_string(), parse);
        self
    }
}

impl SentenceParser for FixtureParser {
    fn name(&self) -> &str {
        "fixture"
    }

    fn tokenize(&self, text: &str) -> Result<Vec<Token>> {
        self.tokenizer.tokenize(text)
    }

    fn parse(&self, tokens: &[Token]) -> Result<DependencyParse> {
        let key = tokens.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" ");
        self.parses
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::parse_unavailable(format!("no fixture for `{key}`")))
    }
}

/// Hashing embedder that fails for any sentence containing "FAIL"
pub struct FailingEmbedder {
    inner: HashingEmbedder,
    calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingEmbedder::new(EMBEDDING_DIM, 0).unwrap(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn name(&self) -> &str {
        "failing"
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("FAIL") {
            return Err(Error::embedding("failing", "service unavailable"));
        }
        self.inner.embed(text).await
    }
}

/// Provider that sleeps before answering
pub struct SlowEmbedder {
    inner: HashingEmbedder,
    delay: Duration,
    staggered: bool,
    calls: AtomicUsize,
}

impl SlowEmbedder {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: HashingEmbedder::new(EMBEDDING_DIM, 0).unwrap(),
            delay,
            staggered: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// The n-th call (from 1) sleeps n times the delay
    pub fn staggered(delay: Duration) -> Self {
        Self {
            staggered: true,
            ..Self::new(delay)
        }
    }

    /// Texts whose embedding has started
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    fn name(&self) -> &str {
        "slow"
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as u32;
        let delay = if self.staggered { self.delay * (call + 1) } else { self.delay };
        tokio::time::sleep(delay).await;
        self.inner.embed(text).await
    }
}

/// Provider whose batch call drops the last result
pub struct ShortBatchEmbedder(pub HashingEmbedder);

#[async_trait]
impl EmbeddingProvider for ShortBatchEmbedder {
    fn name(&self) -> &str {
        "short"
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        self.0.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<EmbeddingVector>> {
        let mut results = self.0.embed_batch(texts).await;
        results.pop();
        results
    }
}

pub fn lexicon_store() -> Arc<LexiconStore> {
    Arc::new(LexiconStore::new(FEATURE_SCHEMA_VERSION, Lexicon::builtin().unwrap()).unwrap())
}

/// Untrained lexicon-prior model over `EMBEDDING_DIM`-dim embeddings
pub fn prior_model(architecture: FusionArchitecture) -> Model {
    let lexicon = Lexicon::builtin().unwrap();
    let artifact = ModelArtifact::lexicon_prior(
        format!("prior-{architecture}"),
        EMBEDDING_DIM,
        FusionSpec::new(architecture, 32),
        &lexicon,
    )
    .unwrap();
    Model::from_artifact(artifact, &Device::Cpu).unwrap()
}

pub fn engine_with(
    parser: Arc<dyn SentenceParser>,
    embedder: Arc<dyn EmbeddingProvider>,
) -> InferenceEngine {
    InferenceEngine::new(parser, embedder, lexicon_store())
}

pub fn default_engine() -> InferenceEngine {
    engine_with(
        Arc::new(RuleTokenizer::new().unwrap()),
        Arc::new(HashingEmbedder::new(EMBEDDING_DIM, 0).unwrap()),
    )
}
