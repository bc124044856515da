//! Dataset preparation
//!
//! Unified examples are partitioned into in-domain and held-out sets, the
//! in-domain set is split into train and validation with a seeded stratified
//! shuffle, and every example is turned into an (embedding, feature) pair on a
//! bounded pool of concurrent tasks. Output order always follows input order.

use futures::stream::{self, StreamExt};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use stance_classifiers::{analyze, extract, EmbeddingProvider, FeatureVector, Lexicon, SentenceParser};
use stance_core::{EmbeddingVector, LabeledExample, StanceLabel};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Examples after held-out partitioning and the train/validation split
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub train: Vec<LabeledExample>,
    pub validation: Vec<LabeledExample>,
    /// Examples touching a held-out corpus; evaluation only
    pub held_out: Vec<LabeledExample>,
}

/// Partition trainable examples.
///
/// An example with any source from a held-out corpus never enters training
/// or validation. The remainder is split per label, so every class keeps the
/// same validation share.
pub fn partition(
    examples: impl IntoIterator<Item = LabeledExample>,
    held_out: &[String],
    validation_ratio: f64,
    seed: u64,
) -> Partition {
    let mut result = Partition::default();
    let mut by_label: BTreeMap<StanceLabel, Vec<LabeledExample>> = BTreeMap::new();

    for example in examples {
        let Some(label) = example.unified() else {
            continue;
        };
        if !example.is_trainable() {
            continue;
        }
        if example
            .corpora()
            .iter()
            .any(|c| held_out.iter().any(|h| h == c))
        {
            result.held_out.push(example);
        } else {
            by_label.entry(label).or_default().push(example);
        }
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for (_, mut group) in by_label {
        group.shuffle(&mut rng);
        let n_val = ((group.len() as f64) * validation_ratio).round() as usize;
        let n_val = n_val.min(group.len().saturating_sub(1));
        let train = group.split_off(n_val);
        result.validation.extend(group);
        result.train.extend(train);
    }

    result
}

/// One example ready for the fusion head
#[derive(Debug, Clone, PartialEq)]
pub struct FeaturizedExample {
    pub text: String,
    pub label: StanceLabel,
    pub corpora: Vec<String>,
    pub embedding: EmbeddingVector,
    pub features: FeatureVector,
}

/// Featurised examples in input order, plus how many were dropped
#[derive(Debug, Clone, Default)]
pub struct FeaturizedSet {
    pub examples: Vec<FeaturizedExample>,
    pub skipped: usize,
}

impl FeaturizedSet {
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Examples with a source from `corpus`
    pub fn from_corpus<'a>(&'a self, corpus: &'a str) -> impl Iterator<Item = &'a FeaturizedExample> {
        self.examples
            .iter()
            .filter(move |e| e.corpora.iter().any(|c| c == corpus))
    }
}

/// Turns labelled sentences into embedding and feature vectors
pub struct Featurizer {
    parser: Arc<dyn SentenceParser>,
    lexicon: Arc<Lexicon>,
    embedder: Arc<dyn EmbeddingProvider>,
    workers: usize,
}

impl Featurizer {
    pub fn new(
        parser: Arc<dyn SentenceParser>,
        lexicon: Arc<Lexicon>,
        embedder: Arc<dyn EmbeddingProvider>,
        workers: usize,
    ) -> Self {
        Self {
            parser,
            lexicon,
            embedder,
            workers: workers.max(1),
        }
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    /// Featurise with at most `workers` examples in flight
    pub async fn featurize(&self, examples: Vec<LabeledExample>) -> FeaturizedSet {
        let total = examples.len();
        let results: Vec<Option<FeaturizedExample>> = stream::iter(examples)
            .map(|example| self.featurize_one(example))
            .buffered(self.workers)
            .collect()
            .await;

        let examples: Vec<FeaturizedExample> = results.into_iter().flatten().collect();
        let skipped = total - examples.len();
        if skipped > 0 {
            warn!(skipped, total, "Skipped examples during featurisation");
        }
        info!(examples = examples.len(), skipped, "Featurised examples");
        FeaturizedSet { examples, skipped }
    }

    async fn featurize_one(&self, example: LabeledExample) -> Option<FeaturizedExample> {
        let label = example.unified()?;
        let text = example.text();

        let (sentence, _) = match analyze(self.parser.as_ref(), text) {
            Ok(analyzed) => analyzed,
            Err(e) => {
                debug!(error = %e, "Tokenization failed, skipping example");
                return None;
            }
        };
        if sentence.word_count() == 0 {
            debug!(text, "No word tokens, skipping example");
            return None;
        }
        let features = extract(&self.lexicon, &sentence);

        let embedding = match self.embedder.embed(text).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!(provider = self.embedder.name(), error = %e, "Embedding failed, skipping example");
                return None;
            }
        };
        if embedding.dim() != self.embedder.dimension() || !embedding.is_finite() {
            warn!(
                provider = self.embedder.name(),
                dim = embedding.dim(),
                "Invalid embedding, skipping example"
            );
            return None;
        }

        Some(FeaturizedExample {
            text: text.to_string(),
            label,
            corpora: example.corpora().into_iter().map(str::to_string).collect(),
            embedding,
            features,
        })
    }
}
