//! Classification metrics and the training report

use crate::data::FeaturizedExample;
use serde::{Deserialize, Serialize};
use stance_classifiers::{write_atomic, FusionSpec, Model};
use stance_core::{Error, Result, StanceLabel};
use stance_unify::UnificationStats;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// Precision, recall and F1 of one class
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Gold examples of the class
    pub support: usize,
}

/// Metrics over one evaluation set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub examples: usize,
    pub accuracy: f64,
    /// Mean F1 over classes that occur in gold or predicted labels
    pub macro_f1: f64,
    /// Keyed by label name
    pub per_class: BTreeMap<String, ClassMetrics>,
    /// `confusion[gold][predicted]` in canonical label order
    pub confusion: Vec<Vec<usize>>,
}

impl EvaluationMetrics {
    pub fn class(&self, label: StanceLabel) -> Option<&ClassMetrics> {
        self.per_class.get(label.as_str())
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Score `(gold, predicted)` pairs
pub fn evaluate(pairs: impl IntoIterator<Item = (StanceLabel, StanceLabel)>) -> EvaluationMetrics {
    let mut confusion = vec![vec![0usize; StanceLabel::COUNT]; StanceLabel::COUNT];
    let mut examples = 0;
    for (gold, predicted) in pairs {
        confusion[gold.index()][predicted.index()] += 1;
        examples += 1;
    }

    let correct: usize = (0..StanceLabel::COUNT).map(|i| confusion[i][i]).sum();
    let mut per_class = BTreeMap::new();
    let mut f1_sum = 0.0;
    let mut present = 0;

    for label in StanceLabel::ALL {
        let i = label.index();
        let tp = confusion[i][i];
        let support: usize = confusion[i].iter().sum();
        let predicted: usize = confusion.iter().map(|row| row[i]).sum();

        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        if support > 0 || predicted > 0 {
            f1_sum += f1;
            present += 1;
        }
        per_class.insert(
            label.as_str().to_string(),
            ClassMetrics {
                precision,
                recall,
                f1,
                support,
            },
        );
    }

    EvaluationMetrics {
        examples,
        accuracy: ratio(correct, examples),
        macro_f1: if present == 0 { 0.0 } else { f1_sum / present as f64 },
        per_class,
        confusion,
    }
}

/// Classify `examples` with `model` and score the predictions
pub fn evaluate_model<'a>(
    model: &Model,
    examples: impl IntoIterator<Item = &'a FeaturizedExample>,
) -> Result<EvaluationMetrics> {
    let examples: Vec<&FeaturizedExample> = examples.into_iter().collect();
    let embeddings: Vec<_> = examples.iter().map(|e| e.embedding.clone()).collect();
    let features: Vec<_> = examples.iter().map(|e| e.features.clone()).collect();
    let distributions = model.classify_batch(&embeddings, &features)?;

    Ok(evaluate(
        examples
            .iter()
            .zip(&distributions)
            .map(|(example, dist)| (example.label, dist.argmax().0)),
    ))
}

/// Loss after one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub validation_loss: Option<f64>,
    pub improved: bool,
}

/// Everything a training run reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: String,
    pub run_name: String,
    pub model_version: String,
    pub mapping_version: String,
    pub mapping_fingerprint: String,
    pub lexicon_version: String,
    pub fusion: FusionSpec,
    pub seed: u64,

    pub train_examples: usize,
    pub validation_examples: usize,
    pub held_out_examples: usize,
    /// Examples dropped during featurisation
    pub skipped_examples: usize,

    pub epochs_run: usize,
    pub best_epoch: usize,
    /// `validation` or `training`, whichever loss early stopping watched
    pub monitored_loss: String,
    pub best_loss: f64,
    pub stopped_early: bool,
    pub temperature: f64,
    pub history: Vec<EpochRecord>,

    /// Validation metrics per training corpus
    pub in_domain: BTreeMap<String, EvaluationMetrics>,
    /// Validation metrics over the whole validation split
    pub in_domain_overall: Option<EvaluationMetrics>,
    /// Metrics per held-out corpus
    pub cross_domain: BTreeMap<String, EvaluationMetrics>,

    pub unification: UnificationStats,
}

impl TrainingReport {
    /// Write pretty JSON atomically
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)?;
        info!(path = %path.display(), run_id = %self.run_id, "Wrote training report");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            Error::artifact(format!("failed to read report {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
