//! Corpus labels and unified training examples

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::label::StanceLabel;

/// A label in one corpus's own taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLabel {
    /// Corpus identifier
    pub corpus: String,

    /// Raw label as written in the corpus
    pub label: String,
}

impl SourceLabel {
    pub fn new(corpus: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            corpus: corpus.into(),
            label: label.into(),
        }
    }
}

impl fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.corpus, self.label)
    }
}

/// How the unified label of an example was decided
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// Every contributing corpus agreed
    Unanimous,
    /// Disagreement settled by the highest-trust corpus
    TrustRanking { corpus: String },
    /// Disagreement settled by a strict plurality of corpora
    MajorityVote { votes: usize, voters: usize },
    /// No rule settled the disagreement; excluded from training
    Ambiguous,
}

/// A sentence with its source labels and the unified label, if any.
///
/// Immutable after ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledExample {
    text: String,
    sources: Vec<SourceLabel>,
    unified: Option<StanceLabel>,
    mapping_version: String,
    resolution: Resolution,
}

impl LabeledExample {
    pub fn new(
        text: impl Into<String>,
        sources: Vec<SourceLabel>,
        unified: Option<StanceLabel>,
        mapping_version: impl Into<String>,
        resolution: Resolution,
    ) -> Self {
        Self {
            text: text.into(),
            sources,
            unified,
            mapping_version: mapping_version.into(),
            resolution,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn sources(&self) -> &[SourceLabel] {
        &self.sources
    }

    pub fn unified(&self) -> Option<StanceLabel> {
        self.unified
    }

    /// Version of the mapping table that produced the unified label
    pub fn mapping_version(&self) -> &str {
        &self.mapping_version
    }

    pub fn resolution(&self) -> &Resolution {
        &self.resolution
    }

    /// Distinct contributing corpora, sorted
    pub fn corpora(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.sources.iter().map(|s| s.corpus.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Whether the example may be used for training
    pub fn is_trainable(&self) -> bool {
        self.unified.is_some()
            && !self.mapping_version.is_empty()
            && self.resolution != Resolution::Ambiguous
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corpora_are_distinct() {
        let example = LabeledExample::new(
            "Prices rose.",
            vec![
                SourceLabel::new("mpqa", "objective"),
                SourceLabel::new("factbank", "CT+"),
                SourceLabel::new("mpqa", "objective"),
            ],
            Some(StanceLabel::Claim),
            "v1",
            Resolution::Unanimous,
        );
        assert_eq!(example.corpora(), vec!["factbank", "mpqa"]);
        assert!(example.is_trainable());
        assert_eq!(example.sources()[1].to_string(), "factbank:CT+");
    }

    #[test]
    fn test_ambiguous_not_trainable() {
        let example = LabeledExample::new("x", vec![], None, "v1", Resolution::Ambiguous);
        assert!(!example.is_trainable());
    }
}
