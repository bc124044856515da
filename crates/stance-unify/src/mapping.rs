//! Versioned label mapping tables
//!
//! A mapping table lists, per corpus, how every raw label of that corpus's
//! taxonomy maps onto the four stance classes. Labels are only ever unified
//! through an explicit entry; nothing is guessed from label text.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stance_core::{Error, Result, SourceLabel, StanceLabel};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Mapping table file (YAML)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingFile {
    pub version: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Corpora from most to least trusted
    #[serde(default)]
    pub trust_ranking: Vec<String>,

    pub corpora: BTreeMap<String, CorpusMapping>,
}

/// Label mapping for one corpus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusMapping {
    #[serde(default)]
    pub description: Option<String>,

    /// Raw corpus label to unified label
    pub labels: BTreeMap<String, StanceLabel>,
}

/// Validated, fingerprinted mapping table
#[derive(Debug, Clone)]
pub struct MappingTable {
    file: MappingFile,
    trust: HashMap<String, usize>,
    fingerprint: String,
}

impl MappingTable {
    pub fn from_file_spec(file: MappingFile) -> Result<Self> {
        if file.version.trim().is_empty() {
            return Err(Error::config("mapping table version must not be empty"));
        }
        if file.corpora.is_empty() {
            return Err(Error::config("mapping table defines no corpora"));
        }
        for (corpus, mapping) in &file.corpora {
            if corpus.trim().is_empty() {
                return Err(Error::config("mapping table has an empty corpus id"));
            }
            if mapping.labels.is_empty() {
                return Err(Error::config(format!("corpus `{corpus}` maps no labels")));
            }
            if mapping.labels.keys().any(|l| l.trim().is_empty()) {
                return Err(Error::config(format!("corpus `{corpus}` has an empty raw label")));
            }
        }

        let mut trust = HashMap::new();
        for (rank, corpus) in file.trust_ranking.iter().enumerate() {
            if !file.corpora.contains_key(corpus) {
                return Err(Error::config(format!(
                    "trust ranking names unknown corpus `{corpus}`"
                )));
            }
            if trust.insert(corpus.clone(), rank).is_some() {
                return Err(Error::config(format!(
                    "trust ranking lists corpus `{corpus}` more than once"
                )));
            }
        }

        let fingerprint = fingerprint(&file);
        Ok(Self {
            file,
            trust,
            fingerprint,
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: MappingFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("failed to parse mapping table: {e}")))?;
        Self::from_file_spec(file)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read mapping table {}: {e}", path.display()))
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn version(&self) -> &str {
        &self.file.version
    }

    pub fn description(&self) -> Option<&str> {
        self.file.description.as_deref()
    }

    /// SHA-256 over the version, trust ranking, and every mapping entry
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Known corpus ids, sorted
    pub fn corpora(&self) -> impl Iterator<Item = &str> {
        self.file.corpora.keys().map(String::as_str)
    }

    pub fn has_corpus(&self, corpus: &str) -> bool {
        self.file.corpora.contains_key(corpus)
    }

    /// Position in the trust ranking; 0 is the most trusted
    pub fn trust_rank(&self, corpus: &str) -> Option<usize> {
        self.trust.get(corpus).copied()
    }

    /// Number of (corpus, label) entries
    pub fn len(&self) -> usize {
        self.file.corpora.values().map(|m| m.labels.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unified label for a source label
    pub fn unify(&self, source: &SourceLabel) -> Result<StanceLabel> {
        let mapping = self.file.corpora.get(&source.corpus).ok_or_else(|| {
            Error::label_mapping(&source.corpus, &source.label, "corpus is not in the mapping table")
        })?;
        mapping.labels.get(source.label.trim()).copied().ok_or_else(|| {
            Error::label_mapping(
                &source.corpus,
                &source.label,
                format!("no entry in mapping table {}", self.file.version),
            )
        })
    }

    /// Unified label for a raw label of `corpus`
    pub fn unify_label(&self, label: &str, corpus: &str) -> Result<StanceLabel> {
        self.unify(&SourceLabel::new(corpus, label))
    }
}

fn fingerprint(file: &MappingFile) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file.version.as_bytes());
    hasher.update([0u8]);
    for corpus in &file.trust_ranking {
        hasher.update(corpus.as_bytes());
        hasher.update([0u8]);
    }
    hasher.update([1u8]);
    for (corpus, mapping) in &file.corpora {
        for (raw, unified) in &mapping.labels {
            hasher.update(corpus.as_bytes());
            hasher.update([0u8]);
            hasher.update(raw.as_bytes());
            hasher.update([0u8]);
            hasher.update(unified.as_str().as_bytes());
            hasher.update([b'\n']);
        }
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = r#"
version: "map-v1"
trust_ranking: [factbank, mpqa]
corpora:
  factbank:
    description: Event factuality
    labels:
      "CT+": claim
      "PR+": speculative
      "PS+": speculative
      "Uu": neutral
  mpqa:
    labels:
      subjective: opinion
      objective: neutral
"#;

    #[test]
    fn test_every_entry_resolves() {
        let table = MappingTable::from_yaml(TABLE).unwrap();
        assert_eq!(table.version(), "map-v1");
        assert_eq!(table.len(), 6);
        assert_eq!(
            table.unify(&SourceLabel::new("factbank", "CT+")).unwrap(),
            StanceLabel::Claim
        );
        assert_eq!(table.unify_label("subjective", "mpqa").unwrap(), StanceLabel::Opinion);
        assert_eq!(table.trust_rank("factbank"), Some(0));
        assert_eq!(table.trust_rank("mpqa"), Some(1));
    }

    #[test]
    fn test_unmapped_pairs_raise() {
        let table = MappingTable::from_yaml(TABLE).unwrap();
        let err = table.unify_label("CT-", "factbank").unwrap_err();
        assert!(matches!(err, Error::LabelMapping { ref corpus, ref label, .. }
            if corpus == "factbank" && label == "CT-"));
        assert!(matches!(
            table.unify_label("objective", "unknown"),
            Err(Error::LabelMapping { .. })
        ));
        // Labels are matched exactly, never by case folding.
        assert!(table.unify_label("Objective", "mpqa").is_err());
    }

    #[test]
    fn test_invalid_tables_rejected() {
        let unknown_trust = TABLE.replace("[factbank, mpqa]", "[factbank, semeval]");
        assert!(MappingTable::from_yaml(&unknown_trust).is_err());

        let duplicate_trust = TABLE.replace("[factbank, mpqa]", "[mpqa, mpqa]");
        assert!(MappingTable::from_yaml(&duplicate_trust).is_err());

        let no_version = TABLE.replace("\"map-v1\"", "\"\"");
        assert!(MappingTable::from_yaml(&no_version).is_err());

        let bad_label = TABLE.replace("objective: neutral", "objective: fact");
        assert!(MappingTable::from_yaml(&bad_label).is_err());
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = MappingTable::from_yaml(TABLE).unwrap();
        let b = MappingTable::from_yaml(TABLE).unwrap();
        let c = MappingTable::from_yaml(&TABLE.replace("objective: neutral", "objective: claim"))
            .unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }
}
