//! Label Unification Layer
//!
//! Resolves records from several corpora into one set of labeled examples.
//! Records describing the same sentence (after whitespace normalisation) are
//! grouped; each corpus casts one vote per sentence, abstaining when its own
//! records disagree. Votes are resolved in order:
//! 1. unanimous agreement
//! 2. the vote of the highest-ranked corpus in the trust ranking
//! 3. a strict plurality across corpora
//! 4. otherwise the sentence is ambiguous, excluded from training, and audited
//!
//! Grouping and iteration use ordered maps, so the outcome depends only on
//! the corpus contents and the mapping table.

use crate::corpus::{read_corpus, CorpusRecord, CorpusSpec};
use crate::mapping::MappingTable;
use serde::{Deserialize, Serialize};
use stance_core::{LabeledExample, Resolution, Result, SourceLabel, StanceLabel};
use stance_telemetry::{event_types, AuditEvent, AuditLog, AuditSeverity, AuditTrail};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Record whose label has no mapping entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmappedRecord {
    pub corpus: String,
    pub label: String,
    pub line: usize,
    pub text: String,
    pub reason: String,
}

/// Audit payload for a sentence whose labels disagreed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub text: String,
    /// Vote of each corpus that did not abstain
    pub votes: BTreeMap<String, StanceLabel>,
    /// Corpora whose own records disagreed
    pub abstained: Vec<String>,
    pub resolution: Resolution,
    pub unified: Option<StanceLabel>,
}

/// Counters describing one unification run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnificationStats {
    pub records: usize,
    pub malformed: usize,
    pub unmapped: usize,
    pub sentences: usize,
    pub unanimous: usize,
    pub trust_resolved: usize,
    pub majority_resolved: usize,
    pub ambiguous: usize,
    pub abstentions: usize,
    /// Mapped records per corpus
    pub per_corpus: BTreeMap<String, usize>,
    /// Trainable examples per unified label
    pub per_label: BTreeMap<String, usize>,
}

/// Everything a unification run produces
#[derive(Debug, Clone)]
pub struct UnificationOutcome {
    pub mapping_version: String,
    pub mapping_fingerprint: String,
    /// Examples with a unified label, in sentence order
    pub examples: Vec<LabeledExample>,
    /// Sentences no rule could resolve
    pub ambiguous: Vec<LabeledExample>,
    pub unmapped: Vec<UnmappedRecord>,
    pub audit: AuditTrail,
    pub stats: UnificationStats,
}

impl UnificationOutcome {
    /// Examples usable for training
    pub fn trainable(&self) -> impl Iterator<Item = &LabeledExample> {
        self.examples.iter().filter(|e| e.is_trainable())
    }

    /// Persist the audit trail as JSON lines
    pub fn write_audit(&self, log: &AuditLog, run_id: &str) -> Result<()> {
        log.write_trail(run_id, &self.audit)
    }
}

#[derive(Default)]
struct SentenceGroup {
    sources: BTreeSet<SourceLabel>,
    labels: BTreeMap<String, BTreeSet<StanceLabel>>,
}

/// Whitespace-normalised grouping key
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Unifies corpus labels through one mapping table
#[derive(Debug, Clone)]
pub struct LabelUnifier {
    table: Arc<MappingTable>,
}

impl LabelUnifier {
    pub fn new(table: Arc<MappingTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &MappingTable {
        &self.table
    }

    /// Unified label of one source label
    pub fn unify(&self, source: &SourceLabel) -> Result<StanceLabel> {
        self.table.unify(source)
    }

    /// Read and unify several corpora
    pub fn unify_corpora(&self, corpora: &[CorpusSpec]) -> Result<UnificationOutcome> {
        let mut audit = AuditTrail::new();
        let mut records = Vec::new();
        for spec in corpora {
            records.extend(read_corpus(spec, &mut audit)?);
        }
        Ok(self.unify_records(records, audit))
    }

    /// Unify already-parsed records, appending to `audit`
    pub fn unify_records(&self, records: Vec<CorpusRecord>, audit: AuditTrail) -> UnificationOutcome {
        let mut audit = audit;
        let mut stats = UnificationStats {
            records: records.len(),
            malformed: audit.count(event_types::MALFORMED_RECORD),
            ..UnificationStats::default()
        };
        let mut unmapped = Vec::new();
        let mut groups: BTreeMap<String, SentenceGroup> = BTreeMap::new();

        for record in records {
            let source = record.source_label();
            match self.table.unify(&source) {
                Ok(label) => {
                    *stats.per_corpus.entry(record.corpus.clone()).or_default() += 1;
                    let group = groups.entry(normalize_text(&record.text)).or_default();
                    group
                        .labels
                        .entry(record.corpus.clone())
                        .or_default()
                        .insert(label);
                    group.sources.insert(source);
                }
                Err(e) => {
                    warn!(corpus = %record.corpus, label = %record.label, line = record.line, "Unmapped label");
                    let entry = UnmappedRecord {
                        corpus: record.corpus,
                        label: record.label,
                        line: record.line,
                        text: record.text,
                        reason: e.to_string(),
                    };
                    audit.add_event(
                        AuditEvent::new(event_types::LABEL_UNMAPPED)
                            .with_severity(AuditSeverity::Warning)
                            .with_data(&entry),
                    );
                    unmapped.push(entry);
                }
            }
        }
        stats.unmapped = unmapped.len();
        stats.sentences = groups.len();

        let mut examples = Vec::new();
        let mut ambiguous = Vec::new();
        for (text, group) in groups {
            let (unified, resolution, votes, abstained) = self.resolve(&group);
            stats.abstentions += abstained.len();

            match &resolution {
                Resolution::Unanimous => stats.unanimous += 1,
                Resolution::TrustRanking { .. } => stats.trust_resolved += 1,
                Resolution::MajorityVote { .. } => stats.majority_resolved += 1,
                Resolution::Ambiguous => stats.ambiguous += 1,
            }

            let conflicted = !matches!(resolution, Resolution::Unanimous) || !abstained.is_empty();
            if conflicted {
                let severity = if unified.is_some() {
                    AuditSeverity::Info
                } else {
                    AuditSeverity::Warning
                };
                let event_type = if unified.is_some() {
                    event_types::CONFLICT_RESOLVED
                } else {
                    event_types::SENTENCE_AMBIGUOUS
                };
                audit.add_event(
                    AuditEvent::new(event_type)
                        .with_severity(severity)
                        .with_data(ConflictRecord {
                            text: text.clone(),
                            votes,
                            abstained,
                            resolution: resolution.clone(),
                            unified,
                        }),
                );
            }

            let example = LabeledExample::new(
                text,
                group.sources.into_iter().collect(),
                unified,
                self.table.version(),
                resolution,
            );
            match unified {
                Some(label) => {
                    *stats.per_label.entry(label.as_str().to_string()).or_default() += 1;
                    examples.push(example);
                }
                None => {
                    debug!(text = example.text(), "Ambiguous sentence excluded");
                    ambiguous.push(example);
                }
            }
        }

        info!(
            mapping = self.table.version(),
            sentences = stats.sentences,
            examples = examples.len(),
            ambiguous = stats.ambiguous,
            unmapped = stats.unmapped,
            malformed = stats.malformed,
            "Unified corpora"
        );

        UnificationOutcome {
            mapping_version: self.table.version().to_string(),
            mapping_fingerprint: self.table.fingerprint().to_string(),
            examples,
            ambiguous,
            unmapped,
            audit,
            stats,
        }
    }

    #[allow(clippy::type_complexity)]
    fn resolve(
        &self,
        group: &SentenceGroup,
    ) -> (
        Option<StanceLabel>,
        Resolution,
        BTreeMap<String, StanceLabel>,
        Vec<String>,
    ) {
        let mut votes = BTreeMap::new();
        let mut abstained = Vec::new();
        for (corpus, labels) in &group.labels {
            match labels.iter().next() {
                Some(label) if labels.len() == 1 => {
                    votes.insert(corpus.clone(), *label);
                }
                _ => abstained.push(corpus.clone()),
            }
        }

        let distinct: BTreeSet<StanceLabel> = votes.values().copied().collect();
        if distinct.len() == 1 {
            let label = distinct.iter().next().copied();
            return (label, Resolution::Unanimous, votes, abstained);
        }
        if distinct.is_empty() {
            return (None, Resolution::Ambiguous, votes, abstained);
        }

        let trusted = votes
            .iter()
            .filter_map(|(corpus, label)| self.table.trust_rank(corpus).map(|r| (r, corpus, *label)))
            .min_by_key(|(rank, _, _)| *rank);
        if let Some((_, corpus, label)) = trusted {
            let resolution = Resolution::TrustRanking {
                corpus: corpus.clone(),
            };
            return (Some(label), resolution, votes, abstained);
        }

        let mut tally: BTreeMap<StanceLabel, usize> = BTreeMap::new();
        for label in votes.values() {
            *tally.entry(*label).or_default() += 1;
        }
        let best = tally.values().copied().max().unwrap_or(0);
        let leaders: Vec<StanceLabel> = tally
            .iter()
            .filter(|(_, count)| **count == best)
            .map(|(label, _)| *label)
            .collect();
        if let [label] = leaders.as_slice() {
            let resolution = Resolution::MajorityVote {
                votes: best,
                voters: votes.len(),
            };
            return (Some(*label), resolution, votes, abstained);
        }

        (None, Resolution::Ambiguous, votes, abstained)
    }
}
