//! Corpus files through unification to a persisted audit log

use proptest::prelude::*;
use stance_core::{Error, Resolution, SourceLabel, StanceLabel};
use stance_telemetry::{event_types, AuditLog, AuditTrail};
use stance_unify::prelude::*;
use stance_unify::{CorpusRecord, UnmappedRecord};
use std::fs;
use std::path::Path;
use std::sync::Arc;

const MAPPING: &str = r#"
version: "news-map-3"
description: Factuality, subjectivity and hedge corpora
trust_ranking: [factbank, mpqa]
corpora:
  factbank:
    labels:
      "CT+": claim
      "CT-": claim
      "PR+": speculative
      "PS+": speculative
      "Uu": neutral
  mpqa:
    labels:
      subjective: opinion
      objective: neutral
  hedges:
    labels:
      hedged: speculative
      certain: claim
      none: neutral
"#;

fn write(dir: &Path, name: &str, lines: &[&str]) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, lines.join("\n")).unwrap();
    path
}

fn corpora(dir: &Path) -> Vec<CorpusSpec> {
    vec![
        CorpusSpec::new(
            "factbank",
            write(
                dir,
                "factbank.jsonl",
                &[
                    r#"{"id": "fb1", "text": "The GDP grew by 3%.", "label": "CT+"}"#,
                    r#"{"id": "fb2", "text": "Rates may  fall next year.", "label": "PR+"}"#,
                    r#"{"id": "fb3", "text": "The meeting took place on Tuesday.", "label": "CT+"}"#,
                    r#"{"id": "fb4", "text": "Officials denied it.", "label": "CT?"}"#,
                ],
            ),
        ),
        CorpusSpec::new(
            "mpqa",
            write(
                dir,
                "mpqa.jsonl",
                &[
                    r#"{"text": "This policy is misguided.", "label": "subjective"}"#,
                    r#"{"text": "The meeting took place on Tuesday.", "label": "objective"}"#,
                    r#"{"text": "A truly bold decision.", "label": "subjective"}"#,
                    r#"{broken"#,
                ],
            ),
        ),
        CorpusSpec::new(
            "hedges",
            write(
                dir,
                "hedges.jsonl",
                &[
                    r#"{"text": "Rates may fall next year.", "label": "hedged"}"#,
                    r#"{"text": "A truly bold decision.", "label": "none"}"#,
                ],
            ),
        ),
    ]
}

#[test]
fn test_unify_corpus_files() {
    let dir = tempfile::tempdir().unwrap();
    let table = Arc::new(MappingTable::from_yaml(MAPPING).unwrap());
    let unifier = LabelUnifier::new(table);
    let outcome = unifier.unify_corpora(&corpora(dir.path())).unwrap();

    assert_eq!(outcome.mapping_version, "news-map-3");
    assert_eq!(outcome.stats.records, 9);
    assert_eq!(outcome.stats.malformed, 1);
    assert_eq!(outcome.stats.unmapped, 1);

    let find = |text: &str| {
        outcome
            .examples
            .iter()
            .chain(&outcome.ambiguous)
            .find(|e| e.text() == text)
            .unwrap()
    };

    assert_eq!(find("The GDP grew by 3%.").unified(), Some(StanceLabel::Claim));
    assert_eq!(
        find("Rates may fall next year.").resolution(),
        &Resolution::Unanimous
    );

    // factbank outranks mpqa
    let meeting = find("The meeting took place on Tuesday.");
    assert_eq!(meeting.unified(), Some(StanceLabel::Claim));
    assert_eq!(
        meeting.resolution(),
        &Resolution::TrustRanking {
            corpus: "factbank".to_string()
        }
    );

    // mpqa is ranked, hedges is not: the ranked voter decides
    let bold = find("A truly bold decision.");
    assert_eq!(bold.unified(), Some(StanceLabel::Opinion));

    let unmapped: &UnmappedRecord = &outcome.unmapped[0];
    assert_eq!(unmapped.corpus, "factbank");
    assert_eq!(unmapped.label, "CT?");

    assert_eq!(outcome.trainable().count(), outcome.examples.len());
    assert!(outcome.audit.verify());
}

#[test]
fn test_audit_log_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let table = Arc::new(MappingTable::from_yaml(MAPPING).unwrap());
    let outcome = LabelUnifier::new(table)
        .unify_corpora(&corpora(dir.path()))
        .unwrap();

    let log = AuditLog::new(dir.path().join("audit").join("unify.jsonl"));
    outcome.write_audit(&log, "run-1").unwrap();

    let trail = log.read_trail().unwrap();
    assert_eq!(trail.len(), outcome.audit.len());
    assert_eq!(trail.head(), outcome.audit.head());
    assert_eq!(log.query(event_types::LABEL_UNMAPPED).unwrap().len(), 1);
    assert_eq!(log.query(event_types::MALFORMED_RECORD).unwrap().len(), 1);
    assert_eq!(log.query(event_types::CONFLICT_RESOLVED).unwrap().len(), 2);
}

#[test]
fn test_reruns_are_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let table = Arc::new(MappingTable::from_yaml(MAPPING).unwrap());
    let unifier = LabelUnifier::new(table);
    let a = unifier.unify_corpora(&corpora(dir.path())).unwrap();
    let b = unifier.unify_corpora(&corpora(dir.path())).unwrap();
    assert_eq!(a.examples, b.examples);
    assert_eq!(a.stats, b.stats);
    assert_eq!(a.audit.head(), b.audit.head());
}

proptest! {
    #[test]
    fn prop_mapped_pairs_resolve_and_unmapped_raise(label in "[A-Za-z+?-]{1,6}") {
        let table = MappingTable::from_yaml(MAPPING).unwrap();
        let known = ["CT+", "CT-", "PR+", "PS+", "Uu"];
        let result = table.unify(&SourceLabel::new("factbank", &label));
        if known.contains(&label.as_str()) {
            prop_assert!(StanceLabel::ALL.contains(&result.unwrap()));
        } else {
            let is_mapping_error = matches!(result, Err(Error::LabelMapping { .. }));
            prop_assert!(is_mapping_error);
        }
    }

    #[test]
    fn prop_single_corpus_is_always_unanimous(labels in prop::collection::vec(0usize..2, 1..20)) {
        let table = Arc::new(MappingTable::from_yaml(MAPPING).unwrap());
        let records: Vec<CorpusRecord> = labels
            .iter()
            .enumerate()
            .map(|(i, l)| CorpusRecord {
                corpus: "mpqa".to_string(),
                id: None,
                line: i + 1,
                text: format!("Sentence number {i}."),
                label: ["subjective", "objective"][*l].to_string(),
            })
            .collect();
        let outcome = LabelUnifier::new(table).unify_records(records, AuditTrail::new());
        prop_assert_eq!(outcome.examples.len(), labels.len());
        prop_assert!(outcome.examples.iter().all(|e| e.resolution() == &Resolution::Unanimous));
    }
}
