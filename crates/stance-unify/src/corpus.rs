//! JSON-lines corpus readers
//!
//! Each line holds one record `{"id"?, "text", "label"}`. Labels may be
//! strings, numbers, or booleans; they are kept verbatim as text. Malformed
//! lines are audited and skipped rather than failing the whole corpus.

use serde::{Deserialize, Serialize};
use stance_core::{Error, Result, SourceLabel};
use stance_telemetry::{event_types, AuditEvent, AuditSeverity, AuditTrail};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A corpus to ingest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorpusSpec {
    pub id: String,
    pub path: PathBuf,
}

impl CorpusSpec {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// One well-formed corpus record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusRecord {
    pub corpus: String,
    pub id: Option<String>,
    /// 1-based line number in the corpus file
    pub line: usize,
    pub text: String,
    pub label: String,
}

impl CorpusRecord {
    pub fn source_label(&self) -> SourceLabel {
        SourceLabel::new(&self.corpus, &self.label)
    }
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    id: Option<RawValue>,
    text: String,
    label: RawValue,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawValue {
    Text(String),
    Number(serde_json::Number),
    Flag(bool),
}

impl RawValue {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
            Self::Flag(b) => b.to_string(),
        }
    }
}

/// Details recorded for a skipped line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MalformedRecord {
    pub corpus: String,
    pub line: usize,
    pub reason: String,
}

/// Parse JSON-lines records from `reader`, auditing malformed lines
pub fn parse_corpus(
    corpus: &str,
    reader: impl BufRead,
    trail: &mut AuditTrail,
) -> Result<Vec<CorpusRecord>> {
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let parsed = serde_json::from_str::<RawRecord>(&line)
            .map_err(|e| e.to_string())
            .and_then(|raw| {
                let label = raw.label.into_string();
                if raw.text.trim().is_empty() {
                    Err("empty text".to_string())
                } else if label.trim().is_empty() {
                    Err("empty label".to_string())
                } else {
                    Ok(CorpusRecord {
                        corpus: corpus.to_string(),
                        id: raw.id.map(RawValue::into_string),
                        line: line_no,
                        text: raw.text,
                        label,
                    })
                }
            });

        match parsed {
            Ok(record) => records.push(record),
            Err(reason) => {
                warn!(corpus, line = line_no, %reason, "Skipping malformed corpus record");
                trail.add_event(
                    AuditEvent::new(event_types::MALFORMED_RECORD)
                        .with_severity(AuditSeverity::Warning)
                        .with_data(MalformedRecord {
                            corpus: corpus.to_string(),
                            line: line_no,
                            reason,
                        }),
                );
            }
        }
    }
    Ok(records)
}

/// Read one corpus file
pub fn read_corpus(spec: &CorpusSpec, trail: &mut AuditTrail) -> Result<Vec<CorpusRecord>> {
    let file = open(&spec.path)?;
    let records = parse_corpus(&spec.id, BufReader::new(file), trail)?;
    info!(corpus = %spec.id, records = records.len(), path = %spec.path.display(), "Read corpus");
    Ok(records)
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| {
        Error::config(format!("failed to open corpus {}: {e}", path.display()))
    })
}
