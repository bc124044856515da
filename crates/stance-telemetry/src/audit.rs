//! Hash-chained audit trail for corpus ingestion decisions

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Well-known audit event types
pub mod event_types {
    /// A (corpus, label) pair had no entry in the mapping table
    pub const LABEL_UNMAPPED: &str = "label_unmapped";
    /// Corpora disagreed and no resolution rule applied
    pub const SENTENCE_AMBIGUOUS: &str = "sentence_ambiguous";
    /// A corpus record could not be decoded
    pub const MALFORMED_RECORD: &str = "malformed_record";
    /// Corpora disagreed and the conflict was resolved
    pub const CONFLICT_RESOLVED: &str = "conflict_resolved";
}

/// Audit trail with hash-chained events for tamper detection.
///
/// Timestamps are recorded but not hashed, so two runs over the same input
/// produce the same chain.
#[derive(Debug, Clone, Default)]
pub struct AuditTrail {
    events: Vec<AuditEvent>,
    chain_hash: Option<String>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, linking it to the previous one
    pub fn add_event(&mut self, event: AuditEvent) {
        let mut event = event;
        event.sequence = self.events.len() as u64;
        event.previous_hash = self.chain_hash.clone();

        let hash = compute_hash(&event);
        event.hash = Some(hash.clone());

        self.chain_hash = Some(hash);
        self.events.push(event);
    }

    /// Verify the integrity of the chain
    pub fn verify(&self) -> bool {
        let mut prev_hash: Option<String> = None;

        for (i, event) in self.events.iter().enumerate() {
            if event.sequence != i as u64 || event.previous_hash != prev_hash {
                return false;
            }
            if event.hash.as_deref() != Some(compute_hash(event).as_str()) {
                return false;
            }
            prev_hash = event.hash.clone();
        }

        true
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    /// Hash of the last event, if any
    pub fn head(&self) -> Option<&str> {
        self.chain_hash.as_deref()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events of the given type
    pub fn count(&self, event_type: &str) -> usize {
        self.events.iter().filter(|e| e.event_type == event_type).count()
    }

    /// Rebuild a trail from already-chained events without rehashing
    pub(crate) fn from_events(events: Vec<AuditEvent>) -> Self {
        let chain_hash = events.last().and_then(|e| e.hash.clone());
        Self { events, chain_hash }
    }
}

fn compute_hash(event: &AuditEvent) -> String {
    let mut hasher = Sha256::new();

    hasher.update(event.sequence.to_le_bytes());
    hasher.update(event.event_type.as_bytes());
    if let Some(ref data) = event.data {
        hasher.update(data.as_bytes());
    }
    hasher.update(event.severity.as_str().as_bytes());
    if let Some(ref prev) = event.previous_hash {
        hasher.update(prev.as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

/// A single audit event in the trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Position in the trail
    pub sequence: u64,

    /// Event type/category
    pub event_type: String,

    /// Event data (JSON serialized)
    pub data: Option<String>,

    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,

    /// Hash of this event
    pub hash: Option<String>,

    /// Hash of previous event (for chaining)
    pub previous_hash: Option<String>,

    pub severity: AuditSeverity,
}

impl AuditEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            sequence: 0,
            event_type: event_type.into(),
            data: None,
            timestamp_ms,
            hash: None,
            previous_hash: None,
            severity: AuditSeverity::Info,
        }
    }

    /// Set event data
    pub fn with_data(mut self, data: impl Serialize) -> Self {
        self.data = serde_json::to_string(&data).ok();
        self
    }

    pub fn with_severity(mut self, severity: AuditSeverity) -> Self {
        self.severity = severity;
        self
    }

    /// Decode the event data into `T`
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.data.as_deref().and_then(|d| serde_json::from_str(d).ok())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSeverity {
    Info,
    Warning,
    Error,
}

impl AuditSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}
