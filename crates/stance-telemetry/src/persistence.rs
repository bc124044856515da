//! Audit trail persistence
//!
//! Audit trails are written as JSON lines, one chained event per line, tagged
//! with the run that produced them. Files are written to a temporary sibling
//! and renamed into place so readers never observe a half-written log.

use crate::audit::{AuditEvent, AuditTrail};
use serde::{Deserialize, Serialize};
use stance_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Persisted audit event with run metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedAuditEvent {
    /// Unique event ID
    pub id: String,

    /// Run that emitted the event
    pub run_id: String,

    pub event: AuditEvent,
}

impl PersistedAuditEvent {
    pub fn new(run_id: impl Into<String>, event: AuditEvent) -> Self {
        Self {
            id: generate_event_id(),
            run_id: run_id.into(),
            event,
        }
    }
}

fn generate_event_id() -> String {
    format!("evt_{}", uuid::Uuid::new_v4())
}

/// JSON-lines audit log on disk
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the whole trail, replacing any previous log atomically
    pub fn write_trail(&self, run_id: &str, trail: &AuditTrail) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = self.path.with_extension("jsonl.tmp");
        {
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            for event in trail.events() {
                let record = PersistedAuditEvent::new(run_id, event.clone());
                serde_json::to_writer(&mut writer, &record)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        info!(
            path = %self.path.display(),
            events = trail.len(),
            "Wrote audit log"
        );
        Ok(())
    }

    /// Read all records in file order
    pub fn read_records(&self) -> Result<Vec<PersistedAuditEvent>> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: PersistedAuditEvent = serde_json::from_str(&line).map_err(|e| {
                Error::internal(format!(
                    "corrupt audit record at {}:{}: {}",
                    self.path.display(),
                    line_no + 1,
                    e
                ))
            })?;
            records.push(record);
        }
        debug!(path = %self.path.display(), records = records.len(), "Read audit log");
        Ok(records)
    }

    /// Read the log back into a trail and verify its hash chain
    pub fn read_trail(&self) -> Result<AuditTrail> {
        let events = self.read_records()?.into_iter().map(|r| r.event).collect();
        let trail = AuditTrail::from_events(events);
        if !trail.verify() {
            return Err(Error::internal(format!(
                "audit log {} failed hash-chain verification",
                self.path.display()
            )));
        }
        Ok(trail)
    }

    /// Records of a single event type
    pub fn query(&self, event_type: &str) -> Result<Vec<PersistedAuditEvent>> {
        Ok(self
            .read_records()?
            .into_iter()
            .filter(|r| r.event.event_type == event_type)
            .collect())
    }
}
