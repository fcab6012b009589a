// Per-job stage trace
// Append-only JSONL file recording every stage a job enters, with the marker it published

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceOutcome {
    Entered,
    Completed,
    Failed,
}

/// One line of a job trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// RFC 3339 timestamp of when this entry was created
    pub timestamp: String,

    pub job_id: String,

    /// Stage name, e.g. "decode" or "mel_spectrogram.images"
    pub stage: String,

    pub outcome: TraceOutcome,

    /// Progress marker published alongside this entry, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,

    pub message: String,

    /// Optional structured data (frame counts, artifact paths)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl TraceEntry {
    /// Serialize to JSON line (with newline)
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{}\n", json))
    }
}

/// Appends entries to one job's trace file
pub struct TraceWriter {
    file_path: PathBuf,
    job_id: String,
}

impl TraceWriter {
    pub fn new(file_path: PathBuf, job_id: impl Into<String>) -> Self {
        TraceWriter {
            file_path,
            job_id: job_id.into(),
        }
    }

    /// Creates the file (and its directory) if it doesn't exist
    pub fn write(&self, entry: &TraceEntry) -> Result<(), TraceError> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;

        let json_line = entry.to_json_line()?;
        file.write_all(json_line.as_bytes())?;
        file.flush()?;

        Ok(())
    }

    pub fn stage(&self, stage: impl Into<String>) -> TraceBuilder {
        TraceBuilder {
            job_id: self.job_id.clone(),
            stage: stage.into(),
            marker: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

/// Helper builder for creating trace entries
pub struct TraceBuilder {
    job_id: String,
    stage: String,
    marker: Option<String>,
}

impl TraceBuilder {
    pub fn marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    fn build(self, outcome: TraceOutcome, message: String, data: Option<serde_json::Value>) -> TraceEntry {
        TraceEntry {
            timestamp: Utc::now().to_rfc3339(),
            job_id: self.job_id,
            stage: self.stage,
            outcome,
            marker: self.marker,
            message,
            data,
        }
    }

    pub fn entered(self, message: impl Into<String>) -> TraceEntry {
        self.build(TraceOutcome::Entered, message.into(), None)
    }

    pub fn completed(self, message: impl Into<String>, data: serde_json::Value) -> TraceEntry {
        self.build(TraceOutcome::Completed, message.into(), Some(data))
    }

    pub fn failed(self, message: impl Into<String>) -> TraceEntry {
        self.build(TraceOutcome::Failed, message.into(), None)
    }
}

/// Read trace entries from a JSONL file
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let contents = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();

    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }

        let entry: TraceEntry = serde_json::from_str(line)?;
        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builder_fields() {
        let writer = TraceWriter::new(PathBuf::from("unused.jsonl"), "abc");
        let entry = writer.stage("decode").marker("4%").entered("Decoding");

        assert_eq!(entry.job_id, "abc");
        assert_eq!(entry.stage, "decode");
        assert_eq!(entry.outcome, TraceOutcome::Entered);
        assert_eq!(entry.marker.as_deref(), Some("4%"));
        assert!(entry.data.is_none());
    }

    #[test]
    fn test_completed_carries_data() {
        let writer = TraceWriter::new(PathBuf::from("unused.jsonl"), "abc");
        let entry = writer
            .stage("segment")
            .completed("Segmented", serde_json::json!({ "frames": 6 }));
        assert_eq!(entry.data.unwrap()["frames"], 6);
    }

    #[test]
    fn test_writer_appends() {
        let temp_dir = TempDir::new().unwrap();
        let trace_path = temp_dir.path().join("traces").join("abc.jsonl");
        let writer = TraceWriter::new(trace_path.clone(), "abc");

        writer.write(&writer.stage("decode").entered("Start")).unwrap();
        writer.write(&writer.stage("decode").failed("Boom")).unwrap();

        let entries = read_trace_file(&trace_path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].outcome, TraceOutcome::Entered);
        assert_eq!(entries[1].outcome, TraceOutcome::Failed);
        assert_eq!(entries[1].message, "Boom");
    }

    #[test]
    fn test_json_line_format() {
        let writer = TraceWriter::new(PathBuf::from("unused.jsonl"), "abc");
        let json_line = writer.stage("test").entered("Testing").to_json_line().unwrap();

        assert!(json_line.ends_with('\n'));
        assert!(!json_line.contains("\"marker\""));
        let parsed: TraceEntry = serde_json::from_str(json_line.trim()).unwrap();
        assert_eq!(parsed.stage, "test");
    }
}
