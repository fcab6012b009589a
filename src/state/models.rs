// Data models for job state
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Marker written once a job has finished every stage
pub const COMPLETE_MARKER: &str = "100%";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub job_id: String,
    pub marker: String,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn is_complete(&self) -> bool {
        self.marker == COMPLETE_MARKER
    }
}

/// Time-bounded ownership of a job's artifacts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub job_id: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: Uuid,
    pub job_id: String,
    pub kind: ArtifactKind,
    pub path: String,
    pub sha256: String,
    pub bytes: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Audio,
    Array,
    Image,
    Video,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Audio => "audio",
            ArtifactKind::Array => "array",
            ArtifactKind::Image => "image",
            ArtifactKind::Video => "video",
        }
    }
}

impl FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(ArtifactKind::Audio),
            "array" => Ok(ArtifactKind::Array),
            "image" => Ok(ArtifactKind::Image),
            "video" => Ok(ArtifactKind::Video),
            other => Err(format!("unknown artifact kind '{}'", other)),
        }
    }
}
