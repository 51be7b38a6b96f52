//! Audit and winner records written by the extraction orchestrator.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::identity::CandidateId;

/// Outcome of one method attempt as recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    /// Text produced and accepted.
    Success,
    /// Text produced but below the accept threshold, or nothing usable found.
    TooShort,
    /// The method failed internally.
    Error,
    /// The method was not run.
    Skipped,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::TooShort => "too_short",
            AttemptStatus::Error => "error",
            AttemptStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "too_short" => Ok(Self::TooShort),
            "error" => Ok(Self::Error),
            "skipped" => Ok(Self::Skipped),
            _ => Err(format!("Invalid attempt status: {s}")),
        }
    }
}

/// Append-only audit row: one per method tried per candidate per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionAttempt {
    pub attempt_id: Uuid,
    pub candidate_id: CandidateId,
    pub domain: String,
    pub method_name: String,
    pub status: AttemptStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub ended_at: OffsetDateTime,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub text_length: usize,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// The accepted extraction for a candidate. At most one is live per candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub candidate_id: CandidateId,
    pub method_name: String,
    pub body_text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub extracted_at: OffsetDateTime,
}

/// Full method output kept in the document store, apart from the relational audit row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutput {
    pub attempt_id: Uuid,
    pub candidate_id: CandidateId,
    pub method_name: String,
    pub status: AttemptStatus,
    pub text: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
}
