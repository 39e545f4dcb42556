//! Core data model for the diagnostic copilot.
//!
//! Telemetry samples and knowledge documents are owned by their storage and
//! only read here. A `CopilotRun` is the append-only audit record written once
//! per orchestration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Telemetry
// =============================================================================

/// One stored telemetry sample for a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Storage row id
    pub id: i64,
    pub device_id: String,
    pub temperature: i64,
    pub packet_loss: i64,
    pub audio_dropouts: i64,
    pub error_code: Option<String>,
    /// Capture time
    pub created_at: DateTime<Utc>,
}

/// Telemetry sample before it has been stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTelemetrySample {
    pub device_id: String,
    pub temperature: i64,
    pub packet_loss: i64,
    pub audio_dropouts: i64,
    #[serde(default)]
    pub error_code: Option<String>,
}

// =============================================================================
// Knowledge base
// =============================================================================

/// An indexed knowledge base article
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub id: i64,
    pub title: String,
    pub source: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A single full-text match, embedded in run output for explainability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalHit {
    /// Knowledge document id
    pub id: i64,
    pub title: String,
    pub source: Option<String>,
    /// Highlighted excerpt around the match
    pub snippet: String,
}

// =============================================================================
// Diagnosis
// =============================================================================

/// Diagnosis statements, next steps and notes.
///
/// Same shape whether it came from the rule engine or the model, so the merge
/// step can pick either without conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisBundle {
    pub diagnosis: Vec<String>,
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

/// Which side of the merge produced the final bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleOrigin {
    /// Validated model output
    Model,
    /// Deterministic rule engine baseline
    RuleBased,
}

impl BundleOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleOrigin::Model => "model",
            BundleOrigin::RuleBased => "rule_based",
        }
    }
}

/// Final output of one run: the chosen bundle plus provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopilotOutput {
    #[serde(flatten)]
    pub bundle: DiagnosisBundle,
    pub generated_at: DateTime<Utc>,
    /// True when retrieval produced at least one hit
    pub used_retrieval: bool,
    /// Retrieval hits passed to the model, kept for audit
    pub sources: Vec<RetrievalHit>,
    pub origin: BundleOrigin,
}

// =============================================================================
// Run records
// =============================================================================

/// What the orchestrator knew before calling the model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputContext {
    pub device_id: Option<String>,
    pub latest_telemetry: Option<TelemetrySample>,
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Pipeline completed (model output or rule-based fallback)
    Success,
    /// Caller went away while the model call was in flight
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunStatus::Success),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

/// Persisted, immutable audit record of one orchestration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopilotRun {
    pub id: i64,
    /// Owning user
    pub user_id: i64,
    pub task: String,
    pub input_context: InputContext,
    pub output: CopilotOutput,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
}

/// Run record before it is appended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCopilotRun {
    pub user_id: i64,
    pub task: String,
    pub input_context: InputContext,
    pub output: CopilotOutput,
    pub status: RunStatus,
}
