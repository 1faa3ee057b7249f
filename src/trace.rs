//! Append-only decision log and human-facing narrative (spec §3, §4.6(d)).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub stage_name: String,
    pub decision: String,
    pub model_used: Option<String>,
    pub severity: Severity,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TraceEntry {
    pub fn info(stage_name: impl Into<String>, decision: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            decision: decision.into(),
            model_used: None,
            severity: Severity::Info,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model_used = Some(model.into());
        self
    }

    /// A `severity=error` entry carrying the error message (spec §3 invariant:
    /// `error` set non-empty ⇒ the stage also appended this kind of entry).
    pub fn error(stage_name: impl Into<String>, decision: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            decision: decision.into(),
            model_used: None,
            severity: Severity::Error,
            error: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn warning(stage_name: impl Into<String>, decision: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            decision: decision.into(),
            model_used: None,
            severity: Severity::Warning,
            error: None,
            timestamp: Utc::now(),
        }
    }
}

/// Append-only ordered sequence of `TraceEntry`. No stage may rewrite prior
/// entries — the only mutating method is `record`, which pushes.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: TraceEntry) {
        tracing::debug!(
            stage = %entry.stage_name,
            decision = %entry.decision,
            severity = ?entry.severity,
            "trace"
        );
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn for_stage(&self, stage_name: &str) -> Vec<&TraceEntry> {
        self.entries.iter().filter(|e| e.stage_name == stage_name).collect()
    }

    pub fn has_error_for(&self, stage_name: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.stage_name == stage_name && e.severity == Severity::Error)
    }

    /// `self` is a prefix of `later`: true by construction since `record` is
    /// the only mutator and it only ever appends.
    pub fn is_prefix_of(&self, later: &Trace) -> bool {
        self.entries.len() <= later.entries.len()
            && self
                .entries
                .iter()
                .zip(later.entries.iter())
                .all(|(a, b)| a.timestamp == b.timestamp && a.decision == b.decision && a.stage_name == b.stage_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeEntry {
    pub stage_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl NarrativeEntry {
    pub fn new(stage_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Narrative {
    entries: Vec<NarrativeEntry>,
}

impl Narrative {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: NarrativeEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[NarrativeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
