//! The Shared State object (spec §3, §4.1).
//!
//! One instance per request. Mutated in place by every stage the Manager
//! runs, then serialized to the response. Stage output fields default to
//! `None` so presence means "produced"; everything else defaults to an
//! empty container, never `null`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trace::{Narrative, NarrativeEntry, Trace, TraceEntry};

/// One uploaded or referenced input document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct File {
    pub name: String,
    pub mime: String,
    pub raw_bytes: Vec<u8>,
    pub parsed_text: Option<String>,
    pub parse_status: ParseStatus,
    pub attributes: HashMap<String, Value>,
}

impl File {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, raw_bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            raw_bytes,
            parsed_text: None,
            parse_status: ParseStatus::Raw,
            attributes: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Raw,
    Parsed,
    Error,
}

/// `{model_name, credential, params, token_usage, cost_estimate}` (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_name: Option<String>,
    pub credential: Option<String>,
    pub params: HashMap<String, Value>,
    pub token_usage: Option<TokenUsage>,
    pub cost_estimate: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeMapping {
    pub trade_name: String,
    pub division_code: String,
    pub keywords: Vec<String>,
    pub source_file: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeItem {
    pub item_id: String,
    pub trade_name: String,
    pub division_code: String,
    pub description: String,
    pub source_file: String,
    pub work_type: Option<String>,
    pub unit_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeoffItem {
    pub scope_item_id: String,
    pub division_code: String,
    pub quantity: f64,
    pub unit: String,
    pub method: String,
    pub source_file: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaFinding {
    pub item_id: String,
    pub finding_type: String,
    pub message: String,
    pub severity: FindingSeverity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateItem {
    pub id: String,
    pub description: String,
    pub quantity: f64,
    pub unit: String,
    pub unit_price: f64,
    pub total: f64,
    pub division_code: String,
    pub notes: Option<String>,
}

impl EstimateItem {
    /// `total` must equal `round(quantity * unit_price, 2)` (spec §3 invariant).
    pub fn is_total_consistent(&self) -> bool {
        let expected = round2(self.quantity * self.unit_price);
        (self.total - expected).abs() < 0.01
    }
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedFile {
    pub bytes: Vec<u8>,
    pub name: String,
    pub mime: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Received,
    Classifying,
    Planning,
    Running,
    AwaitingUser,
    OutputReady,
    Error,
}

/// The single typed object threaded through every stage of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedState {
    pub query: Option<String>,
    pub files: Vec<File>,
    pub metadata: HashMap<String, Value>,
    pub model_config: ModelConfig,
    pub history: Vec<HistoryTurn>,
    pub trace: Trace,
    pub narrative: Narrative,

    pub parsed_files: Option<HashMap<String, String>>,
    pub trade_mapping: Option<Vec<TradeMapping>>,
    pub scope_items: Option<Vec<ScopeItem>>,
    pub takeoff_data: Option<Vec<TakeoffItem>>,
    pub qa_findings: Option<Vec<QaFinding>>,
    pub estimate: Option<Vec<EstimateItem>>,
    pub exported_file: Option<ExportedFile>,

    pub status: Status,
    pub pending_user_action: Option<String>,
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub session_id: String,
    pub user_id: Option<String>,
}

impl SharedState {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            query: None,
            files: Vec::new(),
            metadata: HashMap::new(),
            model_config: ModelConfig::default(),
            history: Vec::new(),
            trace: Trace::new(),
            narrative: Narrative::new(),
            parsed_files: None,
            trade_mapping: None,
            scope_items: None,
            takeoff_data: None,
            qa_findings: None,
            estimate: None,
            exported_file: None,
            status: Status::Received,
            pending_user_action: None,
            error: None,
            created_at: now,
            updated_at: now,
            session_id: session_id.into(),
            user_id: None,
        }
    }

    /// Every mutation updates `updated_at` (spec §3 invariant).
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn append_trace(&mut self, entry: TraceEntry) {
        self.trace.record(entry);
        self.touch();
    }

    pub fn append_narrative(&mut self, entry: NarrativeEntry) {
        self.narrative.record(entry);
        self.touch();
    }

    /// Sets `state.error`, appending the accompanying `severity=error` trace
    /// entry the invariant in spec §3 requires.
    pub fn set_error(&mut self, stage_name: &str, message: impl Into<String>) {
        let message = message.into();
        self.append_trace(TraceEntry::error(stage_name, "error", &message));
        self.error = Some(message);
    }

    pub fn clear_error(&mut self) {
        self.error = None;
        self.touch();
    }

    /// Flattens to the plain key-value wire representation (spec §6).
    pub fn to_plain(&self) -> HashMap<String, Value> {
        let v = serde_json::to_value(self).expect("SharedState always serializes");
        match v {
            Value::Object(map) => map.into_iter().collect(),
            _ => unreachable!("SharedState serializes to an object"),
        }
    }

    /// Rebuilds a `SharedState` from its plain wire representation.
    pub fn from_plain(plain: HashMap<String, Value>) -> Result<Self, serde_json::Error> {
        let value = Value::Object(plain.into_iter().collect());
        serde_json::from_value(value)
    }
}
