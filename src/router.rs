//! Specialized Router Entry Points (spec §4.9): the transport-facing
//! decision layer in front of the Manager. Grounded on
//! `AgentRouter._should_use_agent_processing` / `_is_file_selection_submission`
//! / `_parse_file_selection` (`agent_router.py`), restated as pure parsing
//! functions plus three entry methods that all converge on
//! `Manager.process`.

use std::sync::Arc;

use regex::Regex;

use crate::llm::LlmCaller;
use crate::manager::Manager;
use crate::model_selector::ModelSelector;
use crate::stages::smartsheet::{extract_sheet_id, is_known_smartsheet_url};
use crate::state::SharedState;

const DOMAIN_TOKENS: [&str; 6] = ["smartsheet", "estimate", "cost", "construction", "project", "takeoff"];
const FILE_SELECTION_MARKERS: [&str; 3] = ["selected_files", "analyze all", "analyze selected"];
const FILE_EXTENSIONS: [&str; 6] = [".pdf", ".xlsx", ".xls", ".docx", ".doc", ".txt"];
const LONG_MESSAGE_TOKEN_THRESHOLD: usize = 10;

pub enum RouterOutcome {
    /// A plain message short enough / generic enough to answer directly,
    /// without spinning up the full pipeline.
    DirectCompletion(String),
    Processed(SharedState),
}

pub struct Router {
    manager: Arc<Manager>,
    llm: Arc<dyn LlmCaller>,
    model_selector: Arc<ModelSelector>,
}

impl Router {
    pub fn new(manager: Arc<Manager>, llm: Arc<dyn LlmCaller>, model_selector: Arc<ModelSelector>) -> Self {
        Self { manager, llm, model_selector }
    }

    /// 1. Plain message (spec §4.9.1).
    pub async fn route_plain_message(&self, session_id: &str, message: &str) -> RouterOutcome {
        if should_run_pipeline(message) {
            let mut state = SharedState::new(session_id.to_string());
            state.query = Some(message.to_string());
            let result = self.manager.process(state).await;
            return RouterOutcome::Processed(result);
        }

        let selection = self.model_selector.select("manager");
        let credential = selection.credential.unwrap_or_default();
        let completion = self
            .llm
            .complete(
                message,
                &selection.model,
                &credential,
                Some("You are a helpful construction cost estimation assistant."),
                Some("manager"),
                1,
            )
            .await
            .unwrap_or_else(|e| format!("I couldn't reach the model right now ({e})."));

        RouterOutcome::DirectCompletion(completion)
    }

    /// 2. File-selection submission (spec §4.9.2).
    pub async fn route_file_selection(
        &self,
        session_id: &str,
        message: &str,
        available_files: &[String],
        additional_query: Option<&str>,
    ) -> SharedState {
        let selection = parse_file_selection(message, available_files);

        let mut state = SharedState::new(session_id.to_string());
        state.query = additional_query.map(String::from).or(Some(selection.additional_text.clone()));
        state.metadata.insert(
            "file_selection".to_string(),
            serde_json::to_value(&selection).expect("FileSelection always serializes"),
        );
        state
            .metadata
            .insert("available_files".to_string(), serde_json::to_value(available_files).unwrap());

        self.manager.process(state).await
    }

    /// 3. URL paste / structured trigger (spec §4.9.3).
    pub async fn route_url_paste(&self, session_id: &str, url: &str) -> SharedState {
        let mut state = SharedState::new(session_id.to_string());
        state.query = Some(url.to_string());

        if is_known_smartsheet_url(url) {
            if let Some(sheet_id) = extract_sheet_id(url) {
                state
                    .metadata
                    .insert("external_sheet_id".to_string(), serde_json::Value::String(sheet_id));
            }
        }

        self.manager.process(state).await
    }
}

fn should_run_pipeline(message: &str) -> bool {
    if is_known_smartsheet_url(message) || message.contains("http://") || message.contains("https://") {
        return true;
    }
    if is_file_selection_submission(message) {
        return true;
    }
    let lower = message.to_lowercase();
    if DOMAIN_TOKENS.iter().any(|t| lower.contains(t)) {
        return true;
    }
    message.split_whitespace().count() > LONG_MESSAGE_TOKEN_THRESHOLD
}

fn is_file_selection_submission(message: &str) -> bool {
    let lower = message.to_lowercase();
    if FILE_SELECTION_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    FILE_EXTENSIONS.iter().any(|ext| lower.contains(ext))
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FileSelection {
    pub action: String,
    pub selected_files: Vec<String>,
    pub additional_text: String,
}

/// Parses "analyze all", numeric indices/ranges ("1,3-5"), and filename
/// fragments out of a file-selection message (spec §4.9.2).
pub fn parse_file_selection(message: &str, available_files: &[String]) -> FileSelection {
    let lower = message.to_lowercase();

    if Regex::new(r"analyze\s+all").unwrap().is_match(&lower) {
        return FileSelection {
            action: "analyze_all".to_string(),
            selected_files: available_files.to_vec(),
            additional_text: String::new(),
        };
    }

    let mut selected = Vec::new();

    for idx in parse_index_ranges(message) {
        if let Some(name) = available_files.get(idx) {
            if !selected.contains(name) {
                selected.push(name.clone());
            }
        }
    }

    for file in available_files {
        if lower.contains(&file.to_lowercase()) && !selected.contains(file) {
            selected.push(file.clone());
        }
    }

    let additional_text = strip_selection_syntax(message);

    FileSelection {
        action: "analyze_selected".to_string(),
        selected_files: selected,
        additional_text,
    }
}

/// Parses comma-separated indices and ranges, 1-based as presented to users
/// ("1,3-5" → [0, 2, 3, 4]).
fn parse_index_ranges(message: &str) -> Vec<usize> {
    let Some(captures) = Regex::new(r"(?i)files?\s*[:#]?\s*((?:\d+(?:-\d+)?)(?:\s*,\s*\d+(?:-\d+)?)*)")
        .unwrap()
        .captures(message)
    else {
        return Vec::new();
    };

    let spec = &captures[1];
    let mut indices = Vec::new();
    for part in spec.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.trim().parse::<usize>(), end.trim().parse::<usize>()) {
                for i in start..=end {
                    if i > 0 {
                        indices.push(i - 1);
                    }
                }
            }
        } else if let Ok(i) = part.parse::<usize>() {
            if i > 0 {
                indices.push(i - 1);
            }
        }
    }
    indices
}

fn strip_selection_syntax(message: &str) -> String {
    let cleaned = Regex::new(r"(?i)(selected_files:|files?:|analyze|file\s*\d+)")
        .unwrap()
        .replace_all(message, "");
    let cleaned = Regex::new(r"[^a-zA-Z0-9\s.\-]").unwrap().replace_all(&cleaned, " ");
    cleaned.trim().to_string()
}
