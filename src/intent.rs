//! Intent Classifier (spec §4.4).
//!
//! Decides what the user wants from the query, files, and already-populated
//! state fields. A strong pattern match short-circuits the LLM; otherwise the
//! LLM is consulted and its answer adjusted by a fixed rule set; any LLM
//! failure falls through to a deterministic rule table. Grounded on
//! `IntentClassifier` (`intent_classifier.py`): its `INTENT_DEFINITIONS`
//! table, `_enhance_with_rules`, and `_fallback_classification` map directly
//! onto the pattern/LLM/rule/fallback stages below.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::llm::LlmCaller;
use crate::state::SharedState;
use crate::trace::TraceEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    FullEstimation,
    FileAnalysis,
    ExportExisting,
    QuickEstimate,
    ScopeAnalysis,
    TradeIdentification,
    SmartsheetIntegration,
    RerunStage,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::FullEstimation => "full_estimation",
            Intent::FileAnalysis => "file_analysis",
            Intent::ExportExisting => "export_existing",
            Intent::QuickEstimate => "quick_estimate",
            Intent::ScopeAnalysis => "scope_analysis",
            Intent::TradeIdentification => "trade_identification",
            Intent::SmartsheetIntegration => "smartsheet_integration",
            Intent::RerunStage => "rerun_stage",
            Intent::Unknown => "unknown",
        }
    }

    fn from_str(s: &str) -> Self {
        match s {
            "full_estimation" => Intent::FullEstimation,
            "file_analysis" => Intent::FileAnalysis,
            "export_existing" => Intent::ExportExisting,
            "quick_estimate" => Intent::QuickEstimate,
            "scope_analysis" => Intent::ScopeAnalysis,
            "trade_identification" => Intent::TradeIdentification,
            "smartsheet_integration" => Intent::SmartsheetIntegration,
            "rerun_stage" => Intent::RerunStage,
            _ => Intent::Unknown,
        }
    }
}

/// Static per-intent record: required/optional stage names and the
/// confidence floor below which the Route Planner should distrust the
/// classification (spec §4.4).
#[derive(Debug, Clone)]
pub struct IntentDefinition {
    pub required_stages: Vec<&'static str>,
    pub optional_stages: Vec<&'static str>,
    pub confidence_threshold: f64,
}

pub fn intent_definitions() -> HashMap<Intent, IntentDefinition> {
    use Intent::*;
    let mut m = HashMap::new();
    m.insert(
        FullEstimation,
        IntentDefinition {
            required_stages: vec!["parse", "classify_trades", "extract_scope", "takeoff", "estimate"],
            optional_stages: vec!["export"],
            confidence_threshold: 0.7,
        },
    );
    m.insert(
        FileAnalysis,
        IntentDefinition {
            required_stages: vec!["parse", "classify_trades"],
            optional_stages: vec!["extract_scope"],
            confidence_threshold: 0.8,
        },
    );
    m.insert(
        ExportExisting,
        IntentDefinition {
            required_stages: vec!["export"],
            optional_stages: vec![],
            confidence_threshold: 0.9,
        },
    );
    m.insert(
        QuickEstimate,
        IntentDefinition {
            required_stages: vec!["estimate"],
            optional_stages: vec!["export"],
            confidence_threshold: 0.7,
        },
    );
    m.insert(
        ScopeAnalysis,
        IntentDefinition {
            required_stages: vec!["extract_scope", "takeoff"],
            optional_stages: vec!["estimate"],
            confidence_threshold: 0.8,
        },
    );
    m.insert(
        TradeIdentification,
        IntentDefinition {
            required_stages: vec!["classify_trades"],
            optional_stages: vec!["extract_scope"],
            confidence_threshold: 0.8,
        },
    );
    m.insert(
        SmartsheetIntegration,
        IntentDefinition {
            required_stages: vec!["smartsheet"],
            optional_stages: vec!["parse", "classify_trades", "extract_scope", "takeoff", "estimate"],
            confidence_threshold: 0.9,
        },
    );
    m.insert(
        RerunStage,
        IntentDefinition {
            required_stages: vec![],
            optional_stages: vec![],
            confidence_threshold: 0.7,
        },
    );
    m.insert(
        Unknown,
        IntentDefinition {
            required_stages: vec!["parse", "classify_trades", "extract_scope", "takeoff", "estimate"],
            optional_stages: vec!["export"],
            confidence_threshold: 0.0,
        },
    );
    m
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f64,
    pub source: String,
    pub reasoning: String,
}

const EXPORT_TOKENS: [&str; 4] = ["export", "download", "save", "format"];
const DOMAIN_TOKENS: [&str; 3] = ["estimate", "cost", "pricing"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

/// Very loose external-spreadsheet URL sniff used only to short-circuit into
/// the high-confidence pattern pass; the router's full validation (spec
/// §4.9.3) re-checks the URL against known host patterns.
fn looks_like_spreadsheet_url(query: &str) -> bool {
    query.contains("http://") || query.contains("https://")
}

pub struct IntentClassifier {
    definitions: HashMap<Intent, IntentDefinition>,
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl IntentClassifier {
    pub fn new() -> Self {
        Self {
            definitions: intent_definitions(),
        }
    }

    pub fn definitions(&self) -> &HashMap<Intent, IntentDefinition> {
        &self.definitions
    }

    /// `classify(state) → (intent, metadata)` (spec §4.4).
    pub async fn classify(
        &self,
        state: &mut SharedState,
        llm: &dyn LlmCaller,
        model: &str,
        credential: &str,
    ) -> IntentResult {
        let query = state.query.clone().unwrap_or_default();

        if let Some(pattern_result) = self.pattern_pass(state, &query) {
            state.append_trace(
                TraceEntry::info(
                    "intent_classifier",
                    format!(
                        "intent={} source=pattern confidence={:.2}",
                        pattern_result.intent.as_str(),
                        pattern_result.confidence
                    ),
                )
                .with_model(model),
            );
            return pattern_result;
        }

        let llm_result = self.llm_pass(state, &query, llm, model, credential).await;
        let result = match llm_result {
            Some(r) => self.enhance_with_rules(r, state, &query),
            None => self.fallback_classification(state, &query),
        };

        state.append_trace(TraceEntry::info(
            "intent_classifier",
            format!(
                "intent={} source={} confidence={:.2}",
                result.intent.as_str(),
                result.source,
                result.confidence
            ),
        ));
        result
    }

    fn pattern_pass(&self, state: &SharedState, query: &str) -> Option<IntentResult> {
        if looks_like_spreadsheet_url(query) {
            return Some(IntentResult {
                intent: Intent::SmartsheetIntegration,
                confidence: 0.9,
                source: "pattern".to_string(),
                reasoning: "query contains an external spreadsheet URL".to_string(),
            });
        }

        if contains_any(query, &EXPORT_TOKENS) && state.estimate.is_some() {
            return Some(IntentResult {
                intent: Intent::ExportExisting,
                confidence: 0.85,
                source: "pattern".to_string(),
                reasoning: "export tokens present with an existing estimate".to_string(),
            });
        }

        None
    }

    async fn llm_pass(
        &self,
        state: &SharedState,
        query: &str,
        llm: &dyn LlmCaller,
        model: &str,
        credential: &str,
    ) -> Option<IntentResult> {
        let file_extensions: Vec<String> = state
            .files
            .iter()
            .map(|f| f.name.rsplit('.').next().unwrap_or("unknown").to_lowercase())
            .collect();

        let prompt = format!(
            "Classify the user's intent for a construction cost estimation assistant.\n\
             CONTEXT: has_query={} query=\"{}\" file_count={} file_types={:?} \
             populated_outputs={{parsed_files:{}, trade_mapping:{}, scope_items:{}, takeoff_data:{}, estimate:{}}}\n\
             INTENTS: full_estimation, file_analysis, export_existing, quick_estimate, scope_analysis, \
             trade_identification, smartsheet_integration, rerun_stage, unknown\n\
             Respond as JSON: {{\"primary_intent\": str, \"confidence\": number, \"reasoning\": str}}",
            !query.trim().is_empty(),
            query,
            state.files.len(),
            file_extensions,
            state.parsed_files.is_some(),
            state.trade_mapping.is_some(),
            state.scope_items.is_some(),
            state.takeoff_data.is_some(),
            state.estimate.is_some(),
        );

        let raw = llm
            .complete(&prompt, model, credential, None, Some("intent_classifier"), 1)
            .await
            .ok()?;

        let parsed: serde_json::Value = serde_json::from_str(&raw).ok()?;
        let primary_intent = parsed.get("primary_intent")?.as_str()?;
        let confidence = parsed.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5);
        let reasoning = parsed
            .get("reasoning")
            .and_then(|v| v.as_str())
            .unwrap_or("llm classification")
            .to_string();

        Some(IntentResult {
            intent: Intent::from_str(primary_intent),
            confidence,
            source: "llm".to_string(),
            reasoning,
        })
    }

    fn enhance_with_rules(&self, mut result: IntentResult, state: &SharedState, query: &str) -> IntentResult {
        result.source = "llm+rule".to_string();

        // Rule 1: estimate exists + export tokens ⇒ force export_existing.
        if state.estimate.is_some() && contains_any(query, &EXPORT_TOKENS) {
            result.intent = Intent::ExportExisting;
            result.confidence = result.confidence.max(0.85);
            result.reasoning = "export_existing_data_rule".to_string();
        }
        // Rule 2: no files and no parsed outputs ⇒ downgrade file-requiring intents.
        else if state.files.is_empty() && state.parsed_files.is_none() {
            if matches!(result.intent, Intent::FullEstimation | Intent::FileAnalysis) {
                result.intent = Intent::QuickEstimate;
                result.confidence = result.confidence.max(0.7);
                result.reasoning = "no_files_fallback_rule".to_string();
            }
        }

        // Rule 3: domain tokens boost confidence.
        if contains_any(query, &DOMAIN_TOKENS) {
            result.confidence = (result.confidence + 0.1).min(1.0);
        }

        result
    }

    /// Deterministic rule table fallback (spec §4.4 step 4), grounded on
    /// `_fallback_classification`.
    fn fallback_classification(&self, state: &SharedState, query: &str) -> IntentResult {
        if state.estimate.is_some() && contains_any(query, &EXPORT_TOKENS) {
            return IntentResult {
                intent: Intent::ExportExisting,
                confidence: 0.8,
                source: "rule".to_string(),
                reasoning: "fallback: export tokens with existing estimate".to_string(),
            };
        }
        let has_prior_output = state.parsed_files.is_some()
            || state.trade_mapping.is_some()
            || state.scope_items.is_some()
            || state.takeoff_data.is_some();
        if !state.files.is_empty() || has_prior_output {
            return IntentResult {
                intent: Intent::FullEstimation,
                confidence: 0.7,
                source: "rule".to_string(),
                reasoning: "fallback: files or prior stage outputs present, assuming full estimation".to_string(),
            };
        }
        IntentResult {
            intent: Intent::QuickEstimate,
            confidence: 0.6,
            source: "rule".to_string(),
            reasoning: "fallback: no files or strong signal, defaulting to quick estimate".to_string(),
        }
    }

    /// Metadata payload accompanying the classification, as referenced by
    /// `classify(state) → (intent, metadata)`.
    pub fn metadata(&self, result: &IntentResult) -> serde_json::Value {
        let def = self.definitions.get(&result.intent);
        json!({
            "intent": result.intent.as_str(),
            "confidence": result.confidence,
            "source": result.source,
            "reasoning": result.reasoning,
            "required_stages": def.map(|d| d.required_stages.clone()).unwrap_or_default(),
            "optional_stages": def.map(|d| d.optional_stages.clone()).unwrap_or_default(),
        })
    }
}
