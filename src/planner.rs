//! Route Planner (spec §4.5): turns an intent into an ordered stage
//! sequence, skipping stages whose output is already present and fresh.
//! Grounded on `route_planner.py`'s dependency-chain + freshness analysis,
//! restated over the typed `SharedState` instead of free-form dicts.

use crate::intent::{Intent, IntentClassifier};
use crate::llm::LlmCaller;
use crate::state::SharedState;
use crate::trace::TraceEntry;

/// Canonical pipeline order; also the tie-break order for any ambiguity.
pub const CANONICAL_ORDER: [&str; 7] = [
    "parse",
    "classify_trades",
    "extract_scope",
    "takeoff",
    "estimate",
    "qa",
    "export",
];

const EXPORT_TOKENS: [&str; 4] = ["export", "download", "save", "format"];

fn upstream_of(stage: &str) -> Option<&'static str> {
    match stage {
        "classify_trades" => Some("parse"),
        "extract_scope" => Some("classify_trades"),
        "takeoff" => Some("extract_scope"),
        "estimate" => Some("takeoff"),
        "qa" => Some("estimate"),
        "export" => Some("estimate"),
        _ => None,
    }
}

/// Whether `state` already has a non-null output for `stage`.
fn has_output(state: &SharedState, stage: &str) -> bool {
    match stage {
        "parse" => state.parsed_files.is_some(),
        "classify_trades" => state.trade_mapping.is_some(),
        "extract_scope" => state.scope_items.is_some(),
        "takeoff" => state.takeoff_data.is_some(),
        "estimate" => state.estimate.is_some(),
        "qa" => state.qa_findings.is_some(),
        "export" => state.exported_file.is_some(),
        "smartsheet" => state.metadata.contains_key("external_sheet_id"),
        _ => false,
    }
}

/// A stage output is fresh iff its upstream output is present too, or it has
/// no upstream (spec §4.5 step 4).
fn is_fresh(state: &SharedState, stage: &str) -> bool {
    match upstream_of(stage) {
        Some(up) => has_output(state, up),
        None => true,
    }
}

#[derive(Debug, Clone)]
pub struct SkippedStage {
    pub stage: String,
    pub reason: String,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct RoutePlan {
    pub sequence: Vec<String>,
    pub skipped: Vec<SkippedStage>,
    pub intent: Intent,
    pub confidence: f64,
    pub reasoning: String,
    pub optimization_applied: bool,
}

pub struct RoutePlanner;

impl Default for RoutePlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutePlanner {
    pub fn new() -> Self {
        Self
    }

    /// `plan(state, registered_stages) → {sequence, skipped, intent, confidence, reasoning}`.
    pub async fn plan(
        &self,
        state: &mut SharedState,
        registered_stages: &[String],
        classifier: &IntentClassifier,
        llm: &dyn LlmCaller,
        model: &str,
        credential: &str,
    ) -> RoutePlan {
        let classification = classifier.classify(state, llm, model, credential).await;

        // Classification that never resolved to a known intent (malformed LLM
        // reply, and the rule table itself had nothing to latch onto) is the
        // planning failure spec §4.5's last paragraph guards against: fall
        // back to the safe full pipeline instead of building a plan around
        // an intent we can't interpret.
        let plan = if classification.intent == Intent::Unknown {
            self.fallback(registered_stages)
        } else {
            self.build_plan(state, registered_stages, &classification)
        };

        state.append_trace(TraceEntry::info(
            "route_planner",
            format!(
                "sequence={:?} skipped={:?} intent={} confidence={:.2} optimization_applied={}",
                plan.sequence,
                plan.skipped.iter().map(|s| s.stage.clone()).collect::<Vec<_>>(),
                plan.intent.as_str(),
                plan.confidence,
                plan.optimization_applied
            ),
        ));
        plan
    }

    fn build_plan(
        &self,
        state: &SharedState,
        registered_stages: &[String],
        classification: &crate::intent::IntentResult,
    ) -> RoutePlan {
        let defs = intent_definitions_for(classification.intent);
        let mut candidate: Vec<&str> = defs
            .iter()
            .filter(|s| registered_stages.iter().any(|r| r == *s))
            .copied()
            .collect();

        // Smartsheet special case (spec §9 open question, resolved in
        // DESIGN.md): when the intent is smartsheet_integration, the
        // adapter always leads the sequence even if document stages are
        // also queued for the same request. `intent_definitions_for`'s
        // canonical-order sort puts "smartsheet" last (it has no position in
        // `CANONICAL_ORDER`), so it has to be pulled back to the front here
        // regardless of whether it was already a candidate.
        if classification.intent == Intent::SmartsheetIntegration && registered_stages.iter().any(|r| r == "smartsheet") {
            candidate.retain(|s| *s != "smartsheet");
            candidate.insert(0, "smartsheet");
        }

        let query = state.query.clone().unwrap_or_default();
        let export_requested = contains_any(&query, &EXPORT_TOKENS);

        let mut sequence = Vec::new();
        let mut skipped = Vec::new();

        for stage in candidate {
            let skip = self.skip_policy(state, stage, export_requested);
            match skip {
                Some(reason) => skipped.push(SkippedStage {
                    stage: stage.to_string(),
                    reason,
                    confidence: classification.confidence,
                }),
                None => {
                    // Dependency closure: prepend any missing ancestor.
                    self.ensure_dependencies(state, stage, registered_stages, &mut sequence);
                    if !sequence.iter().any(|s| s == stage) {
                        sequence.push(stage.to_string());
                    }
                }
            }
        }

        dedupe_preserve_order(&mut sequence);

        RoutePlan {
            sequence,
            skipped,
            intent: classification.intent,
            confidence: classification.confidence,
            reasoning: classification.reasoning.clone(),
            optimization_applied: true,
        }
    }

    /// Returns `Some(reason)` if the stage should be skipped.
    fn skip_policy(&self, state: &SharedState, stage: &str, export_requested: bool) -> Option<String> {
        match stage {
            "parse" => (has_output(state, "parse") && is_fresh(state, "parse"))
                .then(|| "parsed_files present and fresh".to_string()),
            "classify_trades" => (has_output(state, "classify_trades")
                && is_fresh(state, "classify_trades")
                && has_output(state, "parse"))
            .then(|| "trade_mapping present and fresh".to_string()),
            "extract_scope" | "takeoff" | "estimate" | "qa" => {
                (has_output(state, stage) && is_fresh(state, stage))
                    .then(|| format!("{stage} output present and fresh"))
            }
            "export" => {
                if export_requested {
                    None
                } else {
                    (!has_output(state, "estimate")).then(|| "no estimate to export".to_string())
                }
            }
            _ => None,
        }
    }

    fn ensure_dependencies(
        &self,
        state: &SharedState,
        stage: &str,
        registered_stages: &[String],
        sequence: &mut Vec<String>,
    ) {
        if let Some(up) = upstream_of(stage) {
            if !has_output(state, up) && registered_stages.iter().any(|r| r == up) && !sequence.iter().any(|s| s == up) {
                self.ensure_dependencies(state, up, registered_stages, sequence);
                sequence.push(up.to_string());
            }
        }
    }

    /// Safe fallback used when classification or planning fails outright
    /// (spec §4.5 last paragraph).
    pub fn fallback(&self, registered_stages: &[String]) -> RoutePlan {
        let sequence = CANONICAL_ORDER
            .iter()
            .filter(|s| registered_stages.iter().any(|r| r == *s))
            .map(|s| s.to_string())
            .collect();
        RoutePlan {
            sequence,
            skipped: Vec::new(),
            intent: Intent::FullEstimation,
            confidence: 0.5,
            reasoning: "planner fallback: full canonical pipeline".to_string(),
            optimization_applied: false,
        }
    }
}

fn intent_definitions_for(intent: Intent) -> Vec<&'static str> {
    let defs = crate::intent::intent_definitions();
    let mut stages: Vec<&'static str> = defs
        .get(&intent)
        .map(|d| {
            let mut s = d.required_stages.clone();
            s.extend(d.optional_stages.clone());
            s
        })
        .unwrap_or_default();
    // Canonical tie-break order.
    stages.sort_by_key(|s| CANONICAL_ORDER.iter().position(|c| c == s).unwrap_or(usize::MAX));
    stages
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|n| lower.contains(n))
}

fn dedupe_preserve_order(v: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    v.retain(|s| seen.insert(s.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmProvider, RetryingLlmCaller};
    use crate::model_selector::ModelSelector;
    use crate::state::EstimateItem;
    use std::sync::Arc;

    fn registered() -> Vec<String> {
        vec![
            "parse", "classify_trades", "extract_scope", "takeoff", "estimate", "qa", "export",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn caller_with(responses: Vec<Result<String, crate::llm::RawProviderError>>) -> RetryingLlmCaller {
        let provider = Arc::new(MockLlmProvider::new(responses));
        let selector = Arc::new(ModelSelector::with_env_reader(Default::default(), |_| {
            Some("sk-test".to_string())
        }));
        RetryingLlmCaller::new(provider, selector)
    }

    #[tokio::test]
    async fn export_only_path_plans_single_stage() {
        let planner = RoutePlanner::new();
        let classifier = IntentClassifier::new();
        let mut state = SharedState::new("s1");
        state.query = Some("export to json".to_string());
        state.estimate = Some(vec![EstimateItem {
            id: "i1".into(),
            description: "Foundation".into(),
            quantity: 10.0,
            unit: "CY".into(),
            unit_price: 150.0,
            total: 1500.0,
            division_code: "030000".into(),
            notes: None,
        }]);
        let caller = caller_with(vec![]);

        let plan = planner
            .plan(&mut state, &registered(), &classifier, &caller, "o4-mini", "sk-test")
            .await;

        assert_eq!(plan.sequence, vec!["export".to_string()]);
        assert!(plan.skipped.iter().any(|s| s.stage == "parse"));
    }

    #[tokio::test]
    async fn skip_optimization_starts_at_extract_scope() {
        let planner = RoutePlanner::new();
        let classifier = IntentClassifier::new();
        let mut state = SharedState::new("s1");
        state.query = Some("continue".to_string());
        state.parsed_files = Some(std::collections::HashMap::from([("plans.pdf".to_string(), "...".to_string())]));
        state.trade_mapping = Some(vec![crate::state::TradeMapping {
            trade_name: "Concrete".into(),
            division_code: "030000".into(),
            keywords: vec![],
            source_file: "plans.pdf".into(),
            confidence: 0.9,
        }]);
        let caller = caller_with(vec![]);

        let plan = planner
            .plan(&mut state, &registered(), &classifier, &caller, "o4-mini", "sk-test")
            .await;

        assert!(plan.skipped.iter().any(|s| s.stage == "parse" && s.reason.contains("fresh")));
        assert!(plan.skipped.iter().any(|s| s.stage == "classify_trades"));
        assert_eq!(plan.sequence.first().map(String::as_str), Some("extract_scope"));
    }

    #[test]
    fn planner_idempotence_same_state_same_plan() {
        let planner = RoutePlanner::new();
        let plan_a = planner.fallback(&registered());
        let plan_b = planner.fallback(&registered());
        assert_eq!(plan_a.sequence, plan_b.sequence);
    }

    #[test]
    fn fallback_is_full_canonical_pipeline_with_flag_false() {
        let planner = RoutePlanner::new();
        let plan = planner.fallback(&registered());
        assert_eq!(plan.sequence, CANONICAL_ORDER.map(String::from).to_vec());
        assert!(!plan.optimization_applied);
        assert_eq!(plan.confidence, 0.5);
    }
}
