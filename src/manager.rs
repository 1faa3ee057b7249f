//! Manager / Orchestrator (spec §4.6): the single entry point that drives a
//! request from intake through to output, one stage at a time, broadcasting
//! progress and deciding continue-or-halt on every stage's outcome.
//! Grounded on `manager_agent.py`'s phase structure (intake → plan →
//! execute → present → finalize), restated over the typed Stage Adapter
//! Registry and Event Broadcaster built earlier in this crate.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::error::CoreError;
use crate::events::{Broadcaster, EventKind};
use crate::intent::IntentClassifier;
use crate::llm::LlmCaller;
use crate::model_selector::ModelSelector;
use crate::planner::RoutePlanner;
use crate::stages::{StageContext, StageRegistry};
use crate::state::{SharedState, Status};
use crate::trace::{NarrativeEntry, TraceEntry};

/// Substrings that mark a stage soft-failure as critical (spec §4.6(c)(6),
/// §7): halt immediately, never fall back further.
const CRITICAL_ERROR_SUBSTRINGS: [&str; 5] =
    ["api key", "authentication", "authorization", "critical", "missing_credential"];

fn is_critical(message: &str) -> bool {
    let lower = message.to_lowercase();
    CRITICAL_ERROR_SUBSTRINGS.iter().any(|s| lower.contains(s))
}

pub struct ManagerConfig {
    pub stage_deadline: Duration,
    pub request_deadline: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            stage_deadline: Duration::from_secs(120),
            request_deadline: Duration::from_secs(15 * 60),
        }
    }
}

pub struct Manager {
    registry: StageRegistry,
    model_selector: Arc<ModelSelector>,
    llm: Arc<dyn LlmCaller>,
    classifier: IntentClassifier,
    planner: RoutePlanner,
    broadcaster: Arc<Broadcaster>,
    config: ManagerConfig,
}

impl Manager {
    pub fn new(
        registry: StageRegistry,
        model_selector: Arc<ModelSelector>,
        llm: Arc<dyn LlmCaller>,
        broadcaster: Arc<Broadcaster>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            registry,
            model_selector,
            llm,
            classifier: IntentClassifier::new(),
            planner: RoutePlanner::new(),
            broadcaster,
            config,
        }
    }

    /// `process(state) → state` (spec §4.6).
    pub async fn process(&self, mut state: SharedState) -> SharedState {
        let deadline = tokio::time::Instant::now() + self.config.request_deadline;

        match tokio::time::timeout_at(deadline, self.process_inner(&mut state)).await {
            Ok(()) => state,
            Err(_) => {
                let err = CoreError::RequestTimeout(self.config.request_deadline.as_secs());
                state.set_error("manager", err.to_string());
                state.status = Status::Error;
                self.broadcaster.publish(
                    &state.session_id,
                    EventKind::WorkflowStateChange,
                    json!({"status": "error", "reason": "request_timeout"}),
                );
                state
            }
        }
    }

    async fn process_inner(&self, state: &mut SharedState) {
        if !self.intake(state) {
            return;
        }

        let sequence = self.plan_route(state).await;

        self.execute_sequence(state, &sequence).await;

        if state.status != Status::Error {
            self.finalize(state);
        }
    }

    /// (a) Universal intake.
    fn intake(&self, state: &mut SharedState) -> bool {
        let has_query = state.query.as_ref().map(|q| !q.trim().is_empty()).unwrap_or(false);
        let has_files = !state.files.is_empty();

        tracing::info!(session = %state.session_id, file_count = state.files.len(), "manager intake");
        state.append_trace(TraceEntry::info(
            "manager",
            format!("intake: files={} has_query={has_query}", state.files.len()),
        ));

        if !has_query && !has_files {
            state.status = Status::AwaitingUser;
            state.pending_user_action = Some("please provide a query, files, or a spreadsheet URL".to_string());
            return false;
        }

        state.status = Status::Classifying;
        true
    }

    /// (b) Plan route.
    async fn plan_route(&self, state: &mut SharedState) -> Vec<String> {
        let registered: Vec<String> = self.registry.names().to_vec();
        let selection = self.model_selector.select("intent_classifier");
        let credential = selection.credential.clone().unwrap_or_default();

        let plan = self
            .planner
            .plan(state, &registered, &self.classifier, self.llm.as_ref(), &selection.model, &credential)
            .await;

        state.append_narrative(NarrativeEntry::new(
            "manager",
            format!(
                "Planned {} as intent, running {} stage(s): {}",
                plan.intent.as_str(),
                plan.sequence.len(),
                plan.sequence.join(", ")
            ),
        ));

        self.broadcaster.publish(
            &state.session_id,
            EventKind::WorkflowStateChange,
            json!({
                "intent": plan.intent.as_str(),
                "confidence": plan.confidence,
                "sequence": plan.sequence,
                "skipped": plan.skipped.iter().map(|s| json!({"stage": s.stage, "reason": s.reason})).collect::<Vec<_>>(),
                "optimization_applied": plan.optimization_applied,
            }),
        );

        state.status = Status::Planning;
        plan.sequence
    }

    /// (c) Execute workflow.
    async fn execute_sequence(&self, state: &mut SharedState, sequence: &[String]) {
        state.status = Status::Running;
        let total_stages = sequence.len().max(1);

        for (completed, stage_name) in sequence.iter().enumerate() {
            let stage = match self.registry.get(stage_name) {
                Some(s) => s.clone(),
                None => {
                    let err = CoreError::UnknownStage(stage_name.clone());
                    state.append_trace(TraceEntry::warning(stage_name, err.to_string()));
                    continue;
                }
            };

            let selection = self.model_selector.select(stage_name);
            self.broadcaster.publish(
                &state.session_id,
                EventKind::ManagerThinking,
                json!({"stage": stage_name, "reason": "next stage in planned sequence"}),
            );
            self.broadcaster.publish(
                &state.session_id,
                EventKind::BrainAllocation,
                json!({"stage": stage_name, "model": selection.model, "credential_source": selection.credential_source}),
            );

            // Readiness check (spec §4.6(c)(3)).
            let required_field = stage.required_input_field();
            if !required_field.is_empty() && !self.field_populated(state, required_field) {
                state.append_trace(TraceEntry::warning(
                    stage_name,
                    format!("skipped: required input '{required_field}' still missing"),
                ));
                continue;
            }

            let plain = state.to_plain();
            let ctx = StageContext { llm: self.llm.as_ref(), model_selector: &self.model_selector };

            let invocation = tokio::time::timeout(self.config.stage_deadline, stage.invoke(plain, &ctx));

            match invocation.await {
                Ok(result_plain) => {
                    match SharedState::from_plain(result_plain) {
                        Ok(mut merged) => {
                            merged.session_id = state.session_id.clone();
                            *state = merged;
                        }
                        Err(e) => {
                            state.set_error(stage_name, format!("adapter returned unparseable state: {e}"));
                        }
                    }
                }
                Err(_) => {
                    let err = CoreError::StageTimeout {
                        stage: stage_name.clone(),
                        deadline_secs: self.config.stage_deadline.as_secs(),
                    };
                    state.append_trace(TraceEntry::warning(stage_name, err.to_string()));
                    continue;
                }
            }

            self.broadcaster.publish(
                &state.session_id,
                EventKind::AgentSubstep,
                json!({"stage": stage_name, "progress": (completed + 1) as f64 / total_stages as f64}),
            );

            if let Some(error) = state.error.clone() {
                // Adapters set `error` directly on the plain map; the Manager
                // is responsible for the accompanying severity=error trace
                // entry the invariant in spec §3 requires.
                if !state.trace.has_error_for(stage_name) {
                    state.append_trace(TraceEntry::error(stage_name, "stage reported error", &error));
                }
                if is_critical(&error) {
                    state.status = Status::Error;
                    self.broadcaster.publish(
                        &state.session_id,
                        EventKind::WorkflowStateChange,
                        json!({"status": "error", "stage": stage_name, "error": error}),
                    );
                    return;
                }
                state.append_trace(TraceEntry::info(stage_name, "recovered from non-critical error"));
                state.clear_error();
            } else {
                // Adapters never touch `state.trace` themselves (they only see
                // the plain map); the Manager records the one entry per
                // successful stage spec §3's "every planned stage has at
                // least one trace entry" invariant requires.
                state.append_trace(TraceEntry::info(stage_name, "completed"));
            }

            state.append_narrative(NarrativeEntry::new(stage_name, self.summarize(stage_name, state)));
        }
    }

    fn field_populated(&self, state: &SharedState, field: &str) -> bool {
        match field {
            "files" => !state.files.is_empty(),
            "parsed_files" => state.parsed_files.is_some(),
            "trade_mapping" => state.trade_mapping.is_some(),
            "scope_items" => state.scope_items.is_some(),
            "takeoff_data" => state.takeoff_data.is_some(),
            "estimate" => state.estimate.is_some(),
            "query" => state.query.as_ref().map(|q| !q.is_empty()).unwrap_or(false),
            _ => true,
        }
    }

    /// (d) Stepwise presentation: a short human summary of what changed.
    fn summarize(&self, stage_name: &str, state: &SharedState) -> String {
        match stage_name {
            "parse" => format!("Parsed {} file(s)", state.parsed_files.as_ref().map_or(0, |m| m.len())),
            "classify_trades" => format!(
                "Classified content into {} trade(s)",
                state.trade_mapping.as_ref().map_or(0, |v| v.len())
            ),
            "extract_scope" => format!("Extracted {} scope item(s)", state.scope_items.as_ref().map_or(0, |v| v.len())),
            "takeoff" => format!("Took off {} quantity item(s)", state.takeoff_data.as_ref().map_or(0, |v| v.len())),
            "estimate" => format!("Produced an estimate with {} line item(s)", state.estimate.as_ref().map_or(0, |v| v.len())),
            "qa" => format!("QA found {} finding(s)", state.qa_findings.as_ref().map_or(0, |v| v.len())),
            "export" => format!(
                "Exported to {}",
                state.exported_file.as_ref().map(|f| f.name.as_str()).unwrap_or("unknown")
            ),
            "smartsheet" => "Validated the Smartsheet link and attached its sheet ID".to_string(),
            other => format!("Completed stage '{other}'"),
        }
    }

    /// (e) Output management.
    fn finalize(&self, state: &mut SharedState) {
        state.status = Status::OutputReady;
        let mut formats = Vec::new();
        if state.estimate.is_some() {
            formats.push("estimate");
        }
        if state.exported_file.is_some() {
            formats.push("exported_file");
        }
        state.append_trace(TraceEntry::info(
            "manager",
            format!("finalize: available outputs = {formats:?}"),
        ));
        self.broadcaster.publish(
            &state.session_id,
            EventKind::WorkflowStateChange,
            json!({"status": "output_ready", "available_outputs": formats}),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmProvider, RetryingLlmCaller};
    use crate::stages::standard_registry;

    fn manager_with_no_credentials() -> Manager {
        let registry = standard_registry().unwrap();
        let selector = Arc::new(ModelSelector::with_env_reader(ModelSelector::default_table(), |_| None));
        let provider = Arc::new(MockLlmProvider::new(vec![]));
        let llm: Arc<dyn LlmCaller> = Arc::new(RetryingLlmCaller::new(provider, selector.clone()));
        let broadcaster = Arc::new(Broadcaster::new());
        Manager::new(registry, selector, llm, broadcaster, ManagerConfig::default())
    }

    #[tokio::test]
    async fn empty_request_awaits_user() {
        let manager = manager_with_no_credentials();
        let state = SharedState::new("sess-1");
        let result = manager.process(state).await;
        assert_eq!(result.status, Status::AwaitingUser);
        assert!(result.pending_user_action.is_some());
    }

    #[tokio::test]
    async fn export_only_plan_runs_single_stage() {
        let manager = manager_with_no_credentials();
        let mut state = SharedState::new("sess-1");
        state.query = Some("export to json".to_string());
        state.estimate = Some(vec![crate::state::EstimateItem {
            id: "i1".into(),
            description: "Foundation".into(),
            quantity: 10.0,
            unit: "CY".into(),
            unit_price: 150.0,
            total: 1500.0,
            division_code: "030000".into(),
            notes: None,
        }]);

        let result = manager.process(state).await;
        assert_eq!(result.status, Status::OutputReady);
        assert!(result.exported_file.is_some());
        let exported = result.exported_file.unwrap();
        assert!(exported.name.starts_with("estimate_"));
        assert_eq!(exported.mime, "application/json");
    }

    #[tokio::test]
    async fn fresh_full_pipeline_with_mock_llm_produces_estimate() {
        let registry = standard_registry().unwrap();
        let selector = Arc::new(ModelSelector::with_env_reader(ModelSelector::default_table(), |_| {
            Some("sk-test".to_string())
        }));
        let provider = Arc::new(MockLlmProvider::new(vec![]));
        let llm: Arc<dyn LlmCaller> = Arc::new(RetryingLlmCaller::new(provider, selector.clone()));
        let broadcaster = Arc::new(Broadcaster::new());
        let manager = Manager::new(registry, selector, llm, broadcaster, ManagerConfig::default());

        let mut state = SharedState::new("sess-2");
        state.query = Some("estimate this".to_string());
        state.files.push(crate::state::File::new(
            "plans.pdf",
            "application/pdf",
            b"cast-in-place concrete foundation walls".to_vec(),
        ));

        let result = manager.process(state).await;
        assert!(result.estimate.is_some());
        assert_eq!(result.status, Status::OutputReady);
        assert!(result.narrative.len() >= 5);
    }
}
