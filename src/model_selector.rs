//! Model Selector (spec §4.2).
//!
//! For a named stage, picks a model and resolves an API credential from an
//! ordered list of environment variables, with fallback on failure. The
//! table itself is static configuration, grounded on the original system's
//! `AGENT_LLM_CONFIG` (`llm_selector.py`) — one ordered list of
//! `{model, credential_env_vars}` per stage, tried in order.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub model_name: String,
    pub credential_env_vars: Vec<String>,
}

impl ModelEntry {
    pub fn new(model_name: impl Into<String>, credential_env_vars: &[&str]) -> Self {
        Self {
            model_name: model_name.into(),
            credential_env_vars: credential_env_vars.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Selection {
    pub model: String,
    pub credential: Option<String>,
    pub credential_source: Option<String>,
}

const DEFAULT_STAGE: &str = "__default__";

pub struct ModelSelector {
    table: HashMap<String, Vec<ModelEntry>>,
    /// Reads an env var; swapped out in tests so credential resolution
    /// doesn't depend on the process environment.
    env_reader: Box<dyn Fn(&str) -> Option<String> + Send + Sync>,
}

impl ModelSelector {
    pub fn new(table: HashMap<String, Vec<ModelEntry>>) -> Self {
        Self {
            table,
            env_reader: Box::new(|var| std::env::var(var).ok()),
        }
    }

    /// Builds a selector with a substitute environment reader, so credential
    /// resolution doesn't depend on the process environment — used by this
    /// crate's own tests and by integration tests that construct a `Manager`
    /// without touching real environment variables.
    pub fn with_env_reader(
        table: HashMap<String, Vec<ModelEntry>>,
        env_reader: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            table,
            env_reader: Box::new(env_reader),
        }
    }

    /// The built-in stage → model table, grounded on `AGENT_LLM_CONFIG`.
    pub fn default_table() -> HashMap<String, Vec<ModelEntry>> {
        let mut t = HashMap::new();
        t.insert(
            "manager".to_string(),
            vec![ModelEntry::new("o4-mini", &["MODEL_CREDENTIAL_MANAGER", "MODEL_CREDENTIAL_PRIMARY"])],
        );
        t.insert(
            "intent_classifier".to_string(),
            vec![ModelEntry::new("o4-mini", &["MODEL_CREDENTIAL_INTENT", "MODEL_CREDENTIAL_PRIMARY"])],
        );
        t.insert(
            "document_parser".to_string(),
            vec![ModelEntry::new("gpt-4.1", &["MODEL_CREDENTIAL_PARSER", "MODEL_CREDENTIAL_PRIMARY"])],
        );
        t.insert(
            "trade_classifier".to_string(),
            vec![ModelEntry::new("gpt-4.1-mini", &["MODEL_CREDENTIAL_TRADE", "MODEL_CREDENTIAL_PRIMARY"])],
        );
        t.insert(
            "scope_extractor".to_string(),
            vec![ModelEntry::new("gpt-4.1-mini", &["MODEL_CREDENTIAL_SCOPE", "MODEL_CREDENTIAL_PRIMARY"])],
        );
        t.insert(
            "takeoff".to_string(),
            vec![ModelEntry::new("gpt-4.1-mini", &["MODEL_CREDENTIAL_TAKEOFF", "MODEL_CREDENTIAL_PRIMARY"])],
        );
        t.insert(
            "estimator".to_string(),
            vec![
                ModelEntry::new("o3", &["MODEL_CREDENTIAL_ESTIMATOR", "MODEL_CREDENTIAL_PRIMARY"]),
                ModelEntry::new("gpt-4o", &["MODEL_CREDENTIAL_FALLBACK", "MODEL_CREDENTIAL_PRIMARY"]),
            ],
        );
        t.insert(
            "qa_validator".to_string(),
            vec![ModelEntry::new("o4-mini", &["MODEL_CREDENTIAL_QA", "MODEL_CREDENTIAL_PRIMARY"])],
        );
        t.insert(
            "exporter".to_string(),
            vec![ModelEntry::new("gpt-4o", &["MODEL_CREDENTIAL_EXPORTER", "MODEL_CREDENTIAL_PRIMARY"])],
        );
        t.insert(
            DEFAULT_STAGE.to_string(),
            vec![ModelEntry::new("o4-mini", &["MODEL_CREDENTIAL_PRIMARY", "MODEL_CREDENTIAL_FALLBACK"])],
        );
        t
    }

    fn resolve_credential(&self, entry: &ModelEntry) -> (Option<String>, Option<String>) {
        for var in &entry.credential_env_vars {
            if let Some(value) = (self.env_reader)(var) {
                let trimmed = value.trim().to_string();
                if !trimmed.is_empty() {
                    return (Some(trimmed), Some(var.clone()));
                }
            }
        }
        (None, None)
    }

    /// `select(stage_name, state) → {model, credential, credential_source}`.
    /// The `state` parameter named in spec §4.2 carries no selection-relevant
    /// data today (the table is stage-keyed only) and is therefore omitted
    /// from the signature — callers don't have one to thread through yet.
    pub fn select(&self, stage_name: &str) -> Selection {
        let entries = self
            .table
            .get(stage_name)
            .or_else(|| self.table.get(DEFAULT_STAGE));

        let entry = match entries.and_then(|list| list.first()) {
            Some(e) => e.clone(),
            None => {
                return Selection {
                    model: "unknown".to_string(),
                    credential: None,
                    credential_source: None,
                }
            }
        };

        let (credential, credential_source) = self.resolve_credential(&entry);
        Selection {
            model: entry.model_name,
            credential,
            credential_source,
        }
    }

    /// `fallback(stage_name, failed_model, reason) → {...} | none`.
    pub fn fallback(&self, stage_name: &str, failed_model: &str, reason: &str) -> Option<Selection> {
        let entries = self.table.get(stage_name)?;
        let idx = entries.iter().position(|e| e.model_name == failed_model)?;
        let next = entries.get(idx + 1)?;

        let (credential, credential_source) = self.resolve_credential(next);
        tracing::info!(stage = stage_name, failed_model, reason, next = %next.model_name, "model fallback");
        Some(Selection {
            model: next.model_name.clone(),
            credential,
            credential_source,
        })
    }
}
