//! Smartsheet adapter (spec §4.9.3, §6): validates the external spreadsheet
//! URL in `query` against known host patterns, extracts the sheet ID, and
//! attaches it to `metadata.external_sheet_id`. Grounded on
//! `SmartsheetService.extract_sheet_id_from_url` / `validate_sheet_url`
//! (`smartsheet_service_new.py`), generalized from numeric-only sheet IDs to
//! alphanumeric ones since hosted sheet links in the wild use both.
//!
//! The real attachment list/download/upload/export operations named in the
//! external spreadsheet client contract (spec §6) belong to a network client
//! outside this core crate — out of scope here by spec §4.7's "internal
//! implementation out of scope" note.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::{Stage, StageContext};

const KNOWN_HOSTS: [&str; 2] = ["app.smartsheet.com", "smartsheet.com"];

pub fn is_known_smartsheet_url(url: &str) -> bool {
    KNOWN_HOSTS.iter().any(|host| {
        url.contains(&format!("://{host}/")) || url.contains(&format!("://{host}"))
    }) && (url.contains("/sheets/") || url.contains("lx="))
}

pub fn extract_sheet_id(url: &str) -> Option<String> {
    if let Ok(re) = Regex::new(r"/sheets/([A-Za-z0-9]+)") {
        if let Some(caps) = re.captures(url) {
            return Some(caps[1].to_string());
        }
    }
    if let Some(idx) = url.find("lx=") {
        let rest = &url[idx + 3..];
        let id: String = rest.chars().take_while(|c| c.is_ascii_alphanumeric()).collect();
        if !id.is_empty() {
            return Some(id);
        }
    }
    None
}

pub struct SmartsheetStage;

#[async_trait]
impl Stage for SmartsheetStage {
    fn name(&self) -> &str {
        "smartsheet"
    }

    fn required_input_field(&self) -> &str {
        "query"
    }

    async fn invoke(&self, mut plain: HashMap<String, Value>, _ctx: &StageContext<'_>) -> HashMap<String, Value> {
        let query = plain.get("query").and_then(|v| v.as_str()).unwrap_or("").to_string();

        if !is_known_smartsheet_url(&query) {
            plain.insert("error".to_string(), Value::String("query does not contain a valid Smartsheet URL".to_string()));
            return plain;
        }

        match extract_sheet_id(&query) {
            Some(sheet_id) => {
                let metadata = plain.entry("metadata".to_string()).or_insert_with(|| Value::Object(Default::default()));
                if let Value::Object(map) = metadata {
                    map.insert("external_sheet_id".to_string(), Value::String(sheet_id));
                }
            }
            None => {
                plain.insert("error".to_string(), Value::String("could not extract a sheet ID from the URL".to_string()));
            }
        }
        plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_sheet_id_from_direct_sheet_url() {
        assert_eq!(
            extract_sheet_id("https://app.smartsheet.com/sheets/ABC123"),
            Some("ABC123".to_string())
        );
    }

    #[test]
    fn extracts_sheet_id_from_lx_query_param() {
        assert_eq!(
            extract_sheet_id("https://app.smartsheet.com/b/home?lx=XYZ789"),
            Some("XYZ789".to_string())
        );
    }

    #[test]
    fn rejects_unknown_hosts() {
        assert!(!is_known_smartsheet_url("https://evil.example.com/sheets/ABC123"));
    }

    #[tokio::test]
    async fn invoke_attaches_sheet_id_to_metadata() {
        use crate::llm::{MockLlmProvider, RetryingLlmCaller};
        use crate::model_selector::ModelSelector;
        use std::sync::Arc;

        let provider = Arc::new(MockLlmProvider::new(vec![]));
        let selector = ModelSelector::new(Default::default());
        let caller = RetryingLlmCaller::new(provider, Arc::new(ModelSelector::new(Default::default())));
        let ctx = StageContext { llm: &caller, model_selector: &selector };

        let mut plain = HashMap::new();
        plain.insert(
            "query".to_string(),
            Value::String("https://app.smartsheet.com/sheets/ABC123".to_string()),
        );

        let result = SmartsheetStage.invoke(plain, &ctx).await;
        assert_eq!(result["metadata"]["external_sheet_id"], Value::String("ABC123".to_string()));
    }
}
