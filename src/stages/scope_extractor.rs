//! Scope extractor adapter (spec §4.7): reads `trade_mapping`, writes
//! `scope_items`. One scope item per trade mapping, derived directly from
//! the mapping's trade name, division code, and keywords — no model call.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::state::{ScopeItem, TradeMapping};

use super::{Stage, StageContext};

pub struct ScopeExtractorStage;

#[async_trait]
impl Stage for ScopeExtractorStage {
    fn name(&self) -> &str {
        "extract_scope"
    }

    fn required_input_field(&self) -> &str {
        "trade_mapping"
    }

    async fn invoke(&self, mut plain: HashMap<String, Value>, _ctx: &StageContext<'_>) -> HashMap<String, Value> {
        let trade_mapping: Vec<TradeMapping> = plain
            .get("trade_mapping")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        if trade_mapping.is_empty() {
            plain.insert("error".to_string(), Value::String("no trade mapping to extract scope from".to_string()));
            return plain;
        }

        let scope_items: Vec<ScopeItem> = trade_mapping
            .into_iter()
            .map(|trade| ScopeItem {
                item_id: Uuid::new_v4().to_string(),
                trade_name: trade.trade_name,
                division_code: trade.division_code,
                description: format!("Scope for {} at {}", trade.source_file, trade.keywords.join(", ")),
                source_file: trade.source_file,
                work_type: None,
                unit_hint: None,
            })
            .collect();

        plain.insert("scope_items".to_string(), serde_json::to_value(scope_items).unwrap());
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
    async fn one_scope_item_per_trade_mapping() {
        let provider = Arc::new(MockLlmProvider::new(vec![]));
        let selector = ModelSelector::new(Default::default());
        let caller = RetryingLlmCaller::new(provider, Arc::new(ModelSelector::new(Default::default())));
        let ctx = StageContext { llm: &caller, model_selector: &selector };

        let mut plain = HashMap::new();
        plain.insert(
            "trade_mapping".to_string(),
            serde_json::to_value(vec![TradeMapping {
                trade_name: "Concrete".into(),
                division_code: "030000".into(),
                keywords: vec!["concrete".into()],
                source_file: "plans.pdf".into(),
                confidence: 0.9,
            }])
            .unwrap(),
        );

        let result = ScopeExtractorStage.invoke(plain, &ctx).await;
        let items: Vec<ScopeItem> = serde_json::from_value(result["scope_items"].clone()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].division_code, "030000");
    }
}
