//! Takeoff adapter (spec §4.7): reads `scope_items`, writes `takeoff_data`
//! with quantity and unit per scope item.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::state::{ScopeItem, TakeoffItem};

use super::{Stage, StageContext};

/// Placeholder quantity used when no measurement source is available; real
/// deployments plug a measurement backend in behind this adapter without
/// changing its contract.
const DEFAULT_QUANTITY: f64 = 1.0;

pub struct TakeoffStage;

#[async_trait]
impl Stage for TakeoffStage {
    fn name(&self) -> &str {
        "takeoff"
    }

    fn required_input_field(&self) -> &str {
        "scope_items"
    }

    async fn invoke(&self, mut plain: HashMap<String, Value>, _ctx: &StageContext<'_>) -> HashMap<String, Value> {
        let scope_items: Vec<ScopeItem> = plain
            .get("scope_items")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        if scope_items.is_empty() {
            plain.insert("error".to_string(), Value::String("no scope items to take off".to_string()));
            return plain;
        }

        let takeoff_data: Vec<TakeoffItem> = scope_items
            .into_iter()
            .map(|item| TakeoffItem {
                scope_item_id: item.item_id,
                division_code: item.division_code,
                quantity: DEFAULT_QUANTITY,
                unit: item.unit_hint.unwrap_or_else(|| "EA".to_string()),
                method: "placeholder".to_string(),
                source_file: item.source_file,
            })
            .collect();

        plain.insert("takeoff_data".to_string(), serde_json::to_value(takeoff_data).unwrap());
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
    async fn produces_one_takeoff_item_per_scope_item() {
        let provider = Arc::new(MockLlmProvider::new(vec![]));
        let selector = ModelSelector::new(Default::default());
        let caller = RetryingLlmCaller::new(provider, Arc::new(ModelSelector::new(Default::default())));
        let ctx = StageContext { llm: &caller, model_selector: &selector };

        let mut plain = HashMap::new();
        plain.insert(
            "scope_items".to_string(),
            serde_json::to_value(vec![ScopeItem {
                item_id: "item-1".into(),
                trade_name: "Concrete".into(),
                division_code: "030000".into(),
                description: "d".into(),
                source_file: "plans.pdf".into(),
                work_type: None,
                unit_hint: Some("CY".into()),
            }])
            .unwrap(),
        );

        let result = TakeoffStage.invoke(plain, &ctx).await;
        let items: Vec<TakeoffItem> = serde_json::from_value(result["takeoff_data"].clone()).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].unit, "CY");
    }
}
