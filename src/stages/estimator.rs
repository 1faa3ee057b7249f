//! Estimator adapter (spec §4.7): reads `takeoff_data`, writes `estimate`;
//! computes `total = round(quantity * unit_price, 2)` (spec §3 invariant).

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::state::{round2, EstimateItem, TakeoffItem};

use super::{Stage, StageContext};

/// Placeholder unit price used when no pricing source is wired in; real
/// deployments plug a cost database in behind this adapter's contract.
const DEFAULT_UNIT_PRICE: f64 = 100.0;

pub struct EstimatorStage;

#[async_trait]
impl Stage for EstimatorStage {
    fn name(&self) -> &str {
        "estimate"
    }

    fn required_input_field(&self) -> &str {
        "takeoff_data"
    }

    async fn invoke(&self, mut plain: HashMap<String, Value>, _ctx: &StageContext<'_>) -> HashMap<String, Value> {
        let takeoff_data: Vec<TakeoffItem> = plain
            .get("takeoff_data")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        if takeoff_data.is_empty() {
            plain.insert("error".to_string(), Value::String("no takeoff data to estimate".to_string()));
            return plain;
        }

        let estimate: Vec<EstimateItem> = takeoff_data
            .into_iter()
            .map(|item| {
                let total = round2(item.quantity * DEFAULT_UNIT_PRICE);
                EstimateItem {
                    id: Uuid::new_v4().to_string(),
                    description: format!("CSI {} item from {}", item.division_code, item.source_file),
                    quantity: item.quantity,
                    unit: item.unit,
                    unit_price: DEFAULT_UNIT_PRICE,
                    total,
                    division_code: item.division_code,
                    notes: None,
                }
            })
            .collect();

        plain.insert("estimate".to_string(), serde_json::to_value(estimate).unwrap());
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
    async fn every_estimate_item_has_consistent_total() {
        let provider = Arc::new(MockLlmProvider::new(vec![]));
        let selector = ModelSelector::new(Default::default());
        let caller = RetryingLlmCaller::new(provider, Arc::new(ModelSelector::new(Default::default())));
        let ctx = StageContext { llm: &caller, model_selector: &selector };

        let mut plain = HashMap::new();
        plain.insert(
            "takeoff_data".to_string(),
            serde_json::to_value(vec![TakeoffItem {
                scope_item_id: "item-1".into(),
                division_code: "030000".into(),
                quantity: 12.5,
                unit: "CY".into(),
                method: "placeholder".into(),
                source_file: "plans.pdf".into(),
            }])
            .unwrap(),
        );

        let result = EstimatorStage.invoke(plain, &ctx).await;
        let estimate: Vec<EstimateItem> = serde_json::from_value(result["estimate"].clone()).unwrap();
        assert_eq!(estimate.len(), 1);
        assert!(estimate[0].is_total_consistent());
    }
}
