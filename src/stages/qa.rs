//! QA validator adapter (spec §4.7): reads `estimate`, `takeoff_data`,
//! `scope_items`; writes `qa_findings`.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::state::{EstimateItem, FindingSeverity, QaFinding};

use super::{Stage, StageContext};

pub struct QaValidatorStage;

#[async_trait]
impl Stage for QaValidatorStage {
    fn name(&self) -> &str {
        "qa"
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
            plain.insert("error".to_string(), Value::String("no estimate to validate".to_string()));
            return plain;
        }

        let mut findings = Vec::new();
        for item in &estimate {
            if !item.is_total_consistent() {
                findings.push(QaFinding {
                    item_id: item.id.clone(),
                    finding_type: "total_mismatch".to_string(),
                    message: format!("total {} does not match quantity * unit_price", item.total),
                    severity: FindingSeverity::Error,
                });
            }
            if item.quantity <= 0.0 {
                findings.push(QaFinding {
                    item_id: item.id.clone(),
                    finding_type: "non_positive_quantity".to_string(),
                    message: "quantity should be greater than zero".to_string(),
                    severity: FindingSeverity::Warning,
                });
            }
            if item.unit_price <= 0.0 {
                findings.push(QaFinding {
                    item_id: item.id.clone(),
                    finding_type: "zero_unit_price".to_string(),
                    message: "unit price is zero or negative".to_string(),
                    severity: FindingSeverity::Warning,
                });
            }
        }

        plain.insert("qa_findings".to_string(), serde_json::to_value(findings).unwrap());
        plain
    }
}
