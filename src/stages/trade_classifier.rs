//! Trade classifier adapter (spec §4.7): reads `parsed_files`, writes
//! `trade_mapping`; may call the LLM. Tries the LLM first and falls back to
//! the CSI MasterFormat keyword table on failure — resolving spec §9's open
//! question (LLM-first, keyword fallback) the same way the LLM Caller and
//! Intent Classifier already do elsewhere in this crate. Keyword table
//! grounded verbatim on `CSI_DIVISIONS_KEYWORDS` (`trade_mapper_agent.py`).

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::model_selector::ModelSelector;
use crate::state::TradeMapping;

use super::{Stage, StageContext};

const CSI_DIVISIONS_KEYWORDS: &[(&str, &[&str])] = &[
    ("010000", &["general requirements", "summary of work", "allowances"]),
    ("020000", &["existing conditions", "demolition", "site remediation"]),
    ("030000", &["concrete", "cast-in-place", "precast"]),
    ("040000", &["masonry", "brick", "stone", "block"]),
    ("050000", &["metals", "structural steel", "metal fabrications"]),
    ("060000", &["rough carpentry", "finish carpentry", "millwork"]),
    ("070000", &["thermal and moisture protection", "roofing", "waterproofing", "insulation"]),
    ("080000", &["openings", "doors", "windows", "glazing", "hardware"]),
    ("090000", &["finishes", "drywall", "painting", "flooring", "ceilings"]),
    ("100000", &["specialties", "signage", "toilet accessories", "fire protection specialties"]),
    ("110000", &["equipment", "laboratory equipment", "kitchen equipment"]),
    ("120000", &["furnishings", "casework", "furniture", "window treatments"]),
    ("130000", &["special construction", "clean rooms", "aquatic facilities"]),
    ("140000", &["conveying equipment", "elevators", "escalators"]),
    ("210000", &["fire suppression", "sprinklers", "standpipes"]),
    ("220000", &["plumbing", "piping", "fixtures"]),
    ("230000", &["hvac", "heating, ventilating, and air conditioning", "ductwork", "air distribution"]),
    ("260000", &["electrical", "wiring", "lighting", "power generation"]),
    ("270000", &["communications", "data", "voice", "audiovisual"]),
    ("280000", &["electronic safety and security", "access control", "cctv"]),
    ("310000", &["earthwork", "excavation", "grading"]),
    ("320000", &["exterior improvements", "paving", "fences", "landscaping"]),
    ("330000", &["utilities", "water", "sewer", "storm drainage"]),
];

fn keyword_classify(filename: &str, content: &str) -> Vec<TradeMapping> {
    let lower = content.to_lowercase();
    let mut mappings = Vec::new();
    for (csi_code, keywords) in CSI_DIVISIONS_KEYWORDS {
        let mut found = Vec::new();
        for keyword in *keywords {
            let pattern = format!(r"\b{}\b", regex::escape(&keyword.to_lowercase()));
            if Regex::new(&pattern).ok().map(|re| re.is_match(&lower)).unwrap_or(false) {
                found.push(keyword.to_string());
            }
        }
        if !found.is_empty() {
            mappings.push(TradeMapping {
                trade_name: format!("Trade related to CSI {csi_code}"),
                division_code: csi_code.to_string(),
                keywords: found,
                source_file: filename.to_string(),
                confidence: 0.6,
            });
        }
    }
    mappings
}

pub struct TradeClassifierStage;

#[async_trait]
impl Stage for TradeClassifierStage {
    fn name(&self) -> &str {
        "classify_trades"
    }

    fn required_input_field(&self) -> &str {
        "parsed_files"
    }

    async fn invoke(&self, mut plain: HashMap<String, Value>, ctx: &StageContext<'_>) -> HashMap<String, Value> {
        let parsed_files: HashMap<String, String> = plain
            .get("parsed_files")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        if parsed_files.is_empty() {
            plain.insert("error".to_string(), Value::String("no parsed files to classify".to_string()));
            return plain;
        }

        let selection = ctx.model_selector.select("trade_classifier");

        // No credential at all is a hard stop (spec §7: credential errors are
        // critical, never fall back further) — distinct from a transient LLM
        // failure, which does fall back to the keyword table below.
        let credential = match selection.credential.as_deref() {
            Some(c) => c,
            None => {
                plain.insert(
                    "error".to_string(),
                    Value::String(format!(
                        "missing_credential: no API key resolved for trade_classifier (model {})",
                        selection.model
                    )),
                );
                return plain;
            }
        };

        let mut all_mappings = Vec::new();
        for (filename, content) in &parsed_files {
            let mapped = match llm_classify(ctx, &selection.model, credential, filename, content).await {
                Ok(mappings) if !mappings.is_empty() => mappings,
                _ => keyword_classify(filename, content),
            };
            all_mappings.extend(mapped);
        }

        if all_mappings.is_empty() {
            all_mappings.push(TradeMapping {
                trade_name: "General Construction".to_string(),
                division_code: "010000".to_string(),
                keywords: vec![],
                source_file: "multiple".to_string(),
                confidence: 0.3,
            });
        }

        plain.insert("trade_mapping".to_string(), serde_json::to_value(all_mappings).unwrap());
        plain
    }
}

async fn llm_classify(
    ctx: &StageContext<'_>,
    model: &str,
    credential: &str,
    filename: &str,
    content: &str,
) -> Result<Vec<TradeMapping>, crate::llm::LlmCallError> {
    let prompt = format!(
        "Identify CSI MasterFormat divisions present in this construction document excerpt \
         and reply as a JSON array of {{\"trade_name\":str,\"division_code\":str,\"confidence\":number}}.\n\
         FILE: {filename}\nEXCERPT: {}",
        &content[..content.len().min(1000)]
    );
    let raw = ctx
        .llm
        .complete(&prompt, model, credential, None, Some("trade_classifier"), 2)
        .await?;

    let parsed: Vec<serde_json::Value> = serde_json::from_str(&raw).unwrap_or_default();
    Ok(parsed
        .into_iter()
        .filter_map(|v| {
            Some(TradeMapping {
                trade_name: v.get("trade_name")?.as_str()?.to_string(),
                division_code: v.get("division_code")?.as_str()?.to_string(),
                keywords: vec![],
                source_file: filename.to_string(),
                confidence: v.get("confidence").and_then(|c| c.as_f64()).unwrap_or(0.7),
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_table_matches_concrete() {
        let mappings = keyword_classify("spec.txt", "All cast-in-place concrete shall conform to ACI 318.");
        assert!(mappings.iter().any(|m| m.division_code == "030000"));
    }

    #[test]
    fn keyword_table_avoids_partial_word_matches() {
        // "data" should not match inside "database" due to \b word boundaries.
        let mappings = keyword_classify("spec.txt", "The database stores no construction content.");
        assert!(!mappings.iter().any(|m| m.division_code == "270000"));
    }
}
