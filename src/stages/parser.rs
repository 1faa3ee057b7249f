//! Document parser adapter (spec §4.7): reads `files`, writes `parsed_files`
//! with per-file status. Real text extraction (PDF/DOCX/XLSX parsing) is out
//! of scope for the core per spec §4.7 — this adapter's contract is the
//! field shape, not a specific extraction backend.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::state::{File, ParseStatus};

use super::{Stage, StageContext};

pub struct DocumentParserStage;

#[async_trait]
impl Stage for DocumentParserStage {
    fn name(&self) -> &str {
        "parse"
    }

    fn required_input_field(&self) -> &str {
        "files"
    }

    async fn invoke(&self, mut plain: HashMap<String, Value>, _ctx: &StageContext<'_>) -> HashMap<String, Value> {
        let files: Vec<File> = plain
            .get("files")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        if files.is_empty() {
            plain.insert("error".to_string(), Value::String("no files to parse".to_string()));
            return plain;
        }

        let mut parsed_files = HashMap::new();
        let mut updated_files = Vec::with_capacity(files.len());
        for mut file in files {
            match extract_text(&file) {
                Ok(text) => {
                    parsed_files.insert(file.name.clone(), text.clone());
                    file.parsed_text = Some(text);
                    file.parse_status = ParseStatus::Parsed;
                }
                Err(message) => {
                    file.parse_status = ParseStatus::Error;
                    file.attributes.insert("parse_error".to_string(), Value::String(message));
                }
            }
            updated_files.push(file);
        }

        plain.insert("files".to_string(), serde_json::to_value(updated_files).unwrap());
        plain.insert("parsed_files".to_string(), serde_json::to_value(parsed_files).unwrap());
        plain
    }
}

/// Best-effort text extraction: UTF-8 text files decode directly; everything
/// else yields a placeholder that downstream stages can still classify on
/// (filename, mime) alone.
fn extract_text(file: &File) -> Result<String, String> {
    if file.raw_bytes.is_empty() {
        return Err("empty file".to_string());
    }
    match String::from_utf8(file.raw_bytes.clone()) {
        Ok(text) => Ok(text),
        Err(_) => Ok(format!("[binary content: {} ({})]", file.name, file.mime)),
    }
}
