//! Stage Adapter Registry (spec §4.7): an immutable, name-keyed set of
//! pipeline steps. Grounded on the teacher's `ToolRegistry` (`tools.rs`) —
//! same register/lookup/execute shape, generalized from string tool calls to
//! async state-mutating adapters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CoreError;
use crate::llm::LlmCaller;
use crate::model_selector::ModelSelector;

pub mod estimator;
pub mod exporter;
pub mod parser;
pub mod qa;
pub mod scope_extractor;
pub mod smartsheet;
pub mod takeoff;
pub mod trade_classifier;

/// Everything an adapter needs to reach the LLM, without seeing the
/// Manager or the Broadcaster (spec §9: adapters never call the Manager).
pub struct StageContext<'a> {
    pub llm: &'a dyn LlmCaller,
    pub model_selector: &'a ModelSelector,
}

/// One pipeline step (spec §4.7). `invoke` is a pure function from the
/// adapter's viewpoint: plain state map in, plain state map out.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// The state field that must be populated before this stage runs, or
    /// `""` if the stage has no required input (spec §4.7).
    fn required_input_field(&self) -> &str;

    async fn invoke(
        &self,
        state_plain: HashMap<String, Value>,
        ctx: &StageContext<'_>,
    ) -> HashMap<String, Value>;
}

/// Immutable after construction (spec §4.7): stages are registered once via
/// `StageRegistryBuilder`, then looked up read-only for the life of the
/// process.
pub struct StageRegistry {
    stages: HashMap<String, Arc<dyn Stage>>,
    order: Vec<String>,
}

impl StageRegistry {
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Stage>> {
        self.stages.get(name)
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stages.contains_key(name)
    }
}

#[derive(Default)]
pub struct StageRegistryBuilder {
    stages: HashMap<String, Arc<dyn Stage>>,
    order: Vec<String>,
}

impl StageRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, stage: Arc<dyn Stage>) -> Result<Self, CoreError> {
        let name = stage.name().to_string();
        if self.stages.contains_key(&name) {
            return Err(CoreError::DuplicateStage(name));
        }
        self.order.push(name.clone());
        self.stages.insert(name, stage);
        Ok(self)
    }

    pub fn build(self) -> StageRegistry {
        StageRegistry {
            stages: self.stages,
            order: self.order,
        }
    }
}

/// The standard seven-stage pipeline plus the smartsheet adapter, wired with
/// their default model-selector stage-name mapping (spec §4.7 conventions).
pub fn standard_registry() -> Result<StageRegistry, CoreError> {
    StageRegistryBuilder::new()
        .register(Arc::new(parser::DocumentParserStage))?
        .register(Arc::new(trade_classifier::TradeClassifierStage))?
        .register(Arc::new(scope_extractor::ScopeExtractorStage))?
        .register(Arc::new(takeoff::TakeoffStage))?
        .register(Arc::new(estimator::EstimatorStage))?
        .register(Arc::new(qa::QaValidatorStage))?
        .register(Arc::new(exporter::ExporterStage))?
        .register(Arc::new(smartsheet::SmartsheetStage))
        .map(StageRegistryBuilder::build)
}

/// Reads a plain-map string field, tolerating both `null` and a missing key.
pub(crate) fn plain_str<'a>(plain: &'a HashMap<String, Value>, field: &str) -> Option<&'a str> {
    plain.get(field).and_then(|v| v.as_str())
}
