//! Orchestration core for a construction cost-estimation assistant: the
//! Shared State object, Model Selector, LLM Caller, Intent Classifier,
//! Route Planner, Manager, Event Broadcaster, Stage Adapter Registry, and
//! Router entry points, wired together the way `bit-web24-Agent-B` wires its
//! own state machine, caller, and registry.

pub mod error;
pub mod events;
pub mod intent;
pub mod llm;
pub mod manager;
pub mod model_selector;
pub mod planner;
pub mod router;
pub mod stages;
pub mod state;
pub mod trace;

pub use error::CoreError;
pub use events::{Broadcaster, Event, EventKind};
pub use intent::{Intent, IntentClassifier, IntentResult};
pub use llm::{HttpLlmProvider, LlmCallError, LlmCaller, LlmProvider, MockLlmProvider, RetryingLlmCaller};
pub use manager::{Manager, ManagerConfig};
pub use model_selector::{ModelEntry, ModelSelector, Selection};
pub use planner::{RoutePlan, RoutePlanner, SkippedStage};
pub use router::{Router, RouterOutcome};
pub use stages::{standard_registry, Stage, StageContext, StageRegistry, StageRegistryBuilder};
pub use state::SharedState;
pub use trace::{Narrative, NarrativeEntry, Severity, Trace, TraceEntry};
