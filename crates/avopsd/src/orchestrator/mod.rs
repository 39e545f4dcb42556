//! Copilot Orchestration
//!
//! Entity → Telemetry → (Rules ∥ Retrieval) → Model → Merge → Persist.
//!
//! Invariants:
//! - Exactly one run record per invocation
//! - Retrieval and model failures fall back, they never surface
//! - Persistence failure is the only error a caller sees

pub mod collaborators;
pub mod engine;
pub mod llm_client;
pub mod llm_trait;
pub mod prompts;
pub mod retrieval;

pub use collaborators::{FakeKnowledgeSource, KnowledgeSource, RunSink, TelemetrySource};
pub use engine::{CopilotEngine, EngineSettings};
pub use llm_client::OllamaClient;
pub use llm_trait::{FakeModelInvoker, FakeModelInvokerBuilder, ModelError, ModelInvoker};
pub use prompts::{build_user_payload, SYSTEM_PROMPT};
pub use retrieval::retrieve;
