//! AVOps Common - Shared types, deterministic diagnosis logic and storage
//!
//! Everything in here is usable without a model endpoint: the entity
//! extractor, the rule engine and the response validator are pure, and the
//! storage types only need a SQLite file.

pub mod entity;
pub mod error;
pub mod knowledge;
pub mod response;
pub mod rules;
pub mod store;
pub mod types;

pub use entity::extract_device_id;
pub use error::AvopsError;
pub use knowledge::{to_fts_query, KnowledgeIndex, DEFAULT_TOP_K};
pub use response::{extract_json_object, finalize, parse_model_output, validate_bundle, FALLBACK_NOTE};
pub use rules::rule_based_diagnosis;
pub use store::CopilotDb;
pub use types::*;
