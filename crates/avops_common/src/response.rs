//! Model response validation and merge with the rule-based baseline.
//!
//! Model text arrives in every shape: bare JSON, JSON inside a code fence,
//! JSON wrapped in commentary, or nothing useful at all. Extraction is an
//! ordered chain of strategies; the first one that yields a JSON object wins.
//! Nothing in here returns an error - a bad response just means the baseline
//! is used.

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::types::{BundleOrigin, CopilotOutput, DiagnosisBundle, RetrievalHit};

/// Note attached to the baseline when it replaces the model output
pub const FALLBACK_NOTE: &str = "rule-based fallback: model unavailable or returned invalid output";

static JSON_FENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)```(?:json)?\s*(\{.*?\})\s*```").expect("fence pattern is valid")
});

type JsonObject = Map<String, Value>;

/// One way of pulling a JSON object out of model text
type ExtractionStrategy = fn(&str) -> Option<JsonObject>;

/// Tried in order, first success wins
const STRATEGIES: &[(&str, ExtractionStrategy)] = &[
    ("fenced_block", from_fenced_block),
    ("whole_text", from_whole_text),
    ("brace_span", from_brace_span),
];

/// Find a JSON object in raw model text
pub fn extract_json_object(text: &str) -> Option<JsonObject> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    STRATEGIES.iter().find_map(|(name, strategy)| {
        let found = strategy(trimmed);
        if found.is_some() {
            debug!("Model output parsed via {} strategy", name);
        }
        found
    })
}

fn parse_object(candidate: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn from_fenced_block(text: &str) -> Option<JsonObject> {
    let caps = JSON_FENCE_RE.captures(text)?;
    parse_object(caps.get(1)?.as_str())
}

fn from_whole_text(text: &str) -> Option<JsonObject> {
    parse_object(text)
}

fn from_brace_span(text: &str) -> Option<JsonObject> {
    let first = text.find('{')?;
    let last = text.rfind('}')?;
    if last <= first {
        return None;
    }
    parse_object(&text[first..=last])
}

/// Accept an object only if `diagnosis` and `next_steps` are arrays.
///
/// Array elements are coerced to strings; `notes` is optional.
pub fn validate_bundle(obj: &JsonObject) -> Option<DiagnosisBundle> {
    let diagnosis = obj.get("diagnosis")?.as_array()?;
    let next_steps = obj.get("next_steps")?.as_array()?;

    let notes = match obj.get("notes") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    };

    Some(DiagnosisBundle {
        diagnosis: diagnosis.iter().map(coerce_to_string).collect(),
        next_steps: next_steps.iter().map(coerce_to_string).collect(),
        notes,
    })
}

fn coerce_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Extract and validate in one step
pub fn parse_model_output(text: &str) -> Option<DiagnosisBundle> {
    extract_json_object(text).and_then(|obj| validate_bundle(&obj))
}

/// Merge: validated model bundle if present, annotated baseline otherwise.
///
/// Provenance (timestamp, retrieval flag, hits, origin) is attached either way.
pub fn finalize(
    model: Option<DiagnosisBundle>,
    baseline: DiagnosisBundle,
    hits: Vec<RetrievalHit>,
) -> CopilotOutput {
    let (bundle, origin) = match model {
        Some(bundle) => (bundle, BundleOrigin::Model),
        None => (
            DiagnosisBundle {
                notes: FALLBACK_NOTE.to_string(),
                ..baseline
            },
            BundleOrigin::RuleBased,
        ),
    };

    CopilotOutput {
        bundle,
        generated_at: Utc::now(),
        used_retrieval: !hits.is_empty(),
        sources: hits,
        origin,
    }
}
