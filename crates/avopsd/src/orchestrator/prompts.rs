//! Prompt construction for the diagnosis model.

use avops_common::{DiagnosisBundle, RetrievalHit, TelemetrySample};
use serde_json::{json, Value};

/// Fixed system instruction: JSON only, three keys
pub const SYSTEM_PROMPT: &str = "You are an AV operations copilot.\n\
Return ONLY valid JSON with keys:\n\
diagnosis: array of strings\n\
next_steps: array of strings\n\
notes: string\n\
Be concise, technical, and consistent with given telemetry and KB snippets.";

/// Serialized user payload: task, telemetry, rule baseline and snippets
pub fn build_user_payload(
    task: &str,
    telemetry: Option<&TelemetrySample>,
    baseline: &DiagnosisBundle,
    hits: &[RetrievalHit],
) -> String {
    let telemetry = telemetry.map(|s| {
        json!({
            "device_id": s.device_id,
            "temperature": s.temperature,
            "packet_loss": s.packet_loss,
            "audio_dropouts": s.audio_dropouts,
            "error_code": s.error_code,
            "created_at": s.created_at.to_rfc3339(),
        })
    });

    let payload = json!({
        "task": task,
        "telemetry": telemetry.unwrap_or(Value::Null),
        "rule_based": {
            "diagnosis": baseline.diagnosis,
            "next_steps": baseline.next_steps,
        },
        "kb_snippets": hits,
    });

    payload.to_string()
}
