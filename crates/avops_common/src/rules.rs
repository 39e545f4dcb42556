//! Rule engine - deterministic diagnosis baseline from telemetry thresholds.
//!
//! This is the guaranteed fallback when the model path fails, so it must stay
//! pure: same sample in, same bundle out.

use crate::types::{DiagnosisBundle, TelemetrySample};

/// Audio dropouts above this count are flagged
pub const AUDIO_DROPOUT_THRESHOLD: i64 = 3;

/// Packet loss (percent) above this is flagged
pub const PACKET_LOSS_THRESHOLD: i64 = 5;

/// Temperature (°C) above this is flagged
pub const TEMPERATURE_THRESHOLD: i64 = 70;

/// One threshold rule: predicate plus what it contributes when it fires
struct ThresholdRule {
    fires: fn(&TelemetrySample) -> bool,
    diagnosis: &'static str,
    next_steps: &'static [&'static str],
}

/// Evaluated in order; rules are independent and all matching ones fire
const RULES: &[ThresholdRule] = &[
    ThresholdRule {
        fires: |s: &TelemetrySample| s.audio_dropouts > AUDIO_DROPOUT_THRESHOLD,
        diagnosis: "Audio dropouts are frequent.",
        next_steps: &[
            "Check audio cable integrity / connectors.",
            "Inspect DSP / audio interface logs.",
        ],
    },
    ThresholdRule {
        fires: |s: &TelemetrySample| s.packet_loss > PACKET_LOSS_THRESHOLD,
        diagnosis: "Packet loss is elevated.",
        next_steps: &["Run network ping/jitter test and check switch ports."],
    },
    ThresholdRule {
        fires: |s: &TelemetrySample| s.temperature > TEMPERATURE_THRESHOLD,
        diagnosis: "Device temperature is high.",
        next_steps: &["Ensure ventilation, check fan status, reduce load."],
    },
];

/// Derive the rule-based diagnosis for the latest sample, if any
pub fn rule_based_diagnosis(sample: Option<&TelemetrySample>) -> DiagnosisBundle {
    let Some(sample) = sample else {
        return DiagnosisBundle {
            diagnosis: vec!["No telemetry found for referenced device.".to_string()],
            next_steps: vec!["Ingest telemetry first, then rerun diagnosis.".to_string()],
            notes: String::new(),
        };
    };

    let mut bundle = DiagnosisBundle::default();
    for rule in RULES.iter().filter(|rule| (rule.fires)(sample)) {
        bundle.diagnosis.push(rule.diagnosis.to_string());
        bundle
            .next_steps
            .extend(rule.next_steps.iter().map(|s| s.to_string()));
    }

    if bundle.diagnosis.is_empty() {
        bundle
            .diagnosis
            .push("No obvious anomalies from latest telemetry.".to_string());
        bundle
            .next_steps
            .push("Monitor over time and compare against baseline.".to_string());
    }

    bundle
}
