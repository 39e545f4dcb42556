//! Device reference extraction from free-text operator tasks.
//!
//! Best-effort heuristic: the first token that looks like a device id wins.
//! A task naming two devices silently gets the first one.

/// Characters trimmed from both ends of every token
const TOKEN_PUNCTUATION: &[char] = &[
    '(', ')', '[', ']', '{', '}', '<', '>', '"', '\'', '.', ',', ';', ':',
];

/// Literal prefix of named device ids (matched case-insensitively)
const DEVICE_PREFIX: &str = "device-";

/// Extract the first device reference from a task.
///
/// A token qualifies when it starts with `device-` (any case) or is made only
/// of ASCII digits. The token is returned as written, minus surrounding
/// punctuation.
pub fn extract_device_id(task: &str) -> Option<String> {
    task.split(|c: char| c.is_whitespace() || c == ',')
        .map(|raw| raw.trim_matches(TOKEN_PUNCTUATION))
        .filter(|token| !token.is_empty())
        .find(|token| is_device_token(token))
        .map(str::to_string)
}

fn is_device_token(token: &str) -> bool {
    let has_prefix = token
        .get(..DEVICE_PREFIX.len())
        .map(|head| head.eq_ignore_ascii_case(DEVICE_PREFIX))
        .unwrap_or(false);

    has_prefix || token.chars().all(|c| c.is_ascii_digit())
}
