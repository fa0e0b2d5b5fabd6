use serde::de::DeserializeOwned;

/// Cuts model output down to its outermost JSON object or array: from the
/// first `{` or `[` to the last matching closer. Models tend to wrap JSON
/// in prose or markdown fences.
pub fn extract_json(output: &str) -> Option<&str> {
    let start = output.find(['{', '['])?;
    let closer = if output[start..].starts_with('{') { '}' } else { ']' };
    let end = output.rfind(closer)?;
    (end > start).then(|| &output[start..=end])
}

pub fn parse_json<T: DeserializeOwned>(output: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(extract_json(output).unwrap_or(output))
}

/// Drops a leading `<think>...</think>` block emitted by reasoning models.
pub fn strip_reasoning(output: &str) -> &str {
    match output.rfind("</think>") {
        Some(end) => output[end + "</think>".len()..].trim(),
        None => output.trim(),
    }
}
