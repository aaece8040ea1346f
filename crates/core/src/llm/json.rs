/// Pulls a single top-level JSON object out of free-form model text.
///
/// Models wrap payloads in prose or markdown fences; the contract is one
/// object per response, so fences are stripped first and the fallback is the
/// span from the first `{` to the last `}`. Returns `None` when no object is
/// present at all.
pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        // Remove Markdown fences (```json ... ``` or ``` ... ```).
        let mut inner = trimmed;
        if let Some(after_first) = inner.splitn(2, '\n').nth(1) {
            inner = after_first;
        }
        if let Some(end) = inner.rfind("```") {
            inner = &inner[..end];
        }
        let inner = inner.trim();
        if inner.is_empty() {
            return None;
        }
        return Some(inner.to_string());
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].trim().to_string())
}
