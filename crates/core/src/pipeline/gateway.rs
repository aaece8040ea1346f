use crate::llm::{json, ReasoningClient};
use crate::pipeline::error::PipelineError;
use crate::pipeline::prompt::PromptRequest;

/// Hard ceiling on the serialized request. Oversized requests are rejected
/// outright: truncating would silently shrink the universe the validator
/// later enforces.
pub const MAX_PROMPT_BYTES: usize = 120_000;

pub const DEFAULT_MAX_TOKENS: u32 = 2048;

/// Cap on raw-response excerpts kept for diagnostics.
const SNIPPET_CHARS: usize = 240;

/// Invokes the reasoning model once and extracts the JSON payload from its
/// free-form response. No retries here; a caller that wants another attempt
/// re-runs the whole pipeline under a new correlation id.
pub async fn request_advice(
    client: &dyn ReasoningClient,
    prompt: &PromptRequest,
    max_tokens: u32,
) -> Result<String, PipelineError> {
    let size = prompt.text.len();
    if size > MAX_PROMPT_BYTES {
        return Err(PipelineError::RequestTooLarge {
            size,
            max: MAX_PROMPT_BYTES,
        });
    }

    let raw = client
        .complete(&prompt.text, max_tokens)
        .await
        .map_err(|e| PipelineError::UpstreamUnavailable(format!("{e:#}")))?;

    match json::extract_json(&raw) {
        Some(payload) => Ok(payload),
        None => {
            let snippet = snippet(&raw, SNIPPET_CHARS);
            tracing::warn!(provider = client.name(), %snippet, "model response had no JSON object");
            Err(PipelineError::NoStructuredOutput { snippet })
        }
    }
}

/// First `cap` characters, char-boundary safe.
pub fn snippet(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let cut: String = text.chars().take(cap).collect();
    format!("{cut}…")
}
