pub mod anthropic;
pub mod json;

/// Single-shot text completion against an external reasoning model. One call
/// per advisory run; retry orchestration belongs to the outer queue layer,
/// never to implementations.
#[async_trait::async_trait]
pub trait ReasoningClient: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, prompt: &str, max_tokens: u32) -> anyhow::Result<String>;
}
