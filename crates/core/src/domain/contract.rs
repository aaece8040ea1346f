//! Deserialization contract for model output. Everything here is untrusted
//! until it has passed every gate in [`crate::pipeline::validate`].

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAdvice {
    pub target_portfolio: Vec<ModelPosition>,
    pub explanation: ModelExplanation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelPosition {
    pub ticker: String,
    pub weight: f64,
    // Models oscillate between the two names; accept both.
    #[serde(alias = "reason")]
    pub rationale: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelExplanation {
    pub summary: String,
    pub bullets: Vec<String>,
    pub risks_to_watch: Vec<String>,
}
