//! Reasoner Gateway: the only component that talks to the external LLM and
//! the only one that knows the prompt shape.

pub mod fake;
pub mod http_client;

use async_trait::async_trait;

use crate::models::{ChangeProposal, ConflictAnalysis, JurisdictionClassification};

#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Free-form completion, used for ad-hoc prompts.
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
        stop: Option<&str>,
    ) -> anyhow::Result<String>;

    /// Embeds the `ChangeProposal` schema in the prompt and parses the
    /// response as strict JSON (spec.md §4.5). Temperature fixed at `0.0`
    /// for determinism.
    async fn analyze_regulatory_impact(
        &self,
        update_text: &str,
        current_rules: &str,
        jurisdiction: &str,
    ) -> anyhow::Result<ChangeProposal>;

    async fn classify_jurisdiction(
        &self,
        document_text: &str,
        document_type: &str,
    ) -> anyhow::Result<JurisdictionClassification>;

    async fn resolve_conflicts(
        &self,
        jurisdictions: &[String],
        asset_type: &str,
        investor_types: &[String],
    ) -> anyhow::Result<ConflictAnalysis>;
}

/// Strips leading/trailing Markdown code-fence noise (```` ```json ... ``` ````)
/// before a `serde_json::from_str` parse attempt, per spec.md §4.5.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_code_fence() {
        let raw = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_code_fence(raw), "{\"a\":1}");
    }

    #[test]
    fn leaves_plain_json_untouched() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
    }
}
