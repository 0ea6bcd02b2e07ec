//! Concrete Reasoner backed by an Anthropic-style messages API.
//!
//! Shape (API-key-bearing struct, configurable model, JSON request/response)
//! is the pattern the retrieval pack's `ob-agentic` LLM client uses;
//! networking discipline (bounded exponential backoff, 429/5xx handling) is
//! the teacher's `execute_with_retry`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::models::{ChangeProposal, ConflictAnalysis, JurisdictionClassification};
use crate::reasoner::{strip_code_fence, Reasoner};

const INITIAL_BACKOFF_MS: u64 = 100;

pub struct HttpReasoner {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
    timeout: Duration,
    max_retries: u32,
}

impl HttpReasoner {
    pub fn new(
        client: reqwest::Client,
        api_key: String,
        api_base: String,
        model: String,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            client,
            api_key,
            api_base,
            model,
            timeout,
            max_retries,
        }
    }

    async fn call_api(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
        stop: Option<&str>,
    ) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(stop) = stop {
            body["stop_sequences"] = json!([stop]);
        }

        let mut backoff = INITIAL_BACKOFF_MS;
        for attempt in 0..self.max_retries.max(1) {
            let request = self
                .client
                .post(format!("{}/messages", self.api_base))
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&body);

            match timeout(self.timeout, request.send()).await {
                Ok(Ok(response)) => {
                    if response.status().is_success() {
                        let parsed: MessagesResponse = response
                            .json()
                            .await
                            .context("decoding reasoner response body")?;
                        return Ok(parsed
                            .content
                            .into_iter()
                            .find_map(|block| block.text)
                            .unwrap_or_default());
                    } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        warn!(attempt = attempt + 1, "reasoner rate limited, backing off");
                        sleep(Duration::from_millis(backoff * 10)).await;
                    } else if response.status().is_server_error() {
                        warn!(status = %response.status(), "reasoner server error");
                    } else {
                        bail!("reasoner returned status {}", response.status());
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "reasoner request failed"),
                Err(_) => warn!("reasoner request timed out"),
            }
            if attempt + 1 < self.max_retries.max(1) {
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(30_000);
            }
        }
        bail!("reasoner unavailable after {} attempts", self.max_retries)
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl Reasoner for HttpReasoner {
    async fn complete(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f64,
        stop: Option<&str>,
    ) -> Result<String> {
        self.call_api(prompt, max_tokens, temperature, stop).await
    }

    async fn analyze_regulatory_impact(
        &self,
        update_text: &str,
        current_rules: &str,
        jurisdiction: &str,
    ) -> Result<ChangeProposal> {
        let prompt = format!(
            "You are a regulatory compliance analyst. Given a regulatory update and \
             the current rules for jurisdiction {jurisdiction}, respond with strict JSON \
             matching this schema: {{\"is_relevant\": bool, \"confidence\": number 0-1, \
             \"summary\": string, \"target_jurisdiction\": string, \"field_path\": string, \
             \"old_value\": any, \"new_value\": any, \"reasoning\": string, \
             \"effective_date\": string|null, \"requires_immediate_action\": bool, \
             \"source_text\": string}}.\n\nCurrent rules:\n{current_rules}\n\nUpdate:\n{update_text}"
        );

        let raw = match self.call_api(&prompt, 2048, 0.0, None).await {
            Ok(raw) => raw,
            Err(e) => {
                return Ok(parse_error_proposal(jurisdiction, update_text, &e.to_string()));
            }
        };

        match serde_json::from_str::<ChangeProposal>(strip_code_fence(&raw)) {
            Ok(proposal) => Ok(proposal),
            Err(e) => {
                warn!(error = %e, response = %raw, "reasoner returned malformed proposal JSON");
                Ok(parse_error_proposal(jurisdiction, update_text, &e.to_string()))
            }
        }
    }

    async fn classify_jurisdiction(
        &self,
        document_text: &str,
        document_type: &str,
    ) -> Result<JurisdictionClassification> {
        let prompt = format!(
            "Classify the jurisdiction and investor requirements implied by this \
             {document_type} document. Respond with strict JSON: {{\"jurisdiction\": string, \
             \"entity_type\": string, \"investor_classification\": string, \
             \"applicable_regulations\": [string], \"confidence\": number 0-1, \
             \"reasoning\": string}}.\n\nDocument:\n{document_text}"
        );
        let raw = self.call_api(&prompt, 1024, 0.1, None).await?;
        let mut classification: JurisdictionClassification =
            serde_json::from_str(strip_code_fence(&raw))
                .context("parsing jurisdiction classification response")?;
        classification.requires_manual_review = false;
        Ok(classification)
    }

    async fn resolve_conflicts(
        &self,
        jurisdictions: &[String],
        asset_type: &str,
        investor_types: &[String],
    ) -> Result<ConflictAnalysis> {
        let prompt = format!(
            "Resolve regulatory conflicts across jurisdictions {jurisdictions:?} for asset \
             type {asset_type} and investor types {investor_types:?}. Respond with strict \
             JSON: {{\"has_conflicts\": bool, \"conflicts\": [string], \"resolutions\": [string], \
             \"combined_requirements\": object, \"confidence\": number 0-1}}."
        );
        let raw = self.call_api(&prompt, 1536, 0.1, None).await?;
        let mut analysis: ConflictAnalysis = serde_json::from_str(strip_code_fence(&raw))
            .context("parsing conflict resolution response")?;
        analysis.used_fallback = false;
        Ok(analysis)
    }
}

fn parse_error_proposal(jurisdiction: &str, source_text: &str, error: &str) -> ChangeProposal {
    ChangeProposal {
        is_relevant: false,
        confidence: 0.0,
        summary: "unparseable reasoner response".to_string(),
        target_jurisdiction: jurisdiction.to_string(),
        field_path: String::new(),
        old_value: serde_json::Value::Null,
        new_value: serde_json::Value::Null,
        reasoning: format!("parse error: {error}"),
        effective_date: None,
        requires_immediate_action: false,
        source_text: source_text.chars().take(500).collect(),
    }
}
