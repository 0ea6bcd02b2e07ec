//! In-memory test double for the Reasoner Gateway.
//!
//! Same "trait plus mock impl" shape the teacher uses for
//! `vault::execution::{ExecutionAdapter, PaperExecutionAdapter}`: a queue of
//! canned responses consumed in order, falling back to a conservative
//! default once exhausted.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::models::{ChangeProposal, ConflictAnalysis, JurisdictionClassification};
use crate::reasoner::Reasoner;

pub struct FakeReasoner {
    proposals: Mutex<VecDeque<anyhow::Result<ChangeProposal>>>,
    classifications: Mutex<VecDeque<anyhow::Result<JurisdictionClassification>>>,
    conflicts: Mutex<VecDeque<anyhow::Result<ConflictAnalysis>>>,
}

impl Default for FakeReasoner {
    fn default() -> Self {
        Self {
            proposals: Mutex::new(VecDeque::new()),
            classifications: Mutex::new(VecDeque::new()),
            conflicts: Mutex::new(VecDeque::new()),
        }
    }
}

impl FakeReasoner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_proposal(&self, proposal: ChangeProposal) -> &Self {
        self.proposals.lock().push_back(Ok(proposal));
        self
    }

    pub fn queue_proposal_error(&self, message: impl Into<String>) -> &Self {
        self.proposals.lock().push_back(Err(anyhow::anyhow!(message.into())));
        self
    }

    pub fn queue_classification(&self, classification: JurisdictionClassification) -> &Self {
        self.classifications.lock().push_back(Ok(classification));
        self
    }

    pub fn queue_conflict_analysis(&self, analysis: ConflictAnalysis) -> &Self {
        self.conflicts.lock().push_back(Ok(analysis));
        self
    }
}

fn default_not_relevant(jurisdiction: &str, source_text: &str) -> ChangeProposal {
    ChangeProposal {
        is_relevant: false,
        confidence: 0.0,
        summary: "no canned response configured".to_string(),
        target_jurisdiction: jurisdiction.to_string(),
        field_path: String::new(),
        old_value: serde_json::Value::Null,
        new_value: serde_json::Value::Null,
        reasoning: "fake reasoner has no queued response".to_string(),
        effective_date: None,
        requires_immediate_action: false,
        source_text: source_text.chars().take(500).collect(),
    }
}

#[async_trait]
impl Reasoner for FakeReasoner {
    async fn complete(
        &self,
        prompt: &str,
        _max_tokens: u32,
        _temperature: f64,
        _stop: Option<&str>,
    ) -> anyhow::Result<String> {
        Ok(format!("echo: {prompt}"))
    }

    async fn analyze_regulatory_impact(
        &self,
        update_text: &str,
        _current_rules: &str,
        jurisdiction: &str,
    ) -> anyhow::Result<ChangeProposal> {
        match self.proposals.lock().pop_front() {
            Some(result) => result,
            None => Ok(default_not_relevant(jurisdiction, update_text)),
        }
    }

    async fn classify_jurisdiction(
        &self,
        _document_text: &str,
        _document_type: &str,
    ) -> anyhow::Result<JurisdictionClassification> {
        match self.classifications.lock().pop_front() {
            Some(result) => result,
            None => anyhow::bail!("fake reasoner has no queued classification"),
        }
    }

    async fn resolve_conflicts(
        &self,
        _jurisdictions: &[String],
        _asset_type: &str,
        _investor_types: &[String],
    ) -> anyhow::Result<ConflictAnalysis> {
        match self.conflicts.lock().pop_front() {
            Some(result) => result,
            None => anyhow::bail!("fake reasoner has no queued conflict analysis"),
        }
    }
}
