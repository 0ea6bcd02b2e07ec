//! Regulatory Oracle: the decision core. Consults the Reasoner for each
//! ingested update, applies the admission policy, persists accepted
//! proposals, and drives the review workflow.
//!
//! Grounded in `examples/original_source/ai/services/regulatory_oracle.py`'s
//! `RegulatoryOracle` (`process_update`/`approve_change`/`reject_change`/
//! `run_impact_simulation`).

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::models::{
    ChangelogEntry, PendingChange, PendingChangeStatus, RegulatoryUpdate, SimulationOutcome,
};
use crate::queue::ProposalQueue;
use crate::reasoner::Reasoner;
use crate::simulator::Simulator;
use crate::store::{PatchProvenance, RulesetStore};

/// Status record returned by `process_update` (spec.md §4.4 step 5).
#[derive(Debug)]
pub enum OracleOutcome {
    ProposalCreated(Box<PendingChange>),
    NotRelevant,
    LowConfidence,
    Error(String),
}

pub struct Oracle {
    store: Arc<RulesetStore>,
    reasoner: Arc<dyn Reasoner>,
    simulator: Arc<Simulator>,
    queue: Arc<ProposalQueue>,
    min_confidence: f64,
}

impl Oracle {
    pub fn new(
        store: Arc<RulesetStore>,
        reasoner: Arc<dyn Reasoner>,
        simulator: Arc<Simulator>,
        queue: Arc<ProposalQueue>,
        min_confidence: f64,
    ) -> Self {
        Self {
            store,
            reasoner,
            simulator,
            queue,
            min_confidence,
        }
    }

    /// Steps 1-5 of spec.md §4.4.
    pub async fn process_update(&self, update: &RegulatoryUpdate, jurisdiction: &str) -> OracleOutcome {
        let ruleset = match self.store.get(jurisdiction) {
            Ok(rs) => rs,
            Err(e) => return OracleOutcome::Error(format!("loading ruleset: {e}")),
        };
        let current_rules = serde_json::to_string(&ruleset.rules).unwrap_or_default();
        let update_text = format!("{}\n\n{}", update.title, update.summary);

        let proposal = match self
            .reasoner
            .analyze_regulatory_impact(&update_text, &current_rules, jurisdiction)
            .await
        {
            Ok(p) => p,
            Err(e) => return OracleOutcome::Error(format!("reasoner call failed: {e}")),
        };

        if !proposal.is_relevant {
            info!(jurisdiction, update_id = %update.id, "update judged not relevant");
            return OracleOutcome::NotRelevant;
        }
        if proposal.confidence < self.min_confidence {
            info!(
                jurisdiction,
                update_id = %update.id,
                confidence = proposal.confidence,
                "update below admission confidence threshold"
            );
            return OracleOutcome::LowConfidence;
        }

        let id = generate_change_id(jurisdiction, &proposal.field_path, &update.id);
        let mut change = PendingChange {
            id: id.clone(),
            created_at: Utc::now(),
            jurisdiction: jurisdiction.to_string(),
            status: PendingChangeStatus::PendingReview,
            proposal: proposal.clone(),
            source_update: Some(update.clone()),
            reviewed_by: None,
            reviewed_at: None,
            review_notes: None,
            applied_at: None,
            impact_simulation: None,
        };

        // Simulation failure does not invalidate the proposal (spec.md §4.4
        // step 4): attach whichever outcome we got.
        change.impact_simulation = Some(match self.simulator.simulate(&id, &proposal, false) {
            Ok(result) => SimulationOutcome::Result(result),
            Err(e) => {
                warn!(change_id = %id, error = %e, "impact simulation failed");
                SimulationOutcome::Failure { error: e.to_string() }
            }
        });

        if let Err(e) = self.queue.save(&change) {
            return OracleOutcome::Error(format!("persisting proposal: {e}"));
        }

        OracleOutcome::ProposalCreated(Box::new(change))
    }

    pub fn get(&self, id: &str) -> Result<PendingChange> {
        self.queue
            .get(id)?
            .ok_or_else(|| anyhow!("no pending change with id {id}"))
    }

    pub fn list_pending(&self, jurisdiction: Option<&str>) -> Result<Vec<PendingChange>> {
        self.queue.list_pending(jurisdiction)
    }

    /// `Approve(change_id, reviewer, notes, apply_immediately)`. Only valid
    /// from `pending_review`; approving an already-terminal change is a
    /// reviewer error (spec.md §7: "approving an already-terminal proposal"
    /// → 400, state unchanged), not a silent no-op.
    pub async fn approve(
        &self,
        id: &str,
        reviewer: &str,
        notes: Option<String>,
        apply_immediately: bool,
    ) -> Result<PendingChange> {
        let mut change = self.get(id)?;
        if change.status != PendingChangeStatus::PendingReview {
            return Err(anyhow!(
                "change {id} is not pending review (status: {:?})",
                change.status
            ));
        }

        change.status = PendingChangeStatus::Approved;
        change.reviewed_by = Some(reviewer.to_string());
        change.reviewed_at = Some(Utc::now());
        change.review_notes = notes;

        if apply_immediately {
            let provenance = PatchProvenance {
                change_id: change.id.clone(),
                old_value: change.proposal.old_value.clone(),
                source: change.jurisdiction.clone(),
                summary: change.proposal.summary.clone(),
            };
            match self.store.apply_patch(
                &change.jurisdiction,
                &change.proposal.field_path,
                change.proposal.new_value.clone(),
                provenance,
            ) {
                Ok(_) => {
                    change.status = PendingChangeStatus::Applied;
                    change.applied_at = Some(Utc::now());
                }
                Err(e) => {
                    warn!(change_id = %id, error = %e, "approved patch failed to apply, retry later");
                }
            }
        }

        self.queue.save(&change)?;
        Ok(change)
    }

    /// `Reject(change_id, reviewer, reason)`. Only valid from
    /// `pending_review`; rejecting an already-terminal change is a reviewer
    /// error (spec.md §7), not a silent no-op.
    pub fn reject(&self, id: &str, reviewer: &str, reason: String) -> Result<PendingChange> {
        let mut change = self.get(id)?;
        if change.status != PendingChangeStatus::PendingReview {
            return Err(anyhow!(
                "change {id} is not pending review (status: {:?})",
                change.status
            ));
        }
        change.status = PendingChangeStatus::Rejected;
        change.reviewed_by = Some(reviewer.to_string());
        change.reviewed_at = Some(Utc::now());
        change.review_notes = Some(reason);
        self.queue.save(&change)?;
        Ok(change)
    }

    /// `RunSimulation(change_id, use_live_data)`: re-runs the simulator and
    /// replaces the attached simulation.
    pub fn run_simulation(&self, id: &str, use_mock_data: bool) -> Result<PendingChange> {
        let mut change = self.get(id)?;
        change.impact_simulation = Some(
            match self
                .simulator
                .simulate(&change.id, &change.proposal, use_mock_data)
            {
                Ok(result) => SimulationOutcome::Result(result),
                Err(e) => SimulationOutcome::Failure { error: e.to_string() },
            },
        );
        self.queue.save(&change)?;
        Ok(change)
    }

    /// `History(jurisdiction, limit)`: reads the Store's changelog directly.
    pub fn history(&self, jurisdiction: &str, limit: usize) -> Result<Vec<ChangelogEntry>> {
        let ruleset = self.store.get(jurisdiction)?;
        let mut entries = ruleset.changelog;
        entries.reverse();
        entries.truncate(limit);
        Ok(entries)
    }
}

/// 12-hex-char content hash id, `chg_<hash>` (spec.md §3/§4.4). `sha2`+`hex`
/// rather than Python's `hashlib.md5`: the spec only requires stability, not
/// a specific algorithm.
fn generate_change_id(jurisdiction: &str, field_path: &str, update_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(jurisdiction.as_bytes());
    hasher.update(field_path.as_bytes());
    hasher.update(update_id.as_bytes());
    hasher.update(Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    format!("chg_{}", &hex::encode(hasher.finalize())[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeProposal;
    use crate::reasoner::fake::FakeReasoner;
    use serde_json::json;

    fn update(title: &str, summary: &str) -> RegulatoryUpdate {
        RegulatoryUpdate {
            id: "upd_1".into(),
            title: title.into(),
            summary: summary.into(),
            url: "https://example.com".into(),
            published_date: Utc::now(),
            source: "SEC".into(),
            category: "rules".into(),
            keywords_matched: vec![],
            is_breaking_change: true,
        }
    }

    fn harness() -> (tempfile::TempDir, Oracle, Arc<FakeReasoner>) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RulesetStore::new(dir.path()));
        let reasoner = Arc::new(FakeReasoner::new());
        let simulator = Arc::new(Simulator::default());
        let queue = Arc::new(ProposalQueue::new(dir.path()));
        let oracle = Oracle::new(store, reasoner.clone(), simulator, queue, 0.75);
        (dir, oracle, reasoner)
    }

    #[tokio::test]
    async fn not_relevant_update_creates_no_proposal() {
        let (_dir, oracle, reasoner) = harness();
        reasoner.queue_proposal(ChangeProposal {
            is_relevant: false,
            confidence: 0.1,
            summary: String::new(),
            target_jurisdiction: "US".into(),
            field_path: String::new(),
            old_value: json!(null),
            new_value: json!(null),
            reasoning: "irrelevant".into(),
            effective_date: None,
            requires_immediate_action: false,
            source_text: String::new(),
        });
        let outcome = oracle
            .process_update(&update("SEC hires new chair", "personnel"), "US")
            .await;
        assert!(matches!(outcome, OracleOutcome::NotRelevant));
    }

    #[tokio::test]
    async fn low_confidence_update_is_deferred() {
        let (_dir, oracle, reasoner) = harness();
        reasoner.queue_proposal(ChangeProposal {
            is_relevant: true,
            confidence: 0.6,
            summary: "maybe relevant".into(),
            target_jurisdiction: "US".into(),
            field_path: "accredited_investor.income.individual_income".into(),
            old_value: json!(200_000),
            new_value: json!(250_000),
            reasoning: "uncertain".into(),
            effective_date: None,
            requires_immediate_action: false,
            source_text: "text".into(),
        });
        let outcome = oracle.process_update(&update("title", "summary"), "US").await;
        assert!(matches!(outcome, OracleOutcome::LowConfidence));
    }

    #[tokio::test]
    async fn exactly_min_confidence_admits() {
        let (_dir, oracle, reasoner) = harness();
        reasoner.queue_proposal(ChangeProposal {
            is_relevant: true,
            confidence: 0.75,
            summary: "boundary".into(),
            target_jurisdiction: "US".into(),
            field_path: "accredited_investor.income.individual_income".into(),
            old_value: json!(200_000),
            new_value: json!(250_000),
            reasoning: "boundary".into(),
            effective_date: None,
            requires_immediate_action: false,
            source_text: "text".into(),
        });
        let outcome = oracle.process_update(&update("title", "summary"), "US").await;
        assert!(matches!(outcome, OracleOutcome::ProposalCreated(_)));
    }

    #[tokio::test]
    async fn approve_and_apply_updates_store_and_history() {
        let (_dir, oracle, reasoner) = harness();
        reasoner.queue_proposal(ChangeProposal {
            is_relevant: true,
            confidence: 0.9,
            summary: "raise threshold".into(),
            target_jurisdiction: "US".into(),
            field_path: "accredited_investor.income.individual_income".into(),
            old_value: json!(200_000),
            new_value: json!(250_000),
            reasoning: "r".into(),
            effective_date: None,
            requires_immediate_action: false,
            source_text: "text".into(),
        });
        let outcome = oracle.process_update(&update("title", "summary"), "US").await;
        let OracleOutcome::ProposalCreated(change) = outcome else {
            panic!("expected proposal");
        };
        let applied = oracle
            .approve(&change.id, "reviewer@example.com", None, true)
            .await
            .unwrap();
        assert_eq!(applied.status, PendingChangeStatus::Applied);

        let history = oracle.history("US", 10).unwrap();
        assert_eq!(history[0].change_id, change.id);
    }

    #[tokio::test]
    async fn reject_is_terminal_and_rejects_further_review() {
        let (_dir, oracle, reasoner) = harness();
        reasoner.queue_proposal(ChangeProposal {
            is_relevant: true,
            confidence: 0.9,
            summary: "s".into(),
            target_jurisdiction: "US".into(),
            field_path: "accredited_investor.income.individual_income".into(),
            old_value: json!(200_000),
            new_value: json!(250_000),
            reasoning: "r".into(),
            effective_date: None,
            requires_immediate_action: false,
            source_text: "text".into(),
        });
        let OracleOutcome::ProposalCreated(change) =
            oracle.process_update(&update("t", "s"), "US").await
        else {
            panic!("expected proposal");
        };
        let rejected = oracle.reject(&change.id, "reviewer", "not needed".into()).unwrap();
        assert_eq!(rejected.status, PendingChangeStatus::Rejected);

        // Approving an already-terminal change is a reviewer error, not a
        // silent no-op: state must stay unchanged.
        let err = oracle
            .approve(&change.id, "reviewer", None, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not pending review"));
        let still_rejected = oracle.get(&change.id).unwrap();
        assert_eq!(still_rejected.status, PendingChangeStatus::Rejected);

        // Rejecting it again is the same reviewer error.
        let err = oracle
            .reject(&change.id, "reviewer", "again".into())
            .unwrap_err();
        assert!(err.to_string().contains("not pending review"));
    }
}
