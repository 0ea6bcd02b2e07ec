//! Black-box end-to-end tests for the Oracle admission policy and review
//! workflow, against an injected fake reasoner (spec.md §8 scenarios 1-4).

use std::sync::Arc;

use chrono::Utc;
use compliance_oracle::models::{ChangeProposal, PendingChangeStatus, RegulatoryUpdate};
use compliance_oracle::oracle::{Oracle, OracleOutcome};
use compliance_oracle::queue::ProposalQueue;
use compliance_oracle::reasoner::fake::FakeReasoner;
use compliance_oracle::simulator::Simulator;
use compliance_oracle::store::RulesetStore;
use serde_json::json;

fn sample_update() -> RegulatoryUpdate {
    RegulatoryUpdate {
        id: "upd_e2e".to_string(),
        title: "SEC proposes amendment to accredited investor income threshold".to_string(),
        summary: "Raises the individual income threshold from $200,000 to $250,000".to_string(),
        url: "https://example.gov/rule".to_string(),
        published_date: Utc::now(),
        source: "SEC".to_string(),
        category: "rules".to_string(),
        keywords_matched: vec!["accredited investor".to_string()],
        is_breaking_change: true,
    }
}

fn build_oracle(dir: &std::path::Path) -> (Oracle, Arc<FakeReasoner>) {
    let store = Arc::new(RulesetStore::new(dir));
    let reasoner = Arc::new(FakeReasoner::new());
    let simulator = Arc::new(Simulator::default());
    let queue = Arc::new(ProposalQueue::new(dir));
    let oracle = Oracle::new(store, reasoner.clone(), simulator, queue, 0.75);
    (oracle, reasoner)
}

#[tokio::test]
async fn income_threshold_hike_produces_expected_impact() {
    let dir = tempfile::tempdir().unwrap();
    let (oracle, reasoner) = build_oracle(dir.path());
    reasoner.queue_proposal(ChangeProposal {
        is_relevant: true,
        confidence: 0.92,
        summary: "raise individual income threshold from 200k to 250k".to_string(),
        target_jurisdiction: "US".to_string(),
        field_path: "accredited_investor.income.individual_income".to_string(),
        old_value: json!(200_000),
        new_value: json!(250_000),
        reasoning: "regulator amendment".to_string(),
        effective_date: None,
        requires_immediate_action: false,
        source_text: "source text".to_string(),
    });

    let outcome = oracle.process_update(&sample_update(), "US").await;
    let OracleOutcome::ProposalCreated(change) = outcome else {
        panic!("expected a proposal to be created");
    };
    let simulation = change
        .impact_simulation
        .expect("simulation should be attached");
    match simulation {
        compliance_oracle::models::SimulationOutcome::Result(result) => {
            assert!(result.impacted_count > 0, "expected some casualties");
            assert!(result.total_investors_checked >= 100);
        }
        compliance_oracle::models::SimulationOutcome::Failure { error } => {
            panic!("simulation unexpectedly failed: {error}");
        }
    }
}

#[tokio::test]
async fn irrelevant_press_release_creates_no_proposal() {
    let dir = tempfile::tempdir().unwrap();
    let (oracle, reasoner) = build_oracle(dir.path());
    reasoner.queue_proposal(ChangeProposal {
        is_relevant: false,
        confidence: 0.05,
        summary: String::new(),
        target_jurisdiction: "US".to_string(),
        field_path: String::new(),
        old_value: json!(null),
        new_value: json!(null),
        reasoning: "personnel announcement, not a rule change".to_string(),
        effective_date: None,
        requires_immediate_action: false,
        source_text: String::new(),
    });

    let mut update = sample_update();
    update.title = "SEC hires new chair".to_string();
    update.summary = "Personnel announcement".to_string();

    let outcome = oracle.process_update(&update, "US").await;
    assert!(matches!(outcome, OracleOutcome::NotRelevant));
    assert!(oracle.list_pending(None).unwrap().is_empty());
}

#[tokio::test]
async fn approve_and_apply_then_history_lists_the_change() {
    let dir = tempfile::tempdir().unwrap();
    let (oracle, reasoner) = build_oracle(dir.path());
    reasoner.queue_proposal(ChangeProposal {
        is_relevant: true,
        confidence: 0.9,
        summary: "raise individual income threshold".to_string(),
        target_jurisdiction: "US".to_string(),
        field_path: "accredited_investor.income.individual_income".to_string(),
        old_value: json!(200_000),
        new_value: json!(250_000),
        reasoning: "amendment".to_string(),
        effective_date: None,
        requires_immediate_action: false,
        source_text: "source".to_string(),
    });

    let OracleOutcome::ProposalCreated(change) = oracle.process_update(&sample_update(), "US").await
    else {
        panic!("expected proposal");
    };

    let applied = oracle
        .approve(&change.id, "reviewer@example.com", Some("looks right".into()), true)
        .await
        .unwrap();
    assert_eq!(applied.status, PendingChangeStatus::Applied);

    let history = oracle.history("US", 10).unwrap();
    assert_eq!(history[0].change_id, change.id);
    assert_eq!(history[0].new_value, json!(250_000));
}
