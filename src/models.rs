//! Core data types shared across the store, oracle, simulator, and API layers.
//!
//! These `serde` derives *are* the on-disk and over-the-wire contract; there
//! is no separate DTO layer between persisted JSON and in-memory shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A jurisdiction's regulatory parameters as a nested, schema-free document.
///
/// `version`, `last_updated`, and `changelog` are lifted out of the
/// otherwise-free-form tree for direct, typed access; `rules` holds
/// everything else addressable by dot-path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionRuleset {
    pub jurisdiction: String,
    pub version: String,
    pub last_updated: chrono::DateTime<chrono::Utc>,
    #[serde(default)]
    pub changelog: Vec<ChangelogEntry>,
    #[serde(flatten)]
    pub rules: Value,
}

impl JurisdictionRuleset {
    /// Maximum number of changelog entries retained; oldest are trimmed.
    pub const CHANGELOG_CAP: usize = 20;

    pub fn empty(jurisdiction: &str) -> Self {
        Self {
            jurisdiction: jurisdiction.to_string(),
            version: "1970.01.01.000".to_string(),
            last_updated: chrono::Utc::now(),
            changelog: Vec::new(),
            rules: Value::Object(serde_json::Map::new()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogEntry {
    pub change_id: String,
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
    pub summary: String,
    pub source: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_warning: Option<String>,
}

/// Emitted by a scraper. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulatoryUpdate {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub published_date: chrono::DateTime<chrono::Utc>,
    pub source: String,
    pub category: String,
    pub keywords_matched: Vec<String>,
    pub is_breaking_change: bool,
}

/// Output of the Reasoner Gateway's `AnalyzeRegulatoryImpact` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeProposal {
    pub is_relevant: bool,
    pub confidence: f64,
    pub summary: String,
    pub target_jurisdiction: String,
    pub field_path: String,
    pub old_value: Value,
    pub new_value: Value,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub requires_immediate_action: bool,
    pub source_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingChangeStatus {
    PendingReview,
    Approved,
    Rejected,
    Applied,
    Expired,
}

/// Persistent envelope around a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub jurisdiction: String,
    pub status: PendingChangeStatus,
    pub proposal: ChangeProposal,
    pub source_update: Option<RegulatoryUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impact_simulation: Option<SimulationOutcome>,
}

/// Simulations are allowed to fail without invalidating the proposal
/// (spec.md §4.4 step 4): this wraps either a successful result or the
/// failure record attached in its place.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SimulationOutcome {
    Result(SimulationResult),
    Failure { error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactSeverity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrandfatheringStrategy {
    None,
    Full,
    TimeLimited,
    TransactionBased,
    HoldingsFrozen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Casualty {
    pub investor_id: String,
    pub wallet_address: String,
    pub jurisdiction: String,
    pub classification: String,
    pub failure_reason: String,
    pub failed_rule_path: String,
    pub current_value: f64,
    pub new_threshold: f64,
    pub total_holdings_usd: f64,
    pub tokens_held: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation_path: Option<String>,
    pub can_be_grandfathered: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub simulation_id: String,
    pub proposal_id: String,
    pub simulated_at: chrono::DateTime<chrono::Utc>,
    pub rule_change_summary: String,
    pub total_investors_checked: u64,
    pub impacted_count: u64,
    pub impact_percentage: f64,
    pub total_assets_at_risk_usd: f64,
    pub total_platform_assets_usd: f64,
    pub assets_at_risk_percentage: f64,
    pub severity: ImpactSeverity,
    pub casualties: Vec<Casualty>,
    pub tokens_impacted: Vec<String>,
    pub impact_by_jurisdiction: std::collections::HashMap<String, u64>,
    pub recommended_grandfathering: GrandfatheringStrategy,
    pub grandfathering_rationale: String,
    pub estimated_compliance_timeline_days: u32,
    pub warnings: Vec<String>,
}

/// Advisory output of `/classify-jurisdiction`, grounded in
/// `together_client.py`'s `classify_jurisdiction` response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionClassification {
    pub jurisdiction: String,
    pub entity_type: String,
    pub investor_classification: String,
    pub applicable_regulations: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
    pub requires_manual_review: bool,
}

/// Advisory output of `/resolve-conflicts`, grounded in
/// `together_client.py`'s `resolve_conflicts` response shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictAnalysis {
    pub has_conflicts: bool,
    pub conflicts: Vec<String>,
    pub resolutions: Vec<String>,
    pub combined_requirements: Value,
    pub confidence: f64,
    #[serde(default)]
    pub used_fallback: bool,
}
