//! HTTP handlers for the Compliance API boundary (spec.md §6).

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::models::{
    ConflictAnalysis, JurisdictionClassification, PendingChange, RegulatoryUpdate,
    SimulationOutcome,
};
use crate::oracle::OracleOutcome;

use super::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "reasoner_model": state.config.reasoner_model,
        "reasoner_configured": state.config.reasoner_configured(),
        "rules_loaded": state.store.loaded_jurisdictions(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ClassifyJurisdictionRequest {
    pub document_text: String,
    pub document_type: String,
}

pub async fn classify_jurisdiction(
    State(state): State<AppState>,
    Json(req): Json<ClassifyJurisdictionRequest>,
) -> AppResult<Json<JurisdictionClassification>> {
    if req.document_text.trim().is_empty() {
        return Err(AppError::BadRequest("document_text must not be empty".into()));
    }
    let threshold = state.config.classification_confidence_threshold;
    match state
        .reasoner
        .classify_jurisdiction(&req.document_text, &req.document_type)
        .await
    {
        Ok(mut classification) => {
            classification.requires_manual_review = classification.confidence < threshold;
            Ok(Json(classification))
        }
        Err(e) => {
            warn!(error = %e, "classify-jurisdiction falling back: reasoner unavailable");
            Ok(Json(JurisdictionClassification {
                jurisdiction: "retail".to_string(),
                entity_type: "unknown".to_string(),
                investor_classification: "retail".to_string(),
                applicable_regulations: Vec::new(),
                confidence: 0.3,
                reasoning: format!("reasoner unavailable: {e}"),
                requires_manual_review: true,
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveConflictsRequest {
    pub jurisdictions: Vec<String>,
    pub asset_type: String,
    #[serde(default)]
    pub investor_types: Vec<String>,
}

pub async fn resolve_conflicts(
    State(state): State<AppState>,
    Json(req): Json<ResolveConflictsRequest>,
) -> AppResult<Json<ConflictAnalysis>> {
    if req.jurisdictions.is_empty() {
        return Err(AppError::BadRequest("jurisdictions must not be empty".into()));
    }
    match state
        .reasoner
        .resolve_conflicts(&req.jurisdictions, &req.asset_type, &req.investor_types)
        .await
    {
        Ok(analysis) => Ok(Json(analysis)),
        Err(e) => {
            warn!(error = %e, "resolve-conflicts falling back: reasoner unavailable");
            Ok(Json(ConflictAnalysis {
                has_conflicts: true,
                conflicts: vec![format!("reasoner unavailable: {e}")],
                resolutions: Vec::new(),
                combined_requirements: json!({
                    "accredited_only": true,
                    "max_investors": 99,
                    "lockup_days": 365,
                    "requires_manual_review": true,
                }),
                confidence: 0.0,
                used_fallback: true,
            }))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateTokenComplianceRequest {
    pub jurisdictions: Vec<String>,
    #[serde(default)]
    pub max_investors: Option<u64>,
    #[serde(default)]
    pub accredited_only: Option<bool>,
    #[serde(default)]
    pub lockup_days: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ValidateTokenComplianceResponse {
    pub violations: Vec<String>,
    pub suggestions: Vec<String>,
}

pub async fn validate_token_compliance(
    State(state): State<AppState>,
    Json(req): Json<ValidateTokenComplianceRequest>,
) -> AppResult<Json<ValidateTokenComplianceResponse>> {
    if req.jurisdictions.is_empty() {
        return Err(AppError::BadRequest("jurisdictions must not be empty".into()));
    }
    let mut violations = Vec::new();
    let mut suggestions = Vec::new();

    for jurisdiction in &req.jurisdictions {
        let ruleset = state
            .store
            .get(jurisdiction)
            .map_err(AppError::Internal)?;
        if let Some(cap) = crate::store::RulesetStore::read_path(
            &ruleset,
            "exemptions.max_non_accredited_investors",
        )
        .and_then(|v| v.as_u64())
        {
            if let Some(requested) = req.max_investors {
                if req.accredited_only != Some(true) && requested > cap {
                    violations.push(format!(
                        "{jurisdiction}: requested max_investors {requested} exceeds non-accredited cap {cap}"
                    ));
                    suggestions.push(format!(
                        "{jurisdiction}: lower max_investors to {cap} or require accredited_only"
                    ));
                }
            }
        }
        if let Some(min_lockup) = crate::store::RulesetStore::read_path(
            &ruleset,
            "transfer_restrictions.holding_period.minimum_days",
        )
        .and_then(|v| v.as_u64())
        {
            if let Some(requested) = req.lockup_days {
                if requested < min_lockup {
                    violations.push(format!(
                        "{jurisdiction}: lockup_days {requested} is below required minimum {min_lockup}"
                    ));
                    suggestions.push(format!(
                        "{jurisdiction}: set lockup_days to at least {min_lockup}"
                    ));
                }
            }
        }
    }

    Ok(Json(ValidateTokenComplianceResponse {
        violations,
        suggestions,
    }))
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub jurisdiction: String,
    pub title: String,
    pub summary: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub async fn oracle_analyze(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeRequest>,
) -> AppResult<Json<AnalyzeResponse>> {
    require_reasoner(&state)?;
    if req.title.trim().is_empty() && req.summary.trim().is_empty() {
        return Err(AppError::BadRequest("title or summary is required".into()));
    }
    let update = RegulatoryUpdate {
        id: format!("manual_{}", uuid::Uuid::new_v4()),
        title: req.title,
        summary: req.summary,
        url: req.url,
        published_date: chrono::Utc::now(),
        source: if req.source.is_empty() { "manual".to_string() } else { req.source },
        category: "manual".to_string(),
        keywords_matched: Vec::new(),
        is_breaking_change: true,
    };

    let outcome = state.oracle.process_update(&update, &req.jurisdiction).await;
    Ok(Json(match outcome {
        OracleOutcome::ProposalCreated(change) => AnalyzeResponse {
            status: "proposal_created".into(),
            change_id: Some(change.id),
            message: None,
        },
        OracleOutcome::NotRelevant => AnalyzeResponse {
            status: "not_relevant".into(),
            change_id: None,
            message: None,
        },
        OracleOutcome::LowConfidence => AnalyzeResponse {
            status: "low_confidence".into(),
            change_id: None,
            message: None,
        },
        OracleOutcome::Error(message) => AnalyzeResponse {
            status: "error".into(),
            change_id: None,
            message: Some(message),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct PendingListQuery {
    pub jurisdiction: Option<String>,
}

pub async fn list_pending(
    State(state): State<AppState>,
    Query(q): Query<PendingListQuery>,
) -> AppResult<Json<Vec<PendingChange>>> {
    let pending = state
        .oracle
        .list_pending(q.jurisdiction.as_deref())
        .map_err(AppError::Internal)?;
    Ok(Json(pending))
}

pub async fn get_pending(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<PendingChange>> {
    state
        .oracle
        .get(&id)
        .map(Json)
        .map_err(|_| AppError::NotFound(format!("no pending change with id {id}")))
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub reviewer: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub apply_immediately: bool,
}

pub async fn approve_pending(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ApproveRequest>,
) -> AppResult<Json<PendingChange>> {
    require_reasoner(&state)?;
    if req.reviewer.trim().is_empty() {
        return Err(AppError::BadRequest("reviewer is required".into()));
    }
    state
        .oracle
        .approve(&id, &req.reviewer, req.notes, req.apply_immediately)
        .await
        .map(Json)
        .map_err(|e| not_found_or_internal(&id, e))
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub reviewer: String,
    pub reason: String,
}

pub async fn reject_pending(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> AppResult<Json<PendingChange>> {
    require_reasoner(&state)?;
    if req.reviewer.trim().is_empty() || req.reason.trim().is_empty() {
        return Err(AppError::BadRequest("reviewer and reason are required".into()));
    }
    state
        .oracle
        .reject(&id, &req.reviewer, req.reason)
        .map(Json)
        .map_err(|e| not_found_or_internal(&id, e))
}

#[derive(Debug, Deserialize)]
pub struct SimulateRequest {
    #[serde(default)]
    pub use_live_data: bool,
}

pub async fn simulate_pending(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SimulateRequest>,
) -> AppResult<Json<PendingChange>> {
    state
        .oracle
        .run_simulation(&id, !req.use_live_data)
        .map(Json)
        .map_err(|e| not_found_or_internal(&id, e))
}

pub async fn get_impact(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<Option<SimulationOutcome>>> {
    let change = state
        .oracle
        .get(&id)
        .map_err(|_| AppError::NotFound(format!("no pending change with id {id}")))?;
    Ok(Json(change.impact_simulation))
}

#[derive(Debug, Deserialize)]
pub struct CasualtiesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

pub async fn get_casualties(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(q): Query<CasualtiesQuery>,
) -> AppResult<Json<Value>> {
    let change = state
        .oracle
        .get(&id)
        .map_err(|_| AppError::NotFound(format!("no pending change with id {id}")))?;
    let casualties = match change.impact_simulation {
        Some(SimulationOutcome::Result(result)) => result.casualties,
        _ => Vec::new(),
    };
    let total = casualties.len();
    let page: Vec<_> = casualties.into_iter().skip(q.offset).take(q.limit).collect();
    Ok(Json(json!({
        "total": total,
        "limit": q.limit,
        "offset": q.offset,
        "casualties": page,
    })))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(jurisdiction): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> AppResult<Json<Value>> {
    let entries = state
        .oracle
        .history(&jurisdiction, q.limit)
        .map_err(AppError::Internal)?;
    Ok(Json(json!({ "jurisdiction": jurisdiction, "entries": entries })))
}

/// spec.md §6/§7: the review endpoints depend on the Reasoner Gateway to
/// produce or re-judge a proposal; when no real reasoner is configured
/// (`REASONER_API_KEY` unset) they refuse with 503 rather than silently
/// running against the fake reasoner's placeholder judgments.
fn require_reasoner(state: &AppState) -> AppResult<()> {
    if state.config.reasoner_configured() {
        Ok(())
    } else {
        Err(AppError::ReasonerUnavailable(
            "no reasoner configured (REASONER_API_KEY unset)".into(),
        ))
    }
}

fn not_found_or_internal(id: &str, e: anyhow::Error) -> AppError {
    let message = e.to_string();
    if message.contains("no pending change") {
        AppError::NotFound(format!("no pending change with id {id}"))
    } else if message.contains("not pending review") {
        AppError::BadRequest(message)
    } else {
        AppError::Internal(e)
    }
}
