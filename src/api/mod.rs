//! Compliance API boundary: axum router assembly over the Store, Oracle,
//! and Reasoner. Follows the teacher's `Router::new().route(...)
//! .with_state(state)` convention.

pub mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::middleware::{rate_limit::rate_limit_middleware, RateLimitLayer};
use crate::oracle::Oracle;
use crate::queue::ProposalQueue;
use crate::reasoner::Reasoner;
use crate::simulator::Simulator;
use crate::store::RulesetStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RulesetStore>,
    pub reasoner: Arc<dyn Reasoner>,
    pub oracle: Arc<Oracle>,
    pub simulator: Arc<Simulator>,
    pub queue: Arc<ProposalQueue>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState, rate_limiter: RateLimitLayer) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/classify-jurisdiction", post(handlers::classify_jurisdiction))
        .route("/resolve-conflicts", post(handlers::resolve_conflicts))
        .route("/validate-token-compliance", post(handlers::validate_token_compliance))
        .route("/oracle/analyze", post(handlers::oracle_analyze))
        .route("/oracle/pending", get(handlers::list_pending))
        .route("/oracle/pending/:id", get(handlers::get_pending))
        .route("/oracle/pending/:id/approve", post(handlers::approve_pending))
        .route("/oracle/pending/:id/reject", post(handlers::reject_pending))
        .route("/oracle/pending/:id/simulate", post(handlers::simulate_pending))
        .route("/oracle/pending/:id/impact", get(handlers::get_impact))
        .route("/oracle/pending/:id/casualties", get(handlers::get_casualties))
        .route("/oracle/history/:jurisdiction", get(handlers::get_history))
        .with_state(state)
        .layer(axum::middleware::from_fn(crate::middleware::request_logging))
        .layer(axum::middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
