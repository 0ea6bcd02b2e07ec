//! Regulatory compliance orchestration service entry point.
//!
//! Wires together the Ruleset Store, Reasoner Gateway, Impact Simulator,
//! Proposal Queue, Oracle, scrapers, scheduler, and HTTP router, then serves
//! the Compliance API until shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use compliance_oracle::api::{self, AppState};
use compliance_oracle::config::Config;
use compliance_oracle::middleware::RateLimitConfig;
use compliance_oracle::oracle::Oracle;
use compliance_oracle::queue::ProposalQueue;
use compliance_oracle::reasoner::{fake::FakeReasoner, http_client::HttpReasoner, Reasoner};
use compliance_oracle::scheduler::Scheduler;
use compliance_oracle::scrapers::{mas::MasScraper, sec::SecEdgarScraper, Scraper, ScraperRegistry};
use compliance_oracle::simulator::Simulator;
use compliance_oracle::store::RulesetStore;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let store = Arc::new(RulesetStore::new(&config.data_dir));
    store
        .load_all()
        .context("loading jurisdiction rulesets at startup")?;

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("building shared HTTP client")?;

    let reasoner: Arc<dyn Reasoner> = if let Some(api_key) = config.reasoner_api_key.clone() {
        tracing::info!(model = %config.reasoner_model, "using HTTP reasoner");
        Arc::new(HttpReasoner::new(
            http_client.clone(),
            api_key,
            config.reasoner_api_base.clone(),
            config.reasoner_model.clone(),
            config.reasoner_timeout,
            config.reasoner_max_retries,
        ))
    } else {
        tracing::warn!("REASONER_API_KEY not set; running in degraded mode with the fake reasoner");
        Arc::new(FakeReasoner::new())
    };

    let simulator = Arc::new(Simulator::default());
    let queue = Arc::new(ProposalQueue::new(&config.data_dir));
    let oracle = Arc::new(Oracle::new(
        store.clone(),
        reasoner.clone(),
        simulator.clone(),
        queue.clone(),
        config.oracle_min_confidence,
    ));

    let mut scrapers: Vec<Arc<dyn Scraper>> = Vec::new();
    if config.sec_scraper_enabled {
        scrapers.push(Arc::new(SecEdgarScraper::new(
            http_client.clone(),
            "https://www.sec.gov/cgi-bin/browse-edgar-updates.json",
        )));
    }
    if config.mas_scraper_enabled {
        scrapers.push(Arc::new(MasScraper::new(
            http_client.clone(),
            "https://eservices.mas.gov.sg/api/regulations/updates.json",
        )));
    }
    let registry = Arc::new(ScraperRegistry::new(scrapers));

    let scheduler = Arc::new(Scheduler::new(
        registry,
        oracle.clone(),
        std::path::PathBuf::from(&config.data_dir),
        config.scheduler_tick_interval,
    ));
    tokio::spawn(scheduler.run());

    let rate_limiter = compliance_oracle::middleware::RateLimitLayer::new(RateLimitConfig {
        max_requests: config.rate_limit_max_requests,
        window: config.rate_limit_window,
    });

    let state = AppState {
        store,
        reasoner,
        oracle,
        simulator,
        queue,
        config: Arc::new(config.clone()),
    };

    let app = api::router(state, rate_limiter);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "compliance orchestration service listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;

    Ok(())
}
