//! Scheduler (Daily Orchestrator): runs scrapers on a cadence, fans out
//! breaking updates to the Oracle in publication order, and writes a
//! per-tick run report.
//!
//! Teacher pattern: `tokio::time::interval`-driven background loop. Per
//! REDESIGN FLAG in `spec.md` §9, the legacy coarse "bump version on
//! breaking-update count" scraper-side path is not reimplemented — only the
//! Oracle's fine-grained `ApplyPatch` bumps versions.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::time::interval;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::oracle::{Oracle, OracleOutcome};
use crate::scrapers::{ScraperRegistry, TickGuard};

#[derive(Debug, Serialize)]
struct SourceResult {
    source: String,
    updates_fetched: usize,
    breaking_count: usize,
    proposals_created: Vec<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct TickReport {
    run_id: String,
    started_at: chrono::DateTime<Utc>,
    finished_at: chrono::DateTime<Utc>,
    sources: Vec<SourceResult>,
}

pub struct Scheduler {
    registry: Arc<ScraperRegistry>,
    oracle: Arc<Oracle>,
    data_dir: PathBuf,
    tick_interval: std::time::Duration,
    tick_guard: Arc<TickGuard>,
}

impl Scheduler {
    pub fn new(
        registry: Arc<ScraperRegistry>,
        oracle: Arc<Oracle>,
        data_dir: PathBuf,
        tick_interval: std::time::Duration,
    ) -> Self {
        Self {
            registry,
            oracle,
            data_dir,
            tick_interval,
            tick_guard: Arc::new(TickGuard::default()),
        }
    }

    /// Runs forever, ticking on `tick_interval`. Intended to be spawned as a
    /// background task; any scraper or Oracle failure is captured in the
    /// tick report rather than aborting the loop (spec.md §4.3).
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.tick_interval);
        loop {
            ticker.tick().await;
            let run_id = Uuid::new_v4().to_string();
            let span = info_span!("scheduler_tick", run_id = %run_id);
            self.tick(&run_id).instrument(span).await;
        }
    }

    /// One tick: scrapers run concurrently, but each scraper's updates are
    /// processed serially through the Oracle in publication order
    /// (spec.md §5 ordering guarantee). Each scraper's own tick-to-tick
    /// fetch is additionally serialized through `tick_guard` so a fetch that
    /// overruns `tick_interval` can't overlap with the next tick's fetch for
    /// the same source.
    pub async fn tick(&self, run_id: &str) -> TickReportSummary {
        let started_at = Utc::now();
        let mut handles = Vec::new();
        for scraper in self.registry.scrapers() {
            let scraper = scraper.clone();
            let data_dir = self.data_dir.clone();
            let source_lock = self.tick_guard.lock_for(scraper.name());
            handles.push(tokio::spawn(async move {
                let _permit = source_lock.lock().await;
                let name = scraper.name().to_string();
                let jurisdiction = scraper.jurisdiction().to_string();
                match scraper.fetch_updates(&data_dir).await {
                    Ok(updates) => (name, jurisdiction, Ok(updates)),
                    Err(e) => (name, jurisdiction, Err(e.to_string())),
                }
            }));
        }

        let mut sources = Vec::new();
        for handle in handles {
            let (source, jurisdiction, outcome) = match handle.await {
                Ok(v) => v,
                Err(e) => {
                    error!(error = %e, "scraper task panicked");
                    continue;
                }
            };
            match outcome {
                Ok(updates) => {
                    let breaking: Vec<_> = updates.iter().filter(|u| u.is_breaking_change).collect();
                    let mut proposals_created = Vec::new();
                    // Publication order: oldest first.
                    let mut ordered = breaking.clone();
                    ordered.sort_by_key(|u| u.published_date);
                    for update in ordered {
                        match self.oracle.process_update(update, &jurisdiction).await {
                            OracleOutcome::ProposalCreated(change) => {
                                proposals_created.push(change.id.clone());
                            }
                            OracleOutcome::Error(e) => {
                                error!(source = %source, error = %e, "oracle processing failed");
                            }
                            _ => {}
                        }
                    }
                    info!(
                        source = %source,
                        fetched = updates.len(),
                        breaking = breaking.len(),
                        proposals = proposals_created.len(),
                        "scraper tick complete"
                    );
                    sources.push(SourceResult {
                        source,
                        updates_fetched: updates.len(),
                        breaking_count: breaking.len(),
                        proposals_created,
                        error: None,
                    });
                }
                Err(e) => {
                    error!(source = %source, error = %e, "scraper fetch failed");
                    sources.push(SourceResult {
                        source,
                        updates_fetched: 0,
                        breaking_count: 0,
                        proposals_created: Vec::new(),
                        error: Some(e),
                    });
                }
            }
        }

        let finished_at = Utc::now();
        let report = TickReport {
            run_id: run_id.to_string(),
            started_at,
            finished_at,
            sources,
        };
        if let Err(e) = persist_report(&self.data_dir, &report) {
            error!(error = %e, "failed to persist scheduler tick report");
        }

        TickReportSummary {
            sources_attempted: report.sources.len(),
            proposals_created: report.sources.iter().map(|s| s.proposals_created.len()).sum(),
            errors: report.sources.iter().filter(|s| s.error.is_some()).count(),
        }
    }
}

#[derive(Debug)]
pub struct TickReportSummary {
    pub sources_attempted: usize,
    pub proposals_created: usize,
    pub errors: usize,
}

fn persist_report(data_dir: &std::path::Path, report: &TickReport) -> anyhow::Result<()> {
    let dir = data_dir.join("regulatory_updates").join("daily_runs");
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}.json", report.run_id));
    std::fs::write(path, serde_json::to_vec_pretty(report)?)?;
    Ok(())
}
