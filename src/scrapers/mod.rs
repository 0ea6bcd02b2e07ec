//! Regulator scrapers: periodic ingestion of publications, normalized into
//! [`RegulatoryUpdate`] records and classified by the lexicons in
//! [`lexicon`].
//!
//! Networking shape (rate limiter + bounded-retry fetch) is grounded in the
//! teacher's `scrapers::polymarket_api::{RateLimiter, execute_with_retry}`.
//! Regulator feeds are fetched as JSON (the teacher's stack carries no
//! XML/RSS crate, and none of the retrieval pack's other repos do either;
//! the real SEC/MAS Atom feeds are XML, but the endpoints also expose JSON
//! search APIs, so the scrapers target those rather than pull in an
//! unneeded dependency).

pub mod lexicon;
pub mod mas;
pub mod sec;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::models::RegulatoryUpdate;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// Cap on how many entries a single fetch normalizes (spec.md §4.2).
const MAX_ENTRIES_PER_FETCH: usize = 20;

/// One regulator publication as returned by the feed endpoint, before
/// normalization and classification.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEntry {
    pub title: String,
    pub summary: String,
    pub url: String,
    pub published_date: DateTime<Utc>,
    #[serde(default = "default_category")]
    pub category: String,
}

fn default_category() -> String {
    "rules".to_string()
}

#[derive(Debug, Deserialize)]
struct FeedResponse {
    entries: Vec<RawEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Feed,
    Api,
    Scrape,
}

/// Sliding-window request limiter, one instance per scraper.
pub struct RateLimiter {
    requests_per_window: u32,
    window: Duration,
    state: Mutex<(u32, Instant)>,
}

impl RateLimiter {
    pub fn new(requests_per_window: u32, window: Duration) -> Self {
        Self {
            requests_per_window,
            window,
            state: Mutex::new((0, Instant::now())),
        }
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let elapsed = state.1.elapsed();
                if elapsed >= self.window {
                    *state = (0, Instant::now());
                }
                if state.0 < self.requests_per_window {
                    state.0 += 1;
                    None
                } else {
                    Some(self.window - elapsed)
                }
            };
            match wait {
                None => return,
                Some(d) => sleep(d).await,
            }
        }
    }
}

/// One regulator's scraping config: `Name`, `Jurisdiction`, `BaseURL`,
/// `FeedKind`, and `UpdateFrequency`/cutoff (spec.md §4.2).
#[async_trait]
pub trait Scraper: Send + Sync {
    fn name(&self) -> &str;
    fn jurisdiction(&self) -> &str;
    fn base_url(&self) -> &str;
    fn feed_kind(&self) -> FeedKind;
    fn since_hours(&self) -> i64;
    fn relevant_keywords(&self) -> &'static [&'static str];

    fn http(&self) -> &reqwest::Client;
    fn rate_limiter(&self) -> &RateLimiter;

    /// Fetches and normalizes this tick's candidate updates: raw entries are
    /// pulled from the feed endpoint, pruned by the cutoff window (inclusive
    /// boundary), capped at [`MAX_ENTRIES_PER_FETCH`], classified against
    /// the relevance and breaking lexicons, and written to the per-source
    /// audit trail.
    async fn fetch_updates(&self, data_dir: &std::path::Path) -> Result<Vec<RegulatoryUpdate>> {
        self.rate_limiter().acquire().await;
        let raw = self.execute_with_retry().await?;

        let cutoff = Utc::now() - chrono::Duration::hours(self.since_hours());
        let updates: Vec<RegulatoryUpdate> = raw
            .into_iter()
            .filter(|e| e.published_date >= cutoff)
            .take(MAX_ENTRIES_PER_FETCH)
            .map(|e| normalize(e, self.name(), self.relevant_keywords()))
            .collect();

        if let Err(e) = persist_audit_trail(data_dir, self.name(), &updates) {
            warn!(source = self.name(), error = %e, "failed to write scraper audit trail");
        }
        Ok(updates)
    }

    /// Exponential-backoff retry wrapper, grounded in the teacher's
    /// `execute_with_retry`: honors 429 with a longer backoff, retries 5xx
    /// and transport errors, bails after `MAX_RETRIES` attempts.
    async fn execute_with_retry(&self) -> Result<Vec<RawEntry>> {
        let mut backoff = INITIAL_BACKOFF_MS;
        for attempt in 0..MAX_RETRIES {
            let request = self.http().get(self.base_url());
            match timeout(FETCH_TIMEOUT, request.send()).await {
                Ok(Ok(response)) => {
                    if response.status().is_success() {
                        match response.json::<FeedResponse>().await {
                            Ok(feed) => return Ok(feed.entries),
                            Err(e) => warn!(source = self.name(), error = %e, "malformed feed body"),
                        }
                    } else if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        warn!(source = self.name(), attempt = attempt + 1, "rate limited, backing off");
                        sleep(Duration::from_millis(backoff * 10)).await;
                    } else if response.status().is_server_error() {
                        warn!(source = self.name(), status = %response.status(), "server error fetching feed");
                    } else {
                        bail!("{}: unexpected status {}", self.name(), response.status());
                    }
                }
                Ok(Err(e)) => warn!(source = self.name(), error = %e, "request failed"),
                Err(_) => warn!(source = self.name(), "request timed out"),
            }
            if attempt < MAX_RETRIES - 1 {
                sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(30_000);
            }
        }
        bail!("{}: max retries exceeded fetching {}", self.name(), self.base_url())
    }
}

fn normalize(entry: RawEntry, source: &str, relevant_keywords: &[&str]) -> RegulatoryUpdate {
    let keywords_matched = lexicon::matches_any(&entry.title, &entry.summary, relevant_keywords);
    let is_breaking_change = lexicon::is_breaking_change(&entry.title, &entry.summary);
    let id = stable_id(&entry.url);
    RegulatoryUpdate {
        id,
        title: entry.title,
        summary: entry.summary,
        url: entry.url,
        published_date: entry.published_date,
        source: source.to_string(),
        category: entry.category,
        keywords_matched,
        is_breaking_change,
    }
}

fn stable_id(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

fn persist_audit_trail(
    data_dir: &std::path::Path,
    source: &str,
    updates: &[RegulatoryUpdate],
) -> Result<()> {
    let dir = data_dir
        .join("regulatory_updates")
        .join(source.to_ascii_lowercase());
    std::fs::create_dir_all(&dir)?;
    let ts = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let path = dir.join(format!("{ts}.json"));
    let body = serde_json::to_vec_pretty(updates)?;
    std::fs::write(path, body)?;
    Ok(())
}

/// A scraper registry: all configured scrapers plus shared HTTP client.
pub struct ScraperRegistry {
    scrapers: Vec<Arc<dyn Scraper>>,
}

impl ScraperRegistry {
    pub fn new(scrapers: Vec<Arc<dyn Scraper>>) -> Self {
        Self { scrapers }
    }

    pub fn scrapers(&self) -> &[Arc<dyn Scraper>] {
        &self.scrapers
    }
}

/// Per-source mutex preventing a scraper's tick from overlapping itself
/// (spec.md §5 ordering guarantee), keyed by scraper name.
pub struct TickGuard {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Default for TickGuard {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl TickGuard {
    pub fn lock_for(&self, source: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(source.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}
