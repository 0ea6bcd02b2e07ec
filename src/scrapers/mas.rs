//! MAS scraper: Singapore capital-markets guidance feeds.

use async_trait::async_trait;
use std::time::Duration;

use super::{lexicon::MAS_RELEVANT_KEYWORDS, FeedKind, RateLimiter, Scraper};

pub struct MasScraper {
    http: reqwest::Client,
    rate_limiter: RateLimiter,
    base_url: String,
}

impl MasScraper {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            rate_limiter: RateLimiter::new(10, Duration::from_secs(10)),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Scraper for MasScraper {
    fn name(&self) -> &str {
        "MAS"
    }

    fn jurisdiction(&self) -> &str {
        "SG"
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn feed_kind(&self) -> FeedKind {
        FeedKind::Api
    }

    fn since_hours(&self) -> i64 {
        48
    }

    fn relevant_keywords(&self) -> &'static [&'static str] {
        MAS_RELEVANT_KEYWORDS
    }

    fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }
}
