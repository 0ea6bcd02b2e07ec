//! Environment-variable configuration.
//!
//! Mirrors the teacher's `Config::from_env()` discipline: every optional
//! variable parses with a sane default and never panics; only genuinely
//! required configuration (the Reasoner API key, when a real reasoner is
//! requested) fails startup.

use std::env;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub data_dir: String,

    /// Set when a real HTTP reasoner should be used; absent falls back to the
    /// fake reasoner and a degraded `/health` flag, per `spec.md` §9's
    /// "optional module" design note.
    pub reasoner_api_key: Option<String>,
    pub reasoner_api_base: String,
    pub reasoner_model: String,
    pub reasoner_timeout: Duration,
    pub reasoner_max_retries: u32,

    /// UI-flagging threshold (spec.md §6): below this, clients should surface
    /// a manual-review affordance even for accepted classifications.
    pub classification_confidence_threshold: f64,
    /// Oracle admission threshold (spec.md §4.4): `MIN_CONFIDENCE`.
    pub oracle_min_confidence: f64,

    pub investor_service_base_url: Option<String>,

    pub sec_scraper_enabled: bool,
    pub mas_scraper_enabled: bool,
    pub scheduler_tick_interval: Duration,

    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let port = env_parse("PORT", 8080u16);
        let data_dir = env_or("DATA_DIR", "./data");

        let reasoner_api_key = env::var("REASONER_API_KEY").ok().filter(|v| !v.is_empty());
        let reasoner_api_base = env_or("REASONER_API_BASE", "https://api.anthropic.com/v1");
        let reasoner_model = env_or("REASONER_MODEL", "claude-3-5-sonnet-latest");
        let reasoner_timeout = Duration::from_secs(env_parse("REASONER_TIMEOUT_SECS", 30u64));
        let reasoner_max_retries = env_parse("REASONER_MAX_RETRIES", 3u32);

        let classification_confidence_threshold =
            env_parse("CLASSIFICATION_CONFIDENCE_THRESHOLD", 0.7f64);
        let oracle_min_confidence = env_parse("ORACLE_MIN_CONFIDENCE", 0.75f64);

        let investor_service_base_url = env::var("INVESTOR_SERVICE_BASE_URL")
            .ok()
            .filter(|v| !v.is_empty());

        let sec_scraper_enabled = env_bool("SEC_SCRAPER_ENABLED", true);
        let mas_scraper_enabled = env_bool("MAS_SCRAPER_ENABLED", true);
        let scheduler_tick_interval =
            Duration::from_secs(env_parse("SCHEDULER_TICK_INTERVAL_SECS", 3600u64));

        let rate_limit_max_requests = env_parse("RATE_LIMIT_MAX_REQUESTS", 100u32);
        let rate_limit_window = Duration::from_secs(env_parse("RATE_LIMIT_WINDOW_SECS", 60u64));

        Ok(Self {
            port,
            data_dir,
            reasoner_api_key,
            reasoner_api_base,
            reasoner_model,
            reasoner_timeout,
            reasoner_max_retries,
            classification_confidence_threshold,
            oracle_min_confidence,
            investor_service_base_url,
            sec_scraper_enabled,
            mas_scraper_enabled,
            scheduler_tick_interval,
            rate_limit_max_requests,
            rate_limit_window,
        })
    }

    /// Whether a real reasoner is configured; when false, `/health` reports
    /// the degraded feature flag and review endpoints still function against
    /// the fake reasoner's conservative fallbacks.
    pub fn reasoner_configured(&self) -> bool {
        self.reasoner_api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_env() {
        env::remove_var("REASONER_API_KEY");
        env::remove_var("PORT");
        let cfg = Config::from_env().expect("config loads with defaults");
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.oracle_min_confidence, 0.75);
        assert_eq!(cfg.classification_confidence_threshold, 0.7);
        assert!(!cfg.reasoner_configured());
    }
}
