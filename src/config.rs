use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

/// Process-wide configuration. Built once in main and passed by reference;
/// tests substitute endpoints to point at local fixtures.
#[derive(Debug, Clone)]
pub struct Config {
    pub rss_url: String,
    pub news_url: String,
    pub publisher_base_url: String,
    pub crossref_base_url: String,
    pub anthropic_base_url: String,
    pub model: String,
    pub store_path: PathBuf,
    /// Request timeout for review-page and feed fetches.
    pub scrape_timeout: Duration,
    /// Request timeout for date-backfill lookups.
    pub lookup_timeout: Duration,
    pub crossref_delay: Duration,
    pub publisher_delay: Duration,
    /// Worker bound for the date-backfill fan-out.
    pub date_workers: usize,
    pub model_timeout: Duration,
    pub browser_user_agent: String,
    pub polite_user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rss_url: "https://www.cochranelibrary.com/cdsr/table-of-contents/rss.xml".into(),
            news_url: "https://www.cochrane.org/news".into(),
            publisher_base_url: "https://www.cochrane.org".into(),
            crossref_base_url: "https://api.crossref.org".into(),
            anthropic_base_url: "https://api.anthropic.com".into(),
            model: "claude-sonnet-4-20250514".into(),
            store_path: PathBuf::from("summaries.yml"),
            scrape_timeout: Duration::from_secs(30),
            lookup_timeout: Duration::from_secs(15),
            crossref_delay: Duration::from_millis(100),
            publisher_delay: Duration::from_millis(500),
            date_workers: 5,
            model_timeout: Duration::from_secs(60),
            browser_user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
                 AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                .into(),
            polite_user_agent:
                "CochraneDigest/0.1 (https://github.com/desyncai/cochrane-digest)".into(),
        }
    }
}

impl Config {
    /// Browser-like client for feed and review-page fetches. The publisher
    /// serves some pages differently to non-browser agents.
    pub fn scrape_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(&self.browser_user_agent)
            .timeout(self.scrape_timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to build scrape HTTP client")
    }

    /// Self-identifying client for metadata lookups (CrossRef asks callers
    /// to send a contactable User-Agent).
    pub fn lookup_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(&self.polite_user_agent)
            .timeout(self.lookup_timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .context("Failed to build lookup HTTP client")
    }
}
