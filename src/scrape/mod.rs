//! Scrape targets for the CNIL website.
//!
//! Three targets produce [`SourceItem`]s for the ingestion pipeline:
//!
//! | Target | Page(s) | Record |
//! |--------|---------|--------|
//! | `recitals` | regulation page | [`Recital`](crate::models::Recital) |
//! | `articles` | regulation page, then every chapter page | [`ArticleParagraph`](crate::models::ArticleParagraph) |
//! | `sanctions` | sanctions page | [`Sanction`](crate::models::Sanction) |
//!
//! Page parsing is pure (`&str` in, records out) so it is tested offline
//! against captured markup. Fetching goes through [`Fetcher`], which retries
//! rate limits, server errors and network failures with exponential backoff.

pub mod articles;
pub mod html;
pub mod recitals;
pub mod sanctions;

use anyhow::{bail, Result};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, ScraperConfig};
use crate::models::{Record, SourceItem};
use crate::progress::{SyncProgressEvent, SyncProgressReporter};

/// All scrape targets, in sync order.
pub const TARGETS: [&str; 3] = ["recitals", "articles", "sanctions"];

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Timeout { .. } | FetchError::Request { .. } => true,
        }
    }
}

/// HTTP client for HTML pages.
pub struct Fetcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl Fetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
        })
    }

    /// Fetches a page body, retrying 429, 5xx and network errors with
    /// backoff of 1s, 2s, 4s... capped at 32s.
    pub async fn fetch_html(&self, url: &str) -> Result<String, FetchError> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = Duration::from_secs(1 << attempt.min(5));
                    warn!(url, error = %e, ?delay, "fetch failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<String, FetchError> {
        debug!(url, "fetching");
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Request {
                    url: url.to_string(),
                    source: e,
                }
            }
        };

        let response = self.client.get(url).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response.text().await.map_err(classify)
    }
}

/// Items scraped from one target.
#[derive(Debug)]
pub struct ScrapeOutcome {
    pub items: Vec<SourceItem>,
    /// False when some page of the target could not be fetched, so `items`
    /// is not the whole current listing.
    pub complete: bool,
}

impl ScrapeOutcome {
    fn whole(items: Vec<SourceItem>) -> Self {
        Self {
            items,
            complete: true,
        }
    }
}

/// Scrapes one target into normalized items.
pub async fn scrape_target(
    config: &Config,
    target: &str,
    progress: &dyn SyncProgressReporter,
) -> Result<ScrapeOutcome> {
    let fetcher = Fetcher::new(&config.scraper)?;
    match target {
        "recitals" => scrape_recitals(&fetcher, &config.scraper)
            .await
            .map(ScrapeOutcome::whole),
        "articles" => scrape_articles(&fetcher, &config.scraper, progress).await,
        "sanctions" => scrape_sanctions(&fetcher, &config.scraper)
            .await
            .map(ScrapeOutcome::whole),
        other => bail!(
            "Unknown target: '{}'. Available: all, {}",
            other,
            TARGETS.join(", ")
        ),
    }
}

async fn scrape_recitals(fetcher: &Fetcher, config: &ScraperConfig) -> Result<Vec<SourceItem>> {
    let url = config.regulation_url();
    let html = fetcher.fetch_html(&url).await?;
    let recitals = recitals::parse_recitals(&html)?;
    info!(count = recitals.len(), "parsed recitals");

    let now = Utc::now();
    Ok(recitals
        .iter()
        .map(|r| r.to_source_item(Some(&url), now))
        .collect())
}

async fn scrape_articles(
    fetcher: &Fetcher,
    config: &ScraperConfig,
    progress: &dyn SyncProgressReporter,
) -> Result<ScrapeOutcome> {
    let index_html = fetcher.fetch_html(&config.regulation_url()).await?;
    let chapters = articles::parse_chapter_links(&index_html, &config.base_url)?;
    info!(count = chapters.len(), "found regulation chapters");

    let now = Utc::now();
    let total = chapters.len() as u64;
    let mut outcome = ScrapeOutcome::whole(Vec::new());

    for (i, chapter) in chapters.iter().enumerate() {
        progress.report(SyncProgressEvent::Fetching {
            target: "articles".to_string(),
            n: i as u64 + 1,
            total,
        });

        // One unreachable chapter must not sink the others.
        let html = match fetcher.fetch_html(&chapter.url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(chapter = %chapter.title, error = %e, "skipping chapter");
                outcome.complete = false;
                continue;
            }
        };

        let paragraphs = articles::parse_articles(&chapter.title, &html)?;
        debug!(chapter = %chapter.title, count = paragraphs.len(), "parsed chapter");
        outcome.items.extend(
            paragraphs
                .iter()
                .map(|p| p.to_source_item(Some(&chapter.url), now)),
        );
    }

    Ok(outcome)
}

async fn scrape_sanctions(fetcher: &Fetcher, config: &ScraperConfig) -> Result<Vec<SourceItem>> {
    let url = config.sanctions_url();
    let html = fetcher.fetch_html(&url).await?;

    let current = sanctions::parse_sanction_tables(&html)?;
    let yearly = sanctions::parse_sanctions_by_year(
        &html,
        config.sanctions_from_year,
        config.sanctions_to_year,
    )?;
    if current.is_empty() && yearly.is_empty() {
        bail!("no sanction tables found at {}", url);
    }

    let (current_len, yearly_len) = (current.len(), yearly.len());
    let merged = sanctions::merge_sanctions(current, yearly);
    info!(
        current = current_len,
        yearly = yearly_len,
        merged = merged.len(),
        "parsed sanctions"
    );

    let now = Utc::now();
    Ok(merged
        .iter()
        .map(|s| s.to_source_item(Some(&url), now))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_statuses() {
        let status = |s| FetchError::Status {
            status: s,
            url: "u".to_string(),
        };
        assert!(status(429).is_retryable());
        assert!(status(503).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(FetchError::Timeout {
            url: "u".to_string()
        }
        .is_retryable());
    }
}
