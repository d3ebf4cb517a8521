//! L3: concurrent reachability probe of every cited URL.

use crate::types::{AppError, FinalAnalysis, ReachabilitySummary, Result, UrlCheckResult, UrlOutcome};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::time::Duration;

pub const USER_AGENT: &str = "Mozilla/5.0 (compatible; mediator-audit/1.0)";
const MAX_REDIRECTS: usize = 10;

/// 2xx/3xx ok, 401/403/429 bot-blocked, anything else failed.
pub fn classify_status(status: u16) -> UrlOutcome {
    match status {
        200..=399 => UrlOutcome::Ok,
        401 | 403 | 429 => UrlOutcome::BotBlocked,
        _ => UrlOutcome::Failed,
    }
}

/// Global source URLs plus URLs of resolver sources not yet merged,
/// deduplicated.
pub fn collect_urls(analysis: &FinalAnalysis) -> Vec<String> {
    let mut urls: BTreeSet<String> = analysis
        .sources
        .iter()
        .filter_map(|s| s.url.clone())
        .collect();
    urls.extend(
        analysis
            .conflict_resolutions
            .iter()
            .flat_map(|r| r.sources.iter())
            .filter_map(|s| s.record.url.clone()),
    );
    urls.into_iter().collect()
}

pub struct ReachabilityChecker {
    client: reqwest::Client,
    concurrency: usize,
}

impl ReachabilityChecker {
    pub fn new(timeout: Duration, concurrency: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| AppError::Audit(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            concurrency: concurrency.max(1),
        })
    }

    pub async fn check_url(&self, url: &str) -> UrlCheckResult {
        match self.client.head(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                UrlCheckResult {
                    url: url.to_string(),
                    status: Some(status),
                    error: None,
                    outcome: classify_status(status),
                }
            }
            Err(e) => {
                let error = if e.is_timeout() {
                    "timeout".to_string()
                } else {
                    e.to_string()
                };
                tracing::debug!(url, error = %error, "URL probe failed");
                UrlCheckResult {
                    url: url.to_string(),
                    status: None,
                    error: Some(error),
                    outcome: UrlOutcome::Failed,
                }
            }
        }
    }

    /// Results sorted by URL.
    pub async fn check_urls(&self, urls: &[String]) -> ReachabilitySummary {
        let mut results: Vec<UrlCheckResult> = stream::iter(urls)
            .map(|url| self.check_url(url))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by(|a, b| a.url.cmp(&b.url));

        let summary = ReachabilitySummary::from_results(results);
        tracing::info!(
            total = summary.total,
            ok = summary.ok,
            bot_blocked = summary.bot_blocked,
            failed = summary.failed,
            "URL reachability checked"
        );
        summary
    }

    pub async fn check(&self, analysis: &FinalAnalysis) -> ReachabilitySummary {
        self.check_urls(&collect_urls(analysis)).await
    }
}

/// Every URL marked failed with the same error, used when no probe could run.
pub fn all_failed(urls: &[String], error: &str) -> ReachabilitySummary {
    ReachabilitySummary::from_results(
        urls.iter()
            .map(|url| UrlCheckResult {
                url: url.clone(),
                status: None,
                error: Some(error.to_string()),
                outcome: UrlOutcome::Failed,
            })
            .collect(),
    )
}
