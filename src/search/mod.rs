//! Web search collaborators and the grounding glue around them.
//!
//! - [`SearchBackend`] / [`PageFetcher`] - pluggable external services
//! - [`DaedraBackend`] - DuckDuckGo search and page-to-text fetch via daedra
//! - [`SearchCache`] - run-scoped, deduplicates identical queries
//! - [`Grounding`] - per-agent and per-conflict evidence blocks

pub mod cache;
pub mod grounding;

pub use cache::{CacheStats, SearchCache};
pub use grounding::{Grounding, SearchContext};

use crate::types::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn query(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
}

/// Fetches a page and returns its readable text.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Search and page fetching powered by daedra
#[derive(Debug, Clone, Default)]
pub struct DaedraBackend;

impl DaedraBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SearchBackend for DaedraBackend {
    async fn query(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        let search_args = daedra::SearchArgs {
            query: query.to_string(),
            options: Some(daedra::SearchOptions {
                num_results: max_results,
                ..Default::default()
            }),
        };

        let response = daedra::tools::search::perform_search(&search_args)
            .await
            .map_err(|e| AppError::Search(format!("Search failed: {}", e)))?;

        Ok(response
            .data
            .iter()
            .map(|r| SearchHit {
                title: r.title.to_string(),
                url: r.url.to_string(),
                snippet: r.description.to_string(),
            })
            .collect())
    }
}

#[async_trait]
impl PageFetcher for DaedraBackend {
    async fn fetch(&self, url: &str) -> Result<String> {
        let fetch_args = daedra::VisitPageArgs {
            url: url.to_string(),
            include_images: false,
            selector: None,
        };

        daedra::tools::fetch::fetch_page(&fetch_args)
            .await
            .map(|page| page.content.to_string())
            .map_err(|e| AppError::Search(format!("Failed to fetch page: {}", e)))
    }
}
