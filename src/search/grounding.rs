//! Grounding glue: query generation, cached fetch, dedupe and formatting.
//!
//! Every failure on this path degrades to "no grounding" for that one call.

use super::{SearchCache, SearchHit};
use crate::llm::{prompts, Reasoner};
use crate::sources::{normalize_url, string_list};
use std::collections::HashSet;
use std::sync::Arc;

/// Numbered evidence block injected into a prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchContext {
    pub hits: Vec<SearchHit>,
}

impl SearchContext {
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// `[N] Title — URL` lines, each followed by its snippet when present.
    pub fn format_for_prompt(&self) -> String {
        let mut block = String::new();
        for (i, hit) in self.hits.iter().enumerate() {
            block.push_str(&format!("[{}] {} — {}\n", i + 1, hit.title, hit.url));
            if !hit.snippet.trim().is_empty() {
                block.push_str(&format!("    {}\n", hit.snippet.trim()));
            }
        }
        block
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GroundingLimits {
    pub max_queries: usize,
    pub agent_result_cap: usize,
    pub conflict_result_cap: usize,
}

impl Default for GroundingLimits {
    fn default() -> Self {
        Self {
            max_queries: 4,
            agent_result_cap: 8,
            conflict_result_cap: 6,
        }
    }
}

pub struct Grounding {
    reasoner: Arc<Reasoner>,
    cache: Arc<SearchCache>,
    limits: GroundingLimits,
}

impl Grounding {
    pub fn new(reasoner: Arc<Reasoner>, cache: Arc<SearchCache>, limits: GroundingLimits) -> Self {
        Self {
            reasoner,
            cache,
            limits,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.has_backend()
    }

    pub fn cache(&self) -> &Arc<SearchCache> {
        &self.cache
    }

    /// Domain-scoped evidence for one agent. `prior_findings` is the agent's
    /// own Round 1 summary when building Round 2 context.
    pub async fn for_agent(
        &self,
        domain_hint: &str,
        problem: &str,
        prior_findings: Option<&str>,
    ) -> Option<SearchContext> {
        if !self.is_enabled() {
            return None;
        }
        let prompt = prompts::search_queries(
            domain_hint,
            problem,
            prior_findings,
            self.limits.max_queries,
        );
        let fallback = format!("{} {}", domain_hint, head(problem, 120));
        self.gather(&prompt, fallback, self.limits.agent_result_cap)
            .await
    }

    /// Fresh evidence targeted at one conflict or critical flag.
    pub async fn for_conflict(&self, topic: &str, description: &str) -> Option<SearchContext> {
        if !self.is_enabled() {
            return None;
        }
        let prompt = prompts::conflict_queries(topic, description, self.limits.max_queries);
        self.gather(&prompt, topic.to_string(), self.limits.conflict_result_cap)
            .await
    }

    async fn gather(
        &self,
        prompt: &prompts::Prompt,
        fallback: String,
        cap: usize,
    ) -> Option<SearchContext> {
        let mut queries = match self.reasoner.invoke(prompt, &prompts::queries_schema()).await {
            Ok(value) => string_list(value.get("queries")),
            Err(e) => {
                tracing::warn!(error = %e, "Query generation failed, using fallback query");
                Vec::new()
            }
        };
        if queries.is_empty() {
            queries.push(fallback);
        }
        queries.truncate(self.limits.max_queries);

        let results =
            futures::future::join_all(queries.iter().map(|q| self.cache.get_or_fetch(q))).await;

        let mut seen = HashSet::new();
        let hits: Vec<SearchHit> = results
            .into_iter()
            .flatten()
            .filter(|hit| match normalize_url(&hit.url) {
                Some(url) => seen.insert(url),
                None => false,
            })
            .take(cap)
            .collect();

        tracing::debug!(queries = queries.len(), hits = hits.len(), "Grounding gathered");
        (!hits.is_empty()).then_some(SearchContext { hits })
    }
}

fn head(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((i, _)) => &text[..i],
        None => text,
    }
}
